use blobfield_server::accounts::FileAccounts;
use blobfield_server::config::ServerConfig;
use blobfield_server::connection::QueueCapacity;
use blobfield_server::hub::Hub;
use blobfield_server::states::Services;
use blobfield_server::world::World;
use blobfield_server::ws::{router, AppState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Account store file, created if missing
    #[arg(short, long, default_value = "accounts.json")]
    accounts: PathBuf,

    /// bcrypt cost factor for new passwords
    #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
    bcrypt_cost: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = ServerConfig {
        listen_addr: format!("0.0.0.0:{}", args.port),
        accounts_path: args.accounts,
        bcrypt_cost: args.bcrypt_cost,
        ..Default::default()
    };

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid server configuration: {}", e);
        std::process::exit(1);
    }

    let accounts = match FileAccounts::open(&config.accounts_path) {
        Ok(accounts) => accounts,
        Err(e) => {
            eprintln!("Cannot open account store: {}", e);
            std::process::exit(1);
        }
    };

    let world = Arc::new(World::new());
    let (hub, hub_handle) = Hub::new(config.clone(), Arc::clone(&world));
    tokio::spawn(hub.run());

    let listen_addr = config.listen_addr.clone();
    let capacity = QueueCapacity {
        outbound: config.outbound_capacity,
        inbox: config.inbox_capacity,
    };
    let app = router(AppState {
        hub: hub_handle,
        services: Services {
            world,
            accounts: Arc::new(accounts),
            config: Arc::new(config),
        },
        capacity,
    });

    tracing::info!("Starting blobfield server on {}", listen_addr);
    println!("Blobfield server listening on {}", listen_addr);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Cannot bind {}: {}", listen_addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
