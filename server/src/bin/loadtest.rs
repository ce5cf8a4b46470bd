//! Load test for the blobfield server.
//!
//! Spawns multiple fake WebSocket clients that:
//! - Connect to the server and log in as guests
//! - Periodically pick a new random heading
//! - Receive and count player, spore and batch messages
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]

use blobfield_shared::protocol::{GuestLoginRequestMsg, Msg, Packet, PlayerDirectionMsg};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of clients to spawn
    #[arg(short, long, default_value = "100")]
    clients: u32,

    /// Test duration in seconds
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Heading changes per second per client
    #[arg(short, long, default_value = "1.0")]
    steer_rate: f64,

    /// Server URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
}

// === Metrics ===

#[derive(Default)]
struct Metrics {
    connected: AtomicU64,
    in_game: AtomicU64,
    messages_received: AtomicU64,
    player_updates: AtomicU64,
    spores_received: AtomicU64,
    directions_sent: AtomicU64,
    errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
}

fn encode(msg: Msg) -> Option<Message> {
    Packet::new(0, msg)
        .encode()
        .ok()
        .map(|json| Message::Text(json.into()))
}

// === Client task ===

async fn run_client(
    client_id: u32,
    url: String,
    steer_rate: f64,
    duration: Duration,
    metrics: Arc<Metrics>,
) {
    let connect_start = Instant::now();

    let (mut ws, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    metrics
        .latency_sum_ms
        .fetch_add(connect_start.elapsed().as_millis() as u64, Ordering::Relaxed);
    metrics.latency_count.fetch_add(1, Ordering::Relaxed);
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    let login = encode(Msg::GuestLoginRequest(GuestLoginRequestMsg {
        username: format!("bot{}", client_id),
    }));
    let Some(login) = login else {
        return;
    };
    if ws.send(login).await.is_err() {
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        metrics.connected.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let steer_interval = if steer_rate > 0.0 {
        Duration::from_secs_f64(1.0 / steer_rate)
    } else {
        Duration::from_secs(3600) // Effectively never
    };
    let mut steer_timer = tokio::time::interval(steer_interval);
    steer_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let test_end = tokio::time::Instant::now() + duration;
    let mut joined = false;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(test_end) => break,

            _ = steer_timer.tick(), if joined => {
                let direction = rand::thread_rng().gen_range(0.0..std::f64::consts::TAU);
                let Some(msg) = encode(Msg::PlayerDirection(PlayerDirectionMsg { direction })) else {
                    continue;
                };
                if ws.send(msg).await.is_ok() {
                    metrics.directions_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        let Ok(packet) = Packet::decode(&text) else {
                            continue;
                        };
                        match packet.msg {
                            Msg::OkResponse if !joined => {
                                joined = true;
                                metrics.in_game.fetch_add(1, Ordering::Relaxed);
                            }
                            Msg::Player(_) => {
                                metrics.player_updates.fetch_add(1, Ordering::Relaxed);
                            }
                            Msg::Spore(_) => {
                                metrics.spores_received.fetch_add(1, Ordering::Relaxed);
                            }
                            Msg::SporesBatch(batch) => {
                                metrics
                                    .spores_received
                                    .fetch_add(batch.spores.len() as u64, Ordering::Relaxed);
                            }
                            Msg::DenyResponse(deny) => {
                                if client_id < 3 {
                                    eprintln!("Client {} denied: {}", client_id, deny.reason);
                                }
                                metrics.errors.fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if client_id < 3 {
                            eprintln!("Client {} got Close: {:?}", client_id, frame);
                        }
                        break;
                    }
                    None => break,
                    Some(Err(e)) => {
                        if client_id < 3 {
                            eprintln!("Client {} error: {}", client_id, e);
                        }
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws.close(None).await;
    if joined {
        metrics.in_game.fetch_sub(1, Ordering::Relaxed);
    }
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

// === Main ===

#[tokio::main]
async fn main() {
    let args = Args::parse();

    println!("=== Blobfield Server Load Test ===");
    println!("Clients: {}", args.clients);
    println!("Duration: {}s", args.duration);
    println!("Steer rate: {}/s per client", args.steer_rate);
    println!("URL: {}", args.url);
    println!();

    let metrics = Arc::new(Metrics::default());
    let duration = Duration::from_secs(args.duration);

    let mut handles = Vec::with_capacity(args.clients as usize);
    println!("Spawning {} clients...", args.clients);
    let spawn_start = Instant::now();

    for client_id in 0..args.clients {
        let url = args.url.clone();
        let metrics = Arc::clone(&metrics);
        let steer_rate = args.steer_rate;
        handles.push(tokio::spawn(run_client(
            client_id, url, steer_rate, duration, metrics,
        )));

        // Stagger spawns slightly to avoid thundering herd
        if client_id % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    println!("All clients spawned in {:?}", spawn_start.elapsed());
    println!();

    // Print stats periodically
    let metrics_clone = Arc::clone(&metrics);
    let duration_secs = args.duration;
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let start = Instant::now();

        loop {
            interval.tick().await;
            let elapsed = start.elapsed().as_secs();
            if elapsed >= duration_secs + 5 {
                break;
            }
            println!(
                "[{:3}s] connected={}, in_game={}, msgs={}, players={}, spores={}, steers={}, errors={}",
                elapsed,
                metrics_clone.connected.load(Ordering::Relaxed),
                metrics_clone.in_game.load(Ordering::Relaxed),
                metrics_clone.messages_received.load(Ordering::Relaxed),
                metrics_clone.player_updates.load(Ordering::Relaxed),
                metrics_clone.spores_received.load(Ordering::Relaxed),
                metrics_clone.directions_sent.load(Ordering::Relaxed),
                metrics_clone.errors.load(Ordering::Relaxed),
            );
        }
    });

    for handle in handles {
        let _ = handle.await;
    }
    stats_handle.abort();

    // Final stats
    println!();
    println!("=== Final Results ===");
    let msgs = metrics.messages_received.load(Ordering::Relaxed);
    let players = metrics.player_updates.load(Ordering::Relaxed);
    let latency_sum = metrics.latency_sum_ms.load(Ordering::Relaxed);
    let latency_count = metrics.latency_count.load(Ordering::Relaxed);

    println!("Total messages received: {}", msgs);
    println!("Total player updates: {}", players);
    println!(
        "Total spores received: {}",
        metrics.spores_received.load(Ordering::Relaxed)
    );
    println!(
        "Total headings sent: {}",
        metrics.directions_sent.load(Ordering::Relaxed)
    );
    println!("Total errors: {}", metrics.errors.load(Ordering::Relaxed));
    if latency_count > 0 {
        println!("Average connect latency: {}ms", latency_sum / latency_count);
    }

    let secs = args.duration.max(1) as f64;
    println!();
    println!("Messages/sec (total): {:.0}", msgs as f64 / secs);
    println!(
        "Player updates per client/sec: {:.1}",
        players as f64 / args.clients.max(1) as f64 / secs
    );
}
