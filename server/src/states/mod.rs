//! Per-connection state machine.
//!
//! A connection is always in exactly one state. States never replace
//! themselves: a handler returns the next state and
//! [`Client::set_state`](crate::connection::Client::set_state) performs the
//! exit/enter sequence.

mod connected;
mod in_game;

pub use connected::Connected;
pub use in_game::InGame;

use crate::accounts::AccountDirectory;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::world::World;
use blobfield_shared::protocol::Msg;
use std::sync::Arc;

/// Collaborators handed to every state at construction.
#[derive(Clone)]
pub struct Services {
    pub world: Arc<World>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub config: Arc<ServerConfig>,
}

pub enum ClientState {
    Connected(Connected),
    InGame(InGame),
}

impl ClientState {
    pub fn name(&self) -> &'static str {
        match self {
            ClientState::Connected(_) => "Connected",
            ClientState::InGame(_) => "InGame",
        }
    }

    pub fn set_client(&mut self, conn: &Connection) {
        match self {
            ClientState::Connected(state) => state.set_client(conn),
            ClientState::InGame(state) => state.set_client(conn),
        }
    }

    pub async fn on_enter(&mut self, conn: &Connection) {
        match self {
            ClientState::Connected(state) => state.on_enter(conn),
            ClientState::InGame(state) => state.on_enter(conn).await,
        }
    }

    /// Handle one message; `Some` asks for a transition.
    pub async fn handle_message(
        &mut self,
        conn: &Connection,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        match self {
            ClientState::Connected(state) => state.handle_message(conn, sender_id, msg).await,
            ClientState::InGame(state) => state.handle_message(conn, sender_id, msg).await,
        }
    }

    pub async fn on_exit(&mut self, conn: &Connection) {
        match self {
            ClientState::Connected(_) => {}
            ClientState::InGame(state) => state.on_exit(conn).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::accounts::MemoryAccounts;
    use crate::connection::Client;
    use crate::hub::{Hub, HubHandle, PeerHandle};
    use blobfield_shared::protocol::Packet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    pub fn services() -> Services {
        services_with(|_| {})
    }

    /// Test services with a config adjusted by `configure`.
    pub fn services_with(configure: impl FnOnce(&mut ServerConfig)) -> Services {
        let mut config = ServerConfig {
            bcrypt_cost: 4,
            ..Default::default()
        };
        config.spores.pool_size = 0;
        config.spores.stream_batch_pause = Duration::from_millis(5);
        configure(&mut config);
        Services {
            world: Arc::new(World::new()),
            accounts: Arc::new(MemoryAccounts::new()),
            config: Arc::new(config),
        }
    }

    pub fn start_hub(services: &Services) -> HubHandle {
        let (hub, handle) = Hub::new((*services.config).clone(), Arc::clone(&services.world));
        tokio::spawn(hub.run());
        handle
    }

    /// A client driven directly, plus the queues around it.
    pub struct Harness {
        pub client: Client,
        /// What the client's socket would receive
        pub outbound: mpsc::Receiver<Packet>,
        /// A second registered connection that sees every broadcast
        pub observer: mpsc::Receiver<Packet>,
        pub observer_id: u64,
        pub services: Services,
    }

    impl Harness {
        pub async fn new() -> Self {
            Self::with_services(services()).await
        }

        pub async fn with_services(services: Services) -> Self {
            let hub = start_hub(&services);

            let (observer_tx, observer) = mpsc::channel(256);
            let observer_id = hub.register(PeerHandle::new(observer_tx)).await.unwrap();
            // The client's own inbox is not drained; tests feed it directly.
            let (inbox_tx, _) = mpsc::channel(1);
            let id = hub.register(PeerHandle::new(inbox_tx)).await.unwrap();

            let (outbound_tx, outbound) = mpsc::channel(256);
            let mut client = Client::new(Connection::new(id, outbound_tx, hub));
            client.initialize(services.clone()).await;

            let mut harness = Self {
                client,
                outbound,
                observer,
                observer_id,
                services,
            };
            // Entering the initial state announces our id
            match harness.next_outbound().await.msg {
                Msg::Id(m) => assert_eq!(m.id, id),
                other => panic!("Expected Id, got {:?}", other),
            }
            harness
        }

        pub fn id(&self) -> u64 {
            self.client.id()
        }

        /// A message from our own socket.
        pub async fn send(&mut self, msg: Msg) {
            let id = self.id();
            self.client.process_message(id, msg).await;
        }

        pub async fn next_outbound(&mut self) -> Packet {
            tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
                .await
                .expect("no outbound packet")
                .expect("outbound closed")
        }

        /// Next broadcast seen by the observer, skipping nothing.
        pub async fn next_broadcast(&mut self) -> Packet {
            tokio::time::timeout(Duration::from_secs(2), self.observer.recv())
                .await
                .expect("no broadcast")
                .expect("observer closed")
        }

        /// Whether anything reaches the socket or the observer within a short window.
        pub async fn quiet(&mut self) -> bool {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.outbound.try_recv().is_err() && self.observer.try_recv().is_err()
        }

        /// Guest-login and consume the ok + player replies.
        pub async fn enter_game(&mut self, name: &str) {
            self.send(Msg::GuestLoginRequest(
                blobfield_shared::protocol::GuestLoginRequestMsg {
                    username: name.to_string(),
                },
            ))
            .await;
            assert!(matches!(self.next_outbound().await.msg, Msg::OkResponse));
            assert!(matches!(self.next_outbound().await.msg, Msg::Player(_)));
            // Entering the world is announced to peers
            assert!(matches!(self.next_broadcast().await.msg, Msg::Player(_)));
        }
    }
}
