//! Process-wide coordinator.
//!
//! The hub task owns the connection registry's bookkeeping: it is the only
//! code that adds or removes connections, and it fans broadcasts out to every
//! registered connection but the sender. It also seeds the spore pool and
//! keeps it topped up.

use crate::config::{ServerConfig, SporeConfig};
use crate::registry::Registry;
use crate::spawn::{spawn_coords, SpawnSearch};
use crate::world::{Spore, World};
use blobfield_shared::protocol::{Msg, Packet, SERVER_SENDER_ID};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Delivery endpoint of a registered connection.
///
/// Packets land in the connection's inbox and are dispatched by the
/// connection's own task, one at a time.
#[derive(Clone)]
pub struct PeerHandle {
    inbox: mpsc::Sender<Packet>,
}

impl PeerHandle {
    pub fn new(inbox: mpsc::Sender<Packet>) -> Self {
        Self { inbox }
    }

    /// Queue a packet for the peer without waiting. A full or closed inbox
    /// drops the packet; that is the peer's problem, not the caller's.
    pub fn deliver(&self, peer_id: u64, packet: Packet) {
        match self.inbox.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(packet)) => {
                tracing::warn!(
                    "Client {} inbox full, dropping {} from {}",
                    peer_id,
                    packet.msg.kind(),
                    packet.sender_id
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Client {} inbox closed", peer_id);
            }
        }
    }
}

/// A connection asking for an id.
pub struct Registration {
    pub peer: PeerHandle,
    /// Receives the assigned id; this is the connection's initialization hook.
    pub response: oneshot::Sender<u64>,
}

/// Cloneable access to the hub's three channels.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<u64>,
    broadcast_tx: mpsc::Sender<Packet>,
    clients: Arc<Registry<PeerHandle>>,
}

impl HubHandle {
    /// Register a connection and wait for its id. `None` if the hub is gone.
    pub async fn register(&self, peer: PeerHandle) -> Option<u64> {
        let (response, id_rx) = oneshot::channel();
        if self
            .register_tx
            .send(Registration { peer, response })
            .await
            .is_err()
        {
            tracing::error!("Hub is not running, cannot register client");
            return None;
        }
        id_rx.await.ok()
    }

    pub async fn unregister(&self, id: u64) {
        if self.unregister_tx.send(id).await.is_err() {
            tracing::debug!("Hub is not running, client {} not unregistered", id);
        }
    }

    /// Deliver `packet` to every registered connection except its sender.
    pub async fn broadcast(&self, packet: Packet) {
        if self.broadcast_tx.send(packet).await.is_err() {
            tracing::debug!("Hub is not running, broadcast dropped");
        }
    }

    /// Read-only lookup of a registered connection.
    pub fn peer(&self, id: u64) -> Option<PeerHandle> {
        self.clients.get(id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

pub struct Hub {
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<u64>,
    broadcast_rx: mpsc::Receiver<Packet>,
    clients: Arc<Registry<PeerHandle>>,
    world: Arc<World>,
    handle: HubHandle,
    config: ServerConfig,
}

impl Hub {
    pub fn new(config: ServerConfig, world: Arc<World>) -> (Self, HubHandle) {
        let capacity = config.hub_channel_capacity;
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let clients = Arc::new(Registry::new());

        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            clients: Arc::clone(&clients),
        };
        let hub = Self {
            register_rx,
            unregister_rx,
            broadcast_rx,
            clients,
            world,
            handle: handle.clone(),
            config,
        };
        (hub, handle)
    }

    /// Seed the spore pool, start replenishment, then serve the three
    /// channels until every handle is dropped.
    pub async fn run(mut self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.rng_seed);
        for _ in 0..self.config.spores.pool_size {
            let spore = new_spore(&mut rng, &self.world, &self.config.spores, self.config.spawn);
            self.world.spores.add(spore);
        }
        tracing::info!("Seeded {} spores", self.world.spores.len());

        let replenisher = tokio::spawn(replenish_spores(
            Arc::clone(&self.world),
            self.handle.clone(),
            self.config.spores.clone(),
            self.config.spawn,
            rng,
        ));
        // Only the replenisher's clone is needed from here on.
        drop(self.handle);

        loop {
            tokio::select! {
                Some(Registration { peer, response }) = self.register_rx.recv() => {
                    let id = self.clients.add(peer);
                    if response.send(id).is_err() {
                        // Connection went away before it learned its id
                        self.clients.remove(id);
                        continue;
                    }
                    tracing::info!("Client {} registered", id);
                }
                Some(id) = self.unregister_rx.recv() => {
                    self.clients.remove(id);
                    tracing::info!("Client {} unregistered", id);
                }
                Some(packet) = self.broadcast_rx.recv() => {
                    self.clients.for_each(|id, peer| {
                        if id != packet.sender_id {
                            peer.deliver(id, packet.clone());
                        }
                    });
                }
                else => break,
            }
        }

        replenisher.abort();
        tracing::info!("Hub loop ended");
    }
}

/// Create a spore at a free spot.
pub fn new_spore(
    rng: &mut impl Rng,
    world: &World,
    config: &SporeConfig,
    search: SpawnSearch,
) -> Spore {
    let radius = match Normal::new(config.radius_mean, config.radius_spread) {
        Ok(normal) => normal.sample(rng),
        Err(_) => config.radius_mean,
    }
    .max(config.radius_min);
    let (x, y) = spawn_coords(rng, radius, &[&world.players, &world.spores], search);
    Spore { x, y, radius }
}

/// Periodically top the pool back up, announcing each new spore.
async fn replenish_spores(
    world: Arc<World>,
    hub: HubHandle,
    config: SporeConfig,
    search: SpawnSearch,
    mut rng: ChaCha8Rng,
) {
    let mut ticker = tokio::time::interval(config.replenish_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let remaining = world.spores.len();
        let missing = config.pool_size.saturating_sub(remaining);
        if missing == 0 {
            continue;
        }

        let batch = missing.min(config.replenish_max_per_round);
        tracing::info!("{} spores remaining, replenishing {}", remaining, batch);
        for _ in 0..batch {
            let spore = new_spore(&mut rng, &world, &config, search);
            let id = world.spores.add(spore);
            hub.broadcast(Packet::new(SERVER_SENDER_ID, Msg::Spore(spore.to_msg(id))))
                .await;
            tokio::time::sleep(config.replenish_pause).await;
        }
    }
}
