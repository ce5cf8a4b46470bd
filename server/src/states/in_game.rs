use super::{ClientState, Connected, Services};
use crate::connection::Connection;
use crate::consume::{validate_claim, Rejection, TargetKind};
use crate::spawn::spawn_coords;
use crate::world::{color_from_id, Player, World};
use blobfield_shared::protocol::{Msg, PlayerMsg, SporesBatchMsg, SERVER_SENDER_ID};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A spawned task that belongs to one state and must not outlive it.
struct BackgroundTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    fn spawn<F>(work: impl FnOnce(oneshot::Receiver<()>) -> F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancelled) = oneshot::channel();
        let handle = tokio::spawn(work(cancelled));
        Self { cancel, handle }
    }

    /// Signal the task and wait until it has finished.
    async fn stop(self) {
        let _ = self.cancel.send(());
        let _ = self.handle.await;
    }
}

/// The client controls a live player.
pub struct InGame {
    services: Services,
    name: String,
    client_id: u64,
    /// Generation of the player we spawned, while we may still own it
    generation: Option<u64>,
    movement: Option<BackgroundTask>,
    spore_stream: Option<BackgroundTask>,
}

impl InGame {
    pub fn new(name: String, services: Services) -> Self {
        Self {
            services,
            name,
            client_id: 0,
            generation: None,
            movement: None,
            spore_stream: None,
        }
    }

    pub(super) fn set_client(&mut self, conn: &Connection) {
        self.client_id = conn.id();
    }

    pub(super) async fn on_enter(&mut self, conn: &Connection) {
        let world = &self.services.world;
        let config = &self.services.config;
        let gameplay = &config.gameplay;

        let (x, y) = {
            let mut rng = rand::thread_rng();
            spawn_coords(
                &mut rng,
                gameplay.player_start_radius,
                &[&world.players, &world.spores],
                config.spawn,
            )
        };
        let mut player = Player::spawn(self.name.clone(), x, y, color_from_id(self.client_id), gameplay);
        player.generation = world.next_generation();
        let announce = player.to_msg(self.client_id);

        tracing::info!(
            "Client {} [InGame]: adding player {} at ({:.0}, {:.0})",
            self.client_id,
            self.name,
            x,
            y
        );
        self.generation = Some(player.generation);
        world.players.insert(self.client_id, player);

        conn.socket_send(Msg::Player(announce.clone()));
        for (id, peer) in world.players.snapshot() {
            if id != self.client_id {
                conn.socket_send_as(Msg::Player(peer.to_msg(id)), id);
            }
        }
        conn.broadcast(Msg::Player(announce)).await;

        let world = Arc::clone(world);
        let conn = conn.clone();
        let batch_size = config.spores.stream_batch_size;
        let pause = config.spores.stream_batch_pause;
        self.spore_stream = Some(BackgroundTask::spawn(move |cancelled| {
            stream_spores(world, conn, batch_size, pause, cancelled)
        }));
    }

    pub(super) async fn handle_message(
        &mut self,
        conn: &Connection,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        // The notice of our elimination may have been dropped on a full inbox
        let eliminated = self.generation.is_some() && !self.is_live();

        let next = self.dispatch(conn, sender_id, msg).await;
        if next.is_none() && eliminated {
            tracing::info!(
                "Client {} [InGame]: player {} is gone from the world, respawning",
                self.client_id,
                self.name
            );
            conn.socket_send_as(Msg::player_consumed(self.client_id), SERVER_SENDER_ID);
            return Some(self.respawn());
        }
        next
    }

    async fn dispatch(&mut self, conn: &Connection, sender_id: u64, msg: Msg) -> Option<ClientState> {
        let own = sender_id == conn.id();
        match msg {
            Msg::Player(player) => {
                if own {
                    tracing::warn!("Client {} [InGame]: received player update from ourself", self.client_id);
                } else {
                    conn.socket_send_as(Msg::Player(player), sender_id);
                }
            }
            Msg::PlayerDirection(direction) if own => {
                self.handle_direction(conn, direction.direction);
            }
            Msg::Chat(chat) => {
                if own {
                    conn.broadcast(Msg::Chat(chat)).await;
                } else {
                    conn.socket_send_as(Msg::Chat(chat), sender_id);
                }
            }
            Msg::SporeConsumed(claim) if own => {
                if let Err(rejection) = self.consume_spore(conn, claim.spore_id).await {
                    self.reject("spore", claim.spore_id, rejection);
                }
            }
            Msg::PlayerConsumed(claim) if own => {
                if let Err(rejection) = self.consume_player(conn, claim.player_id).await {
                    self.reject("player", claim.player_id, rejection);
                }
            }
            Msg::PlayerConsumed(event) => {
                if event.player_id != self.client_id {
                    conn.socket_send_as(Msg::PlayerConsumed(event), sender_id);
                } else if self.is_live() {
                    // Already respawned; this names the previous incarnation
                    tracing::debug!(
                        "Client {} [InGame]: stale elimination notice from {}",
                        self.client_id,
                        sender_id
                    );
                } else {
                    conn.socket_send_as(Msg::PlayerConsumed(event), sender_id);
                    tracing::info!(
                        "Client {} [InGame]: player {} was consumed by {}, respawning",
                        self.client_id,
                        self.name,
                        sender_id
                    );
                    return Some(self.respawn());
                }
            }
            Msg::Disconnect(disconnect) => {
                if own {
                    tracing::info!(
                        "Client {} [InGame]: leaving the world: {}",
                        self.client_id,
                        disconnect.reason
                    );
                    // Peers must see nothing of ours after the disconnect
                    self.leave_world().await;
                    conn.broadcast(Msg::Disconnect(disconnect)).await;
                    return Some(ClientState::Connected(Connected::new(self.services.clone())));
                }
                conn.socket_send_as(Msg::Disconnect(disconnect), sender_id);
            }
            msg @ (Msg::SporeConsumed(_) | Msg::Spore(_)) if !own => {
                conn.socket_send_as(msg, sender_id);
            }
            other => {
                tracing::warn!(
                    "Client {} [InGame]: unexpected {} message from {}",
                    self.client_id,
                    other.kind(),
                    sender_id
                );
            }
        }
        None
    }

    pub(super) async fn on_exit(&mut self, _conn: &Connection) {
        self.leave_world().await;
    }

    /// Stop our tasks, then remove our player unless a newer one replaced it.
    async fn leave_world(&mut self) {
        if let Some(task) = self.movement.take() {
            task.stop().await;
        }
        if let Some(task) = self.spore_stream.take() {
            task.stop().await;
        }
        if let Some(generation) = self.generation.take() {
            self.services.world.remove_player(self.client_id, generation);
        }
    }

    fn respawn(&self) -> ClientState {
        ClientState::InGame(InGame::new(self.name.clone(), self.services.clone()))
    }

    fn is_live(&self) -> bool {
        self.generation
            .is_some_and(|generation| self.services.world.is_live(self.client_id, generation))
    }

    /// A copy of our player, if it is still the one registered in the world.
    fn live_player(&self) -> Option<(u64, Player)> {
        let generation = self.generation?;
        let player = self.services.world.players.get(self.client_id)?;
        (player.generation == generation).then_some((generation, player))
    }

    fn handle_direction(&mut self, conn: &Connection, direction: f64) {
        let Some(generation) = self.generation else {
            return;
        };
        let world = &self.services.world;
        if world
            .update_player(self.client_id, generation, |player| player.direction = direction)
            .is_none()
        {
            return;
        }

        if self.movement.is_none() {
            let world = Arc::clone(world);
            let conn = conn.clone();
            let tick_secs = self.services.config.gameplay.movement_tick_secs();
            self.movement = Some(BackgroundTask::spawn(move |cancelled| {
                move_player(world, generation, conn, tick_secs, cancelled)
            }));
        }
    }

    async fn consume_spore(&mut self, conn: &Connection, spore_id: u64) -> Result<(), Rejection> {
        let world = &self.services.world;
        let Some((generation, player)) = self.live_player() else {
            tracing::debug!("Client {} [InGame]: not in the world, ignoring spore claim", self.client_id);
            return Ok(());
        };
        let unknown = Rejection::UnknownTarget {
            kind: TargetKind::Spore,
            id: spore_id,
        };

        let spore = world.spores.get(spore_id).ok_or_else(|| unknown.clone())?;
        validate_claim(&self.services.config.gameplay, &player, &spore, TargetKind::Spore)?;
        // Another claimant may have won the race since the lookup
        world.spores.remove(spore_id).ok_or(unknown)?;

        let id = self.client_id;
        let Some(updated) = world.update_player(id, generation, |player| {
            player.absorb(spore.radius);
            player.to_msg(id)
        }) else {
            tracing::debug!("Client {} [InGame]: eliminated while claiming spore {}", id, spore_id);
            return Ok(());
        };
        tracing::debug!(
            "Client {} [InGame]: consumed spore {}, radius now {:.2}",
            self.client_id,
            spore_id,
            updated.radius
        );
        conn.broadcast(Msg::spore_consumed(spore_id)).await;
        self.announce(conn, updated).await;
        Ok(())
    }

    async fn consume_player(&mut self, conn: &Connection, target_id: u64) -> Result<(), Rejection> {
        if target_id == self.client_id {
            return Err(Rejection::SelfTarget);
        }
        let world = &self.services.world;
        let Some((generation, player)) = self.live_player() else {
            tracing::debug!("Client {} [InGame]: not in the world, ignoring player claim", self.client_id);
            return Ok(());
        };
        let unknown = Rejection::UnknownTarget {
            kind: TargetKind::Player,
            id: target_id,
        };

        let target = world.players.get(target_id).ok_or_else(|| unknown.clone())?;
        validate_claim(&self.services.config.gameplay, &player, &target, TargetKind::Player)?;
        // Only the incarnation we validated against
        world.remove_player(target_id, target.generation).ok_or(unknown)?;

        let id = self.client_id;
        let Some(updated) = world.update_player(id, generation, |player| {
            player.absorb(target.radius());
            player.to_msg(id)
        }) else {
            tracing::debug!("Client {} [InGame]: eliminated while claiming player {}", id, target_id);
            return Ok(());
        };
        tracing::info!(
            "Client {} [InGame]: consumed player {} ({}), radius now {:.2}",
            self.client_id,
            target_id,
            target.name,
            updated.radius
        );
        conn.broadcast(Msg::player_consumed(target_id)).await;
        self.announce(conn, updated).await;
        Ok(())
    }

    /// Mirror our player's state to our client and to everyone else.
    async fn announce(&self, conn: &Connection, player: PlayerMsg) {
        conn.socket_send(Msg::Player(player.clone()));
        conn.broadcast(Msg::Player(player)).await;
    }

    fn reject(&self, what: &str, target_id: u64, rejection: Rejection) {
        tracing::warn!(
            "Client {} [InGame]: rejected claim on {} {}: {}",
            self.client_id,
            what,
            target_id,
            rejection
        );
    }
}

/// Send the current spore pool in batches, pausing between them so the
/// outbound queue is never flooded.
async fn stream_spores(
    world: Arc<World>,
    conn: Connection,
    batch_size: usize,
    pause: Duration,
    mut cancelled: oneshot::Receiver<()>,
) {
    let snapshot = world.spores.snapshot();
    let mut batches = snapshot.chunks(batch_size).peekable();
    while let Some(batch) = batches.next() {
        let spores = batch.iter().map(|(id, spore)| spore.to_msg(*id)).collect();
        conn.socket_send(Msg::SporesBatch(SporesBatchMsg { spores }));

        if batches.peek().is_none() {
            break;
        }
        tokio::select! {
            _ = &mut cancelled => return,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    tracing::debug!("Client {} [InGame]: sent {} spores", conn.id(), snapshot.len());
}

/// Extrapolate the player along its heading at a fixed tick.
async fn move_player(
    world: Arc<World>,
    generation: u64,
    conn: Connection,
    tick_secs: f64,
    mut cancelled: oneshot::Receiver<()>,
) {
    let id = conn.id();
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(tick_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut cancelled => break,
            _ = ticker.tick() => {}
        }

        let update = world.update_player(id, generation, |player| {
            player.advance(tick_secs);
            player.to_msg(id)
        });
        let Some(update) = update else {
            // Wake the state so it respawns even if no notice ever arrives
            tracing::debug!("Client {} [InGame]: player gone, movement stopped", id);
            conn.notify_self(Msg::player_consumed(id));
            break;
        };
        conn.broadcast(Msg::Player(update.clone())).await;
        conn.socket_send(Msg::Player(update));
    }
}
