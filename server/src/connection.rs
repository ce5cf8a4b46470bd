//! Per-client session: the facade state handlers talk through, the state
//! machine driver, and the inbound/outbound pumps.

use crate::hub::{HubHandle, PeerHandle};
use crate::states::{ClientState, Connected, Services};
use blobfield_shared::protocol::{Msg, Packet, SERVER_SENDER_ID};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;

/// What a state handler can do with its connection.
///
/// Cheap to clone; background tasks of a state hold a clone and are stopped
/// before the state exits.
#[derive(Clone)]
pub struct Connection {
    id: u64,
    outbound: mpsc::Sender<Packet>,
    hub: HubHandle,
}

impl Connection {
    pub fn new(id: u64, outbound: mpsc::Sender<Packet>, hub: HubHandle) -> Self {
        Self { id, outbound, hub }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a message for our own client.
    pub fn socket_send(&self, msg: Msg) {
        self.socket_send_as(msg, self.id);
    }

    /// Queue a message for our own client as if `sender_id` had sent it.
    /// Never waits: a full queue drops the message.
    pub fn socket_send_as(&self, msg: Msg, sender_id: u64) {
        match self.outbound.try_send(Packet::new(sender_id, msg)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(packet)) => {
                tracing::warn!(
                    "Client {}: send queue full, dropping {} message",
                    self.id,
                    packet.msg.kind()
                );
            }
            Err(mpsc::error::TrySendError::Closed(packet)) => {
                tracing::debug!(
                    "Client {}: send queue closed, dropping {} message",
                    self.id,
                    packet.msg.kind()
                );
            }
        }
    }

    /// Hand a message to one peer for processing, with us as the sender.
    pub fn pass_to_peer(&self, msg: Msg, peer_id: u64) {
        match self.hub.peer(peer_id) {
            Some(peer) => peer.deliver(peer_id, Packet::new(self.id, msg)),
            None => tracing::warn!("Client {}: peer {} not found", self.id, peer_id),
        }
    }

    /// Queue a server message for our own dispatch, behind whatever is
    /// already in our inbox.
    pub fn notify_self(&self, msg: Msg) {
        match self.hub.peer(self.id) {
            Some(me) => me.deliver(self.id, Packet::new(SERVER_SENDER_ID, msg)),
            None => tracing::debug!("Client {}: not registered, dropping {}", self.id, msg.kind()),
        }
    }

    /// Hand a message to every other connection for processing.
    pub async fn broadcast(&self, msg: Msg) {
        self.hub.broadcast(Packet::new(self.id, msg)).await;
    }
}

/// A connection plus its one active state.
pub struct Client {
    conn: Connection,
    state: Option<ClientState>,
}

impl Client {
    pub fn new(conn: Connection) -> Self {
        Self { conn, state: None }
    }

    pub fn id(&self) -> u64 {
        self.conn.id()
    }

    pub fn state_name(&self) -> &'static str {
        self.state.as_ref().map_or("None", ClientState::name)
    }

    pub fn state(&self) -> Option<&ClientState> {
        self.state.as_ref()
    }

    /// Enter the initial state once the hub has assigned our id.
    pub async fn initialize(&mut self, services: Services) {
        self.set_state(Some(ClientState::Connected(Connected::new(services))))
            .await;
    }

    /// The only place the active state changes: exit the old one, then
    /// attach and enter the new one.
    pub async fn set_state(&mut self, next: Option<ClientState>) {
        let prev_name = self.state_name();
        if let Some(mut prev) = self.state.take() {
            prev.on_exit(&self.conn).await;
        }

        let next_name = next.as_ref().map_or("None", ClientState::name);
        tracing::info!(
            "Client {}: changing state from {} to {}",
            self.id(),
            prev_name,
            next_name
        );

        if let Some(mut next) = next {
            next.set_client(&self.conn);
            next.on_enter(&self.conn).await;
            self.state = Some(next);
        }
    }

    /// Dispatch one message to the active state and apply any transition it asks for.
    pub async fn process_message(&mut self, sender_id: u64, msg: Msg) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if let Some(next) = state.handle_message(&self.conn, sender_id, msg).await {
            self.set_state(Some(next)).await;
        }
    }

    /// Decode a transport frame and dispatch it.
    pub async fn handle_frame(&mut self, text: &str) {
        let packet = match Packet::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Client {}: dropping malformed packet: {}", self.id(), e);
                return;
            }
        };

        // Clients may leave the sender unset; it is always them.
        let sender_id = match packet.sender_id {
            0 => self.id(),
            id if id == self.id() => id,
            other => {
                tracing::warn!(
                    "Client {}: dropping {} claiming to be from {}",
                    self.id(),
                    packet.msg.kind(),
                    other
                );
                return;
            }
        };
        self.process_message(sender_id, packet.msg).await;
    }

    /// Tear down: the active state exits, peers learn we left if we were in
    /// the world, the hub forgets us, and our send queue closes.
    pub async fn close(mut self, reason: &str) {
        tracing::info!("Client {}: closing connection because: {}", self.id(), reason);
        let was_in_game = matches!(self.state, Some(ClientState::InGame(_)));
        // Exit first: nothing of ours may reach peers after the disconnect
        self.set_state(None).await;
        if was_in_game {
            self.conn.broadcast(Msg::disconnect(reason)).await;
        }
        self.conn.hub.unregister(self.id()).await;
    }
}

/// Queue sizes of one connection.
#[derive(Debug, Clone, Copy)]
pub struct QueueCapacity {
    pub outbound: usize,
    pub inbox: usize,
}

/// Run one connection to completion over any text-frame transport.
///
/// `inbound` ends on a clean close and on a transport error alike; both lead
/// to the same teardown.
pub async fn serve<St, Si>(
    mut inbound: St,
    sink: Si,
    hub: HubHandle,
    services: Services,
    capacity: QueueCapacity,
) where
    St: Stream<Item = String> + Unpin + Send,
    Si: Sink<String> + Unpin + Send + 'static,
    Si::Error: Display,
{
    let (inbox_tx, mut inbox_rx) = mpsc::channel(capacity.inbox);
    let Some(id) = hub.register(PeerHandle::new(inbox_tx)).await else {
        return;
    };

    let (outbound_tx, outbound_rx) = mpsc::channel(capacity.outbound);
    let mut writer = tokio::spawn(write_pump(id, sink, outbound_rx));
    let mut writer_done = false;

    let mut client = Client::new(Connection::new(id, outbound_tx, hub));
    client.initialize(services).await;

    let reason = loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(text) => client.handle_frame(&text).await,
                None => break "read pump stopped",
            },
            Some(packet) = inbox_rx.recv() => {
                client.process_message(packet.sender_id, packet.msg).await;
            }
            result = &mut writer => {
                writer_done = true;
                if let Err(e) = result {
                    tracing::warn!("Client {}: write pump failed: {}", id, e);
                }
                break "write pump stopped";
            }
        }
    };

    client.close(reason).await;
    drop(inbox_rx);
    if !writer_done {
        if let Err(e) = writer.await {
            tracing::warn!("Client {}: write pump failed: {}", id, e);
        }
    }
}

/// Drain the outbound queue into the transport until every sender is gone,
/// then close the transport.
async fn write_pump<Si>(id: u64, mut sink: Si, mut outbound: mpsc::Receiver<Packet>)
where
    Si: Sink<String> + Unpin,
    Si::Error: Display,
{
    while let Some(packet) = outbound.recv().await {
        let text = match packet.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Client {}: error encoding {} packet: {}", id, packet.msg.kind(), e);
                continue;
            }
        };
        if let Err(e) = sink.send(text).await {
            tracing::info!("Client {}: error writing {} packet: {}", id, packet.msg.kind(), e);
            return;
        }
    }
    let _ = sink.close().await;
    tracing::debug!("Client {}: write pump stopped", id);
}
