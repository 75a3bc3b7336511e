//! Host-driven session: the host feeds radio events in and executes the returned actions.
//!
//! Exchange per peer:
//!
//! ```text
//! initiator                     responder
//!   Idle ── RTS ──────────────▶   (send CTS) AwaitingData
//!   AwaitingCts ◀────────── CTS
//!   (send data) AwaitingFinalAck ─▶ (send ACK) Idle
//!   AwaitingFinalAck ◀───── ACK
//!   (send RTS) AwaitingCts ...
//! ```
//!
//! A broadcast from an unknown station registers it and opens an exchange with RTS.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::address::MacAddr;
use crate::event::{Event, SendStatus};
use crate::protocol::{Token, TokenError, ANNOUNCE_PAYLOAD, DEFAULT_DATA_PAYLOAD};
use crate::registry::{Interface, PeerInfo, PeerRegistry, RegisterOutcome, RegistryError};
use crate::send::{PendingSends, SendId, SendRequest};
use crate::wire::{self, FrameDecodeError, FrameKind, SequenceCounters};

/// Default ticks an exchange may wait for the next frame before it is reset.
pub const DEFAULT_HANDSHAKE_TIMEOUT_TICKS: u64 = 10;

/// Default ticks a send may wait for its completion before its buffer is reclaimed.
pub const DEFAULT_SEND_TIMEOUT_TICKS: u64 = 5;

/// Which side opens the exchange with the statically configured peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Initiator,
    Responder,
}

/// Where an exchange with one peer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    /// Announce broadcast sent, waiting for some station to answer with RTS.
    AwaitingAck,
    /// RTS sent.
    AwaitingCts,
    /// CTS sent.
    AwaitingData,
    /// Data sent.
    AwaitingFinalAck,
}

#[derive(Debug, Clone, Copy)]
struct Exchange {
    state: ExchangeState,
    since_tick: u64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    /// Statically known counterpart, registered encrypted at start.
    pub peer: Option<MacAddr>,
    /// Send the discovery broadcast at start.
    pub announce: bool,
    pub channel: u8,
    pub interface: Interface,
    /// Application payload sent after CTS.
    pub data_payload: Vec<u8>,
    /// 0 disables handshake timeouts.
    pub handshake_timeout_ticks: u64,
    /// 0 keeps in-flight sends until their completion arrives.
    pub send_timeout_ticks: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Initiator,
            peer: None,
            announce: false,
            channel: 1,
            interface: Interface::Station,
            data_payload: DEFAULT_DATA_PAYLOAD.to_vec(),
            handshake_timeout_ticks: DEFAULT_HANDSHAKE_TIMEOUT_TICKS,
            send_timeout_ticks: DEFAULT_SEND_TIMEOUT_TICKS,
        }
    }
}

/// Action for the host to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Add the peer to the radio's peer list.
    RegisterPeer(PeerInfo),
    /// Hand the frame for `id` (see [`Session::frame`]) to the radio.
    Transmit { id: SendId, destination: MacAddr },
    /// Call [`Session::announce`] once after the settle delay.
    ScheduleAnnounce,
    /// Application data received from a peer.
    Deliver { from: MacAddr, payload: Vec<u8> },
}

/// Session context: peer registry, sequence counters, in-flight sends and per-peer exchanges.
pub struct Session {
    config: SessionConfig,
    registry: PeerRegistry,
    counters: SequenceCounters,
    pending: PendingSends,
    exchanges: HashMap<MacAddr, Exchange>,
    tick_count: u64,
    skipped_sends: u64,
    reclaimed_sends: u64,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            registry: PeerRegistry::new(),
            counters: SequenceCounters::new(),
            pending: PendingSends::new(),
            exchanges: HashMap::new(),
            tick_count: 0,
            skipped_sends: 0,
            reclaimed_sends: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Encoded frame for an in-flight send.
    pub fn frame(&self, id: SendId) -> Option<&[u8]> {
        self.pending.frame(id)
    }

    /// Number of send buffers not yet released.
    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    /// Transmissions dropped because their buffer could not be allocated.
    pub fn skipped_sends(&self) -> u64 {
        self.skipped_sends
    }

    /// Sends released by `tick` because their completion never arrived.
    pub fn reclaimed_sends(&self) -> u64 {
        self.reclaimed_sends
    }

    pub fn exchange_state(&self, peer: &MacAddr) -> ExchangeState {
        self.exchanges
            .get(peer)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    /// One-shot startup: register the static peer, announce, and open the exchange if initiating.
    pub fn start(&mut self) -> Result<Vec<OutboundAction>, SessionError> {
        let mut actions = Vec::new();
        if let Some(peer) = self.config.peer {
            self.register(peer, true, &mut actions)?;
        }
        if self.config.announce {
            self.push_announce(&mut actions);
        }
        if let (Role::Initiator, Some(peer)) = (self.config.role, self.config.peer) {
            tracing::info!(%peer, "opening exchange with RTS");
            self.send_token(peer, Token::Rts, ExchangeState::AwaitingCts, &mut actions);
        }
        Ok(actions)
    }

    /// Dispatch one queued event.
    pub fn handle_event(&mut self, event: Event) -> Result<Vec<OutboundAction>, SessionError> {
        match event {
            Event::SendCompleted { address, status } => Ok(self.on_send_complete(address, status)),
            Event::FrameReceived { source, data } => self.on_frame_received(source, &data),
        }
    }

    /// A frame arrived. Malformed frames return an error and change nothing.
    pub fn on_frame_received(
        &mut self,
        source: MacAddr,
        data: &[u8],
    ) -> Result<Vec<OutboundAction>, SessionError> {
        let frame = wire::decode_frame(data)?;
        let mut actions = Vec::new();
        match frame.kind {
            FrameKind::Broadcast => {
                tracing::info!(
                    seq = frame.sequence,
                    from = %source,
                    len = data.len(),
                    "broadcast received"
                );
                self.register(source, true, &mut actions)?;
                self.send_token(source, Token::Rts, ExchangeState::AwaitingCts, &mut actions);
            }
            FrameKind::Unicast => {
                let token = Token::from_payload(&frame.payload)?;
                tracing::info!(
                    seq = frame.sequence,
                    from = %source,
                    len = data.len(),
                    token = token.name(),
                    "unicast received"
                );
                if !self.registry.contains(&source) {
                    let answers_announce = token == Token::Rts
                        && self.exchange_state(&MacAddr::BROADCAST) == ExchangeState::AwaitingAck;
                    if !answers_announce {
                        return Err(SessionError::UnknownSource(source));
                    }
                    self.register(source, true, &mut actions)?;
                }
                match token {
                    Token::Rts => {
                        if self.exchange_state(&MacAddr::BROADCAST) == ExchangeState::AwaitingAck {
                            self.enter(MacAddr::BROADCAST, ExchangeState::Idle);
                        }
                        self.send_token(source, Token::Cts, ExchangeState::AwaitingData, &mut actions);
                    }
                    Token::Cts => {
                        let data = Token::Data(self.config.data_payload.clone());
                        self.send_token(source, data, ExchangeState::AwaitingFinalAck, &mut actions);
                    }
                    Token::Data(payload) => {
                        actions.push(OutboundAction::Deliver {
                            from: source,
                            payload,
                        });
                        self.send_token(source, Token::Ack, ExchangeState::Idle, &mut actions);
                    }
                    Token::Ack => {
                        self.send_token(source, Token::Rts, ExchangeState::AwaitingCts, &mut actions);
                    }
                }
            }
        }
        Ok(actions)
    }

    /// The radio reported the outcome of a transmission to `address`; its buffer is released here.
    pub fn on_send_complete(&mut self, address: MacAddr, status: SendStatus) -> Vec<OutboundAction> {
        match self.pending.complete(&address) {
            Some(request) => {
                tracing::debug!(id = %request.id, dest = %address, ?status, len = request.len(), "send completed")
            }
            None => tracing::warn!(dest = %address, ?status, "send completion with nothing in flight"),
        }
        if status == SendStatus::Failure {
            tracing::warn!(dest = %address, "radio reported send failure");
        }

        let mut actions = Vec::new();
        // First broadcast went out before the broadcast peer existed: register it, resend once.
        if address.is_broadcast() && !self.registry.contains(&address) {
            let info = self.peer_info(address, false);
            match self.registry.register(info.clone()) {
                Ok(_) => {
                    actions.push(OutboundAction::RegisterPeer(info));
                    actions.push(OutboundAction::ScheduleAnnounce);
                }
                Err(e) => tracing::warn!(error = %e, "cannot register broadcast peer"),
            }
        }
        actions
    }

    /// The radio refused the frame outright; release its buffer. None if it was already released.
    pub fn on_send_rejected(&mut self, id: SendId) -> Option<SendRequest> {
        let request = self.pending.release(id);
        if let Some(r) = &request {
            tracing::warn!(id = %id, dest = %r.destination, "send rejected, skipping transmission");
        }
        request
    }

    /// Send the discovery broadcast.
    pub fn announce(&mut self) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        self.push_announce(&mut actions);
        actions
    }

    /// Periodic tick: reclaim sends whose completion was lost, and reset exchanges that waited
    /// too long. Exchanges this side drove restart with RTS.
    pub fn tick(&mut self) -> Vec<OutboundAction> {
        self.tick_count = self.tick_count.saturating_add(1);
        self.reclaim_lost_sends();
        let timeout = self.config.handshake_timeout_ticks;
        let mut actions = Vec::new();
        if timeout == 0 {
            return actions;
        }
        let expired: Vec<(MacAddr, ExchangeState)> = self
            .exchanges
            .iter()
            .filter(|(_, e)| self.tick_count.saturating_sub(e.since_tick) > timeout)
            .map(|(&peer, e)| (peer, e.state))
            .collect();
        for (peer, state) in expired {
            match state {
                ExchangeState::AwaitingCts | ExchangeState::AwaitingFinalAck
                    if !peer.is_broadcast() =>
                {
                    tracing::warn!(%peer, ?state, "handshake timed out, restarting with RTS");
                    self.send_token(peer, Token::Rts, ExchangeState::AwaitingCts, &mut actions);
                }
                _ => {
                    tracing::warn!(%peer, ?state, "handshake timed out, back to idle");
                    self.enter(peer, ExchangeState::Idle);
                }
            }
        }
        actions
    }

    fn reclaim_lost_sends(&mut self) {
        let max_age = self.config.send_timeout_ticks;
        if max_age == 0 {
            return;
        }
        for request in self.pending.reclaim_expired(self.tick_count, max_age) {
            self.reclaimed_sends += 1;
            tracing::warn!(id = %request.id, dest = %request.destination, "no completion for send, releasing");
        }
    }

    fn peer_info(&self, address: MacAddr, encrypted: bool) -> PeerInfo {
        PeerInfo {
            address,
            channel: self.config.channel,
            interface: self.config.interface,
            encrypted,
        }
    }

    fn register(
        &mut self,
        address: MacAddr,
        encrypted: bool,
        actions: &mut Vec<OutboundAction>,
    ) -> Result<(), SessionError> {
        let info = self.peer_info(address, encrypted);
        if self.registry.register(info.clone())? == RegisterOutcome::Added {
            actions.push(OutboundAction::RegisterPeer(info));
        }
        Ok(())
    }

    fn push_announce(&mut self, actions: &mut Vec<OutboundAction>) {
        tracing::info!("sending announce broadcast");
        let mut payload = ANNOUNCE_PAYLOAD.to_vec();
        payload.push(0);
        if self.queue_frame(MacAddr::BROADCAST, &payload, actions) {
            self.enter(MacAddr::BROADCAST, ExchangeState::AwaitingAck);
        }
    }

    fn send_token(
        &mut self,
        dest: MacAddr,
        token: Token,
        next: ExchangeState,
        actions: &mut Vec<OutboundAction>,
    ) {
        tracing::info!(%dest, token = token.name(), "sending");
        if self.queue_frame(dest, &token.to_payload(), actions) {
            self.enter(dest, next);
        }
    }

    /// Allocate and encode; on allocation failure the transmission is skipped.
    fn queue_frame(&mut self, dest: MacAddr, payload: &[u8], actions: &mut Vec<OutboundAction>) -> bool {
        match self.pending.allocate(dest, &mut self.counters, payload, self.tick_count) {
            Ok(id) => {
                actions.push(OutboundAction::Transmit {
                    id,
                    destination: dest,
                });
                true
            }
            Err(e) => {
                self.skipped_sends += 1;
                tracing::warn!(%dest, error = %e, "skipping transmission");
                false
            }
        }
    }

    fn enter(&mut self, peer: MacAddr, state: ExchangeState) {
        if state == ExchangeState::Idle {
            self.exchanges.remove(&peer);
        } else {
            self.exchanges.insert(
                peer,
                Exchange {
                    state,
                    since_tick: self.tick_count,
                },
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed frame: {0}")]
    Decode(#[from] FrameDecodeError),
    #[error("invalid payload: {0}")]
    Token(#[from] TokenError),
    #[error("unicast from unregistered station {0}")]
    UnknownSource(MacAddr),
    #[error("out of memory")]
    OutOfMemory,
}

impl From<RegistryError> for SessionError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::OutOfMemory => SessionError::OutOfMemory,
        }
    }
}
