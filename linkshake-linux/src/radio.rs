//! Emulated radio: a shared medium over an IPv4 multicast group.
//!
//! Every station on the group hears every datagram. A link header in front of the frame
//! carries channel, flags, destination and source; stations filter on it the way a radio would.
//!
//! Datagram layout: channel (1), flags (1), destination (6), source (6), body.
//! The body is the frame, sealed with the group key when the encrypted flag is set.
//! `MAX_FRAME_LEN` bounds the body as sent, so sealed frames leave room for `SEAL_OVERHEAD`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard};

use linkshake_core::address::ADDR_LEN;
use linkshake_core::{CryptoError, GroupKey, MacAddr, PeerInfo, SendStatus, MAX_FRAME_LEN};
use tokio::net::UdpSocket;

use crate::bridge::{BridgeError, TransportBridge};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 77);

pub const LINK_HEADER_LEN: usize = 2 + 2 * ADDR_LEN;

const FLAG_ENCRYPTED: u8 = 0x01;
const FLAG_LONG_RANGE: u8 = 0x02;

/// Radio as seen by the protocol worker. `send` only accepts or rejects;
/// the outcome of an accepted send arrives later through the transport bridge.
pub trait Radio: Send + Sync {
    fn register_peer(&self, peer: &PeerInfo) -> Result<(), RadioError>;
    fn send(&self, destination: MacAddr, frame: &[u8]) -> Result<(), RadioError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("frame of {0} bytes exceeds {max}", max = MAX_FRAME_LEN)]
    FrameTooLarge(usize),
    #[error("peer {0} is not registered")]
    NotRegistered(MacAddr),
    #[error("peer {peer} listens on channel {peer_channel}, radio is on {radio_channel}")]
    ChannelMismatch {
        peer: MacAddr,
        peer_channel: u8,
        radio_channel: u8,
    },
    #[error("cannot seal frame: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone)]
pub struct RadioSettings {
    pub address: MacAddr,
    pub channel: u8,
    pub long_range: bool,
    pub key: GroupKey,
    pub port: u16,
}

/// Link-layer state of one station: peer list, header encoding and receive filtering.
#[derive(Debug)]
struct Station {
    address: MacAddr,
    channel: u8,
    long_range: bool,
    key: GroupKey,
    peers: Mutex<HashMap<MacAddr, PeerInfo>>,
}

impl Station {
    fn new(settings: &RadioSettings) -> Self {
        Self {
            address: settings.address,
            channel: settings.channel,
            long_range: settings.long_range,
            key: settings.key.clone(),
            peers: Mutex::new(HashMap::new()),
        }
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<MacAddr, PeerInfo>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register_peer(&self, peer: &PeerInfo) -> Result<(), RadioError> {
        if peer.channel != 0 && peer.channel != self.channel {
            return Err(RadioError::ChannelMismatch {
                peer: peer.address,
                peer_channel: peer.channel,
                radio_channel: self.channel,
            });
        }
        let mut peers = self.peers();
        if !peers.contains_key(&peer.address) {
            tracing::debug!(peer = %peer.address, encrypted = peer.encrypted, "radio peer added");
            peers.insert(peer.address, peer.clone());
        }
        Ok(())
    }

    /// Build the datagram for `frame`, sealing it for encrypted unicast peers.
    fn outgoing(&self, destination: MacAddr, frame: &[u8]) -> Result<Vec<u8>, RadioError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameTooLarge(frame.len()));
        }
        let encrypted = if destination.is_broadcast() {
            false
        } else {
            self.peers()
                .get(&destination)
                .map(|p| p.encrypted)
                .ok_or(RadioError::NotRegistered(destination))?
        };

        let mut flags = 0;
        if encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        if self.long_range {
            flags |= FLAG_LONG_RANGE;
        }
        let sealed;
        let body = if encrypted {
            sealed = self.key.seal(frame)?;
            sealed.as_slice()
        } else {
            frame
        };
        if body.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameTooLarge(body.len()));
        }

        let mut datagram = Vec::with_capacity(LINK_HEADER_LEN + body.len());
        datagram.push(self.channel);
        datagram.push(flags);
        datagram.extend_from_slice(destination.as_bytes());
        datagram.extend_from_slice(self.address.as_bytes());
        datagram.extend_from_slice(body);
        Ok(datagram)
    }

    /// Source and frame of a datagram meant for this station, None if the radio would not hear it.
    fn incoming(&self, datagram: &[u8]) -> Option<(MacAddr, Vec<u8>)> {
        if datagram.len() <= LINK_HEADER_LEN {
            return None;
        }
        let channel = datagram[0];
        let flags = datagram[1];
        let destination = MacAddr::from_slice(&datagram[2..2 + ADDR_LEN])?;
        let source = MacAddr::from_slice(&datagram[2 + ADDR_LEN..LINK_HEADER_LEN])?;
        let body = &datagram[LINK_HEADER_LEN..];

        if source == self.address {
            return None;
        }
        if channel != self.channel {
            tracing::trace!(%source, channel, "frame on other channel");
            return None;
        }
        if flags & FLAG_LONG_RANGE != 0 && !self.long_range {
            tracing::trace!(%source, "long-range frame, radio not in long-range mode");
            return None;
        }
        if destination != self.address && !destination.is_broadcast() {
            return None;
        }
        if flags & FLAG_ENCRYPTED == 0 {
            return Some((source, body.to_vec()));
        }
        match self.key.open(body) {
            Ok(frame) => Some((source, frame)),
            Err(e) => {
                tracing::warn!(%source, error = %e, "dropping frame that fails to open");
                None
            }
        }
    }
}

struct Inner {
    station: Station,
    socket: UdpSocket,
    medium: SocketAddr,
    bridge: TransportBridge,
}

/// Radio over UDP multicast (TTL 1). One station per host and port.
#[derive(Clone)]
pub struct UdpRadio {
    inner: Arc<Inner>,
}

impl UdpRadio {
    pub fn bind(settings: RadioSettings, bridge: TransportBridge) -> std::io::Result<Self> {
        let socket = make_multicast_socket(settings.port)?;
        tracing::info!(
            address = %settings.address,
            channel = settings.channel,
            long_range = settings.long_range,
            group = %MULTICAST_GROUP,
            port = settings.port,
            "radio up"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                station: Station::new(&settings),
                socket,
                medium: SocketAddr::V4(SocketAddrV4::new(MULTICAST_GROUP, settings.port)),
                bridge,
            }),
        })
    }

    /// Receive loop. Hands every frame this station hears to the bridge.
    pub async fn run_receiver(self) -> std::io::Result<()> {
        let mut buf = vec![0u8; 2048];
        loop {
            let (n, from) = self.inner.socket.recv_from(&mut buf).await?;
            let Some((source, frame)) = self.inner.station.incoming(&buf[..n]) else {
                continue;
            };
            tracing::trace!(%source, %from, len = frame.len(), "frame heard");
            match self.inner.bridge.on_frame_received(source, &frame).await {
                Ok(()) => {}
                Err(BridgeError::Closed) => {
                    tracing::info!("protocol worker gone, receiver exiting");
                    return Ok(());
                }
                Err(e) => tracing::debug!(%source, error = %e, "receive notification dropped"),
            }
        }
    }
}

impl Radio for UdpRadio {
    fn register_peer(&self, peer: &PeerInfo) -> Result<(), RadioError> {
        self.inner.station.register_peer(peer)
    }

    fn send(&self, destination: MacAddr, frame: &[u8]) -> Result<(), RadioError> {
        let datagram = self.inner.station.outgoing(destination, frame)?;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let status = match inner.socket.send_to(&datagram, inner.medium).await {
                Ok(_) => SendStatus::Success,
                Err(e) => {
                    tracing::warn!(%destination, error = %e, "transmit failed");
                    SendStatus::Failure
                }
            };
            if let Err(e) = inner.bridge.on_send_complete(destination, status).await {
                tracing::debug!(%destination, error = %e, "send completion dropped");
            }
        });
        Ok(())
    }
}

fn make_multicast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_multicast_loop_v4(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}
