//! LinkShake protocol core: discovery and RTS/CTS/ACK handshake over a connectionless radio link.
//! Host-driven: no I/O; host passes radio events and receives actions.

pub mod address;
pub mod crypto;
pub mod event;
pub mod protocol;
pub mod registry;
pub mod send;
pub mod session;
pub mod wire;

// C ABI for firmware hosts linking the staticlib.
pub mod ffi;

pub use address::MacAddr;
pub use crypto::{CryptoError, GroupKey};
pub use event::{Event, SendStatus};
pub use protocol::Token;
pub use registry::{Interface, PeerInfo, PeerRegistry, RegisterOutcome};
pub use send::{SendId, SendRequest};
pub use session::{ExchangeState, OutboundAction, Role, Session, SessionConfig, SessionError};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameKind, HEADER_LEN, MAX_FRAME_LEN};
