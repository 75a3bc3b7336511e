//! C ABI for linking linkshake-core as a static library into radio firmware.
//! The firmware owns the radio: it forwards send/receive notifications here and performs the returned actions.
//!
//! Every entry point that returns actions writes at least the count, so an empty list is 4 bytes.
//!
//! Action buffer layout: 4 bytes count (LE), then per action a tag byte and fields:
//! - 1 register peer: address (6), channel (1), interface (1: 0 station, 1 access point), encrypted (1)
//! - 2 transmit: send id (8 LE), destination (6), frame length (2 LE), frame
//! - 3 schedule announce: no fields
//! - 4 deliver: source (6), payload length (2 LE), payload

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use crate::address::{MacAddr, ADDR_LEN};
use crate::event::SendStatus;
use crate::registry::Interface;
use crate::send::SendId;
use crate::session::{OutboundAction, Role, Session, SessionConfig};
use crate::wire::{HEADER_LEN, MAX_FRAME_LEN};

const TAG_REGISTER_PEER: u8 = 1;
const TAG_TRANSMIT: u8 = 2;
const TAG_SCHEDULE_ANNOUNCE: u8 = 3;
const TAG_DELIVER: u8 = 4;

/// Fixed frame header length. Exported so the firmware can size receive buffers.
#[no_mangle]
pub extern "C" fn linkshake_header_len() -> usize {
    HEADER_LEN
}

/// Create a session. `peer_6` may be null (no static peer). Returns opaque handle.
#[no_mangle]
pub extern "C" fn linkshake_session_create(
    peer_6: *const u8,
    initiator: bool,
    announce: bool,
    channel: u8,
) -> *mut c_void {
    let peer = if peer_6.is_null() {
        None
    } else {
        read_addr(peer_6)
    };
    let config = SessionConfig {
        role: if initiator {
            Role::Initiator
        } else {
            Role::Responder
        },
        peer,
        announce,
        channel,
        ..SessionConfig::default()
    };
    Box::into_raw(Box::new(Session::new(config))) as *mut c_void
}

/// Destroy session. No-op if h is null. Frees every send buffer still in flight.
#[no_mangle]
pub extern "C" fn linkshake_session_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut Session) };
}

/// Startup actions. Returns bytes written to out_buf, or -1 on error.
#[no_mangle]
pub extern "C" fn linkshake_session_start(h: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if h.is_null() {
        return -1;
    }
    let session = unsafe { &mut *(h as *mut Session) };
    match session.start() {
        Ok(actions) => write_actions(session, &actions, out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// Frame received from `src_6`. Returns bytes written, or -1 if the frame was discarded or out_buf too small.
/// Frames longer than the radio's maximum frame length are discarded.
#[no_mangle]
pub extern "C" fn linkshake_on_frame_received(
    h: *mut c_void,
    src_6: *const u8,
    data: *const u8,
    data_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() || src_6.is_null() || data.is_null() || data_len == 0 || data_len > MAX_FRAME_LEN {
        return -1;
    }
    let Some(source) = read_addr(src_6) else {
        return -1;
    };
    let session = unsafe { &mut *(h as *mut Session) };
    let bytes = unsafe { slice::from_raw_parts(data, data_len) };
    match session.on_frame_received(source, bytes) {
        Ok(actions) => write_actions(session, &actions, out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// Send to `addr_6` completed. Releases the matching buffer. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn linkshake_on_send_complete(
    h: *mut c_void,
    addr_6: *const u8,
    success: bool,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() || addr_6.is_null() {
        return -1;
    }
    let Some(address) = read_addr(addr_6) else {
        return -1;
    };
    let session = unsafe { &mut *(h as *mut Session) };
    let status = if success {
        SendStatus::Success
    } else {
        SendStatus::Failure
    };
    let actions = session.on_send_complete(address, status);
    write_actions(session, &actions, out_buf, out_buf_len)
}

/// The radio refused a transmit action. Returns 0 if released, -1 if unknown or already released.
#[no_mangle]
pub extern "C" fn linkshake_on_send_rejected(h: *mut c_void, send_id: u64) -> c_int {
    if h.is_null() {
        return -1;
    }
    let session = unsafe { &mut *(h as *mut Session) };
    match session.on_send_rejected(SendId::from_raw(send_id)) {
        Some(_) => 0,
        None => -1,
    }
}

/// Delayed announce resend. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn linkshake_announce(h: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if h.is_null() {
        return -1;
    }
    let session = unsafe { &mut *(h as *mut Session) };
    let actions = session.announce();
    write_actions(session, &actions, out_buf, out_buf_len)
}

/// Tick. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn linkshake_tick(h: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if h.is_null() {
        return -1;
    }
    let session = unsafe { &mut *(h as *mut Session) };
    let actions = session.tick();
    write_actions(session, &actions, out_buf, out_buf_len)
}

fn read_addr(p: *const u8) -> Option<MacAddr> {
    let bytes = unsafe { slice::from_raw_parts(p, ADDR_LEN) };
    MacAddr::from_slice(bytes)
}

/// Serialize actions; transmit actions carry a copy of the frame (the session keeps the original until completion).
/// -1 if a length does not fit its field or the result does not fit out_buf.
fn write_actions(session: &Session, actions: &[OutboundAction], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    let Some(out) = encode_actions(session, actions) else {
        return -1;
    };
    let Ok(written) = c_int::try_from(out.len()) else {
        return -1;
    };
    if out_buf.is_null() || out_buf_len < out.len() {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(out.as_ptr(), out.len());
    }
    written
}

fn encode_actions(session: &Session, actions: &[OutboundAction]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&u32::try_from(actions.len()).ok()?.to_le_bytes());
    for action in actions {
        match action {
            OutboundAction::RegisterPeer(info) => {
                out.push(TAG_REGISTER_PEER);
                out.extend_from_slice(info.address.as_bytes());
                out.push(info.channel);
                out.push(match info.interface {
                    Interface::Station => 0,
                    Interface::AccessPoint => 1,
                });
                out.push(info.encrypted as u8);
            }
            OutboundAction::Transmit { id, destination } => {
                let frame = session.frame(*id)?;
                out.push(TAG_TRANSMIT);
                out.extend_from_slice(&id.as_raw().to_le_bytes());
                out.extend_from_slice(destination.as_bytes());
                out.extend_from_slice(&u16::try_from(frame.len()).ok()?.to_le_bytes());
                out.extend_from_slice(frame);
            }
            OutboundAction::ScheduleAnnounce => out.push(TAG_SCHEDULE_ANNOUNCE),
            OutboundAction::Deliver { from, payload } => {
                out.push(TAG_DELIVER);
                out.extend_from_slice(from.as_bytes());
                out.extend_from_slice(&u16::try_from(payload.len()).ok()?.to_le_bytes());
                out.extend_from_slice(payload);
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode_frame;

    #[test]
    fn initiator_start_through_c_abi() {
        let peer = [0x34u8, 0x85, 0x18, 0xb9, 0x1b, 0x9c];
        let h = linkshake_session_create(peer.as_ptr(), true, false, 1);
        let mut buf = [0u8; 256];
        let n = linkshake_session_start(h, buf.as_mut_ptr(), buf.len());
        assert!(n > 0);
        let buf = &buf[..n as usize];
        assert_eq!(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), 2);

        // register peer: tag, address, channel, interface, encrypted
        assert_eq!(buf[4], TAG_REGISTER_PEER);
        assert_eq!(&buf[5..11], &peer);
        assert_eq!(buf[13], 1);

        // transmit RTS
        let t = 14;
        assert_eq!(buf[t], TAG_TRANSMIT);
        let id = u64::from_le_bytes(buf[t + 1..t + 9].try_into().unwrap());
        assert_eq!(&buf[t + 9..t + 15], &peer);
        let len = u16::from_le_bytes([buf[t + 15], buf[t + 16]]) as usize;
        let frame = decode_frame(&buf[t + 17..t + 17 + len]).unwrap();
        assert_eq!(frame.payload, b"RTS\0");

        assert_eq!(linkshake_on_send_rejected(h, id), 0);
        assert_eq!(linkshake_on_send_rejected(h, id), -1);
        linkshake_session_destroy(h);
    }

    #[test]
    fn small_out_buf_is_an_error() {
        let peer = [0x34u8, 0x85, 0x18, 0xb9, 0x1b, 0x9c];
        let h = linkshake_session_create(peer.as_ptr(), true, false, 1);
        let mut buf = [0u8; 8];
        assert_eq!(linkshake_session_start(h, buf.as_mut_ptr(), buf.len()), -1);
        linkshake_session_destroy(h);
    }

    #[test]
    fn oversized_received_frame_rejected() {
        let peer = [0x34u8, 0x85, 0x18, 0xb9, 0x1b, 0x9c];
        let h = linkshake_session_create(peer.as_ptr(), false, false, 1);
        let mut buf = vec![0u8; 256];
        linkshake_session_start(h, buf.as_mut_ptr(), buf.len());

        let mut payload = vec![b'x'; 70_000];
        payload.push(0);
        let mut data = Vec::new();
        crate::wire::encode_frame(
            crate::wire::FrameKind::Unicast,
            &mut crate::wire::SequenceCounters::new(),
            &payload,
            &mut data,
        );
        let mut out = vec![0u8; 100_000];
        assert_eq!(
            linkshake_on_frame_received(h, peer.as_ptr(), data.as_ptr(), data.len(), out.as_mut_ptr(), out.len()),
            -1
        );
        linkshake_session_destroy(h);
    }

    #[test]
    fn deliver_longer_than_length_field_is_an_error() {
        let peer = MacAddr::new([0x34, 0x85, 0x18, 0xb9, 0x1b, 0x9c]);
        let session = Session::new(SessionConfig::default());
        let actions = [OutboundAction::Deliver {
            from: peer,
            payload: vec![0u8; usize::from(u16::MAX) + 1],
        }];
        assert!(encode_actions(&session, &actions).is_none());
        let mut out = vec![0u8; 100_000];
        assert_eq!(write_actions(&session, &actions, out.as_mut_ptr(), out.len()), -1);

        let fits = [OutboundAction::Deliver {
            from: peer,
            payload: vec![0u8; usize::from(u16::MAX)],
        }];
        let encoded = encode_actions(&session, &fits).unwrap();
        assert_eq!(&encoded[11..13], &u16::MAX.to_le_bytes());
    }

    #[test]
    fn idle_tick_writes_empty_action_list() {
        let h = linkshake_session_create(std::ptr::null(), false, false, 1);
        let mut buf = [0xaau8; 16];
        assert_eq!(linkshake_tick(h, buf.as_mut_ptr(), buf.len()), 4);
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
        linkshake_session_destroy(h);
    }

    #[test]
    fn null_handle_rejected() {
        let mut buf = [0u8; 16];
        assert_eq!(linkshake_tick(std::ptr::null_mut(), buf.as_mut_ptr(), buf.len()), -1);
        assert_eq!(linkshake_on_send_rejected(std::ptr::null_mut(), 0), -1);
    }
}
