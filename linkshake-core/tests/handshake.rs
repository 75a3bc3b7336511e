//! Two sessions on a lossless simulated link: every transmit is delivered to the
//! addressed station and then completed on the sender.

use std::collections::VecDeque;

use linkshake_core::{
    decode_frame, Event, ExchangeState, FrameKind, MacAddr, OutboundAction, Role, SendStatus,
    Session, SessionConfig, SessionError,
};

const A: MacAddr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x0a]);
const B: MacAddr = MacAddr::new([0x34, 0x85, 0x18, 0xb9, 0x1b, 0x9c]);

struct Sent {
    from: MacAddr,
    to: MacAddr,
    payload: Vec<u8>,
}

struct Link {
    addrs: [MacAddr; 2],
    sessions: [Session; 2],
    queue: VecDeque<(usize, Event)>,
    sent: Vec<Sent>,
    delivered: Vec<(MacAddr, Vec<u8>)>,
    announces_scheduled: usize,
}

impl Link {
    fn new(a: SessionConfig, b: SessionConfig) -> Self {
        Self {
            addrs: [A, B],
            sessions: [Session::new(a), Session::new(b)],
            queue: VecDeque::new(),
            sent: Vec::new(),
            delivered: Vec::new(),
            announces_scheduled: 0,
        }
    }

    fn start(&mut self) {
        for i in 0..2 {
            let actions = self.sessions[i].start().unwrap();
            self.apply(i, actions);
        }
    }

    /// Returns the number of transmissions issued.
    fn apply(&mut self, from: usize, actions: Vec<OutboundAction>) -> usize {
        let mut transmits = 0;
        for action in actions {
            match action {
                OutboundAction::Transmit { id, destination } => {
                    transmits += 1;
                    let frame = self.sessions[from].frame(id).unwrap().to_vec();
                    let decoded = decode_frame(&frame).unwrap();
                    self.sent.push(Sent {
                        from: self.addrs[from],
                        to: destination,
                        payload: decoded.payload,
                    });
                    for to in 0..2 {
                        if to != from && (destination.is_broadcast() || destination == self.addrs[to]) {
                            self.queue.push_back((
                                to,
                                Event::FrameReceived {
                                    source: self.addrs[from],
                                    data: frame.clone(),
                                },
                            ));
                        }
                    }
                    self.queue.push_back((
                        from,
                        Event::SendCompleted {
                            address: destination,
                            status: SendStatus::Success,
                        },
                    ));
                }
                OutboundAction::Deliver { from, payload } => self.delivered.push((from, payload)),
                OutboundAction::ScheduleAnnounce => self.announces_scheduled += 1,
                OutboundAction::RegisterPeer(_) => {}
            }
        }
        transmits
    }

    /// Process one queued event. Returns false when the link is idle.
    fn step(&mut self) -> bool {
        let Some((to, event)) = self.queue.pop_front() else {
            return false;
        };
        let is_receive = matches!(event, Event::FrameReceived { .. });
        let actions = self.sessions[to].handle_event(event).unwrap();
        let transmits = self.apply(to, actions);
        if is_receive {
            assert_eq!(transmits, 1, "one received frame must cause exactly one send");
        }
        let in_flight: usize = self.sessions.iter().map(|s| s.pending_sends()).sum();
        assert!(in_flight <= 2, "send buffers leaking: {in_flight} in flight");
        true
    }

    fn run_until_sent(&mut self, n: usize) {
        for _ in 0..1000 {
            if self.sent.len() >= n || !self.step() {
                return;
            }
        }
    }

    fn transcript(&self) -> Vec<(MacAddr, MacAddr, Vec<u8>)> {
        self.sent
            .iter()
            .map(|s| (s.from, s.to, s.payload.clone()))
            .collect()
    }
}

fn config(role: Role, peer: Option<MacAddr>, announce: bool) -> SessionConfig {
    SessionConfig {
        role,
        peer,
        announce,
        ..SessionConfig::default()
    }
}

fn t(from: MacAddr, to: MacAddr, payload: &[u8]) -> (MacAddr, MacAddr, Vec<u8>) {
    (from, to, payload.to_vec())
}

#[test]
fn handshake_cycles_without_stalling() {
    let mut link = Link::new(
        config(Role::Initiator, Some(B), false),
        config(Role::Responder, Some(A), false),
    );
    link.start();
    link.run_until_sent(9);

    assert_eq!(
        link.transcript(),
        vec![
            t(A, B, b"RTS\0"),
            t(B, A, b"CTS\0"),
            t(A, B, b"some data\0"),
            t(B, A, b"ACK\0"),
            t(A, B, b"RTS\0"),
            t(B, A, b"CTS\0"),
            t(A, B, b"some data\0"),
            t(B, A, b"ACK\0"),
            t(A, B, b"RTS\0"),
        ]
    );
    assert_eq!(
        link.delivered,
        vec![(A, b"some data".to_vec()), (A, b"some data".to_vec())]
    );
    assert_eq!(link.sessions[0].exchange_state(&B), ExchangeState::AwaitingCts);
}

#[test]
fn discovery_from_announce() {
    let mut link = Link::new(
        config(Role::Responder, None, true),
        config(Role::Responder, None, false),
    );
    link.start();
    link.run_until_sent(6);

    assert_eq!(
        link.transcript(),
        vec![
            t(A, MacAddr::BROADCAST, b"add_me\0"),
            t(B, A, b"RTS\0"),
            t(A, B, b"CTS\0"),
            t(B, A, b"some data\0"),
            t(A, B, b"ACK\0"),
            t(B, A, b"RTS\0"),
        ]
    );
    assert!(link.sessions[1].registry().get(&A).unwrap().encrypted);
    assert!(link.sessions[0].registry().get(&B).unwrap().encrypted);
    assert!(link.sessions[0].registry().contains(&MacAddr::BROADCAST));
    assert_eq!(link.announces_scheduled, 1);
}

#[test]
fn corrupted_frame_is_inert() {
    let mut link = Link::new(
        config(Role::Responder, Some(B), false),
        config(Role::Responder, None, false),
    );
    link.start();

    let mut frame = Vec::new();
    linkshake_core::encode_frame(
        FrameKind::Unicast,
        &mut linkshake_core::wire::SequenceCounters::new(),
        b"RTS\0",
        &mut frame,
    );
    frame[1] ^= 0xff;
    let before = link.sessions[0].registry().len();
    let result = link.sessions[0].on_frame_received(B, &frame);
    assert!(matches!(result, Err(SessionError::Decode(_))));
    assert_eq!(link.sessions[0].registry().len(), before);
    assert_eq!(link.sessions[0].pending_sends(), 0);
    assert!(link.sent.is_empty());
}
