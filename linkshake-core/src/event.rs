//! Events handed from the radio notification context to the protocol worker.

use crate::address::MacAddr;

/// Outcome the radio reports for one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Failure,
}

/// One queued notification. FIFO, single consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SendCompleted {
        address: MacAddr,
        status: SendStatus,
    },
    /// `data` is an owned copy made in the notification context.
    FrameReceived { source: MacAddr, data: Vec<u8> },
}
