//! Bridge from radio notifications to the protocol worker.
//!
//! Notification paths must stay short: validate, copy, enqueue with a bounded wait.
//! A full queue drops the newest event rather than stalling the radio.

use std::time::Duration;

use linkshake_core::{Event, MacAddr, SendStatus};
use tokio::sync::mpsc::{self, error::SendTimeoutError};

/// Producer side. Cheap to clone; every radio task holds one.
#[derive(Debug, Clone)]
pub struct TransportBridge {
    tx: mpsc::Sender<Event>,
    enqueue_timeout: Duration,
}

/// Bounded event queue with a single consumer.
pub fn channel(capacity: usize, enqueue_timeout: Duration) -> (TransportBridge, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (TransportBridge { tx, enqueue_timeout }, rx)
}

impl TransportBridge {
    pub async fn on_send_complete(&self, address: MacAddr, status: SendStatus) -> Result<(), BridgeError> {
        self.push(Event::SendCompleted { address, status }).await
    }

    /// Copies `data` into the event; the copy is dropped with the event if the queue stays full.
    pub async fn on_frame_received(&self, source: MacAddr, data: &[u8]) -> Result<(), BridgeError> {
        if data.is_empty() {
            tracing::error!(%source, "receive notification without data");
            return Err(BridgeError::InvalidArgument);
        }
        let mut copy = Vec::new();
        copy.try_reserve_exact(data.len())
            .map_err(|_| BridgeError::OutOfMemory)?;
        copy.extend_from_slice(data);
        self.push(Event::FrameReceived { source, data: copy }).await
    }

    async fn push(&self, event: Event) -> Result<(), BridgeError> {
        match self.tx.send_timeout(event, self.enqueue_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(dropped)) => {
                tracing::warn!(event = kind(&dropped), "event queue full, dropping event");
                Err(BridgeError::QueueFull)
            }
            Err(SendTimeoutError::Closed(_)) => Err(BridgeError::Closed),
        }
    }
}

fn kind(event: &Event) -> &'static str {
    match event {
        Event::SendCompleted { .. } => "send-completed",
        Event::FrameReceived { .. } => "frame-received",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid notification arguments")]
    InvalidArgument,
    #[error("out of memory copying received frame")]
    OutOfMemory,
    #[error("event queue full")]
    QueueFull,
    #[error("protocol worker has stopped")]
    Closed,
}
