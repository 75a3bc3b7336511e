//! Protocol worker: the single consumer of the event queue and the only owner of the session.

use std::time::Duration;

use linkshake_core::{Event, OutboundAction, Session, SessionError};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::radio::Radio;

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Wait before starting, and before a scheduled announce resend.
    pub settle_delay: Duration,
    /// Pause after each unicast transmission.
    pub stage_delay: Duration,
    pub tick_interval: Duration,
}

impl From<&Config> for Timing {
    fn from(c: &Config) -> Self {
        Self {
            settle_delay: c.settle_delay(),
            stage_delay: c.stage_delay(),
            tick_interval: c.tick_interval(),
        }
    }
}

pub struct Worker<R> {
    session: Session,
    radio: R,
    events: mpsc::Receiver<Event>,
    timing: Timing,
    announce_at: Option<Instant>,
}

impl<R: Radio> Worker<R> {
    pub fn new(session: Session, radio: R, events: mpsc::Receiver<Event>, timing: Timing) -> Self {
        Self {
            session,
            radio,
            events,
            timing,
            announce_at: None,
        }
    }

    /// Run until every bridge handle is dropped. Returns the session for inspection.
    pub async fn run(mut self) -> Session {
        time::sleep(self.timing.settle_delay).await;
        tracing::info!(role = ?self.session.role(), "protocol worker starting");
        match self.session.start() {
            Ok(actions) => self.execute(actions).await,
            Err(e) => tracing::error!(error = %e, "session start failed"),
        }

        let mut ticker = time::interval_at(
            Instant::now() + self.timing.tick_interval,
            self.timing.tick_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let announce_at = self.announce_at;
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("event queue closed, protocol worker exiting");
                        return self.session;
                    };
                    match self.session.handle_event(event) {
                        Ok(actions) => self.execute(actions).await,
                        Err(e) => report(&e),
                    }
                }
                _ = ticker.tick() => {
                    let actions = self.session.tick();
                    self.execute(actions).await;
                }
                _ = time::sleep_until(announce_at.unwrap_or_else(Instant::now)), if announce_at.is_some() => {
                    self.announce_at = None;
                    tracing::info!("resending announce");
                    let actions = self.session.announce();
                    self.execute(actions).await;
                }
            }
        }
    }

    async fn execute(&mut self, actions: Vec<OutboundAction>) {
        for action in actions {
            match action {
                OutboundAction::RegisterPeer(info) => {
                    if let Err(e) = self.radio.register_peer(&info) {
                        tracing::warn!(peer = %info.address, error = %e, "radio refused peer");
                    }
                }
                OutboundAction::Transmit { id, destination } => {
                    let Some(frame) = self.session.frame(id) else {
                        tracing::warn!(%id, "transmit for released send");
                        continue;
                    };
                    if let Err(e) = self.radio.send(destination, frame) {
                        tracing::warn!(%id, %destination, error = %e, "radio rejected frame");
                        self.session.on_send_rejected(id);
                        continue;
                    }
                    if !destination.is_broadcast() {
                        time::sleep(self.timing.stage_delay).await;
                    }
                }
                OutboundAction::ScheduleAnnounce => {
                    self.announce_at = Some(Instant::now() + self.timing.settle_delay);
                }
                OutboundAction::Deliver { from, payload } => {
                    tracing::info!(%from, data = %String::from_utf8_lossy(&payload), "data received");
                }
            }
        }
    }
}

fn report(e: &SessionError) {
    match e {
        SessionError::OutOfMemory => tracing::error!(error = %e, "event skipped"),
        _ => tracing::warn!(error = %e, "frame discarded"),
    }
}
