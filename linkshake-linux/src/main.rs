// LinkShake Linux: emulated radio link, transport bridge and protocol worker.

mod bridge;
mod config;
mod radio;
mod worker;

use anyhow::Context;
use linkshake_core::{GroupKey, MacAddr, Session};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("linkshake-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    cfg.validate().context("invalid configuration")?;
    let address = cfg.address.unwrap_or_else(MacAddr::random_local);
    tracing::info!(
        %address,
        role = ?cfg.role,
        peer = ?cfg.peer,
        announce = cfg.announce,
        channel = cfg.channel,
        long_range = cfg.long_range,
        "linkshake starting"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (bridge, events) = bridge::channel(cfg.queue_capacity, cfg.enqueue_timeout());
        let settings = radio::RadioSettings {
            address,
            channel: cfg.channel,
            long_range: cfg.long_range,
            key: GroupKey::derive(cfg.pmk.as_bytes(), cfg.lmk.as_bytes()),
            port: cfg.port,
        };
        let radio = radio::UdpRadio::bind(settings, bridge)
            .with_context(|| format!("cannot open radio medium on port {}", cfg.port))?;

        let receiver = radio.clone();
        tokio::spawn(async move {
            if let Err(e) = receiver.run_receiver().await {
                tracing::error!(error = %e, "radio receiver stopped");
            }
        });

        let worker = worker::Worker::new(
            Session::new(cfg.session_config()),
            radio,
            events,
            worker::Timing::from(&cfg),
        );
        tokio::spawn(async move {
            let session = worker.run().await;
            tracing::warn!(
                pending = session.pending_sends(),
                skipped = session.skipped_sends(),
                reclaimed = session.reclaimed_sends(),
                "protocol worker stopped"
            );
        });

        shutdown_signal().await?;
        tracing::info!("shutting down");
        Ok::<(), anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
