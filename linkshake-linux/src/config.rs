//! Load config from file and environment.

use std::path::PathBuf;
use std::time::Duration;

use linkshake_core::crypto::MASTER_KEY_LEN;
use linkshake_core::session::{DEFAULT_HANDSHAKE_TIMEOUT_TICKS, DEFAULT_SEND_TIMEOUT_TICKS};
use linkshake_core::{Interface, MacAddr, Role, SessionConfig};
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/linkshake/config.toml or /etc/linkshake/config.toml.
/// Env overrides: LINKSHAKE_ADDRESS, LINKSHAKE_PEER, LINKSHAKE_ROLE, LINKSHAKE_CHANNEL, LINKSHAKE_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// This station's link address (random locally-administered if unset).
    #[serde(default)]
    pub address: Option<MacAddr>,
    /// Statically known counterpart.
    #[serde(default = "default_peer")]
    pub peer: Option<MacAddr>,
    #[serde(default)]
    pub role: Role,
    /// Send the discovery broadcast after the settle delay.
    #[serde(default = "default_true")]
    pub announce: bool,
    /// Radio channel (1-14; 0 = leave unset).
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default)]
    pub interface: Interface,
    #[serde(default)]
    pub long_range: bool,
    /// Primary master key (16 bytes).
    #[serde(default = "default_pmk")]
    pub pmk: String,
    /// Local master key (16 bytes) for encrypted peers.
    #[serde(default = "default_lmk")]
    pub lmk: String,
    /// UDP port of the emulated radio medium.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_stage_delay_ms")]
    pub stage_delay_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_handshake_timeout_ticks")]
    pub handshake_timeout_ticks: u64,
    /// Ticks before an uncompleted send is released.
    #[serde(default = "default_send_timeout_ticks")]
    pub send_timeout_ticks: u64,
}

fn default_peer() -> Option<MacAddr> {
    Some(MacAddr::new([0x34, 0x85, 0x18, 0xb9, 0x1b, 0x9c]))
}
fn default_true() -> bool {
    true
}
fn default_channel() -> u8 {
    1
}
fn default_pmk() -> String {
    "pmk1234567890123".to_string()
}
fn default_lmk() -> String {
    "lmk1234567890123".to_string()
}
fn default_port() -> u16 {
    47474
}
fn default_queue_capacity() -> usize {
    6
}
fn default_enqueue_timeout_ms() -> u64 {
    512
}
fn default_settle_delay_ms() -> u64 {
    5000
}
fn default_stage_delay_ms() -> u64 {
    500
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_handshake_timeout_ticks() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_TICKS
}
fn default_send_timeout_ticks() -> u64 {
    DEFAULT_SEND_TIMEOUT_TICKS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: None,
            peer: default_peer(),
            role: Role::default(),
            announce: default_true(),
            channel: default_channel(),
            interface: Interface::default(),
            long_range: false,
            pmk: default_pmk(),
            lmk: default_lmk(),
            port: default_port(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            stage_delay_ms: default_stage_delay_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            handshake_timeout_ticks: default_handshake_timeout_ticks(),
            send_timeout_ticks: default_send_timeout_ticks(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pmk.len() != MASTER_KEY_LEN {
            return Err(ConfigError::KeyLength("pmk", self.pmk.len()));
        }
        if self.lmk.len() != MASTER_KEY_LEN {
            return Err(ConfigError::KeyLength("lmk", self.lmk.len()));
        }
        if self.channel > 14 {
            return Err(ConfigError::Channel(self.channel));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::QueueCapacity);
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::TickInterval);
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            role: self.role,
            peer: self.peer,
            announce: self.announce,
            channel: self.channel,
            interface: self.interface,
            handshake_timeout_ticks: self.handshake_timeout_ticks,
            send_timeout_ticks: self.send_timeout_ticks,
            ..SessionConfig::default()
        }
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stage_delay(&self) -> Duration {
        Duration::from_millis(self.stage_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be exactly 16 bytes, got {1}")]
    KeyLength(&'static str, usize),
    #[error("channel {0} out of range 0..=14")]
    Channel(u8),
    #[error("queue_capacity must be at least 1")]
    QueueCapacity,
    #[error("tick_interval_ms must be non-zero")]
    TickInterval,
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LINKSHAKE_ADDRESS") {
        match s.parse::<MacAddr>() {
            Ok(a) => c.address = Some(a),
            Err(e) => tracing::warn!(error = %e, "ignoring LINKSHAKE_ADDRESS"),
        }
    }
    if let Ok(s) = std::env::var("LINKSHAKE_PEER") {
        if s.is_empty() || s == "none" {
            c.peer = None;
        } else {
            match s.parse::<MacAddr>() {
                Ok(a) => c.peer = Some(a),
                Err(e) => tracing::warn!(error = %e, "ignoring LINKSHAKE_PEER"),
            }
        }
    }
    if let Ok(s) = std::env::var("LINKSHAKE_ROLE") {
        match s.as_str() {
            "initiator" => c.role = Role::Initiator,
            "responder" => c.role = Role::Responder,
            other => tracing::warn!(role = other, "ignoring LINKSHAKE_ROLE"),
        }
    }
    if let Ok(s) = std::env::var("LINKSHAKE_CHANNEL") {
        if let Ok(ch) = s.parse::<u8>() {
            c.channel = ch;
        }
    }
    if let Ok(s) = std::env::var("LINKSHAKE_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/linkshake/config.toml"));
    }
    out.push(PathBuf::from("/etc/linkshake/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => {
                        tracing::info!(path = %p.display(), "loaded config");
                        return Some(c);
                    }
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "invalid config, using defaults"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}
