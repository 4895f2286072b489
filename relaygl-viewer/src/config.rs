//! Configuration for the viewer service.

use std::path::Path;
use std::time::Duration;

use relaygl_core::TlsSettings;
use relaygl_core::transport::default_port;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Certificate material for TLS sessions.
    pub tls: TlsSettings,
    /// Statistics reporting.
    pub stats: StatsConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port to accept sessions on. Defaults to 4242, or 4243 with `ssl`.
    pub port: Option<u16>,
    /// Address to bind.
    pub bind_address: String,
    /// Run the TLS handshake on every accepted connection.
    pub ssl: bool,
    /// Seconds a peer gets to finish the TLS handshake.
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between per-window frame rate reports.
    pub report_interval_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: None,
            bind_address: "0.0.0.0".into(),
            ssl: false,
            handshake_timeout_secs: 10,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ViewerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.network
            .port
            .unwrap_or_else(|| default_port(self.network.ssl))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.network.handshake_timeout_secs.max(1))
    }

    /// TLS settings when `ssl` is on.
    pub fn tls(&self) -> Option<&TlsSettings> {
        self.network.ssl.then_some(&self.tls)
    }
}

// ── Tests ────────────────────────────────────────────────────────
