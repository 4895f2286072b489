//! Interposer configuration.
//!
//! Settings come from an optional TOML file named by `RELAYGL_CONFIG`,
//! then individual `RELAYGL_*` environment variables on top. A value that
//! does not parse is logged and the previous value is kept.
//!
//! | Variable              | Field                          |
//! |-----------------------|--------------------------------|
//! | `RELAYGL_DEBUG`       | `debug`                        |
//! | `RELAYGL_VERBOSE`     | `verbose`                      |
//! | `RELAYGL_TRAPX11`     | `trap_x11`                     |
//! | `RELAYGL_CLIENT`      | `client`                       |
//! | `RELAYGL_EXCLUDE`     | `excluded_displays`            |
//! | `RELAYGL_DISPLAY`     | `local_display`                |
//! | `RELAYGL_LOG`         | `log`                          |
//! | `RELAYGL_PORT`        | `transport.port`               |
//! | `RELAYGL_SSL`         | `transport.ssl`                |
//! | `RELAYGL_QUAL`        | `transport.quality`            |
//! | `RELAYGL_SUBSAMP`     | `transport.subsampling`        |
//! | `RELAYGL_COMPRESS`    | `transport.codec`              |
//! | `RELAYGL_STRIPHEIGHT` | `transport.strip_height`       |

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::channel::{DEFAULT_QUEUE_DEPTH, SenderOptions};
use crate::error::RelayError;
use crate::frame::{CodecId, DEFAULT_QUALITY, DEFAULT_STRIP_HEIGHT, Subsampling};
use crate::transport::{Endpoint, TlsSettings, default_port};

pub const CONFIG_VAR: &str = "RELAYGL_CONFIG";

// ── EnvSource ────────────────────────────────────────────────────

/// Where environment settings are read from.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<const N: usize> EnvSource for [(&str, &str); N] {
    fn var(&self, key: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }
}

// ── FakerConfig ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FakerConfig {
    /// Print the PID and wait for a debugger before continuing.
    pub debug: bool,
    /// Log startup details.
    pub verbose: bool,
    /// Trap protocol errors instead of letting them abort the host.
    pub trap_x11: bool,
    /// Remote display frames are sent to, as `host:display`.
    pub client: Option<String>,
    /// Displays never intercepted. Comma, space or tab separated.
    pub excluded_displays: String,
    /// The display rendering happens on. Empty means the default.
    pub local_display: String,
    /// File the host should route diagnostics to.
    pub log: Option<PathBuf>,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Explicit port; the well-known plain or TLS port otherwise.
    pub port: Option<u16>,
    pub ssl: bool,
    pub strip_height: u32,
    pub quality: u8,
    pub subsampling: Subsampling,
    pub codec: CodecId,
    pub queue_depth: usize,
    pub tls: TlsSettings,
}

impl Default for FakerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            verbose: false,
            trap_x11: false,
            client: None,
            excluded_displays: String::new(),
            local_display: String::new(),
            log: None,
            transport: TransportConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: None,
            ssl: false,
            strip_height: DEFAULT_STRIP_HEIGHT,
            quality: DEFAULT_QUALITY,
            subsampling: Subsampling::default(),
            codec: CodecId::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            tls: TlsSettings::default(),
        }
    }
}

impl TransportConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| default_port(self.ssl))
    }

    pub fn sender_options(&self) -> SenderOptions {
        SenderOptions {
            codec: self.codec,
            queue_depth: self.queue_depth,
            tls: self.ssl.then(|| self.tls.clone()),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl FakerConfig {
    /// File named by `RELAYGL_CONFIG` (if any), then environment
    /// overrides.
    pub fn load(env: &dyn EnvSource) -> Self {
        let mut config = match env.var(CONFIG_VAR) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Self::default(),
        };
        config.apply_env(env);
        config
    }

    /// Load a TOML file, falling back to defaults.
    pub fn from_file(path: &Path) -> Self {
        Self::try_from_file(path).unwrap_or_else(|e| {
            warn!("{e}; using defaults");
            Self::default()
        })
    }

    pub fn try_from_file(path: &Path) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = toml::from_str(&text)
            .map_err(|e| RelayError::Config(format!("invalid config {}: {e}", path.display())))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Overlay every `RELAYGL_*` variable that is set.
    pub fn apply_env(&mut self, env: &dyn EnvSource) {
        if let Some(v) = flag(env, "RELAYGL_DEBUG") {
            self.debug = v;
        }
        if let Some(v) = flag(env, "RELAYGL_VERBOSE") {
            self.verbose = v;
        }
        if let Some(v) = flag(env, "RELAYGL_TRAPX11") {
            self.trap_x11 = v;
        }
        if let Some(v) = env.var("RELAYGL_CLIENT") {
            self.client = (!v.trim().is_empty()).then(|| v.trim().to_string());
        }
        if let Some(v) = env.var("RELAYGL_EXCLUDE") {
            self.excluded_displays = v;
        }
        if let Some(v) = env.var("RELAYGL_DISPLAY") {
            self.local_display = v.trim().to_string();
        }
        if let Some(v) = env.var("RELAYGL_LOG") {
            self.log = (!v.is_empty()).then(|| PathBuf::from(v));
        }

        let t = &mut self.transport;
        if let Some(v) = parse(env, "RELAYGL_PORT") {
            t.port = Some(v);
        }
        if let Some(v) = flag(env, "RELAYGL_SSL") {
            t.ssl = v;
        }
        if let Some(v) = parse::<u8>(env, "RELAYGL_QUAL") {
            if v <= 100 {
                t.quality = v;
            } else {
                warn!(var = "RELAYGL_QUAL", value = v, "quality must be 0-100; ignoring");
            }
        }
        if let Some(v) = parse(env, "RELAYGL_SUBSAMP") {
            t.subsampling = v;
        }
        if let Some(v) = parse(env, "RELAYGL_COMPRESS") {
            t.codec = v;
        }
        if let Some(v) = parse::<u32>(env, "RELAYGL_STRIPHEIGHT") {
            if v > 0 {
                t.strip_height = v;
            } else {
                warn!(var = "RELAYGL_STRIPHEIGHT", "strip height must be positive; ignoring");
            }
        }
    }

    /// Where frames go. `localhost` when no client is configured.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::parse(self.client.as_deref().unwrap_or(""))
    }

    pub fn is_excluded(&self, display: &str) -> bool {
        is_display_excluded(display, &self.excluded_displays)
    }
}

/// Whether `name` appears in `list`.
///
/// `list` is split on commas, spaces and tabs; entries compare
/// case-insensitively.
pub fn is_display_excluded(name: &str, list: &str) -> bool {
    list.split([',', ' ', '\t'])
        .filter(|entry| !entry.is_empty())
        .any(|entry| entry.eq_ignore_ascii_case(name))
}

fn flag(env: &dyn EnvSource, key: &str) -> Option<bool> {
    let raw = env.var(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!(var = key, value = %raw, "expected a boolean; ignoring");
            None
        }
    }
}

fn parse<T>(env: &dyn EnvSource, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env.var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(var = key, value = %raw, "ignoring invalid setting: {e}");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
