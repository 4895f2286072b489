//! # relaygl-core
//!
//! Core library of the relaygl GPU-side interposer and frame transport.
//!
//! This crate contains:
//! - **Critical section**: the process-wide reentrant lock for init and teardown
//! - **Registries**: per-resource-class handle → state tables with kill-once semantics
//! - **Thread context**: per-thread interception depth and diagnostic markers
//! - **Config**: `FakerConfig`, layered from TOML and `RELAYGL_*` variables
//! - **Transport**: `Connection` / `Listener` over TCP, optionally TLS
//! - **Frame**: frames, strip geometry, wire headers and strip codecs
//! - **Channel**: `FrameSender` / `FrameReceiver` sessions with per-window ordering
//! - **Lifecycle**: exactly-once initialisation and process shutdown
//! - **Error**: `RelayError` — typed, `thiserror`-based error hierarchy

pub mod channel;
pub mod config;
pub mod critical;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod registry;
pub mod thread_ctx;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{FrameReceiver, FrameSender, SenderOptions, SessionPhase, SessionStats};
pub use config::{EnvSource, FakerConfig, ProcessEnv, is_display_excluded};
pub use critical::{CriticalGuard, CriticalSection};
pub use error::{RelayError, SessionError, TransportError};
pub use frame::{CodecId, Frame, FrameFlags, FrameHeader, FramePool, StripLayout, Subsampling};
pub use lifecycle::{Lifecycle, ShutdownRole, ThreadTerminated};
pub use registry::{Registries, Registry};
pub use transport::{Connection, Endpoint, Incoming, Listener, TlsSettings};
