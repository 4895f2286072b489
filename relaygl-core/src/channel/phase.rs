//! Session state machine shared by the sending and receiving ends.
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::time::Instant;

use crate::error::SessionError;

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of a frame channel session.
///
/// ```text
///  Closed ──► Connecting ──► Open
///    ▲            │            │
///    └────────────┴────────────┘   (close, or any error)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session. Initial and terminal state.
    #[default]
    Closed,

    /// Transport being established (TCP connect, TLS handshake).
    Connecting,

    /// Frames may flow.
    Open {
        /// When the session opened.
        since: Instant,
    },
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open { .. } => write!(f, "Open"),
        }
    }
}

impl SessionPhase {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the session has been open. `None` in any other phase.
    pub fn open_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Open { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Closed`.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        match self {
            Self::Closed => {
                *self = Self::Connecting;
                Ok(())
            }
            other => Err(SessionError::Protocol(format!(
                "cannot connect: session is {other}"
            ))),
        }
    }

    /// Valid from: `Connecting`.
    pub fn open(&mut self) -> Result<(), SessionError> {
        match self {
            Self::Connecting => {
                *self = Self::Open {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(SessionError::Protocol(format!(
                "cannot open: session is {other}"
            ))),
        }
    }

    /// Move to `Closed` from any phase. Returns whether anything changed.
    pub fn close(&mut self) -> bool {
        let was_closed = self.is_closed();
        *self = Self::Closed;
        !was_closed
    }
}

// ── Tests ────────────────────────────────────────────────────────
