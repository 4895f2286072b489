//! Domain-specific error types for relaygl.
//!
//! Registry and critical-section operations are total and never fail.
//! Everything that touches the network, a native resource or external
//! configuration returns `Result<T, RelayError>` (or one of the typed
//! layer errors below, which convert into it).

use std::io;

use thiserror::Error;

/// The canonical error type for relaygl.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Transport Errors ─────────────────────────────────────────
    /// Socket or TLS failure while establishing or using a connection.
    #[error(transparent)]
    Transport(#[from] TransportError),

    // ── Session Errors ───────────────────────────────────────────
    /// A frame channel operation failed mid-stream.
    #[error(transparent)]
    Session(#[from] SessionError),

    // ── Interposer Errors ────────────────────────────────────────
    /// A required native resource could not be created or queried.
    #[error("resource error: {0}")]
    Resource(String),

    /// An external entry point could not be resolved.
    #[error("could not load function \"{name}\": {reason}")]
    Symbol { name: String, reason: String },

    /// External configuration was invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── TransportError ────────────────────────────────────────────────

/// Errors raised by [`Connection`](crate::transport::Connection) and
/// [`Listener`](crate::transport::Listener).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The TCP/IO layer reported an error. Carries the OS error text.
    #[error("connection error in {op}: {source}")]
    Connection {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The TLS handshake or record layer failed.
    #[error("TLS error in {op}: {message}")]
    Tls { op: &'static str, message: String },

    /// The connection has already been closed.
    #[error("connection is closed")]
    Closed,
}

impl TransportError {
    /// Classify an I/O error from `op`.
    ///
    /// `tokio-rustls` reports record-layer failures as `io::Error`s
    /// wrapping a `rustls::Error`; those become [`TransportError::Tls`].
    pub fn from_io(op: &'static str, source: io::Error) -> Self {
        let tls_message = source
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .map(ToString::to_string);
        match tls_message {
            Some(message) => TransportError::Tls { op, message },
            None => TransportError::Connection { op, source },
        }
    }

    /// Whether the peer went away cleanly (EOF or reset).
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Connection { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            TransportError::Closed => true,
            TransportError::Tls { .. } => false,
        }
    }
}

// ── SessionError ──────────────────────────────────────────────────

/// Typed error for a frame channel session.
///
/// Any of these terminates the session it came from; the caller
/// decides whether to open a new one.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The underlying connection failed.
    #[error("session transport failed: {0}")]
    Transport(#[from] TransportError),

    /// The peer sent bytes that violate the frame protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A strip could not be encoded or decoded.
    #[error("strip codec failed: {0}")]
    Codec(String),

    /// A frame arrived out of order for its window.
    #[error("frame {got} for window {window:#x} arrived after frame {last}")]
    SequenceRegression { window: u64, last: u64, got: u64 },

    /// The stream ended inside a frame.
    #[error("stream ended inside frame for window {window:#x}")]
    Truncated { window: u64 },

    /// The session is no longer open.
    #[error("session closed: {0}")]
    Closed(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RelayError {
    fn from(s: String) -> Self {
        RelayError::Other(s)
    }
}

impl From<&str> for RelayError {
    fn from(s: &str) -> Self {
        RelayError::Other(s.to_string())
    }
}

impl From<io::Error> for RelayError {
    fn from(e: io::Error) -> Self {
        RelayError::Transport(TransportError::from_io("io", e))
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(e: toml::de::Error) -> Self {
        RelayError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = SessionError::SequenceRegression {
            window: 0x2a,
            last: 7,
            got: 3,
        };
        assert!(e.to_string().contains("0x2a"));
        assert!(e.to_string().contains('7'));

        let e = TransportError::Tls {
            op: "connect",
            message: "bad certificate".into(),
        };
        assert!(e.to_string().contains("bad certificate"));
    }

    #[test]
    fn from_string() {
        let e: RelayError = "something broke".into();
        assert!(matches!(e, RelayError::Other(_)));
    }

    #[test]
    fn io_errors_are_connection_errors() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let e = TransportError::from_io("send", io_err);
        assert!(matches!(e, TransportError::Connection { op: "send", .. }));
        assert!(e.is_disconnect());
    }

    #[test]
    fn wrapped_rustls_errors_are_tls_errors() {
        let io_err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::DecryptError,
        );
        let e = TransportError::from_io("recv", io_err);
        assert!(matches!(e, TransportError::Tls { op: "recv", .. }));
        assert!(!e.is_disconnect());
    }

    #[test]
    fn session_error_lifts_into_relay_error() {
        let e: RelayError = SessionError::Closed("gone".into()).into();
        assert!(matches!(e, RelayError::Session(_)));
    }
}
