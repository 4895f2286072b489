//! Socket transport: plain TCP or TLS over TCP.
//!
//! Frames travel on [`DEFAULT_PORT`] in the clear, or on
//! [`DEFAULT_TLS_PORT`] with the TLS handshake run immediately after
//! connect/accept and before any frame header.

pub mod connection;
pub mod tls;

pub use connection::{Connection, HANDSHAKE_TIMEOUT, Incoming, Listener, Stream};
pub use tls::{TlsLease, TlsSettings, active_leases};

pub const DEFAULT_PORT: u16 = 4242;
pub const DEFAULT_TLS_PORT: u16 = 4243;

/// The well-known port for plain or TLS sessions.
pub fn default_port(tls: bool) -> u16 {
    if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT }
}

/// A remote display named as `host:display[.screen]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    /// The part after the last `:`, if any.
    pub display: Option<String>,
}

impl Endpoint {
    /// Parse `host:display`. An empty host means `localhost`; IPv6 hosts
    /// are written in brackets.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let (host, display) = if let Some(rest) = s.strip_prefix('[') {
            match rest.split_once(']') {
                Some((host, tail)) => (host, tail.strip_prefix(':')),
                None => (rest, None),
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, display)) => (host, Some(display)),
                None => (s, None),
            }
        };
        let host = if host.is_empty() { "localhost" } else { host };
        Self {
            host: host.to_string(),
            display: display.filter(|d| !d.is_empty()).map(str::to_string),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(display) = &self.display {
            write!(f, ":{display}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_display() {
        let ep = Endpoint::parse("render01:0.0");
        assert_eq!(ep.host, "render01");
        assert_eq!(ep.display.as_deref(), Some("0.0"));
    }

    #[test]
    fn empty_host_is_localhost() {
        assert_eq!(Endpoint::parse(":1").host, "localhost");
        assert_eq!(Endpoint::parse("").host, "localhost");
    }

    #[test]
    fn bare_host() {
        let ep = Endpoint::parse("10.1.2.3");
        assert_eq!(ep.host, "10.1.2.3");
        assert!(ep.display.is_none());
    }

    #[test]
    fn bracketed_ipv6() {
        let ep = Endpoint::parse("[::1]:0");
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.display.as_deref(), Some("0"));
        assert_eq!(ep.to_string(), "[::1]:0");
    }

    #[test]
    fn well_known_ports() {
        assert_eq!(default_port(false), 4242);
        assert_eq!(default_port(true), 4243);
    }
}
