//! A TCP connection, optionally wrapped in TLS.
//!
//! `send` and `recv` move whole buffers: partial OS transfers are
//! retried until the buffer is done or the connection fails. Nothing is
//! retried at the connect level. The only timeout is the server-side
//! TLS handshake limit.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::transport::tls::{TlsLease, TlsSettings};

/// Anything a [`Connection`] can run over.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// A connected byte stream to one peer.
///
/// Closed exactly once: [`close`](Self::close) is idempotent and dropping
/// an open connection releases it too.
pub struct Connection {
    // Declared before `tls` so the session goes before the lease.
    stream: Option<Box<dyn Stream>>,
    peer: SocketAddr,
    tls: Option<TlsLease>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("secure", &self.is_secure())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Connect to `host:port`, then run the client TLS handshake when
    /// `tls` is given.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: Option<&TlsSettings>,
    ) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::from_io("connect", e))?;
        tcp.set_nodelay(true)
            .map_err(|e| TransportError::from_io("connect", e))?;
        let peer = tcp
            .peer_addr()
            .map_err(|e| TransportError::from_io("connect", e))?;

        let Some(settings) = tls else {
            info!(%peer, "connected");
            return Ok(Self::from_stream(tcp, peer));
        };

        let lease = TlsLease::acquire();
        let connector = TlsConnector::from(settings.client_config()?);
        let name = settings.server_name(host)?;
        let stream = connector
            .connect(name, tcp)
            .await
            .map_err(|e| TransportError::from_io("handshake", e))?;
        info!(%peer, "connected (TLS)");
        Ok(Self {
            stream: Some(Box::new(stream)),
            peer,
            tls: Some(lease),
        })
    }

    /// Wrap an already connected stream.
    pub fn from_stream<S: Stream + 'static>(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream: Some(Box::new(stream)),
            peer,
            tls: None,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Write all of `data`.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream
            .write_all(data)
            .await
            .map_err(|e| TransportError::from_io("send", e))?;
        stream
            .flush()
            .await
            .map_err(|e| TransportError::from_io("send", e))
    }

    /// Fill all of `buf`. End of stream is an error.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        if self.recv_or_eof(buf).await? {
            Ok(())
        } else {
            Err(TransportError::from_io(
                "recv",
                io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection"),
            ))
        }
    }

    /// Fill all of `buf`, or return `Ok(false)` if the peer closed the
    /// stream before sending any of it.
    pub async fn recv_or_eof(&mut self, buf: &mut [u8]) -> Result<bool, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = stream
                .read(&mut buf[filled..])
                .await
                .map_err(|e| TransportError::from_io("recv", e))?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(TransportError::from_io(
                    "recv",
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("peer closed after {filled} of {} bytes", buf.len()),
                    ),
                ));
            }
            filled += n;
        }
        Ok(true)
    }

    /// Shut the stream down and release it. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone; nothing to report then.
            if let Err(e) = stream.shutdown().await {
                debug!(peer = %self.peer, error = %e, "shutdown failed");
            }
            drop(stream);
            debug!(peer = %self.peer, "connection closed");
        }
        self.tls = None;
    }
}

// ── Listener ─────────────────────────────────────────────────────

/// Server side: accepts connections, running the TLS handshake when
/// configured.
pub struct Listener {
    inner: TcpListener,
    acceptor: Option<TlsAcceptor>,
    _lease: Option<TlsLease>,
}

impl Listener {
    /// Bind `bind_addr:port` (all interfaces when `bind_addr` is `None`).
    pub async fn bind(
        port: u16,
        bind_addr: Option<&str>,
        tls: Option<&TlsSettings>,
    ) -> Result<Self, TransportError> {
        let (acceptor, lease) = match tls {
            Some(settings) => {
                let lease = TlsLease::acquire();
                (Some(TlsAcceptor::from(settings.server_config()?)), Some(lease))
            }
            None => (None, None),
        };
        let addr = bind_addr.unwrap_or("0.0.0.0");
        let inner = TcpListener::bind((addr, port))
            .await
            .map_err(|e| TransportError::from_io("listen", e))?;
        Ok(Self {
            inner,
            acceptor,
            _lease: lease,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.inner
            .local_addr()
            .map_err(|e| TransportError::from_io("listen", e))
    }

    pub fn is_secure(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Wait for the next peer and run its handshake.
    ///
    /// A peer that stalls mid-handshake holds up this call for at most
    /// [`HANDSHAKE_TIMEOUT`]. Servers juggling many peers should take
    /// [`accept_tcp`](Self::accept_tcp) and finish each handshake on
    /// its own task.
    pub async fn accept(&self) -> Result<Connection, TransportError> {
        self.accept_tcp().await?.establish(HANDSHAKE_TIMEOUT).await
    }

    /// Wait for the next TCP peer without running any handshake.
    pub async fn accept_tcp(&self) -> Result<Incoming, TransportError> {
        let (tcp, peer) = self
            .inner
            .accept()
            .await
            .map_err(|e| TransportError::from_io("accept", e))?;
        tcp.set_nodelay(true)
            .map_err(|e| TransportError::from_io("accept", e))?;
        Ok(Incoming {
            tcp,
            peer,
            acceptor: self.acceptor.clone(),
        })
    }
}

// ── Incoming ─────────────────────────────────────────────────────

/// How long an accepted peer gets to complete the TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A peer whose TCP connection is accepted but whose handshake, if the
/// listener runs TLS, has not happened yet.
pub struct Incoming {
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
}

impl Incoming {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Finish the handshake, giving up after `limit`.
    pub async fn establish(self, limit: Duration) -> Result<Connection, TransportError> {
        let peer = self.peer;
        let Some(acceptor) = self.acceptor else {
            debug!(%peer, "accepted");
            return Ok(Connection::from_stream(self.tcp, peer));
        };
        let lease = TlsLease::acquire();
        let stream = tokio::time::timeout(limit, acceptor.accept(self.tcp))
            .await
            .map_err(|_| TransportError::Tls {
                op: "handshake",
                message: format!("{peer} sent no handshake within {limit:?}"),
            })?
            .map_err(|e| TransportError::from_io("handshake", e))?;
        debug!(%peer, "accepted (TLS)");
        Ok(Connection {
            stream: Some(Box::new(stream)),
            peer,
            tls: Some(lease),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:4242".parse().unwrap()
    }

    #[tokio::test]
    async fn recv_reassembles_partial_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"ab")
            .read(b"c")
            .read(b"defg")
            .build();
        let mut conn = Connection::from_stream(mock, peer());
        let mut buf = [0u8; 7];
        conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcdefg");
    }

    #[tokio::test]
    async fn eof_before_any_byte_is_reported_cleanly() {
        let mock = tokio_test::io::Builder::new().build();
        let mut conn = Connection::from_stream(mock, peer());
        let mut buf = [0u8; 4];
        assert!(!conn.recv_or_eof(&mut buf).await.unwrap());
    }

    #[tokio::test]
    async fn eof_mid_buffer_is_a_disconnect() {
        let mock = tokio_test::io::Builder::new().read(b"ab").build();
        let mut conn = Connection::from_stream(mock, peer());
        let mut buf = [0u8; 4];
        let err = conn.recv_or_eof(&mut buf).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn send_writes_everything() {
        let mock = tokio_test::io::Builder::new().write(b"hello").build();
        let mut conn = Connection::from_stream(mock, peer());
        conn.send(b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (a, _b) = tokio::io::duplex(64);
        let mut conn = Connection::from_stream(a, peer());
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(b"x").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn silent_peer_times_out_without_blocking_the_next() {
        let listener = Listener::bind(0, Some("127.0.0.1"), Some(&TlsSettings::default()))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();

        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let stalled = listener.accept_tcp().await.unwrap();

        let client = tokio::spawn(async move {
            Connection::connect("127.0.0.1", port, Some(&TlsSettings::default())).await
        });
        let next = listener.accept_tcp().await.unwrap();
        let server = next.establish(Duration::from_secs(5)).await.unwrap();
        assert!(server.is_secure());
        assert!(client.await.unwrap().unwrap().is_secure());

        let err = stalled
            .establish(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Tls { op: "handshake", .. }));
    }

    #[tokio::test]
    async fn connect_refused_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = Connection::connect("127.0.0.1", port, None).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection { op: "connect", .. }));
    }
}
