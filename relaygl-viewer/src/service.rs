//! Viewer service core logic.
//!
//! Accepts frame sessions, one task per peer, and hands every complete
//! frame to a [`FrameSink`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use relaygl_core::{FrameReceiver, Listener, RelayError, SessionStats};

use crate::config::ViewerConfig;
use crate::sink::FrameSink;

// ── ViewerService ────────────────────────────────────────────────

/// The top-level viewer service.
pub struct ViewerService {
    config: ViewerConfig,
    running: Arc<AtomicBool>,
    sink: Arc<dyn FrameSink>,
}

impl ViewerService {
    pub fn new(config: ViewerConfig, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task or a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind the configured address and port.
    pub async fn bind(&self) -> Result<Listener, RelayError> {
        let listener = Listener::bind(
            self.config.port(),
            Some(self.config.network.bind_address.as_str()),
            self.config.tls(),
        )
        .await?;
        Ok(listener)
    }

    /// Bind, then serve until stopped.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept sessions on `listener` until stopped.
    ///
    /// Sessions already in flight keep running after the accept loop
    /// exits; each ends when its peer closes.
    pub async fn serve(&self, listener: Listener) -> Result<(), RelayError> {
        self.running.store(true, Ordering::SeqCst);
        info!(
            addr = %listener.local_addr()?,
            secure = listener.is_secure(),
            "viewer listening"
        );

        while self.running.load(Ordering::SeqCst) {
            let accepted = tokio::select! {
                result = listener.accept_tcp() => result,
                _ = Self::wait_for_stop(&self.running) => break,
            };
            let incoming = match accepted {
                Ok(incoming) => incoming,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            // The handshake runs on the session's task so a stalled peer
            // never holds up the accept loop.
            let sink = Arc::clone(&self.sink);
            let limit = self.config.handshake_timeout();
            tokio::spawn(async move {
                let peer = incoming.peer_addr();
                let conn = match incoming.establish(limit).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(%peer, "handshake failed: {e}");
                        return;
                    }
                };
                match FrameReceiver::new(conn) {
                    Ok(receiver) => handle_session(receiver, sink).await,
                    Err(e) => warn!(%peer, "could not open session: {e}"),
                }
            });
        }

        self.running.store(false, Ordering::SeqCst);
        info!("viewer service stopped");
        Ok(())
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn wait_for_stop(running: &AtomicBool) {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            if !running.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

/// Drain one session into `sink`.
async fn handle_session(mut receiver: FrameReceiver, sink: Arc<dyn FrameSink>) {
    let peer: SocketAddr = receiver.peer_addr();
    loop {
        match receiver.recv_frame().await {
            Ok(Some(frame)) => {
                if let Err(e) = sink.present(peer, frame).await {
                    error!(%peer, "sink rejected frame: {e}");
                    receiver.close().await;
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, "session ended with error: {e}");
                break;
            }
        }
    }
    let stats: SessionStats = receiver.stats().clone();
    sink.session_closed(peer, &stats).await;
}

// ── Tests ────────────────────────────────────────────────────────
