//! The receiving end of a frame channel.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::channel::phase::SessionPhase;
use crate::channel::sender::SessionStats;
use crate::channel::wire;
use crate::error::SessionError;
use crate::frame::types::Frame;
use crate::transport::Connection;

/// Reads complete frames from one peer, checking per-window order.
pub struct FrameReceiver {
    conn: Connection,
    phase: SessionPhase,
    last_sequence: HashMap<u64, u64>,
    stats: SessionStats,
}

impl FrameReceiver {
    /// Open a session over an accepted connection.
    pub fn new(conn: Connection) -> Result<Self, SessionError> {
        let mut phase = SessionPhase::default();
        phase.begin_connect()?;
        phase.open()?;
        info!(peer = %conn.peer_addr(), secure = conn.is_secure(), "frame session accepted");
        Ok(Self {
            conn,
            phase,
            last_sequence: HashMap::new(),
            stats: SessionStats::default(),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The next complete frame, or `Ok(None)` once the peer has closed
    /// the session between frames.
    ///
    /// Any error closes the session.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>, SessionError> {
        if !self.phase.is_open() {
            return Err(SessionError::Closed(format!(
                "session with {} is {}",
                self.conn.peer_addr(),
                self.phase
            )));
        }

        let frame = match wire::read_frame(&mut self.conn).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(peer = %self.conn.peer_addr(), "peer ended the session");
                self.close().await;
                return Ok(None);
            }
            Err(e) => return Err(self.fail(e).await),
        };

        let last = self.last_sequence.entry(frame.window_id).or_insert(0);
        if frame.sequence <= *last {
            let e = SessionError::SequenceRegression {
                window: frame.window_id,
                last: *last,
                got: frame.sequence,
            };
            return Err(self.fail(e).await);
        }
        *last = frame.sequence;

        self.stats.frames += 1;
        self.stats.bytes += frame.pixels.len() as u64;
        Ok(Some(frame))
    }

    /// Close the session. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.conn.close().await;
        if self.phase.close() {
            info!(
                peer = %self.conn.peer_addr(),
                frames = self.stats.frames,
                "frame session closed"
            );
        }
    }

    async fn fail(&mut self, e: SessionError) -> SessionError {
        warn!(peer = %self.conn.peer_addr(), error = %e, "frame session failed");
        self.close().await;
        e
    }
}
