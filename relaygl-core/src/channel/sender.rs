//! The sending end of a frame channel.
//!
//! Frames are queued to a per-session writer task. The queue is bounded,
//! so a slow peer pushes back on the render path instead of buffering
//! without limit. Sequence numbers are assigned while the queue lock is
//! held, which keeps each window's frames in production order on the
//! wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::channel::phase::SessionPhase;
use crate::channel::wire;
use crate::error::SessionError;
use crate::frame::header::CodecId;
use crate::frame::types::{Frame, FramePool};
use crate::transport::{Connection, TlsSettings};

pub const DEFAULT_QUEUE_DEPTH: usize = 3;

#[derive(Debug, Clone)]
pub struct SenderOptions {
    pub codec: CodecId,
    /// Frames that may wait for the writer before `send_frame` blocks.
    pub queue_depth: usize,
    /// Run the TLS handshake with these settings after connecting.
    pub tls: Option<TlsSettings>,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            codec: CodecId::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            tls: None,
        }
    }
}

/// Totals for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub bytes: u64,
}

struct Queue {
    tx: Option<mpsc::Sender<Frame>>,
    writer: Option<JoinHandle<Result<SessionStats, SessionError>>>,
    sequences: HashMap<u64, u64>,
    finished: Option<SessionStats>,
}

/// Streams frames to one peer.
pub struct FrameSender {
    queue: tokio::sync::Mutex<Queue>,
    phase: Arc<Mutex<SessionPhase>>,
    pool: FramePool,
    peer: SocketAddr,
}

impl FrameSender {
    /// Connect to `host:port` and open a session.
    pub async fn connect(
        host: &str,
        port: u16,
        options: SenderOptions,
    ) -> Result<Self, SessionError> {
        let mut phase = SessionPhase::default();
        phase.begin_connect()?;
        let conn = Connection::connect(host, port, options.tls.as_ref()).await?;
        Self::start(conn, phase, &options)
    }

    /// Open a session over an established connection.
    pub fn from_connection(conn: Connection, options: SenderOptions) -> Result<Self, SessionError> {
        let mut phase = SessionPhase::default();
        phase.begin_connect()?;
        Self::start(conn, phase, &options)
    }

    fn start(
        conn: Connection,
        mut phase: SessionPhase,
        options: &SenderOptions,
    ) -> Result<Self, SessionError> {
        phase.open()?;
        let peer = conn.peer_addr();
        let phase = Arc::new(Mutex::new(phase));
        let pool = FramePool::new(options.queue_depth.max(1) + 1);
        let (tx, rx) = mpsc::channel(options.queue_depth.max(1));

        let writer = tokio::spawn(run_writer(
            conn,
            rx,
            options.codec,
            pool.clone(),
            phase.clone(),
        ));
        info!(%peer, codec = ?options.codec, "frame session open");

        Ok(Self {
            queue: tokio::sync::Mutex::new(Queue {
                tx: Some(tx),
                writer: Some(writer),
                sequences: HashMap::new(),
                finished: None,
            }),
            phase,
            pool,
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.lock().clone()
    }

    /// A frame from this session's pool; its buffer comes back after
    /// the frame is sent.
    pub fn frame(&self, width: u32, height: u32, pixel_size: u8) -> Frame {
        self.pool.get(width, height, pixel_size)
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// Queue `frame` for its window. Returns the sequence number it was
    /// given.
    ///
    /// Blocks while the queue is full. If the writer has failed, the
    /// session is closed and its error is returned here.
    pub async fn send_frame(&self, mut frame: Frame) -> Result<u64, SessionError> {
        frame.validate().map_err(SessionError::Protocol)?;
        let mut queue = self.queue.lock().await;
        let Some(tx) = queue.tx.clone() else {
            return Err(SessionError::Closed("frame session is closed".into()));
        };

        let next = queue.sequences.entry(frame.window_id).or_insert(0);
        *next += 1;
        let sequence = *next;
        frame.sequence = sequence;

        if tx.send(frame).await.is_err() {
            return match finish(&mut queue).await {
                Err(e) => Err(e),
                Ok(_) => Err(SessionError::Closed("frame writer has stopped".into())),
            };
        }
        Ok(sequence)
    }

    /// Flush queued frames and close the session.
    ///
    /// Later calls return the same totals without touching the peer.
    pub async fn close(&self) -> Result<SessionStats, SessionError> {
        let mut queue = self.queue.lock().await;
        finish(&mut queue).await
    }
}

async fn finish(queue: &mut Queue) -> Result<SessionStats, SessionError> {
    queue.tx = None;
    let Some(writer) = queue.writer.take() else {
        return queue
            .finished
            .clone()
            .ok_or_else(|| SessionError::Closed("frame session failed earlier".into()));
    };
    let outcome = match writer.await {
        Ok(outcome) => outcome,
        Err(e) => Err(SessionError::Closed(format!("frame writer aborted: {e}"))),
    };
    if let Ok(stats) = &outcome {
        queue.finished = Some(stats.clone());
    }
    outcome
}

async fn run_writer(
    mut conn: Connection,
    mut rx: mpsc::Receiver<Frame>,
    codec: CodecId,
    pool: FramePool,
    phase: Arc<Mutex<SessionPhase>>,
) -> Result<SessionStats, SessionError> {
    let peer = conn.peer_addr();
    let mut stats = SessionStats::default();
    let result = loop {
        let Some(frame) = rx.recv().await else {
            break Ok(());
        };
        let sent = wire::write_frame(&mut conn, &frame, codec).await;
        pool.recycle(frame);
        match sent {
            Ok(bytes) => {
                stats.frames += 1;
                stats.bytes += bytes as u64;
            }
            Err(e) => break Err(e),
        }
    };

    rx.close();
    conn.close().await;
    phase.lock().close();

    match result {
        Ok(()) => {
            info!(%peer, frames = stats.frames, bytes = stats.bytes, "frame session closed");
            Ok(stats)
        }
        Err(e) => {
            error!(%peer, error = %e, "frame session failed");
            Err(e)
        }
    }
}
