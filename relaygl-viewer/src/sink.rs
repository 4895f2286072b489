//! Where received frames go.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use relaygl_core::{Frame, RelayError, SessionStats};
use tokio::sync::Mutex;
use tracing::info;

/// Consumer of complete frames.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Present one frame received from `peer`.
    async fn present(&self, peer: SocketAddr, frame: Frame) -> Result<(), RelayError>;

    /// Called once when a session ends, however it ended.
    async fn session_closed(&self, peer: SocketAddr, stats: &SessionStats) {
        info!(%peer, frames = stats.frames, bytes = stats.bytes, "session ended");
    }
}

// ── StatsSink ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WindowStats {
    pub frames: u64,
    pub bytes: u64,
    pub last_sequence: u64,
    pub width: u32,
    pub height: u32,
    window_start: Instant,
    window_frames: u64,
}

/// Drops frames after counting them, logging per-window frame rates.
///
/// Windows are tracked per peer and forgotten when that peer's session
/// closes.
pub struct StatsSink {
    interval: Duration,
    windows: Mutex<HashMap<(SocketAddr, u64), WindowStats>>,
}

impl StatsSink {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Totals for `window` of `peer` so far.
    pub async fn window(&self, peer: SocketAddr, window: u64) -> Option<WindowStats> {
        self.windows.lock().await.get(&(peer, window)).cloned()
    }

    /// Windows currently tracked, across all peers.
    pub async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl FrameSink for StatsSink {
    async fn present(&self, peer: SocketAddr, frame: Frame) -> Result<(), RelayError> {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let stats = windows.entry((peer, frame.window_id)).or_insert_with(|| WindowStats {
            frames: 0,
            bytes: 0,
            last_sequence: 0,
            width: frame.width,
            height: frame.height,
            window_start: now,
            window_frames: 0,
        });
        stats.frames += 1;
        stats.bytes += frame.pixels.len() as u64;
        stats.last_sequence = frame.sequence;
        stats.width = frame.width;
        stats.height = frame.height;
        stats.window_frames += 1;

        let elapsed = now.duration_since(stats.window_start);
        if elapsed >= self.interval {
            let fps = stats.window_frames as f64 / elapsed.as_secs_f64();
            info!(
                %peer,
                window = format_args!("{:#x}", frame.window_id),
                size = format_args!("{}x{}", frame.width, frame.height),
                fps = format_args!("{fps:.1}"),
                "frame rate"
            );
            stats.window_start = now;
            stats.window_frames = 0;
        }
        Ok(())
    }

    async fn session_closed(&self, peer: SocketAddr, stats: &SessionStats) {
        let mut windows = self.windows.lock().await;
        windows.retain(|(owner, _), _| *owner != peer);
        info!(
            %peer,
            frames = stats.frames,
            bytes = stats.bytes,
            windows = windows.len(),
            "session ended"
        );
    }
}
