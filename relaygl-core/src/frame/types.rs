//! Frames and the frame pool.
//!
//! A [`Frame`] is produced by the render path, consumed by exactly one
//! send, and its buffer then goes back to the [`FramePool`] it came from.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::header::{FrameFlags, MAX_PAYLOAD_SIZE, MAX_STRIP_SIZE, Subsampling};
use crate::frame::strip::StripLayout;

pub const DEFAULT_STRIP_HEIGHT: u32 = 64;
pub const DEFAULT_QUALITY: u8 = 95;

/// A rendered frame bound for one target window.
///
/// `pixels` holds `height` tightly packed rows of `width * pixel_size`
/// bytes each.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel (1..=4).
    pub pixel_size: u8,
    pub quality: u8,
    pub subsampling: Subsampling,
    pub window_id: u64,
    pub strip_height: u32,
    pub flags: FrameFlags,
    /// Assigned by the sending channel; carried through on receipt.
    pub sequence: u64,
    pub pixels: Vec<u8>,
}

impl Frame {
    /// A zero-filled frame with default quality, subsampling and strip height.
    pub fn new(width: u32, height: u32, pixel_size: u8) -> Self {
        let len = width as usize * height as usize * pixel_size as usize;
        Self::with_buffer(width, height, pixel_size, vec![0; len])
    }

    fn with_buffer(width: u32, height: u32, pixel_size: u8, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixel_size,
            quality: DEFAULT_QUALITY,
            subsampling: Subsampling::default(),
            window_id: 0,
            strip_height: DEFAULT_STRIP_HEIGHT,
            flags: FrameFlags::empty(),
            sequence: 0,
            pixels,
        }
    }

    pub fn layout(&self) -> StripLayout {
        StripLayout::new(self.width, self.height, self.strip_height, self.pixel_size)
    }

    /// Bytes the pixel buffer must hold.
    pub fn byte_len(&self) -> usize {
        self.layout().frame_bytes()
    }

    /// Row `y`, or `None` past the last row or a short buffer.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let row = self.layout().row_bytes();
        let start = y as usize * row;
        self.pixels.get(start..start + row)
    }

    /// Check the geometry fits the wire limits and the buffer matches it.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("empty frame {}x{}", self.width, self.height));
        }
        if !(1..=4).contains(&self.pixel_size) {
            return Err(format!("unsupported pixel size {}", self.pixel_size));
        }
        if self.quality > 100 {
            return Err(format!("quality {} out of range", self.quality));
        }
        let layout = self.layout();
        let raw = layout.frame_bytes() as u64;
        if raw > MAX_PAYLOAD_SIZE {
            return Err(format!(
                "frame {}x{}x{} is {raw} bytes (max {MAX_PAYLOAD_SIZE})",
                self.width, self.height, self.pixel_size
            ));
        }
        let strip = layout.raw_len(0) as u64;
        if strip > u64::from(MAX_STRIP_SIZE) {
            return Err(format!(
                "strips of {} rows are {strip} bytes (max {MAX_STRIP_SIZE})",
                layout.rows(0)
            ));
        }
        if self.pixels.len() != self.byte_len() {
            return Err(format!(
                "pixel buffer is {} bytes, {}x{}x{} needs {}",
                self.pixels.len(),
                self.width,
                self.height,
                self.pixel_size,
                self.byte_len()
            ));
        }
        Ok(())
    }
}

// ── FramePool ────────────────────────────────────────────────────

/// Recycles frame buffers between the render path and the sender.
///
/// Cloning the pool yields another handle to the same buffers.
#[derive(Clone)]
pub struct FramePool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
    capacity: usize,
}

impl FramePool {
    /// A pool keeping at most `capacity` idle buffers.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            capacity,
        }
    }

    /// A frame of the requested geometry, reusing an idle buffer if any.
    ///
    /// Reused buffers keep their old contents; the caller overwrites them.
    pub fn get(&self, width: u32, height: u32, pixel_size: u8) -> Frame {
        let len = width as usize * height as usize * pixel_size as usize;
        let mut buffer = self.free.lock().pop().unwrap_or_default();
        buffer.resize(len, 0);
        Frame::with_buffer(width, height, pixel_size, buffer)
    }

    /// Return a frame's buffer to the pool.
    pub fn recycle(&self, frame: Frame) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(frame.pixels);
        }
    }

    /// Idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_frame_has_defaults() {
        let f = Frame::new(301, 301, 3);
        assert_eq!(f.pixels.len(), 301 * 301 * 3);
        assert_eq!(f.quality, DEFAULT_QUALITY);
        assert_eq!(f.strip_height, DEFAULT_STRIP_HEIGHT);
        assert!(f.validate().is_ok());
        assert_eq!(f.row(300).map(<[u8]>::len), Some(903));
        assert_eq!(f.row(301), None);
    }

    fn unallocated(width: u32, height: u32, pixel_size: u8) -> Frame {
        Frame::with_buffer(width, height, pixel_size, Vec::new())
    }

    #[test]
    fn validate_enforces_wire_limits() {
        let err = unallocated(20_000, 20_000, 1).validate().unwrap_err();
        assert!(err.contains("max"), "{err}");

        // One 64-row strip of this width is over the strip limit.
        let err = unallocated(300_000, 64, 4).validate().unwrap_err();
        assert!(err.contains("strips of 64 rows"), "{err}");
    }

    #[test]
    fn validate_catches_short_buffer() {
        let mut f = Frame::new(4, 4, 4);
        f.pixels.truncate(10);
        assert!(f.validate().is_err());
    }

    #[test]
    fn pool_reuses_buffers() {
        let pool = FramePool::new(2);
        let f = pool.get(8, 8, 4);
        let ptr = f.pixels.as_ptr();
        pool.recycle(f);
        assert_eq!(pool.idle(), 1);

        let g = pool.get(8, 8, 4);
        assert_eq!(g.pixels.as_ptr(), ptr);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn pool_is_bounded() {
        let pool = FramePool::new(1);
        pool.recycle(Frame::new(1, 1, 1));
        pool.recycle(Frame::new(1, 1, 1));
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn pool_resizes_for_new_geometry() {
        let pool = FramePool::new(1);
        pool.recycle(Frame::new(2, 2, 1));
        let f = pool.get(10, 10, 3);
        assert_eq!(f.pixels.len(), 300);
        assert!(f.validate().is_ok());
    }
}
