//! Strip geometry.
//!
//! A frame of `height` rows is cut into `ceil(height / strip_height)`
//! horizontal strips. Every strip is `strip_height` rows tall except
//! possibly the last, which holds the remainder.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripLayout {
    pub width: u32,
    pub height: u32,
    pub strip_height: u32,
    pub pixel_size: u8,
}

/// Geometry of one strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strip {
    pub index: u32,
    /// First row of the strip.
    pub y: u32,
    pub rows: u32,
    /// Byte range of the strip inside a tightly packed frame buffer.
    pub bytes: Range<usize>,
}

impl StripLayout {
    /// `strip_height` of zero is treated as one strip covering the frame.
    pub fn new(width: u32, height: u32, strip_height: u32, pixel_size: u8) -> Self {
        let strip_height = if strip_height == 0 {
            height.max(1)
        } else {
            strip_height
        };
        Self {
            width,
            height,
            strip_height,
            pixel_size,
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.pixel_size as usize
    }

    /// Total bytes of the unencoded frame.
    pub fn frame_bytes(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    pub fn count(&self) -> u32 {
        self.height.div_ceil(self.strip_height)
    }

    /// Rows in strip `index` (zero past the end).
    pub fn rows(&self, index: u32) -> u32 {
        let y = index.saturating_mul(self.strip_height);
        if y >= self.height {
            0
        } else {
            self.strip_height.min(self.height - y)
        }
    }

    /// Unencoded length of strip `index`.
    pub fn raw_len(&self, index: u32) -> usize {
        self.rows(index) as usize * self.row_bytes()
    }

    pub fn strip(&self, index: u32) -> Option<Strip> {
        if index >= self.count() {
            return None;
        }
        let y = index * self.strip_height;
        let rows = self.rows(index);
        let start = y as usize * self.row_bytes();
        Some(Strip {
            index,
            y,
            rows,
            bytes: start..start + rows as usize * self.row_bytes(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Strip> + '_ {
        (0..self.count()).filter_map(move |i| self.strip(i))
    }
}
