//! Frame and strip headers as they appear on the wire.
//!
//! ## Wire format
//!
//! **Frame header** (52 bytes, little-endian), sent once per frame:
//! ```text
//! magic:         [u8; 4]  "RGLF"
//! version:       u8       (1)
//! quality:       u8       0..=100
//! subsampling:   u8       see Subsampling
//! codec:         u8       see CodecId
//! width:         u32
//! height:        u32
//! strip_height:  u32
//! pixel_size:    u8       bytes per pixel, 1..=4
//! flags:         u8       see FrameFlags
//! reserved:      [u8; 2]
//! window_id:     u64
//! sequence:      u64      per-window, strictly increasing
//! payload_size:  u64      sum of all strip lengths
//! checksum:      u32      first 4 bytes of blake3(strip bytes)
//! ```
//!
//! **Strip header** (8 bytes), before each of the
//! `ceil(height / strip_height)` strips:
//! ```text
//! index:   u32
//! length:  u32   encoded length; for raw frames exactly rows * width * pixel_size
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

// ── Constants ────────────────────────────────────────────────────

pub const FRAME_MAGIC: [u8; 4] = *b"RGLF";
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest payload a single frame may declare (256 MiB).
pub const MAX_PAYLOAD_SIZE: u64 = 256 * 1024 * 1024;

/// Largest strip length accepted from the wire.
pub const MAX_STRIP_SIZE: u32 = 64 * 1024 * 1024;

// ── Subsampling ──────────────────────────────────────────────────

/// Chroma subsampling the encoder may apply to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Subsampling {
    /// No chroma subsampling.
    #[default]
    #[serde(rename = "444")]
    S444,
    #[serde(rename = "422")]
    S422,
    #[serde(rename = "411")]
    S411,
    #[serde(rename = "420")]
    S420,
    /// Luminance only.
    #[serde(rename = "gray")]
    Gray,
}

impl Subsampling {
    pub const fn as_u8(self) -> u8 {
        match self {
            Subsampling::S444 => 0,
            Subsampling::S422 => 1,
            Subsampling::S411 => 2,
            Subsampling::S420 => 3,
            Subsampling::Gray => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Subsampling::S444,
            1 => Subsampling::S422,
            2 => Subsampling::S411,
            3 => Subsampling::S420,
            4 => Subsampling::Gray,
            _ => return None,
        })
    }
}

impl std::str::FromStr for Subsampling {
    type Err = String;

    /// Accepts `444`, `422`, `411`, `420`, `gray` and the chroma factors
    /// `1`, `2`, `4`, `0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "444" | "1" | "none" => Ok(Subsampling::S444),
            "422" | "2" => Ok(Subsampling::S422),
            "411" | "4" => Ok(Subsampling::S411),
            "420" => Ok(Subsampling::S420),
            "gray" | "grey" | "0" => Ok(Subsampling::Gray),
            other => Err(format!("unknown subsampling mode `{other}`")),
        }
    }
}

impl std::fmt::Display for Subsampling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Subsampling::S444 => "4:4:4",
            Subsampling::S422 => "4:2:2",
            Subsampling::S411 => "4:1:1",
            Subsampling::S420 => "4:2:0",
            Subsampling::Gray => "gray",
        };
        f.write_str(s)
    }
}

// ── CodecId ──────────────────────────────────────────────────────

/// Which strip codec produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    /// Strips are raw, tightly packed rows.
    Raw,
    /// Strips are zstd-compressed rows.
    #[default]
    Zstd,
}

impl CodecId {
    pub const fn as_u8(self) -> u8 {
        match self {
            CodecId::Raw => 0,
            CodecId::Zstd => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CodecId::Raw),
            1 => Some(CodecId::Zstd),
            _ => None,
        }
    }
}

impl std::str::FromStr for CodecId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "none" => Ok(CodecId::Raw),
            "zstd" => Ok(CodecId::Zstd),
            other => Err(format!("unknown codec `{other}`")),
        }
    }
}

// ── FrameFlags ───────────────────────────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u8 {
        /// The frame is the right-eye half of a stereo pair.
        const RIGHT_EYE = 0x01;
        /// Rows are stored bottom row first.
        const BOTTOM_UP = 0x02;
    }
}

// ── FrameHeader ──────────────────────────────────────────────────

/// Per-frame metadata sent before the strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub quality: u8,
    pub subsampling: Subsampling,
    pub codec: CodecId,
    pub width: u32,
    pub height: u32,
    pub strip_height: u32,
    pub pixel_size: u8,
    pub flags: FrameFlags,
    pub window_id: u64,
    pub sequence: u64,
    pub payload_size: u64,
    pub checksum: u32,
}

impl FrameHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 52;

    /// Number of strips the payload is split into.
    pub fn strip_count(&self) -> u32 {
        self.height.div_ceil(self.strip_height)
    }

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&FRAME_MAGIC);
        buf[4] = PROTOCOL_VERSION;
        buf[5] = self.quality;
        buf[6] = self.subsampling.as_u8();
        buf[7] = self.codec.as_u8();
        buf[8..12].copy_from_slice(&self.width.to_le_bytes());
        buf[12..16].copy_from_slice(&self.height.to_le_bytes());
        buf[16..20].copy_from_slice(&self.strip_height.to_le_bytes());
        buf[20] = self.pixel_size;
        buf[21] = self.flags.bits();
        buf[24..32].copy_from_slice(&self.window_id.to_le_bytes());
        buf[32..40].copy_from_slice(&self.sequence.to_le_bytes());
        buf[40..48].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[48..52].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize and validate.
    pub fn decode(data: &[u8]) -> Result<Self, SessionError> {
        if data.len() < Self::SIZE {
            return Err(SessionError::Protocol(format!(
                "frame header too short: {} < {}",
                data.len(),
                Self::SIZE,
            )));
        }
        if data[0..4] != FRAME_MAGIC {
            return Err(SessionError::Protocol("invalid frame magic".into()));
        }
        if data[4] != PROTOCOL_VERSION {
            return Err(SessionError::Protocol(format!(
                "unsupported protocol version {}",
                data[4]
            )));
        }
        let subsampling = Subsampling::from_u8(data[6]).ok_or_else(|| {
            SessionError::Protocol(format!("unknown subsampling mode {}", data[6]))
        })?;
        let codec = CodecId::from_u8(data[7])
            .ok_or_else(|| SessionError::Protocol(format!("unknown codec {}", data[7])))?;
        let flags = FrameFlags::from_bits(data[21])
            .ok_or_else(|| SessionError::Protocol(format!("unknown frame flags {:#x}", data[21])))?;

        let header = Self {
            quality: data[5],
            subsampling,
            codec,
            width: read_u32(data, 8),
            height: read_u32(data, 12),
            strip_height: read_u32(data, 16),
            pixel_size: data[20],
            flags,
            window_id: read_u64(data, 24),
            sequence: read_u64(data, 32),
            payload_size: read_u64(data, 40),
            checksum: read_u32(data, 48),
        };
        header.validate()?;
        Ok(header)
    }

    /// Check the geometry and sizes are sane before any payload is read.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.width == 0 || self.height == 0 {
            return Err(SessionError::Protocol(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        if self.strip_height == 0 {
            return Err(SessionError::Protocol("strip height is zero".into()));
        }
        if !(1..=4).contains(&self.pixel_size) {
            return Err(SessionError::Protocol(format!(
                "unsupported pixel size {}",
                self.pixel_size
            )));
        }
        if self.quality > 100 {
            return Err(SessionError::Protocol(format!(
                "quality {} out of range",
                self.quality
            )));
        }
        let raw = self.width as u64 * self.height as u64 * self.pixel_size as u64;
        if raw > MAX_PAYLOAD_SIZE || self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(SessionError::Protocol(format!(
                "frame too large: {raw} raw bytes, {} payload bytes (max {MAX_PAYLOAD_SIZE})",
                self.payload_size
            )));
        }
        if self.codec == CodecId::Raw && self.payload_size != raw {
            return Err(SessionError::Protocol(format!(
                "raw frame declares {} payload bytes, geometry needs {raw}",
                self.payload_size
            )));
        }
        Ok(())
    }
}

// ── StripHeader ──────────────────────────────────────────────────

/// Per-strip metadata prepended to each strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripHeader {
    pub index: u32,
    pub length: u32,
}

impl StripHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.index.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, SessionError> {
        if data.len() < Self::SIZE {
            return Err(SessionError::Protocol(format!(
                "strip header too short: {} < {}",
                data.len(),
                Self::SIZE,
            )));
        }
        let header = Self {
            index: read_u32(data, 0),
            length: read_u32(data, 4),
        };
        if header.length > MAX_STRIP_SIZE {
            return Err(SessionError::Protocol(format!(
                "strip {} too large: {} bytes",
                header.index, header.length
            )));
        }
        Ok(header)
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(b)
}

// ── Tests ────────────────────────────────────────────────────────
