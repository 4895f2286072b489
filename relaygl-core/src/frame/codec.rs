//! Strip codecs.
//!
//! The frame channel never looks inside pixel data; it hands each strip
//! to a [`StripCodec`] together with the frame's quality and subsampling
//! and ships whatever comes back. Two codecs ship with relaygl:
//!
//! - [`RawCodec`]: identity, strip lengths are implied by geometry.
//! - [`ZstdCodec`]: lossless zstd; quality picks the compression level.

use crate::error::SessionError;
use crate::frame::header::{CodecId, Subsampling};

/// Everything a codec may need to know about one strip.
#[derive(Debug, Clone, Copy)]
pub struct StripParams {
    pub width: u32,
    pub rows: u32,
    pub pixel_size: u8,
    pub quality: u8,
    pub subsampling: Subsampling,
}

impl StripParams {
    pub fn raw_len(&self) -> usize {
        self.width as usize * self.rows as usize * self.pixel_size as usize
    }
}

pub trait StripCodec: Send + Sync {
    fn id(&self) -> CodecId;

    fn encode(&self, strip: &[u8], params: &StripParams) -> Result<Vec<u8>, SessionError>;

    /// Decode into exactly `params.raw_len()` bytes.
    fn decode(&self, data: &[u8], params: &StripParams) -> Result<Vec<u8>, SessionError>;
}

/// The codec registered for `id`.
pub fn codec_for(id: CodecId) -> &'static dyn StripCodec {
    static RAW: RawCodec = RawCodec;
    static ZSTD: ZstdCodec = ZstdCodec;
    match id {
        CodecId::Raw => &RAW,
        CodecId::Zstd => &ZSTD,
    }
}

// ── RawCodec ─────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl StripCodec for RawCodec {
    fn id(&self) -> CodecId {
        CodecId::Raw
    }

    fn encode(&self, strip: &[u8], _params: &StripParams) -> Result<Vec<u8>, SessionError> {
        Ok(strip.to_vec())
    }

    fn decode(&self, data: &[u8], params: &StripParams) -> Result<Vec<u8>, SessionError> {
        if data.len() != params.raw_len() {
            return Err(SessionError::Codec(format!(
                "raw strip is {} bytes, expected {}",
                data.len(),
                params.raw_len()
            )));
        }
        Ok(data.to_vec())
    }
}

// ── ZstdCodec ────────────────────────────────────────────────────

/// Lossless zstd strips.
///
/// Quality trades CPU for bandwidth: 90 and above favours speed
/// (level 1), lower values spend more effort compressing, up to level 10
/// at quality 0. Subsampling does not apply to a lossless codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZstdCodec;

impl ZstdCodec {
    pub fn level_for(quality: u8) -> i32 {
        if quality >= 90 {
            1
        } else {
            1 + (90 - quality as i32) / 10
        }
    }
}

impl StripCodec for ZstdCodec {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }

    fn encode(&self, strip: &[u8], params: &StripParams) -> Result<Vec<u8>, SessionError> {
        zstd::encode_all(strip, Self::level_for(params.quality))
            .map_err(|e| SessionError::Codec(format!("zstd encode failed: {e}")))
    }

    fn decode(&self, data: &[u8], params: &StripParams) -> Result<Vec<u8>, SessionError> {
        let expected = params.raw_len();
        let out = zstd::bulk::decompress(data, expected)
            .map_err(|e| SessionError::Codec(format!("zstd decode failed: {e}")))?;
        if out.len() != expected {
            return Err(SessionError::Codec(format!(
                "zstd strip decoded to {} bytes, expected {expected}",
                out.len()
            )));
        }
        Ok(out)
    }
}

// ── Tests ────────────────────────────────────────────────────────
