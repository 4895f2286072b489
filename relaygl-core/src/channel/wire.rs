//! Frame encoding on top of a [`Connection`].
//!
//! A frame goes out as one [`FrameHeader`] followed by
//! `ceil(height / strip_height)` strips, each a [`StripHeader`] and the
//! codec's output for those rows. The receiver reads strips until the
//! declared payload is consumed and only then hands out the frame, so a
//! frame is either delivered whole or not at all.

use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::error::{SessionError, TransportError};
use crate::frame::codec::{StripParams, codec_for};
use crate::frame::header::{CodecId, FrameHeader, MAX_STRIP_SIZE, StripHeader};
use crate::frame::strip::StripLayout;
use crate::frame::types::Frame;
use crate::transport::Connection;

/// Encode `frame` with `codec` into its complete wire form.
pub fn encode_frame(frame: &Frame, codec: CodecId) -> Result<BytesMut, SessionError> {
    frame.validate().map_err(SessionError::Protocol)?;
    let layout = frame.layout();
    let encoder = codec_for(codec);

    let mut hasher = blake3::Hasher::new();
    let mut strips = Vec::with_capacity(layout.count() as usize);
    let mut payload_size = 0u64;
    for strip in layout.iter() {
        let params = StripParams {
            width: frame.width,
            rows: strip.rows,
            pixel_size: frame.pixel_size,
            quality: frame.quality,
            subsampling: frame.subsampling,
        };
        let data = encoder.encode(&frame.pixels[strip.bytes.clone()], &params)?;
        if data.len() > MAX_STRIP_SIZE as usize {
            return Err(SessionError::Codec(format!(
                "strip {} encoded to {} bytes",
                strip.index,
                data.len()
            )));
        }
        hasher.update(&data);
        payload_size += data.len() as u64;
        strips.push(data);
    }

    let header = FrameHeader {
        quality: frame.quality,
        subsampling: frame.subsampling,
        codec,
        width: frame.width,
        height: frame.height,
        strip_height: layout.strip_height,
        pixel_size: frame.pixel_size,
        flags: frame.flags,
        window_id: frame.window_id,
        sequence: frame.sequence,
        payload_size,
        checksum: checksum(&hasher),
    };
    header.validate()?;

    let mut buf = BytesMut::with_capacity(
        FrameHeader::SIZE + strips.len() * StripHeader::SIZE + payload_size as usize,
    );
    buf.put_slice(&header.encode());
    for (index, data) in strips.iter().enumerate() {
        let strip_header = StripHeader {
            index: index as u32,
            length: data.len() as u32,
        };
        buf.put_slice(&strip_header.encode());
        buf.put_slice(data);
    }
    Ok(buf)
}

/// Encode and send one frame. Returns the bytes written.
pub async fn write_frame(
    conn: &mut Connection,
    frame: &Frame,
    codec: CodecId,
) -> Result<usize, SessionError> {
    let buf = encode_frame(frame, codec)?;
    conn.send(&buf).await?;
    debug!(
        window = frame.window_id,
        sequence = frame.sequence,
        bytes = buf.len(),
        "frame sent"
    );
    Ok(buf.len())
}

/// Receive one complete frame.
///
/// Returns `Ok(None)` when the peer closed the stream between frames.
/// End of stream inside a frame is [`SessionError::Truncated`].
pub async fn read_frame(conn: &mut Connection) -> Result<Option<Frame>, SessionError> {
    let mut raw_header = [0u8; FrameHeader::SIZE];
    if !conn.recv_or_eof(&mut raw_header).await? {
        return Ok(None);
    }
    let header = FrameHeader::decode(&raw_header)?;
    let window = header.window_id;
    let layout = StripLayout::new(
        header.width,
        header.height,
        header.strip_height,
        header.pixel_size,
    );
    let decoder = codec_for(header.codec);

    // Grows strip by strip; the header alone reserves nothing.
    let mut pixels = Vec::new();
    let mut hasher = blake3::Hasher::new();
    let mut consumed = 0u64;
    for strip in layout.iter() {
        let mut raw_strip = [0u8; StripHeader::SIZE];
        recv_in_frame(conn, &mut raw_strip, window).await?;
        let strip_header = StripHeader::decode(&raw_strip)?;
        if strip_header.index != strip.index {
            return Err(SessionError::Protocol(format!(
                "expected strip {} of window {window:#x}, got {}",
                strip.index, strip_header.index
            )));
        }
        consumed += strip_header.length as u64;
        if consumed > header.payload_size {
            return Err(SessionError::Protocol(format!(
                "strips of window {window:#x} overrun the declared {} payload bytes",
                header.payload_size
            )));
        }

        let mut data = vec![0u8; strip_header.length as usize];
        recv_in_frame(conn, &mut data, window).await?;
        hasher.update(&data);

        let params = StripParams {
            width: header.width,
            rows: strip.rows,
            pixel_size: header.pixel_size,
            quality: header.quality,
            subsampling: header.subsampling,
        };
        let decoded = decoder.decode(&data, &params)?;
        pixels.extend_from_slice(&decoded);
    }

    if consumed != header.payload_size {
        return Err(SessionError::Protocol(format!(
            "window {window:#x} declared {} payload bytes, strips held {consumed}",
            header.payload_size
        )));
    }
    if checksum(&hasher) != header.checksum {
        return Err(SessionError::Protocol(format!(
            "checksum mismatch on frame {} of window {window:#x}",
            header.sequence
        )));
    }

    Ok(Some(Frame {
        width: header.width,
        height: header.height,
        pixel_size: header.pixel_size,
        quality: header.quality,
        subsampling: header.subsampling,
        window_id: window,
        strip_height: header.strip_height,
        flags: header.flags,
        sequence: header.sequence,
        pixels,
    }))
}

async fn recv_in_frame(
    conn: &mut Connection,
    buf: &mut [u8],
    window: u64,
) -> Result<(), SessionError> {
    conn.recv(buf).await.map_err(|e: TransportError| {
        if e.is_disconnect() {
            SessionError::Truncated { window }
        } else {
            e.into()
        }
    })
}

fn checksum(hasher: &blake3::Hasher) -> u32 {
    let digest = hasher.finalize();
    let mut b = [0u8; 4];
    b.copy_from_slice(&digest.as_bytes()[..4]);
    u32::from_le_bytes(b)
}

// ── Tests ────────────────────────────────────────────────────────
