//! Frames, their strip geometry, wire headers and strip codecs.
//!
//! | Module   | Purpose                                          |
//! |----------|--------------------------------------------------|
//! | `types`  | [`Frame`] and the reusable [`FramePool`]         |
//! | `strip`  | Strip geometry ([`StripLayout`])                 |
//! | `header` | Frame / strip wire headers, subsampling, flags   |
//! | `codec`  | Opaque strip encoders ([`StripCodec`])           |

pub mod codec;
pub mod header;
pub mod strip;
pub mod types;

pub use codec::{RawCodec, StripCodec, StripParams, ZstdCodec, codec_for};
pub use header::{CodecId, FrameFlags, FrameHeader, StripHeader, Subsampling};
pub use strip::{Strip, StripLayout};
pub use types::{DEFAULT_QUALITY, DEFAULT_STRIP_HEIGHT, Frame, FramePool};
