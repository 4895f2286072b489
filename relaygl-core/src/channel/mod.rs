//! The frame channel: strip-based frame sessions over a
//! [`Connection`](crate::transport::Connection).
//!
//! - [`FrameSender`]: queues frames, assigns per-window sequence numbers,
//!   writes them from a background task.
//! - [`FrameReceiver`]: reads whole frames and rejects per-window
//!   reordering.
//! - [`wire`]: the encoding both ends share.

pub mod phase;
pub mod receiver;
pub mod sender;
pub mod wire;

pub use phase::SessionPhase;
pub use receiver::FrameReceiver;
pub use sender::{DEFAULT_QUEUE_DEPTH, FrameSender, SenderOptions, SessionStats};
pub use wire::{encode_frame, read_frame, write_frame};
