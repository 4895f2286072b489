//! # relaygl-viewer — frame session receiver
//!
//! Listens for frame sessions from relaygl interposers (plain TCP or
//! TLS), reassembles each frame from its strips and hands it to a
//! [`FrameSink`](sink::FrameSink).
//!
//! The bundled [`StatsSink`](sink::StatsSink) counts frames and logs
//! per-window frame rates; presenting pixels on a real display is the
//! job of a custom sink.

pub mod config;
pub mod service;
pub mod sink;
