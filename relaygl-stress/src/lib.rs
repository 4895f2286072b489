//! # relaygl-stress — frame transport stability harness
//!
//! Opens a frame session to a viewer, sends a few patterned 301×301
//! frames, closes it, and repeats. Leaks or instability in session
//! setup and teardown show up over many iterations.

pub mod args;
pub mod run;
