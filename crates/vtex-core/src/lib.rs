//! # vtex Core
//!
//! Foundation types shared by the vtex virtual texture streamer:
//! - **Math**: glam re-exports, integer rectangles, toroidal wrapping, UV transforms
//! - **Time**: frame clock used to stamp page activity, stopwatch for profiling

pub mod math;
pub mod time;

pub use math::{IRect, UvTransform, wrap, wrap_ivec2};
pub use time::{FrameClock, FrameIndex, Stopwatch};
