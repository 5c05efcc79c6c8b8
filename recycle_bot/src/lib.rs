//! Live waste classification from a camera feed.
//!
//! A camera handle and a classifier are brought up in parallel; once both
//! are ready, a single loop crops each frame to the model input, runs the
//! classifier and publishes the top label.
pub mod endpoints;
pub mod error;
pub mod meter;
pub mod nn;
pub mod pipeline;
pub mod sensors;
pub mod sink;
pub mod utils;

/// Height of the model input in pixels.
pub const VIDEO_HEIGHT_PIXELS: u32 = 512;

/// Width of the model input in pixels.
pub const VIDEO_WIDTH_PIXELS: u32 = 384;
