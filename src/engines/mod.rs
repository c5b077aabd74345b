//! Speech synthesis engines.
//!
//! [`SharedEngine`] holds the one engine instance a process narrates with.
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `kokoro` - Kokoro TTS (ONNX format, espeak-ng required)

#[cfg(feature = "kokoro")]
pub mod kokoro;
mod shared;

pub use shared::SharedEngine;
