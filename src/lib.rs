//! # audiobook-gen
//!
//! A Rust library that turns long-form documents into narrated audio, one
//! compressed file per document part, using the Kokoro engine.
//!
//! ## Features
//!
//! - **Document extraction**: EPUB packages are split into ordered text units
//! - **Range selection**: pick a contiguous run of parts programmatically or interactively
//! - **Narration pipeline**: normalize → synthesize → encode → clean up, per part
//! - **Background jobs**: progress events over a channel and cooperative cancellation
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! audiobook-gen = { version = "2026.2", features = ["kokoro"] }
//! ```
//!
//! ```ignore
//! use std::sync::Arc;
//! use audiobook_gen::{
//!     engines::{kokoro::KokoroEngine, SharedEngine},
//!     CancelHandle, Document, FfmpegEncoder, JobEvent, JobRunner, OutputLayout, Range, Settings,
//!     SynthesisEngine,
//! };
//!
//! let settings = Settings::default();
//! let engine = Arc::new(SharedEngine::new(|| {
//!     let mut engine = KokoroEngine::new();
//!     engine.load_model("models/kokoro".as_ref())?;
//!     Ok(engine)
//! }));
//! let encoder = FfmpegEncoder::new(settings.encoder.clone());
//! let runner = JobRunner::new(engine, encoder, settings.voice());
//!
//! let document = Document::open("book.epub".as_ref())?;
//! let range = Range::full(document.parts()?.len())?;
//! let layout = OutputLayout::create("book.epub".as_ref(), document.title())?;
//! let handle = runner.spawn(Arc::new(document), range, layout, CancelHandle::default())?;
//! for event in handle.events() {
//!     if let JobEvent::Progress(progress) = event {
//!         println!("{:5.1}% {}", progress.overall_fraction * 100.0, progress.message);
//!     }
//! }
//! println!("{:?}", handle.wait());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod config;
pub mod document;
pub mod encoder;
pub mod engines;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod range;
pub mod text;

use std::path::Path;

pub use config::{EncodeSettings, Settings, SettingsBuilder};
pub use document::{output_basename, sanitize_title, Document, OutputLayout, TextUnit};
pub use encoder::{AudioEncoder, FfmpegEncoder};
pub use error::{
    DocumentReadError, EncodeError, InvalidRangeError, JobFailure, JobStartError,
    SynthesisError, UnitError,
};
pub use job::{
    CancelHandle, JobEvent, JobHandle, JobResult, JobRunner, JobState, ProgressEvent, Stage,
};
pub use orchestrator::SynthesisOrchestrator;
pub use range::{BoundaryPrompt, ConsolePrompt, Range, RangeSelector};
pub use text::normalize;

/// Sample rate of every waveform produced by the pipeline.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Voice and speed used for one synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    /// Voice name (e.g. `"af_heart"`, `"bf_emma"`).
    pub voice: String,
    /// Speech speed multiplier.
    pub speed: f32,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            voice: "af_heart".to_string(),
            speed: 1.3,
        }
    }
}

/// One piece of audio yielded by a synthesis stream.
///
/// Engines may legitimately yield chunks without samples (for segments that
/// carry no speech); consumers skip those.
#[derive(Debug, Clone, Default)]
pub struct AudioChunk {
    /// The text segment this chunk was produced from.
    pub text: String,
    /// Mono f32 samples at [`OUTPUT_SAMPLE_RATE`], if any were produced.
    pub samples: Option<Vec<f32>>,
}

impl AudioChunk {
    /// Duration of the chunk in seconds (zero when empty).
    pub fn duration_secs(&self) -> f64 {
        self.samples
            .as_ref()
            .map_or(0.0, |s| s.len() as f64 / OUTPUT_SAMPLE_RATE as f64)
    }
}

/// Lazy, finite, non-restartable sequence of audio chunks.
pub type AudioStream<'a> = Box<dyn Iterator<Item = Result<AudioChunk, SynthesisError>> + 'a>;

/// Common interface for text-to-speech synthesis engines.
///
/// Loading a model is expensive; a loaded engine is meant to be created once
/// per process (see [`engines::SharedEngine`]) and reused for every unit.
pub trait SynthesisEngine {
    /// Parameters for configuring model loading (threads, etc.)
    type ModelParams: Default;

    /// Load a model from the specified path using default parameters.
    fn load_model(&mut self, model_path: &Path) -> Result<(), SynthesisError> {
        self.load_model_with_params(model_path, Self::ModelParams::default())
    }

    /// Load a model from the specified path with custom parameters.
    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), SynthesisError>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Stream synthesized audio for `text`.
    ///
    /// Newlines in `text` are segmentation hints: the engine synthesizes each
    /// newline-separated segment on its own and yields chunks in order.
    fn stream<'a>(
        &'a mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<AudioStream<'a>, SynthesisError>;
}
