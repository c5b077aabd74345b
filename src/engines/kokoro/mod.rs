//! Kokoro-82M text-to-speech engine implementation.
//!
//! Narration runs on the Kokoro-82M ONNX model with espeak-ng for
//! phonemization. Nine languages are supported through the voice prefix.
//!
//! # System Requirements
//!
//! **espeak-ng** must be installed on your system:
//! - **Linux**: `sudo apt-get install espeak-ng`
//! - **macOS**: `brew install espeak-ng`
//! - **Windows**: Download installer from <https://espeak-ng.org/download>
//!
//! # Model Directory Layout
//!
//! ```text
//! models/kokoro/
//! ├── kokoro-quant-convinteger.onnx   # 8-bit quantized model (88MB, CPU-optimized)
//! ├── voices-v1.0.bin                  # Voice data archive (.npz format)
//! └── config.json                      # Optional vocabulary override
//! ```
//!
//! Download links:
//! - Model: <https://github.com/taylorchu/kokoro-onnx/releases/tag/v0.2.0>
//! - Voices: <https://github.com/thewh1teagle/kokoro-onnx/releases/tag/model-files-v1.0>
//!
//! # Voices
//!
//! Voice names follow `{prefix}_{name}` (`af_heart`, `bf_emma`). The prefix
//! selects the espeak-ng language:
//!
//! | Prefix | espeak-ng |
//! |---|---|
//! | `af_`, `am_` | `en-us` |
//! | `bf_`, `bm_` | `en-gb` |
//! | `ef_`, `em_` | `es` |
//! | `ff_` | `fr` |
//! | `hf_`, `hm_` | `hi` |
//! | `if_`, `im_` | `it` |
//! | `jf_`, `jm_` | `ja` |
//! | `pf_`, `pm_` | `pt-br` |
//! | `zf_`, `zm_` | `cmn` |
//!
//! # Streaming
//!
//! [`KokoroEngine::stream`](crate::SynthesisEngine::stream) splits its input
//! on newlines and synthesizes one segment per iterator step, so a long part
//! never has to be held in memory as a single waveform.
//!
//! ```rust,no_run
//! use audiobook_gen::{engines::kokoro::KokoroEngine, SynthesisEngine, SynthesisParams};
//! use std::path::PathBuf;
//!
//! let mut engine = KokoroEngine::new();
//! engine.load_model(&PathBuf::from("models/kokoro"))?;
//!
//! let params = SynthesisParams {
//!     voice: "bf_emma".to_string(),
//!     speed: 0.9,
//! };
//! let samples: usize = engine
//!     .stream("Hello from British Emma!", &params)?
//!     .filter_map(|chunk| chunk.ok()?.samples)
//!     .map(|s| s.len())
//!     .sum();
//! println!("Generated {samples} samples");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod engine;
pub mod model;
pub mod phonemizer;
pub mod vocab;
pub mod voices;

pub use engine::{KokoroEngine, KokoroModelParams};
pub use model::KokoroError;
pub use phonemizer::EspeakConfig;
