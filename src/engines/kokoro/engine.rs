use std::path::{Path, PathBuf};
use std::vec::IntoIter;

use crate::{AudioChunk, AudioStream, SynthesisEngine, SynthesisError, SynthesisParams};

use super::model::{KokoroError, KokoroModel};
use super::phonemizer::EspeakConfig;

/// Load-time options for [`KokoroEngine`].
#[derive(Debug, Clone, Default)]
pub struct KokoroModelParams {
    /// Intra- and inter-op thread count; ORT picks when unset.
    pub num_threads: Option<usize>,
    /// Where to cache the Level3-optimized ONNX graph.
    ///
    /// The first load writes the optimized graph here; later loads read it
    /// back with optimization disabled. Must be writable.
    pub optimized_model_cache_path: Option<PathBuf>,
}

/// Narration engine backed by the Kokoro ONNX graph and espeak-ng.
///
/// Synthesis is streamed: every newline-separated segment of the input is
/// synthesized on demand as the returned iterator is advanced.
///
/// ```rust,no_run
/// use audiobook_gen::{engines::kokoro::KokoroEngine, SynthesisEngine, SynthesisParams};
/// use std::path::Path;
///
/// let mut engine = KokoroEngine::new();
/// engine.load_model(Path::new("models/kokoro"))?;
/// for chunk in engine.stream("Hello.\nWorld.", &SynthesisParams::default())? {
///     let chunk = chunk?;
///     println!("{:?}: {:.2}s", chunk.text, chunk.duration_secs());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct KokoroEngine {
    model: Option<KokoroModel>,
    model_path: Option<PathBuf>,
    espeak: EspeakConfig,
}

impl Default for KokoroEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KokoroEngine {
    /// Create a new engine that uses `espeak-ng` from PATH.
    pub fn new() -> Self {
        Self::with_espeak(None, None)
    }

    /// Create a new engine with a bundled espeak-ng binary and data
    /// directory. Either path can be `None` to fall back to the system one.
    pub fn with_espeak(bin_path: Option<PathBuf>, data_path: Option<PathBuf>) -> Self {
        Self {
            model: None,
            model_path: None,
            espeak: EspeakConfig {
                bin_path,
                data_path,
            },
        }
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    /// Voice names from the loaded voice archive; empty before loading.
    pub fn list_voices(&self) -> Vec<&str> {
        self.model
            .as_ref()
            .map_or_else(Vec::new, KokoroModel::list_voices)
    }
}

impl Drop for KokoroEngine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl SynthesisEngine for KokoroEngine {
    type ModelParams = KokoroModelParams;

    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), SynthesisError> {
        let model = KokoroModel::load(
            model_path,
            params.num_threads,
            params.optimized_model_cache_path.as_deref(),
        )
        .map_err(|e| SynthesisError::EngineInit(e.to_string()))?;
        self.model = Some(model);
        self.model_path = Some(model_path.to_path_buf());
        Ok(())
    }

    fn unload_model(&mut self) {
        self.model = None;
        self.model_path = None;
    }

    fn stream<'a>(
        &'a mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<AudioStream<'a>, SynthesisError> {
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| SynthesisError::engine(KokoroError::ModelNotLoaded))?;
        if !model.has_voice(&params.voice) {
            return Err(SynthesisError::engine(KokoroError::VoiceNotFound(
                params.voice.clone(),
            )));
        }

        Ok(Box::new(KokoroStream {
            model,
            espeak: &self.espeak,
            voice: params.voice.clone(),
            speed: params.speed,
            segments: split_segments(text).into_iter(),
        }))
    }
}

/// Lazily synthesizes one segment per `next()`.
struct KokoroStream<'a> {
    model: &'a mut KokoroModel,
    espeak: &'a EspeakConfig,
    voice: String,
    speed: f32,
    segments: IntoIter<String>,
}

impl Iterator for KokoroStream<'_> {
    type Item = Result<AudioChunk, SynthesisError>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.segments.next()?;
        let result = self
            .model
            .synthesize_segment(&text, &self.voice, self.speed, self.espeak)
            .map(|samples| AudioChunk {
                samples: (!samples.is_empty()).then_some(samples),
                text,
            })
            .map_err(SynthesisError::engine);
        Some(result)
    }
}

/// Non-blank lines of `text`, trimmed.
fn split_segments(text: &str) -> Vec<String> {
    text.split('\n')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{split_segments, KokoroEngine};
    use crate::{SynthesisEngine, SynthesisParams};

    #[test]
    fn segments_follow_newline_runs() {
        assert_eq!(
            split_segments("First.\nSecond!\n\n  \nThird? \n"),
            ["First.", "Second!", "Third?"]
        );
        assert!(split_segments("\n \n").is_empty());
    }

    #[test]
    fn streaming_without_model_fails() {
        let mut engine = KokoroEngine::new();
        assert!(engine.stream("Hello.", &SynthesisParams::default()).is_err());
        assert!(engine.list_voices().is_empty());
        assert!(engine.model_path().is_none());
    }
}
