use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use ort::execution_providers::CPUExecutionProvider;
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use super::phonemizer::{phonemize, voice_lang, EspeakConfig};
use super::voices::VoiceStore;
use crate::OUTPUT_SAMPLE_RATE;

/// Maximum number of phoneme tokens per inference call (before padding).
pub const MAX_PHONEME_LEN: usize = 510;

/// Style vector dimension for Kokoro.
pub const STYLE_DIM: usize = 256;

/// 10ms at the output rate, used when joining pieces of an over-long segment.
const CHUNK_CROSSFADE_SAMPLES: usize = OUTPUT_SAMPLE_RATE as usize / 100;

/// Punctuation token ids preferred as split points: `; : , . ! ?`.
const PUNCT_IDS: &[i64] = &[1, 2, 3, 4, 5, 6];

#[derive(thiserror::Error, Debug)]
pub enum KokoroError {
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EspeakNotFound,
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[error("Voice '{0}' not found. Call list_voices() to see available voices.")]
    VoiceNotFound(String),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("Invalid config.json: {0}")]
    Config(String),
    #[error("Failed to parse voice file: {0}")]
    VoiceParse(String),
}

/// Loaded ONNX session plus the voice and vocabulary tables it needs.
pub struct KokoroModel {
    session: Session,
    voice_store: VoiceStore,
    vocab: HashMap<char, i64>,
    inputs: InputLayout,
}

/// Input naming and types differ between Kokoro exports.
#[derive(Debug)]
struct InputLayout {
    tokens: String,
    speed_is_int32: bool,
}

impl InputLayout {
    fn inspect(session: &Session) -> Self {
        let mut tokens = "input_ids".to_string();
        // Exports without a typed speed input are the older int32 ones.
        let mut speed_is_int32 = true;
        for input in session.inputs() {
            match input.name() {
                name @ ("input_ids" | "tokens") => tokens = name.to_string(),
                "speed" => {
                    speed_is_int32 = format!("{:?}", input.dtype())
                        .to_lowercase()
                        .contains("int32");
                }
                _ => {}
            }
        }
        Self { tokens, speed_is_int32 }
    }
}

impl KokoroModel {
    /// Load the model from a directory holding an `.onnx` file,
    /// `voices-v1.0.bin` and optionally `config.json`.
    pub fn load(
        model_dir: &Path,
        num_threads: Option<usize>,
        optimized_cache_path: Option<&Path>,
    ) -> Result<Self, KokoroError> {
        let onnx_path = find_onnx_file(model_dir)?;
        let session = init_session(&onnx_path, num_threads, optimized_cache_path)?;
        let inputs = InputLayout::inspect(&session);
        log::info!("Loaded Kokoro graph {} ({inputs:?})", onnx_path.display());

        let voice_store = VoiceStore::load(&require_file(model_dir, "voices-v1.0.bin")?)?;
        let vocab = match model_dir.join("config.json") {
            config if config.is_file() => super::vocab::load_vocab(&config)?,
            _ => {
                log::warn!("No config.json in {}, using built-in vocab", model_dir.display());
                super::vocab::hardcoded_vocab()
            }
        };

        Ok(Self {
            session,
            voice_store,
            vocab,
            inputs,
        })
    }

    pub fn has_voice(&self, voice: &str) -> bool {
        self.voice_store.has_voice(voice)
    }

    /// Synthesize one text segment. Returns no samples when the segment
    /// produces no phoneme tokens (pure punctuation, symbols).
    pub fn synthesize_segment(
        &mut self,
        text: &str,
        voice_name: &str,
        speed: f32,
        espeak: &EspeakConfig,
    ) -> Result<Vec<f32>, KokoroError> {
        let lang = voice_lang(voice_name);
        let ids = phonemize(text, lang, &self.vocab, espeak)?;

        if ids.is_empty() {
            log::debug!("No phoneme tokens for segment {text:?}");
            return Ok(vec![]);
        }

        // One style index for the whole segment so prosody does not shift
        // between the pieces of an over-long segment.
        let style = self.voice_store.get_style(voice_name, ids.len())?;
        let pieces = if ids.len() > MAX_PHONEME_LEN {
            log::debug!(
                "Phoneme sequence exceeded limit ({} > {}), splitting",
                ids.len(),
                MAX_PHONEME_LEN
            );
            split_chunks(&ids)
        } else {
            vec![ids]
        };

        let mut combined = Vec::new();
        for piece in &pieces {
            let audio = self.run_inference(piece, &style, speed)?;
            if audio.is_empty() {
                continue;
            }
            append_with_crossfade(&mut combined, &audio, CHUNK_CROSSFADE_SAMPLES);
        }

        Ok(combined)
    }

    fn run_inference(
        &mut self,
        tokens: &[i64],
        style: &[f32; STYLE_DIM],
        speed: f32,
    ) -> Result<Vec<f32>, KokoroError> {
        // [[0, t1..tN, 0]]
        let seq_len = tokens.len() + 2;
        let mut padded = vec![0i64; seq_len];
        padded[1..seq_len - 1].copy_from_slice(tokens);
        let tokens_arr = Array2::from_shape_vec((1, seq_len), padded)?;
        let style_view = ndarray::ArrayView2::from_shape((1, STYLE_DIM), style.as_slice())?;

        let output = if self.inputs.speed_is_int32 {
            let speed_arr = ndarray::arr1(&[speed.round() as i32]);
            let inputs = inputs![
                self.inputs.tokens.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ];
            self.session.run(inputs)?
        } else {
            let speed_arr = ndarray::arr1(&[speed]);
            let inputs = inputs![
                self.inputs.tokens.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ];
            self.session.run(inputs)?
        };

        let (_, waveform) = output
            .iter()
            .next()
            .ok_or_else(|| KokoroError::Ort(ort::Error::new("No output from model")))?;
        let waveform = waveform.try_extract_array::<f32>()?;

        Ok(waveform.iter().copied().collect())
    }

    pub fn list_voices(&self) -> Vec<&str> {
        self.voice_store.list_voices()
    }
}

fn not_found(message: String) -> KokoroError {
    KokoroError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, message))
}

fn require_file(model_dir: &Path, name: &str) -> Result<PathBuf, KokoroError> {
    let path = model_dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(not_found(format!("{} is missing from the model directory", path.display())))
    }
}

/// The quantized export when present, else the first `.onnx` by name.
fn find_onnx_file(model_dir: &Path) -> Result<PathBuf, KokoroError> {
    if let Ok(quantized) = require_file(model_dir, "kokoro-quant-convinteger.onnx") {
        return Ok(quantized);
    }
    let mut graphs: Vec<PathBuf> = std::fs::read_dir(model_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "onnx"))
        .collect();
    graphs.sort();
    graphs
        .into_iter()
        .next()
        .ok_or_else(|| not_found(format!("no .onnx graph in {}", model_dir.display())))
}

/// Build the ONNX session, caching the Level3-optimized graph on disk.
///
/// With a cache path, the first load optimizes and serialises the graph;
/// later loads read the cached graph with optimization disabled.
fn init_session(
    onnx_path: &Path,
    num_threads: Option<usize>,
    optimized_cache_path: Option<&Path>,
) -> Result<Session, KokoroError> {
    let (load_path, opt_level, write_cache_to) = match optimized_cache_path {
        Some(cache) if cache.exists() => {
            log::info!("Loading pre-optimized Kokoro graph from {}", cache.display());
            (cache, GraphOptimizationLevel::Disable, None)
        }
        Some(cache) => {
            log::info!(
                "First load: running Level3 optimization; saving graph to {}",
                cache.display()
            );
            (onnx_path, GraphOptimizationLevel::Level3, Some(cache))
        }
        None => (onnx_path, GraphOptimizationLevel::Level3, None),
    };

    let providers = vec![CPUExecutionProvider::default().build()];
    let mut builder = Session::builder()?
        .with_optimization_level(opt_level)?
        .with_execution_providers(providers)?
        .with_parallel_execution(true)?;

    if let Some(cache) = write_cache_to {
        builder = builder.with_optimized_model_path(cache)?;
    }

    if let Some(threads) = num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    Ok(builder.commit_from_file(load_path)?)
}

/// Split token ids into pieces of at most `MAX_PHONEME_LEN`, cutting after
/// the last punctuation token where possible.
fn split_chunks(ids: &[i64]) -> Vec<Vec<i64>> {
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < ids.len() {
        let end = (start + MAX_PHONEME_LEN).min(ids.len());
        if end == ids.len() {
            chunks.push(ids[start..end].to_vec());
            break;
        }

        let split = ids[start..end]
            .iter()
            .rposition(|id| PUNCT_IDS.contains(id))
            .map_or(end, |i| start + i + 1);

        chunks.push(ids[start..split].to_vec());
        start = split;
    }

    chunks
}

fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    let dst_start = dst.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap as f32 + 1.0);
        dst[dst_start + i] = dst[dst_start + i] * (1.0 - t) + src[i] * t;
    }
    dst.extend_from_slice(&src[overlap..]);
}
