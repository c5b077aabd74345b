//! One text unit through synthesis, encoding and cleanup.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::audio::WaveformWriter;
use crate::document::with_extension;
use crate::encoder::AudioEncoder;
use crate::engines::SharedEngine;
use crate::error::{SynthesisError, UnitError};
use crate::job::Stage;
use crate::text::normalize;
use crate::{SynthesisEngine, SynthesisParams};

/// Drives a single unit from text to `<basename>.opus`.
///
/// Milestones are reported as `(stage, percent, message)`: 5 before
/// synthesis, 75 before encoding, 95 before cleanup and 100 when done. An
/// encoder failure reports [`Stage::EncodeFailed`] instead of the last two and
/// leaves `<basename>.wav` on disk.
pub struct SynthesisOrchestrator<E, C> {
    engine: Arc<SharedEngine<E>>,
    encoder: C,
    params: SynthesisParams,
}

impl<E: SynthesisEngine, C: AudioEncoder> SynthesisOrchestrator<E, C> {
    pub fn new(engine: Arc<SharedEngine<E>>, encoder: C, params: SynthesisParams) -> Self {
        Self {
            engine,
            encoder,
            params,
        }
    }

    pub fn params(&self) -> &SynthesisParams {
        &self.params
    }

    pub fn synthesize<F>(
        &self,
        text: &str,
        basename: &Path,
        mut on_progress: F,
    ) -> Result<(), UnitError>
    where
        F: FnMut(Stage, f32, &str),
    {
        let wav = with_extension(basename, "wav");
        let opus = with_extension(basename, "opus");

        on_progress(Stage::SynthStart, 5.0, "Generating WAV...");
        let prepared = normalize(text);
        let seconds = self
            .engine
            .with(|engine| write_waveform(engine, &prepared, &self.params, &wav))?;
        log::info!("Synthesized {seconds:.1}s of audio into {}", wav.display());

        on_progress(Stage::EncodeStart, 75.0, "Converting to OPUS...");
        if let Err(e) = self.encoder.encode(&wav, &opus) {
            log::warn!("Encoding {} failed: {e}", wav.display());
            remove_if_present(&opus)?;
            on_progress(
                Stage::EncodeFailed,
                75.0,
                &format!("Encoding failed, kept {}", wav.display()),
            );
            return Err(e.into());
        }

        on_progress(Stage::Cleanup, 95.0, "Deleting WAV...");
        fs::remove_file(&wav)?;
        on_progress(Stage::Done, 100.0, "Generation complete");
        Ok(())
    }
}

/// Stream `text` through the engine into a fresh waveform file and return
/// its duration in seconds. Chunks without samples are skipped.
fn write_waveform<E: SynthesisEngine>(
    engine: &mut E,
    text: &str,
    params: &SynthesisParams,
    path: &Path,
) -> Result<f64, SynthesisError> {
    let mut writer = WaveformWriter::create(path)?;
    let mut silent = 0usize;
    for chunk in engine.stream(text, params)? {
        match chunk?.samples {
            Some(samples) => writer.write_samples(&samples)?,
            None => silent += 1,
        }
    }
    if silent > 0 {
        log::debug!("Skipped {silent} chunks without audio");
    }
    let seconds = writer.duration_secs();
    writer.finalize()?;
    Ok(seconds)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
