//! Narrate a short passage into `output.opus` in the working directory.
//!
//! Usage: `cargo run --example narrate_text --features kokoro [-- "Some text."]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use audiobook_gen::engines::kokoro::{KokoroEngine, KokoroModelParams};
use audiobook_gen::engines::SharedEngine;
use audiobook_gen::{normalize, FfmpegEncoder, Settings, SynthesisEngine, SynthesisOrchestrator};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let text = std::env::args().nth(1).unwrap_or_else(|| {
        "Hello! This is Kokoro, narrating a chapter of your book. \
         Each sentence is synthesized on its own, so long parts stream to disk \
         instead of piling up in memory."
            .to_string()
    });
    let settings = Settings::default();

    let mut engine = KokoroEngine::new();
    let load_start = Instant::now();
    engine.load_model_with_params(&settings.model_dir, KokoroModelParams::default())?;
    println!("Model loaded in {:.2?}", load_start.elapsed());
    println!("Available voices: {:?}", engine.list_voices());

    let params = settings.voice();
    let synth_start = Instant::now();
    let mut samples = 0usize;
    for chunk in engine.stream(&normalize(&text), &params)? {
        let chunk = chunk?;
        let len = chunk.samples.as_ref().map_or(0, Vec::len);
        println!("{:>6} samples  {:?}", len, chunk.text);
        samples += len;
    }
    let audio_duration = samples as f64 / audiobook_gen::OUTPUT_SAMPLE_RATE as f64;
    println!(
        "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
        audio_duration,
        synth_start.elapsed(),
        audio_duration / synth_start.elapsed().as_secs_f64()
    );

    let orchestrator = SynthesisOrchestrator::new(
        Arc::new(SharedEngine::preloaded(engine)),
        FfmpegEncoder::new(settings.encoder.clone()),
        params,
    );
    let basename = PathBuf::from("output");
    orchestrator.synthesize(&text, &basename, |_, percent, message| {
        println!("[{percent:6.1}%] {message}");
    })?;
    println!("Saved to output.opus");

    Ok(())
}
