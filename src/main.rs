use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

use audiobook_gen::engines::kokoro::{KokoroEngine, KokoroModelParams};
use audiobook_gen::engines::SharedEngine;
use audiobook_gen::{
    CancelHandle, ConsolePrompt, Document, FfmpegEncoder, JobEvent, JobResult, JobRunner,
    OutputLayout, Range, RangeSelector, Settings, Stage, SynthesisEngine, SynthesisOrchestrator,
    TextUnit,
};
use audiobook_gen::document::{text_basename, text_files};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Extract the selected parts of an EPUB as text files
    Dump,
    /// Narrate every .txt file in a directory
    Dir,
    /// Narrate a single .txt file
    Txt,
    /// List the document items of an EPUB
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LevelFilter {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => LevelFilter::Error,
            CliLogLevel::Warn => LevelFilter::Warn,
            CliLogLevel::Info => LevelFilter::Info,
            CliLogLevel::Debug => LevelFilter::Debug,
            CliLogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Convert ebooks to narrated Opus audiobooks, one file per part.
#[derive(Parser, Debug)]
#[command(name = "audiobook-gen", version, about)]
#[command(long_about = "Convert ebooks to narrated Opus audiobooks, one file per part.

Without --mode the full pipeline runs: extract the EPUB, pick the part range,
then synthesize and encode every part into a directory next to the book.

EXAMPLES:
    audiobook-gen book.epub                        # Full pipeline, interactive range
    audiobook-gen --range 3 42 book.epub           # Full pipeline, parts 3 to 42
    audiobook-gen -m dump book.epub                # Extract text only
    audiobook-gen -m dir \"Book_Title\"              # Narrate extracted text files
    audiobook-gen -v af_sarah -s 1.5 book.epub     # Different voice and speed

Press Ctrl-C once to stop after the current part, twice to quit immediately.")]
struct Cli {
    /// Input files or directories
    #[arg(value_name = "FILES", required = true)]
    files: Vec<PathBuf>,

    /// Processing mode; the full narration pipeline when omitted
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Voice to narrate with (default: af_heart)
    #[arg(short, long)]
    voice: Option<String>,

    /// Speech speed multiplier (default: 1.3)
    #[arg(short, long)]
    speed: Option<f32>,

    /// Part range to narrate or dump, skipping the interactive search
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    range: Option<Vec<usize>>,

    /// Directory holding the Kokoro model and voices
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Title used to name the output directory and files
    #[arg(long)]
    title: Option<String>,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.log_level);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: Option<CliLogLevel>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.filter_level(level.into());
    }
    builder.init();
}

fn run(cli: &Cli) -> Result<bool> {
    if let Some(missing) = cli.files.iter().find(|f| !f.exists()) {
        log::error!("File or dir not found: {}", missing.display());
        return Ok(false);
    }

    let settings = load_settings(cli)?;

    match cli.mode {
        Some(Mode::List) => {
            for file in &cli.files {
                println!("\nListing items in: {}", file.display());
                list_items(file)?;
            }
            Ok(true)
        }
        Some(Mode::Dump) => {
            for file in &cli.files {
                println!("\nProcessing: {}", file.display());
                dump(file, cli)?;
            }
            Ok(true)
        }
        Some(mode @ (Mode::Dir | Mode::Txt)) => {
            let interrupt = install_interrupt_handler()?;
            let engine = Arc::new(shared_engine(&settings));
            let orchestrator = SynthesisOrchestrator::new(
                engine,
                FfmpegEncoder::new(settings.encoder.clone()),
                settings.voice(),
            );
            for file in &cli.files {
                println!("\nProcessing: {}", file.display());
                let files = match mode {
                    Mode::Dir => text_files(file)
                        .with_context(|| format!("Failed to read directory: {}", file.display()))?,
                    _ => vec![file.clone()],
                };
                for path in files {
                    if interrupt.is_cancelled() {
                        log::warn!("Cancelled before {}", path.display());
                        return Ok(false);
                    }
                    narrate_text_file(&orchestrator, &path)?;
                }
            }
            Ok(true)
        }
        None => {
            let interrupt = install_interrupt_handler()?;
            let engine = Arc::new(shared_engine(&settings));
            let runner = JobRunner::new(
                engine,
                FfmpegEncoder::new(settings.encoder.clone()),
                settings.voice(),
            );
            for file in &cli.files {
                println!("\nProcessing: {}", file.display());
                if !narrate_document(&runner, file, cli, &interrupt)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

/// Settings file (if any) overridden by command-line flags.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(voice) = &cli.voice {
        settings.voice = voice.clone();
    }
    if let Some(speed) = cli.speed {
        settings.speed = speed;
    }
    if let Some(model_dir) = &cli.model_dir {
        settings.model_dir = model_dir.clone();
    }
    settings
        .validate()
        .context("Configuration validation failed")?;
    Ok(settings)
}

fn shared_engine(settings: &Settings) -> SharedEngine<KokoroEngine> {
    let settings = settings.clone();
    SharedEngine::new(move || {
        let mut engine =
            KokoroEngine::with_espeak(settings.espeak_bin.clone(), settings.espeak_data.clone());
        engine.load_model_with_params(
            &settings.model_dir,
            KokoroModelParams {
                num_threads: settings.num_threads,
                ..Default::default()
            },
        )?;
        log::info!("Voices available: {}", engine.list_voices().join(", "));
        Ok(engine)
    })
}

/// First Ctrl-C asks the job to stop after the current part; the second one
/// exits at once.
fn install_interrupt_handler() -> Result<CancelHandle> {
    let interrupt = CancelHandle::default();
    let handler = interrupt.clone();
    ctrlc::set_handler(move || {
        if handler.is_cancelled() {
            eprintln!("\nInterrupted again, exiting now; partial files may remain");
            std::process::exit(130);
        }
        eprintln!("\nStopping after the current part (Ctrl-C again to quit now)");
        handler.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(interrupt)
}

fn open_document(path: &Path, title: Option<&str>) -> Result<Document> {
    let mut document = Document::open(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    if let Some(title) = title {
        document.set_title(title);
    }
    Ok(document)
}

fn list_items(path: &Path) -> Result<()> {
    let document = open_document(path, None)?;
    for id in document.item_ids() {
        println!("{id}");
    }
    Ok(())
}

/// Use `--range` when given, otherwise ask; an unusable answer starts the
/// interactive boundary search.
fn select_range(parts: &[TextUnit], cli_range: Option<&[usize]>) -> Result<Range> {
    let mut prompt = ConsolePrompt::stdio();
    let hint = match cli_range {
        Some([start, end]) => Some((*start, *end)),
        _ => prompt.ask_range_hint(),
    };
    let range = RangeSelector::new(prompt).select(parts, hint)?;
    println!("\nBook content: {range}");
    Ok(range)
}

fn dump(path: &Path, cli: &Cli) -> Result<()> {
    let document = open_document(path, cli.title.as_deref())?;
    let parts = document.parts()?;
    let range = select_range(parts, cli.range.as_deref())?;
    let layout = OutputLayout::create(path, document.title())
        .context("Failed to create output directory")?;
    let written = layout
        .dump(parts, range)
        .context("Failed to write text parts")?;
    println!("Wrote {} files to {}", written.len(), layout.dir().display());
    Ok(())
}

fn narrate_document(
    runner: &JobRunner<KokoroEngine, FfmpegEncoder>,
    path: &Path,
    cli: &Cli,
    interrupt: &CancelHandle,
) -> Result<bool> {
    let document = open_document(path, cli.title.as_deref())?;
    let range = select_range(document.parts()?, cli.range.as_deref())?;
    let layout = OutputLayout::create(path, document.title())
        .context("Failed to create output directory")?;

    let handle = runner.spawn(Arc::new(document), range, layout, interrupt.clone())?;
    let bar = job_bar();
    for event in handle.events() {
        match event {
            JobEvent::Progress(progress) => {
                bar.set_position((progress.overall_fraction * 1000.0).round() as u64);
                if progress.stage == Stage::EncodeFailed {
                    bar.println(&progress.message);
                }
                bar.set_message(progress.message);
            }
            JobEvent::Finished(_) => break,
        }
    }
    bar.finish_and_clear();

    match handle.wait() {
        JobResult::Success => {
            println!("Narrated parts {range} of {}", path.display());
            Ok(true)
        }
        JobResult::Cancelled => {
            log::warn!("Job cancelled; finished parts were kept");
            Ok(false)
        }
        JobResult::Failed(failure) => {
            log::error!("{failure}");
            Ok(false)
        }
    }
}

/// Narrate `path` into `<stem>.opus` next to it.
fn narrate_text_file(
    orchestrator: &SynthesisOrchestrator<KokoroEngine, FfmpegEncoder>,
    path: &Path,
) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text file: {}", path.display()))?;
    let basename = text_basename(path);

    let bar = unit_bar(path);
    orchestrator
        .synthesize(&text, &basename, |stage, percent, message| {
            bar.set_position(percent.round() as u64);
            if stage == Stage::EncodeFailed {
                bar.println(message);
            }
            bar.set_message(message.to_string());
        })
        .with_context(|| format!("Failed to narrate {}", path.display()))?;
    bar.finish_and_clear();
    Ok(())
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .or_else(|_| ProgressStyle::default_bar().template("[{bar:40}] {percent}% {msg}"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░")
}

fn job_bar() -> ProgressBar {
    let bar = ProgressBar::new(1000);
    bar.set_style(bar_style(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}",
    ));
    bar
}

fn unit_bar(path: &Path) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(bar_style(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {prefix} {msg}",
    ));
    bar.set_prefix(
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    bar
}
