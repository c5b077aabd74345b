use std::path::PathBuf;
use std::sync::Arc;

/// The document container could not be read. Fatal: nothing is synthesized.
#[derive(thiserror::Error, Debug)]
pub enum DocumentReadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Malformed XML in {entry}: {source}")]
    Xml {
        entry: String,
        #[source]
        source: roxmltree::Error,
    },
    #[error("Missing archive entry '{0}'")]
    MissingEntry(String),
    #[error("Invalid package: {0}")]
    InvalidPackage(String),
}

/// No valid part range could be established.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InvalidRangeError {
    #[error("Document has no parts")]
    Empty,
    #[error("Range {start}..={end} is out of bounds for {len} parts")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error("Range start {start} must be before end {end}")]
    NotAscending { start: usize, end: usize },
    #[error("Cannot parse range from {0:?}")]
    Unparseable(String),
}

/// The synthesis engine failed to initialize or failed mid-stream.
#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),
    #[error("Engine lock poisoned: {0}")]
    Poisoned(String),
    #[error("Engine error: {0}")]
    Engine(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Waveform write failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SynthesisError {
    pub fn engine<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Engine(Box::new(err))
    }
}

/// The external encoder could not be run or exited unsuccessfully.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("Encoder '{program}' not found. Install ffmpeg or set encoder.program in the config.")]
    NotFound { program: String },
    #[error("Failed to run encoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Encoder exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Failure of a single part.
#[derive(thiserror::Error, Debug)]
pub enum UnitError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Document(#[from] DocumentReadError),
}

/// Terminal failure of a job: the offending part and its cause.
#[derive(thiserror::Error, Debug, Clone)]
#[error("Part {index} failed: {cause}")]
pub struct JobFailure {
    pub index: usize,
    #[source]
    pub cause: Arc<UnitError>,
}

impl JobFailure {
    pub fn new(index: usize, cause: UnitError) -> Self {
        Self {
            index,
            cause: Arc::new(cause),
        }
    }
}

/// A job was refused before any part was processed.
#[derive(thiserror::Error, Debug)]
pub enum JobStartError {
    #[error("A job is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Document(#[from] DocumentReadError),
    #[error(transparent)]
    Range(#[from] InvalidRangeError),
    #[error("Failed to spawn job thread: {0}")]
    Spawn(#[from] std::io::Error),
}
