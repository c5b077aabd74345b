//! Documents as ordered text units.
//!
//! A [`Document`] wraps a [`DocumentSource`] and extracts its parts once, on
//! first use; the extracted parts never change afterwards. [`OutputLayout`]
//! derives where each part's files go.

pub mod epub;

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use walkdir::WalkDir;

use crate::error::DocumentReadError;
use crate::range::Range;

pub use epub::EpubSource;

/// Title used when a source has none, or when sanitizing leaves nothing.
pub const FALLBACK_TITLE: &str = "Unknown_Title";

/// One ordered, atomic chunk of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    /// 0-based position in the document's parts.
    pub index: usize,
    pub text: String,
}

/// Supplies the raw text and metadata of a document container.
pub trait DocumentSource: Send + Sync {
    /// Title from the container metadata, if any.
    fn title(&self) -> Option<String>;

    /// Extract the non-empty text parts in reading order.
    fn extract_texts(&self) -> Result<Vec<String>, DocumentReadError>;

    /// Identifiers of the container's document items, for inspection.
    fn item_ids(&self) -> Vec<String>;
}

/// Source backed by texts already in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    title: Option<String>,
    texts: Vec<String>,
}

impl InMemorySource {
    pub fn new(title: Option<String>, texts: Vec<String>) -> Self {
        Self { title, texts }
    }
}

impl DocumentSource for InMemorySource {
    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn extract_texts(&self) -> Result<Vec<String>, DocumentReadError> {
        Ok(self.texts.clone())
    }

    fn item_ids(&self) -> Vec<String> {
        (0..self.texts.len()).map(|i| format!("part{i}")).collect()
    }
}

pub struct Document {
    title: String,
    source: Box<dyn DocumentSource>,
    parts: OnceCell<Vec<TextUnit>>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("title", &self.title)
            .field("parts", &self.parts.get().map(Vec::len))
            .finish()
    }
}

impl Document {
    /// Open an EPUB file.
    pub fn open(path: &Path) -> Result<Self, DocumentReadError> {
        Ok(Self::from_source(EpubSource::open(path)?))
    }

    pub fn from_source(source: impl DocumentSource + 'static) -> Self {
        let title = source
            .title()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());
        Self {
            title,
            source: Box::new(source),
            parts: OnceCell::new(),
        }
    }

    /// Build a document from in-memory texts, one part per entry.
    pub fn from_texts<S: Into<String>>(title: &str, texts: impl IntoIterator<Item = S>) -> Self {
        let texts = texts.into_iter().map(Into::into).collect();
        Self::from_source(InMemorySource::new(Some(title.to_string()), texts))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Replace the title (it only influences output naming).
    pub fn set_title(&mut self, title: &str) {
        let title = title.trim();
        self.title = if title.is_empty() {
            FALLBACK_TITLE.to_string()
        } else {
            title.to_string()
        };
    }

    /// The document's parts, extracted on the first call and cached.
    pub fn parts(&self) -> Result<&[TextUnit], DocumentReadError> {
        let parts = self.parts.get_or_try_init(|| {
            let texts = self.source.extract_texts()?;
            log::info!("Extracted {} parts from '{}'", texts.len(), self.title);
            Ok::<_, DocumentReadError>(
                texts
                    .into_iter()
                    .enumerate()
                    .map(|(index, text)| TextUnit { index, text })
                    .collect(),
            )
        })?;
        Ok(parts)
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.source.item_ids()
    }
}

/// Make `parts` safe to use in a file name.
///
/// Every character that is not alphanumeric, `-` or `_` becomes `_`;
/// underscores left dangling at either end of a part are trimmed, and the
/// parts are joined with `_`.
pub fn sanitize_title(parts: &[&str]) -> String {
    let cleaned: Vec<String> = parts
        .iter()
        .map(|part| {
            part.trim()
                .chars()
                .map(|c| {
                    if c.is_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
                .trim_matches('_')
                .to_string()
        })
        .filter(|part| !part.is_empty())
        .collect();

    if cleaned.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        cleaned.join("_")
    }
}

/// File-name stem shared by every file produced for part `index`.
pub fn output_basename(title: &str, index: usize) -> String {
    format!("{}_part_{index:03}", sanitize_title(&[title]))
}

/// Where a document's per-part files are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    dir: PathBuf,
    title: String,
}

impl OutputLayout {
    /// Layout rooted at an explicit directory.
    pub fn new(dir: impl Into<PathBuf>, title: &str) -> Self {
        Self {
            dir: dir.into(),
            title: title.to_string(),
        }
    }

    /// Layout in a sibling directory of `source_path` named after the title.
    pub fn beside(source_path: &Path, title: &str) -> Self {
        let parent = source_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::new(parent.join(sanitize_title(&[title])), title)
    }

    /// Like [`OutputLayout::beside`], creating the directory if needed.
    pub fn create(source_path: &Path, title: &str) -> std::io::Result<Self> {
        let layout = Self::beside(source_path, title);
        std::fs::create_dir_all(&layout.dir)?;
        log::debug!("Output directory: {}", layout.dir.display());
        Ok(layout)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path stem for part `index`; add `.txt`, `.wav` or `.opus`.
    pub fn basename(&self, index: usize) -> PathBuf {
        self.dir.join(output_basename(&self.title, index))
    }

    /// Write each part of `range` to `<basename>.txt`.
    ///
    /// Fails with [`std::io::ErrorKind::InvalidInput`] before writing
    /// anything when `range` does not fit `parts`.
    pub fn dump(&self, parts: &[TextUnit], range: Range) -> std::io::Result<Vec<PathBuf>> {
        Range::new(range.start(), range.end(), parts.len())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let mut written = Vec::with_capacity(range.len());
        for unit in &parts[range.start()..=range.end()] {
            let path = with_extension(&self.basename(unit.index), "txt");
            std::fs::write(&path, &unit.text)?;
            written.push(path);
        }
        log::info!("Wrote {} text files to {}", written.len(), self.dir.display());
        Ok(written)
    }
}

/// Append `.ext` to a basename without touching dots already in it.
pub fn with_extension(basename: &Path, ext: &str) -> PathBuf {
    let mut os = basename.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// `*.txt` files directly inside `dir`, sorted by name.
pub fn text_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let is_text = entry.path().extension().is_some_and(|ext| ext == "txt");
        if entry.file_type().is_file() && is_text {
            files.push(entry.into_path());
        }
    }
    log::info!("Found {} text files in {}", files.len(), dir.display());
    Ok(files)
}

/// Output stem for a plain text file: `notes.txt` narrates to `notes.opus`.
pub fn text_basename(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == "txt" => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}
