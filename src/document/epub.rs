use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use html2text::render::text_renderer::TrivialDecorator;
use percent_encoding::percent_decode_str;
use zip::result::ZipError;
use zip::ZipArchive;

use super::DocumentSource;
use crate::error::DocumentReadError;

const CONTAINER_PATH: &str = "META-INF/container.xml";
const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

/// Wrap width handed to html2text; paragraphs are re-joined before synthesis anyway.
const TEXT_WIDTH: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestItem {
    id: String,
    /// Full path of the item inside the archive.
    path: String,
}

/// EPUB package read through its OPF manifest.
///
/// Document items (XHTML content, excluding the navigation document) become
/// parts in manifest order.
#[derive(Debug, Clone)]
pub struct EpubSource {
    path: PathBuf,
    title: Option<String>,
    items: Vec<ManifestItem>,
}

impl EpubSource {
    /// Open an EPUB and read its package metadata. Content is read lazily.
    pub fn open(path: &Path) -> Result<Self, DocumentReadError> {
        let mut archive = open_archive(path)?;

        let container = read_entry(&mut archive, path, CONTAINER_PATH)?;
        let opf_path = parse_container(&container)?;
        let opf = read_entry(&mut archive, path, &opf_path)?;
        let (title, items) = parse_package(&opf, &opf_path)?;

        log::info!(
            "Opened {} ({} document items, title {:?})",
            path.display(),
            items.len(),
            title
        );

        Ok(Self {
            path: path.to_path_buf(),
            title,
            items,
        })
    }
}

impl DocumentSource for EpubSource {
    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn extract_texts(&self) -> Result<Vec<String>, DocumentReadError> {
        let mut archive = open_archive(&self.path)?;
        let mut texts = Vec::new();

        for item in &self.items {
            let html = read_entry_lossy(&mut archive, &self.path, &item.path)?;
            let text = html_to_text(&html);
            if text.is_empty() {
                log::debug!("Skipping empty item '{}'", item.id);
                continue;
            }
            texts.push(text);
        }

        Ok(texts)
    }

    fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>, DocumentReadError> {
    let file = File::open(path).map_err(|source| DocumentReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ZipArchive::new(file)?)
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    archive_path: &Path,
    name: &str,
) -> Result<String, DocumentReadError> {
    let bytes = read_entry_bytes(archive, archive_path, name)?;
    String::from_utf8(bytes)
        .map_err(|_| DocumentReadError::InvalidPackage(format!("{name} is not valid UTF-8")))
}

fn read_entry_lossy<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    archive_path: &Path,
    name: &str,
) -> Result<String, DocumentReadError> {
    let bytes = read_entry_bytes(archive, archive_path, name)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_entry_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    archive_path: &Path,
    name: &str,
) -> Result<Vec<u8>, DocumentReadError> {
    // Some packagers percent-encode hrefs but store the entry unencoded.
    let resolved = if archive.index_for_name(name).is_some() {
        name.to_string()
    } else {
        percent_decode_str(name).decode_utf8_lossy().into_owned()
    };
    let mut entry = archive.by_name(&resolved).map_err(|e| match e {
        ZipError::FileNotFound => DocumentReadError::MissingEntry(name.to_string()),
        other => DocumentReadError::Archive(other),
    })?;

    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|source| DocumentReadError::Io {
            path: archive_path.join(name),
            source,
        })?;
    Ok(bytes)
}

fn parse_xml<'a>(xml: &'a str, entry: &str) -> Result<roxmltree::Document<'a>, DocumentReadError> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    roxmltree::Document::parse_with_options(xml, options).map_err(|source| DocumentReadError::Xml {
        entry: entry.to_string(),
        source,
    })
}

/// Path of the OPF package named by `META-INF/container.xml`.
fn parse_container(xml: &str) -> Result<String, DocumentReadError> {
    let doc = parse_xml(xml, CONTAINER_PATH)?;
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "rootfile")
        .and_then(|n| n.attribute("full-path"))
        .map(str::to_string)
        .ok_or_else(|| {
            DocumentReadError::InvalidPackage("container.xml has no rootfile".to_string())
        })
}

/// Title and document items of an OPF package.
fn parse_package(
    xml: &str,
    opf_path: &str,
) -> Result<(Option<String>, Vec<ManifestItem>), DocumentReadError> {
    let doc = parse_xml(xml, opf_path)?;
    let root = doc.root_element();

    let title = root
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "metadata")
        .and_then(|metadata| {
            metadata
                .descendants()
                .find(|n| n.is_element() && n.tag_name().name() == "title")
        })
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let manifest = root
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "manifest")
        .ok_or_else(|| DocumentReadError::InvalidPackage("package has no manifest".to_string()))?;

    let base_dir = opf_path.rsplit_once('/').map_or("", |(dir, _)| dir);
    let items = manifest
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "item")
        .filter(|n| n.attribute("media-type") == Some(XHTML_MEDIA_TYPE))
        .filter(|n| {
            !n.attribute("properties")
                .is_some_and(|p| p.split_whitespace().any(|p| p == "nav"))
        })
        .filter_map(|n| {
            Some(ManifestItem {
                id: n.attribute("id")?.to_string(),
                path: resolve_href(base_dir, n.attribute("href")?),
            })
        })
        .collect();

    Ok((title, items))
}

/// Resolve an href relative to the OPF directory, folding `.` and `..`.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn html_to_text(html: &str) -> String {
    html2text::from_read_with_decorator(html.as_bytes(), TEXT_WIDTH, TrivialDecorator::new())
        .replace('\u{00A0}', " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{parse_container, parse_package, read_entry_lossy, resolve_href, EpubSource};
    use crate::document::{Document, DocumentSource};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const PACKAGE: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>The Test Book</dc:title>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="css" href="style.css" media-type="text/css"/>
    <item id="cover" href="text/cover.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="cover"/><itemref idref="ch1"/><itemref idref="ch2"/></spine>
</package>"#;

    fn xhtml(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><!DOCTYPE html><html xmlns=\"http://www.w3.org/1999/xhtml\"><body>{body}</body></html>"
        )
    }

    fn write_epub(path: &std::path::Path) {
        let file = std::fs::File::create(path).expect("create epub");
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        let entries = [
            ("mimetype", "application/epub+zip".to_string()),
            ("META-INF/container.xml", CONTAINER.to_string()),
            ("OEBPS/content.opf", PACKAGE.to_string()),
            ("OEBPS/nav.xhtml", xhtml("<nav>Contents</nav>")),
            ("OEBPS/text/cover.xhtml", xhtml("<div> </div>")),
            (
                "OEBPS/text/ch1.xhtml",
                xhtml("<h1>Chapter One</h1><p>It was a dark&#160;night.</p>"),
            ),
            ("OEBPS/text/ch2.xhtml", xhtml("<p>The end.</p>")),
        ];
        for (name, content) in entries {
            zip.start_file(name, options).expect("start entry");
            zip.write_all(content.as_bytes()).expect("write entry");
        }
        zip.finish().expect("finish epub");
    }

    #[test]
    fn finds_package_path() {
        assert_eq!(parse_container(CONTAINER).expect("container"), "OEBPS/content.opf");
    }

    #[test]
    fn reads_title_and_document_items() {
        let (title, items) = parse_package(PACKAGE, "OEBPS/content.opf").expect("package");
        assert_eq!(title.as_deref(), Some("The Test Book"));
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["cover", "ch1", "ch2"]);
        assert_eq!(items[1].path, "OEBPS/text/ch1.xhtml");
    }

    #[test]
    fn resolves_relative_hrefs() {
        assert_eq!(resolve_href("OEBPS", "text/a.xhtml"), "OEBPS/text/a.xhtml");
        assert_eq!(resolve_href("OEBPS/text", "../b.xhtml#frag"), "OEBPS/b.xhtml");
        assert_eq!(resolve_href("", "./c.xhtml"), "c.xhtml");
    }

    #[test]
    fn percent_encoded_href_finds_unencoded_entry() {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default();
            zip.start_file("OEBPS/chapter 1.xhtml", options).expect("entry");
            zip.write_all(b"spaced").expect("write");
            zip.start_file("OEBPS/100%.xhtml", options).expect("entry");
            zip.write_all(b"literal").expect("write");
            zip.finish().expect("finish");
        }
        let mut archive = zip::ZipArchive::new(buffer).expect("archive");
        let path = std::path::Path::new("book.epub");

        let read = |archive: &mut zip::ZipArchive<std::io::Cursor<Vec<u8>>>, name: &str| {
            read_entry_lossy(archive, path, name).expect("entry")
        };
        assert_eq!(read(&mut archive, "OEBPS/chapter%201.xhtml"), "spaced");
        assert_eq!(read(&mut archive, "OEBPS/chapter 1.xhtml"), "spaced");
        assert_eq!(read(&mut archive, "OEBPS/100%.xhtml"), "literal");
        assert!(read_entry_lossy(&mut archive, path, "OEBPS/missing%20.xhtml").is_err());
    }

    #[test]
    fn extracts_non_empty_parts_from_archive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("book.epub");
        write_epub(&path);

        let source = EpubSource::open(&path).expect("open epub");
        assert_eq!(source.item_ids(), ["cover", "ch1", "ch2"]);

        let doc = Document::from_source(source);
        assert_eq!(doc.title(), "The Test Book");
        let parts = doc.parts().expect("parts");
        assert_eq!(parts.len(), 2);
        assert!(parts[0].text.contains("Chapter One"));
        assert!(parts[0].text.contains("dark night."));
        assert!(!parts[0].text.contains('\u{00A0}'));
        assert_eq!(parts[1].text, "The end.");
        assert_eq!(parts[1].index, 1);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(EpubSource::open(&dir.path().join("absent.epub")).is_err());
    }
}
