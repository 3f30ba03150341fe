//! Multi-format file normalizer

use once_cell::sync::Lazy;
use regex::Regex;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{Document, DocumentMetadata, FileType};

use super::{email, tabular};

static EXCESS_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Clean up PDF text: drop null chars, expand ligatures, normalize whitespace
fn cleanup_pdf_text(text: &str) -> String {
    let text = text
        .replace('\0', "")
        .replace('\u{00A0}', " ") // Non-breaking space -> space
        .replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl");

    let trimmed = text
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");

    EXCESS_BLANK_LINES
        .replace_all(trimmed.trim(), "\n\n")
        .into_owned()
}

/// Normalizes any supported file into plain-text documents
pub struct FileParser;

impl FileParser {
    /// Read a file from disk and extract its documents
    ///
    /// Unsupported extensions yield no documents and no error.
    pub fn extract(path: &Path) -> Result<Vec<Document>> {
        let file_type = FileType::from_path(path);
        if !file_type.is_supported() {
            tracing::debug!("Skipping unsupported file {}", path.display());
            return Ok(Vec::new());
        }

        let data = std::fs::read(path)
            .map_err(|e| Error::extraction(path, format!("cannot read file: {}", e)))?;

        Self::extract_bytes(path, file_type, &data)
    }

    /// Extract documents from in-memory file contents
    pub fn extract_bytes(path: &Path, file_type: FileType, data: &[u8]) -> Result<Vec<Document>> {
        let text = match file_type {
            FileType::Pdf => Self::parse_pdf(path, data)?,
            FileType::Docx => Self::parse_docx(path, data)?,
            FileType::Txt => Self::parse_text(path, data)?,
            FileType::Eml => email::extract_email_text(path, data)?,
            FileType::Pptx => Self::parse_pptx(path, data)?,
            FileType::Xlsx | FileType::Xls => return tabular::extract_workbook(path, data),
            FileType::Unsupported => return Ok(Vec::new()),
        };

        if text.trim().is_empty() {
            tracing::debug!("No text in {}", path.display());
            return Ok(Vec::new());
        }

        Ok(vec![Document::new(text, DocumentMetadata::file(path))])
    }

    /// Parse PDF page by page; falls back to pdf-extract when lopdf finds no text
    fn parse_pdf(path: &Path, data: &[u8]) -> Result<String> {
        let paged = guard_panic(path, || Self::extract_pdf_pages(path, data));

        let content = match paged {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::debug!("lopdf found no text in {}, trying pdf-extract", path.display());
                Self::extract_pdf_fallback(path, data)?
            }
            Err(e) => {
                tracing::debug!("lopdf failed on {}: {}, trying pdf-extract", path.display(), e);
                Self::extract_pdf_fallback(path, data)?
            }
        };

        let content = cleanup_pdf_text(&content);
        if content.is_empty() {
            return Err(Error::extraction(
                path,
                "PDF has no extractable text (image-based or encrypted)",
            ));
        }

        Ok(content)
    }

    /// Concatenate text from every page in page order
    fn extract_pdf_pages(path: &Path, data: &[u8]) -> Result<String> {
        let doc = lopdf::Document::load_mem(data)
            .map_err(|e| Error::extraction(path, format!("failed to load PDF: {}", e)))?;

        let mut pages_text = Vec::new();
        for page_number in doc.get_pages().keys() {
            match doc.extract_text(&[*page_number]) {
                Ok(text) => pages_text.push(text),
                Err(e) => {
                    tracing::debug!("Could not read page {} of {}: {}", page_number, path.display(), e);
                }
            }
        }

        Ok(pages_text.join("\n"))
    }

    fn extract_pdf_fallback(path: &Path, data: &[u8]) -> Result<String> {
        guard_panic(path, || {
            pdf_extract::extract_text_from_mem(data)
                .map_err(|e| Error::extraction(path, format!("pdf-extract failed: {}", e)))
        })
    }

    /// Parse DOCX document: paragraphs (and table cell paragraphs) in order
    fn parse_docx(path: &Path, data: &[u8]) -> Result<String> {
        let doc = docx_rs::read_docx(data).map_err(|e| Error::extraction(path, e.to_string()))?;

        let mut paragraphs = Vec::new();
        for child in &doc.document.children {
            match child {
                docx_rs::DocumentChild::Paragraph(p) => {
                    paragraphs.push(paragraph_text(p));
                }
                docx_rs::DocumentChild::Table(table) => {
                    for row in &table.rows {
                        #[allow(irrefutable_let_patterns)]
                        let docx_rs::TableChild::TableRow(row) = row else { continue };
                        for cell in &row.cells {
                            #[allow(irrefutable_let_patterns)]
                            let docx_rs::TableRowChild::TableCell(cell) = cell else { continue };
                            for content in &cell.children {
                                if let docx_rs::TableCellContent::Paragraph(p) = content {
                                    paragraphs.push(paragraph_text(p));
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(paragraphs
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Parse PowerPoint presentation (.pptx), slides in numeric order
    fn parse_pptx(path: &Path, data: &[u8]) -> Result<String> {
        use std::io::Read;

        let cursor = std::io::Cursor::new(data);
        let mut archive =
            zip::ZipArchive::new(cursor).map_err(|e| Error::extraction(path, e.to_string()))?;

        // Find all slide files (ppt/slides/slide1.xml, slide2.xml, etc.)
        let mut slides: Vec<(u32, String)> = archive
            .file_names()
            .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
            .filter_map(|name| {
                name.trim_start_matches("ppt/slides/slide")
                    .trim_end_matches(".xml")
                    .parse::<u32>()
                    .ok()
                    .map(|n| (n, name.to_string()))
            })
            .collect();
        slides.sort();

        if slides.is_empty() {
            return Err(Error::extraction(path, "archive contains no slides"));
        }

        let mut content = Vec::new();
        for (slide_number, slide_name) in slides {
            let mut xml = String::new();
            archive
                .by_name(&slide_name)
                .map_err(|e| Error::extraction(path, e.to_string()))?
                .read_to_string(&mut xml)
                .map_err(|e| Error::extraction(path, e.to_string()))?;

            let slide_text = extract_text_from_pptx_xml(&xml);
            if !slide_text.is_empty() {
                content.push(format!("Slide {}:\n{}", slide_number, slide_text));
            }
        }

        Ok(content.join("\n\n"))
    }

    /// Decode plain text as strict UTF-8
    fn parse_text(path: &Path, data: &[u8]) -> Result<String> {
        let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
        String::from_utf8(data.to_vec())
            .map_err(|e| Error::extraction(path, format!("not valid UTF-8: {}", e)))
    }
}

/// Run a third-party parser, turning a panic into an extraction error
fn guard_panic<T>(path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|_| Err(Error::extraction(path, "parser panicked on malformed input")))
}

fn paragraph_text(p: &docx_rs::Paragraph) -> String {
    let mut text = String::new();
    push_paragraph_children(&p.children, &mut text);
    text
}

/// Runs, hyperlinks and tracked insertions; deletions are skipped
fn push_paragraph_children(children: &[docx_rs::ParagraphChild], text: &mut String) {
    use docx_rs::{InsertChild, ParagraphChild};

    for child in children {
        match child {
            ParagraphChild::Run(run) => push_run_text(run, text),
            ParagraphChild::Hyperlink(link) => push_paragraph_children(&link.children, text),
            ParagraphChild::Insert(insert) => {
                for child in &insert.children {
                    if let InsertChild::Run(run) = child {
                        push_run_text(run, text);
                    }
                }
            }
            _ => {}
        }
    }
}

fn push_run_text(run: &docx_rs::Run, text: &mut String) {
    use docx_rs::RunChild;

    for child in &run.children {
        match child {
            RunChild::Text(t) => text.push_str(&t.text),
            RunChild::Tab(_) | RunChild::PTab(_) => text.push('\t'),
            RunChild::Break(_) | RunChild::CarriageReturn(_) => text.push('\n'),
            _ => {}
        }
    }
}

/// Extract text from PowerPoint slide XML: `<a:t>` runs, one line per `<a:p>`
fn extract_text_from_pptx_xml(xml: &str) -> String {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut in_text_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                in_text_element = true;
            }
            Ok(Event::Text(e)) if in_text_element => {
                if let Ok(text) = e.unescape() {
                    if !current_line.is_empty() {
                        current_line.push(' ');
                    }
                    current_line.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => {
                    if !current_line.trim().is_empty() {
                        lines.push(std::mem::take(&mut current_line));
                    }
                    current_line.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("Malformed slide XML: {}", e);
                break;
            }
            _ => {}
        }
    }

    if !current_line.trim().is_empty() {
        lines.push(current_line);
    }

    lines.join("\n")
}
