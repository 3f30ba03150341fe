//! Document and chunk types with source tracking for citations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Supported file types, keyed by normalized (lowercase) extension
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// Microsoft Word document (.docx)
    Docx,
    /// Plain text file
    Txt,
    /// RFC 822 email message
    Eml,
    /// Microsoft PowerPoint presentation (.pptx)
    Pptx,
    /// Excel spreadsheet (.xlsx)
    Xlsx,
    /// Legacy Excel spreadsheet (.xls)
    Xls,
    /// Anything else; silently skipped during ingestion
    Unsupported,
}

impl FileType {
    /// Detect file type from an extension (with or without the leading dot)
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "txt" => Self::Txt,
            "eml" => Self::Eml,
            "pptx" => Self::Pptx,
            "xlsx" => Self::Xlsx,
            "xls" => Self::Xls,
            _ => Self::Unsupported,
        }
    }

    /// Detect file type from a path's extension
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unsupported)
    }

    /// Check if this is a supported file type
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    /// Spreadsheets go through the tabular adapter instead of plain extraction
    pub fn is_tabular(&self) -> bool {
        matches!(self, Self::Xlsx | Self::Xls)
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::Docx => "Word Document (.docx)",
            Self::Txt => "Text File",
            Self::Eml => "Email Message",
            Self::Pptx => "PowerPoint (.pptx)",
            Self::Xlsx => "Excel Spreadsheet (.xlsx)",
            Self::Xls => "Excel Spreadsheet (.xls)",
            Self::Unsupported => "Unsupported",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Where a document came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path of the source file
    pub source: PathBuf,
    /// Sheet name (spreadsheet rows only)
    #[serde(default)]
    pub sheet: Option<String>,
    /// Visible 1-indexed row number (spreadsheet rows only)
    #[serde(default)]
    pub row: Option<u32>,
}

impl DocumentMetadata {
    /// Metadata for a whole-file document
    pub fn file(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            sheet: None,
            row: None,
        }
    }

    /// Metadata for one spreadsheet row
    pub fn row(source: impl Into<PathBuf>, sheet: impl Into<String>, row: u32) -> Self {
        Self {
            source: source.into(),
            sheet: Some(sheet.into()),
            row: Some(row),
        }
    }

    /// Format source for display in citations
    pub fn format_citation(&self) -> String {
        let mut parts = vec![self.source.display().to_string()];

        if let Some(sheet) = &self.sheet {
            parts.push(format!("Sheet: {}", sheet));
        }

        if let Some(row) = self.row {
            parts.push(format!("Row {}", row));
        }

        parts.join(", ")
    }
}

/// Plain text extracted from a source file; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Extracted text content
    pub text: String,
    /// Source information
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Create a new document
    pub fn new(text: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// A bounded-size segment of a document; the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Text content
    pub text: String,
    /// Metadata inherited unchanged from the parent document
    pub metadata: DocumentMetadata,
    /// Position of this chunk within its parent document's chunk sequence
    pub sequence_index: u32,
    /// Character offsets (in `char`s) within the parent document text
    pub char_start: usize,
    pub char_end: usize,
}

impl Chunk {
    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_is_case_insensitive() {
        assert_eq!(FileType::from_path(Path::new("a/Report.PDF")), FileType::Pdf);
        assert_eq!(FileType::from_path(Path::new("deck.pptx")), FileType::Pptx);
        assert_eq!(FileType::from_extension(".XLS"), FileType::Xls);
        assert_eq!(FileType::from_path(Path::new("notes")), FileType::Unsupported);
        assert_eq!(FileType::from_path(Path::new("photo.jpg")), FileType::Unsupported);
    }

    #[test]
    fn test_row_citation() {
        let meta = DocumentMetadata::row("sales.xlsx", "Q1", 7);
        assert_eq!(meta.format_citation(), "sales.xlsx, Sheet: Q1, Row 7");
        assert_eq!(DocumentMetadata::file("memo.txt").format_citation(), "memo.txt");
    }
}
