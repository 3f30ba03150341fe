//! Spreadsheet adapter: every non-empty row becomes its own self-describing document

use calamine::{Data, Range, Reader};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{Document, DocumentMetadata};

/// Extract one document per non-empty data row across all sheets of a workbook
pub fn extract_workbook(path: &Path, data: &[u8]) -> Result<Vec<Document>> {
    let cursor = std::io::Cursor::new(data);
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
        .map_err(|e| Error::extraction(path, e.to_string()))?;

    let mut documents = Vec::new();
    for sheet_name in workbook.sheet_names().to_vec() {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| Error::extraction(path, format!("sheet '{}': {}", sheet_name, e)))?;

        let sheet_docs = sheet_to_documents(path, &sheet_name, &range);
        tracing::debug!(
            "Sheet '{}' of {}: {} row documents",
            sheet_name,
            path.display(),
            sheet_docs.len()
        );
        documents.extend(sheet_docs);
    }

    Ok(documents)
}

/// Convert one sheet; the first row of the used range is the header
///
/// Row numbers are the visible 1-indexed spreadsheet rows, so a used range that
/// starts below row 1 is accounted for.
pub fn sheet_to_documents(path: &Path, sheet_name: &str, range: &Range<Data>) -> Vec<Document> {
    let Some((start_row, _)) = range.start() else {
        return Vec::new();
    };

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Vec::new();
    };

    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(col, cell)| {
            let name = cell_to_string(cell);
            if name.trim().is_empty() {
                format!("Unnamed: {}", col)
            } else {
                name
            }
        })
        .collect();

    let mut documents = Vec::new();
    for (offset, row) in rows.enumerate() {
        let parts: Vec<String> = row
            .iter()
            .zip(&headers)
            .filter_map(|(cell, header)| {
                let value = cell_to_string(cell);
                (!value.trim().is_empty()).then(|| format!("{}: {}", header, value))
            })
            .collect();

        if parts.is_empty() {
            continue;
        }

        // header is visible row start_row + 1, data starts one below it
        let row_number = start_row + 2 + offset as u32;
        let text = format!(
            "In sheet '{}', row {}, the data is: {}",
            sheet_name,
            row_number,
            parts.join(", ")
        );
        documents.push(Document::new(
            text,
            DocumentMetadata::row(path, sheet_name, row_number),
        ));
    }

    documents
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => format_float(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
        #[allow(unreachable_patterns)]
        _ => String::new(),
    }
}

/// Whole numbers print without a fractional part (Excel stores `1` as `1.0`)
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
