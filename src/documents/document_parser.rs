//! Document Parser Module
//!
//! Pure Rust text extraction from in-memory file buffers.
//!
//! ## Supported Formats
//! - PDF: Text layer via pdf-extract
//! - Word: .docx via docx-rs
//! - Excel: .xlsx via calamine
//! - CSV: via csv, header row skipped
//! - Text: UTF-8 decode
//!
//! Every extractor's raw output goes through [`normalize_text`] and then
//! [`truncate_text`] before it is returned.

use super::sniff::DocumentFormat;
use crate::config::{MAX_TABLE_ROWS, MAX_TEXT_CHARS};
use crate::error::ExtractionError;
use crate::pipeline::types::{ExtractionResult, FormatMetadata};
use calamine::{Data, Range, Reader, Xlsx};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;

const ELLIPSIS: &str = "...";

static HORIZONTAL_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("valid regex"));
static LINE_EDGE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r" ?\n ?").expect("valid regex"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static PDF_PAGE_OBJECT: Lazy<regex::bytes::Regex> =
    Lazy::new(|| regex::bytes::Regex::new(r"/Type\s*/Page\b").expect("valid regex"));

/// Collapse extraction noise: NUL bytes, CRLF, horizontal whitespace runs,
/// and runs of blank lines (at most one blank line survives).
///
/// Whitespace-only lines count as blank.
pub fn normalize_text(raw: &str) -> String {
    let text = raw.replace('\0', "").replace("\r\n", "\n");
    let text = HORIZONTAL_WS.replace_all(&text, " ");
    let text = LINE_EDGE_WS.replace_all(&text, "\n");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Cap text at `max_chars` characters.
///
/// Over-long text is cut to `max_chars - 3` characters, backed up to the last
/// space if one exists in the final 20% of that prefix, and suffixed with
/// `...`. Returns the text and whether it was truncated.
pub fn truncate_text(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }

    let budget = max_chars.saturating_sub(ELLIPSIS.len());
    let prefix_end = byte_offset(text, budget);
    let prefix = &text[..prefix_end];

    let tail_start = byte_offset(prefix, budget * 4 / 5);
    let cut = match prefix[tail_start..].rfind(' ') {
        Some(pos) => &prefix[..tail_start + pos],
        None => prefix,
    };

    (format!("{}{}", cut.trim_end(), ELLIPSIS), true)
}

/// Byte offset of the `n`th char, or the string length
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Extractor dispatcher with the configured limits
#[derive(Debug, Clone)]
pub struct DocumentParser {
    max_text_chars: usize,
    max_table_rows: usize,
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self::new(MAX_TEXT_CHARS, MAX_TABLE_ROWS)
    }
}

impl DocumentParser {
    pub fn new(max_text_chars: usize, max_table_rows: usize) -> Self {
        Self {
            max_text_chars,
            max_table_rows,
        }
    }

    /// Extract normalized, bounded text from a buffer of the given format
    pub fn extract(
        &self,
        format: DocumentFormat,
        bytes: &[u8],
    ) -> Result<ExtractionResult, ExtractionError> {
        let (raw, metadata) = match format {
            DocumentFormat::Pdf => extract_pdf(bytes)?,
            DocumentFormat::Docx => extract_docx(bytes)?,
            DocumentFormat::Xlsx => extract_xlsx(bytes, self.max_table_rows)?,
            DocumentFormat::Csv => extract_csv(bytes, self.max_table_rows)?,
            DocumentFormat::PlainText => extract_plain_text(bytes),
        };

        Ok(self.finalize(&raw, metadata))
    }

    fn finalize(&self, raw: &str, metadata: FormatMetadata) -> ExtractionResult {
        let normalized = normalize_text(raw);
        let original_length = normalized.chars().count();
        let (text, truncated) = truncate_text(&normalized, self.max_text_chars);

        if truncated {
            tracing::debug!(
                "[DocumentParser] Truncated {} chars to {}",
                original_length,
                text.chars().count()
            );
        }

        ExtractionResult {
            text,
            truncated,
            original_length,
            format_metadata: Some(metadata),
        }
    }
}

/// Text layer of a PDF.
/// Wrapped in catch_unwind: pdf-extract (and its font parsers) can panic on
/// malformed files.
fn extract_pdf(bytes: &[u8]) -> Result<(String, FormatMetadata), ExtractionError> {
    let text = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    })) {
        Ok(Ok(t)) => t,
        Ok(Err(e)) => {
            tracing::warn!("[DocumentParser] PDF extraction failed: {}", e);
            return Err(ExtractionError::failed("pdf", e));
        }
        Err(_panic) => {
            tracing::error!("[DocumentParser] PDF extraction panicked - likely malformed font/glyph");
            return Err(ExtractionError::Panicked { format: "pdf" });
        }
    };

    // Page objects are invisible inside compressed object streams
    let page_objects = PDF_PAGE_OBJECT.find_iter(bytes).count() as u32;
    let estimated_pages = if page_objects > 0 {
        page_objects
    } else {
        (text.len() / 3000).max(1) as u32
    };

    Ok((text, FormatMetadata::Pdf { estimated_pages }))
}

fn extract_docx(bytes: &[u8]) -> Result<(String, FormatMetadata), ExtractionError> {
    let doc = docx_rs::read_docx(bytes).map_err(|e| ExtractionError::failed("docx", e))?;

    let mut all_text = String::new();
    let mut paragraphs = 0;

    for child in &doc.document.children {
        paragraphs += extract_docx_content(child, &mut all_text);
    }

    Ok((all_text, FormatMetadata::Docx { paragraphs }))
}

/// Append run text of a body element; returns paragraphs seen
fn extract_docx_content(element: &docx_rs::DocumentChild, output: &mut String) -> usize {
    match element {
        docx_rs::DocumentChild::Paragraph(para) => {
            push_paragraph_text(para, output);
            output.push('\n');
            1
        }
        docx_rs::DocumentChild::Table(table) => {
            let mut count = 0;
            for row in &table.rows {
                let docx_rs::TableChild::TableRow(tr) = row;
                let mut cells = Vec::new();
                for cell in &tr.cells {
                    let docx_rs::TableRowChild::TableCell(tc) = cell;
                    let mut cell_text = String::new();
                    for content in &tc.children {
                        if let docx_rs::TableCellContent::Paragraph(para) = content {
                            push_paragraph_text(para, &mut cell_text);
                            count += 1;
                        }
                    }
                    cells.push(cell_text);
                }
                output.push_str(&cells.join("\t"));
                output.push('\n');
            }
            count
        }
        _ => 0,
    }
}

fn push_paragraph_text(para: &docx_rs::Paragraph, output: &mut String) {
    for child in &para.children {
        match child {
            docx_rs::ParagraphChild::Run(run) => push_run_text(run, output),
            docx_rs::ParagraphChild::Hyperlink(link) => {
                for inner in &link.children {
                    if let docx_rs::ParagraphChild::Run(run) = inner {
                        push_run_text(run, output);
                    }
                }
            }
            _ => {}
        }
    }
}

fn push_run_text(run: &docx_rs::Run, output: &mut String) {
    for run_child in &run.children {
        match run_child {
            docx_rs::RunChild::Text(text) => output.push_str(&text.text),
            docx_rs::RunChild::Tab(_) => output.push('\t'),
            _ => {}
        }
    }
}

fn extract_xlsx(bytes: &[u8], max_rows: usize) -> Result<(String, FormatMetadata), ExtractionError> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| ExtractionError::failed("xlsx", e))?;

    let mut all_text = String::new();
    let mut rows_read = 0;
    let mut sheets_read = 0;

    for sheet_name in workbook.sheet_names() {
        if rows_read >= max_rows {
            break;
        }
        let range = match workbook.worksheet_range(&sheet_name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!("[DocumentParser] Skipping sheet {}: {}", sheet_name, e);
                continue;
            }
        };
        sheets_read += 1;
        rows_read += flatten_sheet(&sheet_name, &range, max_rows - rows_read, &mut all_text);
    }

    Ok((
        all_text,
        FormatMetadata::Spreadsheet {
            sheets_read,
            rows_read,
        },
    ))
}

/// Write `Sheet: <name>` and up to `remaining` non-empty rows as tab-joined
/// cells. Returns rows written.
fn flatten_sheet(name: &str, range: &Range<Data>, remaining: usize, output: &mut String) -> usize {
    output.push_str(&format!("Sheet: {}\n", name));

    let mut taken = 0;
    for row in range.rows() {
        if taken >= remaining {
            break;
        }
        if row.iter().all(|cell| matches!(cell, Data::Empty)) {
            continue;
        }
        let cells: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
        output.push_str(&cells.join("\t"));
        output.push('\n');
        taken += 1;
    }
    output.push('\n');
    taken
}

fn extract_csv(bytes: &[u8], max_rows: usize) -> Result<(String, FormatMetadata), ExtractionError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let columns = reader
        .headers()
        .map_err(|e| ExtractionError::failed("csv", e))?
        .len();

    let mut all_text = String::new();
    let mut rows_read = 0;

    for record in reader.records().take(max_rows) {
        let record = record.map_err(|e| ExtractionError::failed("csv", e))?;
        all_text.push_str(&record.iter().collect::<Vec<_>>().join("\t"));
        all_text.push('\n');
        rows_read += 1;
    }

    Ok((all_text, FormatMetadata::Csv { rows_read, columns }))
}

fn extract_plain_text(bytes: &[u8]) -> (String, FormatMetadata) {
    let text = String::from_utf8_lossy(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text).to_string();
    let lines = text.lines().count();
    (text, FormatMetadata::PlainText { lines })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_removes_noise() {
        let messy = "  \0Revenue\t\t grew\r\nsharply.\r\n\r\n\r\n\r\nNext   para  \n\n\n\n";
        let cleaned = normalize_text(messy);
        assert_eq!(cleaned, "Revenue grew\nsharply.\n\nNext para");
    }

    #[test]
    fn test_whitespace_only_lines_count_as_blank() {
        assert_eq!(normalize_text("alpha\n \n \n \n \nbeta"), "alpha\n\nbeta");
        assert_eq!(normalize_text("a\n \n \n b"), "a\n\nb");
        assert_eq!(normalize_text("a \t\n\t\n \r\n\tb"), "a\n\nb");
        assert_eq!(normalize_text("line one  \n  line two"), "line one\nline two");
    }

    #[test]
    fn test_normalize_properties() {
        let inputs = [
            "\0\0abc\0",
            "a\r\n\r\n\r\n\r\nb",
            "\r\0\nx",
            "  \t leading and trailing \t ",
            "one\n\n\n\n\n\ntwo\n\n\nthree",
            "p1\n \t \n\t\n  \np2",
            "x \n \n \n \n y",
        ];
        for input in inputs {
            let out = normalize_text(input);
            assert!(!out.contains('\0'));
            assert!(!out.contains("\r\n"));
            assert!(!out.contains("\n\n\n"));
            assert!(!out.contains(" \n") && !out.contains("\n "));
            assert_eq!(out, out.trim());
        }
    }

    #[test]
    fn test_truncate_short_text_unchanged() {
        let text = normalize_text("short text");
        let (out, truncated) = truncate_text(&text, 15_000);
        assert_eq!(out, text);
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_exactly_at_ceiling_unchanged() {
        let text = "x".repeat(100);
        let (out, truncated) = truncate_text(&text, 100);
        assert_eq!(out, text);
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_cuts_at_word_boundary() {
        let text = "word ".repeat(5_000);
        let text = normalize_text(&text);
        let (out, truncated) = truncate_text(&text, 15_000);
        assert!(truncated);
        assert!(out.chars().count() <= 15_000);
        assert!(out.ends_with("word..."));
        assert!(!out.contains("wo..."));
    }

    #[test]
    fn test_truncate_without_space_cuts_hard() {
        let text = "a".repeat(20_000);
        let (out, truncated) = truncate_text(&text, 15_000);
        assert!(truncated);
        assert_eq!(out.chars().count(), 15_000);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncate_ignores_space_before_tail() {
        // Only space is far before the final 20% of the budget
        let text = format!("lead {}", "b".repeat(200));
        let (out, truncated) = truncate_text(&text, 100);
        assert!(truncated);
        assert_eq!(out.chars().count(), 100);
        assert!(out.starts_with("lead b"));
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(50);
        let (out, truncated) = truncate_text(&text, 50);
        assert_eq!(out, text);
        assert!(!truncated);

        let (out, truncated) = truncate_text(&"é".repeat(60), 50);
        assert!(truncated);
        assert_eq!(out.chars().count(), 50);
    }

    #[test]
    fn test_plain_text_extraction() {
        let parser = DocumentParser::default();
        let result = parser
            .extract(DocumentFormat::PlainText, b"\xef\xbb\xbfMaster services   agreement\r\n")
            .unwrap();
        assert_eq!(result.text, "Master services agreement");
        assert!(!result.truncated);
        assert_eq!(result.original_length, 25);
        assert_eq!(result.format_metadata, Some(FormatMetadata::PlainText { lines: 1 }));
    }

    #[test]
    fn test_plain_text_truncation_flag() {
        let parser = DocumentParser::new(50, MAX_TABLE_ROWS);
        let body = "lorem ipsum ".repeat(20);
        let result = parser.extract(DocumentFormat::PlainText, body.as_bytes()).unwrap();
        assert!(result.truncated);
        assert!(result.text.chars().count() <= 50);
        assert_eq!(result.original_length, normalize_text(&body).chars().count());
    }

    #[test]
    fn test_csv_skips_header_and_caps_rows() {
        let mut csv = String::from("customer,arr,region\n");
        for i in 0..250 {
            csv.push_str(&format!("Acme {},{},EMEA\n", i, i * 1000));
        }
        let parser = DocumentParser::default();
        let result = parser.extract(DocumentFormat::Csv, csv.as_bytes()).unwrap();

        // Cell separators are tabs before normalization, single spaces after
        assert!(!result.text.contains("customer"));
        assert!(result.text.starts_with("Acme 0 0 EMEA"));
        assert!(result.text.contains("Acme 199 199000 EMEA"));
        assert!(!result.text.contains("Acme 200 "));
        assert_eq!(
            result.format_metadata,
            Some(FormatMetadata::Csv {
                rows_read: 200,
                columns: 3
            })
        );
    }

    #[test]
    fn test_flatten_sheet_writes_header_and_rows() {
        let mut range: Range<Data> = Range::new((0, 0), (2, 1));
        range.set_value((0, 0), Data::String("Metric".to_string()));
        range.set_value((0, 1), Data::String("FY24".to_string()));
        range.set_value((2, 0), Data::String("EBITDA".to_string()));
        range.set_value((2, 1), Data::Float(1.5));

        let mut out = String::new();
        let taken = flatten_sheet("P&L", &range, 10, &mut out);

        assert_eq!(taken, 2);
        assert!(out.starts_with("Sheet: P&L\n"));
        assert!(out.contains("Metric\tFY24\n"));
        assert!(out.contains("EBITDA\t1.5\n"));
    }

    #[test]
    fn test_flatten_sheet_respects_remaining_rows() {
        let mut range: Range<Data> = Range::new((0, 0), (9, 0));
        for r in 0..10 {
            range.set_value((r, 0), Data::Int(r as i64));
        }
        let mut out = String::new();
        assert_eq!(flatten_sheet("Data", &range, 3, &mut out), 3);
        assert!(out.contains("2\n"));
        assert!(!out.contains("3\n"));
    }

    #[test]
    fn test_docx_extraction() {
        use docx_rs::{Docx, Paragraph, Run};

        let mut buf = Cursor::new(Vec::new());
        Docx::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Share purchase agreement")))
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Termination on change of control")))
            .build()
            .pack(&mut buf)
            .unwrap();

        let parser = DocumentParser::default();
        let result = parser.extract(DocumentFormat::Docx, buf.get_ref()).unwrap();

        assert!(result.text.contains("Share purchase agreement"));
        assert!(result.text.contains("Termination on change of control"));
        assert_eq!(result.format_metadata, Some(FormatMetadata::Docx { paragraphs: 2 }));
    }

    /// Minimal .xlsx: one inline-string cell per row, `rows` rows per sheet
    fn workbook(sheets: &[(&str, usize)]) -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let mut sheet_list = String::new();
        let mut rels = String::new();
        for (i, (name, _)) in sheets.iter().enumerate() {
            let n = i + 1;
            sheet_list.push_str(&format!(
                r#"<sheet name="{name}" sheetId="{n}" r:id="rId{n}"/>"#
            ));
            rels.push_str(&format!(
                r#"<Relationship Id="rId{n}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{n}.xml"/>"#
            ));
        }

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        writer.start_file("xl/workbook.xml", options).unwrap();
        write!(
            writer,
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{sheet_list}</sheets></workbook>"#
        )
        .unwrap();

        writer.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
        write!(
            writer,
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
        )
        .unwrap();

        for (i, (name, rows)) in sheets.iter().enumerate() {
            let mut data = String::new();
            for r in 1..=*rows {
                data.push_str(&format!(
                    r#"<row r="{r}"><c r="A{r}" t="inlineStr"><is><t>{name} row {r}</t></is></c></row>"#
                ));
            }
            writer
                .start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)
                .unwrap();
            write!(
                writer,
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{data}</sheetData></worksheet>"#
            )
            .unwrap();
        }

        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_xlsx_row_ceiling_spans_sheets() {
        let bytes = workbook(&[("Revenue", 150), ("Costs", 120), ("Notes", 10)]);
        let parser = DocumentParser::default();
        let result = parser.extract(DocumentFormat::Xlsx, &bytes).unwrap();

        assert!(result.text.starts_with("Sheet: Revenue\nRevenue row 1\n"));
        assert!(result.text.contains("Revenue row 150"));
        assert!(result.text.contains("Sheet: Costs\nCosts row 1\n"));
        assert!(result.text.contains("Costs row 50"));
        assert!(!result.text.contains("Costs row 51"));
        // Ceiling reached: the third sheet is never opened
        assert!(!result.text.contains("Sheet: Notes"));
        assert_eq!(
            result.format_metadata,
            Some(FormatMetadata::Spreadsheet {
                sheets_read: 2,
                rows_read: 200
            })
        );
    }

    #[test]
    fn test_xlsx_small_workbook_reads_every_sheet() {
        let bytes = workbook(&[("Summary", 2), ("Detail", 3)]);
        let parser = DocumentParser::default();
        let result = parser.extract(DocumentFormat::Xlsx, &bytes).unwrap();

        let summary = result.text.find("Sheet: Summary").unwrap();
        let detail = result.text.find("Sheet: Detail").unwrap();
        assert!(summary < detail);
        assert!(result.text.contains("Detail row 3"));
        assert_eq!(
            result.format_metadata,
            Some(FormatMetadata::Spreadsheet {
                sheets_read: 2,
                rows_read: 5
            })
        );
    }

    /// Uncompressed PDF with one Helvetica text line per page and a valid xref
    fn minimal_pdf(pages: &[&str]) -> Vec<u8> {
        let page_refs: Vec<String> = (0..pages.len())
            .map(|i| format!("{} 0 R", 4 + 2 * i))
            .collect();

        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                page_refs.join(" "),
                pages.len()
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
        ];
        for (i, text) in pages.iter().enumerate() {
            let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                5 + 2 * i
            ));
            objects.push(format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                content.len(),
                content
            ));
        }

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }

        let xref_start = pdf.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in offsets {
            xref.push_str(&format!("{:010} 00000 n \n", offset));
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        ));
        pdf.extend_from_slice(xref.as_bytes());
        pdf
    }

    #[test]
    fn test_pdf_text_layer_and_page_estimate() {
        let bytes = minimal_pdf(&["Revenue grew in FY24", "Churn stayed flat"]);
        let parser = DocumentParser::default();
        let result = parser.extract(DocumentFormat::Pdf, &bytes).unwrap();

        assert!(result.text.contains("Revenue grew in FY24"), "text: {:?}", result.text);
        assert!(result.text.contains("Churn stayed flat"), "text: {:?}", result.text);
        assert!(!result.truncated);
        assert_eq!(
            result.format_metadata,
            Some(FormatMetadata::Pdf { estimated_pages: 2 })
        );
    }

    #[test]
    fn test_corrupt_inputs_are_errors() {
        let parser = DocumentParser::default();
        assert!(parser.extract(DocumentFormat::Docx, b"not a zip").is_err());
        assert!(parser.extract(DocumentFormat::Xlsx, b"not a zip").is_err());
        assert!(parser.extract(DocumentFormat::Pdf, b"%PDF-1.4 garbage").is_err());
    }
}
