//! Content sniffing
//!
//! Magic-byte checks that confirm or veto the declared extension. Only
//! positively identified unsupported content is rejected; anything that cannot
//! be identified falls through to extension-based handling.

use crate::error::ExtractionError;

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    Csv,
    PlainText,
}

impl DocumentFormat {
    /// Map a lower-cased extension to a supported format
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            "txt" | "text" | "md" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
            Self::PlainText => "text",
        }
    }
}

/// What the leading bytes say about a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    Pdf,
    /// ZIP container (DOCX and XLSX are both OOXML zips)
    ZipContainer,
    Executable(&'static str),
    /// `#!` interpreter line. Only rejected when not declared as text.
    Script,
    Media(&'static str),
    Unknown,
}

/// Detect content type from magic bytes
pub fn sniff(data: &[u8]) -> Sniffed {
    if data.starts_with(b"%PDF-") {
        Sniffed::Pdf
    } else if data.starts_with(b"PK\x03\x04") {
        Sniffed::ZipContainer
    } else if is_pe_image(data) {
        Sniffed::Executable("windows executable")
    } else if data.starts_with(b"\x7fELF") {
        Sniffed::Executable("elf binary")
    } else if data.starts_with(&[0xCF, 0xFA, 0xED, 0xFE])
        || data.starts_with(&[0xCE, 0xFA, 0xED, 0xFE])
        || data.starts_with(&[0xFE, 0xED, 0xFA, 0xCE])
        || data.starts_with(&[0xFE, 0xED, 0xFA, 0xCF])
    {
        Sniffed::Executable("mach-o binary")
    } else if data.starts_with(&[0xCA, 0xFE, 0xBA, 0xBE]) {
        Sniffed::Executable("java class / universal binary")
    } else if data.starts_with(b"#!") {
        Sniffed::Script
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Sniffed::Media("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Sniffed::Media("image/jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Sniffed::Media("image/gif")
    } else if data.starts_with(b"RIFF") && data.get(8..12) == Some(&b"WEBP"[..]) {
        Sniffed::Media("image/webp")
    } else if data.len() > 8 && &data[4..8] == b"ftyp" {
        Sniffed::Media("video/mp4")
    } else {
        Sniffed::Unknown
    }
}

/// `MZ` stub whose `e_lfanew` field (0x3C) points at a `PE\0\0` header.
/// Text that merely starts with "MZ" does not qualify.
fn is_pe_image(data: &[u8]) -> bool {
    if !data.starts_with(b"MZ") {
        return false;
    }
    let Some(field) = data.get(0x3C..0x40) else {
        return false;
    };
    let offset = u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as usize;
    data.get(offset..offset.saturating_add(4)) == Some(&b"PE\0\0"[..])
}

/// Decide which extractor handles a file.
///
/// Rejections are [`ExtractionError::Unsupported`] with a human-readable
/// reason for the per-file error list.
pub fn resolve_format(
    extension: Option<&str>,
    data: &[u8],
) -> Result<DocumentFormat, ExtractionError> {
    let declared = extension.and_then(DocumentFormat::from_extension);

    match sniff(data) {
        Sniffed::Executable(kind) => Err(ExtractionError::Unsupported(format!(
            "unsupported content type ({})",
            kind
        ))),
        Sniffed::Media(mime) => Err(ExtractionError::Unsupported(format!(
            "unsupported content type ({})",
            mime
        ))),
        Sniffed::Script => match declared {
            Some(format @ (DocumentFormat::PlainText | DocumentFormat::Csv)) => Ok(format),
            _ => Err(ExtractionError::Unsupported(
                "unsupported content type (script)".to_string(),
            )),
        },
        // Content wins: PDF bytes never reach the text or office extractors
        Sniffed::Pdf => {
            if let Some(other) = declared.filter(|f| *f != DocumentFormat::Pdf) {
                tracing::debug!(
                    "[DocumentParser] Declared {} but content is pdf, extracting as pdf",
                    other.as_str()
                );
            }
            Ok(DocumentFormat::Pdf)
        }
        Sniffed::ZipContainer => match declared {
            Some(format @ (DocumentFormat::Docx | DocumentFormat::Xlsx)) => Ok(format),
            Some(other) => Err(ExtractionError::Unsupported(format!(
                "content is a zip container but extension says {}",
                other.as_str()
            ))),
            None => Err(ExtractionError::Unsupported(
                "zip container without a .docx or .xlsx extension".to_string(),
            )),
        },
        Sniffed::Unknown => declared.ok_or_else(|| {
            let mime = extension
                .and_then(|e| mime_guess::from_ext(e).first())
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ExtractionError::Unsupported(format!(
                "unsupported file type .{} ({})",
                extension.unwrap_or("?"),
                mime
            ))
        }),
    }
}
