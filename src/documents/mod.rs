//! Document intake: archive unpacking, content sniffing, text extraction and
//! advisory classification.

pub mod archive;
pub mod classifier;
pub mod document_parser;
pub mod sniff;

pub use archive::{UnpackedArchive, Unpacker};
pub use classifier::classify;
pub use document_parser::{normalize_text, truncate_text, DocumentParser};
pub use sniff::{resolve_format, sniff, DocumentFormat, Sniffed};
