//! Report rendering and export

pub mod export;
pub mod renderer;

pub use export::{FsReportStore, InMemoryReportStore, ReportExporter, ReportStore};
pub use renderer::{render_report, MarkdownRenderer, Renderer};
