//! Result storage and markdown export
//!
//! Results are keyed by an opaque UUID. Export renders once per identifier
//! and serves the cached markdown afterwards.

use super::renderer::Renderer;
use crate::error::PipelineError;
use crate::pipeline::types::AnalysisResult;
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub trait ReportStore: Send + Sync {
    /// Persist a result and return its new identifier
    fn save_result(&self, result: &AnalysisResult) -> Result<String, PipelineError>;

    fn load_result(&self, id: &str) -> Result<AnalysisResult, PipelineError>;

    /// Cached markdown for `id`, if it was rendered before
    fn load_rendered(&self, id: &str) -> Result<Option<String>, PipelineError>;

    fn save_rendered(&self, id: &str, markdown: &str) -> Result<(), PipelineError>;
}

/// Process-lifetime store
#[derive(Default)]
pub struct InMemoryReportStore {
    results: DashMap<String, AnalysisResult>,
    rendered: DashMap<String, String>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for InMemoryReportStore {
    fn save_result(&self, result: &AnalysisResult) -> Result<String, PipelineError> {
        let id = Uuid::new_v4().to_string();
        self.results.insert(id.clone(), result.clone());
        Ok(id)
    }

    fn load_result(&self, id: &str) -> Result<AnalysisResult, PipelineError> {
        self.results
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    fn load_rendered(&self, id: &str) -> Result<Option<String>, PipelineError> {
        Ok(self.rendered.get(id).map(|entry| entry.value().clone()))
    }

    fn save_rendered(&self, id: &str, markdown: &str) -> Result<(), PipelineError> {
        self.rendered.insert(id.to_string(), markdown.to_string());
        Ok(())
    }
}

/// `<root>/<id>.json` for results, `<root>/<id>.md` for rendered reports
pub struct FsReportStore {
    root: PathBuf,
}

impl FsReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            PipelineError::Store(format!("Failed to create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identifiers must be UUIDs; anything else never touches the filesystem
    fn path_for(&self, id: &str, extension: &str) -> Result<PathBuf, PipelineError> {
        let id = Uuid::parse_str(id).map_err(|_| PipelineError::NotFound(id.to_string()))?;
        Ok(self.root.join(format!("{}.{}", id, extension)))
    }

    /// Write via a temp file so readers never see a partial file
    fn write_atomic(path: &Path, contents: &str) -> Result<(), PipelineError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|e| PipelineError::Store(format!("Failed to write {}: {}", path.display(), e)))
    }
}

impl ReportStore for FsReportStore {
    fn save_result(&self, result: &AnalysisResult) -> Result<String, PipelineError> {
        let id = Uuid::new_v4().to_string();
        let json = serde_json::to_string_pretty(result)
            .map_err(|e| PipelineError::Store(format!("Failed to serialize result: {}", e)))?;
        Self::write_atomic(&self.path_for(&id, "json")?, &json)?;
        tracing::info!("[Export] Saved result {}", id);
        Ok(id)
    }

    fn load_result(&self, id: &str) -> Result<AnalysisResult, PipelineError> {
        let path = self.path_for(id, "json")?;
        if !path.exists() {
            return Err(PipelineError::NotFound(id.to_string()));
        }
        let json = fs::read_to_string(&path)
            .map_err(|e| PipelineError::Store(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&json)
            .map_err(|e| PipelineError::Store(format!("Failed to parse {}: {}", path.display(), e)))
    }

    fn load_rendered(&self, id: &str) -> Result<Option<String>, PipelineError> {
        let path = self.path_for(id, "md")?;
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| PipelineError::Store(format!("Failed to read {}: {}", path.display(), e)))
    }

    fn save_rendered(&self, id: &str, markdown: &str) -> Result<(), PipelineError> {
        Self::write_atomic(&self.path_for(id, "md")?, markdown)
    }
}

/// Renders stored results, at most once per identifier
pub struct ReportExporter {
    store: Arc<dyn ReportStore>,
    renderer: Arc<dyn Renderer>,
}

impl ReportExporter {
    pub fn new(store: Arc<dyn ReportStore>, renderer: Arc<dyn Renderer>) -> Self {
        Self { store, renderer }
    }

    pub fn export(&self, id: &str) -> Result<String, PipelineError> {
        if let Some(cached) = self.store.load_rendered(id)? {
            tracing::debug!("[Export] Serving cached report for {}", id);
            return Ok(cached);
        }

        let result = self.store.load_result(id)?;
        let markdown = self.renderer.render(&result);
        self.store.save_rendered(id, &markdown)?;
        tracing::info!("[Export] Rendered report {} ({} bytes)", id, markdown.len());

        Ok(markdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Aggregate, Category, DocumentFinding};
    use crate::report::renderer::MarkdownRenderer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts render calls; output embeds the count so re-renders are visible
    #[derive(Default)]
    struct CountingRenderer {
        calls: AtomicUsize,
    }

    impl Renderer for CountingRenderer {
        fn render(&self, result: &AnalysisResult) -> String {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            format!("render #{} of {} docs", n, result.docs.len())
        }
    }

    fn sample_result() -> AnalysisResult {
        AnalysisResult {
            docs: vec![DocumentFinding {
                doc: "msa.docx".to_string(),
                category: Category::Legal,
                facts: vec!["Three year term".to_string()],
                red_flags: vec!["Uncapped indemnity".to_string()],
            }],
            aggregate: Aggregate::empty(),
            summary_text: "summary".to_string(),
            errors: vec![],
        }
    }

    fn assert_export_is_idempotent(store: Arc<dyn ReportStore>) {
        let renderer = Arc::new(CountingRenderer::default());
        let exporter = ReportExporter::new(Arc::clone(&store), renderer.clone());
        let id = store.save_result(&sample_result()).unwrap();

        let first = exporter.export(&id).unwrap();
        let second = exporter.export(&id).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, "render #1 of 1 docs");
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_export_idempotent_in_memory() {
        assert_export_is_idempotent(Arc::new(InMemoryReportStore::new()));
    }

    #[test]
    fn test_export_idempotent_on_disk() {
        let dir = TempDir::new().unwrap();
        assert_export_is_idempotent(Arc::new(FsReportStore::new(dir.path()).unwrap()));
    }

    #[test]
    fn test_cached_render_survives_new_exporter() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ReportStore> = Arc::new(FsReportStore::new(dir.path()).unwrap());
        let id = store.save_result(&sample_result()).unwrap();

        let first_renderer = Arc::new(CountingRenderer::default());
        let first = ReportExporter::new(Arc::clone(&store), first_renderer)
            .export(&id)
            .unwrap();

        let second_renderer = Arc::new(CountingRenderer::default());
        let second = ReportExporter::new(Arc::clone(&store), second_renderer.clone())
            .export(&id)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second_renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fs_store_round_trips_result() {
        let dir = TempDir::new().unwrap();
        let store = FsReportStore::new(dir.path()).unwrap();
        let id = store.save_result(&sample_result()).unwrap();

        assert!(dir.path().join(format!("{}.json", id)).exists());
        assert_eq!(store.load_result(&id).unwrap(), sample_result());
        assert_eq!(store.load_rendered(&id).unwrap(), None);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsReportStore::new(dir.path()).unwrap();
        let exporter = ReportExporter::new(
            Arc::new(store),
            Arc::new(MarkdownRenderer::new()),
        );

        let missing = Uuid::new_v4().to_string();
        assert!(matches!(exporter.export(&missing), Err(PipelineError::NotFound(_))));
        assert!(matches!(
            exporter.export("../../etc/passwd"),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn test_in_memory_ids_are_unique() {
        let store = InMemoryReportStore::new();
        let a = store.save_result(&sample_result()).unwrap();
        let b = store.save_result(&sample_result()).unwrap();
        assert_ne!(a, b);
        assert!(matches!(store.load_result("nope"), Err(PipelineError::NotFound(_))));
    }
}
