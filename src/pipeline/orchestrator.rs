//! Processing Pipeline
//!
//! Unpack → per-file (sniff, extract, classify, analyze) under a semaphore →
//! aggregate → narrative. Per-file failures become strings in `errors`;
//! only unpack failures and the run budget abort a run.

use super::aggregator::aggregate;
use super::types::{
    AnalysisResult, Category, DocumentFinding, ExtractionResult, RawEntry, RunPhase, RunReport,
};
use crate::ai::gateway::LanguageModelGateway;
use crate::ai::retry::{is_transient, RetryPolicy};
use crate::config::PipelineConfig;
use crate::documents::{classify, resolve_format, DocumentParser, Unpacker};
use crate::error::{ArchiveError, ErrorKind, PipelineError};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::AbortHandle;

/// Summary used when no document produced a finding
pub const NO_FINDINGS_SUMMARY: &str = "No documents could be analyzed, so no narrative summary \
was produced. See the review section for the reason each file was skipped.";

/// Summary used when the narrative call fails outright
pub const NARRATIVE_UNAVAILABLE_SUMMARY: &str = "The narrative summary could not be generated \
for this run. The per-document findings below are complete.";

/// Why one file produced no finding
#[derive(Debug)]
struct FileFailure {
    kind: ErrorKind,
    reason: String,
}

/// Per-file state, owned by one task for the life of the run
struct ProcessedFile {
    /// Full path inside the archive, so equal basenames stay distinct
    name: String,
    size: u64,
    extraction: Option<ExtractionResult>,
    advisory: Option<Category>,
    outcome: Result<DocumentFinding, FileFailure>,
}

impl ProcessedFile {
    fn new(name: String, size: u64) -> Self {
        Self {
            name,
            size,
            extraction: None,
            advisory: None,
            outcome: Err(FileFailure {
                kind: ErrorKind::Unknown,
                reason: "not processed".to_string(),
            }),
        }
    }

    fn fail(mut self, kind: ErrorKind, reason: impl Into<String>) -> Self {
        self.outcome = Err(FileFailure {
            kind,
            reason: reason.into(),
        });
        self
    }

    fn log_outcome(&self) {
        match &self.outcome {
            Ok(finding) => {
                let truncated = self.extraction.as_ref().is_some_and(|e| e.truncated);
                tracing::info!(
                    "[Pipeline] {} analyzed: {} facts, {} red flags{}",
                    self.name,
                    finding.facts.len(),
                    finding.red_flags.len(),
                    if truncated { " (text truncated)" } else { "" }
                );
                if let Some(advisory) = self.advisory {
                    if advisory != finding.category {
                        tracing::debug!(
                            "[Pipeline] {}: advisory category {} overridden by model's {}",
                            self.name,
                            advisory,
                            finding.category
                        );
                    }
                }
            }
            Err(failure) => {
                tracing::warn!(
                    "[Pipeline] {} ({} bytes) failed [{:?}]: {}",
                    self.name,
                    self.size,
                    failure.kind,
                    failure.reason
                );
            }
        }
    }
}

/// Aborts outstanding per-file tasks when the run is dropped (timeout)
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

pub struct Orchestrator {
    gateway: Arc<LanguageModelGateway>,
    config: PipelineConfig,
    parser: DocumentParser,
}

impl Orchestrator {
    pub fn new(gateway: Arc<LanguageModelGateway>, config: PipelineConfig) -> Self {
        let parser = DocumentParser::new(config.max_text_chars, config.max_table_rows);
        Self {
            gateway,
            config,
            parser,
        }
    }

    /// Run the whole pipeline over one archive buffer.
    ///
    /// Returns a complete result (possibly with per-file errors) or a single
    /// fatal error. The run budget covers everything from unpack start.
    pub async fn run(&self, archive: Vec<u8>) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let limit = self.config.run_timeout;

        match tokio::time::timeout(limit, self.execute(archive, started)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("[Pipeline] Run exceeded {}s budget", limit.as_secs());
                log_phase(RunPhase::Failed);
                Err(PipelineError::Timeout { limit })
            }
        }
    }

    async fn execute(&self, archive: Vec<u8>, started: Instant) -> Result<RunReport, PipelineError> {
        let usage_before = self.gateway.stats();
        let mut phase_timings = Vec::with_capacity(3);

        log_phase(RunPhase::Unpacking);
        let phase_started = Instant::now();
        let unpacker = Unpacker::new(self.config.max_file_size_bytes, self.config.max_files);
        let unpacked = match tokio::task::spawn_blocking(move || unpacker.unpack(&archive)).await {
            Ok(Ok(unpacked)) => unpacked,
            Ok(Err(e)) => {
                tracing::error!("[Pipeline] Unpacking failed: {}", e);
                log_phase(RunPhase::Failed);
                return Err(e.into());
            }
            Err(e) => {
                log_phase(RunPhase::Failed);
                return Err(ArchiveError::Corrupt(format!("unpacker task failed: {}", e)).into());
            }
        };

        phase_timings.push((RunPhase::Unpacking, phase_started.elapsed()));

        let files_admitted = unpacked.entries.len();
        let skipped = unpacked.skipped.clone();
        let docs: Arc<Mutex<Vec<DocumentFinding>>> = Arc::new(Mutex::new(Vec::new()));
        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(unpacked.skipped));

        log_phase(RunPhase::PerFileProcessing);
        let phase_started = Instant::now();
        tracing::info!(
            "[Pipeline] Processing {} files, at most {} at a time",
            files_admitted,
            self.config.max_concurrent_files
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_files));
        let mut tasks = FuturesUnordered::new();
        let mut guard = AbortOnDrop(Vec::with_capacity(files_admitted));

        for entry in unpacked.entries {
            let name = entry.name.clone();
            let sem = Arc::clone(&semaphore);
            let gateway = Arc::clone(&self.gateway);
            let parser = self.parser.clone();
            let retry = self.config.retry.clone();
            let docs = Arc::clone(&docs);
            let errors = Arc::clone(&errors);

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    errors.lock().await.push(format!("{}: scheduler closed", entry.name));
                    return;
                };

                let processed = process_file(entry, &gateway, parser, &retry).await;
                processed.log_outcome();

                match processed.outcome {
                    Ok(finding) => docs.lock().await.push(finding),
                    Err(failure) => errors
                        .lock()
                        .await
                        .push(format!("{}: {}", processed.name, failure.reason)),
                }
            });

            guard.0.push(handle.abort_handle());
            tasks.push(async move { (name, handle.await) });
        }

        // Panics inside a task surface here and stay per-file
        while let Some((name, joined)) = tasks.next().await {
            if let Err(e) = joined {
                tracing::error!("[Pipeline] Task for {} failed: {}", name, e);
                errors
                    .lock()
                    .await
                    .push(format!("{}: processing task failed: {}", name, e));
            }
        }
        drop(guard);
        phase_timings.push((RunPhase::PerFileProcessing, phase_started.elapsed()));

        let docs = std::mem::take(&mut *docs.lock().await);
        let mut errors = std::mem::take(&mut *errors.lock().await);

        log_phase(RunPhase::Aggregating);
        let phase_started = Instant::now();
        let aggregate = aggregate(&docs);
        let summary_text = self.narrative(&docs, &mut errors).await;
        phase_timings.push((RunPhase::Aggregating, phase_started.elapsed()));

        let usage = self.gateway.stats().since(usage_before);
        let elapsed = started.elapsed();
        log_phase(RunPhase::Done);
        tracing::info!(
            "[Pipeline] Done in {:.1}s: {}/{} files analyzed, {} errors, {} model calls ({} corrections, {} tokens)",
            elapsed.as_secs_f64(),
            docs.len(),
            files_admitted,
            errors.len(),
            usage.calls,
            usage.corrections,
            usage.tokens
        );

        let files_analyzed = docs.len();
        Ok(RunReport {
            result: AnalysisResult {
                docs,
                aggregate,
                summary_text,
                errors,
            },
            phase: RunPhase::Done,
            files_admitted,
            files_analyzed,
            skipped,
            phase_timings,
            elapsed,
            usage,
        })
    }

    /// Narrative with graceful degradation; never fails the run
    async fn narrative(&self, docs: &[DocumentFinding], errors: &mut Vec<String>) -> String {
        if docs.is_empty() {
            tracing::warn!("[Pipeline] No findings, skipping narrative");
            return NO_FINDINGS_SUMMARY.to_string();
        }

        let gateway: &LanguageModelGateway = &self.gateway;
        match self
            .config
            .retry
            .run(move |_| gateway.synthesize_narrative(docs), is_transient)
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                errors.push("narrative summary: model returned an empty summary".to_string());
                NARRATIVE_UNAVAILABLE_SUMMARY.to_string()
            }
            Err(e) => {
                tracing::warn!("[Pipeline] Narrative failed: {}", e);
                errors.push(format!("narrative summary: {}", e));
                NARRATIVE_UNAVAILABLE_SUMMARY.to_string()
            }
        }
    }
}

/// Sniff → extract → classify → analyze for one entry
async fn process_file(
    entry: RawEntry,
    gateway: &LanguageModelGateway,
    parser: DocumentParser,
    retry: &RetryPolicy,
) -> ProcessedFile {
    let mut processed = ProcessedFile::new(entry.name.clone(), entry.size);

    // Extension comes from the basename; the full path names the document
    let extension = entry.extension();
    let format = match resolve_format(extension.as_deref(), &entry.bytes) {
        Ok(format) => format,
        Err(e) => return processed.fail(e.kind(), e.to_string()),
    };

    // Extractors are CPU-bound and the PDF one can panic
    let extraction = match tokio::task::spawn_blocking(move || parser.extract(format, &entry.bytes)).await {
        Ok(Ok(extraction)) => extraction,
        Ok(Err(e)) => return processed.fail(e.kind(), e.to_string()),
        Err(e) => {
            return processed.fail(ErrorKind::Extraction, format!("extraction task failed: {}", e))
        }
    };

    if extraction.text.is_empty() {
        return processed.fail(
            ErrorKind::Extraction,
            format!("no extractable text in {} file", format.as_str()),
        );
    }

    let advisory = classify(&processed.name, &extraction.text);
    processed.advisory = Some(advisory);

    let name = processed.name.as_str();
    let text = extraction.text.as_str();
    let outcome = retry
        .run(
            move |_| gateway.analyze_document(name, advisory, text),
            is_transient,
        )
        .await
        .map_err(|e| FileFailure {
            kind: e.effective_kind(),
            reason: format!("analysis failed: {}", e),
        });

    processed.outcome = outcome;
    processed.extraction = Some(extraction);
    processed
}

fn log_phase(phase: RunPhase) {
    tracing::info!("[Pipeline] Phase: {:?}", phase);
}
