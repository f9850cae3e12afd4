//! Prompt templates for the diligence gateway
//!
//! Templates are versioned text assets under `prompts/`, compiled in and
//! optionally overridden from a directory at startup. Placeholders use
//! `{{name}}` and every one must be bound when rendering.

use crate::error::PipelineError;
use crate::pipeline::types::{Category, DocumentFinding};
use std::path::Path;

/// System prompt for per-document analysis
pub const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are a meticulous due-diligence analyst. Respond only with valid JSON.";

/// System prompt for the narrative summary
pub const NARRATIVE_SYSTEM_PROMPT: &str =
    "You are a senior due-diligence analyst writing for an investment committee.";

/// Follow-up sent once when an analysis reply fails parsing or validation
pub const JSON_CORRECTION_PROMPT: &str =
    "Your last output was invalid JSON. Return only valid JSON matching the schema, no prose.";

/// Bumped whenever a compiled-in template changes meaning
pub const BUILTIN_PROMPT_VERSION: &str = "2024-06.1";

const ANALYSIS_FILE: &str = "document_analysis.txt";
const NARRATIVE_FILE: &str = "narrative_summary.txt";

const BUILTIN_ANALYSIS: &str = include_str!("../../prompts/document_analysis.txt");
const BUILTIN_NARRATIVE: &str = include_str!("../../prompts/narrative_summary.txt");

/// Follow-up sent once when the narrative misses the word window
pub fn build_narrative_correction(actual_words: usize, min: usize, max: usize) -> String {
    format!(
        "Your summary was {} words. Rewrite it to be strictly between {} and {} words. \
         Return only the summary text.",
        actual_words, min, max
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    body: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, version: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            body: body.into(),
        }
    }

    /// Substitute `{{name}}` placeholders.
    ///
    /// Values are inserted verbatim and never re-scanned, so braces inside a
    /// document's text are safe.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String, PipelineError> {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            let close = after_open.find("}}").ok_or_else(|| {
                PipelineError::Prompt(format!("{}: unterminated placeholder", self.name))
            })?;
            let key = after_open[..close].trim();
            let value = vars
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| *value)
                .ok_or_else(|| {
                    PipelineError::Prompt(format!(
                        "{}: unresolved placeholder {{{{{}}}}}",
                        self.name, key
                    ))
                })?;
            out.push_str(value);
            rest = &after_open[close + 2..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

/// The two templates the gateway uses
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub analysis: PromptTemplate,
    pub narrative: PromptTemplate,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptSet {
    pub fn builtin() -> Self {
        Self {
            analysis: PromptTemplate::new("document_analysis", BUILTIN_PROMPT_VERSION, BUILTIN_ANALYSIS),
            narrative: PromptTemplate::new("narrative_summary", BUILTIN_PROMPT_VERSION, BUILTIN_NARRATIVE),
        }
    }

    /// Load templates, preferring files in `override_dir` when present.
    ///
    /// A missing override file falls back to the compiled-in template; an
    /// unreadable one is an error.
    pub fn load(override_dir: Option<&Path>) -> Result<Self, PipelineError> {
        let mut set = Self::builtin();
        let Some(dir) = override_dir else {
            return Ok(set);
        };

        for (file, template) in [
            (ANALYSIS_FILE, &mut set.analysis),
            (NARRATIVE_FILE, &mut set.narrative),
        ] {
            let path = dir.join(file);
            if !path.exists() {
                continue;
            }
            let body = std::fs::read_to_string(&path).map_err(|e| {
                PipelineError::Prompt(format!("failed to read {}: {}", path.display(), e))
            })?;
            tracing::info!("[Prompts] Using override for {} from {}", template.name, path.display());
            template.body = body;
            template.version = format!("override:{}", path.display());
        }

        Ok(set)
    }

    pub fn build_analysis_prompt(
        &self,
        filename: &str,
        advisory_category: Category,
        text: &str,
    ) -> Result<String, PipelineError> {
        self.analysis.render(&[
            ("filename", filename),
            ("category", advisory_category.as_str()),
            ("text", text),
        ])
    }

    pub fn build_narrative_prompt(&self, findings: &[DocumentFinding]) -> Result<String, PipelineError> {
        let serialized = serde_json::to_string_pretty(findings)
            .map_err(|e| PipelineError::Prompt(format!("failed to serialize findings: {}", e)))?;
        self.narrative.render(&[("findings", &serialized)])
    }
}
