//! Shared types for the diligence pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One file read out of the uploaded archive
#[derive(Debug, Clone)]
pub struct RawEntry {
    /// Entry path inside the archive
    pub name: String,
    pub bytes: Vec<u8>,
    /// Uncompressed size in bytes
    pub size: u64,
}

impl RawEntry {
    /// Final path component
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Lower-cased extension of the entry name
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

/// Normalized, length-bounded text pulled out of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub text: String,
    /// True iff the normalized text exceeded the ceiling
    pub truncated: bool,
    /// Character count of the normalized text before truncation
    pub original_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_metadata: Option<FormatMetadata>,
}

/// Format-specific details reported by an extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum FormatMetadata {
    Pdf {
        /// Page objects in the file, or a text-length estimate
        estimated_pages: u32,
    },
    Docx {
        paragraphs: usize,
    },
    Spreadsheet {
        sheets_read: usize,
        rows_read: usize,
    },
    Csv {
        rows_read: usize,
        columns: usize,
    },
    PlainText {
        lines: usize,
    },
}

/// Document category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Financial,
    Legal,
    Commercial,
    Operations,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Financial,
        Category::Legal,
        Category::Commercial,
        Category::Operations,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Legal => "legal",
            Self::Commercial => "commercial",
            Self::Operations => "operations",
            Self::Other => "other",
        }
    }

    /// Strict parse used for model output; unknown values are rejected
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "financial" => Some(Self::Financial),
            "legal" => Some(Self::Legal),
            "commercial" => Some(Self::Commercial),
            "operations" => Some(Self::Operations),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Financial => "Financial",
            Self::Legal => "Legal",
            Self::Commercial => "Commercial",
            Self::Operations => "Operations",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured analysis of one document, as accepted from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFinding {
    pub doc: String,
    pub category: Category,
    /// 1-5 items, each at most 300 chars
    pub facts: Vec<String>,
    /// 0-5 items, each at most 300 chars
    pub red_flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounts {
    pub facts: usize,
    pub red_flags: usize,
}

/// Per-category counts. Always holds every category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Aggregate(BTreeMap<Category, AggregateCounts>);

/// Stored maps may omit categories; missing ones come back zeroed
impl<'de> Deserialize<'de> for Aggregate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let stored = BTreeMap::<Category, AggregateCounts>::deserialize(deserializer)?;
        let mut aggregate = Self::empty();
        aggregate.0.extend(stored);
        Ok(aggregate)
    }
}

impl Aggregate {
    /// All five categories present, zeroed
    pub fn empty() -> Self {
        Self(
            Category::ALL
                .iter()
                .map(|c| (*c, AggregateCounts::default()))
                .collect(),
        )
    }

    pub fn get(&self, category: Category) -> AggregateCounts {
        self.0.get(&category).copied().unwrap_or_default()
    }

    pub(crate) fn add(&mut self, category: Category, facts: usize, red_flags: usize) {
        let bucket = self.0.entry(category).or_default();
        bucket.facts += facts;
        bucket.red_flags += red_flags;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, AggregateCounts)> + '_ {
        self.0.iter().map(|(c, counts)| (*c, *counts))
    }
}

impl Default for Aggregate {
    fn default() -> Self {
        Self::empty()
    }
}

/// Terminal artifact of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub docs: Vec<DocumentFinding>,
    pub aggregate: Aggregate,
    pub summary_text: String,
    pub errors: Vec<String>,
}

/// Pipeline run state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Unpacking,
    PerFileProcessing,
    Aggregating,
    Done,
    Failed,
}

/// Model usage over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub calls: u64,
    pub corrections: u64,
    pub tokens: u64,
}

impl GatewayStats {
    /// Usage accrued since an earlier snapshot of the same gateway
    pub fn since(&self, earlier: GatewayStats) -> GatewayStats {
        GatewayStats {
            calls: self.calls.saturating_sub(earlier.calls),
            corrections: self.corrections.saturating_sub(earlier.corrections),
            tokens: self.tokens.saturating_sub(earlier.tokens),
        }
    }
}

/// Result plus run bookkeeping
#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: AnalysisResult,
    pub phase: RunPhase,
    pub files_admitted: usize,
    pub files_analyzed: usize,
    /// Entries the unpacker left out, also present in `result.errors`
    pub skipped: Vec<String>,
    /// Wall time spent in each phase, in the order entered
    pub phase_timings: Vec<(RunPhase, Duration)>,
    pub elapsed: Duration,
    pub usage: GatewayStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_aggregate_has_all_categories() {
        let aggregate = Aggregate::empty();
        assert_eq!(aggregate.iter().count(), 5);
        for category in Category::ALL {
            assert_eq!(aggregate.get(category), AggregateCounts::default());
        }
    }

    #[test]
    fn test_aggregate_serializes_as_map() {
        let mut aggregate = Aggregate::empty();
        aggregate.add(Category::Legal, 2, 1);
        let json = serde_json::to_value(&aggregate).unwrap();
        assert_eq!(json["legal"]["facts"], 2);
        assert_eq!(json["legal"]["red_flags"], 1);
        assert_eq!(json["other"]["facts"], 0);
    }

    #[test]
    fn test_aggregate_fills_missing_categories_on_load() {
        let json = r#"{"legal":{"facts":3,"red_flags":1}}"#;
        let aggregate: Aggregate = serde_json::from_str(json).unwrap();

        assert_eq!(aggregate.iter().count(), 5);
        assert_eq!(aggregate.get(Category::Legal).facts, 3);
        assert_eq!(aggregate.get(Category::Financial), AggregateCounts::default());
        assert!(serde_json::to_value(&aggregate).unwrap()["other"].is_object());
    }

    #[test]
    fn test_category_parse_is_strict() {
        assert_eq!(Category::parse("Financial"), Some(Category::Financial));
        assert_eq!(Category::parse(" operations "), Some(Category::Operations));
        assert_eq!(Category::parse("marketing"), None);
    }

    #[test]
    fn test_raw_entry_names() {
        let entry = RawEntry {
            name: "deal/finance/Q3 Report.PDF".to_string(),
            bytes: vec![],
            size: 0,
        };
        assert_eq!(entry.file_name(), "Q3 Report.PDF");
        assert_eq!(entry.extension().as_deref(), Some("pdf"));

        let no_ext = RawEntry {
            name: "README".to_string(),
            bytes: vec![],
            size: 0,
        };
        assert_eq!(no_ext.extension(), None);
    }

    #[test]
    fn test_analysis_result_round_trips_camel_case() {
        let result = AnalysisResult {
            docs: vec![],
            aggregate: Aggregate::empty(),
            summary_text: "summary".to_string(),
            errors: vec!["a.pdf: failed".to_string()],
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"summaryText\""));
        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
