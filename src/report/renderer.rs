//! Markdown report rendering
//!
//! Pure string assembly over an [`AnalysisResult`]. Section order: title and
//! date, summary, aggregate table, per-document findings, needs review.

use crate::config::REPORT_SUMMARY_MAX_WORDS;
use crate::pipeline::types::{AnalysisResult, Category};
use chrono::NaiveDate;
use std::fmt::Write;

/// Table row order in the aggregate section
const AGGREGATE_ORDER: [Category; 5] = [
    Category::Financial,
    Category::Legal,
    Category::Operations,
    Category::Commercial,
    Category::Other,
];

const NO_FACTS: &str = "No facts extracted.";
const NO_RED_FLAGS: &str = "No red flags identified.";
const NO_DOCUMENTS: &str = "No documents were analyzed.";
const ALL_PROCESSED: &str = "All files were processed successfully.";

pub trait Renderer: Send + Sync {
    fn render(&self, result: &AnalysisResult) -> String;
}

/// Markdown renderer. The date defaults to today and can be pinned.
#[derive(Debug, Clone, Default)]
pub struct MarkdownRenderer {
    date: Option<NaiveDate>,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date(date: NaiveDate) -> Self {
        Self { date: Some(date) }
    }
}

impl Renderer for MarkdownRenderer {
    fn render(&self, result: &AnalysisResult) -> String {
        let date = self
            .date
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        render_report(result, date)
    }
}

pub fn render_report(result: &AnalysisResult, date: NaiveDate) -> String {
    let mut md = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(md, "# Due Diligence Report\n");
    let _ = writeln!(md, "_Generated {}_\n", date.format("%B %-d, %Y"));

    let _ = writeln!(md, "## Summary\n");
    let _ = writeln!(md, "{}\n", trim_to_words(&result.summary_text, REPORT_SUMMARY_MAX_WORDS));

    let _ = writeln!(md, "## Findings by Category\n");
    let _ = writeln!(md, "| Category | Facts | Red flags |");
    let _ = writeln!(md, "|---|---:|---:|");
    for category in AGGREGATE_ORDER {
        let counts = result.aggregate.get(category);
        let _ = writeln!(
            md,
            "| {} | {} | {} |",
            category.display_name(),
            counts.facts,
            counts.red_flags
        );
    }
    md.push('\n');

    let _ = writeln!(md, "## Documents\n");
    if result.docs.is_empty() {
        let _ = writeln!(md, "{}\n", NO_DOCUMENTS);
    }
    for (i, doc) in result.docs.iter().enumerate() {
        let _ = writeln!(md, "### {}. {} ({})\n", i + 1, doc.doc, doc.category);
        write_list(&mut md, "Facts", &doc.facts, NO_FACTS);
        write_list(&mut md, "Red flags", &doc.red_flags, NO_RED_FLAGS);
    }

    let _ = writeln!(md, "## Needs Review\n");
    if result.errors.is_empty() {
        let _ = writeln!(md, "{}", ALL_PROCESSED);
    } else {
        for error in &result.errors {
            let _ = writeln!(md, "- {}", error);
        }
    }

    md
}

fn write_list(md: &mut String, heading: &str, items: &[String], placeholder: &str) {
    let _ = writeln!(md, "**{}**\n", heading);
    if items.is_empty() {
        let _ = writeln!(md, "- _{}_", placeholder);
    }
    for item in items {
        let _ = writeln!(md, "- {}", item);
    }
    md.push('\n');
}

/// Cut `text` after `max_words` words, keeping its original whitespace.
fn trim_to_words(text: &str, max_words: usize) -> String {
    let text = text.trim();
    let mut words = 0;
    let mut in_word = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if in_word {
                words += 1;
                in_word = false;
                if words == max_words {
                    return format!("{}...", &text[..i]);
                }
            }
        } else {
            in_word = true;
        }
    }

    text.to_string()
}
