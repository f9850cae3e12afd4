//! Advisory keyword classifier
//!
//! Scores filename + text prefix against fixed keyword lists. The result is
//! passed to the model as context; the model's own category is what gets
//! counted.

use crate::config::CLASSIFIER_PREFIX_CHARS;
use crate::pipeline::types::Category;

/// Keyword lists in tie-break priority order
const KEYWORDS: [(Category, &[&str]); 4] = [
    (
        Category::Financial,
        &[
            "revenue",
            "ebitda",
            "profit",
            "balance sheet",
            "income statement",
            "cash flow",
            "invoice",
            "budget",
            "forecast",
            "audit",
            "tax",
            "financial",
            "p&l",
            "margin",
            "debt",
            "valuation",
        ],
    ),
    (
        Category::Legal,
        &[
            "agreement",
            "contract",
            "nda",
            "litigation",
            "lawsuit",
            "indemn",
            "liability",
            "clause",
            "license",
            "compliance",
            "regulatory",
            "intellectual property",
            "patent",
            "trademark",
            "termination",
            "warranty",
        ],
    ),
    (
        Category::Commercial,
        &[
            "customer",
            "sales",
            "pricing",
            "market",
            "pipeline",
            "churn",
            "partner",
            "marketing",
            "proposal",
            "competitor",
            "subscription",
            "order",
            "deal",
            "go-to-market",
        ],
    ),
    (
        Category::Operations,
        &[
            "operations",
            "supply",
            "inventory",
            "logistics",
            "vendor",
            "supplier",
            "headcount",
            "employee",
            "org chart",
            "process",
            "facility",
            "it systems",
            "sop",
            "maintenance",
            "payroll",
            "human resources",
        ],
    ),
];

/// Classify from the filename and the first 300 chars of extracted text.
///
/// Each listed keyword found anywhere scores one point. Highest score wins;
/// ties go to the earlier category; all-zero is `Other`.
pub fn classify(filename: &str, text: &str) -> Category {
    let snippet: String = text.chars().take(CLASSIFIER_PREFIX_CHARS).collect();
    let haystack = format!("{} {}", filename, snippet).to_lowercase();

    let mut best = Category::Other;
    let mut best_score = 0;

    for (category, keywords) in KEYWORDS.iter() {
        let score = keywords.iter().filter(|k| haystack.contains(*k)).count();
        if score > best_score {
            best = *category;
            best_score = score;
        }
    }

    best
}
