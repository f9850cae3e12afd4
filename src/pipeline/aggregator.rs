//! Category-level fold over findings

use super::types::{Aggregate, DocumentFinding};

/// Sum fact and red-flag counts per category.
///
/// Starts from a fully zeroed aggregate, so every category is present even
/// for an empty slice. Order of `findings` does not affect the result.
pub fn aggregate(findings: &[DocumentFinding]) -> Aggregate {
    findings.iter().fold(Aggregate::empty(), |mut acc, finding| {
        acc.add(finding.category, finding.facts.len(), finding.red_flags.len());
        acc
    })
}
