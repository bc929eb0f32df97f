//! Structural checks on an extractor response before anything is planned.

use crate::models::{CaseIsin, ExtractorResponse};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// The extractor itself reported failures.
    Error,
    /// The data parsed but breaks an upload rule; a corrected file may pass.
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub severity: IssueSeverity,
    pub issues: Vec<String>,
}

impl ValidationFailure {
    fn error(issues: Vec<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            issues,
        }
    }

    fn warning(issue: String) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            issues: vec![issue],
        }
    }
}

/// Validate `response` against the ISINs known for the case.
///
/// Returns `None` when the response can be reconciled. Checks run in order
/// and the first one that fails decides the result:
///
/// 1. extractor-reported sheet errors, grouped by message
/// 2. every sheet has at least one record
/// 3. every record belongs to a named sheet
/// 4. every sheet header carries an ISIN
/// 5. every header ISIN belongs to the case
pub fn validate(response: &ExtractorResponse, known_isins: &[CaseIsin]) -> Option<ValidationFailure> {
    if response.is_empty() {
        return None;
    }

    let failed: Vec<_> = response.failures().collect();
    if !failed.is_empty() {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for failure in failed {
            let message = failure.error.as_str();
            let sheet = failure.sheet.as_str();
            match groups.iter_mut().find(|(existing, _)| *existing == message) {
                Some((_, sheets)) => sheets.push(sheet),
                None => groups.push((message, vec![sheet])),
            }
        }

        return Some(ValidationFailure::error(
            groups
                .into_iter()
                .map(|(message, sheets)| format!("Sheets [{}]: {}", sheets.join(", "), message))
                .collect(),
        ));
    }

    let empty: Vec<&str> = response
        .sheets()
        .filter(|sheet| sheet.body.is_empty())
        .map(|sheet| sheet.sheet_name.as_str())
        .collect();
    if !empty.is_empty() {
        return Some(ValidationFailure::warning(format!(
            "Sheet \"{}\": no entries found!",
            empty.join(", ")
        )));
    }

    if response
        .sheets()
        .any(|sheet| sheet.sheet_name.trim().is_empty())
    {
        return Some(ValidationFailure::warning(
            "Some entries do not have a sheet name.".to_string(),
        ));
    }

    let missing_isin: Vec<&str> = response
        .sheets()
        .filter(|sheet| sheet.isin_number().is_none())
        .map(|sheet| sheet.sheet_name.as_str())
        .collect();
    if !missing_isin.is_empty() {
        return Some(ValidationFailure::warning(format!(
            "Sheet \"{}\": Missing ISINNumber in header.",
            missing_isin.join(", ")
        )));
    }

    let known: HashSet<&str> = known_isins
        .iter()
        .map(|isin| isin.isin_number.as_str())
        .collect();
    let unknown: Vec<&str> = response
        .sheets()
        .filter(|sheet| {
            sheet
                .isin_number()
                .is_some_and(|isin| !known.contains(isin))
        })
        .map(|sheet| sheet.sheet_name.as_str())
        .collect();
    if !unknown.is_empty() {
        return Some(ValidationFailure::warning(format!(
            "Sheet [{}]: ISINNumber does not match with the compartment.",
            unknown.join(", ")
        )));
    }

    None
}
