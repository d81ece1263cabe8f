//! Pre-execution security validation
//!
//! Scans submitted source against its language's forbidden-pattern set and
//! structural constraints before any process is spawned. Validation never
//! executes code; it is a defense-in-depth filter in front of the container
//! isolation boundary, not the boundary itself.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::types::SecurityViolation;

/// Errors that occur while building or querying the validator
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("language '{0}' not found")]
    UnknownLanguage(String),

    #[error("invalid forbidden pattern '{pattern}' for language '{language}': {source}")]
    BadPattern {
        language: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Outcome of validating one source submission
#[derive(Debug, Clone)]
pub struct ValidationReport {
    violations: Vec<SecurityViolation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[SecurityViolation] {
        &self.violations
    }

    pub fn into_violations(self) -> Vec<SecurityViolation> {
        self.violations
    }
}

/// Static source validator
///
/// All per-language regex sets are compiled once at construction; `validate`
/// itself is read-only and safe to call from many tasks concurrently.
#[derive(Debug)]
pub struct Validator {
    max_source_len: usize,
    patterns: HashMap<String, Vec<Regex>>,
}

impl Validator {
    /// Build a validator from the language registry
    pub fn new(config: &Config) -> Result<Self, SecurityError> {
        let mut patterns = HashMap::new();
        for (id, lang) in &config.languages {
            let compiled = lang
                .forbidden_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| SecurityError::BadPattern {
                        language: id.clone(),
                        pattern: p.clone(),
                        source: e,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            patterns.insert(id.clone(), compiled);
        }
        Ok(Self {
            max_source_len: config.max_source_len,
            patterns,
        })
    }

    /// Validate source code for the given language.
    ///
    /// Scanning continues past the first match so the report carries every
    /// violation, not just the first. `max_len` overrides the configured
    /// source-length cap for this call.
    pub fn validate(
        &self,
        language_id: &str,
        source: &str,
        max_len: Option<usize>,
    ) -> Result<ValidationReport, SecurityError> {
        let patterns = self
            .patterns
            .get(language_id)
            .ok_or_else(|| SecurityError::UnknownLanguage(language_id.to_string()))?;

        let mut violations = Vec::new();

        let limit = max_len.unwrap_or(self.max_source_len);
        if source.len() > limit {
            violations.push(SecurityViolation::length(format!(
                "source is {} bytes, limit is {limit}",
                source.len()
            )));
        }

        for pattern in patterns {
            if pattern.is_match(source) {
                violations.push(SecurityViolation::pattern(
                    pattern.as_str(),
                    format!("source matches forbidden pattern '{}'", pattern.as_str()),
                ));
            }
        }

        if let Some(violation) = check_balance(source) {
            violations.push(violation);
        }

        if !violations.is_empty() {
            debug!(
                language_id,
                count = violations.len(),
                "source rejected by validator"
            );
        }

        Ok(ValidationReport { violations })
    }
}

/// Structural balance check over parens, brackets, and braces.
///
/// An unmatched closer at any point, or open brackets left at end of input,
/// yields a structural violation. This is a coarse sanity check; string
/// literals are not parsed.
pub fn check_balance(source: &str) -> Option<SecurityViolation> {
    let mut stack = Vec::new();

    for (i, c) in source.char_indices() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some(open) if open == expected => {}
                    _ => {
                        return Some(SecurityViolation::structural(format!(
                            "unmatched '{c}' at byte {i}"
                        )));
                    }
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() {
        None
    } else {
        Some(SecurityViolation::structural(format!(
            "{} unclosed bracket(s) at end of input",
            stack.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ViolationKind;

    fn validator() -> Validator {
        Validator::new(&Config::default()).unwrap()
    }

    #[test]
    fn clean_source_is_valid() {
        let report = validator().validate("python3", "print(2+2)", None).unwrap();
        assert!(report.is_valid());
        assert!(report.violations().is_empty());
    }

    #[test]
    fn forbidden_import_rejected() {
        let report = validator()
            .validate("python3", "import os\nos.listdir('/')", None)
            .unwrap();
        assert!(!report.is_valid());
        assert!(
            report
                .violations()
                .iter()
                .any(|v| v.kind == ViolationKind::ForbiddenPattern)
        );
    }

    #[test]
    fn all_violations_reported_not_just_first() {
        let source = "import os\nimport subprocess\neval('1')";
        let report = validator().validate("python3", source, None).unwrap();
        let pattern_hits = report
            .violations()
            .iter()
            .filter(|v| v.kind == ViolationKind::ForbiddenPattern)
            .count();
        assert!(pattern_hits >= 3, "expected 3+ hits, got {pattern_hits}");
    }

    #[test]
    fn oversized_source_rejected() {
        let source = "x".repeat(50_001);
        let report = validator().validate("python3", &source, None).unwrap();
        assert!(
            report
                .violations()
                .iter()
                .any(|v| v.kind == ViolationKind::Length)
        );
    }

    #[test]
    fn max_len_override_applies() {
        let report = validator()
            .validate("python3", "print(1)", Some(3))
            .unwrap();
        assert!(
            report
                .violations()
                .iter()
                .any(|v| v.kind == ViolationKind::Length)
        );
    }

    #[test]
    fn unknown_language_errors() {
        let result = validator().validate("cobol", "DISPLAY 'HI'", None);
        assert!(matches!(result, Err(SecurityError::UnknownLanguage(_))));
    }

    #[test]
    fn eval_in_node_rejected() {
        let report = validator()
            .validate("node20", "eval('2+2')", None)
            .unwrap();
        assert!(!report.is_valid());
    }

    #[test]
    fn balance_ok() {
        assert!(check_balance("fn main() { let v = vec![(1, 2)]; }").is_none());
        assert!(check_balance("").is_none());
        assert!(check_balance("no brackets at all").is_none());
    }

    #[test]
    fn balance_unmatched_closer() {
        let v = check_balance("print(2+2))").unwrap();
        assert_eq!(v.kind, ViolationKind::Structural);
    }

    #[test]
    fn balance_mismatched_pair() {
        assert!(check_balance("(]").is_some());
        assert!(check_balance("{)").is_some());
    }

    #[test]
    fn balance_unclosed_at_end() {
        let v = check_balance("def f(:").unwrap();
        assert_eq!(v.kind, ViolationKind::Structural);
    }

    #[test]
    fn unbalanced_source_flagged_structural() {
        let report = validator()
            .validate("python3", "print((2+2)", None)
            .unwrap();
        assert!(
            report
                .violations()
                .iter()
                .any(|v| v.kind == ViolationKind::Structural)
        );
    }
}
