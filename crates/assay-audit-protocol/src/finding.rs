use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of audit levels. Consumers order and filter on it; the audit
/// core only assigns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    NotCompliant,
    Error,
    InternalAction,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::NotCompliant => "NOT_COMPLIANT",
            Severity::Error => "ERROR",
            Severity::InternalAction => "INTERNAL_ACTION",
        }
    }

    pub fn all() -> [Severity; 4] {
        [
            Severity::Warning,
            Severity::NotCompliant,
            Severity::Error,
            Severity::InternalAction,
        ]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit result. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub detail: String,
    #[serde(rename = "level")]
    pub severity: Severity,
}

impl Finding {
    pub fn new(category: impl Into<String>, detail: impl Into<String>, severity: Severity) -> Self {
        Self {
            category: category.into(),
            detail: detail.into(),
            severity,
        }
    }

    pub fn warning(category: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(category, detail, Severity::Warning)
    }

    pub fn not_compliant(category: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(category, detail, Severity::NotCompliant)
    }

    pub fn error(category: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(category, detail, Severity::Error)
    }

    pub fn internal_action(category: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(category, detail, Severity::InternalAction)
    }
}
