//! Graded evaluation of numeric metrics against tiered standards.

use crate::formatter::{audit_link, entity_link};
use assay_audit_protocol::{File, Finding, Severity};
use serde::{Deserialize, Serialize};

/// Cutoffs of a four-tier ladder. Each bound is inclusive on the lower end:
/// a value equal to `minimal` is already in the `[minimal, recommended)` tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tiers {
    #[serde(alias = "extremely_low")]
    pub low: u64,
    pub minimal: u64,
    pub recommended: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    ExtremelyLow,
    Insufficient,
    Low,
    Pass,
}

impl TierOutcome {
    pub fn severity(self) -> Option<Severity> {
        match self {
            TierOutcome::ExtremelyLow => Some(Severity::Error),
            TierOutcome::Insufficient => Some(Severity::NotCompliant),
            TierOutcome::Low => Some(Severity::Warning),
            TierOutcome::Pass => None,
        }
    }

    pub fn label(self) -> Option<&'static str> {
        match self {
            TierOutcome::ExtremelyLow => Some("extremely low"),
            TierOutcome::Insufficient => Some("insufficient"),
            TierOutcome::Low => Some("low"),
            TierOutcome::Pass => None,
        }
    }
}

impl Tiers {
    pub const fn new(low: u64, minimal: u64, recommended: u64) -> Self {
        Self {
            low,
            minimal,
            recommended,
        }
    }

    pub fn classify(&self, value: u64) -> TierOutcome {
        if value < self.low {
            TierOutcome::ExtremelyLow
        } else if value < self.minimal {
            TierOutcome::Insufficient
        } else if value < self.recommended {
            TierOutcome::Low
        } else {
            TierOutcome::Pass
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.low <= self.minimal && self.minimal <= self.recommended
    }
}

/// Naming and wording of the finding a ladder produces. The category is
/// `"{qualifier} {tier label} {metric}"`, e.g. `control low read depth`.
#[derive(Debug, Clone)]
pub struct ThresholdContext<'a> {
    pub qualifier: Option<&'a str>,
    pub metric: &'a str,
    pub detail: String,
}

impl<'a> ThresholdContext<'a> {
    pub fn new(metric: &'a str, detail: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            metric,
            detail: detail.into(),
        }
    }

    pub fn qualified(mut self, qualifier: &'a str) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    fn category(&self, label: &str) -> String {
        match self.qualifier {
            Some(q) => format!("{q} {label} {}", self.metric),
            None => format!("{label} {}", self.metric),
        }
    }
}

pub fn evaluate_tiered_threshold(
    value: u64,
    tiers: &Tiers,
    context: ThresholdContext<'_>,
) -> Option<Finding> {
    let outcome = tiers.classify(value);
    let severity = outcome.severity()?;
    let label = outcome.label()?;
    Some(Finding::new(context.category(label), context.detail, severity))
}

fn missing_read_length(file: &File) -> Finding {
    Finding::not_compliant(
        "missing read_length",
        format!("Reads file {} missing read_length", entity_link(&file.id)),
    )
}

/// Single-threshold read length check used by the DNase and RNA standards.
pub fn evaluate_read_length(
    file: &File,
    threshold: u64,
    pipeline_title: &str,
    standards_link: &str,
) -> Option<Finding> {
    let Some(read_length) = file.read_length else {
        return Some(missing_read_length(file));
    };
    if read_length >= threshold {
        return None;
    }
    Some(Finding::not_compliant(
        "insufficient read length",
        format!(
            "Fastq file {} has read length of {}bp. ENCODE uniform processing pipeline \
             standards require sequencing reads to be at least {}bp long. (See {} )",
            entity_link(&file.id),
            read_length,
            threshold,
            audit_link(
                &format!("ENCODE {pipeline_title} data standards"),
                standards_link
            )
        ),
    ))
}

/// Three-cutoff ChIP-seq read length ladder.
pub fn evaluate_chip_read_length(file: &File, tiers: &Tiers) -> Option<Finding> {
    let Some(read_length) = file.read_length else {
        return Some(missing_read_length(file));
    };
    let detail = format!(
        "Fastq file {} has read length of {}bp. For mapping accuracy ENCODE standards \
         recommend that sequencing reads should be at least {}bp long. (See {} )",
        entity_link(&file.id),
        read_length,
        tiers.recommended,
        audit_link("ENCODE ChIP-seq data standards", "/data-standards/chip-seq/")
    );
    evaluate_tiered_threshold(read_length, tiers, ThresholdContext::new("read length", detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROAD: Tiers = Tiers::new(20_000_000, 35_000_000, 45_000_000);

    fn depth(value: u64) -> Option<Finding> {
        evaluate_tiered_threshold(
            value,
            &BROAD,
            ThresholdContext::new("read depth", "detail").qualified("control"),
        )
    }

    #[test]
    fn test_ladder_boundaries_belong_to_higher_tier() {
        let cases = [
            (0, Some(("control extremely low read depth", Severity::Error))),
            (19_999_999, Some(("control extremely low read depth", Severity::Error))),
            (20_000_000, Some(("control insufficient read depth", Severity::NotCompliant))),
            (34_999_999, Some(("control insufficient read depth", Severity::NotCompliant))),
            (35_000_000, Some(("control low read depth", Severity::Warning))),
            (44_999_999, Some(("control low read depth", Severity::Warning))),
            (45_000_000, None),
            (90_000_000, None),
        ];
        for (value, expected) in cases {
            let got = depth(value).map(|f| (f.category, f.severity));
            assert_eq!(
                got,
                expected.map(|(c, s)| (c.to_string(), s)),
                "value {value}"
            );
        }
    }

    #[test]
    fn test_tiers_accept_extremely_low_alias() {
        let tiers: Tiers = serde_json::from_str(
            r#"{"extremely_low": 1, "minimal": 2, "recommended": 3}"#,
        )
        .unwrap();
        assert_eq!(tiers, Tiers::new(1, 2, 3));
        assert!(tiers.is_ordered());
    }

    #[test]
    fn test_read_length_missing_and_short() {
        let mut file = File {
            id: "/files/ENCFF000FQ1/".to_string(),
            ..Default::default()
        };
        let missing = evaluate_read_length(&file, 50, "Bulk RNA-seq", "/x/").unwrap();
        assert_eq!(missing.category, "missing read_length");
        assert_eq!(missing.severity, Severity::NotCompliant);

        file.read_length = Some(36);
        let short = evaluate_read_length(&file, 50, "Bulk RNA-seq", "/x/").unwrap();
        assert_eq!(short.category, "insufficient read length");
        assert!(short.detail.contains("{ENCODE Bulk RNA-seq data standards|/x/}"));

        file.read_length = Some(50);
        assert!(evaluate_read_length(&file, 50, "Bulk RNA-seq", "/x/").is_none());
    }

    #[test]
    fn test_chip_read_length_ladder() {
        let tiers = Tiers::new(26, 36, 50);
        let file = |len| File {
            id: "/files/ENCFF000FQ2/".to_string(),
            read_length: Some(len),
            ..Default::default()
        };
        let cat = |len| evaluate_chip_read_length(&file(len), &tiers).map(|f| f.category);
        assert_eq!(cat(25).as_deref(), Some("extremely low read length"));
        assert_eq!(cat(26).as_deref(), Some("insufficient read length"));
        assert_eq!(cat(36).as_deref(), Some("low read length"));
        assert_eq!(cat(50), None);
    }
}
