use assay_audit_protocol::Experiment;
use dispatch::{AuditContext, AuditOptions, AuditReport, RuleSet};
use error::AuditError;
use lazy_static::lazy_static;
use registry::Registry;

pub mod about;
pub mod dispatch;
pub mod error;
pub mod files_index;
pub mod formatter;
pub mod provenance;
pub mod registry;
pub mod rules;
pub mod rules_analyses;
pub mod rules_biosamples;
pub mod rules_controls;
pub mod rules_files;
pub mod rules_libraries;
pub mod rules_replicates;
pub mod rules_standards;
pub mod rules_targets;
pub mod standards;
pub mod thresholds;

pub use assay_audit_protocol as protocol;

lazy_static! {
    // Rules reading the file classification index
    pub static ref DEFAULT_INDEX_RULES: RuleSet = dispatch::default_index_rules();

    // Rules reading only the excluded-status set
    pub static ref DEFAULT_STATUS_RULES: RuleSet = dispatch::default_status_rules();
}

/// Parses a fully expanded experiment graph.
pub fn parse_experiment(text: &str) -> Result<Experiment, AuditError> {
    let experiment: Experiment = serde_json::from_str(text)?;
    if experiment.id.is_empty() {
        return Err(AuditError::InvalidInput(
            "experiment has no '@id'".to_string(),
        ));
    }
    Ok(experiment)
}

/// Audits `experiment` with the default rule sets and the active standards
/// table.
pub fn audit_experiment(
    experiment: &Experiment,
    registry: &dyn Registry,
    options: AuditOptions,
) -> AuditReport {
    let standards = standards::current();
    let ctx = AuditContext::new(registry, &standards);
    dispatch::run_audit(
        experiment,
        &DEFAULT_INDEX_RULES,
        &DEFAULT_STATUS_RULES,
        &ctx,
        options,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_experiment_requires_id() {
        assert!(parse_experiment(r#"{"status": "released"}"#).is_err());
        let experiment = parse_experiment(r#"{"@id": "/experiments/E1/", "status": "released"}"#).unwrap();
        assert_eq!(experiment.status, "released");
    }

    #[test]
    fn test_default_rule_sets_are_shared() {
        assert_eq!(DEFAULT_INDEX_RULES.len(), dispatch::default_index_rules().len());
        assert!(!DEFAULT_STATUS_RULES.is_empty());
    }
}
