//! Analysis bookkeeping, documents and GEO submission.

use crate::dispatch::AuditContext;
use crate::files_index::{ExcludedStatuses, FileCategory, FilesIndex};
use crate::formatter::{audit_link, entity_link, entity_links, path_to_text};
use crate::rules::{award_in, experiment_link, is_removed};
use crate::standards::contains;
use assay_audit_protocol::{Experiment, Finding};

const UNRELEASED_STATUSES: [&str; 6] = [
    "deleted",
    "replaced",
    "archived",
    "in progress",
    "submitted",
    "revoked",
];

/// Processed files must belong to one of this experiment's analyses.
pub fn audit_analysis_files_mismatched_analysis(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    let analysis_ids: Vec<&str> = experiment
        .analyses
        .iter()
        .flatten()
        .map(|a| a.id.as_str())
        .collect();
    let mut not_in_analysis = Vec::new();
    let mut in_foreign_analysis = Vec::new();
    for file in index.bucket(FileCategory::ProcessedData).iter() {
        if file.analyses.is_empty() {
            not_in_analysis.push(file.id.as_str());
        } else if file.analyses.iter().any(|a| !analysis_ids.contains(&a.as_str())) {
            in_foreign_analysis.push(file.id.as_str());
        }
    }
    let link = experiment_link(experiment);
    let mut findings = Vec::new();
    if !not_in_analysis.is_empty() {
        findings.push(Finding::internal_action(
            "inconsistent analysis files",
            format!(
                "Experiment {link} contains processed file(s) {} not in an analysis.",
                entity_links(not_in_analysis)
            ),
        ));
    }
    if !in_foreign_analysis.is_empty() {
        findings.push(Finding::internal_action(
            "inconsistent analysis files",
            format!(
                "Experiment {link} contains processed file(s) {} belonging to an analysis \
                 associated with a different dataset.",
                entity_links(in_foreign_analysis)
            ),
        ));
    }
    findings
}

/// Files listed by this experiment's analyses must belong to this
/// experiment.
pub fn audit_analysis_files_mismatched_dataset(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _index: &FilesIndex<'_>,
) -> Vec<Finding> {
    let Some(analyses) = &experiment.analyses else {
        return Vec::new();
    };
    analyses
        .iter()
        .filter(|analysis| analysis.status != "deleted")
        .filter_map(|analysis| {
            let foreign: Vec<&str> = analysis
                .files
                .iter()
                .filter(|f| f.dataset.as_deref() != Some(experiment.id.as_str()))
                .map(|f| f.id.as_str())
                .collect();
            (!foreign.is_empty()).then(|| {
                Finding::internal_action(
                    "inconsistent analysis files",
                    format!(
                        "Analysis {} contains file(s) {} belonging to another dataset.",
                        entity_link(&analysis.id),
                        entity_links(foreign)
                    ),
                )
            })
        })
        .collect()
}

/// Released experiments have exactly one released analysis; unreleased
/// ones have none.
pub fn audit_analysis_status(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    let link = experiment_link(experiment);
    let released_experiment = experiment.status == "released";
    let lacks_released = || {
        Finding::internal_action(
            "inconsistent analysis status",
            format!("Experiment {link} is released but lacks a released analysis."),
        )
    };
    let Some(analyses) = &experiment.analyses else {
        return if released_experiment {
            vec![lacks_released()]
        } else {
            Vec::new()
        };
    };
    let released: Vec<&str> = analyses
        .iter()
        .filter(|a| a.status == "released")
        .map(|a| a.id.as_str())
        .collect();
    let mut findings = Vec::new();
    if released.len() > 1 {
        findings.push(Finding::internal_action(
            "inconsistent analysis status",
            format!(
                "Experiment {link} has multiple released analyses {}.",
                entity_links(released.iter().copied())
            ),
        ));
    } else if experiment.status_in(&UNRELEASED_STATUSES) && !released.is_empty() {
        findings.push(Finding::internal_action(
            "inconsistent analysis status",
            format!(
                "Experiment {link} is not released, but has a released analysis {}.",
                entity_links(released.iter().copied())
            ),
        ));
    }
    if released_experiment && released.is_empty() {
        findings.push(lacks_released());
    }
    findings
}

pub fn audit_geo_submission(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if experiment.status != "released" {
        return Vec::new();
    }
    let exempt = experiment
        .assay_term_id
        .as_deref()
        .is_some_and(|id| contains(&ctx.standards.assays.geo_exempt_term_ids, id));
    if exempt || experiment.dbxrefs.iter().any(|x| x.starts_with("GEO:")) {
        return Vec::new();
    }
    vec![Finding::internal_action(
        "experiment not submitted to GEO",
        format!(
            "Experiment {} is released, but is not submitted to GEO.",
            experiment_link(experiment)
        ),
    )]
}

/// Experiments need documents, their own or their libraries'.
pub fn audit_documents(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if !award_in(experiment, &ctx.standards.awards.documents)
        || is_removed(experiment)
        || !experiment.documents.is_empty()
    {
        return Vec::new();
    }
    let Some(replicates) = &experiment.replicates else {
        return Vec::new();
    };
    let library_documents: usize = replicates
        .iter()
        .filter_map(|rep| rep.library.as_ref())
        .map(|lib| lib.documents.len())
        .sum();
    if library_documents > 0 {
        return Vec::new();
    }
    let accession = experiment
        .accession
        .clone()
        .unwrap_or_else(|| path_to_text(&experiment.id));
    vec![Finding::not_compliant(
        "missing documents",
        format!(
            "Experiment {} has no attached documents",
            audit_link(&accession, &experiment.id)
        ),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files_index::build_index;
    use crate::registry::StaticRegistry;
    use crate::rules::fixtures::{categories, experiment};
    use crate::standards::Standards;
    use assay_audit_protocol::Severity;
    use serde_json::json;

    fn run_indexed(
        rule: fn(&Experiment, &AuditContext<'_>, &FilesIndex<'_>) -> Vec<Finding>,
        exp: &Experiment,
    ) -> Vec<Finding> {
        let standards = Standards::builtin();
        let registry = StaticRegistry::default();
        let index = build_index(&exp.original_files, &ExcludedStatuses::for_experiment_status(&exp.status));
        rule(exp, &AuditContext::new(&registry, &standards), &index)
    }

    fn run(
        rule: fn(&Experiment, &AuditContext<'_>, &ExcludedStatuses) -> Vec<Finding>,
        exp: &Experiment,
    ) -> Vec<Finding> {
        let standards = Standards::builtin();
        let registry = StaticRegistry::default();
        let excluded = ExcludedStatuses::for_experiment_status(&exp.status).with_deleted_and_replaced();
        rule(exp, &AuditContext::new(&registry, &standards), &excluded)
    }

    #[test]
    fn test_processed_files_outside_analyses() {
        let exp = experiment(json!({
            "@id": "/experiments/ENCSR000ANA/", "status": "released",
            "analyses": [{"@id": "/analyses/ENCAN000OWN/", "status": "released"}],
            "original_files": [
                {"@id": "/files/P1/", "status": "released", "output_category": "annotation"},
                {"@id": "/files/P2/", "status": "released", "output_category": "annotation",
                 "analyses": ["/analyses/ENCAN000OTH/"]},
                {"@id": "/files/P3/", "status": "released", "output_category": "annotation",
                 "analyses": ["/analyses/ENCAN000OWN/"]},
                {"@id": "/files/R1/", "status": "released", "output_category": "raw data"}
            ]
        }));
        let findings = run_indexed(audit_analysis_files_mismatched_analysis, &exp);
        assert_eq!(findings.len(), 2);
        assert!(findings[0].detail.contains("{P1|/files/P1/} not in an analysis"));
        assert!(findings[1].detail.contains("{P2|/files/P2/} belonging to an analysis"));
    }

    #[test]
    fn test_analysis_files_of_other_dataset() {
        let exp = experiment(json!({
            "@id": "/experiments/ENCSR000ANA/", "status": "released",
            "analyses": [
                {"@id": "/analyses/A1/", "status": "released", "files": [
                    {"@id": "/files/F1/", "dataset": "/experiments/ENCSR000ANA/"},
                    {"@id": "/files/F2/", "dataset": "/experiments/ENCSR000XXX/"}
                ]},
                {"@id": "/analyses/A2/", "status": "in progress", "files": [
                    {"@id": "/files/F3/", "dataset": "/experiments/ENCSR000ANA/"}
                ]},
                {"@id": "/analyses/A3/", "status": "deleted", "files": [
                    {"@id": "/files/F4/", "dataset": "/experiments/ENCSR000YYY/"}
                ]}
            ]
        }));
        let findings = run_indexed(audit_analysis_files_mismatched_dataset, &exp);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].detail,
            "Analysis {A1|/analyses/A1/} contains file(s) {F2|/files/F2/} belonging to another dataset."
        );
    }

    #[test]
    fn test_foreign_files_listed_per_analysis() {
        let exp = experiment(json!({
            "@id": "/experiments/ENCSR000ANA/", "status": "released",
            "analyses": [
                {"@id": "/analyses/A1/", "status": "released", "files": [
                    {"@id": "/files/F1/", "dataset": "/experiments/ENCSR000XXX/"}
                ]},
                {"@id": "/analyses/A2/", "status": "released", "files": [
                    {"@id": "/files/F2/", "dataset": "/experiments/ENCSR000YYY/"}
                ]}
            ]
        }));
        let findings = run_indexed(audit_analysis_files_mismatched_dataset, &exp);
        assert_eq!(findings.len(), 2);
        assert!(findings[1].detail.contains("{F2|/files/F2/}"));
        assert!(!findings[1].detail.contains("/files/F1/"));
    }

    #[test]
    fn test_analysis_status() {
        let released_without = experiment(json!({"@id": "/experiments/E1/", "status": "released"}));
        assert_eq!(categories(&run(audit_analysis_status, &released_without)), ["inconsistent analysis status"]);

        let two = experiment(json!({"@id": "/experiments/E1/", "status": "released", "analyses": [
            {"@id": "/analyses/A1/", "status": "released"}, {"@id": "/analyses/A2/", "status": "released"}
        ]}));
        let findings = run(audit_analysis_status, &two);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].detail.contains("multiple released analyses"));

        let unreleased = experiment(json!({"@id": "/experiments/E1/", "status": "in progress", "analyses": [
            {"@id": "/analyses/A1/", "status": "released"}
        ]}));
        assert!(run(audit_analysis_status, &unreleased)[0].detail.contains("is not released"));

        let fine = experiment(json!({"@id": "/experiments/E1/", "status": "released", "analyses": [
            {"@id": "/analyses/A1/", "status": "released"}, {"@id": "/analyses/A2/", "status": "archived"}
        ]}));
        assert!(run(audit_analysis_status, &fine).is_empty());
    }

    #[test]
    fn test_geo_submission() {
        let missing = experiment(json!({"@id": "/experiments/E1/", "status": "released", "assay_term_id": "OBI:0000716"}));
        let findings = run(audit_geo_submission, &missing);
        assert_eq!(categories(&findings), ["experiment not submitted to GEO"]);
        assert_eq!(findings[0].severity, Severity::InternalAction);

        let submitted = experiment(json!({"@id": "/experiments/E1/", "status": "released", "dbxrefs": ["GEO:GSM1"]}));
        assert!(run(audit_geo_submission, &submitted).is_empty());
        let exempt = experiment(json!({"@id": "/experiments/E1/", "status": "released", "assay_term_id": "OBI:0001923"}));
        assert!(run(audit_geo_submission, &exempt).is_empty());
    }

    #[test]
    fn test_missing_documents() {
        let exp = experiment(json!({
            "@id": "/experiments/ENCSR000DOC/", "accession": "ENCSR000DOC", "status": "released",
            "award": {"rfa": "ENCODE3"},
            "replicates": [{"@id": "/replicates/r1/", "status": "released",
                "biological_replicate_number": 1, "technical_replicate_number": 1,
                "library": {"@id": "/libraries/L1/", "accession": "L1", "status": "released"}}]
        }));
        let findings = run(audit_documents, &exp);
        assert_eq!(categories(&findings), ["missing documents"]);
        assert_eq!(
            findings[0].detail,
            "Experiment {ENCSR000DOC|/experiments/ENCSR000DOC/} has no attached documents"
        );

        let mut with_library_docs = exp.clone();
        if let Some(lib) = with_library_docs
            .replicates
            .as_mut()
            .and_then(|reps| reps[0].library.as_mut())
        {
            lib.documents.push("/documents/D1/".to_string());
        }
        assert!(run(audit_documents, &with_library_docs).is_empty());
    }
}
