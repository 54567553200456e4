//! Rule registry and the audit runner.
//!
//! Two ordered rule sets run against one experiment: rules reading the file
//! classification index, then rules needing only the excluded-status set.
//! Rules are pure; they may run in parallel, and the merged finding stream
//! keeps registry order. A panicking rule is recorded as a [`RuleFailure`]
//! and the remaining rules still run.

use crate::files_index::{build_index, ExcludedStatuses, FilesIndex};
use crate::registry::Registry;
use crate::standards::Standards;
use crate::{
    rules_analyses, rules_biosamples, rules_controls, rules_files, rules_libraries,
    rules_replicates, rules_standards, rules_targets,
};
use assay_audit_protocol::{Experiment, Finding, Severity};
use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

/// Lookups and tables a rule may consult besides the experiment itself.
#[derive(Clone, Copy)]
pub struct AuditContext<'a> {
    pub registry: &'a dyn Registry,
    pub standards: &'a Standards,
}

impl<'a> AuditContext<'a> {
    pub fn new(registry: &'a dyn Registry, standards: &'a Standards) -> Self {
        Self {
            registry,
            standards,
        }
    }
}

pub type IndexRule = fn(&Experiment, &AuditContext<'_>, &FilesIndex<'_>) -> Vec<Finding>;
pub type StatusRule = fn(&Experiment, &AuditContext<'_>, &ExcludedStatuses) -> Vec<Finding>;

#[derive(Clone, Copy)]
pub enum RuleBody {
    Indexed(IndexRule),
    Statuses(StatusRule),
}

#[derive(Clone, Copy)]
pub struct RuleDescriptor {
    pub name: &'static str,
    pub body: RuleBody,
}

impl RuleDescriptor {
    pub fn indexed(name: &'static str, rule: IndexRule) -> Self {
        Self {
            name,
            body: RuleBody::Indexed(rule),
        }
    }

    pub fn statuses(name: &'static str, rule: StatusRule) -> Self {
        Self {
            name,
            body: RuleBody::Statuses(rule),
        }
    }

    pub fn evaluate(
        &self,
        experiment: &Experiment,
        ctx: &AuditContext<'_>,
        inputs: &RuleInputs<'_>,
    ) -> Vec<Finding> {
        match self.body {
            RuleBody::Indexed(rule) => rule(experiment, ctx, &inputs.files),
            RuleBody::Statuses(rule) => rule(experiment, ctx, &inputs.statuses),
        }
    }
}

/// Ordered collection of rules.
#[derive(Clone, Default)]
pub struct RuleSet {
    rules: Vec<RuleDescriptor>,
}

impl RuleSet {
    pub fn new(rules: Vec<RuleDescriptor>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: RuleDescriptor) {
        self.rules.push(rule);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleDescriptor> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub fn default_index_rules() -> RuleSet {
    RuleSet::new(vec![
        RuleDescriptor::indexed(
            "consistent_sequencing_runs",
            rules_replicates::audit_consistent_sequencing_runs,
        ),
        RuleDescriptor::indexed("out_of_date_analysis", rules_files::audit_out_of_date_analysis),
        RuleDescriptor::indexed("platforms", rules_controls::audit_platform_mismatches),
        RuleDescriptor::indexed("pipeline_assay", rules_files::audit_pipeline_assay_details),
        RuleDescriptor::indexed(
            "missing_unfiltered_alignments",
            rules_files::audit_missing_unfiltered_alignments,
        ),
        RuleDescriptor::indexed("modern_standards", rules_standards::audit_modern_standards),
        RuleDescriptor::indexed("mapped_read_length", rules_files::audit_mapped_read_length),
        RuleDescriptor::indexed("chip_control", rules_controls::audit_chip_control),
        RuleDescriptor::indexed(
            "chip_control_read_depth",
            rules_controls::audit_chip_control_read_depth,
        ),
        RuleDescriptor::indexed("assay_standards", rules_standards::audit_assay_standards),
        RuleDescriptor::indexed("submitted_read_count", rules_replicates::audit_low_read_count),
        RuleDescriptor::indexed("no_processed_data", rules_files::audit_no_processed_data),
        RuleDescriptor::indexed(
            "analysis_files_mismatched_analysis",
            rules_analyses::audit_analysis_files_mismatched_analysis,
        ),
        RuleDescriptor::indexed(
            "analysis_files_mismatched_dataset",
            rules_analyses::audit_analysis_files_mismatched_dataset,
        ),
        RuleDescriptor::indexed("provenance_cycles", rules_files::audit_provenance_cycles),
    ])
}

pub fn default_status_rules() -> RuleSet {
    RuleSet::new(vec![
        RuleDescriptor::statuses("isogeneity", rules_replicates::audit_isogeneity),
        RuleDescriptor::statuses("replicate_biosample", rules_replicates::audit_replicate_biosample),
        RuleDescriptor::statuses(
            "tagging_genetic_modification_characterization",
            rules_biosamples::audit_tagging_modification_characterization,
        ),
        RuleDescriptor::statuses(
            "tagging_biosample_characterization",
            rules_biosamples::audit_biosample_characterization,
        ),
        RuleDescriptor::statuses(
            "replicate_library",
            rules_replicates::audit_technical_replicates_same_library,
        ),
        RuleDescriptor::statuses("documents", rules_analyses::audit_documents),
        RuleDescriptor::statuses(
            "replicate_without_libraries",
            rules_replicates::audit_replicates_without_libraries,
        ),
        RuleDescriptor::statuses("experiment_biosample", rules_biosamples::audit_biosample_term),
        RuleDescriptor::statuses("target", rules_targets::audit_target),
        RuleDescriptor::statuses("mixed_libraries", rules_libraries::audit_mixed_nucleic_acids),
        RuleDescriptor::statuses(
            "hic_fragmentation_methods",
            rules_libraries::audit_hic_fragmentation_methods,
        ),
        RuleDescriptor::statuses("internal_tags", rules_biosamples::audit_internal_tags),
        RuleDescriptor::statuses("geo_submission", rules_analyses::audit_geo_submission),
        RuleDescriptor::statuses("replication", rules_replicates::audit_replication),
        RuleDescriptor::statuses("rna_fragment_size", rules_libraries::audit_rna_fragment_size),
        RuleDescriptor::statuses("rna_library_rin", rules_libraries::audit_rna_rin),
        RuleDescriptor::statuses(
            "missing_tagging_modification",
            rules_targets::audit_missing_tagging_modification,
        ),
        RuleDescriptor::statuses(
            "antibody_characterization",
            rules_targets::audit_antibody_characterization,
        ),
        RuleDescriptor::statuses("control", rules_controls::audit_control_biosample),
        RuleDescriptor::statuses("spikeins", rules_libraries::audit_spikeins),
        RuleDescriptor::statuses(
            "nih_consent",
            rules_biosamples::audit_nih_institutional_certification,
        ),
        RuleDescriptor::statuses("replicate_no_files", rules_replicates::audit_replicates_without_files),
        RuleDescriptor::statuses(
            "eclip_queried_rnp_size_range",
            rules_libraries::audit_eclip_queried_rnp_size_range,
        ),
        RuleDescriptor::statuses(
            "inconsistent_genetic_modifications",
            rules_biosamples::audit_inconsistent_genetic_modifications,
        ),
        RuleDescriptor::statuses(
            "biosample_perturbed_mixed",
            rules_biosamples::audit_mixed_perturbation,
        ),
        RuleDescriptor::statuses(
            "mixed_strand_specificities",
            rules_libraries::audit_mixed_strand_specificity,
        ),
        RuleDescriptor::statuses(
            "inconsistent_analysis_status",
            rules_analyses::audit_analysis_status,
        ),
        RuleDescriptor::statuses(
            "single_cell_libraries",
            rules_libraries::audit_single_cell_barcode_details,
        ),
    ])
}

/// Inputs built once per audit and shared read-only by every rule.
pub struct RuleInputs<'a> {
    pub files: FilesIndex<'a>,
    pub statuses: ExcludedStatuses,
}

impl<'a> RuleInputs<'a> {
    pub fn for_experiment(experiment: &'a Experiment) -> Self {
        let excluded = ExcludedStatuses::for_experiment_status(&experiment.status);
        let files = build_index(&experiment.original_files, &excluded)
            .with_contributing(&experiment.contributing_files);
        Self {
            statuses: excluded.with_deleted_and_replaced(),
            files,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub rule: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub findings: Vec<Finding>,
    pub rule_failures: Vec<RuleFailure>,
}

impl AuditReport {
    pub fn findings_by_severity(&self) -> BTreeMap<Severity, Vec<&Finding>> {
        let mut out: BTreeMap<Severity, Vec<&Finding>> = BTreeMap::new();
        for finding in &self.findings {
            out.entry(finding.severity).or_default().push(finding);
        }
        out
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.rule_failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditOptions {
    /// Run rules one after another on the calling thread.
    pub sequential: bool,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "rule panicked".to_string()
    }
}

fn run_rule(
    rule: &RuleDescriptor,
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    inputs: &RuleInputs<'_>,
) -> Result<Vec<Finding>, RuleFailure> {
    tracing::debug!(rule = rule.name, "running rule");
    panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(experiment, ctx, inputs))).map_err(
        |payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(
                rule = rule.name,
                experiment = %experiment.id,
                "rule failed: {message}"
            );
            RuleFailure {
                rule: rule.name.to_string(),
                message,
            }
        },
    )
}

pub fn run_audit(
    experiment: &Experiment,
    index_rules: &RuleSet,
    status_rules: &RuleSet,
    ctx: &AuditContext<'_>,
    options: AuditOptions,
) -> AuditReport {
    let inputs = RuleInputs::for_experiment(experiment);
    tracing::debug!(
        experiment = %experiment.id,
        files = ?inputs.files.summary(),
        "starting audit"
    );
    let rules: Vec<&RuleDescriptor> = index_rules.iter().chain(status_rules.iter()).collect();
    let outcomes: Vec<Result<Vec<Finding>, RuleFailure>> = if options.sequential {
        rules
            .iter()
            .map(|rule| run_rule(rule, experiment, ctx, &inputs))
            .collect()
    } else {
        rules
            .par_iter()
            .map(|rule| run_rule(rule, experiment, ctx, &inputs))
            .collect()
    };

    let mut report = AuditReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(findings) => report.findings.extend(findings),
            Err(failure) => report.rule_failures.push(failure),
        }
    }
    tracing::debug!(
        experiment = %experiment.id,
        findings = report.findings.len(),
        failures = report.rule_failures.len(),
        "audit finished"
    );
    report
}
