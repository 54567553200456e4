//! Library consistency rules.

use crate::dispatch::AuditContext;
use crate::files_index::ExcludedStatuses;
use crate::formatter::{bracketed, entity_link, entity_links};
use crate::rules::{
    active_libraries, award_in, experiment_link, has_long_fragments, is_removed,
    is_removed_or_revoked, RNA_NUCLEIC_ACIDS,
};
use crate::standards::contains;
use assay_audit_protocol::{Experiment, Finding, Library, Replicate, Severity};
use itertools::Itertools;
use std::collections::BTreeSet;

const SPIKEIN_ASSAYS: [&str; 3] = ["RNA-seq", "polyA plus RNA-seq", "polyA minus RNA-seq"];
const SIZE_RANGE_EXEMPT_ASSAYS: [&str; 3] = [
    "transcription profiling by array assay",
    "long read RNA-seq",
    "long read single-cell RNA-seq",
];
const BRU_ASSAYS: [&str; 3] = ["BruChase-seq", "Bru-seq", "BruUV-seq"];

fn is_rna_library(library: &Library) -> bool {
    library
        .nucleic_acid_term_name
        .as_deref()
        .is_some_and(|n| RNA_NUCLEIC_ACIDS.contains(&n))
}

pub fn audit_mixed_nucleic_acids(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed(experiment) || experiment.replicates.is_none() {
        return Vec::new();
    }
    let nucleic_acids: BTreeSet<&str> = active_libraries(experiment.replicates(), excluded)
        .filter_map(|(_, lib)| lib.nucleic_acid_term_name.as_deref())
        .collect();
    if nucleic_acids.len() < 2 {
        return Vec::new();
    }
    vec![Finding::internal_action(
        "mixed libraries",
        format!(
            "Experiment {} contains libraries with mixed nucleic acids {}.",
            experiment_link(experiment),
            bracketed(&nucleic_acids)
        ),
    )]
}

pub fn audit_mixed_strand_specificity(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed(experiment) || experiment.replicates.is_none() {
        return Vec::new();
    }
    let specificities: BTreeSet<&str> = active_libraries(experiment.replicates(), excluded)
        .map(|(_, lib)| lib.strand_specificity.as_deref().unwrap_or("none"))
        .collect();
    if specificities.len() < 2 {
        return Vec::new();
    }
    vec![Finding::error(
        "mixed strand specificities",
        format!(
            "Experiment {} contains libraries with mixed strand specificities {}.",
            experiment_link(experiment),
            bracketed(&specificities)
        ),
    )]
}

/// HiC libraries of one experiment should be cut with the same enzymes.
pub fn audit_hic_fragmentation_methods(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if experiment.assay() != "HiC"
        || is_removed_or_revoked(experiment)
        || experiment.replicates.is_none()
    {
        return Vec::new();
    }
    let link = experiment_link(experiment);
    let mut findings = Vec::new();
    let mut all_methods: BTreeSet<&str> = BTreeSet::new();
    let mut by_library: Vec<(&str, BTreeSet<&str>)> = Vec::new();
    for (_, library) in active_libraries(experiment.replicates(), excluded) {
        if library.fragmentation_methods.is_empty() {
            findings.push(Finding::warning(
                "missing fragmentation method",
                format!(
                    "Experiment {link} contains a library {} lacking the specification of the \
                     fragmentation method used to generate it.",
                    entity_link(&library.id)
                ),
            ));
            continue;
        }
        let methods: BTreeSet<&str> = library
            .fragmentation_methods
            .iter()
            .map(String::as_str)
            .collect();
        all_methods.extend(&methods);
        if !by_library.iter().any(|(id, _)| *id == library.id) {
            by_library.push((&library.id, methods));
        }
    }
    for (library_id, methods) in &by_library {
        if methods.len() != all_methods.len() {
            findings.push(Finding::warning(
                "inconsistent fragmentation method",
                format!(
                    "Experiment {link} contains library {} generated using {} fragmentation \
                     methods, which are inconsistent with fragmentation methods {} used for \
                     other libraries.",
                    entity_link(library_id),
                    bracketed(methods),
                    bracketed(&all_methods)
                ),
            ));
        }
    }
    findings
}

pub fn audit_rna_fragment_size(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed(experiment) || experiment.assay_is(&SIZE_RANGE_EXEMPT_ASSAYS) {
        return Vec::new();
    }
    let severity = if experiment.assay_is(&BRU_ASSAYS) {
        Severity::Warning
    } else {
        Severity::NotCompliant
    };
    experiment
        .replicates()
        .iter()
        .filter_map(|rep| rep.library.as_ref())
        .filter(|lib| {
            is_rna_library(lib) && lib.size_range.is_none() && lib.average_fragment_size.is_none()
        })
        .map(|lib| {
            Finding::new(
                "missing RNA fragment size",
                format!(
                    "Metadata of RNA library {} lacks information on the size range or average \
                     size of fragments used to construct the library.",
                    entity_link(&lib.id)
                ),
                severity,
            )
        })
        .collect()
}

pub fn audit_rna_rin(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    let rin_assay = experiment
        .assay_term_id
        .as_deref()
        .is_some_and(|id| contains(&ctx.standards.assays.rin_term_ids, id));
    if !rin_assay {
        return Vec::new();
    }
    active_libraries(experiment.replicates(), excluded)
        .filter(|(_, lib)| is_rna_library(lib) && lib.rna_integrity_number.is_none())
        .map(|(_, lib)| {
            Finding::internal_action(
                "missing RIN",
                format!(
                    "Metadata of RNA library {} lacks specification of the rna integrity number.",
                    entity_link(&lib.id)
                ),
            )
        })
        .collect()
}

/// Long-fragment RNA-seq libraries must declare the spike-ins they used.
pub fn audit_spikeins(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if !award_in(experiment, &ctx.standards.awards.spikeins)
        || is_removed(experiment)
        || !experiment.assay_is(&SPIKEIN_ASSAYS)
    {
        return Vec::new();
    }
    experiment
        .replicates()
        .iter()
        .filter_map(|rep| rep.library.as_ref())
        .filter(|lib| has_long_fragments(lib))
        .filter(|lib| lib.spikeins_used.as_ref().is_none_or(Vec::is_empty))
        .map(|lib| {
            Finding::not_compliant(
                "missing spikeins",
                format!(
                    "Library {} is in an RNA-seq experiment and has an average fragment size or \
                     size_range >200. It requires a value for spikeins_used",
                    entity_link(&lib.id)
                ),
            )
        })
        .collect()
}

/// Collects queried RNP size ranges of the libraries of `replicates`,
/// recording a detail line for every library lacking one.
fn collect_rnp_sizes<'a>(
    replicates: &'a [Replicate],
    excluded: &ExcludedStatuses,
    sizes: &mut BTreeSet<&'a str>,
    missing: &mut Vec<String>,
) {
    for library in replicates
        .iter()
        .filter(|rep| !excluded.contains(&rep.status))
        .filter_map(|rep| rep.library.as_ref())
    {
        match library.queried_rnp_size_range.as_deref() {
            Some(size) => {
                sizes.insert(size);
            }
            None => missing.push(format!(
                "Library {} is missing specification of queried_RNP_size_range.",
                entity_link(&library.id)
            )),
        }
    }
}

/// eCLIP libraries and the libraries of their controls must agree on the
/// queried RNP size range.
pub fn audit_eclip_queried_rnp_size_range(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if experiment.assay() != "eCLIP" {
        return Vec::new();
    }
    let mut experiment_sizes = BTreeSet::new();
    let mut control_sizes = BTreeSet::new();
    let mut missing = Vec::new();
    collect_rnp_sizes(experiment.replicates(), excluded, &mut experiment_sizes, &mut missing);
    for control in &experiment.possible_controls {
        collect_rnp_sizes(&control.replicates, excluded, &mut control_sizes, &mut missing);
    }
    if !missing.is_empty() {
        return missing
            .into_iter()
            .map(|detail| Finding::error("missing queried_RNP_size_range", detail))
            .collect();
    }

    let link = experiment_link(experiment);
    let controls = entity_links(experiment.possible_controls.iter().map(|c| c.id.as_str()));
    let mut findings = Vec::new();
    if experiment_sizes.len() > 1 {
        findings.push(Finding::error(
            "mixed queried_RNP_size_range",
            format!(
                "Libraries of experiment {link} have mixed queried_RNP_size_range values of {}.",
                experiment_sizes.iter().join(", ")
            ),
        ));
    }
    if control_sizes.len() > 1 {
        findings.push(Finding::error(
            "mixed queried_RNP_size_range",
            format!(
                "Libraries of control experiment(s) {controls} have mixed queried_RNP_size_range \
                 values of {}.",
                control_sizes.iter().join(", ")
            ),
        ));
    }
    if !findings.is_empty() {
        return findings;
    }
    if experiment_sizes != control_sizes && !experiment.possible_controls.is_empty() {
        findings.push(Finding::error(
            "inconsistent queried_RNP_size_range",
            format!(
                "Libraries of experiment {link} have queried_RNP_size_range of {}, but the \
                 libraries of its control experiment(s) {controls} have queried_RNP_size_range \
                 of {}.",
                experiment_sizes.iter().join(", "),
                control_sizes.iter().join(", ")
            ),
        ));
    }
    findings
}

/// Barcode details belong to single-cell libraries only.
pub fn audit_single_cell_barcode_details(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if experiment.assay_is(&["single-cell RNA sequencing assay", "single-nucleus ATAC-seq"])
        || is_removed_or_revoked(experiment)
    {
        return Vec::new();
    }
    let link = experiment_link(experiment);
    experiment
        .replicates()
        .iter()
        .filter_map(|rep| rep.library.as_ref())
        .filter(|lib| lib.has_barcode_details())
        .map(|lib| {
            Finding::warning(
                "inconsistent barcode details",
                format!(
                    "Experiment {link} has a library {} that specifies barcode_details, which \
                     should only be specified on libraries from single cell experiments.",
                    entity_link(&lib.id)
                ),
            )
        })
        .collect()
}
