//! Rules over the experiment's own files: processed data presence,
//! alignment freshness and lineage, pipeline metadata.

use crate::dispatch::AuditContext;
use crate::files_index::{FileCategory, FilesIndex};
use crate::formatter::{bracketed, entity_link};
use crate::provenance::{
    derived_from_of_format, files_in_cycles, has_only_raw_parents, is_stale_alignment,
    lacks_unfiltered_counterpart, mapped_read_length, pipeline_objects, pipeline_title_lookup,
};
use crate::rules::{experiment_link, is_removed};
use crate::standards::contains;
use assay_audit_protocol::{Experiment, Finding};
use std::collections::BTreeSet;

const OUT_OF_DATE_ASSAYS: [&str; 4] = [
    "ChIP-seq",
    "Mint-ChIP-seq",
    "DNase-seq",
    "genetic modification followed by DNase-seq",
];
/// Smallest spread of mapped read lengths behind one peaks file that is
/// reported.
const MAPPED_LENGTH_SPREAD: u64 = 7;

/// Alignments of the processing pipeline that no longer match the reads
/// of their replicate.
pub fn audit_out_of_date_analysis(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    if !experiment.assay_is(&OUT_OF_DATE_ASSAYS) {
        return Vec::new();
    }
    let standards = ctx.standards;
    let dnase_encode4 = [standards.pipelines.dnase_encode4.clone()];
    let link = experiment_link(experiment);
    let mut findings = Vec::new();
    for category in [
        FileCategory::Alignments,
        FileCategory::UnfilteredAlignments,
        FileCategory::TranscriptomeAlignments,
    ] {
        for bam in index.bucket(category).iter() {
            if !standards.is_processing_lab(bam.lab.as_deref()) || bam.derived_from_ids().is_empty() {
                continue;
            }
            let encode4_dnase = pipeline_title_lookup(
                [bam],
                &standards.pipelines.processed_assemblies,
                &dnase_encode4,
                &standards.processing_lab,
            )
            .is_some();
            if !is_stale_alignment(bam, index, experiment.assay(), encode4_dnase) {
                continue;
            }
            let assembly = bam
                .assembly
                .as_deref()
                .map(|a| format!(" {a} assembly "))
                .unwrap_or_else(|| " ".to_string());
            findings.push(Finding::internal_action(
                "out of date analysis",
                format!(
                    "Experiment {link} {} file {} mapped to{assembly}is out of date.",
                    bam.output_type_or_empty(),
                    entity_link(&bam.id)
                ),
            ));
        }
    }
    findings
}

pub fn audit_pipeline_assay_details(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    pipeline_objects(index.original_files().iter())
        .into_iter()
        .filter(|pipeline| {
            !pipeline
                .assay_term_names
                .as_deref()
                .is_some_and(|assays| contains(assays, experiment.assay()))
        })
        .map(|pipeline| {
            Finding::internal_action(
                "inconsistent assay_term_name",
                format!(
                    "This experiment contains file(s) associated with pipeline {} which \
                     assay_term_names list does not include experiments's assay_term_name.",
                    entity_link(&pipeline.id)
                ),
            )
        })
        .collect()
}

/// Filtered ChIP-seq alignments mapped straight from reads need their
/// unfiltered counterpart.
pub fn audit_missing_unfiltered_alignments(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    let standards = ctx.standards;
    if !standards.is_chip_term(experiment.assay_term_id.as_deref()) || index.alignments().is_empty() {
        return Vec::new();
    }
    let mapped_by_chip_pipeline = pipeline_objects(index.alignments().iter())
        .iter()
        .any(|p| contains(&standards.pipelines.chip_mapping, &p.title));
    if !mapped_by_chip_pipeline {
        return Vec::new();
    }
    let link = experiment_link(experiment);
    index
        .alignments()
        .iter()
        .filter(|bam| {
            has_only_raw_parents(bam, index)
                && standards.is_processing_lab(bam.lab.as_deref())
                && lacks_unfiltered_counterpart(bam, index.unfiltered_alignments().iter())
        })
        .map(|bam| {
            let output_type = bam.output_type_or_empty();
            Finding::internal_action(
                "missing unfiltered alignments",
                format!(
                    "Experiment {link} contains biological replicate {} with a filtered \
                     {output_type} file {}, mapped to a {} assembly, but has no unfiltered \
                     {output_type} file.",
                    bracketed(&bam.biological_replicates),
                    entity_link(&bam.id),
                    bam.assembly.as_deref().unwrap_or("")
                ),
            )
        })
        .collect()
}

/// Alignments behind one processed peaks file should share a mapped read
/// length.
pub fn audit_mapped_read_length(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    let standards = ctx.standards;
    if !standards.is_chip_term(experiment.assay_term_id.as_deref()) {
        return Vec::new();
    }
    let link = experiment_link(experiment);
    let mut findings = Vec::new();
    for peaks in index.peaks_files().iter() {
        if !standards.is_processing_lab(peaks.lab.as_deref()) {
            continue;
        }
        let mut lengths = BTreeSet::new();
        for bam in derived_from_of_format([peaks], index, "bam") {
            if !standards.is_processing_lab(bam.lab.as_deref()) {
                continue;
            }
            match mapped_read_length(bam, index) {
                Some(length) => {
                    lengths.insert(length);
                }
                None => findings.push(Finding::internal_action(
                    "missing mapped reads lengths",
                    format!(
                        "Experiment {link} contains a processed {} .bam file {} that lacks \
                         mapped reads length information.",
                        bam.output_type_or_empty(),
                        entity_link(&bam.id)
                    ),
                )),
            }
        }
        let (Some(min), Some(max)) = (lengths.first(), lengths.last()) else {
            continue;
        };
        if max - min >= MAPPED_LENGTH_SPREAD {
            findings.push(Finding::internal_action(
                "inconsistent mapped reads lengths",
                format!(
                    "Experiment {link} contains a processed .bed file {} that was derived from \
                     alignments files with inconsistent mapped reads lengths {}.",
                    entity_link(&peaks.id),
                    bracketed(&lengths)
                ),
            ));
        }
    }
    findings
}

pub fn audit_no_processed_data(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    if is_removed(experiment) {
        return Vec::new();
    }
    if !index.bucket(FileCategory::ProcessedData).is_empty() {
        return Vec::new();
    }
    let link = experiment_link(experiment);
    let detail = if index.bucket(FileCategory::RawData).is_empty() {
        format!("Experiment {link} does not contain any raw or processed data.")
    } else {
        format!("Experiment {link} only has raw data and does not contain any processed data.")
    };
    vec![Finding::warning("lacking processed data", detail)]
}

pub fn audit_provenance_cycles(
    _experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    files_in_cycles(index)
        .into_iter()
        .map(|file| {
            Finding::internal_action(
                "cyclic file provenance",
                format!(
                    "File {} is derived from itself through its derived_from lineage.",
                    entity_link(&file.id)
                ),
            )
        })
        .collect()
}
