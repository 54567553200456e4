//! Replicate structure rules: replication adequacy, replicate/library/
//! biosample wiring, read-run consistency and submitted read counts.

use crate::dispatch::AuditContext;
use crate::files_index::{build_index, ExcludedStatuses, FilesIndex};
use crate::formatter::{bracketed, entity_link, entity_links};
use crate::rules::{
    award_in, experiment_link, is_gtex_experiment, is_removed_or_revoked, CHIP_ASSAYS,
};
use crate::standards::contains;
use assay_audit_protocol::{Experiment, Finding, Severity};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

const SINGLE_CELL_ASSAYS: [&str; 2] = ["single-cell RNA sequencing assay", "single-nucleus ATAC-seq"];
const UNREPLICATED_ASSAYS: [&str; 4] = [
    "single-cell RNA sequencing assay",
    "RNA Bind-n-Seq",
    "genetic modification followed by DNase-seq",
    "long read single-cell RNA-seq",
];
const FAILED_UPLOAD_STATUSES: [&str; 3] = ["uploading", "content error", "upload failed"];
const BIO_REP_DEPTH_ASSAYS: [&str; 4] = [
    "DNase-seq",
    "genetic modification followed by DNase-seq",
    "ChIP-seq",
    "Mint-ChIP-seq",
];

pub fn audit_replication(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if !award_in(experiment, &ctx.standards.awards.replication)
        || !experiment.status_in(&["released", "submitted"])
        || experiment.assay_is(&UNREPLICATED_ASSAYS)
        || is_gtex_experiment(experiment, ctx.standards)
        || experiment.is_control()
    {
        return Vec::new();
    }
    let Some(replicates) = &experiment.replicates else {
        return Vec::new();
    };
    let bio_reps: HashSet<u32> = replicates
        .iter()
        .map(|r| r.biological_replicate_number)
        .collect();
    match bio_reps.len() {
        0 => vec![Finding::not_compliant(
            "unreplicated experiment",
            "This experiment is expected to be replicated, but currently does not have any \
             replicates associated with it.",
        )],
        1 if !experiment.assay_is(&SINGLE_CELL_ASSAYS) => {
            let severity = match experiment.biosample_classification() {
                Some("tissue" | "primary cell") => Severity::InternalAction,
                _ => Severity::NotCompliant,
            };
            vec![Finding::new(
                "unreplicated experiment",
                "This experiment is expected to be replicated, but contains only one listed \
                 biological replicate.",
                severity,
            )]
        }
        _ => Vec::new(),
    }
}

pub fn audit_replicates_without_libraries(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed_or_revoked(experiment) {
        return Vec::new();
    }
    experiment
        .replicates()
        .iter()
        .filter(|rep| !excluded.contains(&rep.status) && rep.library.is_none())
        .map(|rep| {
            Finding::error(
                "replicate with no library",
                format!(
                    "Experiment {} has a replicate {}, that has no library associated with it.",
                    experiment_link(experiment),
                    entity_link(&rep.id)
                ),
            )
        })
        .collect()
}

pub fn audit_technical_replicates_same_library(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed_or_revoked(experiment) {
        return Vec::new();
    }
    let mut libraries: HashMap<u32, Vec<&str>> = HashMap::new();
    for rep in experiment.replicates() {
        let Some(library) = &rep.library else {
            continue;
        };
        let seen = libraries.entry(rep.biological_replicate_number).or_default();
        if seen.contains(&library.accession.as_str()) {
            return vec![Finding::internal_action(
                "sequencing runs labeled as technical replicates",
                format!(
                    "Experiment {} has different technical replicates associated with the same \
                     library {}.",
                    experiment_link(experiment),
                    entity_link(&library.id)
                ),
            )];
        }
        seen.push(&library.accession);
    }
    Vec::new()
}

/// Biological replicates must use distinct biosamples, and technical
/// replicates of one biological replicate the same biosample.
pub fn audit_replicate_biosample(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed_or_revoked(experiment) {
        return Vec::new();
    }
    let mut by_bio_rep: HashMap<u32, &str> = HashMap::new();
    let mut used: Vec<&str> = Vec::new();
    for rep in experiment.replicates() {
        let Some(biosample) = rep.biosample() else {
            continue;
        };
        let accession = biosample.accession.as_str();
        match by_bio_rep.get(&rep.biological_replicate_number) {
            None => {
                by_bio_rep.insert(rep.biological_replicate_number, accession);
                if used.contains(&accession) {
                    return vec![Finding::internal_action(
                        "biological replicates with identical biosample",
                        format!(
                            "Experiment {} has multiple biological replicates associated with \
                             the same biosample {}",
                            experiment_link(experiment),
                            entity_link(&biosample.id)
                        ),
                    )];
                }
                used.push(accession);
            }
            Some(&first) => {
                if first != accession
                    && experiment.assay() != "single-cell RNA sequencing assay"
                {
                    return vec![Finding::error(
                        "technical replicates with not identical biosample",
                        format!(
                            "Experiment {} has technical replicates associated with the \
                             different biosamples",
                            experiment_link(experiment)
                        ),
                    )];
                }
            }
        }
    }
    Vec::new()
}

pub fn audit_replicates_without_files(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if experiment.internal_tags.iter().any(|t| t == "DREAM") || is_removed_or_revoked(experiment) {
        return Vec::new();
    }
    if experiment.replicates().is_empty() {
        return Vec::new();
    }
    let index = build_index(&experiment.original_files, &excluded.without("archived"));
    let mut categories: Vec<(&str, (u32, u32), Vec<&str>)> = experiment
        .replicates()
        .iter()
        .filter(|rep| !excluded.contains(&rep.status))
        .map(|rep| {
            (
                rep.id.as_str(),
                (rep.biological_replicate_number, rep.technical_replicate_number),
                Vec::new(),
            )
        })
        .collect();
    for file in index.original_files().iter() {
        let Some(file_rep) = &file.replicate else {
            continue;
        };
        if let Some((_, _, cats)) = categories.iter_mut().find(|(id, _, _)| *id == file_rep.id) {
            cats.push(file.output_category.as_deref().unwrap_or(""));
        }
    }
    let severity = if award_in(experiment, &ctx.standards.awards.legacy) {
        Severity::InternalAction
    } else {
        Severity::Error
    };
    let sequencing = contains(&ctx.standards.assays.sequencing, experiment.assay());

    let mut findings = Vec::new();
    for (rep_id, (bio, tech), cats) in categories {
        let missing = if cats.is_empty() {
            Some("any associated files")
        } else if sequencing && !cats.contains(&"raw data") {
            Some("raw data associated files")
        } else {
            None
        };
        if let Some(what) = missing {
            findings.push(Finding::new(
                "missing raw data in replicate",
                format!(
                    "This experiment contains a replicate [{bio},{tech}] {} without {what}.",
                    entity_link(rep_id)
                ),
                severity,
            ));
        }
    }
    findings
}

fn display_or_unknown(value: Option<&str>) -> &str {
    value.unwrap_or("unknown")
}

/// Non-human biological replicates should come from one strain, age and sex.
pub fn audit_isogeneity(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed_or_revoked(experiment) {
        return Vec::new();
    }
    let replicates = experiment.replicates();
    if replicates
        .iter()
        .filter_map(|r| r.library.as_ref())
        .any(|lib| lib.mixed_biosamples.is_some())
    {
        return Vec::new();
    }
    let mut findings = Vec::new();
    if experiment.replication_type.is_none() {
        findings.push(Finding::internal_action(
            "undetermined replication_type",
            format!(
                "In experiment {} the replication_type cannot be determined",
                experiment_link(experiment)
            ),
        ));
    }
    if replicates.len() < 2 {
        return findings;
    }

    let mut accessions: HashSet<&str> = HashSet::new();
    let mut ages: BTreeSet<&str> = BTreeSet::new();
    let mut sexes: BTreeSet<&str> = BTreeSet::new();
    let mut donors: BTreeSet<&str> = BTreeSet::new();
    let mut species = None;
    for rep in replicates {
        // without the full library/biosample chain the structure is unknown
        let Some(biosample) = rep.biosample() else {
            return findings;
        };
        accessions.insert(&biosample.accession);
        ages.insert(display_or_unknown(biosample.age_display.as_deref()));
        sexes.insert(display_or_unknown(biosample.sex.as_deref()));
        if let Some(donor) = &biosample.donor {
            donors.insert(&donor.id);
        }
        species = biosample.organism.as_deref();
    }
    if accessions.len() < 2 || species == Some("/organisms/human/") {
        return findings;
    }

    if donors.len() > 1 {
        findings.push(Finding::error(
            "inconsistent donor",
            format!(
                "Replicates of this experiment were prepared using biosamples from different \
                 strains {}.",
                entity_links(donors.iter().copied())
            ),
        ));
    }
    if ages.len() > 1 {
        findings.push(Finding::not_compliant(
            "inconsistent age",
            format!(
                "Replicates of this experiment were prepared using biosamples of different ages {}.",
                bracketed(&ages)
            ),
        ));
    }
    if sexes.len() > 1 {
        findings.push(Finding::not_compliant(
            "inconsistent sex",
            format!(
                "Replicates of this experiment were prepared using biosamples of different sexes {}.",
                bracketed(&sexes)
            ),
        ));
    }
    findings
}

fn spread(values: &BTreeSet<u64>) -> (u64, u64) {
    let min = values.iter().next().copied().unwrap_or(0);
    let max = values.iter().next_back().copied().unwrap_or(0);
    (min, max)
}

pub fn audit_consistent_sequencing_runs(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    if is_removed_or_revoked(experiment) || experiment.replicates().is_empty() {
        return Vec::new();
    }
    let chip = experiment.assay_is(&CHIP_ASSAYS);
    let mut read_lengths: BTreeMap<u32, BTreeSet<u64>> = BTreeMap::new();
    let mut run_types: BTreeMap<u32, BTreeSet<&str>> = BTreeMap::new();
    for fastq in index.fastq_files().iter() {
        let Some(bio_rep) = fastq
            .replicate
            .as_ref()
            .and_then(|r| r.biological_replicate_number)
        else {
            continue;
        };
        if let Some(length) = fastq.read_length {
            read_lengths.entry(bio_rep).or_default().insert(length);
        }
        if chip {
            if let Some(run_type) = fastq.run_type.as_deref() {
                run_types.entry(bio_rep).or_default().insert(run_type);
            }
        }
    }

    let threshold = if ctx.standards.is_dnase_term(experiment.assay_term_id.as_deref()) {
        9
    } else {
        2
    };
    let link = experiment_link(experiment);
    let mut findings = Vec::new();
    for (rep, lengths) in &read_lengths {
        let (min, max) = spread(lengths);
        if max - min > threshold {
            findings.push(Finding::warning(
                "mixed read lengths",
                format!(
                    "Biological replicate {rep} in experiment {link} has mixed sequencing read \
                     lengths {}.",
                    bracketed(lengths)
                ),
            ));
        }
    }
    let reps: Vec<(&u32, &BTreeSet<u64>)> = read_lengths.iter().collect();
    for (i, (rep_i, lengths_i)) in reps.iter().enumerate() {
        for (rep_j, lengths_j) in &reps[i + 1..] {
            let (i_min, i_max) = spread(lengths_i);
            let (j_min, j_max) = spread(lengths_j);
            if i_max.saturating_sub(j_min) > threshold || j_max.saturating_sub(i_min) > threshold {
                findings.push(Finding::warning(
                    "mixed read lengths",
                    format!(
                        "Biological replicate {rep_i} in experiment {link} has sequencing read \
                         lengths {} that differ from replicate {rep_j}, which has {} sequencing \
                         read lengths.",
                        bracketed(*lengths_i),
                        bracketed(*lengths_j)
                    ),
                ));
            }
        }
    }

    if chip {
        for (rep, types) in &run_types {
            if types.len() > 1 {
                findings.push(Finding::warning(
                    "mixed run types",
                    format!(
                        "Biological replicate {rep} in experiment {link} has mixed endedness {}.",
                        bracketed(types)
                    ),
                ));
            }
        }
        let reps: Vec<(&u32, &BTreeSet<&str>)> = run_types.iter().collect();
        for (i, (rep_i, types_i)) in reps.iter().enumerate() {
            for (rep_j, types_j) in &reps[i + 1..] {
                if types_i != types_j {
                    findings.push(Finding::warning(
                        "mixed run types",
                        format!(
                            "Biological replicate {rep_i} in experiment {link} has endedness {} \
                             that differ from replicate {rep_j}, which has {}.",
                            bracketed(*types_i),
                            bracketed(*types_j)
                        ),
                    ));
                }
            }
        }
    }
    findings
}

/// In-progress experiments whose every replicate has submitted reads, but
/// too few of them.
pub fn audit_low_read_count(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    let standards = ctx.standards;
    if experiment.status != "in progress"
        || standards.minimal_read_depth_for(experiment.assay()).is_none()
    {
        return Vec::new();
    }
    let rfa = experiment.award_rfa();
    if rfa == Some("modERN") || (rfa == Some("modENCODE") && experiment.assay() != "ChIP-seq") {
        return Vec::new();
    }
    if experiment.replicates().is_empty() {
        return Vec::new();
    }

    let mut replicate_reads: Vec<(&str, u32, u64)> = experiment
        .replicates()
        .iter()
        .filter(|rep| rep.status != "deleted")
        .map(|rep| (rep.id.as_str(), rep.biological_replicate_number, 0))
        .collect();
    let mut submitted: HashSet<&str> = HashSet::new();
    for fastq in index.fastq_files().iter() {
        if FAILED_UPLOAD_STATUSES.contains(&fastq.status.as_str()) {
            continue;
        }
        let (Some(read_count), Some(file_rep)) = (fastq.read_count, fastq.replicate.as_ref())
        else {
            continue;
        };
        if read_count == 0 {
            continue;
        }
        submitted.insert(&file_rep.id);
        // paired-end runs are counted as submitted, not halved
        if let Some(entry) = replicate_reads.iter_mut().find(|(id, _, _)| *id == file_rep.id) {
            entry.2 += read_count;
        }
    }
    if replicate_reads.is_empty()
        || replicate_reads
            .iter()
            .any(|(id, _, _)| !submitted.contains(id))
    {
        return Vec::new();
    }

    let key = if rfa == Some("modENCODE") {
        "modENCODE-chip"
    } else {
        experiment.assay()
    };
    let Some(minimal) = standards.minimal_read_depth_for(key) else {
        return Vec::new();
    };
    let (part_of, totals): (&str, Vec<(String, u64)>) =
        if key != "modENCODE-chip" && experiment.assay_is(&BIO_REP_DEPTH_ASSAYS) {
            let mut by_bio: Vec<(u32, u64)> = Vec::new();
            for (_, bio, reads) in &replicate_reads {
                match by_bio.iter_mut().find(|(b, _)| b == bio) {
                    Some(entry) => entry.1 += reads,
                    None => by_bio.push((*bio, *reads)),
                }
            }
            (
                "biological replicate",
                by_bio.into_iter().map(|(b, r)| (b.to_string(), r)).collect(),
            )
        } else {
            (
                "replicate",
                replicate_reads
                    .iter()
                    .map(|(id, _, r)| (entity_link(id), *r))
                    .collect(),
            )
        };

    totals
        .into_iter()
        .filter(|(_, reads)| *reads < minimal)
        .map(|(rep, reads)| {
            Finding::warning(
                "low read count",
                format!(
                    "The cumulative number of reads in {part_of} {rep} of experiment {} is \
                     {reads}. That is lower than the minimal expected read depth of {minimal} \
                     for this type of assay.",
                    experiment_link(experiment)
                ),
            )
        })
        .collect()
}
