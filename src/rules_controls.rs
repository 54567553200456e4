//! Rules about control experiments: presence, platform compatibility,
//! biosample match and ChIP-seq control read depth.

use crate::dispatch::AuditContext;
use crate::files_index::{build_index, ExcludedStatuses, FilesIndex};
use crate::formatter::{audit_link, bracketed, entity_link, entity_links};
use crate::provenance::derived_from_of_format;
use crate::rules::{
    award_in, experiment_link, is_removed, is_removed_or_revoked, organism_name, platforms_used,
    CHIP_ASSAYS,
};
use crate::standards::{contains, Standards};
use crate::thresholds::{evaluate_tiered_threshold, ThresholdContext, Tiers};
use assay_audit_protocol::{ControlDataset, Experiment, File, Finding, Severity};
use std::collections::HashMap;

const POSSIBLE_CONTROLS_PREAMBLE: &str = "possible_controls is a list of experiment(s) that can \
    serve as analytical controls for a given experiment.";

pub fn audit_platform_mismatches(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    let standards = ctx.standards;
    if is_removed(experiment)
        || standards.is_dnase_term(experiment.assay_term_id.as_deref())
        || index.original_files().is_empty()
    {
        return Vec::new();
    }
    let platforms = platforms_used(index, standards);
    if platforms.len() > 1 {
        return vec![Finding::warning(
            "inconsistent platforms",
            format!(
                "This experiment contains data produced on incompatible platforms {}.",
                bracketed(&platforms)
            ),
        )];
    }
    let Some(platform) = platforms.first() else {
        return Vec::new();
    };

    let mut findings = Vec::new();
    for control in &experiment.possible_controls {
        if control.original_files.is_empty() {
            continue;
        }
        let control_index = build_index(&control.original_files, &index.excluded);
        let control_platforms = platforms_used(&control_index, standards);
        let detail = match control_platforms.len() {
            0 => continue,
            1 if control_platforms.contains(platform) => continue,
            1 => format!(
                "{POSSIBLE_CONTROLS_PREAMBLE} Experiment {} found in possible_controls list of \
                 this experiment contains data produced on platform {} which is not compatible \
                 with platform {platform} used in this experiment.",
                entity_link(&control.id),
                control_platforms.iter().next().map(String::as_str).unwrap_or_default(),
            ),
            _ => format!(
                "{POSSIBLE_CONTROLS_PREAMBLE} Experiment {} found in possible_controls list of \
                 this experiment contains data produced on platform(s) {} which are not \
                 compatible with platform {platform} used in this experiment.",
                entity_link(&control.id),
                bracketed(&control_platforms),
            ),
        };
        findings.push(Finding::warning("inconsistent platforms", detail));
    }
    findings
}

/// ChIP-seq experiments need an input library control, or for epitope
/// tagged experiments an input library or wild type control.
pub fn audit_chip_control(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _index: &FilesIndex<'_>,
) -> Vec<Finding> {
    if !award_in(experiment, &ctx.standards.awards.chip_control)
        || is_removed_or_revoked(experiment)
        || !experiment.assay_is(&CHIP_ASSAYS)
        || experiment.is_control()
        || experiment.possible_controls.is_empty()
    {
        return Vec::new();
    }
    let link = experiment_link(experiment);
    let mut has_input = false;
    let mut has_wild_type = false;
    for control in &experiment.possible_controls {
        let control_type = control.control_type.as_deref().filter(|t| !t.is_empty());
        if control_type.is_none() && control.is_experiment() {
            return vec![Finding::error(
                "invalid possible_control",
                format!(
                    "Experiment {link} is ChIP-seq but its control {} does not have a valid \
                     \"control_type\".",
                    entity_link(&control.id)
                ),
            )];
        }
        match control_type {
            Some("input library") => has_input = true,
            Some("wild type") => has_wild_type = true,
            _ => {}
        }
        if has_input && has_wild_type {
            break;
        }
    }

    let tagged = !experiment.protein_tags.is_empty();
    let controls = entity_links(experiment.possible_controls.iter().map(|c| c.id.as_str()));
    if !has_input && !tagged {
        return vec![Finding::not_compliant(
            "missing input control",
            format!(
                "ChIP-seq experiment {link} is required to specify at least one \"input \
                 library\" control experiment. None of the experiments listed as possible \
                 controls ({controls}) satisfied this requirement."
            ),
        )];
    }
    if tagged && !has_input && !has_wild_type {
        return vec![Finding::not_compliant(
            "missing input control",
            format!(
                "Epitope-tagged ChIP-seq experiment {link} is required to specify either \
                 \"input library\" or \"wild-type\" as a control experiment. None of the \
                 experiments listed as possible controls ({controls}) satisfied this \
                 requirement."
            ),
        )];
    }
    Vec::new()
}

fn is_matching_biosample_control(control: &ControlDataset, term_id: Option<&str>) -> bool {
    let ontologies = control.ontologies();
    if control.is_experiment() || control.primary_type() == Some("Annotation") {
        return ontologies.first().and_then(|o| o.term_id.as_deref()) == term_id;
    }
    !ontologies.is_empty() && ontologies.iter().all(|o| o.term_id.as_deref() == term_id)
}

/// Assays that need controls must list them, and controls must be on the
/// experiment's biosample.
pub fn audit_control_biosample(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    let awards = &ctx.standards.awards;
    if !award_in(experiment, &awards.control)
        || is_removed(experiment)
        || !contains(&ctx.standards.assays.control_required, experiment.assay())
        || (experiment.assay() == "single-cell RNA sequencing assay"
            && award_in(experiment, &awards.single_cell_control_exempt))
        || experiment.is_control()
    {
        return Vec::new();
    }
    let severity = if experiment.assay_is(&["CAGE", "RAMPAGE"]) || award_in(experiment, &awards.legacy) {
        Severity::NotCompliant
    } else {
        Severity::Error
    };
    let mut findings = Vec::new();
    if experiment.possible_controls.is_empty() {
        findings.push(Finding::new(
            "missing possible_controls",
            format!(
                "{POSSIBLE_CONTROLS_PREAMBLE} {} experiments require a value in \
                 possible_controls. This experiment should be associated with at least one \
                 control experiment, but has no specified values in the possible_controls list.",
                experiment.assay()
            ),
            severity,
        ));
    }

    let term_id = experiment.biosample_term_id();
    let term_name = experiment.biosample_term_name();
    let mismatch = |control: &ControlDataset, control_term: &str| {
        Finding::error(
            "inconsistent control",
            format!(
                "The specified control {} for this experiment is on {control_term}, but this \
                 experiment is done on {term_name}.",
                entity_link(&control.id)
            ),
        )
    };
    for control in &experiment.possible_controls {
        if control.is_series_or_project() {
            for ontology in control.ontologies() {
                if ontology.term_id.as_deref() != term_id {
                    findings.push(mismatch(control, ontology.term_name.as_deref().unwrap_or("")));
                }
            }
            continue;
        }
        if !is_matching_biosample_control(control, term_id) {
            let control_term = control
                .ontologies()
                .first()
                .and_then(|o| o.term_name.as_deref())
                .unwrap_or("");
            findings.push(mismatch(control, control_term));
        }
        // only the first non-series control is compared
        break;
    }
    findings
}

/// Usable fragments recorded on a control alignment, from its first
/// quality metric of the filtered stage (or without a stage) that carries
/// a read total. Paired data counts fragments, not reads.
pub fn chip_control_read_depth(bam: &File, standards: &Standards) -> Option<u64> {
    if matches!(bam.status.as_str(), "deleted" | "replaced")
        || !bam.has_format("bam")
        || !matches!(bam.output_type.as_deref(), Some("alignments" | "redacted alignments"))
        || !bam
            .lab
            .as_deref()
            .is_some_and(|lab| contains(&standards.chip_read_depth_labs, lab))
    {
        return None;
    }
    let metric = bam.quality_metrics.iter().find(|m| {
        (m.has("total_reads") || m.has("total"))
            && matches!(m.processing_stage.as_deref(), None | Some("filtered"))
    })?;
    let total = metric
        .number("total_reads")
        .or_else(|| metric.number("total"))?;
    let depth = if metric.has("read1") && metric.has("read2") {
        (total / 2.0).trunc()
    } else {
        total
    };
    (depth > 0.0).then_some(depth as u64)
}

fn control_target_failures(control: &ControlDataset, bam: &File) -> Vec<Finding> {
    if !control.is_experiment() {
        return Vec::new();
    }
    let output_type = bam.output_type_or_empty();
    let bam_link = entity_link(&bam.id);
    let mut failures = Vec::new();
    match control.control_type.as_deref().filter(|t| !t.is_empty()) {
        None => failures.push(Finding::warning(
            "missing control_type of control experiment",
            format!("Control {output_type} file {bam_link} has no control_type specified."),
        )),
        Some(control_type)
            if !control_type.contains("input library") && !control_type.contains("wild type") =>
        {
            failures.push(Finding::warning(
                "improper control_type of control experiment",
                format!(
                    "Control {output_type} file {bam_link} has a wrong control type \
                     {control_type} which is not \"input library\" or \"wild type\"."
                ),
            ))
        }
        Some(_) => {}
    }
    let targets = control.targets();
    if !targets.is_empty() {
        let names = targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ");
        failures.push(Finding::warning(
            "unexpected target of control experiment",
            format!("Control {output_type} file {bam_link} has unexpected target {names} specified."),
        ));
    }
    failures
}

/// Whether the control alignment was produced by one of the ChIP-seq
/// control pipelines or analysis steps. An alignment missing from the
/// control's own index does not qualify.
fn is_control_pipeline_alignment(bam: &File, control_index: &FilesIndex<'_>, standards: &Standards) -> bool {
    let Some(alignment) = control_index.alignments().get(&bam.id) else {
        return false;
    };
    let pipelines = &standards.pipelines;
    alignment
        .pipeline_titles()
        .iter()
        .any(|title| contains(&pipelines.chip_control, title))
        || alignment
            .analysis_step()
            .and_then(|step| step.title.as_deref())
            .is_some_and(|title| contains(&pipelines.chip_control_analysis_steps, title))
}

struct ControlTarget<'e> {
    name: &'e str,
    investigated_as: Vec<&'e str>,
}

impl ControlTarget<'_> {
    fn tiers<'s>(&self, standards: &'s Standards) -> (&'s Tiers, String, String) {
        let depth = &standards.chip_control_read_depth;
        if self.investigated_as.contains(&"broad histone mark") {
            (&depth.broad, "broad histone mark".to_string(), self.name.to_string())
        } else if self.investigated_as.contains(&"narrow histone mark") {
            (&depth.narrow, "narrow histone mark".to_string(), self.name.to_string())
        } else {
            (
                &depth.transcription_factor,
                self.name.to_string(),
                "and investigated as a transcription factor".to_string(),
            )
        }
    }
}

struct ControlAlignment<'a> {
    file_id: &'a str,
    depth: u64,
    dataset: &'a str,
}

fn millions(value: u64) -> u64 {
    value / 1_000_000
}

fn control_read_depth_finding(
    peaks: &File,
    depth: u64,
    alignments: &[ControlAlignment<'_>],
    target: &ControlTarget<'_>,
    standards: &Standards,
) -> Option<Finding> {
    if alignments.is_empty() {
        return Some(Finding::error(
            "missing control alignments",
            format!(
                "The peaks file {} produced by ENCODE uniformly processing ChIP-seq pipeline \
                 has no valid control alignments specified.",
                entity_link(&peaks.id)
            ),
        ));
    }
    let details = alignments
        .iter()
        .map(|a| {
            format!(
                "file {} from control experiment {} has {} usable fragments",
                entity_link(a.file_id),
                entity_link(a.dataset),
                a.depth
            )
        })
        .collect::<Vec<_>>()
        .join(";");
    let prefix = match peaks.assembly.as_deref() {
        Some(assembly) => format!(
            "Control alignment files ({details}) mapped to {assembly} assembly have in \
             aggregate {depth} usable fragments. "
        ),
        None => format!("Control alignment files ({details}) have in aggregate {depth} usable fragments. "),
    };
    let (tiers, first, second) = target.tiers(standards);
    let detail = format!(
        "{prefix}The minimum ENCODE standard for a control of ChIP-seq assays targeting \
         {first} {second} is {} million usable fragments, the recommended number of usable \
         fragments is > {} million. (See {} )",
        millions(tiers.minimal),
        millions(tiers.recommended),
        audit_link("ENCODE ChIP-seq data standards", &standards.standards_links.chip)
    );
    evaluate_tiered_threshold(
        depth,
        tiers,
        ThresholdContext::new("read depth", detail).qualified("control"),
    )
}

/// Sums the usable fragments of the control alignments behind each
/// single-replicate peaks file of the processing pipeline and grades the
/// total against the tiers for the target class.
pub fn audit_chip_control_read_depth(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    let standards = ctx.standards;
    if !standards.is_chip_term(experiment.assay_term_id.as_deref()) {
        return Vec::new();
    }
    let target = match (&experiment.target, experiment.control_type.as_deref()) {
        (Some(target), _) if !target.name.is_empty() => ControlTarget {
            name: &target.name,
            investigated_as: target.investigated_as.iter().map(String::as_str).collect(),
        },
        (_, Some(control_type)) if !control_type.is_empty() => {
            let organism = organism_name(experiment.replicates(), &ExcludedStatuses::default());
            if matches!(organism, Some("human" | "mouse")) {
                return Vec::new();
            }
            ControlTarget {
                name: control_type,
                investigated_as: vec![control_type],
            }
        }
        _ => return Vec::new(),
    };
    if experiment.possible_controls.is_empty() {
        return Vec::new();
    }
    let controls: HashMap<&str, (&ControlDataset, FilesIndex<'_>)> = experiment
        .possible_controls
        .iter()
        .map(|c| (c.id.as_str(), (c, build_index(&c.original_files, &index.excluded))))
        .collect();

    let peaks_files = index.peaks_files().iter().filter(|peaks| {
        peaks
            .award
            .as_ref()
            .and_then(|a| a.rfa.as_deref())
            .is_some_and(|rfa| contains(&standards.awards.control_read_depth, rfa))
            && standards.is_processing_lab(peaks.lab.as_deref())
            && peaks.biological_replicates.len() == 1
    });

    let mut findings = Vec::new();
    for peaks in peaks_files {
        let mut alignments = Vec::new();
        let mut cumulative = 0u64;
        let mut missing_metric = false;
        let mut target_failures = false;
        for bam in derived_from_of_format([peaks], index, "bam") {
            let Some(dataset) = bam.dataset.as_deref().filter(|d| *d != experiment.id) else {
                continue;
            };
            let Some((control, control_index)) = controls.get(dataset) else {
                continue;
            };
            if !is_control_pipeline_alignment(bam, control_index, standards) {
                continue;
            }
            let failures = control_target_failures(control, bam);
            if !failures.is_empty() {
                target_failures = true;
                findings.extend(failures);
                continue;
            }
            match chip_control_read_depth(bam, standards) {
                Some(depth) => {
                    cumulative += depth;
                    alignments.push(ControlAlignment {
                        file_id: &bam.id,
                        depth,
                        dataset,
                    });
                }
                None => {
                    missing_metric = true;
                    findings.push(Finding::warning(
                        "missing control quality metric",
                        format!(
                            "Control {} file {} has no associated quality metric, preventing \
                             calculation of the read depth.",
                            bam.output_type_or_empty(),
                            entity_link(&bam.id)
                        ),
                    ));
                }
            }
        }
        // an 'empty' control target is not graded
        if missing_metric || target_failures || target.name == "empty" {
            continue;
        }
        findings.extend(control_read_depth_finding(
            peaks,
            cumulative,
            &alignments,
            &target,
            standards,
        ));
    }
    findings
}
