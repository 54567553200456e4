//! Per-assay data standards: read length, sequencing platform and
//! ERCC spike-ins, dispatched by assay.

use crate::dispatch::AuditContext;
use crate::files_index::FilesIndex;
use crate::formatter::entity_link;
use crate::provenance::pipeline_title_lookup;
use crate::rules::{award_in, experiment_link, has_long_fragments, organism_name};
use crate::standards::{contains, Standards};
use crate::thresholds::{evaluate_chip_read_length, evaluate_read_length};
use assay_audit_protocol::{Experiment, File, Finding};

const DNASE_ASSAYS: [&str; 2] = ["DNase-seq", "genetic modification followed by DNase-seq"];
const RNA_ASSAYS: [&str; 14] = [
    "RAMPAGE",
    "RNA-seq",
    "polyA minus RNA-seq",
    "polyA plus RNA-seq",
    "CAGE",
    "shRNA knockdown followed by RNA-seq",
    "siRNA knockdown followed by RNA-seq",
    "CRISPRi followed by RNA-seq",
    "CRISPR genome editing followed by RNA-seq",
    "single-cell RNA sequencing assay",
    "microRNA-seq",
    "small RNA-seq",
    "icSHAPE",
    "long read RNA-seq",
];
const CHIP_STANDARDS_ASSAYS: [&str; 2] = ["ChIP-seq", "Mint-ChIP-seq"];
const WGBS_ASSAY: &str = "whole-genome shotgun bisulfite sequencing";
/// Assays without a standards branch that still pass the dispatcher gate.
const UNGRADED_ASSAYS: [&str; 2] = ["ATAC-seq", "ChIA-PET"];

fn has_standards(experiment: &Experiment) -> bool {
    experiment.assay_is(&DNASE_ASSAYS)
        || experiment.assay_is(&RNA_ASSAYS)
        || experiment.assay_is(&CHIP_STANDARDS_ASSAYS)
        || experiment.assay() == WGBS_ASSAY
        || experiment.assay_is(&UNGRADED_ASSAYS)
}

fn has_replicates(experiment: &Experiment) -> bool {
    experiment.replicates.as_deref().is_some_and(|reps| !reps.is_empty())
}

/// Grades the fastq files and libraries of experiments from consortium
/// awards against the standards of their assay. Only human and mouse
/// experiments have standards.
pub fn audit_assay_standards(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    let standards = ctx.standards;
    if !award_in(experiment, &standards.awards.assay_standards)
        || experiment.status_in(&["revoked", "deleted", "replaced"])
        || !has_standards(experiment)
        || experiment.original_files.is_empty()
        || !has_replicates(experiment)
    {
        return Vec::new();
    }
    let organism = match organism_name(experiment.replicates(), &index.excluded) {
        Some(organism @ ("human" | "mouse")) => organism,
        _ => return Vec::new(),
    };

    if experiment.assay_is(&DNASE_ASSAYS) {
        return dnase_standards(index, standards);
    }
    if experiment.assay_is(&RNA_ASSAYS) {
        return rna_standards(experiment, index, standards);
    }
    if experiment.assay_is(&CHIP_STANDARDS_ASSAYS) {
        return chip_standards(index, standards);
    }
    if experiment.assay() == WGBS_ASSAY {
        return wgbs_read_lengths(index, organism, standards.read_length.wgbs);
    }
    Vec::new()
}

/// modERN ChIP-seq experiments are graded on read length only.
pub fn audit_modern_standards(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    index: &FilesIndex<'_>,
) -> Vec<Finding> {
    if !award_in(experiment, &ctx.standards.awards.modern)
        || experiment.status_in(&["revoked", "deleted", "replaced"])
        || experiment.assay() != "ChIP-seq"
        || index.original_files().is_empty()
        || experiment.replicates.is_none()
    {
        return Vec::new();
    }
    chip_standards(index, ctx.standards)
}

fn dnase_standards(index: &FilesIndex<'_>, standards: &Standards) -> Vec<Finding> {
    let Some(pipeline) = pipeline_title_lookup(
        index.alignments().iter(),
        &standards.pipelines.processed_assemblies,
        &standards.pipelines.dnase,
        &standards.processing_lab,
    ) else {
        return Vec::new();
    };
    index
        .fastq_files()
        .iter()
        .filter_map(|fastq| {
            evaluate_read_length(
                fastq,
                standards.read_length.dnase,
                pipeline,
                &standards.standards_links.dnase,
            )
        })
        .collect()
}

fn platform_finding(fastq: &File, standards: &Standards) -> Option<Finding> {
    let term_id = fastq.platform.as_ref()?.term_id.as_deref()?;
    standards.is_excluded_platform(term_id).then(|| {
        Finding::warning(
            "not compliant platform",
            format!(
                "Reads file {} has not compliant platform (SOLiD) {term_id}.",
                entity_link(&fastq.id)
            ),
        )
    })
}

fn rna_standards(experiment: &Experiment, index: &FilesIndex<'_>, standards: &Standards) -> Vec<Finding> {
    let pipelines = &standards.pipelines;
    let Some(pipeline) = pipeline_title_lookup(
        index.alignments().iter().chain(index.unfiltered_alignments().iter()),
        &pipelines.processed_assemblies,
        &pipelines.rna,
        &standards.processing_lab,
    ) else {
        return Vec::new();
    };
    let link = standards.rna_standards_link(pipeline);
    let mut findings = Vec::new();
    for fastq in index.fastq_files().iter() {
        if !contains(&pipelines.rna_read_length_exempt, pipeline) {
            findings.extend(evaluate_read_length(fastq, standards.read_length.rna, pipeline, link));
        }
        findings.extend(platform_finding(fastq, standards));
    }
    if contains(&pipelines.long_rna, pipeline) {
        findings.extend(ercc_spikeins(experiment, pipeline, standards));
    }
    findings
}

fn chip_standards(index: &FilesIndex<'_>, standards: &Standards) -> Vec<Finding> {
    index
        .fastq_files()
        .iter()
        .filter_map(|fastq| evaluate_chip_read_length(fastq, &standards.read_length.chip))
        .collect()
}

fn wgbs_read_lengths(index: &FilesIndex<'_>, organism: &str, threshold: u64) -> Vec<Finding> {
    index
        .fastq_files()
        .iter()
        .filter_map(|fastq| {
            let read_length = fastq.read_length.filter(|&l| l < threshold)?;
            Some(Finding::not_compliant(
                "insufficient read length",
                format!(
                    "Fastq file {} has read length of {read_length}bp, while the recommended \
                     read length for {organism} data is > {threshold}bp.",
                    entity_link(&fastq.id)
                ),
            ))
        })
        .collect()
}

/// Long-fragment libraries processed by a long RNA pipeline need the
/// standard ERCC spike-in mix.
fn ercc_spikeins(experiment: &Experiment, pipeline: &str, standards: &Standards) -> Vec<Finding> {
    let ercc = &standards.ercc_spikein_files;
    let single_cell = experiment.assay() == "single-cell RNA sequencing assay";
    let link = experiment_link(experiment);
    let mut findings = Vec::new();
    for library in experiment.replicates().iter().filter_map(|rep| rep.library.as_ref()) {
        if !has_long_fragments(library) {
            continue;
        }
        let spikeins = library.spikeins_used.as_deref().unwrap_or(&[]);
        let has_ercc = spikeins.iter().flat_map(|s| s.files.iter()).any(|file| {
            *file == ercc.bulk || (single_cell && *file == ercc.single_cell)
        });
        if has_ercc {
            continue;
        }
        let library_link = entity_link(&library.id);
        findings.push(if spikeins.is_empty() {
            Finding::not_compliant(
                "missing spikeins",
                format!(
                    "Library {library_link} in experiment {link} that was processed by {pipeline} \
                     pipeline requires ERCC spike-in to be used in its preparation."
                ),
            )
        } else {
            Finding::warning(
                "missing spikeins",
                format!(
                    "Library {library_link} in experiment {link} that was processed by {pipeline} \
                     pipeline requires standard ERCC spike-in to be used in its preparation."
                ),
            )
        });
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files_index::{build_index, ExcludedStatuses};
    use crate::registry::StaticRegistry;
    use crate::rules::fixtures::{categories, experiment};
    use assay_audit_protocol::Severity;
    use serde_json::{json, Value};

    fn run(
        rule: fn(&Experiment, &AuditContext<'_>, &FilesIndex<'_>) -> Vec<Finding>,
        exp: &Experiment,
    ) -> Vec<Finding> {
        let standards = Standards::builtin();
        let registry = StaticRegistry::default();
        let excluded = ExcludedStatuses::for_experiment_status(&exp.status);
        let index = build_index(&exp.original_files, &excluded);
        rule(exp, &AuditContext::new(&registry, &standards), &index)
    }

    fn standards_experiment(assay: &str, award: &str, organism: &str, files: Value, library: Value) -> Experiment {
        let mut lib = json!({"@id": "/libraries/ENCLB000AAA/", "accession": "ENCLB000AAA", "status": "released",
            "biosample": {"@id": "/biosamples/B1/", "accession": "B1", "status": "released", "organism": organism}});
        if let (Some(lib), Some(extra)) = (lib.as_object_mut(), library.as_object()) {
            lib.extend(extra.clone());
        }
        experiment(json!({
            "@id": "/experiments/ENCSR000STD/", "status": "released",
            "assay_term_name": assay, "award": {"rfa": award},
            "replicates": [{"@id": "/replicates/r1/", "status": "released",
                "biological_replicate_number": 1, "technical_replicate_number": 1, "library": lib}],
            "original_files": files
        }))
    }

    fn fastq(id: &str, read_length: Option<u64>, platform: &str) -> Value {
        json!({"@id": id, "status": "released", "file_format": "fastq", "output_type": "reads",
            "output_category": "raw data", "read_length": read_length,
            "platform": {"@id": "/platforms/x/", "term_id": platform}})
    }

    fn pipeline_bam(title: &str) -> Value {
        json!({"@id": "/files/BAM/", "status": "released", "file_format": "bam", "output_type": "alignments",
            "assembly": "GRCh38", "lab": "/labs/encode-processing-pipeline/",
            "analysis_step_version": {"analysis_step": {"pipelines": [{"@id": "/pipelines/p/", "title": title}]}}})
    }

    #[test]
    fn test_chip_read_length_ladder() {
        let files = json!([
            fastq("/files/F1/", Some(20), "OBI:0002002"),
            fastq("/files/F2/", Some(30), "OBI:0002002"),
            fastq("/files/F3/", Some(40), "OBI:0002002"),
            fastq("/files/F4/", Some(50), "OBI:0002002"),
            fastq("/files/F5/", None, "OBI:0002002")
        ]);
        let exp = standards_experiment("ChIP-seq", "ENCODE4", "/organisms/human/", files, json!({}));
        assert_eq!(
            categories(&run(audit_assay_standards, &exp)),
            [
                "extremely low read length",
                "insufficient read length",
                "low read length",
                "missing read_length"
            ]
        );
    }

    #[test]
    fn test_standards_need_human_or_mouse() {
        let files = json!([fastq("/files/F1/", Some(20), "OBI:0002002")]);
        let exp = standards_experiment("ChIP-seq", "ENCODE4", "/organisms/dmelanogaster/", files, json!({}));
        assert!(run(audit_assay_standards, &exp).is_empty());
    }

    #[test]
    fn test_modern_chip_uses_chip_ladder() {
        let files = json!([fastq("/files/F1/", Some(30), "OBI:0002002")]);
        let exp = standards_experiment("ChIP-seq", "modERN", "/organisms/celegans/", files, json!({}));
        assert_eq!(categories(&run(audit_modern_standards, &exp)), ["insufficient read length"]);
        assert!(run(audit_assay_standards, &exp).is_empty());
    }

    #[test]
    fn test_dnase_requires_known_pipeline() {
        let short = fastq("/files/F1/", Some(30), "OBI:0002002");
        let without = standards_experiment("DNase-seq", "ENCODE3", "/organisms/mouse/", json!([short.clone()]), json!({}));
        assert!(run(audit_assay_standards, &without).is_empty());

        let with = standards_experiment(
            "DNase-seq",
            "ENCODE3",
            "/organisms/mouse/",
            json!([short, pipeline_bam("DNase-seq pipeline")]),
            json!({}),
        );
        let findings = run(audit_assay_standards, &with);
        assert_eq!(categories(&findings), ["insufficient read length"]);
        assert!(findings[0].detail.contains("{ENCODE DNase-seq pipeline data standards|/data-standards/dnase-seq/}"));
    }

    #[test]
    fn test_long_rna_platform_and_ercc() {
        let files = json!([
            fastq("/files/F1/", Some(100), "OBI:0002024"),
            pipeline_bam("Bulk RNA-seq")
        ]);
        let library = json!({"size_range": ">200", "spikeins_used": [{"@id": "/references/R1/", "files": ["/files/OTHER/"]}]});
        let exp = standards_experiment("RNA-seq", "ENCODE4", "/organisms/human/", files.clone(), library);
        let findings = run(audit_assay_standards, &exp);
        assert_eq!(categories(&findings), ["not compliant platform", "missing spikeins"]);
        assert_eq!(findings[1].severity, Severity::Warning);

        let without_spikeins = standards_experiment("RNA-seq", "ENCODE4", "/organisms/human/", files.clone(), json!({"size_range": ">200"}));
        let findings = run(audit_assay_standards, &without_spikeins);
        assert_eq!(findings[1].severity, Severity::NotCompliant);

        let with_ercc = json!({"size_range": ">200", "spikeins_used": [{"@id": "/references/ERCC/", "files": ["/files/ENCFF001RTP/"]}]});
        let exp = standards_experiment("RNA-seq", "ENCODE4", "/organisms/human/", files, with_ercc);
        assert_eq!(categories(&run(audit_assay_standards, &exp)), ["not compliant platform"]);
    }

    #[test]
    fn test_wgbs_read_length() {
        let files = json!([fastq("/files/F1/", Some(90), "OBI:0002002"), fastq("/files/F2/", Some(150), "OBI:0002002")]);
        let exp = standards_experiment(WGBS_ASSAY, "ENCODE3", "/organisms/human/", files, json!({}));
        let findings = run(audit_assay_standards, &exp);
        assert_eq!(categories(&findings), ["insufficient read length"]);
        assert!(findings[0].detail.ends_with("read length for human data is > 100bp."));
    }
}
