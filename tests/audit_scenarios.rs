use assay_audit::dispatch::{
    run_audit, AuditContext, AuditOptions, AuditReport, RuleDescriptor, RuleSet,
};
use assay_audit::files_index::{build_index, ExcludedStatuses, FileCategory};
use assay_audit::protocol::{Experiment, File, Finding, Severity};
use assay_audit::provenance::derived_from_of_format;
use assay_audit::registry::StaticRegistry;
use assay_audit::standards::Standards;
use assay_audit::thresholds::{evaluate_tiered_threshold, ThresholdContext, Tiers};
use assay_audit::{parse_experiment, DEFAULT_INDEX_RULES, DEFAULT_STATUS_RULES};
use serde_json::{json, Value};

fn experiment(value: Value) -> Experiment {
    parse_experiment(&value.to_string()).unwrap()
}

fn audit_with(exp: &Experiment, options: AuditOptions) -> AuditReport {
    let standards = Standards::builtin();
    let registry = StaticRegistry::default().with_term("EFO:0002067", "K562", &[]);
    let ctx = AuditContext::new(&registry, &standards);
    run_audit(exp, &DEFAULT_INDEX_RULES, &DEFAULT_STATUS_RULES, &ctx, options)
}

fn audit(exp: &Experiment) -> AuditReport {
    audit_with(exp, AuditOptions::default())
}

fn with_category<'a>(report: &'a AuditReport, category: &str) -> Vec<&'a Finding> {
    report
        .findings
        .iter()
        .filter(|f| f.category == category)
        .collect()
}

fn replicate(bio: u32, tech: u32, nucleic_acid: &str) -> Value {
    json!({
        "@id": format!("/replicates/r{bio}_{tech}/"),
        "status": "released",
        "biological_replicate_number": bio,
        "technical_replicate_number": tech,
        "library": {
            "@id": format!("/libraries/ENCLB00{bio}{tech}AAA/"),
            "accession": format!("ENCLB00{bio}{tech}AAA"),
            "status": "released",
            "nucleic_acid_term_name": nucleic_acid,
            "biosample": {
                "@id": "/biosamples/ENCBS000AAA/",
                "accession": "ENCBS000AAA",
                "status": "released",
                "organism": "/organisms/human/",
                "biosample_ontology": {"term_id": "EFO:0002067", "term_name": "K562", "classification": "cell line"}
            }
        }
    })
}

fn chip_experiment(classification: &str, replicates: Value) -> Experiment {
    experiment(json!({
        "@id": "/experiments/ENCSR000SCN/",
        "accession": "ENCSR000SCN",
        "status": "released",
        "assay_term_name": "ChIP-seq",
        "assay_term_id": "OBI:0000716",
        "award": {"@id": "/awards/U24/", "rfa": "ENCODE4"},
        "biosample_ontology": {
            "@id": "/biosample-types/cell_line_EFO_0002067/",
            "term_id": "EFO:0002067", "term_name": "K562", "classification": classification
        },
        "target": {"@id": "/targets/CTCF-human/", "name": "CTCF-human", "label": "CTCF",
                   "investigated_as": ["transcription factor"]},
        "replicates": replicates
    }))
}

#[test]
fn test_audit_is_idempotent() {
    let exp = chip_experiment(
        "cell line",
        json!([replicate(1, 1, "DNA"), replicate(2, 1, "RNA")]),
    );
    let first = audit(&exp);
    let second = audit(&exp);
    assert_eq!(first.findings, second.findings);
    assert!(first.rule_failures.is_empty());

    let sequential = audit_with(&exp, AuditOptions { sequential: true });
    assert_eq!(first.findings, sequential.findings);
}

#[test]
fn test_single_biological_replicate_is_unreplicated() {
    let reps = json!([replicate(1, 1, "DNA"), replicate(1, 2, "DNA")]);
    let report = audit(&chip_experiment("cell line", reps.clone()));
    let unreplicated = with_category(&report, "unreplicated experiment");
    assert_eq!(unreplicated.len(), 1);
    assert_eq!(unreplicated[0].severity, Severity::NotCompliant);

    for classification in ["tissue", "primary cell"] {
        let report = audit(&chip_experiment(classification, reps.clone()));
        let unreplicated = with_category(&report, "unreplicated experiment");
        assert_eq!(unreplicated.len(), 1);
        assert_eq!(unreplicated[0].severity, Severity::InternalAction);
    }
}

#[test]
fn test_mixed_nucleic_acids_reported_once() {
    let reps = json!([
        replicate(1, 1, "RNA"),
        replicate(2, 1, "DNA"),
        replicate(3, 1, "DNA"),
        replicate(4, 1, "RNA")
    ]);
    let report = audit(&chip_experiment("cell line", reps));
    let mixed = with_category(&report, "mixed libraries");
    assert_eq!(mixed.len(), 1);
    assert_eq!(mixed[0].severity, Severity::InternalAction);
    assert!(mixed[0].detail.ends_with("mixed nucleic acids [DNA, RNA]."));
}

fn depth_scenario(control: Value) -> Experiment {
    let control_bam = json!({
        "@id": "/files/ENCFF000CBM/", "accession": "ENCFF000CBM", "status": "released",
        "file_format": "bam", "output_type": "alignments", "output_category": "alignment",
        "dataset": "/experiments/ENCSR000CTL/", "lab": "/labs/encode-processing-pipeline/",
        "analysis_step_version": {"analysis_step": {"title": "ChIP seq alignment step", "pipelines": [
            {"@id": "/pipelines/H2/", "title": "Histone ChIP-seq 2", "assay_term_names": ["ChIP-seq"]}
        ]}},
        "quality_metrics": [{"processing_stage": "filtered", "total_reads": 30000000}]
    });
    let mut control = control;
    control["original_files"] = json!([control_bam.clone()]);
    experiment(json!({
        "@id": "/experiments/ENCSR000HIS/", "status": "released",
        "assay_term_name": "ChIP-seq", "assay_term_id": "OBI:0000716",
        "award": {"rfa": "ENCODE4"},
        "target": {"@id": "/targets/H3K27me3-human/", "name": "H3K27me3-human",
                   "investigated_as": ["histone", "broad histone mark"]},
        "possible_controls": [control],
        "original_files": [{
            "@id": "/files/ENCFF000PKS/", "accession": "ENCFF000PKS", "status": "released",
            "file_format": "bed", "output_type": "peaks", "output_category": "annotation",
            "assembly": "GRCh38", "lab": "/labs/encode-processing-pipeline/",
            "award": {"rfa": "ENCODE4"}, "biological_replicates": [1],
            "derived_from": ["/files/ENCFF000CBM/"]
        }],
        "contributing_files": [control_bam]
    }))
}

#[test]
fn test_broad_mark_control_depth_is_insufficient() {
    let control = json!({"@id": "/experiments/ENCSR000CTL/", "@type": ["Experiment", "Dataset", "Item"],
        "control_type": "input library"});
    let report = audit(&depth_scenario(control));
    let insufficient = with_category(&report, "control insufficient read depth");
    assert_eq!(insufficient.len(), 1);
    assert_eq!(insufficient[0].severity, Severity::NotCompliant);
    assert!(with_category(&report, "control low read depth").is_empty());
    assert!(with_category(&report, "control extremely low read depth").is_empty());
}

#[test]
fn test_control_without_control_type_is_not_aggregated() {
    let control = json!({"@id": "/experiments/ENCSR000CTL/", "@type": ["Experiment", "Dataset", "Item"]});
    let report = audit(&depth_scenario(control));
    let missing = with_category(&report, "missing control_type of control experiment");
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Warning);
    assert!(report.findings.iter().all(|f| {
        !(f.category.starts_with("control ") && f.category.ends_with("read depth"))
            && f.category != "missing control alignments"
    }));
}

fn files(value: Value) -> Vec<File> {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_provenance_resolves_own_and_contributing_files() {
    let own = files(json!([
        {"@id": "/files/FQ1/", "accession": "FQ1", "status": "released", "file_format": "fastq", "output_type": "reads"},
        {"@id": "/files/BAM/", "accession": "BAM", "status": "released", "file_format": "bam",
         "output_type": "alignments", "derived_from": ["/files/FQ1/", "/files/FQ2/", "/files/FQ1/"]}
    ]));
    let contributing = files(json!([
        {"@id": "/files/FQ2/", "accession": "FQ2", "status": "released", "file_format": "fastq", "output_type": "reads"}
    ]));
    let excluded = ExcludedStatuses::for_experiment_status("released");
    let index = build_index(&own, &excluded).with_contributing(&contributing);
    let bam = index.alignments().get("/files/BAM/").unwrap();
    let fastqs: Vec<&str> = derived_from_of_format([bam], &index, "fastq")
        .into_iter()
        .filter_map(|f| f.accession.as_deref())
        .collect();
    assert_eq!(fastqs, ["FQ1", "FQ2"]);
}

#[test]
fn test_alignments_are_not_unfiltered() {
    let all = files(json!([
        {"@id": "/files/A/", "status": "released", "file_format": "bam", "output_type": "alignments"},
        {"@id": "/files/B/", "status": "released", "file_format": "bam", "output_type": "redacted alignments"},
        {"@id": "/files/C/", "status": "released", "file_format": "bam", "output_type": "unfiltered alignments"},
        {"@id": "/files/D/", "status": "revoked", "file_format": "bam", "output_type": "alignments"}
    ]));
    let index = build_index(&all, &ExcludedStatuses::for_experiment_status("released"));
    let alignments = index.alignments();
    assert_eq!(alignments.len(), 2);
    for id in ["/files/A/", "/files/B/"] {
        assert!(alignments.contains(id));
        assert!(!index.unfiltered_alignments().contains(id));
    }
    assert!(!index.original_files().contains("/files/D/"));
    assert_eq!(index.bucket(FileCategory::ProcessedData).len(), 3);
}

#[test]
fn test_threshold_boundaries_belong_to_higher_tier() {
    let tiers = Tiers::new(20_000_000, 35_000_000, 45_000_000);
    let severity = |value| {
        evaluate_tiered_threshold(value, &tiers, ThresholdContext::new("read depth", ""))
            .map(|f| f.severity)
    };
    assert_eq!(severity(19_999_999), Some(Severity::Error));
    assert_eq!(severity(20_000_000), Some(Severity::NotCompliant));
    assert_eq!(severity(35_000_000), Some(Severity::Warning));
    assert_eq!(severity(45_000_000), None);
}

#[test]
fn test_failing_rule_does_not_stop_others() {
    fn broken(_: &Experiment, _: &AuditContext<'_>, _: &ExcludedStatuses) -> Vec<Finding> {
        panic!("unexpected shape")
    }
    fn steady(_: &Experiment, _: &AuditContext<'_>, _: &ExcludedStatuses) -> Vec<Finding> {
        vec![Finding::warning("steady", "still runs")]
    }
    let exp = chip_experiment("cell line", json!([]));
    let standards = Standards::builtin();
    let registry = StaticRegistry::default();
    let ctx = AuditContext::new(&registry, &standards);
    let status_rules = RuleSet::new(vec![
        RuleDescriptor::statuses("broken", broken),
        RuleDescriptor::statuses("steady", steady),
    ]);
    let report = run_audit(&exp, &RuleSet::default(), &status_rules, &ctx, AuditOptions::default());
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.rule_failures.len(), 1);
    assert_eq!(report.rule_failures[0].rule, "broken");
    assert_eq!(report.rule_failures[0].message, "unexpected shape");
}
