//! Typed views over the expanded experiment graph.
//!
//! Every nested reference is already resolved by the caller. Attributes the
//! upstream schema does not guarantee are `Option`s or defaulted collections;
//! where audits distinguish "absent" from "empty" the field stays an
//! `Option<Vec<_>>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type EntityId = String;

/// A field that is a single embedded object on some dataset types and a list
/// on others (series and projects).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Award {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub rfa: Option<String>,
    pub component: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BiosampleOntology {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub uuid: Option<String>,
    pub term_id: Option<String>,
    pub term_name: Option<String>,
    pub classification: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetModification {
    pub modification: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub name: String,
    pub label: Option<String>,
    pub investigated_as: Vec<String>,
    pub modifications: Vec<TargetModification>,
}

impl Target {
    pub fn is_investigated_as(&self, class: &str) -> bool {
        self.investigated_as.iter().any(|c| c == class)
    }

    pub fn is_tag(&self) -> bool {
        self.is_investigated_as("tag") || self.is_investigated_as("synthetic tag")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LotReview {
    pub organisms: Vec<String>,
    pub status: String,
    pub detail: Option<String>,
    pub biosample_term_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Antibody {
    #[serde(rename = "@id")]
    pub id: EntityId,
    /// Award identifier; resolved through the registry when needed.
    pub award: Option<EntityId>,
    pub targets: Vec<Target>,
    pub characterizations: Vec<EntityId>,
    pub used_by_biosample_characterizations: Vec<EntityId>,
    pub lot_reviews: Vec<LotReview>,
}

impl Antibody {
    pub fn investigated_as(&self) -> Vec<&str> {
        self.targets
            .iter()
            .flat_map(|t| t.investigated_as.iter().map(String::as_str))
            .collect()
    }

    pub fn targets_tag(&self) -> bool {
        self.targets.iter().any(Target::is_tag)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterizationReview {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Characterization {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub review: Option<CharacterizationReview>,
}

impl Characterization {
    pub fn review_status(&self) -> Option<&str> {
        self.review.as_ref().and_then(|r| r.status.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroducedTag {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticModification {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub status: String,
    pub purpose: Option<String>,
    pub characterizations: Vec<EntityId>,
    pub modified_site_by_target_id: Option<Target>,
    pub introduced_tags: Vec<IntroducedTag>,
}

impl GeneticModification {
    pub fn is_tagging(&self) -> bool {
        self.purpose.as_deref() == Some("tagging")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Donor {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub accession: Option<String>,
}

/// Parent biosample reached through `part_of`, `originated_from` or
/// `pooled_from`. Only its characterizations are embedded; the remaining
/// links are identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentBiosample {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub biosample_ontology: Option<EntityId>,
    pub applied_modifications: Vec<EntityId>,
    pub treatments: Vec<EntityId>,
    pub characterizations: Vec<Characterization>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Biosample {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub accession: String,
    pub status: String,
    pub organism: Option<String>,
    pub age_display: Option<String>,
    pub sex: Option<String>,
    pub donor: Option<Donor>,
    pub biosample_ontology: Option<BiosampleOntology>,
    pub applied_modifications: Vec<GeneticModification>,
    pub characterizations: Vec<Characterization>,
    pub part_of: Option<ParentBiosample>,
    pub originated_from: Option<ParentBiosample>,
    pub pooled_from: Vec<ParentBiosample>,
    pub treatments: Vec<EntityId>,
    pub internal_tags: Vec<String>,
    pub nih_institutional_certification: Option<String>,
    pub perturbed: Option<bool>,
}

impl Biosample {
    /// Organism short name, e.g. `human` for `/organisms/human/`.
    pub fn organism_name(&self) -> Option<&str> {
        self.organism
            .as_deref()
            .and_then(|o| o.split('/').filter(|p| !p.is_empty()).nth(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Spikein {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub files: Vec<EntityId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Library {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub accession: String,
    pub status: String,
    pub nucleic_acid_term_name: Option<String>,
    pub size_range: Option<String>,
    pub average_fragment_size: Option<f64>,
    pub spikeins_used: Option<Vec<Spikein>>,
    pub strand_specificity: Option<String>,
    #[serde(rename = "queried_RNP_size_range")]
    pub queried_rnp_size_range: Option<String>,
    pub biosample: Option<Biosample>,
    pub mixed_biosamples: Option<Vec<EntityId>>,
    pub fragmentation_methods: Vec<String>,
    pub documents: Vec<EntityId>,
    pub rna_integrity_number: Option<f64>,
    pub barcode_details: Option<Value>,
}

impl Library {
    pub fn has_barcode_details(&self) -> bool {
        match &self.barcode_details {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Replicate {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub status: String,
    pub biological_replicate_number: u32,
    pub technical_replicate_number: u32,
    pub library: Option<Library>,
    pub antibody: Option<Antibody>,
}

impl Replicate {
    pub fn biosample(&self) -> Option<&Biosample> {
        self.library.as_ref().and_then(|l| l.biosample.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub title: String,
    pub assay_term_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisStep {
    pub title: Option<String>,
    pub pipelines: Option<Vec<Pipeline>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisStepVersion {
    pub analysis_step: Option<AnalysisStep>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Platform {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub term_id: Option<String>,
    pub term_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileReplicate {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub biological_replicate_number: Option<u32>,
    pub technical_replicate_number: Option<u32>,
}

/// Quality metric attached to a file. Metric values are free-form numeric
/// attributes kept in `values`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMetric {
    #[serde(rename = "@type")]
    pub types: Vec<String>,
    pub uuid: Option<String>,
    pub quality_metric_of: Vec<EntityId>,
    pub processing_stage: Option<String>,
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl QualityMetric {
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn is_of_type(&self, metric_type: &str) -> bool {
        self.types.iter().any(|t| t == metric_type)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct File {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub accession: Option<String>,
    pub status: String,
    pub file_format: Option<String>,
    pub output_type: Option<String>,
    pub output_category: Option<String>,
    pub assembly: Option<String>,
    pub genome_annotation: Option<String>,
    pub lab: Option<String>,
    pub award: Option<Award>,
    pub dataset: Option<EntityId>,
    pub derived_from: Option<Vec<EntityId>>,
    pub replicate: Option<FileReplicate>,
    pub biological_replicates: Vec<u32>,
    pub technical_replicates: Vec<String>,
    pub analysis_step_version: Option<AnalysisStepVersion>,
    pub quality_metrics: Vec<QualityMetric>,
    pub platform: Option<Platform>,
    pub read_length: Option<u64>,
    pub mapped_read_length: Option<u64>,
    pub run_type: Option<String>,
    pub read_count: Option<u64>,
    pub paired_with: Option<EntityId>,
    pub preferred_default: bool,
    pub analyses: Vec<EntityId>,
}

impl File {
    pub fn has_format(&self, format: &str) -> bool {
        self.file_format.as_deref() == Some(format)
    }

    pub fn is_raw_data(&self) -> bool {
        self.output_category.as_deref() == Some("raw data")
    }

    pub fn derived_from_ids(&self) -> &[EntityId] {
        self.derived_from.as_deref().unwrap_or(&[])
    }

    pub fn analysis_step(&self) -> Option<&AnalysisStep> {
        self.analysis_step_version
            .as_ref()
            .and_then(|v| v.analysis_step.as_ref())
    }

    /// Pipelines of the producing analysis step, if the step declares them.
    pub fn pipelines(&self) -> Option<&[Pipeline]> {
        self.analysis_step()
            .and_then(|s| s.pipelines.as_deref())
    }

    pub fn pipeline_titles(&self) -> Vec<&str> {
        self.pipelines()
            .map(|ps| ps.iter().map(|p| p.title.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn output_type_or_empty(&self) -> &str {
        self.output_type.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisFile {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub dataset: Option<EntityId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Analysis {
    #[serde(rename = "@id")]
    pub id: EntityId,
    pub status: String,
    pub files: Vec<AnalysisFile>,
}

/// An entry of `possible_controls`: an experiment, or a series/project whose
/// ontology and target fields are lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlDataset {
    #[serde(rename = "@id")]
    pub id: EntityId,
    #[serde(rename = "@type")]
    pub types: Vec<String>,
    pub accession: Option<String>,
    pub status: String,
    pub control_type: Option<String>,
    pub target: Option<OneOrMany<Target>>,
    pub biosample_ontology: Option<OneOrMany<BiosampleOntology>>,
    pub original_files: Vec<File>,
    pub replicates: Vec<Replicate>,
}

impl ControlDataset {
    pub fn primary_type(&self) -> Option<&str> {
        self.types.first().map(String::as_str)
    }

    pub fn is_experiment(&self) -> bool {
        self.primary_type() == Some("Experiment")
    }

    pub fn is_series_or_project(&self) -> bool {
        self.types.iter().any(|t| t == "Series") || self.primary_type() == Some("Project")
    }

    pub fn targets(&self) -> &[Target] {
        self.target.as_ref().map(OneOrMany::as_slice).unwrap_or(&[])
    }

    pub fn ontologies(&self) -> &[BiosampleOntology] {
        self.biosample_ontology
            .as_ref()
            .map(OneOrMany::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Experiment {
    #[serde(rename = "@id")]
    pub id: EntityId,
    #[serde(rename = "@type")]
    pub types: Vec<String>,
    pub accession: Option<String>,
    pub status: String,
    pub assay_term_name: Option<String>,
    pub assay_term_id: Option<String>,
    pub target: Option<Target>,
    pub control_type: Option<String>,
    pub possible_controls: Vec<ControlDataset>,
    pub biosample_ontology: Option<BiosampleOntology>,
    pub award: Option<Award>,
    pub replicates: Option<Vec<Replicate>>,
    pub internal_tags: Vec<String>,
    pub analyses: Option<Vec<Analysis>>,
    pub original_files: Vec<File>,
    pub contributing_files: Vec<File>,
    pub documents: Vec<EntityId>,
    pub dbxrefs: Vec<String>,
    pub replication_type: Option<String>,
    pub protein_tags: Vec<Value>,
}

impl Experiment {
    /// Replicates, or an empty slice when the attribute is absent.
    pub fn replicates(&self) -> &[Replicate] {
        self.replicates.as_deref().unwrap_or(&[])
    }

    pub fn assay(&self) -> &str {
        self.assay_term_name.as_deref().unwrap_or("")
    }

    pub fn assay_is(&self, names: &[&str]) -> bool {
        names.contains(&self.assay())
    }

    pub fn status_in(&self, statuses: &[&str]) -> bool {
        statuses.contains(&self.status.as_str())
    }

    pub fn award_rfa(&self) -> Option<&str> {
        self.award.as_ref().and_then(|a| a.rfa.as_deref())
    }

    pub fn is_control(&self) -> bool {
        self.control_type.as_deref().map(|c| !c.is_empty()).unwrap_or(false)
    }

    pub fn biosample_term_id(&self) -> Option<&str> {
        self.biosample_ontology
            .as_ref()
            .and_then(|o| o.term_id.as_deref())
    }

    pub fn biosample_term_name(&self) -> &str {
        self.biosample_ontology
            .as_ref()
            .and_then(|o| o.term_name.as_deref())
            .unwrap_or("")
    }

    pub fn biosample_classification(&self) -> Option<&str> {
        self.biosample_ontology
            .as_ref()
            .and_then(|o| o.classification.as_deref())
    }

    /// Distinct biosamples reachable through replicate libraries, keyed by
    /// `@id`; first occurrence wins.
    pub fn biosamples(&self) -> Vec<&Biosample> {
        let mut seen: Vec<&str> = Vec::new();
        let mut out = Vec::new();
        for biosample in self.replicates().iter().filter_map(Replicate::biosample) {
            if seen.contains(&biosample.id.as_str()) {
                continue;
            }
            seen.push(&biosample.id);
            out.push(biosample);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_and_empty_replicates_are_distinct() {
        let absent: Experiment =
            serde_json::from_value(json!({"@id": "/experiments/ENCSR000AAA/", "status": "released"}))
                .unwrap();
        let empty: Experiment = serde_json::from_value(
            json!({"@id": "/experiments/ENCSR000AAB/", "status": "released", "replicates": []}),
        )
        .unwrap();
        assert!(absent.replicates.is_none());
        assert_eq!(empty.replicates.as_deref().map(|r| r.len()), Some(0));
        assert!(absent.replicates().is_empty());
    }

    #[test]
    fn test_control_dataset_accepts_list_or_object_fields() {
        let series: ControlDataset = serde_json::from_value(json!({
            "@id": "/matched-sets/ENCSR000XYZ/",
            "@type": ["MatchedSet", "Series", "Dataset", "Item"],
            "biosample_ontology": [{"term_id": "EFO:0002067", "term_name": "K562"}],
            "target": [{"name": "CTCF-human"}, {"name": "H3K4me3-human"}]
        }))
        .unwrap();
        assert!(series.is_series_or_project());
        assert_eq!(series.ontologies().len(), 1);
        assert_eq!(series.targets().len(), 2);

        let experiment: ControlDataset = serde_json::from_value(json!({
            "@id": "/experiments/ENCSR000CTL/",
            "@type": ["Experiment", "Dataset", "Item"],
            "biosample_ontology": {"term_id": "EFO:0002067"},
            "target": {"name": "Control-human"}
        }))
        .unwrap();
        assert!(experiment.is_experiment());
        assert_eq!(experiment.targets()[0].name, "Control-human");
    }

    #[test]
    fn test_quality_metric_keeps_free_form_numbers() {
        let metric: QualityMetric = serde_json::from_value(json!({
            "@type": ["ChipAlignmentSamstatQualityMetric", "QualityMetric"],
            "uuid": "0f3c",
            "quality_metric_of": ["/files/ENCFF000BAM/"],
            "processing_stage": "filtered",
            "total_reads": 31000000,
            "read1": 15500000
        }))
        .unwrap();
        assert_eq!(metric.number("total_reads"), Some(31_000_000.0));
        assert!(metric.has("read1"));
        assert!(!metric.has("read2"));
        assert!(metric.is_of_type("QualityMetric"));
    }

    #[test]
    fn test_biosamples_without_accession_stay_distinct() {
        let replicate = |n: u32, biosample: &str| {
            json!({"@id": format!("/replicates/r{n}/"), "biological_replicate_number": n,
                   "library": {"@id": format!("/libraries/L{n}/"), "biosample": {"@id": biosample}}})
        };
        let experiment: Experiment = serde_json::from_value(json!({
            "@id": "/experiments/ENCSR000BIO/",
            "replicates": [
                replicate(1, "/biosamples/B1/"),
                replicate(2, "/biosamples/B2/"),
                replicate(3, "/biosamples/B1/")
            ]
        }))
        .unwrap();
        let ids: Vec<&str> = experiment.biosamples().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["/biosamples/B1/", "/biosamples/B2/"]);
    }

    #[test]
    fn test_organism_name_from_path() {
        let biosample = Biosample {
            organism: Some("/organisms/mouse/".to_string()),
            ..Default::default()
        };
        assert_eq!(biosample.organism_name(), Some("mouse"));
    }
}
