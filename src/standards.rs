//! Data standards tables: read-depth and read-length tiers, pipeline and
//! assay allow-lists, platform equivalence classes and award classes.
//!
//! The built-in table is compiled in. A table at
//! `data/resources/standards.json` (or an explicit path) takes precedence
//! and can be reloaded at runtime.

use crate::error::AuditError;
use crate::thresholds::Tiers;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    sync::{Arc, RwLock},
};

const RUNTIME_STANDARDS_PATH: &str = "data/resources/standards.json";
const BUILTIN_STANDARDS_JSON: &str = include_str!("../assets/standards.json");
const SCHEMA_PREFIX: &str = "assay_audit.standards.v";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlDepthTiers {
    pub broad: Tiers,
    pub narrow: Tiers,
    pub transcription_factor: Tiers,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssayLists {
    pub target_based: Vec<String>,
    pub control_required: Vec<String>,
    pub sequencing: Vec<String>,
    pub chip_term_ids: Vec<String>,
    pub dnase_term_ids: Vec<String>,
    pub geo_exempt_term_ids: Vec<String>,
    pub rin_term_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineLists {
    pub dnase: Vec<String>,
    pub dnase_encode4: String,
    pub rna: Vec<String>,
    pub long_rna: Vec<String>,
    pub rna_read_length_exempt: Vec<String>,
    pub chip_mapping: Vec<String>,
    pub chip_control: Vec<String>,
    pub chip_control_analysis_steps: Vec<String>,
    pub processed_assemblies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardsLinks {
    pub dnase: String,
    pub chip: String,
    pub rna: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadLengthStandards {
    pub dnase: u64,
    pub rna: u64,
    pub wgbs: u64,
    pub chip: Tiers,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErccSpikeinFiles {
    pub bulk: String,
    pub single_cell: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformGroup {
    pub name: String,
    pub term_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwardClasses {
    pub assay_standards: Vec<String>,
    pub modern: Vec<String>,
    pub control_read_depth: Vec<String>,
    pub replication: Vec<String>,
    pub documents: Vec<String>,
    pub control: Vec<String>,
    pub legacy: Vec<String>,
    pub chip_control: Vec<String>,
    pub antibody: Vec<String>,
    pub spikeins: Vec<String>,
    pub single_cell_control_exempt: Vec<String>,
    pub strict_characterization: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Standards {
    pub schema: String,
    pub processing_lab: String,
    pub chip_read_depth_labs: Vec<String>,
    pub chip_control_read_depth: ControlDepthTiers,
    pub minimal_read_depth: BTreeMap<String, u64>,
    pub gtex_donors: Vec<String>,
    pub assays: AssayLists,
    pub pipelines: PipelineLists,
    pub standards_links: StandardsLinks,
    pub read_length: ReadLengthStandards,
    pub ercc_spikein_files: ErccSpikeinFiles,
    pub platform_groups: Vec<PlatformGroup>,
    pub excluded_platforms: Vec<String>,
    pub awards: AwardClasses,
}

pub(crate) fn contains(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item == value)
}

/// Path of the first tier object naming its lowest cutoff twice, as both
/// `low` and its alias `extremely_low`.
fn doubled_low_cutoff(value: &Value, path: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            if map.contains_key("low") && map.contains_key("extremely_low") {
                return Some(path.to_string());
            }
            map.iter()
                .find_map(|(key, child)| doubled_low_cutoff(child, &format!("{path}.{key}")))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, child)| doubled_low_cutoff(child, &format!("{path}[{i}]"))),
        _ => None,
    }
}

impl Standards {
    pub fn from_json(text: &str) -> Result<Self, AuditError> {
        let value: Value = serde_json::from_str(text)?;
        if let Some(path) = doubled_low_cutoff(&value, "$") {
            return Err(AuditError::Standards(format!(
                "tiers at {path} give both 'low' and 'extremely_low'; use one of them"
            )));
        }
        let standards = serde_json::from_value::<Standards>(value)?;
        if !standards.schema.starts_with(SCHEMA_PREFIX) {
            return Err(AuditError::Standards(format!(
                "unsupported schema '{}'",
                standards.schema
            )));
        }
        let tiers = &standards.chip_control_read_depth;
        for (name, t) in [
            ("broad", &tiers.broad),
            ("narrow", &tiers.narrow),
            ("transcription_factor", &tiers.transcription_factor),
            ("chip read length", &standards.read_length.chip),
        ] {
            if !t.is_ordered() {
                return Err(AuditError::Standards(format!(
                    "tiers for {name} are not ascending"
                )));
            }
        }
        Ok(standards)
    }

    pub fn builtin() -> Self {
        match Self::from_json(BUILTIN_STANDARDS_JSON) {
            Ok(standards) => standards,
            Err(e) => {
                tracing::error!("built-in standards table is unusable: {e}");
                Self::default()
            }
        }
    }

    pub fn load(path: &str) -> Result<Self, AuditError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn try_load_path(path: &str) -> Option<Self> {
        match Self::load(path) {
            Ok(standards) => Some(standards),
            Err(AuditError::Io(_)) => None,
            Err(e) => {
                tracing::warn!("ignoring standards table at '{path}': {e}");
                None
            }
        }
    }

    fn load_from_path(path: Option<&str>) -> Self {
        if let Some(standards) = path.and_then(Self::try_load_path) {
            return standards;
        }
        if let Some(standards) = Self::try_load_path(RUNTIME_STANDARDS_PATH) {
            tracing::debug!("using standards table at {RUNTIME_STANDARDS_PATH}");
            return standards;
        }
        Self::builtin()
    }

    /// Collapses interchangeable sequencer models into one platform name.
    pub fn platform_name(&self, term_id: Option<&str>, term_name: Option<&str>) -> Option<String> {
        if let Some(term_id) = term_id {
            if let Some(group) = self
                .platform_groups
                .iter()
                .find(|g| contains(&g.term_ids, term_id))
            {
                return Some(group.name.clone());
            }
        }
        term_name.map(str::to_string)
    }

    pub fn is_excluded_platform(&self, term_id: &str) -> bool {
        contains(&self.excluded_platforms, term_id)
    }

    pub fn minimal_read_depth_for(&self, key: &str) -> Option<u64> {
        self.minimal_read_depth.get(key).copied()
    }

    pub fn is_gtex_donor(&self, accession: &str) -> bool {
        contains(&self.gtex_donors, accession)
    }

    pub fn is_processing_lab(&self, lab: Option<&str>) -> bool {
        lab == Some(self.processing_lab.as_str())
    }

    pub fn is_chip_term(&self, term_id: Option<&str>) -> bool {
        term_id.is_some_and(|id| contains(&self.assays.chip_term_ids, id))
    }

    pub fn is_dnase_term(&self, term_id: Option<&str>) -> bool {
        term_id.is_some_and(|id| contains(&self.assays.dnase_term_ids, id))
    }

    pub fn rna_standards_link(&self, pipeline_title: &str) -> &str {
        self.standards_links
            .rna
            .get(pipeline_title)
            .map(String::as_str)
            .unwrap_or("")
    }
}

lazy_static! {
    static ref STANDARDS: RwLock<Arc<Standards>> = RwLock::new(Arc::new(Standards::load_from_path(None)));
}

/// Snapshot of the active standards table. An audit holds one snapshot for
/// its whole run, so a concurrent reload never mixes two tables.
pub fn current() -> Arc<Standards> {
    match STANDARDS.read() {
        Ok(guard) => Arc::clone(&guard),
        Err(poisoned) => Arc::clone(&poisoned.into_inner()),
    }
}

pub fn reload() {
    reload_from_path(None);
}

pub fn reload_from_path(path: Option<&str>) {
    let standards = Arc::new(Standards::load_from_path(path));
    match STANDARDS.write() {
        Ok(mut active) => *active = standards,
        Err(poisoned) => {
            tracing::warn!("standards lock was poisoned; replacing the table anyway");
            *poisoned.into_inner() = standards;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_table_parses() {
        let standards = Standards::from_json(BUILTIN_STANDARDS_JSON).unwrap();
        assert_eq!(standards.processing_lab, "/labs/encode-processing-pipeline/");
        assert_eq!(
            standards.chip_control_read_depth.broad,
            Tiers::new(20_000_000, 35_000_000, 45_000_000)
        );
        assert_eq!(standards.minimal_read_depth_for("modENCODE-chip"), Some(500_000));
        assert!(standards.is_gtex_donor("ENCDO451RUA"));
        assert!(standards.is_chip_term(Some("OBI:0002160")));
        assert!(!standards.is_chip_term(None));
        assert_eq!(standards.read_length.chip, Tiers::new(26, 36, 50));
    }

    #[test]
    fn test_platform_collapsing() {
        let standards = Standards::builtin();
        assert_eq!(
            standards.platform_name(Some("OBI:0002001"), Some("Illumina HiSeq 2500")),
            Some("Illumina HiSeq 2000/2500".to_string())
        );
        assert_eq!(
            standards.platform_name(Some("OBI:0002027"), Some("Illumina Genome Analyzer IIx")),
            Some("Illumina Genome Analyzer II/e/x".to_string())
        );
        assert_eq!(
            standards.platform_name(Some("OBI:0002630"), Some("Illumina NovaSeq 6000")),
            Some("Illumina NovaSeq 6000".to_string())
        );
        assert!(standards.is_excluded_platform("OBI:0002024"));
    }

    #[test]
    fn test_rejects_unknown_schema() {
        let err = Standards::from_json(&BUILTIN_STANDARDS_JSON.replace(
            "assay_audit.standards.v1",
            "something.else",
        ))
        .unwrap_err();
        assert!(matches!(err, AuditError::Standards(_)));
    }

    #[test]
    fn test_rejects_descending_tiers() {
        let text = BUILTIN_STANDARDS_JSON.replace(
            r#""low": 20000000, "minimal": 35000000"#,
            r#""low": 40000000, "minimal": 35000000"#,
        );
        assert!(Standards::from_json(&text).is_err());
    }

    #[test]
    fn test_rejects_tiers_with_both_low_spellings() {
        let text = BUILTIN_STANDARDS_JSON.replace(
            r#""low": 20000000, "minimal": 35000000"#,
            r#""low": 20000000, "extremely_low": 20000000, "minimal": 35000000"#,
        );
        let err = Standards::from_json(&text).unwrap_err();
        match err {
            AuditError::Standards(message) => {
                assert!(message.contains("$.chip_control_read_depth.broad"), "{message}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_reload_recovers_poisoned_lock() {
        let _ = std::thread::spawn(|| {
            let _guard = STANDARDS.write().unwrap();
            panic!("poison the standards lock");
        })
        .join();
        assert!(STANDARDS.is_poisoned());
        reload();
        assert_eq!(current().read_length.rna, 50);
        STANDARDS.clear_poison();
    }

    #[test]
    fn test_override_path_falls_back_to_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let standards = Standards::load_from_path(file.path().to_str());
        assert_eq!(standards.read_length.rna, 50);
    }

    #[test]
    fn test_override_path_is_used() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let text = BUILTIN_STANDARDS_JSON.replace(r#""rna": 50"#, r#""rna": 75"#);
        write!(file, "{text}").unwrap();
        let standards = Standards::load_from_path(file.path().to_str());
        assert_eq!(standards.read_length.rna, 75);
    }
}
