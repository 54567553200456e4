//! System lookups the audit consults but does not own: the ontology term
//! table and award records referenced by identifier.

use crate::error::AuditError;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologyTerm {
    pub name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl OntologyTerm {
    pub fn accepts_name(&self, term_name: &str) -> bool {
        self.name == term_name || self.synonyms.iter().any(|s| s == term_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwardRecord {
    #[serde(default)]
    pub rfa: Option<String>,
}

pub trait Registry: Sync {
    fn ontology_term(&self, term_id: &str) -> Option<&OntologyTerm>;

    /// Funding class (`rfa`) of the award with the given identifier.
    fn award_rfa(&self, award_id: &str) -> Option<&str>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRegistry {
    #[serde(default)]
    ontology: HashMap<String, OntologyTerm>,
    #[serde(default)]
    awards: HashMap<String, AwardRecord>,
}

impl StaticRegistry {
    pub fn from_json(text: &str) -> Result<Self, AuditError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &str) -> Result<Self, AuditError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_term(mut self, term_id: &str, name: &str, synonyms: &[&str]) -> Self {
        self.ontology.insert(
            term_id.to_string(),
            OntologyTerm {
                name: name.to_string(),
                synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_award(mut self, award_id: &str, rfa: &str) -> Self {
        self.awards.insert(
            award_id.to_string(),
            AwardRecord {
                rfa: Some(rfa.to_string()),
            },
        );
        self
    }

    pub fn term_count(&self) -> usize {
        self.ontology.len()
    }
}

impl Registry for StaticRegistry {
    fn ontology_term(&self, term_id: &str) -> Option<&OntologyTerm> {
        self.ontology.get(term_id)
    }

    fn award_rfa(&self, award_id: &str) -> Option<&str> {
        self.awards.get(award_id).and_then(|a| a.rfa.as_deref())
    }
}
