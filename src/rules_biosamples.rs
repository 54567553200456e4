//! Biosample rules: ontology terms, internal tags, genetic modifications,
//! characterization review status and consent certification.

use crate::dispatch::AuditContext;
use crate::files_index::ExcludedStatuses;
use crate::formatter::{bracketed, entity_link, entity_links};
use crate::rules::{
    active_biosamples, award_in, experiment_link, is_removed, is_removed_or_revoked,
};
use assay_audit_protocol::{
    Biosample, Characterization, Experiment, Finding, GeneticModification, ParentBiosample,
    Severity,
};
use std::collections::{BTreeMap, BTreeSet};

const TRACKED_INTERNAL_TAGS: [&str; 2] = ["ENTEx", "SESCC"];
const TECHNICAL_SAMPLE_UUID: &str = "f6ade16f-4367-452c-882a-57f8f3c08a59";
const TECHNICAL_SAMPLE_TYPE: &str = "/biosample-types/f6ade16f-4367-452c-882a-57f8f3c08a59/";

/// Review outcome of a biosample characterization. Variants are declared in
/// precedence order: when several ancestors disagree, the smallest wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReviewStatus {
    NotCompliant,
    Unreviewed,
    RequiresSecondaryOpinion,
    ExemptFromStandards,
    Compliant,
    /// Any other review state; counts as reviewed but never propagates.
    Other,
}

impl ReviewStatus {
    pub fn from_review(status: Option<&str>) -> Self {
        match status {
            None => ReviewStatus::Unreviewed,
            Some("not compliant") => ReviewStatus::NotCompliant,
            Some("requires secondary opinion") => ReviewStatus::RequiresSecondaryOpinion,
            Some("exempt from standards") => ReviewStatus::ExemptFromStandards,
            Some("compliant") => ReviewStatus::Compliant,
            Some(_) => ReviewStatus::Other,
        }
    }

    fn of(characterization: &Characterization) -> Self {
        Self::from_review(characterization.review_status())
    }

    /// Highest-precedence status among `statuses`.
    pub fn strongest(statuses: impl IntoIterator<Item = ReviewStatus>) -> Option<Self> {
        statuses
            .into_iter()
            .filter(|s| *s != ReviewStatus::Other)
            .min()
    }
}

fn sorted_ids<'a>(ids: impl IntoIterator<Item = &'a String>) -> Vec<&'a str> {
    let mut out: Vec<&str> = ids.into_iter().map(String::as_str).collect();
    out.sort_unstable();
    out
}

/// A parent stands in for the child when it shares ontology, modifications
/// and treatments and carries characterizations of its own.
fn parent_matches(parent: &ParentBiosample, child: &Biosample, ontology: Option<&str>) -> bool {
    parent.biosample_ontology.as_deref() == ontology
        && sorted_ids(&parent.applied_modifications)
            == sorted_ids(child.applied_modifications.iter().map(|m| &m.id))
        && sorted_ids(&parent.treatments) == sorted_ids(&child.treatments)
}

/// Review statuses of `biosample`: its own, else those inherited from the
/// immediate `part_of`/`originated_from` parent, else from pool parents.
fn characterization_statuses(biosample: &Biosample) -> BTreeSet<ReviewStatus> {
    if !biosample.characterizations.is_empty() {
        return biosample.characterizations.iter().map(ReviewStatus::of).collect();
    }
    let ontology = biosample.biosample_ontology.as_ref().map(|o| o.id.as_str());
    let parent = match (&biosample.part_of, &biosample.originated_from) {
        (Some(part_of), _) if !part_of.characterizations.is_empty() => {
            parent_matches(part_of, biosample, ontology).then_some(part_of)
        }
        (_, Some(origin)) if !origin.characterizations.is_empty() => {
            parent_matches(origin, biosample, ontology).then_some(origin)
        }
        _ => None,
    };
    if let Some(parent) = parent {
        if let Some(status) =
            ReviewStatus::strongest(parent.characterizations.iter().map(ReviewStatus::of))
        {
            return BTreeSet::from([status]);
        }
    }
    let pool = &biosample.pooled_from;
    if !pool.is_empty() && pool.iter().all(|p| !p.characterizations.is_empty()) {
        let inherited = pool
            .iter()
            .flat_map(|p| p.characterizations.iter().map(ReviewStatus::of));
        if let Some(status) = ReviewStatus::strongest(inherited) {
            return BTreeSet::from([status]);
        }
    }
    BTreeSet::new()
}

fn strict_characterization(experiment: &Experiment, ctx: &AuditContext<'_>) -> bool {
    experiment.assay() == "ChIP-seq"
        && award_in(experiment, &ctx.standards.awards.strict_characterization)
}

/// Biosamples modified by a genetic modification need a reviewed
/// characterization validating it.
pub fn audit_biosample_characterization(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    let mut statuses: BTreeMap<ReviewStatus, Vec<&str>> = BTreeMap::new();
    let mut missing: Vec<(&Biosample, &[GeneticModification])> = Vec::new();
    let mut needs_characterization = false;
    for (_, biosample) in active_biosamples(experiment.replicates(), excluded) {
        let modifications = biosample.applied_modifications.as_slice();
        if modifications.is_empty() {
            continue;
        }
        needs_characterization |= modifications.iter().any(GeneticModification::is_tagging);
        let found = characterization_statuses(biosample);
        if found.is_empty() {
            missing.push((biosample, modifications));
            continue;
        }
        for status in found {
            let ids = statuses.entry(status).or_default();
            if !ids.contains(&biosample.id.as_str()) {
                ids.push(&biosample.id);
            }
        }
    }

    let severity = if needs_characterization && strict_characterization(experiment, ctx) {
        Severity::Error
    } else {
        Severity::Warning
    };
    if statuses.is_empty() {
        return missing
            .into_iter()
            .map(|(biosample, modifications)| {
                Finding::new(
                    "missing biosample characterization",
                    format!(
                        "Biosample {} which has been modified by genetic modification {} is \
                         missing characterization validating the modification.",
                        entity_link(&biosample.id),
                        entity_links(modifications.iter().map(|m| m.id.as_str()))
                    ),
                    severity,
                )
            })
            .collect();
    }

    let mut findings = Vec::new();
    if let Some(ids) = statuses.get(&ReviewStatus::NotCompliant) {
        findings.push(Finding::new(
            "not compliant biosample characterization",
            format!(
                "Biosample {} {} not compliant characterization",
                entity_links(ids.iter().copied()),
                if ids.len() > 1 { "have" } else { "has" }
            ),
            severity,
        ));
    }
    let reviewed = statuses.contains_key(&ReviewStatus::Compliant)
        || statuses.contains_key(&ReviewStatus::ExemptFromStandards);
    if !reviewed {
        let pending: BTreeSet<&str> = [ReviewStatus::Unreviewed, ReviewStatus::RequiresSecondaryOpinion]
            .iter()
            .filter_map(|s| statuses.get(s))
            .flatten()
            .copied()
            .collect();
        if !pending.is_empty() {
            findings.push(Finding::new(
                "missing compliant biosample characterization",
                format!(
                    "Characterization for biosample {} has not finished review",
                    entity_links(pending)
                ),
                severity,
            ));
        }
    }
    findings
}

pub fn audit_tagging_modification_characterization(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    let severity = if strict_characterization(experiment, ctx) {
        Severity::Error
    } else {
        Severity::Warning
    };
    let mut seen: Vec<&str> = Vec::new();
    let mut findings = Vec::new();
    for (_, biosample) in active_biosamples(experiment.replicates(), excluded) {
        for modification in &biosample.applied_modifications {
            if seen.contains(&modification.id.as_str()) {
                continue;
            }
            seen.push(&modification.id);
            if excluded.contains(&modification.status)
                || !modification.is_tagging()
                || !modification.characterizations.is_empty()
            {
                continue;
            }
            findings.push(Finding::new(
                "missing genetic modification characterization",
                format!(
                    "Genetic modification {} performed for the purpose of tagging is missing \
                     validating characterization.",
                    entity_link(&modification.id)
                ),
                severity,
            ));
        }
    }
    findings
}

/// Experiment biosample type against the ontology, and library biosamples
/// against the experiment biosample type.
pub fn audit_biosample_term(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed(experiment)
        || matches!(
            experiment.biosample_classification(),
            Some("cell-free sample" | "cloning host")
        )
    {
        return Vec::new();
    }
    let link = experiment_link(experiment);
    let mut findings = Vec::new();
    let ontology = experiment.biosample_ontology.as_ref();
    let term_name = experiment.biosample_term_name();
    match (ontology, experiment.biosample_term_id()) {
        (None, _) => findings.push(Finding::error(
            "missing biosample_ontology",
            format!("Biosample {link} is missing biosample_ontology"),
        )),
        (Some(_), Some(term_id)) if term_id.starts_with("NTR:") => {
            findings.push(Finding::internal_action(
                "NTR biosample",
                format!("Experiment {link} has an NTR biosample {term_id} - {term_name}"),
            ))
        }
        (Some(_), Some(term_id)) => match ctx.registry.ontology_term(term_id) {
            None => findings.push(Finding::internal_action(
                "term_id not in ontology",
                format!("Experiment {link} has term_id {term_id} which is not in ontology"),
            )),
            Some(term) if !term.accepts_name(term_name) => findings.push(Finding::error(
                "inconsistent ontology term",
                format!(
                    "Experiment {link} has a mismatch between biosample term_id ({term_id}) and \
                     term_name ({term_name}), ontology term_name for term_id {term_id} is {}.",
                    term.name
                ),
            )),
            Some(_) => {}
        },
        (Some(_), None) => {}
    }

    if experiment.assay() == "RNA Bind-n-Seq" || experiment.replicates.is_none() {
        return findings;
    }
    let experiment_type = ontology.map(|o| o.id.as_str()).unwrap_or("");
    let experiment_uuid = ontology.and_then(|o| o.uuid.as_deref());
    let mut with_biosample = 0;
    let mut with_mixed = 0;
    for library in experiment.replicates().iter().filter_map(|r| r.library.as_ref()) {
        if let Some(biosample) = &library.biosample {
            with_biosample += 1;
            let biosample_type = biosample
                .biosample_ontology
                .as_ref()
                .map(|o| o.id.as_str())
                .unwrap_or("");
            if biosample_type != experiment_type {
                findings.push(Finding::error(
                    "inconsistent library biosample",
                    format!(
                        "Experiment {link} contains a library {} linked to biosample type '{}', \
                         while experiment's biosample type is '{}'.",
                        entity_link(&library.id),
                        entity_link(biosample_type),
                        entity_link(experiment_type)
                    ),
                ));
            }
        } else if library.mixed_biosamples.is_some() {
            with_mixed += 1;
            if experiment_uuid != Some(TECHNICAL_SAMPLE_UUID) {
                findings.push(Finding::error(
                    "inconsistent library biosample",
                    format!(
                        "Experiment {link} has the biosample type {}, but contains a library {} \
                         generated from mixed biosamples which requires the experiment \
                         biosample type {}.",
                        entity_link(experiment_type),
                        entity_link(&library.id),
                        entity_link(TECHNICAL_SAMPLE_TYPE)
                    ),
                ));
            }
        } else {
            findings.push(Finding::error(
                "missing biosample",
                format!(
                    "Library {} is missing biosample, expecting one of type {term_name}",
                    entity_link(&library.id)
                ),
            ));
        }
    }
    if with_biosample > 0 && with_mixed > 0 {
        findings.push(Finding::error(
            "inconsistent library biosample",
            "This dataset contains libraries with both standard and mixed biosamples.",
        ));
    }
    findings
}

fn tracked_tags(tags: &[String]) -> Vec<&str> {
    tags.iter()
        .map(String::as_str)
        .filter(|t| TRACKED_INTERNAL_TAGS.contains(t))
        .collect()
}

/// Consortium internal tags must agree between the experiment and its
/// biosamples.
pub fn audit_internal_tags(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed(experiment) {
        return Vec::new();
    }
    let experiment_tags = tracked_tags(&experiment.internal_tags);
    let biosamples = experiment.biosamples();
    let mut biosample_tags: BTreeSet<&str> = BTreeSet::new();
    let mut details = Vec::new();

    for biosample in &biosamples {
        for tag in tracked_tags(&biosample.internal_tags) {
            biosample_tags.insert(tag);
            if experiment_tags.is_empty() {
                details.push(format!(
                    "This experiment contains a biosample {} with internal tag {tag}, while the \
                     experiment has no internal_tags specified.",
                    entity_link(&biosample.id)
                ));
            } else if !experiment_tags.contains(&tag) {
                details.push(format!(
                    "This experiment contains a biosample {} with internal tag {tag} that is \
                     not specified in experimental list of internal_tags {}.",
                    entity_link(&biosample.id),
                    bracketed(&experiment_tags)
                ));
            }
        }
    }
    if biosample_tags.is_empty() && !experiment_tags.is_empty() {
        for biosample in &biosamples {
            details.push(format!(
                "This experiment contains a biosample {} without internal tags belonging to \
                 internal tags {} of the experiment.",
                entity_link(&biosample.id),
                bracketed(&experiment_tags)
            ));
        }
    }
    if !biosample_tags.is_empty() {
        for biosample in &biosamples {
            if biosample.internal_tags.is_empty() {
                details.push(format!(
                    "This experiment contains a biosample {} with no internal tags belonging to \
                     internal tags {} other biosamples are assigned.",
                    entity_link(&biosample.id),
                    bracketed(&biosample_tags)
                ));
                continue;
            }
            for tag in &biosample_tags {
                if !biosample.internal_tags.iter().any(|t| t == tag) {
                    details.push(format!(
                        "This experiment contains a biosample {} without internal tag {tag} \
                         belonging to internal tags {} other biosamples are assigned.",
                        entity_link(&biosample.id),
                        bracketed(&biosample_tags)
                    ));
                }
            }
        }
    }
    details
        .into_iter()
        .map(|detail| Finding::internal_action("inconsistent internal tags", detail))
        .collect()
}

/// Replicates should share one combination of applied modifications.
pub fn audit_inconsistent_genetic_modifications(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed_or_revoked(experiment)
        || experiment.assay() == "pooled clone sequencing"
        || experiment.replicates().len() < 2
    {
        return Vec::new();
    }
    // an empty combination stands for unmodified biosamples
    let combinations: BTreeSet<Vec<&str>> = active_biosamples(experiment.replicates(), excluded)
        .map(|(_, biosample)| sorted_ids(biosample.applied_modifications.iter().map(|m| &m.id)))
        .collect();
    if combinations.len() < 2 {
        return Vec::new();
    }
    vec![Finding::internal_action(
        "inconsistent genetic modifications",
        format!(
            "Experiment {} contains biosamples with inconsistent genetic modifications",
            experiment_link(experiment)
        ),
    )]
}

pub fn audit_mixed_perturbation(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    // biosamples without a perturbed flag take no side
    let perturbed: BTreeSet<bool> = experiment
        .biosamples()
        .iter()
        .filter_map(|b| b.perturbed)
        .collect();
    if perturbed.len() < 2 {
        return Vec::new();
    }
    vec![Finding::error(
        "mixed biosample perturbations",
        format!(
            "Experiment {} contains both perturbed and non-perturbed biosamples",
            experiment_link(experiment)
        ),
    )]
}

/// ENCODE4 mapping experiments on human biosamples need NIH institutional
/// certification.
pub fn audit_nih_institutional_certification(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    let mapping = experiment
        .award
        .as_ref()
        .is_some_and(|a| a.rfa.as_deref() == Some("ENCODE4") && a.component.as_deref() == Some("mapping"));
    if !mapping {
        return Vec::new();
    }
    let uncertified: BTreeSet<&str> = experiment
        .biosamples()
        .into_iter()
        .filter(|b| {
            b.organism.as_deref() == Some("/organisms/human/")
                && b.nih_institutional_certification
                    .as_deref()
                    .is_none_or(str::is_empty)
        })
        .map(|b| b.id.as_str())
        .collect();
    let link = experiment_link(experiment);
    uncertified
        .into_iter()
        .map(|id| {
            Finding::error(
                "missing nih_institutional_certification",
                format!(
                    "Experiment {link} uses biosample {} missing NIH institutional certification \
                     required for human data",
                    entity_link(id)
                ),
            )
        })
        .collect()
}
