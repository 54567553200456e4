//! Target, antibody and tagging-modification rules.

use crate::dispatch::AuditContext;
use crate::files_index::ExcludedStatuses;
use crate::formatter::{audit_link, bracketed, entity_link, path_to_text};
use crate::rules::{award_in, experiment_link, is_removed_or_revoked};
use crate::standards::contains;
use assay_audit_protocol::{Antibody, Experiment, Finding, LotReview, Replicate, Target};
use itertools::Itertools;
use std::collections::BTreeSet;

const NON_TAG_MODIFICATIONS: [&str; 7] = [
    "Methylation",
    "Monomethylation",
    "Dimethylation",
    "Trimethylation",
    "Acetylation",
    "Ubiquitination",
    "Phosphorylation",
];
const ANTIBODY_FREE_ASSAYS: [&str; 5] = [
    "RNA Bind-n-Seq",
    "shRNA knockdown followed by RNA-seq",
    "siRNA knockdown followed by RNA-seq",
    "CRISPRi followed by RNA-seq",
    "CRISPR genome editing followed by RNA-seq",
];
const UNCHARACTERIZED_ANTIBODY_ASSAYS: [&str; 4] = [
    "RNA Bind-n-Seq",
    "shRNA knockdown followed by RNA-seq",
    "siRNA knockdown followed by RNA-seq",
    "CRISPRi followed by RNA-seq",
];

fn is_target_based(experiment: &Experiment, ctx: &AuditContext<'_>) -> bool {
    contains(&ctx.standards.assays.target_based, experiment.assay())
}

fn has_tagged_modification(target: &Target) -> bool {
    target
        .modifications
        .iter()
        .filter_map(|m| m.modification.as_deref())
        .any(|m| !NON_TAG_MODIFICATIONS.contains(&m))
}

/// Biosample modifications of `rep`, when none of those naming a target
/// site names `target`.
fn lacks_modification_of_target(rep: &Replicate, target: &Target) -> bool {
    let Some(biosample) = rep.biosample() else {
        return false;
    };
    let modifications = &biosample.applied_modifications;
    !modifications.is_empty()
        && modifications
            .iter()
            .filter_map(|m| m.modified_site_by_target_id.as_ref())
            .all(|site| site.id != target.id)
}

pub fn audit_target(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if experiment.status == "deleted"
        || !is_target_based(experiment, ctx)
        || experiment.is_control()
    {
        return Vec::new();
    }
    let Some(target) = &experiment.target else {
        return vec![Finding::error(
            "missing target",
            format!("{} experiments require a target", experiment.assay()),
        )];
    };
    let link = experiment_link(experiment);
    let target_link = entity_link(&target.id);
    let mut findings = Vec::new();
    if has_tagged_modification(target) {
        findings.push(Finding::warning(
            "inconsistent experiment target",
            format!(
                "Experiment {link} has a tagged target {target_link}. Should consider using \
                 untagged target version for experiment."
            ),
        ));
    }
    if experiment.assay_is(&ANTIBODY_FREE_ASSAYS) {
        return findings;
    }

    for rep in experiment.replicates() {
        if lacks_modification_of_target(rep, target) {
            let biosample_link = rep.biosample().map(|b| entity_link(&b.id)).unwrap_or_default();
            findings.push(Finding::internal_action(
                "inconsistent genetic modification targets",
                format!(
                    "This experiment {link} targeting {target_link} has a biosample \
                     {biosample_link} with no genetic modification targeting {target_link}."
                ),
            ));
        }
        let Some(antibody) = &rep.antibody else {
            findings.push(Finding::error(
                "missing antibody",
                format!(
                    "{} assays require an antibody specification. In replicate [{}, {}] {}, \
                     the antibody needs to be specified.",
                    experiment.assay(),
                    rep.biological_replicate_number,
                    rep.technical_replicate_number,
                    entity_link(&rep.id)
                ),
            ));
            continue;
        };
        // tag antibodies are matched through genetic modifications instead
        if antibody.targets_tag() {
            continue;
        }
        let antibody_targets: Vec<&str> = antibody.targets.iter().map(|t| t.name.as_str()).collect();
        if !antibody_targets.contains(&target.name.as_str()) {
            findings.push(Finding::error(
                "inconsistent target",
                format!(
                    "The target of the experiment is {}, but it is not present in the \
                     experiment's antibody {} target list {}.",
                    target.name,
                    entity_link(&antibody.id),
                    bracketed(&antibody_targets)
                ),
            ));
        }
    }
    findings
}

/// Labels of the tag targets of `antibody`.
fn antibody_tag_labels(antibody: &Antibody) -> BTreeSet<&str> {
    antibody
        .targets
        .iter()
        .filter(|t| t.is_tag())
        .filter_map(|t| t.label.as_deref())
        .collect()
}

/// A tag antibody against an untagged target needs a biosample genetic
/// modification introducing one of the antibody's tags.
pub fn audit_missing_tagging_modification(
    experiment: &Experiment,
    _ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if is_removed_or_revoked(experiment) {
        return Vec::new();
    }
    match &experiment.target {
        Some(target) if !target.is_tag() => {}
        _ => return Vec::new(),
    }
    let mut findings = Vec::new();
    for rep in experiment.replicates() {
        let Some(antibody) = &rep.antibody else {
            continue;
        };
        let antibody_tags = antibody_tag_labels(antibody);
        if antibody_tags.is_empty() {
            continue;
        }
        let Some(biosample) = rep.biosample() else {
            continue;
        };
        let introduced: BTreeSet<&str> = biosample
            .applied_modifications
            .iter()
            .flat_map(|m| m.introduced_tags.iter())
            .filter_map(|t| t.name.as_deref())
            .filter(|name| !name.is_empty())
            .collect();
        if antibody_tags.is_disjoint(&introduced) {
            findings.push(Finding::error(
                "inconsistent genetic modification tags",
                format!(
                    "{} specifies antibody {} targeting {} yet its biosample {} has no genetic \
                     modifications tagging the target.",
                    audit_link(
                        &format!(
                            "Replicate {}_{}",
                            rep.biological_replicate_number, rep.technical_replicate_number
                        ),
                        &rep.id
                    ),
                    entity_link(&antibody.id),
                    antibody_tags.iter().join(", "),
                    entity_link(&biosample.id)
                ),
            ));
        }
    }
    findings
}

/// Whether `antibody` counts as characterized. Tag antibodies funded by
/// newer awards are characterized through biosample characterizations.
fn is_characterized(antibody: &Antibody, ctx: &AuditContext<'_>) -> bool {
    let own = !antibody.characterizations.is_empty();
    let by_biosamples = !antibody.used_by_biosample_characterizations.is_empty();
    if !antibody.targets_tag() {
        return own;
    }
    let rfa = antibody
        .award
        .as_deref()
        .and_then(|award| ctx.registry.award_rfa(award));
    match rfa {
        Some("ENCODE4") => by_biosamples,
        Some("ENCODE3") => own || by_biosamples,
        _ => own,
    }
}

fn lot_review_finding(
    review: &LotReview,
    antibody: &Antibody,
    organism: &str,
    scope: &str,
) -> Option<Finding> {
    let antibody_link = entity_link(&antibody.id);
    let detail = review.detail.as_deref().unwrap_or("");
    match review.status.as_str() {
        "characterized to standards with exemption" => Some(Finding::warning(
            "antibody characterized with exemption",
            format!(
                "Antibody {antibody_link} has been characterized to the standard with exemption \
                 for {scope}"
            ),
        )),
        "awaiting characterization" => Some(Finding::not_compliant(
            "uncharacterized antibody",
            format!(
                "Antibody {antibody_link} has not yet been characterized in any cell type or \
                 tissue for {scope}"
            ),
        )),
        "not characterized to standards" | "not pursued" => Some(Finding::not_compliant(
            "antibody not characterized to standard",
            format!(
                "Antibody {antibody_link} has not been characterized to the standard for \
                 {organism}: {detail}"
            ),
        )),
        "pending dcc review" | "partially characterized" => Some(Finding::not_compliant(
            "partially characterized antibody",
            format!(
                "Antibody {antibody_link} has characterization attempts but does not have the \
                 full complement of characterizations meeting the standard in {organism}: \
                 {detail}"
            ),
        )),
        _ => None,
    }
}

/// Antibodies must be characterized for the experiment's organism, and for
/// non-histone targets for the biosample type as well.
pub fn audit_antibody_characterization(
    experiment: &Experiment,
    ctx: &AuditContext<'_>,
    _excluded: &ExcludedStatuses,
) -> Vec<Finding> {
    if !award_in(experiment, &ctx.standards.awards.antibody)
        || experiment.status == "deleted"
        || !is_target_based(experiment, ctx)
        || experiment.target.is_none()
        || experiment.is_control()
        || experiment.assay_is(&UNCHARACTERIZED_ANTIBODY_ASSAYS)
    {
        return Vec::new();
    }
    let mut findings = Vec::new();
    for rep in experiment.replicates() {
        let (Some(antibody), Some(_)) = (&rep.antibody, &rep.library) else {
            continue;
        };
        let Some(biosample) = rep.biosample() else {
            continue;
        };
        let organism_path = biosample.organism.as_deref();
        let organism = organism_path.map(path_to_text).unwrap_or_default();

        if !is_characterized(antibody, ctx) {
            findings.push(Finding::not_compliant(
                "uncharacterized antibody",
                format!(
                    "Antibody {} has not yet been characterized in any cell type or tissue in {}.",
                    entity_link(&antibody.id),
                    organism
                ),
            ));
            return findings;
        }

        let histone = antibody.investigated_as().contains(&"histone");
        let mut sample_match = false;
        for review in &antibody.lot_reviews {
            let review_organism = review.organisms.first().map(String::as_str);
            let matches = if histone {
                review_organism.is_some() && review_organism == organism_path
            } else {
                review.biosample_term_id.as_deref() == experiment.biosample_term_id()
                    && review_organism == organism_path
            };
            if !matches {
                continue;
            }
            sample_match = true;
            let scope = if histone {
                organism.clone()
            } else {
                format!("{} in {}", experiment.biosample_term_name(), organism)
            };
            findings.extend(lot_review_finding(review, antibody, &organism, &scope));
        }
        if !histone && !sample_match {
            findings.push(Finding::not_compliant(
                "partially characterized antibody",
                format!(
                    "Antibody {} has characterization attempts but does not have the full \
                     complement of characterizations meeting the standard in this cell type \
                     and organism: Awaiting submission of primary characterization(s).",
                    entity_link(&antibody.id)
                ),
            ));
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;
    use crate::rules::fixtures::{categories, experiment};
    use crate::standards::Standards;
    use assay_audit_protocol::Severity;
    use serde_json::{json, Value};

    fn run_with(
        registry: &StaticRegistry,
        rule: fn(&Experiment, &AuditContext<'_>, &ExcludedStatuses) -> Vec<Finding>,
        exp: &Experiment,
    ) -> Vec<Finding> {
        let standards = Standards::builtin();
        let excluded = ExcludedStatuses::for_experiment_status(&exp.status).with_deleted_and_replaced();
        rule(exp, &AuditContext::new(registry, &standards), &excluded)
    }

    fn run(
        rule: fn(&Experiment, &AuditContext<'_>, &ExcludedStatuses) -> Vec<Finding>,
        exp: &Experiment,
    ) -> Vec<Finding> {
        run_with(&StaticRegistry::default(), rule, exp)
    }

    fn chip(target: Value, antibody: Value, biosample: Value) -> Experiment {
        experiment(json!({
            "@id": "/experiments/ENCSR000TGT/",
            "status": "released",
            "assay_term_name": "ChIP-seq",
            "award": {"rfa": "ENCODE4"},
            "biosample_ontology": {"term_id": "EFO:0002067", "term_name": "K562"},
            "target": target,
            "replicates": [{
                "@id": "/replicates/r1/", "status": "released",
                "biological_replicate_number": 1, "technical_replicate_number": 1,
                "antibody": antibody,
                "library": {"@id": "/libraries/L1/", "accession": "L1", "status": "released", "biosample": biosample}
            }]
        }))
    }

    fn ctcf() -> Value {
        json!({"@id": "/targets/CTCF-human/", "name": "CTCF-human", "label": "CTCF", "investigated_as": ["transcription factor"]})
    }

    fn human_biosample() -> Value {
        json!({"@id": "/biosamples/B1/", "accession": "B1", "status": "released", "organism": "/organisms/human/"})
    }

    #[test]
    fn test_missing_target_and_antibody() {
        let mut exp = chip(ctcf(), Value::Null, human_biosample());
        exp.target = None;
        assert_eq!(categories(&run(audit_target, &exp)), ["missing target"]);

        let exp = chip(ctcf(), Value::Null, human_biosample());
        let findings = run(audit_target, &exp);
        assert_eq!(categories(&findings), ["missing antibody"]);
        assert!(findings[0].detail.contains("[1, 1]"));
    }

    #[test]
    fn test_antibody_target_mismatch() {
        let antibody = json!({"@id": "/antibodies/AB1/", "targets": [
            {"name": "POLR2A-human", "label": "POLR2A", "investigated_as": ["transcription factor"]}
        ]});
        let findings = run(audit_target, &chip(ctcf(), antibody, human_biosample()));
        assert_eq!(categories(&findings), ["inconsistent target"]);
        assert!(findings[0].detail.contains("[POLR2A-human]"));

        let tag_antibody = json!({"@id": "/antibodies/AB2/", "targets": [
            {"name": "eGFP", "label": "eGFP", "investigated_as": ["tag"]}
        ]});
        assert!(run(audit_target, &chip(ctcf(), tag_antibody, human_biosample())).is_empty());
    }

    #[test]
    fn test_tagged_target_and_modification_site() {
        let mut target = ctcf();
        target["modifications"] = json!([{"modification": "eGFP"}]);
        let mut biosample = human_biosample();
        biosample["applied_modifications"] = json!([
            {"@id": "/genetic-modifications/GM1/", "modified_site_by_target_id": {"@id": "/targets/ATF3-human/"}}
        ]);
        let antibody = json!({"@id": "/antibodies/AB1/", "targets": [ctcf()]});
        let findings = run(audit_target, &chip(target, antibody, biosample));
        assert_eq!(
            categories(&findings),
            ["inconsistent experiment target", "inconsistent genetic modification targets"]
        );
        assert_eq!(findings[1].severity, Severity::InternalAction);
    }

    #[test]
    fn test_tag_antibody_requires_introduced_tag() {
        let antibody = json!({"@id": "/antibodies/AB2/", "targets": [
            {"name": "3xFLAG", "label": "3xFLAG", "investigated_as": ["tag"]}
        ]});
        let mut biosample = human_biosample();
        biosample["applied_modifications"] = json!([
            {"@id": "/genetic-modifications/GM1/", "introduced_tags": [{"name": "eGFP"}]}
        ]);
        let exp = chip(ctcf(), antibody.clone(), biosample.clone());
        let findings = run(audit_missing_tagging_modification, &exp);
        assert_eq!(categories(&findings), ["inconsistent genetic modification tags"]);
        assert!(findings[0].detail.starts_with("{Replicate 1_1|/replicates/r1/}"));

        biosample["applied_modifications"][0]["introduced_tags"] = json!([{"name": "3xFLAG"}]);
        assert!(run(audit_missing_tagging_modification, &chip(ctcf(), antibody, biosample)).is_empty());
    }

    #[test]
    fn test_uncharacterized_antibody() {
        let antibody = json!({"@id": "/antibodies/AB1/", "targets": [ctcf()], "characterizations": []});
        let findings = run(audit_antibody_characterization, &chip(ctcf(), antibody, human_biosample()));
        assert_eq!(categories(&findings), ["uncharacterized antibody"]);
        assert!(findings[0].detail.ends_with("in human."));
    }

    #[test]
    fn test_tag_antibody_characterized_through_biosamples() {
        let antibody = json!({"@id": "/antibodies/AB2/", "award": "/awards/U41/",
            "targets": [{"name": "eGFP", "label": "eGFP", "investigated_as": ["tag"]}],
            "characterizations": ["/antibody-characterizations/C1/"],
            "lot_reviews": [{"organisms": ["/organisms/human/"], "biosample_term_id": "EFO:0002067", "status": "characterized to standards"}]
        });
        let exp = chip(ctcf(), antibody, human_biosample());
        let encode4 = StaticRegistry::default().with_award("/awards/U41/", "ENCODE4");
        assert_eq!(
            categories(&run_with(&encode4, audit_antibody_characterization, &exp)),
            ["uncharacterized antibody"]
        );
        let encode3 = StaticRegistry::default().with_award("/awards/U41/", "ENCODE3");
        assert!(run_with(&encode3, audit_antibody_characterization, &exp).is_empty());
    }

    #[test]
    fn test_lot_review_statuses() {
        let antibody = json!({"@id": "/antibodies/AB1/", "targets": [ctcf()],
            "characterizations": ["/antibody-characterizations/C1/"],
            "lot_reviews": [
                {"organisms": ["/organisms/human/"], "biosample_term_id": "EFO:0002067", "status": "partially characterized", "detail": "needs secondary"},
                {"organisms": ["/organisms/mouse/"], "biosample_term_id": "EFO:0002067", "status": "not pursued"}
            ]
        });
        let findings = run(audit_antibody_characterization, &chip(ctcf(), antibody, human_biosample()));
        assert_eq!(categories(&findings), ["partially characterized antibody"]);
        assert!(findings[0].detail.ends_with("in human: needs secondary"));

        let unmatched = json!({"@id": "/antibodies/AB1/", "targets": [ctcf()],
            "characterizations": ["/antibody-characterizations/C1/"],
            "lot_reviews": [{"organisms": ["/organisms/human/"], "biosample_term_id": "EFO:0001187", "status": "characterized to standards"}]
        });
        let findings = run(audit_antibody_characterization, &chip(ctcf(), unmatched, human_biosample()));
        assert!(findings[0].detail.contains("Awaiting submission of primary characterization"));
    }

    #[test]
    fn test_histone_lot_reviews_match_on_organism() {
        let histone = json!({"@id": "/targets/H3K27ac-human/", "name": "H3K27ac-human", "investigated_as": ["histone", "broad histone mark"]});
        let antibody = json!({"@id": "/antibodies/AB3/", "targets": [histone.clone()],
            "characterizations": ["/antibody-characterizations/C1/"],
            "lot_reviews": [{"organisms": ["/organisms/human/"], "status": "characterized to standards with exemption"}]
        });
        let findings = run(audit_antibody_characterization, &chip(histone, antibody, human_biosample()));
        assert_eq!(categories(&findings), ["antibody characterized with exemption"]);
        assert_eq!(findings[0].severity, Severity::Warning);
    }
}
