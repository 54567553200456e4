//! Helpers shared by the rule bodies in the `rules_*` modules.

use crate::files_index::{ExcludedStatuses, FilesIndex};
use crate::formatter::entity_link;
use crate::standards::{contains, Standards};
use assay_audit_protocol::{Biosample, Experiment, Library, Replicate};
use std::collections::BTreeSet;

pub(crate) const CHIP_ASSAYS: [&str; 2] = ["ChIP-seq", "Mint-ChIP-seq"];
pub(crate) const RNA_NUCLEIC_ACIDS: [&str; 3] = ["RNA", "polyadenylated mRNA", "miRNA"];

pub(crate) fn experiment_link(experiment: &Experiment) -> String {
    entity_link(&experiment.id)
}

pub(crate) fn award_in(experiment: &Experiment, awards: &[String]) -> bool {
    experiment.award_rfa().is_some_and(|rfa| contains(awards, rfa))
}

pub(crate) fn is_removed(experiment: &Experiment) -> bool {
    experiment.status_in(&["deleted", "replaced"])
}

pub(crate) fn is_removed_or_revoked(experiment: &Experiment) -> bool {
    experiment.status_in(&["deleted", "replaced", "revoked"])
}

/// Replicates and their libraries where neither is in `excluded`.
pub(crate) fn active_libraries<'a, 'e>(
    replicates: &'a [Replicate],
    excluded: &'e ExcludedStatuses,
) -> impl Iterator<Item = (&'a Replicate, &'a Library)> {
    replicates
        .iter()
        .filter(move |rep| !excluded.contains(&rep.status))
        .filter_map(|rep| rep.library.as_ref().map(|lib| (rep, lib)))
        .filter(move |(_, lib)| !excluded.contains(&lib.status))
}

/// Replicates and their biosamples where replicate, library and biosample
/// are all outside `excluded`.
pub(crate) fn active_biosamples<'a, 'e>(
    replicates: &'a [Replicate],
    excluded: &'e ExcludedStatuses,
) -> impl Iterator<Item = (&'a Replicate, &'a Biosample)> {
    active_libraries(replicates, excluded)
        .filter_map(|(rep, lib)| lib.biosample.as_ref().map(|b| (rep, b)))
        .filter(move |(_, b)| !excluded.contains(&b.status))
}

/// Organism short name of the first active biosample, e.g. `human`.
pub(crate) fn organism_name<'a>(
    replicates: &'a [Replicate],
    excluded: &ExcludedStatuses,
) -> Option<&'a str> {
    let excluded = excluded.with_deleted_and_replaced();
    active_biosamples(replicates, &excluded)
        .find(|(_, b)| b.organism.is_some())
        .and_then(|(_, b)| b.organism_name())
}

pub(crate) fn is_gtex_experiment(experiment: &Experiment, standards: &Standards) -> bool {
    experiment
        .replicates()
        .iter()
        .filter_map(Replicate::biosample)
        .filter_map(|b| b.donor.as_ref())
        .filter_map(|d| d.accession.as_deref())
        .any(|acc| standards.is_gtex_donor(acc))
}

/// Platform names used by raw data files, with interchangeable sequencer
/// models collapsed.
pub(crate) fn platforms_used(index: &FilesIndex<'_>, standards: &Standards) -> BTreeSet<String> {
    index
        .original_files()
        .iter()
        .filter(|f| f.is_raw_data())
        .filter_map(|f| f.platform.as_ref())
        .filter_map(|p| standards.platform_name(p.term_id.as_deref(), p.term_name.as_deref()))
        .collect()
}

/// Libraries of long (>200 nt) fragments, by size range or average size.
pub(crate) fn has_long_fragments(library: &Library) -> bool {
    match (&library.size_range, library.average_fragment_size) {
        (Some(range), _) => range == ">200",
        (None, Some(size)) => size > 200.0,
        (None, None) => false,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::experiment;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_organism_name_skips_inactive_biosamples() {
        let exp = experiment(json!({
            "@id": "/experiments/E/",
            "status": "released",
            "replicates": [
                {"status": "deleted", "library": {"status": "released",
                    "biosample": {"accession": "B0", "status": "released", "organism": "/organisms/mouse/"}}},
                {"status": "released", "library": {"status": "released",
                    "biosample": {"accession": "B1", "status": "released", "organism": "/organisms/human/"}}}
            ]
        }));
        let excluded = ExcludedStatuses::for_experiment_status("released");
        assert_eq!(organism_name(exp.replicates(), &excluded), Some("human"));
    }

    #[test]
    fn test_long_fragment_detection() {
        let lib = |range: Option<&str>, size: Option<f64>| Library {
            size_range: range.map(str::to_string),
            average_fragment_size: size,
            ..Default::default()
        };
        assert!(has_long_fragments(&lib(Some(">200"), None)));
        assert!(!has_long_fragments(&lib(Some("<200"), Some(500.0))));
        assert!(has_long_fragments(&lib(None, Some(250.0))));
        assert!(!has_long_fragments(&lib(None, Some(200.0))));
        assert!(!has_long_fragments(&lib(None, None)));
    }

    #[test]
    fn test_gtex_detection() {
        let exp = experiment(json!({
            "@id": "/experiments/E/",
            "replicates": [{"library": {"biosample": {"accession": "B", "donor": {"accession": "ENCDO793LXB"}}}}]
        }));
        assert!(is_gtex_experiment(&exp, &Standards::builtin()));
    }
}
