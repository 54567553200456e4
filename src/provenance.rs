//! Walks `derived_from` lineage between files.
//!
//! Edges are resolved against the dataset's own files first and the
//! contributing files second. Unresolved edges are reported by the callers
//! as findings; nothing here fails.

use crate::files_index::FilesIndex;
use assay_audit_protocol::{File, Pipeline};
use std::collections::HashSet;

/// Files of `format` one `derived_from` hop upstream of `files`,
/// de-duplicated by accession, in discovery order.
pub fn derived_from_of_format<'a, 'f>(
    files: impl IntoIterator<Item = &'f File>,
    index: &FilesIndex<'a>,
    format: &str,
) -> Vec<&'a File> {
    let mut seen: HashSet<Option<&'a str>> = HashSet::new();
    let mut out = Vec::new();
    for file in files {
        for id in file.derived_from_ids() {
            let Some(parent) = index.resolve(id) else {
                continue;
            };
            if parent.file_format.as_deref() != Some(format) {
                continue;
            }
            if seen.insert(parent.accession.as_deref()) {
                out.push(parent);
            }
        }
    }
    out
}

/// Accession-only form of [`derived_from_of_format`].
pub fn derived_from_accessions<'a, 'f>(
    files: impl IntoIterator<Item = &'f File>,
    index: &FilesIndex<'a>,
    format: &str,
) -> Vec<Option<&'a str>> {
    derived_from_of_format(files, index, format)
        .into_iter()
        .map(|f| f.accession.as_deref())
        .collect()
}

/// First BAM produced by the processing lab on one of `assemblies` whose
/// pipeline title is allowed. `None` means no file qualified, which callers
/// treat differently from a match.
pub fn pipeline_title_lookup<'a>(
    files: impl IntoIterator<Item = &'a File>,
    assemblies: &[String],
    allowed_titles: &[String],
    processing_lab: &str,
) -> Option<&'a str> {
    for file in files {
        if !file.has_format("bam") || matches!(file.status.as_str(), "replaced" | "deleted") {
            continue;
        }
        let on_assembly = file
            .assembly
            .as_deref()
            .is_some_and(|a| assemblies.iter().any(|x| x == a));
        if !on_assembly || file.lab.as_deref() != Some(processing_lab) {
            continue;
        }
        let Some(pipelines) = file.pipelines() else {
            continue;
        };
        if let Some(p) = pipelines
            .iter()
            .find(|p| allowed_titles.iter().any(|t| *t == p.title))
        {
            return Some(p.title.as_str());
        }
    }
    None
}

/// Distinct pipelines over `files`, first occurrence of each title wins.
pub fn pipeline_objects<'a>(files: impl IntoIterator<Item = &'a File>) -> Vec<&'a Pipeline> {
    let mut titles: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for file in files {
        for pipeline in file.pipelines().unwrap_or(&[]) {
            if titles.insert(pipeline.title.as_str()) {
                out.push(pipeline);
            }
        }
    }
    out
}

fn is_chip_like(assay_name: &str) -> bool {
    matches!(assay_name, "ChIP-seq" | "Mint-ChIP-seq")
}

fn replicate_keys(file: &File, technical: bool) -> Vec<String> {
    if technical {
        file.technical_replicates.clone()
    } else {
        file.biological_replicates.iter().map(u32::to_string).collect()
    }
}

/// Whether an alignment no longer reflects its replicate's reads.
///
/// ChIP-like assays (and the ENCODE4 DNase pipeline) group reads by
/// biological replicate, others by technical replicate. For ChIP-like
/// assays one mate of a read pair is enough to count as present.
pub fn is_stale_alignment(
    file: &File,
    index: &FilesIndex<'_>,
    assay_name: &str,
    uses_special_pipeline: bool,
) -> bool {
    if file.derived_from_ids().iter().any(|id| !index.is_known(id)) {
        return true;
    }
    let derived_fastqs = derived_from_accessions([file], index, "fastq");
    if derived_fastqs.is_empty() {
        return false;
    }
    let derived: HashSet<Option<&str>> = derived_fastqs.into_iter().collect();

    let chip_like = is_chip_like(assay_name);
    let technical = !chip_like && !uses_special_pipeline;
    let own_keys = replicate_keys(file, technical);
    if own_keys.len() > 1 {
        // replicates were reorganized after the alignment was produced
        return true;
    }

    let replicate_fastqs: Vec<&File> = index
        .fastq_files()
        .iter()
        .filter(|f| {
            replicate_keys(f, technical)
                .iter()
                .any(|k| own_keys.contains(k))
        })
        .collect();

    for fastq in &replicate_fastqs {
        let accession = fastq.accession.as_deref();
        if derived.contains(&accession) {
            continue;
        }
        if !chip_like {
            return true;
        }
        let mate_present = fastq
            .paired_with
            .as_deref()
            .and_then(|p| p.split('/').nth(2))
            .is_some_and(|mate| derived.contains(&Some(mate)));
        if !mate_present {
            return true;
        }
    }

    let replicate_accessions: HashSet<Option<&str>> = replicate_fastqs
        .iter()
        .map(|f| f.accession.as_deref())
        .collect();
    derived.iter().any(|acc| !replicate_accessions.contains(acc))
}

/// Read length an alignment was mapped with, falling back to the read length
/// of its source fastqs.
pub fn mapped_read_length(bam: &File, index: &FilesIndex<'_>) -> Option<u64> {
    if let Some(len) = bam.mapped_read_length.filter(|&l| l > 0) {
        return Some(len);
    }
    derived_from_of_format([bam], index, "fastq")
        .into_iter()
        .find_map(|f| f.read_length.filter(|&l| l > 0))
}

/// True when every resolvable parent of `bam` is a raw sequence file.
pub fn has_only_raw_parents(bam: &File, index: &FilesIndex<'_>) -> bool {
    let ids = match &bam.derived_from {
        Some(ids) if !ids.is_empty() => ids,
        _ => return false,
    };
    ids.iter().filter_map(|id| index.original_files().get(id)).all(|parent| {
        matches!(
            parent.file_format.as_deref(),
            Some("fastq" | "tar" | "fasta")
        )
    })
}

/// True when no unfiltered alignment shares the filtered alignment's
/// assembly, biological replicates and parents.
pub fn lacks_unfiltered_counterpart<'a>(
    filtered: &File,
    unfiltered: impl IntoIterator<Item = &'a File>,
) -> bool {
    let Some(assembly) = filtered.assembly.as_deref() else {
        return false;
    };
    let filtered_parents: HashSet<&str> =
        filtered.derived_from_ids().iter().map(String::as_str).collect();
    !unfiltered.into_iter().any(|candidate| {
        candidate.assembly.as_deref() == Some(assembly)
            && candidate.biological_replicates == filtered.biological_replicates
            && candidate
                .derived_from_ids()
                .iter()
                .map(String::as_str)
                .collect::<HashSet<_>>()
                == filtered_parents
    })
}

/// Files of the dataset whose full `derived_from` closure leads back to
/// themselves. Traversal keeps a visited set, so it terminates on any graph.
pub fn files_in_cycles<'a>(index: &FilesIndex<'a>) -> Vec<&'a File> {
    index
        .original_files()
        .iter()
        .filter(|file| reaches_itself(file, index))
        .collect()
}

fn reaches_itself(start: &File, index: &FilesIndex<'_>) -> bool {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = start.derived_from_ids().iter().map(String::as_str).collect();
    while let Some(id) = stack.pop() {
        if id == start.id {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        if let Some(parent) = index.resolve(id) {
            stack.extend(parent.derived_from_ids().iter().map(String::as_str));
        }
    }
    false
}
