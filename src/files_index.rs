//! Per-audit classification of a dataset's files into semantic buckets.

use assay_audit_protocol::File;
use std::collections::HashMap;

/// File statuses treated as soft-deleted for one audit run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedStatuses(Vec<String>);

impl ExcludedStatuses {
    pub fn new<S: Into<String>>(statuses: impl IntoIterator<Item = S>) -> Self {
        Self(statuses.into_iter().map(Into::into).collect())
    }

    /// Revoked datasets keep every file, archived ones drop revoked files,
    /// everything else drops revoked and archived files.
    pub fn for_experiment_status(status: &str) -> Self {
        match status {
            "revoked" => Self::default(),
            "archived" => Self::new(["revoked"]),
            _ => Self::new(["revoked", "archived"]),
        }
    }

    /// The set handed to status rules: the file exclusions plus `deleted`
    /// and `replaced`.
    pub fn with_deleted_and_replaced(&self) -> Self {
        let mut out = self.clone();
        for status in ["deleted", "replaced"] {
            if !out.contains(status) {
                out.0.push(status.to_string());
            }
        }
        out
    }

    pub fn without(&self, status: &str) -> Self {
        Self(self.0.iter().filter(|s| *s != status).cloned().collect())
    }

    pub fn contains(&self, status: &str) -> bool {
        self.0.iter().any(|s| s == status)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Insertion-ordered map from file identifier to file.
#[derive(Debug, Clone, Default)]
pub struct FileBucket<'a> {
    files: Vec<&'a File>,
    by_id: HashMap<&'a str, usize>,
}

impl<'a> FileBucket<'a> {
    fn insert(&mut self, file: &'a File) {
        match self.by_id.get(file.id.as_str()) {
            Some(&idx) => self.files[idx] = file,
            None => {
                self.by_id.insert(file.id.as_str(), self.files.len());
                self.files.push(file);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&'a File> {
        self.by_id.get(id).map(|&idx| self.files[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a File> + '_ {
        self.files.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileCategory {
    OriginalFiles,
    FastqFiles,
    Alignments,
    UnfilteredAlignments,
    TranscriptomeAlignments,
    PeaksFiles,
    GeneQuantifications,
    TranscriptQuantifications,
    MicroRnaQuantifications,
    SignalFiles,
    ChromatinInteractionFiles,
    PreferredDefaultIdrPeaks,
    IdrThresholdedPeaks,
    PseudoReplicatedPeaks,
    OverlapAndIdrPeaks,
    CpgQuantifications,
    RawData,
    ProcessedData,
}

impl FileCategory {
    pub fn all() -> &'static [FileCategory] {
        use FileCategory::*;
        &[
            OriginalFiles,
            FastqFiles,
            Alignments,
            UnfilteredAlignments,
            TranscriptomeAlignments,
            PeaksFiles,
            GeneQuantifications,
            TranscriptQuantifications,
            MicroRnaQuantifications,
            SignalFiles,
            ChromatinInteractionFiles,
            PreferredDefaultIdrPeaks,
            IdrThresholdedPeaks,
            PseudoReplicatedPeaks,
            OverlapAndIdrPeaks,
            CpgQuantifications,
            RawData,
            ProcessedData,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            FileCategory::OriginalFiles => "original_files",
            FileCategory::FastqFiles => "fastq_files",
            FileCategory::Alignments => "alignments",
            FileCategory::UnfilteredAlignments => "unfiltered_alignments",
            FileCategory::TranscriptomeAlignments => "transcriptome_alignments",
            FileCategory::PeaksFiles => "peaks_files",
            FileCategory::GeneQuantifications => "gene_quantifications_files",
            FileCategory::TranscriptQuantifications => "transcript_quantifications_files",
            FileCategory::MicroRnaQuantifications => "microRNA_quantifications_files",
            FileCategory::SignalFiles => "signal_files",
            FileCategory::ChromatinInteractionFiles => "chromatin_interaction_files",
            FileCategory::PreferredDefaultIdrPeaks => "preferred_default_idr_peaks",
            FileCategory::IdrThresholdedPeaks => "idr_thresholded_peaks",
            FileCategory::PseudoReplicatedPeaks => "pseudo_replicated_peaks_files",
            FileCategory::OverlapAndIdrPeaks => "overlap_and_idr_peaks",
            FileCategory::CpgQuantifications => "cpg_quantifications",
            FileCategory::RawData => "raw_data",
            FileCategory::ProcessedData => "processed_data",
        }
    }

    /// Categories, other than the raw/processed split, that `file` falls into.
    fn matching(file: &File) -> Vec<FileCategory> {
        let format = file.file_format.as_deref();
        let output = file.output_type.as_deref();
        let mut out = Vec::new();
        match (format, output) {
            (Some("fastq"), Some("reads")) => out.push(FileCategory::FastqFiles),
            (Some("bam"), Some("alignments" | "redacted alignments")) => {
                out.push(FileCategory::Alignments)
            }
            (Some("bam"), Some("unfiltered alignments" | "redacted unfiltered alignments")) => {
                out.push(FileCategory::UnfilteredAlignments)
            }
            (Some("bam"), Some("transcriptome alignments")) => {
                out.push(FileCategory::TranscriptomeAlignments)
            }
            (Some("bed"), Some("peaks" | "peaks and background as input for IDR")) => {
                out.push(FileCategory::PeaksFiles)
            }
            _ => {}
        }
        match output {
            Some("gene quantifications") => out.push(FileCategory::GeneQuantifications),
            Some("transcript quantifications") => {
                out.push(FileCategory::TranscriptQuantifications)
            }
            Some("microRNA quantifications") => out.push(FileCategory::MicroRnaQuantifications),
            Some("contact matrix" | "loops") => out.push(FileCategory::ChromatinInteractionFiles),
            Some("signal of unique reads") => out.push(FileCategory::SignalFiles),
            Some("optimal IDR thresholded peaks") => {
                out.push(FileCategory::PreferredDefaultIdrPeaks)
            }
            Some("IDR thresholded peaks") => {
                if file.preferred_default {
                    out.push(FileCategory::PreferredDefaultIdrPeaks);
                }
                out.push(FileCategory::IdrThresholdedPeaks);
            }
            Some("methylation state at CpG") => out.push(FileCategory::CpgQuantifications),
            _ => {}
        }
        if format == Some("bed") {
            if output == Some("pseudoreplicated peaks") {
                out.push(FileCategory::PseudoReplicatedPeaks);
            }
            if matches!(
                output,
                Some(
                    "replicated peaks"
                        | "pseudoreplicated peaks"
                        | "conservative IDR thresholded peaks"
                        | "IDR thresholded peaks"
                )
            ) {
                out.push(FileCategory::OverlapAndIdrPeaks);
            }
        }
        out
    }
}

/// Buckets over one dataset's files, built once per audit and read-only
/// afterwards. A file may sit in several buckets; every retained file is in
/// `original_files` and in exactly one of `raw_data` / `processed_data`.
#[derive(Debug, Clone, Default)]
pub struct FilesIndex<'a> {
    pub excluded: ExcludedStatuses,
    buckets: HashMap<FileCategory, FileBucket<'a>>,
    empty: FileBucket<'a>,
    pub contributing_files: FileBucket<'a>,
}

impl<'a> FilesIndex<'a> {
    pub fn bucket(&self, category: FileCategory) -> &FileBucket<'a> {
        self.buckets.get(&category).unwrap_or(&self.empty)
    }

    pub fn original_files(&self) -> &FileBucket<'a> {
        self.bucket(FileCategory::OriginalFiles)
    }

    pub fn fastq_files(&self) -> &FileBucket<'a> {
        self.bucket(FileCategory::FastqFiles)
    }

    pub fn alignments(&self) -> &FileBucket<'a> {
        self.bucket(FileCategory::Alignments)
    }

    pub fn unfiltered_alignments(&self) -> &FileBucket<'a> {
        self.bucket(FileCategory::UnfilteredAlignments)
    }

    pub fn peaks_files(&self) -> &FileBucket<'a> {
        self.bucket(FileCategory::PeaksFiles)
    }

    /// Attaches files that live in other datasets but appear in this
    /// dataset's provenance.
    pub fn with_contributing(mut self, files: &'a [File]) -> Self {
        for file in files {
            if !self.excluded.contains(&file.status) {
                self.contributing_files.insert(file);
            }
        }
        self
    }

    /// Resolves a `derived_from` identifier against this dataset's files,
    /// then against contributing files.
    pub fn resolve(&self, id: &str) -> Option<&'a File> {
        self.original_files()
            .get(id)
            .or_else(|| self.contributing_files.get(id))
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.original_files().contains(id) || self.contributing_files.contains(id)
    }

    /// Number of files per non-empty category, keyed by category name.
    pub fn summary(&self) -> Vec<(&'static str, usize)> {
        FileCategory::all()
            .iter()
            .filter_map(|&c| {
                let len = self.bucket(c).len();
                (len > 0).then(|| (c.name(), len))
            })
            .collect()
    }
}

pub fn build_index<'a>(files: &'a [File], excluded: &ExcludedStatuses) -> FilesIndex<'a> {
    let mut index = FilesIndex {
        excluded: excluded.clone(),
        ..Default::default()
    };
    for file in files {
        if excluded.contains(&file.status) {
            continue;
        }
        let mut categories = FileCategory::matching(file);
        categories.push(FileCategory::OriginalFiles);
        categories.push(if file.is_raw_data() {
            FileCategory::RawData
        } else {
            FileCategory::ProcessedData
        });
        for category in categories {
            index.buckets.entry(category).or_default().insert(file);
        }
    }
    index
}
