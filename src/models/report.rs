use std::collections::BTreeSet;

use thiserror::Error;

use super::BundleKey;

/// Why a single raw entry could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("entry has no source URL")]
    MissingSourceUrl,
    #[error("unparseable published date {date:?} for {source_url}")]
    UnparseableDate { source_url: String, date: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub added: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub failures: Vec<EntryError>,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.added += other.added;
        self.skipped_duplicate += other.skipped_duplicate;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }
}

/// Outcome of `update` across one or more feeds.
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub feeds_updated: usize,
    pub feeds_failed: Vec<(String, String)>,
    pub entries: IngestReport,
}

impl UpdateReport {
    pub fn has_failures(&self) -> bool {
        self.entries.failed > 0 || !self.feeds_failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub key: BundleKey,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivalReport {
    pub moved: usize,
    pub bundles_touched: BTreeSet<BundleKey>,
    pub failed_groups: Vec<GroupFailure>,
}

impl ArchivalReport {
    pub fn has_failures(&self) -> bool {
        !self.failed_groups.is_empty()
    }
}
