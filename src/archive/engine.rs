use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{ArchivalReport, ArchiveCandidate, ArchivedArticle, BundleKey, GroupFailure};

use super::BundleStore;

/// Moves every live article published more than `retention` before `now`
/// into its year/month bundle.
///
/// Each group is merged into its bundle first and only removed from the
/// live store once the new bundle file is in place. A group whose bundle
/// cannot be written is reported and left live for the next run. Articles
/// already present in their bundle (a previous run stopped between the
/// file swap and the delete) are not appended twice but are still removed.
pub async fn run_archival(
    repo: &Repository,
    bundles: &BundleStore,
    now: DateTime<Utc>,
    retention: Duration,
) -> Result<ArchivalReport> {
    let retention = TimeDelta::from_std(retention)
        .map_err(|_| AppError::Config(format!("retention {retention:?} is out of range")))?;
    let cutoff = now
        .checked_sub_signed(retention)
        .ok_or_else(|| AppError::Config("retention reaches before the epoch".to_string()))?;

    let _lock = bundles.lock()?;

    let candidates = repo.archival_candidates(cutoff).await?;
    let mut report = ArchivalReport::default();
    if candidates.is_empty() {
        tracing::info!("Nothing to archive before {}", cutoff);
        return Ok(report);
    }

    for (key, group) in group_by_month(candidates) {
        let ids: Vec<i64> = group.iter().map(|c| c.article.id).collect();
        let snapshots: Vec<ArchivedArticle> = group.iter().map(ArchivedArticle::from).collect();

        let store = bundles.clone();
        let merged = tokio::task::spawn_blocking(move || store.merge(key, snapshots, now))
            .await
            .map_err(|e| AppError::Other(anyhow::anyhow!("bundle writer panicked: {e}")))
            .and_then(|r| r);

        match merged {
            Ok(appended) => {
                let removed = repo.remove_archived(ids, now).await?;
                if appended > 0 || removed > 0 {
                    report.bundles_touched.insert(key);
                }
                report.moved += removed;
                tracing::info!(
                    "Archived {}: {} appended, {} removed from live store",
                    key,
                    appended,
                    removed
                );
            }
            Err(e) => {
                tracing::warn!("Failed to archive {}: {}", key, e);
                report.failed_groups.push(GroupFailure {
                    key,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

/// Buckets candidates by the month they were published, each bucket in
/// ascending article id.
fn group_by_month(candidates: Vec<ArchiveCandidate>) -> BTreeMap<BundleKey, Vec<ArchiveCandidate>> {
    let mut groups: BTreeMap<BundleKey, Vec<ArchiveCandidate>> = BTreeMap::new();
    for candidate in candidates {
        groups
            .entry(BundleKey::of(&candidate.article.published_at))
            .or_default()
            .push(candidate);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|c| c.article.id);
    }
    groups
}
