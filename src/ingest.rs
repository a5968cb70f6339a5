use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::db::{InsertOutcome, Repository};
use crate::error::Result;
use crate::models::{EntryError, IngestReport, NewArticle, RawEntry};

const UNTITLED: &str = "Untitled";

/// Reconciles one feed's raw entries into the live store.
///
/// Entries are handled independently: a malformed entry is counted as
/// failed and the rest of the batch still goes in. Identities already live
/// or already archived are counted as duplicates and left untouched.
pub async fn ingest(
    repo: &Repository,
    feed_id: i64,
    entries: Vec<RawEntry>,
    now: DateTime<Utc>,
) -> Result<IngestReport> {
    // Unknown feeds are a caller error, not a per-entry failure.
    repo.get_feed(feed_id).await?;

    let mut report = IngestReport::default();
    let mut valid = Vec::with_capacity(entries.len());

    for entry in entries {
        match validate(feed_id, entry, now) {
            Ok(article) => valid.push(article),
            Err(e) => {
                tracing::warn!("Skipping malformed entry in feed {}: {}", feed_id, e);
                report.failed += 1;
                report.failures.push(e);
            }
        }
    }

    for outcome in repo.insert_articles(valid).await? {
        match outcome {
            InsertOutcome::Inserted(_) => report.added += 1,
            InsertOutcome::Duplicate | InsertOutcome::AlreadyArchived => {
                report.skipped_duplicate += 1
            }
        }
    }

    tracing::info!(
        "Ingested feed {}: {} added, {} duplicates, {} failed",
        feed_id,
        report.added,
        report.skipped_duplicate,
        report.failed
    );
    Ok(report)
}

fn validate(feed_id: i64, entry: RawEntry, now: DateTime<Utc>) -> std::result::Result<NewArticle, EntryError> {
    let source_url = entry
        .source_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or(EntryError::MissingSourceUrl)?;

    // Many feeds omit the date; the retrieval time stands in for it.
    let published_at = match entry.published_at.as_deref().map(str::trim) {
        None | Some("") => now,
        Some(raw) => parse_published(raw).ok_or_else(|| EntryError::UnparseableDate {
            source_url: source_url.clone(),
            date: raw.to_string(),
        })?,
    };

    let title = entry
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    Ok(NewArticle {
        feed_id,
        source_url,
        title,
        body_text: entry.body_text.unwrap_or_default(),
        published_at,
        retrieved_at: now,
    })
}

/// Parses the date formats feeds use in practice.
fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
