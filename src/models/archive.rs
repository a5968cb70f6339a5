use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::Article;

/// Year/month partition of the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BundleKey {
    pub year: i32,
    pub month: u32,
}

impl BundleKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(timestamp: &DateTime<Utc>) -> Self {
        Self::new(timestamp.year(), timestamp.month())
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}/{:02}", self.year, self.month)
    }
}

/// A live article selected for archival, joined with its feed URL so the
/// snapshot stays meaningful after the feed is deleted.
#[derive(Debug, Clone)]
pub struct ArchiveCandidate {
    pub article: Article,
    pub feed_url: String,
}

/// Immutable copy of an article as it was when archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedArticle {
    pub article_id: i64,
    pub feed_id: i64,
    pub feed_url: String,
    pub source_url: String,
    pub title: String,
    pub body_text: String,
    pub published_at: DateTime<Utc>,
    pub retrieved_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
}

impl ArchivedArticle {
    pub fn identity(&self) -> (i64, &str) {
        (self.feed_id, self.source_url.as_str())
    }
}

impl From<&ArchiveCandidate> for ArchivedArticle {
    fn from(candidate: &ArchiveCandidate) -> Self {
        let article = &candidate.article;
        Self {
            article_id: article.id,
            feed_id: article.feed_id,
            feed_url: candidate.feed_url.clone(),
            source_url: article.source_url.clone(),
            title: article.title.clone(),
            body_text: article.body_text.clone(),
            published_at: article.published_at,
            retrieved_at: article.retrieved_at,
            tags: article.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveBundle {
    pub year: i32,
    pub month: u32,
    pub written_at: DateTime<Utc>,
    pub articles: Vec<ArchivedArticle>,
}

impl ArchiveBundle {
    pub fn empty(key: BundleKey, written_at: DateTime<Utc>) -> Self {
        Self {
            year: key.year,
            month: key.month,
            written_at,
            articles: Vec::new(),
        }
    }

    pub fn key(&self) -> BundleKey {
        BundleKey::new(self.year, self.month)
    }

    /// Appends snapshots whose identity is not already bundled and returns
    /// how many were added. Existing entries keep their position.
    pub fn append_new(&mut self, snapshots: Vec<ArchivedArticle>) -> usize {
        let mut seen: HashSet<(i64, String)> = self
            .articles
            .iter()
            .map(owned_identity)
            .collect();

        let before = self.articles.len();
        for snapshot in snapshots {
            if seen.insert(owned_identity(&snapshot)) {
                self.articles.push(snapshot);
            }
        }
        self.articles.len() - before
    }
}

fn owned_identity(article: &ArchivedArticle) -> (i64, String) {
    let (feed_id, source_url) = article.identity();
    (feed_id, source_url.to_string())
}
