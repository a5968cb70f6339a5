use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub source_url: String,
    pub title: String,
    pub body_text: String,
    pub published_at: DateTime<Utc>,
    pub retrieved_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
}

/// One entry as handed over by the fetcher, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub published_at: Option<String>,
}

/// A validated entry ready to be inserted into the live store.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: i64,
    pub source_url: String,
    pub title: String,
    pub body_text: String,
    pub published_at: DateTime<Utc>,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMatch {
    #[default]
    All,
    Any,
}

/// Trims tags and drops empty ones; duplicates collapse in the set.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
