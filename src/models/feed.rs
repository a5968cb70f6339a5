use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// What the fetcher learned about a feed before it is registered.
#[derive(Debug, Clone)]
pub struct FeedMetadata {
    pub url: String,
    pub title: Option<String>,
}

impl FeedMetadata {
    /// The name a new feed is registered under: its own title, else the URL.
    pub fn display_name(&self) -> String {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.url)
            .to_string()
    }
}
