use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid feed URL {0:?}")]
    InvalidUrl(String),

    #[error("feed already registered: {0}")]
    DuplicateFeed(String),

    #[error("no feed with id {0}")]
    FeedNotFound(i64),

    #[error("no live article with id {0}")]
    ArticleNotFound(i64),

    #[error("feed {feed_id} still has {count} live articles (use cascade to delete them)")]
    FeedHasLiveArticles { feed_id: i64, count: usize },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("another archival run holds {}", .0.display())]
    ArchiveLocked(PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Errors caused by the caller's input rather than the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::DuplicateFeed(_)
                | Self::FeedNotFound(_)
                | Self::ArticleNotFound(_)
                | Self::FeedHasLiveArticles { .. }
                | Self::InvalidQuery(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
