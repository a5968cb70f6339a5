use std::collections::BTreeSet;

use chrono::Utc;

use crate::archive::{run_archival, BundleStore};
use crate::config::{days_to_duration, Config};
use crate::db::{RegistryMirror, Repository};
use crate::error::{AppError, Result};
use crate::feed::FeedFetcher;
use crate::ingest::ingest;
use crate::models::{
    normalize_tags, ArchivalReport, ArchiveBundle, Article, BundleKey, Feed, FeedMetadata,
    IngestReport, RawEntry, TagMatch, UpdateReport,
};
use crate::services::ContentFetcher;

/// Everything the command surface drives: the store, the archive and the
/// fetchers that feed them.
pub struct App {
    config: Config,
    pub repository: Repository,
    bundles: BundleStore,
    fetcher: FeedFetcher,
    content_fetcher: Option<ContentFetcher>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        config.ensure_dirs()?;

        let repository = Repository::open(
            &config.db_path(),
            RegistryMirror::new(config.feeds_file()),
        )
        .await?;
        let bundles = BundleStore::new(config.archive_dir());
        let fetcher = FeedFetcher::new(config.request_timeout())?;
        let content_fetcher = if config.fetch_full_content {
            Some(ContentFetcher::new(
                config.request_timeout(),
                config.min_content_chars,
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            repository,
            bundles,
            fetcher,
            content_fetcher,
        })
    }

    // Feed registry

    /// Registers a feed. Without an explicit name the feed is fetched and
    /// its own title used, falling back to the URL.
    pub async fn add_feed(&self, url: &str, name: Option<String>) -> Result<Feed> {
        let url = url.trim();
        if url::Url::parse(url).is_err() {
            return Err(AppError::InvalidUrl(url.to_string()));
        }

        let meta = match name {
            Some(name) => FeedMetadata {
                url: url.to_string(),
                title: Some(name),
            },
            None => match self.fetcher.discover_feed(url).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("Could not read feed metadata from {}: {}", url, e);
                    FeedMetadata {
                        url: url.to_string(),
                        title: None,
                    }
                }
            },
        };

        let feed = self
            .repository
            .add_feed(meta.url.clone(), meta.display_name(), Utc::now())
            .await?;
        tracing::info!("Added feed {} ({})", feed.display_name, feed.url);
        Ok(feed)
    }

    pub async fn rename_feed(&self, feed_id: i64, name: &str) -> Result<()> {
        self.repository.rename_feed(feed_id, name.trim().to_string()).await?;
        tracing::info!("Feed {} renamed to {}", feed_id, name);
        Ok(())
    }

    pub async fn delete_feed(&self, feed_id: i64, cascade: bool) -> Result<usize> {
        let removed = self.repository.delete_feed(feed_id, cascade).await?;
        tracing::info!("Feed {} deleted with {} live articles", feed_id, removed);
        Ok(removed)
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        self.repository.list_feeds().await
    }

    pub async fn feed(&self, feed_id: i64) -> Result<Feed> {
        self.repository.get_feed(feed_id).await
    }

    // Ingestion

    /// Fetches one feed (or all of them) and ingests the entries. A feed
    /// that cannot be fetched is reported and skipped.
    pub async fn update(&self, feed_id: Option<i64>) -> Result<UpdateReport> {
        let feeds = match feed_id {
            Some(id) => vec![self.repository.get_feed(id).await?],
            None => self.repository.list_feeds().await?,
        };

        let mut report = UpdateReport::default();
        let fetched = self
            .fetcher
            .refresh_all(feeds, self.config.fetch_concurrency)
            .await;

        for (feed, result) in fetched {
            match result {
                Ok(entries) => {
                    let ingested = self.ingest_feed(&feed, entries).await?;
                    report.entries.merge(ingested);
                    report.feeds_updated += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch {}: {}", feed.url, e);
                    report.feeds_failed.push((feed.url, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn ingest_feed(&self, feed: &Feed, mut entries: Vec<RawEntry>) -> Result<IngestReport> {
        if let Some(content_fetcher) = &self.content_fetcher {
            let known = self.repository.known_source_urls(feed.id).await?;
            for entry in entries.iter_mut() {
                let Some(url) = entry.source_url.as_deref() else {
                    continue;
                };
                if known.contains(url) || !content_fetcher.needs_full_content(entry.body_text.as_deref()) {
                    continue;
                }
                match content_fetcher.fetch_full_content(url).await {
                    Ok(Some(text)) => entry.body_text = Some(text),
                    Ok(None) => {}
                    Err(e) => tracing::debug!("Full content unavailable for {}: {}", url, e),
                }
            }
        }

        ingest(&self.repository, feed.id, entries, Utc::now()).await
    }

    // Archival

    pub async fn archive(&self, retention_days: Option<u32>) -> Result<ArchivalReport> {
        let retention = retention_days
            .map(days_to_duration)
            .unwrap_or_else(|| self.config.retention());
        run_archival(&self.repository, &self.bundles, Utc::now(), retention).await
    }

    pub fn list_bundles(&self) -> Result<Vec<BundleKey>> {
        self.bundles.list()
    }

    pub fn read_bundle(&self, key: BundleKey) -> Result<Option<ArchiveBundle>> {
        self.bundles.read(key)
    }

    // Articles

    pub async fn article(&self, article_id: i64) -> Result<Article> {
        self.repository.get_article(article_id).await
    }

    pub async fn articles_by_feed(&self, feed_id: i64) -> Result<Vec<Article>> {
        self.repository.articles_by_feed(feed_id).await
    }

    pub async fn search(&self, tags: &[String], mode: TagMatch) -> Result<Vec<Article>> {
        self.repository
            .articles_by_tags(normalize_tags(tags), mode)
            .await
    }

    pub async fn add_tags(&self, article_id: i64, tags: &[String]) -> Result<BTreeSet<String>> {
        self.repository
            .add_tags(article_id, normalize_tags(tags))
            .await?;
        Ok(self.repository.get_article(article_id).await?.tags)
    }

    pub async fn remove_tags(&self, article_id: i64, tags: &[String]) -> Result<BTreeSet<String>> {
        self.repository
            .remove_tags(article_id, normalize_tags(tags))
            .await?;
        Ok(self.repository.get_article(article_id).await?.tags)
    }
}
