use std::time::Duration;

use feed_rs::model::Entry;
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;

use crate::error::Result;
use crate::models::{Feed, FeedMetadata, RawEntry};

const TEXT_WIDTH: usize = 80;

pub struct FeedFetcher {
    client: Client,
}

struct FetchedBody {
    final_url: String,
    content_type: String,
    bytes: Vec<u8>,
}

impl FetchedBody {
    fn looks_like_html(&self) -> bool {
        self.content_type.contains("html")
            || self.bytes.starts_with(b"<!")
            || self.bytes.starts_with(b"<html")
    }
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("rss-archiver/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<FetchedBody> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch {}: HTTP {}", url, response.status()).into());
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(FetchedBody {
            final_url,
            content_type,
            bytes,
        })
    }

    /// Downloads a feed and normalizes its entries.
    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<RawEntry>> {
        let body = self.fetch_bytes(url).await?;
        let feed = parser::parse(&body.bytes[..])?;
        Ok(feed.entries.into_iter().map(raw_entry).collect())
    }

    /// Fetch all feeds concurrently, at most `concurrency` at a time
    pub async fn refresh_all(
        &self,
        feeds: Vec<Feed>,
        concurrency: usize,
    ) -> Vec<(Feed, Result<Vec<RawEntry>>)> {
        stream::iter(feeds)
            .map(|feed| async move {
                let result = self.fetch_feed(&feed.url).await;
                match &result {
                    Ok(entries) => {
                        tracing::debug!("Fetched {} entries from {}", entries.len(), feed.url)
                    }
                    Err(e) => tracing::debug!("Failed to fetch {}: {}", feed.url, e),
                }
                (feed, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Discover a feed from a URL
    /// If the URL is a direct RSS/Atom feed, its title is used
    /// If it's an HTML page, the feed advertised in its <link> tags is followed
    pub async fn discover_feed(&self, url: &str) -> Result<FeedMetadata> {
        let body = self.fetch_bytes(url).await?;

        // Try parsing as RSS/Atom feed first
        if let Ok(feed) = parser::parse(&body.bytes[..]) {
            return Ok(FeedMetadata {
                url: url.to_string(),
                title: feed.title.map(|t| t.content),
            });
        }

        // If content looks like HTML, search for feed links
        if body.looks_like_html() {
            let html = String::from_utf8_lossy(&body.bytes);
            if let Some(feed_url) = find_feed_link(&html, &body.final_url) {
                let linked = self.fetch_bytes(&feed_url).await?;
                let feed = parser::parse(&linked.bytes[..])?;
                return Ok(FeedMetadata {
                    url: feed_url,
                    title: feed.title.map(|t| t.content),
                });
            }
        }

        Err(anyhow::anyhow!("Could not find RSS/Atom feed at {}", url).into())
    }
}

fn raw_entry(entry: Entry) -> RawEntry {
    // Try content first, then fall back to summary
    let content_html = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_ref())
        .or_else(|| entry.summary.as_ref().map(|s| &s.content));

    let body_text = content_html.and_then(|html| html_to_text(html));

    let source_url = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .or_else(|| {
            let id = entry.id.trim();
            (id.starts_with("http://") || id.starts_with("https://")).then(|| id.to_string())
        });

    RawEntry {
        source_url,
        title: entry.title.map(|t| t.content),
        body_text,
        published_at: entry.published.or(entry.updated).map(|dt| dt.to_rfc3339()),
    }
}

fn html_to_text(html: &str) -> Option<String> {
    html2text::from_read(html.as_bytes(), TEXT_WIDTH).ok()
}

/// Search HTML for RSS/Atom feed links
fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    // Look for <link rel="alternate" type="application/rss+xml" href="...">
    // or <link rel="alternate" type="application/atom+xml" href="...">
    let link_re = Regex::new(
        r#"<link[^>]*rel=["']alternate["'][^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#
    ).ok()?;

    // Also try reverse order (type before rel)
    let link_re2 = Regex::new(
        r#"<link[^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#
    ).ok()?;

    let href = link_re
        .captures(html)
        .or_else(|| link_re2.captures(html))
        .and_then(|cap| cap.get(2))
        .map(|m| m.as_str().to_string())?;

    Some(resolve_url(&href, base_url))
}

/// Resolve a potentially relative URL against a base URL
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_string()
}
