use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use url::Url;

use crate::error::Result;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Scrapes the article page itself when a feed only carries a teaser.
pub struct ContentFetcher {
    client: Client,
    min_chars: usize,
}

impl ContentFetcher {
    pub fn new(timeout: Duration, min_chars: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()?;
        Ok(Self { client, min_chars })
    }

    /// Whether a feed-provided body is too short to keep as is.
    pub fn needs_full_content(&self, body: Option<&str>) -> bool {
        body.map_or(0, |b| b.trim().chars().count()) < self.min_chars
    }

    /// Readable text of the page at `article_url`. `None` when the page is
    /// not HTML, answers with an error status, or holds too little text.
    pub async fn fetch_full_content(&self, article_url: &str) -> Result<Option<String>> {
        match Url::parse(article_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Ok(None),
        }

        let response = self.client.get(article_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Skipping full content for {}: HTTP {}", article_url, status);
            return Ok(None);
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(true, |ct| ct.contains("html"));
        if !is_html {
            return Ok(None);
        }

        let page = response.text().await?;
        Ok(extract_content(&page, self.min_chars))
    }
}

fn extract_content(html: &str, min_chars: usize) -> Option<String> {
    let text = html2text::from_read(html.as_bytes(), 80)
        .inspect_err(|e| tracing::debug!("Could not convert page to text: {}", e))
        .ok()?;

    let paragraphs: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let body = paragraphs.join("\n");

    let chars = body.chars().count();
    if chars > min_chars {
        Some(body)
    } else {
        tracing::debug!("Page text too short to replace the feed body ({} chars)", chars);
        None
    }
}
