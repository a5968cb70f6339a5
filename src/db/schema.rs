pub const SCHEMA: &str = r#"
-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- articles table (the live store)
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id),
    source_url TEXT NOT NULL,
    title TEXT NOT NULL,
    body_text TEXT NOT NULL,
    published_at TEXT NOT NULL,
    retrieved_at TEXT NOT NULL,
    UNIQUE(feed_id, source_url)
);

CREATE INDEX IF NOT EXISTS idx_articles_feed_retrieved ON articles(feed_id, retrieved_at DESC);
CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles(published_at);

-- article_tags table
CREATE TABLE IF NOT EXISTS article_tags (
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (article_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_article_tags_tag ON article_tags(tag);

-- archived_articles table (prevents re-ingesting articles already moved to a bundle)
CREATE TABLE IF NOT EXISTS archived_articles (
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    source_url TEXT NOT NULL,
    archived_at TEXT NOT NULL,
    PRIMARY KEY (feed_id, source_url)
);
"#;
