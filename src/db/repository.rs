use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{ArchiveCandidate, Article, Feed, NewArticle, TagMatch};

use super::mirror::RegistryMirror;
use super::schema::SCHEMA;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ARTICLE_COLUMNS: &str =
    "a.id, a.feed_id, a.source_url, a.title, a.body_text, a.published_at, a.retrieved_at";

/// Result of offering one article to the live store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate,
    AlreadyArchived,
}

pub struct Repository {
    conn: Connection,
    mirror: RegistryMirror,
}

impl Repository {
    /// Opens (creating if needed) the store at `db_path` and rewrites the
    /// registry mirror from it.
    pub async fn open(db_path: &Path, mirror: RegistryMirror) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        let repo = Self { conn, mirror };
        repo.sync_mirror().await?;
        Ok(repo)
    }

    // Feed operations

    pub async fn add_feed(
        &self,
        url: String,
        display_name: String,
        now: DateTime<Utc>,
    ) -> Result<Feed> {
        let mirror = self.mirror.clone();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM feeds WHERE url = ?1)",
                    params![url],
                    |row| row.get(0),
                )?;
                if exists {
                    return Ok(Err(AppError::DuplicateFeed(url)));
                }

                tx.execute(
                    "INSERT INTO feeds (url, display_name, created_at) VALUES (?1, ?2, ?3)",
                    params![url, display_name, format_datetime(&now)],
                )?;
                let id = tx.last_insert_rowid();

                if let Err(e) = mirror.write(all_feed_urls(&tx)?) {
                    return Ok(Err(AppError::Io(e)));
                }
                tx.commit()?;

                Ok(Ok(Feed {
                    id,
                    url,
                    display_name,
                    created_at: now,
                }))
            })
            .await?
    }

    pub async fn rename_feed(&self, feed_id: i64, new_name: String) -> Result<()> {
        let mirror = self.mirror.clone();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let changed = tx.execute(
                    "UPDATE feeds SET display_name = ?1 WHERE id = ?2",
                    params![new_name, feed_id],
                )?;
                if changed == 0 {
                    return Ok(Err(AppError::FeedNotFound(feed_id)));
                }
                if let Err(e) = mirror.write(all_feed_urls(&tx)?) {
                    return Ok(Err(AppError::Io(e)));
                }
                tx.commit()?;
                Ok(Ok(()))
            })
            .await?
    }

    /// Deletes a feed. Live articles block the delete unless `cascade` is
    /// set, in which case they are removed with it. Returns how many live
    /// articles went with the feed.
    pub async fn delete_feed(&self, feed_id: i64, cascade: bool) -> Result<usize> {
        let mirror = self.mirror.clone();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM feeds WHERE id = ?1)",
                    params![feed_id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(Err(AppError::FeedNotFound(feed_id)));
                }

                let count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM articles WHERE feed_id = ?1",
                    params![feed_id],
                    |row| row.get(0),
                )?;
                let count = count as usize;
                if count > 0 && !cascade {
                    return Ok(Err(AppError::FeedHasLiveArticles { feed_id, count }));
                }

                tx.execute("DELETE FROM articles WHERE feed_id = ?1", params![feed_id])?;
                tx.execute("DELETE FROM feeds WHERE id = ?1", params![feed_id])?;

                if let Err(e) = mirror.write(all_feed_urls(&tx)?) {
                    return Ok(Err(AppError::Io(e)));
                }
                tx.commit()?;
                Ok(Ok(count))
            })
            .await?
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, url, display_name, created_at FROM feeds ORDER BY created_at, id",
                )?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Feed> {
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        "SELECT id, url, display_name, created_at FROM feeds WHERE id = ?1",
                        params![feed_id],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        feed.ok_or(AppError::FeedNotFound(feed_id))
    }

    /// Rewrites the mirror from the store, which is the source of truth,
    /// when the two disagree.
    pub async fn sync_mirror(&self) -> Result<()> {
        let urls: BTreeSet<String> = self
            .conn
            .call(|conn| Ok(all_feed_urls(conn)?))
            .await?
            .into_iter()
            .collect();

        let mirrored = match self.mirror.read() {
            Ok(mirrored) => Some(mirrored),
            Err(e) => {
                tracing::warn!("Could not read {}: {}", self.mirror.path().display(), e);
                None
            }
        };
        if mirrored.as_ref() == Some(&urls) && self.mirror.path().exists() {
            return Ok(());
        }
        if mirrored.is_some_and(|m| !m.is_empty()) {
            tracing::warn!(
                "{} disagreed with the feed registry; rewriting it",
                self.mirror.path().display()
            );
        }
        self.mirror.write(urls)?;
        Ok(())
    }

    // Article operations

    /// Inserts each article in its own transaction. An identity that is
    /// already live or already archived is left untouched.
    pub async fn insert_articles(&self, articles: Vec<NewArticle>) -> Result<Vec<InsertOutcome>> {
        let outcomes = self
            .conn
            .call(move |conn| {
                let mut outcomes = Vec::with_capacity(articles.len());
                for article in articles {
                    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                    let archived: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM archived_articles WHERE feed_id = ?1 AND source_url = ?2)",
                        params![article.feed_id, article.source_url],
                        |row| row.get(0),
                    )?;
                    if archived {
                        outcomes.push(InsertOutcome::AlreadyArchived);
                        continue;
                    }

                    let inserted = tx.execute(
                        r#"INSERT INTO articles (feed_id, source_url, title, body_text, published_at, retrieved_at)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                           ON CONFLICT(feed_id, source_url) DO NOTHING"#,
                        params![
                            article.feed_id,
                            article.source_url,
                            article.title,
                            article.body_text,
                            format_datetime(&article.published_at),
                            format_datetime(&article.retrieved_at),
                        ],
                    )?;
                    let outcome = if inserted == 0 {
                        InsertOutcome::Duplicate
                    } else {
                        InsertOutcome::Inserted(tx.last_insert_rowid())
                    };
                    tx.commit()?;
                    outcomes.push(outcome);
                }
                Ok(outcomes)
            })
            .await?;
        Ok(outcomes)
    }

    /// Source URLs of a feed that are live or archived.
    pub async fn known_source_urls(&self, feed_id: i64) -> Result<HashSet<String>> {
        let urls = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT source_url FROM articles WHERE feed_id = ?1
                       UNION
                       SELECT source_url FROM archived_articles WHERE feed_id = ?1"#,
                )?;
                let urls = stmt
                    .query_map(params![feed_id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<HashSet<_>, _>>()?;
                Ok(urls)
            })
            .await?;
        Ok(urls)
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Article> {
        let article = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let article = tx
                    .query_row(
                        &format!("SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id = ?1"),
                        params![article_id],
                        article_from_row,
                    )
                    .optional()?;
                let article = match article {
                    Some(mut article) => {
                        load_tags(&tx, &mut article)?;
                        Some(article)
                    }
                    None => None,
                };
                Ok(article)
            })
            .await?;
        article.ok_or(AppError::ArticleNotFound(article_id))
    }

    pub async fn add_tags(&self, article_id: i64, tags: BTreeSet<String>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if !article_exists(&tx, article_id)? {
                    return Ok(Err(AppError::ArticleNotFound(article_id)));
                }
                for tag in &tags {
                    tx.execute(
                        "INSERT OR IGNORE INTO article_tags (article_id, tag) VALUES (?1, ?2)",
                        params![article_id, tag],
                    )?;
                }
                tx.commit()?;
                Ok(Ok(()))
            })
            .await?
    }

    pub async fn remove_tags(&self, article_id: i64, tags: BTreeSet<String>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if !article_exists(&tx, article_id)? {
                    return Ok(Err(AppError::ArticleNotFound(article_id)));
                }
                for tag in &tags {
                    tx.execute(
                        "DELETE FROM article_tags WHERE article_id = ?1 AND tag = ?2",
                        params![article_id, tag],
                    )?;
                }
                tx.commit()?;
                Ok(Ok(()))
            })
            .await?
    }

    // Queries

    /// Live articles of one feed, most recently retrieved first.
    pub async fn articles_by_feed(&self, feed_id: i64) -> Result<Vec<Article>> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM feeds WHERE id = ?1)",
                    params![feed_id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(Err(AppError::FeedNotFound(feed_id)));
                }

                let mut articles = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {ARTICLE_COLUMNS} FROM articles a
                         WHERE a.feed_id = ?1
                         ORDER BY a.retrieved_at DESC, a.id DESC"
                    ))?;
                    let articles = stmt
                        .query_map(params![feed_id], article_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    articles
                };
                for article in &mut articles {
                    load_tags(&tx, article)?;
                }
                Ok(Ok(articles))
            })
            .await?
    }

    /// Live articles carrying all (or any) of `tags`, ordered by id.
    pub async fn articles_by_tags(
        &self,
        tags: BTreeSet<String>,
        mode: TagMatch,
    ) -> Result<Vec<Article>> {
        if tags.is_empty() {
            return Err(AppError::InvalidQuery(
                "at least one tag is required".to_string(),
            ));
        }

        let placeholders = (1..=tags.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut values: Vec<Value> = tags.iter().cloned().map(Value::Text).collect();

        let filter = match mode {
            TagMatch::Any => {
                format!("SELECT article_id FROM article_tags WHERE tag IN ({placeholders})")
            }
            TagMatch::All => {
                values.push(Value::Integer(tags.len() as i64));
                format!(
                    "SELECT article_id FROM article_tags WHERE tag IN ({placeholders})
                     GROUP BY article_id HAVING COUNT(DISTINCT tag) = ?{}",
                    tags.len() + 1
                )
            }
        };
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id IN ({filter}) ORDER BY a.id"
        );

        let articles = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut articles = {
                    let mut stmt = tx.prepare(&sql)?;
                    let articles = stmt
                        .query_map(params_from_iter(values.iter()), article_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    articles
                };
                for article in &mut articles {
                    load_tags(&tx, article)?;
                }
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    // Archival support

    /// Live articles published strictly before `cutoff`, ordered by id.
    pub async fn archival_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<ArchiveCandidate>> {
        let cutoff = format_datetime(&cutoff);
        let candidates = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut candidates = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {ARTICLE_COLUMNS}, f.url FROM articles a
                         JOIN feeds f ON a.feed_id = f.id
                         WHERE a.published_at < ?1
                         ORDER BY a.id"
                    ))?;
                    let candidates = stmt
                        .query_map(params![cutoff], |row| {
                            Ok(ArchiveCandidate {
                                article: article_from_row(row)?,
                                feed_url: row.get(7)?,
                            })
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    candidates
                };
                for candidate in &mut candidates {
                    load_tags(&tx, &mut candidate.article)?;
                }
                Ok(candidates)
            })
            .await?;
        Ok(candidates)
    }

    /// Removes bundled articles from the live store and records their
    /// identities as archived, all in one transaction. Ids no longer live
    /// are skipped, so repeating the call is harmless. Returns how many
    /// rows were removed.
    pub async fn remove_archived(&self, article_ids: Vec<i64>, archived_at: DateTime<Utc>) -> Result<usize> {
        let archived_at = format_datetime(&archived_at);
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut removed = 0;
                for id in article_ids {
                    tx.execute(
                        r#"INSERT OR IGNORE INTO archived_articles (feed_id, source_url, archived_at)
                           SELECT feed_id, source_url, ?2 FROM articles WHERE id = ?1"#,
                        params![id, archived_at],
                    )?;
                    removed += tx.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    #[cfg(test)]
    pub async fn live_article_count(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await?;
        Ok(count)
    }
}

/// Canonical text form of stored timestamps; fixed width, so text order is
/// time order.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56.000000Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp {raw:?}").into(),
        )
    })
}

fn all_feed_urls(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT url FROM feeds")?;
    let urls = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(urls)
}

fn article_exists(conn: &rusqlite::Connection, article_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM articles WHERE id = ?1)",
        params![article_id],
        |row| row.get(0),
    )
}

fn load_tags(conn: &rusqlite::Connection, article: &mut Article) -> rusqlite::Result<()> {
    let mut stmt =
        conn.prepare_cached("SELECT tag FROM article_tags WHERE article_id = ?1 ORDER BY tag")?;
    article.tags = stmt
        .query_map(params![article.id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    Ok(())
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        display_name: row.get(2)?,
        created_at: datetime_column(row, 3)?,
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        source_url: row.get(2)?,
        title: row.get(3)?,
        body_text: row.get(4)?,
        published_at: datetime_column(row, 5)?,
        retrieved_at: datetime_column(row, 6)?,
        tags: BTreeSet::new(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::normalize_tags;

    async fn open_repo(dir: &Path) -> Repository {
        Repository::open(
            &dir.join("test.db"),
            RegistryMirror::new(dir.join("feeds.txt")),
        )
        .await
        .unwrap()
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    fn new_article(feed_id: i64, url: &str, day: u32) -> NewArticle {
        NewArticle {
            feed_id,
            source_url: url.to_string(),
            title: format!("Title of {url}"),
            body_text: "body".to_string(),
            published_at: ts(day),
            retrieved_at: ts(day),
        }
    }

    #[tokio::test]
    async fn add_feed_rejects_duplicate_url() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;

        repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        let err = repo
            .add_feed("http://x".into(), "Other".into(), ts(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateFeed(url) if url == "http://x"));
        assert_eq!(repo.list_feeds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn feeds_list_in_creation_order_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;

        let b = repo.add_feed("http://b".into(), "B".into(), ts(1)).await.unwrap();
        repo.add_feed("http://a".into(), "A".into(), ts(2)).await.unwrap();

        repo.rename_feed(b.id, "Renamed".into()).await.unwrap();
        repo.rename_feed(b.id, "Renamed".into()).await.unwrap();

        let feeds = repo.list_feeds().await.unwrap();
        let names: Vec<&str> = feeds.iter().map(|f| f.display_name.as_str()).collect();
        assert_eq!(names, vec!["Renamed", "A"]);

        assert!(matches!(
            repo.rename_feed(999, "nope".into()).await,
            Err(AppError::FeedNotFound(999))
        ));
    }

    #[tokio::test]
    async fn delete_feed_requires_cascade_when_articles_are_live() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;
        let feed = repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        repo.insert_articles(vec![new_article(feed.id, "http://x/1", 2)])
            .await
            .unwrap();

        let err = repo.delete_feed(feed.id, false).await.unwrap_err();
        assert!(matches!(err, AppError::FeedHasLiveArticles { count: 1, .. }));
        assert_eq!(repo.mirror.read().unwrap().len(), 1);

        assert_eq!(repo.delete_feed(feed.id, true).await.unwrap(), 1);
        assert_eq!(repo.live_article_count().await.unwrap(), 0);
        assert!(repo.list_feeds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mirror_tracks_registry_changes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;

        let x = repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        repo.add_feed("http://y".into(), "Y".into(), ts(1)).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("feeds.txt")).unwrap(),
            "http://x\nhttp://y\n"
        );

        repo.insert_articles(vec![new_article(x.id, "http://x/1", 2)])
            .await
            .unwrap();
        repo.delete_feed(x.id, true).await.unwrap();
        let urls = repo.mirror.read().unwrap();
        assert!(!urls.contains("http://x"));
        assert!(urls.contains("http://y"));
    }

    #[tokio::test]
    async fn open_repairs_a_diverged_mirror() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = open_repo(dir.path()).await;
            repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        }
        std::fs::write(dir.path().join("feeds.txt"), "http://stale\n").unwrap();

        let repo = open_repo(dir.path()).await;
        let urls = repo.mirror.read().unwrap();
        assert_eq!(urls.into_iter().collect::<Vec<_>>(), vec!["http://x".to_string()]);
    }

    #[tokio::test]
    async fn failed_mirror_write_rolls_back_the_add() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let repo = Repository::open(
            &dir.path().join("test.db"),
            RegistryMirror::new(dir.path().join("feeds.txt")),
        )
        .await
        .unwrap();
        let broken = Repository {
            conn: repo.conn.clone(),
            mirror: RegistryMirror::new(blocker.join("feeds.txt")),
        };

        let err = broken
            .add_feed("http://x".into(), "X".into(), ts(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert!(repo.list_feeds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_keeps_identity_unique_and_fields_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;
        let feed = repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();

        let first = repo
            .insert_articles(vec![new_article(feed.id, "http://x/1", 2)])
            .await
            .unwrap();
        let InsertOutcome::Inserted(id) = first[0] else {
            panic!("expected insert, got {:?}", first[0]);
        };

        let mut again = new_article(feed.id, "http://x/1", 9);
        again.title = "changed".to_string();
        let second = repo.insert_articles(vec![again]).await.unwrap();
        assert_eq!(second, vec![InsertOutcome::Duplicate]);

        let stored = repo.get_article(id).await.unwrap();
        assert_eq!(stored.title, "Title of http://x/1");
        assert_eq!(stored.retrieved_at, ts(2));
        assert_eq!(repo.live_article_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn archived_identity_is_not_reingested() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;
        let feed = repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        let outcomes = repo
            .insert_articles(vec![new_article(feed.id, "http://x/1", 2)])
            .await
            .unwrap();
        let InsertOutcome::Inserted(id) = outcomes[0] else {
            panic!("expected insert");
        };

        assert_eq!(repo.remove_archived(vec![id], ts(20)).await.unwrap(), 1);
        assert_eq!(repo.remove_archived(vec![id], ts(21)).await.unwrap(), 0);

        let outcomes = repo
            .insert_articles(vec![new_article(feed.id, "http://x/1", 3)])
            .await
            .unwrap();
        assert_eq!(outcomes, vec![InsertOutcome::AlreadyArchived]);
        assert!(repo.known_source_urls(feed.id).await.unwrap().contains("http://x/1"));
    }

    #[tokio::test]
    async fn tag_queries_match_all_and_any() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;
        let feed = repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        let outcomes = repo
            .insert_articles(vec![
                new_article(feed.id, "http://x/1", 2),
                new_article(feed.id, "http://x/2", 3),
                new_article(feed.id, "http://x/3", 4),
            ])
            .await
            .unwrap();
        let ids: Vec<i64> = outcomes
            .iter()
            .map(|o| match o {
                InsertOutcome::Inserted(id) => *id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();

        repo.add_tags(ids[0], normalize_tags(["a", "b"])).await.unwrap();
        repo.add_tags(ids[1], normalize_tags(["a"])).await.unwrap();
        repo.add_tags(ids[2], normalize_tags(["b", "c"])).await.unwrap();

        let any = repo
            .articles_by_tags(normalize_tags(["a", "c"]), TagMatch::Any)
            .await
            .unwrap();
        assert_eq!(any.iter().map(|a| a.id).collect::<Vec<_>>(), ids);

        let all = repo
            .articles_by_tags(normalize_tags(["a", "b"]), TagMatch::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, ids[0]);
        assert_eq!(all[0].tags, normalize_tags(["a", "b"]));

        let err = repo
            .articles_by_tags(BTreeSet::new(), TagMatch::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn remove_tags_and_unknown_article() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;
        let feed = repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        let outcomes = repo
            .insert_articles(vec![new_article(feed.id, "http://x/1", 2)])
            .await
            .unwrap();
        let InsertOutcome::Inserted(id) = outcomes[0] else {
            panic!("expected insert");
        };

        repo.add_tags(id, normalize_tags(["a", "b"])).await.unwrap();
        repo.add_tags(id, normalize_tags(["a"])).await.unwrap();
        repo.remove_tags(id, normalize_tags(["a", "zzz"])).await.unwrap();
        assert_eq!(repo.get_article(id).await.unwrap().tags, normalize_tags(["b"]));

        assert!(matches!(
            repo.add_tags(4242, normalize_tags(["a"])).await,
            Err(AppError::ArticleNotFound(4242))
        ));
    }

    #[tokio::test]
    async fn articles_by_feed_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;
        let feed = repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        repo.insert_articles(vec![
            new_article(feed.id, "http://x/old", 2),
            new_article(feed.id, "http://x/new", 5),
            new_article(feed.id, "http://x/mid", 3),
        ])
        .await
        .unwrap();

        let urls: Vec<String> = repo
            .articles_by_feed(feed.id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.source_url)
            .collect();
        assert_eq!(urls, vec!["http://x/new", "http://x/mid", "http://x/old"]);

        assert!(matches!(
            repo.articles_by_feed(77).await,
            Err(AppError::FeedNotFound(77))
        ));
    }

    #[tokio::test]
    async fn candidates_are_strictly_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;
        let feed = repo.add_feed("http://x".into(), "X".into(), ts(1)).await.unwrap();
        repo.insert_articles(vec![
            new_article(feed.id, "http://x/1", 2),
            new_article(feed.id, "http://x/2", 10),
        ])
        .await
        .unwrap();

        let candidates = repo.archival_candidates(ts(10)).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].article.source_url, "http://x/1");
        assert_eq!(candidates[0].feed_url, "http://x");
    }

    #[test]
    fn timestamps_format_fixed_width() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(format_datetime(&dt), "2024-05-01T10:00:00.000000Z");
        assert_eq!(parse_datetime("2024-05-01 10:00:00"), Some(dt));
        assert_eq!(parse_datetime(&format_datetime(&dt)), Some(dt));
    }
}
