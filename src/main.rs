use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod app;
mod archive;
mod config;
mod db;
mod error;
mod feed;
mod ingest;
mod models;
mod services;

use app::App;
use config::Config;
use error::Result;
use models::{ArchivalReport, Article, BundleKey, Feed, TagMatch, UpdateReport};

/// Completed, but some entries, feeds or archive groups failed.
const EXIT_PARTIAL: u8 = 1;
/// Nothing could be done: bad configuration, unreachable store, bad input.
const EXIT_FATAL: u8 = 2;

const WRAP_WIDTH: usize = 80;

#[derive(Parser, Debug)]
#[command(name = "rss-archiver")]
#[command(about = "Archive articles from RSS feeds, tag them, and move old ones to monthly archives")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "RSS_ARCHIVER_CONFIG")]
    config: Option<PathBuf>,

    /// Log progress at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage registered feeds
    Feeds {
        #[command(subcommand)]
        action: FeedsAction,
    },
    /// Fetch feeds and store new articles
    Update {
        /// Only this feed
        #[arg(long)]
        feed: Option<i64>,
    },
    /// Move old articles to the archive, or inspect the archive
    Archive {
        #[command(subcommand)]
        action: Option<ArchiveAction>,
        /// Retention threshold in days (defaults to the configured value)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Archive old articles, then fetch new ones
    Sync {
        #[arg(long)]
        days: Option<u32>,
    },
    /// List the live articles of a feed, newest first
    Articles { feed_id: i64 },
    /// Find live articles by tag
    Search {
        #[arg(required = true)]
        tags: Vec<String>,
        /// Match articles carrying any of the tags instead of all of them
        #[arg(long)]
        any: bool,
    },
    /// Add tags to an article
    Tag {
        article_id: i64,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Remove tags from an article
    Untag {
        article_id: i64,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Print an article
    Show {
        article_id: i64,
        /// Also write the article to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum FeedsAction {
    List,
    Add {
        url: String,
        /// Display name; skips fetching the feed for its title
        #[arg(long)]
        name: Option<String>,
    },
    Rename {
        feed_id: i64,
        name: String,
    },
    Delete {
        feed_id: i64,
        /// Also delete the feed's live articles
        #[arg(long)]
        cascade: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ArchiveAction {
    /// List archive bundles
    List,
    /// Print the articles of one bundle
    Show { year: i32, month: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Clean,
    Partial,
}

impl Outcome {
    fn from_failures(failed: bool) -> Self {
        if failed {
            Outcome::Partial
        } else {
            Outcome::Clean
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;
    if let Err(e) = &result {
        if !e.is_caller_error() {
            tracing::error!("{}", e);
        }
        eprintln!("Error: {}", e);
    }
    ExitCode::from(exit_status(&result))
}

/// `RUST_LOG` when set; otherwise warnings, or info with `--verbose`.
fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    let default_level = if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    EnvFilter::builder()
        .with_default_directive(default_level.into())
        .parse_lossy(rust_log.unwrap_or_default())
}

fn exit_status(result: &Result<Outcome>) -> u8 {
    match result {
        Ok(Outcome::Clean) => 0,
        Ok(Outcome::Partial) => EXIT_PARTIAL,
        Err(_) => EXIT_FATAL,
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let config = Config::load(cli.config.as_deref())?;
    let app = App::new(config).await?;

    match cli.command {
        Command::Feeds { action } => run_feeds(&app, action).await,

        Command::Update { feed } => {
            let report = app.update(feed).await?;
            print_update(&report);
            Ok(Outcome::from_failures(report.has_failures()))
        }

        Command::Archive { action: None, days } => {
            let report = app.archive(days).await?;
            print_archival(&report);
            Ok(Outcome::from_failures(report.has_failures()))
        }

        Command::Archive {
            action: Some(ArchiveAction::List),
            ..
        } => {
            for key in app.list_bundles()? {
                println!("{key}");
            }
            Ok(Outcome::Clean)
        }

        Command::Archive {
            action: Some(ArchiveAction::Show { year, month }),
            ..
        } => {
            let key = BundleKey::new(year, month);
            match app.read_bundle(key)? {
                Some(bundle) => {
                    for article in &bundle.articles {
                        println!(
                            "{:>6}  {}  {}  ({})",
                            article.article_id,
                            article.published_at.format("%Y-%m-%d"),
                            article.title,
                            article.source_url
                        );
                    }
                }
                None => println!("No bundle for {key}"),
            }
            Ok(Outcome::Clean)
        }

        Command::Sync { days } => {
            let archived = app.archive(days).await?;
            print_archival(&archived);
            let updated = app.update(None).await?;
            print_update(&updated);
            Ok(Outcome::from_failures(
                archived.has_failures() || updated.has_failures(),
            ))
        }

        Command::Articles { feed_id } => {
            print_articles(&app.articles_by_feed(feed_id).await?);
            Ok(Outcome::Clean)
        }

        Command::Search { tags, any } => {
            let mode = if any { TagMatch::Any } else { TagMatch::All };
            print_articles(&app.search(&tags, mode).await?);
            Ok(Outcome::Clean)
        }

        Command::Tag { article_id, tags } => {
            let tags = app.add_tags(article_id, &tags).await?;
            println!("{}", join_tags(&tags));
            Ok(Outcome::Clean)
        }

        Command::Untag { article_id, tags } => {
            let tags = app.remove_tags(article_id, &tags).await?;
            println!("{}", join_tags(&tags));
            Ok(Outcome::Clean)
        }

        Command::Show { article_id, save } => {
            let article = app.article(article_id).await?;
            let feed = app.feed(article.feed_id).await?;
            let text = render_article(&article, &feed);
            print!("{text}");
            if let Some(path) = save {
                std::fs::write(&path, &text)?;
                println!("Saved to {}", path.display());
            }
            Ok(Outcome::Clean)
        }
    }
}

async fn run_feeds(app: &App, action: FeedsAction) -> Result<Outcome> {
    match action {
        FeedsAction::List => {
            for feed in app.list_feeds().await? {
                println!("{:>4}  {}  {}", feed.id, feed.display_name, feed.url);
            }
        }
        FeedsAction::Add { url, name } => {
            let feed = app.add_feed(&url, name).await?;
            println!("Added feed {}: {} ({})", feed.id, feed.display_name, feed.url);
        }
        FeedsAction::Rename { feed_id, name } => {
            app.rename_feed(feed_id, &name).await?;
            println!("Renamed feed {feed_id} to {name}");
        }
        FeedsAction::Delete { feed_id, cascade } => {
            let removed = app.delete_feed(feed_id, cascade).await?;
            println!("Deleted feed {feed_id} ({removed} live articles removed)");
        }
    }
    Ok(Outcome::Clean)
}

fn join_tags(tags: &std::collections::BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn print_articles(articles: &[Article]) {
    for article in articles {
        let tags = if article.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", join_tags(&article.tags))
        };
        println!(
            "{:>6}  {}  {}{}",
            article.id,
            article.published_at.format("%Y-%m-%d"),
            article.title,
            tags
        );
    }
}

fn render_article(article: &Article, feed: &Feed) -> String {
    let mut out = String::new();
    out.push_str(&article.title);
    out.push('\n');
    out.push_str(&"=".repeat(article.title.chars().count().min(WRAP_WIDTH)));
    out.push('\n');
    out.push_str(&format!("Feed:      {}\n", feed.display_name));
    out.push_str(&format!("Source:    {}\n", article.source_url));
    out.push_str(&format!("Published: {}\n", article.published_at.format("%Y-%m-%d %H:%M")));
    out.push_str(&format!("Retrieved: {}\n", article.retrieved_at.format("%Y-%m-%d %H:%M")));
    if !article.tags.is_empty() {
        out.push_str(&format!("Tags:      {}\n", join_tags(&article.tags)));
    }
    out.push('\n');
    for paragraph in article.body_text.lines() {
        out.push_str(&textwrap::fill(paragraph, WRAP_WIDTH));
        out.push('\n');
    }
    out
}

fn print_update(report: &UpdateReport) {
    println!(
        "Updated {} feeds: {} added, {} duplicates, {} failed entries",
        report.feeds_updated,
        report.entries.added,
        report.entries.skipped_duplicate,
        report.entries.failed
    );
    for failure in &report.entries.failures {
        println!("  entry failed: {failure}");
    }
    for (url, error) in &report.feeds_failed {
        println!("  feed failed: {url}: {error}");
    }
}

fn print_archival(report: &ArchivalReport) {
    let touched = report
        .bundles_touched
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    println!("Archived {} articles into [{}]", report.moved, touched);
    for failure in &report.failed_groups {
        println!("  {} failed: {}", failure.key, failure.error);
    }
}
