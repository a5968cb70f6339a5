mod archive;
mod article;
mod feed;
mod report;

pub use archive::{ArchiveBundle, ArchiveCandidate, ArchivedArticle, BundleKey};
pub use article::{normalize_tags, Article, NewArticle, RawEntry, TagMatch};
pub use feed::{Feed, FeedMetadata};
pub use report::{ArchivalReport, EntryError, GroupFailure, IngestReport, UpdateReport};
