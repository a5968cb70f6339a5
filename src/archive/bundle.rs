use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::{AppError, Result};
use crate::models::{ArchiveBundle, ArchivedArticle, BundleKey};

const LOCK_FILE: &str = ".lock";

/// The on-disk archive: one gzip-compressed JSON bundle per year/month under
/// `<root>/<YYYY>/<MM>/`.
#[derive(Debug, Clone)]
pub struct BundleStore {
    root: PathBuf,
}

/// Exclusive hold on the archive directory for the length of one run.
#[derive(Debug)]
pub struct ArchiveLock {
    file: File,
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl BundleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn bundle_path(&self, key: BundleKey) -> PathBuf {
        self.root
            .join(format!("{:04}", key.year))
            .join(format!("{:02}", key.month))
            .join(format!("articles_{:04}_{:02}.json.gz", key.year, key.month))
    }

    /// Takes the archive lock without waiting; a run already in progress
    /// makes this fail with `ArchiveLocked`.
    pub fn lock(&self) -> Result<ArchiveLock> {
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| AppError::ArchiveLocked(path))?;
        Ok(ArchiveLock { file })
    }

    pub fn read(&self, key: BundleKey) -> Result<Option<ArchiveBundle>> {
        let path = self.bundle_path(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bundle = serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?;
        Ok(Some(bundle))
    }

    /// Replaces the bundle file atomically. The new content is written and
    /// flushed to a temporary file in the same directory, then renamed over
    /// the old one; on any error the temporary file is removed on drop.
    pub fn write(&self, bundle: &ArchiveBundle) -> Result<PathBuf> {
        let path = self.bundle_path(bundle.key());
        let dir = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("bundle path {} has no parent", path.display()))?;
        fs::create_dir_all(dir)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer_pretty(&mut encoder, bundle)?;
        let compressed = encoder.finish()?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&compressed)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| AppError::Io(e.error))?;
        // The rename is only durable once the directory entry is on disk.
        File::open(dir)?.sync_all()?;
        Ok(path)
    }

    /// Read-modify-write-swap of one bundle: appends the snapshots whose
    /// identity is not bundled yet. Nothing is written when every snapshot
    /// is already present. Returns the number appended.
    pub fn merge(
        &self,
        key: BundleKey,
        snapshots: Vec<ArchivedArticle>,
        written_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut bundle = self
            .read(key)?
            .unwrap_or_else(|| ArchiveBundle::empty(key, written_at));

        let appended = bundle.append_new(snapshots);
        if appended > 0 {
            bundle.written_at = written_at;
            let path = self.write(&bundle)?;
            tracing::debug!("Wrote {} ({} new articles)", path.display(), appended);
        }
        Ok(appended)
    }

    /// Every bundle present on disk, oldest first.
    pub fn list(&self) -> Result<Vec<BundleKey>> {
        let mut keys = Vec::new();
        for year_dir in read_dir_if_exists(&self.root)? {
            let Some(year) = parse_component::<i32>(&year_dir) else {
                continue;
            };
            for month_dir in read_dir_if_exists(&year_dir)? {
                let Some(month) = parse_component::<u32>(&month_dir) else {
                    continue;
                };
                let key = BundleKey::new(year, month);
                if self.bundle_path(key).is_file() {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn read_dir_if_exists(dir: &Path) -> Result<Vec<PathBuf>> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn parse_component<T: std::str::FromStr>(path: &Path) -> Option<T> {
    path.file_name()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;

    use super::*;

    fn snapshot(id: i64, url: &str) -> ArchivedArticle {
        let ts = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        ArchivedArticle {
            article_id: id,
            feed_id: 1,
            feed_url: "http://feed".to_string(),
            source_url: url.to_string(),
            title: "Titolo è unicode".to_string(),
            body_text: "body".to_string(),
            published_at: ts,
            retrieved_at: ts,
            tags: ["x".to_string()].into_iter().collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn bundle_path_is_partitioned_by_year_and_month() {
        let store = BundleStore::new("/srv/archive");
        assert_eq!(
            store.bundle_path(BundleKey::new(2024, 2)),
            PathBuf::from("/srv/archive/2024/02/articles_2024_02.json.gz")
        );
    }

    #[test]
    fn merge_writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = BundleStore::new(dir.path());
        let key = BundleKey::new(2024, 2);
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

        assert!(store.read(key).unwrap().is_none());
        assert_eq!(store.merge(key, vec![snapshot(1, "a")], now).unwrap(), 1);

        let bundle = store.read(key).unwrap().unwrap();
        assert_eq!(bundle.key(), key);
        assert_eq!(bundle.written_at, now);
        assert_eq!(bundle.articles, vec![snapshot(1, "a")]);
        assert_eq!(store.list().unwrap(), vec![key]);
    }

    #[test]
    fn merge_without_new_articles_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = BundleStore::new(dir.path());
        let key = BundleKey::new(2024, 2);
        let first = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        store.merge(key, vec![snapshot(1, "a")], first).unwrap();
        let before = fs::read(store.bundle_path(key)).unwrap();

        assert_eq!(store.merge(key, vec![snapshot(1, "a")], later).unwrap(), 0);
        assert_eq!(fs::read(store.bundle_path(key)).unwrap(), before);
    }

    #[test]
    fn identical_bundles_encode_identically() {
        let dir = tempfile::tempdir().unwrap();
        let a = BundleStore::new(dir.path().join("a"));
        let b = BundleStore::new(dir.path().join("b"));
        let key = BundleKey::new(2024, 2);
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

        a.merge(key, vec![snapshot(1, "a"), snapshot(2, "b")], now).unwrap();
        b.merge(key, vec![snapshot(1, "a"), snapshot(2, "b")], now).unwrap();
        assert_eq!(
            fs::read(a.bundle_path(key)).unwrap(),
            fs::read(b.bundle_path(key)).unwrap()
        );
    }

    #[test]
    fn write_replaces_bundle_without_temp_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = BundleStore::new(dir.path());
        let key = BundleKey::new(2024, 2);

        store.merge(key, vec![snapshot(1, "a")], Utc::now()).unwrap();
        store.merge(key, vec![snapshot(2, "b")], Utc::now()).unwrap();
        let path = store.bundle_path(key);

        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("articles_2024_02.json.gz")]);
        assert_eq!(store.read(key).unwrap().unwrap().articles.len(), 2);
    }

    #[test]
    fn failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = BundleStore::new(dir.path());
        let key = BundleKey::new(2024, 2);
        let path = store.bundle_path(key);
        // A directory squatting on the bundle name makes the final rename fail.
        fs::create_dir_all(&path).unwrap();

        let result = store.merge(key, vec![snapshot(1, "a")], Utc::now());
        assert!(result.is_err());

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != path)
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn second_lock_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let store = BundleStore::new(dir.path());

        let held = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(AppError::ArchiveLocked(_))));
        drop(held);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn list_ignores_unrelated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = BundleStore::new(dir.path());
        fs::create_dir_all(dir.path().join("notes")).unwrap();
        fs::create_dir_all(dir.path().join("2023").join("07")).unwrap();
        let now = Utc::now();
        store.merge(BundleKey::new(2024, 1), vec![snapshot(2, "b")], now).unwrap();
        store.merge(BundleKey::new(2023, 12), vec![snapshot(1, "a")], now).unwrap();

        assert_eq!(
            store.list().unwrap(),
            vec![BundleKey::new(2023, 12), BundleKey::new(2024, 1)]
        );
    }
}
