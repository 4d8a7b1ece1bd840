//! Disk Store Module
//!
//! Durable cache tier: one file per fingerprint, framed as
//! `[u32 big-endian metadata length][JSON metadata][raw payload]`.
//!
//! Every I/O failure is logged and degrades to a miss.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use directories::ProjectDirs;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{digest_hex, CacheEntry, CacheMetadata};

const FILE_EXTENSION: &str = "cache";
const LENGTH_PREFIX: usize = 4;
/// Metadata blocks larger than this are treated as corruption.
const MAX_METADATA_LEN: usize = 64 * 1024;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// == Format Errors ==
#[derive(Debug, Error)]
pub enum DiskFormatError {
    #[error("file truncated")]
    Truncated,
    #[error("metadata block of {0} bytes exceeds limit")]
    MetadataTooLarge(usize),
    #[error("metadata unreadable: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

// == Framing ==
/// Serializes an entry into the on-disk layout.
pub fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, DiskFormatError> {
    let metadata = serde_json::to_vec(&entry.metadata)?;
    let len = u32::try_from(metadata.len())
        .map_err(|_| DiskFormatError::MetadataTooLarge(metadata.len()))?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + metadata.len() + entry.payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&metadata);
    buf.extend_from_slice(&entry.payload);
    Ok(buf)
}

/// Parses the on-disk layout back into an entry.
pub fn decode_entry(bytes: &[u8]) -> Result<CacheEntry, DiskFormatError> {
    let len = metadata_len(bytes.get(..LENGTH_PREFIX).ok_or(DiskFormatError::Truncated)?)?;
    let end = LENGTH_PREFIX + len;
    let metadata: CacheMetadata =
        serde_json::from_slice(bytes.get(LENGTH_PREFIX..end).ok_or(DiskFormatError::Truncated)?)?;
    Ok(CacheEntry::new(bytes[end..].to_vec(), metadata))
}

fn metadata_len(prefix: &[u8]) -> Result<usize, DiskFormatError> {
    let mut raw = [0u8; LENGTH_PREFIX];
    raw.copy_from_slice(prefix);
    let len = u32::from_be_bytes(raw) as usize;
    if len > MAX_METADATA_LEN {
        return Err(DiskFormatError::MetadataTooLarge(len));
    }
    Ok(len)
}

/// Reads only the framed metadata, leaving the payload on disk.
fn read_metadata(path: &Path) -> Result<CacheMetadata, DiskFormatError> {
    let mut file = File::open(path)?;
    let mut prefix = [0u8; LENGTH_PREFIX];
    file.read_exact(&mut prefix).map_err(truncated)?;
    let mut block = vec![0u8; metadata_len(&prefix)?];
    file.read_exact(&mut block).map_err(truncated)?;
    Ok(serde_json::from_slice(&block)?)
}

fn truncated(err: io::Error) -> DiskFormatError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        DiskFormatError::Truncated
    } else {
        DiskFormatError::Io(err)
    }
}

// == Sweep Report ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Result of deleting a file that was read as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Deleted,
    Kept,
    Failed,
}

// == Disk Store ==
/// Handle to the cache directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: Arc<PathBuf>,
}

impl DiskStore {
    /// Opens (and creates if needed) a cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %err, "Failed to create disk cache directory");
        }
        Self { dir: Arc::new(dir) }
    }

    /// Platform cache directory for this application.
    pub fn default_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "relay_cache").map(|dirs| dirs.cache_dir().to_path_buf())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the given fingerprint.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", digest_hex(key.as_bytes()), FILE_EXTENSION))
    }

    // == Get ==
    /// Reads an unexpired entry. Expired or corrupt files are deleted.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Disk cache read failed");
                return None;
            }
        };

        let entry = match decode_entry(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Corrupt disk cache entry, removing");
                self.remove_if_stale(&path);
                return None;
            }
        };

        if entry.is_expired() {
            debug!(key, "Disk cache entry expired");
            self.remove_if_stale(&path);
            return None;
        }
        Some(entry)
    }

    // == Set ==
    /// Writes an entry atomically (temp file + rename). Returns success.
    pub fn set(&self, key: &str, entry: &CacheEntry) -> bool {
        let path = self.path_for(key);
        match self.write_atomic(&path, entry) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Disk cache write failed");
                false
            }
        }
    }

    fn write_atomic(&self, path: &Path, entry: &CacheEntry) -> Result<(), DiskFormatError> {
        let bytes = encode_entry(entry)?;
        fs::create_dir_all(self.dir.as_path())?;

        let tmp = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
        if let Err(err) = written.and_then(|_| fs::rename(&tmp, path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    // == Remove ==
    pub fn remove(&self, key: &str) -> bool {
        let path = self.path_for(key);
        path.exists() && self.delete_file(&path)
    }

    /// Deletes every cache file; returns how many were removed.
    pub fn clear(&self) -> usize {
        self.cache_files()
            .into_iter()
            .filter(|path| self.delete_file(path))
            .count()
    }

    // == Sweep ==
    /// Deletes expired and unreadable files.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for path in self.cache_files() {
            report.scanned += 1;
            let stale = match read_metadata(&path) {
                Ok(metadata) => metadata.is_expired(),
                Err(DiskFormatError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                    continue;
                }
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "Unreadable cache file");
                    true
                }
            };

            if stale {
                match self.remove_if_stale(&path) {
                    Removal::Deleted => report.removed += 1,
                    Removal::Failed => report.failed += 1,
                    Removal::Kept => {}
                }
            }
        }

        report
    }

    fn cache_files(&self) -> Vec<PathBuf> {
        let reader = match fs::read_dir(self.dir.as_path()) {
            Ok(reader) => reader,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "Cannot list disk cache");
                return Vec::new();
            }
        };

        reader
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == FILE_EXTENSION))
            .collect()
    }

    /// Deletes a file judged stale, unless a writer has since renamed a
    /// fresh entry onto the same path.
    fn remove_if_stale(&self, path: &Path) -> Removal {
        match read_metadata(path) {
            Ok(metadata) if !metadata.is_expired() => {
                debug!(path = %path.display(), "Cache file replaced by a fresh entry, keeping");
                Removal::Kept
            }
            Err(DiskFormatError::Io(err)) if err.kind() == io::ErrorKind::NotFound => Removal::Kept,
            _ if self.delete_file(path) => Removal::Deleted,
            _ => Removal::Failed,
        }
    }

    fn delete_file(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to delete cache file");
                false
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Classification, PriorityClass};
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (DiskStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = DiskStore::new(temp_dir.path());
        (store, temp_dir)
    }

    fn entry(payload: &[u8], ttl: Option<Duration>) -> CacheEntry {
        let classification = Classification {
            priority: PriorityClass::Upcoming,
            is_empty: false,
            has_live_content: false,
            transient_empty: false,
        };
        CacheEntry::new(payload.to_vec(), CacheMetadata::new(ttl, &classification))
    }

    #[test]
    fn test_roundtrip() {
        let (store, _dir) = create_test_store();
        let original = entry(br#"{"response":[1,2,3]}"#, Some(Duration::from_secs(60)));

        assert!(store.set("key", &original));
        let loaded = store.get("key").expect("entry should be readable");

        assert_eq!(loaded, original);
    }

    #[test]
    fn test_filename_is_digest_of_fingerprint() {
        let (store, dir) = create_test_store();
        store.set("key", &entry(b"x", None));

        let expected = dir
            .path()
            .join(format!("{}.cache", digest_hex(b"key")));
        assert!(expected.exists());
        assert_eq!(store.path_for("key"), expected);
    }

    #[test]
    fn test_file_layout() {
        let (store, _dir) = create_test_store();
        let original = entry(b"payload", Some(Duration::from_secs(60)));
        store.set("key", &original);

        let bytes = fs::read(store.path_for("key")).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let metadata: CacheMetadata = serde_json::from_slice(&bytes[4..4 + len]).unwrap();

        assert_eq!(metadata, original.metadata);
        assert_eq!(&bytes[4 + len..], b"payload");
    }

    #[test]
    fn test_missing_key_is_miss() {
        let (store, _dir) = create_test_store();
        assert!(store.get("nothing").is_none());
    }

    #[test]
    fn test_expired_entry_deleted_on_read() {
        let (store, _dir) = create_test_store();
        store.set("key", &entry(b"v", Some(Duration::from_millis(30))));

        sleep(Duration::from_millis(60));

        assert!(store.get("key").is_none());
        assert!(!store.path_for("key").exists());
    }

    #[test]
    fn test_fresh_replacement_survives_stale_delete() {
        let (store, _dir) = create_test_store();
        store.set("key", &entry(b"stale", Some(Duration::from_millis(20))));
        sleep(Duration::from_millis(40));
        let path = store.path_for("key");
        let bytes = fs::read(&path).unwrap();
        assert!(decode_entry(&bytes).unwrap().is_expired());

        // A writer lands a fresh entry between the stale read and the delete.
        store.set("key", &entry(b"fresh", Some(Duration::from_secs(60))));

        assert_eq!(store.remove_if_stale(&path), Removal::Kept);
        assert_eq!(store.get("key").unwrap().payload, b"fresh");
    }

    #[test]
    fn test_stale_file_is_deleted() {
        let (store, _dir) = create_test_store();
        store.set("key", &entry(b"stale", Some(Duration::from_millis(20))));
        sleep(Duration::from_millis(40));

        assert_eq!(store.remove_if_stale(&store.path_for("key")), Removal::Deleted);
        assert_eq!(store.remove_if_stale(&store.path_for("key")), Removal::Kept);
    }

    #[test]
    fn test_corrupt_file_is_miss_and_removed() {
        let (store, _dir) = create_test_store();
        fs::write(store.path_for("key"), [0, 0, 0, 200, b'{']).unwrap();

        assert!(store.get("key").is_none());
        assert!(!store.path_for("key").exists());
    }

    #[test]
    fn test_overwrite() {
        let (store, _dir) = create_test_store();
        store.set("key", &entry(b"first", None));
        store.set("key", &entry(b"second", None));

        assert_eq!(store.get("key").unwrap().payload, b"second");
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (store, dir) = create_test_store();
        store.set("short", &entry(b"v", Some(Duration::from_millis(20))));
        store.set("long", &entry(b"v", Some(Duration::from_secs(3600))));
        fs::write(dir.path().join("garbage.cache"), b"xx").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

        sleep(Duration::from_millis(50));

        let report = store.sweep();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed, 2);
        assert!(store.get("long").is_some());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_remove_and_clear() {
        let (store, _dir) = create_test_store();
        store.set("a", &entry(b"v", None));
        store.set("b", &entry(b"v", None));

        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.clear(), 1);
        assert!(store.get("b").is_none());
    }

    #[test]
    fn test_creates_nested_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested").join("cache");
        let store = DiskStore::new(&nested);

        assert!(store.set("key", &entry(b"v", None)));
        assert!(nested.exists());
    }

    #[test]
    fn test_decode_rejects_truncated() {
        assert!(matches!(
            decode_entry(&[0, 0]),
            Err(DiskFormatError::Truncated)
        ));
        assert!(matches!(
            decode_entry(&[0, 0, 0, 10, b'{']),
            Err(DiskFormatError::Truncated)
        ));
    }
}
