//! Persistent key/value storage for sighting history and the pending queue.
//!
//! Storage is namespaced per SDK instance (one namespace per API credential).
//! Each instance uses two keys, [`HISTORY_KEY`] and [`PENDING_KEY`], holding
//! JSON arrays of sightings in their storage view.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sighting::RangeSighting;

/// Key holding the deduplication history.
pub const HISTORY_KEY: &str = "RANGE_ACTIONS_HISTORY";

/// Key holding sightings awaiting backend acknowledgment.
pub const PENDING_KEY: &str = "RANGE_ACTIONS_SEND_LIST";

/// Longest readable prefix kept in a namespace file name.
const NAMESPACE_PREFIX_LEN: usize = 32;

static UNSAFE_NAMESPACE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("valid namespace regex"));

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read a namespace file.
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a namespace file.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stored value is not valid JSON for its key.
    #[error("Stored value for '{key}' is corrupt: {source}")]
    Corrupt {
        /// Key of the corrupt value.
        key: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be encoded.
    #[error("Failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),

    /// A store lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Namespaced string key/value storage.
///
/// `write_batch` must apply all entries atomically: readers observe either
/// none or all of them, also across process restarts.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>>;

    /// Atomically write several values.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn write_batch(&self, namespace: &str, entries: &[(&str, String)]) -> StoreResult<()>;

    /// Write a single value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn put(&self, namespace: &str, key: &str, value: String) -> StoreResult<()> {
        self.write_batch(namespace, &[(key, value)])
    }
}

/// In-memory store, for tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        let namespaces = self.namespaces.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(namespaces
            .get(namespace)
            .and_then(|values| values.get(key))
            .cloned())
    }

    fn write_batch(&self, namespace: &str, entries: &[(&str, String)]) -> StoreResult<()> {
        let mut namespaces = self.namespaces.lock().map_err(|_| StoreError::Poisoned)?;
        let values = namespaces.entry(namespace.to_string()).or_default();
        for (key, value) in entries {
            values.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}

/// File-backed store: one JSON object per namespace under a data directory.
///
/// Writes go to a temporary file that is renamed over the namespace file, so
/// a batch is never observed half-written.
#[derive(Debug)]
pub struct FileStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at `data_dir`. The directory is created lazily.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory of this store.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.json", namespace_file_stem(namespace)))
    }

    fn read_namespace(&self, path: &Path) -> StoreResult<HashMap<String, String>> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                key: path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(source) => Err(StoreError::ReadError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        let path = self.namespace_path(namespace);
        Ok(self.read_namespace(&path)?.remove(key))
    }

    fn write_batch(&self, namespace: &str, entries: &[(&str, String)]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let path = self.namespace_path(namespace);
        let mut values = self.read_namespace(&path)?;
        for (key, value) in entries {
            values.insert((*key).to_string(), value.clone());
        }

        let write_err = |source| StoreError::WriteError {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.data_dir).map_err(write_err)?;

        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string(&values)?;
        std::fs::write(&tmp_path, content).map_err(write_err)?;
        std::fs::rename(&tmp_path, &path).map_err(write_err)?;

        debug!(path = %path.display(), keys = entries.len(), "Store batch written");
        Ok(())
    }
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
///
/// Many-to-one: only suitable for the readable part of a file name.
#[must_use]
pub fn sanitize_namespace(namespace: &str) -> String {
    let sanitized = UNSAFE_NAMESPACE_CHARS.replace_all(namespace, "_");
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        sanitized.into_owned()
    }
}

/// File stem of a namespace: a sanitized prefix followed by the SHA-256 of
/// the full namespace, so distinct credentials never share a file.
#[must_use]
pub fn namespace_file_stem(namespace: &str) -> String {
    let prefix: String = sanitize_namespace(namespace)
        .chars()
        .take(NAMESPACE_PREFIX_LEN)
        .collect();
    let digest = Sha256::digest(namespace.as_bytes());
    format!("{prefix}-{}", hex::encode(digest))
}

/// Default directory for persisted pipeline state.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "checkin")
        .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
}

/// Typed view of one instance's history and pending queue.
#[derive(Clone)]
pub struct SightingStore {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl std::fmt::Debug for SightingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SightingStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl SightingStore {
    /// Bind a store to an instance namespace.
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Namespace this view is bound to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Load the deduplication history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the value is corrupt.
    pub fn load_history(&self) -> StoreResult<Vec<RangeSighting>> {
        self.load(HISTORY_KEY)
    }

    /// Load the pending delivery queue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the value is corrupt.
    pub fn load_pending(&self) -> StoreResult<Vec<RangeSighting>> {
        self.load(PENDING_KEY)
    }

    /// Replace the pending delivery queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn save_pending(&self, pending: &[RangeSighting]) -> StoreResult<()> {
        self.store
            .put(&self.namespace, PENDING_KEY, encode_sightings(pending)?)
    }

    /// Replace history and pending queue in one atomic write.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn commit(&self, history: &[RangeSighting], pending: &[RangeSighting]) -> StoreResult<()> {
        self.store.write_batch(
            &self.namespace,
            &[
                (HISTORY_KEY, encode_sightings(history)?),
                (PENDING_KEY, encode_sightings(pending)?),
            ],
        )
    }

    /// Load a key, logging and substituting an empty list if it is corrupt.
    ///
    /// Read failures are still returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load_or_reset(&self, key: &str) -> StoreResult<Vec<RangeSighting>> {
        match self.load(key) {
            Err(StoreError::Corrupt { source, .. }) => {
                warn!(
                    namespace = %self.namespace,
                    key,
                    error = %source,
                    "Discarding corrupt stored sightings"
                );
                Ok(Vec::new())
            }
            other => other,
        }
    }

    fn load(&self, key: &str) -> StoreResult<Vec<RangeSighting>> {
        match self.store.get(&self.namespace, key)? {
            Some(json) => decode_sightings(&json).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// Encode sightings as a JSON array of storage views.
///
/// # Errors
///
/// Returns an error if a sighting cannot be encoded.
pub fn encode_sightings(sightings: &[RangeSighting]) -> serde_json::Result<String> {
    serde_json::to_string(sightings)
}

/// Decode a JSON array of storage views. Blank input decodes as empty.
///
/// # Errors
///
/// Returns an error if the input is not a valid array of sightings.
pub fn decode_sightings(json: &str) -> serde_json::Result<Vec<RangeSighting>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BeaconKey;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn sighting(minor: u16, seen_at_ms: i64) -> RangeSighting {
        let key = BeaconKey {
            uuid: Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap(),
            major: 1,
            minor,
        };
        RangeSighting::new(key, -65, 4.2, seen_at_ms)
    }

    #[test]
    fn test_pending_queue_round_trip() {
        let queue = vec![sighting(1, 10), sighting(2, 20), sighting(3, 30)];
        let json = encode_sightings(&queue).unwrap();
        let decoded = decode_sightings(&json).unwrap();
        assert_eq!(decoded, queue);
    }

    #[test]
    fn test_decode_blank_is_empty() {
        assert!(decode_sightings("").unwrap().is_empty());
        assert!(decode_sightings("[]").unwrap().is_empty());
        assert!(decode_sightings("{oops").is_err());
    }

    #[test]
    fn test_sanitize_namespace() {
        assert_eq!(sanitize_namespace("abc-123_X.y"), "abc-123_X.y");
        assert_eq!(sanitize_namespace("tok/en:with spaces"), "tok_en_with_spaces");
        assert_eq!(sanitize_namespace(""), "_");
        assert_eq!(sanitize_namespace(".."), "_");
    }

    #[test]
    fn test_namespace_file_stem() {
        let stem = namespace_file_stem("token-1");
        assert!(stem.starts_with("token-1-"));
        assert_eq!(stem.len(), "token-1-".len() + 64);
        assert_eq!(stem, namespace_file_stem("token-1"));

        assert_ne!(namespace_file_stem("tenant/one"), namespace_file_stem("tenant:one"));
        assert_ne!(namespace_file_stem(""), namespace_file_stem("_"));

        let long = "x".repeat(500);
        assert_eq!(namespace_file_stem(&long).len(), NAMESPACE_PREFIX_LEN + 1 + 64);
    }

    #[test]
    fn test_file_store_keeps_similar_credentials_apart() {
        let dir = TempDir::new().unwrap();
        let backing: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()));

        let first = SightingStore::new(Arc::clone(&backing), "tenant/one");
        let second = SightingStore::new(backing, "tenant:one");
        first.commit(&[sighting(1, 1)], &[sighting(1, 1)]).unwrap();

        assert!(second.load_history().unwrap().is_empty());
        assert!(second.load_pending().unwrap().is_empty());
        assert_eq!(first.load_pending().unwrap(), vec![sighting(1, 1)]);
    }

    #[test]
    fn test_memory_store_namespaces_are_isolated() {
        let store = MemoryStore::new();
        store.put("a", HISTORY_KEY, "[1]".into()).unwrap();
        store.put("b", HISTORY_KEY, "[2]".into()).unwrap();

        assert_eq!(store.get("a", HISTORY_KEY).unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("b", HISTORY_KEY).unwrap().as_deref(), Some("[2]"));
        assert_eq!(store.get("c", HISTORY_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();

        let store = FileStore::new(dir.path().join("state"));
        store
            .write_batch("token-1", &[(HISTORY_KEY, "[]".into()), (PENDING_KEY, "[7]".into())])
            .unwrap();

        let reopened = FileStore::new(dir.path().join("state"));
        assert_eq!(reopened.get("token-1", HISTORY_KEY).unwrap().as_deref(), Some("[]"));
        assert_eq!(reopened.get("token-1", PENDING_KEY).unwrap().as_deref(), Some("[7]"));
        assert_eq!(reopened.get("token-2", PENDING_KEY).unwrap(), None);
        let file = dir
            .path()
            .join("state")
            .join(format!("{}.json", namespace_file_stem("token-1")));
        assert!(file.exists());
        assert!(!file.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_reports_corrupt_namespace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(format!("{}.json", namespace_file_stem("bad"))),
            "not json",
        )
        .unwrap();

        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.get("bad", HISTORY_KEY),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_sighting_store_commit_and_load() {
        let store = SightingStore::new(Arc::new(MemoryStore::new()), "instance");
        assert!(store.load_history().unwrap().is_empty());
        assert!(store.load_pending().unwrap().is_empty());

        let history = vec![sighting(1, 1), sighting(2, 2)];
        let pending = vec![sighting(2, 2)];
        store.commit(&history, &pending).unwrap();

        assert_eq!(store.load_history().unwrap(), history);
        assert_eq!(store.load_pending().unwrap(), pending);

        store.save_pending(&[]).unwrap();
        assert!(store.load_pending().unwrap().is_empty());
        assert_eq!(store.load_history().unwrap(), history);
    }

    #[test]
    fn test_load_or_reset_discards_corrupt_value() {
        let backing = Arc::new(MemoryStore::new());
        backing.put("instance", PENDING_KEY, "{broken".into()).unwrap();
        let store = SightingStore::new(backing, "instance");

        assert!(matches!(store.load_pending(), Err(StoreError::Corrupt { .. })));
        assert!(store.load_or_reset(PENDING_KEY).unwrap().is_empty());
    }
}
