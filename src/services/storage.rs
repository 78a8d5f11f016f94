//! Key-value persistence boundary
//!
//! Callers expect synchronous, non-throwing semantics: a failed write is
//! logged and dropped rather than surfaced into the tick path.

use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, info, warn};

use crate::error::Result;

/// Durable per-device key-value store
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn save(&self, key: &str, value: &str);
    fn load(&self, key: &str) -> Option<String>;
    fn remove(&self, key: &str);
}

/// Volatile store that forgets everything on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn save(&self, key: &str, value: &str) {
        self.entries().insert(key.to_string(), value.to_string());
    }

    fn load(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }
}

/// JSON file holding every key, rewritten atomically on each change
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store, loading existing entries if the file is present.
    ///
    /// A file that does not parse is moved aside to `<name>.corrupt` and the
    /// store starts empty. Only a failure to read the file is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str(&raw) {
                    Ok(entries) => entries,
                    Err(e) => {
                        Self::quarantine(&path, &e);
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };

        info!("Checkpoint store opened at {} ({} entries)", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn quarantine(path: &Path, error: &serde_json::Error) {
        let mut aside = path.as_os_str().to_owned();
        aside.push(".corrupt");
        let aside = PathBuf::from(aside);

        match fs::rename(path, &aside) {
            Ok(()) => warn!(
                "Checkpoint store {} is unreadable ({}), moved to {} and starting empty",
                path.display(),
                error,
                aside.display()
            ),
            Err(e) => warn!(
                "Checkpoint store {} is unreadable ({}) and could not be moved aside ({}), starting empty",
                path.display(),
                error,
                e
            ),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, entries: &BTreeMap<String, String>) {
        let tmp = self.path.with_extension("tmp");
        let result = serde_json::to_vec_pretty(entries)
            .map_err(std::io::Error::from)
            .and_then(|bytes| fs::write(&tmp, bytes))
            .and_then(|()| fs::rename(&tmp, &self.path));

        match result {
            Ok(()) => debug!("Checkpoint store flushed ({} entries)", entries.len()),
            Err(e) => warn!("Failed to write checkpoint store {}: {}", self.path.display(), e),
        }
    }
}

impl KeyValueStore for FileStore {
    fn save(&self, key: &str, value: &str) {
        let mut entries = self.entries();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries);
    }

    fn load(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries();
        if entries.remove(key).is_some() {
            self.flush(&entries);
        }
    }
}
