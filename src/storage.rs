use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Writes every pair or none of them.
    fn set_many(&mut self, pairs: &[(&str, &str)]) -> Result<(), StorageError>;

    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_many(&mut self, pairs: &[(&str, &str)]) -> Result<(), StorageError> {
        for (key, value) in pairs {
            self.entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u8,
    entries: BTreeMap<String, String>,
}

pub struct FileStore {
    file_path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    pub fn open(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let entries = load_entries(&file_path);
        Self { file_path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn save(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let payload = StoreFile {
            version: 1,
            entries: self.entries.clone(),
        };
        let text = serde_json::to_string_pretty(&payload)?;
        let tmp_path = self.file_path.with_extension("json.tmp");
        fs::write(&tmp_path, text).map_err(|source| StorageError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.file_path).map_err(|source| StorageError::Io {
            path: self.file_path.clone(),
            source,
        })
    }

    /// The in-memory entries only change when the file write succeeds.
    fn commit(&mut self, previous: BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Err(error) = self.save() {
            self.entries = previous;
            return Err(error);
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_many(&[(key, value)])
    }

    fn set_many(&mut self, pairs: &[(&str, &str)]) -> Result<(), StorageError> {
        let unchanged = pairs
            .iter()
            .all(|(key, value)| self.entries.get(*key).map(String::as_str) == Some(*value));
        if unchanged {
            return Ok(());
        }
        let previous = self.entries.clone();
        for (key, value) in pairs {
            self.entries.insert(key.to_string(), value.to_string());
        }
        self.commit(previous)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if !self.entries.contains_key(key) {
            return Ok(());
        }
        let previous = self.entries.clone();
        self.entries.remove(key);
        self.commit(previous)
    }
}

fn load_entries(path: &Path) -> BTreeMap<String, String> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[storage] failed to read {}: {error}", path.display());
            }
            return BTreeMap::new();
        }
    };
    match serde_json::from_str::<StoreFile>(&text) {
        Ok(file) if file.version == 1 => file.entries,
        Ok(file) => {
            log::warn!(
                "[storage] unsupported version {} at {}",
                file.version,
                path.display()
            );
            BTreeMap::new()
        }
        Err(error) => {
            log::warn!("[storage] failed to parse {}: {error}", path.display());
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    pub(crate) fn temp_file(name: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let unique = format!(
            "{}-{}-{}-{}",
            name,
            std::process::id(),
            nanos,
            COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        std::env::temp_dir().join(unique).join("progress.json")
    }

    #[test]
    fn memory_store_round_trips_and_removes() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("maze_currentLevel").expect("get"), None);
        store.set("maze_currentLevel", "3").expect("set");
        assert_eq!(
            store.get("maze_currentLevel").expect("get").as_deref(),
            Some("3")
        );
        store.remove("maze_currentLevel").expect("remove");
        assert!(store.entries().is_empty());
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = temp_file("file-store-reopen");
        {
            let mut store = FileStore::open(path.clone());
            store.set("maze_unlockedLevels", "[1,2]").expect("set");
            store.set("bee_currentLevel", "1").expect("set");
            store.remove("bee_currentLevel").expect("remove");
        }
        let store = FileStore::open(path.clone());
        assert_eq!(
            store.get("maze_unlockedLevels").expect("get").as_deref(),
            Some("[1,2]")
        );
        assert_eq!(store.get("bee_currentLevel").expect("get"), None);
        assert!(!path.with_extension("json.tmp").exists());

        let _ = fs::remove_file(path);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let path = temp_file("file-store-corrupt");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, "{ not json").expect("write");

        let mut store = FileStore::open(path.clone());
        assert_eq!(store.get("maze_currentLevel").expect("get"), None);
        store.set("maze_currentLevel", "2").expect("overwrite");

        let reopened = FileStore::open(path.clone());
        assert_eq!(
            reopened.get("maze_currentLevel").expect("get").as_deref(),
            Some("2")
        );

        let _ = fs::remove_file(path);
    }

    #[test]
    fn failed_write_leaves_entries_untouched() {
        let blocker = temp_file("file-store-blocked");
        let parent = blocker.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&blocker, "not a directory").expect("write");

        let mut store = FileStore::open(blocker.join("progress.json"));
        assert!(store.set("maze_currentLevel", "2").is_err());
        assert_eq!(store.get("maze_currentLevel").expect("get"), None);

        let result = store.set_many(&[
            ("maze_unlockedLevels", "[1,2]"),
            ("maze_currentLevel", "2"),
        ]);
        assert!(result.is_err());
        assert_eq!(store.get("maze_unlockedLevels").expect("get"), None);
        assert_eq!(store.get("maze_currentLevel").expect("get"), None);

        let _ = fs::remove_file(blocker);
    }

    #[test]
    fn set_many_writes_all_pairs_together() {
        let path = temp_file("file-store-batch");
        {
            let mut store = FileStore::open(path.clone());
            store
                .set_many(&[("a", "1"), ("b", "2")])
                .expect("set many");
        }
        let store = FileStore::open(path.clone());
        assert_eq!(store.get("a").expect("get").as_deref(), Some("1"));
        assert_eq!(store.get("b").expect("get").as_deref(), Some("2"));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn unsupported_version_is_ignored() {
        let path = temp_file("file-store-version");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, r#"{"version": 9, "entries": {"a": "b"}}"#).expect("write");

        let store = FileStore::open(path.clone());
        assert_eq!(store.get("a").expect("get"), None);

        let _ = fs::remove_file(path);
    }
}
