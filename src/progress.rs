use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{storage_key, KEY_COMPLETED, KEY_CURRENT, KEY_UNLOCKED};
use crate::error::{ProgressError, StorageError};
use crate::storage::KeyValueStore;

pub type ProgressHandle = Arc<Mutex<ProgressionStore>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionState {
    #[serde(rename = "unlockedLevels")]
    pub unlocked: BTreeSet<u32>,
    #[serde(rename = "completedLevels")]
    pub completed: BTreeSet<u32>,
    #[serde(rename = "currentLevel")]
    pub current: u32,
}

impl Default for ProgressionState {
    fn default() -> Self {
        Self {
            unlocked: BTreeSet::from([1]),
            completed: BTreeSet::new(),
            current: 1,
        }
    }
}

impl ProgressionState {
    pub fn is_unlocked(&self, level: u32) -> bool {
        self.unlocked.contains(&level)
    }

    pub fn is_completed(&self, level: u32) -> bool {
        self.completed.contains(&level)
    }

    fn sanitized(mut self, level_count: u32) -> Self {
        self.unlocked.retain(|level| (1..=level_count).contains(level));
        self.completed.retain(|level| (1..=level_count).contains(level));
        self.unlocked.insert(1);
        if !self.unlocked.contains(&self.current) {
            self.current = 1;
        }
        self
    }
}

pub struct ProgressionStore {
    storage: Box<dyn KeyValueStore>,
    level_counts: HashMap<String, u32>,
}

impl ProgressionStore {
    pub fn new(storage: Box<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            level_counts: HashMap::new(),
        }
    }

    pub fn with_game(mut self, game_id: &str, level_count: u32) -> Self {
        self.register_game(game_id, level_count);
        self
    }

    pub fn register_game(&mut self, game_id: &str, level_count: u32) {
        self.level_counts.insert(game_id.to_string(), level_count.max(1));
    }

    pub fn into_handle(self) -> ProgressHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn level_count(&self, game_id: &str) -> Result<u32, ProgressError> {
        self.level_counts
            .get(game_id)
            .copied()
            .ok_or_else(|| ProgressError::UnknownGame(game_id.to_string()))
    }

    pub fn load(&self, game_id: &str) -> Result<ProgressionState, ProgressError> {
        let level_count = self.level_count(game_id)?;
        let defaults = ProgressionState::default();
        let state = ProgressionState {
            unlocked: self
                .read_key(game_id, KEY_UNLOCKED)?
                .unwrap_or(defaults.unlocked),
            completed: self
                .read_key(game_id, KEY_COMPLETED)?
                .unwrap_or(defaults.completed),
            current: self
                .read_key(game_id, KEY_CURRENT)?
                .unwrap_or(defaults.current),
        };
        Ok(state.sanitized(level_count))
    }

    pub fn complete(&mut self, game_id: &str, level: u32) -> Result<ProgressionState, ProgressError> {
        let level_count = self.level_count(game_id)?;
        if !(1..=level_count).contains(&level) {
            return Err(ProgressError::LevelOutOfRange {
                game_id: game_id.to_string(),
                level,
                level_count,
            });
        }

        let mut state = self.load(game_id)?;
        if state.completed.contains(&level) {
            return Ok(state);
        }
        state.completed.insert(level);
        if level < level_count {
            state.unlocked.insert(level + 1);
        }
        self.save(game_id, &state)?;
        log::info!(
            "[progress] {game_id}: level {level} completed, unlocked {:?}",
            state.unlocked
        );
        Ok(state)
    }

    pub fn change_current(&mut self, game_id: &str, level: u32) -> Result<bool, ProgressError> {
        let mut state = self.load(game_id)?;
        if !state.is_unlocked(level) {
            log::debug!("[progress] {game_id}: level {level} is locked");
            return Ok(false);
        }
        if state.current != level {
            state.current = level;
            self.save(game_id, &state)?;
        }
        Ok(true)
    }

    pub fn reset(&mut self, game_id: &str) -> Result<ProgressionState, ProgressError> {
        self.level_count(game_id)?;
        let state = ProgressionState::default();
        self.save(game_id, &state)?;
        log::info!("[progress] {game_id}: progress reset");
        Ok(state)
    }

    fn read_key<T: DeserializeOwned>(&self, game_id: &str, suffix: &str) -> Result<Option<T>, ProgressError> {
        let key = storage_key(game_id, suffix);
        let Some(raw) = self.storage.get(&key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                log::warn!("[progress] ignoring malformed {key}: {error}");
                Ok(None)
            }
        }
    }

    fn save(&mut self, game_id: &str, state: &ProgressionState) -> Result<(), ProgressError> {
        let unlocked = (storage_key(game_id, KEY_UNLOCKED), encode(&state.unlocked)?);
        let completed = (storage_key(game_id, KEY_COMPLETED), encode(&state.completed)?);
        let current = (storage_key(game_id, KEY_CURRENT), encode(&state.current)?);
        self.storage.set_many(&[
            (unlocked.0.as_str(), unlocked.1.as_str()),
            (completed.0.as_str(), completed.1.as_str()),
            (current.0.as_str(), current.1.as_str()),
        ])?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?)
}
