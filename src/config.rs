use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_RUN_MS, DEFAULT_STALL_REPEAT_LIMIT, DEFAULT_STEP_DELAY_MS,
    DEFAULT_YIELD_EVERY,
};
use crate::engine::EngineLimits;
use crate::error::ConfigError;

pub const ENV_MAX_ITERATIONS: &str = "MAZE_MAX_ITERATIONS";
pub const ENV_STEP_DELAY_MS: &str = "MAZE_STEP_DELAY_MS";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_iterations: u64,
    pub max_run_ms: u64,
    pub stall_repeat_limit: u32,
    pub yield_every: u64,
    pub step_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_run_ms: DEFAULT_MAX_RUN_MS,
            stall_repeat_limit: DEFAULT_STALL_REPEAT_LIMIT,
            yield_every: DEFAULT_YIELD_EVERY,
            step_delay_ms: DEFAULT_STEP_DELAY_MS,
        }
    }
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_override(&lookup, ENV_MAX_ITERATIONS)? {
            self.max_iterations = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_STEP_DELAY_MS)? {
            self.step_delay_ms = value;
        }
        Ok(self)
    }

    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            max_iterations: self.max_iterations.max(1),
            max_run: Duration::from_millis(self.max_run_ms),
            stall_repeat_limit: self.stall_repeat_limit,
            yield_every: self.yield_every,
            step_delay: Duration::from_millis(self.step_delay_ms),
        }
    }
}

fn parse_override<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.clone(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_engine_limits() {
        assert_eq!(EngineConfig::default().limits(), EngineLimits::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_iterations": 500, "step_delay_ms": 0}"#).expect("parse");
        assert_eq!(config.max_iterations, 500);
        assert_eq!(config.step_delay_ms, 0);
        assert_eq!(config.stall_repeat_limit, DEFAULT_STALL_REPEAT_LIMIT);
    }

    #[test]
    fn environment_overrides_file_values() {
        let env = HashMap::from([
            (ENV_MAX_ITERATIONS.to_string(), "42".to_string()),
            (ENV_STEP_DELAY_MS.to_string(), " ".to_string()),
        ]);
        let config = EngineConfig::default()
            .with_overrides(|key| env.get(key).cloned())
            .expect("overrides");
        assert_eq!(config.max_iterations, 42);
        assert_eq!(config.step_delay_ms, DEFAULT_STEP_DELAY_MS);
    }

    #[test]
    fn malformed_override_is_rejected() {
        let result = EngineConfig::default().with_overrides(|key| {
            (key == ENV_STEP_DELAY_MS).then(|| "fast".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv { ref key, .. }) if key == ENV_STEP_DELAY_MS
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let result = EngineConfig::from_file(Path::new("/nonexistent/maze-engine.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
