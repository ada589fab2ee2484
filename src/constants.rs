pub const DEFAULT_MAX_ITERATIONS: u64 = 20_000;
pub const DEFAULT_MAX_RUN_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_STALL_REPEAT_LIMIT: u32 = 100;
pub const DEFAULT_YIELD_EVERY: u64 = 50;
pub const DEFAULT_STEP_DELAY_MS: u64 = 150;

pub const HEADING_SUB_STEPS: u8 = 16;
pub const MAX_SCRIPT_DEPTH: usize = 64;
pub const MAX_SCRIPT_CALL_LEVELS: usize = 32;
pub const MAX_SCRIPT_STRING_LEN: usize = 4_096;
pub const MAX_SCRIPT_COLLECTION_LEN: usize = 1_024;
pub const OPERATIONS_PER_ITERATION: u64 = 16;

pub const KEY_UNLOCKED: &str = "unlockedLevels";
pub const KEY_COMPLETED: &str = "completedLevels";
pub const KEY_CURRENT: &str = "currentLevel";

pub fn storage_key(game_id: &str, suffix: &str) -> String {
    format!("{game_id}_{suffix}")
}

pub fn normalize_step_delay_ms(value: Option<i64>) -> Option<u64> {
    value.map(|ms| ms.clamp(0, 2_000) as u64)
}
