use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_RUN_MS, DEFAULT_STALL_REPEAT_LIMIT, DEFAULT_STEP_DELAY_MS,
    DEFAULT_YIELD_EVERY, OPERATIONS_PER_ITERATION,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_iterations: u64,
    pub max_run: Duration,
    pub stall_repeat_limit: u32,
    pub yield_every: u64,
    pub step_delay: Duration,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_run: Duration::from_millis(DEFAULT_MAX_RUN_MS),
            stall_repeat_limit: DEFAULT_STALL_REPEAT_LIMIT,
            yield_every: DEFAULT_YIELD_EVERY,
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY_MS),
        }
    }
}

impl EngineLimits {
    pub fn unpaced() -> Self {
        Self {
            step_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Script operations allowed in one run; loops that never call a
    /// primitive end as runaway once this is spent.
    pub fn max_operations(&self) -> u64 {
        self.max_iterations.saturating_mul(OPERATIONS_PER_ITERATION)
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}
