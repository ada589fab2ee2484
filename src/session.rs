use std::sync::{Arc, MutexGuard};

use crate::catalog::GameVariant;
use crate::engine::{EngineLimits, ExecutionController, RunObserver, StopHandle};
use crate::error::ProgressError;
use crate::progress::{ProgressHandle, ProgressionState, ProgressionStore};
use crate::types::RunReport;
use crate::world::Level;

pub struct GameSession {
    variant: GameVariant,
    progress: ProgressHandle,
    controller: ExecutionController,
}

fn lock(progress: &ProgressHandle) -> Result<MutexGuard<'_, ProgressionStore>, ProgressError> {
    progress.lock().map_err(|_| ProgressError::Poisoned)
}

impl GameSession {
    pub fn open(
        variant: GameVariant,
        progress: ProgressHandle,
        limits: EngineLimits,
    ) -> Result<Self, ProgressError> {
        let current = {
            let mut store = lock(&progress)?;
            store.register_game(variant.id, variant.level_count());
            store.load(variant.id)?.current
        };
        let level = variant
            .level(current)
            .or_else(|| variant.level(1))
            .ok_or_else(|| ProgressError::LevelOutOfRange {
                game_id: variant.id.to_string(),
                level: current,
                level_count: variant.level_count(),
            })?;
        let controller = ExecutionController::new(
            variant.id,
            level,
            variant.bindings.clone(),
            variant.new_hooks(),
            limits,
        )
        .with_progress(progress.clone());
        Ok(Self {
            variant,
            progress,
            controller,
        })
    }

    pub fn variant(&self) -> &GameVariant {
        &self.variant
    }

    pub fn level(&self) -> &Arc<Level> {
        self.controller.level()
    }

    pub fn controller(&self) -> &ExecutionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ExecutionController {
        &mut self.controller
    }

    pub fn set_observer(&mut self, observer: Box<dyn RunObserver>) {
        self.controller.set_observer(observer);
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.controller.stop_handle()
    }

    pub fn progress(&self) -> Result<ProgressionState, ProgressError> {
        lock(&self.progress)?.load(self.variant.id)
    }

    pub fn jump_to(&mut self, index: u32) -> Result<bool, ProgressError> {
        let Some(level) = self.variant.level(index) else {
            return Ok(false);
        };
        if !lock(&self.progress)?.change_current(self.variant.id, index)? {
            return Ok(false);
        }
        self.controller.set_level(level);
        Ok(true)
    }

    pub fn next_level(&mut self) -> Result<bool, ProgressError> {
        let next = self.level().index + 1;
        self.jump_to(next)
    }

    pub fn previous_level(&mut self) -> Result<bool, ProgressError> {
        match self.level().index {
            0 | 1 => Ok(false),
            index => self.jump_to(index - 1),
        }
    }

    pub async fn run(&mut self, source: &str) -> RunReport {
        self.controller.start(source).await
    }

    pub fn reset(&mut self) {
        self.controller.reset();
    }
}
