mod limits;
mod observer;
mod stall;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::actions::{ActionKind, ActionSet, Binding, HookContext, Primitive, VariantHooks};
use crate::error::ScriptError;
use crate::movement::{resolve_advance, resolve_turn, AdvanceOutcome};
use crate::progress::ProgressHandle;
use crate::script::{execute, Host, Program, Watchdog};
use crate::sensor::{path_ahead, path_left, path_right, Fingerprint};
use crate::types::{
    turn_frames, FailureReason, MoveKind, Pose, RunEvent, RunReport, RunStatus, TurnDirection,
};
use crate::world::Level;

pub use self::limits::EngineLimits;
pub use self::observer::{EventLog, LogObserver, NullObserver, RunObserver};
pub use self::stall::StallDetector;

#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

#[derive(Clone, Debug)]
struct Run {
    pose: Pose,
    status: RunStatus,
    reason: Option<FailureReason>,
    iterations: u64,
    calls_since_yield: u64,
    started_at: Option<Instant>,
    finished_after: Option<Duration>,
    stall: StallDetector,
    error: Option<String>,
}

impl Run {
    fn idle(level: &Level, limits: &EngineLimits) -> Self {
        Self {
            pose: level.start_pose,
            status: RunStatus::Idle,
            reason: None,
            iterations: 0,
            calls_since_yield: 0,
            started_at: None,
            finished_after: None,
            stall: StallDetector::new(limits.stall_repeat_limit),
            error: None,
        }
    }

    fn elapsed(&self) -> Duration {
        if let Some(done) = self.finished_after {
            return done;
        }
        self.started_at.map(|at| at.elapsed()).unwrap_or_default()
    }
}

pub struct ExecutionController {
    game_id: String,
    level: Arc<Level>,
    bindings: ActionSet,
    hooks: Box<dyn VariantHooks>,
    limits: EngineLimits,
    observer: Box<dyn RunObserver>,
    progress: Option<ProgressHandle>,
    stop: StopHandle,
    run: Run,
}

impl ExecutionController {
    pub fn new(
        game_id: impl Into<String>,
        level: Arc<Level>,
        bindings: ActionSet,
        mut hooks: Box<dyn VariantHooks>,
        limits: EngineLimits,
    ) -> Self {
        hooks.reset(&level);
        let run = Run::idle(&level, &limits);
        Self {
            game_id: game_id.into(),
            level,
            bindings,
            hooks,
            limits,
            observer: Box::new(NullObserver),
            progress: None,
            stop: StopHandle::default(),
            run,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn set_observer(&mut self, observer: Box<dyn RunObserver>) {
        self.observer = observer;
    }

    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn level(&self) -> &Arc<Level> {
        &self.level
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: EngineLimits) {
        self.limits = limits;
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn pose(&self) -> Pose {
        self.run.pose
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.run.reason
    }

    pub fn iterations(&self) -> u64 {
        self.run.iterations
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.run.status != RunStatus::Running || self.stop.is_requested()
    }

    pub fn available_names(&self) -> Vec<String> {
        self.bindings.names_for(&self.level)
    }

    pub fn set_level(&mut self, level: Arc<Level>) {
        self.level = level;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.stop.clear();
        self.run = Run::idle(&self.level, &self.limits);
        self.hooks.reset(&self.level);
        self.notify(RunEvent::Reset {
            pose: self.run.pose,
        });
    }

    pub fn begin(&mut self) {
        if self.run.status != RunStatus::Idle {
            self.reset();
        }
        self.stop.clear();
        self.run.stall = StallDetector::new(self.limits.stall_repeat_limit);
        self.run.status = RunStatus::Running;
        self.run.started_at = Some(Instant::now());
        self.notify(RunEvent::Started {
            pose: self.run.pose,
        });
    }

    pub async fn start(&mut self, source: &str) -> RunReport {
        self.begin();
        log::info!(
            "[engine] {} level {}: run started",
            self.game_id,
            self.level.index
        );

        let budget = self.level.block_budget;
        let outcome = match Program::compile(source) {
            Ok(program) => match budget {
                Some(budget) if program.block_count() > budget as usize => {
                    self.run.error = Some(format!(
                        "program uses {} blocks, level allows {budget}",
                        program.block_count()
                    ));
                    self.fail(FailureReason::OverBudget);
                    Ok(())
                }
                _ => {
                    let watchdog = Watchdog::new(
                        self.limits.max_operations(),
                        self.limits.max_run.saturating_sub(self.run.elapsed()),
                        self.stop.flag(),
                    );
                    execute(program, &mut *self, watchdog).await
                }
            },
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => {}
            Err(ScriptError::Interrupted) if self.stop.is_requested() => {
                self.fail(FailureReason::Cancelled)
            }
            Err(ScriptError::Interrupted) => self.fail(FailureReason::Runaway),
            Err(error) => self.raise(error),
        }
        self.finish()
    }

    pub fn finish(&mut self) -> RunReport {
        if self.run.status == RunStatus::Running {
            self.fail(FailureReason::Unfinished);
        }
        self.report()
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            status: self.run.status,
            reason: self.run.reason,
            steps: self.run.iterations,
            final_pose: self.run.pose,
            elapsed_ms: self.run.elapsed().as_millis() as u64,
            error: self.run.error.clone(),
        }
    }

    pub async fn advance(&mut self) -> bool {
        self.perform(Binding::Builtin(Primitive::Advance), None).await
    }

    pub async fn turn_left(&mut self) -> bool {
        self.perform(Binding::Builtin(Primitive::TurnLeft), None).await
    }

    pub async fn turn_right(&mut self) -> bool {
        self.perform(Binding::Builtin(Primitive::TurnRight), None).await
    }

    pub async fn path_ahead(&mut self) -> bool {
        self.perform(Binding::Builtin(Primitive::PathAhead), None).await
    }

    pub async fn path_left(&mut self) -> bool {
        self.perform(Binding::Builtin(Primitive::PathLeft), None).await
    }

    pub async fn path_right(&mut self) -> bool {
        self.perform(Binding::Builtin(Primitive::PathRight), None).await
    }

    pub async fn not_done(&mut self) -> bool {
        self.perform(Binding::Builtin(Primitive::NotDone), None).await
    }

    pub async fn perform(&mut self, binding: Binding, block_id: Option<&str>) -> bool {
        if !self.admit() {
            return false;
        }
        let result = match binding {
            Binding::Builtin(primitive) => self.apply_builtin(primitive, block_id),
            Binding::CustomActuator(kind) => self.apply_custom(kind, block_id),
            Binding::CustomSensor(kind) => {
                let ctx = HookContext {
                    level: &self.level,
                    pose: self.run.pose,
                };
                self.hooks.sense(kind, &ctx)
            }
        };
        if binding.changes_state() && !self.limits.step_delay.is_zero() {
            tokio::time::sleep(self.limits.step_delay).await;
        }
        self.maybe_yield().await;
        result
    }

    /// Stop flag, runaway ceilings and stall detection, in that order.
    fn admit(&mut self) -> bool {
        if self.run.status != RunStatus::Running {
            return false;
        }
        if self.stop.is_requested() {
            self.fail(FailureReason::Cancelled);
            return false;
        }
        if self.run.iterations >= self.limits.max_iterations
            || self.run.elapsed() > self.limits.max_run
        {
            self.fail(FailureReason::Runaway);
            return false;
        }
        self.run.iterations += 1;
        let fingerprint = Fingerprint::capture(&self.level.grid, &self.run.pose);
        if self.run.stall.observe(fingerprint) {
            self.fail(FailureReason::Stuck);
            return false;
        }
        true
    }

    async fn maybe_yield(&mut self) {
        self.run.calls_since_yield += 1;
        if self.limits.yield_every > 0 && self.run.calls_since_yield >= self.limits.yield_every {
            self.run.calls_since_yield = 0;
            tokio::task::yield_now().await;
        }
    }

    fn apply_builtin(&mut self, primitive: Primitive, block_id: Option<&str>) -> bool {
        let pose = self.run.pose;
        match primitive {
            Primitive::Advance => self.apply_advance(block_id),
            Primitive::TurnLeft => self.apply_turn(TurnDirection::Left, block_id),
            Primitive::TurnRight => self.apply_turn(TurnDirection::Right, block_id),
            Primitive::PathAhead => path_ahead(&self.level.grid, &pose),
            Primitive::PathLeft => path_left(&self.level.grid, &pose),
            Primitive::PathRight => path_right(&self.level.grid, &pose),
            Primitive::NotDone => self.run.status == RunStatus::Running,
        }
    }

    fn apply_advance(&mut self, block_id: Option<&str>) -> bool {
        let from = self.run.pose;
        let outcome = resolve_advance(&self.level.grid, &from);
        let to = outcome.pose();
        if !outcome.moved() {
            self.notify(RunEvent::Bumped {
                pose: from,
                block_id: block_id.map(str::to_string),
            });
            self.fail(FailureReason::Blocked);
            return false;
        }

        self.run.pose = to;
        self.notify(RunEvent::PoseChanged {
            from,
            to,
            kind: MoveKind::Moved,
            block_id: block_id.map(str::to_string),
            frames: Vec::new(),
        });
        if let AdvanceOutcome::Reached(_) = outcome {
            let ctx = HookContext {
                level: &self.level,
                pose: to,
            };
            if self.hooks.finish_ready(&ctx) {
                self.succeed();
            }
        }
        true
    }

    fn apply_turn(&mut self, direction: TurnDirection, block_id: Option<&str>) -> bool {
        let from = self.run.pose;
        let to = resolve_turn(&from, direction);
        self.run.pose = to;
        self.notify(RunEvent::PoseChanged {
            from,
            to,
            kind: MoveKind::Turned,
            block_id: block_id.map(str::to_string),
            frames: turn_frames(from.heading, direction),
        });
        true
    }

    fn apply_custom(&mut self, kind: ActionKind, block_id: Option<&str>) -> bool {
        let ctx = HookContext {
            level: &self.level,
            pose: self.run.pose,
        };
        match self.hooks.actuate(kind, &ctx) {
            Ok(()) => {
                self.notify(RunEvent::Action {
                    action: kind,
                    pose: self.run.pose,
                    block_id: block_id.map(str::to_string),
                });
                true
            }
            Err(error) => {
                log::warn!(
                    "[engine] {} level {}: {kind:?} rejected: {error}",
                    self.game_id,
                    self.level.index
                );
                self.run.error = Some(error.to_string());
                self.fail(FailureReason::Exception);
                false
            }
        }
    }

    fn raise(&mut self, error: ScriptError) {
        if self.run.status != RunStatus::Running {
            return;
        }
        log::warn!(
            "[engine] {} level {}: generated code failed: {error}",
            self.game_id,
            self.level.index
        );
        self.run.error = Some(error.to_string());
        self.fail(FailureReason::Exception);
    }

    fn succeed(&mut self) {
        if self.run.status != RunStatus::Running {
            return;
        }
        self.run.status = RunStatus::Success;
        self.run.finished_after = Some(self.run.elapsed());
        log::info!(
            "[engine] {} level {}: solved after {} steps",
            self.game_id,
            self.level.index,
            self.run.iterations
        );
        if let Some(progress) = &self.progress {
            match progress.lock() {
                Ok(mut store) => {
                    if let Err(error) = store.complete(&self.game_id, self.level.index) {
                        log::warn!("[engine] failed to record completion: {error}");
                    }
                }
                Err(_) => log::warn!("[engine] progress store lock poisoned"),
            }
        }
        self.notify(RunEvent::Finished {
            status: RunStatus::Success,
            reason: None,
        });
    }

    fn fail(&mut self, reason: FailureReason) {
        if self.run.status != RunStatus::Running {
            return;
        }
        self.run.status = RunStatus::Failure;
        self.run.reason = Some(reason);
        self.run.finished_after = Some(self.run.elapsed());
        log::info!(
            "[engine] {} level {}: failed ({reason:?}) after {} steps",
            self.game_id,
            self.level.index,
            self.run.iterations
        );
        self.notify(RunEvent::Finished {
            status: RunStatus::Failure,
            reason: Some(reason),
        });
    }

    fn notify(&mut self, event: RunEvent) {
        self.observer.notify(&event);
    }
}

impl Host for ExecutionController {
    fn names(&self) -> Vec<String> {
        self.bindings.names().map(str::to_string).collect()
    }

    fn call<'a>(&'a mut self, name: &'a str, block_id: Option<&'a str>) -> BoxFuture<'a, bool> {
        async move {
            let binding = match self.bindings.resolve(name) {
                Some(binding) if self.level.allows(binding.kind()) => binding,
                Some(_) => {
                    self.raise(ScriptError::NotAllowed {
                        name: name.to_string(),
                    });
                    return false;
                }
                None => {
                    self.raise(ScriptError::Undefined {
                        name: name.to_string(),
                    });
                    return false;
                }
            };
            self.perform(binding, block_id).await
        }
        .boxed()
    }

    fn halted(&self) -> bool {
        self.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::actions::NoHooks;
    use crate::progress::ProgressionStore;
    use crate::storage::MemoryStore;
    use crate::types::Heading;

    fn maze_bindings() -> ActionSet {
        ActionSet::new()
            .bind("moveForward", Binding::Builtin(Primitive::Advance))
            .bind("turnLeft", Binding::Builtin(Primitive::TurnLeft))
            .bind("turnRight", Binding::Builtin(Primitive::TurnRight))
            .bind("isPathForward", Binding::Builtin(Primitive::PathAhead))
            .bind("isPathLeft", Binding::Builtin(Primitive::PathLeft))
            .bind("isPathRight", Binding::Builtin(Primitive::PathRight))
            .bind("notDone", Binding::Builtin(Primitive::NotDone))
    }

    fn controller(rows: &[&str], heading: Heading, limits: EngineLimits) -> ExecutionController {
        let level = Arc::new(Level::new(1, rows, heading).expect("valid level"));
        ExecutionController::new("maze", level, maze_bindings(), Box::new(NoHooks), limits)
    }

    fn l_shape() -> ExecutionController {
        controller(
            &["#####", "#S..#", "###.#", "###F#", "#####"],
            Heading::East,
            EngineLimits::unpaced(),
        )
    }

    #[tokio::test]
    async fn wall_follower_solves_l_shape() {
        let mut controller = l_shape();
        let report = controller
            .start(
                "while (notDone()) {\n  if (isPathForward()) {\n    moveForward();\n  } else if (isPathRight()) {\n    turnRight();\n  } else {\n    turnLeft();\n  }\n}",
            )
            .await;
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.final_pose, Pose::new(3, 3, Heading::South));
        assert_eq!(report.reason, None);
    }

    #[tokio::test]
    async fn bump_into_wall_fails_as_blocked() {
        let mut controller = l_shape();
        let report = controller.start("moveForward(); moveForward(); moveForward();").await;
        assert_eq!(report.status, RunStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Blocked));
        assert_eq!(report.final_pose, Pose::new(3, 1, Heading::East));
        assert_eq!(report.steps, 3);
    }

    #[tokio::test]
    async fn exhausted_program_fails_as_unfinished() {
        let mut controller = l_shape();
        let report = controller.start("moveForward();").await;
        assert_eq!(report.status, RunStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Unfinished));
    }

    #[tokio::test]
    async fn script_errors_become_exception_failures() {
        let mut controller = l_shape();
        let report = controller.start("moveForward(;").await;
        assert_eq!(report.reason, Some(FailureReason::Exception));
        assert!(report.error.is_some());

        let report = controller.start("moveForward();\nlaunchRocket();").await;
        assert_eq!(report.status, RunStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Exception));
        assert_eq!(report.final_pose, Pose::new(2, 1, Heading::East));
        assert!(report
            .error
            .as_deref()
            .is_some_and(|message| message.contains("launchRocket")));
    }

    #[tokio::test]
    async fn disallowed_action_is_a_runtime_error() {
        let level = Level::new(1, &["S..F"], Heading::East)
            .expect("valid level")
            .with_allowed(&[ActionKind::Advance]);
        let mut controller = ExecutionController::new(
            "maze",
            Arc::new(level),
            maze_bindings(),
            Box::new(NoHooks),
            EngineLimits::unpaced(),
        );
        let report = controller.start("turnLeft();").await;
        assert_eq!(report.reason, Some(FailureReason::Exception));
        assert!(report
            .error
            .as_deref()
            .is_some_and(|message| message.contains("not available")));
        assert_eq!(controller.available_names(), vec!["moveForward".to_string()]);
    }

    #[tokio::test]
    async fn over_budget_program_never_moves() {
        let level = Level::new(1, &["S..F"], Heading::East)
            .expect("valid level")
            .with_budget(2);
        let log = EventLog::new();
        let mut controller = ExecutionController::new(
            "maze",
            Arc::new(level),
            maze_bindings(),
            Box::new(NoHooks),
            EngineLimits::unpaced(),
        )
        .with_observer(Box::new(log.clone()));
        let report = controller.start("moveForward(); moveForward(); moveForward();").await;
        assert_eq!(report.reason, Some(FailureReason::OverBudget));
        assert_eq!(report.steps, 0);
        assert!(!log
            .snapshot()
            .iter()
            .any(|event| matches!(event, RunEvent::PoseChanged { .. })));

        let report = controller
            .start("for i in 0..3 { moveForward(); }")
            .await;
        assert_eq!(report.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn events_arrive_in_commit_order() {
        let log = EventLog::new();
        let mut controller = l_shape().with_observer(Box::new(log.clone()));
        controller
            .start(r#"moveForward("a"); turnRight("b"); moveForward("c");"#)
            .await;
        let events = log.snapshot();
        let kinds: Vec<(MoveKind, Option<String>)> = events
            .iter()
            .filter_map(|event| match event {
                RunEvent::PoseChanged { kind, block_id, .. } => Some((*kind, block_id.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (MoveKind::Moved, Some("a".to_string())),
                (MoveKind::Turned, Some("b".to_string())),
            ]
        );
        assert!(events.contains(&RunEvent::Bumped {
            pose: Pose::new(2, 1, Heading::South),
            block_id: Some("c".to_string()),
        }));
        assert!(matches!(events.first(), Some(RunEvent::Started { .. })));
        assert!(matches!(
            events.last(),
            Some(RunEvent::Finished {
                status: RunStatus::Failure,
                reason: Some(FailureReason::Blocked)
            })
        ));
    }

    #[tokio::test]
    async fn stop_request_cancels_run() {
        let mut controller = l_shape();
        controller.begin();
        assert!(controller.advance().await);
        controller.stop_handle().request_stop();
        assert!(!controller.advance().await);
        assert_eq!(controller.status(), RunStatus::Failure);
        assert_eq!(controller.failure_reason(), Some(FailureReason::Cancelled));
        assert_eq!(controller.pose(), Pose::new(2, 1, Heading::East));

        controller.reset();
        assert_eq!(controller.status(), RunStatus::Idle);
        assert!(!controller.stop_handle().is_requested());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_from_another_task_cancels_a_spinning_run() {
        let limits = EngineLimits {
            max_iterations: 1_000_000,
            ..EngineLimits::unpaced()
        };
        let mut controller = controller(&["#####", "#S.F#", "#####"], Heading::North, limits);
        let stop = controller.stop_handle();
        let stopper = tokio::spawn(async move { stop.request_stop() });

        let report = controller.start("while true { turnLeft(); }").await;
        stopper.await.expect("stopper task");

        assert_eq!(report.status, RunStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Cancelled));
        assert!(report.steps < 1_000);
    }

    #[tokio::test]
    async fn long_expression_fails_without_crashing() {
        let mut controller = l_shape();
        let chain = vec!["1"; 5_000].join(" + ");
        let report = controller
            .start(&format!("let x = {chain};\nmoveForward();"))
            .await;
        assert_eq!(report.status, RunStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Exception));
        assert_eq!(report.steps, 0);
    }

    #[tokio::test]
    async fn sensor_polling_loop_is_stuck() {
        let limits = EngineLimits {
            stall_repeat_limit: 10,
            max_iterations: 1_000,
            ..EngineLimits::unpaced()
        };
        let mut controller = controller(&["S..F"], Heading::East, limits);
        let report = controller.start("while (isPathForward()) { }").await;
        assert_eq!(report.reason, Some(FailureReason::Stuck));
        assert_eq!(report.steps, 12);
    }

    #[tokio::test]
    async fn empty_loop_hits_runaway_ceiling() {
        let limits = EngineLimits {
            max_iterations: 50,
            ..EngineLimits::unpaced()
        };
        let mut controller = controller(&["S..F"], Heading::East, limits);
        let report = controller.start("while (true) { }").await;
        assert_eq!(report.reason, Some(FailureReason::Runaway));
        assert_eq!(report.steps, 0);
    }

    #[tokio::test]
    async fn wall_clock_ceiling_stops_slow_runs() {
        let limits = EngineLimits {
            max_run: Duration::from_millis(5),
            step_delay: Duration::from_millis(10),
            ..EngineLimits::default()
        };
        let mut controller = controller(&["#####", "#S.F#", "#####"], Heading::North, limits);
        let report = controller.start("while (true) { turnLeft(); }").await;
        assert_eq!(report.reason, Some(FailureReason::Runaway));
        assert!(report.steps < 5);
    }

    #[tokio::test]
    async fn success_records_completion() {
        let progress: ProgressHandle = Arc::new(Mutex::new(
            ProgressionStore::new(Box::new(MemoryStore::new())).with_game("maze", 3),
        ));
        let mut controller = controller(&["S.F"], Heading::East, EngineLimits::unpaced())
            .with_progress(progress.clone());
        let report = controller.start("moveForward(); moveForward();").await;
        assert_eq!(report.status, RunStatus::Success);

        let state = progress
            .lock()
            .expect("lock")
            .load("maze")
            .expect("load");
        assert!(state.unlocked.contains(&2));
        assert!(state.completed.contains(&1));
    }
}
