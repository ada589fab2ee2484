use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::packages::{CorePackage, Package};
use rhai::{Dynamic, Engine, EvalAltResult, OptimizationLevel, ParseError, AST};
use tokio::sync::{mpsc, oneshot};

use super::HostCall;
use crate::constants::{
    MAX_SCRIPT_CALL_LEVELS, MAX_SCRIPT_COLLECTION_LEN, MAX_SCRIPT_DEPTH, MAX_SCRIPT_STRING_LEN,
};
use crate::error::ScriptError;

/// Interrupts a script once it spends its operation budget, passes its
/// deadline, sees a stop request, or the host halts the run.
#[derive(Clone, Debug)]
pub struct Watchdog {
    max_operations: u64,
    deadline: Option<Instant>,
    stop: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn new(max_operations: u64, budget: Duration, stop: Arc<AtomicBool>) -> Self {
        Self {
            max_operations,
            deadline: Instant::now().checked_add(budget),
            stop,
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn should_interrupt(&self, operations: u64) -> bool {
        self.halted.load(Ordering::SeqCst)
            || self.stop.load(Ordering::SeqCst)
            || operations > self.max_operations
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

pub(super) fn base_engine() -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(CorePackage::new().as_shared_module());
    engine
        .set_optimization_level(OptimizationLevel::None)
        .set_strict_variables(true)
        .set_max_expr_depths(MAX_SCRIPT_DEPTH, MAX_SCRIPT_DEPTH)
        .set_max_call_levels(MAX_SCRIPT_CALL_LEVELS)
        .set_max_string_size(MAX_SCRIPT_STRING_LEN)
        .set_max_array_size(MAX_SCRIPT_COLLECTION_LEN)
        .set_max_map_size(MAX_SCRIPT_COLLECTION_LEN)
        .disable_symbol("eval");
    engine
}

pub(super) fn run(
    ast: &AST,
    names: &[String],
    calls: mpsc::Sender<HostCall>,
    watchdog: Watchdog,
) -> Result<(), ScriptError> {
    let mut engine = base_engine();
    engine.on_progress(move |operations| {
        watchdog
            .should_interrupt(operations)
            .then_some(Dynamic::UNIT)
    });
    for name in names {
        let link = calls.clone();
        let bare = name.clone();
        engine.register_fn(name.as_str(), move || forward(&link, &bare, None));

        let link = calls.clone();
        let tagged = name.clone();
        engine.register_fn(name.as_str(), move |block: Dynamic| {
            forward(&link, &tagged, block.into_string().ok())
        });
    }
    drop(calls);

    engine.run_ast(ast).map_err(|error| eval_error(*error))
}

fn forward(
    link: &mpsc::Sender<HostCall>,
    name: &str,
    block_id: Option<String>,
) -> Result<bool, Box<EvalAltResult>> {
    let (reply, answer) = oneshot::channel();
    let call = HostCall {
        name: name.to_string(),
        block_id,
        reply,
    };
    if link.blocking_send(call).is_err() {
        return Err(Box::<EvalAltResult>::from("host closed the run"));
    }
    answer
        .blocking_recv()
        .map_err(|_| Box::<EvalAltResult>::from("host closed the run"))
}

pub(super) fn parse_error(error: ParseError) -> ScriptError {
    let position = error.position();
    ScriptError::Parse {
        line: position.line().unwrap_or(0) as u32,
        col: position.position().unwrap_or(0) as u32,
        message: error.err_type().to_string(),
    }
}

fn eval_error(error: EvalAltResult) -> ScriptError {
    let line = error.position().line().unwrap_or(0) as u32;
    match error {
        EvalAltResult::ErrorTerminated(..) => ScriptError::Interrupted,
        EvalAltResult::ErrorFunctionNotFound(signature, _) => ScriptError::Undefined {
            name: signature,
        },
        EvalAltResult::ErrorVariableNotFound(name, _) => ScriptError::Undefined { name },
        other => ScriptError::Runtime {
            line,
            message: other.to_string(),
        },
    }
}
