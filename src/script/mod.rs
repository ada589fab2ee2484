//! Sandboxed runner for the Rhai text the block editor generates.

mod sandbox;

use futures_util::future::BoxFuture;
use rhai::{ASTNode, Stmt, AST};
use tokio::sync::{mpsc, oneshot};

use crate::error::ScriptError;

pub use sandbox::Watchdog;

pub trait Host: Send {
    fn names(&self) -> Vec<String>;

    fn call<'a>(&'a mut self, name: &'a str, block_id: Option<&'a str>) -> BoxFuture<'a, bool>;

    fn halted(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct Program {
    ast: AST,
    blocks: usize,
}

impl Program {
    pub fn compile(source: &str) -> Result<Self, ScriptError> {
        let ast = sandbox::base_engine()
            .compile(source)
            .map_err(sandbox::parse_error)?;
        let blocks = count_blocks(&ast);
        Ok(Self { ast, blocks })
    }

    pub fn block_count(&self) -> usize {
        self.blocks
    }
}

fn count_blocks(ast: &AST) -> usize {
    let mut blocks = 0;
    ast.walk(&mut |path: &[ASTNode]| {
        if let Some(ASTNode::Stmt(stmt)) = path.last() {
            if !matches!(stmt, Stmt::Noop(..) | Stmt::Block(..)) {
                blocks += 1;
            }
        }
        true
    });
    blocks
}

pub(crate) struct HostCall {
    name: String,
    block_id: Option<String>,
    reply: oneshot::Sender<bool>,
}

struct HaltOnDrop(Watchdog);

impl Drop for HaltOnDrop {
    fn drop(&mut self) {
        self.0.halt();
    }
}

pub async fn execute<H: Host + ?Sized>(
    program: Program,
    host: &mut H,
    watchdog: Watchdog,
) -> Result<(), ScriptError> {
    let names = host.names();
    let (calls, mut requests) = mpsc::channel::<HostCall>(1);
    let script = {
        let watchdog = watchdog.clone();
        tokio::task::spawn_blocking(move || sandbox::run(&program.ast, &names, calls, watchdog))
    };
    let _halt = HaltOnDrop(watchdog.clone());

    while let Some(call) = requests.recv().await {
        let value = host.call(&call.name, call.block_id.as_deref()).await;
        if host.halted() {
            watchdog.halt();
        }
        let _ = call.reply.send(value);
    }

    match script.await {
        Ok(result) => result,
        Err(error) => Err(ScriptError::Aborted(error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::FutureExt;

    use super::*;

    struct Recorder {
        calls: Vec<(String, Option<String>)>,
        answer: bool,
        halt_after: Option<usize>,
    }

    impl Recorder {
        fn new(answer: bool) -> Self {
            Self {
                calls: Vec::new(),
                answer,
                halt_after: None,
            }
        }
    }

    impl Host for Recorder {
        fn names(&self) -> Vec<String> {
            vec!["moveForward".to_string(), "isPathForward".to_string()]
        }

        fn call<'a>(&'a mut self, name: &'a str, block_id: Option<&'a str>) -> BoxFuture<'a, bool> {
            async move {
                self.calls
                    .push((name.to_string(), block_id.map(str::to_string)));
                self.answer
            }
            .boxed()
        }

        fn halted(&self) -> bool {
            self.halt_after.is_some_and(|limit| self.calls.len() >= limit)
        }
    }

    fn watchdog(max_operations: u64) -> Watchdog {
        Watchdog::new(
            max_operations,
            Duration::from_secs(10),
            Arc::new(AtomicBool::new(false)),
        )
    }

    async fn run(source: &str, host: &mut Recorder) -> Result<(), ScriptError> {
        execute(Program::compile(source)?, host, watchdog(10_000)).await
    }

    #[tokio::test]
    async fn forwards_calls_with_block_ids() {
        let mut host = Recorder::new(true);
        run(
            r#"moveForward(); moveForward("b2"); isPathForward("b3");"#,
            &mut host,
        )
        .await
        .expect("runs");
        assert_eq!(
            host.calls,
            vec![
                ("moveForward".to_string(), None),
                ("moveForward".to_string(), Some("b2".to_string())),
                ("isPathForward".to_string(), Some("b3".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn loops_see_host_answers() {
        let mut host = Recorder::new(true);
        run(
            "let n = 0;\nwhile isPathForward() {\n  n += 1;\n  if n == 3 { break; }\n  moveForward();\n}",
            &mut host,
        )
        .await
        .expect("runs");
        let moves = host
            .calls
            .iter()
            .filter(|(name, _)| name == "moveForward")
            .count();
        assert_eq!(moves, 2);
        assert_eq!(host.calls.len(), 5);
    }

    #[tokio::test]
    async fn unbound_names_are_undefined() {
        let mut host = Recorder::new(true);
        let error = run("moveForward();\nlaunchRocket();", &mut host)
            .await
            .expect_err("unbound");
        assert!(matches!(error, ScriptError::Undefined { ref name } if name.contains("launchRocket")));
        assert_eq!(host.calls.len(), 1);
    }

    #[test]
    fn undeclared_variables_fail_to_compile() {
        let error = Program::compile("moveForward(steps);").expect_err("strict");
        assert!(matches!(error, ScriptError::Parse { line: 1, .. }));
    }

    #[test]
    fn long_operator_chains_are_rejected() {
        let chain = vec!["1"; 5_000].join("+");
        let error = Program::compile(&format!("let x = {chain};")).expect_err("too deep");
        assert!(matches!(error, ScriptError::Parse { .. }));
    }

    #[test]
    fn block_count_includes_control_blocks() {
        let program = Program::compile(
            "moveForward();\nfor i in 0..4 { moveForward(); }\nif isPathForward() { moveForward(); } else { moveForward(); }",
        )
        .expect("compiles");
        assert_eq!(program.block_count(), 6);
    }

    #[tokio::test]
    async fn halted_host_ends_the_script() {
        let mut host = Recorder::new(true);
        host.halt_after = Some(3);
        let error = run("while true { moveForward(); }", &mut host)
            .await
            .expect_err("halted");
        assert_eq!(error, ScriptError::Interrupted);
        assert_eq!(host.calls.len(), 3);
    }

    #[tokio::test]
    async fn empty_loop_runs_out_of_operations() {
        let mut host = Recorder::new(true);
        let program = Program::compile("while true { }").expect("compiles");
        let error = execute(program, &mut host, watchdog(500))
            .await
            .expect_err("operations");
        assert_eq!(error, ScriptError::Interrupted);
        assert!(host.calls.is_empty());
    }

    #[tokio::test]
    async fn stop_flag_interrupts_the_script() {
        let mut host = Recorder::new(true);
        let stop = Arc::new(AtomicBool::new(true));
        let program = Program::compile("while true { }").expect("compiles");
        let error = execute(
            program,
            &mut host,
            Watchdog::new(u64::MAX, Duration::from_secs(10), stop),
        )
        .await
        .expect_err("stopped");
        assert_eq!(error, ScriptError::Interrupted);
    }
}
