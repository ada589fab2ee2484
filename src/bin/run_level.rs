use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use maze_blocks_server::catalog::{self, GameVariant};
use maze_blocks_server::config::EngineConfig;
use maze_blocks_server::engine::EventLog;
use maze_blocks_server::progress::{ProgressionState, ProgressionStore};
use maze_blocks_server::session::GameSession;
use maze_blocks_server::storage::{FileStore, KeyValueStore, MemoryStore};
use maze_blocks_server::types::{RunEvent, RunReport, RunStatus};
use maze_blocks_server::world::{Level, LevelSpec};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a generated program against one level")]
struct Cli {
    #[arg(long, default_value = "maze")]
    game: String,
    /// Level to run; defaults to the stored current level.
    #[arg(long)]
    level: Option<u32>,
    /// Program text file, or `-` for stdin.
    #[arg(long)]
    program: PathBuf,
    /// JSON level definition replacing the game's built-in levels.
    #[arg(long)]
    level_file: Option<PathBuf>,
    /// Progress file; progress is kept in memory when omitted.
    #[arg(long)]
    store: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    step_delay_ms: Option<u64>,
    /// Treat every level before `--level` as completed.
    #[arg(long)]
    unlock_all: bool,
    /// Include presentation events in the output.
    #[arg(long)]
    events: bool,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    game: String,
    level: u32,
    #[serde(rename = "finishedAt")]
    finished_at: String,
    report: RunReport,
    progress: ProgressionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<RunEvent>>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => {
            let success = output.report.status == RunStatus::Success;
            match serde_json::to_string_pretty(&output) {
                Ok(text) => println!("{text}"),
                Err(error) => {
                    eprintln!("[run_level] failed to encode output: {error}");
                    return ExitCode::from(2);
                }
            }
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(error) => {
            eprintln!("[run_level] {error}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<RunOutput, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(delay) = cli.step_delay_ms {
        config.step_delay_ms = delay;
    }

    let variant = load_variant(&cli.game, cli.level_file.as_deref())?;
    let source = read_program(&cli.program)?;

    let storage: Box<dyn KeyValueStore> = match &cli.store {
        Some(path) => Box::new(FileStore::open(path.clone())),
        None => Box::new(MemoryStore::new()),
    };
    let progress = ProgressionStore::new(storage)
        .with_game(variant.id, variant.level_count())
        .into_handle();

    if let (true, Some(level)) = (cli.unlock_all, cli.level) {
        let mut store = progress.lock().map_err(|_| "progress store lock poisoned")?;
        for earlier in 1..level.min(variant.level_count() + 1) {
            store.complete(variant.id, earlier)?;
        }
    }

    let mut session = GameSession::open(variant, progress, config.limits())?;
    if let Some(level) = cli.level {
        if session.level().index != level && !session.jump_to(level)? {
            return Err(format!("level {level} is locked or does not exist").into());
        }
    }

    let events = EventLog::new();
    session.set_observer(Box::new(events.clone()));
    let report = session.run(&source).await;

    Ok(RunOutput {
        game: session.variant().id.to_string(),
        level: session.level().index,
        finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        report,
        progress: session.progress()?,
        events: cli.events.then(|| events.take()),
    })
}

fn load_variant(game: &str, level_file: Option<&Path>) -> Result<GameVariant, Box<dyn std::error::Error>> {
    let variant = catalog::find(game)?.ok_or_else(|| format!("unknown game '{game}'"))?;
    let Some(path) = level_file else {
        return Ok(variant);
    };
    let text = std::fs::read_to_string(path)
        .map_err(|error| format!("failed to read {}: {error}", path.display()))?;
    let specs: Vec<LevelSpec> = match serde_json::from_str::<Vec<LevelSpec>>(&text) {
        Ok(specs) => specs,
        Err(_) => vec![serde_json::from_str::<LevelSpec>(&text)?],
    };
    let levels = specs
        .into_iter()
        .map(Level::from_spec)
        .collect::<Result<Vec<_>, _>>()?;
    if levels.is_empty() {
        return Err(format!("{} holds no levels", path.display()).into());
    }
    Ok(variant.with_levels(levels))
}

fn read_program(path: &Path) -> io::Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        io::stdin().read_to_string(&mut source)?;
        return Ok(source);
    }
    std::fs::read_to_string(path)
}
