use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use maze_blocks_server::catalog::{self, GameVariant, VariantInfo};
use maze_blocks_server::config::EngineConfig;
use maze_blocks_server::constants::normalize_step_delay_ms;
use maze_blocks_server::engine::{EventLog, LogObserver, StopHandle};
use maze_blocks_server::error::ProgressError;
use maze_blocks_server::progress::{ProgressHandle, ProgressionState, ProgressionStore};
use maze_blocks_server::session::GameSession;
use maze_blocks_server::storage::FileStore;
use maze_blocks_server::types::{RunEvent, RunReport};
use maze_blocks_server::world::LevelSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::services::{ServeDir, ServeFile};

type SharedState = Arc<ServerState>;

#[derive(Debug, Parser)]
#[command(about = "HTTP host for the block maze games")]
struct Args {
    /// JSON file with engine limits.
    #[arg(long)]
    config: Option<PathBuf>,
}

struct GameEntry {
    variant: GameVariant,
    session: Arc<Mutex<GameSession>>,
    stop: StopHandle,
}

struct ServerState {
    games: HashMap<String, GameEntry>,
    infos: Vec<VariantInfo>,
    progress: ProgressHandle,
    config: EngineConfig,
}

impl ServerState {
    fn game(&self, game_id: &str) -> Result<&GameEntry, ApiError> {
        self.games
            .get(game_id)
            .ok_or_else(|| ApiError::UnknownGame(game_id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CurrentRequest {
    level: u32,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(default)]
    level: Option<u32>,
    source: String,
    #[serde(rename = "stepDelayMs", default)]
    step_delay_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    level: u32,
    report: RunReport,
    events: Vec<RunEvent>,
}

#[derive(Debug)]
enum ApiError {
    UnknownGame(String),
    UnknownLevel(u32),
    Locked(u32),
    Progress(ProgressError),
}

impl From<ProgressError> for ApiError {
    fn from(error: ProgressError) -> Self {
        ApiError::Progress(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownGame(_) | ApiError::UnknownLevel(_) => StatusCode::NOT_FOUND,
            ApiError::Locked(_) => StatusCode::FORBIDDEN,
            ApiError::Progress(ProgressError::UnknownGame(_)) => StatusCode::NOT_FOUND,
            ApiError::Progress(ProgressError::LevelOutOfRange { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Progress(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::UnknownGame(game_id) => format!("unknown game '{game_id}'"),
            ApiError::UnknownLevel(level) => format!("level {level} does not exist"),
            ApiError::Locked(level) => format!("level {level} is locked"),
            ApiError::Progress(error) => error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("[server] {}", self.message());
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            log::error!("[server] {error}");
            std::process::exit(1);
        }
    };

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let progress_path = std::env::var("PROGRESS_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data/progress.json"));

    let state = match build_state(config, progress_path) {
        Ok(state) => Arc::new(state),
        Err(error) => {
            log::error!("[server] failed to load games: {error}");
            std::process::exit(1);
        }
    };

    let app = router(state);
    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        log::info!("[server] static file root: {}", static_dir.to_string_lossy());
        app.fallback_service(ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)))
    } else {
        log::warn!("[server] static file root not found; serving the API only");
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            log::error!("[server] failed to bind {bind_addr}: {error}");
            std::process::exit(1);
        }
    };

    log::info!("[server] listening on :{port}");
    if let Err(error) = axum::serve(listener, app).await {
        log::error!("[server] server runtime failed: {error}");
        std::process::exit(1);
    }
}

fn build_state(
    config: EngineConfig,
    progress_path: PathBuf,
) -> Result<ServerState, Box<dyn std::error::Error>> {
    log::info!("[server] progress file: {}", progress_path.display());
    let progress = ProgressionStore::new(Box::new(FileStore::open(progress_path))).into_handle();

    let mut games = HashMap::new();
    let mut infos = Vec::new();
    for variant in catalog::all_variants()? {
        let mut session = GameSession::open(variant.clone(), progress.clone(), config.limits())?;
        session.set_observer(Box::new(LogObserver {
            label: variant.id.to_string(),
        }));
        let stop = session.stop_handle();
        infos.push(variant.info());
        games.insert(
            variant.id.to_string(),
            GameEntry {
                variant,
                session: Arc::new(Mutex::new(session)),
                stop,
            },
        );
    }

    Ok(ServerState {
        games,
        infos,
        progress,
        config,
    })
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/games", get(games_handler))
        .route("/api/games/{game}/progress", get(progress_handler))
        .route("/api/games/{game}/levels/{level}", get(level_handler))
        .route("/api/games/{game}/current", post(current_handler))
        .route("/api/games/{game}/reset", post(reset_handler))
        .route("/api/games/{game}/stop", post(stop_handler))
        .route("/api/games/{game}/run", post(run_handler))
        .with_state(state)
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("dist/client"), PathBuf::from("../dist/client")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

fn load_progress(state: &ServerState, game_id: &str) -> Result<ProgressionState, ApiError> {
    let store = state
        .progress
        .lock()
        .map_err(|_| ApiError::Progress(ProgressError::Poisoned))?;
    Ok(store.load(game_id)?)
}

fn reset_progress(state: &ServerState, game_id: &str) -> Result<ProgressionState, ApiError> {
    let mut store = state
        .progress
        .lock()
        .map_err(|_| ApiError::Progress(ProgressError::Poisoned))?;
    Ok(store.reset(game_id)?)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn games_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.infos.clone())
}

async fn progress_handler(
    State(state): State<SharedState>,
    Path(game): Path<String>,
) -> Result<Json<ProgressionState>, ApiError> {
    state.game(&game)?;
    Ok(Json(load_progress(&state, &game)?))
}

async fn level_handler(
    State(state): State<SharedState>,
    Path((game, level)): Path<(String, u32)>,
) -> Result<Json<LevelSpec>, ApiError> {
    let entry = state.game(&game)?;
    let level = entry
        .variant
        .level(level)
        .ok_or(ApiError::UnknownLevel(level))?;
    Ok(Json(level.to_spec()))
}

async fn current_handler(
    State(state): State<SharedState>,
    Path(game): Path<String>,
    Json(request): Json<CurrentRequest>,
) -> Result<Json<ProgressionState>, ApiError> {
    let entry = state.game(&game)?;
    if entry.variant.level(request.level).is_none() {
        return Err(ApiError::UnknownLevel(request.level));
    }
    entry.stop.request_stop();
    let mut session = entry.session.lock().await;
    if !session.jump_to(request.level)? {
        return Err(ApiError::Locked(request.level));
    }
    drop(session);
    Ok(Json(load_progress(&state, &game)?))
}

async fn reset_handler(
    State(state): State<SharedState>,
    Path(game): Path<String>,
) -> Result<Json<ProgressionState>, ApiError> {
    let entry = state.game(&game)?;
    entry.stop.request_stop();
    let mut session = entry.session.lock().await;
    let progress = reset_progress(&state, &game)?;
    session.jump_to(1)?;
    Ok(Json(progress))
}

async fn stop_handler(
    State(state): State<SharedState>,
    Path(game): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.game(&game)?;
    entry.stop.request_stop();
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

async fn run_handler(
    State(state): State<SharedState>,
    Path(game): Path<String>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let entry = state.game(&game)?;
    let mut session = entry.session.lock().await;

    if let Some(level) = request.level {
        if entry.variant.level(level).is_none() {
            return Err(ApiError::UnknownLevel(level));
        }
        if session.level().index != level && !session.jump_to(level)? {
            return Err(ApiError::Locked(level));
        }
    }

    session
        .controller_mut()
        .set_limits(run_limits(&state.config, request.step_delay_ms));
    let events = EventLog::new();
    session.set_observer(Box::new(events.clone()));
    let report = session.run(&request.source).await;
    session.set_observer(Box::new(LogObserver {
        label: game.clone(),
    }));

    Ok(Json(RunResponse {
        level: session.level().index,
        report,
        events: events.take(),
    }))
}

fn run_limits(
    config: &EngineConfig,
    step_delay_ms: Option<i64>,
) -> maze_blocks_server::engine::EngineLimits {
    let delay = normalize_step_delay_ms(step_delay_ms).unwrap_or(0);
    config.limits().with_step_delay(Duration::from_millis(delay))
}
