use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::load_generator::{self, Mix};
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    /// Number of concurrent Tokio tasks generating load
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How long the run lasts (seconds)
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    #[serde(default = "default_read_pct")]
    pub read_pct: u8,

    #[serde(default = "default_script_pct")]
    pub script_pct: u8,

    #[serde(default = "default_batch_pct")]
    pub batch_pct: u8,
}

fn default_concurrency() -> u32 {
    10
}
fn default_duration() -> u64 {
    30
}
fn default_read_pct() -> u8 {
    60
}
fn default_script_pct() -> u8 {
    10
}
fn default_batch_pct() -> u8 {
    10
}

impl LoadConfig {
    fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 || self.concurrency > 500 {
            return Err(AppError::BadRequest(
                "concurrency must be between 1 and 500".into(),
            ));
        }
        if self.duration_secs == 0 || self.duration_secs > 300 {
            return Err(AppError::BadRequest(
                "duration_secs must be between 1 and 300".into(),
            ));
        }
        let total =
            u16::from(self.read_pct) + u16::from(self.script_pct) + u16::from(self.batch_pct);
        if total > 100 {
            return Err(AppError::BadRequest(
                "read_pct + script_pct + batch_pct must not exceed 100".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct LoadStatus {
    pub running: bool,
    pub message: String,
}

// ─── POST /api/load/start ────────────────────────────────────────

pub async fn start_load(
    State(state): State<Arc<AppState>>,
    Json(config): Json<LoadConfig>,
) -> Result<Json<LoadStatus>, AppError> {
    config.validate()?;

    // Flip the flag atomically so two concurrent starts cannot both win
    if state
        .load_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::AlreadyRunning);
    }

    let mix = Mix {
        read_pct: config.read_pct,
        script_pct: config.script_pct,
        batch_pct: config.batch_pct,
    };
    let msg = format!(
        "Started: {} workers × {}s, {}% reads / {}% scripts / {}% batches",
        config.concurrency, config.duration_secs, mix.read_pct, mix.script_pct, mix.batch_pct,
    );
    tracing::info!(
        concurrency = config.concurrency,
        duration_secs = config.duration_secs,
        "starting load run"
    );

    let running = state.load_running.clone();
    let redis = state.redis.clone();
    let concurrency = config.concurrency;
    let duration_secs = config.duration_secs;

    let handle = tokio::spawn(async move {
        load_generator::run(running, redis, concurrency, duration_secs, mix).await;
    });

    // Stash the handle so `stop` can await clean shutdown
    let mut guard = state.load_handle.lock().await;
    *guard = Some(handle);

    Ok(Json(LoadStatus {
        running: true,
        message: msg,
    }))
}

// ─── POST /api/load/stop ─────────────────────────────────────────

pub async fn stop_load(State(state): State<Arc<AppState>>) -> Result<Json<LoadStatus>, AppError> {
    if !state.load_running.load(Ordering::SeqCst) {
        return Ok(Json(LoadStatus {
            running: false,
            message: "No load run in progress".into(),
        }));
    }

    state.load_running.store(false, Ordering::SeqCst);

    let mut guard = state.load_handle.lock().await;
    if let Some(handle) = guard.take() {
        handle
            .await
            .map_err(|e| AppError::Internal(format!("load task failed: {e}")))?;
    }

    Ok(Json(LoadStatus {
        running: false,
        message: "Load run stopped".into(),
    }))
}

// ─── GET /api/load/status ────────────────────────────────────────

pub async fn load_status(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    let running = state.load_running.load(Ordering::SeqCst);
    Json(LoadStatus {
        running,
        message: if running {
            "Load run in progress".into()
        } else {
            "Idle".into()
        },
    })
}
