use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::AppState;

use super::AppError;

// ─── GET /metrics ────────────────────────────────────────────────
/// Prometheus text exposition of everything the meter has recorded.

pub async fn render(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let encoder = TextEncoder::new();
    let body = encode(&encoder, &state.registry)?;
    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_owned())], body))
}

fn encode(encoder: &TextEncoder, registry: &Registry) -> Result<Vec<u8>, AppError> {
    let mut body = Vec::new();
    encoder
        .encode(&registry.gather(), &mut body)
        .map_err(|e| AppError::Internal(format!("failed to encode metrics: {e}")))?;
    Ok(body)
}
