//! Route handlers. Each handler is a thin translation from an
//! [`ApiState`]/[`OrchestratorHandle`] call to an HTTP response; the
//! allocation and journalling logic all lives behind the trait.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use qguardarr_api_models::{
    HealthResponse, LimitsResetRequest, LimitsResetResponse, ManagedTorrentRowDto, ManagedTorrentsResponse,
    MatchTestResponse, PreviewResponse, RollbackRequest, RollbackResponse, RolloutRequest, SmoothingResetRequest,
    TrackerStatsResponse,
};
use qguardarr_config::QguardarrConfig;
use qguardarr_events::WebhookEvent;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

/// `GET /health`.
pub async fn health(State(state): State<ApiState>) -> ApiResult<Json<HealthResponse>> {
    let orchestrator = state.orchestrator()?;
    Ok(Json(HealthResponse {
        status: orchestrator.health(),
        uptime_seconds: orchestrator.uptime_seconds(),
        rollout_percentage: orchestrator.rollout_percentage(),
        update_interval: orchestrator.update_interval(),
        dry_run: orchestrator.dry_run(),
        last_cycle: orchestrator.stats(),
    }))
}

/// `GET /stats`.
pub async fn stats(State(state): State<ApiState>) -> ApiResult<Json<qguardarr_api_models::CycleStatsDto>> {
    Ok(Json(state.orchestrator()?.stats()))
}

/// `GET /stats/trackers`.
pub async fn tracker_stats(State(state): State<ApiState>) -> ApiResult<Json<TrackerStatsResponse>> {
    Ok(Json(TrackerStatsResponse { trackers: state.orchestrator()?.tracker_stats() }))
}

/// `GET /stats/managed`.
pub async fn managed_stats(State(state): State<ApiState>) -> ApiResult<Json<ManagedTorrentsResponse>> {
    let rows: Vec<ManagedTorrentRowDto> = state.orchestrator()?.managed_rows();
    Ok(Json(ManagedTorrentsResponse { torrents: rows }))
}

/// `GET /preview/next-cycle`.
pub async fn preview_next_cycle(State(state): State<ApiState>) -> ApiResult<Json<PreviewResponse>> {
    Ok(Json(state.orchestrator()?.preview_next_cycle()))
}

/// `POST /cycle/force`.
pub async fn force_cycle(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    state
        .orchestrator()?
        .force_cycle()
        .await
        .map_err(|source| ApiError::Orchestrator { operation: "force_cycle", source })?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /webhook`. Form-encoded, per qBittorrent's run-on-event hooks.
///
/// Always acknowledges with `200` — even when the body fails to parse —
/// since qBittorrent's hook scripts do not retry on non-2xx and a dropped
/// notification is recoverable (the next cycle's rollout-gated poll picks
/// the torrent back up), while a qBittorrent process blocked on a webhook
/// response is not.
pub async fn webhook(State(state): State<ApiState>, body: Bytes) -> StatusCode {
    match serde_urlencoded::from_bytes::<WebhookEvent>(&body) {
        Ok(event) => {
            state.webhook().enqueue(event);
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse webhook payload");
        }
    }
    StatusCode::OK
}

/// `POST /rollback`.
pub async fn rollback(
    State(state): State<ApiState>,
    Json(request): Json<RollbackRequest>,
) -> ApiResult<Json<RollbackResponse>> {
    if !request.confirm {
        return Err(ApiError::ConfirmationRequired { action: "rollback" });
    }
    let restored = state
        .orchestrator()?
        .apply_rollback()
        .await
        .map_err(|source| ApiError::Orchestrator { operation: "apply_rollback", source })?;
    Ok(Json(RollbackResponse { restored }))
}

/// `POST /limits/reset`.
pub async fn limits_reset(
    State(state): State<ApiState>,
    Json(request): Json<LimitsResetRequest>,
) -> ApiResult<Json<LimitsResetResponse>> {
    if !request.confirm {
        return Err(ApiError::ConfirmationRequired { action: "limits_reset" });
    }
    let reset = state
        .orchestrator()?
        .reset_limits(request.scope, request.mark_restored)
        .await
        .map_err(|source| ApiError::Orchestrator { operation: "reset_limits", source })?;
    Ok(Json(LimitsResetResponse { reset }))
}

/// `POST /rollout`.
pub async fn rollout(State(state): State<ApiState>, Json(request): Json<RolloutRequest>) -> ApiResult<StatusCode> {
    state.orchestrator()?.set_rollout_percentage(request.percentage);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /smoothing/reset`.
pub async fn smoothing_reset(
    State(state): State<ApiState>,
    Json(request): Json<SmoothingResetRequest>,
) -> ApiResult<StatusCode> {
    let orchestrator = state.orchestrator()?;
    if request.all {
        orchestrator.reset_smoothing(None);
    } else if let Some(tracker_id) = request.tracker_id.as_deref() {
        orchestrator.reset_smoothing(Some(tracker_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /config`.
pub async fn get_config(State(state): State<ApiState>) -> ApiResult<Json<QguardarrConfig>> {
    Ok(Json(state.orchestrator()?.config_snapshot()))
}

/// `POST /config/reload`.
pub async fn config_reload(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    state.reload_config().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub(crate) struct MatchTestQuery {
    url: String,
}

/// `GET /match/test?url=…`.
pub async fn match_test(
    State(state): State<ApiState>,
    Query(query): Query<MatchTestQuery>,
) -> ApiResult<Json<MatchTestResponse>> {
    let orchestrator = state.orchestrator()?;
    let detail = orchestrator.match_test(&query.url);
    Ok(Json(MatchTestResponse {
        url: query.url,
        tracker_id: detail.tracker_id,
        pattern_matches: detail.pattern_matches,
    }))
}

/// `GET /metrics`. Prometheus text exposition, not part of the distilled
/// endpoint list but carried as ambient observability per the rest of the
/// workspace's telemetry conventions.
pub async fn metrics(State(state): State<ApiState>) -> ApiResult<String> {
    state
        .metrics()
        .render()
        .map_err(|source| ApiError::Orchestrator { operation: "render_metrics", source: source.into() })
}
