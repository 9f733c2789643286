//! Trigger, status, and cancel handlers for backfill runs.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adsink_core::BackfillOptions;
use adsink_engine::SyncStatus;

use crate::middleware::RequestId;

use super::{map_engine_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct StartBackfillBody {
    pub tenant_id: String,
    /// Optional sanity check against the tenant's configured connection.
    pub connection_id: Option<String>,
    pub lookback_days: Option<u32>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct StartBackfillData {
    run_id: Uuid,
    jobs_scheduled: u32,
    estimated_completion: DateTime<Utc>,
}

pub(super) async fn start_backfill(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<StartBackfillBody>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(tenant) = state.tenants.find(&body.tenant_id) else {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            format!("unknown tenant '{}'", body.tenant_id),
        ));
    };

    if let Some(connection_id) = &body.connection_id {
        if connection_id != &tenant.connection_id {
            return Err(ApiError::new(
                req_id.0,
                "validation_error",
                format!(
                    "connection '{connection_id}' does not belong to tenant '{}'",
                    body.tenant_id
                ),
            ));
        }
    }

    let mut opts: BackfillOptions = state.engine.default_options(tenant);
    if let Some(lookback_days) = body.lookback_days {
        if lookback_days == 0 {
            return Err(ApiError::new(
                req_id.0,
                "validation_error",
                "lookback_days must be at least 1",
            ));
        }
        opts.lookback_days = lookback_days;
    }
    opts.force = body.force;

    let started = state
        .engine
        .start_backfill(tenant, opts, "api")
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: StartBackfillData {
                run_id: started.run_id,
                jobs_scheduled: started.jobs_scheduled,
                estimated_completion: started.estimated_completion,
            },
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

pub(super) async fn get_backfill(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<SyncStatus>>, ApiError> {
    let status = adsink_engine::status::status_for_run(&state.pool, run_id)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: status,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// Latest-run status for a tenant: what a dashboard polls when it has no
/// run id in hand.
pub(super) async fn get_tenant_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(tenant_id): Path<String>,
) -> Result<Json<ApiResponse<SyncStatus>>, ApiError> {
    let status = adsink_engine::status::latest_status_for_tenant(&state.pool, &tenant_id)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                format!("no sync runs recorded for tenant '{tenant_id}'"),
            )
        })?;

    Ok(Json(ApiResponse {
        data: status,
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct ListBackfillsQuery {
    pub tenant_id: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct RunSummary {
    run_id: Uuid,
    tenant_id: String,
    trigger_source: String,
    lookback_days: i32,
    force: bool,
    status: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    jobs_total: i32,
    jobs_succeeded: i32,
    jobs_failed: i32,
    rows_written: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

pub(super) async fn list_backfills(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ListBackfillsQuery>,
) -> Result<Json<ApiResponse<Vec<RunSummary>>>, ApiError> {
    let rows = adsink_db::list_runs_for_tenant(
        &state.pool,
        &query.tenant_id,
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_engine_error(req_id.0.clone(), &adsink_engine::EngineError::Db(e)))?;

    let data = rows
        .into_iter()
        .map(|row| RunSummary {
            run_id: row.public_id,
            tenant_id: row.tenant_id,
            trigger_source: row.trigger_source,
            lookback_days: row.lookback_days,
            force: row.force_refetch,
            status: row.status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            jobs_total: row.jobs_total,
            jobs_succeeded: row.jobs_succeeded,
            jobs_failed: row.jobs_failed,
            rows_written: row.rows_written,
            error_message: row.error_message,
            created_at: row.created_at,
        })
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct CancelData {
    run_id: Uuid,
    signalled: bool,
    status: SyncStatus,
}

pub(super) async fn cancel_backfill(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(run_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let ack = state
        .engine
        .cancel_run(run_id)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: CancelData {
                run_id,
                signalled: ack.signalled,
                status: ack.status,
            },
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_body_defaults_force_to_false() {
        let body: StartBackfillBody =
            serde_json::from_str(r#"{"tenant_id":"acme"}"#).expect("deserialize body");
        assert_eq!(body.tenant_id, "acme");
        assert!(!body.force);
        assert_eq!(body.lookback_days, None);
    }

    #[test]
    fn run_summary_is_serializable() {
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            trigger_source: "scheduler".to_string(),
            lookback_days: 90,
            force: false,
            status: "partial".to_string(),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            jobs_total: 4,
            jobs_succeeded: 3,
            jobs_failed: 1,
            rows_written: 1200,
            error_message: Some("1 of 4 jobs failed".to_string()),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&summary).expect("serialize run summary");
        assert!(json.contains("\"status\":\"partial\""));
        assert!(json.contains("\"jobs_failed\":1"));
    }
}
