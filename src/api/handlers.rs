//! Request handlers for the station endpoints.
//!
//! Every handler takes the engine lock for one short critical section,
//! applies the operation, and maps the result into the `{status, msg,
//! data}` envelope. Errors never become transport failures; they travel
//! as `status: false` with HTTP 200, matching the client contract.

use std::sync::{Arc, MutexGuard, PoisonError};

use axum::Json;
use axum::extract::{Query, State};
use serde_json::json;

use super::AppState;
use super::types::{
    ApiResponse, BillsQuery, CancelRequest, ChangeModeRequest, DisconnectRequest, FaultRequest,
    JoinRequest, LeaveRequest, ModifyChargingRequest, RepairRequest, ReportQuery, SetTimeRequest,
    SpeedupRequest, ToggleRequest,
};
use crate::station::Station;
use crate::station::billing::ReportKind;
use crate::station::engine::ToggleAction;
use crate::station::types::StationError;

fn station(state: &AppState) -> MutexGuard<'_, Station> {
    state
        .station
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn respond<T: serde::Serialize>(
    msg: &str,
    result: Result<T, StationError>,
) -> Json<ApiResponse> {
    match result {
        Ok(data) => Json(ApiResponse::ok(msg, data)),
        Err(e) => Json(ApiResponse::fail(&e)),
    }
}

/// `GET /queue/status`
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let status = station(&state).queue_status();
    Json(ApiResponse::ok("queue status", status))
}

/// `POST /queue/join`
pub async fn queue_join(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinRequest>,
) -> Json<ApiResponse> {
    let result = station(&state)
        .join(&req.username, req.mode, req.requested_amount, req.priority)
        .map(|qn| json!({ "queue_number": qn }));
    respond("joined queue", result)
}

/// `POST /queue/leave`
pub async fn queue_leave(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LeaveRequest>,
) -> Json<ApiResponse> {
    let result = station(&state).leave(req.queue_number);
    respond("left queue", result)
}

/// `POST /queue/change_mode`
pub async fn queue_change_mode(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChangeModeRequest>,
) -> Json<ApiResponse> {
    let result = station(&state)
        .change_mode(req.queue_number, req.new_mode)
        .map(|qn| json!({ "queue_number": qn }));
    respond("mode changed", result)
}

/// `POST /queue/cancel`
pub async fn queue_cancel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelRequest>,
) -> Json<ApiResponse> {
    let result = station(&state).cancel(req.queue_number);
    respond("request cancelled", result)
}

/// `GET /pile/status`
pub async fn pile_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let status = station(&state).pile_status();
    Json(ApiResponse::ok("pile status", status))
}

/// `POST /pile/modify_charging`
pub async fn modify_charging(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModifyChargingRequest>,
) -> Json<ApiResponse> {
    let result = station(&state)
        .modify_charging(req.queue_number, req.requested_amount, req.new_mode)
        .map(|qn| json!({ "queue_number": qn }));
    respond("request modified", result)
}

/// `POST /pile/disconnect`
pub async fn pile_disconnect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DisconnectRequest>,
) -> Json<ApiResponse> {
    let result = station(&state).disconnect(&req.pile_id);
    respond("session stopped", result)
}

/// `GET /bills`
pub async fn bills(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BillsQuery>,
) -> Json<ApiResponse> {
    let bills = station(&state).bills(query.username.as_deref());
    Json(ApiResponse::ok("bills", bills))
}

/// `POST /admin/pile/toggle`
pub async fn admin_pile_toggle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToggleRequest>,
) -> Json<ApiResponse> {
    let result = req
        .action
        .parse::<ToggleAction>()
        .and_then(|action| station(&state).toggle_pile(&req.pile_id, action));
    respond("pile toggled", result)
}

/// `GET /admin/pile/status`
pub async fn admin_pile_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let status = station(&state).admin_pile_status();
    Json(ApiResponse::ok("pile detail", status))
}

/// `GET /admin/queue/waiting`
pub async fn admin_queue_waiting(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let waiting = station(&state).waiting_requests();
    Json(ApiResponse::ok("waiting requests", waiting))
}

/// `GET /admin/reports`
pub async fn admin_reports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Json<ApiResponse> {
    let result = query
        .kind
        .parse::<ReportKind>()
        .map(|kind| station(&state).report(kind, query.start_date));
    respond("report", result)
}

/// `POST /admin/pile/fault`
pub async fn admin_pile_fault(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FaultRequest>,
) -> Json<ApiResponse> {
    let result = station(&state)
        .set_fault(&req.pile_id, req.schedule_strategy)
        .map(|bill| json!({ "interrupted_bill": bill }));
    respond("pile faulted", result)
}

/// `POST /admin/pile/repair`
pub async fn admin_pile_repair(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RepairRequest>,
) -> Json<ApiResponse> {
    let result = station(&state).repair(&req.pile_id);
    respond("pile repaired", result)
}

/// `POST /admin/time_speedup`
pub async fn admin_time_speedup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpeedupRequest>,
) -> Json<ApiResponse> {
    let result = station(&state).set_speedup(req.speedup);
    respond("speedup set", result)
}

/// `POST /admin/set_time`
pub async fn admin_set_time(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetTimeRequest>,
) -> Json<ApiResponse> {
    let result = station(&state).set_time(&req.time_str);
    respond("time set", result)
}

/// `GET /admin/get_time`
pub async fn admin_get_time(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    let engine = station(&state);
    Json(ApiResponse::ok(
        "current time",
        json!({
            "time": engine.get_time(),
            "speedup": engine.clock().speedup(),
        }),
    ))
}

/// `POST /admin/reset_time`
pub async fn admin_reset_time(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    station(&state).reset_time();
    Json(ApiResponse::ok("time reset", serde_json::Value::Null))
}
