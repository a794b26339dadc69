//! JSON envelope and per-endpoint request payload types.
//!
//! Every response is shaped `{status, msg, data}`; request bodies are
//! fixed typed payloads validated at the boundary before anything reaches
//! the engine. Unknown extra fields from older clients are ignored.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::station::strategy::StrategyKind;
use crate::station::types::{Mode, QueueNumber, StationError};

/// Uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: bool,
    pub msg: String,
    pub data: Value,
}

impl ApiResponse {
    /// Success envelope with serialized payload.
    pub fn ok(msg: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            status: true,
            msg: msg.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    /// Failure envelope; the error's display text becomes `msg`.
    pub fn fail(err: &StationError) -> Self {
        Self {
            status: false,
            msg: err.to_string(),
            data: Value::Null,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub username: String,
    pub mode: Mode,
    pub requested_amount: f64,
    pub priority: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LeaveRequest {
    pub queue_number: QueueNumber,
}

#[derive(Debug, Deserialize)]
pub struct ChangeModeRequest {
    pub queue_number: QueueNumber,
    pub new_mode: Mode,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub queue_number: QueueNumber,
}

#[derive(Debug, Deserialize)]
pub struct ModifyChargingRequest {
    pub queue_number: QueueNumber,
    pub requested_amount: Option<f64>,
    pub new_mode: Option<Mode>,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    pub pile_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub pile_id: String,
    /// `"start"` or `"stop"`; parsed at the handler so bad input becomes a
    /// validation failure instead of a rejected body.
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct FaultRequest {
    pub pile_id: String,
    pub schedule_strategy: StrategyKind,
}

#[derive(Debug, Deserialize)]
pub struct RepairRequest {
    pub pile_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SpeedupRequest {
    pub speedup: f64,
}

#[derive(Debug, Deserialize)]
pub struct SetTimeRequest {
    pub time_str: String,
}

#[derive(Debug, Deserialize)]
pub struct BillsQuery {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// `"day"`, `"week"`, or `"month"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub start_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_serializes_payload() {
        let resp = ApiResponse::ok("done", serde_json::json!({"n": 1}));
        assert!(resp.status);
        assert_eq!(resp.data["n"], 1);
    }

    #[test]
    fn fail_envelope_carries_error_text() {
        let err = StationError::NotFound("pile Z".into());
        let resp = ApiResponse::fail(&err);
        assert!(!resp.status);
        assert_eq!(resp.msg, "pile Z not found");
        assert_eq!(resp.data, Value::Null);
    }

    #[test]
    fn join_request_ignores_extra_client_fields() {
        let body = r#"{"username":"alice","mode":"fast","requested_amount":30.0,"carId":"V-001"}"#;
        let req: JoinRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.username, "alice");
        assert_eq!(req.mode, Mode::Fast);
        assert!(req.priority.is_none());
    }

    #[test]
    fn report_query_parses_type_and_date() {
        let q: ReportQuery =
            serde_json::from_str(r#"{"type":"week","start_date":"2024-05-20"}"#).unwrap();
        assert_eq!(q.kind, "week");
        assert_eq!(
            q.start_date,
            NaiveDate::from_ymd_opt(2024, 5, 20)
        );
    }
}
