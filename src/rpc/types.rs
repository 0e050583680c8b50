//! RPC command and response types for the ThingsBoard server-side RPC flow.

use serde_json::{json, Map, Value};
use std::time::Instant;

/// Error code vocabulary surfaced in RPC error responses.
pub mod error_codes {
    pub const SPOT_ALREADY_EXISTS: &str = "SPOT_ALREADY_EXISTS";
    pub const SPOT_NOT_FOUND: &str = "SPOT_NOT_FOUND";
    pub const INVALID_COORDINATES: &str = "INVALID_COORDINATES";
    pub const MAX_SPOTS_REACHED: &str = "MAX_SPOTS_REACHED";
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const INVALID_JSON: &str = "INVALID_JSON";
    pub const MISSING_PARAMETERS: &str = "MISSING_PARAMETERS";
    pub const CAMERA_BUSY: &str = "CAMERA_BUSY";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INVALID_SPOT_ID: &str = "INVALID_SPOT_ID";
}

/// Default command deadline in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
/// Smallest accepted command timeout.
pub const MIN_TIMEOUT_MS: u64 = 1000;
/// Largest accepted command timeout.
pub const MAX_TIMEOUT_MS: u64 = 30000;

/// The supported remote methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    CreateSpotMeasurement,
    MoveSpotMeasurement,
    DeleteSpotMeasurement,
    ListSpotMeasurements,
    GetSpotTemperature,
    Unknown,
}

impl RpcMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "createSpotMeasurement" => RpcMethod::CreateSpotMeasurement,
            "moveSpotMeasurement" => RpcMethod::MoveSpotMeasurement,
            "deleteSpotMeasurement" => RpcMethod::DeleteSpotMeasurement,
            "listSpotMeasurements" => RpcMethod::ListSpotMeasurements,
            "getSpotTemperature" => RpcMethod::GetSpotTemperature,
            _ => RpcMethod::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::CreateSpotMeasurement => "createSpotMeasurement",
            RpcMethod::MoveSpotMeasurement => "moveSpotMeasurement",
            RpcMethod::DeleteSpotMeasurement => "deleteSpotMeasurement",
            RpcMethod::ListSpotMeasurements => "listSpotMeasurements",
            RpcMethod::GetSpotTemperature => "getSpotTemperature",
            RpcMethod::Unknown => "unknown",
        }
    }
}

/// Processing status of an inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RpcStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
    Timeout,
}

/// A parse-stage rejection carried inside the command.
///
/// Commands that fail parsing are never dispatched; the handler turns this
/// into the error response instead.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
}

/// A correlated, typed RPC command extracted from an inbound payload.
#[derive(Debug)]
pub struct RpcCommand {
    /// Correlation id taken from the request topic suffix.
    pub request_id: String,
    pub method: RpcMethod,
    pub params: Map<String, Value>,
    pub received_at: Instant,
    pub timeout_ms: u64,
    pub status: RpcStatus,
    pub parse_error: Option<RpcError>,
}

impl RpcCommand {
    pub fn new(request_id: impl Into<String>) -> Self {
        RpcCommand {
            request_id: request_id.into(),
            method: RpcMethod::Unknown,
            params: Map::new(),
            received_at: Instant::now(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            status: RpcStatus::Pending,
            parse_error: None,
        }
    }

    /// Whether a still-pending command has outlived its soft deadline.
    pub fn is_timed_out(&self) -> bool {
        match self.status {
            RpcStatus::Completed | RpcStatus::Error | RpcStatus::Timeout => false,
            RpcStatus::Pending | RpcStatus::Processing => {
                self.received_at.elapsed().as_millis() as u64 > self.timeout_ms
            }
        }
    }

    /// Milliseconds elapsed since the command was received.
    pub fn processing_duration_ms(&self) -> u64 {
        self.received_at.elapsed().as_millis() as u64
    }
}

/// Response envelope matched to the originating command by request id.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    pub request_id: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub response_time_ms: u64,
}

impl RpcResponse {
    pub fn success(request_id: impl Into<String>, data: Value, response_time_ms: u64) -> Self {
        RpcResponse {
            request_id: request_id.into(),
            success: true,
            data: Some(data),
            error_code: None,
            error_message: None,
            response_time_ms,
        }
    }

    pub fn error(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        response_time_ms: u64,
    ) -> Self {
        RpcResponse {
            request_id: request_id.into(),
            success: false,
            data: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            response_time_ms,
        }
    }

    /// Wire encoding: `{"result": data}` on success, otherwise
    /// `{"error": {"code", "message"}}`.
    pub fn to_json(&self) -> Value {
        if self.success {
            json!({ "result": self.data.clone().unwrap_or(Value::Null) })
        } else {
            json!({
                "error": {
                    "code": self.error_code.clone().unwrap_or_default(),
                    "message": self.error_message.clone().unwrap_or_default(),
                }
            })
        }
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}
