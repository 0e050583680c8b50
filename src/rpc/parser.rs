//! Parsing and validation of inbound RPC payloads.
//!
//! Parsing never panics and never drops a command silently: a malformed
//! payload yields a command in `Error` status carrying the rejection, so the
//! handler can still answer the broker on the correlated response topic.

use super::types::{
    error_codes, RpcCommand, RpcError, RpcMethod, RpcStatus, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS,
};
use crate::thermal::{IMAGE_HEIGHT, IMAGE_WIDTH};
use serde_json::Value;
use tracing::{debug, error};

/// Which spot identifiers the device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpotIdPolicy {
    /// Production behavior: only the literal identifiers `"1"`..`"5"`.
    #[default]
    Restricted,
    /// Test/alternate behavior: any positive integer identifier.
    Relaxed,
}

impl SpotIdPolicy {
    pub fn accepts(&self, spot_id: &str) -> bool {
        match self {
            SpotIdPolicy::Restricted => matches!(spot_id, "1" | "2" | "3" | "4" | "5"),
            SpotIdPolicy::Relaxed => spot_id.parse::<i32>().map(|id| id > 0).unwrap_or(false),
        }
    }
}

/// Parses a raw payload into a typed command.
///
/// Malformed JSON, a missing or non-string `method`, and an unrecognized
/// method name all produce a command in `Error` status that must not be
/// dispatched. An optional integer `timeout` field overrides the default
/// deadline.
pub fn parse_command(request_id: &str, payload: &str) -> RpcCommand {
    let mut command = RpcCommand::new(request_id);

    let json: Value = match serde_json::from_str(payload) {
        Ok(json) => json,
        Err(e) => {
            error!("Invalid JSON in RPC command: {}", e);
            return reject(command, error_codes::INVALID_JSON, "Invalid JSON payload");
        }
    };

    let method = match json.get("method").and_then(Value::as_str) {
        Some(method) => method,
        None => {
            error!("Missing or invalid 'method' field in RPC command");
            return reject(
                command,
                error_codes::INVALID_JSON,
                "Missing or invalid 'method' field",
            );
        }
    };

    command.method = RpcMethod::parse(method);
    if command.method == RpcMethod::Unknown {
        error!("Unknown RPC method: {}", method);
        return reject(
            command,
            error_codes::UNKNOWN_METHOD,
            format!("Unsupported RPC method: {method}"),
        );
    }

    if let Some(Value::Object(params)) = json.get("params") {
        command.params = params.clone();
    }

    if let Some(timeout) = json.get("timeout").and_then(Value::as_u64) {
        command.timeout_ms = timeout;
    }

    debug!(
        "Parsed RPC command: method={}, requestId={}",
        command.method.as_str(),
        command.request_id
    );
    command
}

/// Checks the per-method parameter contract of a parsed command.
pub fn validate_command(command: &RpcCommand, policy: SpotIdPolicy) -> Result<(), RpcError> {
    if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&command.timeout_ms) {
        return Err(RpcError {
            code: error_codes::INVALID_JSON,
            message: format!(
                "Invalid timeout value: must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS} milliseconds"
            ),
        });
    }

    // Only creation gates the id domain; operations on existing spots let an
    // out-of-domain id fall through to the registry's not-found answer.
    match command.method {
        RpcMethod::CreateSpotMeasurement => {
            validate_spot_id_param(command, policy)?;
            validate_coordinate_params(command)
        }
        RpcMethod::MoveSpotMeasurement => {
            require_spot_id_param(command)?;
            validate_coordinate_params(command)
        }
        RpcMethod::DeleteSpotMeasurement | RpcMethod::GetSpotTemperature => {
            require_spot_id_param(command).map(|_| ())
        }
        RpcMethod::ListSpotMeasurements => Ok(()),
        RpcMethod::Unknown => Err(RpcError {
            code: error_codes::UNKNOWN_METHOD,
            message: "Unknown RPC method".to_string(),
        }),
    }
}

fn require_spot_id_param(command: &RpcCommand) -> Result<&str, RpcError> {
    command
        .params
        .get("spotId")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError {
            code: error_codes::MISSING_PARAMETERS,
            message: "Missing or invalid 'spotId' parameter".to_string(),
        })
}

fn validate_spot_id_param(command: &RpcCommand, policy: SpotIdPolicy) -> Result<(), RpcError> {
    let spot_id = require_spot_id_param(command)?;

    if !policy.accepts(spot_id) {
        let message = match policy {
            SpotIdPolicy::Restricted => "Invalid spotId: must be '1', '2', '3', '4', or '5'",
            SpotIdPolicy::Relaxed => "Invalid spotId: must be a positive integer",
        };
        return Err(RpcError {
            code: error_codes::INVALID_SPOT_ID,
            message: message.to_string(),
        });
    }

    Ok(())
}

fn validate_coordinate_params(command: &RpcCommand) -> Result<(), RpcError> {
    let x = extract_coordinate(command, "x")?;
    let y = extract_coordinate(command, "y")?;

    if !(0..IMAGE_WIDTH as i64).contains(&x) || !(0..IMAGE_HEIGHT as i64).contains(&y) {
        return Err(RpcError {
            code: error_codes::INVALID_COORDINATES,
            message: format!(
                "Invalid coordinates: x must be 0-{}, y must be 0-{}",
                IMAGE_WIDTH - 1,
                IMAGE_HEIGHT - 1
            ),
        });
    }

    Ok(())
}

fn extract_coordinate(command: &RpcCommand, key: &str) -> Result<i64, RpcError> {
    command
        .params
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| RpcError {
            code: error_codes::MISSING_PARAMETERS,
            message: format!("Missing or invalid '{key}' coordinate parameter"),
        })
}

fn reject(mut command: RpcCommand, code: &'static str, message: impl Into<String>) -> RpcCommand {
    command.status = RpcStatus::Error;
    command.parse_error = Some(RpcError {
        code,
        message: message.into(),
    });
    command
}
