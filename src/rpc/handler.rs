//! Dispatch of validated RPC commands into the spot registry.
//!
//! Every accepted command produces exactly one response. Method invariants
//! are checked before any mutation, so a rejected command leaves the registry
//! untouched. Commands that sat in delivery longer than their deadline are
//! answered with `TIMEOUT` instead of being dispatched.

use super::parser::{self, SpotIdPolicy};
use super::types::{error_codes, RpcCommand, RpcMethod, RpcResponse, RpcStatus};
use crate::thermal::{RegistryError, SpotRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RpcHandler {
    registry: Arc<SpotRegistry>,
    policy: SpotIdPolicy,
}

impl RpcHandler {
    pub fn new(registry: Arc<SpotRegistry>, policy: SpotIdPolicy) -> Self {
        RpcHandler { registry, policy }
    }

    /// Processes one command to completion and returns its response.
    pub async fn handle(&self, mut command: RpcCommand) -> RpcResponse {
        if let Some(rejection) = command.parse_error.take() {
            return RpcResponse::error(
                command.request_id.clone(),
                rejection.code,
                rejection.message,
                command.processing_duration_ms(),
            );
        }

        if let Err(rejection) = parser::validate_command(&command, self.policy) {
            command.status = RpcStatus::Error;
            return RpcResponse::error(
                command.request_id.clone(),
                rejection.code,
                rejection.message,
                command.processing_duration_ms(),
            );
        }

        if command.is_timed_out() {
            warn!(
                "RPC command {} timed out before dispatch ({}ms budget)",
                command.request_id, command.timeout_ms
            );
            command.status = RpcStatus::Timeout;
            return RpcResponse::error(
                command.request_id.clone(),
                error_codes::TIMEOUT,
                "Command exceeded its deadline before processing",
                command.processing_duration_ms(),
            );
        }

        command.status = RpcStatus::Processing;
        debug!(
            "Dispatching RPC command: method={}, requestId={}",
            command.method.as_str(),
            command.request_id
        );

        let result = match command.method {
            RpcMethod::CreateSpotMeasurement => self.create_spot(&command).await,
            RpcMethod::MoveSpotMeasurement => self.move_spot(&command).await,
            RpcMethod::DeleteSpotMeasurement => self.delete_spot(&command).await,
            RpcMethod::ListSpotMeasurements => self.list_spots().await,
            RpcMethod::GetSpotTemperature => self.spot_temperature(&command).await,
            // Parse already rejected unknowns, this arm is unreachable in practice.
            RpcMethod::Unknown => Err((
                error_codes::UNKNOWN_METHOD,
                "Unknown RPC method".to_string(),
            )),
        };

        let duration = command.processing_duration_ms();
        match result {
            Ok(data) => {
                command.status = RpcStatus::Completed;
                RpcResponse::success(command.request_id.clone(), data, duration)
            }
            Err((code, message)) => {
                command.status = RpcStatus::Error;
                RpcResponse::error(command.request_id.clone(), code, message, duration)
            }
        }
    }

    async fn create_spot(&self, command: &RpcCommand) -> DispatchResult {
        let (spot_id, x, y) = spot_coordinates(command);
        info!("Creating thermal spot: ID={} at position ({}, {})", spot_id, x, y);

        let spot = self
            .registry
            .create_spot(spot_id, x, y)
            .await
            .map_err(registry_error)?;

        let spot_id = spot.id.to_string();
        let temperature = self.registry.spot_temperature(&spot_id).await;

        let mut data = json!({
            "spotId": spot_id,
            "x": x,
            "y": y,
            "status": "created",
        });
        if !temperature.is_nan() {
            data["temperature"] = json!(temperature);
        }

        Ok(data)
    }

    async fn move_spot(&self, command: &RpcCommand) -> DispatchResult {
        let (spot_id, x, y) = spot_coordinates(command);

        self.registry
            .move_spot(spot_id, x, y)
            .await
            .map_err(registry_error)?;

        Ok(json!({
            "spotId": spot_id,
            "x": x,
            "y": y,
            "status": "moved",
        }))
    }

    async fn delete_spot(&self, command: &RpcCommand) -> DispatchResult {
        let spot_id = spot_id_param(command);

        self.registry
            .delete_spot(spot_id)
            .await
            .map_err(registry_error)?;

        Ok(json!({ "spotId": spot_id, "status": "deleted" }))
    }

    async fn list_spots(&self) -> DispatchResult {
        let spots = self.registry.list_spots().await;
        debug!("Found {} active thermal measurement spots", spots.len());

        let mut entries = Vec::with_capacity(spots.len());
        for spot in &spots {
            let spot_id = spot.id.to_string();
            let mut entry = json!({
                "spotId": spot_id,
                "x": spot.x,
                "y": spot.y,
            });

            let temperature = self.registry.spot_temperature(&spot_id).await;
            if !temperature.is_nan() {
                entry["temperature"] = json!(temperature);
            }
            if let Some(created_at) = &spot.created_at {
                entry["createdAt"] = json!(created_at);
            }
            if let Some(last_reading) = &spot.last_reading {
                entry["lastReadingAt"] = json!(last_reading);
            }

            entries.push(entry);
        }

        Ok(json!({ "spots": entries, "count": spots.len() }))
    }

    async fn spot_temperature(&self, command: &RpcCommand) -> DispatchResult {
        let spot_id = spot_id_param(command);

        if !self.registry.spot_exists(spot_id).await {
            return Err((
                error_codes::SPOT_NOT_FOUND,
                format!("Spot with ID '{spot_id}' not found"),
            ));
        }

        let temperature = self.registry.spot_temperature(spot_id).await;
        if temperature.is_nan() {
            return Err((
                error_codes::INTERNAL_ERROR,
                "Failed to get temperature reading".to_string(),
            ));
        }

        Ok(json!({
            "spotId": spot_id,
            "temperature": temperature,
            "timestamp": chrono::Utc::now().timestamp_millis().to_string(),
        }))
    }
}

type DispatchResult = Result<Value, (&'static str, String)>;

/// Parameter access after validation; validation guarantees presence.
fn spot_id_param(command: &RpcCommand) -> &str {
    command
        .params
        .get("spotId")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn spot_coordinates(command: &RpcCommand) -> (&str, i32, i32) {
    let x = command.params.get("x").and_then(Value::as_i64).unwrap_or(0) as i32;
    let y = command.params.get("y").and_then(Value::as_i64).unwrap_or(0) as i32;
    (spot_id_param(command), x, y)
}

fn registry_error(error: RegistryError) -> (&'static str, String) {
    let code = match &error {
        RegistryError::InvalidSpotId(_) => error_codes::INVALID_SPOT_ID,
        RegistryError::AlreadyExists(_) => error_codes::SPOT_ALREADY_EXISTS,
        RegistryError::NotFound(_) => error_codes::SPOT_NOT_FOUND,
        RegistryError::InvalidCoordinates(_, _) => error_codes::INVALID_COORDINATES,
        RegistryError::CapacityReached => error_codes::MAX_SPOTS_REACHED,
        RegistryError::Validation(_) => error_codes::INTERNAL_ERROR,
    };
    (code, error.to_string())
}
