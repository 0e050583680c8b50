//! End-to-end RPC scenarios against a real registry and store.

use serde_json::json;
use std::sync::Arc;
use thermal_mqtt::rpc::{parse_command, RpcHandler, RpcResponse, SpotIdPolicy};
use thermal_mqtt::thermal::{CoordinateSource, SpotRegistry, SpotStore};

async fn registry_at(path: &std::path::Path) -> Arc<SpotRegistry> {
    let store = SpotStore::new(path);
    Arc::new(SpotRegistry::load(Box::new(CoordinateSource::new()), store, false).await)
}

async fn call(handler: &RpcHandler, id: &str, method: &str, params: serde_json::Value) -> RpcResponse {
    let payload = json!({"method": method, "params": params}).to_string();
    handler.handle(parse_command(id, &payload)).await
}

#[tokio::test]
async fn full_spot_lifecycle_over_rpc() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spots.json");
    let registry = registry_at(&path).await;
    let handler = RpcHandler::new(registry.clone(), SpotIdPolicy::Restricted);

    // Create on an empty registry.
    let response = call(&handler, "1", "createSpotMeasurement", json!({"spotId": "1", "x": 160, "y": 120})).await;
    assert!(response.success, "create failed: {:?}", response.error_message);

    // List shows exactly that spot.
    let response = call(&handler, "2", "listSpotMeasurements", json!({})).await;
    let data = response.data.unwrap();
    assert_eq!(data["count"], 1);
    assert_eq!(data["spots"][0]["spotId"], "1");
    assert_eq!(data["spots"][0]["x"], 160);
    assert_eq!(data["spots"][0]["y"], 120);

    // Move relocates and survives a temperature query.
    let response = call(&handler, "3", "moveSpotMeasurement", json!({"spotId": "1", "x": 10, "y": 20})).await;
    assert!(response.success);
    assert_eq!(response.data.unwrap()["status"], "moved");

    let response = call(&handler, "4", "getSpotTemperature", json!({"spotId": "1"})).await;
    assert!(response.success);
    assert!(response.data.unwrap()["temperature"].is_number());

    // Delete removes it; the next query reports SPOT_NOT_FOUND.
    let response = call(&handler, "5", "deleteSpotMeasurement", json!({"spotId": "1"})).await;
    assert!(response.success);

    let response = call(&handler, "6", "getSpotTemperature", json!({"spotId": "1"})).await;
    assert!(!response.success);
    assert_eq!(response.error_code.as_deref(), Some("SPOT_NOT_FOUND"));
}

#[tokio::test]
async fn error_codes_for_rejected_commands() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_at(&dir.path().join("spots.json")).await;
    let handler = RpcHandler::new(registry.clone(), SpotIdPolicy::Restricted);

    // Unknown spot id domain.
    let response = call(&handler, "1", "createSpotMeasurement", json!({"spotId": "9", "x": 1, "y": 1})).await;
    assert_eq!(response.error_code.as_deref(), Some("INVALID_SPOT_ID"));

    // Out-of-bounds coordinates.
    let response = call(&handler, "2", "createSpotMeasurement", json!({"spotId": "1", "x": 320, "y": 0})).await;
    assert_eq!(response.error_code.as_deref(), Some("INVALID_COORDINATES"));

    // Missing parameters.
    let response = call(&handler, "3", "moveSpotMeasurement", json!({"spotId": "1"})).await;
    assert_eq!(response.error_code.as_deref(), Some("MISSING_PARAMETERS"));

    // Nothing above touched the registry.
    assert_eq!(registry.active_spot_count().await, 0);
}

#[tokio::test]
async fn registry_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spots.json");

    {
        let registry = registry_at(&path).await;
        let handler = RpcHandler::new(registry, SpotIdPolicy::Restricted);
        for (id, x, y) in [("1", 160, 120), ("2", 0, 0), ("3", 319, 239)] {
            let response =
                call(&handler, id, "createSpotMeasurement", json!({"spotId": id, "x": x, "y": y})).await;
            assert!(response.success);
        }
    }

    let registry = registry_at(&path).await;
    let spots = registry.list_spots().await;
    assert_eq!(spots.len(), 3);
    assert!(registry.spot_exists("1").await);
    assert!(registry.spot_exists("3").await);

    // Saving the reloaded set and loading again reproduces the same spots.
    registry.save().await;
    let reloaded = registry_at(&path).await;
    assert_eq!(reloaded.list_spots().await.len(), 3);
    for (a, b) in spots.iter().zip(reloaded.list_spots().await.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!((a.x, a.y), (b.x, b.y));
        assert_eq!(a.min_temp, b.min_temp);
        assert_eq!(a.max_temp, b.max_temp);
    }
}

#[tokio::test]
async fn capacity_bound_holds_across_mixed_operations() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_at(&dir.path().join("spots.json")).await;
    let handler = RpcHandler::new(registry.clone(), SpotIdPolicy::Restricted);

    for id in ["1", "2", "3", "4", "5"] {
        let response =
            call(&handler, id, "createSpotMeasurement", json!({"spotId": id, "x": 100, "y": 100})).await;
        assert!(response.success);
    }
    assert_eq!(registry.active_spot_count().await, 5);

    // Delete one and re-create it; the count never exceeds the bound.
    let response = call(&handler, "d", "deleteSpotMeasurement", json!({"spotId": "3"})).await;
    assert!(response.success);
    assert_eq!(registry.active_spot_count().await, 4);

    let response =
        call(&handler, "r", "createSpotMeasurement", json!({"spotId": "3", "x": 50, "y": 50})).await;
    assert!(response.success);
    assert_eq!(registry.active_spot_count().await, 5);
}
