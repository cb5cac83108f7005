mod test_utils;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use plc_gateway::api::rest::{create_api_routes, SharedAppState};
use plc_gateway::channel::ChannelManager;
use plc_gateway::drivers::simulated::SimulatedDriver;
use plc_gateway::tags::structures::{AccessRights, DataType, Tag, ValueVariant};
use plc_gateway::triggers::dispatcher::{TriggerDispatcher, TriggerMapping, TriggerPriority};
use plc_gateway::triggers::processor::{ProcessorRegistry, ResultWriter, StaticWorkstationResolver};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use test_utils::PlcFixture;
use tokio::time::Instant;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    driver: Arc<SimulatedDriver>,
}

async fn create_test_app() -> TestApp {
    let fixture = PlcFixture::new(
        "plc1",
        vec![
            Tag::new("Station1.Temperature", "plc1", "DB1.DBD0", DataType::Float32),
            Tag::new("Station1.Setpoint", "plc1", "DB1.DBW4", DataType::Int16),
            Tag::new("Station1.Serial", "plc1", "DB1.DBS6[20]", DataType::String)
                .with_access(AccessRights::Read),
        ],
    );
    fixture.driver.set_value("DB1.DBD0", ValueVariant::Float(23.5));
    fixture.channel.poll_once().await.expect("initial poll");

    let channels = Arc::new(ChannelManager::new(vec![Arc::clone(&fixture.channel)]));
    let dispatcher = TriggerDispatcher::new(
        vec![TriggerMapping::new(
            "EQ1",
            "Station1.Setpoint",
            Some("> 0".to_string()),
            TriggerPriority::Normal,
        )],
        Arc::new(StaticWorkstationResolver::default()),
        ProcessorRegistry::builder().build(),
        ResultWriter::new(channels.clone(), HashMap::new()),
        false,
    );

    let state = SharedAppState {
        tag_engine: fixture.engine.clone(),
        channels,
        dispatcher: Arc::new(dispatcher),
        start_time: Instant::now(),
    };
    TestApp {
        router: create_api_routes().with_state(state),
        driver: fixture.driver,
    }
}

async fn send(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;
    let request = Request::builder()
        .uri("/api/health")
        .method(Method::GET)
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let app = create_test_app().await;
    let (status, body) = send(app.router, Method::GET, "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tag_count"], 3);
    assert_eq!(body["driver_count"], 1);
    assert_eq!(body["connected_drivers"], 1);
    assert_eq!(body["trigger_count"], 1);
    assert_eq!(body["dispatched"], 0);
}

#[tokio::test]
async fn test_list_tags() {
    let app = create_test_app().await;
    let (status, body) = send(app.router, Method::GET, "/api/tags", None).await;
    assert_eq!(status, StatusCode::OK);
    let tags = body.as_array().expect("array of tags");
    assert_eq!(tags.len(), 3);
    assert_eq!(tags[0]["name"], "Station1.Serial");
    assert_eq!(tags[2]["name"], "Station1.Temperature");
    assert_eq!(tags[2]["value"], 23.5);
    assert_eq!(tags[2]["quality"], "Good");
}

#[tokio::test]
async fn test_get_single_tag() {
    let app = create_test_app().await;
    let (status, body) = send(
        app.router.clone(),
        Method::GET,
        "/api/tags/Station1.Temperature",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], "DB1.DBD0");
    assert_eq!(body["data_type"], "Float32");

    let (status, _) = send(app.router, Method::GET, "/api/tags/Nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_write_tag_through_channel() {
    let app = create_test_app().await;
    let (status, _) = send(
        app.router.clone(),
        Method::PUT,
        "/api/tags/Station1.Setpoint",
        Some(serde_json::json!({ "value": 42 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.driver.value("DB1.DBW4"), Some(ValueVariant::Int(42)));

    let (status, _) = send(
        app.router.clone(),
        Method::PUT,
        "/api/tags/Station1.Serial",
        Some(serde_json::json!({ "value": "SN-9" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app.router,
        Method::PUT,
        "/api/tags/Unknown",
        Some(serde_json::json!({ "value": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_devices_and_triggers() {
    let app = create_test_app().await;
    let (status, body) = send(app.router.clone(), Method::GET, "/api/devices", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "plc1");
    assert_eq!(body[0]["driver_type"], "simulated");
    assert_eq!(body[0]["connected"], true);
    assert_eq!(body[0]["tag_count"], 3);

    let (status, body) = send(app.router, Method::GET, "/api/triggers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["tag_name"], "Station1.Setpoint");
    assert_eq!(body[0]["equipment_code"], "EQ1");
    assert_eq!(body[0]["state"], "Idle");
    assert_eq!(body[0]["priority"], "normal");
}

#[tokio::test]
async fn test_unknown_route() {
    let app = create_test_app().await;
    let (status, _) = send(app.router, Method::GET, "/api/config", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
