//! HttpBackend against an in-process axum mock of the appliance API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use amp_proto::protocol::{AdjustVolumeBody, ApiStatus, SetVolumeBody};
use amp_remote::backend::{SettingsApi, VolumeApi};
use amp_remote::error::ApiError;
use amp_remote::http::HttpBackend;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
struct Mock {
    volume: i64,
    set_bodies: Vec<SetVolumeBody>,
    settings: Vec<(String, Value)>,
}

type Shared = Arc<Mutex<Mock>>;

async fn set_volume(State(mock): State<Shared>, Json(body): Json<SetVolumeBody>) -> Json<Value> {
    let mut mock = mock.lock().unwrap();
    mock.set_bodies.push(body.clone());
    // 13 is unlucky
    if body.volume == 13 {
        return Json(json!({"status": "error"}));
    }
    mock.volume = body.volume as i64;
    Json(json!({"status": "success", "volume": mock.volume}))
}

async fn adjust_volume(
    State(mock): State<Shared>,
    Json(body): Json<AdjustVolumeBody>,
) -> Json<Value> {
    let mut mock = mock.lock().unwrap();
    mock.volume = (mock.volume + body.delta as i64).clamp(0, 100);
    Json(json!({"status": "success", "volume": mock.volume}))
}

async fn get_volume(State(mock): State<Shared>) -> Json<Value> {
    let volume = mock.lock().unwrap().volume;
    Json(json!({"status": "success", "volume": volume}))
}

async fn update_settings(
    State(mock): State<Shared>,
    Path(group): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    mock.lock()
        .unwrap()
        .settings
        .push((group.clone(), payload.clone()));
    match group.as_str() {
        "broken" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "refuse" => Json(json!({"status": "error"})).into_response(),
        "garbled" => "definitely not json".into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({"status": "success"})).into_response()
        }
        _ => Json(json!({"status": "success", "config": payload})).into_response(),
    }
}

async fn serve() -> (String, Shared) {
    let mock: Shared = Arc::new(Mutex::new(Mock {
        volume: 20,
        ..Default::default()
    }));
    let app = Router::new()
        .route("/api/v1/volume", get(get_volume).post(set_volume))
        .route("/api/v1/volume/adjust", post(adjust_volume))
        .route("/api/v1/settings/:group", post(update_settings))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), mock)
}

fn backend(base: &str) -> HttpBackend {
    HttpBackend::new(base, Duration::from_millis(500)).unwrap()
}

#[tokio::test]
async fn test_volume_round_trip() {
    let (base, mock) = serve().await;
    let api = backend(&base);

    assert_eq!(api.get_volume().await.unwrap().volume, 20);

    let reply = api.set_volume(55, true).await.unwrap();
    assert_eq!(reply.status, ApiStatus::Success);
    assert_eq!(reply.volume, 55);
    assert_eq!(
        mock.lock().unwrap().set_bodies,
        vec![SetVolumeBody {
            volume: 55,
            show_bar: true
        }]
    );

    let reply = api.adjust_volume(60, false).await.unwrap();
    assert_eq!(reply.volume, 100);
    let reply = api.adjust_volume(-30, false).await.unwrap();
    assert_eq!(reply.volume, 70);
}

#[tokio::test]
async fn test_error_status_is_returned_not_raised() {
    let (base, _mock) = serve().await;
    let reply = backend(&base).set_volume(13, false).await.unwrap();
    assert_eq!(reply.status, ApiStatus::Error);
}

#[tokio::test]
async fn test_settings_are_posted_per_group() {
    let (base, mock) = serve().await;
    let api = backend(&base);

    let reply = api
        .update_setting("equalizer", json!({"bass": 4, "treble": -2}))
        .await
        .unwrap();
    assert_eq!(reply.status, ApiStatus::Success);
    assert_eq!(reply.config["treble"], json!(-2));
    assert_eq!(
        mock.lock().unwrap().settings,
        vec![("equalizer".to_string(), json!({"bass": 4, "treble": -2}))]
    );

    let reply = api.update_setting("refuse", json!({})).await.unwrap();
    assert_eq!(reply.status, ApiStatus::Error);
    assert!(reply.config.is_empty());
}

#[tokio::test]
async fn test_failures_map_to_api_errors() {
    let (base, _mock) = serve().await;
    let api = backend(&base);

    assert!(matches!(
        api.update_setting("broken", json!({})).await,
        Err(ApiError::Rejected { status: 500 })
    ));
    assert!(matches!(
        api.update_setting("garbled", json!({})).await,
        Err(ApiError::Decode(_))
    ));
    assert!(matches!(
        api.update_setting("slow", json!({})).await,
        Err(ApiError::Request(_))
    ));
}

#[tokio::test]
async fn test_unreachable_backend_is_a_request_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = backend(&format!("http://{}/", addr));
    assert!(matches!(api.get_volume().await, Err(ApiError::Request(_))));
}

#[test]
fn test_empty_base_url_is_unavailable() {
    assert!(matches!(
        HttpBackend::new("", Duration::from_secs(1)),
        Err(ApiError::Unavailable)
    ));
}
