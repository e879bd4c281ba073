//! Video Intelligence REST client against a local mock of the Google endpoints

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Json;
use axum::Router;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use video_annotate::{
    processor::build_request, run_annotation, AnnotationConfig, Feature,
    GoogleVideoAnnotatorProvider, ServiceSettings, VideoAnnotator, VideoIntelligenceClient,
};

const PRIVATE_KEY: &str = include_str!("fixtures/test-service-account-key.pem");
const PUBLIC_KEY: &str = include_str!("fixtures/test-service-account-key.pub.pem");
const CLIENT_EMAIL: &str = "annotator@test-project.iam.gserviceaccount.com";
const OPERATION: &str = "projects/test-project/locations/us-east1/operations/99";

#[derive(Debug, Deserialize)]
struct Claims {
    iss: String,
    scope: String,
}

#[derive(Default)]
struct Recorded {
    token_requests: usize,
    polls: usize,
    cancels: usize,
    annotate_body: Option<Value>,
    unauthorized: usize,
}

#[derive(Clone)]
struct MockState {
    token_uri: Arc<Mutex<String>>,
    recorded: Arc<Mutex<Recorded>>,
}

async fn mock_google(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();

    if method == Method::POST && path == "/token" {
        let assertion = body
            .split('&')
            .find_map(|pair| pair.strip_prefix("assertion="))
            .unwrap_or_default();
        assert!(body.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"));

        let token_uri = state.token_uri.lock().unwrap().clone();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[token_uri]);
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        let claims = jsonwebtoken::decode::<Claims>(assertion, &key, &validation)
            .unwrap()
            .claims;
        assert_eq!(claims.iss, CLIENT_EMAIL);
        assert_eq!(claims.scope, "https://www.googleapis.com/auth/cloud-platform");

        state.recorded.lock().unwrap().token_requests += 1;
        return (
            StatusCode::OK,
            Json(json!({ "access_token": "mock-token", "expires_in": 3600, "token_type": "Bearer" })),
        );
    }

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer mock-token");
    if !authorized {
        state.recorded.lock().unwrap().unauthorized += 1;
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "code": 401, "message": "missing credentials" } })),
        );
    }

    let operation_path = format!("/v1/{}", OPERATION);
    let mut recorded = state.recorded.lock().unwrap();
    match path.as_str() {
        "/v1/videos:annotate" if method == Method::POST => {
            recorded.annotate_body = serde_json::from_str(&body).ok();
            (StatusCode::OK, Json(json!({ "name": OPERATION })))
        }
        p if method == Method::GET && p == operation_path => {
            recorded.polls += 1;
            let done = recorded.polls >= 2;
            (StatusCode::OK, Json(json!({ "name": OPERATION, "done": done })))
        }
        p if method == Method::POST && p == format!("{}:cancel", operation_path) => {
            recorded.cancels += 1;
            (StatusCode::OK, Json(json!({})))
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "code": 404, "message": "no such resource" } })),
        ),
    }
}

/// 启动 mock 服务，返回 (地址, 状态)
async fn start_mock() -> (String, MockState) {
    let state = MockState {
        token_uri: Arc::new(Mutex::new(String::new())),
        recorded: Arc::new(Mutex::new(Recorded::default())),
    };
    let app = Router::new().fallback(mock_google).with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    *state.token_uri.lock().unwrap() = format!("{}/token", base);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base, state)
}

fn service_account_json(base: &str) -> Value {
    json!({
        "type": "service_account",
        "project_id": "test-project",
        "private_key_id": "test-key-1",
        "private_key": PRIVATE_KEY,
        "client_email": CLIENT_EMAIL,
        "token_uri": format!("{}/token", base),
    })
}

fn write_key_file(base: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), service_account_json(base).to_string()).unwrap();
    file
}

#[tokio::test]
async fn submits_and_polls_with_cached_token() {
    let (base, state) = start_mock().await;
    let key_file = write_key_file(&base);
    let client = VideoIntelligenceClient::from_service_account_file(key_file.path(), &base).unwrap();

    let request = build_request("media-bucket", "clip.mp4", &AnnotationConfig::default(), 1_700_000_000);
    let operation = client.annotate_video(&request).await.unwrap();
    assert_eq!(operation.name, OPERATION);
    assert!(!operation.done);

    let first = client.get_operation(&operation.name).await.unwrap();
    let second = client.get_operation(&operation.name).await.unwrap();
    assert!(!first.done);
    assert!(second.done);

    let recorded = state.recorded.lock().unwrap();
    assert_eq!(recorded.token_requests, 1);
    assert_eq!(recorded.unauthorized, 0);

    let body = recorded.annotate_body.clone().unwrap();
    assert_eq!(body["inputUri"], "gs://media-bucket/clip.mp4");
    assert_eq!(body["outputUri"], "gs://media-bucket/output-1700000000.json");
    assert_eq!(body["features"].as_array().unwrap().len(), Feature::ALL.len());
    assert_eq!(
        body["videoContext"]["speechTranscriptionConfig"]["languageCode"],
        "en-US"
    );
    assert_eq!(
        body["videoContext"]["personDetectionConfig"]["includePoseLandmarks"],
        true
    );
}

#[tokio::test]
async fn http_errors_carry_status_and_body() {
    let (base, _state) = start_mock().await;
    let key_file = write_key_file(&base);
    let client = VideoIntelligenceClient::from_service_account_file(key_file.path(), &base).unwrap();

    let err = client
        .get_operation("projects/test-project/locations/us-east1/operations/missing")
        .await
        .unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("404"));
    assert!(message.contains("no such resource"));
}

#[tokio::test]
async fn cancel_reaches_remote() {
    let (base, state) = start_mock().await;
    let key_file = write_key_file(&base);
    let client = VideoIntelligenceClient::from_service_account_file(key_file.path(), &base).unwrap();

    client.cancel_operation(OPERATION).await.unwrap();
    assert_eq!(state.recorded.lock().unwrap().cancels, 1);
}

#[tokio::test]
async fn full_flow_against_mock_service() {
    let (base, state) = start_mock().await;
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(service_account_json(&base).to_string());
    let settings = ServiceSettings {
        key_base64: Some(encoded),
        bucket: Some("media-bucket".to_string()),
        endpoint: base.clone(),
    };
    let config = AnnotationConfig {
        poll_interval_secs: 1,
        ..AnnotationConfig::default()
    };
    let provider = GoogleVideoAnnotatorProvider::new(base);

    let output = run_annotation(&provider, &settings, "clip.mp4", &config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.input_uri, "gs://media-bucket/clip.mp4");
    assert!(output.output_uri.starts_with("gs://media-bucket/output-"));
    assert_eq!(output.operation_name, OPERATION);
    assert_eq!(state.recorded.lock().unwrap().polls, 2);
}
