use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, Instrument};
use crate::config::{AnnotationConfig, ServiceSettings};
use crate::processor::run_annotation;
use crate::video_intelligence::{GoogleVideoAnnotatorProvider, VideoAnnotatorProvider};

/// 健康检查返回的文本
pub const HEALTH_MESSAGE: &str = "Video annotation service is running";

/// 服务共享状态（只读）
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<ServiceSettings>,
    pub config: Arc<AnnotationConfig>,
    pub provider: Arc<dyn VideoAnnotatorProvider>,
}

impl AppState {
    pub fn new(
        settings: ServiceSettings,
        config: AnnotationConfig,
        provider: Arc<dyn VideoAnnotatorProvider>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            config: Arc::new(config),
            provider,
        }
    }

    /// 使用 Google Video Intelligence 的默认状态
    pub fn google(settings: ServiceSettings, config: AnnotationConfig) -> Self {
        let provider = Arc::new(GoogleVideoAnnotatorProvider::new(settings.endpoint.clone()));
        Self::new(settings, config, provider)
    }
}

/// `POST /analyze` 请求体
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub filename: Option<String>,
}

/// `POST /analyze` 成功响应
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub message: String,
    pub input_uri: String,
    pub output_uri: String,
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, ResponseJson<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        ResponseJson(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/analyze", post(handle_analyze))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查 Handler
pub async fn health_check() -> &'static str {
    HEALTH_MESSAGE
}

/// 对 bucket 中的视频发起标注并等待完成
///
/// 标注在独立任务中运行；客户端断开时本 handler 被 drop，
/// drop guard 触发取消，后台任务随即停止等待并请求取消远程操作。
/// 请求体无法解析时同样返回 JSON 格式的 400。
pub async fn handle_analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<ResponseJson<AnalyzeResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        info!("请求体无法解析: {}", rejection.body_text());
        api_error(StatusCode::BAD_REQUEST, rejection.body_text())
    })?;

    let filename = match request.filename.filter(|f| !f.trim().is_empty()) {
        Some(filename) => filename,
        None => return Err(api_error(StatusCode::BAD_REQUEST, "Missing filename")),
    };

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("analyze", %request_id, %filename);
    info!(parent: &span, "收到标注请求");

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let task = tokio::spawn(
        async move {
            run_annotation(
                state.provider.as_ref(),
                &state.settings,
                &filename,
                &state.config,
                cancel,
            )
            .await
        }
        .instrument(span.clone()),
    );

    let result = task.await;
    guard.disarm();

    match result {
        Ok(Ok(output)) => {
            info!(parent: &span, "标注完成: {}", output.output_uri);
            Ok(ResponseJson(AnalyzeResponse {
                message: "Video annotation complete".to_string(),
                input_uri: output.input_uri,
                output_uri: output.output_uri,
            }))
        }
        Ok(Err(e)) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))),
        Err(e) => {
            error!(parent: &span, "标注任务异常退出: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("标注任务异常退出: {}", e),
            ))
        }
    }
}
