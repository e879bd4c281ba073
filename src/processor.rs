use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use crate::annotation::{AnnotateVideoRequest, Operation};
use crate::config::{AnnotationConfig, ServiceSettings};
use crate::credentials::CredentialFile;
use crate::video_intelligence::{VideoAnnotator, VideoAnnotatorProvider};

/// 脚本模式默认处理的文件
pub const DEFAULT_INPUT_FILENAME: &str = "YOURVIDEO.mp4";

/// 单次标注流程所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationStage {
    Idle,
    CredentialsLoaded,
    RequestSubmitted,
    Completed,
    Failed,
}

impl fmt::Display for AnnotationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnnotationStage::Idle => "idle",
            AnnotationStage::CredentialsLoaded => "credentials_loaded",
            AnnotationStage::RequestSubmitted => "request_submitted",
            AnnotationStage::Completed => "completed",
            AnnotationStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl AnnotationStage {
    /// 流程结束后的终态
    pub fn terminal<T>(result: &Result<T>) -> Self {
        if result.is_ok() {
            AnnotationStage::Completed
        } else {
            AnnotationStage::Failed
        }
    }
}

/// 标注结果：远程服务已把结果 JSON 写到 output_uri
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationOutput {
    pub input_uri: String,
    pub output_uri: String,
    pub operation_name: String,
}

/// 输入视频地址
pub fn input_uri(bucket: &str, filename: &str) -> String {
    format!("gs://{}/{}", bucket, filename)
}

/// 结果文件地址，timestamp 为 Unix 秒
///
/// 同一 bucket 在同一秒内的两次请求会得到相同的地址。
pub fn output_uri(bucket: &str, timestamp: i64) -> String {
    format!("gs://{}/output-{}.json", bucket, timestamp)
}

/// 构建标注请求
pub fn build_request(
    bucket: &str,
    filename: &str,
    config: &AnnotationConfig,
    timestamp: i64,
) -> AnnotateVideoRequest {
    AnnotateVideoRequest {
        input_uri: input_uri(bucket, filename),
        output_uri: output_uri(bucket, timestamp),
        features: config.features.clone(),
        video_context: config.video_context(),
        location_id: config.location_id.clone(),
    }
}

enum WaitOutcome {
    Finished(Result<Operation>),
    TimedOut,
    Cancelled,
}

/// 等待远程操作结束
///
/// 每隔 poll_interval 查询一次；超过 timeout 返回超时错误（不取消远程操作）；
/// cancel 触发时立即停止等待，并尽力请求远程取消。
pub async fn wait_for_operation(
    annotator: &dyn VideoAnnotator,
    operation: Operation,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Operation> {
    let name = operation.name.clone();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
        result = tokio::time::timeout(timeout, poll_until_done(annotator, operation, poll_interval)) => {
            match result {
                Ok(finished) => WaitOutcome::Finished(finished),
                Err(_) => WaitOutcome::TimedOut,
            }
        }
    };

    match outcome {
        WaitOutcome::Finished(result) => result,
        WaitOutcome::TimedOut => {
            anyhow::bail!("等待远程操作超时（{} 秒）: {}", timeout.as_secs(), name)
        }
        WaitOutcome::Cancelled => {
            warn!("⚠️  [视频标注] 等待已取消，正在请求取消远程操作: {}", name);
            if let Err(e) = annotator.cancel_operation(&name).await {
                warn!("⚠️  [视频标注] 取消远程操作失败: {:#}", e);
            }
            anyhow::bail!("标注已取消: {}", name)
        }
    }
}

async fn poll_until_done(
    annotator: &dyn VideoAnnotator,
    mut operation: Operation,
    poll_interval: Duration,
) -> Result<Operation> {
    loop {
        if operation.done {
            if let Some(err) = &operation.error {
                anyhow::bail!("远程操作失败 (code {}): {}", err.code, err.message);
            }
            return Ok(operation);
        }
        tokio::time::sleep(poll_interval).await;
        operation = annotator
            .get_operation(&operation.name)
            .await
            .context("查询远程操作失败")?;
    }
}

/// 提交请求并等待完成
pub async fn submit_and_wait(
    annotator: &dyn VideoAnnotator,
    request: AnnotateVideoRequest,
    config: &AnnotationConfig,
    cancel: &CancellationToken,
) -> Result<AnnotationOutput> {
    let operation = tokio::select! {
        biased;
        _ = cancel.cancelled() => anyhow::bail!("标注已取消: 请求尚未提交完成"),
        submitted = annotator.annotate_video(&request) => submitted?,
    };

    info!("⏳ [视频标注] 远程操作已创建: {}", operation.name);

    let finished = wait_for_operation(
        annotator,
        operation,
        config.timeout(),
        config.poll_interval(),
        cancel,
    )
    .await?;

    Ok(AnnotationOutput {
        input_uri: request.input_uri,
        output_uri: request.output_uri,
        operation_name: finished.name,
    })
}

/// 完整的标注流程：加载凭证 → 构建请求 → 提交 → 等待 → 返回结果地址
pub async fn run_annotation(
    provider: &dyn VideoAnnotatorProvider,
    settings: &ServiceSettings,
    filename: &str,
    config: &AnnotationConfig,
    cancel: CancellationToken,
) -> Result<AnnotationOutput> {
    let total_start = Instant::now();
    let mut stage = AnnotationStage::Idle;
    info!("🟢 [视频标注] {}: {}", stage, filename);

    let result = run_stages(provider, settings, filename, config, &cancel, &mut stage).await;
    let reached = stage;
    stage = AnnotationStage::terminal(&result);

    match &result {
        Ok(output) => {
            info!(
                "✅ [视频标注] {} -> {}，耗时: {:.2}秒",
                stage,
                output.output_uri,
                total_start.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            error!("❌ [视频标注] {}（停在 {} 阶段）: {:#}", stage, reached, e);
        }
    }

    result
}

async fn run_stages(
    provider: &dyn VideoAnnotatorProvider,
    settings: &ServiceSettings,
    filename: &str,
    config: &AnnotationConfig,
    cancel: &CancellationToken,
    stage: &mut AnnotationStage,
) -> Result<AnnotationOutput> {
    if filename.trim().is_empty() {
        anyhow::bail!("Missing filename");
    }
    let bucket = settings.require_bucket()?;

    // 凭证文件在本函数返回时删除
    let credential = CredentialFile::from_base64(settings.require_key()?)?;
    let annotator = provider
        .connect(credential.path())
        .context("创建 Video Intelligence 客户端失败")?;
    *stage = AnnotationStage::CredentialsLoaded;
    info!("🔑 [视频标注] {}: {}", stage, credential.path().display());

    let request = build_request(bucket, filename, config, chrono::Utc::now().timestamp());
    info!("🎬 [视频标注] Processing video: {}", request.input_uri);

    *stage = AnnotationStage::RequestSubmitted;
    info!("📤 [视频标注] {}", stage);
    submit_and_wait(annotator.as_ref(), request, config, cancel).await
}
