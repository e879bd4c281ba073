use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use video_annotate::{
    config::{self, parse_feature_list},
    processor::DEFAULT_INPUT_FILENAME,
    run_annotation, AppState, ConfigLoader, GoogleVideoAnnotatorProvider, ServiceSettings,
};

/// 视频标注工具 - 调用 Google Cloud Video Intelligence 分析 GCS 中的视频
#[derive(Parser, Debug)]
#[command(name = "video-annotate")]
#[command(about = "视频标注工具：对 GCS 中的视频发起 Video Intelligence 分析，结果写回 bucket", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 脚本模式：处理一次指定文件后退出
    Run {
        /// bucket 中的视频文件名
        #[arg(short, long, default_value = DEFAULT_INPUT_FILENAME)]
        filename: String,

        /// 配置文件路径（可选，支持 .ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,

        /// 分析特性，逗号分隔（例如 LABEL_DETECTION,SHOT_CHANGE_DETECTION）
        /// 可通过环境变量 VIDEO_ANNOTATE_FEATURES 或配置文件设置
        #[arg(long)]
        features: Option<String>,

        /// 等待远程操作完成的超时时间（秒）
        /// 可通过环境变量 VIDEO_ANNOTATE_TIMEOUT_SECS 或配置文件设置
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Web 服务模式：启动 HTTP 服务器，按请求处理视频
    Serve {
        /// 监听地址（默认从环境变量 PORT 读取端口，如果不存在则使用 0.0.0.0:10000）
        #[arg(short, long)]
        bind: Option<String>,

        /// 配置文件路径（可选，支持 .ini 格式）
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 输出路径
        #[arg(default_value = "video-annotate.ini")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志：RUST_LOG 优先，其次 LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            filename,
            config: config_file,
            features,
            timeout,
        } => {
            let features = features
                .as_deref()
                .map(parse_feature_list)
                .transpose()
                .context("--features 格式错误")?;
            let config = ConfigLoader::load_config(config_file.as_deref(), features, timeout)
                .context("加载配置失败")?;
            let settings = ServiceSettings::from_env();
            let provider = GoogleVideoAnnotatorProvider::new(settings.endpoint.clone());

            println!(
                "使用配置: features={}, language_code={}, timeout={}s",
                config.features.len(),
                config.language_code,
                config.timeout_secs
            );

            // Ctrl-C 取消等待并请求取消远程操作
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });

            if let Some(bucket) = settings.bucket.as_deref() {
                println!("\nProcessing video: gs://{}/{}", bucket, filename);
            }
            let output = run_annotation(&provider, &settings, &filename, &config, cancel)
                .await
                .context("视频标注失败")?;
            println!("\nFinished processing.");
            println!("Output: {}", output.output_uri);
        }
        Commands::Serve {
            bind,
            config: config_file,
        } => {
            // 优先使用命令行参数，其次使用环境变量 PORT，最后使用默认值 10000
            let bind_addr = bind.unwrap_or_else(|| format!("0.0.0.0:{}", config::listen_port()));
            let config = ConfigLoader::load_config(config_file.as_deref(), None, None)
                .context("加载配置失败")?;
            let state = AppState::google(ServiceSettings::from_env(), config);
            start_web_server(&bind_addr, state).await?;
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path)?;
            println!("已生成配置文件: {}", path.display());
        }
    }

    Ok(())
}

async fn start_web_server(bind: &str, state: AppState) -> Result<()> {
    let app = video_annotate::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("  • 健康检查: GET  http://{}/", bind);
    tracing::info!("  • 视频标注: POST http://{}/analyze", bind);

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}
