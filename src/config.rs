use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::annotation::{
    FaceDetectionConfig, Feature, PersonDetectionConfig, SpeechTranscriptionConfig, VideoContext,
};

/// 默认监听端口
pub const DEFAULT_PORT: u16 = 10000;

/// Video Intelligence API 默认地址
pub const DEFAULT_ENDPOINT: &str = "https://videointelligence.googleapis.com";

/// 默认配置文件名
const CONFIG_FILE_NAME: &str = "video-annotate.ini";

/// 视频标注配置：请求哪些分析特性以及各特性的附加参数
///
/// 默认值即完整特性集合：
/// - 全部 9 个特性（目标跟踪、标签、镜头切换、语音转写、Logo、敏感内容、文字、人脸、人物）
/// - 语音转写：`en-US`，自动标点
/// - 人物检测：包含边框和姿态关键点，不含属性
/// - 人脸检测：包含边框和属性
/// - 等待远程操作最多 300 秒，每 5 秒查询一次
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationConfig {
    /// 请求的分析特性
    pub features: Vec<Feature>,
    /// 语音转写语言
    pub language_code: String,
    /// 语音转写是否自动添加标点
    pub enable_automatic_punctuation: bool,
    /// 人物检测参数
    pub person: PersonDetectionConfig,
    /// 人脸检测参数
    pub face: FaceDetectionConfig,
    /// 处理区域（可选）
    pub location_id: Option<String>,
    /// 等待远程操作完成的超时时间（秒）
    pub timeout_secs: u64,
    /// 查询远程操作状态的间隔（秒）
    pub poll_interval_secs: u64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            features: Feature::ALL.to_vec(),
            language_code: "en-US".to_string(),
            enable_automatic_punctuation: true,
            person: PersonDetectionConfig {
                include_bounding_boxes: true,
                include_attributes: false,
                include_pose_landmarks: true,
            },
            face: FaceDetectionConfig {
                include_bounding_boxes: true,
                include_attributes: true,
            },
            location_id: None,
            timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

impl AnnotationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// 构建请求中的 videoContext
    pub fn video_context(&self) -> VideoContext {
        VideoContext {
            speech_transcription_config: Some(SpeechTranscriptionConfig {
                language_code: self.language_code.clone(),
                enable_automatic_punctuation: self.enable_automatic_punctuation,
            }),
            person_detection_config: Some(self.person.clone()),
            face_detection_config: Some(self.face.clone()),
        }
    }
}

/// 服务运行所需的环境设置
///
/// 凭证和 bucket 在每次标注时才检查，缺失时只让该次请求失败，
/// 健康检查不受影响。
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    /// base64 编码的服务账号 JSON（GCS_KEY_BASE64）
    pub key_base64: Option<String>,
    /// GCS bucket 名称（GCS_BUCKET_NAME）
    pub bucket: Option<String>,
    /// Video Intelligence API 地址（VIDEO_INTELLIGENCE_ENDPOINT）
    pub endpoint: String,
}

impl ServiceSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            key_base64: lookup("GCS_KEY_BASE64").filter(|v| !v.trim().is_empty()),
            bucket: lookup("GCS_BUCKET_NAME").filter(|v| !v.trim().is_empty()),
            endpoint: lookup("VIDEO_INTELLIGENCE_ENDPOINT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        }
    }

    pub fn require_key(&self) -> Result<&str> {
        self.key_base64
            .as_deref()
            .context("未找到 GCS_KEY_BASE64 环境变量")
    }

    pub fn require_bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .context("未找到 GCS_BUCKET_NAME 环境变量")
    }
}

/// 监听端口（PORT），未设置或无法解析时使用 10000
pub fn listen_port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// 日志级别（LOG_LEVEL），默认 info
pub fn log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

/// 单一来源（环境变量或配置文件）读到的部分配置
#[derive(Debug, Clone, Default)]
struct PartialConfig {
    features: Option<Vec<Feature>>,
    language_code: Option<String>,
    enable_automatic_punctuation: Option<bool>,
    person_bounding_boxes: Option<bool>,
    person_attributes: Option<bool>,
    person_pose_landmarks: Option<bool>,
    face_bounding_boxes: Option<bool>,
    face_attributes: Option<bool>,
    location_id: Option<String>,
    timeout_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
}

impl PartialConfig {
    /// 在 self 缺失的字段上使用 lower 的值
    fn or(self, lower: PartialConfig) -> PartialConfig {
        PartialConfig {
            features: self.features.or(lower.features),
            language_code: self.language_code.or(lower.language_code),
            enable_automatic_punctuation: self
                .enable_automatic_punctuation
                .or(lower.enable_automatic_punctuation),
            person_bounding_boxes: self.person_bounding_boxes.or(lower.person_bounding_boxes),
            person_attributes: self.person_attributes.or(lower.person_attributes),
            person_pose_landmarks: self.person_pose_landmarks.or(lower.person_pose_landmarks),
            face_bounding_boxes: self.face_bounding_boxes.or(lower.face_bounding_boxes),
            face_attributes: self.face_attributes.or(lower.face_attributes),
            location_id: self.location_id.or(lower.location_id),
            timeout_secs: self.timeout_secs.or(lower.timeout_secs),
            poll_interval_secs: self.poll_interval_secs.or(lower.poll_interval_secs),
        }
    }

    fn resolve(self) -> AnnotationConfig {
        let defaults = AnnotationConfig::default();
        AnnotationConfig {
            features: self.features.unwrap_or(defaults.features),
            language_code: self.language_code.unwrap_or(defaults.language_code),
            enable_automatic_punctuation: self
                .enable_automatic_punctuation
                .unwrap_or(defaults.enable_automatic_punctuation),
            person: PersonDetectionConfig {
                include_bounding_boxes: self
                    .person_bounding_boxes
                    .unwrap_or(defaults.person.include_bounding_boxes),
                include_attributes: self
                    .person_attributes
                    .unwrap_or(defaults.person.include_attributes),
                include_pose_landmarks: self
                    .person_pose_landmarks
                    .unwrap_or(defaults.person.include_pose_landmarks),
            },
            face: FaceDetectionConfig {
                include_bounding_boxes: self
                    .face_bounding_boxes
                    .unwrap_or(defaults.face.include_bounding_boxes),
                include_attributes: self
                    .face_attributes
                    .unwrap_or(defaults.face.include_attributes),
            },
            location_id: self.location_id.or(defaults.location_id),
            timeout_secs: self.timeout_secs.unwrap_or(defaults.timeout_secs),
            poll_interval_secs: self
                .poll_interval_secs
                .unwrap_or(defaults.poll_interval_secs),
        }
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    ///
    /// 显式指定的配置文件读取失败时返回错误；默认位置找不到配置文件时忽略。
    pub fn load_config(
        config_file: Option<&Path>,
        features: Option<Vec<Feature>>,
        timeout_secs: Option<u64>,
    ) -> Result<AnnotationConfig> {
        let file_config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations().unwrap_or_default(),
        };
        let env_config = Self::load_from_env(|key| env::var(key).ok())?;
        Ok(Self::merge(features, timeout_secs, env_config, file_config))
    }

    fn merge(
        features: Option<Vec<Feature>>,
        timeout_secs: Option<u64>,
        env_config: PartialConfig,
        file_config: PartialConfig,
    ) -> AnnotationConfig {
        let cli_config = PartialConfig {
            features,
            timeout_secs,
            ..PartialConfig::default()
        };
        cli_config.or(env_config).or(file_config).resolve()
    }

    /// 从环境变量加载配置
    fn load_from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<PartialConfig> {
        let features = lookup("VIDEO_ANNOTATE_FEATURES")
            .map(|v| parse_feature_list(&v))
            .transpose()
            .context("VIDEO_ANNOTATE_FEATURES 格式错误")?;

        Ok(PartialConfig {
            features,
            language_code: lookup("VIDEO_ANNOTATE_LANGUAGE_CODE").filter(|v| !v.is_empty()),
            location_id: lookup("VIDEO_ANNOTATE_LOCATION_ID").filter(|v| !v.is_empty()),
            timeout_secs: lookup("VIDEO_ANNOTATE_TIMEOUT_SECS").and_then(|v| v.parse().ok()),
            poll_interval_secs: lookup("VIDEO_ANNOTATE_POLL_INTERVAL_SECS")
                .and_then(|v| v.parse().ok()),
            ..PartialConfig::default()
        })
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            anyhow::bail!("配置文件不存在: {}", config_path.display());
        }

        let mut ini = configparser::ini::Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        let get = |section: &str, key: &str| {
            ini.get(section, key)
                .or_else(|| ini.get("default", key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_bool = |section: &str, key: &str| get(section, key).and_then(|v| parse_bool(&v));

        let features = get("annotate", "features")
            .map(|v| parse_feature_list(&v))
            .transpose()
            .with_context(|| format!("配置文件 features 格式错误: {}", config_path.display()))?;

        Ok(PartialConfig {
            features,
            language_code: get("speech", "language_code"),
            enable_automatic_punctuation: get_bool("speech", "enable_automatic_punctuation"),
            person_bounding_boxes: get_bool("person", "include_bounding_boxes"),
            person_attributes: get_bool("person", "include_attributes"),
            person_pose_landmarks: get_bool("person", "include_pose_landmarks"),
            face_bounding_boxes: get_bool("face", "include_bounding_boxes"),
            face_attributes: get_bool("face", "include_attributes"),
            location_id: get("annotate", "location_id"),
            timeout_secs: get("annotate", "timeout_secs").and_then(|v| v.parse().ok()),
            poll_interval_secs: get("annotate", "poll_interval_secs").and_then(|v| v.parse().ok()),
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<PartialConfig> {
        let mut candidates = vec![
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from(format!(".{}", CONFIG_FILE_NAME)),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(format!(".{}", CONFIG_FILE_NAME)));
        }
        candidates.push(PathBuf::from("/etc").join(CONFIG_FILE_NAME));

        match candidates.iter().find(|p| p.exists()) {
            Some(path) => {
                tracing::debug!("使用配置文件: {}", path.display());
                Self::load_from_file(path)
            }
            None => Err(anyhow::anyhow!("未找到配置文件")),
        }
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = AnnotationConfig::default();
        let features = defaults
            .features
            .iter()
            .map(Feature::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let mut ini = configparser::ini::Ini::new();
        ini.set("annotate", "features", Some(features));
        ini.set("annotate", "location_id", Some(String::new()));
        ini.set("annotate", "timeout_secs", Some(defaults.timeout_secs.to_string()));
        ini.set("annotate", "poll_interval_secs", Some(defaults.poll_interval_secs.to_string()));
        ini.set("speech", "language_code", Some(defaults.language_code.clone()));
        ini.set(
            "speech",
            "enable_automatic_punctuation",
            Some(defaults.enable_automatic_punctuation.to_string()),
        );
        ini.set("person", "include_bounding_boxes", Some(defaults.person.include_bounding_boxes.to_string()));
        ini.set("person", "include_attributes", Some(defaults.person.include_attributes.to_string()));
        ini.set("person", "include_pose_landmarks", Some(defaults.person.include_pose_landmarks.to_string()));
        ini.set("face", "include_bounding_boxes", Some(defaults.face.include_bounding_boxes.to_string()));
        ini.set("face", "include_attributes", Some(defaults.face.include_attributes.to_string()));

        ini.write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

/// 解析逗号分隔的特性列表
pub fn parse_feature_list(value: &str) -> Result<Vec<Feature>> {
    let features = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Feature>>>()?;
    if features.is_empty() {
        anyhow::bail!("特性列表为空");
    }
    Ok(features)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
