use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Video Intelligence 分析特性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Feature {
    ObjectTracking,
    LabelDetection,
    ShotChangeDetection,
    SpeechTranscription,
    LogoRecognition,
    ExplicitContentDetection,
    TextDetection,
    FaceDetection,
    PersonDetection,
}

impl Feature {
    /// 全部特性，顺序与默认请求一致
    pub const ALL: [Feature; 9] = [
        Feature::ObjectTracking,
        Feature::LabelDetection,
        Feature::ShotChangeDetection,
        Feature::SpeechTranscription,
        Feature::LogoRecognition,
        Feature::ExplicitContentDetection,
        Feature::TextDetection,
        Feature::FaceDetection,
        Feature::PersonDetection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::ObjectTracking => "OBJECT_TRACKING",
            Feature::LabelDetection => "LABEL_DETECTION",
            Feature::ShotChangeDetection => "SHOT_CHANGE_DETECTION",
            Feature::SpeechTranscription => "SPEECH_TRANSCRIPTION",
            Feature::LogoRecognition => "LOGO_RECOGNITION",
            Feature::ExplicitContentDetection => "EXPLICIT_CONTENT_DETECTION",
            Feature::TextDetection => "TEXT_DETECTION",
            Feature::FaceDetection => "FACE_DETECTION",
            Feature::PersonDetection => "PERSON_DETECTION",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = anyhow::Error;

    /// 不区分大小写，`-` 与 `_` 等价（例如 `label-detection`）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| anyhow::anyhow!("未知的分析特性: {}", s))
    }
}

/// 语音转写配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechTranscriptionConfig {
    /// BCP-47 语言代码
    pub language_code: String,
    /// 是否自动添加标点
    pub enable_automatic_punctuation: bool,
}

/// 人物检测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonDetectionConfig {
    pub include_bounding_boxes: bool,
    pub include_attributes: bool,
    pub include_pose_landmarks: bool,
}

/// 人脸检测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDetectionConfig {
    pub include_bounding_boxes: bool,
    pub include_attributes: bool,
}

/// 各特性的附加配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_transcription_config: Option<SpeechTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_detection_config: Option<PersonDetectionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_detection_config: Option<FaceDetectionConfig>,
}

/// `videos:annotate` 请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotateVideoRequest {
    /// 输入视频（gs://bucket/key）
    pub input_uri: String,

    /// 结果 JSON 的写入位置（gs://bucket/key）
    pub output_uri: String,

    /// 请求的分析特性
    pub features: Vec<Feature>,

    /// 特性配置
    pub video_context: VideoContext,

    /// 处理区域（可选，例如 us-east1）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

/// 远程操作返回的错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// 长时间运行的远程操作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// 操作名称（projects/.../locations/.../operations/...）
    pub name: String,

    /// 是否已结束
    #[serde(default)]
    pub done: bool,

    /// 失败信息（仅在 done 为 true 时可能出现）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,

    /// 成功结果（本服务不读取其内容）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_to_rest_form() {
        let request = AnnotateVideoRequest {
            input_uri: "gs://bucket/clip.mp4".to_string(),
            output_uri: "gs://bucket/output-1700000000.json".to_string(),
            features: vec![Feature::LabelDetection, Feature::SpeechTranscription],
            video_context: VideoContext {
                speech_transcription_config: Some(SpeechTranscriptionConfig {
                    language_code: "en-US".to_string(),
                    enable_automatic_punctuation: true,
                }),
                person_detection_config: None,
                face_detection_config: Some(FaceDetectionConfig {
                    include_bounding_boxes: true,
                    include_attributes: false,
                }),
            },
            location_id: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "inputUri": "gs://bucket/clip.mp4",
                "outputUri": "gs://bucket/output-1700000000.json",
                "features": ["LABEL_DETECTION", "SPEECH_TRANSCRIPTION"],
                "videoContext": {
                    "speechTranscriptionConfig": {
                        "languageCode": "en-US",
                        "enableAutomaticPunctuation": true
                    },
                    "faceDetectionConfig": {
                        "includeBoundingBoxes": true,
                        "includeAttributes": false
                    }
                }
            })
        );
    }

    #[test]
    fn feature_parsing_is_lenient() {
        assert_eq!("label-detection".parse::<Feature>().unwrap(), Feature::LabelDetection);
        assert_eq!(" PERSON_DETECTION ".parse::<Feature>().unwrap(), Feature::PersonDetection);
        assert!("colour_grading".parse::<Feature>().is_err());
    }

    #[test]
    fn operation_parses_with_missing_fields() {
        let op: Operation = serde_json::from_value(json!({
            "name": "projects/p/locations/us-east1/operations/42"
        }))
        .unwrap();
        assert!(!op.done);
        assert!(op.error.is_none());

        let failed: Operation = serde_json::from_value(json!({
            "name": "projects/p/locations/us-east1/operations/43",
            "done": true,
            "error": { "code": 7, "message": "permission denied" }
        }))
        .unwrap();
        assert!(failed.done);
        assert_eq!(failed.error.unwrap().message, "permission denied");
    }
}
