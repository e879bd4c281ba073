pub mod annotation;
pub mod config;
pub mod credentials;
pub mod video_intelligence;
pub mod processor;
pub mod handler;

pub use annotation::{AnnotateVideoRequest, Feature, Operation, VideoContext};
pub use config::{AnnotationConfig, ConfigLoader, ServiceSettings};
pub use credentials::CredentialFile;
pub use video_intelligence::{
    GoogleVideoAnnotatorProvider, VideoAnnotator, VideoAnnotatorProvider, VideoIntelligenceClient,
};
pub use processor::{run_annotation, AnnotationOutput, AnnotationStage};
pub use handler::{build_router, AppState};
