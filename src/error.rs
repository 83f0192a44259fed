use thiserror::Error;

use crate::comfy::ComfyError;
use crate::workflow::TemplateError;

#[derive(Debug, Error)]
pub enum EaselError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Engine error: {0}")]
    Engine(#[from] ComfyError),

    #[error("Generation failed for {prompt_id}: {message}")]
    Generation { prompt_id: String, message: String },

    #[error("Generation cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
