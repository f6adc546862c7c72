// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Operation already in progress: {0}")]
    Busy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Image codec error: {0}")]
    Codec(String),

    #[error("Generation service error: {0}")]
    Gateway(String),

    #[error("The model returned an invalid format. Please try again.")]
    InvalidFormat,

    #[error("API Key error. Please select your key and try again.")]
    ApiCredential,

    #[error("Bundling error: {0}")]
    Bundle(String),
}

impl ResponseError for StudioError {
    fn error_response(&self) -> HttpResponse {
        match self {
            StudioError::Validation(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Validation error",
                "message": self.to_string()
            })),
            StudioError::Precondition(_) => HttpResponse::Conflict().json(serde_json::json!({
                "error": "Precondition failed",
                "message": self.to_string()
            })),
            StudioError::Busy(_) => HttpResponse::Conflict().json(serde_json::json!({
                "error": "Busy",
                "message": self.to_string()
            })),
            StudioError::NotFound(_) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "Not found",
                "message": self.to_string()
            })),
            StudioError::Codec(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Image processing error",
                "message": self.to_string()
            })),
            StudioError::Gateway(_) | StudioError::InvalidFormat => {
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "AI service error",
                    "message": self.to_string()
                }))
            }
            StudioError::ApiCredential => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "API credential error",
                "message": self.to_string()
            })),
            StudioError::Bundle(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Bundling error",
                "message": self.to_string()
            })),
        }
    }
}
