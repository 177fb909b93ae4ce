use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::models::ErrorBody;
use crate::preprocess::PreprocessError;
use crate::ranking::RankError;

/// Errors surfaced at the HTTP boundary.
///
/// Client mistakes map to 4xx and are detected before any file is written;
/// everything that goes wrong after the upload is persisted maps to 5xx.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file provided")]
    NoFile,
    #[error("No selected file")]
    NoSelectedFile,
    #[error("Uploaded file is empty")]
    EmptyUpload,
    #[error("Uploaded file exceeds {limit} bytes")]
    UploadTooLarge { limit: usize },
    #[error("Malformed multipart payload: {0}")]
    Multipart(String),
    #[error("top_k must be at least 1")]
    InvalidTopK,
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Could not store upload: {0}")]
    Storage(#[from] std::io::Error),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Rank(#[from] RankError),
    #[error("Worker pool unavailable")]
    Blocking,
}

impl ApiError {
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoFile
            | ApiError::NoSelectedFile
            | ApiError::EmptyUpload
            | ApiError::Multipart(_)
            | ApiError::InvalidTopK
            | ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Storage(_)
            | ApiError::Preprocess(_)
            | ApiError::Classifier(_)
            | ApiError::Rank(_)
            | ApiError::Blocking => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}
