use crate::{pipeline::ImageRole, storage::StorageError, vendor::VendorError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Request body is malformed or fails field validation
    #[error("{message}")]
    Validation { message: String },

    /// A source image could not be fetched from object storage
    #[error("Error downloading {image} image from {url}: {source}")]
    Download {
        image: ImageRole,
        url: String,
        #[source]
        source: StorageError,
    },

    /// The vendor call failed before producing a terminal response
    #[error(transparent)]
    Vendor(#[from] VendorError),

    /// The vendor finished the job with a status other than 200
    #[error("Stability API error: {body}")]
    VendorStatus { status: u16, body: String },

    /// The vendor's content classifier rejected the generation
    #[error("Generation failed content classifier")]
    ContentFiltered,

    /// The generated image could not be written to object storage
    #[error("Failed to upload file: {0}")]
    Upload(#[source] StorageError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Download { .. } | Error::ContentFiltered => StatusCode::BAD_REQUEST,
            Error::VendorStatus { status, .. } => StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            Error::Vendor(_) | Error::Upload(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used for the `error_type` dimension of the error counter.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::Download { image, .. } => match image {
                ImageRole::Subject => "download_subject",
                ImageRole::Background => "download_background",
                ImageRole::Light => "download_light",
            },
            Error::Vendor(_) => "stability_api",
            Error::VendorStatus { .. } => "stability_api_error",
            Error::ContentFiltered => "nsfw_filter",
            Error::Upload(_) => "s3_upload",
            Error::Other(_) => "unknown",
        }
    }

    /// Message returned in the `detail` field of the response body.
    ///
    /// Everything except unexpected errors is reported verbatim, since callers need to know which
    /// image or vendor step failed.
    pub fn user_message(&self) -> String {
        match self {
            Error::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    /// Pipeline failures were already logged inside the request span; only rejections that
    /// never reached the pipeline are logged here.
    fn into_response(self) -> Response {
        if let Error::Validation { .. } = &self {
            tracing::debug!("Validation error: {}", self);
        }

        let status = self.status_code();
        (status, Json(json!({ "detail": self.user_message() }))).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
