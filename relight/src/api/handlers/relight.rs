use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::relight::{EditRequest, EditResponse, ErrorDetail},
    errors::{Error, Result},
};

/// Replace the background of a subject image and relight it.
#[utoipa::path(
    post,
    path = "/api/v1/replace-background-relight",
    tag = "images",
    summary = "Replace background and relight",
    description = "Downloads the subject image (and optional background and light references) from the \
                   configured bucket, runs the Stability AI replace-background-and-relight job, waits for it \
                   to finish and stores the result. Returns the public URL of the stored image.",
    request_body = EditRequest,
    responses(
        (status = 200, description = "Image generated and stored", body = EditResponse),
        (status = 400, description = "A source image could not be downloaded, or the output failed the content classifier", body = ErrorDetail),
        (status = 422, description = "Request body failed validation", body = ErrorDetail),
        (status = 500, description = "Vendor or storage failure", body = ErrorDetail),
    )
)]
#[instrument(skip_all)]
pub async fn replace_background_relight(
    State(state): State<AppState>,
    payload: std::result::Result<Json<EditRequest>, JsonRejection>,
) -> Result<Json<EditResponse>> {
    let Json(request) = payload.map_err(|rejection| Error::Validation {
        message: rejection.body_text(),
    })?;

    let correlation_id = Uuid::new_v4();
    let vendor_id = request.vendor_id().to_string();
    let pipeline = state.pipeline.clone();

    // A panic inside the pipeline surfaces here as a JoinError instead of tearing down the connection
    let artifact = tokio::spawn(async move { pipeline.run(request, correlation_id).await })
        .await
        .map_err(|join_error| {
            state.metrics.record_error("unknown", &vendor_id);
            error!(%correlation_id, vendor_id = %vendor_id, error = %join_error, "Unexpected error");
            Error::Other(anyhow::anyhow!("pipeline task failed: {join_error}"))
        })??;

    Ok(Json(EditResponse { s3_url: artifact.url }))
}
