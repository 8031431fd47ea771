//! OpenAPI documentation for the public endpoints.
//!
//! Served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::OpenApi;

use crate::api::{
    handlers,
    models::relight::{EditRequest, EditResponse, ErrorDetail, HealthResponse, LightDirection, OutputFormat},
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Image Transformation API",
        description = "Replace the background of a subject image and relight it using Stability AI. \
                       Source images are read from the configured S3 bucket and results are written back to it.",
    ),
    paths(handlers::relight::replace_background_relight, handlers::health::health_check),
    components(schemas(EditRequest, EditResponse, ErrorDetail, HealthResponse, LightDirection, OutputFormat)),
    tags(
        (name = "images", description = "Image editing"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;
