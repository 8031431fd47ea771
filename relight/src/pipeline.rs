//! The edit pipeline: download sources, run the vendor job, store the result.
//!
//! Stages run strictly in order and the first failure ends the request. Nothing is written to
//! storage until the vendor has produced an acceptable image, so a failed request leaves no
//! artifact behind.
//!
//! Every log event is emitted inside a span carrying the request's correlation id and vendor id.
//! Failures are logged and counted exactly once, in [`Pipeline::run`].

use bon::Builder;
use std::{fmt, sync::Arc, time::Instant};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::{
    api::models::relight::{EditRequest, ImageUrl, LightDirection, OutputFormat},
    errors::{Error, Result},
    metrics::MetricsRecorder,
    storage::ObjectStore,
    vendor::{Attachment, GenerationClient, GenerationParams, GenerationRequest, PollPolicy},
};

/// Vendor endpoint, relative to the vendor base URL
pub const REPLACE_BACKGROUND_RELIGHT_PATH: &str = "v2beta/stable-image/edit/replace-background-and-relight";
/// `finish-reason` value the vendor sets when its content classifier rejects the output
pub const CONTENT_FILTERED: &str = "CONTENT_FILTERED";
/// `operation_type` label of the request counter
pub const OPERATION: &str = "replace_background_relight";
const OUTPUT_PREFIX: &str = "transformed_images";

/// The source images a request can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Subject,
    Background,
    Light,
}

impl ImageRole {
    /// Multipart field the image is sent under
    pub fn field(self) -> &'static str {
        match self {
            ImageRole::Subject => "subject_image",
            ImageRole::Background => "background_reference",
            ImageRole::Light => "light_reference",
        }
    }

    /// Label for the image size histogram
    pub fn size_label(self) -> &'static str {
        match self {
            ImageRole::Subject => "subject",
            ImageRole::Background => "background",
            ImageRole::Light => "light",
        }
    }

    /// Label for the download duration histogram, also the error label
    pub fn stage(self) -> &'static str {
        match self {
            ImageRole::Subject => "download_subject",
            ImageRole::Background => "download_background",
            ImageRole::Light => "download_light",
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageRole::Subject => "subject",
            ImageRole::Background => "background reference",
            ImageRole::Light => "light reference",
        })
    }
}

/// Location of a stored result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub bucket: String,
    pub key: String,
    pub url: String,
}

#[derive(Builder)]
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    vendor: Arc<dyn GenerationClient>,
    metrics: Arc<dyn MetricsRecorder>,
    /// Bucket results are written to
    #[builder(into)]
    bucket: String,
    #[builder(default)]
    poll_policy: PollPolicy,
}

impl Pipeline {
    pub async fn run(&self, request: EditRequest, correlation_id: Uuid) -> Result<StoredArtifact> {
        let vendor_id = request.vendor_id().to_string();
        let span = info_span!("pipeline", %correlation_id, vendor_id = %vendor_id);

        async move {
            let started = Instant::now();
            info!(input = ?request, "Received request");
            self.metrics.record_request(&vendor_id, OPERATION);

            match self.execute(&request).await {
                Ok(artifact) => {
                    info!(
                        s3_url = %artifact.url,
                        processing_time_ms = started.elapsed().as_millis() as u64,
                        "Request completed"
                    );
                    Ok(artifact)
                }
                Err(err) => {
                    self.metrics.record_error(err.error_type(), &vendor_id);
                    error!(error_type = err.error_type(), error = %err, "Request failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, request: &EditRequest) -> Result<StoredArtifact> {
        let mut files = Vec::with_capacity(3);
        files.push(self.download(ImageRole::Subject, &request.subject_image).await?);
        if let Some(url) = &request.background_reference {
            files.push(self.download(ImageRole::Background, url).await?);
        }
        if let Some(url) = &request.light_reference {
            files.push(self.download(ImageRole::Light, url).await?);
        }

        let params = generation_params(request);
        info!(params = ?params, "Prepared vendor parameters");

        let started = Instant::now();
        let outcome = self
            .vendor
            .submit_and_wait(
                REPLACE_BACKGROUND_RELIGHT_PATH,
                GenerationRequest { params, files },
                self.poll_policy,
            )
            .await;
        self.metrics.observe_vendor_duration("generation", started.elapsed());
        let result = outcome?;
        info!(status = result.status, "Received response from vendor");

        if result.status != 200 {
            return Err(Error::VendorStatus {
                status: result.status,
                body: String::from_utf8_lossy(&result.image).into_owned(),
            });
        }

        if result.finish_reason.as_deref() == Some(CONTENT_FILTERED) {
            return Err(Error::ContentFiltered);
        }

        let key = object_key(request.username(), request.output_format);
        info!(key = %key, "Generated object key");

        let size = result.image.len();
        let started = Instant::now();
        let stored = self.store.store(result.image, &self.bucket, &key).await;
        self.metrics.observe_storage_duration("upload", started.elapsed());
        let url = stored.map_err(Error::Upload)?;
        self.metrics.observe_image_size("output", size);
        info!(s3_url = %url, "Uploaded result");

        Ok(StoredArtifact {
            bucket: self.bucket.clone(),
            key,
            url,
        })
    }

    async fn download(&self, role: ImageRole, url: &ImageUrl) -> Result<Attachment> {
        let started = Instant::now();
        let fetched = self.store.fetch(url.as_str()).await;
        self.metrics.observe_processing_duration(role.stage(), started.elapsed());

        let data = fetched.map_err(|source| Error::Download {
            image: role,
            url: url.to_string(),
            source,
        })?;
        self.metrics.observe_image_size(role.size_label(), data.len());
        info!(image = %role, url = %url, size = data.len(), "Downloaded image");

        Ok(Attachment::new(role.field(), data))
    }
}

/// Form fields for the vendor call.
///
/// Direction is sent only when set, and strength only when there is a light input to apply it to.
pub fn generation_params(request: &EditRequest) -> GenerationParams {
    let mut params = GenerationParams::new();
    params.insert("output_format", request.output_format);
    params.insert("background_prompt", &request.background_prompt);
    params.insert("foreground_prompt", request.foreground_prompt.as_deref().unwrap_or_default());
    params.insert("negative_prompt", request.negative_prompt.as_deref().unwrap_or_default());
    params.insert("preserve_original_subject", request.preserve_original_subject.get());
    params.insert("original_background_depth", request.original_background_depth.get());
    params.insert("keep_original_background", request.keep_original_background);
    params.insert("seed", request.seed);

    let directional = request.light_source_direction != LightDirection::None;
    if directional {
        params.insert("light_source_direction", request.light_source_direction);
    }
    if directional || request.light_reference.is_some() {
        params.insert("light_source_strength", request.light_source_strength.get());
    }

    params
}

/// `transformed_images/[{username}_]{uuid}.{format}`
pub fn object_key(username: Option<&str>, format: OutputFormat) -> String {
    let token = Uuid::new_v4();
    match username {
        Some(name) => format!("{OUTPUT_PREFIX}/{name}_{token}.{format}"),
        None => format!("{OUTPUT_PREFIX}/{token}.{format}"),
    }
}
