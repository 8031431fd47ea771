//! Recorder seam between the pipeline and the metrics backend

use std::time::Duration;

/// Trait for recording pipeline telemetry.
///
/// Implementations must tolerate concurrent calls from many request tasks.
pub trait MetricsRecorder: Send + Sync {
    /// Count an incoming request for a tenant
    fn record_request(&self, vendor_id: &str, operation_type: &str);

    /// Count a terminal failure, labelled by error kind and tenant
    fn record_error(&self, error_type: &str, vendor_id: &str);

    /// Time spent fetching a source image
    fn observe_processing_duration(&self, operation_type: &str, duration: Duration);

    /// Size of a downloaded or generated image
    fn observe_image_size(&self, operation_type: &str, bytes: usize);

    /// Time spent on an object storage write
    fn observe_storage_duration(&self, operation_type: &str, duration: Duration);

    /// Time spent waiting on the vendor, submission through final poll
    fn observe_vendor_duration(&self, operation_type: &str, duration: Duration);
}
