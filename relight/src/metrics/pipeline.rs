//! Prometheus-backed pipeline metrics
//!
//! Collector names match the dashboards built for the service:
//! - image_processing_duration_seconds
//! - image_size_bytes
//! - s3_operation_duration_seconds
//! - stability_api_duration_seconds
//! - vendor_requests_total
//! - error_total

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

use crate::metrics::MetricsRecorder;

/// Pipeline instruments registered in a caller-supplied registry
#[derive(Clone)]
pub struct PipelineMetrics {
    processing_duration: HistogramVec,
    image_size: HistogramVec,
    storage_duration: HistogramVec,
    vendor_duration: HistogramVec,
    vendor_requests: IntCounterVec,
    errors: IntCounterVec,
    registry: Registry,
}

impl PipelineMetrics {
    /// Create the instruments and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        // Downloads and uploads are sub-second to a few seconds; vendor jobs run for minutes
        let transfer_buckets = vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];
        let vendor_buckets = vec![1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 160.0, 320.0, 640.0];
        // 1 KiB to 64 MiB, factor 4
        let size_buckets = vec![
            1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0, 16777216.0, 67108864.0,
        ];

        let processing_duration = HistogramVec::new(
            HistogramOpts::new("image_processing_duration_seconds", "Time spent processing images").buckets(transfer_buckets.clone()),
            &["operation_type"],
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        let image_size = HistogramVec::new(
            HistogramOpts::new("image_size_bytes", "Size of processed images").buckets(size_buckets),
            &["operation_type"],
        )?;
        registry.register(Box::new(image_size.clone()))?;

        let storage_duration = HistogramVec::new(
            HistogramOpts::new("s3_operation_duration_seconds", "Time spent on S3 operations").buckets(transfer_buckets),
            &["operation_type"],
        )?;
        registry.register(Box::new(storage_duration.clone()))?;

        let vendor_duration = HistogramVec::new(
            HistogramOpts::new("stability_api_duration_seconds", "Time spent on Stability API calls").buckets(vendor_buckets),
            &["operation_type"],
        )?;
        registry.register(Box::new(vendor_duration.clone()))?;

        let vendor_requests = IntCounterVec::new(
            Opts::new("vendor_requests_total", "Total number of requests per vendor"),
            &["vendor_id", "operation_type"],
        )?;
        registry.register(Box::new(vendor_requests.clone()))?;

        let errors = IntCounterVec::new(Opts::new("error_total", "Total number of errors"), &["error_type", "vendor_id"])?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            processing_duration,
            image_size,
            storage_duration,
            vendor_duration,
            vendor_requests,
            errors,
            registry: registry.clone(),
        })
    }

    /// Get reference to the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every collector in the registry in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl MetricsRecorder for PipelineMetrics {
    fn record_request(&self, vendor_id: &str, operation_type: &str) {
        self.vendor_requests.with_label_values(&[vendor_id, operation_type]).inc();
    }

    fn record_error(&self, error_type: &str, vendor_id: &str) {
        self.errors.with_label_values(&[error_type, vendor_id]).inc();
    }

    fn observe_processing_duration(&self, operation_type: &str, duration: Duration) {
        self.processing_duration
            .with_label_values(&[operation_type])
            .observe(duration.as_secs_f64());
    }

    fn observe_image_size(&self, operation_type: &str, bytes: usize) {
        self.image_size.with_label_values(&[operation_type]).observe(bytes as f64);
    }

    fn observe_storage_duration(&self, operation_type: &str, duration: Duration) {
        self.storage_duration
            .with_label_values(&[operation_type])
            .observe(duration.as_secs_f64());
    }

    fn observe_vendor_duration(&self, operation_type: &str, duration: Duration) {
        self.vendor_duration
            .with_label_values(&[operation_type])
            .observe(duration.as_secs_f64());
    }
}
