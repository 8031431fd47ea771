//! Pipeline metrics.
//!
//! The pipeline talks to a [`MetricsRecorder`] that is constructed once per application and
//! injected through `AppState`, so tests can hand it a fresh registry. HTTP request metrics are
//! recorded separately by the axum-prometheus layer in `build_router`.

mod pipeline;
mod recorder;

pub use pipeline::PipelineMetrics;
pub use recorder::MetricsRecorder;
