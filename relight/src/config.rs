//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `RELIGHT_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `RELIGHT_` override YAML values
//! 3. **Legacy variables** - `STABILITY_KEY`, `S3_BUCKET`, `AWS_ACCESS_KEY_ID`,
//!    `AWS_SECRET_ACCESS_KEY`, `AWS_DEFAULT_REGION`, `LOG_LEVEL`, `LOG_DEDUP_TIMEOUT`,
//!    `WORKER_TIMEOUT` and `ENABLE_METRICS` keep their historical names
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `RELIGHT_VENDOR__POLL_INTERVAL=5s` sets the `vendor.poll_interval` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use relight::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Environment variable names kept from earlier deployments, and the config keys they set.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("STABILITY_KEY", "stability_key"),
    ("S3_BUCKET", "storage.bucket"),
    ("AWS_ACCESS_KEY_ID", "storage.access_key_id"),
    ("AWS_SECRET_ACCESS_KEY", "storage.secret_access_key"),
    ("AWS_DEFAULT_REGION", "storage.region"),
    ("LOG_LEVEL", "log_level"),
    ("LOG_DEDUP_TIMEOUT", "log_dedup_timeout_secs"),
    ("WORKER_TIMEOUT", "worker_timeout"),
    ("ENABLE_METRICS", "enable_metrics"),
];

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RELIGHT_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation, except the vendor API key
/// and the bucket name, which must be supplied.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Bearer token for the Stability API. The service refuses to start without it.
    #[serde(skip_serializing)]
    pub stability_key: Option<String>,
    /// Vendor API endpoints and polling behaviour
    pub vendor: VendorConfig,
    /// Object storage settings
    pub storage: StorageConfig,
    /// Default log filter, used when `RUST_LOG` is not set
    pub log_level: String,
    /// Window in which identical log events are emitted only once (0 disables)
    pub log_dedup_timeout_secs: u64,
    /// Expose Prometheus metrics at `/metrics` and instrument HTTP requests. Off unless enabled.
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Legacy `WORKER_TIMEOUT` override in seconds. Folded into `vendor.timeout` on load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VendorConfig {
    /// Root of the Stability API
    pub base_url: Url,
    /// Delay between result polls while the job is pending
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Wall-clock budget for a job, measured from submission
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Timeout applied to each individual HTTP call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Bucket that source images are read from and results are written to
    pub bucket: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    /// Domain used to build public URLs: `https://{bucket}.{public_domain}/{key}`
    pub public_domain: String,
    /// Custom S3-compatible endpoint (MinIO, localstack)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<Url>,
    /// Use path-style addressing; usually required with `endpoint_url`
    pub force_path_style: bool,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api.stability.ai").expect("static URL is valid"),
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(500),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            public_domain: "s3.amazonaws.com".to_string(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            stability_key: None,
            vendor: VendorConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
            log_dedup_timeout_secs: 5,
            enable_metrics: false,
            enable_otel_export: false,
            worker_timeout: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(secs) = config.worker_timeout.take() {
            config.vendor.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<(), figment::Error> {
        if self.stability_key.as_deref().is_none_or(|key| key.trim().is_empty()) {
            return Err(figment::Error::from(
                "Config validation: STABILITY_KEY environment variable not set".to_string(),
            ));
        }

        if self.storage.bucket.as_deref().is_none_or(|bucket| bucket.trim().is_empty()) {
            return Err(figment::Error::from(
                "Config validation: no storage bucket configured. Set S3_BUCKET or storage.bucket".to_string(),
            ));
        }

        if self.vendor.poll_interval.is_zero() {
            return Err(figment::Error::from(
                "Config validation: vendor.poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.vendor.timeout.is_zero() {
            return Err(figment::Error::from(
                "Config validation: vendor timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Prefixed variables override the file; RELIGHT_CONFIG only names the file
            .merge(Env::prefixed("RELIGHT_").ignore(&["config"]).split("__"))
            // Historical unprefixed names
            .merge(
                Env::raw()
                    .only(&LEGACY_ENV.iter().map(|(name, _)| *name).collect::<Vec<_>>())
                    .map(|name| legacy_key(name.as_str()).into()),
            )
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The vendor API key. Only meaningful after [`Config::validate`] has passed.
    pub fn stability_key(&self) -> &str {
        self.stability_key.as_deref().unwrap_or_default()
    }

    /// The storage bucket. Only meaningful after [`Config::validate`] has passed.
    pub fn bucket(&self) -> &str {
        self.storage.bucket.as_deref().unwrap_or_default()
    }
}

fn legacy_key(name: &str) -> &'static str {
    LEGACY_ENV
        .iter()
        .find(|(legacy, _)| legacy.eq_ignore_ascii_case(name))
        .map(|(_, key)| *key)
        .unwrap_or("unknown_legacy_variable")
}
