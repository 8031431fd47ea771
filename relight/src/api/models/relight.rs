//! Request and response models for the background replace and relight endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use utoipa::ToSchema;

/// An http(s) URL pointing at a source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "https://my-bucket.s3.amazonaws.com/inputs/subject.png")]
pub struct ImageUrl(String);

impl ImageUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ImageUrl {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Url::parse(&value).map_err(|e| format!("invalid URL '{value}': {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("URL '{value}' must use http or https"));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(format!("URL '{value}' has no host"));
        }
        Ok(Self(value))
    }
}

impl From<ImageUrl> for String {
    fn from(value: ImageUrl) -> Self {
        value.0
    }
}

impl fmt::Display for ImageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A number in the closed interval [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "f64", into = "f64")]
#[schema(value_type = f64)]
pub struct UnitInterval(f64);

impl UnitInterval {
    pub fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for UnitInterval {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("value {value} must be between 0 and 1"))
        }
    }
}

impl From<UnitInterval> for f64 {
    fn from(value: UnitInterval) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LightDirection {
    #[default]
    None,
    Left,
    Right,
    Above,
    Below,
}

impl LightDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            LightDirection::None => "none",
            LightDirection::Left => "left",
            LightDirection::Right => "right",
            LightDirection::Above => "above",
            LightDirection::Below => "below",
        }
    }
}

impl fmt::Display for LightDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webp,
    Jpeg,
    #[default]
    Png,
}

impl OutputFormat {
    /// Wire value, also used as the file extension of the stored result
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_preserve_original_subject() -> UnitInterval {
    UnitInterval(0.95)
}

fn default_original_background_depth() -> UnitInterval {
    UnitInterval(0.75)
}

fn default_light_source_strength() -> UnitInterval {
    UnitInterval(0.0)
}

fn default_prompt() -> Option<String> {
    Some(String::new())
}

/// Request body for replacing the background of a subject image and relighting it
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EditRequest {
    /// Image containing the subject to keep
    pub subject_image: ImageUrl,
    /// Description of the new background
    pub background_prompt: String,
    /// Image to take the background from
    #[serde(default)]
    pub background_reference: Option<ImageUrl>,
    #[serde(default = "default_prompt")]
    pub foreground_prompt: Option<String>,
    #[serde(default = "default_prompt")]
    pub negative_prompt: Option<String>,
    /// How closely the output keeps the original subject, 0 to 1
    #[serde(default = "default_preserve_original_subject")]
    #[schema(value_type = f64, default = 0.95, minimum = 0.0, maximum = 1.0)]
    pub preserve_original_subject: UnitInterval,
    /// Depth of the original background, 0 to 1
    #[serde(default = "default_original_background_depth")]
    #[schema(value_type = f64, default = 0.75, minimum = 0.0, maximum = 1.0)]
    pub original_background_depth: UnitInterval,
    #[serde(default)]
    pub keep_original_background: bool,
    /// Strength of the light source, 0 to 1. Only sent when a direction or light reference is given.
    #[serde(default = "default_light_source_strength")]
    #[schema(value_type = f64, default = 0.0, minimum = 0.0, maximum = 1.0)]
    pub light_source_strength: UnitInterval,
    /// Image to take the lighting from
    #[serde(default)]
    pub light_reference: Option<ImageUrl>,
    #[serde(default)]
    pub light_source_direction: LightDirection,
    #[serde(default)]
    pub seed: i64,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Caller identity; prefixes the stored object name and labels metrics
    #[serde(default)]
    pub username: Option<String>,
}

impl EditRequest {
    /// Username, with an empty string treated as absent
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|name| !name.is_empty())
    }

    /// Tenant label for logs and metrics
    pub fn vendor_id(&self) -> &str {
        self.username().unwrap_or("anonymous")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EditResponse {
    /// Public URL of the stored result
    pub s3_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body returned for every failed request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_request_defaults() {
        let request: EditRequest = serde_json::from_value(json!({
            "subject_image": "https://x/s.png",
            "background_prompt": "pink backdrop"
        }))
        .unwrap();

        assert_eq!(request.subject_image.as_str(), "https://x/s.png");
        assert_eq!(request.preserve_original_subject.get(), 0.95);
        assert_eq!(request.original_background_depth.get(), 0.75);
        assert_eq!(request.light_source_strength.get(), 0.0);
        assert_eq!(request.light_source_direction, LightDirection::None);
        assert_eq!(request.output_format, OutputFormat::Png);
        assert_eq!(request.foreground_prompt.as_deref(), Some(""));
        assert_eq!(request.negative_prompt.as_deref(), Some(""));
        assert!(!request.keep_original_background);
        assert_eq!(request.seed, 0);
        assert_eq!(request.vendor_id(), "anonymous");
    }

    #[test]
    fn test_full_request() {
        let request: EditRequest = serde_json::from_value(json!({
            "subject_image": "https://x/s.png",
            "background_prompt": "forest",
            "background_reference": "https://x/bg.png",
            "light_reference": "http://x/light.png",
            "light_source_direction": "above",
            "light_source_strength": 0.3,
            "seed": 42,
            "output_format": "webp",
            "username": "alice"
        }))
        .unwrap();

        assert_eq!(request.light_source_direction, LightDirection::Above);
        assert_eq!(request.light_source_strength.get(), 0.3);
        assert_eq!(request.output_format.as_str(), "webp");
        assert_eq!(request.username(), Some("alice"));
        assert_eq!(request.vendor_id(), "alice");
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for (field, value) in [
            ("preserve_original_subject", json!(1.5)),
            ("original_background_depth", json!(-0.1)),
            ("light_source_strength", json!(2)),
        ] {
            let mut body = json!({ "subject_image": "https://x/s.png", "background_prompt": "p" });
            body[field] = value;
            let err = serde_json::from_value::<EditRequest>(body).unwrap_err();
            assert!(err.to_string().contains("between 0 and 1"), "{field}: {err}");
        }
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let request: EditRequest = serde_json::from_value(json!({
            "subject_image": "https://x/s.png",
            "background_prompt": "p",
            "preserve_original_subject": 0,
            "original_background_depth": 1
        }))
        .unwrap();
        assert_eq!(request.preserve_original_subject.get(), 0.0);
        assert_eq!(request.original_background_depth.get(), 1.0);
    }

    #[test]
    fn test_image_urls_must_be_http() {
        assert!(ImageUrl::try_from("ftp://x/s.png".to_string()).is_err());
        assert!(ImageUrl::try_from("s.png".to_string()).is_err());
        assert!(ImageUrl::try_from("https://x/s.png".to_string()).is_ok());

        let err = serde_json::from_value::<EditRequest>(json!({
            "subject_image": "not a url",
            "background_prompt": "p"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid URL"));
    }

    #[test]
    fn test_unknown_enum_values_rejected() {
        assert!(
            serde_json::from_value::<EditRequest>(json!({
                "subject_image": "https://x/s.png",
                "background_prompt": "p",
                "light_source_direction": "sideways"
            }))
            .is_err()
        );
        assert!(
            serde_json::from_value::<EditRequest>(json!({
                "subject_image": "https://x/s.png",
                "background_prompt": "p",
                "output_format": "gif"
            }))
            .is_err()
        );
    }

    #[test]
    fn test_missing_required_fields() {
        assert!(serde_json::from_value::<EditRequest>(json!({ "subject_image": "https://x/s.png" })).is_err());
        assert!(serde_json::from_value::<EditRequest>(json!({ "background_prompt": "p" })).is_err());
    }

    #[test]
    fn test_empty_username_is_anonymous() {
        let request: EditRequest = serde_json::from_value(json!({
            "subject_image": "https://x/s.png",
            "background_prompt": "p",
            "username": ""
        }))
        .unwrap();
        assert_eq!(request.username(), None);
        assert_eq!(request.vendor_id(), "anonymous");
    }
}
