use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /extract-images`. `url` is kept loose so a missing or
/// non-string value reaches the handler instead of failing deserialization.
#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    #[serde(default)]
    pub url: Option<Value>,
}

impl ExtractRequest {
    /// The `url` exactly as sent, if it holds anything besides whitespace.
    pub fn target_url(&self) -> Option<&str> {
        self.url
            .as_ref()
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    ImgTag,
    CssBackground,
    PictureSrcset,
    LazyData,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ImageInfo {
    pub src: String,
    pub alt: Option<String>,
    pub method: DetectionMethod,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub images: Vec<ImageInfo>,
    pub count: usize,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub browser: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}
