use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    pub ocr_text: String,
    #[serde(default)]
    pub track: Option<Track>,
}

/// Subject track of the student; decides which electives are left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Liberal,
    Science,
}

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub ocr: Value,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}
