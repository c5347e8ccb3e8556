use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde_json::{json, Value};

use crate::config::{Config, EndpointConfig};
use crate::models::Track;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "grade-ocr-relay/0.1";
const MAX_ERROR_BODY_CHARS: usize = 2000;
const MAX_PARSE_CHARS: usize = 6000;
const TRUNCATION_NOTE: &str = "\n\n(內容過長已截斷)";
const PARSE_TEMPERATURE: f64 = 0.2;

const OCR_UPSTREAM: &str = "OCR";
const PARSE_UPSTREAM: &str = "Parse";

const OCR_PROMPT: &str = "請對圖片進行OCR，輸出識別到的文字。如果是成績單，請提取科目名稱和分數。";

const SCHEDULE_KEYWORDS: &[&str] = &[
    "大測", "測驗", "考試", "報告", "作業", "選考", "實驗", "實驗考", "期中", "期末",
];

// ── Lazy static regexes ──────────────────────────────────────────────────────

// ASCII word boundaries: CJK text may sit directly against the date.
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9A-Za-z_])[0-9]{1,2}/[0-9]{1,2}(?:$|[^0-9A-Za-z_])").unwrap()
});

static LINE_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{upstream} upstream returned status {status}")]
    Status {
        upstream: &'static str,
        status: u16,
        body: String,
    },
    #[error("{0}")]
    Network(String),
    #[error("upstream returned an unreadable body: {0}")]
    InvalidBody(String),
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Talks to the OCR and parse chat-completion endpoints. Cheap to share.
pub struct UpstreamClient {
    http: reqwest::Client,
    ocr: EndpointConfig,
    parse: EndpointConfig,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self, UpstreamError> {
        let http = reqwest::ClientBuilder::new()
            .timeout(config.upstream_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        Ok(Self {
            http,
            ocr: config.ocr.clone(),
            parse: config.parse.clone(),
        })
    }

    /// Sends the image to the OCR model and returns its JSON response verbatim.
    pub async fn ocr(&self, image: &[u8]) -> Result<Value, UpstreamError> {
        let payload = ocr_payload(&self.ocr.model, image);
        post_chat(&self.http, OCR_UPSTREAM, &self.ocr, &payload).await
    }

    /// Asks the language model to turn OCR text into `{"events": [...]}`.
    pub async fn parse(&self, ocr_text: &str, track: Option<Track>) -> Result<Value, UpstreamError> {
        let prompt = build_parse_prompt(&preprocess_ocr_text(ocr_text), track);
        let payload = parse_payload(&self.parse.model, &prompt);
        post_chat(&self.http, PARSE_UPSTREAM, &self.parse, &payload).await
    }
}

// ── HTTP call ────────────────────────────────────────────────────────────────

async fn post_chat(
    http: &reqwest::Client,
    upstream: &'static str,
    endpoint: &EndpointConfig,
    payload: &Value,
) -> Result<Value, UpstreamError> {
    let response = http
        .post(&endpoint.url)
        .bearer_auth(endpoint.api_key.expose_secret())
        .json(payload)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Network(format!("TimeoutError: {}", e))
            } else if e.is_connect() {
                UpstreamError::Network(format!("ConnectError: {}", e))
            } else {
                UpstreamError::Network(format!("RequestError: {}", e))
            }
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| UpstreamError::Network(e.to_string()))?;

    if status != StatusCode::OK {
        tracing::warn!(
            upstream,
            url = %endpoint.url,
            status = status.as_u16(),
            "upstream call failed"
        );
        return Err(UpstreamError::Status {
            upstream,
            status: status.as_u16(),
            body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
        });
    }

    serde_json::from_str(&body).map_err(|e| UpstreamError::InvalidBody(e.to_string()))
}

// ── Payloads ─────────────────────────────────────────────────────────────────

fn image_data_url(image: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(image))
}

fn ocr_payload(model: &str, image: &[u8]) -> Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": OCR_PROMPT },
                    { "type": "image_url", "image_url": { "url": image_data_url(image) } }
                ]
            }
        ],
        "stop": []
    })
}

fn parse_payload(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": PARSE_TEMPERATURE
    })
}

// ── Prompt construction ──────────────────────────────────────────────────────

/// Keeps only schedule-looking lines (falling back to everything), flattens
/// whitespace and caps the length.
pub fn preprocess_ocr_text(text: &str) -> String {
    let lines: Vec<&str> = LINE_SPLIT_RE
        .split(text)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let filtered: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| {
            let has_date = DATE_RE.is_match(line);
            let has_keyword = SCHEDULE_KEYWORDS.iter().any(|k| line.contains(k));
            let has_week = line.contains('第') && line.contains('週');
            (has_date && has_keyword) || has_week
        })
        .collect();

    let kept = if filtered.is_empty() { lines } else { filtered };
    let compact = WHITESPACE_RE.replace_all(&kept.join("\n"), " ").trim().to_string();

    // Counted in chars; only differs from a UTF-16 length outside the BMP.
    if compact.chars().count() > MAX_PARSE_CHARS {
        let mut cut = truncate_chars(&compact, MAX_PARSE_CHARS);
        cut.push_str(TRUNCATION_NOTE);
        cut
    } else {
        compact
    }
}

pub fn build_parse_prompt(schedule_text: &str, track: Option<Track>) -> String {
    let mut exclude_rules = vec!["- EXCLUDE 報告 (reports)", "- EXCLUDE 考試 (exams)"];
    match track {
        Some(Track::Liberal) => exclude_rules.extend([
            "- EXCLUDE 化選 (Chemistry Elective)",
            "- EXCLUDE 物選 (Physics Elective)",
            "- EXCLUDE 生選 (Biology Elective)",
        ]),
        Some(Track::Science) => exclude_rules.extend([
            "- EXCLUDE 歷選 (History Elective)",
            "- EXCLUDE 地選 (Geography Elective)",
        ]),
        None => {}
    }

    format!(
        r#"You are an assistant that extracts exam/assignment events from a school schedule.
Return ONLY valid JSON. Do not wrap in markdown. Do not add any commentary.

Schema:
{{
  "events": [
    {{
      "id": "string",
      "date": "YYYY-MM-DD or empty string",
      "date_range": "YYYY-MM-DD..YYYY-MM-DD or empty string",
      "week": "string",
      "subject": "string",
      "type": "string",
      "title": "string",
      "notes": "string"
    }}
  ]
}}

Rules:
- Only include items that should have a score: 大測/測驗/作業/實驗考/選考.
{}
- If one cell contains multiple items split into multiple events.
- If year is missing, leave date empty string.
- Subject names should be extracted exactly as they appear (e.g., "數學大測3", "文法大測1", "中文大測2").

Schedule text:
{}"#,
        exclude_rules.join("\n"),
        schedule_text
    )
}

// ── Text helpers ─────────────────────────────────────────────────────────────

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
