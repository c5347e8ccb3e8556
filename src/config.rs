use std::net::SocketAddr;
use std::time::Duration;

use secrecy::Secret;
use url::Url;

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_OCR_ENDPOINT: &str = "https://qianfan.baidubce.com/v2/chat/completions";
const DEFAULT_OCR_MODEL: &str = "deepseek-ocr";
const DEFAULT_PARSE_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";
const DEFAULT_PARSE_MODEL: &str = "deepseek-chat";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

// ── Settings ─────────────────────────────────────────────────────────────────

/// One chat-completions upstream: where to send, which model, which key.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub model: String,
    pub api_key: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ocr: EndpointConfig,
    pub parse: EndpointConfig,
    pub upstream_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    /// `None` leaves CORS open to any origin.
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Config {
    /// Reads settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let ocr = EndpointConfig {
            url: endpoint_url("OCR_ENDPOINT", get("OCR_ENDPOINT"), DEFAULT_OCR_ENDPOINT)?,
            model: get("OCR_MODEL").unwrap_or_else(|| DEFAULT_OCR_MODEL.to_string()),
            api_key: Secret::new(get("OCR_API_KEY").ok_or(ConfigError::Missing("OCR_API_KEY"))?),
        };
        let parse = EndpointConfig {
            url: endpoint_url("PARSE_ENDPOINT", get("PARSE_ENDPOINT"), DEFAULT_PARSE_ENDPOINT)?,
            model: get("PARSE_MODEL").unwrap_or_else(|| DEFAULT_PARSE_MODEL.to_string()),
            api_key: Secret::new(
                get("PARSE_API_KEY").ok_or(ConfigError::Missing("PARSE_API_KEY"))?,
            ),
        };

        let timeout_secs = match get("UPSTREAM_TIMEOUT_SECS") {
            Some(raw) => parse_number::<u64>("UPSTREAM_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "UPSTREAM_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            name: "BIND_ADDR",
            reason: e.to_string(),
        })?;

        let max_upload_bytes = match get("MAX_UPLOAD_BYTES") {
            Some(raw) => parse_number::<usize>("MAX_UPLOAD_BYTES", &raw)?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

        Ok(Config {
            ocr,
            parse,
            upstream_timeout: Duration::from_secs(timeout_secs),
            bind_addr,
            max_upload_bytes,
            cors_allowed_origins,
        })
    }
}

fn endpoint_url(
    name: &'static str,
    value: Option<String>,
    default: &str,
) -> Result<String, ConfigError> {
    let raw = value.unwrap_or_else(|| default.to_string());
    let parsed = Url::parse(&raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(ConfigError::Invalid {
            name,
            reason: "only http and https URLs are allowed".to_string(),
        });
    }
    Ok(raw)
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}
