//! Backend connection settings parsed from environment variables.
//!
//! Both connection parameters are required. When either is missing the
//! front end runs a permanently failed session instead of touching the
//! network; see [`ConfigError::NotConfigured`].

use reqwest::Url;

pub const DEFAULT_TABLE: &str = "messages";
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_MAX_MESSAGES: usize = 300;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 25;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

const URL_VARS: [&str; 2] = ["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"];
const KEY_VARS: [&str; 2] = ["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Supabase env not configured: add SUPABASE_URL and SUPABASE_ANON_KEY")]
    NotConfigured,
    #[error("invalid SUPABASE_URL: {0}")]
    InvalidUrl(String),
    #[error("invalid SUPABASE_ANON_KEY: not a valid header value")]
    InvalidApiKey,
    #[error("HTTP client build failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Service endpoint, without trailing slash.
    pub url: String,
    /// Public (anon) API key.
    pub api_key: String,
    pub table: String,
    pub schema: String,
    /// Snapshot row limit.
    pub max_messages: usize,
    pub heartbeat_secs: u64,
    pub connect_timeout_secs: u64,
}

impl ChatConfig {
    /// Config with default table, schema, and timings.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute http(s) URL.
    pub fn new(url: &str, api_key: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            url: validate_url(url)?,
            api_key: api_key.to_owned(),
            table: DEFAULT_TABLE.to_owned(),
            schema: DEFAULT_SCHEMA.to_owned(),
            max_messages: DEFAULT_MAX_MESSAGES,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        })
    }

    /// Build config from environment variables.
    ///
    /// Required:
    /// - `SUPABASE_URL` (or `NEXT_PUBLIC_SUPABASE_URL`)
    /// - `SUPABASE_ANON_KEY` (or `NEXT_PUBLIC_SUPABASE_ANON_KEY`)
    ///
    /// Optional:
    /// - `CHAT_TABLE`: default `messages`
    /// - `CHAT_SCHEMA`: default `public`
    /// - `CHAT_MAX_MESSAGES`: default 300
    /// - `CHAT_HEARTBEAT_SECS`: default 25
    /// - `CHAT_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotConfigured`] when a required variable is
    /// missing or blank.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ChatConfig::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// See [`ChatConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = first_non_empty(&lookup, &URL_VARS).ok_or(ConfigError::NotConfigured)?;
        let api_key = first_non_empty(&lookup, &KEY_VARS).ok_or(ConfigError::NotConfigured)?;

        let mut config = Self::new(&url, &api_key)?;
        if let Some(table) = first_non_empty(&lookup, &["CHAT_TABLE"]) {
            config.table = table;
        }
        if let Some(schema) = first_non_empty(&lookup, &["CHAT_SCHEMA"]) {
            config.schema = schema;
        }
        config.max_messages = parse_or(&lookup, "CHAT_MAX_MESSAGES", DEFAULT_MAX_MESSAGES);
        config.heartbeat_secs = parse_or(&lookup, "CHAT_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS);
        config.connect_timeout_secs = parse_or(&lookup, "CHAT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS);
        Ok(config)
    }
}

fn first_non_empty(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn validate_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|e| ConfigError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!("{trimmed}: expected http or https")));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
