//! Environment-driven settings.
//!
//! The binary loads `.env` first; everything here only reads variables so
//! it can be exercised with an in-memory lookup.

use std::time::Duration;

use crate::error::{Result, TubelexError};

pub const API_KEYS_VAR: &str = "GOOGLE_API_KEYS";
pub const MODEL_VAR: &str = "GEMINI_MODEL";
pub const API_BASE_VAR: &str = "GEMINI_API_BASE";
pub const STORE_URL_VAR: &str = "SUPABASE_URL";
pub const STORE_KEY_VAR: &str = "SUPABASE_KEY";
pub const TABLE_VAR: &str = "TUBELEX_TABLE";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TABLE: &str = "en_videos";

/// Matches the socket timeout handed to yt-dlp.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Whole-request budget; a model reply for a full transcript can take a while.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared HTTP client. Every request gives up after `request_timeout`.
pub fn http_client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
        .timeout(request_timeout)
        .build()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Comma separated key list, parsed by `CredentialPool::from_list`.
    pub api_keys: String,
    pub model: String,
    pub api_base: String,
}

impl AnalyzerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Missing keys are not an error here; the credential pool warns and the
    /// analyzer refuses requests instead.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api_keys: lookup(API_KEYS_VAR).unwrap_or_default(),
            model: lookup(MODEL_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: lookup(API_BASE_VAR).unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
    pub table: String,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |env_var: &'static str| {
            lookup(env_var)
                .filter(|value| !value.trim().is_empty())
                .ok_or(TubelexError::MissingEnv { env_var })
        };

        Ok(Self {
            url: required(STORE_URL_VAR)?,
            key: required(STORE_KEY_VAR)?,
            table: lookup(TABLE_VAR).unwrap_or_else(|| DEFAULT_TABLE.to_string()),
        })
    }
}
