//! Runtime configuration for the admin category service.
//!
//! Everything comes from the environment (a `.env` file is loaded first by
//! `main`). Parsing goes through a lookup closure so it can be exercised
//! without touching the process environment.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_INDENT_GLYPH: &str = "—";
const DEFAULT_EXPORT_NAME: &str = "categories";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct AdminConfig {
    /// Base URL of the BuyBot API, without trailing slash.
    pub api_base_url: String,
    pub bind_addr: SocketAddr,
    /// Repeated once per depth level in category picker labels.
    pub indent_glyph: String,
    /// File name stem for CSV downloads.
    pub export_name: String,
    pub request_timeout: Duration,
}

impl AdminConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_base_url = var("BUYBOT_API_BASE_URL")
            .context("BUYBOT_API_BASE_URL environment variable not set")?
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            anyhow::bail!("BUYBOT_API_BASE_URL must be an http(s) URL: {}", api_base_url);
        }

        let bind_addr = var("BUYBOT_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BUYBOT_BIND_ADDR is not a valid socket address")?;

        let indent_glyph = lookup("BUYBOT_INDENT_GLYPH")
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| DEFAULT_INDENT_GLYPH.to_string());

        let export_name = var("BUYBOT_EXPORT_NAME")
            .unwrap_or_else(|| DEFAULT_EXPORT_NAME.to_string());

        let timeout_secs = match var("BUYBOT_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .with_context(|| {
                    format!("BUYBOT_REQUEST_TIMEOUT_SECS must be a positive integer, got {:?}", raw)
                })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            api_base_url,
            bind_addr,
            indent_glyph,
            export_name,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
