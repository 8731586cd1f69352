//! Runtime configuration, read once from the environment at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::model::NotWhitelistedPolicy;

pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_STATUS_ATTEMPTS: u32 = 2;
pub const DEFAULT_SENTINEL_USERNAME: &str = "Server";
pub const DEFAULT_AUTH_SERVER_URL: &str = "https://authserver.mojang.com";
pub const DEFAULT_SESSION_SERVER_URL: &str = "https://sessionserver.mojang.com";
pub const DEFAULT_REPORT_EVERY: u64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub probe_timeout: Duration,
    pub status_attempts: u32,
    pub sentinel_username: String,
    pub not_whitelisted_policy: NotWhitelistedPolicy,
    pub auth_server_url: String,
    pub session_server_url: String,
    pub max_cycles: Option<u64>,
    pub report_every: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let status_attempts = parse_or("STATUS_ATTEMPTS", get("STATUS_ATTEMPTS"), DEFAULT_STATUS_ATTEMPTS)?;
        if status_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "STATUS_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            probe_timeout: Duration::from_millis(parse_or(
                "PROBE_TIMEOUT_MS",
                get("PROBE_TIMEOUT_MS"),
                DEFAULT_PROBE_TIMEOUT_MS,
            )?),
            status_attempts,
            sentinel_username: get("SENTINEL_USERNAME")
                .unwrap_or_else(|| DEFAULT_SENTINEL_USERNAME.to_string()),
            not_whitelisted_policy: parse_or(
                "NOT_WHITELISTED_POLICY",
                get("NOT_WHITELISTED_POLICY"),
                NotWhitelistedPolicy::default(),
            )?,
            auth_server_url: get("AUTH_SERVER_URL")
                .unwrap_or_else(|| DEFAULT_AUTH_SERVER_URL.to_string()),
            session_server_url: get("SESSION_SERVER_URL")
                .unwrap_or_else(|| DEFAULT_SESSION_SERVER_URL.to_string()),
            max_cycles: get("MAX_CYCLES")
                .map(|v| parse_value("MAX_CYCLES", v))
                .transpose()?,
            report_every: parse_or("REPORT_EVERY", get("REPORT_EVERY"), DEFAULT_REPORT_EVERY)?,
        })
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn parse_or<T: FromStr>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(v) => parse_value(key, v),
        None => Ok(default),
    }
}
