//!
//! podium-auth configuration
//! -------------------------
//! Defaults, overridden by environment variables, overridden by CLI flags.
//!
//! | flag                       | env                           | default                                   |
//! |----------------------------|-------------------------------|-------------------------------------------|
//! | `--api-url URL`            | `PODIUM_API_URL`              | `http://localhost:5000/api`               |
//! | `--auth-provider PATH`     | `PODIUM_AUTH_PROVIDER_PATH`   | `firebase`                                |
//! | `--idp-url URL`            | `PODIUM_IDP_URL`              | `https://identitytoolkit.googleapis.com/v1` |
//! | `--idp-token-url URL`      | `PODIUM_IDP_TOKEN_URL`        | `https://securetoken.googleapis.com/v1`   |
//! | `--idp-api-key KEY`        | `PODIUM_IDP_API_KEY`          | (empty)                                   |
//! | `--store PATH`             | `PODIUM_STORE_PATH`           | `~/.podium/session.json`                  |
//! | `--[no-]exchange-on-bootstrap` | `PODIUM_EXCHANGE_ON_BOOTSTRAP` | `true`                               |
//! | `--password-min-length N`  | `PODIUM_PASSWORD_MIN_LENGTH`  | `6`                                       |
//! | `--timeout-secs N`         | `PODIUM_HTTP_TIMEOUT_SECS`    | `10`                                      |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::identity::SessionOptions;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub api_url: String,
    pub auth_provider_path: String,
    pub idp_url: String,
    pub idp_token_url: String,
    pub idp_api_key: String,
    pub store_path: PathBuf,
    pub exchange_on_bootstrap: bool,
    pub password_min_length: usize,
    pub http_timeout: Duration,
}

fn default_store_path() -> PathBuf {
    let home = env::var("HOME").or_else(|_| env::var("USERPROFILE")).unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".podium").join("session.json")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".into(),
            auth_provider_path: "firebase".into(),
            idp_url: "https://identitytoolkit.googleapis.com/v1".into(),
            idp_token_url: "https://securetoken.googleapis.com/v1".into(),
            idp_api_key: String::new(),
            store_path: default_store_path(),
            exchange_on_bootstrap: true,
            password_min_length: 6,
            http_timeout: Duration::from_secs(10),
        }
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool_env(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_bool(&v))
}

fn parse_num_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Value following `flag`, e.g. `--api-url http://x`.
fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

impl SessionConfig {
    /// Defaults overlaid with `PODIUM_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = non_empty_env("PODIUM_API_URL") { cfg.api_url = v; }
        if let Some(v) = non_empty_env("PODIUM_AUTH_PROVIDER_PATH") { cfg.auth_provider_path = v; }
        if let Some(v) = non_empty_env("PODIUM_IDP_URL") { cfg.idp_url = v; }
        if let Some(v) = non_empty_env("PODIUM_IDP_TOKEN_URL") { cfg.idp_token_url = v; }
        if let Some(v) = non_empty_env("PODIUM_IDP_API_KEY") { cfg.idp_api_key = v; }
        if let Some(v) = non_empty_env("PODIUM_STORE_PATH") { cfg.store_path = PathBuf::from(v); }
        if let Some(v) = parse_bool_env("PODIUM_EXCHANGE_ON_BOOTSTRAP") { cfg.exchange_on_bootstrap = v; }
        if let Some(v) = parse_num_env::<usize>("PODIUM_PASSWORD_MIN_LENGTH") { cfg.password_min_length = v; }
        if let Some(v) = parse_num_env::<u64>("PODIUM_HTTP_TIMEOUT_SECS") { cfg.http_timeout = Duration::from_secs(v); }
        cfg
    }

    /// Apply CLI flags on top (flags win over environment).
    pub fn apply_args(mut self, args: &[String]) -> Result<Self> {
        if let Some(v) = arg_value(args, "--api-url") { self.api_url = v.to_string(); }
        if let Some(v) = arg_value(args, "--auth-provider") { self.auth_provider_path = v.to_string(); }
        if let Some(v) = arg_value(args, "--idp-url") { self.idp_url = v.to_string(); }
        if let Some(v) = arg_value(args, "--idp-token-url") { self.idp_token_url = v.to_string(); }
        if let Some(v) = arg_value(args, "--idp-api-key") { self.idp_api_key = v.to_string(); }
        if let Some(v) = arg_value(args, "--store") { self.store_path = PathBuf::from(v); }
        if has_flag(args, "--exchange-on-bootstrap") { self.exchange_on_bootstrap = true; }
        if has_flag(args, "--no-exchange-on-bootstrap") { self.exchange_on_bootstrap = false; }
        if let Some(v) = arg_value(args, "--password-min-length") {
            self.password_min_length = v.parse().map_err(|_| anyhow!("--password-min-length expects a number, got '{}'", v))?;
        }
        if let Some(v) = arg_value(args, "--timeout-secs") {
            let secs: u64 = v.parse().map_err(|_| anyhow!("--timeout-secs expects a number, got '{}'", v))?;
            self.http_timeout = Duration::from_secs(secs);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("api url", &self.api_url), ("idp url", &self.idp_url), ("idp token url", &self.idp_token_url)] {
            reqwest::Url::parse(url).map_err(|e| anyhow!("invalid {} '{}': {}", name, url, e))?;
        }
        if self.auth_provider_path.trim_matches('/').is_empty() {
            return Err(anyhow!("auth provider path must not be empty"));
        }
        if self.password_min_length == 0 {
            return Err(anyhow!("password minimum length must be at least 1"));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            exchange_on_bootstrap: self.exchange_on_bootstrap,
            password_min_length: self.password_min_length,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
