// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Settings are loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AUTH_ISSUER` | Trusted token issuer | Required |
//! | `AUTH_AUDIENCES` | Comma-separated accepted audiences | Required |
//! | `AUTH_JWKS_URL` | Signing key set endpoint (`https`; `http` only for loopback) | Required |
//! | `AUTH_KEY_CACHE_TTL_SECS` | Key cache lifetime | `300` |
//! | `AUTH_KEY_REFRESH_INTERVAL_SECS` | Scheduled key refresh period | cache TTL |
//! | `AUTH_JWKS_FETCH_TIMEOUT_SECS` | Key set fetch timeout | `10` |
//! | `AUTH_KEY_MISS_REFRESH_SECS` | Minimum gap between unknown-`kid` refreshes (`0` disables) | `10` |
//! | `AUTH_CLOCK_SKEW_SECS` | Expiry skew tolerance | `5` |
//! | `AUTH_ADMIN_SCOPE` | Scope required by the admin routes | `admin` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use url::{Host, Url};

use crate::auth::jwks::{DEFAULT_CACHE_TTL, DEFAULT_FETCH_TIMEOUT, DEFAULT_MISS_REFRESH_INTERVAL};
use crate::auth::verifier::DEFAULT_CLOCK_SKEW;

pub const AUTH_ISSUER_ENV: &str = "AUTH_ISSUER";
pub const AUTH_AUDIENCES_ENV: &str = "AUTH_AUDIENCES";
pub const AUTH_JWKS_URL_ENV: &str = "AUTH_JWKS_URL";
pub const AUTH_KEY_CACHE_TTL_ENV: &str = "AUTH_KEY_CACHE_TTL_SECS";
pub const AUTH_KEY_REFRESH_INTERVAL_ENV: &str = "AUTH_KEY_REFRESH_INTERVAL_SECS";
pub const AUTH_JWKS_FETCH_TIMEOUT_ENV: &str = "AUTH_JWKS_FETCH_TIMEOUT_SECS";
pub const AUTH_KEY_MISS_REFRESH_ENV: &str = "AUTH_KEY_MISS_REFRESH_SECS";
pub const AUTH_CLOCK_SKEW_ENV: &str = "AUTH_CLOCK_SKEW_SECS";
pub const AUTH_ADMIN_SCOPE_ENV: &str = "AUTH_ADMIN_SCOPE";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ADMIN_SCOPE: &str = "admin";

/// Default `RUST_LOG` filter when the variable is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Upper bound for `AUTH_CLOCK_SKEW_SECS`.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },

    #[error("Insecure JWKS URL {0}: https is required unless the host is loopback")]
    InsecureJwksUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Token verification settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub issuer: String,
    pub audiences: Vec<String>,
    pub jwks_url: Url,
    pub key_cache_ttl: Duration,
    pub key_refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub miss_refresh_interval: Duration,
    pub clock_skew: Duration,
    pub admin_scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub auth: AuthSettings,
    pub server: ServerSettings,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load settings from a map (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            auth: AuthSettings::from_vars(vars)?,
            server: ServerSettings::from_vars(vars)?,
        })
    }
}

impl AuthSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer = required(vars, AUTH_ISSUER_ENV)?.to_string();

        let audiences: Vec<String> = required(vars, AUTH_AUDIENCES_ENV)?
            .split(',')
            .map(str::trim)
            .filter(|aud| !aud.is_empty())
            .map(str::to_string)
            .collect();
        if audiences.is_empty() {
            return Err(ConfigError::InvalidValue {
                var: AUTH_AUDIENCES_ENV,
                reason: "at least one audience is required".to_string(),
            });
        }

        let jwks_url = parse_jwks_url(required(vars, AUTH_JWKS_URL_ENV)?)?;

        let key_cache_ttl = positive_secs(vars, AUTH_KEY_CACHE_TTL_ENV)?.unwrap_or(DEFAULT_CACHE_TTL);
        let key_refresh_interval =
            positive_secs(vars, AUTH_KEY_REFRESH_INTERVAL_ENV)?.unwrap_or(key_cache_ttl);
        let fetch_timeout =
            positive_secs(vars, AUTH_JWKS_FETCH_TIMEOUT_ENV)?.unwrap_or(DEFAULT_FETCH_TIMEOUT);
        let miss_refresh_interval = match vars.get(AUTH_KEY_MISS_REFRESH_ENV) {
            Some(raw) => Duration::from_secs(parse_u64(AUTH_KEY_MISS_REFRESH_ENV, raw)?),
            None => DEFAULT_MISS_REFRESH_INTERVAL,
        };

        let clock_skew = match vars.get(AUTH_CLOCK_SKEW_ENV) {
            Some(raw) => {
                let skew = Duration::from_secs(parse_u64(AUTH_CLOCK_SKEW_ENV, raw)?);
                if skew > MAX_CLOCK_SKEW {
                    return Err(ConfigError::InvalidValue {
                        var: AUTH_CLOCK_SKEW_ENV,
                        reason: format!("must not exceed {} seconds", MAX_CLOCK_SKEW.as_secs()),
                    });
                }
                skew
            }
            None => DEFAULT_CLOCK_SKEW,
        };

        let admin_scope = vars
            .get(AUTH_ADMIN_SCOPE_ENV)
            .map(|scope| scope.trim())
            .filter(|scope| !scope.is_empty())
            .unwrap_or(DEFAULT_ADMIN_SCOPE)
            .to_string();

        Ok(Self {
            issuer,
            audiences,
            jwks_url,
            key_cache_ttl,
            key_refresh_interval,
            fetch_timeout,
            miss_refresh_interval,
            clock_skew,
            admin_scope,
        })
    }
}

impl ServerSettings {
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let host = vars
            .get(HOST_ENV)
            .cloned()
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match vars.get(PORT_ENV) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                var: PORT_ENV,
                reason: format!("'{raw}': {e}"),
            })?,
            None => DEFAULT_PORT,
        };

        let log_format = match vars.get(LOG_FORMAT_ENV).map(|f| f.trim().to_ascii_lowercase()) {
            None => LogFormat::default(),
            Some(format) if format == "json" => LogFormat::Json,
            Some(format) if format == "pretty" => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    var: LOG_FORMAT_ENV,
                    reason: format!("expected 'json' or 'pretty', got '{other}'"),
                })
            }
        };

        Ok(Self {
            host,
            port,
            log_format,
        })
    }
}

fn required<'a>(
    vars: &'a HashMap<String, String>,
    var: &'static str,
) -> Result<&'a str, ConfigError> {
    vars.get(var)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingEnvVar(var))
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        var,
        reason: format!("'{raw}': {e}"),
    })
}

fn positive_secs(
    vars: &HashMap<String, String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = vars.get(var) else {
        return Ok(None);
    };
    match parse_u64(var, raw)? {
        0 => Err(ConfigError::InvalidValue {
            var,
            reason: "must be greater than 0".to_string(),
        }),
        secs => Ok(Some(Duration::from_secs(secs))),
    }
}

/// Key sets must come over TLS; plain HTTP is accepted for local providers.
fn parse_jwks_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        var: AUTH_JWKS_URL_ENV,
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback(&url) => Ok(url),
        "http" => Err(ConfigError::InsecureJwksUrl(raw.to_string())),
        other => Err(ConfigError::InvalidValue {
            var: AUTH_JWKS_URL_ENV,
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}
