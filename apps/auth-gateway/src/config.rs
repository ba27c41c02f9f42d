// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup and validated
//! into a [`Config`]. Any missing or invalid required value is a typed
//! [`ConfigError`]; `main` decides to abort.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SESSION_SECRET` | Cookie MAC key, at least 32 bytes | Required |
//! | `SESSION_TTL_SECS` | Session lifetime | Required |
//! | `TOKEN_TTL_SECS` | Default and maximum JWT lifetime | Required |
//! | `KEY_ROTATION_INTERVAL_SECS` | Age at which the signing key is rotated | Required |
//! | `KEY_GRACE_SECS` | Verification window for retired keys, at least `TOKEN_TTL_SECS` | Required |
//! | `GITHUB_CLIENT_ID` | GitHub OAuth app client id | Required |
//! | `GITHUB_CLIENT_SECRET` | GitHub OAuth app client secret | Required |
//! | `GITHUB_REDIRECT_URI` | Registered callback URL | Required |
//! | `TOKEN_ISSUER` | `iss` claim of issued JWTs | `auth-gateway` |
//! | `SESSION_SLIDING` | Renew session expiry on every use | `true` |
//! | `COOKIE_DOMAIN` | `Domain` attribute of the session cookie | unset |
//! | `COOKIE_SECURE` | `Secure` attribute of the session cookie | `true` |
//! | `OAUTH_AUTO_PROVISION` | Create local users on first OAuth login | `true` |
//! | `DATA_DIR` | Root directory for the database and key ring | `./data` |
//! | `MAINTENANCE_INTERVAL_SECS` | Period of the maintenance task | `60` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate chain and key | plain HTTP |
//! | `SEED_USER` | `username:password` of a development user | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;

use crate::auth::session::MIN_SECRET_BYTES;
use crate::oauth::GitHubSettings;

pub const SESSION_SECRET_ENV: &str = "SESSION_SECRET";
pub const SESSION_TTL_ENV: &str = "SESSION_TTL_SECS";
pub const TOKEN_TTL_ENV: &str = "TOKEN_TTL_SECS";
pub const KEY_ROTATION_INTERVAL_ENV: &str = "KEY_ROTATION_INTERVAL_SECS";
pub const KEY_GRACE_ENV: &str = "KEY_GRACE_SECS";
pub const GITHUB_CLIENT_ID_ENV: &str = "GITHUB_CLIENT_ID";
pub const GITHUB_CLIENT_SECRET_ENV: &str = "GITHUB_CLIENT_SECRET";
pub const GITHUB_REDIRECT_URI_ENV: &str = "GITHUB_REDIRECT_URI";
pub const TOKEN_ISSUER_ENV: &str = "TOKEN_ISSUER";
pub const SESSION_SLIDING_ENV: &str = "SESSION_SLIDING";
pub const COOKIE_DOMAIN_ENV: &str = "COOKIE_DOMAIN";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";
pub const OAUTH_AUTO_PROVISION_ENV: &str = "OAUTH_AUTO_PROVISION";

/// Environment variable name for the data directory path.
///
/// Holds `auth.redb` and `keys/signing-keys.json`.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const MAINTENANCE_INTERVAL_ENV: &str = "MAINTENANCE_INTERVAL_SECS";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const SEED_USER_ENV: &str = "SEED_USER";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_TOKEN_ISSUER: &str = "auth-gateway";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("SESSION_SECRET must be at least 32 bytes")]
    SecretTooShort,

    #[error("KEY_GRACE_SECS ({grace_secs}s) must not be shorter than TOKEN_TTL_SECS ({token_ttl_secs}s)")]
    GraceShorterThanTokenTtl { grace_secs: i64, token_ttl_secs: i64 },

    #[error("TLS_CERT_PATH and TLS_KEY_PATH must be set together")]
    IncompleteTls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Validated service configuration.
///
/// Not `Debug`: it carries the session secret and the OAuth client secret.
#[derive(Clone)]
pub struct Config {
    pub session_secret: Vec<u8>,
    pub session_ttl: Duration,
    pub session_sliding: bool,
    pub token_ttl: Duration,
    pub token_issuer: String,
    pub key_rotation_interval: Duration,
    pub key_grace: Duration,
    pub github: GitHubSettings,
    pub oauth_auto_provision: bool,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub data_dir: PathBuf,
    pub maintenance_interval: std::time::Duration,
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsPaths>,
    /// `username:password` of a development user to create at startup.
    pub seed_user: Option<(String, String)>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let session_secret = required(SESSION_SECRET_ENV)?.into_bytes();
        if session_secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::SecretTooShort);
        }

        let session_ttl = positive_secs(SESSION_TTL_ENV, &required(SESSION_TTL_ENV)?)?;
        let token_ttl = positive_secs(TOKEN_TTL_ENV, &required(TOKEN_TTL_ENV)?)?;
        let key_rotation_interval =
            positive_secs(KEY_ROTATION_INTERVAL_ENV, &required(KEY_ROTATION_INTERVAL_ENV)?)?;
        let key_grace = positive_secs(KEY_GRACE_ENV, &required(KEY_GRACE_ENV)?)?;

        // A retired key must stay verifiable for as long as its tokens live
        if key_grace < token_ttl {
            return Err(ConfigError::GraceShorterThanTokenTtl {
                grace_secs: key_grace.num_seconds(),
                token_ttl_secs: token_ttl.num_seconds(),
            });
        }

        let github = GitHubSettings {
            client_id: required(GITHUB_CLIENT_ID_ENV)?,
            client_secret: required(GITHUB_CLIENT_SECRET_ENV)?,
            redirect_uri: required(GITHUB_REDIRECT_URI_ENV)?,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        let seed_user = match get(SEED_USER_ENV) {
            Some(value) => match value.split_once(':') {
                Some((user, password)) if !user.is_empty() && !password.is_empty() => {
                    Some((user.to_string(), password.to_string()))
                }
                _ => {
                    return Err(ConfigError::Invalid {
                        name: SEED_USER_ENV,
                        reason: "expected username:password".to_string(),
                    })
                }
            },
            None => None,
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    reason: format!("expected json or pretty, got {other}"),
                })
            }
        };

        Ok(Self {
            session_secret,
            session_ttl,
            session_sliding: optional(&get, SESSION_SLIDING_ENV, true)?,
            token_ttl,
            token_issuer: get(TOKEN_ISSUER_ENV).unwrap_or_else(|| DEFAULT_TOKEN_ISSUER.to_string()),
            key_rotation_interval,
            key_grace,
            github,
            oauth_auto_provision: optional(&get, OAUTH_AUTO_PROVISION_ENV, true)?,
            cookie_domain: get(COOKIE_DOMAIN_ENV),
            cookie_secure: optional(&get, COOKIE_SECURE_ENV, true)?,
            data_dir: get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()).into(),
            maintenance_interval: std::time::Duration::from_secs(optional(
                &get,
                MAINTENANCE_INTERVAL_ENV,
                DEFAULT_MAINTENANCE_INTERVAL_SECS,
            )?),
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: optional(&get, PORT_ENV, 8080)?,
            tls,
            seed_user,
            log_format,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("auth.redb")
    }

    pub fn key_ring_path(&self) -> PathBuf {
        self.data_dir.join("keys").join("signing-keys.json")
    }
}

fn positive_secs(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<i64>().ok().filter(|secs| *secs > 0).and_then(Duration::try_seconds) {
        Some(duration) => Ok(duration),
        None => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a positive number of seconds, got {value:?}"),
        }),
    }
}

fn optional<T>(get: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
