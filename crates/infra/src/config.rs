//! Environment-driven configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `ORGGUARD_ENV` | `development` |
//! | `ORGGUARD_POLICY_STORE_URL` | unset (in-memory policy store) |
//! | `ORGGUARD_POLICY_TIMEOUT_MS` | `2000` |
//! | `ORGGUARD_STRICT_RESOLUTION` | `false` |
//! | `ORGGUARD_CROSS_CHECK` | `off` |
//! | `ORGGUARD_LEGACY_BYPASS` | `false` |
//! | `ORGGUARD_ADMIN_EMAIL` | unset |
//! | `ORGGUARD_JWT_SECRET` | unset (required in production) |
//! | `ORGGUARD_BIND_ADDR` | `0.0.0.0:8080` |
//! | `ORGGUARD_AUDIT_CAPACITY` | `10000` (entries kept in memory) |

use std::time::Duration;

use thiserror::Error;

use crate::audit_log::DEFAULT_AUDIT_CAPACITY;
use orgguard_auth::{BypassPolicy, CrossCheck, Environment, GuardConfig, LegacyBypass, ResolutionMode};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_POLICY_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is required")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzConfig {
    pub environment: Environment,
    pub policy_store_url: Option<String>,
    pub policy_timeout: Duration,
    pub mode: ResolutionMode,
    pub cross_check: CrossCheck,
    pub legacy_bypass: bool,
    pub admin_email: Option<String>,
    pub jwt_secret: Option<String>,
    pub bind_addr: String,
    pub audit_capacity: usize,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            policy_store_url: None,
            policy_timeout: Duration::from_millis(DEFAULT_POLICY_TIMEOUT_MS),
            mode: ResolutionMode::Compatible,
            cross_check: CrossCheck::Off,
            legacy_bypass: false,
            admin_email: None,
            jwt_secret: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let environment = match get("ORGGUARD_ENV") {
            None => defaults.environment,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "development" | "dev" => Environment::Development,
                "production" | "prod" => Environment::Production,
                _ => return Err(invalid("ORGGUARD_ENV", v)),
            },
        };

        let policy_timeout = match get("ORGGUARD_POLICY_TIMEOUT_MS") {
            None => defaults.policy_timeout,
            Some(v) => match v.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => return Err(invalid("ORGGUARD_POLICY_TIMEOUT_MS", v)),
            },
        };

        let mode = if flag(get("ORGGUARD_STRICT_RESOLUTION"), "ORGGUARD_STRICT_RESOLUTION")? {
            ResolutionMode::Strict
        } else {
            ResolutionMode::Compatible
        };

        let cross_check = match get("ORGGUARD_CROSS_CHECK") {
            None => defaults.cross_check,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "off" | "false" | "0" => CrossCheck::Off,
                "require" | "required" | "true" | "1" => CrossCheck::Require,
                _ => return Err(invalid("ORGGUARD_CROSS_CHECK", v)),
            },
        };

        let audit_capacity = match get("ORGGUARD_AUDIT_CAPACITY") {
            None => defaults.audit_capacity,
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("ORGGUARD_AUDIT_CAPACITY", v)),
            },
        };

        let jwt_secret = get("ORGGUARD_JWT_SECRET");
        if environment == Environment::Production && jwt_secret.is_none() {
            return Err(ConfigError::Missing {
                var: "ORGGUARD_JWT_SECRET",
            });
        }

        Ok(Self {
            environment,
            policy_store_url: get("ORGGUARD_POLICY_STORE_URL"),
            policy_timeout,
            mode,
            cross_check,
            legacy_bypass: flag(get("ORGGUARD_LEGACY_BYPASS"), "ORGGUARD_LEGACY_BYPASS")?,
            admin_email: get("ORGGUARD_ADMIN_EMAIL"),
            jwt_secret,
            bind_addr: get("ORGGUARD_BIND_ADDR").unwrap_or(defaults.bind_addr),
            audit_capacity,
        })
    }

    pub fn guard_config(&self) -> GuardConfig {
        let legacy_literal_bypass = self.legacy_bypass.then(|| LegacyBypass {
            admin_email: self.admin_email.clone(),
            ..LegacyBypass::default()
        });
        GuardConfig {
            mode: self.mode,
            bypass: BypassPolicy {
                honor_super_admin_flag: true,
                legacy_literal_bypass,
            },
            cross_check: self.cross_check,
            environment: self.environment,
        }
    }
}

fn invalid(var: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { var, value }
}

fn flag(value: Option<String>, var: &'static str) -> Result<bool, ConfigError> {
    match value {
        None => Ok(false),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(var, v)),
        },
    }
}
