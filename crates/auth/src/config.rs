//! Auth core configuration.
//!
//! Defaults suit production; `from_env` overrides them from `WARDEN_*`
//! variables.

use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

pub const ENV_SESSION_TTL_SECS: &str = "WARDEN_SESSION_TTL_SECS";
pub const ENV_TOKEN_TTL_SECS: &str = "WARDEN_TOKEN_TTL_SECS";
pub const ENV_REAP_INTERVAL_SECS: &str = "WARDEN_REAP_INTERVAL_SECS";
pub const ENV_ARGON2_MEMORY_KIB: &str = "WARDEN_ARGON2_MEMORY_KIB";
pub const ENV_ARGON2_ITERATIONS: &str = "WARDEN_ARGON2_ITERATIONS";

/// Argon2id cost parameters used when hashing new passwords.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PasswordCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl PasswordCost {
    /// Smallest parameters argon2 accepts. Only for tests/dev.
    pub const fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

impl Default for PasswordCost {
    fn default() -> Self {
        // argon2 crate defaults (OWASP baseline).
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Lifetime of a login session.
    pub session_ttl: Duration,
    /// Lifetime of verification / password reset tokens.
    pub token_ttl: Duration,
    /// How often the background reaper purges expired sessions and tokens.
    pub reap_interval: StdDuration,
    pub password_cost: PasswordCost,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::hours(1),
            token_ttl: Duration::minutes(15),
            reap_interval: StdDuration::from_secs(10 * 60),
            password_cost: PasswordCost::default(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: i64 },

    #[error("{name} is out of range, got {value}")]
    OutOfRange { name: &'static str, value: i64 },
}

impl AuthConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`; unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<i64, _>(&lookup, ENV_SESSION_TTL_SECS) {
            config.session_ttl = positive_seconds(ENV_SESSION_TTL_SECS, secs)?;
        }
        if let Some(secs) = parse_var::<i64, _>(&lookup, ENV_TOKEN_TTL_SECS) {
            config.token_ttl = positive_seconds(ENV_TOKEN_TTL_SECS, secs)?;
        }
        if let Some(secs) = parse_var::<i64, _>(&lookup, ENV_REAP_INTERVAL_SECS) {
            positive_seconds(ENV_REAP_INTERVAL_SECS, secs)?;
            config.reap_interval = StdDuration::from_secs(secs.unsigned_abs());
        }
        if let Some(kib) = parse_var::<u32, _>(&lookup, ENV_ARGON2_MEMORY_KIB) {
            config.password_cost.memory_kib = kib;
        }
        if let Some(iterations) = parse_var::<u32, _>(&lookup, ENV_ARGON2_ITERATIONS) {
            config.password_cost.iterations = iterations;
        }

        Ok(config)
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_password_cost(mut self, cost: PasswordCost) -> Self {
        self.password_cost = cost;
        self
    }

    pub fn with_reap_interval(mut self, interval: StdDuration) -> Self {
        self.reap_interval = interval;
        self
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Option<T>
where
    T: core::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}

fn positive_seconds(name: &'static str, secs: i64) -> Result<Duration, ConfigError> {
    if secs <= 0 {
        return Err(ConfigError::NonPositive { name, value: secs });
    }
    Duration::try_seconds(secs).ok_or(ConfigError::OutOfRange { name, value: secs })
}
