/// Configuration management for the HUMBL Girls Club core
use crate::error::{ClubError, ClubResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on `session.max_retries`
pub const MAX_SESSION_RETRIES: u32 = 10;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClubConfig {
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

/// Hosted backend (Supabase) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL, e.g. https://xyzcompany.supabase.co
    pub url: String,
    /// Public anon key sent as `apikey`
    pub anon_key: String,
    pub request_timeout: Duration,
    pub user_agent: String,
}

/// Session/authorization context timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Deadline for a single "get current session" attempt
    pub fetch_timeout: Duration,
    /// Hard upper bound on the initializing phase
    pub watchdog_timeout: Duration,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Backoff grows by this step per attempt (2s, 4s, 6s, ...)
    pub retry_step: Duration,
    pub admin_check_timeout: Duration,
}

/// Audit log dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub queue_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(8),
            watchdog_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_step: Duration::from_secs(2),
            admin_check_timeout: Duration::from_secs(8),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ClubConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ClubResult<Self> {
        dotenv::dotenv().ok();

        let url = env::var("SUPABASE_URL")
            .map_err(|_| ClubError::Config("SUPABASE_URL is required".to_string()))?;
        let anon_key = env::var("SUPABASE_ANON_KEY")
            .map_err(|_| ClubError::Config("SUPABASE_ANON_KEY is required".to_string()))?;

        let backend = BackendConfig {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            request_timeout: Duration::from_secs(parse_var("HUMBL_REQUEST_TIMEOUT_SECS", 30)?),
            user_agent: env::var("HUMBL_USER_AGENT")
                .unwrap_or_else(|_| format!("humbl-club/{}", env!("CARGO_PKG_VERSION"))),
        };

        let session = SessionConfig {
            fetch_timeout: Duration::from_millis(parse_var("HUMBL_SESSION_FETCH_TIMEOUT_MS", 8_000)?),
            watchdog_timeout: Duration::from_millis(parse_var("HUMBL_SESSION_WATCHDOG_MS", 10_000)?),
            max_retries: parse_var("HUMBL_SESSION_MAX_RETRIES", 3)?,
            retry_step: Duration::from_millis(parse_var("HUMBL_SESSION_RETRY_STEP_MS", 2_000)?),
            admin_check_timeout: Duration::from_millis(parse_var(
                "HUMBL_ADMIN_CHECK_TIMEOUT_MS",
                8_000,
            )?),
        };

        let audit = AuditConfig {
            queue_capacity: parse_var("HUMBL_AUDIT_QUEUE_CAPACITY", 256)?,
        };

        let logging = LoggingConfig {
            level: env::var("HUMBL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            json: parse_var("HUMBL_LOG_JSON", false)?,
        };

        let config = Self {
            backend,
            session,
            audit,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration for the embedded backend, which needs no URL or key
    pub fn local() -> Self {
        Self {
            backend: BackendConfig {
                url: "http://localhost".to_string(),
                anon_key: "local".to_string(),
                request_timeout: Duration::from_secs(30),
                user_agent: format!("humbl-club/{}", env!("CARGO_PKG_VERSION")),
            },
            session: SessionConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ClubResult<()> {
        if !(self.backend.url.starts_with("http://") || self.backend.url.starts_with("https://")) {
            return Err(ClubError::Config(format!(
                "Backend URL must be http(s): {}",
                self.backend.url
            )));
        }

        if self.backend.anon_key.trim().is_empty() {
            return Err(ClubError::Config("Anon key cannot be empty".to_string()));
        }

        if self.backend.request_timeout.is_zero() {
            return Err(ClubError::Config("Request timeout must be positive".to_string()));
        }

        if self.session.fetch_timeout.is_zero() || self.session.watchdog_timeout.is_zero() {
            return Err(ClubError::Config("Session timeouts must be positive".to_string()));
        }

        if self.session.max_retries > MAX_SESSION_RETRIES {
            return Err(ClubError::Config(format!(
                "Session retries cannot exceed {}",
                MAX_SESSION_RETRIES
            )));
        }

        if self.session.admin_check_timeout.is_zero() {
            return Err(ClubError::Config(
                "Admin check timeout must be positive".to_string(),
            ));
        }

        if self.audit.queue_capacity == 0 {
            return Err(ClubError::Config("Audit queue capacity must be positive".to_string()));
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> ClubResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ClubError::Config(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_timing() {
        let session = SessionConfig::default();
        assert_eq!(session.fetch_timeout, Duration::from_secs(8));
        assert_eq!(session.watchdog_timeout, Duration::from_secs(10));
        assert_eq!(session.max_retries, 3);
        assert_eq!(session.retry_step, Duration::from_secs(2));
    }

    #[test]
    fn test_local_config_is_valid() {
        assert!(ClubConfig::local().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClubConfig::local();
        config.backend.url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = ClubConfig::local();
        config.backend.anon_key = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = ClubConfig::local();
        config.audit.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = ClubConfig::local();
        config.session.watchdog_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_caps_session_retries() {
        let mut config = ClubConfig::local();
        config.session.max_retries = MAX_SESSION_RETRIES;
        assert!(config.validate().is_ok());

        config.session.max_retries = u32::MAX;
        assert!(config.validate().is_err());
    }
}
