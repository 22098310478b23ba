//! Top-level configuration, loaded from TOML with environment overrides.
//!
//! Mirrors the contract of §6: configuration variable names and defaults are
//! part of the system's external interface, not an implementation detail.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timezone: TimezoneConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, crate::error::Error> {
        toml::from_str(raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    /// Overlay environment variables documented in §6 on top of the parsed
    /// file config. Env vars win when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEBSOCKET_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse() {
                self.watchdog.websocket_timeout_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("EXECUTION_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse() {
                self.watchdog.execution_timeout_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("TIME_ZONE") {
            self.timezone.time_zone = v;
        }
        if let Ok(v) = std::env::var("USE_TZ") {
            self.timezone.use_tz = matches!(v.as_str(), "1" | "true" | "True" | "TRUE");
        }
        if let Ok(v) = std::env::var("NOTIFICATION_EMAIL") {
            self.notify.notification_email = v;
        }
        if let Ok(v) = std::env::var("EMAIL_API_URL") {
            self.notify.email_api_url = v;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
        }
    }
}

fn d_port() -> u16 {
    8420
}

fn d_host() -> String {
    "127.0.0.1".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timezone (C1 anchors)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimezoneConfig {
    /// Local zone `L`, e.g. "Asia/Shanghai".
    #[serde(default = "d_time_zone")]
    pub time_zone: String,
    /// Selects scheduler zone `S`: UTC when true, else `L`.
    #[serde(default)]
    pub use_tz: bool,
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            time_zone: d_time_zone(),
            use_tz: false,
        }
    }
}

fn d_time_zone() -> String {
    "Asia/Shanghai".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Watchdogs (C7)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// `W` — session-alive timeout in seconds.
    #[serde(default = "d_websocket_timeout")]
    pub websocket_timeout_seconds: u64,
    /// `E` — per-dispatch execution timeout in seconds.
    #[serde(default = "d_execution_timeout")]
    pub execution_timeout_seconds: u64,
    /// Retention window for externally-stored execution history, before GC.
    #[serde(default = "d_job_log_max_age")]
    pub job_log_max_age_seconds: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            websocket_timeout_seconds: d_websocket_timeout(),
            execution_timeout_seconds: d_execution_timeout(),
            job_log_max_age_seconds: d_job_log_max_age(),
        }
    }
}

fn d_websocket_timeout() -> u64 {
    120
}

fn d_execution_timeout() -> u64 {
    120
}

fn d_job_log_max_age() -> u64 {
    604_800
}

impl WatchdogConfig {
    /// Stale-session / execution-timeout sweep interval: `max(30, W/2)`.
    pub fn stale_session_sweep_interval_seconds(&self) -> u64 {
        std::cmp::max(30, self.websocket_timeout_seconds / 2)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notifier (C8)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Default destination for C8 notifications. Required for production use.
    #[serde(default)]
    pub notification_email: String,
    /// External mail gateway base URL. Required for production use.
    #[serde(default)]
    pub email_api_url: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.timezone.time_zone.parse::<chrono_tz::Tz>().is_err() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "timezone.time_zone".into(),
                message: format!("unknown IANA zone \"{}\"", self.timezone.time_zone),
            });
        }

        if self.watchdog.websocket_timeout_seconds == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "watchdog.websocket_timeout_seconds".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.watchdog.execution_timeout_seconds == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "watchdog.execution_timeout_seconds".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.notify.notification_email.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "notify.notification_email".into(),
                message: "NOTIFICATION_EMAIL is required".into(),
            });
        }
        if self.notify.email_api_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "notify.email_api_url".into(),
                message: "EMAIL_API_URL is required".into(),
            });
        } else if !self.notify.email_api_url.starts_with("http://")
            && !self.notify.email_api_url.starts_with("https://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "notify.email_api_url".into(),
                message: format!(
                    "must start with http:// or https:// (got \"{}\")",
                    self.notify.email_api_url
                ),
            });
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        errors
    }
}
