//! Runtime configuration, read from the environment (and `.env` through
//! `dotenvy` in `main`). Every setting has a default so a bare checkout runs.

use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::DEFAULT_TOKEN_TTL;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (port 465 style); STARTTLS otherwise.
    pub secure: bool,
    pub user: String,
    pub pass: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub allowed_origins: Vec<String>,
    pub trust_proxy: bool,
    pub production: bool,
    pub admin_user: String,
    pub admin_pass: String,
    pub token_secret: Option<String>,
    pub token_ttl: Duration,
    pub public_base_url: String,
    pub upload_max_bytes: usize,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub smtp: Option<SmtpConfig>,
    pub twilio: Option<TwilioConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: PathBuf::from("data"),
            uploads_dir: PathBuf::from("uploads"),
            frontend_dir: PathBuf::from("frontend"),
            allowed_origins: Vec::new(),
            trust_proxy: false,
            production: false,
            admin_user: "admin".into(),
            admin_pass: "admin1234".into(),
            token_secret: None,
            token_ttl: DEFAULT_TOKEN_TTL,
            public_base_url: String::new(),
            upload_max_bytes: 8 * 1024 * 1024,
            rate_limit_max: 25,
            rate_limit_window: Duration::from_secs(10 * 60),
            smtp: None,
            twilio: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Self {
            port: try_load("PORT", defaults.port)?,
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            uploads_dir: var("UPLOADS_DIR").map(PathBuf::from).unwrap_or(defaults.uploads_dir),
            frontend_dir: var("FRONTEND_DIR").map(PathBuf::from).unwrap_or(defaults.frontend_dir),
            allowed_origins: var("FRONTEND_ORIGIN")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            trust_proxy: load_flag("TRUST_PROXY", defaults.trust_proxy)?,
            production: var("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
            admin_user: var("ADMIN_USER").unwrap_or(defaults.admin_user),
            admin_pass: var("ADMIN_PASS").unwrap_or(defaults.admin_pass),
            token_secret: var("ADMIN_TOKEN_SECRET"),
            token_ttl: Duration::from_millis(try_load(
                "ADMIN_TOKEN_TTL_MS",
                defaults.token_ttl.as_millis() as u64,
            )?),
            public_base_url: var("PUBLIC_BASE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .unwrap_or_default(),
            upload_max_bytes: try_load("UPLOAD_MAX_BYTES", defaults.upload_max_bytes)?,
            rate_limit_max: try_load("RATE_LIMIT_MAX", defaults.rate_limit_max)?,
            rate_limit_window: Duration::from_millis(try_load(
                "RATE_LIMIT_WINDOW_MS",
                defaults.rate_limit_window.as_millis() as u64,
            )?),
            smtp: load_smtp()?,
            twilio: load_twilio(),
        })
    }
}

/// Email is enabled only when host, user, password and recipient are set.
fn load_smtp() -> Result<Option<SmtpConfig>, ConfigError> {
    let (Some(host), Some(user), Some(pass), Some(to)) = (
        var("SMTP_HOST"),
        var("SMTP_USER"),
        var("SMTP_PASS"),
        var("MAIL_TO"),
    ) else {
        debug!("SMTP not configured, email notifications disabled");
        return Ok(None);
    };

    Ok(Some(SmtpConfig {
        port: try_load("SMTP_PORT", 465)?,
        secure: load_flag("SMTP_SECURE", true)?,
        from: var("MAIL_FROM").unwrap_or_else(|| user.clone()),
        host,
        user,
        pass,
        to,
    }))
}

fn load_twilio() -> Option<TwilioConfig> {
    let config = TwilioConfig {
        account_sid: var("TWILIO_ACCOUNT_SID")?,
        auth_token: var("TWILIO_AUTH_TOKEN")?,
        from: var("TWILIO_WHATSAPP_FROM")?,
        to: var("TWILIO_WHATSAPP_TO")?,
    };
    Some(config)
}

/// Set and non-blank, trimmed.
fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn try_load<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        None => {
            debug!("{key} not set, using default: {default}");
            Ok(default)
        }
        Some(raw) => parse_value(key, &raw),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Booleans also accept `1/0`, `yes/no` and `on/off`, any case.
fn load_flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "yes" | "on" | "true" => Ok(true),
        "0" | "no" | "off" | "false" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".into(),
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
