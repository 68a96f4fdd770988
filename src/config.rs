//! Environment-based configuration.
//!
//! Each section is built from environment variables in its own
//! `from_env`. Optional collaborators (reply mailbox, AI agent) return
//! `None` when their anchor variable is absent, and the caller disables
//! that feature with a log line instead of failing startup.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Telegram Bot API settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric ids allowed to talk to the bot; `*` allows all.
    pub allowed_users: Vec<String>,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = SecretString::from(required("TELEGRAM_TOKEN")?);
        let allowed_users: Vec<String> = std::env::var("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Self {
            bot_token,
            allowed_users,
        })
    }
}

/// Outbound SMTP settings for team notifications.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Display name on the From header.
    pub from_name: String,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = required("SMTP_HOST")?;
        let username = required("SMTP_USER")?;
        let password = SecretString::from(required("SMTP_PASS")?);
        let from_address =
            std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let from_name =
            std::env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "CAR KX3".to_string());
        Ok(Self {
            host,
            port: parsed_or("SMTP_PORT", 587),
            username,
            password,
            from_address,
            from_name,
        })
    }
}

/// Inbound reply mailbox (IMAP) settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub poll_interval_secs: u64,
    /// Fixed extra delay after a transport failure (no exponential backoff).
    pub retry_delay_secs: u64,
}

impl ImapConfig {
    /// `None` when `IMAP_HOST` is not set (reply polling disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("IMAP_HOST").ok()?;
        let username = std::env::var("IMAP_USER").unwrap_or_default();
        let password = SecretString::from(std::env::var("IMAP_PASS").unwrap_or_default());
        Some(Self {
            host,
            port: parsed_or("IMAP_PORT", 993),
            username,
            password,
            poll_interval_secs: parsed_or("IMAP_POLL_INTERVAL_SECS", 60),
            retry_delay_secs: parsed_or("IMAP_RETRY_DELAY_SECS", 10),
        })
    }
}

/// Spreadsheet ledger settings.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub api_token: SecretString,
}

impl SheetsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            spreadsheet_id: required("SHEET_ID")?,
            sheet_name: std::env::var("SHEET_NAME").unwrap_or_else(|_| "Chamados".to_string()),
            api_token: SecretString::from(required("SHEETS_API_TOKEN")?),
        })
    }
}

/// External conversational AI agent used for review summaries.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub base_url: String,
    pub agent_id: String,
    pub token: SecretString,
    /// Strict request timeout; the local fallback kicks in past this.
    pub timeout_secs: u64,
}

impl AgentConfig {
    /// `None` when `AGENT_API_URL` is not set (local fallback only).
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("AGENT_API_URL").ok()?;
        Some(Self {
            base_url,
            agent_id: std::env::var("AGENT_ID").unwrap_or_default(),
            token: SecretString::from(std::env::var("AGENT_TOKEN").unwrap_or_default()),
            timeout_secs: parsed_or("AGENT_TIMEOUT_SECS", 10),
        })
    }
}

/// Full bot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub smtp: SmtpConfig,
    pub sheets: SheetsConfig,
    pub imap: Option<ImapConfig>,
    pub agent: Option<AgentConfig>,
    /// Optional JSON catalog overriding the built-in routing table.
    pub catalog_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            telegram: TelegramConfig::from_env()?,
            smtp: SmtpConfig::from_env()?,
            sheets: SheetsConfig::from_env()?,
            imap: ImapConfig::from_env(),
            agent: AgentConfig::from_env(),
            catalog_path: std::env::var("CATALOG_PATH").ok().map(PathBuf::from),
        })
    }
}
