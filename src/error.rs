//! Error types for the intake bot.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chat-channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Outbound notification (mail) errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build notification: {0}")]
    BuildFailed(String),

    #[error("SMTP send failed: {0}")]
    SendFailed(String),
}

/// Spreadsheet ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Ledger rejected write: {0}")]
    Rejected(String),

    #[error("No ledger row for protocol {protocol}")]
    RowNotFound { protocol: String },
}

/// Ticket registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Protocol {protocol} already registered")]
    ProtocolCollision { protocol: String },

    #[error("Conversation {conversation_id} already has active ticket {protocol}")]
    ActiveTicketExists {
        conversation_id: i64,
        protocol: String,
    },

    #[error("No ticket registered for protocol {protocol}")]
    NotFound { protocol: String },
}

/// External AI agent errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent request failed: {0}")]
    RequestFailed(String),

    #[error("Agent request timed out")]
    Timeout,

    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for the intake bot.
pub type Result<T> = std::result::Result<T, Error>;
