use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Domain not found: {domain}")]
    DomainNotFound { domain: String },

    #[error("Malformed upstream response: {message}")]
    MalformedResponse { message: String },

    #[error("Malformed account record{}: {reason}", account_suffix(.account))]
    MalformedRecord {
        account: Option<String>,
        reason: String,
    },

    #[error("Collection cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Metric reporting failed: {message}")]
    Report { message: String },
}

pub type Result<T> = std::result::Result<T, QuotaError>;

fn account_suffix(account: &Option<String>) -> String {
    account
        .as_deref()
        .map(|a| format!(" '{}'", a))
        .unwrap_or_default()
}

/// Failure kinds visible to callers of a collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    AuthError,
    TransportError,
    DomainNotFoundError,
    MalformedRecordError,
    Cancelled,
    ConfigurationError,
    ReportError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::AuthError,
        ErrorKind::TransportError,
        ErrorKind::DomainNotFoundError,
        ErrorKind::MalformedRecordError,
        ErrorKind::Cancelled,
        ErrorKind::ConfigurationError,
        ErrorKind::ReportError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthError => "AuthError",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::DomainNotFoundError => "DomainNotFoundError",
            ErrorKind::MalformedRecordError => "MalformedRecordError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::ReportError => "ReportError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Upstream,
    Data,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// 依嚴重程度決定 CLI 退出碼
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl QuotaError {
    pub fn cancelled_after(limit: Duration) -> Self {
        QuotaError::Cancelled {
            reason: format!("timed out after {:?}", limit),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QuotaError::Auth { .. } => ErrorKind::AuthError,
            QuotaError::Transport { .. }
            | QuotaError::Http(_)
            | QuotaError::MalformedResponse { .. } => ErrorKind::TransportError,
            QuotaError::DomainNotFound { .. } => ErrorKind::DomainNotFoundError,
            QuotaError::MalformedRecord { .. } => ErrorKind::MalformedRecordError,
            QuotaError::Cancelled { .. } => ErrorKind::Cancelled,
            QuotaError::ConfigError { .. }
            | QuotaError::ConfigValidationError { .. }
            | QuotaError::InvalidConfigValueError { .. }
            | QuotaError::MissingConfigError { .. } => ErrorKind::ConfigurationError,
            QuotaError::Io(_) | QuotaError::Report { .. } => ErrorKind::ReportError,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        kind_category(self.kind())
    }

    pub fn severity(&self) -> ErrorSeverity {
        kind_severity(self.kind())
    }

    pub fn is_retryable(&self) -> bool {
        self.severity() == ErrorSeverity::Medium
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        kind_recovery_suggestion(self.kind())
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            QuotaError::Auth { .. } => {
                "無法登入管理介面，請確認帳號密碼 (Admin authentication failed)".to_string()
            }
            QuotaError::DomainNotFound { domain } => {
                format!("伺服器上找不到網域 '{}' (Unknown domain)", domain)
            }
            QuotaError::Cancelled { reason } => format!("收集已中止: {}", reason),
            QuotaError::MissingConfigError { field } => format!("缺少必要設定: {}", field),
            other => other.to_string(),
        }
    }
}

pub fn kind_category(kind: ErrorKind) -> ErrorCategory {
    match kind {
        ErrorKind::AuthError | ErrorKind::TransportError | ErrorKind::Cancelled => {
            ErrorCategory::Upstream
        }
        ErrorKind::MalformedRecordError => ErrorCategory::Data,
        ErrorKind::DomainNotFoundError | ErrorKind::ConfigurationError => {
            ErrorCategory::Configuration
        }
        ErrorKind::ReportError => ErrorCategory::System,
    }
}

pub fn kind_severity(kind: ErrorKind) -> ErrorSeverity {
    match kind {
        ErrorKind::MalformedRecordError => ErrorSeverity::Low,
        ErrorKind::AuthError | ErrorKind::TransportError | ErrorKind::Cancelled => {
            ErrorSeverity::Medium
        }
        ErrorKind::DomainNotFoundError | ErrorKind::ConfigurationError => ErrorSeverity::High,
        ErrorKind::ReportError => ErrorSeverity::Critical,
    }
}

pub fn kind_recovery_suggestion(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::AuthError => "Check username/password and that the account holds admin rights",
        ErrorKind::TransportError => {
            "Check network reachability of endpoint_url; the next cycle will retry"
        }
        ErrorKind::DomainNotFoundError => {
            "Fix the 'domain' setting; retrying will not help until it exists upstream"
        }
        ErrorKind::MalformedRecordError => "Inspect the skipped accounts on the admin server",
        ErrorKind::Cancelled => "Raise timeout_seconds or reduce page_size",
        ErrorKind::ConfigurationError => "Review the configuration file",
        ErrorKind::ReportError => "Check the metric sink (statsd address or textfile path)",
    }
}
