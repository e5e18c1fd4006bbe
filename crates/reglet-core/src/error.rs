//! Closed error taxonomy shared by every component.
//!
//! `RegletError` is the only error type that crosses a public boundary in
//! this crate — host functions, the engine, and the capability manager all
//! return `Result<_, RegletError>` rather than `anyhow::Error` or a raw
//! `Box<dyn Error>`. Each variant corresponds to one of the semantic error
//! kinds in the wire protocol (`ErrorType`) so a value can be round-tripped
//! across the WASM boundary without losing its category.

use std::fmt;

/// The semantic error category carried in a wire response envelope.
///
/// This is the `type` field of `ErrorDetail` (see [`crate::wire`]) and is
/// what the CLI prints in brackets ahead of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Internal,
    Config,
    Capability,
    Network,
    Timeout,
    Execution,
    SsrfProtection,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Internal => "internal",
            ErrorType::Config => "config",
            ErrorType::Capability => "capability",
            ErrorType::Network => "network",
            ErrorType::Timeout => "timeout",
            ErrorType::Execution => "execution",
            ErrorType::SsrfProtection => "ssrf_protection",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The crate's single error type.
///
/// Every variant maps 1:1 onto an [`ErrorType`]. `code` is an optional
/// machine-readable sub-code (e.g. `ETIMEDOUT`) preserved across the wire
/// boundary; `message` is human-readable and is what `Display` prints.
#[derive(Debug, thiserror::Error)]
pub enum RegletError {
    #[error("[internal] {message}")]
    Internal { message: String, code: Option<String> },

    #[error("[config] {message}")]
    Config { message: String, code: Option<String> },

    #[error("[capability] {message}")]
    Capability { message: String, code: Option<String> },

    #[error("[network] {message}")]
    Network { message: String, code: Option<String> },

    #[error("[timeout] {message}")]
    Timeout { message: String, code: Option<String> },

    #[error("[execution] {message}")]
    Execution { message: String, code: Option<String> },

    #[error("[ssrf_protection] {message}")]
    SsrfProtection { message: String, code: Option<String> },
}

impl RegletError {
    pub fn internal(message: impl Into<String>) -> Self {
        RegletError::Internal { message: message.into(), code: None }
    }

    pub fn config(message: impl Into<String>) -> Self {
        RegletError::Config { message: message.into(), code: None }
    }

    pub fn capability(message: impl Into<String>) -> Self {
        RegletError::Capability { message: message.into(), code: None }
    }

    pub fn network(message: impl Into<String>) -> Self {
        RegletError::Network { message: message.into(), code: None }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        RegletError::Timeout { message: message.into(), code: None }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        RegletError::Execution { message: message.into(), code: None }
    }

    pub fn ssrf_protection(message: impl Into<String>) -> Self {
        RegletError::SsrfProtection { message: message.into(), code: None }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        let slot = match &mut self {
            RegletError::Internal { code, .. }
            | RegletError::Config { code, .. }
            | RegletError::Capability { code, .. }
            | RegletError::Network { code, .. }
            | RegletError::Timeout { code, .. }
            | RegletError::Execution { code, .. }
            | RegletError::SsrfProtection { code, .. } => code,
        };
        *slot = Some(code.into());
        self
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            RegletError::Internal { .. } => ErrorType::Internal,
            RegletError::Config { .. } => ErrorType::Config,
            RegletError::Capability { .. } => ErrorType::Capability,
            RegletError::Network { .. } => ErrorType::Network,
            RegletError::Timeout { .. } => ErrorType::Timeout,
            RegletError::Execution { .. } => ErrorType::Execution,
            RegletError::SsrfProtection { .. } => ErrorType::SsrfProtection,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            RegletError::Internal { code, .. }
            | RegletError::Config { code, .. }
            | RegletError::Capability { code, .. }
            | RegletError::Network { code, .. }
            | RegletError::Timeout { code, .. }
            | RegletError::Execution { code, .. }
            | RegletError::SsrfProtection { code, .. } => code.as_deref(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RegletError::Internal { message, .. }
            | RegletError::Config { message, .. }
            | RegletError::Capability { message, .. }
            | RegletError::Network { message, .. }
            | RegletError::Timeout { message, .. }
            | RegletError::Execution { message, .. }
            | RegletError::SsrfProtection { message, .. } => message,
        }
    }
}

impl From<serde_json::Error> for RegletError {
    fn from(err: serde_json::Error) -> Self {
        RegletError::internal(format!("JSON codec error: {err}"))
    }
}

impl From<std::io::Error> for RegletError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            RegletError::timeout(err.to_string()).with_code("ETIMEDOUT")
        } else {
            RegletError::network(err.to_string())
        }
    }
}

impl From<reqwest::Error> for RegletError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegletError::timeout(err.to_string()).with_code("ETIMEDOUT")
        } else {
            RegletError::network(err.to_string())
        }
    }
}

impl From<hickory_resolver::ResolveError> for RegletError {
    fn from(err: hickory_resolver::ResolveError) -> Self {
        use hickory_resolver::ResolveErrorKind;
        match err.kind() {
            ResolveErrorKind::Timeout => RegletError::timeout(err.to_string()).with_code("ETIMEDOUT"),
            _ => RegletError::network(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegletError>;
