//! Error handling for DbVault.
//!
//! This module provides:
//! - A single error type with machine-readable codes and chained sources
//! - User-friendly messages vs detailed internal messages
//! - Stable persisted error codes for the `BackupJob` record
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbvault_core::error::{VaultError, Result, ErrorContext};
//!
//! fn my_function() -> Result<()> {
//!     std::fs::metadata("/tmp/dump.sql")
//!         .with_error_code(ErrorCode::FileSystemError)?;
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for DbVault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable: the persisted form (see [`VaultError::error_code`])
/// is written into `BackupJob.error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job / Queue Errors (1000-1099)
    TaskNotFound,
    TaskAlreadyExists,
    QueueNotFound,
    InvalidStateTransition,
    JobNotFound,

    // Tool Errors (1300-1399)
    ToolNotFound,
    ToolExecutionFailed,
    ToolTimeout,
    ChecksumFailed,

    // Persistence Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    RecordNotFound,
    FileSystemError,

    // Broker Errors (2100-2199)
    BrokerError,
    BrokerUnavailable,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidOptions,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,
    UnsupportedEngine,
    UnsupportedAlgorithm,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::TaskNotFound => 1000,
            Self::TaskAlreadyExists => 1001,
            Self::QueueNotFound => 1002,
            Self::InvalidStateTransition => 1003,
            Self::JobNotFound => 1004,

            Self::ToolNotFound => 1300,
            Self::ToolExecutionFailed => 1301,
            Self::ToolTimeout => 1302,
            Self::ChecksumFailed => 1303,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::RecordNotFound => 2002,
            Self::FileSystemError => 2003,

            Self::BrokerError => 2100,
            Self::BrokerUnavailable => 2101,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ValidationError => 4100,
            Self::InvalidOptions => 4101,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,
            Self::UnsupportedEngine => 5003,
            Self::UnsupportedAlgorithm => 5004,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Check if this error is worth another delivery attempt at the queue layer.
    ///
    /// Only infrastructure failures qualify. Tool failures are terminal for
    /// the attempt; re-running a backup is an explicit operator action.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnectionFailed
                | Self::DatabaseError
                | Self::BrokerError
                | Self::BrokerUnavailable
        )
    }

    /// Whether this code signals something missing rather than a failure.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound | Self::QueueNotFound | Self::JobNotFound | Self::RecordNotFound
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            1300..=1399 => "tool",
            2000..=2099 => "persistence",
            2100..=2199 => "broker",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, illegal transitions, unknown ids)
    Low,
    /// Operational issues (tool failures, timeouts)
    Medium,
    /// System errors (persistence failures, bad configuration)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::TaskNotFound
            | ErrorCode::TaskAlreadyExists
            | ErrorCode::QueueNotFound
            | ErrorCode::InvalidStateTransition
            | ErrorCode::JobNotFound
            | ErrorCode::RecordNotFound
            | ErrorCode::ValidationError
            | ErrorCode::InvalidOptions => Self::Low,

            ErrorCode::ToolNotFound
            | ErrorCode::ToolExecutionFailed
            | ErrorCode::ToolTimeout
            | ErrorCode::ChecksumFailed
            | ErrorCode::FileSystemError => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::BrokerError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration
            | ErrorCode::UnsupportedEngine
            | ErrorCode::UnsupportedAlgorithm => Self::High,

            ErrorCode::DatabaseConnectionFailed
            | ErrorCode::BrokerUnavailable
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (task, job, tool, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for DbVault.
///
/// This error type supports:
/// - Structured error codes
/// - Error chaining with context
/// - User-friendly vs internal messages
/// - Metrics integration
#[derive(Error, Debug)]
pub struct VaultError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl VaultError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Check if this error is a not-found signal.
    pub fn is_not_found(&self) -> bool {
        self.code.is_not_found()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Message persisted on a failed job: the user message, plus the internal
    /// detail when there is one.
    pub fn summary(&self) -> String {
        match &self.internal_message {
            Some(internal) => format!("{}: {}", self.user_message, internal),
            None => self.user_message.to_string(),
        }
    }

    /// Get the persisted error code string.
    pub fn error_code(&self) -> &'static str {
        match self.code {
            ErrorCode::TaskNotFound => "TASK_NOT_FOUND",
            ErrorCode::TaskAlreadyExists => "TASK_EXISTS",
            ErrorCode::QueueNotFound => "QUEUE_NOT_FOUND",
            ErrorCode::InvalidStateTransition => "INVALID_STATE",
            ErrorCode::JobNotFound | ErrorCode::RecordNotFound => "NOT_FOUND",
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::ToolExecutionFailed => "TOOL_FAILED",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::ChecksumFailed => "CHECKSUM_FAILED",
            ErrorCode::DatabaseError | ErrorCode::DatabaseConnectionFailed => "DATABASE_ERROR",
            ErrorCode::FileSystemError => "IO_ERROR",
            ErrorCode::BrokerError | ErrorCode::BrokerUnavailable => "REDIS_ERROR",
            ErrorCode::SerializationError | ErrorCode::DeserializationError => "SERIALIZATION_ERROR",
            ErrorCode::ValidationError | ErrorCode::InvalidOptions => "INVALID_OPTIONS",
            ErrorCode::UnsupportedEngine => "UNSUPPORTED_ENGINE",
            ErrorCode::UnsupportedAlgorithm => "UNSUPPORTED_ALGORITHM",
            ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "dbvault_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| VaultError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| VaultError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| VaultError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| VaultError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for VaultError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<redis::RedisError> for VaultError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::BrokerUnavailable, "Unable to connect to the task broker")
        } else if error.is_timeout() {
            (ErrorCode::BrokerError, "Task broker operation timed out")
        } else {
            (ErrorCode::BrokerError, "A task broker error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for VaultError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::ToolTimeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for VaultError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let user_msg = match error.kind() {
            ErrorKind::NotFound => "File or resource not found",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::TimedOut => "Operation timed out",
            _ => "An I/O error occurred",
        };

        Self::with_internal(ErrorCode::FileSystemError, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for VaultError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<VaultError>() {
            Ok(vault_error) => vault_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for VaultError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl VaultError {
    // ─────────────────────────────────────────────────────────────────────────
    // Job / Queue Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a task not found error.
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {}", task_id))
            .with_details(ErrorDetails::new().with_entity("task", task_id))
    }

    /// Create a duplicate task error (unique window or explicit id collision).
    pub fn task_already_exists(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self::new(
            ErrorCode::TaskAlreadyExists,
            format!("Task already exists: {}", task_id),
        )
        .with_details(ErrorDetails::new().with_entity("task", task_id))
    }

    /// Create a queue not found error.
    pub fn queue_not_found(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self::new(ErrorCode::QueueNotFound, format!("Queue not found: {}", queue))
            .with_details(ErrorDetails::new().with_entity("queue", queue))
    }

    /// Create a backup job not found error.
    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Backup job not found: {}", job_id))
            .with_details(ErrorDetails::new().with_entity("backup_job", job_id.to_string()))
    }

    /// Create a database connection not found error.
    pub fn connection_not_found(connection_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::RecordNotFound,
            format!("Database connection not found: {}", connection_id),
        )
        .with_details(ErrorDetails::new().with_entity("connection", connection_id.to_string()))
    }

    /// Create an invalid state transition error.
    pub fn invalid_state_transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Invalid backup job state transition: {:?} -> {:?}", from, to),
        )
        .with_context("from_state", format!("{:?}", from))
        .with_context("to_state", format!("{:?}", to))
    }

    /// Create a broker error.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::BrokerError, "A task broker error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tool Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a tool not found error.
    pub fn tool_not_found(tool_name: impl Into<String>) -> Self {
        let name = tool_name.into();
        Self::new(ErrorCode::ToolNotFound, format!("Tool not found: {}", name))
            .with_details(
                ErrorDetails::new()
                    .with_entity("tool", &name)
                    .with_suggestion(format!("Install {} and make sure it is on PATH", name)),
            )
    }

    /// Create a tool execution failed error.
    pub fn tool_execution_failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        let tool_name = tool.into();
        Self::new(
            ErrorCode::ToolExecutionFailed,
            format!("Tool execution failed: {} - {}", tool_name, reason.into()),
        )
        .with_details(ErrorDetails::new().with_entity("tool", &tool_name))
    }

    /// Create a tool timeout error.
    pub fn tool_timeout(tool: impl Into<String>, timeout_secs: u64) -> Self {
        let tool_name = tool.into();
        Self::new(
            ErrorCode::ToolTimeout,
            format!("Tool timeout: {} exceeded {}s", tool_name, timeout_secs),
        )
        .with_context("timeout_secs", timeout_secs)
        .with_details(ErrorDetails::new().with_entity("tool", &tool_name))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    /// Create an unsupported compression algorithm error.
    pub fn unsupported_algorithm(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::UnsupportedAlgorithm,
            format!("Unsupported compression algorithm: {}", name),
        )
        .with_context("algorithm", &name)
    }

    /// Create an unsupported database engine error.
    pub fn unsupported_engine(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::UnsupportedEngine,
            format!("Unsupported database engine: {}", name),
        )
        .with_context("engine", &name)
    }

    /// Create an invalid option combination error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOptions, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
