//! Error types for the registrator

use std::time::Duration;
use thiserror::Error;

/// Registrator result type
pub type Result<T> = std::result::Result<T, RegistratorError>;

/// Errors that can occur while driving a target through its lifecycle
#[derive(Error, Debug)]
pub enum RegistratorError {
    /// No target group matched the configured name
    #[error("Target group {0} not found")]
    NotFound(String),

    /// More than one target group matched the configured name
    #[error("Unexpected count of target groups named {name}: {count}")]
    Ambiguous { name: String, count: usize },

    /// Load balancer API error
    #[error("Load balancer API error: {0}")]
    Backend(String),

    /// Timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Register/deregister attempted without a resolved target group
    #[error("Target group ARN is empty, discover it by name or pass --target-group-arn")]
    GroupUnresolved,

    /// Shutdown requested while the operation was in flight
    #[error("Operation cancelled by shutdown")]
    Cancelled,

    /// Hook command exited unsuccessfully
    #[error("Hook command failed: {status}")]
    Hook { status: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RegistratorError {
    /// Create a load balancer API error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Convert from generic AWS SDK error
    pub fn from_aws<E>(err: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::Backend(err.to_string())
    }

    /// Whether another attempt of the same call may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::GroupUnresolved | Self::Cancelled | Self::Config(_) | Self::Timeout(_)
        )
    }

    /// Whether this error is the shutdown unwind rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
