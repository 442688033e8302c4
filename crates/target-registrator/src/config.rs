//! Resolved registrator configuration
//!
//! Built once by the binary from command-line flags and handed to the
//! [`crate::lifecycle::LifecycleController`] by value. Nothing reads
//! configuration from anywhere else.

use crate::backend::{Endpoint, GroupHandle};
use crate::error::{RegistratorError, Result};
use crate::hook::{Hook, HookKind};
use crate::retry::RetryPolicy;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Default bound on the wait for the target to become healthy
pub const DEFAULT_WAIT_IN_SERVICE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How the target group is identified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetGroupRef {
    /// Resolved to an ARN by discovery
    Name(String),
    /// Already known, discovery is skipped
    Arn(GroupHandle),
}

impl fmt::Display for TargetGroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name={}", name),
            Self::Arn(arn) => write!(f, "arn={}", arn),
        }
    }
}

/// Everything the lifecycle controller needs for one episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistratorConfig {
    /// Endpoint to register
    pub target: Endpoint,
    /// Target group to register it in
    pub target_group: TargetGroupRef,
    /// Whether to wait for the target to report healthy after registering
    pub wait_in_service: bool,
    pub wait_in_service_timeout: Duration,
    pub pre_register: Hook,
    pub post_register: Hook,
    pub post_deregister: Hook,
    /// Policy shared by discovery, registration and deregistration
    pub retry: RetryPolicy,
}

impl RegistratorConfig {
    /// Configuration with defaults: health-wait on, no hooks
    pub fn new(target: Endpoint, target_group: TargetGroupRef) -> Self {
        Self {
            target,
            target_group,
            wait_in_service: true,
            wait_in_service_timeout: DEFAULT_WAIT_IN_SERVICE_TIMEOUT,
            pre_register: Hook::disabled(HookKind::PreRegister),
            post_register: Hook::disabled(HookKind::PostRegister),
            post_deregister: Hook::disabled(HookKind::PostDeregister),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_wait_in_service(mut self, enabled: bool, timeout: Duration) -> Self {
        self.wait_in_service = enabled;
        self.wait_in_service_timeout = timeout;
        self
    }

    /// Set the hook for the hook's own kind
    pub fn with_hook(mut self, hook: Hook) -> Self {
        match hook.kind {
            HookKind::PreRegister => self.pre_register = hook,
            HookKind::PostRegister => self.post_register = hook,
            HookKind::PostDeregister => self.post_deregister = hook,
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reject configurations the lifecycle cannot act on
    pub fn validate(&self) -> Result<()> {
        if self.target.id.trim().is_empty() {
            return Err(RegistratorError::config("target id must not be empty"));
        }

        match &self.target_group {
            TargetGroupRef::Name(name) if name.trim().is_empty() => {
                return Err(RegistratorError::config("target group name must not be empty"));
            }
            TargetGroupRef::Arn(arn) if arn.is_unresolved() => {
                return Err(RegistratorError::config("target group ARN must not be empty"));
            }
            _ => {}
        }

        if self.wait_in_service && self.wait_in_service_timeout.is_zero() {
            return Err(RegistratorError::config(
                "wait-in-service timeout must be greater than zero",
            ));
        }

        for hook in [&self.pre_register, &self.post_register, &self.post_deregister] {
            if hook.command().is_some() && hook.timeout.is_zero() {
                return Err(RegistratorError::config(format!(
                    "{} command timeout must be greater than zero",
                    hook.kind
                )));
            }
        }

        if self.retry.max_attempts() == 0 {
            return Err(RegistratorError::config("retry attempts must be at least 1"));
        }

        Ok(())
    }
}
