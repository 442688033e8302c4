//! Target group backend interface
//!
//! The lifecycle controller works through [`TargetGroupBackend`] only, never
//! through a concrete load balancer client. [`crate::elb::ElbBackend`] is the
//! AWS implementation; tests use an in-memory fake.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Resolved target group identifier (the target group ARN on AWS)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GroupHandle(String);

impl GroupHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty handle means discovery never produced one
    pub fn is_unresolved(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The network endpoint registered for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Target id: a pod IP for `ip` target groups, an instance id otherwise
    pub id: String,
    /// Port override; the target group's port is used when absent
    pub port: Option<i32>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.id, port),
            None => f.write_str(&self.id),
        }
    }
}

/// Operations the lifecycle needs from a load balancer.
///
/// Implementations must tolerate repeated calls: registering a target that
/// is already registered, or deregistering one that is gone, is not a new
/// failure.
#[async_trait]
pub trait TargetGroupBackend: Send + Sync {
    /// Resolve a target group name to its handle.
    ///
    /// Fails with `NotFound` or `Ambiguous` unless exactly one group matches.
    async fn resolve(&self, name: &str) -> Result<GroupHandle>;

    /// Add the endpoint to the target group
    async fn register(&self, group: &GroupHandle, target: &Endpoint) -> Result<()>;

    /// Block until the endpoint reports healthy, or fail with `Timeout`
    async fn wait_healthy(
        &self,
        group: &GroupHandle,
        target: &Endpoint,
        timeout: Duration,
    ) -> Result<()>;

    /// Remove the endpoint from the target group
    async fn deregister(&self, group: &GroupHandle, target: &Endpoint) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("10.0.1.17").to_string(), "10.0.1.17");
        assert_eq!(
            Endpoint::new("10.0.1.17").with_port(8080).to_string(),
            "10.0.1.17:8080"
        );
    }

    #[test]
    fn test_unresolved_handle() {
        assert!(GroupHandle::new("").is_unresolved());
        assert!(!GroupHandle::new("arn:aws:elasticloadbalancing:eu-west-1:123:targetgroup/web/abc").is_unresolved());
    }
}
