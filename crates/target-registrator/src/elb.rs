//! ELBv2 target group backend
//!
//! Implements [`TargetGroupBackend`] against the Elastic Load Balancing v2
//! API, so it serves both ALB and NLB target groups.
//!
//! ## API calls
//!
//! | operation | API |
//! |---|---|
//! | resolve | `DescribeTargetGroups` filtered by name |
//! | register | `RegisterTargets` |
//! | wait_healthy | `DescribeTargetHealth`, polled every 2s |
//! | deregister | `DeregisterTargets` |
//!
//! ## Prerequisites
//!
//! IAM permissions for `elasticloadbalancing:DescribeTargetGroups`,
//! `RegisterTargets`, `DeregisterTargets` and `DescribeTargetHealth`.

use crate::backend::{Endpoint, GroupHandle, TargetGroupBackend};
use crate::error::{RegistratorError, Result};
use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_elasticloadbalancingv2::Client as ElbClient;
use aws_sdk_elasticloadbalancingv2::error::DisplayErrorContext;
use aws_sdk_elasticloadbalancingv2::types::{TargetDescription, TargetHealthStateEnum};
use aws_types::region::Region;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Polling interval when waiting for target health changes
const HEALTH_POLL_INTERVAL_MS: u64 = 2000;

/// Load balancer backend for ALB/NLB target groups
pub struct ElbBackend {
    client: ElbClient,
}

impl ElbBackend {
    /// Create a backend from an existing client
    pub fn new(client: ElbClient) -> Self {
        Self { client }
    }

    /// Create from AWS config
    pub fn from_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(ElbClient::new(config))
    }

    /// Load the shared AWS config and check that credentials resolve.
    ///
    /// This is the session setup step; callers retry it.
    pub async fn connect(region: Option<&str>) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;

        let provider = config
            .credentials_provider()
            .ok_or_else(|| RegistratorError::config("No AWS credentials provider configured"))?;

        provider.provide_credentials().await.map_err(|e| {
            RegistratorError::backend(format!(
                "Failed to resolve AWS credentials: {}",
                DisplayErrorContext(&e)
            ))
        })?;

        info!(
            region = config.region().map(|r| r.as_ref()).unwrap_or("unset"),
            "AWS session ready"
        );

        Ok(Self::from_config(&config))
    }

    fn target_description(target: &Endpoint) -> TargetDescription {
        let mut description = TargetDescription::builder().id(&target.id);

        if let Some(p) = target.port {
            description = description.port(p);
        }

        description.build()
    }

    /// Current health state of `target` in `group`
    async fn get_target_health(
        &self,
        group: &GroupHandle,
        target: &Endpoint,
    ) -> Result<Option<TargetHealthStateEnum>> {
        let response = self
            .client
            .describe_target_health()
            .target_group_arn(group.as_str())
            .targets(Self::target_description(target))
            .send()
            .await
            .map_err(|e| {
                RegistratorError::backend(format!(
                    "Failed to describe target health: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        // None while the target is absent from the group
        let state = response
            .target_health_descriptions()
            .iter()
            .filter(|health| {
                health.target().and_then(|t| t.id()) == Some(target.id.as_str())
            })
            .find_map(|health| health.target_health())
            .and_then(|health| health.state().cloned());

        Ok(state)
    }
}

/// Pick the only ARN out of a `DescribeTargetGroups` answer
fn single_group<'a>(
    name: &str,
    arns: impl IntoIterator<Item = Option<&'a str>>,
) -> Result<GroupHandle> {
    let arns: Vec<&str> = arns.into_iter().flatten().collect();

    match arns.as_slice() {
        [arn] => Ok(GroupHandle::new(*arn)),
        [] => Err(RegistratorError::NotFound(name.to_string())),
        many => Err(RegistratorError::Ambiguous {
            name: name.to_string(),
            count: many.len(),
        }),
    }
}

#[async_trait]
impl TargetGroupBackend for ElbBackend {
    async fn resolve(&self, name: &str) -> Result<GroupHandle> {
        debug!(target_group_name = %name, "Describing target groups");

        let response = match self.client.describe_target_groups().names(name).send().await {
            Ok(r) => r,
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_target_group_not_found_exception())
                    .unwrap_or(false);
                if not_found {
                    return Err(RegistratorError::NotFound(name.to_string()));
                }
                return Err(RegistratorError::backend(format!(
                    "Failed to describe target groups: {}",
                    DisplayErrorContext(&e)
                )));
            }
        };

        single_group(
            name,
            response
                .target_groups()
                .iter()
                .map(|group| group.target_group_arn()),
        )
    }

    async fn register(&self, group: &GroupHandle, target: &Endpoint) -> Result<()> {
        if group.is_unresolved() {
            return Err(RegistratorError::GroupUnresolved);
        }

        info!(
            target_group = %group,
            target_id = %target,
            "Registering target with load balancer"
        );

        self.client
            .register_targets()
            .target_group_arn(group.as_str())
            .targets(Self::target_description(target))
            .send()
            .await
            .map_err(|e| {
                RegistratorError::backend(format!(
                    "Failed to register target: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(target_id = %target, "Target registered successfully");

        Ok(())
    }

    /// Polls the target health until it reaches "healthy" state or timeout.
    async fn wait_healthy(
        &self,
        group: &GroupHandle,
        target: &Endpoint,
        timeout: Duration,
    ) -> Result<()> {
        if group.is_unresolved() {
            return Err(RegistratorError::GroupUnresolved);
        }

        let start = Instant::now();
        let poll_interval = Duration::from_millis(HEALTH_POLL_INTERVAL_MS);

        info!(
            target_id = %target,
            timeout_secs = timeout.as_secs(),
            "Waiting for target to become healthy"
        );

        loop {
            if start.elapsed() > timeout {
                return Err(RegistratorError::Timeout(timeout));
            }

            match self.get_target_health(group, target).await {
                Ok(Some(TargetHealthStateEnum::Healthy)) => {
                    info!(
                        target_id = %target,
                        elapsed_secs = start.elapsed().as_secs_f64(),
                        "Target is healthy"
                    );
                    return Ok(());
                }
                Ok(state) => debug!(target_id = %target, state = ?state, "Target not in service yet"),
                Err(e) => warn!(target_id = %target, error = %e, "Error checking target health"),
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn deregister(&self, group: &GroupHandle, target: &Endpoint) -> Result<()> {
        if group.is_unresolved() {
            return Err(RegistratorError::GroupUnresolved);
        }

        info!(
            target_group = %group,
            target_id = %target,
            "Deregistering target from load balancer"
        );

        self.client
            .deregister_targets()
            .target_group_arn(group.as_str())
            .targets(Self::target_description(target))
            .send()
            .await
            .map_err(|e| {
                RegistratorError::backend(format!(
                    "Failed to deregister target: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(target_id = %target, "Target is marked as deregistered in target group");

        Ok(())
    }
}
