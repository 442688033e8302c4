//! target-registrator - ELBv2 target registration sidecar
//!
//! ## Usage
//!
//! ```bash
//! # Register the pod IP, wait until healthy, deregister on SIGTERM
//! target-registrator --target-id "$POD_IP" --target-group-name web-tg
//!
//! # Skip discovery and drain connections before deregistering
//! target-registrator --target-id "$POD_IP" \
//!     --target-group-arn arn:aws:elasticloadbalancing:...:targetgroup/web-tg/abc \
//!     --post-deregister-command 'sleep 30'
//! ```

use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::sync::Arc;
use std::time::Duration;
use target_registrator::{
    ElbBackend, Endpoint, GroupHandle, Hook, HookKind, LifecycleController, RegistratorConfig,
    RetryPolicy, ShellHookRunner, ShutdownSignal, TargetGroupRef, retry,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time kube2iam needs to start serving temporary credentials to a new pod
const KUBE2IAM_GRACE: Duration = Duration::from_secs(10);

/// Register a target in an ELBv2 target group for the lifetime of this process
#[derive(Parser)]
#[command(name = "target-registrator")]
#[command(about = "Keeps a pod endpoint registered in an ELBv2 target group until shutdown", long_about = None)]
#[command(group(
    ArgGroup::new("target_group")
        .required(true)
        .args(["target_group_name", "target_group_arn"]),
))]
struct Cli {
    /// Target id to register (pod IP or instance id)
    #[arg(long, env = "REGISTRATOR_TARGET_ID")]
    target_id: String,

    /// Target port, when it differs from the target group's port
    #[arg(long, env = "REGISTRATOR_TARGET_PORT")]
    target_port: Option<i32>,

    /// Target group name to look for
    #[arg(long, env = "REGISTRATOR_TARGET_GROUP_NAME")]
    target_group_name: Option<String>,

    /// Target group ARN, skips discovery
    #[arg(long, env = "REGISTRATOR_TARGET_GROUP_ARN")]
    target_group_arn: Option<String>,

    /// Wait for the target to become healthy after registering
    #[arg(long, env = "REGISTRATOR_WAIT_IN_SERVICE", default_value_t = true, action = clap::ArgAction::Set)]
    wait_in_service: bool,

    /// How long to wait for the target to become healthy
    #[arg(long, env = "REGISTRATOR_WAIT_IN_SERVICE_TIMEOUT", default_value = "5m", value_parser = humantime::parse_duration)]
    wait_in_service_timeout: Duration,

    /// Command to execute before the target is registered
    #[arg(long, env = "REGISTRATOR_PRE_REGISTER_COMMAND")]
    pre_register_command: Option<String>,

    /// How long to wait for the pre-register command to finish
    #[arg(long, env = "REGISTRATOR_PRE_REGISTER_COMMAND_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pre_register_command_timeout: Duration,

    /// Command to execute after the target is registered
    #[arg(long, env = "REGISTRATOR_POST_REGISTER_COMMAND")]
    post_register_command: Option<String>,

    /// How long to wait for the post-register command to finish
    #[arg(long, env = "REGISTRATOR_POST_REGISTER_COMMAND_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    post_register_command_timeout: Duration,

    /// Command to execute after the target is deregistered
    #[arg(long, env = "REGISTRATOR_POST_DEREGISTER_COMMAND")]
    post_deregister_command: Option<String>,

    /// How long to wait for the post-deregister command to finish
    #[arg(long, env = "REGISTRATOR_POST_DEREGISTER_COMMAND_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    post_deregister_command_timeout: Duration,

    /// Attempts per load balancer call
    #[arg(long, env = "REGISTRATOR_RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    /// Delay before the first retry, doubled after every failure
    #[arg(long, env = "REGISTRATOR_RETRY_BASE_DELAY", default_value = "1s", value_parser = humantime::parse_duration)]
    retry_base_delay: Duration,

    /// AWS region (default: from the AWS config chain)
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Whether the pod gets credentials through kube2iam
    #[arg(long, env = "REGISTRATOR_KUBE2IAM")]
    kube2iam: bool,
}

impl Cli {
    fn registrator_config(&self) -> RegistratorConfig {
        let mut target = Endpoint::new(&self.target_id);
        if let Some(port) = self.target_port {
            target = target.with_port(port);
        }

        let target_group = match (&self.target_group_arn, &self.target_group_name) {
            (Some(arn), _) => TargetGroupRef::Arn(GroupHandle::new(arn)),
            (None, name) => TargetGroupRef::Name(name.clone().unwrap_or_default()),
        };

        RegistratorConfig::new(target, target_group)
            .with_wait_in_service(self.wait_in_service, self.wait_in_service_timeout)
            .with_hook(Hook::new(
                HookKind::PreRegister,
                self.pre_register_command.clone(),
                self.pre_register_command_timeout,
            ))
            .with_hook(Hook::new(
                HookKind::PostRegister,
                self.post_register_command.clone(),
                self.post_register_command_timeout,
            ))
            .with_hook(Hook::new(
                HookKind::PostDeregister,
                self.post_deregister_command.clone(),
                self.post_deregister_command_timeout,
            ))
            .with_retry(RetryPolicy::new(self.retry_attempts, self.retry_base_delay))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "target_registrator=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.registrator_config();
    config.validate().context("Invalid configuration")?;

    info!("========================================");
    info!("target-registrator starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Target: {}", config.target);
    info!("Target group: {}", config.target_group);
    info!("========================================");

    let shutdown = ShutdownSignal::install().context("Failed to install signal handlers")?;

    if cli.kube2iam {
        info!(
            grace_secs = KUBE2IAM_GRACE.as_secs(),
            "Giving kube2iam time to set up temporary security credentials"
        );
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown before registration, nothing to clean up");
                return Ok(());
            }
            _ = tokio::time::sleep(KUBE2IAM_GRACE) => {}
        }
    }

    let region = cli.region.as_deref();
    let backend = retry(&config.retry, "aws session setup", || ElbBackend::connect(region))
        .await
        .context("Failed to set up AWS session")?;

    let controller =
        LifecycleController::new(config, Arc::new(backend), Arc::new(ShellHookRunner::new()));

    let report = controller
        .run(shutdown.token())
        .await
        .context("Target group discovery failed")?;

    info!(
        report = %serde_json::to_string(&report)?,
        "Episode report"
    );

    Ok(())
}
