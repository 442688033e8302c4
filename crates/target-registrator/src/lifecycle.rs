//! Target lifecycle controller
//!
//! Drives one registration episode from process start to exit:
//!
//! 1. **Discover**: resolve the target group name to an ARN (retried). Any
//!    failure here is fatal and nothing is registered.
//! 2. **Register**: on a spawned task, run the pre-register hook, register
//!    the target (retried, cancellable), optionally wait for it to become
//!    healthy, then run the post-register hook.
//! 3. **Block**: wait for the shutdown token.
//! 4. **Cancel**: cancel the registration scope and join the task, so no
//!    late register call can race the deregister call.
//! 5. **Deregister**: remove the target (retried, never cancelled).
//! 6. **Post-deregister hook**.
//!
//! Every failure after discovery is logged and the sequence continues.

use crate::backend::{GroupHandle, TargetGroupBackend};
use crate::config::{RegistratorConfig, TargetGroupRef};
use crate::error::{RegistratorError, Result};
use crate::hook::{self, HookRunner};
use crate::retry::{retry, retry_cancellable};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle episode states, in the order an episode moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeState {
    Discovering,
    Registering,
    WaitingHealthy,
    /// Registration task finished, waiting for shutdown
    Blocked,
    Cancelling,
    Deregistering,
    Done,
    /// Discovery failed; nothing was registered
    FatalExit,
}

/// How the registration task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistrationOutcome {
    /// Registered, health-wait disabled
    Registered,
    /// Registered and reported healthy
    Healthy,
    /// Register call or health-wait failed
    Failed { reason: String },
    /// Shutdown arrived first
    Cancelled,
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered | Self::Healthy)
    }
}

/// A state change and when it happened
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: EpisodeState,
    pub at: DateTime<Utc>,
}

/// Summary of a completed episode
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeReport {
    pub target_group: GroupHandle,
    pub registration: RegistrationOutcome,
    /// Whether the deregister call eventually succeeded
    pub deregistered: bool,
    pub transitions: Vec<Transition>,
}

impl EpisodeReport {
    /// States visited, in order
    pub fn states(&self) -> Vec<EpisodeState> {
        self.transitions.iter().map(|t| t.state).collect()
    }
}

/// Current state plus history. States only move forward, so a registration
/// task finishing after shutdown cannot drag the episode back to `Blocked`.
struct StateTracker {
    tx: watch::Sender<EpisodeState>,
    history: Mutex<Vec<Transition>>,
}

impl StateTracker {
    fn new() -> Self {
        let initial = EpisodeState::Discovering;
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            history: Mutex::new(vec![Transition {
                state: initial,
                at: Utc::now(),
            }]),
        }
    }

    fn current(&self) -> EpisodeState {
        *self.tx.borrow()
    }

    fn advance(&self, next: EpisodeState) {
        // History is appended under the watch lock so it matches the
        // order subscribers observe
        let moved = self.tx.send_if_modified(|state| {
            if next <= *state {
                return false;
            }
            *state = next;
            self.history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(Transition {
                    state: next,
                    at: Utc::now(),
                });
            true
        });

        if moved {
            info!(state = ?next, "Lifecycle state changed");
        }
    }

    fn history(&self) -> Vec<Transition> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Runs one registration episode against a target group backend
pub struct LifecycleController<B: ?Sized, H: ?Sized> {
    config: Arc<RegistratorConfig>,
    backend: Arc<B>,
    hooks: Arc<H>,
    state: Arc<StateTracker>,
}

impl<B, H> LifecycleController<B, H>
where
    B: TargetGroupBackend + ?Sized + 'static,
    H: HookRunner + ?Sized + 'static,
{
    pub fn new(config: RegistratorConfig, backend: Arc<B>, hooks: Arc<H>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
            hooks,
            state: Arc::new(StateTracker::new()),
        }
    }

    /// Watch the episode state
    pub fn subscribe(&self) -> watch::Receiver<EpisodeState> {
        self.state.tx.subscribe()
    }

    pub fn state(&self) -> EpisodeState {
        self.state.current()
    }

    /// Run the episode to completion.
    ///
    /// Returns `Err` only when discovery fails, in which case nothing was
    /// registered or deregistered. Otherwise blocks until `shutdown` is
    /// cancelled and returns once the target has been deregistered (or the
    /// deregistration retries were exhausted).
    pub async fn run(self, shutdown: CancellationToken) -> Result<EpisodeReport> {
        let group = match self.discover().await {
            Ok(group) => group,
            Err(e) => {
                self.state.advance(EpisodeState::FatalExit);
                error!(
                    target_group = %self.config.target_group,
                    error = %e,
                    "Target group discovery failed"
                );
                return Err(e);
            }
        };

        info!(target_group = %group, target_id = %self.config.target, "Target group resolved");

        let registration = if shutdown.is_cancelled() {
            info!("Shutdown requested before registration started");
            self.state.advance(EpisodeState::Cancelling);
            RegistrationOutcome::Cancelled
        } else {
            self.register_until_shutdown(&group, &shutdown).await
        };

        self.state.advance(EpisodeState::Deregistering);
        let deregistered = self.deregister(&group).await;

        hook::invoke(self.hooks.as_ref(), &self.config.post_deregister).await;

        self.state.advance(EpisodeState::Done);
        info!(
            registration = ?registration,
            deregistered,
            "Lifecycle complete"
        );

        Ok(EpisodeReport {
            target_group: group,
            registration,
            deregistered,
            transitions: self.state.history(),
        })
    }

    /// Run the registration task until `shutdown`, then cancel and join it.
    ///
    /// The scope is only cancelled here, after the state has moved to
    /// `Cancelling`, so a task unwinding from cancellation cannot record
    /// `Blocked` first.
    async fn register_until_shutdown(
        &self,
        group: &GroupHandle,
        shutdown: &CancellationToken,
    ) -> RegistrationOutcome {
        self.state.advance(EpisodeState::Registering);
        let scope = CancellationToken::new();
        let registration = tokio::spawn(register_sequence(
            self.config.clone(),
            self.backend.clone(),
            self.hooks.clone(),
            self.state.clone(),
            group.clone(),
            scope.clone(),
        ));

        info!("Awaiting signal for deregistration");
        shutdown.cancelled().await;

        self.state.advance(EpisodeState::Cancelling);
        scope.cancel();
        match registration.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Registration task did not complete");
                RegistrationOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn discover(&self) -> Result<GroupHandle> {
        match &self.config.target_group {
            TargetGroupRef::Arn(arn) => {
                info!(target_group = %arn, "Using configured target group ARN");
                Ok(arn.clone())
            }
            TargetGroupRef::Name(name) => {
                info!(target_group_name = %name, "Discovering target group");
                retry(&self.config.retry, "discover target group", || {
                    self.backend.resolve(name)
                })
                .await
            }
        }
    }

    async fn deregister(&self, group: &GroupHandle) -> bool {
        let target = &self.config.target;
        let result = retry(&self.config.retry, "deregister target", || {
            self.backend.deregister(group, target)
        })
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(
                    target_group = %group,
                    target_id = %target,
                    error = %e,
                    "Deregistration failed, target may remain in target group"
                );
                false
            }
        }
    }
}

/// Body of the registration task
async fn register_sequence<B, H>(
    config: Arc<RegistratorConfig>,
    backend: Arc<B>,
    hooks: Arc<H>,
    state: Arc<StateTracker>,
    group: GroupHandle,
    scope: CancellationToken,
) -> RegistrationOutcome
where
    B: TargetGroupBackend + ?Sized,
    H: HookRunner + ?Sized,
{
    let outcome =
        register_and_wait(&config, backend.as_ref(), hooks.as_ref(), &state, &group, &scope).await;

    // No-op once the controller has moved to `Cancelling`
    state.advance(EpisodeState::Blocked);
    outcome
}

async fn register_and_wait<B, H>(
    config: &RegistratorConfig,
    backend: &B,
    hooks: &H,
    state: &StateTracker,
    group: &GroupHandle,
    scope: &CancellationToken,
) -> RegistrationOutcome
where
    B: TargetGroupBackend + ?Sized,
    H: HookRunner + ?Sized,
{
    let target = &config.target;

    hook::invoke(hooks, &config.pre_register).await;

    let registered = retry_cancellable(&config.retry, scope, "register target", || {
        backend.register(group, target)
    })
    .await;

    if let Err(e) = registered {
        return failed_or_cancelled("Registration", e);
    }

    let outcome = if config.wait_in_service {
        state.advance(EpisodeState::WaitingHealthy);
        let timeout = config.wait_in_service_timeout;
        info!(target_id = %target, timeout_secs = timeout.as_secs(), "Waiting for target to be in service");

        let healthy = tokio::select! {
            biased;
            _ = scope.cancelled() => Err(RegistratorError::Cancelled),
            result = tokio::time::timeout(timeout, backend.wait_healthy(group, target, timeout)) => {
                result.unwrap_or_else(|_elapsed| Err(RegistratorError::Timeout(timeout)))
            }
        };

        match healthy {
            Ok(()) => RegistrationOutcome::Healthy,
            Err(e) => return failed_or_cancelled("Health wait", e),
        }
    } else {
        RegistrationOutcome::Registered
    };

    info!(target_id = %target, target_group = %group, "Target is registered in target group");

    hook::invoke(hooks, &config.post_register).await;

    outcome
}

fn failed_or_cancelled(stage: &str, err: RegistratorError) -> RegistrationOutcome {
    if err.is_cancelled() {
        info!(stage, "Cancelled by shutdown");
        RegistrationOutcome::Cancelled
    } else {
        warn!(stage, error = %err, "Failed, continuing until shutdown");
        RegistrationOutcome::Failed {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order_follows_episode() {
        assert!(EpisodeState::Discovering < EpisodeState::Registering);
        assert!(EpisodeState::WaitingHealthy < EpisodeState::Blocked);
        assert!(EpisodeState::Blocked < EpisodeState::Cancelling);
        assert!(EpisodeState::Deregistering < EpisodeState::Done);
    }

    #[test]
    fn test_tracker_never_moves_backwards() {
        let tracker = StateTracker::new();
        tracker.advance(EpisodeState::Registering);
        tracker.advance(EpisodeState::Cancelling);
        tracker.advance(EpisodeState::Blocked);
        tracker.advance(EpisodeState::Cancelling);

        assert_eq!(tracker.current(), EpisodeState::Cancelling);
        let states: Vec<_> = tracker.history().into_iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![
                EpisodeState::Discovering,
                EpisodeState::Registering,
                EpisodeState::Cancelling
            ]
        );
    }

    #[test]
    fn test_tracker_notifies_subscribers() {
        let tracker = StateTracker::new();
        let mut rx = tracker.tx.subscribe();
        assert!(!rx.has_changed().unwrap());

        tracker.advance(EpisodeState::Registering);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), EpisodeState::Registering);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&RegistrationOutcome::Failed {
            reason: "throttled".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"failed","reason":"throttled"}"#);

        let json = serde_json::to_string(&RegistrationOutcome::Healthy).unwrap();
        assert_eq!(json, r#"{"status":"healthy"}"#);
    }

    #[test]
    fn test_failed_or_cancelled() {
        assert_eq!(
            failed_or_cancelled("Registration", RegistratorError::Cancelled),
            RegistrationOutcome::Cancelled
        );
        assert!(matches!(
            failed_or_cancelled("Registration", RegistratorError::backend("boom")),
            RegistrationOutcome::Failed { .. }
        ));
    }
}
