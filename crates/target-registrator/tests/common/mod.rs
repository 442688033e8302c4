//! In-memory target group backend and recording hook runner

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use target_registrator::{
    Endpoint, GroupHandle, HookOutput, HookRunner, RegistratorError, Result, TargetGroupBackend,
};
use tokio::sync::Notify;
use tokio::time::Instant;

pub const WEB_ARN: &str =
    "arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/web/6d0ecf831eec9f09";

/// Ordered record of backend calls and hook runs shared by both fakes
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap()
            .push((event.into(), Instant::now()));
    }

    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| n.as_str() == name).count()
    }

    pub fn times(&self, name: &str) -> Vec<Instant> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names().iter().position(|n| n == name)
    }

    pub fn last_position(&self, name: &str) -> Option<usize> {
        self.names().iter().rposition(|n| n == name)
    }
}

/// How the fake answers `wait_healthy`
#[derive(Clone, Copy)]
pub enum Health {
    /// Becomes healthy after the delay
    After(Duration),
    /// Never becomes healthy; fails with `Timeout` at the deadline
    Never,
}

pub struct FakeBackend {
    groups: Vec<(String, String)>,
    register_failures: AtomicU32,
    deregister_failures: AtomicU32,
    register_delay: Duration,
    health: Health,
    pub health_wait_started: Notify,
    pub events: EventLog,
}

impl FakeBackend {
    pub fn new(events: EventLog) -> Self {
        Self {
            groups: vec![("web".to_string(), WEB_ARN.to_string())],
            register_failures: AtomicU32::new(0),
            deregister_failures: AtomicU32::new(0),
            register_delay: Duration::ZERO,
            health: Health::After(Duration::from_secs(2)),
            health_wait_started: Notify::new(),
            events,
        }
    }

    pub fn with_groups(mut self, groups: &[(&str, &str)]) -> Self {
        self.groups = groups
            .iter()
            .map(|(name, arn)| (name.to_string(), arn.to_string()))
            .collect();
        self
    }

    /// Fail the first `n` register calls
    pub fn failing_registers(self, n: u32) -> Self {
        self.register_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the first `n` deregister calls
    pub fn failing_deregisters(self, n: u32) -> Self {
        self.deregister_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_register_delay(mut self, delay: Duration) -> Self {
        self.register_delay = delay;
        self
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TargetGroupBackend for FakeBackend {
    async fn resolve(&self, name: &str) -> Result<GroupHandle> {
        self.events.push("resolve");

        let matches: Vec<&(String, String)> =
            self.groups.iter().filter(|(n, _)| n == name).collect();
        match matches.as_slice() {
            [(_, arn)] => Ok(GroupHandle::new(arn.clone())),
            [] => Err(RegistratorError::NotFound(name.to_string())),
            many => Err(RegistratorError::Ambiguous {
                name: name.to_string(),
                count: many.len(),
            }),
        }
    }

    async fn register(&self, group: &GroupHandle, _target: &Endpoint) -> Result<()> {
        if group.is_unresolved() {
            return Err(RegistratorError::GroupUnresolved);
        }
        self.events.push("register");

        if !self.register_delay.is_zero() {
            tokio::time::sleep(self.register_delay).await;
        }

        if Self::take_failure(&self.register_failures) {
            return Err(RegistratorError::backend("RegisterTargets throttled"));
        }

        self.events.push("register:done");
        Ok(())
    }

    async fn wait_healthy(
        &self,
        _group: &GroupHandle,
        _target: &Endpoint,
        timeout: Duration,
    ) -> Result<()> {
        self.events.push("wait_healthy");
        self.health_wait_started.notify_one();

        match self.health {
            Health::After(delay) if delay <= timeout => {
                tokio::time::sleep(delay).await;
                self.events.push("wait_healthy:done");
                Ok(())
            }
            _ => {
                tokio::time::sleep(timeout).await;
                Err(RegistratorError::Timeout(timeout))
            }
        }
    }

    async fn deregister(&self, group: &GroupHandle, _target: &Endpoint) -> Result<()> {
        if group.is_unresolved() {
            return Err(RegistratorError::GroupUnresolved);
        }
        self.events.push("deregister");

        if Self::take_failure(&self.deregister_failures) {
            return Err(RegistratorError::backend("DeregisterTargets throttled"));
        }
        Ok(())
    }
}

/// Hook runner that records each command; commands starting with `fail`
/// exit non-zero
pub struct RecordingHooks {
    pub events: EventLog,
}

impl RecordingHooks {
    pub fn new(events: EventLog) -> Self {
        Self { events }
    }
}

#[async_trait]
impl HookRunner for RecordingHooks {
    async fn run(&self, command: &str, _timeout: Duration) -> HookOutput {
        self.events.push(format!("hook:{}", command));

        let result = if command.starts_with("fail") {
            Err(RegistratorError::Hook {
                status: "exit status: 1".to_string(),
            })
        } else {
            Ok(())
        };

        HookOutput {
            combined_output: format!("ran {}\n", command),
            result,
        }
    }
}
