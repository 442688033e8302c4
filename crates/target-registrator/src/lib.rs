//! # Target Registrator
//!
//! Sidecar that keeps one endpoint (typically the pod IP) registered in an
//! ELBv2 target group for as long as the pod runs.
//!
//! ## Lifecycle
//!
//! ```text
//! DISCOVERING ──► REGISTERING ──► (WAITING_HEALTHY) ──► BLOCKED
//!      │                                                   │ SIGTERM/SIGINT
//!      ▼                                                   ▼
//!  FATAL_EXIT                    DONE ◄── DEREGISTERING ◄── CANCELLING
//! ```
//!
//! - Discovery failure is the only fatal error
//! - Registration and health-wait failures are logged; the target is still
//!   deregistered on shutdown
//! - Hooks run around registration and after deregistration, best-effort
//!
//! See [`lifecycle`] for the controller and [`retry`](mod@retry) for the backoff policy.

#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod elb;
pub mod error;
pub mod hook;
pub mod lifecycle;
pub mod retry;
pub mod signal;

// Error handling
pub use error::{RegistratorError, Result};

// Backend interface and AWS implementation
pub use backend::{Endpoint, GroupHandle, TargetGroupBackend};
pub use elb::ElbBackend;

// Hooks
pub use hook::{DEFAULT_HOOK_TIMEOUT, Hook, HookKind, HookOutput, HookRunner, ShellHookRunner};

// Configuration
pub use config::{DEFAULT_WAIT_IN_SERVICE_TIMEOUT, RegistratorConfig, TargetGroupRef};

// Lifecycle
pub use lifecycle::{EpisodeReport, EpisodeState, LifecycleController, RegistrationOutcome};

// Retry
pub use retry::{RetryPolicy, retry, retry_cancellable};

// Signals
pub use signal::ShutdownSignal;
