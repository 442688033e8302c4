//! Lifecycle hook commands
//!
//! Hooks are optional shell commands run at three points of the lifecycle:
//! before registration, after successful registration, and after the
//! deregistration attempt. They are notifications, not gates: the caller
//! logs the outcome and moves on.

use crate::error::{RegistratorError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{info, warn};

/// Default timeout for every hook
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Shell used to interpret hook commands
const SHELL: &str = "/bin/sh";

/// The lifecycle transition a hook is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    PreRegister,
    PostRegister,
    PostDeregister,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreRegister => "pre-register",
            Self::PostRegister => "post-register",
            Self::PostDeregister => "post-deregister",
        };
        f.write_str(name)
    }
}

/// A configured hook. An absent or blank command makes it a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hook {
    pub kind: HookKind,
    pub command: Option<String>,
    pub timeout: Duration,
}

impl Hook {
    pub fn new(kind: HookKind, command: Option<String>, timeout: Duration) -> Self {
        Self {
            kind,
            command,
            timeout,
        }
    }

    /// Hook with no command
    pub fn disabled(kind: HookKind) -> Self {
        Self::new(kind, None, DEFAULT_HOOK_TIMEOUT)
    }

    /// The command to run, if any
    pub fn command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// What a hook run produced
#[derive(Debug)]
pub struct HookOutput {
    /// stdout followed by stderr
    pub combined_output: String,
    pub result: Result<()>,
}

/// Executes hook commands with a bounded timeout
#[async_trait]
pub trait HookRunner: Send + Sync {
    /// Run `command`, killing it if it outlives `timeout`
    async fn run(&self, command: &str, timeout: Duration) -> HookOutput;
}

/// Run `hook` if it has a command and log what happened.
///
/// Returns whether the hook ran and succeeded; `None` when it is disabled.
pub async fn invoke<H: HookRunner + ?Sized>(runner: &H, hook: &Hook) -> Option<bool> {
    let command = hook.command()?;

    info!(hook = %hook.kind, command = %command, "Executing hook command");
    let output = runner.run(command, hook.timeout).await;

    info!(hook = %hook.kind, output = %output.combined_output.trim_end(), "Hook output");

    match output.result {
        Ok(()) => {
            info!(hook = %hook.kind, "Hook command succeeded");
            Some(true)
        }
        Err(e) => {
            warn!(hook = %hook.kind, error = %e, "Hook command failed, continuing");
            Some(false)
        }
    }
}

/// Runs hooks through `/bin/sh -c`
#[derive(Debug, Default, Clone)]
pub struct ShellHookRunner;

impl ShellHookRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HookRunner for ShellHookRunner {
    async fn run(&self, command: &str, timeout: Duration) -> HookOutput {
        let child = Command::new(SHELL)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                return HookOutput {
                    combined_output: String::new(),
                    result: Err(RegistratorError::Io(e)),
                };
            }
        };

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // Pipes are drained while waiting so a killed hook keeps what it
        // printed before the deadline
        let finished = tokio::time::timeout(timeout, async {
            let (status, out, err) = tokio::join!(
                child.wait(),
                read_into(stdout_pipe, &mut stdout),
                read_into(stderr_pipe, &mut stderr),
            );
            out?;
            err?;
            status
        })
        .await;

        let result = match finished {
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out hook command");
                }
                Err(RegistratorError::Timeout(timeout))
            }
            Ok(Err(e)) => Err(RegistratorError::Io(e)),
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(RegistratorError::Hook {
                status: status.to_string(),
            }),
        };

        let mut combined_output = String::from_utf8_lossy(&stdout).into_owned();
        combined_output.push_str(&String::from_utf8_lossy(&stderr));

        HookOutput {
            combined_output,
            result,
        }
    }
}

/// Append everything read from `pipe` to `buf` until EOF. Bytes read before
/// the future is dropped stay in `buf`.
async fn read_into<R>(pipe: Option<R>, buf: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(());
    };

    let mut chunk = [0u8; 4096];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
