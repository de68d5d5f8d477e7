//! OS command execution for the mount reconciler.
//!
//! The [`CommandRunner`] trait is the only surface through which OS network
//! state is read or written, which keeps the reconciler testable against a
//! scripted fake.

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

const NONLOCAL_BIND_PATH: &str = "/proc/sys/net/ipv4/ip_nonlocal_bind";

/// An OS command or sysctl access that failed. The message embeds the exit
/// status and any captured output.
#[derive(Debug, thiserror::Error)]
#[error("{command}: {message}")]
pub struct CommandError {
    pub command: String,
    pub message: String,
}

/// Executes OS network-configuration commands and sysctl accesses.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command and return its combined stdout and stderr.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError>;

    /// Read the kernel flag that permits binding to non-local addresses.
    async fn read_nonlocal_bind(&self) -> Result<bool, CommandError>;

    /// Enable the non-local bind kernel flag.
    async fn set_nonlocal_bind(&self) -> Result<(), CommandError>;
}

/// Real command execution. A single mutex serializes all commands so
/// interface and route mutations never interleave, process-wide.
#[derive(Debug, Default)]
pub struct SystemRunner {
    gate: Mutex<()>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        let _guard = self.gate.lock().await;
        let rendered = render_command(program, args);
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|err| CommandError {
                command: rendered.clone(),
                message: err.to_string(),
            })?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(CommandError {
                command: rendered,
                message: format!("{} ({})", output.status, combined.trim()),
            });
        }
        Ok(combined)
    }

    async fn read_nonlocal_bind(&self) -> Result<bool, CommandError> {
        let value = tokio::fs::read_to_string(NONLOCAL_BIND_PATH)
            .await
            .map_err(|err| CommandError {
                command: format!("read {NONLOCAL_BIND_PATH}"),
                message: err.to_string(),
            })?;
        Ok(value.trim() == "1")
    }

    async fn set_nonlocal_bind(&self) -> Result<(), CommandError> {
        tokio::fs::write(NONLOCAL_BIND_PATH, "1")
            .await
            .map_err(|err| CommandError {
                command: format!("write {NONLOCAL_BIND_PATH}"),
                message: err.to_string(),
            })
    }
}

fn render_command(program: &str, args: &[&str]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_command() {
        assert_eq!(
            render_command("ip", &["route", "add", "local", "10.0.0.0/24", "dev", "lo"]),
            "ip route add local 10.0.0.0/24 dev lo"
        );
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let runner = SystemRunner::new();
        let output = runner.run("echo", &["hello"]).await.expect("echo should run");
        assert_eq!(output.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_reports_failure_with_command() {
        let runner = SystemRunner::new();
        let err = runner
            .run("false", &[])
            .await
            .expect_err("false should fail");
        assert!(err.to_string().starts_with("false:"));
    }
}
