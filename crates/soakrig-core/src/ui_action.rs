//! The per-cycle UI action collaborator.
//!
//! What a cycle does to the device (taps, swipes, toggles) is opaque to the
//! harness. It is a [`CycleAction`]; the stock implementation runs a list of
//! external commands from `[ui_action]`. Failures are returned to the
//! controller, which logs them and carries on with the fault check.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{UiActionConfig, UiStep};
use crate::error::{Error, Result};

/// One cycle's worth of device interaction.
#[async_trait]
pub trait CycleAction: Send + Sync {
    async fn run(&self, cycle: u64) -> Result<()>;
}

/// Does nothing; used when no steps are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAction;

#[async_trait]
impl CycleAction for NoAction {
    async fn run(&self, _cycle: u64) -> Result<()> {
        Ok(())
    }
}

/// Runs configured external commands in order.
///
/// Every step runs even if an earlier one failed; the first failure is
/// what gets reported.
#[derive(Debug, Clone)]
pub struct CommandSequence {
    steps: Vec<UiStep>,
    step_timeout: Duration,
}

impl CommandSequence {
    #[must_use]
    pub fn new(steps: Vec<UiStep>, step_timeout: Duration) -> Self {
        Self {
            steps,
            step_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &UiActionConfig) -> Self {
        Self::new(config.steps.clone(), Duration::from_secs(config.timeout_secs))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    async fn run_step(&self, step: &UiStep) -> Result<()> {
        let output = tokio::process::Command::new(&step.program)
            .args(&step.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.step_timeout, output)
            .await
            .map_err(|_| {
                Error::Runtime(format!(
                    "{} timed out after {}s",
                    step.program,
                    self.step_timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Runtime(format!("failed to run {}: {e}", step.program)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            info!(program = %step.program, "{}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            info!(program = %step.program, "{}", stderr.trim());
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Runtime(format!(
                "{} exited with {}",
                step.program, output.status
            )))
        }
    }
}

#[async_trait]
impl CycleAction for CommandSequence {
    async fn run(&self, cycle: u64) -> Result<()> {
        let mut first_error = None;
        for (index, step) in self.steps.iter().enumerate() {
            debug!(cycle, step = index, program = %step.program, args = ?step.args, "UI step");
            if let Err(e) = self.run_step(step).await {
                warn!(cycle, step = index, error = %e, "UI step failed");
                first_error.get_or_insert(e);
            }
            if step.delay_after_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.delay_after_ms)).await;
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(program: &str, args: &[&str]) -> UiStep {
        UiStep {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            delay_after_ms: 0,
        }
    }

    #[tokio::test]
    async fn empty_sequence_succeeds() {
        let seq = CommandSequence::from_config(&UiActionConfig::default());
        assert!(seq.is_empty());
        seq.run(1).await.unwrap();
        NoAction.run(1).await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_is_reported_not_panicked() {
        let seq = CommandSequence::new(
            vec![step("soakrig-definitely-not-a-program", &[])],
            Duration::from_secs(5),
        );
        let err = seq.run(3).await.unwrap_err();
        assert!(err.to_string().contains("failed to run"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn later_steps_run_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let seq = CommandSequence::new(
            vec![
                step("false", &[]),
                step("touch", &[marker.to_str().unwrap()]),
            ],
            Duration::from_secs(5),
        );
        let err = seq.run(1).await.unwrap_err();
        assert!(err.to_string().contains("exited with"));
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn step_timeout_enforced() {
        let seq = CommandSequence::new(vec![step("sleep", &["5"])], Duration::from_millis(100));
        let err = seq.run(1).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
