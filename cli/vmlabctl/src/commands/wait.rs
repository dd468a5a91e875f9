//! Wait for an arbitrary task.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use vmlab_harness::TaskProbe;
use vmlab_id::Upid;
use vmlab_tasks::{TaskWaiter, WaitError, WaitPolicy};

use crate::output::{print_single, print_success, OutputFormat};

use super::CommandContext;

/// Block until a task finishes or the timeout passes.
#[derive(Debug, Args)]
pub struct WaitCommand {
    /// Task id (UPID:node:...).
    upid: Upid,

    /// Seconds to wait before giving up.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Seconds between status checks.
    #[arg(long, default_value_t = 1)]
    poll_interval: u64,
}

#[derive(Debug, Serialize)]
struct WaitResponse<'a> {
    upid: &'a Upid,
    polls: u32,
    elapsed_ms: u64,
}

impl WaitCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.client()?;
        let policy = WaitPolicy::new(
            Duration::from_secs(self.poll_interval.max(1)),
            Duration::from_secs(self.timeout),
        );

        let outcome = match TaskWaiter::default()
            .wait(&TaskProbe(&*client), &self.upid, &policy)
            .await
        {
            Ok(outcome) => outcome,
            Err(WaitError::TaskFailed { detail, polls }) => {
                bail!("Task {} failed after {polls} checks: {detail}", self.upid)
            }
            Err(err) => return Err(err.into()),
        };

        match ctx.format {
            OutputFormat::Table => print_success(&format!(
                "Task {} finished after {} checks ({:.1}s)",
                self.upid,
                outcome.polls,
                outcome.elapsed.as_secs_f64()
            )),
            OutputFormat::Json => print_single(&WaitResponse {
                upid: &self.upid,
                polls: outcome.polls,
                elapsed_ms: outcome.elapsed.as_millis() as u64,
            }),
        }
        Ok(())
    }
}
