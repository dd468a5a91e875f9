//! VM status.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use vmlab_harness::{ClusterService, VmStatus};
use vmlab_id::VmId;

use crate::output::print_output;

use super::CommandContext;

/// Show the reported status of a VM.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// VM id.
    vmid: VmId,
}

#[derive(Debug, Serialize, Tabled)]
struct StatusRow {
    #[tabled(rename = "VMID")]
    vmid: VmId,

    #[tabled(rename = "Status")]
    status: VmStatus,

    #[tabled(rename = "Reachable")]
    reachable: bool,
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.client()?;

        let reachable = client.ping_vm(self.vmid).await?;
        let status = client.vm_status(self.vmid).await?;

        print_output(
            &[StatusRow {
                vmid: self.vmid,
                status,
                reachable,
            }],
            ctx.format,
        );
        Ok(())
    }
}
