//! Next free VM id.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use vmlab_harness::IdentifierAllocator;
use vmlab_id::VmId;

use crate::output::{print_info, print_single, OutputFormat};

use super::CommandContext;

/// Show the next free VM id.
#[derive(Debug, Args)]
pub struct NextIdCommand {}

#[derive(Debug, Serialize)]
struct NextIdResponse {
    vmid: VmId,
}

impl NextIdCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let allocator = IdentifierAllocator::new(ctx.client()?);
        let vmid = allocator.next_id().await?;

        match ctx.format {
            OutputFormat::Table => {
                println!("{vmid}");
                print_info("The id is only reserved once a VM is created with it.");
            }
            OutputFormat::Json => print_single(&NextIdResponse { vmid }),
        }
        Ok(())
    }
}
