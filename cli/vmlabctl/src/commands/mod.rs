//! CLI commands.

mod next_id;
mod run;
mod status;
mod wait;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use vmlab_proxmox::{
    Config, ProxmoxClient, ENV_INSECURE_TLS, ENV_NODE, ENV_PASSWORD, ENV_URL, ENV_USERNAME,
};

use crate::output::OutputFormat;

/// vmlab - Drive a VM through its lifecycle on Proxmox VE and verify each step.
#[derive(Debug, Parser)]
#[command(name = "vmlab")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Cluster connection settings.
#[derive(Debug, Args)]
struct ConnectionArgs {
    /// Login name (root@pam, or root@pam!tokenid for an API token).
    #[arg(long, global = true, env = ENV_USERNAME)]
    username: Option<String>,

    /// Password or API token secret.
    #[arg(long, global = true, env = ENV_PASSWORD, hide_env_values = true)]
    password: Option<String>,

    /// API base URL, e.g. https://pve:8006/api2/json.
    #[arg(long, global = true, env = ENV_URL)]
    url: Option<String>,

    /// Node to create VMs on.
    #[arg(long, global = true, env = ENV_NODE)]
    node: Option<String>,

    /// Accept self-signed TLS certificates.
    #[arg(
        long,
        global = true,
        env = ENV_INSECURE_TLS,
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    insecure_tls: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full lifecycle flow on a fresh VM.
    Run(run::RunCommand),

    /// Show the id the cluster would hand out next.
    NextId(next_id::NextIdCommand),

    /// Show reported status and reachability of a VM.
    Status(status::StatusCommand),

    /// Wait for a task to finish.
    Wait(wait::WaitCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            connection: self.connection,
            format: self.format,
        };

        match self.command {
            Commands::Run(cmd) => cmd.run(ctx).await,
            Commands::NextId(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Wait(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("vmlab {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    connection: ConnectionArgs,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Validated connection settings from flags and environment.
    pub fn config(&self) -> Result<Config> {
        let args = &self.connection;
        let config = Config::from_lookup(|key| match key {
            ENV_USERNAME => args.username.clone(),
            ENV_PASSWORD => args.password.clone(),
            ENV_URL => args.url.clone(),
            ENV_NODE => args.node.clone(),
            ENV_INSECURE_TLS => Some(args.insecure_tls.to_string()),
            _ => None,
        })?;
        Ok(config)
    }

    /// Client for the configured cluster.
    pub fn client(&self) -> Result<Arc<ProxmoxClient>> {
        let config = self.config()?;
        let client = ProxmoxClient::new(config).context("Failed to create API client")?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_build_config() {
        let cli = parse(&[
            "vmlab",
            "--username",
            "root@pam",
            "--password",
            "secret",
            "--url",
            "https://pve:8006/api2/json",
            "--node",
            "pve",
            "--insecure-tls",
            "next-id",
        ]);
        let ctx = CommandContext {
            connection: cli.connection,
            format: cli.format,
        };

        let config = ctx.config().unwrap();
        assert_eq!(config.node, "pve");
        assert!(config.insecure_tls);
    }

    #[test]
    fn test_insecure_tls_from_numeric_env() {
        std::env::set_var(ENV_INSECURE_TLS, "1");
        let parsed = Cli::try_parse_from(["vmlab", "next-id"]);
        std::env::remove_var(ENV_INSECURE_TLS);

        assert!(parsed.unwrap().connection.insecure_tls);
    }

    #[test]
    fn test_json_format_flag() {
        let cli = parse(&["vmlab", "status", "142", "--format", "json"]);
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
