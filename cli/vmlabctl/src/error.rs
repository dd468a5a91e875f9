//! Error handling and display for the CLI.

use colored::Colorize;
use vmlab_harness::{FlowError, ServiceError, Step, StepError};
use vmlab_proxmox::{ApiError, ConfigError};

/// Print an error chain with a hint where one applies.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(hint) = hint(err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }

    if let Some(flow) = err.chain().find_map(|e| e.downcast_ref::<FlowError>()) {
        if let Some(vm_id) = flow.vm_id {
            eprintln!(
                "\n{}",
                format!("VM {vm_id} was left in place; remove it manually if needed.").dimmed()
            );
        }
    }
}

fn hint(err: &anyhow::Error) -> Option<&'static str> {
    for cause in err.chain() {
        if let Some(config) = cause.downcast_ref::<ConfigError>() {
            return Some(match config {
                ConfigError::Missing(_) => {
                    "Set PROXMOX_USERNAME, PROXMOX_PASSWORD, PROXMOX_URL and PROXMOX_NODE, or pass the matching flags."
                }
                ConfigError::NotPrivileged(_) => {
                    "VM provisioning with disk import needs the root account (root@pam or a root@pam!token)."
                }
                ConfigError::InvalidUrl { .. } => {
                    "PROXMOX_URL should look like https://pve.example.com:8006/api2/json."
                }
            });
        }

        if matches!(cause.downcast_ref::<ApiError>(), Some(ApiError::Auth(_))) {
            return Some("Check the username and password or API token secret.");
        }

        if let Some(service) = cause.downcast_ref::<ServiceError>() {
            match service {
                ServiceError::Unreachable(_) => {
                    return Some("Check PROXMOX_URL and that the API port is reachable.");
                }
                ServiceError::Rejected { status: 401, .. } => {
                    return Some("Check the username and password or API token secret.");
                }
                ServiceError::Rejected { status: 403, .. } => {
                    return Some("The account lacks a permission this operation needs.");
                }
                _ => {}
            }
        }

        if let Some(flow) = cause.downcast_ref::<FlowError>() {
            match (&flow.step, &flow.source) {
                (_, StepError::Timeout { .. }) => {
                    return Some("The task may still finish; raise --timeout-scale on slow clusters.");
                }
                (Step::VerifyRunning, StepError::Verification(_)) => {
                    return Some("Use --allow-unreachable to accept a running VM that misses the probe.");
                }
                _ => {}
            }
        }
    }

    None
}
