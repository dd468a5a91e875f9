//! # vmlab-id
//!
//! Identifier types shared by the vmlab crates.
//!
//! ## Formats
//!
//! - [`VmId`]: the cluster-unique integer a Proxmox guest is known by
//!   (`100..=999999999`).
//! - [`Upid`]: the task handle returned by every asynchronous Proxmox call,
//!   e.g. `UPID:pve1:000A1B2C:0001E240:6530A1F0:qmstart:142:root@pam:`.
//!
//! Both parse strictly and print back to their canonical form, so a handle
//! read from the API can be passed straight back to it.

mod error;
mod types;

pub use error::IdError;
pub use types::*;
