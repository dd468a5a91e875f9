//! Proxmox VE backend for the vmlab harness.
//!
//! [`ProxmoxClient`] speaks the JSON API under `/api2/json` and implements
//! [`vmlab_harness::ClusterService`] for one node. Requests are form encoded
//! and responses unwrapped from their `{"data": ...}` envelope.
//!
//! Two authentication schemes are supported, selected by the username:
//!
//! - `root@pam`: password login to `/access/ticket`; the ticket travels as the
//!   `PVEAuthCookie` cookie and mutating requests carry the CSRF token.
//! - `root@pam!tokenid`: API token; every request carries
//!   `Authorization: PVEAPIToken=<user>!<id>=<secret>`.

mod client;
mod config;
mod error;

pub use client::ProxmoxClient;
pub use config::{
    AuthMode, Config, ConfigError, Secret, ENV_INSECURE_TLS, ENV_NODE, ENV_PASSWORD, ENV_URL,
    ENV_USERNAME,
};
pub use error::ApiError;
