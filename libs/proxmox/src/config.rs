//! Connection settings for a Proxmox VE cluster.

use std::fmt;

use reqwest::Url;
use thiserror::Error;

/// Environment variable holding the login name.
pub const ENV_USERNAME: &str = "PROXMOX_USERNAME";

/// Environment variable holding the password or API token secret.
pub const ENV_PASSWORD: &str = "PROXMOX_PASSWORD";

/// Environment variable holding the API base URL.
pub const ENV_URL: &str = "PROXMOX_URL";

/// Environment variable holding the target node name.
pub const ENV_NODE: &str = "PROXMOX_NODE";

/// Environment variable disabling TLS certificate checks when truthy.
pub const ENV_INSECURE_TLS: &str = "PROXMOX_INSECURE_TLS";

/// Invalid or missing connection settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("username '{0}' is not the root account")]
    NotPrivileged(String),

    #[error("invalid API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Password or API token secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// How requests are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Password login yielding a ticket cookie and CSRF token.
    Ticket,

    /// `user@realm!tokenid` with the token secret as credential.
    ApiToken,
}

/// Validated connection settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Login name, e.g. `root@pam` or `root@pam!ci`.
    pub username: String,

    /// Password or token secret.
    pub password: Secret,

    /// API base URL, e.g. `https://pve:8006/api2/json`.
    pub url: Url,

    /// Node VMs are created on.
    pub node: String,

    /// Accept self-signed certificates.
    pub insecure_tls: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let username = required(ENV_USERNAME)?;
        let password = Secret::new(required(ENV_PASSWORD)?);
        let url = parse_url(&required(ENV_URL)?)?;
        let node = required(ENV_NODE)?;
        let insecure_tls = lookup(ENV_INSECURE_TLS).is_some_and(|v| is_truthy(&v));

        let config = Self {
            username,
            password,
            url,
            node,
            insecure_tls,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that are not enforced by construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.is_empty() {
            return Err(ConfigError::Missing(ENV_USERNAME));
        }
        if self.password.expose().is_empty() {
            return Err(ConfigError::Missing(ENV_PASSWORD));
        }
        if self.node.is_empty() {
            return Err(ConfigError::Missing(ENV_NODE));
        }

        let account = self.username.split(['@', '!']).next().unwrap_or_default();
        if account != "root" {
            return Err(ConfigError::NotPrivileged(self.username.clone()));
        }

        Ok(())
    }

    pub fn auth_mode(&self) -> AuthMode {
        if self.username.contains('!') {
            AuthMode::ApiToken
        } else {
            AuthMode::Ticket
        }
    }

    /// Full URL of `path` below the API base.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Same spellings clap's boolish parser accepts as true.
fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "t" | "yes" | "y" | "on"
    )
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
