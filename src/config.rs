// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Monitor configuration loading and validation

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::management::{AuthRetry, StaticCredentials};
use crate::secrets::{Credentials, Secret};

/// Environment variable overriding [`MonitorConfig::endpoint`]
pub const ENDPOINT_ENV: &str = "OVPN_MGMT_ENDPOINT";
/// Environment variable overriding [`MonitorConfig::management_password`]
pub const PASSWORD_ENV: &str = "OVPN_MGMT_PASSWORD";

/// Where the OpenVPN management interface listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `unix:/run/openvpn/mgmt.sock`
    Unix(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                bail!("Unix endpoint is missing a socket path");
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("Endpoint '{}' is neither unix:<path> nor host:port", s))?;
        if host.is_empty() {
            bail!("Endpoint '{}' has no host", s);
        }
        port.parse::<u16>()
            .with_context(|| format!("Endpoint '{}' has an invalid port", s))?;
        Ok(Self::Tcp(s.to_string()))
    }
}

/// Settings of the `openvpn-mgmt-monitor` binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Management interface endpoint (`unix:/path` or `host:port`)
    pub endpoint: String,
    /// Password expected after `ENTER PASSWORD:`
    pub management_password: Option<Secret>,
    /// Username for username/password challenges
    pub username: Option<String>,
    /// Password for username/password challenges
    pub password: Option<Secret>,
    /// Answer to the "Private Key" password challenge
    pub private_key_password: Option<Secret>,
    /// Byte-count notification interval in seconds; 0 leaves it off
    pub bytecount_interval: u32,
    /// Replay and subscribe to state changes
    pub state: bool,
    /// Replay and subscribe to log lines
    pub log: bool,
    /// Replay and subscribe to echo commands
    pub echo: bool,
    /// Send `hold release` once set up
    pub release_hold: bool,
    pub auth_retry: Option<AuthRetry>,
    /// How long to wait for a Unix management socket to appear
    pub socket_wait_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            management_password: None,
            username: None,
            password: None,
            private_key_password: None,
            bytecount_interval: 0,
            state: true,
            log: true,
            echo: false,
            release_hold: true,
            auth_retry: None,
            socket_wait_secs: 5,
        }
    }
}

impl MonitorConfig {
    /// Read a JSON config file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_json(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse monitor config")
    }

    /// Apply `OVPN_MGMT_*` overrides looked up through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENDPOINT_ENV) {
            self.endpoint = endpoint;
        }
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.management_password = Some(Secret::from(password));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            bail!("No management endpoint configured");
        }
        self.endpoint()?;
        if self.password.is_some() && self.username.is_none() {
            bail!("A password is configured without a username");
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        self.endpoint.parse()
    }

    pub fn socket_wait(&self) -> Duration {
        Duration::from_secs(self.socket_wait_secs)
    }

    /// Challenge handler answering from the configured credentials
    pub fn handler(&self) -> StaticCredentials {
        let credentials = self.username.as_ref().map(|username| {
            Credentials::new(username.clone(), self.password.clone().unwrap_or_default())
        });
        StaticCredentials {
            credentials,
            private_key_password: self.private_key_password.clone(),
        }
    }
}
