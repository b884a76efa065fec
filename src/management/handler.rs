// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Consumer callbacks for challenges raised by OpenVPN

use async_trait::async_trait;

use super::events::{RemoteAction, RemoteEndpoint, SignRequest};
use crate::secrets::{Credentials, Secret};

/// Answers challenges the monitor cannot answer on its own
///
/// Callbacks run on the monitor task. They may send fire-and-forget
/// commands but must not await replies through the session, because the
/// monitor is the one that would deliver them. Returning `None` declines
/// the challenge and stops the monitor, since OpenVPN cannot proceed.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    /// `>NEED-CERTIFICATE:` - return the DER-encoded client certificate
    async fn certificate_requested(&self, _hint: &str) -> Option<Vec<u8>> {
        None
    }

    /// `>PASSWORD:Need '<realm>' password`
    async fn password_requested(&self, _realm: &str) -> Option<Secret> {
        None
    }

    /// `>PASSWORD:Need '<realm>' username/password`, unless credentials are cached
    async fn credentials_requested(&self, _realm: &str) -> Option<Credentials> {
        None
    }

    /// `>RSA_SIGN:` / `>PK_SIGN:` - return the signature over `request.data`
    async fn sign_requested(&self, _request: &SignRequest) -> Option<Vec<u8>> {
        None
    }

    /// `>REMOTE:` - choose which remote OpenVPN connects to
    async fn remote_requested(&self, _remote: &RemoteEndpoint) -> RemoteAction {
        RemoteAction::Accept
    }
}

/// Handler that declines every challenge and accepts every remote
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineAll;

#[async_trait]
impl ChallengeHandler for DeclineAll {}

/// Handler answering credential prompts from fixed values
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub credentials: Option<Credentials>,
    pub private_key_password: Option<Secret>,
}

#[async_trait]
impl ChallengeHandler for StaticCredentials {
    async fn password_requested(&self, realm: &str) -> Option<Secret> {
        match realm {
            "Private Key" => self.private_key_password.clone(),
            _ => self.credentials.as_ref().map(|c| c.secret.clone()),
        }
    }

    async fn credentials_requested(&self, _realm: &str) -> Option<Credentials> {
        self.credentials.clone()
    }
}
