// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Secret holders and the per-session credential cache used for silent
//! reauthentication

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

/// A password or token, wiped from memory when dropped
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value; keep the borrow as short as possible
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.0.len())
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Username and password (or auth-token) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<Secret>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

/// Credentials remembered for the lifetime of one session
///
/// Empty until the first username/password challenge is answered, then
/// cached until OpenVPN reports an authentication failure or forgets its
/// passwords. An auth-token pushed by the server replaces the cached secret.
#[derive(Debug, Default)]
pub struct CredentialCache {
    inner: Mutex<Option<Credentials>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Credentials>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Option<Credentials> {
        self.lock().clone()
    }

    pub fn is_cached(&self) -> bool {
        self.lock().is_some()
    }

    pub fn store(&self, credentials: Credentials) {
        debug!("Caching credentials for user {}", credentials.username);
        *self.lock() = Some(credentials);
    }

    /// Replace the cached secret with an auth-token; no-op when nothing is cached
    pub fn rotate_secret(&self, token: Secret) -> bool {
        match self.lock().as_mut() {
            Some(credentials) => {
                debug!("Replacing cached secret with auth-token ({} bytes)", token.len());
                credentials.secret = token;
                true
            }
            None => false,
        }
    }

    /// Forget the cached credentials; returns whether anything was cached
    pub fn clear(&self) -> bool {
        let cleared = self.lock().take().is_some();
        if cleared {
            debug!("Cleared cached credentials");
        }
        cleared
    }
}
