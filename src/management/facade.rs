// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Typed wrappers over the management command vocabulary
//!
//! Every call sends one command and waits for its reply. Cancelling `ct`
//! abandons only that call.

use std::collections::BTreeMap;
use std::str::FromStr;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::command::MultilineReply;
use super::error::{Result, SessionError};
use super::events::{AuthRetry, EchoEntry, LogEntry, Signal, StateSnapshot};
use super::session::Session;

fn on_off(enable: bool) -> &'static str {
    if enable {
        "on"
    } else {
        "off"
    }
}

/// Value of a `key=value` query reply such as `hold=0`
fn query_value<T: FromStr>(reply: &str, key: &str) -> Result<T> {
    reply
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('='))
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| SessionError::UnexpectedReply(reply.to_string()))
}

fn mismatched(reply: &MultilineReply) -> SessionError {
    SessionError::UnexpectedReply(format!("{} reply", reply.kind()))
}

fn echo_entries(reply: MultilineReply) -> Result<Vec<EchoEntry>> {
    match reply {
        MultilineReply::Echo(entries) => Ok(entries),
        other => Err(mismatched(&other)),
    }
}

fn log_entries(reply: MultilineReply) -> Result<Vec<LogEntry>> {
    match reply {
        MultilineReply::Log(entries) => Ok(entries),
        other => Err(mismatched(&other)),
    }
}

fn state_entries(reply: MultilineReply) -> Result<Vec<StateSnapshot>> {
    match reply {
        MultilineReply::State(entries) => Ok(entries),
        other => Err(mismatched(&other)),
    }
}

impl Session {
    async fn multiline(
        &self,
        text: &str,
        collector: MultilineReply,
        ct: &CancellationToken,
    ) -> Result<MultilineReply> {
        self.send_multiline(text, collector, ct).await?.wait(ct).await
    }

    /// Replay history and subscribe in one command; history goes to subscribers
    async fn combined(
        &self,
        text: &str,
        collector: MultilineReply,
        ct: &CancellationToken,
    ) -> Result<String> {
        let (response, _) = self.send_combined(text, collector, ct).await?.wait(ct).await?;
        Ok(response)
    }

    /// `bytecount n`; 0 disables byte-count notifications
    pub async fn set_byte_count(&self, interval: u32, ct: &CancellationToken) -> Result<String> {
        self.command(&format!("bytecount {interval}"), ct).await
    }

    pub async fn enable_echo(&self, enable: bool, ct: &CancellationToken) -> Result<String> {
        self.command(&format!("echo {}", on_off(enable)), ct).await
    }

    pub async fn replay_echo(&self, ct: &CancellationToken) -> Result<Vec<EchoEntry>> {
        echo_entries(self.multiline("echo all", MultilineReply::Echo(Vec::new()), ct).await?)
    }

    pub async fn replay_and_enable_echo(&self, ct: &CancellationToken) -> Result<String> {
        self.combined("echo on all", MultilineReply::Echo(Vec::new()), ct)
            .await
    }

    /// Whether hold is enabled
    pub async fn get_hold(&self, ct: &CancellationToken) -> Result<bool> {
        let reply = self.command("hold", ct).await?;
        Ok(query_value::<u32>(&reply, "hold")? != 0)
    }

    pub async fn enable_hold(&self, enable: bool, ct: &CancellationToken) -> Result<String> {
        self.command(&format!("hold {}", on_off(enable)), ct).await
    }

    pub async fn release_hold(&self, ct: &CancellationToken) -> Result<String> {
        info!("Releasing OpenVPN hold");
        self.command("hold release", ct).await
    }

    pub async fn enable_log(&self, enable: bool, ct: &CancellationToken) -> Result<String> {
        self.command(&format!("log {}", on_off(enable)), ct).await
    }

    /// The last `count` log lines
    pub async fn replay_log(&self, count: u32, ct: &CancellationToken) -> Result<Vec<LogEntry>> {
        log_entries(
            self.multiline(&format!("log {count}"), MultilineReply::Log(Vec::new()), ct)
                .await?,
        )
    }

    pub async fn replay_log_all(&self, ct: &CancellationToken) -> Result<Vec<LogEntry>> {
        log_entries(self.multiline("log all", MultilineReply::Log(Vec::new()), ct).await?)
    }

    pub async fn replay_and_enable_log(&self, ct: &CancellationToken) -> Result<String> {
        self.combined("log on all", MultilineReply::Log(Vec::new()), ct)
            .await
    }

    pub async fn get_mute(&self, ct: &CancellationToken) -> Result<u32> {
        let reply = self.command("mute", ct).await?;
        query_value(&reply, "mute")
    }

    pub async fn set_mute(&self, mute: u32, ct: &CancellationToken) -> Result<String> {
        self.command(&format!("mute {mute}"), ct).await
    }

    /// PID of the OpenVPN process
    pub async fn get_process_id(&self, ct: &CancellationToken) -> Result<u32> {
        let reply = self.command("pid", ct).await?;
        query_value(&reply, "pid")
    }

    /// Make OpenVPN forget passwords; the session's cached credentials go too
    pub async fn forget_passwords(&self, ct: &CancellationToken) -> Result<String> {
        let response = self.command("forget-passwords", ct).await?;
        self.shared.credentials.clear();
        Ok(response)
    }

    pub async fn send_signal(&self, signal: Signal, ct: &CancellationToken) -> Result<String> {
        info!("Sending {} to OpenVPN", signal);
        self.command(&format!("signal {signal}"), ct).await
    }

    /// The current state, if OpenVPN reported one
    pub async fn replay_current_state(
        &self,
        ct: &CancellationToken,
    ) -> Result<Option<StateSnapshot>> {
        let states =
            state_entries(self.multiline("state", MultilineReply::State(Vec::new()), ct).await?)?;
        Ok(states.into_iter().last())
    }

    pub async fn enable_state(&self, enable: bool, ct: &CancellationToken) -> Result<String> {
        self.command(&format!("state {}", on_off(enable)), ct).await
    }

    /// The last `count` state changes
    pub async fn replay_state(
        &self,
        count: u32,
        ct: &CancellationToken,
    ) -> Result<Vec<StateSnapshot>> {
        state_entries(
            self.multiline(
                &format!("state {count}"),
                MultilineReply::State(Vec::new()),
                ct,
            )
            .await?,
        )
    }

    pub async fn replay_state_all(&self, ct: &CancellationToken) -> Result<Vec<StateSnapshot>> {
        state_entries(
            self.multiline("state all", MultilineReply::State(Vec::new()), ct)
                .await?,
        )
    }

    pub async fn replay_and_enable_state(&self, ct: &CancellationToken) -> Result<String> {
        self.combined("state on all", MultilineReply::State(Vec::new()), ct)
            .await
    }

    pub async fn get_verbosity(&self, ct: &CancellationToken) -> Result<u32> {
        let reply = self.command("verb", ct).await?;
        query_value(&reply, "verb")
    }

    pub async fn set_verbosity(&self, verbosity: u32, ct: &CancellationToken) -> Result<String> {
        self.command(&format!("verb {verbosity}"), ct).await
    }

    /// `version` reply as a key/value map, e.g. `Management Version` -> `5`
    pub async fn get_version(
        &self,
        ct: &CancellationToken,
    ) -> Result<BTreeMap<String, Option<String>>> {
        match self
            .multiline("version", MultilineReply::Version(BTreeMap::new()), ct)
            .await?
        {
            MultilineReply::Version(map) => Ok(map),
            other => Err(mismatched(&other)),
        }
    }

    /// Announce the management client version; OpenVPN does not answer
    pub async fn set_version(&self, version: u32, ct: &CancellationToken) -> Result<()> {
        self.send_unanswered(&format!("version {version}"), ct).await
    }

    pub async fn set_authentication_retry(
        &self,
        mode: AuthRetry,
        ct: &CancellationToken,
    ) -> Result<String> {
        self.command(&format!("auth-retry {mode}"), ct).await
    }
}
