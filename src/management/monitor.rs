// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! The task that reads the management connection

use std::convert::Infallible;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::command::{Shape, SingleCommand};
use super::decode::{self, NeedKind, PasswordPrompt};
use super::error::{Result, SessionError};
use super::events::{Event, RemoteAction, SignRequest};
use super::handler::ChallengeHandler;
use super::params::{escape_param, single_line};
use super::session::Shared;

/// Reads lines, settles queued commands and answers challenges
pub(crate) struct Monitor<R> {
    shared: Arc<Shared>,
    reader: R,
    handler: Arc<dyn ChallengeHandler>,
    ct: CancellationToken,
    /// Message of the last `>FATAL:`, reported when the connection closes
    fatal: Option<String>,
}

impl<R> Monitor<R>
where
    R: AsyncBufRead + Send + Unpin,
{
    pub(crate) fn new(
        shared: Arc<Shared>,
        reader: R,
        handler: Arc<dyn ChallengeHandler>,
        ct: CancellationToken,
    ) -> Self {
        Self {
            shared,
            reader,
            handler,
            ct,
            fatal: None,
        }
    }

    /// Run until the connection closes, a challenge fails or the session is cancelled
    pub(crate) async fn run(mut self) -> Arc<SessionError> {
        debug!("Management monitor started");
        let cause = match self.read_loop().await {
            Ok(never) => match never {},
            Err(e) => Arc::new(e),
        };

        match cause.as_ref() {
            e if e.is_cancellation() => info!("Management monitor stopped: {}", e),
            SessionError::Io(_) | SessionError::ConnectionClosed => {
                warn!("Management connection lost: {}", cause)
            }
            e => error!("Management monitor failed: {}", e),
        }
        self.shared.terminate(cause.clone());
        cause
    }

    async fn read_loop(&mut self) -> Result<Infallible> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = self.ct.cancelled() => return Err(SessionError::Cancelled),
                read = self.reader.read_until(b'\n', &mut buf) => read?,
            };

            if read == 0 {
                return match self.fatal.take() {
                    Some(message) => {
                        info!("Management connection closed after fatal error");
                        self.shared
                            .terminate(Arc::new(SessionError::Fatal(message)));
                        self.ct.cancelled().await;
                        Err(SessionError::Cancelled)
                    }
                    None => Err(SessionError::ConnectionClosed),
                };
            }

            // Log lines may carry paths in a legacy code page
            let line = String::from_utf8_lossy(&buf);
            let text = line.trim_end_matches(['\r', '\n']);
            match text.strip_prefix('>') {
                Some(notification) => {
                    let (tag, payload) = notification.split_once(':').unwrap_or((notification, ""));
                    self.notification(tag, payload).await?;
                }
                None => self.reply(text),
            }
        }
    }

    fn reply(&self, line: &str) {
        let queue = &self.shared.queue;
        match queue.head() {
            Some(Shape::Multiline) if line == "END" => {
                if !queue.finish_multiline() {
                    debug!("Ignoring END without a multi-line command");
                }
            }
            Some(Shape::Multiline) => {
                if let Some(event) = queue.feed_head(line) {
                    self.shared.publish(event);
                }
            }
            Some(Shape::Single) => match decode::status(line) {
                Some((success, response)) => {
                    if success {
                        debug!("MGMT: SUCCESS: {}", response);
                    } else {
                        warn!("OpenVPN error: {}", response);
                    }
                    if !queue.settle_status(success, response) {
                        debug!("Ignoring status line without a pending command");
                    }
                }
                None => debug!("Ignoring line while awaiting status: {}", line),
            },
            None => debug!("Ignoring unsolicited line: {}", line),
        }
    }

    async fn notification(&mut self, tag: &str, payload: &str) -> Result<()> {
        match tag {
            "BYTECOUNT" => self
                .shared
                .publish(Event::ByteCount(decode::byte_count(payload))),
            "BYTECOUNT_CLI" => self
                .shared
                .publish(Event::ByteCountClient(decode::client_byte_count(payload))),
            "ECHO" => self.shared.publish(Event::Echo(decode::echo(payload))),
            "FATAL" => {
                error!("OpenVPN fatal error: {}", payload);
                self.fatal = Some(payload.to_string());
                self.shared.publish(Event::Fatal(payload.to_string()));
            }
            "HOLD" => {
                info!("OpenVPN is on hold: {}", payload);
                self.shared.publish(Event::Hold(decode::hold(payload)));
            }
            "INFO" => {
                info!("Server INFO: {}", payload);
                self.shared.mark_ready();
                self.shared.publish(Event::Info(payload.to_string()));
            }
            "LOG" => self.shared.publish(Event::Log(decode::log(payload))),
            "STATE" => {
                let snapshot = decode::state(payload);
                debug!("OpenVPN state: {:?}", snapshot.state);
                self.shared.publish(Event::State(snapshot));
            }
            "NEED-CERTIFICATE" => self.certificate(payload).await?,
            "PASSWORD" => self.password(payload).await?,
            "PK_SIGN" => self.sign("pk-sig", decode::pk_sign(payload)?).await?,
            "RSA_SIGN" => self.sign("rsa-sig", decode::rsa_sign(payload)?).await?,
            "PROXY" => self.send("proxy NONE").await?,
            "REMOTE" => {
                let remote = decode::remote(payload);
                let action = self.handler.remote_requested(&remote).await;
                if let RemoteAction::Modify { host, .. } = &action {
                    single_line(host)?;
                }
                info!("Remote {}:{} -> {}", remote.host, remote.port, action);
                self.send(&format!("remote {action}")).await?;
            }
            "CLIENT" | "CRV1" | "NEED-OK" | "NEED-STR" | "PKCS11ID-COUNT" => {
                debug!("Ignoring >{} notification", tag)
            }
            _ => debug!("Unknown notification >{}:{}", tag, payload),
        }
        Ok(())
    }

    async fn password(&mut self, payload: &str) -> Result<()> {
        match decode::password(payload) {
            PasswordPrompt::VerificationFailed { realm } => {
                warn!("Authentication failed for '{}'", realm);
                self.shared.publish(Event::AuthenticationFailed { realm });
            }
            PasswordPrompt::AuthToken(token) => {
                info!("Received auth-token from server (length: {})", token.len());
                self.shared.publish(Event::AuthenticationToken(token));
            }
            PasswordPrompt::Need {
                realm,
                kind: NeedKind::Password,
            } => {
                let secret = self
                    .handler
                    .password_requested(&realm)
                    .await
                    .ok_or(SessionError::Declined("password"))?;
                single_line(secret.expose())?;
                let text = Zeroizing::new(format!(
                    "password {} {}",
                    escape_param(&realm),
                    escape_param(secret.expose())
                ));
                self.send(&text).await?;
            }
            PasswordPrompt::Need {
                realm,
                kind: NeedKind::UsernamePassword,
            } => {
                let credentials = match self.shared.credentials.get() {
                    Some(cached) => {
                        info!("Using cached credentials for '{}'", realm);
                        cached
                    }
                    None => {
                        let credentials = self
                            .handler
                            .credentials_requested(&realm)
                            .await
                            .ok_or(SessionError::Declined("username/password"))?;
                        single_line(&credentials.username)?;
                        single_line(credentials.secret.expose())?;
                        self.shared.credentials.store(credentials.clone());
                        credentials
                    }
                };
                let realm = escape_param(&realm);
                self.send(&format!(
                    "username {} {}",
                    realm,
                    escape_param(&credentials.username)
                ))
                .await?;
                let text = Zeroizing::new(format!(
                    "password {} {}",
                    realm,
                    escape_param(credentials.secret.expose())
                ));
                self.send(&text).await?;
            }
            PasswordPrompt::Need {
                realm,
                kind: NeedKind::Other(kind),
            } => warn!("Unsupported {} request for '{}'", kind, realm),
            PasswordPrompt::Unrecognized => debug!("Ignoring >PASSWORD:{}", payload),
        }
        Ok(())
    }

    async fn certificate(&mut self, hint: &str) -> Result<()> {
        let der = self
            .handler
            .certificate_requested(hint)
            .await
            .ok_or(SessionError::Declined("certificate"))?;
        info!("Sending client certificate ({} bytes)", der.len());
        self.send(&format!(
            "certificate\n-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\nEND",
            decode::wrap_base64(&der)
        ))
        .await
    }

    async fn sign(&mut self, verb: &str, request: SignRequest) -> Result<()> {
        debug!(
            "Signature requested over {} bytes ({:?})",
            request.data.len(),
            request.algorithm
        );
        let signature = self
            .handler
            .sign_requested(&request)
            .await
            .ok_or(SessionError::Declined("signature"))?;
        self.send(&format!("{verb}\n{}\nEND", decode::wrap_base64(&signature)))
            .await
    }

    /// Answer a challenge; the daemon's status line is consumed and dropped
    async fn send(&mut self, text: &str) -> Result<()> {
        let (cmd, _) = SingleCommand::new();
        self.shared.send(text, vec![cmd.into()], &self.ct).await
    }
}
