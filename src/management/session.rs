// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Management session: transport ownership, command sending and waiting

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::command::{Command, CommandQueue, MultilineCommand, MultilineReply, Reply, SingleCommand};
use super::error::{Result, SessionError};
use super::events::Event;
use super::handler::ChallengeHandler;
use super::monitor::Monitor;
use super::params::single_line;
use crate::secrets::{CredentialCache, Secret};

/// Prompt sent by OpenVPN when `--management` is configured with a password file
const PASSWORD_PROMPT: &[u8; 15] = b"ENTER PASSWORD:";

/// Extra wait after the first `>INFO:`, like OpenVPN GUI does
const SETTLE_DELAY: Duration = Duration::from_millis(100);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared between the session handle, pending replies and the monitor
pub(crate) struct Shared {
    /// Serialises "enqueue + write" across all senders
    writer: tokio::sync::Mutex<Writer>,
    pub(crate) queue: CommandQueue,
    pub(crate) credentials: CredentialCache,
    fault: OnceLock<Arc<SessionError>>,
    finished: CancellationToken,
    ready: watch::Sender<bool>,
    events: broadcast::Sender<Event>,
}

impl Shared {
    pub(crate) fn fault(&self) -> Option<Arc<SessionError>> {
        self.fault.get().cloned()
    }

    /// Record the terminal fault (first one wins) and release every waiter
    pub(crate) fn terminate(&self, cause: Arc<SessionError>) {
        if self.fault.set(cause).is_err() {
            debug!("Session fault already recorded");
        }
        self.finished.cancel();
    }

    fn terminated(&self) -> SessionError {
        SessionError::MonitorTerminated(
            self.fault()
                .unwrap_or_else(|| Arc::new(SessionError::ConnectionClosed)),
        )
    }

    pub(crate) fn mark_ready(&self) {
        if !self.ready.send_replace(true) {
            info!("OpenVPN ready");
        }
    }

    /// Apply the credential policy for an event and fan it out
    pub(crate) fn publish(&self, event: Event) {
        match &event {
            Event::Echo(entry) if entry.command.as_deref() == Some("forget-passwords") => {
                self.credentials.clear();
            }
            Event::AuthenticationFailed { .. } => {
                // Force the user to be prompted again
                self.credentials.clear();
            }
            Event::AuthenticationToken(token) => {
                // OpenVPN accepts the token as password on reauthentication
                self.credentials.rotate_secret(token.clone());
            }
            _ => {}
        }
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Enqueue `commands` and write `text` as one step relative to other senders
    pub(crate) async fn send(
        &self,
        text: &str,
        commands: Vec<Command>,
        ct: &CancellationToken,
    ) -> Result<()> {
        if self.fault.get().is_some() {
            return Err(SessionError::InError);
        }

        let mut writer = tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(SessionError::Cancelled),
            writer = self.writer.lock() => writer,
        };
        if self.fault.get().is_some() {
            return Err(SessionError::InError);
        }

        let ids = self.queue.enqueue(commands);
        let mut bytes = Zeroizing::new(Vec::with_capacity(text.len() + 1));
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');

        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!("Failed to write to management interface: {}", e);
            self.queue.retract(&ids);
            return Err(SessionError::Io(e));
        }
        Ok(())
    }

    /// Wait for a settle signal with priority cancellation > monitor fault > completion
    async fn wait_for<T>(&self, rx: oneshot::Receiver<T>, ct: &CancellationToken) -> Result<T> {
        tokio::select! {
            biased;
            _ = ct.cancelled() => Err(SessionError::Cancelled),
            _ = self.finished.cancelled() => Err(self.terminated()),
            settled = rx => settled.map_err(|_| self.terminated()),
        }
    }
}

/// Verb of a command line, safe to log
fn verb(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or_default()
}

/// A sent command awaiting its `SUCCESS:`/`ERROR:` line
#[must_use = "the reply is only observed by waiting"]
pub struct PendingReply {
    shared: Arc<Shared>,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// The `SUCCESS:` text, or [`SessionError::CommandFailed`] for `ERROR:`
    pub async fn wait(self, ct: &CancellationToken) -> Result<String> {
        self.reply(ct).await?.into_result()
    }

    pub async fn reply(self, ct: &CancellationToken) -> Result<Reply> {
        self.shared.wait_for(self.rx, ct).await
    }
}

/// A sent command awaiting its `END`-terminated reply
#[must_use = "the reply is only observed by waiting"]
pub struct PendingMultiline {
    shared: Arc<Shared>,
    rx: oneshot::Receiver<MultilineReply>,
}

impl PendingMultiline {
    pub async fn wait(self, ct: &CancellationToken) -> Result<MultilineReply> {
        self.shared.wait_for(self.rx, ct).await
    }
}

/// One wire command answered by a status line followed by a multi-line history
#[must_use = "the reply is only observed by waiting"]
pub(crate) struct PendingCombined {
    shared: Arc<Shared>,
    first: oneshot::Receiver<Reply>,
    second: oneshot::Receiver<MultilineReply>,
}

impl PendingCombined {
    /// Reports the status line once the history has ended
    ///
    /// A rejected command fails with [`SessionError::CommandFailed`] right
    /// away; OpenVPN sends no history after `ERROR:`.
    pub(crate) async fn wait(self, ct: &CancellationToken) -> Result<(String, MultilineReply)> {
        let response = self.shared.wait_for(self.first, ct).await?.into_result()?;
        let history = self.shared.wait_for(self.second, ct).await?;
        Ok((response, history))
    }
}

/// OpenVPN management console session
///
/// Owns the management connection. A single monitor task reads every line,
/// dispatches notifications and settles queued commands; callers write
/// commands and wait for their replies. Dropping the session stops the
/// monitor.
pub struct Session {
    pub(crate) shared: Arc<Shared>,
    monitor: Mutex<Option<JoinHandle<Arc<SessionError>>>>,
    shutdown: CancellationToken,
}

impl Session {
    /// Bind a connected management stream and spawn the monitor
    ///
    /// With a `password`, the `ENTER PASSWORD:` prompt is checked and the
    /// password sent before anything else. Returns once OpenVPN reported
    /// `>INFO:`. Cancelling `ct` later also stops the monitor.
    pub async fn start<S>(
        stream: S,
        password: Option<Secret>,
        handler: Arc<dyn ChallengeHandler>,
        events: broadcast::Sender<Event>,
        ct: &CancellationToken,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if let Some(password) = &password {
            single_line(password.expose())?;
        }
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        if password.is_some() {
            let mut prompt = [0u8; 15];
            tokio::select! {
                biased;
                _ = ct.cancelled() => return Err(SessionError::Cancelled),
                read = reader.read_exact(&mut prompt) => { read?; }
            }
            if &prompt != PASSWORD_PROMPT {
                return Err(SessionError::UnexpectedReply(
                    String::from_utf8_lossy(&prompt).into_owned(),
                ));
            }
        }

        let writer: Writer = Box::new(write_half);
        let (ready, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(writer),
            queue: CommandQueue::default(),
            credentials: CredentialCache::new(),
            fault: OnceLock::new(),
            finished: CancellationToken::new(),
            ready,
            events,
        });

        let shutdown = ct.child_token();
        let monitor = Monitor::new(shared.clone(), reader, handler, shutdown.clone());
        let session = Self {
            shared,
            monitor: Mutex::new(Some(tokio::spawn(monitor.run()))),
            shutdown,
        };

        if let Some(password) = password {
            debug!("Sending management interface password");
            let (cmd, rx) = SingleCommand::new();
            session
                .shared
                .send(password.expose(), vec![cmd.into()], ct)
                .await?;
            session.shared.wait_for(rx, ct).await?.into_result()?;
        }

        session.wait_ready(ct).await?;
        session.pause(SETTLE_DELAY, ct).await?;
        Ok(session)
    }

    async fn wait_ready(&self, ct: &CancellationToken) -> Result<()> {
        let mut ready = self.shared.ready.subscribe();
        tokio::select! {
            biased;
            _ = ct.cancelled() => Err(SessionError::Cancelled),
            _ = self.shared.finished.cancelled() => Err(self.shared.terminated()),
            seen = ready.wait_for(|ready| *ready) => seen
                .map(|_| ())
                .map_err(|_| self.shared.terminated()),
        }
    }

    async fn pause(&self, delay: Duration, ct: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = ct.cancelled() => Err(SessionError::Cancelled),
            _ = self.shared.finished.cancelled() => Err(self.shared.terminated()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Send a command answered by a single `SUCCESS:`/`ERROR:` line
    pub async fn send_command(&self, text: &str, ct: &CancellationToken) -> Result<PendingReply> {
        single_line(text)?;
        debug!("Sending command: {}", verb(text));
        let (cmd, rx) = SingleCommand::new();
        self.shared.send(text, vec![cmd.into()], ct).await?;
        Ok(PendingReply {
            shared: self.shared.clone(),
            rx,
        })
    }

    /// Send a command answered by lines up to `END`, collected into `collector`
    ///
    /// `collector` is an empty reply of the expected kind.
    pub async fn send_multiline(
        &self,
        text: &str,
        collector: MultilineReply,
        ct: &CancellationToken,
    ) -> Result<PendingMultiline> {
        single_line(text)?;
        debug!("Sending multi-line command: {}", verb(text));
        let (cmd, rx) = MultilineCommand::new(collector);
        self.shared.send(text, vec![cmd.into()], ct).await?;
        Ok(PendingMultiline {
            shared: self.shared.clone(),
            rx,
        })
    }

    pub(crate) async fn send_combined(
        &self,
        text: &str,
        collector: MultilineReply,
        ct: &CancellationToken,
    ) -> Result<PendingCombined> {
        debug!("Sending combined command: {}", text);
        let (first, first_rx) = SingleCommand::leading_history();
        let (second, second_rx) = MultilineCommand::new(collector);
        self.shared
            .send(text, vec![first.into(), second.into()], ct)
            .await?;
        Ok(PendingCombined {
            shared: self.shared.clone(),
            first: first_rx,
            second: second_rx,
        })
    }

    /// Send a command OpenVPN does not answer
    pub(crate) async fn send_unanswered(&self, text: &str, ct: &CancellationToken) -> Result<()> {
        single_line(text)?;
        debug!("Sending command without reply: {}", verb(text));
        self.shared.send(text, Vec::new(), ct).await
    }

    pub(crate) async fn command(&self, text: &str, ct: &CancellationToken) -> Result<String> {
        self.send_command(text, ct).await?.wait(ct).await
    }

    /// Another receiver of the session's notification events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// The fault that ended the monitor, if it has ended
    pub fn error(&self) -> Option<Arc<SessionError>> {
        self.shared.fault()
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow()
    }

    /// Whether credentials are cached for silent reauthentication
    pub fn has_cached_credentials(&self) -> bool {
        self.shared.credentials.is_cached()
    }

    /// Stop the monitor; pending and future commands fail
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the monitor to finish and return why it did
    ///
    /// Only the first call observes the monitor; later calls return the
    /// recorded fault.
    pub async fn join(&self) -> Arc<SessionError> {
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => match handle.await {
                Ok(cause) => cause,
                Err(e) => {
                    warn!("Monitor task failed: {}", e);
                    self.shared.fault().unwrap_or_else(|| {
                        Arc::new(SessionError::Io(std::io::Error::other(e.to_string())))
                    })
                }
            },
            None => {
                self.shared.finished.cancelled().await;
                self.shared
                    .fault()
                    .unwrap_or_else(|| Arc::new(SessionError::ConnectionClosed))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
