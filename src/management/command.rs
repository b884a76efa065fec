// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! In-flight commands and the FIFO queue that matches them to replies

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use super::decode;
use super::error::{Result, SessionError};
use super::events::{EchoEntry, Event, LogEntry, StateSnapshot};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Outcome of a command answered with `SUCCESS:` or `ERROR:`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub success: bool,
    pub response: String,
}

impl Reply {
    /// The response text, or the daemon's error text as [`SessionError::CommandFailed`]
    pub fn into_result(self) -> Result<String> {
        if self.success {
            Ok(self.response)
        } else {
            Err(SessionError::CommandFailed(self.response))
        }
    }
}

/// Lines collected by a multi-line command until `END`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultilineReply {
    Echo(Vec<EchoEntry>),
    Log(Vec<LogEntry>),
    State(Vec<StateSnapshot>),
    Version(BTreeMap<String, Option<String>>),
}

impl MultilineReply {
    /// Decode one reply line into the collection; history lines are also
    /// returned as events so subscribers see replayed entries
    fn feed(&mut self, line: &str) -> Option<Event> {
        match self {
            Self::Echo(entries) => {
                let entry = decode::echo(line);
                entries.push(entry.clone());
                Some(Event::Echo(entry))
            }
            Self::Log(entries) => {
                let entry = decode::log(line);
                entries.push(entry.clone());
                Some(Event::Log(entry))
            }
            Self::State(entries) => {
                let snapshot = decode::state(line);
                entries.push(snapshot.clone());
                Some(Event::State(snapshot))
            }
            Self::Version(map) => {
                let (key, value) = decode::version_line(line);
                map.insert(key, value);
                None
            }
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Echo(_) => "echo",
            Self::Log(_) => "log",
            Self::State(_) => "state",
            Self::Version(_) => "version",
        }
    }
}

#[derive(Debug)]
pub(crate) struct SingleCommand {
    id: u64,
    /// Followed by a multi-line reply that only comes after `SUCCESS:`
    leads_history: bool,
    done: oneshot::Sender<Reply>,
}

impl SingleCommand {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Reply>) {
        Self::with_history(false)
    }

    /// Status half of a command like `log on all`
    pub(crate) fn leading_history() -> (Self, oneshot::Receiver<Reply>) {
        Self::with_history(true)
    }

    fn with_history(leads_history: bool) -> (Self, oneshot::Receiver<Reply>) {
        let (done, rx) = oneshot::channel();
        (
            Self {
                id: next_id(),
                leads_history,
                done,
            },
            rx,
        )
    }

    pub(crate) fn settle(self, success: bool, response: String) {
        // The caller may have given up waiting
        let _ = self.done.send(Reply { success, response });
    }
}

#[derive(Debug)]
pub(crate) struct MultilineCommand {
    id: u64,
    reply: MultilineReply,
    done: oneshot::Sender<MultilineReply>,
}

impl MultilineCommand {
    pub(crate) fn new(reply: MultilineReply) -> (Self, oneshot::Receiver<MultilineReply>) {
        let (done, rx) = oneshot::channel();
        (
            Self {
                id: next_id(),
                reply,
                done,
            },
            rx,
        )
    }

    pub(crate) fn settle(self) {
        let _ = self.done.send(self.reply);
    }
}

/// A command waiting in the queue for its reply
#[derive(Debug)]
pub(crate) enum Command {
    Single(SingleCommand),
    Multiline(MultilineCommand),
}

impl Command {
    pub(crate) fn id(&self) -> u64 {
        match self {
            Self::Single(cmd) => cmd.id,
            Self::Multiline(cmd) => cmd.id,
        }
    }

    pub(crate) fn shape(&self) -> Shape {
        match self {
            Self::Single(_) => Shape::Single,
            Self::Multiline(_) => Shape::Multiline,
        }
    }
}

impl From<SingleCommand> for Command {
    fn from(cmd: SingleCommand) -> Self {
        Self::Single(cmd)
    }
}

impl From<MultilineCommand> for Command {
    fn from(cmd: MultilineCommand) -> Self {
        Self::Multiline(cmd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Single,
    Multiline,
}

/// Commands awaiting replies, oldest first
///
/// Callers append at the back; only the monitor removes from the front.
/// The lock is never held across I/O.
#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    inner: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Command>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append commands as one unit so no other sender's command lands between them
    pub(crate) fn enqueue(&self, commands: impl IntoIterator<Item = Command>) -> Vec<u64> {
        let mut queue = self.lock();
        commands
            .into_iter()
            .map(|cmd| {
                let id = cmd.id();
                queue.push_back(cmd);
                id
            })
            .collect()
    }

    pub(crate) fn head(&self) -> Option<Shape> {
        self.lock().front().map(Command::shape)
    }

    /// Settle the single-line command at the head with a status line
    ///
    /// A rejected command that leads a history also removes the history
    /// command behind it, since OpenVPN sends no `END` after `ERROR:`.
    /// Returns false when the head is not a single-line command.
    pub(crate) fn settle_status(&self, success: bool, response: String) -> bool {
        let mut queue = self.lock();
        let cmd = match queue.front() {
            Some(Command::Single(_)) => match queue.pop_front() {
                Some(Command::Single(cmd)) => cmd,
                _ => return false,
            },
            _ => return false,
        };
        if !success && cmd.leads_history {
            if let Some(Command::Multiline(_)) = queue.front() {
                queue.pop_front();
            }
        }
        drop(queue);
        cmd.settle(success, response);
        true
    }

    /// Settle the multi-line command at the head on `END`
    ///
    /// Returns false when the head is not a multi-line command.
    pub(crate) fn finish_multiline(&self) -> bool {
        let mut queue = self.lock();
        let cmd = match queue.front() {
            Some(Command::Multiline(_)) => match queue.pop_front() {
                Some(Command::Multiline(cmd)) => cmd,
                _ => return false,
            },
            _ => return false,
        };
        drop(queue);
        cmd.settle();
        true
    }

    /// Hand a data line to the multi-line command at the head, if any
    pub(crate) fn feed_head(&self, line: &str) -> Option<Event> {
        match self.lock().front_mut() {
            Some(Command::Multiline(cmd)) => {
                tracing::trace!("{} reply line: {}", cmd.reply.kind(), line);
                cmd.reply.feed(line)
            }
            _ => None,
        }
    }

    /// Drop commands whose wire text never made it out
    pub(crate) fn retract(&self, ids: &[u64]) {
        self.lock().retain(|cmd| !ids.contains(&cmd.id()));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let queue = CommandQueue::default();
        let (first, mut first_rx) = SingleCommand::new();
        let (second, mut second_rx) = SingleCommand::new();
        queue.enqueue([first.into()]);
        queue.enqueue([second.into()]);

        assert!(queue.settle_status(true, "a".to_string()));
        assert_eq!(first_rx.try_recv().unwrap().response, "a");
        assert!(second_rx.try_recv().is_err());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn multiline_with_no_lines_settles_empty() {
        let queue = CommandQueue::default();
        let (cmd, mut rx) = MultilineCommand::new(MultilineReply::Log(Vec::new()));
        queue.enqueue([cmd.into()]);
        assert_eq!(queue.head(), Some(Shape::Multiline));
        assert!(!queue.settle_status(true, "stray".to_string()));

        assert!(queue.finish_multiline());
        assert_eq!(rx.try_recv().unwrap(), MultilineReply::Log(Vec::new()));
        assert!(!queue.finish_multiline());
    }

    #[test]
    fn head_collects_version_lines() {
        let queue = CommandQueue::default();
        let (cmd, mut rx) = MultilineCommand::new(MultilineReply::Version(BTreeMap::new()));
        queue.enqueue([cmd.into()]);

        assert!(queue.feed_head("OpenVPN Version: OpenVPN 2.6.8").is_none());
        assert!(queue.feed_head("Management Version: 5").is_none());
        assert!(queue.finish_multiline());

        let MultilineReply::Version(map) = rx.try_recv().unwrap() else {
            panic!("expected version reply");
        };
        assert_eq!(map["Management Version"].as_deref(), Some("5"));
    }

    #[test]
    fn retract_removes_only_named_commands() {
        let queue = CommandQueue::default();
        let (a, _a_rx) = SingleCommand::new();
        let (b, _b_rx) = SingleCommand::new();
        let ids = queue.enqueue([a.into()]);
        queue.enqueue([b.into()]);
        queue.retract(&ids);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn rejected_history_command_drops_its_history() {
        let queue = CommandQueue::default();
        let (status, mut status_rx) = SingleCommand::leading_history();
        let (history, mut history_rx) = MultilineCommand::new(MultilineReply::Echo(Vec::new()));
        let (next, mut next_rx) = SingleCommand::new();
        queue.enqueue([status.into(), history.into()]);
        queue.enqueue([next.into()]);

        assert!(queue.settle_status(false, "echo command not supported".to_string()));
        assert!(!status_rx.try_recv().unwrap().success);
        assert!(history_rx.try_recv().is_err());
        assert_eq!(queue.head(), Some(Shape::Single));

        assert!(queue.settle_status(true, "pid=42".to_string()));
        assert_eq!(next_rx.try_recv().unwrap().response, "pid=42");
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn accepted_history_command_keeps_its_history() {
        let queue = CommandQueue::default();
        let (status, _status_rx) = SingleCommand::leading_history();
        let (history, _history_rx) = MultilineCommand::new(MultilineReply::Log(Vec::new()));
        queue.enqueue([status.into(), history.into()]);

        assert!(queue.settle_status(true, "real-time log notification set to ON".to_string()));
        assert_eq!(queue.head(), Some(Shape::Multiline));
    }

    #[test]
    fn rejected_reply_becomes_command_failure() {
        let reply = Reply {
            success: false,
            response: "unknown command".to_string(),
        };
        assert!(matches!(
            reply.into_result(),
            Err(SessionError::CommandFailed(msg)) if msg == "unknown command"
        ));
    }
}
