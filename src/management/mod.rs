// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! OpenVPN management interface client
//!
//! A [`Session`] owns one management connection. Its monitor task reads
//! notifications and replies, answers challenges through a
//! [`ChallengeHandler`] and fans events out to subscribers.

mod command;
pub mod decode;
mod error;
mod events;
mod facade;
mod handler;
mod monitor;
pub mod params;
mod session;


pub use command::{MultilineReply, Reply};
pub use error::{Result, SessionError};
pub use events::{
    AuthRetry, ByteCount, ClientByteCount, EchoEntry, Event, HoldRequest, LogEntry, LogFlags,
    OpenVpnState, Protocol, RemoteAction, RemoteEndpoint, SignAlgorithm, SignRequest, Signal,
    StateSnapshot,
};
pub use handler::{ChallengeHandler, DeclineAll, StaticCredentials};
pub use params::{escape_param, parse_params, ParamsError};
pub use session::{PendingMultiline, PendingReply, Session};
