// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Error surface of the management session

use std::sync::Arc;

use thiserror::Error;

use super::params::ParamsError;

/// Errors reported by the management session and its monitor
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading from or writing to the management connection failed
    #[error("management connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The management interface closed the connection without reporting why
    #[error("management interface closed the connection")]
    ConnectionClosed,

    /// The management interface closed the connection after `>FATAL`
    #[error("OpenVPN reported a fatal error: {0}")]
    Fatal(String),

    /// A reply did not have the expected shape
    #[error("unexpected reply from management interface: {0}")]
    UnexpectedReply(String),

    /// The management interface answered `ERROR:`
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// The consumer did not answer a challenge; OpenVPN cannot continue
    #[error("{0} request declined")]
    Declined(&'static str),

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// The session has already faulted; nothing was sent
    #[error("management session is in error state")]
    InError,

    /// The monitor finished while the call was waiting for its reply
    #[error("management monitor terminated: {0}")]
    MonitorTerminated(Arc<SessionError>),

    /// A parameter string could not be parsed
    #[error(transparent)]
    Params(#[from] ParamsError),

    /// A challenge carried a payload that is not valid base64
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl SessionError {
    /// Whether this error represents a cooperative cancellation rather than a fault
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::Declined(_) => true,
            Self::MonitorTerminated(cause) => cause.is_cancellation(),
            _ => false,
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
