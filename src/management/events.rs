// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Typed payloads of management interface notifications

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};

use super::params::escape_param;
use crate::secrets::Secret;

/// Notifications fanned out to session subscribers
#[derive(Debug, Clone)]
pub enum Event {
    /// `>STATE:` or a line of a `state` reply
    State(StateSnapshot),
    /// `>LOG:` or a line of a `log` reply
    Log(LogEntry),
    /// `>ECHO:` or a line of an `echo` reply
    Echo(EchoEntry),
    /// `>HOLD:` - OpenVPN waits for `hold release`
    Hold(HoldRequest),
    /// `>BYTECOUNT:`
    ByteCount(ByteCount),
    /// `>BYTECOUNT_CLI:`
    ByteCountClient(ClientByteCount),
    /// `>FATAL:` - OpenVPN is about to close the connection
    Fatal(String),
    /// `>INFO:` - banner; the session becomes ready on the first one
    Info(String),
    /// Username/password or password verification failed for a realm
    AuthenticationFailed { realm: String },
    /// Server pushed an auth-token usable as password on reauthentication
    AuthenticationToken(Secret),
}

/// OpenVPN connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenVpnState {
    #[default]
    Initial,
    Connecting,
    AssigningIp,
    AddingRoutes,
    Connected,
    Reconnecting,
    Exiting,
    Waiting,
    Authenticating,
    GettingConfig,
    Resolving,
    TcpConnecting,
}

impl OpenVpnState {
    /// Map a state name as reported by OpenVPN; unknown names map to `Initial`
    pub fn from_name(name: &str) -> Self {
        match name {
            "CONNECTING" => Self::Connecting,
            "ASSIGN_IP" => Self::AssigningIp,
            "ADD_ROUTES" => Self::AddingRoutes,
            "CONNECTED" => Self::Connected,
            "RECONNECTING" => Self::Reconnecting,
            "EXITING" => Self::Exiting,
            "WAIT" => Self::Waiting,
            "AUTH" => Self::Authenticating,
            "GET_CONFIG" => Self::GettingConfig,
            "RESOLVE" => Self::Resolving,
            "TCP_CONNECT" => Self::TcpConnecting,
            _ => Self::Initial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub state: OpenVpnState,
    pub message: Option<String>,
    pub tunnel_ipv4: Option<IpAddr>,
    pub tunnel_ipv6: Option<IpAddr>,
    pub remote: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
}

/// Log message flags, combined from the characters of the flags field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogFlags(u8);

impl LogFlags {
    pub const INFORMATIONAL: Self = Self(1);
    pub const FATAL: Self = Self(1 << 1);
    pub const NON_FATAL: Self = Self(1 << 2);
    pub const WARNING: Self = Self(1 << 3);
    pub const DEBUG: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_field(field: &str) -> Self {
        [
            ('I', Self::INFORMATIONAL),
            ('F', Self::FATAL),
            ('N', Self::NON_FATAL),
            ('W', Self::WARNING),
            ('D', Self::DEBUG),
        ]
        .into_iter()
        .filter(|(c, _)| field.contains(*c))
        .fold(Self::empty(), |acc, (_, flag)| acc | flag)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for LogFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub flags: LogFlags,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoEntry {
    pub timestamp: DateTime<Utc>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldRequest {
    pub message: String,
    /// Seconds OpenVPN suggests waiting before release
    pub wait_hint: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteCount {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientByteCount {
    pub client_id: u32,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

impl Protocol {
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("tcp") {
            Self::Tcp
        } else {
            Self::Udp
        }
    }
}

/// `>REMOTE:` - OpenVPN asks which remote to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// Answer to a [`RemoteEndpoint`] request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RemoteAction {
    #[default]
    Accept,
    Modify { host: String, port: u16 },
    Skip,
}

impl fmt::Display for RemoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("ACCEPT"),
            Self::Modify { host, port } => write!(f, "MOD {} {}", escape_param(host), port),
            Self::Skip => f.write_str("SKIP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignAlgorithm {
    #[default]
    RsaPkcs1Padding,
    RsaNoPadding,
    RsaPssPadding,
    Ecdsa,
}

impl SignAlgorithm {
    pub fn from_name(name: &str) -> Self {
        match name {
            "RSA_NO_PADDING" => Self::RsaNoPadding,
            "RSA_PKCS1_PSS_PADDING" => Self::RsaPssPadding,
            "ECDSA" => Self::Ecdsa,
            _ => Self::RsaPkcs1Padding,
        }
    }
}

/// `>RSA_SIGN:` / `>PK_SIGN:` - data to sign with the client private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub data: Vec<u8>,
    pub algorithm: SignAlgorithm,
}

/// Signals accepted by the `signal` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Hup,
    Term,
    Usr1,
    Usr2,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hup => "SIGHUP",
            Self::Term => "SIGTERM",
            Self::Usr1 => "SIGUSR1",
            Self::Usr2 => "SIGUSR2",
        })
    }
}

/// `auth-retry` modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthRetry {
    #[default]
    None,
    NoInteract,
    Interact,
}

impl fmt::Display for AuthRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::NoInteract => "nointeract",
            Self::Interact => "interact",
        })
    }
}
