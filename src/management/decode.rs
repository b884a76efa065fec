// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Decoders for real-time notifications and reply lines
//!
//! OpenVPN's message format is only loosely versioned, so missing or
//! malformed trailing fields decode to defaults instead of failing.

use std::net::{IpAddr, SocketAddr};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};

use super::events::{
    ByteCount, ClientByteCount, EchoEntry, HoldRequest, LogEntry, LogFlags, OpenVpnState,
    Protocol, RemoteEndpoint, SignAlgorithm, SignRequest, StateSnapshot,
};
use super::params::parse_params;
use crate::secrets::Secret;

/// Field separator inside a notification payload
const FIELD_SEP: char = ',';

fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).map(|f| f.trim())
}

fn text(fields: &[&str], index: usize) -> Option<String> {
    field(fields, index).map(str::to_string)
}

fn number<T: std::str::FromStr + Default>(fields: &[&str], index: usize) -> T {
    field(fields, index)
        .and_then(|f| f.parse().ok())
        .unwrap_or_default()
}

fn timestamp(fields: &[&str], index: usize) -> DateTime<Utc> {
    field(fields, index)
        .and_then(|f| f.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn address(fields: &[&str], index: usize) -> Option<IpAddr> {
    field(fields, index).and_then(|f| f.parse().ok())
}

fn endpoint(fields: &[&str], host: usize, port: usize) -> Option<SocketAddr> {
    let ip = address(fields, host)?;
    let port = field(fields, port)?.parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

/// `time,state,message,tun-ipv4,remote,remote-port,local,local-port,tun-ipv6`
pub fn state(payload: &str) -> StateSnapshot {
    let fields: Vec<&str> = payload.splitn(10, FIELD_SEP).collect();
    StateSnapshot {
        timestamp: timestamp(&fields, 0),
        state: field(&fields, 1)
            .map(OpenVpnState::from_name)
            .unwrap_or_default(),
        message: text(&fields, 2),
        tunnel_ipv4: address(&fields, 3),
        tunnel_ipv6: address(&fields, 8),
        remote: endpoint(&fields, 4, 5),
        local: endpoint(&fields, 6, 7),
    }
}

/// `time,flags,message`
pub fn log(payload: &str) -> LogEntry {
    let fields: Vec<&str> = payload.splitn(3, FIELD_SEP).collect();
    LogEntry {
        timestamp: timestamp(&fields, 0),
        flags: fields
            .get(1)
            .map(|f| LogFlags::from_field(f))
            .unwrap_or_default(),
        message: text(&fields, 2),
    }
}

/// `time,command`
pub fn echo(payload: &str) -> EchoEntry {
    let fields: Vec<&str> = payload.splitn(2, FIELD_SEP).collect();
    EchoEntry {
        timestamp: timestamp(&fields, 0),
        command: text(&fields, 1),
    }
}

/// `message:wait-hint`
pub fn hold(payload: &str) -> HoldRequest {
    let fields: Vec<&str> = payload.splitn(3, ':').collect();
    HoldRequest {
        message: field(&fields, 0).unwrap_or_default().to_string(),
        wait_hint: number(&fields, 1),
    }
}

/// `bytes-in,bytes-out`
pub fn byte_count(payload: &str) -> ByteCount {
    let fields: Vec<&str> = payload.splitn(3, FIELD_SEP).collect();
    ByteCount {
        bytes_in: number(&fields, 0),
        bytes_out: number(&fields, 1),
    }
}

/// `client-id,bytes-in,bytes-out`
pub fn client_byte_count(payload: &str) -> ClientByteCount {
    let fields: Vec<&str> = payload.splitn(4, FIELD_SEP).collect();
    ClientByteCount {
        client_id: number(&fields, 0),
        bytes_in: number(&fields, 1),
        bytes_out: number(&fields, 2),
    }
}

/// `host,port,protocol`
pub fn remote(payload: &str) -> RemoteEndpoint {
    let fields: Vec<&str> = payload.splitn(4, FIELD_SEP).collect();
    RemoteEndpoint {
        host: field(&fields, 0).unwrap_or_default().to_string(),
        port: number(&fields, 1),
        protocol: field(&fields, 2)
            .map(Protocol::from_name)
            .unwrap_or_default(),
    }
}

/// What a `>PASSWORD:` notification asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordPrompt {
    VerificationFailed { realm: String },
    AuthToken(Secret),
    Need { realm: String, kind: NeedKind },
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedKind {
    Password,
    UsernamePassword,
    Other(String),
}

pub fn password(payload: &str) -> PasswordPrompt {
    if let Some(rest) = payload.strip_prefix("Verification Failed: ") {
        let realm = parse_params(rest)
            .ok()
            .and_then(|params| params.into_iter().next())
            .unwrap_or_else(|| rest.trim().trim_matches('\'').to_string());
        return PasswordPrompt::VerificationFailed { realm };
    }

    if let Some(token) = payload.strip_prefix("Auth-Token:") {
        return PasswordPrompt::AuthToken(Secret::new(token.trim()));
    }

    // Need 'Auth' username/password [SC:...]
    match parse_params(payload) {
        Ok(params) if params.len() > 2 && params[0] == "Need" => {
            let kind = match params[2].as_str() {
                "password" => NeedKind::Password,
                "username/password" => NeedKind::UsernamePassword,
                other => NeedKind::Other(other.to_string()),
            };
            PasswordPrompt::Need {
                realm: params[1].clone(),
                kind,
            }
        }
        _ => PasswordPrompt::Unrecognized,
    }
}

/// `>RSA_SIGN:base64-data`
pub fn rsa_sign(payload: &str) -> Result<SignRequest, base64::DecodeError> {
    Ok(SignRequest {
        data: STANDARD.decode(payload.trim())?,
        algorithm: SignAlgorithm::RsaPkcs1Padding,
    })
}

/// `>PK_SIGN:base64-data[,algorithm[,...]]`
pub fn pk_sign(payload: &str) -> Result<SignRequest, base64::DecodeError> {
    let fields: Vec<&str> = payload.split(FIELD_SEP).collect();
    Ok(SignRequest {
        data: STANDARD.decode(field(&fields, 0).unwrap_or_default())?,
        algorithm: field(&fields, 1)
            .map(SignAlgorithm::from_name)
            .unwrap_or_default(),
    })
}

/// `SUCCESS: text` or `ERROR: text`; anything else is not a status line
pub fn status(line: &str) -> Option<(bool, String)> {
    let (tag, text) = line.split_once(':').unwrap_or((line, ""));
    match tag.trim() {
        "SUCCESS" => Some((true, text.trim().to_string())),
        "ERROR" => Some((false, text.trim().to_string())),
        _ => None,
    }
}

/// `Key: value` line of a `version` reply
pub fn version_line(line: &str) -> (String, Option<String>) {
    match line.split_once(':') {
        Some((key, value)) => (key.trim().to_string(), Some(value.trim().to_string())),
        None => (line.trim().to_string(), None),
    }
}

/// Base64 with a line break every 76 columns, as OpenVPN expects in
/// multi-line certificate and signature replies
pub fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(76)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn decodes_full_state_line() {
        let snapshot =
            state("1700000000,CONNECTED,SUCCESS,10.8.0.2,198.51.100.7,1194,192.168.1.10,50123,fd00::2");
        assert_eq!(snapshot.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(snapshot.state, OpenVpnState::Connected);
        assert_eq!(snapshot.message.as_deref(), Some("SUCCESS"));
        assert_eq!(
            snapshot.tunnel_ipv4,
            Some(IpAddr::V4(Ipv4Addr::new(10, 8, 0, 2)))
        );
        assert_eq!(
            snapshot.remote,
            Some("198.51.100.7:1194".parse().unwrap())
        );
        assert_eq!(
            snapshot.local,
            Some("192.168.1.10:50123".parse().unwrap())
        );
        assert_eq!(snapshot.tunnel_ipv6, Some("fd00::2".parse().unwrap()));
    }

    #[test]
    fn state_tolerates_truncated_and_bogus_fields() {
        let before = Utc::now();
        let snapshot = state("not-a-time,MYSTERY");
        assert!(snapshot.timestamp >= before);
        assert_eq!(snapshot.state, OpenVpnState::Initial);
        assert_eq!(snapshot.message, None);
        assert_eq!(snapshot.remote, None);

        let snapshot = state("1700000000,WAIT,,,198.51.100.7");
        assert_eq!(snapshot.state, OpenVpnState::Waiting);
        assert_eq!(snapshot.tunnel_ipv4, None);
        assert_eq!(snapshot.remote, None);
    }

    #[test]
    fn decodes_log_line_keeping_commas_in_message() {
        let entry = log("1700000000,WN,TLS error: a, b, c");
        assert!(entry.flags.contains(LogFlags::WARNING));
        assert!(entry.flags.contains(LogFlags::NON_FATAL));
        assert!(!entry.flags.contains(LogFlags::INFORMATIONAL));
        assert_eq!(entry.message.as_deref(), Some("TLS error: a, b, c"));
    }

    #[test]
    fn decodes_echo_and_hold() {
        let entry = echo("1700000000,forget-passwords");
        assert_eq!(entry.command.as_deref(), Some("forget-passwords"));

        let request = hold("Waiting for hold release:10");
        assert_eq!(request.message, "Waiting for hold release");
        assert_eq!(request.wait_hint, 10);

        let request = hold("Waiting for hold release");
        assert_eq!(request.wait_hint, 0);
    }

    #[test]
    fn byte_count_decoding_is_deterministic() {
        let first = byte_count("1024,2048");
        let second = byte_count("1024,2048");
        assert_eq!(first, second);
        assert_eq!(first.bytes_in, 1024);
        assert_eq!(first.bytes_out, 2048);

        assert_eq!(byte_count("junk"), ByteCount::default());
    }

    #[test]
    fn decodes_client_byte_count() {
        let count = client_byte_count("7,10,20");
        assert_eq!(count.client_id, 7);
        assert_eq!(count.bytes_in, 10);
        assert_eq!(count.bytes_out, 20);
    }

    #[test]
    fn decodes_remote() {
        let endpoint = remote("vpn.example.org,1194,udp");
        assert_eq!(endpoint.host, "vpn.example.org");
        assert_eq!(endpoint.port, 1194);
        assert_eq!(endpoint.protocol, Protocol::Udp);

        let endpoint = remote("vpn.example.org");
        assert_eq!(endpoint.port, 0);
        assert_eq!(endpoint.protocol, Protocol::Udp);
    }

    #[test]
    fn classifies_password_prompts() {
        assert_eq!(
            password("Verification Failed: 'Auth'"),
            PasswordPrompt::VerificationFailed {
                realm: "Auth".to_string()
            }
        );
        assert_eq!(
            password("Auth-Token:SESS_ID_AT_abc"),
            PasswordPrompt::AuthToken(Secret::new("SESS_ID_AT_abc"))
        );
        assert_eq!(
            password("Need 'Auth' username/password"),
            PasswordPrompt::Need {
                realm: "Auth".to_string(),
                kind: NeedKind::UsernamePassword
            }
        );
        assert_eq!(
            password("Need 'Private Key' password"),
            PasswordPrompt::Need {
                realm: "Private Key".to_string(),
                kind: NeedKind::Password
            }
        );
        assert_eq!(password("Need 'Auth"), PasswordPrompt::Unrecognized);
    }

    #[test]
    fn decodes_sign_requests() {
        let request = pk_sign("aGVsbG8=,RSA_PKCS1_PSS_PADDING,hashalg=SHA256").unwrap();
        assert_eq!(request.data, b"hello");
        assert_eq!(request.algorithm, SignAlgorithm::RsaPssPadding);

        let request = rsa_sign("aGVsbG8=").unwrap();
        assert_eq!(request.algorithm, SignAlgorithm::RsaPkcs1Padding);

        assert!(rsa_sign("@@@").is_err());
    }

    #[test]
    fn recognises_status_lines() {
        assert_eq!(
            status("SUCCESS: bytecount started"),
            Some((true, "bytecount started".to_string()))
        );
        assert_eq!(
            status("ERROR: unknown command"),
            Some((false, "unknown command".to_string()))
        );
        assert_eq!(status("OpenVPN Version: 2.6"), None);
    }

    #[test]
    fn wraps_base64_at_76_columns() {
        let wrapped = wrap_base64(&[0u8; 100]);
        let lines: Vec<&str> = wrapped.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76);
        assert!(wrap_base64(&[]).is_empty());
    }
}
