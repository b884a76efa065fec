// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use openvpn_mgmt::config::{Endpoint, MonitorConfig};
use openvpn_mgmt::management::{self, Event, Session};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging - try journald first, fall back to stderr
    // Default to INFO level if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter);

    if let Ok(journald) = tracing_journald::layer() {
        subscriber.with(journald).init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: openvpn-mgmt-monitor <config.json>")?;
    let config = MonitorConfig::load(&path)?;

    info!("Starting openvpn-mgmt-monitor for {}", config.endpoint);

    let ct = CancellationToken::new();
    tokio::spawn({
        let ct = ct.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupted, shutting down");
                    ct.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    });

    run(&config, &ct).await
}

async fn run(config: &MonitorConfig, ct: &CancellationToken) -> Result<()> {
    let (events, rx) = broadcast::channel(100);
    tokio::spawn(log_events(rx));

    let handler = Arc::new(config.handler());
    let password = config.management_password.clone();

    let started = match config.endpoint()? {
        Endpoint::Unix(path) => {
            if !wait_for_socket(&path, config.socket_wait(), ct).await? {
                return Ok(());
            }
            let stream = UnixStream::connect(&path)
                .await
                .context("Failed to connect to management socket")?;
            Session::start(stream, password, handler, events, ct).await
        }
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str())
                .await
                .with_context(|| format!("Failed to connect to management interface at {addr}"))?;
            Session::start(stream, password, handler, events, ct).await
        }
    };

    let session = match started {
        Ok(session) => session,
        Err(e) if e.is_cancellation() => return Ok(()),
        Err(e) => return Err(e).context("Failed to start management session"),
    };
    info!("Connected to OpenVPN management interface");

    match configure(&session, config, ct).await {
        Ok(()) => {}
        Err(e) if e.is_cancellation() => {}
        Err(e) => return Err(e).context("Failed to configure OpenVPN"),
    }

    let cause = session.join().await;
    if cause.is_cancellation() {
        info!("Monitor stopped");
        Ok(())
    } else {
        Err(anyhow!("Management session ended: {}", cause))
    }
}

/// Subscribe to notifications and let OpenVPN continue
async fn configure(
    session: &Session,
    config: &MonitorConfig,
    ct: &CancellationToken,
) -> management::Result<()> {
    if let Ok(version) = session.get_version(ct).await {
        if let Some(Some(v)) = version.get("OpenVPN Version") {
            info!("{}", v);
        }
    }
    session.set_version(2, ct).await?;

    if config.state {
        session.replay_and_enable_state(ct).await?;
    }
    if config.log {
        session.replay_and_enable_log(ct).await?;
    }
    if config.echo {
        session.replay_and_enable_echo(ct).await?;
    }
    if config.bytecount_interval > 0 {
        session.set_byte_count(config.bytecount_interval, ct).await?;
    }
    if let Some(mode) = config.auth_retry {
        session.set_authentication_retry(mode, ct).await?;
    }

    match session.get_process_id(ct).await {
        Ok(pid) => info!("OpenVPN PID: {}", pid),
        Err(e) if e.is_cancellation() => return Err(e),
        Err(e) => debug!("Could not query OpenVPN PID: {}", e),
    }

    if config.release_hold && session.get_hold(ct).await? {
        session.release_hold(ct).await?;
    }
    Ok(())
}

/// Wait for the management socket to become available; false if cancelled
async fn wait_for_socket(path: &Path, timeout: Duration, ct: &CancellationToken) -> Result<bool> {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while !path.exists() {
        if waited >= timeout {
            return Err(anyhow!(
                "Management socket {} not created after {}s",
                path.display(),
                timeout.as_secs()
            ));
        }
        tokio::select! {
            _ = ct.cancelled() => {
                info!("Cancelled while waiting for management socket");
                return Ok(false);
            }
            _ = tokio::time::sleep(step) => waited += step,
        }
    }
    Ok(true)
}

async fn log_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &Event) {
    match event {
        Event::State(state) => info!(
            "State: {:?} {}",
            state.state,
            state.message.as_deref().unwrap_or_default()
        ),
        Event::Log(entry) => info!("OpenVPN: {}", entry.message.as_deref().unwrap_or_default()),
        Event::Echo(entry) => info!("Echo: {}", entry.command.as_deref().unwrap_or_default()),
        Event::Hold(hold) => info!("Hold: {} (wait {}s)", hold.message, hold.wait_hint),
        Event::ByteCount(count) => {
            debug!("Bytes in: {}, out: {}", count.bytes_in, count.bytes_out)
        }
        Event::ByteCountClient(count) => debug!(
            "Client {} bytes in: {}, out: {}",
            count.client_id, count.bytes_in, count.bytes_out
        ),
        Event::Fatal(message) => error!("OpenVPN fatal error: {}", message),
        Event::Info(info) => info!("Server INFO: {}", info),
        Event::AuthenticationFailed { realm } => warn!("Authentication failed for '{}'", realm),
        Event::AuthenticationToken(token) => {
            info!("Received auth-token from server (length: {})", token.len())
        }
    }
}
