//! Per-connection protocol engine: a pure transition function plus the
//! async driver that runs it against a socket.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::metrics::{assemble, MetricsProvider};
use crate::proto::{self, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// Terminal. No transition leaves this state.
    Closed,
    /// Side-exit: the whole agent stops, not just this session.
    Terminating,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing goes back over the wire (successful auth, ignored token).
    None,
    /// Encode one fresh pulse record and send it.
    SendPulse,
    /// Tear the connection down without a response.
    Close,
    /// Tear the connection down and stop accepting altogether.
    Shutdown,
}

/// One step of the session machine: the decoded token against the current
/// state. The secret is only ever accepted as the first message; a failed
/// attempt gets no retry. Unrecognized tokens after authentication are
/// ignored and the connection stays usable.
pub fn step(state: SessionState, token: &str, secret: &str) -> (SessionState, Action) {
    match state {
        SessionState::Unauthenticated => {
            if token == secret {
                (SessionState::Authenticated, Action::None)
            } else {
                (SessionState::Closed, Action::Close)
            }
        }
        SessionState::Authenticated => match Command::parse(token) {
            Some(Command::GetSnapshot) => (SessionState::Authenticated, Action::SendPulse),
            Some(Command::Close) => (SessionState::Closed, Action::Close),
            Some(Command::TerminateAgent) => (SessionState::Terminating, Action::Shutdown),
            None => (SessionState::Authenticated, Action::None),
        },
        SessionState::Closed | SessionState::Terminating => (state, Action::Close),
    }
}

/// How a finished session affects the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Closed,
    Terminate,
}

async fn read_frame(
    stream: &mut TcpStream,
    buf: &mut [u8],
    idle: Option<Duration>,
) -> std::io::Result<Option<usize>> {
    match idle {
        Some(limit) => match timeout(limit, stream.read(buf)).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None), // deadline elapsed
        },
        None => stream.read(buf).await.map(Some),
    }
}

/// Drive one connection to completion. Every exit path drops the stream,
/// which closes the socket; protocol violations get no response bytes.
pub async fn run(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: &AgentConfig,
    provider: &mut dyn MetricsProvider,
) -> SessionOutcome {
    let mut state = SessionState::Unauthenticated;
    let mut buf = vec![0u8; config.max_frame];

    loop {
        let n = match read_frame(&mut stream, &mut buf, config.idle_timeout).await {
            Ok(None) => {
                debug!(%peer, "idle deadline hit, dropping connection");
                return SessionOutcome::Closed;
            }
            Ok(Some(0)) => {
                debug!(%peer, "peer closed the connection");
                return SessionOutcome::Closed;
            }
            Ok(Some(n)) => n,
            Err(e) => {
                warn!(%peer, "read failed: {e}");
                return SessionOutcome::Closed;
            }
        };

        let token = match proto::decode_token(&buf, n) {
            Ok(token) => token,
            Err(e) => {
                warn!(%peer, "dropping connection: {e}");
                return SessionOutcome::Closed;
            }
        };

        let (next, action) = step(state, token, &config.secret);
        if state == SessionState::Unauthenticated && next == SessionState::Authenticated {
            debug!(%peer, "authenticated");
        }
        state = next;

        match action {
            Action::None => {}
            Action::SendPulse => {
                let record = proto::encode_pulse(&assemble(provider));
                if let Err(e) = stream.write_all(record.as_bytes()).await {
                    warn!(%peer, "write failed: {e}");
                    return SessionOutcome::Closed;
                }
            }
            Action::Close => {
                debug!(%peer, "session closed");
                return SessionOutcome::Closed;
            }
            Action::Shutdown => {
                debug!(%peer, "terminate requested");
                return SessionOutcome::Terminate;
            }
        }
    }
}
