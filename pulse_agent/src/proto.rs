//! Wire codec: request tokens in, one pulse record out.

use std::str;

use thiserror::Error;

use crate::types::Pulse;

/// Request one snapshot record.
pub const CMD_GET_SNAPSHOT: &str = "get-snapshot";
/// Close the connection.
pub const CMD_CLOSE: &str = "close";
/// Stop the whole agent.
pub const CMD_TERMINATE: &str = "terminate-agent";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("message reached the {0}-byte frame bound")]
    Oversized(usize),
    #[error("message is not valid UTF-8")]
    NotText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetSnapshot,
    Close,
    TerminateAgent,
}

impl Command {
    /// Exact, case-sensitive match. Anything else is not a command.
    pub fn parse(token: &str) -> Option<Command> {
        match token {
            CMD_GET_SNAPSHOT => Some(Command::GetSnapshot),
            CMD_CLOSE => Some(Command::Close),
            CMD_TERMINATE => Some(Command::TerminateAgent),
            _ => None,
        }
    }
}

/// Bound-check one received message and hand back its text token.
///
/// `len` is what the read produced into `buf`. A read that fills the whole
/// buffer is indistinguishable from a truncated oversize payload and is
/// rejected before any comparison happens. A single trailing line ending is
/// stripped for line-oriented clients; interior whitespace stays
/// significant.
pub fn decode_token(buf: &[u8], len: usize) -> Result<&str, FrameError> {
    if len >= buf.len() {
        return Err(FrameError::Oversized(buf.len()));
    }
    let text = str::from_utf8(&buf[..len]).map_err(|_| FrameError::NotText)?;
    Ok(text
        .strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text))
}

/// Render one pulse as the nine-field colon record:
///
/// `cpu:db:uptime:disk_total:disk_free:disk_used:mem_total:mem_free:mem_used`
///
/// Fixed order, plain decimal integers, `0`/`1` for the database flag, and
/// exactly four fraction digits on the float fields. Deployed pollers parse
/// this by position; any change here is a protocol version bump, never a
/// silent edit.
pub fn encode_pulse(p: &Pulse) -> String {
    format!(
        "{:.4}:{}:{}:{}:{}:{:.4}:{}:{}:{:.4}",
        p.cpu_load,
        u8::from(p.database_running),
        p.uptime_secs,
        p.disk_total_kb,
        p.disk_free_kb,
        p.disk_used_fraction(),
        p.mem_total_kb,
        p.mem_free_kb,
        p.mem_used_fraction(),
    )
}
