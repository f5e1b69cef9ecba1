//! TCP probe: authenticate, fetch one record, part politely.
//!
//! The agent treats one read as one message, so each token goes out as its
//! own segment with a short gap after it; nothing on the wire separates
//! messages otherwise.

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::report::Report;

const CMD_GET_SNAPSHOT: &str = "get-snapshot";
const CMD_CLOSE: &str = "close";
const CMD_TERMINATE: &str = "terminate-agent";

const IO_DEADLINE: Duration = Duration::from_secs(5);
const MESSAGE_GAP: Duration = Duration::from_millis(80);

async fn open(target: &str, secret: &str) -> anyhow::Result<TcpStream> {
    let stream = timeout(IO_DEADLINE, TcpStream::connect(target))
        .await
        .context("connect timed out")?
        .context("connect failed")?;
    stream.set_nodelay(true).context("socket setup")?;
    send(stream, secret).await
}

async fn send(mut stream: TcpStream, token: &str) -> anyhow::Result<TcpStream> {
    timeout(IO_DEADLINE, stream.write_all(token.as_bytes()))
        .await
        .context("send timed out")?
        .context("send failed")?;
    sleep(MESSAGE_GAP).await;
    Ok(stream)
}

/// Authenticate and pull one pulse. The session is closed with the agent's
/// own vocabulary afterwards; a best-effort courtesy, errors ignored.
pub async fn fetch(target: &str, secret: &str) -> anyhow::Result<Report> {
    let stream = open(target, secret).await?;
    let mut stream = send(stream, CMD_GET_SNAPSHOT).await?;

    let mut buf = vec![0u8; 512];
    let n = timeout(IO_DEADLINE, stream.read(&mut buf))
        .await
        .context("no record within the deadline")?
        .context("read failed")?;
    if n == 0 {
        bail!("connection closed before a record arrived (wrong secret?)");
    }
    let record = std::str::from_utf8(&buf[..n]).context("record is not UTF-8")?;
    let report = Report::parse(record)?;

    let _ = stream.write_all(CMD_CLOSE.as_bytes()).await;
    Ok(report)
}

/// Administrative stop: authenticate and ask the agent to shut down. The
/// agent answers with a silent close.
pub async fn terminate(target: &str, secret: &str) -> anyhow::Result<()> {
    let mut stream = send(open(target, secret).await?, CMD_TERMINATE).await?;

    let mut buf = [0u8; 64];
    match timeout(IO_DEADLINE, stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => Ok(()),
        Ok(Ok(n)) => bail!("agent answered the terminate with {n} unexpected bytes"),
        Err(_) => bail!("agent did not close within the deadline"),
    }
}
