//! Persistent link to the dispatcher: newline-delimited JSON over TCP.

use crate::errors::Result;
use llamagrid_cluster::{ServerMessage, WorkerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// One open connection to the dispatcher's worker gateway.
pub struct Uplink {
    writer: OwnedWriteHalf,
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl Uplink {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read, writer) = stream.into_split();
        tracing::info!(addr = %addr, "Connected to dispatcher");
        Ok(Self {
            writer,
            lines: BufReader::new(read).lines(),
        })
    }

    /// Split into independently-owned halves for use in a select loop.
    pub fn split(self) -> (UplinkSender, UplinkReceiver) {
        (
            UplinkSender {
                writer: self.writer,
            },
            UplinkReceiver { lines: self.lines },
        )
    }
}

/// Outbound half of an uplink.
pub struct UplinkSender {
    writer: OwnedWriteHalf,
}

impl UplinkSender {
    pub async fn send(&mut self, msg: &WorkerMessage) -> Result<()> {
        write_frame(&mut self.writer, msg).await
    }
}

/// Inbound half of an uplink.
pub struct UplinkReceiver {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl UplinkReceiver {
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        read_frame(&mut self.lines).await
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, msg: &WorkerMessage) -> Result<()> {
    let mut frame = serde_json::to_vec(msg)?;
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    Ok(())
}

/// Next dispatcher frame; `None` once the connection has closed.
///
/// A malformed frame is logged and skipped, never fatal to the link.
async fn read_frame(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
) -> Result<Option<ServerMessage>> {
    loop {
        match lines.next_line().await? {
            Some(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(&line) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping malformed dispatcher frame");
                    }
                }
            }
            None => return Ok(None),
        }
    }
}
