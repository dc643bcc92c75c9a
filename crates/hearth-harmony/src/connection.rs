//! Stream transport: the single long-lived hub connection.
//!
//! A `Connection` exclusively owns the TCP socket halves and the
//! incremental XML reader positioned on the read half. It offers raw
//! string sends plus the two token-level read primitives the handshake
//! and dispatcher are built from. The transport never self-heals: the
//! supervisor owns connectivity state and tears the connection down on
//! any error it reports.

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::HarmonyConfig;
use crate::parser::{StartTag, StreamElement, XmlStream};
use crate::stanza;
use crate::HarmonyError;

/// An established TCP session with the hub.
pub struct Connection {
    writer: OwnedWriteHalf,
    stream: XmlStream<BufReader<OwnedReadHalf>>,
}

impl Connection {
    /// Open a TCP connection to the hub and wrap it in the streaming XML
    /// reader. No protocol bytes are exchanged yet; the handshake does
    /// that.
    pub async fn connect(config: &HarmonyConfig) -> Result<Self, HarmonyError> {
        let socket = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| {
                HarmonyError::Connect(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("TCP connect to {} timed out", config.address),
                ))
            })?
            .map_err(HarmonyError::Connect)?;

        debug!(addr = %config.address, "TCP connection established");

        let (read_half, write_half) = socket.into_split();
        Ok(Self {
            writer: write_half,
            stream: XmlStream::new(BufReader::new(read_half)),
        })
    }

    /// Write a stanza to the hub. Every stanza sent through here is
    /// logged verbatim.
    pub async fn send(&mut self, stanza: &str) -> Result<(), HarmonyError> {
        debug!(stanza = %stanza, "sending stanza");
        self.writer.write_all(stanza.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write the idle keepalive: a single raw newline. Bypasses `send`
    /// so that transport-level noise stays out of the stanza debug log.
    pub async fn send_keepalive(&mut self) -> Result<(), HarmonyError> {
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Scan forward to the next start tag. See [`XmlStream::next_start`].
    pub async fn next_start(&mut self) -> Result<StartTag, HarmonyError> {
        self.stream.next_start().await
    }

    /// Read and decode the next full element. See
    /// [`XmlStream::next_element`].
    pub async fn next_element(&mut self) -> Result<StreamElement, HarmonyError> {
        self.stream.next_element().await
    }

    /// Send the graceful stream close. The socket itself is released when
    /// the `Connection` is dropped.
    pub async fn close(&mut self) -> Result<(), HarmonyError> {
        self.send(stanza::STREAM_CLOSE).await
    }
}
