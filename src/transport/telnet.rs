mod data_reader;

pub use data_reader::TelnetDataReader;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::host::Host;
use crate::transport::{TimeoutRead, TimeoutReader, Transport};

/// TCP transport speaking the TELNET wire protocol on the read side.
///
/// Reads flow raw socket -> [`TelnetDataReader`] -> [`TimeoutReader`]; writes
/// go straight to the socket, since nothing above emits 0xFF.
pub struct TelnetTransport {
    read_timeout: Duration,
    buffer_size: usize,
    reader: Option<TimeoutReader>,
    writer: Option<OwnedWriteHalf>,
}

impl TelnetTransport {
    pub fn new(read_timeout: Duration, buffer_size: usize) -> Self {
        Self {
            read_timeout,
            buffer_size,
            reader: None,
            writer: None,
        }
    }
}

#[async_trait]
impl TimeoutRead for TelnetTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.reader
            .as_mut()
            .ok_or(TransportError::Closed)?
            .read(buf)
            .await
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn open(&mut self, host: &Host, cancel: CancellationToken) -> Result<(), TransportError> {
        let addr = host.host_port();
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Interrupted),
            res = TcpStream::connect(&addr) => {
                res.map_err(|source| TransportError::ConnectFailed { addr: addr.clone(), source })?
            }
        };

        tracing::debug!(%addr, "telnet connection established");

        let (rd, wr) = stream.into_split();
        self.reader = Some(TimeoutReader::new(
            TelnetDataReader::new(rd),
            self.read_timeout,
            self.buffer_size,
        ));
        self.writer = Some(wr);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(buf).await?;
        Ok(buf.len())
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
        if let Some(reader) = self.reader.as_mut() {
            reader.set_timeout(timeout);
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}
