use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::{ChannelStream, Disconnect, Pty};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::host::Host;
use crate::transport::{TimeoutRead, TimeoutReader, Transport};

const TERM: &str = "xterm";
const TERM_COLS: u32 = 80;
const TERM_ROWS: u32 = 40;
// 14.4 kbaud in and out, matching what a serial console would look like.
const TTY_SPEED: u32 = 14400;

/// Accepts any host key; targets come from the operator's inventory.
struct AcceptAllKeys;

impl client::Handler for AcceptAllKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH transport: password auth, then an interactive shell on a PTY with
/// echo disabled. The shell's output is the read side, its input the write
/// side.
pub struct SshTransport {
    read_timeout: Duration,
    buffer_size: usize,
    handle: Option<client::Handle<AcceptAllKeys>>,
    reader: Option<TimeoutReader>,
    writer: Option<WriteHalf<ChannelStream<Msg>>>,
}

impl SshTransport {
    pub fn new(read_timeout: Duration, buffer_size: usize) -> Self {
        Self {
            read_timeout,
            buffer_size,
            handle: None,
            reader: None,
            writer: None,
        }
    }
}

#[async_trait]
impl TimeoutRead for SshTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.reader
            .as_mut()
            .ok_or(TransportError::Closed)?
            .read(buf)
            .await
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&mut self, host: &Host, cancel: CancellationToken) -> Result<(), TransportError> {
        let addr = host.host_port();
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Interrupted),
            res = TcpStream::connect(&addr) => {
                res.map_err(|source| TransportError::ConnectFailed { addr: addr.clone(), source })?
            }
        };

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect_stream(config, stream, AcceptAllKeys).await?;

        let auth = handle
            .authenticate_password(&host.account.username, &host.account.password)
            .await?;
        if !auth.success() {
            return Err(TransportError::SshAuthRejected(host.account.username.clone()));
        }

        let channel = handle.channel_open_session().await?;
        channel
            .request_pty(
                false,
                TERM,
                TERM_COLS,
                TERM_ROWS,
                0,
                0,
                &[
                    (Pty::ECHO, 0),
                    (Pty::TTY_OP_ISPEED, TTY_SPEED),
                    (Pty::TTY_OP_OSPEED, TTY_SPEED),
                ],
            )
            .await?;
        channel.request_shell(false).await?;

        tracing::debug!(%addr, user = %host.account.username, "ssh shell established");

        let (rd, wr): (ReadHalf<_>, WriteHalf<_>) = tokio::io::split(channel.into_stream());
        self.reader = Some(TimeoutReader::new(rd, self.read_timeout, self.buffer_size));
        self.writer = Some(wr);
        self.handle = Some(handle);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(buf).await?;
        writer.flush().await?;
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
        self.writer.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "session finished", "en")
                .await;
        }
        Ok(())
    }
}
