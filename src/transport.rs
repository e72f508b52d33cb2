//! Pluggable byte transports.
//!
//! A [`Transport`] hands the console a timeout-bounded read side and a plain
//! write side over one device connection. Reads never block past the
//! configured per-read timeout; the prompt reader polls on top of that.

mod dummy;
mod reader;
mod ssh;
mod telnet;

pub use dummy::DummyTransport;
pub use reader::TimeoutReader;
pub use ssh::SshTransport;
pub use telnet::TelnetTransport;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::host::{Host, TransportKind};

/// The read side the prompt reader consumes: deadline-bounded, `Ok(0)` on
/// end of stream, `DeadlineExceeded` when the source stays silent.
#[async_trait]
pub trait TimeoutRead: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

#[async_trait]
impl<T: TimeoutRead + ?Sized> TimeoutRead for Box<T> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf).await
    }
}

#[async_trait]
pub trait Transport: TimeoutRead {
    /// Establish the connection. The token aborts a dial in progress.
    async fn open(&mut self, host: &Host, cancel: CancellationToken) -> Result<(), TransportError>;

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    fn set_read_timeout(&mut self, timeout: Duration);

    /// Tear the connection down, stopping the reader task. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, kind: TransportKind) -> Result<Box<dyn Transport>, TransportError>;
}

/// Builds the real transports from the console configuration knobs.
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    pub read_timeout: Duration,
    pub buffer_size: usize,
    pub dummy_scenario: Option<PathBuf>,
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, kind: TransportKind) -> Result<Box<dyn Transport>, TransportError> {
        match kind {
            TransportKind::Ssh => Ok(Box::new(SshTransport::new(self.read_timeout, self.buffer_size))),
            TransportKind::Telnet => Ok(Box::new(TelnetTransport::new(self.read_timeout, self.buffer_size))),
            TransportKind::Dummy => {
                let file = self.dummy_scenario.clone().ok_or(TransportError::NoScenario)?;
                Ok(Box::new(DummyTransport::new(file, self.read_timeout)))
            }
        }
    }
}
