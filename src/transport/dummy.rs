//! Scripted transport for tests and dry runs.
//!
//! The scenario file is XML: a list of `<send>` entries, each delivered as
//! one read after its `timeout` delay has passed:
//!
//! ```xml
//! <scenario>
//!   <send timeout="100ms">&#13;&#10;Username: </send>
//!   <send timeout="50ms">Password: </send>
//!   <send timeout="50ms">sw1#</send>
//! </scenario>
//! ```
//!
//! After the last entry every read reports end of stream. Writes are
//! swallowed. The configured read timeout races each entry's delay, so a
//! scenario can also exercise `DeadlineExceeded` paths.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::host::Host;
use crate::transport::{TimeoutRead, Transport};

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(rename = "send", default)]
    send: Vec<SendEntry>,
}

#[derive(Debug, Deserialize)]
struct SendEntry {
    #[serde(rename = "@timeout", default, deserialize_with = "parse_timeout")]
    timeout: Option<Duration>,
    #[serde(rename = "$text", default)]
    text: String,
}

fn parse_timeout<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

pub struct DummyTransport {
    file: PathBuf,
    read_timeout: Duration,
    entries: Vec<SendEntry>,
    index: usize,
    cancel: CancellationToken,
    opened: bool,
}

impl DummyTransport {
    pub fn new(file: PathBuf, read_timeout: Duration) -> Self {
        Self {
            file,
            read_timeout,
            entries: Vec::new(),
            index: 0,
            cancel: CancellationToken::new(),
            opened: false,
        }
    }
}

#[async_trait]
impl TimeoutRead for DummyTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.opened {
            return Err(TransportError::Closed);
        }
        let Some(entry) = self.entries.get(self.index) else {
            return Ok(0);
        };

        let delay = entry.timeout.unwrap_or_default();
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransportError::Interrupted),
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::time::sleep(self.read_timeout) => return Err(TransportError::DeadlineExceeded),
        }

        let payload = entry.text.as_bytes();
        if buf.len() < payload.len() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "scenario payload larger than read buffer",
            )));
        }
        buf[..payload.len()].copy_from_slice(payload);
        self.index += 1;
        Ok(payload.len())
    }
}

#[async_trait]
impl Transport for DummyTransport {
    async fn open(&mut self, _host: &Host, _cancel: CancellationToken) -> Result<(), TransportError> {
        let raw = tokio::fs::read_to_string(&self.file).await?;
        let scenario: Scenario = quick_xml::de::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.entries = scenario.send;
        self.index = 0;
        self.opened = true;
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        if !self.opened {
            return Err(TransportError::Closed);
        }
        Ok(buf.len())
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.opened {
            self.opened = false;
            self.index = self.entries.len();
            self.cancel.cancel();
        }
        Ok(())
    }
}
