//! Deadline-bounded reading over a source that has none of its own.
//!
//! A producer task pulls chunks from the source and hands them over a
//! capacity-1 channel, so at most one chunk is ever in flight. The consumer
//! races the channel against a per-read timer. Terminal conditions travel on
//! a separate channel: a chunk already handed over is always delivered before
//! the error behind it surfaces.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::TimeoutRead;

pub struct TimeoutReader {
    timeout: Duration,
    data_rx: mpsc::Receiver<Vec<u8>>,
    err_rx: mpsc::Receiver<io::Error>,
    rest: Option<Vec<u8>>,
    rest_pos: usize,
    cancel: CancellationToken,
    closed: bool,
    failed: bool,
    eof: bool,
}

impl TimeoutReader {
    pub fn new<R>(source: R, timeout: Duration, buf_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (data_tx, data_rx) = mpsc::channel::<Vec<u8>>(1);
        let (err_tx, err_rx) = mpsc::channel::<io::Error>(1);
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        tokio::spawn(read_loop(source, buf_size.max(1), data_tx, err_tx, token));

        Self {
            timeout,
            data_rx,
            err_rx,
            rest: None,
            rest_pos: 0,
            cancel,
            closed: false,
            failed: false,
            eof: false,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Stop the producer task and mark the reader closed. Idempotent; a
    /// pending `read` on another turn of the loop wakes with `Closed`.
    pub fn close(&mut self) {
        if !self.closed {
            self.cancel.cancel();
            self.closed = true;
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.failed {
            return Err(TransportError::Closed);
        }

        // Residual bytes from a chunk bigger than the caller's buffer are
        // served without touching the channel.
        if let Some(rest) = self.rest.take() {
            let n = (rest.len() - self.rest_pos).min(buf.len());
            buf[..n].copy_from_slice(&rest[self.rest_pos..self.rest_pos + n]);
            self.rest_pos += n;
            if self.rest_pos < rest.len() {
                self.rest = Some(rest);
            } else {
                self.rest_pos = 0;
            }
            return Ok(n);
        }

        if self.eof {
            return Ok(0);
        }

        let chunk = tokio::select! {
            biased;
            chunk = self.data_rx.recv() => chunk,
            _ = tokio::time::sleep(self.timeout) => return Err(TransportError::DeadlineExceeded),
        };

        let Some(chunk) = chunk else {
            // Producer is gone: an error if it left one, end of stream otherwise.
            if let Ok(err) = self.err_rx.try_recv() {
                self.failed = true;
                return Err(TransportError::Io(err));
            }
            self.eof = true;
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.rest = Some(chunk);
            self.rest_pos = n;
        }
        Ok(n)
    }
}

impl Drop for TimeoutReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop<R>(
    mut source: R,
    buf_size: usize,
    data_tx: mpsc::Sender<Vec<u8>>,
    err_tx: mpsc::Sender<io::Error>,
    token: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = vec![0u8; buf_size];
    loop {
        let res = tokio::select! {
            _ = token.cancelled() => return,
            res = source.read(&mut buf) => res,
        };
        match res {
            // Dropping data_tx signals end of stream to the consumer.
            Ok(0) => return,
            Ok(n) => {
                let chunk = buf[..n].to_vec();
                tokio::select! {
                    _ = token.cancelled() => return,
                    sent = data_tx.send(chunk) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                let _ = err_tx.send(e).await;
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl TimeoutRead for TimeoutReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        TimeoutReader::read(self, buf).await
    }
}
