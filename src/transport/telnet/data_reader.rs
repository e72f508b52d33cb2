//! TELNET data un-escaping.
//!
//! Byte value 255 ("IAC", interpret-as-command) starts an in-band command
//! sequence. This reader strips every command sequence and passes application
//! data through, so upper layers never see protocol bytes:
//!
//! * `IAC IAC` is the escape for one literal 255 in the data.
//! * `IAC WILL|WONT|DO|DONT <opt>` is dropped; no option is ever negotiated,
//!   which device CLIs tolerate from a passive client.
//! * `IAC SB ... IAC SE` subnegotiation blocks are dropped whole, including
//!   escaped `IAC IAC` payload bytes inside the block.
//! * a stray `IAC SE` is dropped.
//! * anything else after IAC fails the stream as corrupted.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufRead, AsyncRead, BufReader, ReadBuf};

use crate::error::TransportError;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Plain application data.
    Data,
    /// Seen IAC, deciding what the command is.
    Iac,
    /// Seen IAC WILL/WONT/DO/DONT, next byte is the option.
    Option,
    /// Inside an SB block, payload bytes are discarded.
    Sub,
    /// Seen IAC inside an SB block.
    SubIac,
}

/// Incremental decoder, fed one byte at a time so command sequences may
/// straddle chunk boundaries freely.
#[derive(Debug)]
pub(crate) struct DataDecoder {
    state: DecodeState,
}

impl DataDecoder {
    pub(crate) fn new() -> Self {
        Self {
            state: DecodeState::Data,
        }
    }

    /// Feed one wire byte. `Ok(Some(b))` emits an application byte,
    /// `Ok(None)` consumed a protocol byte, `Err(b)` is a corrupt command.
    pub(crate) fn feed(&mut self, b: u8) -> Result<Option<u8>, u8> {
        match self.state {
            DecodeState::Data => {
                if b == IAC {
                    self.state = DecodeState::Iac;
                    Ok(None)
                } else {
                    Ok(Some(b))
                }
            }
            DecodeState::Iac => match b {
                IAC => {
                    self.state = DecodeState::Data;
                    Ok(Some(IAC))
                }
                WILL | WONT | DO | DONT => {
                    self.state = DecodeState::Option;
                    Ok(None)
                }
                SB => {
                    self.state = DecodeState::Sub;
                    Ok(None)
                }
                SE => {
                    self.state = DecodeState::Data;
                    Ok(None)
                }
                other => Err(other),
            },
            DecodeState::Option => {
                // The option byte of an offer we silently discard.
                self.state = DecodeState::Data;
                Ok(None)
            }
            DecodeState::Sub => {
                if b == IAC {
                    self.state = DecodeState::SubIac;
                }
                Ok(None)
            }
            DecodeState::SubIac => {
                if b == SE {
                    self.state = DecodeState::Data;
                } else {
                    // IAC IAC marks one escaped payload byte; either way the
                    // block's content is discarded.
                    self.state = DecodeState::Sub;
                }
                Ok(None)
            }
        }
    }
}

/// `AsyncRead` adapter emitting only application data from a TELNET stream.
///
/// A read returns once at least one byte is decoded and the inner buffer has
/// no more immediately available input, keeping latency low and chunk
/// boundaries visible to the timeout reader above.
pub struct TelnetDataReader<R> {
    inner: BufReader<R>,
    decoder: DataDecoder,
    pending_err: Option<io::Error>,
}

impl<R: AsyncRead + Unpin> TelnetDataReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            inner: BufReader::new(source),
            decoder: DataDecoder::new(),
            pending_err: None,
        }
    }
}

fn corrupted(byte: u8) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, TransportError::Corrupted(byte))
}

impl<R: AsyncRead + Unpin> AsyncRead for TelnetDataReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut wrote = 0usize;

        loop {
            if out.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            if let Some(err) = this.pending_err.take() {
                if wrote > 0 {
                    // Flush decoded bytes first; the error resurfaces next call.
                    this.pending_err = Some(err);
                    return Poll::Ready(Ok(()));
                }
                return Poll::Ready(Err(err));
            }

            let avail = match Pin::new(&mut this.inner).poll_fill_buf(cx) {
                Poll::Ready(Ok(avail)) => avail,
                Poll::Ready(Err(err)) => {
                    if wrote > 0 {
                        this.pending_err = Some(err);
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Ready(Err(err));
                }
                Poll::Pending => {
                    if wrote > 0 {
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Pending;
                }
            };

            if avail.is_empty() {
                // EOF; whatever was decoded has already been flushed into out.
                return Poll::Ready(Ok(()));
            }

            let mut consumed = 0usize;
            let mut failure = None;
            for &b in avail {
                consumed += 1;
                match this.decoder.feed(b) {
                    Ok(Some(byte)) => {
                        out.put_slice(&[byte]);
                        wrote += 1;
                        if out.remaining() == 0 {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(bad) => {
                        failure = Some(corrupted(bad));
                        break;
                    }
                }
            }
            Pin::new(&mut this.inner).consume(consumed);

            if let Some(err) = failure {
                if wrote > 0 {
                    this.pending_err = Some(err);
                    return Poll::Ready(Ok(()));
                }
                return Poll::Ready(Err(err));
            }

            if wrote > 0 && this.inner.buffer().is_empty() {
                return Poll::Ready(Ok(()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::io::AsyncReadExt;

    async fn decode(input: &[u8]) -> io::Result<Vec<u8>> {
        let mut rd = TelnetDataReader::new(input);
        let mut out = Vec::new();
        rd.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn clean_data_is_identity() {
        let data = b"show version\r\nCisco IOS Software\r\nsw1#";
        assert_eq!(decode(data).await.unwrap(), data);
    }

    #[tokio::test]
    async fn escaped_iac_yields_single_literal() {
        assert_eq!(decode(&[IAC, IAC]).await.unwrap(), vec![0xff]);
        assert_eq!(
            decode(&[1, IAC, IAC, 2, IAC, IAC]).await.unwrap(),
            vec![1, 0xff, 2, 0xff]
        );
    }

    #[tokio::test]
    async fn negotiation_offers_are_dropped() {
        for cmd in [WILL, WONT, DO, DONT] {
            let input = [b'a', IAC, cmd, 0x18, b'b'];
            assert_eq!(decode(&input).await.unwrap(), b"ab");
        }
    }

    #[tokio::test]
    async fn mixed_commands_and_data() {
        // [0x01, 0x02, IAC, IAC, 0x03, IAC, WILL, 0x18, 0x04]
        let input = [0x01, 0x02, IAC, IAC, 0x03, IAC, WILL, 0x18, 0x04];
        assert_eq!(decode(&input).await.unwrap(), vec![0x01, 0x02, 0xff, 0x03, 0x04]);
    }

    #[tokio::test]
    async fn subnegotiation_block_is_dropped_whole() {
        let input = [b'x', IAC, SB, 31, 0, 80, 0, 24, IAC, SE, b'y'];
        assert_eq!(decode(&input).await.unwrap(), b"xy");
    }

    #[tokio::test]
    async fn escaped_iac_inside_subnegotiation_stays_dropped() {
        // The IAC IAC pair inside the block is one escaped payload byte,
        // which is discarded with the rest of the block.
        let input = [b'x', IAC, SB, 24, IAC, IAC, 7, IAC, SE, b'y'];
        assert_eq!(decode(&input).await.unwrap(), b"xy");
    }

    #[tokio::test]
    async fn stray_se_is_tolerated() {
        let input = [b'x', IAC, SE, b'y'];
        assert_eq!(decode(&input).await.unwrap(), b"xy");
    }

    #[tokio::test]
    async fn unknown_command_is_corrupted() {
        // IAC GA (249) is not something this client understands.
        let err = decode(&[b'x', IAC, 249, b'y']).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn corrupted_stream_still_flushes_decoded_bytes_first() {
        let mut rd = TelnetDataReader::new(&[b'a', b'b', IAC, 249][..]);
        let mut buf = [0u8; 16];
        let n = rd.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ab");
        assert!(rd.read(&mut buf).await.is_err());
    }

    /// Source yielding preset chunks one poll at a time, so command
    /// sequences can straddle read boundaries.
    struct Chunked {
        chunks: VecDeque<Vec<u8>>,
    }

    impl AsyncRead for Chunked {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if let Some(chunk) = self.chunks.pop_front() {
                buf.put_slice(&chunk);
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn sequences_straddling_chunks_decode_correctly() {
        let src = Chunked {
            chunks: vec![
                vec![b'a', IAC],
                vec![WILL],
                vec![0x18, b'b', IAC],
                vec![IAC],
                vec![IAC, SB, 31],
                vec![IAC, SE, b'c'],
            ]
            .into(),
        };
        let mut rd = TelnetDataReader::new(src);
        let mut out = Vec::new();
        rd.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, vec![b'a', b'b', 0xff, b'c']);
    }
}
