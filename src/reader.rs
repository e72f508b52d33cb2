//! Turn-oriented reading: stream device output until the prompt shows up.
//!
//! A [`PromptReader`] pulls chunks from a timeout-bounded source, buffers
//! them, and searches the whole buffer for the prompt pattern after every
//! append. Bytes are handed to the caller incrementally, except for the last
//! `match_length` bytes, which are held back until the reader knows whether
//! the prompt is hiding in them. `read` returning `Ok(0)` means the prompt
//! matched and the turn is complete; [`ConsoleError::NoPromptFound`] means
//! the deadline passed or the stream ended first.

use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};

use crate::error::{ConsoleError, ConsoleResult, TransportError};
use crate::prompt::PromptMatcher;
use crate::transport::TimeoutRead;

// Scratch size for one pull from the source. Chunks larger than this are
// simply delivered over several pulls by the timeout reader.
const CHUNK_SIZE: usize = 4096;

/// Outcome a finished cycle keeps reporting until `reset`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Latched {
    Eof,
    NoPrompt,
    Upstream(String),
}

pub struct PromptReader<R> {
    source: R,
    matcher: PromptMatcher,
    deadline: Instant,
    match_length: usize,
    buf: BytesMut,
    chunk: Box<[u8; CHUNK_SIZE]>,
    latched: Option<Latched>,
    drain_only: bool,
}

impl<R: TimeoutRead> PromptReader<R> {
    /// The internal buffer grows as needed; a turn's output is bounded in
    /// practice by the device and the deadline, so no cap is enforced.
    pub fn new(source: R, match_length: usize, pattern: &str) -> ConsoleResult<Self> {
        Ok(Self {
            source,
            matcher: PromptMatcher::new(pattern)?,
            deadline: Instant::now(),
            match_length,
            buf: BytesMut::new(),
            chunk: Box::new([0u8; CHUNK_SIZE]),
            latched: None,
            drain_only: false,
        })
    }

    pub fn set_prompt_pattern(&mut self, pattern: &str) -> ConsoleResult<()> {
        self.matcher = PromptMatcher::new(pattern)?;
        Ok(())
    }

    /// Absolute wall-clock bound for the current turn.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = deadline;
    }

    pub fn deadline_in(&mut self, timeout: Duration) {
        self.deadline = Instant::now() + timeout;
    }

    /// Arm a new cycle: drop buffered bytes and clear any latched outcome.
    /// The pattern and deadline carry over.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.latched = None;
        self.drain_only = false;
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// Stream the current turn into `p`.
    ///
    /// Returns `Ok(0)` once the prompt has matched and every buffered byte
    /// has been handed out. Outcomes are sticky: after `Ok(0)` or an error,
    /// further reads repeat it until [`reset`](Self::reset).
    pub async fn read(&mut self, p: &mut [u8]) -> ConsoleResult<usize> {
        if let Some(latched) = &self.latched {
            return match latched {
                Latched::Eof => Ok(0),
                Latched::NoPrompt => Err(ConsoleError::NoPromptFound),
                Latched::Upstream(msg) => Err(ConsoleError::Upstream(msg.clone())),
            };
        }

        if self.drain_only {
            return Ok(self.drain(p));
        }

        loop {
            match self.source.read(&mut self.chunk[..]).await {
                Ok(0) => {
                    // Stream ended before the prompt showed up.
                    self.latched = Some(Latched::NoPrompt);
                    return Err(ConsoleError::NoPromptFound);
                }
                Ok(n) => self.buf.extend_from_slice(&self.chunk[..n]),
                Err(TransportError::DeadlineExceeded) => {
                    if Instant::now() > self.deadline {
                        self.latched = Some(Latched::NoPrompt);
                        return Err(ConsoleError::NoPromptFound);
                    }
                    continue;
                }
                Err(e) => {
                    self.latched = Some(Latched::Upstream(e.to_string()));
                    return Err(ConsoleError::Transport(e));
                }
            }

            // The whole buffer is searched, not just the tail, so banner
            // text around the prompt cannot hide it.
            if let Some(hit) = self.matcher.find(&self.buf) {
                tracing::trace!(prompt = %hit.text(), "prompt matched");
                let n = self.drain(p);
                if !self.buf.is_empty() {
                    self.drain_only = true;
                }
                return Ok(n);
            }

            // No match yet: everything except the last match_length bytes is
            // safe to release, since the prompt cannot start before them.
            if self.buf.len() > self.match_length {
                let releasable = self.buf.len() - self.match_length;
                let n = releasable.min(p.len());
                p[..n].copy_from_slice(&self.buf[..n]);
                self.buf.advance(n);
                return Ok(n);
            }

            if Instant::now() > self.deadline {
                self.latched = Some(Latched::NoPrompt);
                return Err(ConsoleError::NoPromptFound);
            }
        }
    }

    /// Drain buffered bytes into the whole of one turn's output.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> ConsoleResult<usize> {
        let mut total = 0;
        let mut buf = [0u8; 512];
        loop {
            match self.read(&mut buf).await? {
                0 => return Ok(total),
                n => {
                    out.extend_from_slice(&buf[..n]);
                    total += n;
                }
            }
        }
    }

    fn drain(&mut self, p: &mut [u8]) -> usize {
        let n = self.buf.len().min(p.len());
        p[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        if self.buf.is_empty() {
            self.drain_only = false;
            self.latched = Some(Latched::Eof);
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    enum Step {
        Data(&'static [u8]),
        Timeout,
        Eof,
    }

    struct ScriptSource {
        steps: VecDeque<Step>,
    }

    impl ScriptSource {
        fn new(steps: Vec<Step>) -> Self {
            Self { steps: steps.into() }
        }
    }

    #[async_trait]
    impl TimeoutRead for ScriptSource {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            match self.steps.pop_front() {
                Some(Step::Data(data)) => {
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                Some(Step::Timeout) => Err(TransportError::DeadlineExceeded),
                Some(Step::Eof) | None => Ok(0),
            }
        }
    }

    fn reader(steps: Vec<Step>, match_length: usize, pattern: &str) -> PromptReader<ScriptSource> {
        let mut r = PromptReader::new(ScriptSource::new(steps), match_length, pattern).unwrap();
        r.deadline_in(Duration::from_secs(5));
        r
    }

    #[tokio::test]
    async fn whole_turn_in_one_chunk() {
        let mut r = reader(
            vec![Step::Data(b"Authorization required!\r\nUsername: ")],
            10,
            r"(?i)user\w+:\s+",
        );

        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"Authorization required!\r\nUsername: ");

        // EOF latch is sticky.
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn timeouts_before_the_deadline_are_retried() {
        let mut r = reader(
            vec![
                Step::Timeout,
                Step::Data(b"User"),
                Step::Timeout,
                Step::Data(b"name: "),
            ],
            10,
            r"(?i)user\w+:\s+",
        );

        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"Username: ");
    }

    #[tokio::test]
    async fn tail_is_held_back_until_the_match_decision() {
        // 30 bytes of output, no prompt: only 20 may be released.
        let mut r = reader(
            vec![Step::Data(b"abcdefghijklmnopqrstuvwxyz1234")],
            10,
            r"never-matches#",
        );

        let mut buf = [0u8; 64];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcdefghijklmnopqrst");

        // The held-back tail arrives once the prompt match resolves it.
        r.get_mut().steps.push_back(Step::Data(b"sw1#"));
        r.set_prompt_pattern(r"[\w\-]+#").unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"uvwxyz1234sw1#");
    }

    #[tokio::test]
    async fn prompt_straddling_chunks_is_delivered_whole() {
        let mut r = reader(
            vec![Step::Data(b"sw"), Step::Timeout, Step::Data(b"1#")],
            20,
            r"[\w\-]+#",
        );

        // Nothing may be released before the match: the first successful
        // read returns the complete payload.
        let mut buf = [0u8; 64];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"sw1#");
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn small_caller_buffer_drains_in_steps() {
        let mut r = reader(vec![Step::Data(b"output sw1#")], 20, r"[\w\-]+#");

        let mut buf = [0u8; 4];
        let mut out = Vec::new();
        loop {
            match r.read(&mut buf).await.unwrap() {
                0 => break,
                n => out.extend_from_slice(&buf[..n]),
            }
        }
        assert_eq!(out, b"output sw1#");
    }

    #[tokio::test]
    async fn deadline_expiry_latches_no_prompt_found() {
        let mut r = reader(vec![Step::Timeout, Step::Timeout, Step::Timeout], 10, r"[\w\-]+#");
        r.set_deadline(Instant::now() - Duration::from_millis(1));

        let mut buf = [0u8; 8];
        assert!(matches!(
            r.read(&mut buf).await.unwrap_err(),
            ConsoleError::NoPromptFound
        ));
        // Sticky until reset.
        assert!(matches!(
            r.read(&mut buf).await.unwrap_err(),
            ConsoleError::NoPromptFound
        ));
    }

    #[tokio::test]
    async fn eof_without_prompt_is_no_prompt_found() {
        let mut r = reader(vec![Step::Data(b"some partial"), Step::Eof], 30, r"[\w\-]+#");

        let mut buf = [0u8; 64];
        assert!(matches!(
            r.read(&mut buf).await.unwrap_err(),
            ConsoleError::NoPromptFound
        ));
    }

    #[tokio::test]
    async fn reset_behaves_like_a_fresh_reader() {
        let mut r = reader(
            vec![Step::Data(b"Username: "), Step::Data(b"Password: ")],
            10,
            r"(?i)user\w+:\s+",
        );

        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"Username: ");

        r.reset();
        r.set_prompt_pattern(r"(?i)pass\w+:\s+").unwrap();

        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"Password: ");
    }

    #[tokio::test]
    async fn emitted_bytes_are_a_prefix_ending_with_the_prompt() {
        // Output split across odd chunk boundaries; the concatenation of all
        // reads must equal the source bytes and end with the prompt.
        let mut r = reader(
            vec![
                Step::Data(b"Cisco IOS Soft"),
                Step::Data(b"ware, C2960 "),
                Step::Timeout,
                Step::Data(b"Version 15.0\r\n"),
                Step::Data(b"sw"),
                Step::Data(b"1#"),
            ],
            20,
            r"[\w\-]+#",
        );

        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(
            out,
            b"Cisco IOS Software, C2960 Version 15.0\r\nsw1#".as_slice()
        );
        assert!(out.ends_with(b"sw1#"));
    }
}
