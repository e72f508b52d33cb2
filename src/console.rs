//! The console session: prompt-driven authentication and command execution
//! against one device.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, ConsoleResult};
use crate::host::Host;
use crate::reader::PromptReader;
use crate::transport::{DefaultTransportFactory, Transport, TransportFactory};

/// Where the session stands in its lifecycle. The `Await*` states name what
/// the authentication loop is waiting for on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitUsername,
    AwaitPassword,
    AwaitEnable,
    AwaitEnablePassword,
    LoggedIn,
    Closed,
}

/// One interactive session against a network device.
///
/// Not safe to drive from several tasks at once; a session belongs to the
/// worker that opened it.
pub struct Console {
    cfg: ConsoleConfig,
    factory: Box<dyn TransportFactory>,
    reader: Option<PromptReader<Box<dyn Transport>>>,
    state: SessionState,
}

impl Console {
    pub fn new(cfg: ConsoleConfig) -> Self {
        let factory = DefaultTransportFactory {
            read_timeout: cfg.transport_read_timeout,
            buffer_size: cfg.transport_reader_buffer_size,
            dummy_scenario: cfg.dummy_scenario.clone(),
        };
        Self::with_factory(cfg, Box::new(factory))
    }

    /// Mostly for tests: inject a custom transport factory.
    pub fn with_factory(cfg: ConsoleConfig, factory: Box<dyn TransportFactory>) -> Self {
        Self {
            cfg,
            factory,
            reader: None,
            state: SessionState::Closed,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connect, authenticate, and leave the session at a command prompt.
    ///
    /// The whole login, banners included, must finish within `auth_timeout`.
    /// The token aborts a dial in progress.
    pub async fn open(&mut self, host: &Host, cancel: CancellationToken) -> ConsoleResult<()> {
        self.state = SessionState::Connecting;
        match self.connect(host, cancel).await {
            Ok(()) => {
                self.state = SessionState::LoggedIn;
                tracing::debug!(host = %host.addr, "logged in");
                Ok(())
            }
            Err(e) => {
                let _ = self.close().await;
                Err(e)
            }
        }
    }

    async fn connect(&mut self, host: &Host, cancel: CancellationToken) -> ConsoleResult<()> {
        let mut transport = self.factory.create(host.kind)?;
        transport.open(host, cancel).await?;

        let mut reader = PromptReader::new(
            transport,
            self.cfg.prompt_match_length,
            &self.cfg.auth_prompt_pattern,
        )?;
        reader.set_deadline(Instant::now() + self.cfg.auth_timeout);
        self.reader = Some(reader);
        self.state = SessionState::AwaitUsername;

        self.try_auth(host).await
    }

    /// Classify each authentication turn and answer it. Priority order:
    /// username prompt, password prompt, logged-in prompt, enable prompt.
    /// The full turn text is inspected, so a banner mentioning `#` cannot be
    /// mistaken for the logged-in prompt.
    async fn try_auth(&mut self, host: &Host) -> ConsoleResult<()> {
        let Self {
            cfg, reader, state, ..
        } = self;
        let reader = reader.as_mut().ok_or(ConsoleError::Closed)?;

        let mut saw_enable = false;
        loop {
            let mut turn = Vec::new();
            if let Err(e) = reader.read_to_end(&mut turn).await {
                return Err(match e {
                    ConsoleError::NoPromptFound => ConsoleError::AuthFailed(
                        "no recognizable prompt before the deadline".to_string(),
                    ),
                    other => other,
                });
            }

            let text = String::from_utf8_lossy(&turn).to_lowercase();
            let trimmed = text.trim();
            tracing::trace!(state = ?state, turn = %trimmed, "auth turn");

            if text.contains(&cfg.username_prompt_contains) {
                write_line(reader.get_mut().as_mut(), &host.account.username).await?;
                reader.reset();
                *state = SessionState::AwaitPassword;
            } else if text.contains(&cfg.password_prompt_contains) {
                let secret = if saw_enable {
                    &host.account.enable_password
                } else {
                    &host.account.password
                };
                write_line(reader.get_mut().as_mut(), secret).await?;
                reader.reset();
                *state = SessionState::AwaitEnable;
            } else if trimmed.ends_with(&cfg.prompt_suffix) {
                reader.set_prompt_pattern(&cfg.prompt_pattern)?;
                reader.reset();
                return Ok(());
            } else if trimmed.ends_with(&cfg.enable_suffix) {
                saw_enable = true;
                write_line(reader.get_mut().as_mut(), &cfg.enable_command).await?;
                reader.reset();
                *state = SessionState::AwaitEnablePassword;
            } else {
                return Err(ConsoleError::AuthFailed(format!(
                    "unrecognized prompt: {trimmed:?}"
                )));
            }
        }
    }

    /// Run one command and return everything up to and including the next
    /// prompt. A `NoPromptFound` here only fails this turn; the caller may
    /// move on to the next command.
    pub async fn execute(&mut self, cmd: &str) -> ConsoleResult<String> {
        let exec_timeout = self.cfg.exec_timeout;
        let reader = self.reader.as_mut().ok_or(ConsoleError::Closed)?;

        reader.reset();
        reader.set_deadline(Instant::now() + exec_timeout);
        write_line(reader.get_mut().as_mut(), cmd).await?;

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Run a command for its side effect, discarding the output.
    pub async fn run(&mut self, cmd: &str) -> ConsoleResult<()> {
        self.execute(cmd).await.map(|_| ())
    }

    /// Write raw bytes to the device, no newline, no reading back.
    pub async fn send(&mut self, cmd: &str) -> ConsoleResult<()> {
        self.transport_mut()?.write(cmd.as_bytes()).await?;
        Ok(())
    }

    /// Write a command line terminated with `\r`, no reading back.
    pub async fn sendln(&mut self, cmd: &str) -> ConsoleResult<()> {
        write_line(self.transport_mut()?, cmd).await
    }

    /// Swap the prompt pattern used to delimit command output.
    pub fn set_prompt(&mut self, pattern: &str) -> ConsoleResult<()> {
        self.reader
            .as_mut()
            .ok_or(ConsoleError::Closed)?
            .set_prompt_pattern(pattern)
    }

    /// Close the transport, stopping its reader task. Idempotent.
    pub async fn close(&mut self) -> ConsoleResult<()> {
        if let Some(mut reader) = self.reader.take() {
            reader.get_mut().close().await?;
        }
        self.state = SessionState::Closed;
        Ok(())
    }

    fn transport_mut(&mut self) -> ConsoleResult<&mut dyn Transport> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader.get_mut().as_mut()),
            None => Err(ConsoleError::Closed),
        }
    }
}

const LINE_END: &[u8] = b"\r";

async fn write_line<T: Transport + ?Sized>(transport: &mut T, line: &str) -> ConsoleResult<()> {
    transport.write(line.as_bytes()).await?;
    transport.write(LINE_END).await?;
    Ok(())
}
