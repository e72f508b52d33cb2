pub mod config;
pub mod console;
pub mod error;
pub mod host;
pub mod prompt;
pub mod reader;
pub mod transport;
pub mod uri;
pub mod worker;

// Convenient re-exports (so call sites can do `netconsole::Console`, etc.)
pub use config::{Config, ConsoleConfig, HostJob, Overrides};
pub use console::{Console, SessionState};
pub use error::{ConfigError, ConsoleError, ConsoleResult, TransportError};
pub use host::{Account, Host, TransportKind};
pub use reader::PromptReader;
