//! YAML configuration: a default account, shared command lists, and a list
//! of hosts given as connection strings or as mappings with overrides.
//!
//! ```yaml
//! default_account:
//!   username: admin
//!   password: secret
//! commands:
//!   - show version
//! hosts:
//!   - ssh://10.0.0.1
//!   - uri: telnet://10.0.0.2
//!     commands: [ "show run" ]
//!     console_config:
//!       exec_timeout: 20s
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::host::{Account, Host, TransportKind};
use crate::uri::HostFactory;

const DEFAULT_AUTH_PROMPT_PATTERN: &str = r"(?i)((user|pass)\w+:|[\w\-]+[>#])";
const DEFAULT_PROMPT_PATTERN: &str = r"[\w\-]+#";
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_USERNAME_PROMPT_CONTAINS: &str = "username:";
const DEFAULT_PASSWORD_PROMPT_CONTAINS: &str = "password:";
const DEFAULT_PROMPT_SUFFIX: &str = "#";
const DEFAULT_ENABLE_SUFFIX: &str = ">";
const DEFAULT_ENABLE_COMMAND: &str = "en";
const DEFAULT_PROMPT_MATCH_LENGTH: usize = 20;
const DEFAULT_TRANSPORT_READ_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_TRANSPORT_READER_BUFFER_SIZE: usize = 1024;

const DEFAULT_INITIAL_COMMANDS: &[&str] = &["term le 0"];
const DEFAULT_EXIT_COMMAND: &str = "q";

/// The tunable knobs of the console engine. Every field has a default, so a
/// config file only names what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Matched during authentication: username/password/enable prompts and
    /// the logged-in prompt.
    pub auth_prompt_pattern: String,
    /// Matched after login to delimit command output.
    pub prompt_pattern: String,
    #[serde(with = "humantime_serde")]
    pub auth_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub exec_timeout: Duration,
    /// Lowercased substring identifying the username prompt.
    pub username_prompt_contains: String,
    /// Lowercased substring identifying the password prompt.
    pub password_prompt_contains: String,
    /// Tail character of the logged-in prompt.
    pub prompt_suffix: String,
    /// Tail character of the unprivileged prompt.
    pub enable_suffix: String,
    /// Command that elevates from enable_suffix to prompt_suffix.
    pub enable_command: String,
    /// Tail window, in bytes, held back for prompt matching.
    pub prompt_match_length: usize,
    #[serde(with = "humantime_serde")]
    pub transport_read_timeout: Duration,
    pub transport_reader_buffer_size: usize,
    #[serde(skip)]
    pub dummy_scenario: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            auth_prompt_pattern: DEFAULT_AUTH_PROMPT_PATTERN.to_string(),
            prompt_pattern: DEFAULT_PROMPT_PATTERN.to_string(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            username_prompt_contains: DEFAULT_USERNAME_PROMPT_CONTAINS.to_string(),
            password_prompt_contains: DEFAULT_PASSWORD_PROMPT_CONTAINS.to_string(),
            prompt_suffix: DEFAULT_PROMPT_SUFFIX.to_string(),
            enable_suffix: DEFAULT_ENABLE_SUFFIX.to_string(),
            enable_command: DEFAULT_ENABLE_COMMAND.to_string(),
            prompt_match_length: DEFAULT_PROMPT_MATCH_LENGTH,
            transport_read_timeout: DEFAULT_TRANSPORT_READ_TIMEOUT,
            transport_reader_buffer_size: DEFAULT_TRANSPORT_READER_BUFFER_SIZE,
            dummy_scenario: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub default_config: ConsoleConfig,
    #[serde(default)]
    pub default_account: Account,
    #[serde(default)]
    pub initial_commands: Option<Vec<String>>,
    #[serde(default)]
    pub commands: Option<Vec<String>>,
    #[serde(default)]
    pub exit_command: Option<String>,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

/// A host is either a bare connection string or a mapping with overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HostEntry {
    Uri(String),
    Detailed(HostOverrides),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostOverrides {
    pub uri: String,
    #[serde(default)]
    pub initial_commands: Option<Vec<String>>,
    #[serde(default)]
    pub commands: Option<Vec<String>>,
    #[serde(default)]
    pub exit_command: Option<String>,
    #[serde(default)]
    pub console_config: Option<ConsoleConfig>,
}

/// Command-line level overrides applied while resolving the config.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Replaces every host's command list when non-empty.
    pub commands: Vec<String>,
    /// Replaces the default account (the `-a` interactive prompt).
    pub account: Option<Account>,
    /// Forces every host onto the dummy transport with this scenario.
    pub dummy_scenario: Option<PathBuf>,
}

/// One fully resolved unit of work for a worker.
#[derive(Debug, Clone)]
pub struct HostJob {
    pub host: Host,
    pub console: ConsoleConfig,
    pub initial_commands: Vec<String>,
    pub commands: Vec<String>,
    pub exit_command: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply inheritance and CLI overrides, producing one job per host.
    pub fn resolve(&self, overrides: &Overrides) -> Result<Vec<HostJob>, ConfigError> {
        let account = overrides
            .account
            .clone()
            .unwrap_or_else(|| self.default_account.clone());
        if account.password.is_empty() {
            return Err(ConfigError::NoAccount);
        }

        let initial_commands = self.initial_commands.clone().unwrap_or_else(|| {
            DEFAULT_INITIAL_COMMANDS.iter().map(|s| s.to_string()).collect()
        });
        let exit_command = self
            .exit_command
            .clone()
            .unwrap_or_else(|| DEFAULT_EXIT_COMMAND.to_string());

        let factory = HostFactory::new(account);
        let mut jobs = Vec::with_capacity(self.hosts.len());

        for entry in &self.hosts {
            let (uri, detail) = match entry {
                HostEntry::Uri(uri) => (uri.as_str(), None),
                HostEntry::Detailed(detail) => (detail.uri.as_str(), Some(detail)),
            };

            let mut host = factory.host(uri)?;
            let mut console = detail
                .and_then(|d| d.console_config.clone())
                .unwrap_or_else(|| self.default_config.clone());

            if let Some(scenario) = &overrides.dummy_scenario {
                host.kind = TransportKind::Dummy;
                console.dummy_scenario = Some(scenario.clone());
            }

            let commands = if !overrides.commands.is_empty() {
                overrides.commands.clone()
            } else {
                detail
                    .and_then(|d| d.commands.clone())
                    .or_else(|| self.commands.clone())
                    .unwrap_or_default()
            };
            if commands.is_empty() {
                return Err(ConfigError::NoCommands(host.addr));
            }

            jobs.push(HostJob {
                initial_commands: detail
                    .and_then(|d| d.initial_commands.clone())
                    .unwrap_or_else(|| initial_commands.clone()),
                exit_command: detail
                    .and_then(|d| d.exit_command.clone())
                    .unwrap_or_else(|| exit_command.clone()),
                commands,
                console,
                host,
            });
        }

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides_with_account() -> Overrides {
        Overrides {
            account: Some(Account {
                username: "admin".into(),
                password: "secret".into(),
                enable_password: String::new(),
            }),
            ..Overrides::default()
        }
    }

    #[test]
    fn defaults_match_documentation() {
        let cfg = ConsoleConfig::default();
        assert_eq!(cfg.prompt_pattern, r"[\w\-]+#");
        assert_eq!(cfg.auth_timeout, Duration::from_secs(5));
        assert_eq!(cfg.username_prompt_contains, "username:");
        assert_eq!(cfg.prompt_suffix, "#");
        assert_eq!(cfg.enable_command, "en");
        assert_eq!(cfg.prompt_match_length, 20);
        assert_eq!(cfg.transport_read_timeout, Duration::from_secs(1));
        assert_eq!(cfg.transport_reader_buffer_size, 1024);
    }

    #[test]
    fn console_config_durations_parse_as_humantime() {
        let cfg: ConsoleConfig =
            serde_yaml::from_str("auth_timeout: 30s\nexec_timeout: 1500ms\n").unwrap();
        assert_eq!(cfg.auth_timeout, Duration::from_secs(30));
        assert_eq!(cfg.exec_timeout, Duration::from_millis(1500));
        // Untouched fields keep their defaults.
        assert_eq!(cfg.prompt_match_length, 20);
    }

    #[test]
    fn hosts_accept_strings_and_mappings() {
        let cfg: Config = serde_yaml::from_str(
            r#"
commands: [ "show version" ]
hosts:
  - telnet://10.0.0.1
  - uri: ssh://10.0.0.2
    commands: [ "show run" ]
    exit_command: exit
    console_config:
      exec_timeout: 20s
"#,
        )
        .unwrap();

        let jobs = cfg.resolve(&overrides_with_account()).unwrap();
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs[0].host.addr, "10.0.0.1");
        assert_eq!(jobs[0].host.kind, TransportKind::Telnet);
        assert_eq!(jobs[0].commands, vec!["show version"]);
        assert_eq!(jobs[0].exit_command, "q");
        assert_eq!(jobs[0].initial_commands, vec!["term le 0"]);

        assert_eq!(jobs[1].host.kind, TransportKind::Ssh);
        assert_eq!(jobs[1].commands, vec!["show run"]);
        assert_eq!(jobs[1].exit_command, "exit");
        assert_eq!(jobs[1].console.exec_timeout, Duration::from_secs(20));
    }

    #[test]
    fn cli_commands_override_everything() {
        let cfg: Config = serde_yaml::from_str(
            r#"
commands: [ "from file" ]
hosts:
  - uri: 10.0.0.1
    commands: [ "per host" ]
"#,
        )
        .unwrap();

        let mut ov = overrides_with_account();
        ov.commands = vec!["from cli".into()];
        let jobs = cfg.resolve(&ov).unwrap();
        assert_eq!(jobs[0].commands, vec!["from cli"]);
    }

    #[test]
    fn account_from_uri_wins_over_default() {
        let cfg: Config = serde_yaml::from_str(
            r#"
commands: [ "show version" ]
hosts:
  - user1:pw1@10.0.0.1
  - 10.0.0.2
"#,
        )
        .unwrap();

        let jobs = cfg.resolve(&overrides_with_account()).unwrap();
        assert_eq!(jobs[0].host.account.username, "user1");
        assert_eq!(jobs[1].host.account.username, "admin");
    }

    #[test]
    fn missing_account_is_an_error() {
        let cfg: Config =
            serde_yaml::from_str("commands: [x]\nhosts: [ 10.0.0.1 ]\n").unwrap();
        assert!(matches!(
            cfg.resolve(&Overrides::default()),
            Err(ConfigError::NoAccount)
        ));
    }

    #[test]
    fn missing_commands_is_an_error() {
        let cfg: Config = serde_yaml::from_str(
            "default_account: {username: u, password: p}\nhosts: [ 10.0.0.1 ]\n",
        )
        .unwrap();
        assert!(matches!(
            cfg.resolve(&Overrides::default()),
            Err(ConfigError::NoCommands(_))
        ));
    }

    #[test]
    fn dummy_override_rewrites_transport() {
        let cfg: Config = serde_yaml::from_str(
            "default_account: {username: u, password: p}\ncommands: [x]\nhosts: [ ssh://10.0.0.1 ]\n",
        )
        .unwrap();

        let mut ov = Overrides::default();
        ov.dummy_scenario = Some(PathBuf::from("scenario.xml"));
        let jobs = cfg.resolve(&ov).unwrap();
        assert_eq!(jobs[0].host.kind, TransportKind::Dummy);
        assert_eq!(
            jobs[0].console.dummy_scenario.as_deref(),
            Some(Path::new("scenario.xml"))
        );
    }

    #[test]
    fn default_config_prints_as_yaml() {
        let out = serde_yaml::to_string(&ConsoleConfig::default()).unwrap();
        assert!(out.contains("auth_timeout: 5s"));
        assert!(out.contains("prompt_match_length: 20"));
    }
}
