use serde::Deserialize;

/// Login credentials for a device. `enable_password` is only used when the
/// device asks for privilege elevation after the enable command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub enable_password: String,
}

impl Account {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty() && self.enable_password.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ssh,
    Telnet,
    /// XML-scripted transport, test and dry-run use only.
    Dummy,
}

impl TransportKind {
    pub fn default_port(self) -> u16 {
        match self {
            TransportKind::Ssh => 22,
            TransportKind::Telnet => 23,
            TransportKind::Dummy => 0,
        }
    }
}

/// A connection target. Immutable once constructed (by the host factory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub addr: String,
    pub port: u16,
    pub kind: TransportKind,
    pub account: Account,
}

impl Host {
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn has_account(&self) -> bool {
        !self.account.is_empty()
    }
}
