//! Who holds a lock: `user@host:pid`.

use std::fmt;

/// The identity written into lock files.
///
/// Normally [`SystemIdentity::current`]; tests inject fixed values to
/// simulate several owners inside one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    pub user: String,
    pub host: String,
    pub pid: u32,
}

impl SystemIdentity {
    pub fn new(user: impl Into<String>, host: impl Into<String>, pid: u32) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            pid,
        }
    }

    /// Identity of the running process.
    pub fn current() -> Self {
        Self {
            user: current_user().unwrap_or_else(|| "unknown".to_string()),
            host: current_host().unwrap_or_else(|| "unknown".to_string()),
            pid: std::process::id(),
        }
    }

    /// The composite lock-file content.
    pub fn owner_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SystemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.pid)
    }
}

#[cfg(unix)]
fn current_user() -> Option<String> {
    use nix::unistd::{Uid, User};

    User::from_uid(Uid::current())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| env_value(&["USER", "LOGNAME"]))
}

#[cfg(not(unix))]
fn current_user() -> Option<String> {
    env_value(&["USERNAME", "USER"])
}

#[cfg(unix)]
fn current_host() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .or_else(|| env_value(&["HOSTNAME"]))
}

#[cfg(not(unix))]
fn current_host() -> Option<String> {
    env_value(&["COMPUTERNAME", "HOSTNAME"])
}

fn env_value(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
}
