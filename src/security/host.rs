//! Target hosts and local-host detection

use serde::Serialize;

/// A target machine name as given by the user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Host(String);

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Host(name.into().trim().to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Host {
    fn from(name: &str) -> Self {
        Host::new(name)
    }
}

impl From<String> for Host {
    fn from(name: String) -> Self {
        Host::new(name)
    }
}

const LOOPBACK_NAMES: &[&str] = &[".", "localhost", "127.0.0.1", "::1"];

/// Names that resolve to the machine wuctl runs on
#[derive(Debug, Clone)]
pub struct LocalNames {
    host_name: Option<String>,
}

impl LocalNames {
    /// Use the operating system's host name
    pub fn detect() -> Self {
        Self::with_host_name(sysinfo::System::host_name())
    }

    pub fn with_host_name(host_name: Option<String>) -> Self {
        Self {
            host_name: host_name.filter(|name| !name.is_empty()),
        }
    }

    /// Local host name, or `localhost` when it cannot be determined
    pub fn host_name(&self) -> &str {
        self.host_name.as_deref().unwrap_or("localhost")
    }

    /// Loopback aliases, the host name itself, or an FQDN whose first label
    /// is the host name
    pub fn is_local(&self, host: &Host) -> bool {
        let name = host.name();
        if LOOPBACK_NAMES.iter().any(|alias| alias.eq_ignore_ascii_case(name)) {
            return true;
        }

        let Some(local) = self.host_name.as_deref() else {
            return false;
        };
        if name.eq_ignore_ascii_case(local) {
            return true;
        }

        let local_short = local.split('.').next().unwrap_or(local);
        let target_short = name.split('.').next().unwrap_or(name);
        name.contains('.') && target_short.eq_ignore_ascii_case(local_short)
    }
}
