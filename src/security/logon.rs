//! Logon type and provider selection for impersonation

/// `LogonUser` logon type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonType {
    /// Full interactive logon; the new identity applies locally
    Interactive,
    /// Clone of the caller's token with new outbound network credentials
    NewCredentials,
}

/// `LogonUser` logon provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonProvider {
    Default,
    WinNT50,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogonSpec {
    pub logon_type: LogonType,
    pub provider: LogonProvider,
}

impl LogonSpec {
    /// Remote targets never use an interactive logon.
    pub fn for_target(is_local: bool) -> Self {
        if is_local {
            Self {
                logon_type: LogonType::Interactive,
                provider: LogonProvider::Default,
            }
        } else {
            Self {
                logon_type: LogonType::NewCredentials,
                provider: LogonProvider::WinNT50,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_target_uses_interactive() {
        let spec = LogonSpec::for_target(true);
        assert_eq!(spec.logon_type, LogonType::Interactive);
        assert_eq!(spec.provider, LogonProvider::Default);
    }

    #[test]
    fn test_remote_target_uses_new_credentials() {
        let spec = LogonSpec::for_target(false);
        assert_eq!(spec.logon_type, LogonType::NewCredentials);
        assert_eq!(spec.provider, LogonProvider::WinNT50);
    }
}
