//! HRESULT lookup table
//!
//! Maps the COM, RPC and Windows Update codes seen when activating objects on
//! remote machines to a description and a retry disposition. Codes that are
//! not listed are reported as unknown and treated as retryable by the
//! activation loop.

use crate::retry::Disposition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeInfo {
    pub code: u32,
    pub name: &'static str,
    pub description: &'static str,
    pub disposition: Disposition,
}

const fn retry(code: u32, name: &'static str, description: &'static str) -> CodeInfo {
    CodeInfo {
        code,
        name,
        description,
        disposition: Disposition::Retry,
    }
}

const fn fatal(code: u32, name: &'static str, description: &'static str) -> CodeInfo {
    CodeInfo {
        code,
        name,
        description,
        disposition: Disposition::Fatal,
    }
}

static TABLE: &[CodeInfo] = &[
    // Reachability: the target may come back
    retry(0x800706BA, "RPC_S_SERVER_UNAVAILABLE", "The RPC server is unavailable"),
    retry(0x800706BB, "RPC_S_SERVER_TOO_BUSY", "The RPC server is too busy to complete this operation"),
    retry(0x800706BE, "RPC_S_CALL_FAILED", "The remote procedure call failed"),
    retry(0x80010108, "RPC_E_DISCONNECTED", "The object invoked has disconnected from its clients"),
    retry(0x8001010A, "RPC_E_SERVERCALL_RETRYLATER", "The message filter indicated that the application is busy"),
    retry(0x80080005, "CO_E_SERVER_EXEC_FAILURE", "Server execution failed"),
    retry(0x8024402C, "WU_E_PT_WINHTTP_NAME_NOT_RESOLVED", "The proxy or target server name cannot be resolved"),
    retry(0x80244022, "WU_E_PT_HTTP_STATUS_SERVICE_UNAVAIL", "The update service is temporarily unavailable"),
    retry(0x8024001E, "WU_E_SERVICE_STOP", "Operation did not complete because the service or system was being shut down"),
    // Authorization and configuration: retrying cannot help
    fatal(0x80070005, "E_ACCESSDENIED", "Access is denied"),
    fatal(0x8007052E, "ERROR_LOGON_FAILURE", "Unknown user name or bad password"),
    fatal(0x8007052F, "ERROR_ACCOUNT_RESTRICTION", "Account restrictions are preventing this user from signing in"),
    fatal(0x80070056, "ERROR_INVALID_PASSWORD", "The specified network password is not correct"),
    fatal(0x80070035, "ERROR_BAD_NETPATH", "The network path was not found"),
    fatal(0x80040154, "REGDB_E_CLASSNOTREG", "Class not registered"),
    fatal(0x80041315, "SCHED_E_SERVICE_NOT_RUNNING", "The Task Scheduler service is not running"),
    fatal(0x80240001, "WU_E_NO_SERVICE", "Windows Update Agent was unable to provide the service"),
    fatal(0x80240004, "WU_E_NOT_INITIALIZED", "The object could not be initialized"),
    fatal(0x80240016, "WU_E_INSTALL_NOT_ALLOWED", "Operation tried to install while another installation was in progress"),
    fatal(0x80240042, "WU_E_NOT_SUPPORTED", "The requested operation is not supported"),
    fatal(0x80248014, "WU_E_DS_UNKNOWNSERVICE", "An operation did not complete because the service is not in the data store"),
    fatal(0x8024A000, "WU_E_AU_NOSERVICE", "Automatic Updates was unable to service incoming requests"),
];

/// Look up a code in the table
pub fn lookup(code: u32) -> Option<&'static CodeInfo> {
    TABLE.iter().find(|info| info.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let info = lookup(0x800706BA).unwrap();
        assert_eq!(info.name, "RPC_S_SERVER_UNAVAILABLE");
        assert_eq!(info.disposition, Disposition::Retry);

        let info = lookup(0x80070005).unwrap();
        assert_eq!(info.disposition, Disposition::Fatal);

        assert!(lookup(0x12345678).is_none());
    }

    #[test]
    fn test_table_has_no_duplicates() {
        for (i, a) in TABLE.iter().enumerate() {
            assert!(
                TABLE[i + 1..].iter().all(|b| b.code != a.code),
                "duplicate entry 0x{:08X}",
                a.code
            );
        }
    }
}
