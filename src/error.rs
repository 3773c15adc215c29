//! Error types for wuctl

use serde::Serialize;
use thiserror::Error;

use crate::hresult;
use crate::retry::Disposition;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{context}: {message} (HRESULT 0x{code:08X})")]
    Com {
        code: u32,
        context: String,
        message: String,
    },

    #[error("Access denied - run as Administrator")]
    NotElevated,

    #[error("Cannot impersonate as administrator: {0}")]
    ImpersonationNotAdmin(String),

    #[error("Logon failed for {user}: {reason}")]
    Logon { user: String, reason: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("Task '{0}' already exists - use --force to replace it")]
    TaskExists(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report delivery failed: {0}")]
    Report(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How an error is surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    /// Not elevated, or the impersonated principal is not an administrator
    PermissionDenied,
    /// COM activation failure worth retrying
    TransientConnection,
    /// Non-retryable API error with a known code
    FatalApi,
    /// No mapping found
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::PermissionDenied => write!(f, "PermissionDenied"),
            ErrorCategory::TransientConnection => write!(f, "TransientConnection"),
            ErrorCategory::FatalApi => write!(f, "FatalApi"),
            ErrorCategory::Unknown => write!(f, "Unknown"),
        }
    }
}

impl Error {
    /// Create from a raw HRESULT, keeping the table description as the message
    pub fn from_hresult(hr: i32, context: &str) -> Self {
        let code = hr as u32;
        let message = hresult::lookup(code)
            .map(|info| info.description.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        Error::Com {
            code,
            context: context.to_string(),
            message,
        }
    }

    /// The HRESULT carried by this error, looking through retry exhaustion
    pub fn code(&self) -> Option<u32> {
        match self {
            Error::Com { code, .. } => Some(*code),
            Error::RetriesExhausted { last, .. } => last.code(),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotElevated | Error::ImpersonationNotAdmin(_) | Error::Logon { .. } => {
                ErrorCategory::PermissionDenied
            }
            Error::Com { code, .. } => match hresult::lookup(*code) {
                Some(info) if info.disposition == Disposition::Retry => {
                    ErrorCategory::TransientConnection
                }
                Some(_) => ErrorCategory::FatalApi,
                None => ErrorCategory::Unknown,
            },
            Error::RetriesExhausted { last, .. } => match last.category() {
                ErrorCategory::TransientConnection => ErrorCategory::FatalApi,
                other => other,
            },
            Error::Io(_) | Error::Json(_) => ErrorCategory::Unknown,
            _ => ErrorCategory::FatalApi,
        }
    }

    /// Errors that stop the whole invocation rather than one target
    pub fn is_terminating(&self) -> bool {
        self.category() == ErrorCategory::PermissionDenied || matches!(self, Error::Config(_))
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for Error {
    fn from(err: windows::core::Error) -> Self {
        Error::Com {
            code: err.code().0 as u32,
            context: "Windows API".to_string(),
            message: err.message().to_string(),
        }
    }
}

/// Structured error record emitted per failed target.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub target: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl ErrorRecord {
    /// Build a record; the full error chain is only kept in debug mode
    pub fn new(target: Option<&str>, err: &Error, debug: bool) -> Self {
        Self {
            target: target.map(str::to_string),
            category: err.category(),
            message: err.to_string(),
            exception: debug.then(|| error_chain(err)),
        }
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}: {} [{}]", target, self.message, self.category)?,
            None => write!(f, "{} [{}]", self.message, self.category)?,
        }
        if let Some(exception) = &self.exception {
            write!(f, "\n{}", exception)?;
        }
        Ok(())
    }
}

fn error_chain(err: &Error) -> String {
    let mut out = format!("{:?}", err);
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        out.push_str(&format!("\n  caused by: {}", cause));
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_code_table() {
        let transient = Error::from_hresult(0x800706BAu32 as i32, "connect");
        assert_eq!(transient.category(), ErrorCategory::TransientConnection);

        let denied = Error::from_hresult(0x80070005u32 as i32, "connect");
        assert_eq!(denied.category(), ErrorCategory::FatalApi);

        let unmapped = Error::from_hresult(0x8000FFFFu32 as i32, "connect");
        assert_eq!(unmapped.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_exhausted_retry_escalates() {
        let err = Error::RetriesExhausted {
            attempts: 3,
            last: Box::new(Error::from_hresult(0x800706BAu32 as i32, "connect")),
        };
        assert_eq!(err.category(), ErrorCategory::FatalApi);
        assert_eq!(err.code(), Some(0x800706BA));

        let err = Error::RetriesExhausted {
            attempts: 3,
            last: Box::new(Error::from_hresult(0x8000FFFFu32 as i32, "connect")),
        };
        assert_eq!(err.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_permission_errors_terminate() {
        assert!(Error::NotElevated.is_terminating());
        assert!(Error::ImpersonationNotAdmin("bob".into()).is_terminating());
        assert!(Error::Config("bad".into()).is_terminating());
        assert!(!Error::TaskExists("job".into()).is_terminating());
    }

    #[test]
    fn test_error_record_debug_mode() {
        let err = Error::RetriesExhausted {
            attempts: 3,
            last: Box::new(Error::from_hresult(0x800706BAu32 as i32, "connect")),
        };

        let record = ErrorRecord::new(Some("srv01"), &err, false);
        assert_eq!(record.target.as_deref(), Some("srv01"));
        assert!(record.exception.is_none());

        let record = ErrorRecord::new(Some("srv01"), &err, true);
        let exception = record.exception.unwrap();
        assert!(exception.contains("caused by"));
        assert!(exception.contains("800706BA"));
    }

    #[test]
    fn test_com_error_display() {
        let err = Error::from_hresult(0x80070005u32 as i32, "ITaskService::Connect");
        assert_eq!(
            err.to_string(),
            "ITaskService::Connect: Access is denied (HRESULT 0x80070005)"
        );
    }
}
