//! Security context: elevation checks and scoped impersonation
//!
//! The thread's security context is process-wide mutable state on Windows.
//! [`ImpersonationGuard`] borrows the [`SecurityContext`] that created it and
//! reverts on drop, so acquisitions nest strictly within one call stack and
//! the guard cannot cross threads.

pub mod host;
pub mod logon;
#[cfg(windows)]
pub mod windows;

use std::marker::PhantomData;

use crate::credential::Credential;
use crate::Result;

pub use host::{Host, LocalNames};
pub use logon::{LogonProvider, LogonSpec, LogonType};

/// Operations on the calling thread's security context
pub trait SecurityContext {
    /// Account the calling thread currently runs as
    fn principal(&self) -> Result<String>;

    /// Whether the current (possibly impersonated) principal is a member of
    /// the local Administrators group
    fn is_administrator(&self) -> Result<bool>;

    /// Log on with `credential` and impersonate the resulting token until the
    /// returned guard is dropped
    fn impersonate(&self, credential: &Credential, logon: LogonSpec) -> Result<ImpersonationGuard<'_>>;
}

type Release<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// Active impersonation; reverting happens exactly once, on drop at the latest
#[must_use = "impersonation ends when the guard is dropped"]
pub struct ImpersonationGuard<'a> {
    account: String,
    release: Option<Release<'a>>,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ImpersonationGuard<'a> {
    pub fn new(account: impl Into<String>, release: impl FnOnce() -> Result<()> + 'a) -> Self {
        Self {
            account: account.into(),
            release: Some(Box::new(release)),
            _not_send: PhantomData,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Revert now and report failure instead of logging it
    pub fn release(mut self) -> Result<()> {
        match self.release.take() {
            Some(release) => release(),
            None => Ok(()),
        }
    }
}

impl Drop for ImpersonationGuard<'_> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if let Err(e) = release() {
                tracing::error!(account = %self.account, error = %e, "Failed to revert impersonation");
            }
        }
    }
}

impl std::fmt::Debug for ImpersonationGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpersonationGuard")
            .field("account", &self.account)
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_guard_releases_once_on_drop() {
        let released = Cell::new(0);
        {
            let _guard = ImpersonationGuard::new("CORP\\alice", || {
                released.set(released.get() + 1);
                Ok(())
            });
            assert_eq!(released.get(), 0);
        }
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_explicit_release_reports_error() {
        let guard = ImpersonationGuard::new("CORP\\alice", || {
            Err(crate::Error::Operation("revert failed".into()))
        });
        assert!(guard.release().is_err());
    }
}
