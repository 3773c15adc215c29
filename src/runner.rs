//! Impersonated remote operation runner
//!
//! Runs one operation per target host, sequentially, optionally inside an
//! impersonation scope. A failing target never stops the others; only
//! permission errors end the whole invocation.

use crate::credential::Credential;
use crate::error::ErrorCategory;
use crate::security::{Host, LocalNames, LogonSpec, SecurityContext};
use crate::{Error, Result};

/// Outcome of an operation against one target
#[derive(Debug)]
pub enum RemoteOperationResult<T> {
    Success(T),
    RecoverableFailure(Error),
    FatalFailure(Error),
}

impl<T> RemoteOperationResult<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => RemoteOperationResult::Success(value),
            Err(err) => match err.category() {
                ErrorCategory::PermissionDenied | ErrorCategory::FatalApi => {
                    RemoteOperationResult::FatalFailure(err)
                }
                ErrorCategory::TransientConnection | ErrorCategory::Unknown => {
                    RemoteOperationResult::RecoverableFailure(err)
                }
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RemoteOperationResult::Success(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            RemoteOperationResult::Success(_) => None,
            RemoteOperationResult::RecoverableFailure(err)
            | RemoteOperationResult::FatalFailure(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            RemoteOperationResult::Success(value) => Ok(value),
            RemoteOperationResult::RecoverableFailure(err)
            | RemoteOperationResult::FatalFailure(err) => Err(err),
        }
    }
}

/// Result tagged with the host it belongs to
#[derive(Debug)]
pub struct TargetResult<T> {
    pub host: Host,
    pub outcome: RemoteOperationResult<T>,
}

pub struct Runner<'a> {
    security: &'a dyn SecurityContext,
    local: LocalNames,
}

impl<'a> Runner<'a> {
    pub fn new(security: &'a dyn SecurityContext, local: LocalNames) -> Self {
        Self { security, local }
    }

    pub fn local_names(&self) -> &LocalNames {
        &self.local
    }

    pub fn is_local(&self, host: &Host) -> bool {
        self.local.is_local(host)
    }

    /// Fail with [`Error::NotElevated`] unless the caller is an administrator
    pub fn ensure_elevated(&self) -> Result<()> {
        if self.security.is_administrator()? {
            Ok(())
        } else {
            Err(Error::NotElevated)
        }
    }

    /// Run `operation` against one target.
    ///
    /// With a credential, the operation runs impersonated and only when the
    /// impersonated principal is still an administrator. The impersonation is
    /// reverted before this returns, whatever the operation did.
    pub fn run<T, F>(&self, target: &Host, credential: Option<&Credential>, operation: F) -> RemoteOperationResult<T>
    where
        F: FnOnce(&Host) -> Result<T>,
    {
        RemoteOperationResult::from_result(self.try_run(target, credential, operation))
    }

    fn try_run<T, F>(&self, target: &Host, credential: Option<&Credential>, operation: F) -> Result<T>
    where
        F: FnOnce(&Host) -> Result<T>,
    {
        let Some(credential) = credential else {
            return operation(target);
        };

        let logon = LogonSpec::for_target(self.is_local(target));
        let guard = self.security.impersonate(credential, logon)?;

        if !self.security.is_administrator()? {
            guard.release()?;
            return Err(Error::ImpersonationNotAdmin(credential.account()));
        }

        let result = operation(target);
        if let Err(e) = guard.release() {
            tracing::error!(host = %target, error = %e, "Failed to revert impersonation");
            return Err(e);
        }
        result
    }

    /// Run `operation` against every target in order.
    ///
    /// Returns one result per target. Stops early with `Err` only when a
    /// target fails with a terminating error such as permission denied.
    pub fn run_all<T, F>(
        &self,
        targets: &[Host],
        credential: Option<&Credential>,
        mut operation: F,
    ) -> Result<Vec<TargetResult<T>>>
    where
        F: FnMut(&Host) -> Result<T>,
    {
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            tracing::debug!(host = %target, "Running operation");

            match self.run(target, credential, &mut operation) {
                RemoteOperationResult::FatalFailure(err) if err.is_terminating() => {
                    tracing::error!(host = %target, error = %err, "Aborting invocation");
                    return Err(err);
                }
                outcome => {
                    if let Some(err) = outcome.error() {
                        tracing::warn!(host = %target, error = %err, "Target failed");
                    }
                    results.push(TargetResult {
                        host: target.clone(),
                        outcome,
                    });
                }
            }
        }

        Ok(results)
    }
}
