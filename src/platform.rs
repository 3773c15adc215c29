//! Native backends for the current platform
//!
//! Windows gets the COM and Win32 implementations. Elsewhere every backend
//! fails with [`Error::Unsupported`], so the library still builds and its
//! pure logic can be tested.

use crate::bits::TransferService;
use crate::credman::CredentialStore;
use crate::security::SecurityContext;
use crate::taskschd::TaskSchedulerProvider;
use crate::wua::UpdateAgentProvider;

pub struct Platform {
    pub security: Box<dyn SecurityContext>,
    pub agents: Box<dyn UpdateAgentProvider>,
    pub scheduler: Box<dyn TaskSchedulerProvider>,
    pub transfers: Box<dyn TransferService>,
    pub credentials: Box<dyn CredentialStore>,
}

impl Platform {
    #[cfg(windows)]
    pub fn native() -> Self {
        Self {
            security: Box::new(crate::security::windows::WindowsSecurity::new()),
            agents: Box::new(crate::wua::com::ComUpdateAgentProvider::new()),
            scheduler: Box::new(crate::taskschd::com::ComTaskScheduler::new()),
            transfers: Box::new(crate::bits::com::ComTransferService::new()),
            credentials: Box::new(crate::credman::windows::WindowsCredentialStore::new()),
        }
    }

    #[cfg(not(windows))]
    pub fn native() -> Self {
        Self {
            security: Box::new(unsupported::Unsupported),
            agents: Box::new(unsupported::Unsupported),
            scheduler: Box::new(unsupported::Unsupported),
            transfers: Box::new(unsupported::Unsupported),
            credentials: Box::new(unsupported::Unsupported),
        }
    }
}

#[cfg(not(windows))]
mod unsupported {
    use std::path::Path;

    use crate::bits::{TransferJob, TransferService};
    use crate::credential::Credential;
    use crate::credman::{CredentialStore, CredentialType, StoredCredential};
    use crate::security::{Host, ImpersonationGuard, LogonSpec, SecurityContext};
    use crate::taskschd::{TaskFolder, TaskSchedulerProvider};
    use crate::wua::{UpdateAgent, UpdateAgentProvider};
    use crate::{Error, Result};

    pub struct Unsupported;

    fn fail<T>(what: &str) -> Result<T> {
        Err(Error::Unsupported(format!("{} requires Windows", what)))
    }

    impl SecurityContext for Unsupported {
        fn principal(&self) -> Result<String> {
            fail("security context")
        }

        fn is_administrator(&self) -> Result<bool> {
            fail("administrator check")
        }

        fn impersonate(&self, _credential: &Credential, _logon: LogonSpec) -> Result<ImpersonationGuard<'_>> {
            fail("impersonation")
        }
    }

    impl UpdateAgentProvider for Unsupported {
        fn connect(&self, _host: &Host, _is_local: bool) -> Result<Box<dyn UpdateAgent>> {
            fail("Windows Update Agent")
        }
    }

    impl TaskSchedulerProvider for Unsupported {
        fn connect(&self, _host: &Host, _is_local: bool, _credential: Option<&Credential>) -> Result<Box<dyn TaskFolder>> {
            fail("Task Scheduler")
        }
    }

    impl TransferService for Unsupported {
        fn start(&self, _display_name: &str, _url: &str, _destination: &Path) -> Result<Box<dyn TransferJob>> {
            fail("BITS")
        }
    }

    impl CredentialStore for Unsupported {
        fn write(&self, _credential: &StoredCredential) -> Result<()> {
            fail("Credential Manager")
        }

        fn read(&self, _target: &str, _kind: CredentialType) -> Result<Option<StoredCredential>> {
            fail("Credential Manager")
        }

        fn delete(&self, _target: &str, _kind: CredentialType) -> Result<()> {
            fail("Credential Manager")
        }

        fn enumerate(&self, _filter: Option<&str>) -> Result<Vec<StoredCredential>> {
            fail("Credential Manager")
        }
    }
}
