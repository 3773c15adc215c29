//! Win32 implementation of [`SecurityContext`]

use windows::core::{HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Security::{
    ImpersonateLoggedOnUser, LogonUserW, RevertToSelf, LOGON32_LOGON_INTERACTIVE,
    LOGON32_LOGON_NEW_CREDENTIALS, LOGON32_PROVIDER_DEFAULT, LOGON32_PROVIDER_WINNT50,
};
use windows::Win32::System::WindowsProgramming::GetUserNameW;
use windows::Win32::UI::Shell::IsUserAnAdmin;

use super::{ImpersonationGuard, LogonProvider, LogonSpec, LogonType, SecurityContext};
use crate::credential::Credential;
use crate::{Error, Result};

/// Security context of the calling thread
#[derive(Debug, Default)]
pub struct WindowsSecurity;

impl WindowsSecurity {
    pub fn new() -> Self {
        WindowsSecurity
    }
}

impl SecurityContext for WindowsSecurity {
    fn principal(&self) -> Result<String> {
        // UNLEN + 1
        let mut buffer = [0u16; 257];
        let mut size = buffer.len() as u32;
        unsafe {
            GetUserNameW(PWSTR(buffer.as_mut_ptr()), &mut size)?;
        }
        // size includes the terminating null
        let len = (size as usize).saturating_sub(1).min(buffer.len());
        Ok(String::from_utf16_lossy(&buffer[..len]))
    }

    fn is_administrator(&self) -> Result<bool> {
        // Checks the thread token when impersonating
        Ok(unsafe { IsUserAnAdmin() }.as_bool())
    }

    fn impersonate(&self, credential: &Credential, logon: LogonSpec) -> Result<ImpersonationGuard<'_>> {
        let account = credential.account();
        let user = HSTRING::from(credential.user());
        let domain = credential.domain().map(HSTRING::from);
        let mut secret: Vec<u16> = credential
            .secret()
            .expose()
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();

        let mut token = HANDLE::default();
        let logged_on = unsafe {
            LogonUserW(
                PCWSTR(user.as_ptr()),
                domain
                    .as_ref()
                    .map(|d| PCWSTR(d.as_ptr()))
                    .unwrap_or(PCWSTR::null()),
                PCWSTR(secret.as_ptr()),
                match logon.logon_type {
                    LogonType::Interactive => LOGON32_LOGON_INTERACTIVE,
                    LogonType::NewCredentials => LOGON32_LOGON_NEW_CREDENTIALS,
                },
                match logon.provider {
                    LogonProvider::Default => LOGON32_PROVIDER_DEFAULT,
                    LogonProvider::WinNT50 => LOGON32_PROVIDER_WINNT50,
                },
                &mut token,
            )
        };
        for c in secret.iter_mut() {
            unsafe { std::ptr::write_volatile(c, 0) };
        }

        logged_on.map_err(|e| Error::Logon {
            user: account.clone(),
            reason: e.message().to_string(),
        })?;

        if let Err(e) = unsafe { ImpersonateLoggedOnUser(token) } {
            unsafe {
                let _ = CloseHandle(token);
            }
            return Err(Error::Logon {
                user: account,
                reason: e.message().to_string(),
            });
        }

        tracing::debug!(account = %account, logon = ?logon.logon_type, "Impersonating");

        Ok(ImpersonationGuard::new(account, move || {
            let reverted = unsafe { RevertToSelf() };
            unsafe {
                let _ = CloseHandle(token);
            }
            reverted.map_err(Error::from)
        }))
    }
}
