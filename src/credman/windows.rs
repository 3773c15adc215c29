//! Windows Credential Manager implementation
//!
//! All unsafe Credential Manager calls live here. Secrets are stored as
//! UTF-16 blobs, encrypted at rest by DPAPI.

use std::ffi::c_void;

use windows::core::{HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::FILETIME;
use windows::Win32::Security::Credentials::{
    CredDeleteW, CredEnumerateW, CredFree, CredReadW, CredWriteW, CREDENTIALW, CRED_ENUMERATE_FLAGS,
    CRED_FLAGS, CRED_PERSIST, CRED_PERSIST_ENTERPRISE, CRED_PERSIST_LOCAL_MACHINE,
    CRED_PERSIST_SESSION, CRED_TYPE, CRED_TYPE_DOMAIN_CERTIFICATE, CRED_TYPE_DOMAIN_PASSWORD,
    CRED_TYPE_GENERIC,
};

use super::{filetime_to_utc, CredentialStore, CredentialType, Persistence, StoredCredential};
use crate::credential::SecretString;
use crate::{Error, Result};

// HRESULT_FROM_WIN32(ERROR_NOT_FOUND)
const NOT_FOUND: u32 = 0x80070490;

#[derive(Debug, Default)]
pub struct WindowsCredentialStore;

impl WindowsCredentialStore {
    pub fn new() -> Self {
        WindowsCredentialStore
    }
}

fn cred_type(kind: CredentialType) -> CRED_TYPE {
    match kind {
        CredentialType::Generic => CRED_TYPE_GENERIC,
        CredentialType::DomainPassword => CRED_TYPE_DOMAIN_PASSWORD,
        CredentialType::DomainCertificate => CRED_TYPE_DOMAIN_CERTIFICATE,
    }
}

fn cred_persist(persist: Persistence) -> CRED_PERSIST {
    match persist {
        Persistence::Session => CRED_PERSIST_SESSION,
        Persistence::LocalMachine => CRED_PERSIST_LOCAL_MACHINE,
        Persistence::Enterprise => CRED_PERSIST_ENTERPRISE,
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn pwstr_to_string(p: PWSTR) -> Option<String> {
    if p.is_null() {
        return None;
    }
    unsafe { p.to_string().ok() }
}

/// Copy a CREDENTIALW returned by the API into an owned value
///
/// # Safety
/// `cred` must point to a valid CREDENTIALW allocated by Credential Manager.
unsafe fn to_stored(cred: &CREDENTIALW) -> Option<StoredCredential> {
    let kind = match cred.Type {
        t if t == CRED_TYPE_GENERIC => CredentialType::Generic,
        t if t == CRED_TYPE_DOMAIN_PASSWORD => CredentialType::DomainPassword,
        t if t == CRED_TYPE_DOMAIN_CERTIFICATE => CredentialType::DomainCertificate,
        _ => return None,
    };
    let persist = match cred.Persist {
        p if p == CRED_PERSIST_SESSION => Persistence::Session,
        p if p == CRED_PERSIST_ENTERPRISE => Persistence::Enterprise,
        _ => Persistence::LocalMachine,
    };

    let secret = if cred.CredentialBlobSize > 0 && !cred.CredentialBlob.is_null() {
        let bytes = std::slice::from_raw_parts(cred.CredentialBlob, cred.CredentialBlobSize as usize);
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .ok()
            .map(|s| SecretString::new(s.trim_end_matches('\0')))
    } else {
        None
    };

    let ticks = ((cred.LastWritten.dwHighDateTime as u64) << 32) | cred.LastWritten.dwLowDateTime as u64;

    Some(StoredCredential {
        target: pwstr_to_string(cred.TargetName)?,
        kind,
        user_name: pwstr_to_string(cred.UserName),
        secret,
        comment: pwstr_to_string(cred.Comment),
        persist,
        last_written: filetime_to_utc(ticks),
    })
}

impl CredentialStore for WindowsCredentialStore {
    fn write(&self, credential: &StoredCredential) -> Result<()> {
        let mut target = wide(&credential.target);
        let mut user = credential.user_name.as_deref().map(wide);
        let mut comment = credential.comment.as_deref().map(wide);
        let mut blob: Vec<u8> = credential
            .secret
            .as_ref()
            .map(|s| s.expose().encode_utf16().flat_map(u16::to_le_bytes).collect())
            .unwrap_or_default();

        let cred = CREDENTIALW {
            Flags: CRED_FLAGS(0),
            Type: cred_type(credential.kind),
            TargetName: PWSTR(target.as_mut_ptr()),
            Comment: comment
                .as_mut()
                .map(|c| PWSTR(c.as_mut_ptr()))
                .unwrap_or(PWSTR::null()),
            LastWritten: FILETIME::default(),
            CredentialBlobSize: blob.len() as u32,
            CredentialBlob: if blob.is_empty() {
                std::ptr::null_mut()
            } else {
                blob.as_mut_ptr()
            },
            Persist: cred_persist(credential.persist),
            AttributeCount: 0,
            Attributes: std::ptr::null_mut(),
            TargetAlias: PWSTR::null(),
            UserName: user
                .as_mut()
                .map(|u| PWSTR(u.as_mut_ptr()))
                .unwrap_or(PWSTR::null()),
        };

        // SAFETY: every pointer in `cred` outlives the call
        let written = unsafe { CredWriteW(&cred, 0) };
        for byte in blob.iter_mut() {
            unsafe { std::ptr::write_volatile(byte, 0) };
        }

        written.map_err(|e| {
            Error::Credential(format!(
                "failed to write '{}': {}",
                credential.target,
                e.message()
            ))
        })
    }

    fn read(&self, target: &str, kind: CredentialType) -> Result<Option<StoredCredential>> {
        let name = HSTRING::from(target);
        let mut pcred: *mut CREDENTIALW = std::ptr::null_mut();

        match unsafe { CredReadW(PCWSTR(name.as_ptr()), cred_type(kind), 0, &mut pcred) } {
            Ok(()) => {
                // SAFETY: pcred is valid after a successful CredReadW and freed below
                let stored = unsafe { to_stored(&*pcred) };
                unsafe { CredFree(pcred as *const c_void) };
                Ok(stored)
            }
            Err(e) if e.code().0 as u32 == NOT_FOUND => Ok(None),
            Err(e) => Err(Error::Credential(format!("failed to read '{}': {}", target, e.message()))),
        }
    }

    fn delete(&self, target: &str, kind: CredentialType) -> Result<()> {
        let name = HSTRING::from(target);
        match unsafe { CredDeleteW(PCWSTR(name.as_ptr()), cred_type(kind), 0) } {
            Ok(()) => Ok(()),
            Err(e) if e.code().0 as u32 == NOT_FOUND => Ok(()),
            Err(e) => Err(Error::Credential(format!(
                "failed to delete '{}': {}",
                target,
                e.message()
            ))),
        }
    }

    fn enumerate(&self, filter: Option<&str>) -> Result<Vec<StoredCredential>> {
        let filter_name = filter.map(HSTRING::from);
        let mut count = 0u32;
        let mut list: *mut *mut CREDENTIALW = std::ptr::null_mut();

        let enumerated = unsafe {
            CredEnumerateW(
                filter_name
                    .as_ref()
                    .map(|f| PCWSTR(f.as_ptr()))
                    .unwrap_or(PCWSTR::null()),
                CRED_ENUMERATE_FLAGS(0),
                &mut count,
                &mut list,
            )
        };
        match enumerated {
            Ok(()) => {}
            Err(e) if e.code().0 as u32 == NOT_FOUND => return Ok(Vec::new()),
            Err(e) => return Err(Error::Credential(format!("failed to enumerate: {}", e.message()))),
        }

        let mut out = Vec::with_capacity(count as usize);
        unsafe {
            // SAFETY: CredEnumerateW returned `count` valid pointers in `list`
            for entry in std::slice::from_raw_parts(list, count as usize) {
                if let Some(mut stored) = to_stored(&**entry) {
                    stored.secret = None;
                    out.push(stored);
                }
            }
            CredFree(list as *const c_void);
        }
        Ok(out)
    }
}
