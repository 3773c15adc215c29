//! COM apartment guard and activation helpers (Windows only)

use std::marker::PhantomData;
use std::mem::ManuallyDrop;

use windows::core::{IUnknown, Interface, BSTR, GUID, HRESULT, HSTRING, PWSTR, VARIANT};
use windows::Win32::Security::PSECURITY_DESCRIPTOR;
use windows::Win32::System::Com::{
    CoCreateInstance, CoCreateInstanceEx, CoInitializeEx, CoInitializeSecurity, CoUninitialize,
    CLSCTX_INPROC_SERVER, CLSCTX_LOCAL_SERVER, CLSCTX_REMOTE_SERVER, COINIT_MULTITHREADED,
    COSERVERINFO, EOAC_DYNAMIC_CLOAKING, MULTI_QI, RPC_C_AUTHN_LEVEL_DEFAULT,
    RPC_C_IMP_LEVEL_IMPERSONATE,
};

use crate::security::Host;
use crate::{Error, Result};

/// Initialises the thread's MTA apartment and uninitialises it on drop.
///
/// Create one per thread before using any COM backend. Also sets process
/// security with dynamic cloaking so calls made while impersonating carry
/// the impersonated identity to remote hosts.
#[must_use = "COM is uninitialised when the guard is dropped"]
pub struct ComGuard {
    should_uninit: bool,
    _not_send: PhantomData<*const ()>,
}

impl ComGuard {
    pub fn init() -> Result<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        let should_uninit = match hr.0 as u32 {
            // S_OK, S_FALSE
            0x0 | 0x1 => true,
            // RPC_E_CHANGED_MODE: usable, but not ours to uninitialise
            0x8001_0106 => {
                tracing::warn!("COM apartment already initialised as STA");
                false
            }
            _ => return Err(Error::from_hresult(hr.0, "CoInitializeEx")),
        };

        let secured = unsafe {
            CoInitializeSecurity(
                PSECURITY_DESCRIPTOR::default(),
                -1,
                None,
                None,
                RPC_C_AUTHN_LEVEL_DEFAULT,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_DYNAMIC_CLOAKING,
                None,
            )
        };
        if let Err(e) = secured {
            // RPC_E_TOO_LATE when the host process already set it
            tracing::debug!(error = %e, "CoInitializeSecurity skipped");
        }

        Ok(Self {
            should_uninit,
            _not_send: PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            unsafe { CoUninitialize() };
        }
    }
}

/// Activate `clsid` on `host`: in-process for the local machine, through
/// DCOM remote activation otherwise.
pub fn create_on<T: Interface>(clsid: &GUID, host: &Host, is_local: bool, context: &str) -> Result<T> {
    if is_local {
        return unsafe { CoCreateInstance(clsid, None, CLSCTX_INPROC_SERVER | CLSCTX_LOCAL_SERVER) }
            .map_err(|e| com_error(e, context));
    }

    let name = HSTRING::from(host.name());
    let server = COSERVERINFO {
        dwReserved1: 0,
        pwszName: PWSTR(name.as_ptr() as *mut u16),
        pAuthInfo: std::ptr::null_mut(),
        dwReserved2: 0,
    };
    let mut results = [MULTI_QI {
        pIID: &T::IID,
        pItf: ManuallyDrop::new(None),
        hr: HRESULT(0),
    }];

    unsafe {
        CoCreateInstanceEx(clsid, None, CLSCTX_REMOTE_SERVER, Some(&server), &mut results)
            .map_err(|e| com_error(e, context))?;
    }

    let qi = &mut results[0];
    if qi.hr.is_err() {
        return Err(Error::from_hresult(qi.hr.0, context));
    }
    let unknown: IUnknown = unsafe { ManuallyDrop::take(&mut qi.pItf) }
        .ok_or_else(|| Error::Operation(format!("{}: no interface returned", context)))?;
    unknown.cast::<T>().map_err(|e| com_error(e, context))
}

/// Attach call context to a COM error
pub fn com_error(err: windows::core::Error, context: &str) -> Error {
    Error::Com {
        code: err.code().0 as u32,
        context: context.to_string(),
        message: err.message().to_string(),
    }
}

pub fn bstr_variant(value: &str) -> VARIANT {
    VARIANT::from(BSTR::from(value))
}

pub fn optional_variant(value: Option<&str>) -> VARIANT {
    value.map(bstr_variant).unwrap_or_default()
}
