//! COM implementation of BITS downloads

use std::path::Path;

use windows::core::{GUID, HRESULT, HSTRING};
use windows::Win32::Networking::BackgroundIntelligentTransferService::{
    BackgroundCopyManager, IBackgroundCopyJob, IBackgroundCopyManager, BG_ERROR_CONTEXT,
    BG_JOB_TYPE_DOWNLOAD,
};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_LOCAL_SERVER};

use super::{JobState, Progress, TransferJob, TransferService};
use crate::com::com_error;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ComTransferService;

impl ComTransferService {
    pub fn new() -> Self {
        ComTransferService
    }
}

impl TransferService for ComTransferService {
    fn start(&self, display_name: &str, url: &str, destination: &Path) -> Result<Box<dyn TransferJob>> {
        unsafe {
            let manager: IBackgroundCopyManager = CoCreateInstance(&BackgroundCopyManager, None, CLSCTX_LOCAL_SERVER)
                .map_err(|e| com_error(e, "BackgroundCopyManager"))?;

            let mut id = GUID::zeroed();
            let mut job: Option<IBackgroundCopyJob> = None;
            manager
                .CreateJob(&HSTRING::from(display_name), BG_JOB_TYPE_DOWNLOAD, &mut id, &mut job)
                .map_err(|e| com_error(e, "IBackgroundCopyManager::CreateJob"))?;
            let job = job.ok_or_else(|| Error::Transfer("CreateJob returned no job".into()))?;

            let added = job.AddFile(&HSTRING::from(url), &HSTRING::from(destination.as_os_str()));
            if let Err(e) = added.and_then(|_| job.Resume()) {
                let _ = job.Cancel();
                return Err(com_error(e, "IBackgroundCopyJob::AddFile"));
            }

            tracing::debug!(job = ?id, "BITS job resumed");
            Ok(Box::new(ComTransferJob { job }))
        }
    }
}

struct ComTransferJob {
    job: IBackgroundCopyJob,
}

impl TransferJob for ComTransferJob {
    fn state(&self) -> Result<JobState> {
        let state = unsafe { self.job.GetState() }.map_err(|e| com_error(e, "IBackgroundCopyJob::GetState"))?;
        JobState::from_raw(state.0)
            .ok_or_else(|| Error::Transfer(format!("unknown job state {}", state.0)))
    }

    fn progress(&self) -> Result<Progress> {
        let progress =
            unsafe { self.job.GetProgress() }.map_err(|e| com_error(e, "IBackgroundCopyJob::GetProgress"))?;
        Ok(Progress {
            bytes_transferred: progress.BytesTransferred,
            bytes_total: progress.BytesTotal,
        })
    }

    fn error_code(&self) -> Result<Option<u32>> {
        let error = match unsafe { self.job.GetError() } {
            Ok(error) => error,
            // BG_E_ERROR_INFORMATION_UNAVAILABLE
            Err(_) => return Ok(None),
        };
        let mut context = BG_ERROR_CONTEXT::default();
        let mut code = HRESULT(0);
        unsafe { error.GetError(&mut context, &mut code) }
            .map_err(|e| com_error(e, "IBackgroundCopyError::GetError"))?;
        Ok(Some(code.0 as u32))
    }

    fn complete(&self) -> Result<()> {
        unsafe { self.job.Complete() }.map_err(|e| com_error(e, "IBackgroundCopyJob::Complete"))
    }

    fn cancel(&self) -> Result<()> {
        unsafe { self.job.Cancel() }.map_err(|e| com_error(e, "IBackgroundCopyJob::Cancel"))
    }
}
