//! BITS downloads
//!
//! Used to fetch offline scan packages before registering them with the
//! update agent. Jobs are polled synchronously until they reach a terminal
//! state or the timeout elapses.

#[cfg(windows)]
pub mod com;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::retry::Sleeper;
use crate::{Error, Result};

/// Bytes total reported while the size is not yet known
pub const SIZE_UNKNOWN: u64 = u64::MAX;

/// `BG_JOB_STATE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Queued,
    Connecting,
    Transferring,
    Suspended,
    Error,
    TransientError,
    Transferred,
    Acknowledged,
    Cancelled,
}

impl JobState {
    pub fn from_raw(value: i32) -> Option<Self> {
        Some(match value {
            0 => JobState::Queued,
            1 => JobState::Connecting,
            2 => JobState::Transferring,
            3 => JobState::Suspended,
            4 => JobState::Error,
            5 => JobState::TransientError,
            6 => JobState::Transferred,
            7 => JobState::Acknowledged,
            8 => JobState::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Error | JobState::Transferred | JobState::Acknowledged | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub bytes_transferred: u64,
    pub bytes_total: u64,
}

impl Progress {
    pub fn percent(&self) -> Option<u8> {
        if self.bytes_total == SIZE_UNKNOWN || self.bytes_total == 0 {
            return None;
        }
        Some(((self.bytes_transferred.min(self.bytes_total) * 100) / self.bytes_total) as u8)
    }
}

/// A created and resumed download job
#[cfg_attr(test, mockall::automock)]
pub trait TransferJob {
    fn state(&self) -> Result<JobState>;
    fn progress(&self) -> Result<Progress>;

    /// HRESULT of the failure, when the job is in an error state
    fn error_code(&self) -> Result<Option<u32>>;

    /// Acknowledge a transferred job, moving the file into place
    fn complete(&self) -> Result<()>;
    fn cancel(&self) -> Result<()>;
}

pub trait TransferService {
    /// Create a download job for one file and resume it
    fn start(&self, display_name: &str, url: &str, destination: &Path) -> Result<Box<dyn TransferJob>>;
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

pub fn is_remote_location(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Local path for a download of `url` into `directory`
pub fn destination_for(url: &str, directory: &Path) -> Result<PathBuf> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .ok_or_else(|| Error::Transfer(format!("no file name in '{}'", url)))?;
    Ok(directory.join(name))
}

/// Download `url` to `destination`, blocking until the job finishes
pub fn download(
    service: &dyn TransferService,
    url: &str,
    destination: &Path,
    options: &DownloadOptions,
    sleeper: &dyn Sleeper,
) -> Result<PathBuf> {
    let display_name = format!("wuctl-{}", uuid::Uuid::new_v4());
    let job = service.start(&display_name, url, destination)?;
    tracing::info!(url, destination = %destination.display(), "Download started");

    let mut elapsed = Duration::ZERO;
    loop {
        match job.state()? {
            JobState::Transferred => {
                job.complete()?;
                tracing::info!(url, "Download complete");
                return Ok(destination.to_path_buf());
            }
            JobState::Acknowledged => return Ok(destination.to_path_buf()),
            JobState::Error => {
                let code = job.error_code()?;
                if let Err(e) = job.cancel() {
                    tracing::debug!(error = %e, "Cancel after failure");
                }
                return Err(match code {
                    Some(code) => Error::from_hresult(code as i32, "BITS download"),
                    None => Error::Transfer(format!("download of '{}' failed", url)),
                });
            }
            JobState::Cancelled => {
                return Err(Error::Transfer(format!("download of '{}' was cancelled", url)));
            }
            state => {
                if elapsed >= options.timeout {
                    job.cancel()?;
                    return Err(Error::Transfer(format!(
                        "download of '{}' timed out after {}s",
                        url,
                        options.timeout.as_secs()
                    )));
                }
                if let Ok(progress) = job.progress() {
                    tracing::debug!(?state, percent = ?progress.percent(), "Downloading");
                }
            }
        }

        sleeper.sleep(options.poll_interval);
        elapsed += options.poll_interval;
    }
}
