//! Task Scheduler jobs on local and remote hosts
//!
//! Changes that the update agent refuses to make over DCOM (service
//! registration, reboots) are run on the target as a one-shot scheduled task
//! executing a PowerShell script as SYSTEM.

#[cfg(windows)]
pub mod com;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::credential::Credential;
use crate::retry::{RetryPolicy, Sleeper};
use crate::security::Host;
use crate::wua::AddServiceRequest;
use crate::{Error, Result};

pub const POWERSHELL: &str = "powershell.exe";

/// When a registered job runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobTrigger {
    /// No trigger; started right after registration
    RunNow,
    At(DateTime<Utc>),
    AtStartup,
}

impl std::fmt::Display for JobTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobTrigger::RunNow => write!(f, "RunNow"),
            JobTrigger::At(time) => write!(f, "At {}", time.format("%Y-%m-%d %H:%M:%S UTC")),
            JobTrigger::AtStartup => write!(f, "AtStartup"),
        }
    }
}

/// Task Scheduler start boundary for a time trigger
pub fn start_boundary(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub command: String,
    pub arguments: String,
    pub description: String,
    pub trigger: JobTrigger,
    pub run_as: String,
}

impl JobDefinition {
    /// Job running `script` through PowerShell as SYSTEM
    pub fn powershell(name: impl Into<String>, script: &str, trigger: JobTrigger) -> Self {
        Self {
            name: name.into(),
            command: POWERSHELL.to_string(),
            arguments: format!(
                "-NoProfile -NonInteractive -ExecutionPolicy Bypass -EncodedCommand {}",
                encode_script(script)
            ),
            description: "Registered by wuctl".to_string(),
            trigger,
            run_as: "SYSTEM".to_string(),
        }
    }

    /// Immediate restart at `at`
    pub fn reboot(name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            command: "shutdown.exe".to_string(),
            arguments: "/r /t 0 /d p:2:17 /c \"Restart scheduled by wuctl\"".to_string(),
            description: "Restart scheduled by wuctl".to_string(),
            trigger: JobTrigger::At(at),
            run_as: "SYSTEM".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Base64 of the UTF-16LE script, as `-EncodedCommand` expects
pub fn encode_script(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

/// Single-quoted PowerShell literal
pub fn quote_ps(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

const SERVICE_MANAGER: &str = "$sm = New-Object -ComObject Microsoft.Update.ServiceManager; $sm.ClientApplicationID = 'wuctl'";

/// Script registering a service with the local update agent
pub fn add_service_script(request: &AddServiceRequest) -> String {
    match request {
        AddServiceRequest::ServiceId {
            id,
            flags,
            authorization_cab,
        } => format!(
            "{}; $sm.AddService2({}, {}, {}) | Out-Null",
            SERVICE_MANAGER,
            quote_ps(id),
            flags.bits(),
            quote_ps(authorization_cab.as_deref().unwrap_or(""))
        ),
        AddServiceRequest::ScanPackage { name, location } => format!(
            "{}; $sm.AddScanPackageService({}, {}, 0) | Out-Null",
            SERVICE_MANAGER,
            quote_ps(name),
            quote_ps(location)
        ),
    }
}

/// Script removing a service from the local update agent
pub fn remove_service_script(service_id: &str) -> String {
    format!("{}; $sm.RemoveService({})", SERVICE_MANAGER, quote_ps(service_id))
}

/// Common prefix of the one-shot jobs for `action`
pub fn one_shot_prefix(action: &str) -> String {
    format!("wuctl-{}-", action)
}

/// Unique name for a one-shot job
pub fn one_shot_name(action: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", one_shot_prefix(action), &id[..8])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningJob {
    pub name: String,
    pub path: String,
    pub current_action: String,
    pub engine_pid: u32,
    pub instance_guid: String,
    pub state: String,
}

/// `TASK_STATE` name
pub fn task_state_name(state: i32) -> &'static str {
    match state {
        1 => "Disabled",
        2 => "Queued",
        3 => "Ready",
        4 => "Running",
        _ => "Unknown",
    }
}

/// Connects to the Task Scheduler service of a host
pub trait TaskSchedulerProvider {
    /// Credentials are only passed for remote hosts; Task Scheduler rejects
    /// them for local connections
    fn connect(&self, host: &Host, is_local: bool, credential: Option<&Credential>) -> Result<Box<dyn TaskFolder>>;
}

/// Root task folder of a connected host
#[cfg_attr(test, mockall::automock)]
pub trait TaskFolder {
    fn exists(&self, name: &str) -> Result<bool>;

    /// Create or replace
    fn register(&self, job: &JobDefinition) -> Result<()>;

    fn run(&self, name: &str) -> Result<()>;

    fn stop(&self, name: &str) -> Result<()>;

    fn delete(&self, name: &str) -> Result<()>;

    fn running(&self) -> Result<Vec<RunningJob>>;

    /// Names of the registered tasks
    fn names(&self) -> Result<Vec<String>>;
}

/// Connect, retrying transient activation failures per `policy`
pub fn connect_with_retry(
    provider: &dyn TaskSchedulerProvider,
    host: &Host,
    is_local: bool,
    credential: Option<&Credential>,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<Box<dyn TaskFolder>> {
    policy.run(sleeper, |attempt| {
        tracing::debug!(host = %host, attempt, "Connecting to Task Scheduler");
        provider.connect(host, is_local, credential)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Submission {
    Registered,
    Replaced,
}

impl std::fmt::Display for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Submission::Registered => write!(f, "Registered"),
            Submission::Replaced => write!(f, "Replaced"),
        }
    }
}

/// Register `job`, refusing to replace an existing task unless `force`, and
/// start it when its trigger is [`JobTrigger::RunNow`]. Returns whether the
/// job was started.
pub fn submit(folder: &dyn TaskFolder, job: &JobDefinition, force: bool) -> Result<(Submission, bool)> {
    let submission = if folder.exists(&job.name)? {
        if !force {
            return Err(Error::TaskExists(job.name.clone()));
        }
        Submission::Replaced
    } else {
        Submission::Registered
    };

    folder.register(job)?;
    tracing::info!(task = %job.name, trigger = %job.trigger, "Job {}", submission);

    let started = job.trigger == JobTrigger::RunNow;
    if started {
        folder.run(&job.name)?;
    }
    Ok((submission, started))
}

/// Stop the job if it is running and delete it
pub fn remove(folder: &dyn TaskFolder, name: &str) -> Result<()> {
    if !folder.exists(name)? {
        return Err(Error::TaskNotFound(name.to_string()));
    }
    let running = folder.running()?;
    if running.iter().any(|job| job.name.eq_ignore_ascii_case(name)) {
        folder.stop(name)?;
    }
    folder.delete(name)
}

/// Delete finished tasks whose name starts with `prefix`. Running ones are
/// left alone. Returns the number deleted.
pub fn prune(folder: &dyn TaskFolder, prefix: &str) -> Result<usize> {
    let prefix = prefix.to_ascii_lowercase();
    let running = folder.running()?;
    let mut deleted = 0;
    for name in folder.names()? {
        if !name.to_ascii_lowercase().starts_with(&prefix) {
            continue;
        }
        if running.iter().any(|job| job.name.eq_ignore_ascii_case(&name)) {
            tracing::debug!(task = %name, "Leaving running job in place");
            continue;
        }
        folder.delete(&name)?;
        tracing::debug!(task = %name, "Deleted finished job");
        deleted += 1;
    }
    Ok(deleted)
}
