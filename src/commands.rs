//! Command implementations
//!
//! Each command checks elevation, runs one operation per target through the
//! [`Runner`], folds the per-target outcomes into records and error records,
//! and optionally mails the result.

use chrono::{DateTime, Utc};
use tabled::Tabled;

use crate::bits::{self, TransferService};
use crate::config::Settings;
use crate::credential::{Credential, SecretString};
use crate::credman::{self, CredentialStore, CredentialType, Persistence, StoredCredential};
use crate::error::ErrorRecord;
use crate::models::*;
use crate::report::{self, ReportSender};
use crate::retry::{RetryPolicy, Sleeper};
use crate::runner::{Runner, TargetResult};
use crate::security::Host;
use crate::taskschd::{self, JobDefinition, JobTrigger, TaskFolder, TaskSchedulerProvider};
use crate::wua::{self, AddServiceRequest, HistoryQuery, UpdateAgent, UpdateAgentProvider};
use crate::{Error, Result};

/// Name of the task that carries a scheduled reboot
pub const REBOOT_JOB_NAME: &str = "wuctl-reboot";

/// Environment variable holding the password for `--user`
pub const PASSWORD_ENV: &str = "WUCTL_PASSWORD";

/// Hosts and identity a command runs against
#[derive(Debug, Clone)]
pub struct Targets {
    pub hosts: Vec<Host>,
    pub credential: Option<Credential>,
    pub send_report: bool,
}

impl Targets {
    pub fn new(hosts: Vec<Host>) -> Self {
        let hosts = if hosts.is_empty() { vec![Host::from("localhost")] } else { hosts };
        Self {
            hosts,
            credential: None,
            send_report: false,
        }
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_report(mut self, send_report: bool) -> Self {
        self.send_report = send_report;
        self
    }
}

/// Records and per-target errors of one command
#[derive(Debug)]
pub struct Invocation<T> {
    pub records: Vec<T>,
    pub errors: Vec<ErrorRecord>,
    /// Set when a requested report could not be sent
    pub report_error: Option<ErrorRecord>,
}

impl<T> Invocation<T> {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.report_error.is_none()
    }
}

/// Alternate credential from `--credential <target>` or `--user`
pub fn resolve_credential(
    store: &dyn CredentialStore,
    user: Option<&str>,
    stored_target: Option<&str>,
    password: Option<SecretString>,
) -> Result<Option<Credential>> {
    match (user, stored_target) {
        (Some(_), Some(_)) => Err(Error::Config("--user and --credential cannot be combined".into())),
        (None, Some(target)) => credman::resolve(store, target).map(Some),
        (Some(user), None) => {
            let password = password
                .ok_or_else(|| Error::Config(format!("{} must be set when --user is given", PASSWORD_ENV)))?;
            Credential::parse(user, password).map(Some)
        }
        (None, None) => Ok(None),
    }
}

/// Backends and settings shared by every command
pub struct Toolkit<'a> {
    pub runner: Runner<'a>,
    pub agents: &'a dyn UpdateAgentProvider,
    pub scheduler: &'a dyn TaskSchedulerProvider,
    pub transfers: &'a dyn TransferService,
    pub credentials: &'a dyn CredentialStore,
    pub mailer: &'a dyn ReportSender,
    pub sleeper: &'a dyn Sleeper,
    pub settings: Settings,
    pub debug: bool,
}

impl<'a> Toolkit<'a> {
    fn fold<R>(&self, results: Vec<TargetResult<Vec<R>>>) -> Invocation<R> {
        let mut records = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result.outcome.into_result() {
                Ok(batch) => records.extend(batch),
                Err(e) => errors.push(ErrorRecord::new(Some(result.host.name()), &e, self.debug)),
            }
        }
        Invocation {
            records,
            errors,
            report_error: None,
        }
    }

    fn finish<R: Tabled>(&self, command: &str, targets: &Targets, mut invocation: Invocation<R>) -> Invocation<R> {
        if targets.send_report {
            invocation.report_error = report::send_report(
                self.mailer,
                self.settings.report.as_ref(),
                command,
                &invocation.records,
                &invocation.errors,
                self.debug,
            );
        }
        invocation
    }

    /// Elevation check, per-target run and fold
    fn each_target<R, F>(&self, command: &str, targets: &Targets, operation: F) -> Result<Invocation<R>>
    where
        R: Tabled,
        F: FnMut(&Host) -> Result<Vec<R>>,
    {
        self.runner.ensure_elevated()?;
        tracing::info!(command, targets = targets.hosts.len(), "Running command");

        let results = self
            .runner
            .run_all(&targets.hosts, targets.credential.as_ref(), operation)?;
        Ok(self.finish(command, targets, self.fold(results)))
    }

    fn agent(&self, host: &Host) -> Result<Box<dyn UpdateAgent>> {
        let is_local = self.runner.is_local(host);
        RetryPolicy::com_activation().run(self.sleeper, |attempt| {
            tracing::debug!(host = %host, attempt, "Connecting to update agent");
            self.agents.connect(host, is_local)
        })
    }

    fn task_folder(&self, host: &Host, credential: Option<&Credential>) -> Result<Box<dyn TaskFolder>> {
        taskschd::connect_with_retry(
            self.scheduler,
            host,
            self.runner.is_local(host),
            credential,
            &RetryPolicy::com_activation(),
            self.sleeper,
        )
    }

    /// Run a one-shot PowerShell job on a remote host, first deleting the
    /// finished jobs of earlier runs
    fn run_remote_script(
        &self,
        host: &Host,
        credential: Option<&Credential>,
        action: &str,
        script: &str,
    ) -> Result<String> {
        let folder = self.task_folder(host, credential)?;
        let pruned = taskschd::prune(folder.as_ref(), &taskschd::one_shot_prefix(action))?;
        if pruned > 0 {
            tracing::info!(host = %host, action, pruned, "Deleted earlier one-shot jobs");
        }
        let job = JobDefinition::powershell(taskschd::one_shot_name(action), script, JobTrigger::RunNow)
            .with_description(format!("wuctl {}", action));
        taskschd::submit(folder.as_ref(), &job, true)?;
        Ok(job.name)
    }

    /// Fetch an http(s) scan package and point the request at the local copy
    fn localize(&self, request: &AddServiceRequest) -> Result<AddServiceRequest> {
        match request {
            AddServiceRequest::ScanPackage { name, location } if bits::is_remote_location(location) => {
                let directory = self.settings.download_directory();
                std::fs::create_dir_all(&directory)?;
                let destination = bits::destination_for(location, &directory)?;
                let path = bits::download(
                    self.transfers,
                    location,
                    &destination,
                    &self.settings.download_options(),
                    self.sleeper,
                )?;
                Ok(AddServiceRequest::ScanPackage {
                    name: name.clone(),
                    location: path.to_string_lossy().into_owned(),
                })
            }
            other => Ok(other.clone()),
        }
    }

    pub fn service_managers(
        &self,
        targets: &Targets,
        service_id: Option<&str>,
    ) -> Result<Invocation<ServiceManagerRecord>> {
        self.each_target("service-manager list", targets, |host| {
            let agent = self.agent(host)?;
            Ok(agent
                .services()?
                .into_iter()
                .filter(|s| service_id.map_or(true, |id| s.service_id.eq_ignore_ascii_case(id)))
                .map(|s| ServiceManagerRecord::new(host.name(), s))
                .collect())
        })
    }

    pub fn add_service_manager(
        &self,
        targets: &Targets,
        request: &AddServiceRequest,
    ) -> Result<Invocation<ServiceChangeRecord>> {
        let service_id = match request {
            AddServiceRequest::ServiceId { id, .. } => id.clone(),
            AddServiceRequest::ScanPackage { name, .. } => name.clone(),
        };

        self.each_target("service-manager add", targets, |host| {
            if self.runner.is_local(host) {
                let request = self.localize(request)?;
                let agent = self.agent(host)?;
                let info = agent.add_service(&request)?;
                return Ok(vec![ServiceChangeRecord {
                    computer_name: host.name().to_string(),
                    service_id: info.service_id,
                    name: Some(info.name),
                    action: ServiceAction::Added,
                    job: None,
                }]);
            }

            if let AddServiceRequest::ScanPackage { location, .. } = request {
                if bits::is_remote_location(location) {
                    return Err(Error::Unsupported(
                        "scan packages from http(s) can only be added on the local host".into(),
                    ));
                }
            }
            let job = self.run_remote_script(
                host,
                targets.credential.as_ref(),
                "add-service",
                &taskschd::add_service_script(request),
            )?;
            Ok(vec![ServiceChangeRecord {
                computer_name: host.name().to_string(),
                service_id: service_id.clone(),
                name: None,
                action: ServiceAction::Added,
                job: Some(job),
            }])
        })
    }

    pub fn remove_service_manager(
        &self,
        targets: &Targets,
        service_id: &str,
    ) -> Result<Invocation<ServiceChangeRecord>> {
        if service_id.trim().is_empty() {
            return Err(Error::Config("service id cannot be empty".into()));
        }

        self.each_target("service-manager remove", targets, |host| {
            let job = if self.runner.is_local(host) {
                self.agent(host)?.remove_service(service_id)?;
                None
            } else {
                Some(self.run_remote_script(
                    host,
                    targets.credential.as_ref(),
                    "remove-service",
                    &taskschd::remove_service_script(service_id),
                )?)
            };
            Ok(vec![ServiceChangeRecord {
                computer_name: host.name().to_string(),
                service_id: service_id.to_string(),
                name: None,
                action: ServiceAction::Removed,
                job,
            }])
        })
    }

    pub fn history(&self, targets: &Targets, query: &HistoryQuery) -> Result<Invocation<HistoryRecord>> {
        self.each_target("history", targets, |host| {
            let agent = self.agent(host)?;
            Ok(wua::read_history(agent.as_ref(), query)?
                .into_iter()
                .map(|entry| HistoryRecord::new(host.name(), entry))
                .collect())
        })
    }

    pub fn api_version(&self, targets: &Targets) -> Result<Invocation<ApiVersionRecord>> {
        self.each_target("api-version", targets, |host| {
            let agent = self.agent(host)?;
            Ok(vec![ApiVersionRecord::new(host.name(), agent.api_version()?)])
        })
    }

    pub fn installer_status(&self, targets: &Targets) -> Result<Invocation<InstallerStatusRecord>> {
        self.each_target("installer-status", targets, |host| {
            let agent = self.agent(host)?;
            Ok(vec![InstallerStatusRecord {
                computer_name: host.name().to_string(),
                is_busy: agent.installer_is_busy()?,
            }])
        })
    }

    /// Reboot state, optionally scheduling a reboot at `schedule` or
    /// cancelling a scheduled one
    pub fn reboot_status(
        &self,
        targets: &Targets,
        schedule: Option<DateTime<Utc>>,
        cancel: bool,
    ) -> Result<Invocation<RebootStatusRecord>> {
        if let Some(at) = schedule {
            if at <= Utc::now() {
                return Err(Error::Config(format!("reboot time {} is in the past", at)));
            }
            if cancel {
                return Err(Error::Config("cannot schedule and cancel a reboot at once".into()));
            }
        }

        self.each_target("reboot-status", targets, |host| {
            let agent = self.agent(host)?;
            let mut record = RebootStatusRecord {
                computer_name: host.name().to_string(),
                reboot_required: agent.reboot_required()?,
                reboot_scheduled: None,
                cancelled_job: None,
            };

            if cancel {
                let folder = self.task_folder(host, targets.credential.as_ref())?;
                match taskschd::remove(folder.as_ref(), REBOOT_JOB_NAME) {
                    Ok(()) => record.cancelled_job = Some(REBOOT_JOB_NAME.to_string()),
                    Err(Error::TaskNotFound(_)) => {
                        tracing::info!(host = %host, "No scheduled reboot to cancel");
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(at) = schedule {
                let folder = self.task_folder(host, targets.credential.as_ref())?;
                taskschd::submit(folder.as_ref(), &JobDefinition::reboot(REBOOT_JOB_NAME, at), true)?;
                record.reboot_scheduled = Some(at);
            }
            Ok(vec![record])
        })
    }

    pub fn invoke_job(
        &self,
        targets: &Targets,
        name: &str,
        script: &str,
        trigger: JobTrigger,
        force: bool,
    ) -> Result<Invocation<JobRecord>> {
        if name.trim().is_empty() || script.trim().is_empty() {
            return Err(Error::Config("job name and script are required".into()));
        }
        let job = JobDefinition::powershell(name, script, trigger);

        self.each_target("job invoke", targets, |host| {
            let folder = self.task_folder(host, targets.credential.as_ref())?;
            let (submission, started) = taskschd::submit(folder.as_ref(), &job, force)?;
            Ok(vec![JobRecord {
                computer_name: host.name().to_string(),
                name: job.name.clone(),
                trigger: job.trigger.to_string(),
                action: submission.to_string(),
                started,
            }])
        })
    }

    pub fn running_jobs(&self, targets: &Targets, filter: Option<&str>) -> Result<Invocation<RunningJobRecord>> {
        self.each_target("job list", targets, |host| {
            let folder = self.task_folder(host, targets.credential.as_ref())?;
            Ok(folder
                .running()?
                .into_iter()
                .filter(|job| credman::matches_filter(&job.name, filter))
                .map(|job| RunningJobRecord::new(host.name(), job))
                .collect())
        })
    }

    pub fn remove_job(&self, targets: &Targets, name: &str) -> Result<Invocation<JobRecord>> {
        self.each_target("job remove", targets, |host| {
            let folder = self.task_folder(host, targets.credential.as_ref())?;
            taskschd::remove(folder.as_ref(), name)?;
            Ok(vec![JobRecord {
                computer_name: host.name().to_string(),
                name: name.to_string(),
                trigger: String::new(),
                action: "Removed".to_string(),
                started: false,
            }])
        })
    }

    fn local_name(&self) -> &str {
        self.runner.local_names().host_name()
    }

    pub fn set_credential(
        &self,
        target: &str,
        kind: CredentialType,
        account: &str,
        secret: SecretString,
        persist: Persistence,
        comment: Option<&str>,
    ) -> Result<CredentialRecord> {
        if target.trim().is_empty() {
            return Err(Error::Credential("target cannot be empty".into()));
        }
        // Validates the account form
        let parsed = Credential::parse(account, secret)?;

        let mut stored = StoredCredential::new(target, kind)
            .with_user(parsed.account())
            .with_secret(parsed.secret().clone())
            .with_persist(persist);
        if let Some(comment) = comment {
            stored = stored.with_comment(comment);
        }
        self.credentials.write(&stored)?;
        tracing::info!(target_name = target, kind = %kind, "Credential stored");

        let written = self.credentials.read(target, kind)?.unwrap_or(stored);
        Ok(CredentialRecord::new(self.local_name(), &written))
    }

    pub fn get_credential(&self, target: &str, kind: CredentialType) -> Result<CredentialRecord> {
        self.credentials
            .read(target, kind)?
            .map(|stored| CredentialRecord::new(self.local_name(), &stored))
            .ok_or_else(|| Error::CredentialNotFound(target.to_string()))
    }

    pub fn remove_credential(&self, target: &str, kind: CredentialType) -> Result<()> {
        self.credentials.delete(target, kind)?;
        tracing::info!(target_name = target, kind = %kind, "Credential removed");
        Ok(())
    }

    pub fn list_credentials(&self, filter: Option<&str>) -> Result<Vec<CredentialRecord>> {
        Ok(self
            .credentials
            .enumerate(filter)?
            .iter()
            .map(|stored| CredentialRecord::new(self.local_name(), stored))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credman::InMemoryStore;

    #[test]
    fn test_targets_default_to_local() {
        let targets = Targets::new(Vec::new());
        assert_eq!(targets.hosts, vec![Host::from("localhost")]);
        assert!(targets.credential.is_none());
    }

    #[test]
    fn test_resolve_credential_from_user() {
        let store = InMemoryStore::new();
        let cred = resolve_credential(&store, Some(r"CONTOSO\admin"), None, Some(SecretString::new("pw")))
            .unwrap()
            .unwrap();
        assert_eq!(cred.domain(), Some("CONTOSO"));
        assert_eq!(cred.user(), "admin");
    }

    #[test]
    fn test_resolve_credential_requires_password() {
        let store = InMemoryStore::new();
        let err = resolve_credential(&store, Some("admin"), None, None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resolve_credential_from_store() {
        let store = InMemoryStore::new();
        store
            .write(
                &StoredCredential::new("wu-admin", CredentialType::Generic)
                    .with_user(r"CONTOSO\svc")
                    .with_secret(SecretString::new("pw")),
            )
            .unwrap();

        let cred = resolve_credential(&store, None, Some("wu-admin"), None).unwrap().unwrap();
        assert_eq!(cred.account(), r"CONTOSO\svc");
        assert!(resolve_credential(&store, None, None, None).unwrap().is_none());
        assert!(resolve_credential(&store, Some("a"), Some("b"), None).is_err());
    }
}
