//! Hand-written fakes for the OS-facing traits

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use wuctl::bits::{JobState, Progress, TransferJob, TransferService};
use wuctl::config::{ReportSettings, Settings};
use wuctl::credential::Credential;
use wuctl::credman::InMemoryStore;
use wuctl::report::ReportSender;
use wuctl::retry::Sleeper;
use wuctl::runner::Runner;
use wuctl::security::{Host, ImpersonationGuard, LocalNames, LogonSpec, SecurityContext};
use wuctl::taskschd::{JobDefinition, RunningJob, TaskFolder, TaskSchedulerProvider};
use wuctl::wua::{AddServiceRequest, AgentVersion, HistoryEntry, ServiceInfo, UpdateAgent, UpdateAgentProvider};
use wuctl::{Error, Result, Toolkit};

pub const LOCAL_HOST_NAME: &str = "WKS01";

pub fn rpc_unavailable() -> Error {
    Error::from_hresult(0x800706BAu32 as i32, "CoCreateInstanceEx")
}

pub fn access_denied() -> Error {
    Error::from_hresult(0x80070005u32 as i32, "ITaskService::Connect")
}

/// Security context that tracks impersonation depth
pub struct FakeSecurity {
    pub caller_is_admin: Cell<bool>,
    pub impersonated_is_admin: Cell<bool>,
    pub active: Rc<Cell<u32>>,
    pub logons: RefCell<Vec<LogonSpec>>,
    pub fail_logon: Cell<bool>,
}

impl Default for FakeSecurity {
    fn default() -> Self {
        Self {
            caller_is_admin: Cell::new(true),
            impersonated_is_admin: Cell::new(true),
            active: Rc::new(Cell::new(0)),
            logons: RefCell::new(Vec::new()),
            fail_logon: Cell::new(false),
        }
    }
}

impl FakeSecurity {
    pub fn active(&self) -> u32 {
        self.active.get()
    }
}

impl SecurityContext for FakeSecurity {
    fn principal(&self) -> Result<String> {
        Ok(if self.active.get() > 0 {
            "impersonated".to_string()
        } else {
            "caller".to_string()
        })
    }

    fn is_administrator(&self) -> Result<bool> {
        Ok(if self.active.get() > 0 {
            self.impersonated_is_admin.get()
        } else {
            self.caller_is_admin.get()
        })
    }

    fn impersonate(&self, credential: &Credential, logon: LogonSpec) -> Result<ImpersonationGuard<'_>> {
        if self.fail_logon.get() {
            return Err(Error::Logon {
                user: credential.account(),
                reason: "The user name or password is incorrect".into(),
            });
        }
        self.logons.borrow_mut().push(logon);
        self.active.set(self.active.get() + 1);
        let active = self.active.clone();
        Ok(ImpersonationGuard::new(credential.account(), move || {
            active.set(active.get() - 1);
            Ok(())
        }))
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub waits: RefCell<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.borrow_mut().push(duration);
    }
}

/// State of one fake update agent
#[derive(Clone, Default)]
pub struct AgentState {
    pub busy: bool,
    pub reboot_required: bool,
    pub services: Vec<ServiceInfo>,
    pub history: Vec<HistoryEntry>,
    pub added: Rc<RefCell<Vec<AddServiceRequest>>>,
    pub removed: Rc<RefCell<Vec<String>>>,
}

struct FakeAgent(AgentState);

impl UpdateAgent for FakeAgent {
    fn api_version(&self) -> Result<AgentVersion> {
        Ok(AgentVersion {
            api_major: 8,
            api_minor: 0,
            product_version: "10.0.19041.3996".into(),
        })
    }

    fn installer_is_busy(&self) -> Result<bool> {
        Ok(self.0.busy)
    }

    fn reboot_required(&self) -> Result<bool> {
        Ok(self.0.reboot_required)
    }

    fn history_count(&self) -> Result<usize> {
        Ok(self.0.history.len())
    }

    fn query_history(&self, start: usize, count: usize) -> Result<Vec<HistoryEntry>> {
        Ok(self.0.history.iter().skip(start).take(count).cloned().collect())
    }

    fn services(&self) -> Result<Vec<ServiceInfo>> {
        Ok(self.0.services.clone())
    }

    fn add_service(&self, request: &AddServiceRequest) -> Result<ServiceInfo> {
        self.0.added.borrow_mut().push(request.clone());
        let (service_id, name) = match request {
            AddServiceRequest::ServiceId { id, .. } => (id.clone(), "Microsoft Update".to_string()),
            AddServiceRequest::ScanPackage { name, .. } => ("scan-package-id".to_string(), name.clone()),
        };
        Ok(service(&service_id, &name))
    }

    fn remove_service(&self, service_id: &str) -> Result<()> {
        self.0.removed.borrow_mut().push(service_id.to_string());
        Ok(())
    }
}

pub fn service(id: &str, name: &str) -> ServiceInfo {
    ServiceInfo {
        service_id: id.into(),
        name: name.into(),
        is_managed: false,
        is_registered_with_au: true,
        is_default_au_service: false,
        offers_windows_updates: true,
        is_scan_package_service: false,
    }
}

/// Update agents per host; hosts in `unreachable` always fail to connect,
/// queued `failures` are returned by the next connects
#[derive(Default)]
pub struct FakeAgents {
    pub state: AgentState,
    pub unreachable: Vec<String>,
    pub failures: RefCell<Vec<Error>>,
    pub connects: RefCell<Vec<(String, bool)>>,
}

impl FakeAgents {
    pub fn connects_to(&self, name: &str) -> usize {
        self.connects.borrow().iter().filter(|(host, _)| host == name).count()
    }
}

impl UpdateAgentProvider for FakeAgents {
    fn connect(&self, host: &Host, is_local: bool) -> Result<Box<dyn UpdateAgent>> {
        self.connects.borrow_mut().push((host.name().to_string(), is_local));
        if self.unreachable.iter().any(|h| h.eq_ignore_ascii_case(host.name())) {
            return Err(rpc_unavailable());
        }
        let mut failures = self.failures.borrow_mut();
        if !failures.is_empty() {
            return Err(failures.remove(0));
        }
        Ok(Box::new(FakeAgent(self.state.clone())))
    }
}

/// Task folder shared by every connection
#[derive(Clone, Default)]
pub struct FolderState {
    pub tasks: Rc<RefCell<BTreeMap<String, JobDefinition>>>,
    pub started: Rc<RefCell<Vec<String>>>,
    pub running: Rc<RefCell<Vec<String>>>,
    pub stopped: Rc<RefCell<Vec<String>>>,
}

struct FakeFolder(FolderState);

impl TaskFolder for FakeFolder {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.0.tasks.borrow().contains_key(name))
    }

    fn register(&self, job: &JobDefinition) -> Result<()> {
        self.0.tasks.borrow_mut().insert(job.name.clone(), job.clone());
        Ok(())
    }

    fn run(&self, name: &str) -> Result<()> {
        self.0.started.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.0.stopped.borrow_mut().push(name.to_string());
        self.0.running.borrow_mut().retain(|n| n != name);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.0.tasks.borrow_mut().remove(name);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.0.tasks.borrow().keys().cloned().collect())
    }

    fn running(&self) -> Result<Vec<RunningJob>> {
        Ok(self
            .0
            .running
            .borrow()
            .iter()
            .map(|name| RunningJob {
                name: name.clone(),
                path: format!("\\{}", name),
                current_action: "powershell.exe".into(),
                engine_pid: 4242,
                instance_guid: "{00000000-0000-0000-0000-000000000001}".into(),
                state: "Running".into(),
            })
            .collect())
    }
}

/// Task Scheduler whose connect fails with queued errors first
#[derive(Default)]
pub struct FakeScheduler {
    pub folder: FolderState,
    pub failures: RefCell<Vec<Error>>,
    pub connects: RefCell<Vec<(String, bool, Option<String>)>>,
}

impl FakeScheduler {
    pub fn failing_with(errors: Vec<Error>) -> Self {
        Self {
            failures: RefCell::new(errors),
            ..Default::default()
        }
    }
}

impl TaskSchedulerProvider for FakeScheduler {
    fn connect(&self, host: &Host, is_local: bool, credential: Option<&Credential>) -> Result<Box<dyn TaskFolder>> {
        self.connects
            .borrow_mut()
            .push((host.name().to_string(), is_local, credential.map(|c| c.account())));
        let mut failures = self.failures.borrow_mut();
        if !failures.is_empty() {
            return Err(failures.remove(0));
        }
        Ok(Box::new(FakeFolder(self.folder.clone())))
    }
}

/// BITS job that finishes on the second poll and writes the file
struct FakeTransferJob {
    destination: std::path::PathBuf,
    polls: Cell<u32>,
}

impl TransferJob for FakeTransferJob {
    fn state(&self) -> Result<JobState> {
        self.polls.set(self.polls.get() + 1);
        Ok(if self.polls.get() < 2 {
            JobState::Transferring
        } else {
            JobState::Transferred
        })
    }

    fn progress(&self) -> Result<Progress> {
        Ok(Progress {
            bytes_transferred: 10,
            bytes_total: 20,
        })
    }

    fn error_code(&self) -> Result<Option<u32>> {
        Ok(None)
    }

    fn complete(&self) -> Result<()> {
        std::fs::write(&self.destination, b"cab")?;
        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransfers {
    pub urls: RefCell<Vec<String>>,
}

impl TransferService for FakeTransfers {
    fn start(&self, _display_name: &str, url: &str, destination: &Path) -> Result<Box<dyn TransferJob>> {
        self.urls.borrow_mut().push(url.to_string());
        Ok(Box::new(FakeTransferJob {
            destination: destination.to_path_buf(),
            polls: Cell::new(0),
        }))
    }
}

#[derive(Default)]
pub struct FakeMailer {
    pub sent: RefCell<Vec<(String, String)>>,
    pub fail: Cell<bool>,
}

impl ReportSender for FakeMailer {
    fn send(&self, _settings: &ReportSettings, subject: &str, body: &str) -> Result<()> {
        if self.fail.get() {
            return Err(Error::Report("connection refused".into()));
        }
        self.sent.borrow_mut().push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub fn report_settings() -> ReportSettings {
    ReportSettings {
        smtp_server: "smtp.contoso.com".into(),
        from: "wuctl@contoso.com".into(),
        to: vec!["ops@contoso.com".into()],
        ..Default::default()
    }
}

/// Every fake a toolkit needs
#[derive(Default)]
pub struct Fixture {
    pub security: FakeSecurity,
    pub agents: FakeAgents,
    pub scheduler: FakeScheduler,
    pub transfers: FakeTransfers,
    pub store: InMemoryStore,
    pub mailer: FakeMailer,
    pub sleeper: RecordingSleeper,
    pub settings: Settings,
}

impl Fixture {
    pub fn toolkit(&self) -> Toolkit<'_> {
        Toolkit {
            runner: Runner::new(&self.security, local_names()),
            agents: &self.agents,
            scheduler: &self.scheduler,
            transfers: &self.transfers,
            credentials: &self.store,
            mailer: &self.mailer,
            sleeper: &self.sleeper,
            settings: self.settings.clone(),
            debug: false,
        }
    }
}

pub fn local_names() -> LocalNames {
    LocalNames::with_host_name(Some(LOCAL_HOST_NAME.to_string()))
}

pub fn hosts(names: &[&str]) -> Vec<Host> {
    names.iter().map(|n| Host::from(*n)).collect()
}

pub fn history_entry(days_ago: i64, title: &str) -> HistoryEntry {
    HistoryEntry {
        date: Some(chrono::Utc::now() - chrono::Duration::days(days_ago)),
        operation: 1,
        result_code: 2,
        hresult: 0,
        title: title.into(),
        description: String::new(),
        client_application_id: "AutomaticUpdates".into(),
        update_id: "00000000-0000-0000-0000-000000000000".into(),
        revision: 200,
        service_id: String::new(),
        support_url: String::new(),
    }
}
