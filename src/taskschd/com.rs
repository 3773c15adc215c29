//! COM implementation of Task Scheduler access

use windows::core::{Interface, BSTR, VARIANT};
use windows::Win32::Foundation::{VARIANT_FALSE, VARIANT_TRUE};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_INPROC_SERVER};
use windows::Win32::System::TaskScheduler::{
    IExecAction, ITaskFolder, ITaskService, TaskScheduler, TASK_ACTION_EXEC, TASK_CREATE_OR_UPDATE,
    TASK_ENUM_HIDDEN, TASK_LOGON_SERVICE_ACCOUNT, TASK_RUNLEVEL_HIGHEST, TASK_TRIGGER_BOOT,
    TASK_TRIGGER_TIME,
};

use super::{start_boundary, task_state_name, JobDefinition, JobTrigger, RunningJob, TaskFolder, TaskSchedulerProvider};
use crate::com::{bstr_variant, com_error, optional_variant};
use crate::credential::Credential;
use crate::security::Host;
use crate::Result;

// HRESULT_FROM_WIN32(ERROR_FILE_NOT_FOUND)
const TASK_NOT_FOUND: u32 = 0x80070002;

#[derive(Debug, Default)]
pub struct ComTaskScheduler;

impl ComTaskScheduler {
    pub fn new() -> Self {
        ComTaskScheduler
    }
}

impl TaskSchedulerProvider for ComTaskScheduler {
    fn connect(&self, host: &Host, is_local: bool, credential: Option<&Credential>) -> Result<Box<dyn TaskFolder>> {
        unsafe {
            let service: ITaskService = CoCreateInstance(&TaskScheduler, None, CLSCTX_INPROC_SERVER)
                .map_err(|e| com_error(e, "Schedule.Service"))?;

            let server = if is_local {
                VARIANT::default()
            } else {
                bstr_variant(host.name())
            };
            let (user, domain, password) = match credential.filter(|_| !is_local) {
                Some(c) => (
                    bstr_variant(c.user()),
                    optional_variant(c.domain()),
                    bstr_variant(c.secret().expose()),
                ),
                None => (VARIANT::default(), VARIANT::default(), VARIANT::default()),
            };

            service
                .Connect(&server, &user, &domain, &password)
                .map_err(|e| com_error(e, "ITaskService::Connect"))?;
            let folder = service
                .GetFolder(&BSTR::from("\\"))
                .map_err(|e| com_error(e, "ITaskService::GetFolder"))?;

            tracing::debug!(host = %host, "Connected to Task Scheduler");
            Ok(Box::new(ComTaskFolder { service, folder }))
        }
    }
}

struct ComTaskFolder {
    service: ITaskService,
    folder: ITaskFolder,
}

impl TaskFolder for ComTaskFolder {
    fn exists(&self, name: &str) -> Result<bool> {
        match unsafe { self.folder.GetTask(&BSTR::from(name)) } {
            Ok(_) => Ok(true),
            Err(e) if e.code().0 as u32 == TASK_NOT_FOUND => Ok(false),
            Err(e) => Err(com_error(e, "ITaskFolder::GetTask")),
        }
    }

    fn register(&self, job: &JobDefinition) -> Result<()> {
        unsafe {
            let definition = self
                .service
                .NewTask(0)
                .map_err(|e| com_error(e, "ITaskService::NewTask"))?;

            let info = definition
                .RegistrationInfo()
                .map_err(|e| com_error(e, "ITaskDefinition::RegistrationInfo"))?;
            info.SetAuthor(&BSTR::from("wuctl"))
                .map_err(|e| com_error(e, "IRegistrationInfo::SetAuthor"))?;
            info.SetDescription(&BSTR::from(job.description.as_str()))
                .map_err(|e| com_error(e, "IRegistrationInfo::SetDescription"))?;

            let principal = definition
                .Principal()
                .map_err(|e| com_error(e, "ITaskDefinition::Principal"))?;
            principal
                .SetUserId(&BSTR::from(job.run_as.as_str()))
                .map_err(|e| com_error(e, "IPrincipal::SetUserId"))?;
            principal
                .SetLogonType(TASK_LOGON_SERVICE_ACCOUNT)
                .map_err(|e| com_error(e, "IPrincipal::SetLogonType"))?;
            principal
                .SetRunLevel(TASK_RUNLEVEL_HIGHEST)
                .map_err(|e| com_error(e, "IPrincipal::SetRunLevel"))?;

            let settings = definition
                .Settings()
                .map_err(|e| com_error(e, "ITaskDefinition::Settings"))?;
            settings
                .SetStartWhenAvailable(VARIANT_TRUE)
                .map_err(|e| com_error(e, "ITaskSettings::SetStartWhenAvailable"))?;
            settings
                .SetDisallowStartIfOnBatteries(VARIANT_FALSE)
                .map_err(|e| com_error(e, "ITaskSettings::SetDisallowStartIfOnBatteries"))?;
            settings
                .SetStopIfGoingOnBatteries(VARIANT_FALSE)
                .map_err(|e| com_error(e, "ITaskSettings::SetStopIfGoingOnBatteries"))?;

            let triggers = definition
                .Triggers()
                .map_err(|e| com_error(e, "ITaskDefinition::Triggers"))?;
            match &job.trigger {
                JobTrigger::RunNow => {}
                JobTrigger::At(time) => {
                    let trigger = triggers
                        .Create(TASK_TRIGGER_TIME)
                        .map_err(|e| com_error(e, "ITriggerCollection::Create"))?;
                    trigger
                        .SetStartBoundary(&BSTR::from(start_boundary(time)))
                        .map_err(|e| com_error(e, "ITrigger::SetStartBoundary"))?;
                }
                JobTrigger::AtStartup => {
                    triggers
                        .Create(TASK_TRIGGER_BOOT)
                        .map_err(|e| com_error(e, "ITriggerCollection::Create"))?;
                }
            }

            let action = definition
                .Actions()
                .map_err(|e| com_error(e, "ITaskDefinition::Actions"))?
                .Create(TASK_ACTION_EXEC)
                .map_err(|e| com_error(e, "IActionCollection::Create"))?;
            let exec: IExecAction = action.cast().map_err(|e| com_error(e, "IExecAction"))?;
            exec.SetPath(&BSTR::from(job.command.as_str()))
                .map_err(|e| com_error(e, "IExecAction::SetPath"))?;
            exec.SetArguments(&BSTR::from(job.arguments.as_str()))
                .map_err(|e| com_error(e, "IExecAction::SetArguments"))?;

            self.folder
                .RegisterTaskDefinition(
                    &BSTR::from(job.name.as_str()),
                    &definition,
                    TASK_CREATE_OR_UPDATE.0,
                    &bstr_variant(&job.run_as),
                    &VARIANT::default(),
                    TASK_LOGON_SERVICE_ACCOUNT,
                    &VARIANT::default(),
                )
                .map_err(|e| com_error(e, "ITaskFolder::RegisterTaskDefinition"))?;
        }
        Ok(())
    }

    fn run(&self, name: &str) -> Result<()> {
        unsafe {
            let task = self
                .folder
                .GetTask(&BSTR::from(name))
                .map_err(|e| com_error(e, "ITaskFolder::GetTask"))?;
            task.Run(&VARIANT::default())
                .map_err(|e| com_error(e, "IRegisteredTask::Run"))?;
        }
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        unsafe {
            let task = self
                .folder
                .GetTask(&BSTR::from(name))
                .map_err(|e| com_error(e, "ITaskFolder::GetTask"))?;
            task.Stop(0).map_err(|e| com_error(e, "IRegisteredTask::Stop"))
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        unsafe { self.folder.DeleteTask(&BSTR::from(name), 0) }
            .map_err(|e| com_error(e, "ITaskFolder::DeleteTask"))
    }

    fn names(&self) -> Result<Vec<String>> {
        unsafe {
            let tasks = self
                .folder
                .GetTasks(TASK_ENUM_HIDDEN.0)
                .map_err(|e| com_error(e, "ITaskFolder::GetTasks"))?;
            let count = tasks
                .Count()
                .map_err(|e| com_error(e, "IRegisteredTaskCollection::Count"))?;

            let mut out = Vec::with_capacity(count.max(0) as usize);
            for index in 1..=count {
                let task = tasks
                    .get_Item(&VARIANT::from(index))
                    .map_err(|e| com_error(e, "IRegisteredTaskCollection::Item"))?;
                out.push(
                    task.Name()
                        .map_err(|e| com_error(e, "IRegisteredTask::Name"))?
                        .to_string(),
                );
            }
            Ok(out)
        }
    }

    fn running(&self) -> Result<Vec<RunningJob>> {
        unsafe {
            let tasks = self
                .service
                .GetRunningTasks(TASK_ENUM_HIDDEN.0)
                .map_err(|e| com_error(e, "ITaskService::GetRunningTasks"))?;
            let count = tasks
                .Count()
                .map_err(|e| com_error(e, "IRunningTaskCollection::Count"))?;

            let mut out = Vec::with_capacity(count.max(0) as usize);
            // Collection is 1-based
            for index in 1..=count {
                let task = tasks
                    .get_Item(&VARIANT::from(index))
                    .map_err(|e| com_error(e, "IRunningTaskCollection::Item"))?;
                out.push(RunningJob {
                    name: task.Name().map(|s| s.to_string()).unwrap_or_default(),
                    path: task.Path().map(|s| s.to_string()).unwrap_or_default(),
                    current_action: task.CurrentAction().map(|s| s.to_string()).unwrap_or_default(),
                    engine_pid: task.EnginePID().unwrap_or_default(),
                    instance_guid: task.InstanceGuid().map(|s| s.to_string()).unwrap_or_default(),
                    state: task_state_name(task.State().map(|s| s.0).unwrap_or_default()).to_string(),
                });
            }
            Ok(out)
        }
    }
}
