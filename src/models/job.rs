//! Scheduled job records

use serde::Serialize;
use tabled::Tabled;

use crate::taskschd::RunningJob;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct JobRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Trigger")]
    pub trigger: String,
    /// Registered, Replaced or Removed
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Started")]
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct RunningJobRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "CurrentAction")]
    pub current_action: String,
    #[tabled(rename = "PID")]
    pub engine_pid: u32,
    #[tabled(skip)]
    pub path: String,
    #[tabled(skip)]
    pub instance_guid: String,
}

impl RunningJobRecord {
    pub fn new(computer_name: &str, job: RunningJob) -> Self {
        Self {
            computer_name: computer_name.to_string(),
            name: job.name,
            state: job.state,
            current_action: job.current_action,
            engine_pid: job.engine_pid,
            path: job.path,
            instance_guid: job.instance_guid,
        }
    }
}
