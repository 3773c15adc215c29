//! Agent status records

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use crate::wua::AgentVersion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct ApiVersionRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "ApiVersion")]
    pub api_version: String,
    #[tabled(rename = "WuapiDllVersion")]
    pub product_version: String,
}

impl ApiVersionRecord {
    pub fn new(computer_name: &str, version: AgentVersion) -> Self {
        Self {
            computer_name: computer_name.to_string(),
            api_version: format!("{}.{}", version.api_major, version.api_minor),
            product_version: version.product_version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct InstallerStatusRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "IsBusy")]
    pub is_busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct RebootStatusRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "RebootRequired")]
    pub reboot_required: bool,
    #[tabled(rename = "RebootScheduled", display_with = "super::display_date")]
    pub reboot_scheduled: Option<DateTime<Utc>>,
    #[tabled(rename = "Cancelled", display_with = "super::display_option")]
    pub cancelled_job: Option<String>,
}
