//! Service manager records

use serde::Serialize;
use tabled::Tabled;

use crate::wua::ServiceInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct ServiceManagerRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "ServiceID")]
    pub service_id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "IsManaged")]
    pub is_managed: bool,
    #[tabled(rename = "IsDefaultAUService")]
    pub is_default_au_service: bool,
    #[tabled(rename = "IsRegisteredWithAU")]
    pub is_registered_with_au: bool,
    #[tabled(skip)]
    pub offers_windows_updates: bool,
    #[tabled(skip)]
    pub is_scan_package_service: bool,
}

impl ServiceManagerRecord {
    pub fn new(computer_name: &str, info: ServiceInfo) -> Self {
        Self {
            computer_name: computer_name.to_string(),
            service_id: info.service_id,
            name: info.name,
            is_managed: info.is_managed,
            is_default_au_service: info.is_default_au_service,
            is_registered_with_au: info.is_registered_with_au,
            offers_windows_updates: info.offers_windows_updates,
            is_scan_package_service: info.is_scan_package_service,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceAction {
    Added,
    Removed,
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceAction::Added => write!(f, "Added"),
            ServiceAction::Removed => write!(f, "Removed"),
        }
    }
}

/// Outcome of adding or removing a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct ServiceChangeRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "ServiceID")]
    pub service_id: String,
    #[tabled(rename = "Name", display_with = "super::display_option")]
    pub name: Option<String>,
    #[tabled(rename = "Action")]
    pub action: ServiceAction,
    /// Task that carries the change on remote hosts
    #[tabled(rename = "Job", display_with = "super::display_option")]
    pub job: Option<String>,
}
