//! Update history records

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use crate::wua::{extract_kb, HistoryEntry};

/// `UpdateOperation` name
pub fn operation_name(operation: i32) -> &'static str {
    match operation {
        1 => "Installation",
        2 => "Uninstallation",
        _ => "Other",
    }
}

/// `OperationResultCode` name
pub fn result_code_name(code: i32) -> &'static str {
    match code {
        0 => "NotStarted",
        1 => "InProgress",
        2 => "Succeeded",
        3 => "SucceededWithErrors",
        4 => "Failed",
        5 => "Aborted",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct HistoryRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "Date", display_with = "super::display_date")]
    pub date: Option<DateTime<Utc>>,
    #[tabled(rename = "Operation")]
    pub operation: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "KB", display_with = "super::display_option")]
    pub kb: Option<String>,
    #[tabled(rename = "Title")]
    pub title: String,
    #[tabled(skip)]
    pub hresult: String,
    #[tabled(skip)]
    pub description: String,
    #[tabled(skip)]
    pub client_application_id: String,
    #[tabled(skip)]
    pub update_id: String,
    #[tabled(skip)]
    pub revision: i32,
    #[tabled(skip)]
    pub service_id: String,
    #[tabled(skip)]
    pub support_url: String,
}

impl HistoryRecord {
    pub fn new(computer_name: &str, entry: HistoryEntry) -> Self {
        Self {
            computer_name: computer_name.to_string(),
            date: entry.date,
            operation: operation_name(entry.operation).to_string(),
            result: result_code_name(entry.result_code).to_string(),
            kb: extract_kb(&entry.title),
            hresult: format!("0x{:08X}", entry.hresult as u32),
            title: entry.title,
            description: entry.description,
            client_application_id: entry.client_application_id,
            update_id: entry.update_id,
            revision: entry.revision,
            service_id: entry.service_id,
            support_url: entry.support_url,
        }
    }
}
