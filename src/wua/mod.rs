//! Windows Update Agent capability provider
//!
//! The agent's object model is owned by Windows. This module exposes the
//! handful of operations the commands need through [`UpdateAgent`], keyed by
//! target host, plus the platform-independent helpers for history paging and
//! date conversion.

#[cfg(windows)]
pub mod com;

use std::sync::LazyLock;

use chrono::{DateTime, Duration, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::security::Host;
use crate::Result;

/// Service id of Microsoft Update
pub const MICROSOFT_UPDATE_SERVICE_ID: &str = "7971f918-a847-4430-9279-4a52d1efe18d";

/// Client application id reported to the agent
pub const CLIENT_APPLICATION_ID: &str = "wuctl";

const HISTORY_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentVersion {
    pub api_major: i32,
    pub api_minor: i32,
    pub product_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: Option<DateTime<Utc>>,
    /// `UpdateOperation` value
    pub operation: i32,
    /// `OperationResultCode` value
    pub result_code: i32,
    pub hresult: i32,
    pub title: String,
    pub description: String,
    pub client_application_id: String,
    pub update_id: String,
    pub revision: i32,
    pub service_id: String,
    pub support_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Newest N matching entries
    pub last: Option<usize>,
    /// Only entries at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive title substring
    pub title_contains: Option<String>,
}

impl HistoryQuery {
    fn matches(&self, entry: &HistoryEntry) -> bool {
        if let (Some(since), Some(date)) = (self.since, entry.date) {
            if date < since {
                return false;
            }
        }
        match &self.title_contains {
            Some(needle) => entry.title.to_lowercase().contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_id: String,
    pub name: String,
    pub is_managed: bool,
    pub is_registered_with_au: bool,
    pub is_default_au_service: bool,
    pub offers_windows_updates: bool,
    pub is_scan_package_service: bool,
}

/// `AddServiceFlag` bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddServiceFlags {
    pub allow_pending_registration: bool,
    pub allow_online_registration: bool,
    pub register_with_au: bool,
}

impl AddServiceFlags {
    pub fn bits(&self) -> i32 {
        let mut bits = 0;
        if self.allow_pending_registration {
            bits |= 0x1;
        }
        if self.allow_online_registration {
            bits |= 0x2;
        }
        if self.register_with_au {
            bits |= 0x4;
        }
        bits
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddServiceRequest {
    /// Register an online service by id
    ServiceId {
        id: String,
        flags: AddServiceFlags,
        authorization_cab: Option<String>,
    },
    /// Register an offline scan package (`wsusscn2.cab`) found at `location`
    ScanPackage { name: String, location: String },
}

impl AddServiceRequest {
    /// Microsoft Update, registered with Automatic Updates
    pub fn microsoft_update() -> Self {
        AddServiceRequest::ServiceId {
            id: MICROSOFT_UPDATE_SERVICE_ID.to_string(),
            flags: AddServiceFlags {
                allow_pending_registration: true,
                allow_online_registration: true,
                register_with_au: true,
            },
            authorization_cab: None,
        }
    }
}

/// Opens the update agent on a host
pub trait UpdateAgentProvider {
    fn connect(&self, host: &Host, is_local: bool) -> Result<Box<dyn UpdateAgent>>;
}

/// Operations against one host's update agent
#[cfg_attr(test, mockall::automock)]
pub trait UpdateAgent {
    fn api_version(&self) -> Result<AgentVersion>;

    fn installer_is_busy(&self) -> Result<bool>;

    fn reboot_required(&self) -> Result<bool>;

    fn history_count(&self) -> Result<usize>;

    /// Entries newest first, starting at `start`
    fn query_history(&self, start: usize, count: usize) -> Result<Vec<HistoryEntry>>;

    fn services(&self) -> Result<Vec<ServiceInfo>>;

    fn add_service(&self, request: &AddServiceRequest) -> Result<ServiceInfo>;

    fn remove_service(&self, service_id: &str) -> Result<()>;
}

/// Page through history newest first, applying `query`
pub fn read_history(agent: &dyn UpdateAgent, query: &HistoryQuery) -> Result<Vec<HistoryEntry>> {
    if query.last == Some(0) {
        return Ok(Vec::new());
    }

    let total = agent.history_count()?;
    let mut out = Vec::new();
    let mut start = 0;

    while start < total {
        let count = HISTORY_PAGE_SIZE.min(total - start);
        let page = agent.query_history(start, count)?;
        if page.is_empty() {
            break;
        }
        start += page.len();

        for entry in page {
            let past_since = matches!((query.since, entry.date), (Some(since), Some(date)) if date < since);
            if past_since {
                return Ok(out);
            }
            if query.matches(&entry) {
                out.push(entry);
                if query.last.is_some_and(|last| out.len() >= last) {
                    return Ok(out);
                }
            }
        }
    }

    Ok(out)
}

/// OLE automation date (days since 1899-12-30) to UTC
pub fn ole_date_to_utc(date: f64) -> Option<DateTime<Utc>> {
    if !date.is_finite() || date <= 0.0 {
        return None;
    }
    let base = Utc.with_ymd_and_hms(1899, 12, 30, 0, 0, 0).single()?;
    let millis = (date * 86_400_000.0).round() as i64;
    base.checked_add_signed(Duration::milliseconds(millis))
}

static KB_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Constant pattern
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)\bKB(\d+)").expect("valid regex")
});

/// `KB1234567` from an update title
pub fn extract_kb(title: &str) -> Option<String> {
    KB_RE
        .captures(title)
        .and_then(|caps| caps.get(1))
        .map(|digits| format!("KB{}", digits.as_str()))
}
