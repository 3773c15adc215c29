//! Credential Manager records

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use crate::credman::{CredentialType, Persistence, StoredCredential};

/// A stored credential, without its secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct CredentialRecord {
    #[tabled(rename = "ComputerName")]
    pub computer_name: String,
    #[tabled(rename = "Target")]
    pub target: String,
    #[tabled(rename = "Type")]
    pub kind: CredentialType,
    #[tabled(rename = "UserName", display_with = "super::display_option")]
    pub user_name: Option<String>,
    #[tabled(rename = "Persist")]
    pub persist: Persistence,
    #[tabled(rename = "LastWritten", display_with = "super::display_date")]
    pub last_written: Option<DateTime<Utc>>,
    #[tabled(skip)]
    pub comment: Option<String>,
}

impl CredentialRecord {
    pub fn new(computer_name: &str, stored: &StoredCredential) -> Self {
        Self {
            computer_name: computer_name.to_string(),
            target: stored.target.clone(),
            kind: stored.kind,
            user_name: stored.user_name.clone(),
            persist: stored.persist,
            last_written: stored.last_written,
            comment: stored.comment.clone(),
        }
    }
}
