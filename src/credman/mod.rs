//! Stored credentials (Windows Credential Manager)
//!
//! Commands can take `--credential <target>` and resolve the account and
//! secret from the store instead of the command line.

#[cfg(windows)]
pub mod windows;

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::credential::{Credential, SecretString};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CredentialType {
    Generic,
    DomainPassword,
    DomainCertificate,
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialType::Generic => write!(f, "Generic"),
            CredentialType::DomainPassword => write!(f, "DomainPassword"),
            CredentialType::DomainCertificate => write!(f, "DomainCertificate"),
        }
    }
}

impl FromStr for CredentialType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(CredentialType::Generic),
            "domainpassword" | "domain-password" => Ok(CredentialType::DomainPassword),
            "domaincertificate" | "domain-certificate" => Ok(CredentialType::DomainCertificate),
            other => Err(Error::Credential(format!("unknown credential type '{}'", other))),
        }
    }
}

/// How long a stored credential lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    Session,
    LocalMachine,
    Enterprise,
}

impl std::fmt::Display for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Persistence::Session => write!(f, "Session"),
            Persistence::LocalMachine => write!(f, "LocalMachine"),
            Persistence::Enterprise => write!(f, "Enterprise"),
        }
    }
}

/// One entry in the credential store
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub target: String,
    pub kind: CredentialType,
    pub user_name: Option<String>,
    /// Not readable for domain credential types
    pub secret: Option<SecretString>,
    pub comment: Option<String>,
    pub persist: Persistence,
    pub last_written: Option<DateTime<Utc>>,
}

impl StoredCredential {
    pub fn new(target: impl Into<String>, kind: CredentialType) -> Self {
        Self {
            target: target.into(),
            kind,
            user_name: None,
            secret: None,
            comment: None,
            persist: Persistence::LocalMachine,
            last_written: None,
        }
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_secret(mut self, secret: SecretString) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_persist(mut self, persist: Persistence) -> Self {
        self.persist = persist;
        self
    }
}

pub trait CredentialStore {
    fn write(&self, credential: &StoredCredential) -> Result<()>;

    /// `Ok(None)` when no entry exists
    fn read(&self, target: &str, kind: CredentialType) -> Result<Option<StoredCredential>>;

    /// Idempotent: deleting a missing entry succeeds
    fn delete(&self, target: &str, kind: CredentialType) -> Result<()>;

    /// Entries whose target matches `filter` (`prefix*` wildcard or exact,
    /// case-insensitive); all entries when `None`
    fn enumerate(&self, filter: Option<&str>) -> Result<Vec<StoredCredential>>;
}

/// Resolve a usable logon credential stored under `target`.
///
/// Generic entries are preferred because their secret is readable.
pub fn resolve(store: &dyn CredentialStore, target: &str) -> Result<Credential> {
    for kind in [CredentialType::Generic, CredentialType::DomainPassword] {
        let Some(stored) = store.read(target, kind)? else {
            continue;
        };
        let user = stored
            .user_name
            .ok_or_else(|| Error::Credential(format!("'{}' has no user name", target)))?;
        let secret = stored
            .secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Credential(format!("'{}' has no readable secret", target)))?;
        return Credential::parse(&user, secret);
    }
    Err(Error::CredentialNotFound(target.to_string()))
}

/// Credential Manager filter semantics: trailing `*` is a prefix match
pub fn matches_filter(target: &str, filter: Option<&str>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let target = target.to_ascii_lowercase();
    let filter = filter.to_ascii_lowercase();
    match filter.strip_suffix('*') {
        Some(prefix) => target.starts_with(prefix),
        None => target == filter,
    }
}

/// FILETIME ticks (100ns since 1601-01-01) to UTC
pub fn filetime_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
    if ticks == 0 {
        return None;
    }
    let since_unix = i64::try_from(ticks).ok()? - UNIX_EPOCH_TICKS;
    let secs = since_unix.div_euclid(10_000_000);
    let nanos = (since_unix.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Process-local store for tests and embedders
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<BTreeMap<(String, CredentialType), StoredCredential>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryStore {
    fn write(&self, credential: &StoredCredential) -> Result<()> {
        if credential.target.is_empty() {
            return Err(Error::Credential("target name cannot be empty".into()));
        }
        let mut stored = credential.clone();
        stored.last_written = Some(Utc::now());
        self.entries
            .lock()
            .insert((credential.target.to_ascii_lowercase(), credential.kind), stored);
        Ok(())
    }

    fn read(&self, target: &str, kind: CredentialType) -> Result<Option<StoredCredential>> {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(&(target.to_ascii_lowercase(), kind)) else {
            return Ok(None);
        };
        let mut entry = entry.clone();
        if kind != CredentialType::Generic {
            entry.secret = None;
        }
        Ok(Some(entry))
    }

    fn delete(&self, target: &str, kind: CredentialType) -> Result<()> {
        self.entries.lock().remove(&(target.to_ascii_lowercase(), kind));
        Ok(())
    }

    fn enumerate(&self, filter: Option<&str>) -> Result<Vec<StoredCredential>> {
        Ok(self
            .entries
            .lock()
            .values()
            .filter(|c| matches_filter(&c.target, filter))
            .map(|c| StoredCredential {
                secret: None,
                ..c.clone()
            })
            .collect())
    }
}
