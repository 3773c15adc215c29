//! Alternate credentials used for impersonation and remote connections

use std::fmt;

use crate::{Error, Result};

/// Secret that is zeroed on drop and never printed
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        SecretString(secret.into())
    }

    /// Expose the secret for an API call
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        SecretString(self.0.clone())
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        // SAFETY: zero bytes are valid UTF-8 and the string is not used afterwards
        unsafe {
            for byte in self.0.as_bytes_mut() {
                std::ptr::write_volatile(byte, 0);
            }
        }
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(***)")
    }
}

/// User, optional domain and secret
#[derive(Clone, Debug)]
pub struct Credential {
    user: String,
    domain: Option<String>,
    secret: SecretString,
}

impl Credential {
    pub fn new(user: impl Into<String>, domain: Option<String>, secret: SecretString) -> Self {
        Self {
            user: user.into(),
            domain,
            secret,
        }
    }

    /// Parse `DOMAIN\user`, `.\user`, `user@domain` or a bare `user`.
    ///
    /// UPN names keep the whole string as the user and leave the domain
    /// empty, which is what `LogonUser` expects for that form.
    pub fn parse(account: &str, secret: SecretString) -> Result<Self> {
        let account = account.trim();
        if account.is_empty() {
            return Err(Error::Credential("user name cannot be empty".into()));
        }
        if account.len() > 256 {
            return Err(Error::Credential("user name exceeds 256 characters".into()));
        }

        if let Some((domain, user)) = account.split_once('\\') {
            if domain.is_empty() || user.is_empty() || user.contains('\\') {
                return Err(Error::Credential(format!("invalid account name '{}'", account)));
            }
            return Ok(Self::new(user, Some(domain.to_string()), secret));
        }

        if account.contains('@') {
            let (user, domain) = account.split_once('@').unwrap_or_default();
            if user.is_empty() || domain.is_empty() {
                return Err(Error::Credential(format!("invalid account name '{}'", account)));
            }
            return Ok(Self::new(account, None, secret));
        }

        Ok(Self::new(account, None, secret))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// `DOMAIN\user` or the bare user, for logs and records
    pub fn account(&self) -> String {
        match &self.domain {
            Some(domain) => format!(r"{}\{}", domain, self.user),
            None => self.user.clone(),
        }
    }
}
