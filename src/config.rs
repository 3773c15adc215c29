//! Settings file with builder pattern

use std::path::{Path, PathBuf};
use std::time::Duration;

use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};

use crate::bits::DownloadOptions;

/// Environment variable naming the settings file
pub const CONFIG_ENV: &str = "WUCTL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub report: Option<ReportSettings>,
    /// Where scan packages fetched over http(s) are stored
    pub download_directory: Option<PathBuf>,
    pub transfer_timeout_secs: u64,
    pub transfer_poll_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            report: None,
            download_directory: None,
            transfer_timeout_secs: 30 * 60,
            transfer_poll_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStyle {
    #[default]
    Table,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub smtp_server: String,
    pub port: u16,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub style: ReportStyle,
    pub use_tls: bool,
    /// Credential Manager target holding the SMTP login
    pub credential_target: Option<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            port: 25,
            from: String::new(),
            to: Vec::new(),
            subject: "Windows Update report".to_string(),
            style: ReportStyle::Table,
            use_tls: false,
            credential_target: None,
        }
    }
}

/// `%ProgramData%\wuctl\settings.json`
pub fn default_path() -> PathBuf {
    let base = std::env::var_os("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
    base.join("wuctl").join("settings.json")
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Load from `explicit`, else `WUCTL_CONFIG`, else the default path.
    /// Only a missing default file falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> crate::Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_from(explicit, from_env.as_deref(), &default_path())
    }

    pub fn load_from(explicit: Option<&Path>, from_env: Option<&Path>, default: &Path) -> crate::Result<Self> {
        let (path, required) = match explicit.or(from_env) {
            Some(path) => (path, true),
            None => (default, false),
        };

        if !path.exists() {
            if required {
                return Err(crate::Error::Config(format!("settings file not found: {}", path.display())));
            }
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)
            .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), "Settings loaded");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.transfer_timeout_secs == 0 {
            return Err(crate::Error::Config("transfer_timeout_secs must be greater than 0".into()));
        }
        if self.transfer_poll_ms == 0 {
            return Err(crate::Error::Config("transfer_poll_ms must be greater than 0".into()));
        }
        if let Some(report) = &self.report {
            report.validate()?;
        }
        Ok(())
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            poll_interval: Duration::from_millis(self.transfer_poll_ms),
            timeout: Duration::from_secs(self.transfer_timeout_secs),
        }
    }

    pub fn download_directory(&self) -> PathBuf {
        self.download_directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("wuctl"))
    }
}

fn check_address(field: &str, value: &str) -> crate::Result<()> {
    value
        .parse::<Mailbox>()
        .map(|_| ())
        .map_err(|e| crate::Error::Config(format!("{} is not an address: '{}' ({})", field, value, e)))
}

impl ReportSettings {
    pub fn validate(&self) -> crate::Result<()> {
        if self.smtp_server.trim().is_empty() {
            return Err(crate::Error::Config("report.smtp_server cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(crate::Error::Config("report.port cannot be 0".into()));
        }
        check_address("report.from", &self.from)?;
        if self.to.is_empty() {
            return Err(crate::Error::Config("report.to needs at least one recipient".into()));
        }
        for to in &self.to {
            check_address("report.to", to)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn report(mut self, report: ReportSettings) -> Self {
        self.settings.report = Some(report);
        self
    }

    pub fn download_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.download_directory = Some(dir.into());
        self
    }

    pub fn transfer_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.transfer_timeout_secs = secs;
        self
    }

    pub fn transfer_poll_ms(mut self, ms: u64) -> Self {
        self.settings.transfer_poll_ms = ms;
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }

    pub fn build_validated(self) -> crate::Result<Settings> {
        let settings = self.build();
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ReportSettings {
        ReportSettings {
            smtp_server: "smtp.contoso.com".into(),
            from: "wsus@contoso.com".into(),
            to: vec!["admins@contoso.com".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_builder() {
        let settings = Settings::builder()
            .report(report())
            .transfer_timeout_secs(60)
            .download_directory(r"D:\cabs")
            .build();

        assert_eq!(settings.transfer_timeout_secs, 60);
        assert_eq!(settings.report.as_ref().map(|r| r.port), Some(25));
        assert_eq!(settings.download_directory(), PathBuf::from(r"D:\cabs"));
        assert_eq!(settings.download_options().timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_settings_validation() {
        assert!(Settings::default().validate().is_ok());
        assert!(Settings::builder().transfer_poll_ms(0).build_validated().is_err());

        let mut bad = report();
        bad.from = "nobody".into();
        assert!(Settings::builder().report(bad).build_validated().is_err());

        let mut bad = report();
        bad.to = vec!["ops@contoso.com".into(), "a b@contoso.com".into()];
        assert!(Settings::builder().report(bad).build_validated().is_err());

        let mut bad = report();
        bad.to.clear();
        assert!(Settings::builder().report(bad).build_validated().is_err());

        assert!(Settings::builder().report(report()).build_validated().is_ok());

        let mut named = report();
        named.from = "Patch Reports <wsus@contoso.com>".into();
        assert!(Settings::builder().report(named).build_validated().is_ok());
    }

    #[test]
    fn test_missing_default_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(None, None, &dir.path().join("settings.json")).unwrap();
        assert!(settings.report.is_none());
        assert_eq!(settings.transfer_poll_ms, 1000);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = Settings::load_from(Some(&missing), None, &dir.path().join("settings.json")).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        assert!(err.is_terminating());
    }

    #[test]
    fn test_explicit_path_wins_over_env() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.json");
        let env = dir.path().join("env.json");
        Settings::builder().transfer_poll_ms(5).build().save(&explicit).unwrap();
        Settings::builder().transfer_poll_ms(7).build().save(&env).unwrap();

        let settings = Settings::load_from(Some(&explicit), Some(&env), &dir.path().join("x.json")).unwrap();
        assert_eq!(settings.transfer_poll_ms, 5);

        let settings = Settings::load_from(None, Some(&env), &dir.path().join("x.json")).unwrap();
        assert_eq!(settings.transfer_poll_ms, 7);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "report": { "smtp_server": "mail", "from": "wsus@contoso.com", "to": ["ops@contoso.com"], "style": "List" } }"#,
        )
        .unwrap();

        let settings = Settings::load_from(Some(&path), None, &path).unwrap();
        let report = settings.report.unwrap();
        assert_eq!(report.style, ReportStyle::List);
        assert_eq!(report.port, 25);
        assert_eq!(settings.transfer_timeout_secs, 1800);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Settings::load_from(Some(&path), None, &path),
            Err(crate::Error::Config(_))
        ));
    }
}
