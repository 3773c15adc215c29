//! Live tests against the local Windows Update Agent
//! Run with: cargo test --test e2e -- --ignored (elevated prompt on Windows)

#![cfg(windows)]

use wuctl::com::ComGuard;
use wuctl::commands::{Targets, Toolkit};
use wuctl::config::Settings;
use wuctl::platform::Platform;
use wuctl::report::SmtpSender;
use wuctl::retry::ThreadSleeper;
use wuctl::runner::Runner;
use wuctl::security::LocalNames;
use wuctl::taskschd::JobTrigger;
use wuctl::wua::HistoryQuery;

fn with_toolkit(test: impl FnOnce(&Toolkit<'_>)) {
    let _com = ComGuard::init().unwrap();
    let platform = Platform::native();
    let mailer = SmtpSender::default();
    let toolkit = Toolkit {
        runner: Runner::new(platform.security.as_ref(), LocalNames::detect()),
        agents: platform.agents.as_ref(),
        scheduler: platform.scheduler.as_ref(),
        transfers: platform.transfers.as_ref(),
        credentials: platform.credentials.as_ref(),
        mailer: &mailer,
        sleeper: &ThreadSleeper,
        settings: Settings::default(),
        debug: true,
    };
    test(&toolkit);
}

fn local() -> Targets {
    Targets::new(Vec::new())
}

#[test]
#[ignore] // Run manually: cargo test --test e2e -- --ignored
fn test_api_version() {
    with_toolkit(|toolkit| {
        let invocation = toolkit.api_version(&local()).unwrap();
        assert!(invocation.errors.is_empty(), "{:?}", invocation.errors);
        assert!(invocation.records[0].api_version.starts_with(char::is_numeric));
    });
}

#[test]
#[ignore]
fn test_installer_and_reboot_status() {
    with_toolkit(|toolkit| {
        assert_eq!(toolkit.installer_status(&local()).unwrap().records.len(), 1);
        assert_eq!(toolkit.reboot_status(&local(), None, false).unwrap().records.len(), 1);
    });
}

#[test]
#[ignore]
fn test_service_managers_include_windows_update() {
    with_toolkit(|toolkit| {
        let invocation = toolkit.service_managers(&local(), None).unwrap();
        assert!(!invocation.records.is_empty());
    });
}

#[test]
#[ignore]
fn test_history_last() {
    with_toolkit(|toolkit| {
        let query = HistoryQuery {
            last: Some(5),
            ..Default::default()
        };
        let invocation = toolkit.history(&local(), &query).unwrap();
        assert!(invocation.records.len() <= 5);
    });
}

#[test]
#[ignore]
fn test_job_lifecycle() {
    with_toolkit(|toolkit| {
        let name = format!("wuctl-e2e-{}", std::process::id());
        let invoked = toolkit
            .invoke_job(&local(), &name, "Start-Sleep -Seconds 1", JobTrigger::AtStartup, false)
            .unwrap();
        assert!(invoked.errors.is_empty(), "{:?}", invoked.errors);

        let removed = toolkit.remove_job(&local(), &name).unwrap();
        assert!(removed.errors.is_empty(), "{:?}", removed.errors);
    });
}

#[test]
#[ignore]
fn test_credential_store_round_trip() {
    with_toolkit(|toolkit| {
        let target = format!("wuctl-e2e-{}", std::process::id());
        toolkit
            .set_credential(
                &target,
                wuctl::credman::CredentialType::Generic,
                r".\wuctl-test",
                wuctl::SecretString::new("not-a-real-password"),
                wuctl::credman::Persistence::Session,
                None,
            )
            .unwrap();
        assert_eq!(toolkit.list_credentials(Some(target.as_str())).unwrap().len(), 1);
        toolkit
            .remove_credential(&target, wuctl::credman::CredentialType::Generic)
            .unwrap();
    });
}
