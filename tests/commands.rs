//! Commands over fake backends

mod common;

use chrono::{Duration, Utc};

use common::*;
use wuctl::commands::{Targets, REBOOT_JOB_NAME};
use wuctl::credential::{Credential, SecretString};
use wuctl::credman::{CredentialStore, CredentialType, Persistence};
use wuctl::models::ServiceAction;
use wuctl::taskschd::{self, JobTrigger};
use wuctl::wua::{AddServiceRequest, HistoryQuery, MICROSOFT_UPDATE_SERVICE_ID};
use wuctl::{Error, ErrorCategory};

fn targets(names: &[&str]) -> Targets {
    Targets::new(hosts(names))
}

#[test]
fn test_installer_status_partial_failure() {
    let mut fixture = Fixture::default();
    fixture.agents.unreachable = vec!["srv02".into()];
    fixture.agents.state.busy = true;
    let toolkit = fixture.toolkit();

    let invocation = toolkit.installer_status(&targets(&["srv01", "srv02", "srv03"])).unwrap();

    let names: Vec<_> = invocation.records.iter().map(|r| r.computer_name.as_str()).collect();
    assert_eq!(names, vec!["srv01", "srv03"]);
    assert!(invocation.records.iter().all(|r| r.is_busy));
    assert_eq!(invocation.errors.len(), 1);
    assert_eq!(invocation.errors[0].target.as_deref(), Some("srv02"));
    assert_eq!(invocation.errors[0].category, ErrorCategory::FatalApi);
    assert!(invocation.errors[0].exception.is_none());

    assert_eq!(fixture.agents.connects_to("srv01"), 1);
    assert_eq!(fixture.agents.connects_to("srv02"), 3);
    assert_eq!(
        *fixture.sleeper.waits.borrow(),
        vec![std::time::Duration::from_millis(500); 2]
    );
}

#[test]
fn test_agent_activation_recovers_after_transient_failure() {
    let fixture = Fixture::default();
    fixture.agents.failures.borrow_mut().push(rpc_unavailable());
    let toolkit = fixture.toolkit();

    let invocation = toolkit.api_version(&targets(&["srv01"])).unwrap();

    assert!(invocation.errors.is_empty());
    assert_eq!(invocation.records.len(), 1);
    assert_eq!(fixture.agents.connects_to("srv01"), 2);
    assert_eq!(fixture.sleeper.waits.borrow().len(), 1);
}

#[test]
fn test_agent_activation_fatal_code_not_retried() {
    let fixture = Fixture::default();
    fixture.agents.failures.borrow_mut().push(access_denied());
    let toolkit = fixture.toolkit();

    let invocation = toolkit.installer_status(&targets(&["srv01"])).unwrap();

    assert!(invocation.records.is_empty());
    assert_eq!(invocation.errors[0].category, ErrorCategory::FatalApi);
    assert_eq!(fixture.agents.connects_to("srv01"), 1);
    assert!(fixture.sleeper.waits.borrow().is_empty());
}

#[test]
fn test_not_elevated_stops_before_any_target() {
    let fixture = Fixture::default();
    fixture.security.caller_is_admin.set(false);
    let toolkit = fixture.toolkit();

    let result = toolkit.api_version(&targets(&["srv01"]));

    assert!(matches!(result, Err(Error::NotElevated)));
    assert!(fixture.agents.connects.borrow().is_empty());
}

#[test]
fn test_agent_connects_with_locality() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();

    let invocation = toolkit.api_version(&targets(&["localhost", "srv01"])).unwrap();

    assert_eq!(invocation.records[0].api_version, "8.0");
    assert_eq!(
        *fixture.agents.connects.borrow(),
        vec![("localhost".to_string(), true), ("srv01".to_string(), false)]
    );
}

#[test]
fn test_default_target_is_local() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();

    let invocation = toolkit.reboot_status(&Targets::new(Vec::new()), None, false).unwrap();

    assert_eq!(invocation.records.len(), 1);
    assert_eq!(invocation.records[0].computer_name, "localhost");
    assert!(invocation.records[0].reboot_scheduled.is_none());
}

#[test]
fn test_service_manager_list_filter() {
    let mut fixture = Fixture::default();
    fixture.agents.state.services = vec![
        service("9482f4b4-e343-43b6-b170-9a65bc822c77", "Windows Update"),
        service(MICROSOFT_UPDATE_SERVICE_ID, "Microsoft Update"),
    ];
    let toolkit = fixture.toolkit();

    let all = toolkit.service_managers(&targets(&["localhost"]), None).unwrap();
    assert_eq!(all.records.len(), 2);

    let filtered = toolkit
        .service_managers(&targets(&["localhost"]), Some(MICROSOFT_UPDATE_SERVICE_ID.to_uppercase().as_str()))
        .unwrap();
    assert_eq!(filtered.records.len(), 1);
    assert_eq!(filtered.records[0].name, "Microsoft Update");
}

#[test]
fn test_add_service_local_calls_agent() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();

    let invocation = toolkit
        .add_service_manager(&targets(&["localhost"]), &AddServiceRequest::microsoft_update())
        .unwrap();

    let record = &invocation.records[0];
    assert_eq!(record.action, ServiceAction::Added);
    assert_eq!(record.name.as_deref(), Some("Microsoft Update"));
    assert!(record.job.is_none());
    assert_eq!(fixture.agents.state.added.borrow().len(), 1);
    assert!(fixture.scheduler.connects.borrow().is_empty());
}

#[test]
fn test_remove_service_remote_uses_job() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();
    let cred = Credential::parse(r"CONTOSO\wuadmin", SecretString::new("pw")).unwrap();

    let invocation = toolkit
        .remove_service_manager(&targets(&["srv01"]).with_credential(Some(cred)), MICROSOFT_UPDATE_SERVICE_ID)
        .unwrap();

    assert!(invocation.errors.is_empty());
    let record = &invocation.records[0];
    assert_eq!(record.action, ServiceAction::Removed);
    let job_name = record.job.clone().unwrap();
    assert!(job_name.starts_with("wuctl-remove-service-"));

    // Nothing removed through DCOM
    assert!(fixture.agents.state.removed.borrow().is_empty());

    let tasks = fixture.scheduler.folder.tasks.borrow();
    let job = &tasks[&job_name];
    assert_eq!(job.trigger, JobTrigger::RunNow);
    assert_eq!(job.run_as, "SYSTEM");
    let expected = taskschd::encode_script(&taskschd::remove_service_script(MICROSOFT_UPDATE_SERVICE_ID));
    assert!(job.arguments.ends_with(&expected));
    assert_eq!(*fixture.scheduler.folder.started.borrow(), vec![job_name.clone()]);

    let connects = fixture.scheduler.connects.borrow();
    assert_eq!(connects[0], ("srv01".to_string(), false, Some(r"CONTOSO\wuadmin".to_string())));
    assert_eq!(fixture.security.active(), 0);
}

#[test]
fn test_remote_service_jobs_do_not_accumulate() {
    let fixture = Fixture::default();
    fixture.scheduler.folder.tasks.borrow_mut().insert(
        "PSWindowsUpdate".into(),
        taskschd::JobDefinition::powershell("PSWindowsUpdate", "Get-Date", JobTrigger::AtStartup),
    );
    let toolkit = fixture.toolkit();
    let t = targets(&["srv01"]);

    let first = toolkit.remove_service_manager(&t, MICROSOFT_UPDATE_SERVICE_ID).unwrap();
    let second = toolkit.remove_service_manager(&t, MICROSOFT_UPDATE_SERVICE_ID).unwrap();
    toolkit
        .add_service_manager(&t, &AddServiceRequest::microsoft_update())
        .unwrap();

    let first_job = first.records[0].job.clone().unwrap();
    let second_job = second.records[0].job.clone().unwrap();
    assert_ne!(first_job, second_job);

    let tasks = fixture.scheduler.folder.tasks.borrow();
    let remove_jobs: Vec<_> = tasks.keys().filter(|n| n.starts_with("wuctl-remove-service-")).collect();
    assert_eq!(remove_jobs, vec![&second_job]);
    assert_eq!(tasks.keys().filter(|n| n.starts_with("wuctl-add-service-")).count(), 1);
    assert!(tasks.contains_key("PSWindowsUpdate"));
}

#[test]
fn test_remove_service_local_calls_agent() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();

    let invocation = toolkit.remove_service_manager(&targets(&["."]), "abc").unwrap();

    assert!(invocation.records[0].job.is_none());
    assert_eq!(*fixture.agents.state.removed.borrow(), vec!["abc".to_string()]);
}

#[test]
fn test_remote_http_scan_package_is_rejected() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();
    let request = AddServiceRequest::ScanPackage {
        name: "Offline".into(),
        location: "https://download.example.com/wsusscn2.cab".into(),
    };

    let invocation = toolkit.add_service_manager(&targets(&["srv01"]), &request).unwrap();

    assert!(invocation.records.is_empty());
    assert_eq!(invocation.errors.len(), 1);
    assert!(fixture.transfers.urls.borrow().is_empty());
}

#[test]
fn test_local_http_scan_package_is_downloaded_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut fixture = Fixture::default();
    fixture.settings = wuctl::Settings::builder()
        .download_directory(dir.path())
        .transfer_poll_ms(10)
        .build();
    let toolkit = fixture.toolkit();
    let request = AddServiceRequest::ScanPackage {
        name: "Offline".into(),
        location: "https://download.example.com/wsusscn2.cab".into(),
    };

    let invocation = toolkit.add_service_manager(&targets(&["localhost"]), &request).unwrap();

    assert!(invocation.errors.is_empty(), "{:?}", invocation.errors);
    let expected = dir.path().join("wsusscn2.cab");
    assert!(expected.exists());
    match &fixture.agents.state.added.borrow()[0] {
        AddServiceRequest::ScanPackage { location, .. } => {
            assert_eq!(location, &expected.to_string_lossy());
        }
        other => panic!("unexpected request: {:?}", other),
    }
    assert_eq!(fixture.sleeper.waits.borrow().len(), 1);
}

#[test]
fn test_history_last_and_kb() {
    let mut fixture = Fixture::default();
    fixture.agents.state.history = vec![
        history_entry(1, "Security Intelligence Update (KB2267602)"),
        history_entry(2, "2024-05 Cumulative Update (KB5037768)"),
        history_entry(3, "Feature update"),
    ];
    let toolkit = fixture.toolkit();

    let query = HistoryQuery {
        last: Some(2),
        ..Default::default()
    };
    let invocation = toolkit.history(&targets(&["localhost"]), &query).unwrap();

    assert_eq!(invocation.records.len(), 2);
    assert_eq!(invocation.records[0].kb.as_deref(), Some("KB2267602"));
    assert_eq!(invocation.records[1].result, "Succeeded");
}

#[test]
fn test_history_last_zero_is_empty() {
    let mut fixture = Fixture::default();
    fixture.agents.state.history = vec![
        history_entry(1, "Security Intelligence Update (KB2267602)"),
        history_entry(2, "2024-05 Cumulative Update (KB5037768)"),
        history_entry(3, "Feature update"),
    ];
    let toolkit = fixture.toolkit();

    let query = HistoryQuery {
        last: Some(0),
        ..Default::default()
    };
    let invocation = toolkit.history(&targets(&["localhost"]), &query).unwrap();

    assert!(invocation.records.is_empty());
    assert!(invocation.errors.is_empty());
}

#[test]
fn test_invoke_job_refuses_existing_without_force() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();
    let t = targets(&["srv01"]);

    let first = toolkit.invoke_job(&t, "PSWindowsUpdate", "Get-Date", JobTrigger::AtStartup, false).unwrap();
    assert_eq!(first.records[0].action, "Registered");
    assert!(!first.records[0].started);

    let second = toolkit.invoke_job(&t, "PSWindowsUpdate", "Get-Date", JobTrigger::AtStartup, false).unwrap();
    assert!(second.records.is_empty());
    assert!(second.errors[0].message.contains("already exists"));

    let forced = toolkit.invoke_job(&t, "PSWindowsUpdate", "Get-Date", JobTrigger::RunNow, true).unwrap();
    assert_eq!(forced.records[0].action, "Replaced");
    assert!(forced.records[0].started);
}

#[test]
fn test_job_list_and_remove() {
    let fixture = Fixture::default();
    fixture.scheduler.folder.running.borrow_mut().extend(["wuctl-a".to_string(), "Other".to_string()]);
    let toolkit = fixture.toolkit();
    let t = targets(&["srv01"]);
    toolkit.invoke_job(&t, "wuctl-a", "Get-Date", JobTrigger::RunNow, false).unwrap();

    let listed = toolkit.running_jobs(&t, Some("wuctl-*")).unwrap();
    assert_eq!(listed.records.len(), 1);
    assert_eq!(listed.records[0].engine_pid, 4242);

    let removed = toolkit.remove_job(&t, "wuctl-a").unwrap();
    assert_eq!(removed.records[0].action, "Removed");
    assert_eq!(*fixture.scheduler.folder.stopped.borrow(), vec!["wuctl-a".to_string()]);
    assert!(fixture.scheduler.folder.tasks.borrow().is_empty());

    let missing = toolkit.remove_job(&t, "wuctl-a").unwrap();
    assert!(missing.errors[0].message.contains("not found"));
}

#[test]
fn test_reboot_schedule_and_cancel() {
    let mut fixture = Fixture::default();
    fixture.agents.state.reboot_required = true;
    let toolkit = fixture.toolkit();
    let t = targets(&["srv01"]);
    let at = Utc::now() + Duration::hours(2);

    let scheduled = toolkit.reboot_status(&t, Some(at), false).unwrap();
    assert!(scheduled.records[0].reboot_required);
    assert_eq!(scheduled.records[0].reboot_scheduled, Some(at));
    {
        let tasks = fixture.scheduler.folder.tasks.borrow();
        let job = &tasks[REBOOT_JOB_NAME];
        assert_eq!(job.trigger, JobTrigger::At(at));
        assert_eq!(job.command, "shutdown.exe");
    }

    let cancelled = toolkit.reboot_status(&t, None, true).unwrap();
    assert_eq!(cancelled.records[0].cancelled_job.as_deref(), Some(REBOOT_JOB_NAME));
    assert!(fixture.scheduler.folder.tasks.borrow().is_empty());

    let nothing = toolkit.reboot_status(&t, None, true).unwrap();
    assert!(nothing.errors.is_empty());
    assert!(nothing.records[0].cancelled_job.is_none());
}

#[test]
fn test_reboot_in_the_past_is_rejected() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();

    let result = toolkit.reboot_status(&targets(&["srv01"]), Some(Utc::now() - Duration::hours(1)), false);

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_scheduler_retries_transient_failures() {
    let mut fixture = Fixture::default();
    fixture.scheduler = FakeScheduler::failing_with(vec![rpc_unavailable(), rpc_unavailable()]);
    let toolkit = fixture.toolkit();

    let invocation = toolkit.running_jobs(&targets(&["srv01"]), None).unwrap();

    assert!(invocation.errors.is_empty());
    assert_eq!(fixture.scheduler.connects.borrow().len(), 3);
    assert_eq!(fixture.sleeper.waits.borrow().len(), 2);
}

#[test]
fn test_report_is_sent() {
    let mut fixture = Fixture::default();
    fixture.settings.report = Some(report_settings());
    fixture.agents.unreachable = vec!["srv02".into()];
    let toolkit = fixture.toolkit();

    let invocation = toolkit
        .installer_status(&targets(&["srv01", "srv02"]).with_report(true))
        .unwrap();

    assert!(invocation.report_error.is_none());
    let sent = fixture.mailer.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "Windows Update report - installer-status");
    assert!(sent[0].1.contains("srv01"));
    assert!(sent[0].1.contains("srv02"));
}

#[test]
fn test_report_failure_does_not_fail_command() {
    let mut fixture = Fixture::default();
    fixture.settings.report = Some(report_settings());
    fixture.mailer.fail.set(true);
    let toolkit = fixture.toolkit();

    let invocation = toolkit.installer_status(&targets(&["srv01"]).with_report(true)).unwrap();

    assert_eq!(invocation.records.len(), 1);
    assert!(invocation.report_error.is_some());
    assert!(!invocation.is_clean());
}

#[test]
fn test_credential_round_trip() {
    let fixture = Fixture::default();
    let toolkit = fixture.toolkit();

    let record = toolkit
        .set_credential(
            "wuctl:srv01",
            CredentialType::Generic,
            r"CONTOSO\wuadmin",
            SecretString::new("pw"),
            Persistence::LocalMachine,
            Some("patching"),
        )
        .unwrap();
    assert_eq!(record.computer_name, LOCAL_HOST_NAME);
    assert_eq!(record.user_name.as_deref(), Some(r"CONTOSO\wuadmin"));

    let stored = fixture.store.read("wuctl:srv01", CredentialType::Generic).unwrap().unwrap();
    assert_eq!(stored.secret.unwrap().expose(), "pw");

    assert_eq!(toolkit.list_credentials(Some("wuctl:*")).unwrap().len(), 1);
    toolkit.remove_credential("wuctl:srv01", CredentialType::Generic).unwrap();
    assert!(matches!(
        toolkit.get_credential("wuctl:srv01", CredentialType::Generic),
        Err(Error::CredentialNotFound(_))
    ));
    // Idempotent
    toolkit.remove_credential("wuctl:srv01", CredentialType::Generic).unwrap();
}
