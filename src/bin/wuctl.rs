//! wuctl CLI - Windows Update management for local and remote machines

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tabled::{Table, Tabled};

use wuctl::commands::{resolve_credential, Invocation, Targets, Toolkit, PASSWORD_ENV};
use wuctl::config::Settings;
use wuctl::credman::{self, CredentialType, Persistence};
use wuctl::models::CredentialRecord;
use wuctl::platform::Platform;
use wuctl::report::SmtpSender;
use wuctl::retry::ThreadSleeper;
use wuctl::runner::Runner;
use wuctl::security::{Host, LocalNames};
use wuctl::taskschd::JobTrigger;
use wuctl::wua::{AddServiceFlags, AddServiceRequest, HistoryQuery};
use wuctl::{Error, ErrorRecord, Result, SecretString};

#[derive(Parser)]
#[command(name = "wuctl")]
#[command(about = "Manage Windows Update on local and remote machines")]
#[command(version)]
struct Cli {
    /// Target computer (repeatable, defaults to the local machine)
    #[arg(short = 'c', long = "computer-name", global = true)]
    computer_name: Vec<String>,

    /// Alternate account (DOMAIN\user, user@domain or .\user); password from WUCTL_PASSWORD or a prompt
    #[arg(long, global = true)]
    user: Option<String>,

    /// Credential Manager target holding the alternate account
    #[arg(long, global = true)]
    credential: Option<String>,

    /// Mail the result using the report settings
    #[arg(long, global = true)]
    send_report: bool,

    /// Verbose logging and full error chains
    #[arg(long, global = true)]
    debug_mode: bool,

    /// Print records as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Settings file (defaults to WUCTL_CONFIG, then %ProgramData%\wuctl\settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update service registrations
    ServiceManager {
        #[command(subcommand)]
        action: ServiceManagerAction,
    },
    /// Update history
    History {
        /// Newest N entries
        #[arg(long)]
        last: Option<usize>,
        /// Entries at or after this time
        #[arg(long, value_parser = parse_time)]
        since: Option<DateTime<Utc>>,
        /// Title substring
        #[arg(long)]
        title: Option<String>,
    },
    /// Windows Update Agent API version
    ApiVersion,
    /// Whether the installer is busy
    InstallerStatus,
    /// Whether a reboot is pending; optionally schedule or cancel one
    RebootStatus {
        /// Schedule a reboot at this time
        #[arg(long, value_parser = parse_time, conflicts_with = "cancel_reboot")]
        schedule_reboot: Option<DateTime<Utc>>,
        /// Cancel a scheduled reboot
        #[arg(long)]
        cancel_reboot: bool,
    },
    /// Scheduled PowerShell jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Stored credentials on this machine
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
}

#[derive(Subcommand)]
enum ServiceManagerAction {
    /// List registered services
    List {
        /// Only this service id
        #[arg(long)]
        service_id: Option<String>,
    },
    /// Register a service
    Add(AddArgs),
    /// Unregister a service
    Remove {
        /// Service id
        #[arg(long)]
        service_id: String,
    },
}

#[derive(Args)]
struct AddArgs {
    /// Register Microsoft Update
    #[arg(long, conflicts_with_all = ["service_id", "scan_package_name"])]
    microsoft_update: bool,
    /// Service id to register
    #[arg(long, conflicts_with = "scan_package_name")]
    service_id: Option<String>,
    #[arg(long)]
    allow_pending_registration: bool,
    #[arg(long)]
    allow_online_registration: bool,
    #[arg(long)]
    register_with_au: bool,
    /// Authorization cab for the service
    #[arg(long)]
    authorization_cab: Option<String>,
    /// Name for an offline scan package service
    #[arg(long, requires = "scan_package_location")]
    scan_package_name: Option<String>,
    /// Path or http(s) URL of the scan package
    #[arg(long, requires = "scan_package_name")]
    scan_package_location: Option<String>,
}

#[derive(Subcommand)]
enum JobAction {
    /// Register a job running a PowerShell script as SYSTEM
    Invoke {
        /// Task name
        #[arg(long)]
        name: String,
        /// Script text
        #[arg(long, conflicts_with = "script_file", required_unless_present = "script_file")]
        script: Option<String>,
        /// Read the script from a file
        #[arg(long)]
        script_file: Option<PathBuf>,
        /// Start at this time instead of now
        #[arg(long, value_parser = parse_time, conflicts_with = "at_startup")]
        at: Option<DateTime<Utc>>,
        /// Start at boot instead of now
        #[arg(long)]
        at_startup: bool,
        /// Replace an existing task
        #[arg(short, long)]
        force: bool,
    },
    /// Running tasks
    List {
        /// Task name, `prefix*` allowed
        #[arg(long)]
        name: Option<String>,
    },
    /// Stop and delete a task
    Remove {
        /// Task name
        #[arg(long)]
        name: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CredKind {
    Generic,
    DomainPassword,
    DomainCertificate,
}

impl From<CredKind> for CredentialType {
    fn from(kind: CredKind) -> Self {
        match kind {
            CredKind::Generic => CredentialType::Generic,
            CredKind::DomainPassword => CredentialType::DomainPassword,
            CredKind::DomainCertificate => CredentialType::DomainCertificate,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Persist {
    Session,
    LocalMachine,
    Enterprise,
}

impl From<Persist> for Persistence {
    fn from(persist: Persist) -> Self {
        match persist {
            Persist::Session => Persistence::Session,
            Persist::LocalMachine => Persistence::LocalMachine,
            Persist::Enterprise => Persistence::Enterprise,
        }
    }
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Store a credential; password from WUCTL_PASSWORD or a prompt
    Set {
        #[arg(long)]
        target: String,
        /// Account name
        #[arg(long = "account")]
        account: String,
        #[arg(long = "type", value_enum, default_value = "generic")]
        kind: CredKind,
        #[arg(long, value_enum, default_value = "local-machine")]
        persist: Persist,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Show a stored credential (never the secret)
    Get {
        #[arg(long)]
        target: String,
        #[arg(long = "type", value_enum, default_value = "generic")]
        kind: CredKind,
    },
    /// Delete a stored credential
    Remove {
        #[arg(long)]
        target: String,
        #[arg(long = "type", value_enum, default_value = "generic")]
        kind: CredKind,
    },
    /// List stored credentials
    List {
        /// Target name, `prefix*` allowed
        #[arg(long)]
        filter: Option<String>,
    },
}

/// RFC 3339, or local `YYYY-MM-DD[ HH:MM[:SS]]`
fn parse_time(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("invalid time '{}'", value))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|time| time.with_timezone(&Utc))
        .ok_or_else(|| format!("'{}' does not exist in the local time zone", value))
}

fn print_records<T: Tabled + Serialize>(records: &[T], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
    } else if records.is_empty() {
        println!("No results.");
    } else {
        println!("{}", Table::new(records));
    }
    Ok(())
}

fn emit<T: Tabled + Serialize>(invocation: Invocation<T>, json: bool) -> Result<()> {
    print_records(&invocation.records, json)?;
    for error in &invocation.errors {
        eprintln!("{}", error);
    }
    if let Some(error) = &invocation.report_error {
        eprintln!("{}", error);
    }
    Ok(())
}

fn service_request(args: AddArgs) -> Result<AddServiceRequest> {
    if args.microsoft_update {
        return Ok(AddServiceRequest::microsoft_update());
    }
    if let (Some(name), Some(location)) = (args.scan_package_name, args.scan_package_location) {
        return Ok(AddServiceRequest::ScanPackage { name, location });
    }
    let id = args.service_id.ok_or_else(|| {
        Error::Config("one of --microsoft-update, --service-id or --scan-package-name is required".into())
    })?;
    Ok(AddServiceRequest::ServiceId {
        id,
        flags: AddServiceFlags {
            allow_pending_registration: args.allow_pending_registration,
            allow_online_registration: args.allow_online_registration,
            register_with_au: args.register_with_au,
        },
        authorization_cab: args.authorization_cab,
    })
}

/// `WUCTL_PASSWORD`, else an interactive prompt for `account`
fn password(account: Option<&str>) -> Result<Option<SecretString>> {
    if let Ok(value) = std::env::var(PASSWORD_ENV) {
        return Ok(Some(SecretString::new(value)));
    }
    let Some(account) = account else {
        return Ok(None);
    };
    let value = dialoguer::Password::new()
        .with_prompt(format!("Password for {}", account))
        .interact()
        .map_err(|e| Error::Credential(format!("password prompt failed: {}", e)))?;
    Ok(Some(SecretString::new(value)))
}

fn run(cli: Cli) -> Result<()> {
    #[cfg(windows)]
    let _com = wuctl::com::ComGuard::init()?;

    let settings = Settings::load(cli.config.as_deref())?;
    let platform = Platform::native();
    let store = platform.credentials.as_ref();

    let mailer = match settings.report.as_ref().and_then(|r| r.credential_target.as_deref()) {
        Some(target) if cli.send_report => match credman::resolve(store, target) {
            Ok(credential) => SmtpSender::new(Some(credential)),
            Err(e) => {
                tracing::warn!(error = %e, "SMTP credential unavailable, sending without login");
                SmtpSender::default()
            }
        },
        _ => SmtpSender::default(),
    };

    let toolkit = Toolkit {
        runner: Runner::new(platform.security.as_ref(), LocalNames::detect()),
        agents: platform.agents.as_ref(),
        scheduler: platform.scheduler.as_ref(),
        transfers: platform.transfers.as_ref(),
        credentials: store,
        mailer: &mailer,
        sleeper: &ThreadSleeper,
        settings,
        debug: cli.debug_mode,
    };

    let json = cli.json;
    if let Commands::Credential { action } = cli.command {
        return handle_credential(&toolkit, action, json);
    }

    let secret = match (&cli.user, &cli.credential) {
        (Some(user), None) => password(Some(user))?,
        _ => None,
    };
    let credential = resolve_credential(store, cli.user.as_deref(), cli.credential.as_deref(), secret)?;
    let targets = Targets::new(cli.computer_name.into_iter().map(Host::from).collect())
        .with_credential(credential)
        .with_report(cli.send_report);

    match cli.command {
        Commands::ServiceManager { action } => match action {
            ServiceManagerAction::List { service_id } => {
                emit(toolkit.service_managers(&targets, service_id.as_deref())?, json)
            }
            ServiceManagerAction::Add(args) => {
                emit(toolkit.add_service_manager(&targets, &service_request(args)?)?, json)
            }
            ServiceManagerAction::Remove { service_id } => {
                emit(toolkit.remove_service_manager(&targets, &service_id)?, json)
            }
        },
        Commands::History { last, since, title } => {
            let query = HistoryQuery {
                last,
                since,
                title_contains: title,
            };
            emit(toolkit.history(&targets, &query)?, json)
        }
        Commands::ApiVersion => emit(toolkit.api_version(&targets)?, json),
        Commands::InstallerStatus => emit(toolkit.installer_status(&targets)?, json),
        Commands::RebootStatus {
            schedule_reboot,
            cancel_reboot,
        } => emit(toolkit.reboot_status(&targets, schedule_reboot, cancel_reboot)?, json),
        Commands::Job { action } => match action {
            JobAction::Invoke {
                name,
                script,
                script_file,
                at,
                at_startup,
                force,
            } => {
                let script = match (script, script_file) {
                    (Some(script), _) => script,
                    (None, Some(path)) => std::fs::read_to_string(path)?,
                    (None, None) => return Err(Error::Config("--script or --script-file is required".into())),
                };
                let trigger = match (at, at_startup) {
                    (Some(time), _) => JobTrigger::At(time),
                    (None, true) => JobTrigger::AtStartup,
                    (None, false) => JobTrigger::RunNow,
                };
                emit(toolkit.invoke_job(&targets, &name, &script, trigger, force)?, json)
            }
            JobAction::List { name } => emit(toolkit.running_jobs(&targets, name.as_deref())?, json),
            JobAction::Remove { name } => emit(toolkit.remove_job(&targets, &name)?, json),
        },
        Commands::Credential { .. } => Ok(()),
    }
}

fn handle_credential(toolkit: &Toolkit<'_>, action: CredentialAction, json: bool) -> Result<()> {
    let records: Vec<CredentialRecord> = match action {
        CredentialAction::Set {
            target,
            account,
            kind,
            persist,
            comment,
        } => {
            let secret = password(Some(&account))?
                .ok_or_else(|| Error::Config(format!("{} must hold the secret to store", PASSWORD_ENV)))?;
            vec![toolkit.set_credential(&target, kind.into(), &account, secret, persist.into(), comment.as_deref())?]
        }
        CredentialAction::Get { target, kind } => vec![toolkit.get_credential(&target, kind.into())?],
        CredentialAction::Remove { target, kind } => {
            toolkit.remove_credential(&target, kind.into())?;
            println!("Credential removed: {}", target);
            return Ok(());
        }
        CredentialAction::List { filter } => toolkit.list_credentials(filter.as_deref())?,
    };
    print_records(&records, json)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug_mode { "wuctl=debug" } else { "wuctl=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let debug = cli.debug_mode;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", ErrorRecord::new(None, &e, debug));
            ExitCode::FAILURE
        }
    }
}
