//! wuctl
//!
//! Manage Windows Update on local and remote machines: update services,
//! history, agent and installer state, reboots, and ad-hoc scheduled jobs.
//!
//! # Key Features
//!
//! - **Remote by default** - every command takes a list of target hosts
//! - **Alternate credentials** - operations run impersonated, with the
//!   credential taken from the command line or Credential Manager
//! - **Partial failure** - one unreachable host never stops the others
//! - **Retrying activation** - transient DCOM failures are retried on a
//!   fixed budget
//!
//! # Example
//!
//! ```no_run
//! use wuctl::commands::{Targets, Toolkit};
//! use wuctl::config::Settings;
//! use wuctl::platform::Platform;
//! use wuctl::report::SmtpSender;
//! use wuctl::retry::ThreadSleeper;
//! use wuctl::runner::Runner;
//! use wuctl::security::LocalNames;
//!
//! let platform = Platform::native();
//! let mailer = SmtpSender::default();
//! let toolkit = Toolkit {
//!     runner: Runner::new(platform.security.as_ref(), LocalNames::detect()),
//!     agents: platform.agents.as_ref(),
//!     scheduler: platform.scheduler.as_ref(),
//!     transfers: platform.transfers.as_ref(),
//!     credentials: platform.credentials.as_ref(),
//!     mailer: &mailer,
//!     sleeper: &ThreadSleeper,
//!     settings: Settings::default(),
//!     debug: false,
//! };
//!
//! let targets = Targets::new(vec!["srv01".into(), "srv02".into()]);
//! let invocation = toolkit.installer_status(&targets)?;
//! for record in &invocation.records {
//!     println!("{}: busy={}", record.computer_name, record.is_busy);
//! }
//! # Ok::<(), wuctl::Error>(())
//! ```

pub mod bits;
#[cfg(windows)]
pub mod com;
pub mod commands;
pub mod config;
pub mod credential;
pub mod credman;
pub mod error;
pub mod hresult;
pub mod models;
pub mod platform;
pub mod report;
pub mod retry;
pub mod runner;
pub mod security;
pub mod taskschd;
pub mod wua;

pub use commands::{Invocation, Targets, Toolkit};
pub use config::Settings;
pub use credential::{Credential, SecretString};
pub use error::{Error, ErrorCategory, ErrorRecord, Result};
pub use runner::{RemoteOperationResult, Runner, TargetResult};
pub use security::Host;
