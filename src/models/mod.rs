//! Result records, one per command

mod credential;
mod history;
mod job;
mod service;
mod status;

pub use credential::*;
pub use history::*;
pub use job::*;
pub use service::*;
pub use status::*;

use chrono::{DateTime, Utc};

pub(crate) fn display_date(date: &Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub(crate) fn display_option(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}
