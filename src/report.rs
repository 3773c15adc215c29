//! Email reports of command results

use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use tabled::{Table, Tabled};

use crate::config::{ReportSettings, ReportStyle};
use crate::credential::Credential;
use crate::error::ErrorRecord;
use crate::{Error, Result};

/// Delivers a rendered report
#[cfg_attr(test, mockall::automock)]
pub trait ReportSender {
    fn send(&self, settings: &ReportSettings, subject: &str, body: &str) -> Result<()>;
}

/// Render records as a table, or one `Header : value` block per record
pub fn render<T: Tabled>(records: &[T], style: ReportStyle) -> String {
    match style {
        ReportStyle::Table => Table::new(records).to_string(),
        ReportStyle::List => {
            let headers = T::headers();
            let width = headers.iter().map(|h| h.len()).max().unwrap_or(0);
            records
                .iter()
                .map(|record| {
                    headers
                        .iter()
                        .zip(record.fields())
                        .map(|(header, value)| format!("{:<width$} : {}", header, value, width = width))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        }
    }
}

fn body<T: Tabled>(records: &[T], errors: &[ErrorRecord], style: ReportStyle) -> String {
    let mut body = if records.is_empty() {
        "No results.".to_string()
    } else {
        render(records, style)
    };
    if !errors.is_empty() {
        body.push_str("\n\nErrors:\n");
        for error in errors {
            body.push_str(&format!("  {}\n", error));
        }
    }
    body
}

/// Send the results of `command`. Failures come back as an error record and
/// never fail the command itself.
pub fn send_report<T: Tabled>(
    sender: &dyn ReportSender,
    settings: Option<&ReportSettings>,
    command: &str,
    records: &[T],
    errors: &[ErrorRecord],
    debug: bool,
) -> Option<ErrorRecord> {
    let result = settings
        .ok_or_else(|| Error::Config("no report settings configured".into()))
        .and_then(|settings| {
            settings.validate()?;
            let subject = format!("{} - {}", settings.subject, command);
            sender.send(settings, &subject, &body(records, errors, settings.style))
        });

    match result {
        Ok(()) => {
            tracing::info!(command, records = records.len(), "Report sent");
            None
        }
        Err(e) => {
            tracing::warn!(command, error = %e, "Report not sent");
            Some(ErrorRecord::new(None, &e, debug))
        }
    }
}

/// SMTP delivery through `lettre`
#[derive(Debug, Default)]
pub struct SmtpSender {
    credential: Option<Credential>,
}

impl SmtpSender {
    pub fn new(credential: Option<Credential>) -> Self {
        Self { credential }
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| Error::Report(format!("invalid address '{}': {}", address, e)))
}

impl ReportSender for SmtpSender {
    fn send(&self, settings: &ReportSettings, subject: &str, body: &str) -> Result<()> {
        let mut builder = Message::builder().from(mailbox(&settings.from)?).subject(subject);
        for to in &settings.to {
            builder = builder.to(mailbox(to)?);
        }
        let message = builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| Error::Report(e.to_string()))?;

        let mut transport = if settings.use_tls {
            SmtpTransport::starttls_relay(&settings.smtp_server).map_err(|e| Error::Report(e.to_string()))?
        } else {
            SmtpTransport::builder_dangerous(&settings.smtp_server)
        }
        .port(settings.port);

        if let Some(credential) = &self.credential {
            transport = transport.credentials(Credentials::new(
                credential.account(),
                credential.secret().expose().to_string(),
            ));
        }

        transport
            .build()
            .send(&message)
            .map_err(|e| Error::Report(e.to_string()))?;
        Ok(())
    }
}
