/// Email through the local sendmail.
///
/// Recipients come from the distribution file, one list per alarm name.
/// The message is piped to `sendmail -t -oi`, which reads the recipients
/// from the `To:` and `Bcc:` headers.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::{Distribution, Recipients};
use crate::logging::{self, Subsystem};
use crate::model::AlarmError;
use crate::notify::EmailDispatcher;

pub struct SendmailDispatcher {
    command: String,
    from: String,
    distribution: Distribution,
}

impl SendmailDispatcher {
    pub fn new(command: &str, from: &str, distribution_file: &Path) -> Result<Self, AlarmError> {
        Ok(SendmailDispatcher {
            command: command.to_string(),
            from: from.to_string(),
            distribution: Distribution::load(distribution_file)?,
        })
    }
}

/// RFC 5322 message text. A figure is referenced by path, not attached.
pub fn compose_message(from: &str, recipients: &Recipients, subject: &str, body: &str, attachment: Option<&Path>) -> String {
    let mut out = format!("From: {}\n", from);
    if !recipients.to.is_empty() {
        out.push_str(&format!("To: {}\n", recipients.to.join(", ")));
    }
    if !recipients.bcc.is_empty() {
        out.push_str(&format!("Bcc: {}\n", recipients.bcc.join(", ")));
    }
    out.push_str(&format!("Subject: {}\n", subject.replace('\n', " ")));
    out.push_str("Content-Type: text/plain; charset=utf-8\n\n");
    out.push_str(body);
    if let Some(path) = attachment {
        out.push_str(&format!("\n\nFigure: {}", path.display()));
    }
    out.push('\n');
    out
}

impl EmailDispatcher for SendmailDispatcher {
    fn send(&self, list: &str, subject: &str, body: &str, attachment: Option<&Path>) -> Result<(), AlarmError> {
        let Some(recipients) = self.distribution.recipients(list).filter(|r| !r.is_empty()) else {
            logging::debug(Subsystem::Notify, Some(list), "no recipients, email not sent");
            return Ok(());
        };
        let message = compose_message(&self.from, recipients, subject, body, attachment);

        let mut child = Command::new(&self.command)
            .args(["-t", "-oi"])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| AlarmError::Upstream(format!("{}: {}", self.command, e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes())?;
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(AlarmError::Upstream(format!("{} exited with {}", self.command, status)));
        }
        logging::info(Subsystem::Notify, Some(list), &format!("email '{}' sent", subject));
        Ok(())
    }
}
