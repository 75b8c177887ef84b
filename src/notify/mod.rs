/// Outbound notifications.
///
/// An alarm run talks to four collaborators: the heartbeat monitor, email,
/// chat, and a figure renderer. Each is a trait so the alarms can be run
/// against real services, against the log (`--test`), or against a recorder
/// in tests. Failures to notify are logged by the dispatcher and never abort
/// a run.
///
/// Submodules:
/// - `heartbeat`: Icinga2 passive check results.
/// - `email`: sendmail dispatch to the distribution lists.
/// - `mattermost`: chat posts with optional file upload.
/// - `figures`: figure requests handed to an external plotting job.

pub mod email;
pub mod figures;
pub mod heartbeat;
pub mod mattermost;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::alert::{FigureRequest, HeartbeatState};
use crate::config::ServiceEnv;
use crate::logging::{self, Subsystem};
use crate::model::AlarmError;

pub trait HeartbeatReporter {
    fn report(&self, service: &str, state: HeartbeatState, message: &str) -> Result<(), AlarmError>;
}

pub trait EmailDispatcher {
    /// Sends to the recipients of distribution list `list`.
    fn send(&self, list: &str, subject: &str, body: &str, attachment: Option<&Path>) -> Result<(), AlarmError>;
}

pub trait ChatPoster {
    fn post(&self, channel_id: Option<&str>, subject: &str, body: &str, attachment: Option<&Path>)
    -> Result<(), AlarmError>;
}

/// Result of a figure request. Only `Rendered` yields an attachment.
#[derive(Debug, Clone, PartialEq)]
pub enum FigureOutcome {
    Rendered(PathBuf),
    Failed(String),
    Skipped,
}

impl FigureOutcome {
    pub fn attachment(&self) -> Option<&Path> {
        match self {
            FigureOutcome::Rendered(path) => Some(path.as_path()),
            _ => None,
        }
    }
}

pub trait FigureRenderer {
    fn render(&self, alarm_name: &str, request: &FigureRequest) -> FigureOutcome;
}

/// The collaborators an alarm run reports through.
pub struct Notifiers {
    pub heartbeat: Box<dyn HeartbeatReporter>,
    pub email: Box<dyn EmailDispatcher>,
    pub chat: Box<dyn ChatPoster>,
    pub figures: Box<dyn FigureRenderer>,
}

impl Notifiers {
    /// Everything goes to the log. Used by `--test`.
    pub fn log_only() -> Self {
        Notifiers {
            heartbeat: Box::new(LogOnly),
            email: Box::new(LogOnly),
            chat: Box::new(LogOnly),
            figures: Box::new(LogOnly),
        }
    }

    /// Real services where configured, the log otherwise.
    pub fn from_env(env: &ServiceEnv) -> Result<Self, AlarmError> {
        let heartbeat: Box<dyn HeartbeatReporter> = match &env.icinga_url {
            Some(url) => Box::new(heartbeat::IcingaReporter::new(
                url,
                &env.icinga_username,
                &env.icinga_password,
                &env.icinga_host_name,
            )?),
            None => Box::new(LogOnly),
        };
        let chat: Box<dyn ChatPoster> = match (&env.mattermost_url, &env.mattermost_token) {
            (Some(url), Some(token)) => Box::new(mattermost::MattermostPoster::new(
                url,
                token,
                env.mattermost_channel_id.clone(),
            )?),
            _ => Box::new(LogOnly),
        };
        let email = email::SendmailDispatcher::new(&env.sendmail, &env.mail_from, &env.distribution_file)?;
        Ok(Notifiers {
            heartbeat,
            email: Box::new(email),
            chat,
            figures: Box::new(figures::RequestFileRenderer::new(&env.figure_dir)),
        })
    }
}

// ---------------------------------------------------------------------------
// Log-only collaborators
// ---------------------------------------------------------------------------

/// Logs every notification instead of sending it.
pub struct LogOnly;

impl HeartbeatReporter for LogOnly {
    fn report(&self, service: &str, state: HeartbeatState, message: &str) -> Result<(), AlarmError> {
        logging::info(Subsystem::Notify, Some(service), &format!("heartbeat {}: {}", state, message));
        Ok(())
    }
}

impl EmailDispatcher for LogOnly {
    fn send(&self, list: &str, subject: &str, body: &str, _attachment: Option<&Path>) -> Result<(), AlarmError> {
        logging::info(Subsystem::Notify, Some(list), &format!("email '{}'\n{}", subject, body));
        Ok(())
    }
}

impl ChatPoster for LogOnly {
    fn post(&self, channel_id: Option<&str>, subject: &str, _body: &str, _attachment: Option<&Path>)
    -> Result<(), AlarmError> {
        logging::info(Subsystem::Notify, channel_id, &format!("chat post '{}'", subject));
        Ok(())
    }
}

impl FigureRenderer for LogOnly {
    fn render(&self, alarm_name: &str, request: &FigureRequest) -> FigureOutcome {
        logging::info(
            Subsystem::Notify,
            Some(alarm_name),
            &format!("figure {} requested", request.kind.as_str()),
        );
        FigureOutcome::Skipped
    }
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

/// A notification captured by `Recorder`.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Heartbeat {
        service: String,
        state: HeartbeatState,
        message: String,
    },
    Email {
        list: String,
        subject: String,
        body: String,
    },
    Chat {
        channel_id: Option<String>,
        subject: String,
        body: String,
    },
    Figure(FigureRequest),
}

/// Captures notifications in memory. Clones share one log, so a clone can
/// be handed to `Notifiers` and the original inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    sent: Arc<Mutex<Vec<Sent>>>,
    /// Outcome returned for figure requests.
    pub figure_outcome: Option<FigureOutcome>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifiers(&self) -> Notifiers {
        Notifiers {
            heartbeat: Box::new(self.clone()),
            email: Box::new(self.clone()),
            chat: Box::new(self.clone()),
            figures: Box::new(self.clone()),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn heartbeats(&self) -> Vec<(HeartbeatState, String)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Heartbeat { state, message, .. } => Some((state, message)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, item: Sent) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(item);
        }
    }
}

impl HeartbeatReporter for Recorder {
    fn report(&self, service: &str, state: HeartbeatState, message: &str) -> Result<(), AlarmError> {
        self.push(Sent::Heartbeat {
            service: service.to_string(),
            state,
            message: message.to_string(),
        });
        Ok(())
    }
}

impl EmailDispatcher for Recorder {
    fn send(&self, list: &str, subject: &str, body: &str, _attachment: Option<&Path>) -> Result<(), AlarmError> {
        self.push(Sent::Email {
            list: list.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

impl ChatPoster for Recorder {
    fn post(&self, channel_id: Option<&str>, subject: &str, body: &str, _attachment: Option<&Path>)
    -> Result<(), AlarmError> {
        self.push(Sent::Chat {
            channel_id: channel_id.map(str::to_string),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

impl FigureRenderer for Recorder {
    fn render(&self, _alarm_name: &str, request: &FigureRequest) -> FigureOutcome {
        self.push(Sent::Figure(request.clone()));
        self.figure_outcome.clone().unwrap_or(FigureOutcome::Skipped)
    }
}
