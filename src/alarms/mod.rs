/// The alarm runners.
///
/// Every alarm follows one contract: wait out the data latency, run its
/// detector to an `AlarmOutcome`, push each alert through figure, email and
/// chat, and finish with exactly one heartbeat. A detector error still ends
/// in a heartbeat (UNKNOWN) and an email to the `Error` list.
///
/// Submodules:
/// - `infrasound`: airwave detection on a small infrasound array.
/// - `tremor`: envelope-correlation tremor location and activity level.
/// - `swarm`: earthquake swarm clustering near Holocene volcanoes.

pub mod infrasound;
pub mod swarm;
pub mod tremor;

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::alert::messages::{LocalZone, state_prefix};
use crate::alert::{AlarmOutcome, Alert, HeartbeatState};
use crate::config::{AlarmConfig, ERROR_LIST};
use crate::ingest::{EventSource, WaveformSource};
use crate::logging::{self, Subsystem};
use crate::notify::{FigureOutcome, Notifiers};

/// Everything an alarm run reads from or reports to.
pub struct AlarmContext<'a> {
    pub waveforms: &'a dyn WaveformSource,
    pub events: &'a dyn EventSource,
    pub notifiers: Notifiers,
    pub zone: LocalZone,
    /// Skips the latency sleep (replays and `--test`).
    pub skip_latency: bool,
}

/// What a run ended with.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: HeartbeatState,
    pub message: String,
    pub alerts_sent: usize,
    pub error: Option<String>,
}

/// Runs one alarm at `t0`.
pub fn run_alarm(config: &AlarmConfig, t0: DateTime<Utc>, ctx: &AlarmContext) -> RunReport {
    let name = config.alarm_name();
    logging::info(
        Subsystem::System,
        Some(name),
        &format!("{} alarm for {}", config.alarm_type(), t0.format("%Y-%m-%d %H:%M")),
    );

    let latency = config.latency();
    if !ctx.skip_latency && latency > 0.0 {
        logging::debug(Subsystem::System, Some(name), &format!("waiting {:.0} s for late data", latency));
        thread::sleep(Duration::from_secs_f64(latency));
    }

    let result = match config {
        AlarmConfig::Infrasound(c) => infrasound::run(c, t0, ctx),
        AlarmConfig::Tremor(c) => tremor::run(c, t0, ctx),
        AlarmConfig::Swarm(c) => swarm::run(c, t0, ctx),
    };

    let (outcome, error) = match result {
        Ok(outcome) => (outcome, None),
        Err(e) => {
            let detail = e.to_string();
            logging::error(Subsystem::System, Some(name), &detail);
            report_failure(name, t0, &detail, &ctx.notifiers);
            let message = format!("{} - {}", state_prefix(t0, name), detail);
            (AlarmOutcome::new(HeartbeatState::Unknown, message), Some(detail))
        }
    };

    let mut alerts_sent = 0;
    for alert in &outcome.alerts {
        if dispatch_alert(config, alert, ctx) {
            alerts_sent += 1;
        }
    }

    send_heartbeat(config.heartbeat_service(), outcome.state, &outcome.message, &ctx.notifiers);
    RunReport {
        state: outcome.state,
        message: outcome.message,
        alerts_sent,
        error,
    }
}

/// Figure, then email to the alarm's list, then chat. Returns whether the
/// email went out.
fn dispatch_alert(config: &AlarmConfig, alert: &Alert, ctx: &AlarmContext) -> bool {
    let name = config.alarm_name();
    let figure = match &alert.figure {
        Some(request) => ctx.notifiers.figures.render(name, request),
        None => FigureOutcome::Skipped,
    };
    if let FigureOutcome::Failed(reason) = &figure {
        logging::warn(Subsystem::Notify, Some(name), &format!("figure failed, sending without: {}", reason));
    }
    let attachment = figure.attachment();

    let emailed = match ctx.notifiers.email.send(name, &alert.subject, &alert.body, attachment) {
        Ok(()) => true,
        Err(e) => {
            logging::error(Subsystem::Notify, Some(name), &format!("email failed: {}", e));
            false
        }
    };
    if let Err(e) = ctx
        .notifiers
        .chat
        .post(config.mattermost_channel_id(), &alert.subject, &alert.body, attachment)
    {
        logging::error(Subsystem::Notify, Some(name), &format!("chat post failed: {}", e));
    }
    emailed
}

/// Sends the run's heartbeat. Failures are logged only.
pub fn send_heartbeat(service: &str, state: HeartbeatState, message: &str, notifiers: &Notifiers) {
    logging::info(Subsystem::Notify, Some(service), &format!("{}: {}", state, message));
    if let Err(e) = notifiers.heartbeat.report(service, state, message) {
        logging::error(Subsystem::Notify, Some(service), &format!("heartbeat failed: {}", e));
    }
}

/// Emails an unexpected failure to the `Error` list.
pub fn report_failure(alarm_name: &str, t0: DateTime<Utc>, detail: &str, notifiers: &Notifiers) {
    let subject = format!("{} error", alarm_name);
    let body = format!("{}\n\n{}", t0.format("%Y-%m-%d %H:%M"), detail);
    if let Err(e) = notifiers.email.send(ERROR_LIST, &subject, &body, None) {
        logging::error(Subsystem::Notify, Some(alarm_name), &format!("error email failed: {}", e));
    }
}
