/// Alarm outcomes and how they are reported.
///
/// Every run ends in exactly one `AlarmOutcome`: a heartbeat severity, the
/// one-line state message sent with the heartbeat, and zero or more alerts
/// to push through email and chat. The detector-specific decisions that
/// produce an outcome live in the submodules.
///
/// Submodules:
/// - `classification`: infrasound detection state machine.
/// - `activity`: tremor activity levels from the rolling catalog.
/// - `messages`: state-message and alert text.

pub mod activity;
pub mod classification;
pub mod messages;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Heartbeat severity, in the monitoring system's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HeartbeatState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl HeartbeatState {
    /// Passive-check return code.
    pub fn code(self) -> u8 {
        match self {
            HeartbeatState::Ok => 0,
            HeartbeatState::Warning => 1,
            HeartbeatState::Critical => 2,
            HeartbeatState::Unknown => 3,
        }
    }
}

impl fmt::Display for HeartbeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatState::Ok => write!(f, "OK"),
            HeartbeatState::Warning => write!(f, "WARNING"),
            HeartbeatState::Critical => write!(f, "CRITICAL"),
            HeartbeatState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Figures an alert can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FigureKind {
    InfrasoundDetection,
    TremorRsam,
    SwarmMap,
}

impl FigureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FigureKind::InfrasoundDetection => "infrasound_detection",
            FigureKind::TremorRsam => "tremor_rsam",
            FigureKind::SwarmMap => "swarm_map",
        }
    }
}

/// What a figure renderer needs to draw the figure attached to an alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FigureRequest {
    pub kind: FigureKind,
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    /// Channels or event IDs shown.
    pub labels: Vec<String>,
    /// Optional series drawn on top, such as the aligned pressure stack.
    pub series: Vec<f64>,
}

/// A notification to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub figure: Option<FigureRequest>,
}

/// Result of one alarm run.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmOutcome {
    pub state: HeartbeatState,
    pub message: String,
    pub alerts: Vec<Alert>,
}

impl AlarmOutcome {
    pub fn new(state: HeartbeatState, message: impl Into<String>) -> Self {
        AlarmOutcome {
            state,
            message: message.into(),
            alerts: Vec::new(),
        }
    }

    pub fn with_alert(mut self, alert: Alert) -> Self {
        self.alerts.push(alert);
        self
    }
}
