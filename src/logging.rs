/// Structured logging for the volcano alarm service
///
/// Every line carries a subsystem tag and, where it applies, the channel or
/// alarm it concerns. Output goes to the console and optionally to an
/// append-only file, which is how cron-launched runs keep their history.

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subsystems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// Waveform retrieval and quality control
    Waveform,
    /// Earthquake and tremor catalogs, event service
    Catalog,
    /// Array processing and tremor location
    Locator,
    /// Heartbeat, email, chat and figure requests
    Notify,
    System,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Waveform => write!(f, "WAVE"),
            Subsystem::Catalog => write!(f, "CAT"),
            Subsystem::Locator => write!(f, "LOC"),
            Subsystem::Notify => write!(f, "NOTIFY"),
            Subsystem::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - station telemetry down or channel not archived
    Expected,
    /// Unexpected failure - service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };
        if let Ok(mut guard) = LOGGER.lock() {
            *guard = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, subsystem: Subsystem, id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let id_part = id.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let entry = format_entry(Utc::now(), level, subsystem, id, message);

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", entry),
                _ => println!("{}", entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", subsystem, id_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", subsystem, id_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => {}
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

/// One log line: `2024-05-01 12:00:00 UTC WARN WAVE [AKS.HDF.AV.01]: message`
pub fn format_entry(
    at: DateTime<Utc>,
    level: LogLevel,
    subsystem: Subsystem,
    id: Option<&str>,
    message: &str,
) -> String {
    let id_part = id.map(|s| format!(" [{}]", s)).unwrap_or_default();
    format!(
        "{} {} {}{}: {}",
        at.format("%Y-%m-%d %H:%M:%S UTC"),
        level,
        subsystem,
        id_part,
        message
    )
}

/// Log file for cron-launched runs: one file per config per 4-hour block,
/// `<logs_dir>/<config>-YYYYMMDD-HH.out` with HH in {00, 04, ..., 20}.
pub fn cron_log_path(logs_dir: &str, config_name: &str, now: DateTime<Utc>) -> String {
    use chrono::Timelike;
    let block = now.hour() / 4 * 4;
    format!(
        "{}/{}-{}-{:02}.out",
        logs_dir.trim_end_matches('/'),
        config_name,
        now.format("%Y%m%d"),
        block
    )
}

/// Creates the log directory and its `.keep` marker, which keeps the
/// directory from being pruned by log cleanup.
pub fn prepare_logs_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    OpenOptions::new().create(true).append(true).open(dir.join(".keep"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, subsystem: Subsystem, id: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, subsystem, id, message);
        }
    }
}

pub fn info(subsystem: Subsystem, id: Option<&str>, message: &str) {
    emit(LogLevel::Info, subsystem, id, message);
}

pub fn warn(subsystem: Subsystem, id: Option<&str>, message: &str) {
    emit(LogLevel::Warning, subsystem, id, message);
}

pub fn error(subsystem: Subsystem, id: Option<&str>, message: &str) {
    emit(LogLevel::Error, subsystem, id, message);
}

pub fn debug(subsystem: Subsystem, id: Option<&str>, message: &str) {
    emit(LogLevel::Debug, subsystem, id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a waveform retrieval failure for one channel
pub fn classify_waveform_failure(error_message: &str) -> FailureType {
    // A missing archive file just means the station has no telemetry
    if error_message.contains("No such file") || error_message.contains("not found") {
        FailureType::Expected
    } else if error_message.contains("Parse error") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

/// Classify an event-service or catalog file failure
pub fn classify_catalog_failure(error_message: &str) -> FailureType {
    if error_message.contains("Upstream") || error_message.contains("timeout") || error_message.contains("Parse error") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

fn log_classified(subsystem: Subsystem, id: &str, operation: &str, failure: FailureType, msg: &str) {
    let message = format!("{} failed [{}]: {}", operation, failure, msg);
    match failure {
        FailureType::Expected => debug(subsystem, Some(id), &message),
        FailureType::Unexpected => error(subsystem, Some(id), &message),
        FailureType::Unknown => warn(subsystem, Some(id), &message),
    }
}

pub fn log_waveform_failure(channel: &str, operation: &str, err: &dyn std::error::Error) {
    let msg = err.to_string();
    log_classified(Subsystem::Waveform, channel, operation, classify_waveform_failure(&msg), &msg);
}

pub fn log_catalog_failure(source: &str, operation: &str, err: &dyn std::error::Error) {
    let msg = err.to_string();
    log_classified(Subsystem::Catalog, source, operation, classify_catalog_failure(&msg), &msg);
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log how many channels survived quality control
pub fn log_channel_summary(alarm: &str, requested: usize, usable: usize) {
    let message = format!("{}/{} channels usable", usable, requested);
    if usable == requested {
        info(Subsystem::Waveform, Some(alarm), &message);
    } else if usable == 0 {
        error(Subsystem::Waveform, Some(alarm), &message);
    } else {
        warn(Subsystem::Waveform, Some(alarm), &message);
    }
}
