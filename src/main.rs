/// Runs one volcano alarm once.
///
/// Usage: `volmon <config> [-t YYYYMMDDHHMM] [--test]`
///
/// Meant to be launched by cron every few minutes. Without `-t` the alarm
/// runs for the current minute. Any failure, panics included, is reported
/// to the `Error` distribution list and as an UNKNOWN heartbeat; the process
/// itself always exits cleanly.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use chrono::{DateTime, DurationRound, NaiveDateTime, TimeDelta, Utc};
use clap::Parser;

use volmon_service::alarms::{AlarmContext, report_failure, run_alarm, send_heartbeat};
use volmon_service::alert::HeartbeatState;
use volmon_service::alert::messages::{LocalZone, state_prefix};
use volmon_service::config::{AlarmConfig, ServiceEnv};
use volmon_service::ingest::fdsn::FdsnEventClient;
use volmon_service::ingest::slist::SlistArchive;
use volmon_service::logging::{self, LogLevel, Subsystem};
use volmon_service::notify::Notifiers;

#[derive(Parser, Debug)]
#[command(name = "volmon", about = "Run a volcano monitoring alarm", after_help = "e.g.: volmon Pavlof_Tremor 201701020205")]
struct Args {
    /// Name of the alarm configuration file, without `.toml`
    config: String,

    /// UTC time stamp, YYYYMMDDHHMM (default: now, to the minute)
    #[arg(short = 't', long = "time", value_parser = parse_t0)]
    time: Option<DateTime<Utc>>,

    /// Log notifications instead of sending them and skip the latency wait
    #[arg(long)]
    test: bool,
}

fn parse_t0(s: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M")
        .map(|t| t.and_utc())
        .map_err(|e| format!("'{}' is not YYYYMMDDHHMM: {}", s, e))
}

fn current_minute() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now)
}

fn init_logging(env: &ServiceEnv, config_name: &str) {
    if !env.from_cron {
        logging::init_logger(LogLevel::Info, None, false);
        return;
    }
    let logs_dir = env.logs_dir.to_string_lossy();
    let prepared = logging::prepare_logs_dir(&env.logs_dir);
    let path = logging::cron_log_path(&logs_dir, config_name, Utc::now());
    logging::init_logger(LogLevel::Info, Some(&path), true);
    if let Err(e) = prepared {
        logging::warn(
            Subsystem::System,
            None,
            &format!("cannot prepare log directory {}: {}", logs_dir, e),
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn main() {
    let start = Instant::now();
    let args = Args::parse();
    let env = ServiceEnv::from_env();
    init_logging(&env, &args.config);
    logging::info(Subsystem::System, None, "-----------------------------------------");

    let t0 = args.time.unwrap_or_else(current_minute);
    let notifiers = if args.test {
        logging::info(Subsystem::System, None, "Running alarm in test mode");
        Notifiers::log_only()
    } else {
        Notifiers::from_env(&env).unwrap_or_else(|e| {
            logging::error(Subsystem::Notify, None, &format!("notifiers unavailable, logging only: {}", e));
            Notifiers::log_only()
        })
    };

    let config = match AlarmConfig::load(&env.config_dir, &args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::error(Subsystem::System, Some(&args.config), &e.to_string());
            report_failure(&args.config, t0, &e.to_string(), &notifiers);
            let message = format!("{} - {}", state_prefix(t0, &args.config), e);
            send_heartbeat(&args.config, HeartbeatState::Unknown, &message, &notifiers);
            return;
        }
    };
    let name = config.alarm_name().to_string();

    let events = match FdsnEventClient::new(&env.event_service_url) {
        Ok(client) => client,
        Err(e) => {
            logging::error(Subsystem::Catalog, Some(&name), &e.to_string());
            report_failure(&name, t0, &e.to_string(), &notifiers);
            let message = format!("{} - {}", state_prefix(t0, &name), e);
            send_heartbeat(config.heartbeat_service(), HeartbeatState::Unknown, &message, &notifiers);
            return;
        }
    };
    let waveforms = SlistArchive::new(env.waveform_dir.clone());
    let ctx = AlarmContext {
        waveforms: &waveforms,
        events: &events,
        notifiers,
        zone: LocalZone::system(&env.local_tz_label),
        skip_latency: args.test,
    };

    match panic::catch_unwind(AssertUnwindSafe(|| run_alarm(&config, t0, &ctx))) {
        Ok(report) => logging::info(
            Subsystem::System,
            Some(&name),
            &format!("{} ({} alert(s) sent)", report.state, report.alerts_sent),
        ),
        Err(payload) => {
            let detail = format!("panic: {}", panic_message(payload.as_ref()));
            logging::error(Subsystem::System, Some(&name), &detail);
            report_failure(&name, t0, &detail, &ctx.notifiers);
            let message = format!("{} - {}", state_prefix(t0, &name), detail);
            send_heartbeat(config.heartbeat_service(), HeartbeatState::Unknown, &message, &ctx.notifiers);
        }
    }

    logging::info(
        Subsystem::System,
        None,
        &format!("[{:.2} seconds to complete alarm]", start.elapsed().as_secs_f64()),
    );
}
