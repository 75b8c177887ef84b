//! Tremor Alarm Integration Tests
//!
//! Runs the full tremor alarm on synthetic seismograms: a train of 2 Hz
//! bursts leaving one grid node and reaching three stations after their
//! travel times, over independent background noise. The rolling catalog
//! lives in a temporary directory and notifications are captured in memory.

use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use volmon_service::alarms::{AlarmContext, run_alarm};
use volmon_service::alert::HeartbeatState;
use volmon_service::alert::messages::LocalZone;
use volmon_service::analysis::locator::TravelTimeGrid;
use volmon_service::catalog::{TremorCatalogEntry, read_tremor_catalog, write_tremor_catalog};
use volmon_service::config::{AlarmConfig, TremorConfig};
use volmon_service::ingest::{EventQuery, EventRecord, EventSource, InMemoryWaveforms};
use volmon_service::model::{AlarmError, Scnl, StationCoordinates, Trace, seconds};
use volmon_service::notify::{Recorder, Sent};

const RATE: f64 = 20.0;
const SOURCE: (f64, f64) = (55.40, -161.85);
const AMPLITUDE: f64 = 1000.0;
/// Burst centres in seconds relative to T0, with relative sizes.
const BURSTS: [(f64, f64); 10] = [
    (-415.0, 1.0),
    (-380.0, 0.6),
    (-325.0, 1.3),
    (-285.0, 0.8),
    (-240.0, 1.1),
    (-195.0, 0.7),
    (-145.0, 1.2),
    (-110.0, 0.9),
    (-55.0, 0.5),
    (-25.0, 1.0),
];

struct NoEvents;

impl EventSource for NoEvents {
    fn get_events(&self, _query: &EventQuery) -> Result<Vec<EventRecord>, AlarmError> {
        Ok(Vec::new())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn config(dir: &Path) -> (AlarmConfig, TremorConfig) {
    let text = format!(
        r#"
alarm_type = "Tremor"
alarm_name = "Pavlof Tremor"
duration = 3600
threshold = 25
rsam_station = "AV.PS1A.--.BHZ"
rsam_threshold = 100
window_length = 300
latency = 0
taper = 5
f1 = 1
f2 = 6
highpass = 8
lowpass = 0.1
min_sta = 3
cmin = 0.5
cmax = 0.95
bstrap = 5
bstrap_prct = 0.04
max_scatter = 8
grid_file = "{}"
catalog_file = "{}"

[grid]
lats = {{ start = 55.3, stop = 55.5, step = 0.05 }}
lons = {{ start = -162.0, stop = -161.7, step = 0.05 }}
deps = [2.0]

[[scnl]]
scnl = "PS1A.BHZ.AV.--"
lat = 55.420
lon = -161.744

[[scnl]]
scnl = "PS4A.BHZ.AV.--"
lat = 55.346
lon = -161.857

[[scnl]]
scnl = "PV6A.SHZ.AV.--"
lat = 55.453
lon = -161.956
"#,
        dir.join("grid.json").display(),
        dir.join("tremor.txt").display()
    );
    let alarm = AlarmConfig::from_toml_str(&text).unwrap();
    match &alarm {
        AlarmConfig::Tremor(c) => {
            let c = c.clone();
            (alarm, c)
        }
        other => panic!("expected a tremor config, got {:?}", other),
    }
}

fn noise(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
        })
        .collect()
}

/// Ten minutes of data per channel ending one minute after T0.
fn seismograms(c: &TremorConfig) -> Vec<Trace> {
    let sites = c.sites().unwrap();
    let stations: Vec<(Scnl, StationCoordinates)> = sites.iter().map(|s| (s.scnl.clone(), s.coordinates)).collect();
    let grid = c.location_grid().unwrap();
    let tt = TravelTimeGrid::compute(&grid, &stations, &c.phase).unwrap();
    let source = (0..grid.len())
        .find(|&n| {
            let (lat, lon, _) = grid.node(n);
            (lat - SOURCE.0).abs() < 1e-6 && (lon - SOURCE.1).abs() < 1e-6
        })
        .unwrap();

    let start = t0() - Duration::seconds(540);
    let n = (600.0 * RATE) as usize + 1;
    stations
        .iter()
        .enumerate()
        .map(|(k, (scnl, _))| {
            let delay = tt.table(scnl).unwrap()[source];
            let background = noise(n, k as u64 + 17);
            let data = (0..n)
                .map(|i| {
                    // seconds relative to T0, minus the travel time
                    let t = i as f64 / RATE - 540.0 - delay;
                    let modulation: f64 = BURSTS
                        .iter()
                        .map(|(at, size)| {
                            let x = (t - at) / 8.0;
                            size * (-0.5 * x * x).exp()
                        })
                        .sum();
                    AMPLITUDE * modulation * (2.0 * std::f64::consts::PI * 2.0 * t).sin() + 200.0 * background[i]
                })
                .collect();
            Trace::new(scnl.clone(), RATE, start, data)
        })
        .collect()
}

fn context<'a>(waveforms: &'a InMemoryWaveforms, recorder: &Recorder) -> AlarmContext<'a> {
    AlarmContext {
        waveforms,
        events: &NoEvents,
        notifiers: recorder.notifiers(),
        zone: LocalZone::system("AKDT"),
        skip_latency: true,
    }
}

fn assert_at_source(entry: &TremorCatalogEntry) {
    assert!((entry.latitude - SOURCE.0).abs() < 1e-6, "latitude {}", entry.latitude);
    assert!((entry.longitude - SOURCE.1).abs() < 1e-6, "longitude {}", entry.longitude);
}

#[test]
fn test_located_windows_are_cataloged_once() {
    let dir = tempfile::tempdir().unwrap();
    let (alarm, c) = config(dir.path());
    let waveforms = InMemoryWaveforms::new(seismograms(&c));

    let recorder = Recorder::new();
    let report = run_alarm(&alarm, t0(), &context(&waveforms, &recorder));

    // Two half-overlapping windows: T0-450 s and T0-300 s
    let catalog = read_tremor_catalog(&c.catalog_file).unwrap();
    let times: Vec<DateTime<Utc>> = catalog.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![t0() - seconds(450.0), t0() - seconds(300.0)]);
    catalog.iter().for_each(assert_at_source);
    assert!(c.grid_file.exists(), "travel times cached");

    assert_eq!(report.state, HeartbeatState::Ok, "message: {}", report.message);
    assert!(
        report.message.starts_with(
            "2024-05-01 12:00 (UTC) Pavlof Tremor - Seismicity normal. \
             Correlated seismicity in 7.5 of past 60 minutes. Most recent: 0 minutes ago PS1A RSAM:"
        ),
        "message: {}",
        report.message
    );
    assert!(report.message.ends_with("/100"), "message: {}", report.message);
    assert_eq!(report.alerts_sent, 0);
    assert_eq!(recorder.heartbeats(), vec![(HeartbeatState::Ok, report.message.clone())]);

    // The same minute again locates the same windows
    let written = std::fs::read_to_string(&c.catalog_file).unwrap();
    let recorder = Recorder::new();
    let again = run_alarm(&alarm, t0(), &context(&waveforms, &recorder));
    assert_eq!(read_tremor_catalog(&c.catalog_file).unwrap().len(), 2, "no duplicate rows");
    assert_eq!(std::fs::read_to_string(&c.catalog_file).unwrap(), written);
    assert_eq!(again.message, report.message);
    assert_eq!(recorder.heartbeats().len(), 1);
}

#[test]
fn test_sustained_tremor_raises_alert() {
    let dir = tempfile::tempdir().unwrap();
    let (alarm, c) = config(dir.path());
    let waveforms = InMemoryWaveforms::new(seismograms(&c));

    // Earlier windows every 150 s back to T0-2850 s, plus one past the lookback
    let mut history: Vec<TremorCatalogEntry> = vec![TremorCatalogEntry {
        latitude: SOURCE.0,
        longitude: SOURCE.1,
        time: t0() - seconds(4000.0),
    }];
    history.extend((1..=16).rev().map(|k| TremorCatalogEntry {
        latitude: SOURCE.0,
        longitude: SOURCE.1,
        time: t0() - seconds(450.0 + 150.0 * k as f64),
    }));
    write_tremor_catalog(&c.catalog_file, &history).unwrap();

    let recorder = Recorder::new();
    let report = run_alarm(&alarm, t0(), &context(&waveforms, &recorder));

    let catalog = read_tremor_catalog(&c.catalog_file).unwrap();
    assert_eq!(catalog.len(), 18, "old row pruned, two new rows added");
    assert_eq!(catalog.first().unwrap().time, t0() - seconds(2850.0));
    assert_eq!(catalog.last().unwrap().time, t0() - seconds(300.0));
    assert!(catalog.windows(2).all(|w| w[0].time < w[1].time));
    catalog.iter().for_each(assert_at_source);

    assert_eq!(report.state, HeartbeatState::Critical, "message: {}", report.message);
    assert!(
        report.message.starts_with(
            "2024-05-01 12:00 (UTC) Pavlof Tremor - Tremor/Swarm detection! \
             Correlated seismicity in 47.5 of past 60 minutes. Most recent: 0 minutes ago PS1A RSAM:"
        ),
        "message: {}",
        report.message
    );
    assert_eq!(report.alerts_sent, 1);

    let sent = recorder.sent();
    let email = sent.iter().find_map(|s| match s {
        Sent::Email { list, subject, body } => Some((list.clone(), subject.clone(), body.clone())),
        _ => None,
    });
    let (list, subject, body) = email.expect("alert email");
    assert_eq!(list, "Pavlof Tremor");
    assert_eq!(subject, "--- Pavlof Tremor ---");
    assert!(body.starts_with("Start: 2024-05-01 11:00 (UTC)\nEnd: 2024-05-01 12:00 (UTC)"), "body: {}", body);
    assert!(body.ends_with("Correlated seismicity in 47.5 of past 60 minutes."), "body: {}", body);
    assert!(sent.iter().any(|s| matches!(s, Sent::Figure(_))), "figure requested");
    assert_eq!(recorder.heartbeats().len(), 1);
}
