/// Data sources for the alarms.
///
/// Alarms never talk to a server directly; they are handed a
/// `WaveformSource` and an `EventSource` and ask them for data. The concrete
/// readers here are thin: waveforms come from an ASCII archive on disk and
/// events from an FDSN event web service.
///
/// Submodules:
/// - `slist`: ASCII SLIST waveform archive reader.
/// - `fdsn`: FDSN event service client (`format=text`).
/// - `volcanoes`: Holocene volcano list and nearest-volcano lookup.

pub mod fdsn;
pub mod slist;
pub mod volcanoes;

use chrono::{DateTime, Utc};

use crate::model::{AlarmError, Scnl, Trace};

/// Rate used for channels that returned nothing.
pub const BLANK_SAMPLING_RATE: f64 = 100.0;

/// Supplies waveforms for `[t1, t2]`.
///
/// Returns one trace per requested channel, in request order. Channels with
/// no data come back as all-zero traces so the quality checks can count
/// them; partial data is zero-filled. Never fails on missing data.
pub trait WaveformSource {
    fn get_waveforms(&self, channels: &[Scnl], t1: DateTime<Utc>, t2: DateTime<Utc>) -> Vec<Trace>;
}

/// Search parameters for an event service.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    pub max_depth_km: Option<f64>,
    pub min_magnitude: Option<f64>,
}

/// An event as returned by the service, before volcano assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: Option<f64>,
    pub magnitude: Option<f64>,
}

pub trait EventSource {
    fn get_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, AlarmError>;
}

/// Number of samples spanning `[t1, t2]` inclusive at `rate`.
pub fn samples_in_window(t1: DateTime<Utc>, t2: DateTime<Utc>, rate: f64) -> usize {
    let span = (t2 - t1).num_microseconds().unwrap_or(0).max(0) as f64 / 1e6;
    (span * rate).round() as usize + 1
}

/// An all-zero trace covering the window.
pub fn blank_trace(scnl: &Scnl, t1: DateTime<Utc>, t2: DateTime<Utc>) -> Trace {
    let n = samples_in_window(t1, t2, BLANK_SAMPLING_RATE);
    Trace::new(scnl.clone(), BLANK_SAMPLING_RATE, t1, vec![0.0; n])
}

/// Serves a fixed set of traces, cut to the requested window.
///
/// Used for replays and tests; the archive reader does the same cutting.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWaveforms {
    pub traces: Vec<Trace>,
}

impl InMemoryWaveforms {
    pub fn new(traces: Vec<Trace>) -> Self {
        InMemoryWaveforms { traces }
    }
}

impl WaveformSource for InMemoryWaveforms {
    fn get_waveforms(&self, channels: &[Scnl], t1: DateTime<Utc>, t2: DateTime<Utc>) -> Vec<Trace> {
        channels
            .iter()
            .map(|scnl| {
                let blocks: Vec<&Trace> = self.traces.iter().filter(|t| &t.scnl == scnl).collect();
                merge_blocks(scnl, &blocks, t1, t2)
            })
            .collect()
    }
}

/// Merges blocks of one channel onto a zero-filled grid over `[t1, t2]`.
///
/// The grid takes the first block's rate; blocks at another rate are
/// skipped. Samples are placed at their nearest grid index.
pub fn merge_blocks(scnl: &Scnl, blocks: &[&Trace], t1: DateTime<Utc>, t2: DateTime<Utc>) -> Trace {
    let Some(first) = blocks.first() else {
        return blank_trace(scnl, t1, t2);
    };
    let rate = first.sampling_rate;
    let n = samples_in_window(t1, t2, rate);
    let mut data = vec![0.0; n];
    for block in blocks {
        if (block.sampling_rate - rate).abs() > 1e-6 {
            continue;
        }
        let offset_s = (block.starttime - t1).num_microseconds().unwrap_or(0) as f64 / 1e6;
        let offset = (offset_s * rate).round() as i64;
        for (k, v) in block.data.iter().enumerate() {
            let idx = offset + k as i64;
            if idx >= 0 && (idx as usize) < n {
                data[idx as usize] = *v;
            }
        }
    }
    Trace::new(scnl.clone(), rate, t1, data)
}
