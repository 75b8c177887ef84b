/// Core data types for the volcano monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// station identifiers, waveform traces, pairwise lag measurements, detection
/// results, located tremor windows, earthquakes and swarms. It contains no
/// I/O; the only logic is small accessors on the types themselves.

use chrono::{DateTime, Duration, Utc};

// ---------------------------------------------------------------------------
// Station identifiers
// ---------------------------------------------------------------------------

/// Station/channel identifier in `STA.CHA.NET.LOC` order.
///
/// An empty location code is stored as `--`, which is how the waveform
/// servers and the configuration files spell it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scnl {
    pub station: String,
    pub channel: String,
    pub network: String,
    pub location: String,
}

impl Scnl {
    /// Builds an identifier, normalizing an empty location to `--`.
    pub fn new(station: &str, channel: &str, network: &str, location: &str) -> Self {
        let location = if location.is_empty() { "--" } else { location };
        Scnl {
            station: station.to_string(),
            channel: channel.to_string(),
            network: network.to_string(),
            location: location.to_string(),
        }
    }

    /// `NET.STA.LOC.CHA` form, as used by the tremor RSAM channel setting.
    pub fn nslc(&self) -> String {
        format!("{}.{}.{}.{}", self.network, self.station, self.location, self.channel)
    }

    /// Key used for per-station tables in the travel-time cache file.
    pub fn cache_key(&self) -> String {
        self.nslc().replace('.', "_")
    }
}

impl std::fmt::Display for Scnl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.station, self.channel, self.network, self.location)
    }
}

/// WGS84 station position. Elevation is carried for completeness; none of
/// the detectors use it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
}

// ---------------------------------------------------------------------------
// Waveforms
// ---------------------------------------------------------------------------

/// A single-channel waveform segment.
///
/// Created per invocation by a `WaveformSource`, mutated in place by the
/// `analysis::filter` routines and dropped at the end of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub scnl: Scnl,
    pub sampling_rate: f64,
    pub starttime: DateTime<Utc>,
    pub data: Vec<f64>,
    pub coordinates: Option<StationCoordinates>,
}

impl Trace {
    pub fn new(scnl: Scnl, sampling_rate: f64, starttime: DateTime<Utc>, data: Vec<f64>) -> Self {
        Trace {
            scnl,
            sampling_rate,
            starttime,
            data,
            coordinates: None,
        }
    }

    pub fn npts(&self) -> usize {
        self.data.len()
    }

    /// Sample interval in seconds.
    pub fn delta(&self) -> f64 {
        1.0 / self.sampling_rate
    }

    /// Time of the last sample.
    pub fn endtime(&self) -> DateTime<Utc> {
        let n = self.npts().saturating_sub(1) as f64;
        self.starttime + seconds(n * self.delta())
    }

    /// Time of sample `index`.
    pub fn time_of(&self, index: usize) -> DateTime<Utc> {
        self.starttime + seconds(index as f64 * self.delta())
    }
}

/// Converts fractional seconds into a chrono `Duration` with microsecond
/// resolution.
pub fn seconds(value: f64) -> Duration {
    Duration::microseconds((value * 1e6).round() as i64)
}

// ---------------------------------------------------------------------------
// Array detection types
// ---------------------------------------------------------------------------

/// Best-aligned lag between two stations of an array.
///
/// `lag_seconds` is the arrival time at station `i` minus the arrival time at
/// station `j`; `i < j` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairwiseMeasurement {
    pub i: usize,
    pub j: usize,
    pub lag_seconds: f64,
    pub coefficient: f64,
}

/// Plane-wave parameters recovered by the slowness inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrayDetection {
    /// Apparent velocity in km/s, always > 0.
    pub velocity: f64,
    /// Direction to the source in degrees from north, in [0, 360).
    pub backazimuth: f64,
    /// RMS misfit of the predicted lags, seconds.
    pub rms: f64,
}

// ---------------------------------------------------------------------------
// Tremor locations
// ---------------------------------------------------------------------------

/// A located envelope-correlation window.
#[derive(Debug, Clone, PartialEq)]
pub struct TremorEvent {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub starttime: DateTime<Utc>,
    /// Bootstrap horizontal scatter in km.
    pub scatter_km: f64,
    /// Weighted mean correlation of the pairs used.
    pub mean_cc: f64,
    /// Set when the high-pass envelopes correlate at least as well as the
    /// band-passed ones, which points at local noise rather than tremor.
    pub highpass: bool,
}

// ---------------------------------------------------------------------------
// Earthquakes and swarms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Earthquake {
    pub id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: Option<f64>,
    pub magnitude: Option<f64>,
    /// Nearest Holocene volcano.
    pub volcano: String,
    pub volcano_distance_km: Option<f64>,
}

/// Events sharing one cluster label under one clustering parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct Swarm {
    pub events: Vec<Earthquake>,
    pub parameter_set: String,
    /// Time window of the parameter set that produced the swarm, seconds.
    pub param_duration: f64,
}

impl Swarm {
    /// Volcano label of the first event.
    pub fn volcano(&self) -> &str {
        self.events.first().map(|e| e.volcano.as_str()).unwrap_or("")
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.time).min()
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.time).max()
    }

    /// Time between first and last event.
    pub fn span(&self) -> Duration {
        match (self.first_time(), self.last_time()) {
            (Some(first), Some(last)) => last - first,
            _ => Duration::zero(),
        }
    }

    /// Sorted event IDs, used for identity and overlap tests.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.events.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can abort or degrade an alarm run.
#[derive(Debug, PartialEq)]
pub enum AlarmError {
    /// Configuration file missing, malformed or failing validation.
    Config(String),
    /// Local file I/O failure (catalogs, caches, archives).
    Io(String),
    /// A file or response body could not be parsed.
    Parse(String),
    /// Upstream service unreachable or answering with an error, after retries.
    Upstream(String),
    /// A numeric routine could not produce a result.
    Computation(String),
}

impl std::fmt::Display for AlarmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmError::Config(msg) => write!(f, "Config error: {}", msg),
            AlarmError::Io(msg) => write!(f, "I/O error: {}", msg),
            AlarmError::Parse(msg) => write!(f, "Parse error: {}", msg),
            AlarmError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AlarmError::Computation(msg) => write!(f, "Computation error: {}", msg),
        }
    }
}

impl std::error::Error for AlarmError {}

impl From<std::io::Error> for AlarmError {
    fn from(err: std::io::Error) -> Self {
        AlarmError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AlarmError {
    fn from(err: toml::de::Error) -> Self {
        AlarmError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AlarmError {
    fn from(err: serde_json::Error) -> Self {
        AlarmError::Parse(err.to_string())
    }
}

impl From<chrono::ParseError> for AlarmError {
    fn from(err: chrono::ParseError) -> Self {
        AlarmError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for AlarmError {
    fn from(err: reqwest::Error) -> Self {
        AlarmError::Upstream(err.to_string())
    }
}
