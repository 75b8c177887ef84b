/// Alarm configuration.
///
/// Every alarm is described by one TOML file under the configuration
/// directory, tagged with `alarm_type`. The file is deserialized once into an
/// immutable `AlarmConfig`, defaults are resolved by serde, and the result is
/// validated before anything is fetched. Deployment settings that differ
/// between machines (archive paths, service URLs, credentials) come from the
/// environment instead, optionally through a `.env` file.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::analysis::association::MAX_ARRAY_CHANNELS;
use crate::analysis::locator::{AxisSpec, LocationGrid, LocatorParams, phase_velocity};
use crate::analysis::swarm::SwarmParameters;
use crate::model::{AlarmError, Scnl};
use crate::stations::{ChannelSite, parse_nslc, validate_sites};

// ============================================================================
// Defaults
// ============================================================================

fn default_infrasound_plot_duration() -> f64 {
    600.0
}

fn default_seismic_plot_duration() -> f64 {
    3600.0
}

fn default_infrasound_zero_fraction() -> f64 {
    0.01
}

fn default_tremor_zero_fraction() -> f64 {
    0.03
}

fn default_envelope_rate() -> f64 {
    5.0
}

fn default_target_sampling_rate() -> f64 {
    50.0
}

fn default_phase() -> String {
    "3kmps".to_string()
}

fn default_magmin() -> f64 {
    -3.0
}

fn default_maxdep() -> f64 {
    40.0
}

fn default_volcano_distance() -> f64 {
    10.0
}

// ============================================================================
// Shared entries
// ============================================================================

/// One `[[scnl]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelEntry {
    pub scnl: String,
    pub lat: f64,
    pub lon: f64,
}

fn sites_from(entries: &[ChannelEntry]) -> Result<Vec<ChannelSite>, AlarmError> {
    entries.iter().map(|e| ChannelSite::new(&e.scnl, e.lat, e.lon)).collect()
}

/// A volcano watched by an infrasound array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolcanoTarget {
    pub volcano: String,
    pub v_lat: f64,
    pub v_lon: f64,
    /// Half-width of the accepted backazimuth window, degrees.
    pub azimuth_tolerance: f64,
    /// Minimum peak pressure for a detection, Pa.
    pub min_pa: f64,
    /// Accepted apparent velocity range, km/s.
    pub vmin: f64,
    pub vmax: f64,
    /// Expected backazimuth. Computed from the array centre when absent.
    #[serde(default)]
    pub back_azimuth: Option<f64>,
    /// Seismic channel plotted under the infrasound traces.
    #[serde(default)]
    pub seismic_scnl: Option<String>,
}

// ============================================================================
// Alarm configurations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfrasoundConfig {
    pub alarm_name: String,
    pub scnl: Vec<ChannelEntry>,
    pub volcano: Vec<VolcanoTarget>,
    /// Analysis window, seconds before T0.
    pub duration: f64,
    pub latency: f64,
    /// Taper length, seconds.
    pub taper_val: f64,
    pub f1: f64,
    pub f2: f64,
    /// Counts to Pa.
    pub digouti: f64,
    pub min_cc: f64,
    pub min_chan: usize,
    /// Maximum correlation shift, samples at the target rate.
    pub cc_shift_length: usize,
    #[serde(default = "default_infrasound_plot_duration")]
    pub infrasound_plot_duration: f64,
    #[serde(default = "default_seismic_plot_duration")]
    pub seismic_plot_duration: f64,
    #[serde(default = "default_infrasound_zero_fraction")]
    pub max_zero_fraction: f64,
    #[serde(default = "default_target_sampling_rate")]
    pub target_sampling_rate: f64,
    #[serde(default)]
    pub mattermost_channel_id: Option<String>,
    #[serde(default)]
    pub icinga_service_name: Option<String>,
}

impl InfrasoundConfig {
    pub fn sites(&self) -> Result<Vec<ChannelSite>, AlarmError> {
        sites_from(&self.scnl)
    }

    /// Smallest pressure threshold among the volcanoes, Pa.
    pub fn min_pressure(&self) -> f64 {
        self.volcano.iter().map(|v| v.min_pa).fold(f64::INFINITY, f64::min)
    }

    /// Slowest admissible velocity among the volcanoes, km/s.
    pub fn min_velocity(&self) -> f64 {
        self.volcano.iter().map(|v| v.vmin).fold(f64::INFINITY, f64::min)
    }

    fn validate(&self) -> Result<(), AlarmError> {
        let sites = self.sites()?;
        validate_sites(&sites)?;
        if sites.len() > MAX_ARRAY_CHANNELS {
            return Err(AlarmError::Config(format!(
                "{} channels configured, arrays are limited to {}",
                sites.len(),
                MAX_ARRAY_CHANNELS
            )));
        }
        if self.min_chan < 2 || self.min_chan > sites.len() {
            return Err(AlarmError::Config(format!(
                "min_chan {} must be between 2 and the {} configured channels",
                self.min_chan,
                sites.len()
            )));
        }
        if self.volcano.is_empty() {
            return Err(AlarmError::Config("no [[volcano]] configured".into()));
        }
        for v in &self.volcano {
            if !(v.vmin > 0.0 && v.vmin < v.vmax) {
                return Err(AlarmError::Config(format!(
                    "{}: velocity range {}..{} is invalid",
                    v.volcano, v.vmin, v.vmax
                )));
            }
            if v.azimuth_tolerance < 0.0 {
                return Err(AlarmError::Config(format!("{}: negative azimuth_tolerance", v.volcano)));
            }
        }
        check_band(self.f1, self.f2)?;
        check_positive("duration", self.duration)?;
        check_positive("target_sampling_rate", self.target_sampling_rate)?;
        check_fraction("max_zero_fraction", self.max_zero_fraction)?;
        if self.cc_shift_length == 0 {
            return Err(AlarmError::Config("cc_shift_length must be at least one sample".into()));
        }
        Ok(())
    }
}

/// Grid-search volume. Each axis is a `{start, stop, step}` range or a
/// list of nodes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSpec {
    pub lats: AxisSpec,
    pub lons: AxisSpec,
    pub deps: AxisSpec,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TremorConfig {
    pub alarm_name: String,
    pub scnl: Vec<ChannelEntry>,
    /// Catalog lookback, seconds.
    pub duration: f64,
    /// Correlated minutes that make a detection.
    pub threshold: f64,
    /// `NET.STA.LOC.CHA` channel for the amplitude check.
    pub rsam_station: String,
    pub rsam_threshold: f64,
    pub window_length: f64,
    pub latency: f64,
    pub taper: f64,
    pub f1: f64,
    pub f2: f64,
    pub highpass: f64,
    pub lowpass: f64,
    pub min_sta: usize,
    pub cmin: f64,
    pub cmax: f64,
    pub bstrap: usize,
    pub bstrap_prct: f64,
    pub max_scatter: f64,
    pub grid: GridSpec,
    #[serde(default = "default_phase")]
    pub phase: String,
    pub grid_file: PathBuf,
    pub catalog_file: PathBuf,
    #[serde(default = "default_tremor_zero_fraction")]
    pub max_zero_fraction: f64,
    #[serde(default = "default_envelope_rate")]
    pub envelope_rate: f64,
    #[serde(default)]
    pub bootstrap_seed: u64,
    #[serde(default = "default_seismic_plot_duration")]
    pub seismic_plot_duration: f64,
    #[serde(default)]
    pub mattermost_channel_id: Option<String>,
    #[serde(default)]
    pub icinga_service_name: Option<String>,
}

impl TremorConfig {
    pub fn sites(&self) -> Result<Vec<ChannelSite>, AlarmError> {
        sites_from(&self.scnl)
    }

    pub fn rsam_scnl(&self) -> Result<Scnl, AlarmError> {
        parse_nslc(&self.rsam_station)
    }

    pub fn location_grid(&self) -> Result<LocationGrid, AlarmError> {
        LocationGrid::from_specs(&self.grid.lats, &self.grid.lons, &self.grid.deps)
    }

    pub fn locator_params(&self) -> LocatorParams {
        LocatorParams {
            cmin: self.cmin,
            cmax: self.cmax,
            min_sta: self.min_sta,
            bootstrap_iterations: self.bstrap,
            bootstrap_fraction: self.bstrap_prct,
            seed: self.bootstrap_seed,
        }
    }

    fn validate(&self) -> Result<(), AlarmError> {
        validate_sites(&self.sites()?)?;
        self.rsam_scnl()?;
        self.location_grid()?;
        phase_velocity(&self.phase)?;
        if self.min_sta < 2 {
            return Err(AlarmError::Config("min_sta must be at least 2".into()));
        }
        if !(self.cmin < self.cmax) {
            return Err(AlarmError::Config(format!("cmin {} must be below cmax {}", self.cmin, self.cmax)));
        }
        if !(0.0..1.0).contains(&self.bstrap_prct) {
            return Err(AlarmError::Config(format!("bstrap_prct {} must be in [0, 1)", self.bstrap_prct)));
        }
        check_band(self.f1, self.f2)?;
        check_positive("highpass", self.highpass)?;
        check_positive("lowpass", self.lowpass)?;
        check_positive("duration", self.duration)?;
        check_positive("threshold", self.threshold)?;
        check_positive("window_length", self.window_length)?;
        check_positive("envelope_rate", self.envelope_rate)?;
        check_fraction("max_zero_fraction", self.max_zero_fraction)?;
        if self.lowpass >= self.envelope_rate / 2.0 {
            return Err(AlarmError::Config(format!(
                "lowpass {} Hz is above the envelope Nyquist frequency",
                self.lowpass
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwarmConfig {
    pub alarm_name: String,
    #[serde(default)]
    pub latency: f64,
    /// Catalog of events already reported.
    pub outfile: PathBuf,
    /// Holocene volcano list.
    pub volc_file: PathBuf,
    #[serde(default = "default_magmin")]
    pub magmin: f64,
    /// Maximum depth, km.
    #[serde(default = "default_maxdep")]
    pub maxdep: f64,
    /// Events farther than this from every volcano are ignored, km.
    #[serde(default = "default_volcano_distance")]
    pub volcano_distance: f64,
    pub swarm_parameters: Vec<SwarmParameters>,
    #[serde(default)]
    pub mattermost_channel_id: Option<String>,
    #[serde(default)]
    pub icinga_service_name: Option<String>,
}

impl SwarmConfig {
    /// Longest parameter-set window, seconds.
    pub fn lookback(&self) -> f64 {
        self.swarm_parameters.iter().map(|p| p.max_evt_time).fold(0.0, f64::max)
    }

    fn validate(&self) -> Result<(), AlarmError> {
        if self.swarm_parameters.is_empty() {
            return Err(AlarmError::Config("no [[swarm_parameters]] configured".into()));
        }
        for p in &self.swarm_parameters {
            if p.max_evt_distance <= 0.0 || p.max_evt_time <= 0.0 || p.min_num_evt == 0 {
                return Err(AlarmError::Config(format!("swarm parameter set '{}' has non-positive limits", p.name)));
            }
        }
        check_positive("volcano_distance", self.volcano_distance)
    }
}

/// A parsed, validated alarm configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "alarm_type")]
pub enum AlarmConfig {
    Infrasound(InfrasoundConfig),
    Tremor(TremorConfig),
    Swarm(SwarmConfig),
}

impl AlarmConfig {
    /// Parses and validates a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self, AlarmError> {
        let config: AlarmConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `<dir>/<name>.toml`. `name` may carry the extension already.
    pub fn load(dir: &Path, name: &str) -> Result<Self, AlarmError> {
        let file = if name.ends_with(".toml") {
            name.to_string()
        } else {
            format!("{}.toml", name)
        };
        let path = dir.join(file);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| AlarmError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text).map_err(|e| match e {
            AlarmError::Config(msg) => AlarmError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<(), AlarmError> {
        if self.alarm_name().trim().is_empty() {
            return Err(AlarmError::Config("alarm_name is empty".into()));
        }
        if self.latency() < 0.0 {
            return Err(AlarmError::Config("latency must not be negative".into()));
        }
        match self {
            AlarmConfig::Infrasound(c) => c.validate(),
            AlarmConfig::Tremor(c) => c.validate(),
            AlarmConfig::Swarm(c) => c.validate(),
        }
    }

    pub fn alarm_name(&self) -> &str {
        match self {
            AlarmConfig::Infrasound(c) => &c.alarm_name,
            AlarmConfig::Tremor(c) => &c.alarm_name,
            AlarmConfig::Swarm(c) => &c.alarm_name,
        }
    }

    /// Seconds to wait before fetching, so late packets can arrive.
    pub fn latency(&self) -> f64 {
        match self {
            AlarmConfig::Infrasound(c) => c.latency,
            // the tapered tail of the window extends past T0
            AlarmConfig::Tremor(c) => c.latency + c.taper,
            AlarmConfig::Swarm(c) => c.latency,
        }
    }

    pub fn mattermost_channel_id(&self) -> Option<&str> {
        match self {
            AlarmConfig::Infrasound(c) => c.mattermost_channel_id.as_deref(),
            AlarmConfig::Tremor(c) => c.mattermost_channel_id.as_deref(),
            AlarmConfig::Swarm(c) => c.mattermost_channel_id.as_deref(),
        }
    }

    /// Heartbeat service name, the alarm name unless configured.
    pub fn heartbeat_service(&self) -> &str {
        let configured = match self {
            AlarmConfig::Infrasound(c) => c.icinga_service_name.as_deref(),
            AlarmConfig::Tremor(c) => c.icinga_service_name.as_deref(),
            AlarmConfig::Swarm(c) => c.icinga_service_name.as_deref(),
        };
        configured.unwrap_or(self.alarm_name())
    }

    pub fn alarm_type(&self) -> &'static str {
        match self {
            AlarmConfig::Infrasound(_) => "Infrasound",
            AlarmConfig::Tremor(_) => "Tremor",
            AlarmConfig::Swarm(_) => "Swarm",
        }
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), AlarmError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(AlarmError::Config(format!("{} must be positive, got {}", name, value)))
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), AlarmError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AlarmError::Config(format!("{} must be in [0, 1], got {}", name, value)))
    }
}

fn check_band(f1: f64, f2: f64) -> Result<(), AlarmError> {
    if f1 > 0.0 && f1 < f2 {
        Ok(())
    } else {
        Err(AlarmError::Config(format!("pass band {}..{} Hz is invalid", f1, f2)))
    }
}

// ============================================================================
// Distribution lists
// ============================================================================

/// Email recipients for one alarm.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipients {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

impl Recipients {
    pub fn is_empty(&self) -> bool {
        self.to.is_empty() && self.bcc.is_empty()
    }
}

/// Alarm name to recipients. The `Error` entry receives failure reports.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Distribution {
    pub lists: BTreeMap<String, Recipients>,
}

pub const ERROR_LIST: &str = "Error";

impl Distribution {
    pub fn from_toml_str(text: &str) -> Result<Self, AlarmError> {
        Ok(toml::from_str(text)?)
    }

    /// Missing file means nobody is on any list.
    pub fn load(path: &Path) -> Result<Self, AlarmError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(AlarmError::Config(format!("{}: {}", path.display(), e))),
        }
    }

    pub fn recipients(&self, alarm_name: &str) -> Option<&Recipients> {
        self.lists.get(alarm_name)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Deployment settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEnv {
    pub config_dir: PathBuf,
    pub waveform_dir: PathBuf,
    pub event_service_url: String,
    /// Icinga2 API endpoint; heartbeats are only logged when unset.
    pub icinga_url: Option<String>,
    pub icinga_username: String,
    pub icinga_password: String,
    /// Host name the heartbeat services belong to.
    pub icinga_host_name: String,
    pub mattermost_url: Option<String>,
    pub mattermost_token: Option<String>,
    pub mattermost_channel_id: Option<String>,
    pub sendmail: String,
    pub mail_from: String,
    pub distribution_file: PathBuf,
    pub figure_dir: PathBuf,
    /// Label printed next to local times in messages.
    pub local_tz_label: String,
    pub logs_dir: PathBuf,
    pub from_cron: bool,
}

pub const DEFAULT_EVENT_SERVICE_URL: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";

impl ServiceEnv {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the settings from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        ServiceEnv {
            config_dir: PathBuf::from(or("ALARM_CONFIG_DIR", "alarm_configs")),
            waveform_dir: PathBuf::from(or("WAVEFORM_DIR", "waveforms")),
            event_service_url: or("FDSN_EVENT_URL", DEFAULT_EVENT_SERVICE_URL),
            icinga_url: get("ICINGA2_URL"),
            icinga_username: or("ICINGA2_USERNAME", ""),
            icinga_password: or("ICINGA2_PASSWORD", ""),
            icinga_host_name: or("ICINGA_HOST_NAME", "volmon"),
            mattermost_url: get("MATTERMOST_URL"),
            mattermost_token: get("MATTERMOST_TOKEN"),
            mattermost_channel_id: get("MATTERMOST_CHANNEL_ID"),
            sendmail: or("SENDMAIL", "/usr/sbin/sendmail"),
            mail_from: or("MAIL_FROM", "volmon@localhost"),
            distribution_file: PathBuf::from(or("DISTRIBUTION_FILE", "distribution.toml")),
            figure_dir: PathBuf::from(or("FIGURE_DIR", "figures")),
            local_tz_label: or("LOCAL_TZ_LABEL", "local"),
            logs_dir: PathBuf::from(or("LOGS_DIR", "logs")),
            from_cron: get("FROMCRON").is_some_and(|v| v == "yep"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const INFRASOUND: &str = r#"
alarm_type = "Infrasound"
alarm_name = "Akutan Infrasound"
duration = 180
latency = 30
taper_val = 5
f1 = 0.5
f2 = 10.0
digouti = 0.0000819
min_cc = 0.5
min_chan = 3
cc_shift_length = 150

[[scnl]]
scnl = "AKS.HDF.AV.01"
lat = 54.11048
lon = -165.69774

[[scnl]]
scnl = "AKS.HDF.AV.02"
lat = 54.11105
lon = -165.69705

[[scnl]]
scnl = "AKS.HDF.AV.03"
lat = 54.11028
lon = -165.69616

[[volcano]]
volcano = "Akutan"
v_lat = 54.1436
v_lon = -165.977736
azimuth_tolerance = 15
min_pa = 0.5
vmin = 0.28
vmax = 0.45
seismic_scnl = "AKGG.BHZ.AV.--"
"#;

    const SWARM: &str = r#"
alarm_type = "Swarm"
alarm_name = "Earthquake Swarm"
outfile = "Recent_swarms.txt"
volc_file = "volcanoes.csv"

[[swarm_parameters]]
name = "short"
max_evt_distance = 4
max_evt_time = 3600
min_num_evt = 6

[[swarm_parameters]]
name = "long"
max_evt_distance = 4
max_evt_time = 86400
min_num_evt = 12
"#;

    #[test]
    fn test_infrasound_config_parses_with_defaults() {
        let config = AlarmConfig::from_toml_str(INFRASOUND).unwrap();
        let AlarmConfig::Infrasound(c) = &config else {
            panic!("expected an infrasound config, got {:?}", config);
        };
        assert_eq!(c.scnl.len(), 3);
        assert_eq!(c.infrasound_plot_duration, 600.0);
        assert_eq!(c.seismic_plot_duration, 3600.0);
        assert_eq!(c.max_zero_fraction, 0.01);
        assert_eq!(c.volcano[0].back_azimuth, None);
        assert_eq!(config.alarm_name(), "Akutan Infrasound");
        assert_eq!(config.alarm_type(), "Infrasound");
        assert_eq!(config.heartbeat_service(), "Akutan Infrasound");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let text = format!("unexpected_knob = 3\n{}", SWARM);
        assert!(matches!(AlarmConfig::from_toml_str(&text), Err(AlarmError::Config(_))));
    }

    #[test]
    fn test_unknown_alarm_type_is_rejected() {
        let text = SWARM.replace("\"Swarm\"", "\"Lightning\"");
        assert!(AlarmConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_swarm_lookback_is_longest_window() {
        let AlarmConfig::Swarm(c) = AlarmConfig::from_toml_str(SWARM).unwrap() else {
            panic!("expected a swarm config");
        };
        assert_eq!(c.lookback(), 86400.0);
        assert_eq!(c.magmin, -3.0);
        assert_eq!(c.volcano_distance, 10.0);
    }

    #[test]
    fn test_min_chan_above_channel_count_fails_validation() {
        let text = INFRASOUND.replace("min_chan = 3", "min_chan = 4");
        let err = AlarmConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("min_chan"), "got {}", err);
    }

    #[test]
    fn test_inverted_velocity_range_fails_validation() {
        let text = INFRASOUND.replace("vmax = 0.45", "vmax = 0.2");
        assert!(AlarmConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_infrasound_thresholds_use_most_permissive_volcano() {
        let AlarmConfig::Infrasound(mut c) = AlarmConfig::from_toml_str(INFRASOUND).unwrap() else {
            panic!("expected an infrasound config");
        };
        let mut other = c.volcano[0].clone();
        other.min_pa = 0.2;
        other.vmin = 0.25;
        c.volcano.push(other);
        assert_eq!(c.min_pressure(), 0.2);
        assert_eq!(c.min_velocity(), 0.25);
    }

    #[test]
    fn test_tremor_latency_includes_taper() {
        let text = r#"
alarm_type = "Tremor"
alarm_name = "Pavlof Tremor"
duration = 3600
threshold = 25
rsam_station = "AV.PS1A.--.BHZ"
rsam_threshold = 180
window_length = 300
latency = 10
taper = 5
f1 = 1
f2 = 6
highpass = 8
lowpass = 0.1
min_sta = 4
cmin = 0.5
cmax = 0.95
bstrap = 10
bstrap_prct = 0.04
max_scatter = 8
grid_file = "pavlof_grid.json"
catalog_file = "pavlof_tremor.txt"

[grid]
lats = { start = 55.18, stop = 55.56, step = 0.02 }
lons = { start = -162.22, stop = -161.64, step = 0.02 }
deps = [1.0, 5.0, 10.0]

[[scnl]]
scnl = "PS1A.BHZ.AV.--"
lat = 55.420
lon = -161.744
"#;
        let config = AlarmConfig::from_toml_str(text).unwrap();
        assert_eq!(config.latency(), 15.0);
        let AlarmConfig::Tremor(c) = config else {
            panic!("expected a tremor config");
        };
        let grid = c.location_grid().unwrap();
        assert_eq!(grid.lats.len(), 20);
        assert_eq!(grid.deps, vec![1.0, 5.0, 10.0]);
        assert_eq!(c.rsam_scnl().unwrap().station, "PS1A");
        assert_eq!(c.envelope_rate, 5.0);
    }

    #[test]
    fn test_distribution_lists() {
        let dist = Distribution::from_toml_str(
            r#"
[Error]
to = ["ops@example.org"]

["Earthquake Swarm"]
to = ["duty@example.org"]
bcc = ["archive@example.org"]
"#,
        )
        .unwrap();
        assert_eq!(dist.recipients(ERROR_LIST).map(|r| r.to.len()), Some(1));
        assert_eq!(dist.recipients("Earthquake Swarm").map(|r| r.bcc.clone()), Some(vec!["archive@example.org".to_string()]));
        assert!(dist.recipients("Akutan Infrasound").is_none());
    }

    #[test]
    fn test_service_env_defaults_and_overrides() {
        let vars: HashMap<&str, &str> = [("FROMCRON", "yep"), ("LOGS_DIR", "/var/log/volmon"), ("MATTERMOST_URL", "")]
            .into_iter()
            .collect();
        let env = ServiceEnv::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(env.from_cron);
        assert_eq!(env.logs_dir, PathBuf::from("/var/log/volmon"));
        assert_eq!(env.mattermost_url, None, "empty values count as unset");
        assert_eq!(env.event_service_url, DEFAULT_EVENT_SERVICE_URL);
        assert_eq!(env.config_dir, PathBuf::from("alarm_configs"));
    }
}
