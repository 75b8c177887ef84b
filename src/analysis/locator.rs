//! Envelope cross-correlation grid-search locator.
//!
//! Tremor has no impulsive onsets to pick, so sources are located from the
//! lags between smoothed envelopes. Each sliding window is correlated pair by
//! pair, and the grid node whose differential travel times best explain the
//! observed lags is taken as the source. A bootstrap over masked samples
//! gives a scatter estimate, and a second pass on high-pass envelopes flags
//! windows that are better explained by local high-frequency noise.
//!
//! Travel times come from a straight-ray constant-velocity model and are
//! cached on disk as JSON, keyed by station, so repeated runs over the same
//! grid skip the computation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::analysis::xcorr::{best_peak, correlate, peak_lag_seconds};
use crate::geometry::{gps2dist_azimuth, haversine_km};
use crate::logging::{self, Subsystem};
use crate::model::{AlarmError, Scnl, StationCoordinates, TremorEvent, Trace};

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// One grid axis: an inclusive `start/stop/step` range or explicit nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Range { start: f64, stop: f64, step: f64 },
    Nodes(Vec<f64>),
}

impl AxisSpec {
    /// Expands the axis. A range includes `stop` when it lands within 1e-3
    /// of a step.
    pub fn nodes(&self) -> Result<Vec<f64>, AlarmError> {
        match self {
            AxisSpec::Nodes(v) if v.is_empty() => Err(AlarmError::Config("grid axis has no nodes".into())),
            AxisSpec::Nodes(v) => Ok(v.clone()),
            AxisSpec::Range { start, stop, step } => {
                if *step <= 0.0 || stop < start {
                    return Err(AlarmError::Config(format!(
                        "grid range {}..{} step {} is empty",
                        start, stop, step
                    )));
                }
                let count = ((stop - start) / step + 1e-3).floor() as usize + 1;
                Ok((0..count).map(|i| start + i as f64 * step).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationGrid {
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub deps: Vec<f64>,
}

impl LocationGrid {
    pub fn from_specs(lat: &AxisSpec, lon: &AxisSpec, dep: &AxisSpec) -> Result<Self, AlarmError> {
        Ok(LocationGrid {
            lats: lat.nodes()?,
            lons: lon.nodes()?,
            deps: dep.nodes()?,
        })
    }

    pub fn len(&self) -> usize {
        self.lats.len() * self.lons.len() * self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(lat, lon, depth)` of a flat node index; latitude varies slowest.
    pub fn node(&self, index: usize) -> (f64, f64, f64) {
        let per_lat = self.lons.len() * self.deps.len();
        let lat = self.lats[index / per_lat];
        let rest = index % per_lat;
        let lon = self.lons[rest / self.deps.len()];
        let dep = self.deps[rest % self.deps.len()];
        (lat, lon, dep)
    }
}

/// Velocity in km/s from a phase label such as `"3kmps"` or `"2.5kmps"`.
pub fn phase_velocity(phase: &str) -> Result<f64, AlarmError> {
    let value = phase
        .trim()
        .strip_suffix("kmps")
        .ok_or_else(|| AlarmError::Config(format!("unsupported phase '{}'", phase)))?;
    let v: f64 = value
        .parse()
        .map_err(|_| AlarmError::Config(format!("unsupported phase '{}'", phase)))?;
    if v <= 0.0 || !v.is_finite() {
        return Err(AlarmError::Config(format!("phase velocity must be positive, got '{}'", phase)));
    }
    Ok(v)
}

// ---------------------------------------------------------------------------
// Travel times
// ---------------------------------------------------------------------------

/// Per-station travel times over a grid, in flat node order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelTimeGrid {
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub deps: Vec<f64>,
    pub phase: String,
    /// Keyed by `NET_STA_LOC_CHA`.
    pub tables: BTreeMap<String, Vec<f64>>,
}

impl TravelTimeGrid {
    pub fn compute(
        grid: &LocationGrid,
        stations: &[(Scnl, StationCoordinates)],
        phase: &str,
    ) -> Result<Self, AlarmError> {
        let velocity = phase_velocity(phase)?;
        let mut tables = BTreeMap::new();
        for (scnl, coords) in stations {
            let table: Vec<f64> = (0..grid.len())
                .map(|n| {
                    let (lat, lon, dep) = grid.node(n);
                    let epi_km = gps2dist_azimuth(coords.latitude, coords.longitude, lat, lon).distance_m / 1000.0;
                    (epi_km * epi_km + dep * dep).sqrt() / velocity
                })
                .collect();
            tables.insert(scnl.cache_key(), table);
        }
        Ok(TravelTimeGrid {
            lats: grid.lats.clone(),
            lons: grid.lons.clone(),
            deps: grid.deps.clone(),
            phase: phase.to_string(),
            tables,
        })
    }

    /// Reuses the cache at `path` when it was built for the same nodes and
    /// phase and has a table for every station; otherwise recomputes and
    /// overwrites it.
    pub fn load_or_compute(
        path: &Path,
        grid: &LocationGrid,
        stations: &[(Scnl, StationCoordinates)],
        phase: &str,
    ) -> Result<Self, AlarmError> {
        if let Ok(text) = std::fs::read_to_string(path) {
            match serde_json::from_str::<TravelTimeGrid>(&text) {
                Ok(cached) if cached.covers(grid, stations, phase) => {
                    logging::debug(Subsystem::Locator, None, &format!("travel times from {}", path.display()));
                    return Ok(cached);
                }
                Ok(_) => logging::info(Subsystem::Locator, None, "travel-time cache stale, recomputing"),
                Err(e) => logging::warn(Subsystem::Locator, None, &format!("unreadable travel-time cache: {}", e)),
            }
        }
        let fresh = Self::compute(grid, stations, phase)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string(&fresh)?)?;
        Ok(fresh)
    }

    fn covers(&self, grid: &LocationGrid, stations: &[(Scnl, StationCoordinates)], phase: &str) -> bool {
        self.lats == grid.lats
            && self.lons == grid.lons
            && self.deps == grid.deps
            && self.phase == phase
            && stations.iter().all(|(s, _)| self.tables.contains_key(&s.cache_key()))
    }

    pub fn table(&self, scnl: &Scnl) -> Option<&[f64]> {
        self.tables.get(&scnl.cache_key()).map(|t| t.as_slice())
    }

    pub fn grid(&self) -> LocationGrid {
        LocationGrid {
            lats: self.lats.clone(),
            lons: self.lons.clone(),
            deps: self.deps.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatorParams {
    /// Pairs correlating below this are dropped.
    pub cmin: f64,
    /// Pairs correlating at or above this get full weight.
    pub cmax: f64,
    pub min_sta: usize,
    pub bootstrap_iterations: usize,
    /// Share of window samples masked per bootstrap iteration, in [0, 1).
    pub bootstrap_fraction: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowSolution {
    node: usize,
    mean_cc: f64,
}

struct PairLag {
    a: usize,
    b: usize,
    lag: f64,
    cc: f64,
    weight: f64,
}

pub struct EnvelopeLocator<'a> {
    travel_times: &'a TravelTimeGrid,
    grid: LocationGrid,
    params: LocatorParams,
}

impl<'a> EnvelopeLocator<'a> {
    pub fn new(travel_times: &'a TravelTimeGrid, params: LocatorParams) -> Self {
        EnvelopeLocator {
            travel_times,
            grid: travel_times.grid(),
            params,
        }
    }

    /// Locates every full window of the envelopes.
    ///
    /// `band` and `highpass` hold envelopes of the same channels, at one
    /// sampling rate and one start time. Channels without a travel-time table
    /// are ignored.
    pub fn locate(&self, band: &[Trace], highpass: &[Trace], window_length: f64, step: f64) -> Vec<TremorEvent> {
        let Some(first) = band.first() else {
            return Vec::new();
        };
        let rate = first.sampling_rate;

        let mut stations: Vec<(String, &[f64])> = Vec::new();
        let mut band_series: Vec<&[f64]> = Vec::new();
        let mut hp_series: Vec<Option<&[f64]>> = Vec::new();
        for tr in band {
            let Some(table) = self.travel_times.table(&tr.scnl) else {
                logging::warn(Subsystem::Locator, Some(&tr.scnl.to_string()), "no travel-time table, skipped");
                continue;
            };
            stations.push((tr.scnl.station.clone(), table));
            band_series.push(&tr.data);
            hp_series.push(highpass.iter().find(|h| h.scnl == tr.scnl).map(|h| h.data.as_slice()));
        }
        let tables: Vec<&[f64]> = stations.iter().map(|(_, t)| *t).collect();
        let names: Vec<&str> = stations.iter().map(|(s, _)| s.as_str()).collect();
        let max_shift = self.max_shift_samples(&tables, rate);

        let npts = band_series.iter().map(|s| s.len()).min().unwrap_or(0);
        let win = (window_length * rate).round() as usize;
        let hop = ((step * rate).round() as usize).max(1);
        if win == 0 || npts < win {
            return Vec::new();
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut events = Vec::new();
        let mut w0 = 0;
        while w0 + win <= npts {
            let segments: Vec<&[f64]> = band_series.iter().map(|s| &s[w0..w0 + win]).collect();
            let window_start: DateTime<Utc> = first.time_of(w0);

            if let Some(main) = self.solve_window(&segments, &tables, &names, max_shift, rate) {
                let scatter_km = self.bootstrap(&segments, &tables, &names, max_shift, rate, main.node, &mut rng);
                let hp_segments: Option<Vec<&[f64]>> =
                    hp_series.iter().map(|s| s.and_then(|d| d.get(w0..w0 + win))).collect();
                let highpass = match hp_segments {
                    Some(hp) => self
                        .solve_window(&hp, &tables, &names, max_shift, rate)
                        .is_some_and(|sol| sol.mean_cc >= main.mean_cc),
                    None => false,
                };
                let (lat, lon, dep) = self.grid.node(main.node);
                events.push(TremorEvent {
                    latitude: lat,
                    longitude: lon,
                    depth_km: dep,
                    starttime: window_start,
                    scatter_km,
                    mean_cc: main.mean_cc,
                    highpass,
                });
            }
            w0 += hop;
        }
        events
    }

    /// Largest differential travel time in the grid, in samples, plus one.
    fn max_shift_samples(&self, tables: &[&[f64]], rate: f64) -> usize {
        let mut widest: f64 = 0.0;
        for n in 0..self.grid.len() {
            let (lo, hi) = tables
                .iter()
                .map(|t| t[n])
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            if hi >= lo {
                widest = widest.max(hi - lo);
            }
        }
        (widest * rate).ceil() as usize + 1
    }

    fn measure(&self, segments: &[&[f64]], max_shift: usize, rate: f64) -> Vec<PairLag> {
        let LocatorParams { cmin, cmax, .. } = self.params;
        let mut pairs = Vec::new();
        for a in 0..segments.len() {
            for b in (a + 1)..segments.len() {
                let cc = correlate(segments[a], segments[b], max_shift);
                let Some((idx, value)) = best_peak(&cc) else {
                    continue;
                };
                if value < cmin {
                    continue;
                }
                let weight = if cmax > cmin {
                    ((value - cmin) / (cmax - cmin)).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                pairs.push(PairLag {
                    a,
                    b,
                    lag: peak_lag_seconds(idx, max_shift, rate),
                    cc: value,
                    weight,
                });
            }
        }
        pairs
    }

    fn solve_window(
        &self,
        segments: &[&[f64]],
        tables: &[&[f64]],
        names: &[&str],
        max_shift: usize,
        rate: f64,
    ) -> Option<WindowSolution> {
        let pairs = self.measure(segments, max_shift, rate);
        let distinct: BTreeSet<&str> = pairs.iter().flat_map(|p| [names[p.a], names[p.b]]).collect();
        if distinct.len() < self.params.min_sta {
            return None;
        }
        let total_weight: f64 = pairs.iter().map(|p| p.weight).sum();
        if total_weight <= 0.0 {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        for n in 0..self.grid.len() {
            let misfit = pairs
                .iter()
                .map(|p| {
                    let predicted = tables[p.a][n] - tables[p.b][n];
                    p.weight * (p.lag - predicted).powi(2)
                })
                .sum::<f64>()
                / total_weight;
            if best.is_none_or(|(_, m)| misfit < m) {
                best = Some((n, misfit));
            }
        }
        let mean_cc = pairs.iter().map(|p| p.weight * p.cc).sum::<f64>() / total_weight;
        best.map(|(node, _)| WindowSolution { node, mean_cc })
    }

    /// RMS horizontal distance of bootstrap solutions from the main one.
    /// Infinite when no bootstrap iteration locates.
    #[allow(clippy::too_many_arguments)]
    fn bootstrap(
        &self,
        segments: &[&[f64]],
        tables: &[&[f64]],
        names: &[&str],
        max_shift: usize,
        rate: f64,
        main_node: usize,
        rng: &mut StdRng,
    ) -> f64 {
        let iterations = self.params.bootstrap_iterations;
        if iterations == 0 {
            return 0.0;
        }
        let len = segments.first().map(|s| s.len()).unwrap_or(0);
        let masked_count = ((len as f64) * self.params.bootstrap_fraction).round() as usize;
        let masked_count = masked_count.min(len.saturating_sub(2));
        let (lat0, lon0, _) = self.grid.node(main_node);

        let mut sum_sq = 0.0;
        let mut located = 0usize;
        for _ in 0..iterations {
            let mask = rand::seq::index::sample(rng, len, masked_count);
            let resampled: Vec<Vec<f64>> = segments
                .iter()
                .map(|s| {
                    let mean = s.iter().sum::<f64>() / s.len() as f64;
                    let mut copy = s.to_vec();
                    for i in mask.iter() {
                        copy[i] = mean;
                    }
                    copy
                })
                .collect();
            let views: Vec<&[f64]> = resampled.iter().map(|v| v.as_slice()).collect();
            if let Some(sol) = self.solve_window(&views, tables, names, max_shift, rate) {
                let (lat, lon, _) = self.grid.node(sol.node);
                sum_sq += haversine_km(lat0, lon0, lat, lon).powi(2);
                located += 1;
            }
        }
        if located == 0 {
            return f64::INFINITY;
        }
        (sum_sq / located as f64).sqrt()
    }
}

/// Drops events whose bootstrap scatter exceeds `max_scatter` km.
pub fn remove(events: Vec<TremorEvent>, max_scatter: f64) -> Vec<TremorEvent> {
    events.into_iter().filter(|e| e.scatter_km <= max_scatter).collect()
}

/// Drops events flagged as high-frequency noise.
pub fn remove_highpass(events: Vec<TremorEvent>) -> Vec<TremorEvent> {
    events.into_iter().filter(|e| !e.highpass).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    #[test]
    fn test_range_axis_includes_stop() {
        let axis = AxisSpec::Range { start: 55.0, stop: 55.5, step: 0.1 };
        let nodes = axis.nodes().unwrap();
        assert_eq!(nodes.len(), 6);
        assert_abs_diff_eq!(nodes[5], 55.5, epsilon = 1e-9);

        let axis = AxisSpec::Range { start: 0.0, stop: 0.95, step: 0.5 };
        assert_eq!(axis.nodes().unwrap(), vec![0.0, 0.5], "0.95 is not within 1e-3 of a step");
    }

    #[test]
    fn test_axis_spec_deserializes_both_forms() {
        #[derive(Deserialize)]
        struct Holder {
            a: AxisSpec,
        }
        let holder: Holder = toml::from_str("a = { start = 0.0, stop = 10.0, step = 5.0 }").unwrap();
        assert_eq!(holder.a.nodes().unwrap(), vec![0.0, 5.0, 10.0]);
        let nodes: AxisSpec = serde_json::from_str("[1.0, 3.0]").unwrap();
        assert_eq!(nodes, AxisSpec::Nodes(vec![1.0, 3.0]));
    }

    #[test]
    fn test_phase_velocity_parsing() {
        assert_eq!(phase_velocity("3kmps").unwrap(), 3.0);
        assert_eq!(phase_velocity("2.5kmps").unwrap(), 2.5);
        assert!(phase_velocity("P").is_err());
        assert!(phase_velocity("0kmps").is_err());
    }

    #[test]
    fn test_node_order_is_lat_lon_depth() {
        let grid = LocationGrid {
            lats: vec![1.0, 2.0],
            lons: vec![10.0, 20.0, 30.0],
            deps: vec![0.0, 5.0],
        };
        assert_eq!(grid.len(), 12);
        assert_eq!(grid.node(0), (1.0, 10.0, 0.0));
        assert_eq!(grid.node(1), (1.0, 10.0, 5.0));
        assert_eq!(grid.node(2), (1.0, 20.0, 0.0));
        assert_eq!(grid.node(11), (2.0, 30.0, 5.0));
    }

    #[test]
    fn test_travel_time_is_hypocentral_distance_over_velocity() {
        let grid = LocationGrid { lats: vec![0.0], lons: vec![0.0], deps: vec![4.0] };
        let station = (
            Scnl::new("STA", "BHZ", "AV", "--"),
            StationCoordinates { latitude: 0.0, longitude: 0.0, elevation: None },
        );
        let tt = TravelTimeGrid::compute(&grid, &[station.clone()], "2kmps").unwrap();
        assert_abs_diff_eq!(tt.table(&station.0).unwrap()[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_remove_filters() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let event = |scatter: f64, highpass: bool| TremorEvent {
            latitude: 55.4,
            longitude: -161.9,
            depth_km: 2.0,
            starttime: t0,
            scatter_km: scatter,
            mean_cc: 0.8,
            highpass,
        };
        let kept = remove(vec![event(1.0, false), event(5.0, false), event(f64::INFINITY, false)], 3.0);
        assert_eq!(kept.len(), 1);
        let kept = remove_highpass(vec![event(1.0, true), event(1.0, false)]);
        assert_eq!(kept.len(), 1);
        assert!(!kept[0].highpass);
    }
}
