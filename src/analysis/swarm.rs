//! Spatiotemporal swarm clustering.
//!
//! Earthquakes are projected to UTM kilometres and given a third coordinate,
//! their time since the earliest event scaled so that the parameter set's
//! time window maps onto its distance window. DBSCAN in that space then finds
//! groups that are close in both space and time. Several parameter sets
//! (a short dense window, a longer sparser one) run independently, so the
//! same events can surface as more than one candidate; `compare_swarms`
//! reduces the candidates to non-overlapping swarms.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{to_utm, utm_zone_letter, utm_zone_number};
use crate::model::{Earthquake, Swarm, seconds};

/// One clustering parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwarmParameters {
    pub name: String,
    /// Inter-event distance, km.
    pub max_evt_distance: f64,
    /// Inter-event time, seconds. Also the lookback of this set.
    pub max_evt_time: f64,
    /// Events needed to form a swarm, the core event included.
    pub min_num_evt: usize,
}

// ---------------------------------------------------------------------------
// DBSCAN
// ---------------------------------------------------------------------------

/// Density clustering with Euclidean distance.
///
/// A point is a core point when at least `min_samples` points (itself
/// included) lie within `eps`, boundary inclusive. Clusters are numbered in
/// the order their first core point appears; `None` marks noise.
pub fn dbscan(points: &[[f64; 3]], eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let eps_sq = eps * eps;
    let neighbours: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| {
                    let d: f64 = (0..3).map(|k| (points[i][k] - points[j][k]).powi(2)).sum();
                    d <= eps_sq
                })
                .collect()
        })
        .collect();
    let is_core: Vec<bool> = neighbours.iter().map(|nb| nb.len() >= min_samples).collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut next_label = 0;
    for start in 0..n {
        if labels[start].is_some() || !is_core[start] {
            continue;
        }
        let label = next_label;
        next_label += 1;
        labels[start] = Some(label);
        let mut stack = vec![start];
        while let Some(p) = stack.pop() {
            for &q in &neighbours[p] {
                if labels[q].is_none() {
                    labels[q] = Some(label);
                    if is_core[q] {
                        stack.push(q);
                    }
                }
            }
        }
    }
    labels
}

// ---------------------------------------------------------------------------
// Candidate swarms
// ---------------------------------------------------------------------------

/// Finds candidate swarms among `events` for every parameter set.
pub fn get_swarms(events: &[Earthquake], t0: DateTime<Utc>, parameter_sets: &[SwarmParameters]) -> Vec<Swarm> {
    if events.is_empty() {
        return Vec::new();
    }
    let n = events.len() as f64;
    let lat0 = events.iter().map(|e| e.latitude).sum::<f64>() / n;
    let lon0 = events.iter().map(|e| e.longitude).sum::<f64>() / n;
    let zone = utm_zone_number(lat0, lon0);
    let letter = utm_zone_letter(lat0).unwrap_or(if lat0 >= 0.0 { 'N' } else { 'M' });
    let xy: Vec<(f64, f64)> = events
        .iter()
        .map(|e| {
            let (east, north) = to_utm(e.latitude, e.longitude, zone, letter);
            (east / 1000.0, north / 1000.0)
        })
        .collect();

    let mut swarms = Vec::new();
    for params in parameter_sets {
        let since = t0 - seconds(params.max_evt_time);
        let selected: Vec<usize> = (0..events.len()).filter(|&i| events[i].time > since).collect();
        let Some(t_min) = selected.iter().map(|&i| events[i].time).min() else {
            continue;
        };
        let scale = params.max_evt_distance / params.max_evt_time;
        let points: Vec<[f64; 3]> = selected
            .iter()
            .map(|&i| {
                let dt = (events[i].time - t_min).num_microseconds().unwrap_or(0) as f64 / 1e6;
                [xy[i].0, xy[i].1, dt * scale]
            })
            .collect();

        let labels = dbscan(&points, params.max_evt_distance, params.min_num_evt);
        let cluster_count = labels.iter().flatten().max().map_or(0, |m| m + 1);
        for label in 0..cluster_count {
            let members: Vec<Earthquake> = selected
                .iter()
                .zip(&labels)
                .filter(|(_, l)| **l == Some(label))
                .map(|(&i, _)| events[i].clone())
                .collect();
            swarms.push(Swarm {
                events: members,
                parameter_set: params.name.clone(),
                param_duration: params.max_evt_time,
            });
        }
    }
    swarms
}

/// Removes duplicate and overlapping candidates.
///
/// Each pass compares every pair: identical ID sets drop the first of the
/// two, overlapping ones drop the longer time span (the first on a tie).
/// Passes repeat until one changes nothing; each productive pass removes at
/// least one swarm, so at most `swarms.len()` passes run.
pub fn compare_swarms(mut swarms: Vec<Swarm>) -> Vec<Swarm> {
    loop {
        let n = swarms.len();
        if n < 2 {
            return swarms;
        }
        let ids: Vec<BTreeSet<&str>> = swarms.iter().map(|s| s.ids().into_iter().collect()).collect();
        let mut remove = BTreeSet::new();
        for a in 0..n {
            for b in (a + 1)..n {
                if ids[a] == ids[b] {
                    remove.insert(a);
                } else if !ids[a].is_disjoint(&ids[b]) {
                    if swarms[a].span() >= swarms[b].span() {
                        remove.insert(a);
                    } else {
                        remove.insert(b);
                    }
                }
            }
        }
        if remove.is_empty() {
            return swarms;
        }
        drop(ids);
        let mut index = 0;
        swarms.retain(|_| {
            let keep = !remove.contains(&index);
            index += 1;
            keep
        });
    }
}
