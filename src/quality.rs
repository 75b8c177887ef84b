//! Data Sufficiency Checks
//!
//! Waveform sources zero-fill whatever they could not deliver, so a missing
//! station shows up as an all-zero trace and a telemetry dropout as a run of
//! zeros. These checks decide which traces are usable before any array
//! processing happens.

use crate::logging::{self, Subsystem};
use crate::model::Trace;

// ============================================================================
// Per-channel status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelStatus {
    Usable,
    /// Every sample is zero.
    Zeroed,
    /// More than the allowed share of samples is zero.
    Gappy { zero_fraction: f64 },
}

/// Share of exactly-zero samples. An empty trace counts as fully zeroed.
pub fn zero_fraction(trace: &Trace) -> f64 {
    if trace.data.is_empty() {
        return 1.0;
    }
    let zeros = trace.data.iter().filter(|v| **v == 0.0).count();
    zeros as f64 / trace.data.len() as f64
}

pub fn channel_status(trace: &Trace, max_zero_fraction: f64) -> ChannelStatus {
    let fraction = zero_fraction(trace);
    if fraction >= 1.0 {
        ChannelStatus::Zeroed
    } else if fraction > max_zero_fraction {
        ChannelStatus::Gappy { zero_fraction: fraction }
    } else {
        ChannelStatus::Usable
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Drops traces with no data at all. Returns the survivors.
pub fn drop_zeroed(traces: Vec<Trace>) -> Vec<Trace> {
    traces
        .into_iter()
        .filter(|tr| {
            let keep = zero_fraction(tr) < 1.0;
            if !keep {
                logging::warn(Subsystem::Waveform, Some(&tr.scnl.to_string()), "no data, dropped");
            }
            keep
        })
        .collect()
}

/// Drops traces whose zero fraction exceeds `max_zero_fraction`.
pub fn drop_gappy(traces: Vec<Trace>, max_zero_fraction: f64) -> Vec<Trace> {
    traces
        .into_iter()
        .filter(|tr| match channel_status(tr, max_zero_fraction) {
            ChannelStatus::Usable => true,
            ChannelStatus::Zeroed => {
                logging::warn(Subsystem::Waveform, Some(&tr.scnl.to_string()), "no data, dropped");
                false
            }
            ChannelStatus::Gappy { zero_fraction } => {
                logging::warn(
                    Subsystem::Waveform,
                    Some(&tr.scnl.to_string()),
                    &format!("{:.1}% zeros, dropped", zero_fraction * 100.0),
                );
                false
            }
        })
        .collect()
}

/// Number of distinct station positions among the traces.
///
/// Multi-component stations contribute several traces at one latitude; only
/// the position counts toward a location's station minimum.
pub fn distinct_stations(traces: &[Trace]) -> usize {
    let mut lats: Vec<f64> = traces
        .iter()
        .filter_map(|t| t.coordinates.map(|c| c.latitude))
        .collect();
    lats.sort_by(|a, b| a.total_cmp(b));
    lats.dedup();
    lats.len()
}
