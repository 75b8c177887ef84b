//! Tremor activity levels.
//!
//! The tremor alarm keeps the start time of every located window in a
//! rolling catalog. Windows overlap by half their length, so the correlated
//! time in the catalog is the window count times the window length, less a
//! half window for every consecutive pair that overlaps.

use chrono::{DateTime, Utc};

use crate::alert::HeartbeatState;

/// Minutes of correlated seismicity covered by sorted window start times.
pub fn correlated_minutes(times: &[DateTime<Utc>], window_length: f64) -> f64 {
    let half_us = (window_length / 2.0 * 1e6).round() as i64;
    let overlaps = times
        .windows(2)
        .filter(|w| (w[1] - w[0]).num_microseconds() == Some(half_us))
        .count();
    (window_length * times.len() as f64 - window_length / 2.0 * overlaps as f64) / 60.0
}

/// Minutes as an integer when within 0.01 of one, otherwise to one
/// decimal. The sign is dropped.
pub fn minutes_to_string(minutes: f64) -> String {
    let text = if (minutes - minutes.round()).abs() < 0.01 {
        format!("{:.0}", minutes)
    } else {
        format!("{:.1}", minutes)
    };
    text.replace('-', "")
}

/// Minutes between the end of the last located window and `t0`.
pub fn recency_minutes(last_start: DateTime<Utc>, window_length: f64, t0: DateTime<Utc>) -> f64 {
    let last_end = last_start + crate::model::seconds(window_length);
    (t0 - last_end).num_microseconds().unwrap_or(0) as f64 / 6e7
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TremorLevel {
    Normal,
    Elevated,
    /// Long enough, but the amplitude channel is quiet.
    LowAmplitude,
    Detection,
}

impl TremorLevel {
    pub fn classify(minutes: f64, threshold: f64, rsam: f64, rsam_threshold: f64) -> Self {
        if minutes < threshold / 2.0 {
            TremorLevel::Normal
        } else if minutes < threshold {
            TremorLevel::Elevated
        } else if rsam < rsam_threshold {
            TremorLevel::LowAmplitude
        } else {
            TremorLevel::Detection
        }
    }

    pub fn heartbeat(self) -> HeartbeatState {
        match self {
            TremorLevel::Normal => HeartbeatState::Ok,
            TremorLevel::Elevated | TremorLevel::LowAmplitude => HeartbeatState::Warning,
            TremorLevel::Detection => HeartbeatState::Critical,
        }
    }

    pub fn status(self) -> &'static str {
        match self {
            TremorLevel::Normal => "Seismicity normal.",
            TremorLevel::Elevated => "Elevated seismicity.",
            TremorLevel::LowAmplitude => "Tremor/Swarm detection, but low amplitude.",
            TremorLevel::Detection => "Tremor/Swarm detection!",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minute: i64, second: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute) + Duration::seconds(second)
    }

    #[test]
    fn test_half_window_overlaps_are_counted_once() {
        // 300 s windows every 150 s: three windows cover 600 s
        let times = [t(0, 0), t(2, 30), t(5, 0)];
        assert_eq!(correlated_minutes(&times, 300.0), 10.0);
    }

    #[test]
    fn test_separated_windows_add_up() {
        let times = [t(0, 0), t(10, 0)];
        assert_eq!(correlated_minutes(&times, 300.0), 10.0);
        assert_eq!(correlated_minutes(&[], 300.0), 0.0);
    }

    #[test]
    fn test_minutes_to_string() {
        assert_eq!(minutes_to_string(25.0), "25");
        assert_eq!(minutes_to_string(24.996), "25");
        assert_eq!(minutes_to_string(12.5), "12.5");
        assert_eq!(minutes_to_string(-3.0), "3", "sign is dropped");
    }

    #[test]
    fn test_recency_counts_from_window_end() {
        assert_eq!(recency_minutes(t(0, 0), 300.0, t(20, 0)), 15.0);
    }

    #[test]
    fn test_levels_and_thresholds() {
        assert_eq!(TremorLevel::classify(12.0, 25.0, 500.0, 180.0), TremorLevel::Normal);
        assert_eq!(TremorLevel::classify(12.5, 25.0, 500.0, 180.0), TremorLevel::Elevated);
        assert_eq!(TremorLevel::classify(25.0, 25.0, 100.0, 180.0), TremorLevel::LowAmplitude);
        let level = TremorLevel::classify(25.0, 25.0, 180.0, 180.0);
        assert_eq!(level, TremorLevel::Detection);
        assert_eq!(level.heartbeat(), HeartbeatState::Critical);
    }
}
