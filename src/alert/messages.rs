//! Heartbeat state messages and alert text.

use chrono::{DateTime, FixedOffset, Local, Utc};

use crate::alert::activity::{TremorLevel, minutes_to_string};
use crate::alert::classification::{Classification, DetectionState};
use crate::config::VolcanoTarget;
use crate::model::{ArrayDetection, Swarm};

const MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

pub const NOT_ENOUGH_CHANNELS: &str = "Not enough channels!";
pub const GAPPY_DATA: &str = "Gappy data!";
pub const DATA_MISSING: &str = "Data missing!";

/// The zone local times in alert bodies are shown in.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalZone {
    offset: Option<FixedOffset>,
    label: String,
}

impl LocalZone {
    /// The machine's zone, as chrono reads it from `TZ` or the system.
    pub fn system(label: &str) -> Self {
        LocalZone {
            offset: None,
            label: label.to_string(),
        }
    }

    pub fn fixed(offset: FixedOffset, label: &str) -> Self {
        LocalZone {
            offset: Some(offset),
            label: label.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn format(&self, t: DateTime<Utc>) -> String {
        match self.offset {
            Some(offset) => t.with_timezone(&offset).format(MINUTE_FORMAT).to_string(),
            None => t.with_timezone(&Local).format(MINUTE_FORMAT).to_string(),
        }
    }
}

fn utc(t: DateTime<Utc>) -> String {
    t.format(MINUTE_FORMAT).to_string()
}

/// `"{T0} (UTC) {alarm_name}"`, the start of every heartbeat message.
pub fn state_prefix(t0: DateTime<Utc>, alarm_name: &str) -> String {
    format!("{} (UTC) {}", utc(t0), alarm_name)
}

/// Start/end block in UTC followed by local time.
fn window_block(t1: DateTime<Utc>, t2: DateTime<Utc>, zone: &LocalZone) -> String {
    format!(
        "Start: {} (UTC)\nEnd: {} (UTC)\n\nStart: {} ({})\nEnd: {} ({})\n\n",
        utc(t1),
        utc(t2),
        zone.format(t1),
        zone.label(),
        zone.format(t2),
        zone.label()
    )
}

// ---------------------------------------------------------------------------
// Infrasound
// ---------------------------------------------------------------------------

pub fn infrasound_state_message(prefix: &str, c: &Classification, volcanoes: &[VolcanoTarget]) -> String {
    let detail = match c.state {
        DetectionState::Normal => "alarm normal.".to_string(),
        DetectionState::AmplitudeInsufficient => "not enough channels exceeding amplitude threshold!".to_string(),
        DetectionState::AssociationFailed => "alarm normal (array inversion failed).".to_string(),
        DetectionState::WrongBackazimuth => format!(
            "Detection with wrong backazimuth ({:.0} from N)",
            c.detection.map_or(0.0, |d| d.backazimuth)
        ),
        DetectionState::WrongVelocityOrAmplitude => format!(
            "Detection with wrong velocity ({:.1} km/s) or maximum pressure ({:.1} Pa)",
            c.detection.map_or(0.0, |d| d.velocity),
            c.max_pressure
        ),
        DetectionState::Detection => format!(
            "{} detection! {:.1} Pa peak pressure",
            c.volcano.and_then(|i| volcanoes.get(i)).map_or("Unknown", |v| v.volcano.as_str()),
            c.max_pressure
        ),
    };
    format!("{} - {}", prefix, detail)
}

/// Subject and body of an airwave detection alert.
pub fn infrasound_alert(
    alarm_name: &str,
    volcano: &str,
    window: (DateTime<Utc>, DateTime<Utc>),
    detection: &ArrayDetection,
    d_azimuth: f64,
    max_pressure: f64,
    zone: &LocalZone,
) -> (String, String) {
    let subject = format!("{} Airwave Detection", volcano);
    let body = format!(
        "{} alarm:\n{} detection!\n\n{}Azimuth: {:+.1} degrees\nd_Azimuth: {:+.1} degrees\nVelocity: {:.0} m/s\nMax Pressure: {:.1} Pa",
        alarm_name,
        volcano,
        window_block(window.0, window.1, zone),
        detection.backazimuth,
        d_azimuth,
        detection.velocity * 1000.0,
        max_pressure
    );
    (subject, body)
}

// ---------------------------------------------------------------------------
// Tremor
// ---------------------------------------------------------------------------

pub fn tremor_duration_text(minutes: f64, lookback_s: f64) -> String {
    let lookback = minutes_to_string(lookback_s / 60.0);
    if minutes > 0.0 {
        format!(
            "Correlated seismicity in {} of past {} minutes.",
            minutes_to_string(minutes),
            lookback
        )
    } else {
        format!("No correlated seismicity in the past {} minutes.", lookback)
    }
}

/// Recency of the last window (when there is one) and the amplitude check.
pub fn tremor_recency_text(recency_minutes: Option<f64>, rsam_station: &str, rsam: f64, rsam_threshold: f64) -> String {
    let amplitude = format!("{} RSAM:{:.0}/{:.0}", rsam_station, rsam, rsam_threshold);
    match recency_minutes {
        Some(m) => format!("Most recent: {} minutes ago {}", minutes_to_string(m), amplitude),
        None => amplitude,
    }
}

pub fn tremor_state_message(prefix: &str, level: TremorLevel, duration_text: &str, recency_text: &str) -> String {
    format!("{} - {} {} {}", prefix, level.status(), duration_text, recency_text)
}

pub fn tremor_alert(
    alarm_name: &str,
    window: (DateTime<Utc>, DateTime<Utc>),
    statement: &str,
    zone: &LocalZone,
) -> (String, String) {
    let subject = format!("--- {} ---", alarm_name);
    let body = format!("{}{}", window_block(window.0, window.1, zone), statement);
    (subject, body)
}

// ---------------------------------------------------------------------------
// Swarm
// ---------------------------------------------------------------------------

pub const NO_NEW_EARTHQUAKES: &str = "No new earthquakes";
pub const NO_NEW_SWARM_ACTIVITY: &str = "No new swarm activity";

/// Volcano names in first-seen order, without repeats.
pub fn ongoing_swarm_message(volcanoes: &[&str]) -> String {
    let mut unique: Vec<&str> = Vec::new();
    for v in volcanoes {
        if !unique.contains(v) {
            unique.push(v);
        }
    }
    format!("Ongoing swarm activity at: {}", unique.join(", "))
}

pub fn swarm_state_message(volcano: &str) -> String {
    format!("Swarm activity at: {}", volcano)
}

pub fn swarm_alert(swarm: &Swarm, zone: &LocalZone) -> (String, String) {
    let subject = format!("Earthquake swarm at {}", swarm.volcano());
    let (Some(tmin), Some(tmax)) = (swarm.first_time(), swarm.last_time()) else {
        return (subject, "No events".to_string());
    };
    let span_s = (tmax - tmin).num_seconds();
    let hours = span_s / 3600;
    let minutes = ((span_s - hours * 3600) as f64 / 60.0).round() as i64;

    let mut body = format!(
        "{} events in past {}h {}m, from:\n\n{} - {} UTC\n{} - {} {}\n\n",
        swarm.events.len(),
        hours,
        minutes,
        utc(tmin),
        utc(tmax),
        zone.format(tmin),
        zone.format(tmax),
        zone.label()
    );

    let mags: Vec<f64> = swarm.events.iter().filter_map(|e| e.magnitude).collect();
    if mags.is_empty() {
        body.push_str("Magnitude range unknown");
    } else {
        let lo = mags.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = mags.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        body.push_str(&format!("Magnitude range {:.1} - {:.1}", lo, hi));
    }
    match swarm.events.len() - mags.len() {
        0 => {}
        1 => body.push_str(" (1 event with unassigned magnitude)"),
        n => body.push_str(&format!(" ({} events with unassigned magnitude)", n)),
    }
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Earthquake;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 3, 0).unwrap()
    }

    fn akdt() -> LocalZone {
        LocalZone::fixed(FixedOffset::west_opt(8 * 3600).unwrap(), "AKDT")
    }

    fn quake(id: &str, minutes_ago: i64, magnitude: Option<f64>) -> Earthquake {
        Earthquake {
            id: id.to_string(),
            time: t0() - Duration::minutes(minutes_ago),
            latitude: 55.42,
            longitude: -161.89,
            depth_km: Some(3.0),
            magnitude,
            volcano: "Pavlof".to_string(),
            volcano_distance_km: Some(1.5),
        }
    }

    #[test]
    fn test_state_prefix_format() {
        assert_eq!(state_prefix(t0(), "Akutan Infrasound"), "2024-05-01 12:03 (UTC) Akutan Infrasound");
    }

    #[test]
    fn test_infrasound_messages() {
        let det = ArrayDetection {
            velocity: 0.3412,
            backazimuth: 290.4,
            rms: 0.01,
        };
        let c = Classification {
            state: DetectionState::WrongBackazimuth,
            detection: Some(det),
            volcano: None,
            d_azimuth: None,
            max_pressure: 1.26,
        };
        assert_eq!(
            infrasound_state_message("P", &c, &[]),
            "P - Detection with wrong backazimuth (290 from N)"
        );

        let (subject, body) = infrasound_alert("Akutan Infrasound", "Akutan", (t0() - Duration::minutes(3), t0()), &det, -4.4, 1.26, &akdt());
        assert_eq!(subject, "Akutan Airwave Detection");
        assert!(body.starts_with("Akutan Infrasound alarm:\nAkutan detection!\n\nStart: 2024-05-01 12:00 (UTC)"));
        assert!(body.contains("Start: 2024-05-01 04:00 (AKDT)\nEnd: 2024-05-01 04:03 (AKDT)"), "got {}", body);
        assert!(body.contains("Azimuth: +290.4 degrees\nd_Azimuth: -4.4 degrees"), "got {}", body);
        assert!(body.ends_with("Velocity: 341 m/s\nMax Pressure: 1.3 Pa"), "got {}", body);
    }

    #[test]
    fn test_tremor_texts() {
        assert_eq!(
            tremor_duration_text(12.5, 3600.0),
            "Correlated seismicity in 12.5 of past 60 minutes."
        );
        assert_eq!(tremor_duration_text(0.0, 3600.0), "No correlated seismicity in the past 60 minutes.");
        assert_eq!(tremor_recency_text(Some(4.0), "PS1A", 212.4, 180.0), "Most recent: 4 minutes ago PS1A RSAM:212/180");
        assert_eq!(tremor_recency_text(None, "PS1A", 12.0, 180.0), "PS1A RSAM:12/180");
        assert_eq!(
            tremor_state_message(
                &state_prefix(t0(), "Pavlof Tremor"),
                TremorLevel::Elevated,
                "Correlated seismicity in 20 of past 60 minutes.",
                "PS1A RSAM:12/180"
            ),
            "2024-05-01 12:03 (UTC) Pavlof Tremor - Elevated seismicity. \
             Correlated seismicity in 20 of past 60 minutes. PS1A RSAM:12/180"
        );
        let (subject, body) = tremor_alert("Pavlof Tremor", (t0() - Duration::hours(1), t0()), "stmt", &akdt());
        assert_eq!(subject, "--- Pavlof Tremor ---");
        assert!(body.ends_with("(AKDT)\n\nstmt"));
    }

    #[test]
    fn test_swarm_alert_counts_missing_magnitudes() {
        let swarm = Swarm {
            events: vec![quake("a", 95, Some(0.4)), quake("b", 50, None), quake("c", 5, Some(1.7))],
            parameter_set: "long".to_string(),
            param_duration: 86400.0,
        };
        let (subject, body) = swarm_alert(&swarm, &akdt());
        assert_eq!(subject, "Earthquake swarm at Pavlof");
        assert!(body.starts_with("3 events in past 1h 30m, from:\n\n2024-05-01 10:28 - 2024-05-01 11:58 UTC\n"), "got {}", body);
        assert!(body.ends_with("Magnitude range 0.4 - 1.7 (1 event with unassigned magnitude)"), "got {}", body);
    }

    #[test]
    fn test_ongoing_swarm_lists_each_volcano_once() {
        assert_eq!(
            ongoing_swarm_message(&["Pavlof", "Shishaldin", "Pavlof"]),
            "Ongoing swarm activity at: Pavlof, Shishaldin"
        );
    }
}
