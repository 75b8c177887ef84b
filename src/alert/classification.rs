//! Infrasound detection classification.
//!
//! After the amplitude gate, association and inversion, an array detection
//! is compared against the configured volcanoes. The first volcano whose
//! expected backazimuth lies strictly within its tolerance is the candidate
//! source; the detection is then accepted only if its velocity and peak
//! pressure also fit that volcano.

use crate::alert::HeartbeatState;
use crate::config::VolcanoTarget;
use crate::geometry::{angular_difference, gps2dist_azimuth};
use crate::model::ArrayDetection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    /// No qualifying station group.
    Normal,
    /// Too few channels above the pressure threshold.
    AmplitudeInsufficient,
    /// A group was found but the inversion could not resolve it.
    AssociationFailed,
    WrongBackazimuth,
    WrongVelocityOrAmplitude,
    Detection,
}

impl DetectionState {
    pub fn heartbeat(self) -> HeartbeatState {
        match self {
            DetectionState::Normal | DetectionState::AmplitudeInsufficient | DetectionState::AssociationFailed => {
                HeartbeatState::Ok
            }
            DetectionState::WrongBackazimuth | DetectionState::WrongVelocityOrAmplitude => HeartbeatState::Warning,
            DetectionState::Detection => HeartbeatState::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub state: DetectionState,
    pub detection: Option<ArrayDetection>,
    /// Index of the matched volcano in the configured list.
    pub volcano: Option<usize>,
    /// Detection backazimuth minus the matched volcano's, in [-180, 180).
    pub d_azimuth: Option<f64>,
    /// Peak absolute pressure over the analysed traces, Pa.
    pub max_pressure: f64,
}

impl Classification {
    /// A terminal state reached before any inversion.
    pub fn without_detection(state: DetectionState) -> Self {
        Classification {
            state,
            detection: None,
            volcano: None,
            d_azimuth: None,
            max_pressure: 0.0,
        }
    }
}

/// Backazimuth from the array centre to the volcano, unless configured.
pub fn expected_backazimuth(target: &VolcanoTarget, center: (f64, f64)) -> f64 {
    target
        .back_azimuth
        .unwrap_or_else(|| gps2dist_azimuth(center.0, center.1, target.v_lat, target.v_lon).azimuth_deg)
}

/// Classifies an inverted detection against the configured volcanoes.
pub fn classify(
    detection: ArrayDetection,
    max_pressure: f64,
    volcanoes: &[VolcanoTarget],
    center: (f64, f64),
) -> Classification {
    let matched = volcanoes.iter().enumerate().find_map(|(idx, v)| {
        let d = angular_difference(detection.backazimuth, expected_backazimuth(v, center));
        (d.abs() < v.azimuth_tolerance).then_some((idx, d))
    });

    let Some((idx, d_azimuth)) = matched else {
        return Classification {
            state: DetectionState::WrongBackazimuth,
            detection: Some(detection),
            volcano: None,
            d_azimuth: None,
            max_pressure,
        };
    };

    let v = &volcanoes[idx];
    let fits = v.vmin < detection.velocity && detection.velocity < v.vmax && max_pressure > v.min_pa;
    Classification {
        state: if fits {
            DetectionState::Detection
        } else {
            DetectionState::WrongVelocityOrAmplitude
        },
        detection: Some(detection),
        volcano: Some(idx),
        d_azimuth: Some(d_azimuth),
        max_pressure,
    }
}
