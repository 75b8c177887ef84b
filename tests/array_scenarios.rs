//! Array Processing Scenarios
//!
//! Five-element array, plane wave at 0.34 km/s. Either every element sees
//! the wave, or two of them record only noise and have to be left out of
//! the association and the inversion.

use volmon_service::alert::classification::{DetectionState, classify};
use volmon_service::analysis::association::associate;
use volmon_service::analysis::inversion::invert;
use volmon_service::analysis::xcorr::{measure_pairs, velocity_gate};
use volmon_service::config::VolcanoTarget;
use volmon_service::geometry::ArrayGeometry;
use volmon_service::model::StationCoordinates;

const RATE: f64 = 50.0;
const NPTS: usize = 3001;
const MAX_SHIFT: usize = 150;
const MIN_CC: f64 = 0.5;
const VELOCITY: f64 = 0.34;
const BACKAZIMUTH: f64 = 285.0;

fn geometry() -> ArrayGeometry {
    let coords: Vec<StationCoordinates> = [
        (54.1130, -165.6970),
        (54.1085, -165.7020),
        (54.1085, -165.6920),
        (54.1100, -165.6970),
        (54.1115, -165.7040),
    ]
    .iter()
    .map(|(lat, lon)| StationCoordinates {
        latitude: *lat,
        longitude: *lon,
        elevation: None,
    })
    .collect();
    ArrayGeometry::from_coordinates(&coords)
}

fn noise(seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..NPTS)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
        })
        .collect()
}

/// Element records: the wave plus a little noise, or noise alone.
fn records(geometry: &ArrayGeometry, noisy: &[usize]) -> Vec<Vec<f64>> {
    let toward_source = (BACKAZIMUTH.to_radians().cos(), BACKAZIMUTH.to_radians().sin());
    geometry
        .positions
        .iter()
        .enumerate()
        .map(|(k, (north, east))| {
            let background = noise(k as u64 + 101);
            if noisy.contains(&k) {
                return background;
            }
            let at = 30.0 - (north * toward_source.0 + east * toward_source.1) / VELOCITY;
            (0..NPTS)
                .map(|i| {
                    let t = i as f64 / RATE - at;
                    let x = t / 0.5;
                    (-0.5 * x * x).exp() * (4.0 * std::f64::consts::PI * t).sin() + 0.01 * background[i]
                })
                .collect()
        })
        .collect()
}

fn target() -> VolcanoTarget {
    VolcanoTarget {
        volcano: "Akutan".to_string(),
        v_lat: 54.1336,
        v_lon: -165.986,
        azimuth_tolerance: 15.0,
        min_pa: 0.5,
        vmin: 0.28,
        vmax: 0.45,
        back_azimuth: Some(BACKAZIMUTH),
        seismic_scnl: None,
    }
}

#[test]
fn test_all_elements_consistent_gives_full_group_detection() {
    let geometry = geometry();
    let series = records(&geometry, &[]);
    let pairs = measure_pairs(&series, RATE, MAX_SHIFT, MIN_CC, velocity_gate(&geometry, 0.28));
    assert_eq!(pairs.len(), 10, "every pair correlates");

    let association = associate(&pairs, 5, 3);
    assert_eq!(association.group_size, 5, "accepted on the first attempt");
    assert_eq!(association.combinations.len(), 1);
    let best = association.best().unwrap();
    assert_eq!(best.votes, 10);

    let detection = invert(best, &pairs, &geometry).unwrap();
    assert!((detection.velocity - VELOCITY).abs() < 0.015, "velocity {}", detection.velocity);
    assert!((detection.backazimuth - BACKAZIMUTH).abs() < 2.0, "backazimuth {}", detection.backazimuth);

    let c = classify(detection, 5.0, &[target()], geometry.center);
    assert_eq!(c.state, DetectionState::Detection);
}

#[test]
fn test_two_noisy_elements_are_left_out() {
    let geometry = geometry();
    let series = records(&geometry, &[1, 4]);
    let pairs = measure_pairs(&series, RATE, MAX_SHIFT, MIN_CC, velocity_gate(&geometry, 0.28));
    assert!(
        pairs.iter().all(|p| ![1, 4].contains(&p.i) && ![1, 4].contains(&p.j)),
        "noise must not correlate: {:?}",
        pairs
    );

    let association = associate(&pairs, 5, 3);
    assert_eq!(association.group_size, 3, "sizes 5 and 4 are rejected");
    let best = association.best().unwrap();
    assert_eq!(best.members, vec![0, 2, 3]);
    assert_eq!(best.votes, 3);

    let detection = invert(best, &pairs, &geometry).unwrap();
    assert!((detection.velocity - VELOCITY).abs() < 0.02, "velocity {}", detection.velocity);
    assert!((detection.backazimuth - BACKAZIMUTH).abs() < 3.0, "backazimuth {}", detection.backazimuth);
}

#[test]
fn test_noise_only_array_associates_nothing() {
    let geometry = geometry();
    let series = records(&geometry, &[0, 1, 2, 3, 4]);
    let pairs = measure_pairs(&series, RATE, MAX_SHIFT, MIN_CC, velocity_gate(&geometry, 0.28));
    let association = associate(&pairs, 5, 3);
    assert!(!association.is_detection());
    assert!(association.best().is_none());
}
