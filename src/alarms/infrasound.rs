/// Airwave detection on a small infrasound array.
///
/// The last `duration` seconds of every channel are checked for data,
/// band-passed and brought to a common rate. Channels that never exceed the
/// smallest pressure threshold are dropped; the rest are cross-correlated
/// pairwise, associated into the largest consistent group and inverted for
/// a plane wave. The result is classified against the configured volcanoes.

use chrono::{DateTime, Utc};

use crate::alarms::AlarmContext;
use crate::alert::classification::{Classification, DetectionState, classify};
use crate::alert::messages::{GAPPY_DATA, NOT_ENOUGH_CHANNELS, infrasound_alert, infrasound_state_message, state_prefix};
use crate::alert::{AlarmOutcome, Alert, FigureKind, FigureRequest, HeartbeatState};
use crate::analysis::association::associate;
use crate::analysis::filter::{self, FilterKind, decimate, demean, max_abs, resample, taper};
use crate::analysis::inversion::invert;
use crate::analysis::xcorr::{align_and_stack, measure_pairs, velocity_gate};
use crate::config::InfrasoundConfig;
use crate::geometry::ArrayGeometry;
use crate::logging::{self, Subsystem};
use crate::model::{AlarmError, Scnl, StationCoordinates, Trace, seconds};
use crate::quality::{drop_gappy, drop_zeroed};
use crate::stations::attach_coordinates;

const BANDPASS_CORNERS: usize = 4;

pub fn run(config: &InfrasoundConfig, t0: DateTime<Utc>, ctx: &AlarmContext) -> Result<AlarmOutcome, AlarmError> {
    let name = config.alarm_name.as_str();
    let prefix = state_prefix(t0, name);
    let sites = config.sites()?;
    let channels: Vec<Scnl> = sites.iter().map(|s| s.scnl.clone()).collect();
    let t1 = t0 - seconds(config.duration);

    // ── data sufficiency ────────────────────────────────────────────────
    let traces = attach_coordinates(ctx.waveforms.get_waveforms(&channels, t1, t0), &sites);
    let traces = drop_zeroed(traces);
    if traces.len() < config.min_chan {
        logging::log_channel_summary(name, channels.len(), traces.len());
        return Ok(AlarmOutcome::new(
            HeartbeatState::Warning,
            format!("{} - {}", prefix, NOT_ENOUGH_CHANNELS),
        ));
    }
    let mut traces = drop_gappy(traces, config.max_zero_fraction);
    logging::log_channel_summary(name, channels.len(), traces.len());
    if traces.len() < config.min_chan {
        return Ok(AlarmOutcome::new(HeartbeatState::Warning, format!("{} - {}", prefix, GAPPY_DATA)));
    }

    for trace in traces.iter_mut() {
        preprocess(trace, config)?;
    }

    // ── amplitude gate ──────────────────────────────────────────────────
    let min_pa = config.min_pressure();
    let traces: Vec<Trace> = traces
        .into_iter()
        .filter(|tr| max_abs(&tr.data) * config.digouti > min_pa)
        .collect();
    if traces.len() < config.min_chan {
        let c = Classification::without_detection(DetectionState::AmplitudeInsufficient);
        return Ok(AlarmOutcome::new(
            c.state.heartbeat(),
            infrasound_state_message(&prefix, &c, &config.volcano),
        ));
    }

    let classification = analyse(config, &traces);
    let message = infrasound_state_message(&prefix, &classification, &config.volcano);
    let outcome = AlarmOutcome::new(classification.state.heartbeat(), message);
    if classification.state != DetectionState::Detection {
        return Ok(outcome);
    }

    let (Some(detection), Some(volcano), Some(d_azimuth)) = (
        classification.detection,
        classification.volcano.and_then(|i| config.volcano.get(i)),
        classification.d_azimuth,
    ) else {
        return Err(AlarmError::Computation("detection without a matched volcano".into()));
    };
    let (subject, body) = infrasound_alert(
        name,
        &volcano.volcano,
        (t1, t0),
        &detection,
        d_azimuth,
        classification.max_pressure,
        &ctx.zone,
    );

    let mut labels: Vec<String> = traces.iter().map(|t| t.scnl.to_string()).collect();
    if let Some(seismic) = &volcano.seismic_scnl {
        labels.push(seismic.clone());
    }
    let detecting: Vec<Scnl> = traces.iter().map(|t| t.scnl.clone()).collect();
    let (plot_start, series) = plot_stack(config, &detecting, t0, ctx)?;
    let figure = FigureRequest {
        kind: FigureKind::InfrasoundDetection,
        starttime: plot_start,
        endtime: t0,
        labels,
        series,
    };
    Ok(outcome.with_alert(Alert {
        subject,
        body,
        figure: Some(figure),
    }))
}

/// Aligned pressure stack of `channels` over the plot window ending at `t0`.
fn plot_stack(
    config: &InfrasoundConfig,
    channels: &[Scnl],
    t0: DateTime<Utc>,
    ctx: &AlarmContext,
) -> Result<(DateTime<Utc>, Vec<f64>), AlarmError> {
    let plot_t1 = t0 - seconds(config.infrasound_plot_duration);
    let mut pressures = Vec::with_capacity(channels.len());
    for mut trace in ctx.waveforms.get_waveforms(channels, plot_t1, t0) {
        preprocess(&mut trace, config)?;
        pressures.push(trace.data.iter().map(|v| v * config.digouti).collect::<Vec<f64>>());
    }
    Ok((plot_t1, align_and_stack(&pressures, config.cc_shift_length)))
}

/// Demean, taper, causal bandpass, then the target rate: integer-factor
/// decimation where the rates allow it, Fourier resampling otherwise.
pub fn preprocess(trace: &mut Trace, config: &InfrasoundConfig) -> Result<(), AlarmError> {
    demean(trace);
    taper(trace, config.taper_val);
    filter::filter(trace, FilterKind::Bandpass(config.f1, config.f2), BANDPASS_CORNERS, false)?;

    let target = config.target_sampling_rate;
    let ratio = trace.sampling_rate / target;
    if ratio > 1.5 && (ratio - ratio.round()).abs() < 1e-9 {
        decimate(trace, ratio.round() as usize)?;
    }
    if (trace.sampling_rate - target).abs() > 1e-9 {
        resample(trace, target);
    }
    Ok(())
}

/// Correlation, association, inversion and classification of the traces
/// that passed the amplitude gate. Traces must share one sampling rate and
/// carry coordinates.
pub fn analyse(config: &InfrasoundConfig, traces: &[Trace]) -> Classification {
    let name = config.alarm_name.as_str();
    let coords: Vec<StationCoordinates> = traces.iter().filter_map(|t| t.coordinates).collect();
    if coords.len() != traces.len() || traces.is_empty() {
        logging::warn(Subsystem::Locator, Some(name), "traces without coordinates, nothing to analyse");
        return Classification::without_detection(DetectionState::Normal);
    }
    let geometry = ArrayGeometry::from_coordinates(&coords);
    let rate = traces[0].sampling_rate;
    let series: Vec<Vec<f64>> = traces.iter().map(|t| t.data.clone()).collect();

    let measurements = measure_pairs(
        &series,
        rate,
        config.cc_shift_length,
        config.min_cc,
        velocity_gate(&geometry, config.min_velocity()),
    );
    logging::debug(
        Subsystem::Locator,
        Some(name),
        &format!(
            "{} of {} pairs correlate across {:.0} m",
            measurements.len(),
            traces.len() * (traces.len() - 1) / 2,
            geometry.aperture_km() * 1000.0
        ),
    );

    let association = associate(&measurements, traces.len(), config.min_chan);
    if !association.is_detection() {
        return Classification::without_detection(DetectionState::Normal);
    }
    let Some(best) = association.best() else {
        return Classification::without_detection(DetectionState::Normal);
    };

    let max_pressure = traces.iter().map(|t| max_abs(&t.data)).fold(0.0, f64::max) * config.digouti;
    match invert(best, &measurements, &geometry) {
        Ok(detection) => {
            logging::info(
                Subsystem::Locator,
                Some(name),
                &format!(
                    "{}-station group: {:.0} deg, {:.3} km/s, rms {:.3} s",
                    association.group_size, detection.backazimuth, detection.velocity, detection.rms
                ),
            );
            classify(detection, max_pressure, &config.volcano, geometry.center)
        }
        Err(e) => {
            logging::warn(Subsystem::Locator, Some(name), &format!("inversion failed: {}", e));
            Classification {
                max_pressure,
                ..Classification::without_detection(DetectionState::AssociationFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::messages::LocalZone;
    use crate::config::AlarmConfig;
    use crate::ingest::{EventQuery, EventRecord, EventSource, InMemoryWaveforms};
    use crate::notify::Recorder;
    use chrono::TimeZone;

    struct NoEvents;

    impl EventSource for NoEvents {
        fn get_events(&self, _query: &EventQuery) -> Result<Vec<EventRecord>, AlarmError> {
            Ok(Vec::new())
        }
    }

    fn config() -> InfrasoundConfig {
        let text = r#"
alarm_type = "Infrasound"
alarm_name = "Akutan Infrasound"
duration = 60
latency = 0
taper_val = 2
f1 = 0.5
f2 = 10.0
digouti = 0.0001
min_cc = 0.5
min_chan = 3
cc_shift_length = 50

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
"#;
        match AlarmConfig::from_toml_str(text).unwrap() {
            AlarmConfig::Infrasound(c) => c,
            other => panic!("expected an infrasound config, got {:?}", other),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
            })
            .collect()
    }

    #[test]
    fn test_preprocess_brings_traces_to_target_rate() {
        let c = config();
        let mut decimated = Trace::new(Scnl::new("AKS", "HDF", "AV", "01"), 100.0, t0(), noise(6000, 1));
        preprocess(&mut decimated, &c).unwrap();
        assert_eq!(decimated.sampling_rate, 50.0);
        assert_eq!(decimated.npts(), 3000);

        let mut resampled = Trace::new(Scnl::new("AKS", "HDF", "AV", "02"), 40.0, t0(), noise(2400, 2));
        preprocess(&mut resampled, &c).unwrap();
        assert_eq!(resampled.sampling_rate, 50.0);
        assert_eq!(resampled.npts(), 3000);
    }

    #[test]
    fn test_missing_channels_warn_not_enough_channels() {
        let recorder = Recorder::new();
        let waveforms = InMemoryWaveforms::default();
        let ctx = AlarmContext {
            waveforms: &waveforms,
            events: &NoEvents,
            notifiers: recorder.notifiers(),
            zone: LocalZone::system("local"),
            skip_latency: true,
        };
        let outcome = run(&config(), t0(), &ctx).unwrap();
        assert_eq!(outcome.state, HeartbeatState::Warning);
        assert_eq!(outcome.message, "2024-05-01 12:00 (UTC) Akutan Infrasound - Not enough channels!");
        assert!(outcome.alerts.is_empty());
    }

    #[test]
    fn test_quiet_channels_fail_amplitude_gate() {
        let c = config();
        let t1 = t0() - seconds(c.duration);
        let traces: Vec<Trace> = c
            .sites()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, s)| Trace::new(s.scnl.clone(), 50.0, t1, noise(3001, i as u64 + 7)))
            .collect();
        let waveforms = InMemoryWaveforms::new(traces);
        let recorder = Recorder::new();
        let ctx = AlarmContext {
            waveforms: &waveforms,
            events: &NoEvents,
            notifiers: recorder.notifiers(),
            zone: LocalZone::system("local"),
            skip_latency: true,
        };
        let outcome = run(&c, t0(), &ctx).unwrap();
        assert_eq!(outcome.state, HeartbeatState::Ok);
        assert!(
            outcome.message.ends_with("not enough channels exceeding amplitude threshold!"),
            "got {}",
            outcome.message
        );
    }
}
