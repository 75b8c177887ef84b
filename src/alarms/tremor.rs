/// Tremor detection from located envelope-correlation windows.
///
/// Each run locates the half-overlapping windows of the last one and a half
/// window lengths, appends them to a rolling catalog and measures how many
/// of the past `duration` seconds were covered by located windows. Enough
/// coverage, with the amplitude channel above its threshold, raises the
/// alarm.

use chrono::{DateTime, Utc};

use crate::alarms::AlarmContext;
use crate::alert::activity::{TremorLevel, correlated_minutes, recency_minutes};
use crate::alert::messages::{
    DATA_MISSING, state_prefix, tremor_alert, tremor_duration_text, tremor_recency_text, tremor_state_message,
};
use crate::alert::{AlarmOutcome, Alert, FigureKind, FigureRequest, HeartbeatState};
use crate::analysis::filter::{self, FilterKind, demean, envelope, resample, rms, taper, trim};
use crate::analysis::locator::{EnvelopeLocator, TravelTimeGrid, remove, remove_highpass};
use crate::catalog::{TremorCatalogEntry, prune, read_tremor_catalog, sort_by_time, write_tremor_catalog};
use crate::config::TremorConfig;
use crate::ingest::blank_trace;
use crate::logging::{self, Subsystem};
use crate::model::{AlarmError, Scnl, StationCoordinates, Trace, seconds};
use crate::quality::{distinct_stations, drop_gappy};
use crate::stations::attach_coordinates;

const FILTER_CORNERS: usize = 3;
const ENVELOPE_LOWPASS_CORNERS: usize = 2;
/// Traces above this rate are brought down to `ENVELOPE_INPUT_RATE` first.
const ENVELOPE_RATE_CEILING: f64 = 21.0;
const ENVELOPE_INPUT_RATE: f64 = 25.0;

pub fn run(config: &TremorConfig, t0: DateTime<Utc>, ctx: &AlarmContext) -> Result<AlarmOutcome, AlarmError> {
    let name = config.alarm_name.as_str();
    let prefix = state_prefix(t0, name);
    let catalog = prune(read_tremor_catalog(&config.catalog_file)?, t0, seconds(config.duration));

    // ── data ────────────────────────────────────────────────────────────
    let sites = config.sites()?;
    let rsam_scnl = config.rsam_scnl()?;
    let channels: Vec<Scnl> = sites.iter().map(|s| s.scnl.clone()).collect();
    let t1 = t0 - seconds(1.5 * config.window_length + config.taper);
    let t2 = t0 + seconds(config.taper);
    let fetched = ctx.waveforms.get_waveforms(&channels, t1, t2);
    let rsam_raw = match fetched.iter().find(|t| t.scnl == rsam_scnl) {
        Some(t) => t.clone(),
        None => ctx
            .waveforms
            .get_waveforms(std::slice::from_ref(&rsam_scnl), t1, t2)
            .into_iter()
            .next()
            .unwrap_or_else(|| blank_trace(&rsam_scnl, t1, t2)),
    };

    let traces = drop_gappy(attach_coordinates(fetched, &sites), config.max_zero_fraction);
    logging::log_channel_summary(name, channels.len(), traces.len());
    if distinct_stations(&traces) < config.min_sta {
        return Ok(AlarmOutcome::new(HeartbeatState::Warning, format!("{} - {}", prefix, DATA_MISSING)));
    }

    // ── envelopes and amplitude ─────────────────────────────────────────
    let mut band_env = Vec::with_capacity(traces.len());
    let mut high_env = Vec::with_capacity(traces.len());
    for trace in &traces {
        let mut base = trace.clone();
        demean(&mut base);
        taper(&mut base, config.taper);
        let mut band = base.clone();
        filter::filter(&mut band, FilterKind::Bandpass(config.f1, config.f2), FILTER_CORNERS, true)?;
        filter::filter(&mut base, FilterKind::Highpass(config.highpass), FILTER_CORNERS, true)?;
        band_env.push(make_envelope(band, config)?);
        high_env.push(make_envelope(base, config)?);
    }
    let rsam = amplitude(rsam_raw, config)?;

    // ── locations ───────────────────────────────────────────────────────
    let stations: Vec<(Scnl, StationCoordinates)> = traces
        .iter()
        .filter_map(|t| t.coordinates.map(|c| (t.scnl.clone(), c)))
        .collect();
    let travel_times = TravelTimeGrid::load_or_compute(&config.grid_file, &config.location_grid()?, &stations, &config.phase)?;
    let locator = EnvelopeLocator::new(&travel_times, config.locator_params());
    let located = locator.locate(&band_env, &high_env, config.window_length, config.window_length / 2.0);
    let found = located.len();
    let events = remove_highpass(remove(located, config.max_scatter));
    logging::info(
        Subsystem::Locator,
        Some(name),
        &format!("{} window(s) located, {} kept", found, events.len()),
    );

    let mut catalog = catalog;
    catalog.extend(events.iter().map(TremorCatalogEntry::from));
    sort_by_time(&mut catalog);
    catalog.dedup_by_key(|e| e.time);
    write_tremor_catalog(&config.catalog_file, &catalog)?;

    // ── activity level ──────────────────────────────────────────────────
    let times: Vec<DateTime<Utc>> = catalog.iter().map(|e| e.time).collect();
    let minutes = correlated_minutes(&times, config.window_length);
    let recency = match times.last() {
        Some(last) if minutes > 0.0 => Some(recency_minutes(*last, config.window_length, t0)),
        _ => None,
    };
    let duration_text = tremor_duration_text(minutes, config.duration);
    let recency_text = tremor_recency_text(recency, &rsam_scnl.station, rsam, config.rsam_threshold);
    let level = TremorLevel::classify(minutes, config.threshold, rsam, config.rsam_threshold);
    let outcome = AlarmOutcome::new(
        level.heartbeat(),
        tremor_state_message(&prefix, level, &duration_text, &recency_text),
    );
    if level != TremorLevel::Detection {
        return Ok(outcome);
    }

    let (subject, body) = tremor_alert(name, (t0 - seconds(config.duration), t0), &duration_text, &ctx.zone);
    let figure = FigureRequest {
        kind: FigureKind::TremorRsam,
        starttime: t0 - seconds(config.seismic_plot_duration),
        endtime: t0,
        labels: channels.iter().map(|s| s.to_string()).collect(),
        series: Vec::new(),
    };
    Ok(outcome.with_alert(Alert {
        subject,
        body,
        figure: Some(figure),
    }))
}

/// Smoothed envelope at the envelope rate with the tapers trimmed off.
pub fn make_envelope(mut trace: Trace, config: &TremorConfig) -> Result<Trace, AlarmError> {
    if trace.sampling_rate > ENVELOPE_RATE_CEILING {
        resample(&mut trace, ENVELOPE_INPUT_RATE);
    }
    if trace.npts() % 2 == 1 {
        trace.data.push(0.0);
    }
    trace.data = envelope(&trace.data);
    resample(&mut trace, config.envelope_rate);
    filter::filter(
        &mut trace,
        FilterKind::Lowpass(config.lowpass),
        ENVELOPE_LOWPASS_CORNERS,
        true,
    )?;
    trim(&mut trace, config.taper);
    Ok(trace)
}

/// RMS of the band-passed amplitude channel.
fn amplitude(mut trace: Trace, config: &TremorConfig) -> Result<f64, AlarmError> {
    demean(&mut trace);
    taper(&mut trace, config.taper);
    filter::filter(&mut trace, FilterKind::Bandpass(config.f1, config.f2), FILTER_CORNERS, true)?;
    Ok(rms(&trace.data))
}
