/// Earthquake swarm detection near Holocene volcanoes.
///
/// Events of the longest parameter-set window are downloaded, labelled with
/// their nearest volcano and compared against the catalog of events already
/// reported. New events are clustered on their own first; when they form no
/// swarm, they are clustered together with the reported events to catch a
/// swarm that is still going. The catalog only ever holds events inside the
/// lookback.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};

use crate::alarms::AlarmContext;
use crate::alert::messages::{
    NO_NEW_EARTHQUAKES, NO_NEW_SWARM_ACTIVITY, ongoing_swarm_message, state_prefix, swarm_alert, swarm_state_message,
};
use crate::alert::{AlarmOutcome, Alert, FigureKind, FigureRequest, HeartbeatState};
use crate::analysis::swarm::{compare_swarms, get_swarms};
use crate::catalog::{prune, read_swarm_catalog, sort_by_time, union_by_id, write_swarm_catalog};
use crate::config::SwarmConfig;
use crate::ingest::EventQuery;
use crate::ingest::volcanoes::{assign_volcanoes, read_volcanoes};
use crate::logging::{self, Subsystem};
use crate::model::{AlarmError, Earthquake, Swarm, seconds};

pub fn run(config: &SwarmConfig, t0: DateTime<Utc>, ctx: &AlarmContext) -> Result<AlarmOutcome, AlarmError> {
    let name = config.alarm_name.as_str();
    let prefix = state_prefix(t0, name);
    let state = |state: HeartbeatState, text: &str| AlarmOutcome::new(state, format!("{} - {}", prefix, text));
    let lookback = seconds(config.lookback());

    let query = EventQuery {
        starttime: t0 - lookback,
        endtime: t0,
        max_depth_km: Some(config.maxdep),
        min_magnitude: Some(config.magmin),
    };
    let records = match ctx.events.get_events(&query) {
        Ok(records) => records,
        Err(e) => {
            logging::log_catalog_failure("event service", "download", &e);
            expire(&config.outfile, t0, lookback)?;
            return Ok(state(HeartbeatState::Warning, &format!("Event download failed: {}", e)));
        }
    };
    if records.is_empty() {
        expire(&config.outfile, t0, lookback)?;
        return Ok(state(HeartbeatState::Ok, NO_NEW_EARTHQUAKES));
    }

    let volcanoes = read_volcanoes(&config.volc_file)?;
    let nearby = assign_volcanoes(&records, &volcanoes, config.volcano_distance);
    logging::info(
        Subsystem::Catalog,
        Some(name),
        &format!("{} event(s), {} near a volcano", records.len(), nearby.len()),
    );
    if nearby.is_empty() {
        expire(&config.outfile, t0, lookback)?;
        return Ok(state(HeartbeatState::Ok, NO_NEW_SWARM_ACTIVITY));
    }

    let old = read_swarm_catalog(&config.outfile)?;
    let reported: HashSet<&str> = old.iter().map(|e| e.id.as_str()).collect();
    let new: Vec<Earthquake> = nearby
        .into_iter()
        .filter(|e| !reported.contains(e.id.as_str()))
        .collect();
    if new.is_empty() {
        store(&config.outfile, old, t0, lookback)?;
        return Ok(state(HeartbeatState::Ok, NO_NEW_EARTHQUAKES));
    }

    let swarms = get_swarms(&new, t0, &config.swarm_parameters);
    if swarms.is_empty() {
        let continuing = continuing_swarms(&old, &new, t0, config, &reported);
        if continuing.is_empty() {
            store(&config.outfile, old.clone(), t0, lookback)?;
            return Ok(state(HeartbeatState::Ok, NO_NEW_SWARM_ACTIVITY));
        }
        let names: Vec<&str> = continuing.iter().map(|s| s.volcano()).collect();
        let message = ongoing_swarm_message(&names);
        let events: Vec<Earthquake> = continuing.iter().flat_map(|s| s.events.iter().cloned()).collect();
        store(&config.outfile, union_by_id(&old, &events), t0, lookback)?;
        return Ok(state(HeartbeatState::Warning, &message));
    }

    let swarms = compare_swarms(swarms);
    let events: Vec<Earthquake> = swarms.iter().flat_map(|s| s.events.iter().cloned()).collect();
    store(&config.outfile, union_by_id(&old, &events), t0, lookback)?;

    let mut names: Vec<&str> = Vec::new();
    for s in &swarms {
        if !names.contains(&s.volcano()) {
            names.push(s.volcano());
        }
    }
    let mut outcome = state(HeartbeatState::Critical, &swarm_state_message(&names.join(", ")));
    for swarm in &swarms {
        logging::info(
            Subsystem::Catalog,
            Some(name),
            &format!("swarm at {}: {} events ({})", swarm.volcano(), swarm.events.len(), swarm.parameter_set),
        );
        let (subject, body) = swarm_alert(swarm, &ctx.zone);
        let figure = FigureRequest {
            kind: FigureKind::SwarmMap,
            starttime: swarm.first_time().unwrap_or(t0),
            endtime: t0,
            labels: swarm.ids().into_iter().map(str::to_string).collect(),
            series: Vec::new(),
        };
        outcome = outcome.with_alert(Alert {
            subject,
            body,
            figure: Some(figure),
        });
    }
    Ok(outcome)
}

/// Swarms among reported and new events, restricted to their new events.
fn continuing_swarms(
    old: &[Earthquake],
    new: &[Earthquake],
    t0: DateTime<Utc>,
    config: &SwarmConfig,
    reported: &HashSet<&str>,
) -> Vec<Swarm> {
    let all = union_by_id(old, new);
    get_swarms(&all, t0, &config.swarm_parameters)
        .into_iter()
        .map(|mut s| {
            s.events.retain(|e| !reported.contains(e.id.as_str()));
            s
        })
        .filter(|s| !s.events.is_empty())
        .collect()
}

/// Drops reported events past the lookback. A missing catalog stays missing.
fn expire(path: &Path, t0: DateTime<Utc>, lookback: Duration) -> Result<(), AlarmError> {
    let old = read_swarm_catalog(path)?;
    if old.is_empty() {
        return Ok(());
    }
    store(path, old, t0, lookback)
}

/// Prunes to the lookback, sorts and rewrites the catalog.
fn store(path: &Path, events: Vec<Earthquake>, t0: DateTime<Utc>, lookback: Duration) -> Result<(), AlarmError> {
    let mut events = prune(events, t0, lookback);
    sort_by_time(&mut events);
    write_swarm_catalog(path, &events)
}
