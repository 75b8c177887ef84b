/// Station identifiers and coordinate lookup.
///
/// Alarm configurations list their channels as `STA.CHA.NET.LOC` strings
/// with a latitude/longitude next to each one. This module parses those
/// identifiers, attaches the configured coordinates to fetched traces, and
/// holds the checks every channel list has to pass before an alarm runs.

use std::collections::HashSet;

use crate::model::{AlarmError, Scnl, StationCoordinates, Trace};

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn split_four(id: &str) -> Result<[&str; 4], AlarmError> {
    let parts: Vec<&str> = id.trim().split('.').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
        return Err(AlarmError::Config(format!(
            "'{}' is not a four-part channel identifier",
            id
        )));
    }
    Ok([parts[0], parts[1], parts[2], parts[3]])
}

/// Parses a `STA.CHA.NET.LOC` identifier.
pub fn parse_scnl(id: &str) -> Result<Scnl, AlarmError> {
    let [sta, cha, net, loc] = split_four(id)?;
    Ok(Scnl::new(sta, cha, net, loc))
}

/// Parses a `NET.STA.LOC.CHA` identifier.
pub fn parse_nslc(id: &str) -> Result<Scnl, AlarmError> {
    let [net, sta, loc, cha] = split_four(id)?;
    Ok(Scnl::new(sta, cha, net, loc))
}

// ---------------------------------------------------------------------------
// Channel lists
// ---------------------------------------------------------------------------

/// A configured channel with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSite {
    pub scnl: Scnl,
    pub coordinates: StationCoordinates,
}

impl ChannelSite {
    pub fn new(id: &str, latitude: f64, longitude: f64) -> Result<Self, AlarmError> {
        Ok(ChannelSite {
            scnl: parse_scnl(id)?,
            coordinates: StationCoordinates {
                latitude,
                longitude,
                elevation: Some(0.0),
            },
        })
    }
}

/// Checks a channel list: no duplicates, coordinates on the globe.
pub fn validate_sites(sites: &[ChannelSite]) -> Result<(), AlarmError> {
    let mut seen = HashSet::new();
    for site in sites {
        if !seen.insert(&site.scnl) {
            return Err(AlarmError::Config(format!("duplicate channel '{}'", site.scnl)));
        }
        let c = site.coordinates;
        if !(-90.0..=90.0).contains(&c.latitude) || !(-180.0..=180.0).contains(&c.longitude) {
            return Err(AlarmError::Config(format!(
                "channel '{}' has invalid coordinates ({}, {})",
                site.scnl, c.latitude, c.longitude
            )));
        }
    }
    Ok(())
}

/// Looks up a channel by identifier. Returns `None` if not configured.
pub fn find_site<'a>(sites: &'a [ChannelSite], scnl: &Scnl) -> Option<&'a ChannelSite> {
    sites.iter().find(|s| &s.scnl == scnl)
}

/// Attaches configured coordinates to each trace.
///
/// Traces whose channel is not in the list are dropped; the waveform source
/// only returns what was asked for, so this only happens on a location-code
/// mismatch between server and configuration.
pub fn attach_coordinates(traces: Vec<Trace>, sites: &[ChannelSite]) -> Vec<Trace> {
    traces
        .into_iter()
        .filter_map(|mut tr| {
            let site = find_site(sites, &tr.scnl)?;
            tr.coordinates = Some(site.coordinates);
            Some(tr)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
