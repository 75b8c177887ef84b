/// Holocene volcano list.
///
/// A CSV file with at least the columns `Volcano`, `Latitude`, `Longitude`
/// and `Holocene` (`Y`/`N`). Only Holocene volcanoes are kept. Events from
/// the event service are labelled with their nearest volcano and dropped
/// when that volcano is too far away.

use std::path::Path;

use crate::geometry::haversine_km;
use crate::ingest::EventRecord;
use crate::model::{AlarmError, Earthquake};

#[derive(Debug, Clone, PartialEq)]
pub struct Volcano {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Splits one CSV line, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}

pub fn parse_volcano_csv(text: &str) -> Result<Vec<Volcano>, AlarmError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| AlarmError::Parse("volcano list is empty".into()))?;
    let columns = split_csv_line(header.trim_start_matches('\u{feff}'));
    let find = |name: &str| {
        columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| AlarmError::Parse(format!("volcano list has no '{}' column", name)))
    };
    let (name_col, lat_col, lon_col, holo_col) = (find("Volcano")?, find("Latitude")?, find("Longitude")?, find("Holocene")?);

    let mut volcanoes = Vec::new();
    for line in lines {
        let fields = split_csv_line(line);
        let get = |i: usize| fields.get(i).map(String::as_str).unwrap_or("");
        if !get(holo_col).eq_ignore_ascii_case("Y") {
            continue;
        }
        let number = |i: usize| -> Result<f64, AlarmError> {
            get(i)
                .parse()
                .map_err(|_| AlarmError::Parse(format!("bad coordinate '{}' for {}", get(i), get(name_col))))
        };
        volcanoes.push(Volcano {
            name: get(name_col).to_string(),
            latitude: number(lat_col)?,
            longitude: number(lon_col)?,
        });
    }
    Ok(volcanoes)
}

pub fn read_volcanoes(path: &Path) -> Result<Vec<Volcano>, AlarmError> {
    let text = std::fs::read_to_string(path).map_err(|e| AlarmError::Io(format!("{}: {}", path.display(), e)))?;
    parse_volcano_csv(&text)
}

/// Closest volcano and its great-circle distance in km.
pub fn nearest_volcano(lat: f64, lon: f64, volcanoes: &[Volcano]) -> Option<(&Volcano, f64)> {
    volcanoes
        .iter()
        .map(|v| (v, haversine_km(lat, lon, v.latitude, v.longitude)))
        .fold(None, |best: Option<(&Volcano, f64)>, (v, d)| match best {
            Some((_, bd)) if d >= bd => best,
            _ => Some((v, d)),
        })
}

/// Labels events with their nearest volcano, keeping those strictly closer
/// than `max_distance_km`.
pub fn assign_volcanoes(records: &[EventRecord], volcanoes: &[Volcano], max_distance_km: f64) -> Vec<Earthquake> {
    records
        .iter()
        .filter_map(|r| {
            let (volcano, distance) = nearest_volcano(r.latitude, r.longitude, volcanoes)?;
            (distance < max_distance_km).then(|| Earthquake {
                id: r.id.clone(),
                time: r.time,
                latitude: r.latitude,
                longitude: r.longitude,
                depth_km: r.depth_km,
                magnitude: r.magnitude,
                volcano: volcano.name.clone(),
                volcano_distance_km: Some(distance),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const CSV: &str = "\
Volcano,Latitude,Longitude,Holocene
Pavlof,55.4173,-161.8937,Y
\"Emmons Lake Volcanic Center, caldera\",55.3408,-162.0786,Y
Old Cone,55.0,-161.0,N
Shishaldin,54.7554,-163.9711,Y
";

    fn record(id: &str, lat: f64, lon: f64) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            latitude: lat,
            longitude: lon,
            depth_km: Some(2.0),
            magnitude: Some(1.0),
        }
    }

    #[test]
    fn test_only_holocene_volcanoes_are_kept() {
        let volcanoes = parse_volcano_csv(CSV).unwrap();
        let names: Vec<&str> = volcanoes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["Pavlof", "Emmons Lake Volcanic Center, caldera", "Shishaldin"]);
    }

    #[test]
    fn test_events_get_nearest_volcano_within_distance() {
        let volcanoes = parse_volcano_csv(CSV).unwrap();
        let records = vec![
            record("near_pavlof", 55.42, -161.88),
            record("near_shishaldin", 54.76, -163.97),
            record("offshore", 53.5, -160.0),
        ];
        let quakes = assign_volcanoes(&records, &volcanoes, 10.0);
        assert_eq!(quakes.len(), 2);
        assert_eq!(quakes[0].volcano, "Pavlof");
        assert_eq!(quakes[1].volcano, "Shishaldin");
        assert!(quakes[0].volcano_distance_km.unwrap() < 1.5);
    }

    #[test]
    fn test_missing_column_is_parse_error() {
        assert!(parse_volcano_csv("Name,Lat,Lon\nA,1,2\n").is_err());
    }
}
