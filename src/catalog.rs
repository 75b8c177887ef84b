/// Rolling flat-file catalogs.
///
/// Two alarms keep state between runs in tab-delimited text files: the tremor
/// alarm its located windows, the swarm alarm the events it has already
/// reported. Each run reads the file, merges what it found, prunes anything
/// older than the lookback and rewrites the whole file. A missing file is an
/// empty catalog, which is the normal first-run case.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::model::{AlarmError, Earthquake, TremorEvent};

const TREMOR_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.6f";
const TREMOR_TIME_PARSE: &str = "%Y%m%dT%H%M%S%.f";
const SWARM_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Entries
// ============================================================================

/// Anything with a catalog time.
pub trait Timed {
    fn time(&self) -> DateTime<Utc>;
}

impl Timed for Earthquake {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Row of the tremor catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct TremorCatalogEntry {
    pub latitude: f64,
    pub longitude: f64,
    pub time: DateTime<Utc>,
}

impl Timed for TremorCatalogEntry {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

impl From<&TremorEvent> for TremorCatalogEntry {
    fn from(event: &TremorEvent) -> Self {
        TremorCatalogEntry {
            latitude: event.latitude,
            longitude: event.longitude,
            time: event.starttime,
        }
    }
}

// ============================================================================
// Set operations
// ============================================================================

/// Keeps entries with `time > now - lookback`.
pub fn prune<T: Timed>(entries: Vec<T>, now: DateTime<Utc>, lookback: Duration) -> Vec<T> {
    let cutoff = now - lookback;
    entries.into_iter().filter(|e| e.time() > cutoff).collect()
}

/// Stable sort by time.
pub fn sort_by_time<T: Timed>(entries: &mut [T]) {
    entries.sort_by_key(|e| e.time());
}

/// Concatenates two event lists, keeping the first occurrence of each ID,
/// sorted by time.
pub fn union_by_id(first: &[Earthquake], second: &[Earthquake]) -> Vec<Earthquake> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Earthquake> = first
        .iter()
        .chain(second.iter())
        .filter(|e| seen.insert(e.id.clone()))
        .cloned()
        .collect();
    sort_by_time(&mut merged);
    merged
}

// ============================================================================
// File I/O
// ============================================================================

fn read_optional(path: &Path) -> Result<Option<String>, AlarmError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AlarmError::Io(format!("{}: {}", path.display(), e))),
    }
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), AlarmError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Splits a tab-delimited table into rows keyed by the header columns.
fn rows<'a>(text: &'a str, required: &[&str]) -> Result<Vec<Vec<&'a str>>, AlarmError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    let mut index = Vec::with_capacity(required.len());
    for name in required {
        let pos = columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| AlarmError::Parse(format!("catalog has no '{}' column", name)))?;
        index.push(pos);
    }
    lines
        .map(|line| {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            index
                .iter()
                .map(|&i| {
                    fields
                        .get(i)
                        .copied()
                        .ok_or_else(|| AlarmError::Parse(format!("short catalog row: '{}'", line)))
                })
                .collect()
        })
        .collect()
}

fn parse_f64(s: &str) -> Result<f64, AlarmError> {
    s.parse()
        .map_err(|_| AlarmError::Parse(format!("'{}' is not a number", s)))
}

fn parse_time(s: &str, format: &str) -> Result<DateTime<Utc>, AlarmError> {
    let naive = NaiveDateTime::parse_from_str(s, format)?;
    Ok(naive.and_utc())
}

pub fn read_tremor_catalog(path: &Path) -> Result<Vec<TremorCatalogEntry>, AlarmError> {
    let Some(text) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    rows(&text, &["lats", "lons", "time"])?
        .into_iter()
        .map(|r| {
            Ok(TremorCatalogEntry {
                latitude: parse_f64(r[0])?,
                longitude: parse_f64(r[1])?,
                time: parse_time(r[2], TREMOR_TIME_PARSE)?,
            })
        })
        .collect()
}

pub fn write_tremor_catalog(path: &Path, entries: &[TremorCatalogEntry]) -> Result<(), AlarmError> {
    let mut out = String::from("lats\tlons\ttime\n");
    for e in entries {
        out.push_str(&format!(
            "{:.4}\t{:.4}\t{}\n",
            e.latitude,
            e.longitude,
            e.time.format(TREMOR_TIME_FORMAT)
        ));
    }
    write_atomically(path, &out)
}

/// Reads the reported-events catalog. Depth and magnitude are not stored.
pub fn read_swarm_catalog(path: &Path) -> Result<Vec<Earthquake>, AlarmError> {
    let Some(text) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    rows(&text, &["ID", "Time", "Latitude", "Longitude", "VOLCANO"])?
        .into_iter()
        .map(|r| {
            Ok(Earthquake {
                id: r[0].to_string(),
                time: parse_time(r[1], SWARM_TIME_FORMAT)?,
                latitude: parse_f64(r[2])?,
                longitude: parse_f64(r[3])?,
                depth_km: None,
                magnitude: None,
                volcano: r[4].to_string(),
                volcano_distance_km: None,
            })
        })
        .collect()
}

pub fn write_swarm_catalog(path: &Path, events: &[Earthquake]) -> Result<(), AlarmError> {
    let mut out = String::from("ID\tTime\tLatitude\tLongitude\tVOLCANO\n");
    for e in events {
        out.push_str(&format!(
            "{}\t{}\t{:.3}\t{:.3}\t{}\n",
            e.id,
            e.time.format(SWARM_TIME_FORMAT),
            e.latitude,
            e.longitude,
            e.volcano
        ));
    }
    write_atomically(path, &out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn quake(id: &str, minutes_ago: i64) -> Earthquake {
        Earthquake {
            id: id.to_string(),
            time: t0() - Duration::minutes(minutes_ago),
            latitude: 55.4173,
            longitude: -161.8937,
            depth_km: Some(3.0),
            magnitude: Some(0.8),
            volcano: "Pavlof".to_string(),
            volcano_distance_km: Some(2.0),
        }
    }

    fn tremor(minutes_ago: i64) -> TremorCatalogEntry {
        TremorCatalogEntry {
            latitude: 55.41,
            longitude: -161.88,
            time: t0() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_prune_is_strict_and_idempotent() {
        let entries = vec![tremor(0), tremor(60), tremor(59)];
        let once = prune(entries, t0(), Duration::minutes(60));
        assert_eq!(once.len(), 2, "an entry exactly at the cutoff is dropped");
        let twice = prune(once.clone(), t0(), Duration::minutes(60));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_union_keeps_first_occurrence_sorted() {
        let mut dup = quake("b", 5);
        dup.volcano = "Other".to_string();
        let merged = union_by_id(&[quake("a", 1), quake("b", 5)], &[dup, quake("c", 10)]);
        let ids: Vec<&str> = merged.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(merged[1].volcano, "Pavlof");
    }

    #[test]
    fn test_missing_file_is_empty_catalog() {
        let dir = TempDir::new().unwrap();
        assert!(read_tremor_catalog(&dir.path().join("none.txt")).unwrap().is_empty());
        assert!(read_swarm_catalog(&dir.path().join("none.txt")).unwrap().is_empty());
    }

    #[test]
    fn test_swarm_catalog_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Recent_swarms.txt");
        write_swarm_catalog(&path, &[quake("ak024abc", 30)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "ID\tTime\tLatitude\tLongitude\tVOLCANO\nak024abc\t2024-05-01 11:30:00\t55.417\t-161.894\tPavlof\n"
        );
        let back = read_swarm_catalog(&path).unwrap();
        assert_eq!(back[0].id, "ak024abc");
        assert_eq!(back[0].time, t0() - Duration::minutes(30));
        assert_eq!(back[0].magnitude, None);
    }

    #[test]
    fn test_tremor_catalog_keeps_microseconds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tremor.txt");
        let mut entry = tremor(3);
        entry.time = entry.time + Duration::microseconds(250_000);
        write_tremor_catalog(&path, &[entry.clone()]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("20240501T115700.250000"), "got {}", text);
        assert_eq!(read_tremor_catalog(&path).unwrap(), vec![entry]);
    }

    #[test]
    fn test_unknown_layout_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "a\tb\n1\t2\n").unwrap();
        assert!(matches!(read_tremor_catalog(&path), Err(AlarmError::Parse(_))));
    }
}
