/// ASCII waveform archive.
///
/// Each channel lives in `<dir>/<NET>.<STA>.<LOC>.<CHA>.slist`, holding one
/// or more SLIST blocks as written by common seismology toolkits:
///
/// ```text
/// TIMESERIES AV_AKS_01_HDF_D, 6000 samples, 100 sps, 2024-05-01T12:00:00.000000, SLIST, INTEGER, Counts
/// 12  15  9  -3  -8  0
/// ...
/// ```
///
/// Blocks are merged onto the request window and gaps are zero-filled.
/// A missing or unreadable file yields a blank trace and a logged failure.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::ingest::{WaveformSource, blank_trace, merge_blocks};
use crate::logging;
use crate::model::{AlarmError, Scnl, Trace};

const HEADER_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone)]
pub struct SlistArchive {
    root: PathBuf,
}

impl SlistArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SlistArchive { root: root.into() }
    }

    pub fn path_for(&self, scnl: &Scnl) -> PathBuf {
        self.root.join(format!("{}.slist", scnl.nslc()))
    }

    fn read_channel(&self, scnl: &Scnl) -> Result<Vec<Trace>, AlarmError> {
        read_slist_file(&self.path_for(scnl), scnl)
    }
}

impl WaveformSource for SlistArchive {
    fn get_waveforms(&self, channels: &[Scnl], t1: DateTime<Utc>, t2: DateTime<Utc>) -> Vec<Trace> {
        channels
            .iter()
            .map(|scnl| match self.read_channel(scnl) {
                Ok(blocks) => {
                    let refs: Vec<&Trace> = blocks.iter().collect();
                    merge_blocks(scnl, &refs, t1, t2)
                }
                Err(e) => {
                    logging::log_waveform_failure(&scnl.to_string(), "read archive", &e);
                    blank_trace(scnl, t1, t2)
                }
            })
            .collect()
    }
}

pub fn read_slist_file(path: &Path, scnl: &Scnl) -> Result<Vec<Trace>, AlarmError> {
    let text = std::fs::read_to_string(path).map_err(|e| AlarmError::Io(format!("{}: {}", path.display(), e)))?;
    parse_slist(&text, scnl)
}

/// Parses every block of an SLIST document.
pub fn parse_slist(text: &str, scnl: &Scnl) -> Result<Vec<Trace>, AlarmError> {
    let mut blocks = Vec::new();
    let mut current: Option<Trace> = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("TIMESERIES") {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            let (rate, start) = parse_header(line)?;
            current = Some(Trace::new(scnl.clone(), rate, start, Vec::new()));
            continue;
        }
        let block = current
            .as_mut()
            .ok_or_else(|| AlarmError::Parse("sample line before any TIMESERIES header".into()))?;
        for token in line.split_whitespace() {
            let value: f64 = token
                .parse()
                .map_err(|_| AlarmError::Parse(format!("bad sample '{}'", token)))?;
            block.data.push(value);
        }
    }
    if let Some(block) = current {
        blocks.push(block);
    }
    Ok(blocks)
}

/// Reads sampling rate and start time out of a block header.
fn parse_header(line: &str) -> Result<(f64, DateTime<Utc>), AlarmError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(AlarmError::Parse(format!("short SLIST header: '{}'", line)));
    }
    let rate: f64 = fields[2]
        .strip_suffix("sps")
        .map(str::trim)
        .and_then(|v| v.parse().ok())
        .filter(|r: &f64| *r > 0.0)
        .ok_or_else(|| AlarmError::Parse(format!("bad sampling rate '{}'", fields[2])))?;
    let start = NaiveDateTime::parse_from_str(fields[3], HEADER_TIME_FORMAT)?.and_utc();
    Ok((rate, start))
}
