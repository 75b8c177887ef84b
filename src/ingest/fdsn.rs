/// FDSN event web service client.
///
/// Queries `fdsnws/event/1/query` with `format=text`, which every FDSN
/// event service supports and which parses without an XML stack. The
/// response is a `|`-separated table whose first line is a `#`-prefixed
/// header; columns are located by name.
///
/// Spec: https://www.fdsn.org/webservices/fdsnws-event-1.2.pdf

use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::ingest::{EventQuery, EventRecord, EventSource};
use crate::logging::{self, Subsystem};
use crate::model::AlarmError;

const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const REQUEST_TIMEOUT_SECS: u64 = 10;
pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

pub struct FdsnEventClient {
    base_url: String,
    client: reqwest::blocking::Client,
    backoff: Duration,
}

impl FdsnEventClient {
    pub fn new(base_url: &str) -> Result<Self, AlarmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(FdsnEventClient {
            base_url: base_url.trim_end_matches(['?', '&']).to_string(),
            client,
            backoff: RETRY_BACKOFF,
        })
    }

    /// Full query URL for `query`.
    pub fn query_url(&self, query: &EventQuery) -> String {
        let mut url = format!(
            "{}?starttime={}&endtime={}&format=text&orderby=time-asc",
            self.base_url,
            query.starttime.format(QUERY_TIME_FORMAT),
            query.endtime.format(QUERY_TIME_FORMAT)
        );
        if let Some(depth) = query.max_depth_km {
            url.push_str(&format!("&maxdepth={}", depth));
        }
        if let Some(mag) = query.min_magnitude {
            url.push_str(&format!("&minmagnitude={}", mag));
        }
        url
    }

    fn fetch_once(&self, url: &str) -> Result<String, AlarmError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        // 204 is how FDSN services say "no events"
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(String::new());
        }
        if !status.is_success() {
            return Err(AlarmError::Upstream(format!("event service returned {}", status)));
        }
        Ok(response.text()?)
    }
}

impl EventSource for FdsnEventClient {
    fn get_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, AlarmError> {
        let url = self.query_url(query);
        let body = with_retries("event service", MAX_ATTEMPTS, self.backoff, |attempt| {
            logging::debug(Subsystem::Catalog, None, &format!("attempt {}: GET {}", attempt, url));
            self.fetch_once(&url)
        })?;
        parse_text_catalog(&body)
    }
}

/// Runs `op` up to `attempts` times, sleeping `backoff` between failures.
pub fn with_retries<T, F>(source: &str, attempts: u32, backoff: Duration, mut op: F) -> Result<T, AlarmError>
where
    F: FnMut(u32) -> Result<T, AlarmError>,
{
    let mut last = AlarmError::Upstream("no attempt made".into());
    for attempt in 1..=attempts {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => {
                logging::log_catalog_failure(source, &format!("attempt {}/{}", attempt, attempts), &e);
                last = e;
                if attempt < attempts {
                    thread::sleep(backoff);
                }
            }
        }
    }
    Err(last)
}

fn parse_event_time(s: &str) -> Result<DateTime<Utc>, AlarmError> {
    let s = s.trim().trim_end_matches('Z');
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")?;
    Ok(naive.and_utc())
}

fn optional_f64(s: Option<&&str>) -> Option<f64> {
    s.map(|v| v.trim()).filter(|v| !v.is_empty()).and_then(|v| v.parse().ok())
}

/// Parses an FDSN `format=text` event table.
pub fn parse_text_catalog(text: &str) -> Result<Vec<EventRecord>, AlarmError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = header
        .trim_start_matches('#')
        .split('|')
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();
    let find = |name: &str| -> Result<usize, AlarmError> {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| AlarmError::Parse(format!("event table has no '{}' column", name)))
    };
    let id_col = find("eventid")?;
    let time_col = find("time")?;
    let lat_col = find("latitude")?;
    let lon_col = find("longitude")?;
    let depth_col = find("depth/km").ok();
    let mag_col = find("magnitude").ok();

    let mut events = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split('|').collect();
        let field = |i: usize| {
            fields
                .get(i)
                .map(|s| s.trim())
                .ok_or_else(|| AlarmError::Parse(format!("short event row: '{}'", line)))
        };
        let number = |i: usize| -> Result<f64, AlarmError> {
            let raw = field(i)?;
            raw.parse()
                .map_err(|_| AlarmError::Parse(format!("'{}' is not a number", raw)))
        };
        events.push(EventRecord {
            id: field(id_col)?.to_string(),
            time: parse_event_time(field(time_col)?)?,
            latitude: number(lat_col)?,
            longitude: number(lon_col)?,
            depth_km: depth_col.and_then(|i| optional_f64(fields.get(i))),
            magnitude: mag_col.and_then(|i| optional_f64(fields.get(i))),
        });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::Cell;

    const SAMPLE: &str = "\
#EventID|Time|Latitude|Longitude|Depth/km|Author|Catalog|Contributor|ContributorID|MagType|Magnitude|MagAuthor|EventLocationName
av91234567|2024-05-01T11:58:00.250|55.4173|-161.8937|3.1|AK|AK|AK|av91234567|ml|0.8|AK|PAVLOF VOLCANO
av91234568|2024-05-01T11:59:10|55.4201|-161.8870||AK|AK|AK|av91234568|||AK|PAVLOF VOLCANO
";

    #[test]
    fn test_parse_text_catalog() {
        let events = parse_text_catalog(SAMPLE).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "av91234567");
        assert_eq!(
            events[0].time,
            Utc.with_ymd_and_hms(2024, 5, 1, 11, 58, 0).unwrap() + chrono::Duration::milliseconds(250)
        );
        assert_eq!(events[0].magnitude, Some(0.8));
        assert_eq!(events[1].depth_km, None);
        assert_eq!(events[1].magnitude, None, "blank magnitude is unassigned");
    }

    #[test]
    fn test_empty_body_is_no_events() {
        assert!(parse_text_catalog("").unwrap().is_empty());
    }

    #[test]
    fn test_missing_required_column_is_parse_error() {
        assert!(matches!(
            parse_text_catalog("#EventID|Time\nx|2024-05-01T00:00:00\n"),
            Err(AlarmError::Parse(_))
        ));
    }

    #[test]
    fn test_query_url_carries_filters() {
        let client = FdsnEventClient::new("https://example.org/fdsnws/event/1/query?").unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let url = client.query_url(&EventQuery {
            starttime: t2 - chrono::Duration::hours(24),
            endtime: t2,
            max_depth_km: Some(40.0),
            min_magnitude: None,
        });
        assert_eq!(
            url,
            "https://example.org/fdsnws/event/1/query?starttime=2024-04-30T12:00:00&endtime=2024-05-01T12:00:00&format=text&orderby=time-asc&maxdepth=40"
        );
    }

    #[test]
    fn test_retries_stop_after_success() {
        let calls = Cell::new(0);
        let result = with_retries("test", 3, Duration::ZERO, |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 2 {
                Err(AlarmError::Upstream("timeout".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(2));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_retries_return_last_error() {
        let result: Result<(), AlarmError> =
            with_retries("test", 3, Duration::ZERO, |attempt| Err(AlarmError::Upstream(format!("fail {}", attempt))));
        assert_eq!(result, Err(AlarmError::Upstream("fail 3".into())));
    }
}
