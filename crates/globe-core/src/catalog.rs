//! Station catalog: turns raw directory entries into eligible
//! `StationRecord`s and derives the per-country views the globe needs.
//!
//! Country grouping is keyed on the raw country string.  "Germany" and
//! "germany" are two different countries here; naming variants are not merged.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RecordShapeError;
use crate::protocol::{CountryAggregate, StationRecord};

// ── ingest ───────────────────────────────────────────────────────────────────

/// Keep every raw entry that satisfies the eligibility rule (country,
/// latitude, longitude and resolved URL present).  Malformed entries are
/// dropped one by one; the batch always succeeds.
pub fn ingest<I>(raw: I) -> Vec<StationRecord>
where
    I: IntoIterator<Item = Value>,
{
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    for entry in raw {
        match parse_record(&entry) {
            Ok(record) => kept.push(record),
            Err(e) => {
                dropped += 1;
                debug!("catalog: dropping entry {}: {}", entry_label(&entry), e);
            }
        }
    }
    debug!("catalog: ingested {} stations, dropped {}", kept.len(), dropped);
    kept
}

/// Convert one raw radio-browser entry.
pub fn parse_record(entry: &Value) -> Result<StationRecord, RecordShapeError> {
    let obj = entry.as_object().ok_or(RecordShapeError::NotAnObject)?;

    let country = required_str(obj, "country")?;
    let latitude = required_coord(obj, "geo_lat")?;
    let longitude = required_coord(obj, "geo_long")?;
    let url_resolved = required_str(obj, "url_resolved")?;

    Ok(StationRecord {
        id: optional_str(obj, "stationuuid"),
        name: optional_str(obj, "name"),
        country,
        language: optional_str(obj, "language"),
        tags: optional_str(obj, "tags"),
        url_resolved,
        url: optional_str(obj, "url"),
        codec: optional_str(obj, "codec"),
        bitrate: obj.get("bitrate").and_then(coerce_u32),
        latitude: Some(latitude),
        longitude: Some(longitude),
    })
}

fn entry_label(entry: &Value) -> String {
    entry
        .get("stationuuid")
        .or_else(|| entry.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string()
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn required_str(obj: &Map<String, Value>, key: &'static str) -> Result<String, RecordShapeError> {
    match obj.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(RecordShapeError::Missing(key)),
    }
}

/// A numeric `0` is a real coordinate (equator/prime meridian) and counts as present.
fn required_coord(obj: &Map<String, Value>, key: &'static str) -> Result<f64, RecordShapeError> {
    let value = match obj.get(key) {
        None | Some(Value::Null) => return Err(RecordShapeError::Missing(key)),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(RecordShapeError::Missing(key))
        }
        Some(v) => v,
    };
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|n| n.is_finite())
        .ok_or(RecordShapeError::BadNumber(key))
}

fn coerce_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

// ── derived views ────────────────────────────────────────────────────────────

/// One aggregate per distinct country string, in order of first appearance.
/// The first record seen for a country supplies its marker coordinate.
pub fn aggregate_by_country(records: &[StationRecord]) -> Vec<CountryAggregate> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<CountryAggregate> = Vec::new();

    for record in records {
        let (Some(latitude), Some(longitude)) = (record.latitude, record.longitude) else {
            continue;
        };
        if record.country.is_empty() {
            continue;
        }
        match index.get(record.country.as_str()) {
            Some(&i) => out[i].count += 1,
            None => {
                index.insert(record.country.as_str(), out.len());
                out.push(CountryAggregate {
                    name: record.country.clone(),
                    latitude,
                    longitude,
                    count: 1,
                });
            }
        }
    }
    out
}

/// Exact, case-sensitive country match.
pub fn filter_by_country(records: &[StationRecord], country: &str) -> Vec<StationRecord> {
    records
        .iter()
        .filter(|r| r.country == country)
        .cloned()
        .collect()
}

/// Case-insensitive substring match on name or tags.  An empty term keeps
/// everything.
pub fn search(records: &[StationRecord], term: &str) -> Vec<StationRecord> {
    let needle = term.to_lowercase();
    records
        .iter()
        .filter(|r| {
            needle.is_empty()
                || r.name.to_lowercase().contains(&needle)
                || r.tags.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

// ── StationCatalog ───────────────────────────────────────────────────────────

/// The full set of fetched stations plus their country aggregates.
/// Aggregates are recomputed whenever the station set changes.
#[derive(Debug, Clone, Default)]
pub struct StationCatalog {
    records: Vec<StationRecord>,
    countries: Vec<CountryAggregate>,
}

impl StationCatalog {
    pub fn new(records: Vec<StationRecord>) -> Self {
        let countries = aggregate_by_country(&records);
        Self { records, countries }
    }

    pub fn from_raw<I>(raw: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self::new(ingest(raw))
    }

    pub fn replace(&mut self, records: Vec<StationRecord>) {
        self.countries = aggregate_by_country(&records);
        self.records = records;
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    pub fn records(&self) -> &[StationRecord] {
        &self.records
    }

    pub fn countries(&self) -> &[CountryAggregate] {
        &self.countries
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&StationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn has_country(&self, country: &str) -> bool {
        self.countries.iter().any(|c| c.name == country)
    }

    /// Sidebar list: the country's stations (or nothing when no country is
    /// selected), narrowed by the search term.
    pub fn stations(&self, country: Option<&str>, term: &str) -> Vec<StationRecord> {
        match country {
            Some(country) => search(&filter_by_country(&self.records, country), term),
            None => Vec::new(),
        }
    }
}
