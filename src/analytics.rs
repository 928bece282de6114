use crate::types::{parse_date, VehicleRecord};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Grouping {
    #[default]
    ByDate,
    ByHour,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub violation: Option<String>,
    pub grouping: Grouping,
}

impl Filters {
    /// Builds filters from raw form input, where an empty field means
    /// "no filter". Unparseable dates are treated as empty.
    pub fn from_form(start: &str, end: &str, violation: &str, grouping: Grouping) -> Self {
        let violation = match violation.trim() {
            "" => None,
            v => Some(v.to_string()),
        };
        Filters {
            start: parse_date(start),
            end: parse_date(end),
            violation,
            grouping,
        }
    }

    fn in_range(&self, timestamp: &NaiveDateTime) -> bool {
        let day = timestamp.date();
        self.start.map_or(true, |start| day >= start) && self.end.map_or(true, |end| day <= end)
    }

    fn matches(&self, kind: &str) -> bool {
        self.violation.as_deref().map_or(true, |wanted| wanted == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationEvent<'a> {
    pub timestamp: NaiveDateTime,
    pub kind: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Date(NaiveDate),
    Hour(u32),
}

impl Bucket {
    fn of(timestamp: &NaiveDateTime, grouping: Grouping) -> Self {
        match grouping {
            Grouping::ByDate => Bucket::Date(timestamp.date()),
            Grouping::ByHour => Bucket::Hour(timestamp.hour()),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Bucket::Hour(hour) => write!(f, "{}:00", hour),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTable<K> {
    entries: Vec<(K, usize)>,
}

impl<K: Eq + Hash + Clone> FrequencyTable<K> {
    pub fn count<I: IntoIterator<Item = K>>(keys: I) -> Self {
        let mut index: HashMap<K, usize> = HashMap::new();
        let mut entries: Vec<(K, usize)> = Vec::new();
        for key in keys {
            match index.get(&key) {
                Some(&i) => entries[i].1 += 1,
                None => {
                    index.insert(key.clone(), entries.len());
                    entries.push((key, 1));
                }
            }
        }
        FrequencyTable { entries }
    }

    pub fn get(&self, key: &K) -> usize {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map_or(0, |(_, n)| *n)
    }

    pub fn entries(&self) -> &[(K, usize)] {
        &self.entries
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, n)| n).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub by_type: FrequencyTable<String>,
    pub by_bucket: FrequencyTable<Bucket>,
    pub events: usize,
}

pub fn flatten(records: &[VehicleRecord]) -> Vec<ViolationEvent<'_>> {
    records
        .iter()
        .flat_map(|record| {
            record.violations.iter().map(move |kind| ViolationEvent {
                timestamp: record.timestamp,
                kind: kind.as_str(),
            })
        })
        .collect()
}

pub fn filter_events<'a>(
    events: &[ViolationEvent<'a>],
    filters: &Filters,
) -> Vec<ViolationEvent<'a>> {
    events
        .iter()
        .filter(|e| filters.in_range(&e.timestamp) && filters.matches(e.kind))
        .copied()
        .collect()
}

pub fn analyze(records: &[VehicleRecord], filters: &Filters) -> Report {
    let events = filter_events(&flatten(records), filters);
    let buckets = events.iter().map(|e| Bucket::of(&e.timestamp, filters.grouping));
    Report {
        by_type: FrequencyTable::count(events.iter().map(|e| e.kind.to_string())),
        by_bucket: FrequencyTable::count(buckets),
        events: events.len(),
    }
}

/// Whole records for the record list: in the date range and, when a type is
/// selected, carrying at least one violation of that type.
pub fn filter_records<'a>(
    records: &'a [VehicleRecord],
    filters: &Filters,
) -> Vec<&'a VehicleRecord> {
    records
        .iter()
        .filter(|r| filters.in_range(&r.timestamp))
        .filter(|r| match filters.violation.as_deref() {
            Some(wanted) => r.violations.iter().any(|v| v == wanted),
            None => true,
        })
        .collect()
}

pub fn violation_types(records: &[VehicleRecord]) -> Vec<&str> {
    let mut seen = Vec::new();
    for kind in records.iter().flat_map(|r| r.violations.iter()) {
        if !seen.contains(&kind.as_str()) {
            seen.push(kind.as_str());
        }
    }
    seen
}
