//! First-check-in report derivation.
//!
//! Pure over its inputs: the handlers fetch the matching events and hand
//! them in together with a [`NameIndex`]; nothing here touches storage.

use chrono::DateTime;
use std::collections::{HashMap, HashSet};

pub const UNKNOWN_NAME: &str = "Desconocido";

/// One raw event from the attendance log.
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub numero_control: String,
    /// RFC 3339. A missing or unparseable value sorts as time zero.
    pub timestamp: Option<String>,
}

/// One derived row: a student's earliest check-in under the active filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub numero_control: String,
    pub nombre: String,
    pub checkin_time: Option<String>,
}

/// Snapshot cache mapping control numbers to display names.
///
/// Owned by the daemon state and passed by reference into
/// [`derive_report`]. Every refresh replaces the whole snapshot; the
/// generation counter lets callers observe that a replace happened.
#[derive(Debug, Default)]
pub struct NameIndex {
    by_control: HashMap<String, String>,
    generation: u64,
}

impl NameIndex {
    pub fn replace(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        self.by_control = entries.into_iter().collect();
        self.generation += 1;
    }

    pub fn clear(&mut self) {
        self.by_control.clear();
        self.generation += 1;
    }

    pub fn resolve(&self, numero_control: &str) -> &str {
        self.by_control
            .get(numero_control)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_NAME)
    }

    pub fn len(&self) -> usize {
        self.by_control.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_control.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn sort_millis(timestamp: Option<&str>) -> i64 {
    timestamp
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// Reduces a batch of events to one row per distinct control number,
/// keeping the earliest event. Output order is first-seen order in the
/// time-sorted sequence, so earliest arrivals list first. Events whose
/// control number is absent from `names` resolve to "Desconocido".
pub fn derive_report(events: &[CheckIn], names: &NameIndex) -> Vec<ReportRow> {
    let mut ordered: Vec<&CheckIn> = events.iter().collect();
    // Stable sort: same-instant events keep storage order.
    ordered.sort_by_key(|e| sort_millis(e.timestamp.as_deref()));

    let mut seen: HashSet<&str> = HashSet::new();
    let mut rows = Vec::with_capacity(events.len());
    for event in ordered {
        if !seen.insert(event.numero_control.as_str()) {
            continue;
        }
        rows.push(ReportRow {
            numero_control: event.numero_control.clone(),
            nombre: names.resolve(&event.numero_control).to_string(),
            checkin_time: event.timestamp.clone(),
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(numero_control: &str, timestamp: Option<&str>) -> CheckIn {
        CheckIn {
            numero_control: numero_control.to_string(),
            timestamp: timestamp.map(|t| t.to_string()),
        }
    }

    fn index(entries: &[(&str, &str)]) -> NameIndex {
        let mut idx = NameIndex::default();
        idx.replace(
            entries
                .iter()
                .map(|(c, n)| (c.to_string(), n.to_string())),
        );
        idx
    }

    #[test]
    fn earliest_event_wins_per_student() {
        let events = [
            event("A1", Some("2025-03-10T10:05:00Z")),
            event("A1", Some("2025-03-10T09:58:00Z")),
            event("A1", Some("2025-03-10T10:12:00Z")),
        ];
        let rows = derive_report(&events, &index(&[("A1", "Ana")]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].numero_control, "A1");
        assert_eq!(rows[0].checkin_time.as_deref(), Some("2025-03-10T09:58:00Z"));
    }

    #[test]
    fn rows_ordered_by_first_checkin_time() {
        let events = [
            event("A1", Some("2025-03-10T07:01:00Z")),
            event("A2", Some("2025-03-10T07:00:00Z")),
        ];
        let rows = derive_report(&events, &index(&[("A1", "Ana"), ("A2", "Beto")]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].numero_control, "A2");
        assert_eq!(rows[1].numero_control, "A1");
    }

    #[test]
    fn missing_timestamp_sorts_before_real_ones() {
        let events = [
            event("A1", Some("2025-03-10T07:00:00Z")),
            event("A2", None),
        ];
        let rows = derive_report(&events, &index(&[]));
        assert_eq!(rows[0].numero_control, "A2");
        assert_eq!(rows[0].checkin_time, None);
    }

    #[test]
    fn unparseable_timestamp_treated_as_time_zero() {
        let events = [
            event("A1", Some("2025-03-10T07:00:00Z")),
            event("A2", Some("yesterday-ish")),
        ];
        let rows = derive_report(&events, &index(&[]));
        assert_eq!(rows[0].numero_control, "A2");
    }

    #[test]
    fn unknown_control_number_resolves_to_placeholder() {
        let events = [event("GHOST", Some("2025-03-10T08:00:00Z"))];
        let rows = derive_report(&events, &index(&[("A1", "Ana")]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].nombre, UNKNOWN_NAME);
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let rows = derive_report(&[], &index(&[]));
        assert!(rows.is_empty());
    }

    #[test]
    fn derivation_is_idempotent() {
        let events = [
            event("A1", Some("2025-03-10T10:05:00Z")),
            event("A2", Some("2025-03-10T09:58:00Z")),
            event("A1", Some("2025-03-10T09:30:00Z")),
        ];
        let names = index(&[("A1", "Ana"), ("A2", "Beto")]);
        let first = derive_report(&events, &names);
        let second = derive_report(&events, &names);
        assert_eq!(first, second);
    }

    #[test]
    fn name_index_replace_swaps_whole_snapshot() {
        let mut idx = index(&[("A1", "Ana")]);
        let g0 = idx.generation();
        idx.replace([("A2".to_string(), "Beto".to_string())]);
        assert!(idx.generation() > g0);
        assert_eq!(idx.resolve("A2"), "Beto");
        // A1 dropped by the replace, not merged.
        assert_eq!(idx.resolve("A1"), UNKNOWN_NAME);
    }
}
