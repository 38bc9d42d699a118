//! Shared send/reply correlation store.
//!
//! The sender inserts an entry for every probe it registers; receive workers
//! look entries up by id and write the reply outcome. All locking is
//! internal, callers only see `&self` methods.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::state::{MeasurementRecord, ProbeId};

/// Result of matching a reply against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Reply applied. `round_trip_ms` is None if no usable send time existed.
    Matched { round_trip_ms: Option<u32> },
    /// No record for this id in the current session
    Unknown,
    /// A reply for this id was already applied; nothing changed
    Duplicate,
}

#[derive(Debug, Default)]
struct StoreInner {
    send_times: HashMap<ProbeId, u64>,
    records: HashMap<ProbeId, MeasurementRecord>,
    /// Insertion order, used when handing records out
    order: Vec<ProbeId>,
}

/// Thread-safe probe id → (send time, record) store
#[derive(Debug, Default)]
pub struct CorrelationStore {
    inner: RwLock<StoreInner>,
}

/// Store shared between the controller, sender callback and receive workers
pub type SharedStore = Arc<CorrelationStore>;

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry (session start)
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.send_times.clear();
        inner.records.clear();
        inner.order.clear();
    }

    /// Register a sent probe. Ids are never reused within a session, so an
    /// existing entry is left untouched.
    pub fn insert(&self, id: ProbeId, send_time_ms: u64, record: MeasurementRecord) -> bool {
        let mut inner = self.inner.write();
        if inner.records.contains_key(&id) {
            return false;
        }
        inner.send_times.insert(id, send_time_ms);
        inner.records.insert(id, record);
        inner.order.push(id);
        true
    }

    /// Apply a reply to the record for `id`.
    ///
    /// The round trip is only computed when a send time is known and does not
    /// lie after the reply time. The first reply wins; later ones are reported
    /// as [`Correlation::Duplicate`] without touching the record.
    pub fn correlate(&self, id: ProbeId, reply_time_ms: u64, server_reply_time: i64) -> Correlation {
        let mut inner = self.inner.write();

        let round_trip_ms = inner
            .send_times
            .get(&id)
            .and_then(|sent| reply_time_ms.checked_sub(*sent))
            .map(|rtt| rtt.min(u32::MAX as u64) as u32);

        let Some(record) = inner.records.get_mut(&id) else {
            return Correlation::Unknown;
        };

        if record.apply_reply(reply_time_ms, server_reply_time, round_trip_ms) {
            Correlation::Matched { round_trip_ms }
        } else {
            Correlation::Duplicate
        }
    }

    /// Send time registered for `id`
    pub fn send_time(&self, id: ProbeId) -> Option<u64> {
        self.inner.read().send_times.get(&id).copied()
    }

    /// Copy of the record for `id`
    pub fn get(&self, id: ProbeId) -> Option<MeasurementRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records with a correlated reply
    pub fn answered(&self) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|r| r.is_answered())
            .count()
    }

    /// Copy all records in creation order
    pub fn records(&self) -> Vec<MeasurementRecord> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect()
    }

    /// Remove and return all records in creation order, leaving the store empty
    pub fn take_records(&self) -> Vec<MeasurementRecord> {
        let mut inner = self.inner.write();
        let order = std::mem::take(&mut inner.order);
        inner.send_times.clear();
        let mut records = std::mem::take(&mut inner.records);
        order.into_iter().filter_map(|id| records.remove(&id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ProbeContext;

    fn register(store: &CorrelationStore, id: u32, send_time_ms: u64) {
        let record = MeasurementRecord::new(ProbeId(id), send_time_ms, ProbeContext::default());
        assert!(store.insert(ProbeId(id), send_time_ms, record));
    }

    #[test]
    fn test_correlate_sets_round_trip() {
        let store = CorrelationStore::new();
        register(&store, 0, 1_000);

        let result = store.correlate(ProbeId(0), 1_045, 555);
        assert_eq!(result, Correlation::Matched { round_trip_ms: Some(45) });

        let record = store.get(ProbeId(0)).unwrap();
        assert_eq!(record.round_trip_time_ms(), Some(45));
        assert_eq!(record.server_reply_time(), Some(555));
        assert_eq!(record.reply_time_ms(), Some(1_045));
    }

    #[test]
    fn test_unknown_id_changes_nothing() {
        let store = CorrelationStore::new();
        register(&store, 0, 0);

        assert_eq!(store.correlate(ProbeId(99), 10, 1), Correlation::Unknown);
        assert_eq!(store.len(), 1);
        assert_eq!(store.answered(), 0);
    }

    #[test]
    fn test_duplicate_reply_is_ignored() {
        let store = CorrelationStore::new();
        register(&store, 4, 100);

        assert_eq!(
            store.correlate(ProbeId(4), 130, 7),
            Correlation::Matched { round_trip_ms: Some(30) }
        );
        assert_eq!(store.correlate(ProbeId(4), 900, 8), Correlation::Duplicate);

        let record = store.get(ProbeId(4)).unwrap();
        assert_eq!(record.round_trip_time_ms(), Some(30));
        assert_eq!(record.server_reply_time(), Some(7));
    }

    #[test]
    fn test_reply_before_send_time_has_no_round_trip() {
        let store = CorrelationStore::new();
        register(&store, 1, 500);

        assert_eq!(
            store.correlate(ProbeId(1), 400, 0),
            Correlation::Matched { round_trip_ms: None }
        );
        assert_eq!(store.get(ProbeId(1)).unwrap().round_trip_time_ms(), None);
    }

    #[test]
    fn test_insert_does_not_overwrite() {
        let store = CorrelationStore::new();
        register(&store, 2, 10);

        let other = MeasurementRecord::new(ProbeId(2), 99, ProbeContext::default());
        assert!(!store.insert(ProbeId(2), 99, other));
        assert_eq!(store.send_time(ProbeId(2)), Some(10));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear_forgets_previous_session() {
        let store = CorrelationStore::new();
        register(&store, 0, 0);
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.send_time(ProbeId(0)), None);
        assert_eq!(store.correlate(ProbeId(0), 5, 0), Correlation::Unknown);
    }

    #[test]
    fn test_records_keep_creation_order() {
        let store = CorrelationStore::new();
        for id in [3, 1, 2] {
            register(&store, id, id as u64);
        }

        let ids: Vec<u32> = store.records().iter().map(|r| r.packet_id.0).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        let taken: Vec<u32> = store.take_records().iter().map(|r| r.packet_id.0).collect();
        assert_eq!(taken, vec![3, 1, 2]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_insert_and_correlate() {
        let store = Arc::new(CorrelationStore::new());

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for id in 0..500u32 {
                    register(&store, id, id as u64);
                }
            })
        };
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut matched = 0;
                for id in 0..500u32 {
                    if matches!(
                        store.correlate(ProbeId(id), id as u64 + 20, 0),
                        Correlation::Matched { .. }
                    ) {
                        matched += 1;
                    }
                }
                matched
            })
        };

        writer.join().unwrap();
        let matched = reader.join().unwrap();

        assert_eq!(store.len(), 500);
        assert_eq!(store.answered(), matched);
        for record in store.records().iter().filter(|r| r.is_answered()) {
            assert_eq!(record.round_trip_time_ms(), Some(20));
        }
    }
}
