use std::collections::HashSet;

use rand::Rng;

use crate::events::BlessingRecord;

/// Every blessing seen this session, deduplicated by id, in first-seen
/// order. Entries are never removed; visibility lives in `bubbles`.
#[derive(Debug, Default)]
pub struct BlessingPool {
    records: Vec<BlessingRecord>,
    known: HashSet<String>,
}

impl BlessingPool {
    /// Adds records whose id has not been seen yet. Returns how many were new.
    pub fn ingest_batch<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = BlessingRecord>,
    {
        let mut added = 0;
        for record in records {
            if self.known.insert(record.id.clone()) {
                self.records.push(record);
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, id: &str) -> bool {
        self.known.contains(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlessingRecord> {
        self.records.iter()
    }

    pub fn pick_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&BlessingRecord> {
        if self.records.is_empty() {
            return None;
        }
        self.records.get(rng.gen_range(0..self.records.len()))
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.known.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{TimeZone, Utc};

    use super::BlessingPool;
    use crate::events::BlessingRecord;

    pub(crate) fn record(id: &str) -> BlessingRecord {
        BlessingRecord {
            id: id.to_owned(),
            room: "global".to_owned(),
            name: None,
            text: format!("blessing {id}"),
            created_at: Utc
                .with_ymd_and_hms(2025, 12, 31, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
        }
    }

    #[test]
    fn duplicate_ids_are_stored_once() {
        let mut pool = BlessingPool::default();
        assert_eq!(pool.ingest_batch(vec![record("a"), record("b")]), 2);
        assert_eq!(pool.ingest_batch(vec![record("b"), record("c")]), 1);
        assert_eq!(pool.ingest_batch(vec![record("a")]), 0);
        assert_eq!(pool.len(), 3);
        let ids: Vec<_> = pool.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_within_one_batch_is_ignored() {
        let mut pool = BlessingPool::default();
        pool.ingest_batch(vec![record("x"), record("x")]);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains("x"));
    }

    #[test]
    fn empty_pool_has_no_pick() {
        let pool = BlessingPool::default();
        let mut rng = rand::thread_rng();
        assert!(pool.pick_uniform(&mut rng).is_none());
    }
}
