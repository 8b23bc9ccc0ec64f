//! Retention policy: keep the N most recent artifacts, evict the rest
//!
//! The selection is a pure function over the listed object set, so the
//! destination only has to list, select and delete.

use chrono::{DateTime, Utc};

/// One listed artifact at the destination. Reconstructed on demand by
/// listing; never persisted by this system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObjectRecord {
    /// Object key, including any prefix
    pub key: String,
    /// Last modification time reported by the backend
    pub last_modified: DateTime<Utc>,
}

/// Select the records to evict so that only the `keep` most recently
/// modified remain. Ordering is descending by last-modified, ties broken
/// descending by key so repeated runs pick the same victims. The returned
/// records are in deletion order.
pub fn select_evictions(
    mut records: Vec<StoredObjectRecord>,
    keep: usize,
) -> Vec<StoredObjectRecord> {
    records.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.key.cmp(&a.key))
    });
    if records.len() > keep {
        records.split_off(keep)
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(key: &str, secs: i64) -> StoredObjectRecord {
        StoredObjectRecord {
            key: key.to_string(),
            last_modified: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn keeps_most_recent_n() {
        // Increasing timestamps keyed a < b < c < d < e
        let records = vec![
            record("a", 1),
            record("b", 2),
            record("c", 3),
            record("d", 4),
            record("e", 5),
        ];
        let evicted = select_evictions(records, 3);
        let keys: Vec<_> = evicted.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn keep_at_least_count_is_a_noop() {
        let records = vec![record("a", 1), record("b", 2)];
        assert!(select_evictions(records.clone(), 2).is_empty());
        assert!(select_evictions(records, 5).is_empty());
    }

    #[test]
    fn empty_set_is_a_noop() {
        assert!(select_evictions(Vec::new(), 3).is_empty());
    }

    #[test]
    fn repeat_run_is_a_noop() {
        let records = vec![
            record("a", 1),
            record("b", 2),
            record("c", 3),
            record("d", 4),
            record("e", 5),
        ];
        let evicted = select_evictions(records.clone(), 3);
        let remaining: Vec<_> = records
            .into_iter()
            .filter(|r| !evicted.contains(r))
            .collect();
        let keys: Vec<_> = remaining.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "d", "e"]);
        assert!(select_evictions(remaining, 3).is_empty());
    }

    #[test]
    fn timestamp_ties_break_by_key_descending() {
        let records = vec![record("a", 7), record("b", 7), record("c", 7)];
        let evicted = select_evictions(records, 2);
        let keys: Vec<_> = evicted.iter().map(|r| r.key.as_str()).collect();
        // c and b survive; a is the deterministic victim
        assert_eq!(keys, vec!["a"]);
    }
}
