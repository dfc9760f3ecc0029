// ── Point-value cache ──
//
// Copy-on-write map from point id to its latest `PointValue`. Readers take
// an `Arc` snapshot; each sweep publishes a fresh map in one step, so no
// reader ever observes half a sweep.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{PointDefinition, PointValue};

/// Full cache contents, keyed by point id.
pub type PointSnapshot = BTreeMap<String, PointValue>;

pub struct PointCache {
    known: HashSet<String>,
    snapshot: watch::Sender<Arc<PointSnapshot>>,
}

impl PointCache {
    pub fn new(points: &[PointDefinition]) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(PointSnapshot::new()));
        Self {
            known: points.iter().map(|p| p.id.clone()).collect(),
            snapshot,
        }
    }

    pub fn snapshot(&self) -> Arc<PointSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.borrow().is_empty()
    }

    /// Merge one sweep's results and publish the new map.
    ///
    /// Each entry replaces the previous record for its point whole.
    /// Entries for unknown ids are dropped.
    pub fn apply_sweep(&self, entries: impl IntoIterator<Item = (String, PointValue)>) {
        let mut next = PointSnapshot::clone(&self.snapshot.borrow());
        for (id, value) in entries {
            if self.known.contains(&id) {
                next.insert(id, value);
            }
        }
        self.snapshot.send_replace(Arc::new(next));
    }

    /// Notified whenever a sweep is applied.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PointSnapshot>> {
        self.snapshot.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, PlcValue, Quality};
    use chrono::Utc;

    #[test]
    fn sweep_ignores_unconfigured_ids() {
        let cache = PointCache::new(&[PointDefinition::new("a", 1, 0, DataType::Int)]);
        assert!(cache.is_empty());

        cache.apply_sweep([
            ("a".to_owned(), PointValue::good(PlcValue::Int(1), Utc::now())),
            ("ghost".to_owned(), PointValue::good(PlcValue::Int(2), Utc::now())),
        ]);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("a"));
    }

    #[test]
    fn later_sweep_replaces_whole_entry() {
        let cache = PointCache::new(&[PointDefinition::new("a", 1, 0, DataType::Int)]);
        cache.apply_sweep([("a".to_owned(), PointValue::good(PlcValue::Int(1), Utc::now()))]);
        let before = cache.snapshot();

        cache.apply_sweep([("a".to_owned(), PointValue::bad("timeout", Utc::now()))]);

        assert_eq!(before["a"].quality(), Quality::Good);
        let after = cache.snapshot();
        assert_eq!(after["a"].quality(), Quality::Bad);
        assert_eq!(after["a"].value(), None);
    }
}
