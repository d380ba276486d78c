use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::delta::Delta;
use crate::object::ObjectRef;

/// Where a committed transaction originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Remote,
}

/// Sentinel watcher count marking a retired map. A map reaches it only from
/// zero and never leaves it.
const RETIRED: u32 = u32::MAX;

/// One committed transaction's reads and writes, at a fixed chain position.
///
/// The payload is mutable in exactly one way: when the map retires, its
/// entries roll forward into the nearest live successor, so a later reader
/// still sees every change exactly once. The watcher count is the map's
/// reference count; retirement is only possible from zero.
#[derive(Debug)]
pub struct VersionMap {
    index: usize,
    origin: Origin,
    watchers: AtomicU32,
    payload: RwLock<MapPayload>,
}

#[derive(Debug, Default)]
struct MapPayload {
    reads: Vec<(ObjectRef, Delta)>,
    writes: Vec<(ObjectRef, Delta)>,
}

impl VersionMap {
    /// Stable position in the chain.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Current watcher count. Retired maps report zero.
    pub fn watchers(&self) -> u32 {
        match self.watchers.load(Ordering::Acquire) {
            RETIRED => 0,
            count => count,
        }
    }

    pub fn is_retired(&self) -> bool {
        self.watchers.load(Ordering::Acquire) == RETIRED
    }

    /// Register `count` additional watchers unless the map has retired.
    ///
    /// Returns `false` when the map is already retired; its payload has
    /// rolled forward and must be read from a successor.
    pub fn try_add_watchers(&self, count: u32) -> bool {
        let mut current = self.watchers.load(Ordering::Acquire);
        loop {
            if current == RETIRED {
                return false;
            }
            match self.watchers.compare_exchange(
                current,
                current + count,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Register watchers on a map known to be live (the caller already holds
    /// a watcher or the chain's frontier pin).
    pub(crate) fn add_watchers(&self, count: u32) {
        let added = self.try_add_watchers(count);
        if !added {
            error!(index = self.index, "watcher added to a retired map");
            debug_assert!(added, "watcher added to a retired map");
        }
    }

    /// Drop `count` watchers, returning the remaining count.
    pub(crate) fn sub_watchers(&self, count: u32) -> u32 {
        let mut current = self.watchers.load(Ordering::Acquire);
        loop {
            if current == RETIRED || current < count {
                // Underflow means release bookkeeping has slipped; log and
                // hold at zero rather than corrupt the count.
                error!(
                    index = self.index,
                    current, count, "watcher count underflow"
                );
                debug_assert!(false, "watcher count underflow");
                return 0;
            }
            match self.watchers.compare_exchange(
                current,
                current - count,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current - count,
                Err(observed) => current = observed,
            }
        }
    }

    /// Attempt the zero-to-retired transition. At most one caller wins.
    pub(crate) fn try_retire(&self) -> bool {
        self.watchers
            .compare_exchange(0, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Read marks recorded by this map, oldest first.
    pub fn reads(&self) -> Vec<(ObjectRef, Delta)> {
        self.payload
            .read()
            .expect("version map payload poisoned")
            .reads
            .clone()
    }

    /// Write records of this map, oldest first.
    pub fn writes(&self) -> Vec<(ObjectRef, Delta)> {
        self.payload
            .read()
            .expect("version map payload poisoned")
            .writes
            .clone()
    }

    /// Whether the payload has been rolled forward.
    pub fn is_drained(&self) -> bool {
        let payload = self.payload.read().expect("version map payload poisoned");
        payload.reads.is_empty() && payload.writes.is_empty()
    }

    /// Move this (retired) map's payload into `target`, merging per object.
    ///
    /// Returns `false` without touching either payload if `target` itself
    /// retired first; the caller must pick a later successor. Target retire
    /// and drain are serialized through the target's payload lock, so a
    /// record is moved by exactly one of the racing parties.
    pub(crate) fn drain_into(&self, target: &VersionMap) -> bool {
        debug_assert!(self.index < target.index, "payload must roll forward");
        // Lock order is descending index, matching every other drain.
        let mut after = target.payload.write().expect("version map payload poisoned");
        if target.is_retired() {
            return false;
        }
        let (reads, writes) = {
            let mut before = self.payload.write().expect("version map payload poisoned");
            (mem::take(&mut before.reads), mem::take(&mut before.writes))
        };
        Self::roll_forward(reads, &mut after.reads);
        Self::roll_forward(writes, &mut after.writes);
        true
    }

    /// Fold an older map's entries under a newer map's, keeping age order
    /// and merging records of objects present in both.
    fn roll_forward(older: Vec<(ObjectRef, Delta)>, newer: &mut Vec<(ObjectRef, Delta)>) {
        if newer.is_empty() {
            *newer = older;
            return;
        }
        let mut combined = older;
        for (object, delta) in newer.drain(..) {
            match combined.iter_mut().find(|(o, _)| *o == object) {
                Some(entry) => entry.1.merge(&delta),
                None => combined.push((object, delta)),
            }
        }
        *newer = combined;
    }
}

/// Accumulates one transaction's marks before publication.
///
/// Marking the same object twice folds into a single record, so a map never
/// carries two entries for one object.
pub struct VersionMapBuilder {
    origin: Origin,
    reads: Vec<(ObjectRef, Delta)>,
    writes: Vec<(ObjectRef, Delta)>,
}

impl VersionMapBuilder {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Record a read mark for `object`.
    pub fn read(mut self, object: ObjectRef, delta: Delta) -> Self {
        Self::record(&mut self.reads, object, delta);
        self
    }

    /// Record a write for `object`.
    pub fn write(mut self, object: ObjectRef, delta: Delta) -> Self {
        Self::record(&mut self.writes, object, delta);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    fn record(list: &mut Vec<(ObjectRef, Delta)>, object: ObjectRef, delta: Delta) {
        match list.iter_mut().find(|(o, _)| *o == object) {
            Some(entry) => entry.1.merge(&delta),
            None => list.push((object, delta)),
        }
    }

    pub(crate) fn build(self, index: usize, watchers: u32) -> VersionMap {
        VersionMap {
            index,
            origin: self.origin,
            watchers: AtomicU32::new(watchers),
            payload: RwLock::new(MapPayload {
                reads: self.reads,
                writes: self.writes,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectId, ResourceId};

    fn obj(n: u64) -> ObjectRef {
        ObjectRef::new(ResourceId(1), ObjectId(n))
    }

    fn map_with(index: usize, watchers: u32, writes: Vec<(ObjectRef, Delta)>) -> VersionMap {
        let mut builder = VersionMapBuilder::new(Origin::Local);
        for (object, delta) in writes {
            builder = builder.write(object, delta);
        }
        builder.build(index, watchers)
    }

    #[test]
    fn builder_folds_repeated_marks() {
        let map = map_with(
            0,
            1,
            vec![
                (obj(1), Delta::indexed_write(0)),
                (obj(1), Delta::indexed_write(3)),
                (obj(2), Delta::counter_add(1)),
            ],
        );
        let writes = map.writes();
        assert_eq!(writes.len(), 2);
        let Delta::Indexed(indexed) = &writes[0].1 else {
            panic!("wrong shape");
        };
        assert_eq!(indexed.written_fields, 0b1001);
    }

    #[test]
    fn watchers_add_and_remove() {
        let map = map_with(0, 1, vec![(obj(1), Delta::counter_add(1))]);
        assert!(map.try_add_watchers(2));
        assert_eq!(map.watchers(), 3);
        assert_eq!(map.sub_watchers(3), 0);
        assert!(!map.is_retired());
    }

    #[test]
    fn retirement_only_from_zero_and_is_final() {
        let map = map_with(0, 1, vec![(obj(1), Delta::counter_add(1))]);
        assert!(!map.try_retire());
        map.sub_watchers(1);
        assert!(map.try_retire());
        assert!(!map.try_retire());
        assert!(map.is_retired());
        assert!(!map.try_add_watchers(1));
        assert_eq!(map.watchers(), 0);
    }

    #[test]
    fn drain_merges_per_object_with_later_winning() {
        let older = map_with(
            0,
            0,
            vec![
                (obj(1), Delta::counter_add(3)),
                (obj(2), Delta::resource_put()),
            ],
        );
        let newer = map_with(1, 1, vec![(obj(1), Delta::counter_add(5))]);

        assert!(older.try_retire());
        assert!(older.drain_into(&newer));
        assert!(older.is_drained());

        let writes = newer.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], (obj(1), Delta::counter_add(8)));
        assert_eq!(writes[1], (obj(2), Delta::resource_put()));
    }

    #[test]
    fn drain_refuses_retired_target() {
        let older = map_with(0, 0, vec![(obj(1), Delta::counter_add(3))]);
        let newer = map_with(1, 0, vec![(obj(2), Delta::counter_add(5))]);
        assert!(newer.try_retire());
        assert!(older.try_retire());
        assert!(!older.drain_into(&newer));
        assert!(!older.is_drained());
    }
}
