use std::sync::{Arc, RwLock};

use ebb_actor::{Actor, Executor};
use tracing::{debug, error};

use crate::error::ChainError;
use crate::map::{VersionMap, VersionMapBuilder};
use crate::snapshot::Snapshot;

/// How much batching a walk may apply to unobserved maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Granularity {
    /// Every map is dispatched individually, in chain order.
    All,
    /// Any contiguous run of unobserved maps may fold into one dispatch.
    Coalesce,
}

/// Host surface consumed by walkers.
///
/// Walkers never hold chain locks; they take a [`Snapshot`], walk it, and
/// settle watcher accounting through this trait.
pub trait CommitSource: Send + Sync {
    /// Current chain view. Cheap; clones one `Arc`.
    fn snapshot(&self) -> Arc<Snapshot>;

    fn granularity(&self) -> Granularity;

    /// Executor on which observer actors run.
    fn executor(&self) -> Arc<dyn Executor>;

    /// Register `count` watchers on `map` unless it has retired.
    fn try_add_watchers(&self, map: &VersionMap, count: u32) -> bool;

    /// Release `count` watchers on `map`, reclaiming it if the count
    /// reaches zero.
    fn remove_watchers(&self, map: &VersionMap, count: u32);

    /// Start waking `actor` on every publication, atomically with taking
    /// the baseline snapshot.
    ///
    /// The returned snapshot already carries one watcher on its newest map,
    /// granted on the registrant's behalf as its initial pin. No map can be
    /// published between the baseline and the registration, so every later
    /// map carries the registrant's seed watchers.
    fn register(&self, actor: Arc<Actor>, origin_sensitive: bool) -> Arc<Snapshot>;

    /// Stop waking `actor`.
    fn unregister(&self, actor: &Arc<Actor>);
}

struct RegisteredObserver {
    actor: Arc<Actor>,
    origin_sensitive: bool,
}

/// Append-only chain of version maps plus the observer registry.
///
/// Publication appends under the frontier lock, then wakes observers after
/// the lock is dropped; an observer running inline may immediately re-enter
/// [`Chain::snapshot`], which must not deadlock.
///
/// Watcher seeding at publish:
/// - every new map starts with one watcher, the chain's own frontier pin,
///   which moves forward with each publication;
/// - under [`Granularity::All`] each registered observer adds one more,
///   released when that observer finishes the map's dispatch;
/// - under [`Granularity::Coalesce`] an origin flip adds one watcher per
///   origin-sensitive observer to the map before the flip, so the boundary
///   survives until those observers have split their walks across it.
///
/// A map whose count reaches zero retires: its payload rolls forward into
/// the nearest live successor and the map stays behind as an empty marker,
/// keeping chain indices stable.
pub struct Chain {
    granularity: Granularity,
    frontier: RwLock<Arc<Snapshot>>,
    observers: RwLock<Vec<RegisteredObserver>>,
    executor: Arc<dyn Executor>,
}

impl Chain {
    pub fn new(granularity: Granularity, executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            granularity,
            frontier: RwLock::new(Arc::new(Snapshot::empty())),
            observers: RwLock::new(Vec::new()),
            executor,
        })
    }

    /// Append one committed transaction and wake every registered observer.
    pub fn publish(&self, builder: VersionMapBuilder) -> Result<Arc<VersionMap>, ChainError> {
        if builder.is_empty() {
            return Err(ChainError::EmptyCommit);
        }

        let map;
        let woken: Vec<Arc<Actor>>;
        {
            let mut frontier = self.frontier.write().expect("chain frontier lock poisoned");
            let observers = self.observers.read().expect("chain observer lock poisoned");

            let seed = match self.granularity {
                Granularity::All => 1 + observers.len() as u32,
                Granularity::Coalesce => 1,
            };
            map = Arc::new(builder.build(frontier.len(), seed));

            let previous = frontier.last().cloned();
            if let Some(previous) = &previous {
                if self.granularity == Granularity::Coalesce && previous.origin() != map.origin()
                {
                    let sensitive =
                        observers.iter().filter(|o| o.origin_sensitive).count() as u32;
                    if sensitive > 0 {
                        previous.add_watchers(sensitive);
                    }
                }
            }

            let next = Arc::new(frontier.extended(Arc::clone(&map)));
            *frontier = Arc::clone(&next);
            if let Some(previous) = &previous {
                // The frontier pin moves to the new map (counted in its
                // seed above).
                self.release(&next, previous, 1);
            }

            woken = observers.iter().map(|o| Arc::clone(&o.actor)).collect();
        }

        debug!(index = map.index(), origin = ?map.origin(), "published version map");
        for actor in woken {
            // A closing observer simply declines the wake-up.
            let _ = actor.schedule();
        }
        Ok(map)
    }

    fn release(&self, snapshot: &Snapshot, map: &VersionMap, count: u32) {
        if map.sub_watchers(count) == 0 {
            self.try_absorb(snapshot, map);
        }
    }

    /// Roll a zero-watcher map's payload into the nearest live successor.
    fn try_absorb(&self, snapshot: &Snapshot, map: &VersionMap) {
        if !map.try_retire() {
            // Raced with a fresh watcher or another release; either way the
            // map is no longer ours to reclaim.
            return;
        }
        let mut next = map.index() + 1;
        loop {
            let Some(successor) = snapshot.get(next) else {
                // The frontier is pinned by the chain itself, so a retired
                // map always has a live successor.
                error!(index = map.index(), "retired map has no live successor");
                debug_assert!(false, "retired map has no live successor");
                return;
            };
            if map.drain_into(successor) {
                debug!(from = map.index(), into = successor.index(), "absorbed version map");
                return;
            }
            next += 1;
        }
    }
}

impl CommitSource for Chain {
    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.frontier.read().expect("chain frontier lock poisoned"))
    }

    fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    fn try_add_watchers(&self, map: &VersionMap, count: u32) -> bool {
        map.try_add_watchers(count)
    }

    fn remove_watchers(&self, map: &VersionMap, count: u32) {
        let snapshot = self.snapshot();
        self.release(&snapshot, map, count);
    }

    fn register(&self, actor: Arc<Actor>, origin_sensitive: bool) -> Arc<Snapshot> {
        // Holding the frontier lock keeps publication out, so the baseline,
        // the registration, and the pin are one atomic step. Lock order is
        // frontier before observers, matching publish.
        let frontier = self.frontier.read().expect("chain frontier lock poisoned");
        self.observers
            .write()
            .expect("chain observer lock poisoned")
            .push(RegisteredObserver {
                actor,
                origin_sensitive,
            });
        if let Some(map) = frontier.last() {
            // Live under this lock: the chain's own pin is on it.
            map.add_watchers(1);
        }
        Arc::clone(&frontier)
    }

    fn unregister(&self, actor: &Arc<Actor>) {
        self.observers
            .write()
            .expect("chain observer lock poisoned")
            .retain(|o| !Arc::ptr_eq(&o.actor, actor));
    }
}
