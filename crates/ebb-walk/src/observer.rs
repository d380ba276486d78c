//! The observer: an actor-driven, resumable walk over unobserved maps.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use ebb_actor::{Actor, ActorHandler, Task};
use ebb_chain::{CommitSource, Delta, Granularity, ObjectRef, ResourceId, Snapshot, VersionMap};
use tracing::{debug, error, trace};

use crate::continuation::{Continuation, MapStep, SegmentStep, WorkspaceStep};
use crate::touched::{AddOutcome, TouchedSet};
use crate::visitor::{Flow, MapDirective, Pass, Visitor};

/// Per-observer walk options.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObserverConfig {
    /// Split coalesced walks at local/remote origin boundaries, so one
    /// dispatch never mixes changes from both sides.
    pub origin_sensitive: bool,
}

/// A registered consumer of a snapshot chain.
///
/// Each observer owns one [`Actor`]; the chain wakes it on publication and
/// the actor guarantees walks never overlap. The observer pins the newest
/// map it has consumed so the chain cannot roll changes backward across its
/// observed boundary.
pub struct Observer<V: Visitor> {
    actor: Arc<Actor>,
    source: Arc<dyn CommitSource>,
    config: ObserverConfig,
    state: Mutex<WalkState<V>>,
}

impl<V: Visitor + 'static> Observer<V> {
    /// Register a new observer on `source`.
    ///
    /// Maps already published form the observer's baseline and are never
    /// dispatched to it; anything published from here on is. Registration
    /// captures the baseline atomically with publication, so every map in
    /// the observer's first walk range carries its seed watchers.
    pub fn attach(source: Arc<dyn CommitSource>, visitor: V, config: ObserverConfig) -> Arc<Self> {
        let actor = Actor::new(source.executor());
        // The registration hands back the baseline with the pin on its
        // newest map already granted.
        let baseline = source.register(Arc::clone(&actor), config.origin_sensitive);

        let observer = Arc::new(Self {
            actor: Arc::clone(&actor),
            source: Arc::clone(&source),
            config,
            state: Mutex::new(WalkState {
                visitor,
                cont: Continuation::new(),
                observed: baseline.len(),
                pinned: baseline.last().cloned(),
                frame: None,
            }),
        });

        let weak = Arc::downgrade(&observer);
        let handler: Weak<dyn ActorHandler> = weak;
        actor.bind(handler);
        actor.on_started();
        // Catch up on anything published since registration.
        actor.schedule();
        observer
    }

    pub fn actor(&self) -> &Arc<Actor> {
        &self.actor
    }

    /// Request cooperative close; `callback` fires once teardown completes.
    pub fn close(&self, callback: impl FnOnce() + Send + 'static) {
        self.actor.request_close(callback);
    }

    /// Run `f` against the visitor. Must not be called from the visitor's
    /// own callbacks.
    pub fn with_visitor<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        f(&mut self.state.lock().expect("observer state poisoned").visitor)
    }
}

impl<V: Visitor + 'static> ActorHandler for Observer<V> {
    fn process(&self) -> bool {
        let mut state = self.state.lock().expect("observer state poisoned");
        matches!(
            state.walk(self.source.as_ref(), self.config),
            Walk::Done
        )
    }

    fn shutdown(&self, done: Task) {
        self.source.unregister(&self.actor);

        let mut state = self.state.lock().expect("observer state poisoned");
        if let Some(frame) = state.frame.take() {
            // Closing with a suspended walk; give its watchers back.
            debug!(through = frame.end, "discarding suspended walk at close");
            for &index in &frame.holds {
                if let Some(map) = frame.snapshot.get(index) {
                    self.source.remove_watchers(map, 1);
                }
            }
            state.cont.clear();
        }
        if let Some(pin) = state.pinned.take() {
            self.source.remove_watchers(&pin, 1);
        }
        drop(state);

        done();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Walk {
    Done,
    Interrupted,
}

/// One in-progress (possibly suspended) walk over a fixed snapshot range.
struct WalkFrame {
    snapshot: Arc<Snapshot>,
    granularity: Granularity,
    start: usize,
    /// Inclusive index of the newest map in the walk.
    end: usize,
    /// Indices of maps this walk holds a watcher on. Always includes `end`,
    /// which becomes the observer's pin when the walk completes.
    holds: Vec<usize>,
    segments: Vec<Segment>,
    segment: usize,
    gather: Gather,
}

/// A contiguous run of maps dispatched as one unit.
#[derive(Clone, Copy, Debug)]
struct Segment {
    start: usize,
    end: usize,
}

/// Deduplicated view of everything one segment touched.
struct Gather {
    resources: TouchedSet<ResourceId>,
    seen_reads: TouchedSet<ObjectRef>,
    seen_writes: TouchedSet<ObjectRef>,
    /// Per-resource object lists, parallel to `resources` positions.
    buckets: Vec<Bucket>,
    read_deltas: HashMap<ObjectRef, Vec<Delta>>,
    write_deltas: HashMap<ObjectRef, Vec<Delta>>,
    /// Resource currently being dispatched; survives suspension.
    current: Option<CurrentResource>,
}

#[derive(Default)]
struct Bucket {
    reads: Vec<ObjectRef>,
    writes: Vec<ObjectRef>,
}

struct CurrentResource {
    bucket: Bucket,
    pass: Pass,
    cursor: usize,
}

impl Gather {
    fn new() -> Self {
        Self {
            resources: TouchedSet::new(),
            seen_reads: TouchedSet::new(),
            seen_writes: TouchedSet::new(),
            buckets: Vec::new(),
            read_deltas: HashMap::new(),
            write_deltas: HashMap::new(),
            current: None,
        }
    }
}

struct WalkState<V> {
    visitor: V,
    cont: Continuation,
    /// Number of maps consumed. Strictly advances; a map index below this
    /// is never dispatched again.
    observed: usize,
    /// Watcher held on the newest consumed map.
    pinned: Option<Arc<VersionMap>>,
    frame: Option<WalkFrame>,
}

impl<V: Visitor> WalkState<V> {
    fn walk(&mut self, source: &dyn CommitSource, config: ObserverConfig) -> Walk {
        if self.frame.is_none() {
            debug_assert!(!self.cont.interrupted(), "suspended walk has no frame");
            match self.begin(source, config) {
                Some(frame) => self.frame = Some(frame),
                None => return Walk::Done,
            }
        }

        match self.visit_workspace(source) {
            Walk::Interrupted => Walk::Interrupted,
            Walk::Done => {
                self.finish(source, config);
                Walk::Done
            }
        }
    }

    /// Fix the walk's range: pin the frontier, take gather holds on the
    /// unobserved middle maps, and segment the range.
    fn begin(&mut self, source: &dyn CommitSource, config: ObserverConfig) -> Option<WalkFrame> {
        let granularity = source.granularity();
        let snapshot = loop {
            let snapshot = source.snapshot();
            if snapshot.len() <= self.observed {
                debug_assert_eq!(snapshot.len(), self.observed, "observed beyond frontier");
                return None;
            }
            let pinned = match snapshot.last() {
                Some(map) => source.try_add_watchers(map, 1),
                None => false,
            };
            if pinned {
                break snapshot;
            }
            // Lost a race against reclamation; the frontier has moved.
        };

        let start = self.observed;
        let end = snapshot.len() - 1;
        let mut holds = vec![end];
        if granularity == Granularity::Coalesce {
            // Hold every map we are about to read so none of them rolls
            // forward mid-gather. A map that already retired is empty; its
            // payload awaits us in a later map of the same range.
            for index in start..end {
                if let Some(map) = snapshot.get(index) {
                    if source.try_add_watchers(map, 1) {
                        holds.push(index);
                    }
                }
            }
        }

        let segments = match granularity {
            Granularity::All => (start..=end)
                .map(|index| Segment {
                    start: index,
                    end: index,
                })
                .collect(),
            Granularity::Coalesce if config.origin_sensitive => {
                split_by_origin(&snapshot, start, end)
            }
            Granularity::Coalesce => vec![Segment { start, end }],
        };

        trace!(start, end, segments = segments.len(), "walk range fixed");
        Some(WalkFrame {
            snapshot,
            granularity,
            start,
            end,
            holds,
            segments,
            segment: 0,
            gather: Gather::new(),
        })
    }

    fn frame_mut(&mut self) -> &mut WalkFrame {
        self.frame.as_mut().expect("no active walk frame")
    }

    fn frame_ref(&self) -> &WalkFrame {
        self.frame.as_ref().expect("no active walk frame")
    }

    fn visit_workspace(&mut self, source: &dyn CommitSource) -> Walk {
        let mut step = if self.cont.interrupted() {
            self.cont.pop_workspace_step()
        } else {
            WorkspaceStep::Visiting
        };

        loop {
            match step {
                WorkspaceStep::Visiting => {
                    match guard(Flow::Continue, "visiting workspace", || {
                        self.visitor.on_visiting_workspace()
                    }) {
                        Flow::Suspend => {
                            self.cont.push_workspace_step(WorkspaceStep::Visiting);
                            return Walk::Interrupted;
                        }
                        Flow::Continue => step = WorkspaceStep::Visit,
                    }
                }
                WorkspaceStep::Visit => match self.visit_segments(source) {
                    Walk::Interrupted => {
                        self.cont.push_workspace_step(WorkspaceStep::Visit);
                        return Walk::Interrupted;
                    }
                    Walk::Done => step = WorkspaceStep::Visited,
                },
                WorkspaceStep::Visited => {
                    match guard(Flow::Continue, "visited workspace", || {
                        self.visitor.on_visited_workspace()
                    }) {
                        Flow::Suspend => {
                            self.cont.push_workspace_step(WorkspaceStep::Visited);
                            return Walk::Interrupted;
                        }
                        Flow::Continue => return Walk::Done,
                    }
                }
            }
        }
    }

    fn visit_segments(&mut self, source: &dyn CommitSource) -> Walk {
        loop {
            let segment = {
                let frame = self.frame_ref();
                match frame.segments.get(frame.segment) {
                    None => return Walk::Done,
                    Some(segment) => *segment,
                }
            };

            if let Walk::Interrupted = self.visit_segment(segment) {
                return Walk::Interrupted;
            }

            self.release_segment(source, segment);
            let frame = self.frame_mut();
            frame.segment += 1;
            frame.gather = Gather::new();
            // A consumed map is never revisited, even if the walk suspends
            // in a later segment.
            debug_assert_eq!(segment.start, self.observed, "segment out of order");
            self.observed = segment.end + 1;
        }
    }

    fn visit_segment(&mut self, segment: Segment) -> Walk {
        let (resume_in_maps, mut index) = if self.cont.interrupted() {
            match self.cont.pop_segment_step() {
                SegmentStep::Maps => (true, self.cont.pop_usize()),
                SegmentStep::Resources => (false, 0),
            }
        } else {
            (true, segment.start)
        };

        if resume_in_maps {
            while index <= segment.end {
                if let Walk::Interrupted = self.visit_map(index) {
                    self.cont.push_usize(index);
                    self.cont.push_segment_step(SegmentStep::Maps);
                    return Walk::Interrupted;
                }
                index += 1;
            }
        }

        if let Walk::Interrupted = self.visit_resources() {
            self.cont.push_segment_step(SegmentStep::Resources);
            return Walk::Interrupted;
        }
        Walk::Done
    }

    fn visit_map(&mut self, index: usize) -> Walk {
        let mut step = if self.cont.interrupted() {
            self.cont.pop_map_step()
        } else {
            MapStep::Visiting
        };

        loop {
            match step {
                MapStep::Visiting => {
                    match guard(MapDirective::Visit, "visiting map", || {
                        self.visitor.on_visiting_map(index)
                    }) {
                        MapDirective::Suspend => {
                            self.cont.push_map_step(MapStep::Visiting);
                            return Walk::Interrupted;
                        }
                        MapDirective::Skip => return Walk::Done,
                        MapDirective::Visit => step = MapStep::Reads,
                    }
                }
                MapStep::Reads => {
                    self.gather(index, Pass::Read);
                    step = MapStep::Writes;
                }
                MapStep::Writes => {
                    self.gather(index, Pass::Write);
                    step = MapStep::Visited;
                }
                MapStep::Visited => {
                    match guard(Flow::Continue, "visited map", || {
                        self.visitor.on_visited_map(index)
                    }) {
                        Flow::Suspend => {
                            self.cont.push_map_step(MapStep::Visited);
                            return Walk::Interrupted;
                        }
                        Flow::Continue => return Walk::Done,
                    }
                }
            }
        }
    }

    /// Fold one map's marks into the segment gather, deduplicating objects
    /// and grouping them under their resource.
    fn gather(&mut self, index: usize, pass: Pass) {
        let frame = self.frame_mut();
        let Some(map) = frame.snapshot.get(index) else {
            return;
        };
        let entries = match pass {
            Pass::Read => map.reads(),
            Pass::Write => map.writes(),
        };

        let gather = &mut frame.gather;
        for (object, delta) in entries {
            let position = match gather.resources.add(object.resource) {
                AddOutcome::Added(position) => {
                    gather.buckets.push(Bucket::default());
                    debug_assert_eq!(position + 1, gather.buckets.len());
                    position
                }
                AddOutcome::Present(position) => position,
            };
            match pass {
                Pass::Read => {
                    if let AddOutcome::Added(_) = gather.seen_reads.add(object) {
                        gather.buckets[position].reads.push(object);
                    }
                    gather.read_deltas.entry(object).or_default().push(delta);
                }
                Pass::Write => {
                    if let AddOutcome::Added(_) = gather.seen_writes.add(object) {
                        gather.buckets[position].writes.push(object);
                    }
                    gather.write_deltas.entry(object).or_default().push(delta);
                }
            }
        }
    }

    /// Dispatch gathered resources, newest-touched first, reads before
    /// writes within each.
    fn visit_resources(&mut self) -> Walk {
        loop {
            let needs_next = self.frame_ref().gather.current.is_none();
            if needs_next {
                let gather = &mut self.frame_mut().gather;
                match gather.resources.poll_part_of_clear() {
                    None => return Walk::Done,
                    Some(resource) => {
                        let bucket = gather.buckets.pop().unwrap_or_else(|| {
                            error!(%resource, "resource bucket misaligned");
                            debug_assert!(false, "resource bucket misaligned");
                            Bucket::default()
                        });
                        trace!(%resource, "dispatching resource");
                        gather.current = Some(CurrentResource {
                            bucket,
                            pass: Pass::Read,
                            cursor: 0,
                        });
                    }
                }
            }

            if let Walk::Interrupted = self.visit_versions() {
                return Walk::Interrupted;
            }
            self.frame_mut().gather.current = None;
        }
    }

    fn visit_versions(&mut self) -> Walk {
        loop {
            let next = {
                let current = self
                    .frame_mut()
                    .gather
                    .current
                    .as_mut()
                    .expect("no resource under dispatch");
                match current.pass {
                    Pass::Read => {
                        if current.cursor < current.bucket.reads.len() {
                            let object = current.bucket.reads[current.cursor];
                            current.cursor += 1;
                            Some((object, Pass::Read))
                        } else {
                            current.pass = Pass::Write;
                            current.cursor = 0;
                            continue;
                        }
                    }
                    Pass::Write => {
                        if current.cursor < current.bucket.writes.len() {
                            let object = current.bucket.writes[current.cursor];
                            current.cursor += 1;
                            Some((object, Pass::Write))
                        } else {
                            None
                        }
                    }
                }
            };

            match next {
                None => return Walk::Done,
                Some((object, pass)) => {
                    if let Flow::Suspend = self.visit_object(object, pass) {
                        return Walk::Interrupted;
                    }
                }
            }
        }
    }

    /// Merge the object's per-map records into one and double-dispatch it.
    fn visit_object(&mut self, object: ObjectRef, pass: Pass) -> Flow {
        let merged = {
            let gather = &self.frame_ref().gather;
            let deltas = match pass {
                Pass::Read => gather.read_deltas.get(&object),
                Pass::Write => gather.write_deltas.get(&object),
            };
            let Some((first, rest)) = deltas.and_then(|d| d.split_first()) else {
                error!(%object, "object listed without change records");
                debug_assert!(false, "object listed without change records");
                return Flow::Continue;
            };
            let mut merged = first.clone();
            for delta in rest {
                merged.merge(delta);
            }
            merged
        };

        trace!(%object, kind = merged.kind(), ?pass, "visiting object");
        let visited = catch_unwind(AssertUnwindSafe(|| match &merged {
            Delta::Plain(delta) => self.visitor.visit_plain(object, delta, pass),
            Delta::Indexed(delta) => self.visitor.visit_indexed(object, delta, pass),
            Delta::Wide(delta) => self.visitor.visit_wide(object, delta, pass),
            Delta::Keyed(delta) => self.visitor.visit_keyed(object, delta, pass),
            Delta::Counter(delta) => self.visitor.visit_counter(object, delta, pass),
        }));
        match visited {
            Ok(flow) => flow,
            Err(_) => {
                error!(%object, "visitor panicked; continuing walk");
                Flow::Continue
            }
        }
    }

    /// Settle watchers owed for a fully consumed segment.
    ///
    /// Only boundary watchers settle here. A map released mid-walk could
    /// retire and roll its payload forward into a map this walk has not
    /// gathered yet, re-dispatching it; every release that could do that
    /// waits for [`WalkState::finish`]. Boundary maps are safe because the
    /// walk still holds a gather watcher on them.
    fn release_segment(&mut self, source: &dyn CommitSource, segment: Segment) {
        let frame = self.frame_ref();
        if frame.granularity == Granularity::Coalesce && segment.end < frame.end {
            // Crossing an origin boundary releases the watcher publish
            // added for this observer when the origins flipped.
            if let Some(map) = frame.snapshot.get(segment.end) {
                source.remove_watchers(map, 1);
            }
        }
    }

    /// Settle the walk's remaining watchers and advance the pin.
    fn finish(&mut self, source: &dyn CommitSource, config: ObserverConfig) {
        let frame = self.frame.take().expect("no active walk frame");
        debug_assert_eq!(self.observed, frame.end + 1);
        debug_assert_eq!(self.cont.depth(), 0, "continuation not drained at walk end");

        // Per-observer publish watchers, one per consumed map.
        if frame.granularity == Granularity::All {
            for index in frame.start..=frame.end {
                if let Some(map) = frame.snapshot.get(index) {
                    source.remove_watchers(map, 1);
                }
            }
        }

        // Gather holds on the consumed middle maps.
        for &index in &frame.holds {
            if index == frame.end {
                continue;
            }
            if let Some(map) = frame.snapshot.get(index) {
                source.remove_watchers(map, 1);
            }
        }

        // The hold on the newest map becomes the pin; the previous pin is
        // released, together with the inter-walk boundary watcher if the
        // range opened on an origin flip.
        let newest = frame.snapshot.get(frame.end).cloned();
        debug_assert!(newest.is_some(), "walk range outlived its snapshot");
        let previous = match newest {
            Some(map) => self.pinned.replace(map),
            None => self.pinned.take(),
        };
        if let Some(previous) = previous {
            let mut owed = 1;
            if config.origin_sensitive && frame.granularity == Granularity::Coalesce {
                if let Some(first) = frame.snapshot.get(frame.start) {
                    if previous.origin() != first.origin() {
                        owed += 1;
                    }
                }
            }
            source.remove_watchers(&previous, owed);
        }

        debug!(through = frame.end, "walk completed");
    }
}

/// Helper: invoke a visitor callback, containing panics.
fn guard<T>(fallback: T, hook: &'static str, callback: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(value) => value,
        Err(_) => {
            error!(hook, "visitor panicked; continuing walk");
            fallback
        }
    }
}

/// Split `[start, end]` into runs of equal origin.
fn split_by_origin(snapshot: &Snapshot, start: usize, end: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut run_start = start;
    for index in start..end {
        let flips = match (snapshot.get(index), snapshot.get(index + 1)) {
            (Some(before), Some(after)) => before.origin() != after.origin(),
            _ => false,
        };
        if flips {
            segments.push(Segment {
                start: run_start,
                end: index,
            });
            run_start = index + 1;
        }
    }
    segments.push(Segment {
        start: run_start,
        end,
    });
    segments
}
