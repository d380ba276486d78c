use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_queue::SegQueue;
use tracing::error;

use crate::error::ActorError;
use crate::executor::{Executor, Task};

/// Lifecycle states of an [`Actor`].
///
/// The machine starts at `Starting`, transitions monotonically toward
/// `Closed`, and is never reused after `Closed`. The `*Scheduled` variants
/// record that a run has been requested while the base state was in effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    Starting = 0,
    StartingScheduled = 1,
    Idle = 2,
    Scheduled = 3,
    Running = 4,
    RunningScheduled = 5,
    Closing = 6,
    Closed = 7,
}

impl ActorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ActorState::Starting,
            1 => ActorState::StartingScheduled,
            2 => ActorState::Idle,
            3 => ActorState::Scheduled,
            4 => ActorState::Running,
            5 => ActorState::RunningScheduled,
            6 => ActorState::Closing,
            7 => ActorState::Closed,
            other => unreachable!("corrupt actor state value {other}"),
        }
    }
}

/// Owner-side seam of an [`Actor`].
///
/// The handler is held weakly, so an owner embedding an actor does not form
/// a reference cycle.
pub trait ActorHandler: Send + Sync {
    /// Runs once per scheduled run, after queued work items have drained.
    ///
    /// Returning `false` marks the run interrupted: queued barriers stay
    /// deferred and close teardown waits for a later, uninterrupted run.
    fn process(&self) -> bool {
        true
    }

    /// Close teardown hook. Must invoke `done` exactly once when the owner
    /// has finished releasing its resources.
    fn shutdown(&self, done: Task) {
        done();
    }
}

/// A submitted work item that can still be withdrawn.
///
/// Execution and cancellation race for the boxed closure through one slot,
/// so an item is either executed or withdrawn, never both.
struct Envelope {
    task: Mutex<Option<Task>>,
}

impl Envelope {
    fn new(task: Task) -> Self {
        Self {
            task: Mutex::new(Some(task)),
        }
    }

    fn take(&self) -> Option<Task> {
        self.task.lock().expect("envelope lock poisoned").take()
    }
}

/// A single logical thread of control multiplexed onto a shared executor.
///
/// The atomic state machine guarantees that at most one execution of this
/// actor's run loop is in flight at any instant, system-wide, while distinct
/// actors run fully in parallel. Work items submitted from any thread run in
/// submission order; barrier callbacks are deferred to the end of the run in
/// which they drain, so they observe the effects of the whole batch that
/// preceded them.
///
/// Illegal state transitions are programming errors and panic. A panicking
/// work item, barrier, or handler is caught and logged; the run always
/// completes and the state machine keeps moving. An actor that is closing or
/// closed rejects new submissions with [`ActorError::Rejected`]; rejection
/// is an ordinary outcome the caller must handle.
pub struct Actor {
    state: AtomicU8,
    work: SegQueue<Arc<Envelope>>,
    barriers: SegQueue<Arc<Envelope>>,
    close_callback: Mutex<Option<Task>>,
    handler: Mutex<Option<Weak<dyn ActorHandler>>>,
    executor: Arc<dyn Executor>,
}

impl Actor {
    /// Create an actor in the `Starting` state on the given executor.
    ///
    /// The owner must call [`Actor::on_started`] once registration with its
    /// host has completed; runs requested before that are held back.
    pub fn new(executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(ActorState::Starting as u8),
            work: SegQueue::new(),
            barriers: SegQueue::new(),
            close_callback: Mutex::new(None),
            handler: Mutex::new(None),
            executor,
        })
    }

    /// Attach the owner's handler. Called once, before the actor is started.
    pub fn bind(&self, handler: Weak<dyn ActorHandler>) {
        *self.handler.lock().expect("actor handler lock poisoned") = Some(handler);
    }

    /// Current state. Primarily for diagnostics and tests.
    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[cfg(test)]
    fn queued_work(&self) -> usize {
        self.work.len()
    }

    fn transition(&self, from: ActorState, to: ActorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Request that the run loop execute (at least) once more.
    ///
    /// Returns `true` if a run is now guaranteed, `false` if the actor is
    /// closing or closed.
    pub fn schedule(self: &Arc<Self>) -> bool {
        loop {
            match self.state() {
                ActorState::StartingScheduled
                | ActorState::Scheduled
                | ActorState::RunningScheduled => return true,
                ActorState::Starting => {
                    if self.transition(ActorState::Starting, ActorState::StartingScheduled) {
                        return true;
                    }
                }
                ActorState::Idle => {
                    if self.transition(ActorState::Idle, ActorState::Scheduled) {
                        self.spawn_run();
                        return true;
                    }
                }
                ActorState::Running => {
                    if self.transition(ActorState::Running, ActorState::RunningScheduled) {
                        return true;
                    }
                }
                ActorState::Closing | ActorState::Closed => return false,
            }
        }
    }

    /// Complete start-up. Runs requested while starting fire immediately.
    pub fn on_started(self: &Arc<Self>) {
        loop {
            match self.state() {
                ActorState::Starting => {
                    if self.transition(ActorState::Starting, ActorState::Idle) {
                        return;
                    }
                }
                ActorState::StartingScheduled => {
                    if self.transition(ActorState::StartingScheduled, ActorState::Idle) {
                        // Work arrived during start-up.
                        self.schedule();
                        return;
                    }
                }
                other => unreachable!("on_started from {other:?}"),
            }
        }
    }

    /// Enqueue a work item and guarantee a run, or withdraw it and reject.
    ///
    /// An item accepted here executes exactly once before the actor closes;
    /// an item rejected here never executes.
    pub fn submit(self: &Arc<Self>, task: impl FnOnce() + Send + 'static) -> Result<(), ActorError> {
        self.accept(&self.work, Box::new(task), || self.schedule())
    }

    /// Enqueue a barrier callback with the same accept/reject contract as
    /// [`Actor::submit`].
    ///
    /// Barriers fire at the end of the run in which they drain, after every
    /// work item of that run, so they observe the batch's full effects.
    pub fn submit_barrier(
        self: &Arc<Self>,
        barrier: impl FnOnce() + Send + 'static,
    ) -> Result<(), ActorError> {
        self.accept(&self.barriers, Box::new(barrier), || self.schedule())
    }

    fn accept(
        &self,
        queue: &SegQueue<Arc<Envelope>>,
        task: Task,
        schedule: impl FnOnce() -> bool,
    ) -> Result<(), ActorError> {
        if matches!(self.state(), ActorState::Closing | ActorState::Closed) {
            // Reject before enqueueing so a dead actor's queue cannot grow.
            return Err(ActorError::Rejected);
        }
        let envelope = Arc::new(Envelope::new(task));
        queue.push(Arc::clone(&envelope));
        if !schedule() {
            // The actor is dying. If a final run already consumed the item
            // it did execute, so only report rejection when the withdrawal
            // actually wins the slot.
            if envelope.take().is_some() {
                return Err(ActorError::Rejected);
            }
        }
        Ok(())
    }

    /// Request cooperative close. Idempotent.
    ///
    /// From quiescent states the teardown runs immediately on the calling
    /// thread; from running states it is deferred to the end of the current
    /// run. `callback` is handed to the handler's shutdown hook and fires
    /// when teardown completes. A second close request is a no-op and its
    /// callback is dropped.
    pub fn request_close(self: &Arc<Self>, callback: impl FnOnce() + Send + 'static) {
        let immediate = {
            let mut slot = self
                .close_callback
                .lock()
                .expect("actor close slot poisoned");
            let decided = loop {
                let state = self.state();
                match state {
                    ActorState::Closing | ActorState::Closed => return,
                    ActorState::Starting
                    | ActorState::StartingScheduled
                    | ActorState::Scheduled
                    | ActorState::Idle => {
                        if self.transition(state, ActorState::Closing) {
                            break true;
                        }
                    }
                    ActorState::Running | ActorState::RunningScheduled => {
                        if self.transition(state, ActorState::Closing) {
                            break false;
                        }
                    }
                }
            };
            assert!(slot.is_none(), "actor already holds a close callback");
            *slot = Some(Box::new(callback));
            decided
        };

        if immediate {
            self.teardown();
        }
    }

    fn spawn_run(self: &Arc<Self>) {
        let actor = Arc::clone(self);
        self.executor.execute(Box::new(move || actor.run()));
    }

    fn handler(&self) -> Option<Arc<dyn ActorHandler>> {
        self.handler
            .lock()
            .expect("actor handler lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// One run-loop execution. Invoked only through the executor.
    fn run(self: &Arc<Self>) {
        if !self.on_run_starting() {
            // A close won the race against this scheduled run.
            return;
        }

        while let Some(envelope) = self.work.pop() {
            if let Some(task) = envelope.take() {
                // The run must reach on_run_ended even when an item panics,
                // or the state machine wedges in Running.
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("work item panicked in actor run");
                }
            }
        }

        let interrupted = match self.handler() {
            Some(handler) => {
                // A panicking handler counts as an interrupted run.
                !catch_unwind(AssertUnwindSafe(|| handler.process())).unwrap_or(false)
            }
            None => false,
        };

        let mut pending = Vec::new();
        if !interrupted {
            while let Some(envelope) = self.barriers.pop() {
                if let Some(barrier) = envelope.take() {
                    pending.push(barrier);
                }
            }
        }

        self.on_run_ended(interrupted, pending);
    }

    fn on_run_starting(&self) -> bool {
        loop {
            match self.state() {
                ActorState::Scheduled => {
                    if self.transition(ActorState::Scheduled, ActorState::Running) {
                        return true;
                    }
                }
                ActorState::Closing | ActorState::Closed => return false,
                other => unreachable!("run loop entered from {other:?}"),
            }
        }
    }

    fn on_run_ended(self: &Arc<Self>, interrupted: bool, pending: Vec<Task>) {
        if !interrupted {
            for barrier in pending {
                if catch_unwind(AssertUnwindSafe(barrier)).is_err() {
                    error!("barrier panicked in actor run");
                }
            }
        }

        loop {
            match self.state() {
                ActorState::Running => {
                    if self.transition(ActorState::Running, ActorState::Idle) {
                        return;
                    }
                }
                ActorState::RunningScheduled => {
                    if self.transition(ActorState::RunningScheduled, ActorState::Scheduled) {
                        // More work arrived mid-run.
                        self.spawn_run();
                        return;
                    }
                }
                ActorState::Closing => {
                    self.teardown();
                    return;
                }
                other => unreachable!("run loop ended in {other:?}"),
            }
        }
    }

    fn teardown(self: &Arc<Self>) {
        // Accepted items that slipped past the final run still execute,
        // exactly once, before the owner's shutdown hook. An envelope its
        // submitter still holds is mid-withdrawal; the closure is left in
        // place so the withdrawal claims it and reports rejection.
        while let Some(envelope) = self.work.pop() {
            if Arc::strong_count(&envelope) > 1 {
                continue;
            }
            if let Some(task) = envelope.take() {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("work item panicked during actor teardown");
                }
            }
        }
        while self.barriers.pop().is_some() {}

        let done = self
            .close_callback
            .lock()
            .expect("actor close slot poisoned")
            .take()
            .unwrap_or_else(|| Box::new(|| {}));

        match self.handler() {
            Some(handler) => handler.shutdown(done),
            None => done(),
        }

        self.state.store(ActorState::Closed as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{InlineExecutor, ThreadPoolExecutor};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
    use std::time::{Duration, Instant};

    fn inline_actor() -> Arc<Actor> {
        let actor = Actor::new(Arc::new(InlineExecutor));
        actor.on_started();
        actor
    }

    fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) {
        let start = Instant::now();
        while !predicate() {
            assert!(start.elapsed() < deadline, "condition not reached in time");
            std::thread::yield_now();
        }
    }

    #[test]
    fn work_items_run_in_submission_order() {
        let actor = inline_actor();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let log = Arc::clone(&log);
            actor.submit(move || log.lock().unwrap().push(i)).unwrap();
        }

        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(actor.state(), ActorState::Idle);
    }

    #[test]
    fn schedule_before_started_is_held_back() {
        let actor = Actor::new(Arc::new(InlineExecutor));
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        actor.submit(move || flag.store(true, AtomicOrdering::SeqCst)).unwrap();
        assert_eq!(actor.state(), ActorState::StartingScheduled);
        assert!(!ran.load(AtomicOrdering::SeqCst));

        // Completing start-up releases the held-back run.
        actor.on_started();
        assert!(ran.load(AtomicOrdering::SeqCst));
        assert_eq!(actor.state(), ActorState::Idle);
    }

    #[test]
    fn barriers_fire_after_the_batch() {
        // With an inline executor the first submit runs immediately, so
        // enqueue everything while the actor is still starting to get one
        // combined run.
        let actor = Actor::new(Arc::new(InlineExecutor));
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        actor.submit(move || l.lock().unwrap().push("work-1")).unwrap();
        let l = Arc::clone(&log);
        actor.submit_barrier(move || l.lock().unwrap().push("barrier")).unwrap();
        let l = Arc::clone(&log);
        actor.submit(move || l.lock().unwrap().push("work-2")).unwrap();

        actor.on_started();
        assert_eq!(*log.lock().unwrap(), vec!["work-1", "work-2", "barrier"]);
    }

    #[test]
    fn rejected_submission_never_runs() {
        let actor = inline_actor();
        actor.request_close(|| {});
        assert_eq!(actor.state(), ActorState::Closed);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result = actor.submit(move || flag.store(true, AtomicOrdering::SeqCst));

        assert_eq!(result, Err(ActorError::Rejected));
        assert!(!ran.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn close_is_idempotent() {
        let actor = inline_actor();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        actor.request_close(move || {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        });
        let f = Arc::clone(&fired);
        actor.request_close(move || {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        });

        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(actor.state(), ActorState::Closed);
    }

    #[test]
    fn close_from_running_is_deferred_to_run_end() {
        struct Probe {
            state_at_process: Mutex<Option<ActorState>>,
            actor: Mutex<Option<Arc<Actor>>>,
        }
        impl ActorHandler for Probe {
            fn process(&self) -> bool {
                let actor = self.actor.lock().unwrap().clone().unwrap();
                // Close requested mid-run: must defer, not tear down here.
                actor.request_close(|| {});
                *self.state_at_process.lock().unwrap() = Some(actor.state());
                true
            }
        }

        let actor = Actor::new(Arc::new(InlineExecutor));
        let probe = Arc::new(Probe {
            state_at_process: Mutex::new(None),
            actor: Mutex::new(None),
        });
        *probe.actor.lock().unwrap() = Some(Arc::clone(&actor));
        let weak = Arc::downgrade(&probe);
        let weak: Weak<dyn ActorHandler> = weak;
        actor.bind(weak);
        actor.on_started();

        actor.submit(|| {}).unwrap();

        assert_eq!(
            *probe.state_at_process.lock().unwrap(),
            Some(ActorState::Closing)
        );
        assert_eq!(actor.state(), ActorState::Closed);
    }

    #[test]
    fn run_loop_is_never_reentered() {
        struct Reentrancy {
            active: AtomicUsize,
            peak: AtomicUsize,
        }
        impl ActorHandler for Reentrancy {
            fn process(&self) -> bool {
                let now = self.active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                self.peak.fetch_max(now, AtomicOrdering::SeqCst);
                std::thread::sleep(Duration::from_micros(50));
                self.active.fetch_sub(1, AtomicOrdering::SeqCst);
                true
            }
        }

        let pool = Arc::new(ThreadPoolExecutor::with_threads(4));
        let actor = Actor::new(pool);
        let handler = Arc::new(Reentrancy {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let weak = Arc::downgrade(&handler);
        let weak: Weak<dyn ActorHandler> = weak;
        actor.bind(weak);
        actor.on_started();

        let executed = Arc::new(AtomicUsize::new(0));
        let mut submitters = Vec::new();
        for _ in 0..4 {
            let actor = Arc::clone(&actor);
            let executed = Arc::clone(&executed);
            submitters.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let executed = Arc::clone(&executed);
                    actor
                        .submit(move || {
                            executed.fetch_add(1, AtomicOrdering::SeqCst);
                        })
                        .unwrap();
                }
            }));
        }
        for s in submitters {
            s.join().unwrap();
        }

        wait_until(Duration::from_secs(10), || {
            executed.load(AtomicOrdering::SeqCst) == 200
        });
        assert_eq!(handler.peak.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn every_accepted_item_runs_exactly_once_before_close() {
        // Close is requested from inside a work item, so it always lands
        // mid-run and defers to the end of a drain; submissions racing the
        // close are either accepted (and drained by that run) or rejected.
        for _ in 0..20 {
            let pool = Arc::new(ThreadPoolExecutor::with_threads(2));
            let actor = Actor::new(pool);
            actor.on_started();

            let executed = Arc::new(AtomicUsize::new(0));
            let mut accepted = 0usize;
            for _ in 0..30 {
                let executed = Arc::clone(&executed);
                actor
                    .submit(move || {
                        executed.fetch_add(1, AtomicOrdering::SeqCst);
                    })
                    .unwrap();
                accepted += 1;
            }

            let closed = Arc::new(AtomicBool::new(false));
            let closer = Arc::clone(&actor);
            let flag = Arc::clone(&closed);
            let executed_in_closer = Arc::clone(&executed);
            actor
                .submit(move || {
                    executed_in_closer.fetch_add(1, AtomicOrdering::SeqCst);
                    closer.request_close(move || flag.store(true, AtomicOrdering::SeqCst));
                })
                .unwrap();
            accepted += 1;

            for _ in 0..30 {
                let executed = Arc::clone(&executed);
                match actor.submit(move || {
                    executed.fetch_add(1, AtomicOrdering::SeqCst);
                }) {
                    Ok(()) => accepted += 1,
                    Err(ActorError::Rejected) => {}
                }
            }

            wait_until(Duration::from_secs(10), || {
                closed.load(AtomicOrdering::SeqCst) && actor.state() == ActorState::Closed
            });
            // Everything accepted before the close ran exactly once; nothing
            // rejected ever ran.
            wait_until(Duration::from_secs(10), || {
                executed.load(AtomicOrdering::SeqCst) == accepted
            });
        }
    }

    #[test]
    fn panicking_work_item_does_not_wedge_the_actor() {
        let pool = Arc::new(ThreadPoolExecutor::with_threads(2));
        let actor = Actor::new(pool);
        actor.on_started();

        actor.submit(|| panic!("bad item")).unwrap();

        // The run survives the panic and later submissions still execute.
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        actor.submit(move || flag.store(true, AtomicOrdering::SeqCst)).unwrap();
        wait_until(Duration::from_secs(10), || ran.load(AtomicOrdering::SeqCst));

        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        actor.request_close(move || flag.store(true, AtomicOrdering::SeqCst));
        wait_until(Duration::from_secs(10), || {
            closed.load(AtomicOrdering::SeqCst) && actor.state() == ActorState::Closed
        });
    }

    #[test]
    fn panicking_barrier_does_not_wedge_the_actor() {
        let actor = Actor::new(Arc::new(InlineExecutor));
        actor.submit_barrier(|| panic!("bad barrier")).unwrap();
        actor.on_started();
        assert_eq!(actor.state(), ActorState::Idle);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        actor.submit(move || flag.store(true, AtomicOrdering::SeqCst)).unwrap();
        assert!(ran.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn submissions_racing_close_either_run_once_or_report_rejected() {
        for _ in 0..200 {
            let pool = Arc::new(ThreadPoolExecutor::with_threads(2));
            let actor = Actor::new(pool);
            actor.on_started();

            let executed = Arc::new(AtomicUsize::new(0));
            let accepted = Arc::new(AtomicUsize::new(0));
            let mut submitters = Vec::new();
            for _ in 0..4 {
                let actor = Arc::clone(&actor);
                let executed = Arc::clone(&executed);
                let accepted = Arc::clone(&accepted);
                submitters.push(std::thread::spawn(move || {
                    let count = Arc::clone(&executed);
                    if actor
                        .submit(move || {
                            count.fetch_add(1, AtomicOrdering::SeqCst);
                        })
                        .is_ok()
                    {
                        accepted.fetch_add(1, AtomicOrdering::SeqCst);
                    }
                }));
            }

            let closed = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&closed);
            actor.request_close(move || flag.store(true, AtomicOrdering::SeqCst));
            for submitter in submitters {
                submitter.join().unwrap();
            }

            wait_until(Duration::from_secs(10), || {
                closed.load(AtomicOrdering::SeqCst) && actor.state() == ActorState::Closed
            });
            // Every Ok submission ran exactly once, even when teardown won
            // the race against its run; every rejected one never ran.
            wait_until(Duration::from_secs(10), || {
                executed.load(AtomicOrdering::SeqCst) == accepted.load(AtomicOrdering::SeqCst)
            });
        }
    }

    #[test]
    fn closed_actor_does_not_accumulate_rejected_envelopes() {
        let actor = inline_actor();
        actor.request_close(|| {});
        assert_eq!(actor.state(), ActorState::Closed);

        for _ in 0..64 {
            assert_eq!(actor.submit(|| {}), Err(ActorError::Rejected));
        }
        assert_eq!(actor.queued_work(), 0);
    }

    #[test]
    fn interrupted_run_defers_barriers() {
        struct Interrupting {
            interrupt_next: AtomicBool,
        }
        impl ActorHandler for Interrupting {
            fn process(&self) -> bool {
                !self.interrupt_next.swap(false, AtomicOrdering::SeqCst)
            }
        }

        let actor = Actor::new(Arc::new(InlineExecutor));
        let handler = Arc::new(Interrupting {
            interrupt_next: AtomicBool::new(true),
        });
        let weak = Arc::downgrade(&handler);
        let weak: Weak<dyn ActorHandler> = weak;
        actor.bind(weak);
        actor.on_started();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        actor.submit_barrier(move || flag.store(true, AtomicOrdering::SeqCst)).unwrap();

        // First run was interrupted: barrier still queued.
        assert!(!fired.load(AtomicOrdering::SeqCst));

        // Next run completes and releases it.
        actor.schedule();
        assert!(fired.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn shutdown_hook_receives_the_close_callback() {
        struct Recording {
            shutdown_seen: AtomicBool,
        }
        impl ActorHandler for Recording {
            fn shutdown(&self, done: Task) {
                self.shutdown_seen.store(true, AtomicOrdering::SeqCst);
                done();
            }
        }

        let actor = Actor::new(Arc::new(InlineExecutor));
        let handler = Arc::new(Recording {
            shutdown_seen: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&handler);
        let weak: Weak<dyn ActorHandler> = weak;
        actor.bind(weak);
        actor.on_started();

        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        actor.request_close(move || flag.store(true, AtomicOrdering::SeqCst));

        assert!(handler.shutdown_seen.load(AtomicOrdering::SeqCst));
        assert!(done.load(AtomicOrdering::SeqCst));
        assert_eq!(actor.state(), ActorState::Closed);
    }
}
