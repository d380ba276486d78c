use ebb_chain::{CounterDelta, IndexedDelta, KeyedDelta, ObjectRef, PlainDelta, WideDelta};

/// Continue the walk or suspend it at the current position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Suspend,
}

/// A visiting-map hook's verdict on the map about to be walked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapDirective {
    Visit,
    /// Ignore the map entirely; its visited hook does not fire either.
    Skip,
    Suspend,
}

/// Which traversal pass an object visit belongs to. Reads of a resource
/// always dispatch before its writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    Read,
    Write,
}

/// Double-dispatch seam between the walker and change consumers.
///
/// Shape methods receive the merged change record of one object, exactly
/// once per object per segment, and may return [`Flow::Suspend`] to pause
/// the walk after that visit. Boundary hooks may suspend too; a suspended
/// hook has not yet yielded its decision and is invoked again on resume.
pub trait Visitor: Send {
    fn on_visiting_workspace(&mut self) -> Flow {
        Flow::Continue
    }

    fn on_visited_workspace(&mut self) -> Flow {
        Flow::Continue
    }

    fn on_visiting_map(&mut self, _index: usize) -> MapDirective {
        MapDirective::Visit
    }

    fn on_visited_map(&mut self, _index: usize) -> Flow {
        Flow::Continue
    }

    fn visit_plain(&mut self, object: ObjectRef, delta: &PlainDelta, pass: Pass) -> Flow;

    fn visit_indexed(&mut self, object: ObjectRef, delta: &IndexedDelta, pass: Pass) -> Flow;

    fn visit_wide(&mut self, object: ObjectRef, delta: &WideDelta, pass: Pass) -> Flow;

    fn visit_keyed(&mut self, object: ObjectRef, delta: &KeyedDelta, pass: Pass) -> Flow;

    fn visit_counter(&mut self, object: ObjectRef, delta: &CounterDelta, pass: Pass) -> Flow;
}
