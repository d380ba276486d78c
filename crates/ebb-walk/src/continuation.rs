//! Saved resumption state of a suspended walk.
//!
//! When a visitor suspends, each active traversal level pushes one frame on
//! the way out, innermost level first. The next run pops in reverse, so the
//! outermost level restores itself first and hands control back down. Frames
//! are typed; popping a frame as the wrong type is a programming error and
//! panics.

/// Position within the workspace level of a walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkspaceStep {
    Visiting,
    Visit,
    Visited,
}

/// Position within one segment of a walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentStep {
    Maps,
    Resources,
}

/// Position within one map's visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapStep {
    Visiting,
    Reads,
    Writes,
    Visited,
}

#[derive(Clone, Debug, PartialEq)]
enum Frame {
    Bool(bool),
    U8(u8),
    I32(i32),
    I64(i64),
    Usize(usize),
    Workspace(WorkspaceStep),
    Segment(SegmentStep),
    Map(MapStep),
}

/// LIFO stack of typed resumption frames.
///
/// Empty exactly when no walk is suspended; a completed walk always drains
/// it back to depth zero.
#[derive(Debug, Default)]
pub struct Continuation {
    frames: Vec<Frame>,
}

macro_rules! frame_accessors {
    ($push:ident, $pop:ident, $variant:ident, $ty:ty) => {
        pub fn $push(&mut self, value: $ty) {
            self.frames.push(Frame::$variant(value));
        }

        pub fn $pop(&mut self) -> $ty {
            match self.pop() {
                Frame::$variant(value) => value,
                other => panic!(
                    concat!("continuation type mismatch: expected ", stringify!($variant), ", found {:?}"),
                    other
                ),
            }
        }
    };
}

impl Continuation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a suspended walk is waiting to resume.
    pub fn interrupted(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    fn pop(&mut self) -> Frame {
        self.frames
            .pop()
            .expect("continuation popped past its last frame")
    }

    frame_accessors!(push_bool, pop_bool, Bool, bool);
    frame_accessors!(push_u8, pop_u8, U8, u8);
    frame_accessors!(push_i32, pop_i32, I32, i32);
    frame_accessors!(push_i64, pop_i64, I64, i64);
    frame_accessors!(push_usize, pop_usize, Usize, usize);
    frame_accessors!(push_workspace_step, pop_workspace_step, Workspace, WorkspaceStep);
    frame_accessors!(push_segment_step, pop_segment_step, Segment, SegmentStep);
    frame_accessors!(push_map_step, pop_map_step, Map, MapStep);
}
