//! Semantic event decoding on top of the raw visitor seam.

use ebb_chain::{
    CounterDelta, IndexedDelta, KeyedDelta, KeyedOp, ObjectRef, PlainDelta, PlainOp, WideDelta,
};
use serde_json::Value;

use crate::visitor::{Flow, MapDirective, Pass, Visitor};

/// A subscriber's verdict on a map about to be dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapAction {
    Visit,
    Skip,
}

/// Consumer of decoded change events.
///
/// Every callback has a no-op default, so a subscriber implements only what
/// it cares about. Subscribers cannot suspend the walk; code that needs
/// suspension implements [`Visitor`] directly.
pub trait Subscriber: Send {
    fn on_visiting_workspace(&mut self) {}

    fn on_visited_workspace(&mut self) {}

    fn on_visiting_map(&mut self, _index: usize) -> MapAction {
        MapAction::Visit
    }

    fn on_visited_map(&mut self, _index: usize) {}

    /// A plain resource entry was read.
    fn on_plain_read(&mut self, _object: ObjectRef) {}

    /// A resource entry was created or replaced.
    fn on_resource_put(&mut self, _object: ObjectRef) {}

    /// A resource entry was deleted.
    fn on_resource_deleted(&mut self, _object: ObjectRef) {}

    /// An indexed field was read. Fired in ascending field order.
    fn on_indexed_read(&mut self, _object: ObjectRef, _field: u32) {}

    /// An indexed field was written. Fired in ascending field order.
    fn on_indexed_written(&mut self, _object: ObjectRef, _field: u32) {}

    fn on_keyed_read(&mut self, _object: ObjectRef, _key: &str) {}

    fn on_keyed_full_read(&mut self, _object: ObjectRef) {}

    /// Fired before any surviving per-key operation of the same object.
    fn on_keyed_cleared(&mut self, _object: ObjectRef) {}

    fn on_keyed_put(&mut self, _object: ObjectRef, _key: &str, _value: &Value) {}

    fn on_keyed_removed(&mut self, _object: ObjectRef, _key: &str) {}

    fn on_counter_read(&mut self, _object: ObjectRef) {}

    /// The counter's net change over the dispatched range. Never fired for
    /// a net change of zero.
    fn on_counter_added(&mut self, _object: ObjectRef, _delta: i64) {}
}

/// Adapts a [`Subscriber`] to the walker's [`Visitor`] seam by decoding
/// merged change records into semantic events.
///
/// Because records arrive already merged, a put followed by a remove in the
/// same dispatched range surfaces as a single removal, and repeated counter
/// increments surface as one net addition.
pub struct Dispatcher<S> {
    subscriber: S,
}

impl<S> Dispatcher<S> {
    pub fn new(subscriber: S) -> Self {
        Self { subscriber }
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn subscriber_mut(&mut self) -> &mut S {
        &mut self.subscriber
    }

    pub fn into_inner(self) -> S {
        self.subscriber
    }
}

impl<S: Subscriber> Visitor for Dispatcher<S> {
    fn on_visiting_workspace(&mut self) -> Flow {
        self.subscriber.on_visiting_workspace();
        Flow::Continue
    }

    fn on_visited_workspace(&mut self) -> Flow {
        self.subscriber.on_visited_workspace();
        Flow::Continue
    }

    fn on_visiting_map(&mut self, index: usize) -> MapDirective {
        match self.subscriber.on_visiting_map(index) {
            MapAction::Visit => MapDirective::Visit,
            MapAction::Skip => MapDirective::Skip,
        }
    }

    fn on_visited_map(&mut self, index: usize) -> Flow {
        self.subscriber.on_visited_map(index);
        Flow::Continue
    }

    fn visit_plain(&mut self, object: ObjectRef, delta: &PlainDelta, pass: Pass) -> Flow {
        match pass {
            Pass::Read => {
                if delta.read {
                    self.subscriber.on_plain_read(object);
                }
            }
            Pass::Write => match delta.op {
                Some(PlainOp::Put) => self.subscriber.on_resource_put(object),
                Some(PlainOp::Delete) => self.subscriber.on_resource_deleted(object),
                None => {}
            },
        }
        Flow::Continue
    }

    fn visit_indexed(&mut self, object: ObjectRef, delta: &IndexedDelta, pass: Pass) -> Flow {
        match pass {
            Pass::Read => {
                for field in delta.read() {
                    self.subscriber.on_indexed_read(object, field);
                }
            }
            Pass::Write => {
                for field in delta.written() {
                    self.subscriber.on_indexed_written(object, field);
                }
            }
        }
        Flow::Continue
    }

    fn visit_wide(&mut self, object: ObjectRef, delta: &WideDelta, pass: Pass) -> Flow {
        match pass {
            Pass::Read => {
                for field in delta.read() {
                    self.subscriber.on_indexed_read(object, field);
                }
            }
            Pass::Write => {
                for field in delta.written() {
                    self.subscriber.on_indexed_written(object, field);
                }
            }
        }
        Flow::Continue
    }

    fn visit_keyed(&mut self, object: ObjectRef, delta: &KeyedDelta, pass: Pass) -> Flow {
        match pass {
            Pass::Read => {
                if delta.full_read {
                    self.subscriber.on_keyed_full_read(object);
                }
                for key in &delta.read_keys {
                    self.subscriber.on_keyed_read(object, key);
                }
            }
            Pass::Write => {
                if delta.cleared {
                    self.subscriber.on_keyed_cleared(object);
                }
                for (key, op) in &delta.entries {
                    match op {
                        KeyedOp::Put(value) => self.subscriber.on_keyed_put(object, key, value),
                        KeyedOp::Remove => self.subscriber.on_keyed_removed(object, key),
                    }
                }
            }
        }
        Flow::Continue
    }

    fn visit_counter(&mut self, object: ObjectRef, delta: &CounterDelta, pass: Pass) -> Flow {
        match pass {
            Pass::Read => {
                if delta.read {
                    self.subscriber.on_counter_read(object);
                }
            }
            Pass::Write => {
                if delta.delta != 0 {
                    self.subscriber.on_counter_added(object, delta.delta);
                }
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{Observer, ObserverConfig};
    use ebb_actor::InlineExecutor;
    use ebb_chain::{Chain, Delta, Granularity, ObjectId, Origin, ResourceId, VersionMapBuilder};
    use serde_json::json;
    use std::mem;
    use std::sync::Arc;

    fn obj(n: u64) -> ObjectRef {
        ObjectRef::new(ResourceId(1), ObjectId(n))
    }

    #[derive(Default)]
    struct Log {
        events: Vec<String>,
    }

    impl Subscriber for Log {
        fn on_plain_read(&mut self, object: ObjectRef) {
            self.events.push(format!("plain-read {object}"));
        }

        fn on_resource_put(&mut self, object: ObjectRef) {
            self.events.push(format!("put {object}"));
        }

        fn on_resource_deleted(&mut self, object: ObjectRef) {
            self.events.push(format!("deleted {object}"));
        }

        fn on_indexed_read(&mut self, object: ObjectRef, field: u32) {
            self.events.push(format!("read {object}.{field}"));
        }

        fn on_indexed_written(&mut self, object: ObjectRef, field: u32) {
            self.events.push(format!("wrote {object}.{field}"));
        }

        fn on_keyed_read(&mut self, object: ObjectRef, key: &str) {
            self.events.push(format!("key-read {object}[{key}]"));
        }

        fn on_keyed_full_read(&mut self, object: ObjectRef) {
            self.events.push(format!("full-read {object}"));
        }

        fn on_keyed_cleared(&mut self, object: ObjectRef) {
            self.events.push(format!("cleared {object}"));
        }

        fn on_keyed_put(&mut self, object: ObjectRef, key: &str, value: &Value) {
            self.events.push(format!("key-put {object}[{key}]={value}"));
        }

        fn on_keyed_removed(&mut self, object: ObjectRef, key: &str) {
            self.events.push(format!("key-removed {object}[{key}]"));
        }

        fn on_counter_read(&mut self, object: ObjectRef) {
            self.events.push(format!("counter-read {object}"));
        }

        fn on_counter_added(&mut self, object: ObjectRef, delta: i64) {
            self.events.push(format!("counter {object} {delta:+}"));
        }
    }

    fn dispatch(delta: &Delta, pass: Pass) -> Vec<String> {
        let mut dispatcher = Dispatcher::new(Log::default());
        let flow = match delta {
            Delta::Plain(d) => dispatcher.visit_plain(obj(1), d, pass),
            Delta::Indexed(d) => dispatcher.visit_indexed(obj(1), d, pass),
            Delta::Wide(d) => dispatcher.visit_wide(obj(1), d, pass),
            Delta::Keyed(d) => dispatcher.visit_keyed(obj(1), d, pass),
            Delta::Counter(d) => dispatcher.visit_counter(obj(1), d, pass),
        };
        assert_eq!(flow, Flow::Continue);
        dispatcher.into_inner().events
    }

    #[test]
    fn indexed_fields_decode_in_ascending_order() {
        let mut delta = Delta::indexed_write(9);
        delta.merge(&Delta::indexed_write(2));
        assert_eq!(dispatch(&delta, Pass::Write), vec!["wrote r1/o1.2", "wrote r1/o1.9"]);
    }

    #[test]
    fn wide_fields_decode_through_the_indexed_events() {
        let mut delta = Delta::wide_write(70);
        delta.merge(&Delta::wide_write(3));
        assert_eq!(dispatch(&delta, Pass::Write), vec!["wrote r1/o1.3", "wrote r1/o1.70"]);
    }

    #[test]
    fn clear_decodes_before_surviving_entries() {
        let mut delta = Delta::keyed_put("a", json!(1));
        delta.merge(&Delta::keyed_clear());
        delta.merge(&Delta::keyed_put("b", json!(2)));
        assert_eq!(
            dispatch(&delta, Pass::Write),
            vec!["cleared r1/o1", "key-put r1/o1[b]=2"]
        );
    }

    #[test]
    fn net_zero_counter_decodes_to_nothing() {
        let mut delta = Delta::counter_add(4);
        delta.merge(&Delta::counter_add(-4));
        assert!(dispatch(&delta, Pass::Write).is_empty());
    }

    #[test]
    fn read_pass_never_emits_write_events() {
        let mut delta = Delta::keyed_full_read();
        delta.merge(&Delta::keyed_read("k"));
        assert_eq!(
            dispatch(&delta, Pass::Read),
            vec!["full-read r1/o1", "key-read r1/o1[k]"]
        );
    }

    #[test]
    fn put_then_remove_surfaces_as_one_removal() {
        let chain = Chain::new(Granularity::Coalesce, Arc::new(InlineExecutor));
        let observer = Observer::attach(
            chain.clone(),
            Dispatcher::new(Log::default()),
            ObserverConfig::default(),
        );

        chain
            .publish(
                VersionMapBuilder::new(Origin::Local)
                    .write(obj(1), Delta::keyed_put("name", json!("a")))
                    .write(obj(1), Delta::keyed_remove("name")),
            )
            .unwrap();

        let events = observer.with_visitor(|v| mem::take(&mut v.subscriber_mut().events));
        assert_eq!(events, vec!["key-removed r1/o1[name]"]);
    }
}
