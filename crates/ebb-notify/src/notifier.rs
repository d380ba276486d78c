use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use ebb_chain::ObjectRef;
use ebb_walk::Subscriber;
use serde_json::Value;
use tracing::error;

/// A decoded change delivered to listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub object: ObjectRef,
    pub kind: ChangeKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeKind {
    ResourcePut,
    ResourceDeleted,
    FieldWritten { field: u32 },
    KeyPut { key: String, value: Value },
    KeyRemoved { key: String },
    Cleared,
    CounterAdded { delta: i64 },
}

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Per-object listener registry, usable as a walk subscriber.
///
/// Cloning shares the registry, so a handle kept by the host keeps working
/// after another clone moved into an observer. Listeners run on the walk's
/// thread; a panicking listener is caught and logged, and delivery to the
/// remaining listeners continues.
#[derive(Clone, Default)]
pub struct Notifier {
    listeners: Arc<Mutex<HashMap<ObjectRef, Vec<Listener>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to changes of `object`.
    pub fn listen(&self, object: ObjectRef, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("notifier registry poisoned")
            .entry(object)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Drop every listener of `object`.
    pub fn ignore(&self, object: ObjectRef) {
        self.listeners
            .lock()
            .expect("notifier registry poisoned")
            .remove(&object);
    }

    fn emit(&self, object: ObjectRef, kind: ChangeKind) {
        // Snapshot the listener list so a listener may re-enter the
        // registry without deadlocking.
        let listeners: Vec<Listener> = match self
            .listeners
            .lock()
            .expect("notifier registry poisoned")
            .get(&object)
        {
            Some(listeners) => listeners.clone(),
            None => return,
        };

        let event = ChangeEvent { object, kind };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(%object, "change listener panicked");
            }
        }
    }
}

impl Subscriber for Notifier {
    fn on_resource_put(&mut self, object: ObjectRef) {
        self.emit(object, ChangeKind::ResourcePut);
    }

    fn on_resource_deleted(&mut self, object: ObjectRef) {
        self.emit(object, ChangeKind::ResourceDeleted);
    }

    fn on_indexed_written(&mut self, object: ObjectRef, field: u32) {
        self.emit(object, ChangeKind::FieldWritten { field });
    }

    fn on_keyed_cleared(&mut self, object: ObjectRef) {
        self.emit(object, ChangeKind::Cleared);
    }

    fn on_keyed_put(&mut self, object: ObjectRef, key: &str, value: &Value) {
        self.emit(
            object,
            ChangeKind::KeyPut {
                key: key.to_string(),
                value: value.clone(),
            },
        );
    }

    fn on_keyed_removed(&mut self, object: ObjectRef, key: &str) {
        self.emit(
            object,
            ChangeKind::KeyRemoved {
                key: key.to_string(),
            },
        );
    }

    fn on_counter_added(&mut self, object: ObjectRef, delta: i64) {
        self.emit(object, ChangeKind::CounterAdded { delta });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebb_actor::InlineExecutor;
    use ebb_chain::{Chain, Delta, Granularity, ObjectId, Origin, ResourceId, VersionMapBuilder};
    use ebb_walk::{Dispatcher, Observer, ObserverConfig};
    use serde_json::json;

    fn obj(n: u64) -> ObjectRef {
        ObjectRef::new(ResourceId(1), ObjectId(n))
    }

    #[test]
    fn listeners_receive_decoded_changes() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        notifier.listen(obj(1), move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        let chain = Chain::new(Granularity::Coalesce, Arc::new(InlineExecutor));
        let _observer = Observer::attach(
            chain.clone(),
            Dispatcher::new(notifier.clone()),
            ObserverConfig::default(),
        );

        chain
            .publish(
                VersionMapBuilder::new(Origin::Local)
                    .write(obj(1), Delta::keyed_put("name", json!("a")))
                    .write(obj(2), Delta::counter_add(1)),
            )
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![ChangeEvent {
                object: obj(1),
                kind: ChangeKind::KeyPut {
                    key: "name".to_string(),
                    value: json!("a"),
                },
            }]
        );
    }

    #[test]
    fn panicking_listener_does_not_starve_the_rest() {
        let notifier = Notifier::new();
        let delivered = Arc::new(Mutex::new(0));

        notifier.listen(obj(1), |_| panic!("bad listener"));
        let count = Arc::clone(&delivered);
        notifier.listen(obj(1), move |_| {
            *count.lock().unwrap() += 1;
        });

        let chain = Chain::new(Granularity::Coalesce, Arc::new(InlineExecutor));
        let _observer = Observer::attach(
            chain.clone(),
            Dispatcher::new(notifier.clone()),
            ObserverConfig::default(),
        );

        chain
            .publish(VersionMapBuilder::new(Origin::Local).write(obj(1), Delta::counter_add(2)))
            .unwrap();

        assert_eq!(*delivered.lock().unwrap(), 1);
    }

    #[test]
    fn ignored_objects_stop_notifying() {
        let notifier = Notifier::new();
        let delivered = Arc::new(Mutex::new(0));

        let count = Arc::clone(&delivered);
        notifier.listen(obj(1), move |_| {
            *count.lock().unwrap() += 1;
        });
        notifier.ignore(obj(1));

        notifier.clone().on_counter_added(obj(1), 1);
        assert_eq!(*delivered.lock().unwrap(), 0);
    }
}
