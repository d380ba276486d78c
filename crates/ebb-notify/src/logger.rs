use ebb_chain::ObjectRef;
use ebb_walk::{MapAction, Subscriber};
use serde_json::Value;
use tracing::debug;

/// Subscriber that mirrors every decoded change into structured log
/// records, tagged with a scope label.
///
/// Useful on its own for tracing a chain, or registered next to real
/// consumers while diagnosing dispatch order.
pub struct ChangeLogger {
    scope: String,
}

impl ChangeLogger {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }
}

impl Subscriber for ChangeLogger {
    fn on_visiting_map(&mut self, index: usize) -> MapAction {
        debug!(scope = %self.scope, index, "visiting map");
        MapAction::Visit
    }

    fn on_resource_put(&mut self, object: ObjectRef) {
        debug!(scope = %self.scope, %object, "resource put");
    }

    fn on_resource_deleted(&mut self, object: ObjectRef) {
        debug!(scope = %self.scope, %object, "resource deleted");
    }

    fn on_indexed_read(&mut self, object: ObjectRef, field: u32) {
        debug!(scope = %self.scope, %object, field, "field read");
    }

    fn on_indexed_written(&mut self, object: ObjectRef, field: u32) {
        debug!(scope = %self.scope, %object, field, "field written");
    }

    fn on_keyed_cleared(&mut self, object: ObjectRef) {
        debug!(scope = %self.scope, %object, "cleared");
    }

    fn on_keyed_put(&mut self, object: ObjectRef, key: &str, value: &Value) {
        debug!(scope = %self.scope, %object, key, %value, "key put");
    }

    fn on_keyed_removed(&mut self, object: ObjectRef, key: &str) {
        debug!(scope = %self.scope, %object, key, "key removed");
    }

    fn on_counter_added(&mut self, object: ObjectRef, delta: i64) {
        debug!(scope = %self.scope, %object, delta, "counter added");
    }
}
