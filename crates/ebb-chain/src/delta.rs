//! Per-kind change records.
//!
//! Every object an observed transaction touched gets one delta per version
//! map. Deltas of the same object merge associatively across maps, so a
//! coalescing walk can fold any contiguous run of maps into a single record
//! and dispatch each object exactly once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Write applied to a plain (whole-value) resource entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlainOp {
    Put,
    Delete,
}

/// Change record for a plain resource entry: read mark plus at most one
/// surviving write.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlainDelta {
    pub read: bool,
    pub op: Option<PlainOp>,
}

/// Change record for an object with up to 32 indexed fields, as bit masks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedDelta {
    pub read_fields: u32,
    pub written_fields: u32,
}

impl IndexedDelta {
    /// Indices of written fields, ascending.
    pub fn written(&self) -> impl Iterator<Item = u32> + '_ {
        let mask = self.written_fields;
        (0..32).filter(move |i| mask & (1 << i) != 0)
    }

    /// Indices of read fields, ascending.
    pub fn read(&self) -> impl Iterator<Item = u32> + '_ {
        let mask = self.read_fields;
        (0..32).filter(move |i| mask & (1 << i) != 0)
    }
}

/// Change record for an object with arbitrarily many indexed fields, as
/// word-packed bit sets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WideDelta {
    pub read_fields: Vec<u64>,
    pub written_fields: Vec<u64>,
}

impl WideDelta {
    /// Indices of written fields, ascending.
    pub fn written(&self) -> impl Iterator<Item = u32> + '_ {
        Self::bits(&self.written_fields)
    }

    /// Indices of read fields, ascending.
    pub fn read(&self) -> impl Iterator<Item = u32> + '_ {
        Self::bits(&self.read_fields)
    }

    fn bits(words: &[u64]) -> impl Iterator<Item = u32> + '_ {
        words.iter().enumerate().flat_map(|(w, &word)| {
            (0..64)
                .filter(move |b| word & (1 << b) != 0)
                .map(move |b| (w * 64 + b) as u32)
        })
    }

    fn union(into: &mut Vec<u64>, from: &[u64]) {
        if into.len() < from.len() {
            into.resize(from.len(), 0);
        }
        for (slot, word) in into.iter_mut().zip(from) {
            *slot |= word;
        }
    }
}

/// Write applied to one key of a keyed object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KeyedOp {
    Put(Value),
    Remove,
}

/// Change record for a keyed (dictionary-shaped) object.
///
/// `entries` holds at most one surviving operation per key, in last-write
/// order. A `cleared` mark logically precedes every entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyedDelta {
    pub read_keys: Vec<String>,
    pub full_read: bool,
    pub cleared: bool,
    pub entries: Vec<(String, KeyedOp)>,
}

impl KeyedDelta {
    fn upsert(&mut self, key: &str, op: &KeyedOp) {
        self.entries.retain(|(k, _)| k != key);
        self.entries.push((key.to_string(), op.clone()));
    }
}

/// Change record for a counter object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub read: bool,
    pub delta: i64,
}

/// A change record for one object in one version map.
///
/// The variant is the object's shape; an object keeps the same shape for its
/// whole lifetime, so merging records of mismatched shapes is a programming
/// error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Delta {
    Plain(PlainDelta),
    Indexed(IndexedDelta),
    Wide(WideDelta),
    Keyed(KeyedDelta),
    Counter(CounterDelta),
}

impl Delta {
    pub fn kind(&self) -> &'static str {
        match self {
            Delta::Plain(_) => "plain",
            Delta::Indexed(_) => "indexed",
            Delta::Wide(_) => "wide",
            Delta::Keyed(_) => "keyed",
            Delta::Counter(_) => "counter",
        }
    }

    pub fn plain_read() -> Self {
        Delta::Plain(PlainDelta {
            read: true,
            op: None,
        })
    }

    pub fn resource_put() -> Self {
        Delta::Plain(PlainDelta {
            read: false,
            op: Some(PlainOp::Put),
        })
    }

    pub fn resource_delete() -> Self {
        Delta::Plain(PlainDelta {
            read: false,
            op: Some(PlainOp::Delete),
        })
    }

    pub fn indexed_read(index: u32) -> Self {
        Delta::Indexed(IndexedDelta {
            read_fields: 1 << index,
            written_fields: 0,
        })
    }

    pub fn indexed_write(index: u32) -> Self {
        Delta::Indexed(IndexedDelta {
            read_fields: 0,
            written_fields: 1 << index,
        })
    }

    pub fn wide_write(index: u32) -> Self {
        let mut words = vec![0u64; index as usize / 64 + 1];
        words[index as usize / 64] |= 1 << (index % 64);
        Delta::Wide(WideDelta {
            read_fields: Vec::new(),
            written_fields: words,
        })
    }

    pub fn keyed_read(key: impl Into<String>) -> Self {
        Delta::Keyed(KeyedDelta {
            read_keys: vec![key.into()],
            ..Default::default()
        })
    }

    pub fn keyed_full_read() -> Self {
        Delta::Keyed(KeyedDelta {
            full_read: true,
            ..Default::default()
        })
    }

    pub fn keyed_put(key: impl Into<String>, value: Value) -> Self {
        Delta::Keyed(KeyedDelta {
            entries: vec![(key.into(), KeyedOp::Put(value))],
            ..Default::default()
        })
    }

    pub fn keyed_remove(key: impl Into<String>) -> Self {
        Delta::Keyed(KeyedDelta {
            entries: vec![(key.into(), KeyedOp::Remove)],
            ..Default::default()
        })
    }

    pub fn keyed_clear() -> Self {
        Delta::Keyed(KeyedDelta {
            cleared: true,
            ..Default::default()
        })
    }

    pub fn counter_read() -> Self {
        Delta::Counter(CounterDelta {
            read: true,
            delta: 0,
        })
    }

    pub fn counter_add(delta: i64) -> Self {
        Delta::Counter(CounterDelta { read: false, delta })
    }

    /// Whether this record carries only read marks.
    pub fn is_read_only(&self) -> bool {
        match self {
            Delta::Plain(p) => p.op.is_none(),
            Delta::Indexed(i) => i.written_fields == 0,
            Delta::Wide(w) => w.written_fields.iter().all(|&word| word == 0),
            Delta::Keyed(k) => !k.cleared && k.entries.is_empty(),
            Delta::Counter(c) => c.delta == 0,
        }
    }

    /// Fold a later record of the same object into this one.
    ///
    /// The merge is associative: folding maps one at a time equals folding
    /// any grouping of them. Later operations win where they conflict, so a
    /// put followed by a remove survives as a single remove.
    pub fn merge(&mut self, later: &Delta) {
        match (self, later) {
            (Delta::Plain(earlier), Delta::Plain(later)) => {
                earlier.read |= later.read;
                if later.op.is_some() {
                    earlier.op = later.op;
                }
            }
            (Delta::Indexed(earlier), Delta::Indexed(later)) => {
                earlier.read_fields |= later.read_fields;
                earlier.written_fields |= later.written_fields;
            }
            (Delta::Wide(earlier), Delta::Wide(later)) => {
                WideDelta::union(&mut earlier.read_fields, &later.read_fields);
                WideDelta::union(&mut earlier.written_fields, &later.written_fields);
            }
            (Delta::Keyed(earlier), Delta::Keyed(later)) => {
                for key in &later.read_keys {
                    if !earlier.read_keys.contains(key) {
                        earlier.read_keys.push(key.clone());
                    }
                }
                earlier.full_read |= later.full_read;
                if later.cleared {
                    earlier.entries.clear();
                    earlier.cleared = true;
                }
                for (key, op) in &later.entries {
                    earlier.upsert(key, op);
                }
            }
            (Delta::Counter(earlier), Delta::Counter(later)) => {
                earlier.read |= later.read;
                earlier.delta += later.delta;
            }
            (earlier, later) => {
                panic!(
                    "cannot merge {} delta into {} delta for the same object",
                    later.kind(),
                    earlier.kind()
                );
            }
        }
    }
}
