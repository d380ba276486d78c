use std::sync::Arc;

use crate::map::VersionMap;

/// An immutable view of the chain at one instant.
///
/// Snapshots share their maps by reference; taking one is an `Arc` clone.
/// Map `index` equals position, so a consumer that remembers how many maps
/// it has observed can slice the unobserved tail directly.
#[derive(Clone, Default)]
pub struct Snapshot {
    maps: Vec<Arc<VersionMap>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<VersionMap>> {
        self.maps.get(index)
    }

    /// The newest map, if any.
    pub fn last(&self) -> Option<&Arc<VersionMap>> {
        self.maps.last()
    }

    /// Maps not yet observed by a consumer that has seen `observed` of them.
    pub fn since(&self, observed: usize) -> &[Arc<VersionMap>] {
        &self.maps[observed.min(self.maps.len())..]
    }

    pub(crate) fn extended(&self, map: Arc<VersionMap>) -> Self {
        debug_assert_eq!(map.index(), self.maps.len(), "map index must equal position");
        let mut maps = self.maps.clone();
        maps.push(map);
        Self { maps }
    }
}
