use std::ops::{Deref, DerefMut};

use ahash::AHashMap;

/// A thin wrapper around an [`AHashMap`] pre-sized for the expected
/// cardinality of one agent role.
///
/// The teacher's session tables wrap their maps in a lock because multiple
/// async tasks observe them concurrently; this caster runs on a single
/// reactor thread and owns every agent directly, so the wrapper here only
/// needs to carry the pre-allocated capacity, not a guard.
pub struct Table<K, V>(AHashMap<K, V>);

impl<K, V> Table<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(AHashMap::with_capacity(capacity))
    }
}

impl<K, V> Deref for Table<K, V> {
    type Target = AHashMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K, V> DerefMut for Table<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
