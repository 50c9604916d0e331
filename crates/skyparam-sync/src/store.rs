//! # Parameter Store
//!
//! Two-level keyed store: component id, then everything that component
//! owns. All bookkeeping for one entity lives in exactly one place.
//!
//! ## Per-Component State
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ComponentParams                                                        │
//! │                                                                         │
//! │  params          name  → ParamEntry { fact, index }                    │
//! │  index_to_name   index → name          (never renamed once set)        │
//! │  expected_count  count announced by the vehicle                        │
//! │  cache_resolved  leading indices confirmed by a cache load             │
//! │                                                                         │
//! │  pending_index   index → retries       (bulk sweep reads)              │
//! │  pending_name    name  → retries       (single / prefix refresh)       │
//! │  pending_write   name  → PendingWrite  (awaiting echo)                 │
//! │  failed          indices that ran out of retries                       │
//! │                                                                         │
//! │  groups          group → [names]       (rebuilt on insert)             │
//! │                                                                         │
//! │  Once expected_count is known:                                         │
//! │    resolved ∪ pending_index ∪ failed == 0..expected_count              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use skyparam_core::{ComponentId, ParamValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::fact::Fact;

/// A confirmed parameter.
#[derive(Debug, Clone)]
pub struct ParamEntry {
    pub fact: Arc<Fact>,

    /// Position in the component's list, once known.
    pub index: Option<u16>,
}

/// A write sent but not yet echoed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub value: ParamValue,
    pub retries: u32,

    /// Earlier in-flight values replaced by `value`. Their echoes are stale.
    pub superseded: Vec<ParamValue>,
}

impl PendingWrite {
    pub fn new(value: ParamValue) -> Self {
        Self {
            value,
            retries: 0,
            superseded: Vec::new(),
        }
    }

    /// Replaces the in-flight value and restarts the retry count.
    pub fn supersede(&mut self, value: ParamValue) {
        if self.value != value && !self.superseded.contains(&self.value) {
            self.superseded.push(self.value);
        }
        self.superseded.retain(|v| *v != value);
        self.value = value;
        self.retries = 0;
    }
}

/// Everything the engine tracks for one component.
#[derive(Debug, Default)]
pub struct ComponentParams {
    pub params: BTreeMap<String, ParamEntry>,
    pub index_to_name: BTreeMap<u16, String>,
    pub expected_count: Option<u16>,

    /// Indices below this were confirmed by a cache load. The cache does not
    /// record positions, so they are taken as the first ones in the list.
    pub cache_resolved: u16,

    pub pending_index: BTreeMap<u16, u32>,
    pub pending_name: BTreeMap<String, u32>,
    pub pending_write: BTreeMap<String, PendingWrite>,
    pub failed: BTreeSet<u16>,
    pub groups: BTreeMap<String, Vec<String>>,
}

impl ComponentParams {
    /// Records the announced count, seeding every unseen index as pending.
    ///
    /// Returns the number of newly seeded indices. A smaller count than one
    /// already seen is ignored.
    pub fn announce_count(&mut self, count: u16) -> usize {
        let previous = self.expected_count.unwrap_or(0);
        if self.expected_count.is_some() && count <= previous {
            return 0;
        }
        self.expected_count = Some(count);

        let mut seeded = 0;
        for index in previous.max(self.cache_resolved)..count {
            if !self.index_to_name.contains_key(&index) && !self.failed.contains(&index) {
                self.pending_index.insert(index, 0);
                seeded += 1;
            }
        }
        seeded
    }

    /// Takes the component's whole set from a cache load.
    pub fn resolve_from_cache(&mut self) {
        let count = u16::try_from(self.params.len()).unwrap_or(u16::MAX);
        self.expected_count = Some(count);
        self.cache_resolved = count;
        self.pending_index.clear();
        self.failed.clear();
    }

    /// Marks every index of the component pending again and forgets pending
    /// name reads and failures. Pending writes are kept.
    pub fn reseed_all(&mut self) {
        self.cache_resolved = 0;
        self.pending_index.clear();
        self.pending_name.clear();
        self.failed.clear();
        if let Some(count) = self.expected_count {
            for index in 0..count {
                self.pending_index.insert(index, 0);
            }
        }
    }

    /// Number of indices confirmed within the expected range.
    pub fn resolved_count(&self) -> usize {
        match self.expected_count {
            Some(count) => {
                let cached = self.cache_resolved.min(count);
                usize::from(cached) + self.index_to_name.range(cached..count).count()
            }
            None => 0,
        }
    }

    /// True once the count is known and no index read is outstanding.
    pub fn is_complete(&self) -> bool {
        self.expected_count.is_some() && self.pending_index.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_index.is_empty() || !self.pending_name.is_empty() || !self.pending_write.is_empty()
    }

    /// Rebuilds the group index from the current parameters.
    pub fn rebuild_groups(&mut self) {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, entry) in &self.params {
            groups
                .entry(entry.fact.metadata().group.clone())
                .or_default()
                .push(name.clone());
        }
        self.groups = groups;
    }

    pub fn fact(&self, name: &str) -> Option<&Arc<Fact>> {
        self.params.get(name).map(|e| &e.fact)
    }
}

/// All components of one vehicle.
#[derive(Debug, Default)]
pub struct ParamStore {
    components: BTreeMap<ComponentId, ComponentParams>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, component: ComponentId) -> Option<&ComponentParams> {
        self.components.get(&component)
    }

    pub fn get_mut(&mut self, component: ComponentId) -> Option<&mut ComponentParams> {
        self.components.get_mut(&component)
    }

    /// Returns the component, creating empty state on first sight.
    pub fn entry(&mut self, component: ComponentId) -> &mut ComponentParams {
        self.components.entry(component).or_default()
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ComponentId, &ComponentParams)> {
        self.components.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ComponentId, &mut ComponentParams)> {
        self.components.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn clear(&mut self) {
        self.components.clear();
    }

    /// Sum of all announced counts.
    pub fn total_expected(&self) -> usize {
        self.components
            .values()
            .filter_map(|c| c.expected_count)
            .map(usize::from)
            .sum()
    }

    /// Outstanding index reads across all components.
    pub fn total_pending_index(&self) -> usize {
        self.components.values().map(|c| c.pending_index.len()).sum()
    }

    pub fn any_failed(&self) -> bool {
        self.components.values().any(|c| !c.failed.is_empty())
    }

    pub fn has_pending(&self) -> bool {
        self.components.values().any(ComponentParams::has_pending)
    }

    /// Every (component, name, value) triple, in ascending order.
    pub fn snapshot(&self) -> Vec<(ComponentId, String, ParamValue)> {
        self.components
            .iter()
            .flat_map(|(id, comp)| {
                comp.params
                    .iter()
                    .map(move |(name, entry)| (*id, name.clone(), entry.fact.raw_value()))
            })
            .collect()
    }
}
