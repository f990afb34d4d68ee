use serde::{Deserialize, Serialize};

use crate::catalog::CollectionRef;

/// How playlist order is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistOrdering {
    /// Insert missing items next to their source neighbours; never move
    /// existing items.
    #[default]
    Incremental,
    /// Remove and re-append present items when their relative order differs
    /// from the source.
    Rebuild,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Remove destination items absent from the source.
    pub mirror: bool,
    pub ordering: PlaylistOrdering,
}

/// A run of destination IDs added at one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insertion {
    /// Index in the list at the time of insertion; `None` appends.
    pub position: Option<usize>,
    pub ids: Vec<String>,
}

/// Operations converging one destination collection. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub collection: CollectionRef,
    pub insertions: Vec<Insertion>,
    pub removals: Vec<String>,
    /// Present items are removed and re-appended in source order.
    pub rebuild: bool,
    /// Source items without a destination match, left out of the plan.
    pub excluded_unresolved: usize,
}

impl SyncPlan {
    pub(super) fn empty() -> Self {
        Self {
            collection: CollectionRef::playlist("", ""),
            insertions: Vec::new(),
            removals: Vec::new(),
            rebuild: false,
            excluded_unresolved: 0,
        }
    }

    /// No operation to apply.
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.removals.is_empty()
    }

    pub fn addition_count(&self) -> usize {
        self.insertions.iter().map(|i| i.ids.len()).sum()
    }
}
