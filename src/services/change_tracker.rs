//! Detects catalog edits that invalidate an existing classification.
//!
//! Two observation points feed the same flagged set: a pre-update diff of the
//! stored item against the incoming write, and the item's own pending-change
//! set right before save. Neither sees every kind of edit on its own, so an
//! item flagged by either one is reclassified.

use std::collections::{BTreeSet, HashSet};

use parking_lot::Mutex;

use crate::models::product::{ItemSnapshot, ProductChanges};

#[derive(Debug, Default)]
pub struct ChangeTracker {
    flagged: Mutex<HashSet<i64>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-update detector: compare the stored item with the incoming write.
    /// Returns whether the item is now flagged.
    pub fn flag_updated_item(&self, item_id: i64, stored: &ItemSnapshot, incoming: &ItemSnapshot) -> bool {
        if !item_fields_changed(stored, incoming) {
            return self.is_flagged(item_id);
        }
        tracing::debug!(product_id = item_id, "Classification fields changed before update");
        self.flagged.lock().insert(item_id);
        true
    }

    /// Before-save detector: inspect the item's pending change set.
    pub fn flag_product_changes(&self, item_id: i64, changes: &ProductChanges) -> bool {
        if !changes.affects_classification() {
            return self.is_flagged(item_id);
        }
        tracing::debug!(product_id = item_id, "Pending changes affect classification");
        self.flagged.lock().insert(item_id);
        true
    }

    pub fn is_flagged(&self, item_id: i64) -> bool {
        self.flagged.lock().contains(&item_id)
    }

    /// Forget the flag once the save has been handled.
    pub fn clear(&self, item_id: i64) {
        self.flagged.lock().remove(&item_id);
    }
}

fn item_fields_changed(stored: &ItemSnapshot, incoming: &ItemSnapshot) -> bool {
    stored.name != incoming.name
        || stored.short_description != incoming.short_description
        || stored.description != incoming.description
        || stored.parent_id != incoming.parent_id
        || categories_changed(stored.category_ids.as_deref(), incoming.category_ids.as_deref())
}

/// Categories only count as changed when the edit posted a category list.
fn categories_changed(stored: Option<&[i64]>, posted: Option<&[i64]>) -> bool {
    let Some(posted) = posted else {
        return false;
    };
    let posted: BTreeSet<i64> = posted.iter().copied().filter(|id| *id > 0).collect();
    let stored: BTreeSet<i64> = stored.unwrap_or_default().iter().copied().collect();
    posted != stored
}
