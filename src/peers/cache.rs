//! Last broadcast value per visualization category

use std::collections::HashMap;

use super::connection::Outbound;
use crate::protocol::CacheCategory;

/// Replay store for late joiners.
///
/// Only the registry touches this, under the same lock as membership, so an
/// entry can never outlive the last interested subscriber.
#[derive(Debug, Default)]
pub struct LastFrameCache {
    entries: HashMap<CacheCategory, Outbound>,
}

impl LastFrameCache {
    pub fn store(&mut self, category: CacheCategory, payload: Outbound) {
        self.entries.insert(category, payload);
    }

    pub fn get(&self, category: CacheCategory) -> Option<&Outbound> {
        self.entries.get(&category)
    }

    /// Returns whether an entry was present
    pub fn clear(&mut self, category: CacheCategory) -> bool {
        self.entries.remove(&category).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
