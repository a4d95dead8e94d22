//! Derived bidirectional index from asset id (pipe or junction) to the
//! customer points currently attached to it.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;

use crate::model::{AssetId, CustomerPoint, CustomerPointId};

/// Asset id -> attached customer point ids, for both keys of a connection
/// (the pipe and the junction).
///
/// A point appears under key K iff its current connection references K.
/// Cloning is copy-on-write: the top-level map is fresh while the per-key
/// sets are shared until first mutation (`Arc::make_mut` clones a shared set
/// before touching it), so snapshotting a lookup never deep-copies every
/// set.
#[derive(Clone, Debug, Default)]
pub struct CustomerPointsLookup {
    by_asset: AHashMap<AssetId, Arc<BTreeSet<CustomerPointId>>>,
}

impl CustomerPointsLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the point under both its pipe id and junction id keys.
    /// No-op for a disconnected point.
    pub fn add_connection(&mut self, customer_point: &CustomerPoint) {
        let Some(connection) = customer_point.connection() else {
            return;
        };
        self.insert_under(connection.pipe_id, customer_point.id());
        self.insert_under(connection.junction_id, customer_point.id());
    }

    /// Inverse of [`CustomerPointsLookup::add_connection`], keyed by the
    /// point's current connection.
    pub fn remove_connection(&mut self, customer_point: &CustomerPoint) {
        let Some(connection) = customer_point.connection() else {
            return;
        };
        self.remove_under(connection.pipe_id, customer_point.id());
        self.remove_under(connection.junction_id, customer_point.id());
    }

    pub fn customer_points(&self, asset_id: AssetId) -> Option<&BTreeSet<CustomerPointId>> {
        self.by_asset.get(&asset_id).map(Arc::as_ref)
    }

    pub fn has_connections(&self, asset_id: AssetId) -> bool {
        self.by_asset.contains_key(&asset_id)
    }

    fn insert_under(&mut self, asset_id: AssetId, id: CustomerPointId) {
        Arc::make_mut(self.by_asset.entry(asset_id).or_default()).insert(id);
    }

    fn remove_under(&mut self, asset_id: AssetId, id: CustomerPointId) {
        if let Some(set) = self.by_asset.get_mut(&asset_id) {
            let set = Arc::make_mut(set);
            set.remove(&id);
            // empty keys are dropped so has_connections stays meaningful
            if set.is_empty() {
                self.by_asset.remove(&asset_id);
            }
        }
    }
}
