//! Attachment orchestration: the single-point locate-and-attach path, the
//! two batch operations over immutable models, and the streaming connector
//! for very large lazy inputs.
//!
//! Input-data problems (no pipe in reach, no eligible junction, stale
//! junction references) are never errors here; they resolve to "hand the
//! point back" or "skip the item".

use std::collections::BTreeMap;

use ahash::AHashSet;
use itertools::Itertools;
use tracing::{debug, info};

use crate::customer_points_lookup::CustomerPointsLookup;
use crate::junction_resolver::resolve_junction;
use crate::model::{
    Asset, AssetId, Connection, CustomerPoint, CustomerPointId, HydraulicModel, Junction,
};
use crate::nearest_segment::{LocatorConfig, NearestSegmentLocator};
use crate::spatial_index::PipeSpatialIndex;

/// Options for the batch operations ([`connect_customer_points`],
/// [`add_customer_points`]).
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// When false, a junction that receives at least one customer point in
    /// the batch has its own base demand zeroed (exactly once per junction
    /// per batch) so the attached demand is not double-counted.
    pub preserve_junction_demands: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            preserve_junction_demands: true,
        }
    }
}

/// Options for [`connect_customer_point`]. By default the resolved
/// junction's own base demand is zeroed, since the newly attached point now
/// explains it; `keep_demands` skips the zeroing.
#[derive(Clone, Debug, Default)]
pub struct SingleConnectOptions {
    pub keep_demands: bool,
}

/// Locates the nearest pipe for one customer point, resolves its junction,
/// and attaches it to the model.
///
/// This is the only geometry-searching path. On success the point is
/// connected, inserted into the model's customer point map, registered in
/// the lookup, and assigned to the junction's demand aggregate. If no pipe
/// is reachable or the pipe has no junction endpoint, the model is left
/// untouched and the point is handed back in `Err`.
pub fn connect_customer_point(
    model: &mut HydraulicModel,
    index: &PipeSpatialIndex,
    config: &LocatorConfig,
    options: &SingleConnectOptions,
    mut customer_point: CustomerPoint,
) -> Result<Connection, CustomerPoint> {
    let locator = NearestSegmentLocator::with_config(index, config.clone());
    let Some(snap) = locator.locate(customer_point.coordinates()) else {
        debug!(
            customer_point = customer_point.id().0,
            "no pipe within reach, leaving point unconnected"
        );
        return Err(customer_point);
    };
    let Some(junction_id) = resolve_junction(snap.pipe_id, snap.snap_point, &model.assets) else {
        debug!(
            customer_point = customer_point.id().0,
            pipe = snap.pipe_id.0,
            "nearest pipe has no junction endpoint, leaving point unconnected"
        );
        return Err(customer_point);
    };

    let connection = Connection {
        pipe_id: snap.pipe_id,
        snap_point: snap.snap_point,
        distance_m: snap.distance_m,
        junction_id,
    };
    customer_point.connect(connection.clone());

    // the resolver just found this junction, so the lookup cannot miss
    if let Some(junction) = model.junction_mut(junction_id) {
        junction.assign_customer_point(&customer_point);
        if !options.keep_demands {
            junction.base_demand = 0.0;
        }
    }
    model.customer_points_lookup.add_connection(&customer_point);
    model
        .customer_points
        .insert(customer_point.id(), customer_point);

    Ok(connection)
}

/// Inverse of [`connect_customer_point`] for a single point: removes the
/// lookup entries and the junction aggregate contribution and clears the
/// point's connection. The point stays in the model. Returns the removed
/// connection, or `None` if the point was absent or already disconnected.
pub fn disconnect_customer_point(
    model: &mut HydraulicModel,
    id: CustomerPointId,
) -> Option<Connection> {
    let mut customer_point = model.customer_points.remove(&id)?;
    let removed = customer_point.connection().cloned();
    if let Some(connection) = &removed {
        model.customer_points_lookup.remove_connection(&customer_point);
        if let Some(junction) = model.junction_mut(connection.junction_id) {
            junction.remove_customer_point(&customer_point);
        }
        customer_point.disconnect();
    }
    model.customer_points.insert(id, customer_point);
    removed
}

/// Batch-attaches customer points whose connections were already resolved
/// (reconstructed from a prior run or from storage). Never mutates the
/// input model; returns a new model value with freshly copied top-level
/// containers.
///
/// Points without a connection, and points whose junction id does not
/// resolve in the current asset map, are skipped entirely and absent from
/// the output. The first batch point touching a junction clears whatever
/// was attached to it before (previous points are detached and their
/// connections dropped), then every batch point destined for that junction
/// is re-assigned, so repeating a batch cannot double-count.
pub fn connect_customer_points(
    model: &HydraulicModel,
    batch: BTreeMap<CustomerPointId, CustomerPoint>,
    options: &BatchOptions,
) -> HydraulicModel {
    let mut assets = model.assets.clone();
    let mut customer_points = model.customer_points.clone();
    let mut lookup = model.customer_points_lookup.clone();

    // BTreeMap order keeps the grouping deterministic; the per-junction
    // processing below is order-independent either way.
    let per_junction: Vec<(AssetId, Vec<CustomerPoint>)> = batch
        .into_values()
        .filter_map(|customer_point| {
            let junction_id = customer_point.connection()?.junction_id;
            if assets.get(&junction_id).is_some_and(Asset::is_junction) {
                Some((junction_id, customer_point))
            } else {
                debug!(
                    customer_point = customer_point.id().0,
                    junction = junction_id.0,
                    "skipping point with stale junction reference"
                );
                None
            }
        })
        .into_group_map()
        .into_iter()
        .sorted_by_key(|(junction_id, _)| *junction_id)
        .collect();

    // First pass: clear every target junction before any re-assignment, so
    // a point moving between two target junctions cannot be clobbered.
    for (junction_id, _) in &per_junction {
        let drained = match junction_mut(&mut assets, *junction_id) {
            Some(junction) => {
                if !options.preserve_junction_demands {
                    junction.base_demand = 0.0;
                }
                junction.clear_customer_points()
            }
            None => continue,
        };
        for previous_id in drained {
            if let Some(previous) = customer_points.get_mut(&previous_id) {
                lookup.remove_connection(previous);
                previous.disconnect();
            }
        }
    }

    let mut connected = 0usize;
    for (junction_id, points) in per_junction {
        for customer_point in points {
            detach_existing(&mut assets, &mut lookup, &customer_points, customer_point.id());
            if let Some(junction) = junction_mut(&mut assets, junction_id) {
                junction.assign_customer_point(&customer_point);
            }
            lookup.add_connection(&customer_point);
            customer_points.insert(customer_point.id(), customer_point);
            connected += 1;
        }
    }
    info!(connected, "batch connect finished");

    HydraulicModel {
        assets,
        customer_points,
        customer_points_lookup: lookup,
    }
}

/// Registers customer points into the model unconditionally, connected or
/// not. Never mutates the input model.
///
/// Points carrying a connection whose junction resolves also get lookup
/// entries and a junction assignment; when `preserve_junction_demands` is
/// false the target junction's own base demand is zeroed once per junction
/// per call. Points referencing a missing junction are retained but
/// stripped of the dangling connection.
pub fn add_customer_points(
    model: &HydraulicModel,
    points: Vec<CustomerPoint>,
    options: &BatchOptions,
) -> HydraulicModel {
    let mut assets = model.assets.clone();
    let mut customer_points = model.customer_points.clone();
    let mut lookup = model.customer_points_lookup.clone();
    let mut demand_reset: AHashSet<AssetId> = AHashSet::new();

    for mut customer_point in points {
        let target = customer_point.connection().and_then(|connection| {
            assets
                .get(&connection.junction_id)
                .is_some_and(Asset::is_junction)
                .then_some(connection.junction_id)
        });
        match target {
            Some(junction_id) => {
                if let Some(junction) = junction_mut(&mut assets, junction_id) {
                    if !options.preserve_junction_demands && demand_reset.insert(junction_id) {
                        junction.base_demand = 0.0;
                    }
                    junction.assign_customer_point(&customer_point);
                }
                lookup.add_connection(&customer_point);
            }
            None => {
                if customer_point.disconnect().is_some() {
                    debug!(
                        customer_point = customer_point.id().0,
                        "dropping dangling connection, registering point unconnected"
                    );
                }
            }
        }
        customer_points.insert(customer_point.id(), customer_point);
    }

    HydraulicModel {
        assets,
        customer_points,
        customer_points_lookup: lookup,
    }
}

/// Streaming ingestion over one exclusively borrowed working model.
///
/// For inputs too large to materialize, each point goes through the
/// single-point locate-and-attach path against shared mutable state. The
/// `&mut` borrow keeps concurrent readers out for the duration of the run;
/// every `connect` call is atomic, so callers may stop between points.
pub struct StreamingConnector<'a> {
    model: &'a mut HydraulicModel,
    index: &'a PipeSpatialIndex,
    config: LocatorConfig,
    options: SingleConnectOptions,
    connected: usize,
    skipped: usize,
}

impl<'a> StreamingConnector<'a> {
    pub fn new(model: &'a mut HydraulicModel, index: &'a PipeSpatialIndex) -> Self {
        Self::with_config(
            model,
            index,
            LocatorConfig::default(),
            SingleConnectOptions::default(),
        )
    }

    pub fn with_config(
        model: &'a mut HydraulicModel,
        index: &'a PipeSpatialIndex,
        config: LocatorConfig,
        options: SingleConnectOptions,
    ) -> Self {
        Self {
            model,
            index,
            config,
            options,
            connected: 0,
            skipped: 0,
        }
    }

    /// Attaches one point; `None` means it was left unconnected (and is not
    /// part of the model).
    pub fn connect(&mut self, customer_point: CustomerPoint) -> Option<Connection> {
        match connect_customer_point(
            self.model,
            self.index,
            &self.config,
            &self.options,
            customer_point,
        ) {
            Ok(connection) => {
                self.connected += 1;
                Some(connection)
            }
            Err(_unconnected) => {
                self.skipped += 1;
                None
            }
        }
    }

    /// Drives a lazy sequence to completion.
    pub fn connect_all<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = CustomerPoint>,
    {
        for point in points {
            self.connect(point);
        }
    }

    pub fn connected(&self) -> usize {
        self.connected
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Ends the run, logging and returning (connected, skipped) counts.
    pub fn finish(self) -> (usize, usize) {
        info!(
            connected = self.connected,
            skipped = self.skipped,
            "streaming ingestion finished"
        );
        (self.connected, self.skipped)
    }
}

fn junction_mut(assets: &mut BTreeMap<AssetId, Asset>, id: AssetId) -> Option<&mut Junction> {
    assets.get_mut(&id).and_then(Asset::as_junction_mut)
}

/// Removes a previous incarnation of `id` from the lookup and from its old
/// junction aggregate before it is re-assigned elsewhere.
fn detach_existing(
    assets: &mut BTreeMap<AssetId, Asset>,
    lookup: &mut CustomerPointsLookup,
    customer_points: &BTreeMap<CustomerPointId, CustomerPoint>,
    id: CustomerPointId,
) {
    let Some(previous) = customer_points.get(&id) else {
        return;
    };
    let Some(connection) = previous.connection() else {
        return;
    };
    lookup.remove_connection(previous);
    if let Some(junction) = junction_mut(assets, connection.junction_id) {
        junction.remove_customer_point(previous);
    }
}
