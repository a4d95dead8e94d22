//! Hydraulic model value types: network assets (junctions, tanks,
//! reservoirs, pipes), customer points and their resolved connections, and
//! the model container the attachment engine operates on.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use geo::{LineString, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::customer_points_lookup::CustomerPointsLookup;

/// Identifier of a network asset (node or link).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct AssetId(pub u64);

/// Identifier of a customer point.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CustomerPointId(pub u64);

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("asset id {0:?} already exists in the model")]
    DuplicateAsset(AssetId),
    #[error("pipe {pipe:?} references missing endpoint node {node:?}")]
    MissingEndpoint { pipe: AssetId, node: AssetId },
}

/// A single demand carried by a customer point: a base quantity plus an
/// optional demand pattern label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub base_demand: f64,
    pub pattern: Option<String>,
}

/// The resolved attachment of a customer point to the network.
///
/// Either all fields are valid and the junction exists in the model, or the
/// customer point carries no connection at all; partially resolved
/// connections are unrepresentable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub pipe_id: AssetId,
    /// Projection of the customer point onto the pipe centerline.
    pub snap_point: Point<f64>,
    /// Distance from the point to the snap point, meters. Always >= 0.
    pub distance_m: f64,
    /// Junction whose demand aggregate accounts for this point.
    pub junction_id: AssetId,
}

/// A service connection: a point with its own demand, attachable to the
/// network at a pipe/junction. The connection is mutated only through
/// [`CustomerPoint::connect`] / [`CustomerPoint::disconnect`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomerPoint {
    id: CustomerPointId,
    coordinates: Point<f64>,
    demands: Vec<Demand>,
    connection: Option<Connection>,
}

impl CustomerPoint {
    pub fn new(id: CustomerPointId, coordinates: Point<f64>) -> Self {
        Self {
            id,
            coordinates,
            demands: Vec::new(),
            connection: None,
        }
    }

    /// Convenience constructor for a point with a single unpatterned demand.
    pub fn with_demand(id: CustomerPointId, coordinates: Point<f64>, base_demand: f64) -> Self {
        let mut point = Self::new(id, coordinates);
        point.demands.push(Demand {
            base_demand,
            pattern: None,
        });
        point
    }

    pub fn id(&self) -> CustomerPointId {
        self.id
    }

    pub fn coordinates(&self) -> Point<f64> {
        self.coordinates
    }

    pub fn demands(&self) -> &[Demand] {
        &self.demands
    }

    pub fn add_demand(&mut self, demand: Demand) {
        self.demands.push(demand);
    }

    /// Sum of the base quantities over all demand records.
    pub fn total_base_demand(&self) -> f64 {
        self.demands.iter().map(|d| d.base_demand).sum()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn connect(&mut self, connection: Connection) {
        self.connection = Some(connection);
    }

    pub fn disconnect(&mut self) -> Option<Connection> {
        self.connection.take()
    }
}

/// A demand-carrying network node. Owns two derived aggregates maintained
/// exclusively by the attachment engine: the set of attached customer point
/// ids and the running sum of their base demands.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Junction {
    pub id: AssetId,
    pub coordinates: Point<f64>,
    /// The junction's own declared base demand, independent of customer
    /// points. Zeroed by the engine when attached points newly explain it.
    pub base_demand: f64,
    customer_point_ids: BTreeSet<CustomerPointId>,
    total_customer_demand: f64,
}

impl Junction {
    pub fn new(id: AssetId, coordinates: Point<f64>) -> Self {
        Self::with_base_demand(id, coordinates, 0.0)
    }

    pub fn with_base_demand(id: AssetId, coordinates: Point<f64>, base_demand: f64) -> Self {
        Self {
            id,
            coordinates,
            base_demand,
            customer_point_ids: BTreeSet::new(),
            total_customer_demand: 0.0,
        }
    }

    pub fn customer_point_ids(&self) -> &BTreeSet<CustomerPointId> {
        &self.customer_point_ids
    }

    /// Sum of base demand over attached customer points, maintained
    /// incrementally on assign/remove.
    pub fn total_customer_demand(&self) -> f64 {
        self.total_customer_demand
    }

    /// Attaches a customer point to this junction's aggregates. Idempotent:
    /// re-assigning an already attached point does not double-count.
    pub fn assign_customer_point(&mut self, customer_point: &CustomerPoint) {
        if self.customer_point_ids.insert(customer_point.id()) {
            self.total_customer_demand += customer_point.total_base_demand();
        }
    }

    /// Inverse of [`Junction::assign_customer_point`].
    pub fn remove_customer_point(&mut self, customer_point: &CustomerPoint) {
        if self.customer_point_ids.remove(&customer_point.id()) {
            self.total_customer_demand -= customer_point.total_base_demand();
        }
    }

    /// Detaches every customer point, returning the drained ids so callers
    /// can fix up the points and the lookup.
    pub fn clear_customer_points(&mut self) -> BTreeSet<CustomerPointId> {
        self.total_customer_demand = 0.0;
        std::mem::take(&mut self.customer_point_ids)
    }
}

/// Fixed-head storage node. Never accepts attached customer demand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tank {
    pub id: AssetId,
    pub coordinates: Point<f64>,
}

/// Fixed-head source node. Never accepts attached customer demand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reservoir {
    pub id: AssetId,
    pub coordinates: Point<f64>,
}

/// A network link with a polyline centerline between two endpoint nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pipe {
    pub id: AssetId,
    pub start_node: AssetId,
    pub end_node: AssetId,
    pub geometry: LineString<f64>,
}

impl Pipe {
    /// Endpoint ids in the pipe's fixed order: start node first.
    pub fn endpoints(&self) -> [AssetId; 2] {
        [self.start_node, self.end_node]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Asset {
    Junction(Junction),
    Tank(Tank),
    Reservoir(Reservoir),
    Pipe(Pipe),
}

impl Asset {
    pub fn id(&self) -> AssetId {
        match self {
            Self::Junction(j) => j.id,
            Self::Tank(t) => t.id,
            Self::Reservoir(r) => r.id,
            Self::Pipe(p) => p.id,
        }
    }

    pub fn is_junction(&self) -> bool {
        matches!(self, Self::Junction(_))
    }

    pub fn is_node(&self) -> bool {
        !matches!(self, Self::Pipe(_))
    }

    pub fn as_junction(&self) -> Option<&Junction> {
        match self {
            Self::Junction(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_junction_mut(&mut self) -> Option<&mut Junction> {
        match self {
            Self::Junction(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_pipe(&self) -> Option<&Pipe> {
        match self {
            Self::Pipe(p) => Some(p),
            _ => None,
        }
    }

    pub fn node_coordinates(&self) -> Option<Point<f64>> {
        match self {
            Self::Junction(j) => Some(j.coordinates),
            Self::Tank(t) => Some(t.coordinates),
            Self::Reservoir(r) => Some(r.coordinates),
            Self::Pipe(_) => None,
        }
    }
}

/// The in-memory network model the attachment engine reads and mutates.
///
/// Batch attachment operations return a new model value with freshly copied
/// top-level containers; streaming ingestion mutates one exclusively
/// borrowed model in place.
#[derive(Clone, Debug, Default)]
pub struct HydraulicModel {
    pub assets: BTreeMap<AssetId, Asset>,
    pub customer_points: BTreeMap<CustomerPointId, CustomerPoint>,
    pub customer_points_lookup: CustomerPointsLookup,
}

impl HydraulicModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_junction(&mut self, junction: Junction) -> Result<(), ModelError> {
        self.insert_asset(Asset::Junction(junction))
    }

    pub fn add_tank(&mut self, tank: Tank) -> Result<(), ModelError> {
        self.insert_asset(Asset::Tank(tank))
    }

    pub fn add_reservoir(&mut self, reservoir: Reservoir) -> Result<(), ModelError> {
        self.insert_asset(Asset::Reservoir(reservoir))
    }

    /// Adds a pipe, validating that both endpoints exist and are nodes.
    pub fn add_pipe(&mut self, pipe: Pipe) -> Result<(), ModelError> {
        for node in pipe.endpoints() {
            if !self.assets.get(&node).is_some_and(Asset::is_node) {
                return Err(ModelError::MissingEndpoint { pipe: pipe.id, node });
            }
        }
        self.insert_asset(Asset::Pipe(pipe))
    }

    fn insert_asset(&mut self, asset: Asset) -> Result<(), ModelError> {
        let id = asset.id();
        match self.assets.entry(id) {
            Entry::Occupied(_) => Err(ModelError::DuplicateAsset(id)),
            Entry::Vacant(slot) => {
                slot.insert(asset);
                Ok(())
            }
        }
    }

    pub fn junction(&self, id: AssetId) -> Option<&Junction> {
        self.assets.get(&id).and_then(Asset::as_junction)
    }

    pub fn junction_mut(&mut self, id: AssetId) -> Option<&mut Junction> {
        self.assets.get_mut(&id).and_then(Asset::as_junction_mut)
    }

    pub fn pipe(&self, id: AssetId) -> Option<&Pipe> {
        self.assets.get(&id).and_then(Asset::as_pipe)
    }

    /// Recomputes a junction's customer demand from scratch over the points
    /// currently attached to it. Audit hook used by tests to prove the
    /// incremental aggregate never drifts.
    pub fn recomputed_customer_demand(&self, junction_id: AssetId) -> Option<f64> {
        let junction = self.junction(junction_id)?;
        Some(
            junction
                .customer_point_ids()
                .iter()
                .filter_map(|id| self.customer_points.get(id))
                .map(CustomerPoint::total_base_demand)
                .sum(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn junction(id: u64, x: f64, y: f64) -> Junction {
        Junction::new(AssetId(id), Point::new(x, y))
    }

    #[test]
    fn test_assign_is_idempotent() {
        let mut j = junction(1, 0.0, 0.0);
        let cp = CustomerPoint::with_demand(CustomerPointId(7), Point::new(1.0, 1.0), 25.0);
        j.assign_customer_point(&cp);
        j.assign_customer_point(&cp);
        assert_eq!(j.customer_point_ids().len(), 1);
        assert_eq!(j.total_customer_demand(), 25.0);
    }

    #[test]
    fn test_remove_inverts_assign() {
        let mut j = junction(1, 0.0, 0.0);
        let a = CustomerPoint::with_demand(CustomerPointId(1), Point::new(1.0, 0.0), 10.0);
        let b = CustomerPoint::with_demand(CustomerPointId(2), Point::new(2.0, 0.0), 30.0);
        j.assign_customer_point(&a);
        j.assign_customer_point(&b);
        j.remove_customer_point(&a);
        assert_eq!(j.total_customer_demand(), 30.0);
        // removing a point that is not attached is a no-op
        j.remove_customer_point(&a);
        assert_eq!(j.total_customer_demand(), 30.0);
    }

    #[test]
    fn test_clear_returns_drained_ids() {
        let mut j = junction(1, 0.0, 0.0);
        let a = CustomerPoint::with_demand(CustomerPointId(1), Point::new(1.0, 0.0), 10.0);
        j.assign_customer_point(&a);
        let drained = j.clear_customer_points();
        assert!(drained.contains(&CustomerPointId(1)));
        assert!(j.customer_point_ids().is_empty());
        assert_eq!(j.total_customer_demand(), 0.0);
    }

    #[test]
    fn test_total_base_demand_sums_all_records() {
        let mut cp = CustomerPoint::with_demand(CustomerPointId(1), Point::new(0.0, 0.0), 10.0);
        cp.add_demand(Demand {
            base_demand: 5.5,
            pattern: Some("NIGHT".to_string()),
        });
        assert_eq!(cp.total_base_demand(), 15.5);
    }

    #[test]
    fn test_add_pipe_requires_endpoints() {
        let mut model = HydraulicModel::new();
        model.add_junction(junction(1, 0.0, 0.0)).unwrap();
        let pipe = Pipe {
            id: AssetId(10),
            start_node: AssetId(1),
            end_node: AssetId(2),
            geometry: LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]),
        };
        assert!(matches!(
            model.add_pipe(pipe),
            Err(ModelError::MissingEndpoint { .. })
        ));
    }

    #[test]
    fn test_duplicate_asset_rejected() {
        let mut model = HydraulicModel::new();
        model.add_junction(junction(1, 0.0, 0.0)).unwrap();
        assert!(matches!(
            model.add_junction(junction(1, 5.0, 5.0)),
            Err(ModelError::DuplicateAsset(AssetId(1)))
        ));
    }

    #[test]
    fn test_customer_point_serde_round_trip() {
        let mut cp = CustomerPoint::with_demand(CustomerPointId(3), Point::new(4.0, 2.0), 12.0);
        cp.connect(Connection {
            pipe_id: AssetId(10),
            snap_point: Point::new(4.0, 0.0),
            distance_m: 2.0,
            junction_id: AssetId(1),
        });
        let json = serde_json::to_string(&cp).unwrap();
        let back: CustomerPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), cp.id());
        assert_eq!(back.connection(), cp.connection());
        assert_eq!(back.total_base_demand(), 12.0);
    }
}
