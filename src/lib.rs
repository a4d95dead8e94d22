//! Customer-point attachment engine for piped water networks.
//!
//! Spatially joins point-like service connections ("customer points") to the
//! nearest pipe of a network, resolves the junction that should carry each
//! point's demand, and maintains a bidirectional index between network
//! assets and the customer points attached to them.

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

pub mod attach;
pub mod customer_points_lookup;
pub mod junction_resolver;
pub mod model;
pub mod nearest_segment;
pub mod spatial_index;

pub use attach::{
    BatchOptions, SingleConnectOptions, StreamingConnector, add_customer_points,
    connect_customer_point, connect_customer_points, disconnect_customer_point,
};
pub use customer_points_lookup::CustomerPointsLookup;
pub use junction_resolver::resolve_junction;
pub use model::{
    Asset, AssetId, Connection, CustomerPoint, CustomerPointId, Demand, HydraulicModel, Junction,
    ModelError, Pipe, Reservoir, Tank,
};
pub use nearest_segment::{LocatorConfig, NearestSegmentLocator, SnapResult};
pub use spatial_index::{PipeSegment, PipeSpatialIndex};
