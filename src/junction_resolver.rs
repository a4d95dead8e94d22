//! Picks the junction endpoint of a pipe that a snapped customer point's
//! demand attaches to. Tanks and reservoirs never accept customer demand.

use std::collections::BTreeMap;

use geo::Point;
use ordered_float::OrderedFloat;

use crate::model::{Asset, AssetId};

/// Resolves the junction for a snap point on `pipe_id`.
///
/// Returns `None` when the pipe is missing (defensive; locator and index
/// should agree) or when neither endpoint is a junction. With two junction
/// endpoints the one closer to the snap point wins; exact ties go to the
/// pipe's start node, which is checked first.
pub fn resolve_junction(
    pipe_id: AssetId,
    snap_point: Point<f64>,
    assets: &BTreeMap<AssetId, Asset>,
) -> Option<AssetId> {
    let pipe = assets.get(&pipe_id)?.as_pipe()?;

    let eligible: Vec<(AssetId, Point<f64>)> = pipe
        .endpoints()
        .iter()
        .filter_map(|node_id| {
            assets
                .get(node_id)
                .and_then(Asset::as_junction)
                .map(|junction| (junction.id, junction.coordinates))
        })
        .collect();

    eligible
        .into_iter()
        .min_by_key(|(_, coordinates)| {
            let dx = coordinates.x() - snap_point.x();
            let dy = coordinates.y() - snap_point.y();
            OrderedFloat(dx * dx + dy * dy)
        })
        .map(|(id, _)| id)
}
