//! Expanding nearest-segment search: a radius-inflated bounding-box query
//! with a k-nearest-neighbor fallback for sparse networks.

use geo::Point;
use ordered_float::OrderedFloat;
use rstar::AABB;

use crate::model::AssetId;
use crate::spatial_index::{PipeSegment, PipeSpatialIndex, closest_point_on_segment};

/// Tuning for the nearest-pipe search. Defaults reproduce the engine's
/// documented behavior: a 10 m search box, a 5-segment k-NN fallback, and
/// metric model units.
#[derive(Clone, Debug)]
pub struct LocatorConfig {
    /// Real-world search radius around the point, meters.
    pub search_radius_m: f64,
    /// Segments fetched by the k-NN fallback when the radius box is empty.
    pub knn_fallback: usize,
    /// Meters represented by one model unit. 1.0 for metric projections;
    /// lon/lat models pass their local degree length (roughly 111_111.0).
    pub meters_per_unit: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            search_radius_m: 10.0,
            knn_fallback: 5,
            meters_per_unit: 1.0,
        }
    }
}

/// Closest point-on-pipe found for a customer point.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapResult {
    pub pipe_id: AssetId,
    pub snap_point: Point<f64>,
    pub distance_m: f64,
}

pub struct NearestSegmentLocator<'a> {
    index: &'a PipeSpatialIndex,
    config: LocatorConfig,
}

impl<'a> NearestSegmentLocator<'a> {
    pub fn new(index: &'a PipeSpatialIndex) -> Self {
        Self::with_config(index, LocatorConfig::default())
    }

    pub fn with_config(index: &'a PipeSpatialIndex, config: LocatorConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Closest point on the network's pipes, or `None` when no pipe is
    /// reachable. An empty index short-circuits without querying.
    ///
    /// Exact distance ties go to the first candidate encountered; ties are
    /// measure-zero on real data.
    pub fn locate(&self, point: Point<f64>) -> Option<SnapResult> {
        if self.index.is_empty() {
            return None;
        }

        let radius = self.config.search_radius_m / self.config.meters_per_unit;
        let envelope = AABB::from_corners(
            [point.x() - radius, point.y() - radius],
            [point.x() + radius, point.y() + radius],
        );
        let mut candidates: Vec<&PipeSegment> = self.index.segments_in_envelope(&envelope).collect();
        if candidates.is_empty() {
            // sparse network: the box missed everything, take the k nearest
            candidates = self.index.nearest_segments(point, self.config.knn_fallback);
        }

        candidates
            .into_iter()
            .map(|segment| {
                let snap_point = closest_point_on_segment(&segment.line, point);
                let dx = point.x() - snap_point.x();
                let dy = point.y() - snap_point.y();
                SnapResult {
                    pipe_id: segment.pipe_id,
                    snap_point,
                    distance_m: (dx * dx + dy * dy).sqrt() * self.config.meters_per_unit,
                }
            })
            .min_by_key(|snap| OrderedFloat(snap.distance_m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HydraulicModel, Junction, Pipe};
    use geo::LineString;

    fn model_with_pipe(id: u64, from: (f64, f64), to: (f64, f64)) -> HydraulicModel {
        let mut model = HydraulicModel::new();
        model
            .add_junction(Junction::new(AssetId(id * 100 + 1), Point::new(from.0, from.1)))
            .unwrap();
        model
            .add_junction(Junction::new(AssetId(id * 100 + 2), Point::new(to.0, to.1)))
            .unwrap();
        model
            .add_pipe(Pipe {
                id: AssetId(id),
                start_node: AssetId(id * 100 + 1),
                end_node: AssetId(id * 100 + 2),
                geometry: LineString::from(vec![from, to]),
            })
            .unwrap();
        model
    }

    #[test]
    fn test_empty_index_short_circuits() {
        let model = HydraulicModel::new();
        let index = PipeSpatialIndex::from_assets(&model.assets);
        let locator = NearestSegmentLocator::new(&index);
        assert_eq!(locator.locate(Point::new(0.0, 0.0)), None);
    }

    #[test]
    fn test_snap_within_radius() {
        let model = model_with_pipe(10, (0.0, 0.0), (10.0, 0.0));
        let index = PipeSpatialIndex::from_assets(&model.assets);
        let locator = NearestSegmentLocator::new(&index);

        let snap = locator.locate(Point::new(8.0, 1.0)).unwrap();
        assert_eq!(snap.pipe_id, AssetId(10));
        assert_eq!((snap.snap_point.x(), snap.snap_point.y()), (8.0, 0.0));
        assert!((snap.distance_m - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_knn_fallback_beyond_radius() {
        let model = model_with_pipe(10, (0.0, 0.0), (10.0, 0.0));
        let index = PipeSpatialIndex::from_assets(&model.assets);
        let locator = NearestSegmentLocator::new(&index);

        // 500 units from the pipe, far outside the 10 m box
        let snap = locator.locate(Point::new(5.0, 500.0)).unwrap();
        assert_eq!(snap.pipe_id, AssetId(10));
        assert!((snap.distance_m - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_closest_of_two_pipes_wins() {
        let mut model = model_with_pipe(10, (0.0, 0.0), (10.0, 0.0));
        model
            .add_junction(Junction::new(AssetId(201), Point::new(0.0, 5.0)))
            .unwrap();
        model
            .add_junction(Junction::new(AssetId(202), Point::new(10.0, 5.0)))
            .unwrap();
        model
            .add_pipe(Pipe {
                id: AssetId(11),
                start_node: AssetId(201),
                end_node: AssetId(202),
                geometry: LineString::from(vec![(0.0, 5.0), (10.0, 5.0)]),
            })
            .unwrap();
        let index = PipeSpatialIndex::from_assets(&model.assets);
        let locator = NearestSegmentLocator::new(&index);

        let snap = locator.locate(Point::new(5.0, 4.0)).unwrap();
        assert_eq!(snap.pipe_id, AssetId(11));
        assert!((snap.distance_m - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_meters_per_unit_scales_radius_and_distance() {
        // degree-like units: one unit is ~111 km
        let model = model_with_pipe(10, (0.0, 0.0), (0.001, 0.0));
        let index = PipeSpatialIndex::from_assets(&model.assets);
        let config = LocatorConfig {
            meters_per_unit: 111_111.0,
            ..LocatorConfig::default()
        };
        let locator = NearestSegmentLocator::with_config(&index, config);

        // ~5.6 m offset from the pipe, inside the 10 m search radius
        let snap = locator.locate(Point::new(0.0005, 0.00005)).unwrap();
        assert!((snap.distance_m - 0.00005 * 111_111.0).abs() < 1e-6);
    }
}
