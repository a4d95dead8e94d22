//! R-tree over pipe centerline segments. Built once per pipe-set version
//! and passed into the engine as a read-only capability; queries are
//! bounding-box and k-nearest-neighbor over individual polyline legs.

use std::collections::BTreeMap;

use geo::{Line, Point};
use rstar::{AABB, PointDistance, RTree, RTreeObject};

use crate::model::{Asset, AssetId};

/// One leg of a pipe centerline, tagged with the owning pipe.
#[derive(Clone, Debug)]
pub struct PipeSegment {
    pub pipe_id: AssetId,
    pub line: Line<f64>,
}

impl RTreeObject for PipeSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        let (p1, p2) = self.line.points();
        AABB::from_corners([p1.x(), p1.y()], [p2.x(), p2.y()])
    }
}

impl PointDistance for PipeSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let p = Point::new(point[0], point[1]);
        let snapped = closest_point_on_segment(&self.line, p);
        let dx = p.x() - snapped.x();
        let dy = p.y() - snapped.y();
        dx * dx + dy * dy
    }
}

/// Closest point on a finite segment (projection clamped to the endpoints).
pub fn closest_point_on_segment(line: &Line<f64>, point: Point<f64>) -> Point<f64> {
    let (a, b) = (line.start, line.end);
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let len2 = abx * abx + aby * aby;
    if len2 == 0.0 {
        // degenerate zero-length segment
        return Point::new(a.x, a.y);
    }
    let t = (((point.x() - a.x) * abx + (point.y() - a.y) * aby) / len2).clamp(0.0, 1.0);
    Point::new(a.x + t * abx, a.y + t * aby)
}

/// Bulk-loaded spatial index over every segment of every pipe in a model.
pub struct PipeSpatialIndex {
    tree: RTree<PipeSegment>,
}

impl PipeSpatialIndex {
    pub fn from_assets(assets: &BTreeMap<AssetId, Asset>) -> Self {
        let mut segments = Vec::new();
        for asset in assets.values() {
            let Asset::Pipe(pipe) = asset else { continue };
            for line in pipe.geometry.lines() {
                segments.push(PipeSegment {
                    pipe_id: pipe.id,
                    line,
                });
            }
        }
        Self {
            tree: RTree::bulk_load(segments),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Number of indexed segments (not pipes).
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn segments_in_envelope<'a>(
        &'a self,
        envelope: &AABB<[f64; 2]>,
    ) -> impl Iterator<Item = &'a PipeSegment> + 'a {
        self.tree.locate_in_envelope_intersecting(envelope)
    }

    /// Up to `k` indexed segments by ascending distance to `point`.
    pub fn nearest_segments(&self, point: Point<f64>, k: usize) -> Vec<&PipeSegment> {
        self.tree
            .nearest_neighbor_iter(&[point.x(), point.y()])
            .take(k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HydraulicModel, Junction, Pipe};
    use geo::LineString;

    fn two_pipe_model() -> HydraulicModel {
        let mut model = HydraulicModel::new();
        for (id, x, y) in [(1, 0.0, 0.0), (2, 10.0, 0.0), (3, 0.0, 50.0), (4, 10.0, 50.0)] {
            model
                .add_junction(Junction::new(AssetId(id), Point::new(x, y)))
                .unwrap();
        }
        model
            .add_pipe(Pipe {
                id: AssetId(10),
                start_node: AssetId(1),
                end_node: AssetId(2),
                geometry: LineString::from(vec![(0.0, 0.0), (5.0, 0.0), (10.0, 0.0)]),
            })
            .unwrap();
        model
            .add_pipe(Pipe {
                id: AssetId(11),
                start_node: AssetId(3),
                end_node: AssetId(4),
                geometry: LineString::from(vec![(0.0, 50.0), (10.0, 50.0)]),
            })
            .unwrap();
        model
    }

    #[test]
    fn test_index_counts_polyline_legs() {
        let model = two_pipe_model();
        let index = PipeSpatialIndex::from_assets(&model.assets);
        // pipe 10 has two legs, pipe 11 one
        assert_eq!(index.len(), 3);
        assert!(!index.is_empty());
    }

    #[test]
    fn test_envelope_query_restricted_to_box() {
        let model = two_pipe_model();
        let index = PipeSpatialIndex::from_assets(&model.assets);
        let envelope = AABB::from_corners([-1.0, -1.0], [11.0, 1.0]);
        let hits: Vec<_> = index.segments_in_envelope(&envelope).collect();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|s| s.pipe_id == AssetId(10)));
    }

    #[test]
    fn test_nearest_segments_orders_by_distance() {
        let model = two_pipe_model();
        let index = PipeSpatialIndex::from_assets(&model.assets);
        let nearest = index.nearest_segments(Point::new(5.0, 40.0), 1);
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].pipe_id, AssetId(11));
    }

    #[test]
    fn test_projection_clamps_to_endpoints() {
        let line = Line::new((0.0, 0.0), (10.0, 0.0));
        let mid = closest_point_on_segment(&line, Point::new(4.0, 3.0));
        assert_eq!((mid.x(), mid.y()), (4.0, 0.0));
        let clamped = closest_point_on_segment(&line, Point::new(-3.0, 2.0));
        assert_eq!((clamped.x(), clamped.y()), (0.0, 0.0));
        let past_end = closest_point_on_segment(&line, Point::new(15.0, -1.0));
        assert_eq!((past_end.x(), past_end.y()), (10.0, 0.0));
    }
}
