// Streams randomly distributed customer points against a grid network and
// reports attachment throughput, with a brute-force spot check of the
// nearest-segment distances.

use anyhow::Result;
use clap::Parser;
use geo::{LineString, Point};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

use watermains::attach::StreamingConnector;
use watermains::model::{
    Asset, AssetId, CustomerPoint, CustomerPointId, HydraulicModel, Junction, Pipe,
};
use watermains::spatial_index::{PipeSpatialIndex, closest_point_on_segment};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of customer points to stream
    #[arg(long, default_value_t = 500_000)]
    points: usize,

    /// Grid is size x size junctions
    #[arg(long, default_value_t = 32)]
    grid_size: u64,

    /// Spacing between neighboring junctions, model units (meters)
    #[arg(long, default_value_t = 100.0)]
    spacing: f64,

    /// RNG seed for the point cloud
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Connected points re-checked against brute-force nearest-segment search
    #[arg(long, default_value_t = 200)]
    verify_sample: usize,

    /// Wall-time budget for the streaming run, seconds
    #[arg(long, default_value_t = 15.0)]
    budget_secs: f64,
}

fn build_grid(n: u64, spacing: f64) -> Result<HydraulicModel> {
    let mut model = HydraulicModel::new();
    let junction_id = |row: u64, col: u64| AssetId(row * n + col + 1);

    for row in 0..n {
        for col in 0..n {
            let coords = Point::new(col as f64 * spacing, row as f64 * spacing);
            model.add_junction(Junction::new(junction_id(row, col), coords))?;
        }
    }

    let mut next_pipe = 1_000_000u64;
    for row in 0..n {
        for col in 0..n {
            let neighbors = [
                (col + 1 < n).then(|| junction_id(row, col + 1)),
                (row + 1 < n).then(|| junction_id(row + 1, col)),
            ];
            for to in neighbors.into_iter().flatten() {
                let from = junction_id(row, col);
                let start = model.junction(from).expect("grid junction").coordinates;
                let end = model.junction(to).expect("grid junction").coordinates;
                model.add_pipe(Pipe {
                    id: AssetId(next_pipe),
                    start_node: from,
                    end_node: to,
                    geometry: LineString::from(vec![(start.x(), start.y()), (end.x(), end.y())]),
                })?;
                next_pipe += 1;
            }
        }
    }
    Ok(model)
}

fn brute_force_distance(model: &HydraulicModel, point: Point<f64>) -> f64 {
    model
        .assets
        .values()
        .filter_map(Asset::as_pipe)
        .flat_map(|pipe| pipe.geometry.lines())
        .map(|line| {
            let snapped = closest_point_on_segment(&line, point);
            let dx = point.x() - snapped.x();
            let dy = point.y() - snapped.y();
            (dx * dx + dy * dy).sqrt()
        })
        .fold(f64::INFINITY, f64::min)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let n = args.grid_size;
    let mut model = build_grid(n, args.spacing)?;
    let pipe_count = model.assets.values().filter(|a| a.as_pipe().is_some()).count();
    println!(
        "grid: {}x{} junctions, {} pipes, spacing {} m",
        n, n, pipe_count, args.spacing
    );

    let index_start = Instant::now();
    let index = PipeSpatialIndex::from_assets(&model.assets);
    println!(
        "spatial index: {} segments in {:?}",
        index.len(),
        index_start.elapsed()
    );

    let extent = (n - 1) as f64 * args.spacing;
    let mut rng = StdRng::seed_from_u64(args.seed);

    let reference = model.clone();
    let stream_start = Instant::now();
    let mut connector = StreamingConnector::new(&mut model, &index);
    for i in 0..args.points {
        let cp = CustomerPoint::with_demand(
            CustomerPointId(i as u64 + 1),
            Point::new(rng.random_range(0.0..extent), rng.random_range(0.0..extent)),
            1.0,
        );
        connector.connect(cp);
    }
    let (connected, skipped) = connector.finish();
    let elapsed = stream_start.elapsed();
    let throughput = args.points as f64 / elapsed.as_secs_f64();

    println!(
        "streamed {} points in {:.2?} ({:.0} points/s), {} connected, {} skipped",
        args.points, elapsed, throughput, connected, skipped
    );
    if elapsed.as_secs_f64() > args.budget_secs {
        println!(
            "OVER BUDGET: run took {:.2}s, budget is {:.0}s",
            elapsed.as_secs_f64(),
            args.budget_secs
        );
    }

    // spot-check connected distances against exhaustive nearest-segment search
    let ids: Vec<CustomerPointId> = model.customer_points.keys().copied().collect();
    let mut worst = 0.0f64;
    for _ in 0..args.verify_sample.min(ids.len()) {
        let id = ids[rng.random_range(0..ids.len())];
        let point = model.customer_points.get(&id).expect("sampled point");
        let connection = point.connection().expect("streamed points are connected");
        let expected = brute_force_distance(&reference, point.coordinates());
        worst = worst.max((connection.distance_m - expected).abs());
    }
    println!(
        "verified {} sampled points, worst distance error {:.3e} m",
        args.verify_sample.min(ids.len()),
        worst
    );
    if worst > 1e-6 {
        anyhow::bail!("brute-force verification failed: worst error {worst}");
    }

    Ok(())
}
