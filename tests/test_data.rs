use std::f64::consts::TAU;
use std::path::{Path, PathBuf};

use csv::Writer;
use ndarray::{Array1, Array2};
use ocmap::config::PipelineConfig;
use ocmap::data::{CovariateGrid, GridGeometry, ObservationTable};
use ocmap::forest::QrfParams;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

#[allow(dead_code)]
pub const GRID_SIDE: usize = 30;
#[allow(dead_code)]
pub const CELL_SIZE: f64 = 1000.0;
#[allow(dead_code)]
pub const LAYERS: [&str; 5] = ["bathy", "bathy_scaled", "temp", "noise_a", "noise_b"];

/// `y = sum_j (j + 1) * x_j + noise` with uniform features on `[0, 1)`.
#[allow(dead_code)]
pub fn linear_signal(n: usize, p: usize, noise_sd: f64, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, noise_sd).unwrap();
    let x = Array2::from_shape_fn((n, p), |_| rng.gen::<f64>());
    let y = Array1::from_shape_fn(n, |i| {
        (0..p).map(|j| (j + 1) as f64 * x[[i, j]]).sum::<f64>() + noise.sample(&mut rng)
    });
    (x, y)
}

#[allow(dead_code)]
pub fn geometry() -> GridGeometry {
    GridGeometry {
        nrows: GRID_SIDE,
        ncols: GRID_SIDE,
        x_origin: 0.0,
        y_origin: (GRID_SIDE - 1) as f64 * CELL_SIZE,
        cell_size: CELL_SIZE,
    }
}

/// Covariate layers over a 30 km square: a bathymetric gradient, a rescaled near-copy of it,
/// a periodic temperature field and two layers of pure noise.
#[allow(dead_code)]
pub fn synthetic_grid(seed: u64) -> CovariateGrid {
    let mut rng = StdRng::seed_from_u64(seed);
    let jitter = Normal::new(0.0, 1.0).unwrap();
    let g = geometry();
    let mut layers = vec![Array2::zeros(g.shape()); LAYERS.len()];
    for r in 0..g.nrows {
        for c in 0..g.ncols {
            let (x, y) = g.cell_center(r, c);
            let bathy = -50.0 - 4.0 * x / 1000.0 - 2.0 * y / 1000.0;
            layers[0][[r, c]] = bathy;
            layers[1][[r, c]] = 1.5 * bathy + jitter.sample(&mut rng);
            // Three full periods each way, so it is uncorrelated with the depth gradient.
            layers[2][[r, c]] = (TAU * x / 10_000.0).sin() * (TAU * y / 10_000.0).cos();
            layers[3][[r, c]] = rng.gen::<f64>();
            layers[4][[r, c]] = rng.gen::<f64>();
        }
    }
    // A corner of nodata, as left by a land mask.
    for r in 0..3 {
        for c in 0..3 {
            layers[2][[r, c]] = f64::NAN;
        }
    }
    CovariateGrid::new(g, LAYERS.iter().map(|s| s.to_string()).collect(), layers).unwrap()
}

/// Observations sampled at jittered cell centers; organic carbon is log-normal around a trend
/// in depth below sea level and temperature.
#[allow(dead_code)]
pub fn synthetic_survey(n: usize, seed: u64) -> (ObservationTable, CovariateGrid) {
    let grid = synthetic_grid(seed);
    let mut rng = StdRng::seed_from_u64(seed + 1);
    let noise = Normal::new(0.0, 0.1).unwrap();
    let g = grid.geometry();

    let mut coords = Array2::zeros((n, 2));
    let mut covariates = Array2::zeros((n, LAYERS.len()));
    let mut response = Array1::zeros(n);
    let mut depth = Array1::zeros(n);
    for i in 0..n {
        // Stay clear of the nodata corner.
        let (r, c) = loop {
            let (r, c) = (rng.gen_range(0..g.nrows), rng.gen_range(0..g.ncols));
            if r >= 3 || c >= 3 {
                break (r, c);
            }
        };
        let (cx, cy) = g.cell_center(r, c);
        coords[[i, 0]] = cx + rng.gen_range(-400.0..400.0);
        coords[[i, 1]] = cy + rng.gen_range(-400.0..400.0);
        for (j, name) in LAYERS.iter().enumerate() {
            covariates[[i, j]] = grid.layer(name).unwrap()[[r, c]];
        }
        let depth_below_shelf = (-covariates[[i, 0]] - 50.0) / 174.0;
        response[i] =
            (-0.5 + 1.5 * depth_below_shelf + 0.8 * covariates[[i, 2]] + noise.sample(&mut rng))
                .exp();
        depth[i] = rng.gen_range(0.0..10.0);
    }

    let names = LAYERS.iter().map(|s| s.to_string()).collect();
    let table = ObservationTable::new(coords, response, covariates, names)
        .unwrap()
        .with_depth(depth)
        .unwrap();
    (table, grid)
}

/// A configuration small enough for tests.
#[allow(dead_code)]
pub fn quick_config() -> PipelineConfig {
    PipelineConfig {
        depth_interval_bounds: Some((0.0, 8.0)),
        boruta_max_iterations: 15,
        boruta_trees: 30,
        lambda_step: 0.25,
        manual_range: Some(6000.0),
        cv_fold_count: 5,
        mtry_candidates: vec![1, 2],
        selection_trees: 20,
        forest: QrfParams {
            n_trees: 40,
            ..Default::default()
        },
        random_seed: 7,
        ..Default::default()
    }
}

/// Writes the survey as the two CSV files the binary reads.
#[allow(dead_code)]
pub fn write_survey_csv(dir: &Path, n: usize, seed: u64) -> (PathBuf, PathBuf) {
    let (table, grid) = synthetic_survey(n, seed);

    let obs_path = dir.join("observations.csv");
    let mut writer = Writer::from_path(&obs_path).unwrap();
    let mut header = vec!["x".to_string(), "y".to_string(), "toc".to_string(), "depth".to_string()];
    header.extend(table.names().iter().cloned());
    writer.write_record(&header).unwrap();
    let depth = table.depth().unwrap();
    for i in 0..table.len() {
        let mut record = vec![
            table.coords()[[i, 0]].to_string(),
            table.coords()[[i, 1]].to_string(),
            table.response()[i].to_string(),
            depth[i].to_string(),
        ];
        record.extend(table.covariates().row(i).iter().map(|v| v.to_string()));
        writer.write_record(&record).unwrap();
    }
    writer.flush().unwrap();

    let grid_path = dir.join("grid.csv");
    let mut writer = Writer::from_path(&grid_path).unwrap();
    let mut header = vec!["x".to_string(), "y".to_string()];
    header.extend(grid.names().iter().cloned());
    writer.write_record(&header).unwrap();
    let g = grid.geometry();
    for r in 0..g.nrows {
        for c in 0..g.ncols {
            let (x, y) = g.cell_center(r, c);
            let mut record = vec![x.to_string(), y.to_string()];
            for name in grid.names() {
                let v = grid.layer(name).unwrap()[[r, c]];
                record.push(if v.is_finite() { v.to_string() } else { String::new() });
            }
            writer.write_record(&record).unwrap();
        }
    }
    writer.flush().unwrap();

    (obs_path, grid_path)
}
