use ndarray::{Array1, Array2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// `y = sum_j (j + 1) * x_j + noise` with uniform features on `[0, 1)`.
pub fn linear_signal(n: usize, p: usize, noise_sd: f64, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, noise_sd).unwrap();
    let x = Array2::from_shape_fn((n, p), |_| rng.gen::<f64>());
    let y = Array1::from_shape_fn(n, |i| {
        (0..p).map(|j| (j + 1) as f64 * x[[i, j]]).sum::<f64>() + noise.sample(&mut rng)
    });
    (x, y)
}

/// Twenty rows with distinct feature values.
pub fn setup_data_hardcoded() -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((20, 2), |(i, j)| {
        let i = i as f64;
        if j == 0 {
            (i * 0.37).sin() * 3.0 + i * 0.01
        } else {
            (i * 1.3).cos() * 2.0 - i * 0.02
        }
    });
    let y = Array1::from_shape_fn(20, |i| x[[i, 0]] * 1.5 - x[[i, 1]] + i as f64 * 0.001);
    (x, y)
}

/// `n_informative` columns drive the response, the following `n_noise` columns are
/// independent of it.
pub fn informative_and_noise(
    n: usize,
    n_informative: usize,
    n_noise: usize,
    seed: u64,
) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.1).unwrap();
    let p = n_informative + n_noise;
    let x = Array2::from_shape_fn((n, p), |_| rng.gen::<f64>());
    let y = Array1::from_shape_fn(n, |i| {
        (0..n_informative).map(|j| 2.0 * x[[i, j]]).sum::<f64>() + noise.sample(&mut rng)
    });
    (x, y)
}

/// Points on a `side x side` lattice with the given spacing.
pub fn lattice(side: usize, spacing: f64) -> Array2<f64> {
    Array2::from_shape_fn((side * side, 2), |(i, j)| {
        if j == 0 {
            (i % side) as f64 * spacing
        } else {
            (i / side) as f64 * spacing
        }
    })
}

/// Random locations in a `extent x extent` square and a positive, spatially smooth response
/// (log-normal around a sinusoidal trend).
pub fn spatial_field(n: usize, extent: f64, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.05).unwrap();
    let coords = Array2::from_shape_fn((n, 2), |_| rng.gen::<f64>() * extent);
    let wavelength = extent / 2.0;
    let y = Array1::from_shape_fn(n, |i| {
        let (cx, cy) = (coords[[i, 0]], coords[[i, 1]]);
        let trend = (cx / wavelength * std::f64::consts::PI).sin()
            + (cy / wavelength * std::f64::consts::PI).cos();
        (0.5 * trend + noise.sample(&mut rng)).exp()
    });
    (coords, y)
}
