use serde::{Deserialize, Serialize};

use super::empirical::EmpiricalVariogram;

const RANGE_GRID_STEPS: usize = 60;
const GOLDEN_ITERATIONS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariogramModel {
    Spherical,
    Exponential,
    Gaussian,
}

impl VariogramModel {
    pub const ALL: [VariogramModel; 3] = [
        VariogramModel::Spherical,
        VariogramModel::Exponential,
        VariogramModel::Gaussian,
    ];

    /// Unit-sill structure function at lag `h` for range parameter `range`.
    pub fn structure(&self, h: f64, range: f64) -> f64 {
        let r = h / range;
        match self {
            VariogramModel::Spherical => {
                if r >= 1.0 {
                    1.0
                } else {
                    1.5 * r - 0.5 * r.powi(3)
                }
            }
            VariogramModel::Exponential => 1.0 - (-r).exp(),
            VariogramModel::Gaussian => 1.0 - (-r * r).exp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelFit {
    pub model: VariogramModel,
    pub nugget: f64,
    pub partial_sill: f64,
    pub range: f64,
    /// Weighted sum of squared residuals against the empirical variogram.
    pub wsse: f64,
}

impl ModelFit {
    pub fn semivariance(&self, h: f64) -> f64 {
        if h <= 0.0 {
            return 0.0;
        }
        self.nugget + self.partial_sill * self.model.structure(h, self.range)
    }
}

struct WeightedPoint {
    h: f64,
    gamma: f64,
    w: f64,
}

/// Best non-negative `(nugget, partial_sill)` for a fixed range, with its weighted SSE.
fn solve_sills(model: VariogramModel, range: f64, points: &[WeightedPoint]) -> (f64, f64, f64) {
    let (mut sw, mut ss, mut sss, mut sg, mut ssg) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        let s = model.structure(p.h, range);
        sw += p.w;
        ss += p.w * s;
        sss += p.w * s * s;
        sg += p.w * p.gamma;
        ssg += p.w * s * p.gamma;
    }
    let wsse = |c0: f64, c1: f64| -> f64 {
        points
            .iter()
            .map(|p| p.w * (p.gamma - c0 - c1 * model.structure(p.h, range)).powi(2))
            .sum()
    };

    // The minimum of a convex quadratic over the positive quadrant lies in the interior or on
    // one of the two axes.
    let mut candidates = vec![(0.0, 0.0)];
    let det = sw * sss - ss * ss;
    if det.abs() > 1e-12 * sw * sss {
        let c0 = (sss * sg - ss * ssg) / det;
        let c1 = (sw * ssg - ss * sg) / det;
        if c0 >= 0.0 && c1 >= 0.0 {
            candidates.push((c0, c1));
        }
    }
    if sss > 0.0 {
        candidates.push((0.0, (ssg / sss).max(0.0)));
    }
    if sw > 0.0 {
        candidates.push(((sg / sw).max(0.0), 0.0));
    }

    candidates
        .into_iter()
        .map(|(c0, c1)| (c0, c1, wsse(c0, c1)))
        .fold((0.0, 0.0, f64::INFINITY), |best, cand| {
            if cand.2 < best.2 {
                cand
            } else {
                best
            }
        })
}

/// Weighted least-squares fit with weights `N(h) / h^2`. The range is searched on a grid over
/// `(0, 2 * cutoff]` and refined by golden-section search around the best grid point.
pub fn fit_model(model: VariogramModel, variogram: &EmpiricalVariogram) -> Option<ModelFit> {
    let points: Vec<WeightedPoint> = variogram
        .bins
        .iter()
        .filter(|b| b.distance > 0.0)
        .map(|b| WeightedPoint {
            h: b.distance,
            gamma: b.semivariance,
            w: b.n_pairs as f64 / (b.distance * b.distance),
        })
        .collect();
    if points.is_empty() || !(variogram.cutoff > 0.0) {
        return None;
    }

    let max_range = 2.0 * variogram.cutoff;
    let objective = |range: f64| solve_sills(model, range, &points).2;

    let grid_step = max_range / RANGE_GRID_STEPS as f64;
    let best_k = (1..=RANGE_GRID_STEPS)
        .map(|k| (k, objective(k as f64 * grid_step)))
        .fold((1, f64::INFINITY), |best, (k, v)| if v < best.1 { (k, v) } else { best })
        .0;

    let mut lo = (best_k as f64 - 1.0) * grid_step;
    let mut hi = ((best_k + 1) as f64 * grid_step).min(max_range);
    lo = lo.max(grid_step * 1e-3);
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let mut a = hi - inv_phi * (hi - lo);
    let mut b = lo + inv_phi * (hi - lo);
    let (mut fa, mut fb) = (objective(a), objective(b));
    for _ in 0..GOLDEN_ITERATIONS {
        if fa < fb {
            hi = b;
            b = a;
            fb = fa;
            a = hi - inv_phi * (hi - lo);
            fa = objective(a);
        } else {
            lo = a;
            a = b;
            fa = fb;
            b = lo + inv_phi * (hi - lo);
            fb = objective(b);
        }
    }

    let grid_range = best_k as f64 * grid_step;
    let refined = (lo + hi) / 2.0;
    let range = if objective(refined) <= objective(grid_range) {
        refined
    } else {
        grid_range
    };
    let (nugget, partial_sill, wsse) = solve_sills(model, range, &points);

    let fit = ModelFit {
        model,
        nugget,
        partial_sill,
        range,
        wsse,
    };
    [fit.nugget, fit.partial_sill, fit.range, fit.wsse]
        .iter()
        .all(|v| v.is_finite())
        .then_some(fit)
}
