//! Small numerical helpers shared by the modeling stages.

use itertools::Itertools;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance; `NaN` for fewer than two values.
pub fn variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Pearson correlation. A constant input has no defined correlation and yields 0.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    let ma = a.sum() / n;
    let mb = b.sum() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        sab += (x - ma) * (y - mb);
        saa += (x - ma).powi(2);
        sbb += (y - mb).powi(2);
    }
    if saa <= f64::EPSILON || sbb <= f64::EPSILON {
        return 0.0;
    }
    sab / (saa * sbb).sqrt()
}

/// Column-wise Pearson correlation matrix.
pub fn correlation_matrix(x: ArrayView2<f64>) -> Array2<f64> {
    let p = x.ncols();
    let mut corr = Array2::eye(p);
    for (i, j) in (0..p).tuple_combinations() {
        let r = pearson(x.column(i), x.column(j));
        corr[[i, j]] = r;
        corr[[j, i]] = r;
    }
    corr
}

/// Explained variance `1 - SSE/SST`; `NaN` when `y` is constant.
pub fn r_squared(y: ArrayView1<f64>, y_hat: ArrayView1<f64>) -> f64 {
    let m = match y.mean() {
        Some(m) => m,
        None => return f64::NAN,
    };
    let sst = y.mapv(|v| (v - m).powi(2)).sum();
    if sst <= f64::EPSILON {
        return f64::NAN;
    }
    let sse = (&y - &y_hat).pow2().sum();
    1.0 - sse / sst
}

/// Type-7 (linear interpolation) quantile of an already sorted slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * q;
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = h - lo as f64;
            sorted[lo] + frac * (sorted[hi] - sorted[lo])
        }
    }
}

pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, q)
}

fn ln_factorials(n: usize) -> Vec<f64> {
    let mut table = Vec::with_capacity(n + 1);
    let mut acc = 0.0;
    table.push(0.0);
    for i in 1..=n {
        acc += (i as f64).ln();
        table.push(acc);
    }
    table
}

fn fair_coin_pmf(n: usize) -> Vec<f64> {
    let lf = ln_factorials(n);
    let ln_half_n = n as f64 * std::f64::consts::LN_2;
    (0..=n)
        .map(|k| (lf[n] - lf[k] - lf[n - k] - ln_half_n).exp())
        .collect()
}

/// `P(X >= k)` for `X ~ Binomial(n, 0.5)`.
pub fn binomial_upper_tail(k: usize, n: usize) -> f64 {
    if k == 0 {
        return 1.0;
    }
    if k > n {
        return 0.0;
    }
    fair_coin_pmf(n)[k..].iter().sum::<f64>().min(1.0)
}

/// `P(X <= k)` for `X ~ Binomial(n, 0.5)`.
pub fn binomial_lower_tail(k: usize, n: usize) -> f64 {
    if k >= n {
        return 1.0;
    }
    fair_coin_pmf(n)[..=k].iter().sum::<f64>().min(1.0)
}

/// Inverse of the standard normal CDF (Acklam's rational approximation).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.38357751867269e2,
        -3.066479806614716e1,
        2.506628277459239,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838,
        -2.549732539343734,
        4.374664141464968,
        2.938163982698783,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996,
        3.754408661907416,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

fn poly(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Shapiro-Wilk W statistic using Royston's (1992) coefficient approximation.
///
/// Returns `NaN` for fewer than three values, non-finite input or a constant sample.
pub fn shapiro_wilk(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 3 || values.iter().any(|v| !v.is_finite()) {
        return f64::NAN;
    }
    let mut x = values.to_vec();
    x.sort_by(f64::total_cmp);

    let m_bar = mean(&x);
    let ss = x.iter().map(|v| (v - m_bar).powi(2)).sum::<f64>();
    if x[n - 1] == x[0] || !ss.is_finite() || ss <= 0.0 {
        return f64::NAN;
    }

    let a = if n == 3 {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        vec![-s, 0.0, s]
    } else {
        shapiro_wilk_coefficients(n)
    };

    let numerator = a.iter().zip(x.iter()).map(|(a, v)| a * v).sum::<f64>();
    (numerator.powi(2) / ss).min(1.0)
}

fn shapiro_wilk_coefficients(n: usize) -> Vec<f64> {
    const C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.07119, 4.434685, -2.706056];
    const C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];

    let nf = n as f64;
    let m: Vec<f64> = (1..=n)
        .map(|i| normal_quantile((i as f64 - 0.375) / (nf + 0.25)))
        .collect();
    let summ2 = m.iter().map(|v| v * v).sum::<f64>();
    let ssumm2 = summ2.sqrt();
    let u = 1.0 / nf.sqrt();

    let mut a = vec![0.0; n];
    let a_n = m[n - 1] / ssumm2 + poly(&C1, u);
    a[n - 1] = a_n;
    a[0] = -a_n;

    let (first_free, fac) = if n > 5 {
        let a_n1 = m[n - 2] / ssumm2 + poly(&C2, u);
        a[n - 2] = a_n1;
        a[1] = -a_n1;
        let fac = ((summ2 - 2.0 * m[n - 1].powi(2) - 2.0 * m[n - 2].powi(2))
            / (1.0 - 2.0 * a_n.powi(2) - 2.0 * a_n1.powi(2)))
        .sqrt();
        (2, fac)
    } else {
        let fac = ((summ2 - 2.0 * m[n - 1].powi(2)) / (1.0 - 2.0 * a_n.powi(2))).sqrt();
        (1, fac)
    };
    for i in first_free..(n - first_free) {
        a[i] = m[i] / fac;
    }
    a
}

/// Column means and standard deviations; a zero deviation is replaced by 1.
pub fn column_scaling(x: ArrayView2<f64>) -> (Vec<f64>, Vec<f64>) {
    x.axis_iter(Axis(1))
        .map(|col| {
            let values = col.to_vec();
            let sd = std_dev(&values);
            let sd = if sd.is_finite() && sd > 0.0 { sd } else { 1.0 };
            (mean(&values), sd)
        })
        .unzip()
}
