//! Spatial blocking for cross-validation.
//!
//! Observations are grouped into square or hexagonal blocks and whole blocks are dealt to
//! folds, so that a validation point never has a training neighbor from its own block.

use std::collections::BTreeMap;

use ndarray::ArrayView2;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::config::BlockShape;
use crate::error::{Error, Result, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldAssignment {
    folds: Vec<Fold>,
    fold_of: Vec<usize>,
    block_of: Vec<usize>,
    n_blocks: usize,
}

impl FoldAssignment {
    /// Builds folds from one fold label per observation; labels must cover `0..k`.
    pub fn from_labels(fold_of: Vec<usize>, k: usize) -> Result<Self> {
        if let Some(&bad) = fold_of.iter().find(|&&f| f >= k) {
            return Err(Error::configuration(
                Stage::Blocking,
                format!("fold label {bad} is out of range for {k} folds"),
            ));
        }
        let mut folds = vec![
            Fold {
                train: Vec::new(),
                validation: Vec::new(),
            };
            k
        ];
        for (obs, &f) in fold_of.iter().enumerate() {
            for (g, fold) in folds.iter_mut().enumerate() {
                if g == f {
                    fold.validation.push(obs);
                } else {
                    fold.train.push(obs);
                }
            }
        }
        if let Some(empty) = folds.iter().position(|f| f.validation.is_empty()) {
            return Err(Error::configuration(
                Stage::Blocking,
                format!("fold {empty} has no observations"),
            ));
        }
        let block_of = fold_of.clone();
        Ok(Self {
            folds,
            fold_of,
            block_of,
            n_blocks: k,
        })
    }

    pub fn k(&self) -> usize {
        self.folds.len()
    }

    pub fn len(&self) -> usize {
        self.fold_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fold_of.is_empty()
    }

    pub fn folds(&self) -> &[Fold] {
        &self.folds
    }

    pub fn fold_of(&self, obs: usize) -> usize {
        self.fold_of[obs]
    }

    pub fn block_of(&self, obs: usize) -> usize {
        self.block_of[obs]
    }

    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }
}

pub fn block_size_from_range(range: f64, multiplier: f64) -> f64 {
    range * multiplier
}

fn square_key(x: f64, y: f64, size: f64) -> (i64, i64) {
    ((x / size).floor() as i64, (y / size).floor() as i64)
}

/// Axial coordinates of the pointy-top hexagon containing `(x, y)`. `size` is the
/// flat-to-flat width, so the circumradius is `size / sqrt(3)`.
fn hexagon_key(x: f64, y: f64, size: f64) -> (i64, i64) {
    let radius = size / 3f64.sqrt();
    let q = (3f64.sqrt() / 3.0 * x - y / 3.0) / radius;
    let r = (2.0 / 3.0 * y) / radius;
    cube_round(q, r)
}

fn cube_round(q: f64, r: f64) -> (i64, i64) {
    let s = -q - r;
    let (mut rq, mut rr, rs) = (q.round(), r.round(), s.round());
    let (dq, dr, ds) = ((rq - q).abs(), (rr - r).abs(), (rs - s).abs());
    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }
    (rq as i64, rr as i64)
}

/// Groups observations into blocks, tiling from the minimum corner of their extent. Blocks
/// come back in key order, which is deterministic.
pub fn group_into_blocks(
    coords: ArrayView2<f64>,
    block_size: f64,
    shape: BlockShape,
) -> Vec<Vec<usize>> {
    let x_min = coords.column(0).fold(f64::INFINITY, |m, &v| m.min(v));
    let y_min = coords.column(1).fold(f64::INFINITY, |m, &v| m.min(v));

    let mut blocks: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (i, row) in coords.rows().into_iter().enumerate() {
        let (x, y) = (row[0] - x_min, row[1] - y_min);
        let key = match shape {
            BlockShape::Square => square_key(x, y, block_size),
            BlockShape::Hexagon => hexagon_key(x, y, block_size),
        };
        blocks.entry(key).or_default().push(i);
    }
    blocks.into_values().collect()
}

/// Assigns observations to `k` spatial folds. Blocks are shuffled, ordered by decreasing size
/// and each is dealt to the fold with the fewest observations so far.
pub fn assign_folds(
    coords: ArrayView2<f64>,
    k: usize,
    block_size: f64,
    shape: BlockShape,
    seed: u64,
) -> Result<FoldAssignment> {
    let n = coords.nrows();
    if coords.ncols() != 2 {
        return Err(Error::input(
            Stage::Blocking,
            format!("coordinates need 2 columns, got {}", coords.ncols()),
        ));
    }
    if k < 2 || k > n {
        return Err(Error::configuration(
            Stage::Blocking,
            format!("cannot form {k} folds from {n} observations"),
        ));
    }
    if !(block_size.is_finite() && block_size > 0.0) {
        return Err(Error::configuration(
            Stage::Blocking,
            format!("block size must be finite and positive, got {block_size}"),
        ));
    }

    let mut blocks = group_into_blocks(coords, block_size, shape);
    if blocks.len() < k {
        return Err(Error::configuration(
            Stage::Blocking,
            format!(
                "only {} non-empty blocks of size {:.2} for {} folds",
                blocks.len(),
                block_size,
                k
            ),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    blocks.shuffle(&mut rng);
    blocks.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut fold_sizes = vec![0usize; k];
    let mut fold_of = vec![0usize; n];
    let mut block_of = vec![0usize; n];
    for (b, members) in blocks.iter().enumerate() {
        let target = (0..k).min_by_key(|&f| (fold_sizes[f], f)).unwrap_or(0);
        fold_sizes[target] += members.len();
        for &obs in members {
            fold_of[obs] = target;
            block_of[obs] = b;
        }
    }

    let n_blocks = blocks.len();
    let mut assignment = FoldAssignment::from_labels(fold_of, k)?;
    assignment.block_of = block_of;
    assignment.n_blocks = n_blocks;

    log::info!(
        "Assigned {} observations in {} {:?} blocks of size {:.2} to {} folds (sizes {:?})",
        n,
        n_blocks,
        shape,
        block_size,
        k,
        fold_sizes
    );
    Ok(assignment)
}
