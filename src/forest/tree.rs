use ndarray::{ArrayView1, ArrayView2};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Keeps every in-bag response that reached the leaf.
    Leaf { mean: f64, values: Vec<f64> },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeSettings {
    pub mtry: usize,
    pub min_node_size: usize,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

#[derive(Debug)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    score: f64,
    decrease: f64,
}

fn leaf_from_rows(y: ArrayView1<f64>, rows: &[usize]) -> Node {
    let values: Vec<f64> = rows.iter().map(|&r| y[r]).collect();
    let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
    Node::Leaf { mean, values }
}

/// Best variance-reducing split among the first `mtry` features of a random ordering. When
/// none of those features can separate the rows the remaining features are tried in turn.
fn find_best_split<R: Rng + ?Sized>(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    rows: &[usize],
    mtry: usize,
    rng: &mut R,
) -> Option<SplitCandidate> {
    let n = rows.len() as f64;
    let total: f64 = rows.iter().map(|&r| y[r]).sum();
    let parent_score = total * total / n;

    let mut features: Vec<usize> = (0..x.ncols()).collect();
    features.shuffle(rng);

    let mut best: Option<SplitCandidate> = None;
    let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(rows.len());

    for (tried, &feature) in features.iter().enumerate() {
        if tried >= mtry && best.is_some() {
            break;
        }
        pairs.clear();
        pairs.extend(rows.iter().map(|&r| (x[[r, feature]], y[r])));
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        for i in 0..pairs.len() - 1 {
            left_sum += pairs[i].1;
            let (lo, hi) = (pairs[i].0, pairs[i + 1].0);
            if lo >= hi {
                continue;
            }
            let n_left = (i + 1) as f64;
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / n_left + right_sum * right_sum / (n - n_left);
            if best.as_ref().map_or(true, |b| score > b.score) {
                let mut threshold = 0.5 * (lo + hi);
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    score,
                    decrease: score - parent_score,
                });
            }
        }
    }
    best
}

impl RegressionTree {
    /// Grows a tree on `rows` of `(x, y)`. Also returns the total impurity decrease credited
    /// to each feature.
    pub fn grow<R: Rng + ?Sized>(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        rows: Vec<usize>,
        settings: &TreeSettings,
        rng: &mut R,
    ) -> (Self, Vec<f64>) {
        let mut impurity = vec![0.0; x.ncols()];
        let mut nodes = vec![Node::Leaf {
            mean: 0.0,
            values: Vec::new(),
        }];
        let mut stack = vec![(0usize, rows, 0usize)];

        while let Some((node_idx, rows, depth)) = stack.pop() {
            let splittable = rows.len() > settings.min_node_size.max(1)
                && settings.max_depth.map_or(true, |d| depth < d)
                && !is_constant(y, &rows);

            let split = if splittable {
                find_best_split(x, y, &rows, settings.mtry, rng)
            } else {
                None
            };

            match split {
                Some(best) => {
                    impurity[best.feature] += best.decrease.max(0.0);
                    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                        .iter()
                        .partition(|&&r| x[[r, best.feature]] <= best.threshold);

                    let left = nodes.len();
                    let right = left + 1;
                    let placeholder = Node::Leaf {
                        mean: 0.0,
                        values: Vec::new(),
                    };
                    nodes.push(placeholder.clone());
                    nodes.push(placeholder);
                    nodes[node_idx] = Node::Split {
                        feature: best.feature,
                        threshold: best.threshold,
                        left,
                        right,
                    };
                    stack.push((right, right_rows, depth + 1));
                    stack.push((left, left_rows, depth + 1));
                }
                None => nodes[node_idx] = leaf_from_rows(y, &rows),
            }
        }

        (RegressionTree { nodes }, impurity)
    }

    /// Leaf reached by a query whose feature `f` has value `feature(f)`.
    pub fn leaf_with<F: Fn(usize) -> f64>(&self, feature: F) -> (f64, &[f64]) {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature: f,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if feature(*f) <= *threshold { *left } else { *right };
                }
                Node::Leaf { mean, values } => return (*mean, values),
            }
        }
    }

    pub fn leaf(&self, row: ArrayView1<f64>) -> (f64, &[f64]) {
        self.leaf_with(|f| row[f])
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.leaf(row).0
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

fn is_constant(y: ArrayView1<f64>, rows: &[usize]) -> bool {
    match rows.first() {
        Some(&first) => rows.iter().all(|&r| y[r] == y[first]),
        None => true,
    }
}
