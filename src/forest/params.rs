use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceMode {
    #[default]
    None,
    Impurity,
    Permutation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QrfParams {
    pub n_trees: usize,
    /// Features tried per split; `None` means `floor(sqrt(p))`.
    pub mtry: Option<usize>,
    /// Nodes with this many rows or fewer become leaves.
    pub min_node_size: usize,
    pub max_depth: Option<usize>,
    pub sample_fraction: f64,
    pub replace: bool,
    pub importance: ImportanceMode,
}

impl QrfParams {
    /// Resolves `mtry` for `n_features` columns.
    pub fn resolved_mtry(&self, n_features: usize) -> usize {
        self.mtry
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
            .clamp(1, n_features.max(1))
    }
}

// Builder for QrfParams
#[derive(Debug, Clone)]
pub struct QrfParamsBuilder {
    n_trees: usize,
    mtry: Option<usize>,
    min_node_size: usize,
    max_depth: Option<usize>,
    sample_fraction: f64,
    replace: bool,
    importance: ImportanceMode,
}

impl QrfParamsBuilder {
    pub fn new() -> Self {
        Self {
            n_trees: 500,
            mtry: None,
            min_node_size: 5,
            max_depth: None,
            sample_fraction: 0.632,
            replace: false,
            importance: ImportanceMode::None,
        }
    }

    pub fn n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    pub fn mtry(mut self, mtry: usize) -> Self {
        self.mtry = Some(mtry);
        self
    }

    pub fn min_node_size(mut self, min_node_size: usize) -> Self {
        self.min_node_size = min_node_size;
        self
    }

    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn sample_fraction(mut self, sample_fraction: f64) -> Self {
        self.sample_fraction = sample_fraction;
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn importance(mut self, importance: ImportanceMode) -> Self {
        self.importance = importance;
        self
    }

    pub fn build(self) -> QrfParams {
        QrfParams {
            n_trees: self.n_trees,
            mtry: self.mtry,
            min_node_size: self.min_node_size,
            max_depth: self.max_depth,
            sample_fraction: self.sample_fraction,
            replace: self.replace,
            importance: self.importance,
        }
    }
}

impl Default for QrfParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for QrfParams {
    fn default() -> Self {
        QrfParamsBuilder::new().build()
    }
}
