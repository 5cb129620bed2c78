//! In-memory inputs and outputs of the modeling core.
//!
//! Observations arrive already projected and sampled against the covariate layers; the grid
//! arrives already reprojected and masked. Nothing here performs geometry beyond mapping a
//! raster cell index to its center coordinate.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Error, Result, Stage};

/// Point observations: projected coordinates, response and sampled covariates.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    coords: Array2<f64>,
    depth: Option<Array1<f64>>,
    response: Array1<f64>,
    covariates: Array2<f64>,
    names: Vec<String>,
}

impl ObservationTable {
    /// Builds a table, rejecting shape mismatches and any non-finite value.
    pub fn new(
        coords: Array2<f64>,
        response: Array1<f64>,
        covariates: Array2<f64>,
        names: Vec<String>,
    ) -> Result<Self> {
        let n = response.len();
        if coords.nrows() != n || coords.ncols() != 2 {
            return Err(Error::input(
                Stage::Input,
                format!(
                    "coordinates must be {n}x2 but were {}x{}",
                    coords.nrows(),
                    coords.ncols()
                ),
            ));
        }
        if covariates.nrows() != n {
            return Err(Error::input(
                Stage::Input,
                format!(
                    "covariate matrix has {} rows for {n} responses",
                    covariates.nrows()
                ),
            ));
        }
        if covariates.ncols() != names.len() {
            return Err(Error::input(
                Stage::Input,
                format!(
                    "{} covariate names for {} covariate columns",
                    names.len(),
                    covariates.ncols()
                ),
            ));
        }
        if coords.iter().any(|v| !v.is_finite()) {
            return Err(Error::input(Stage::Input, "non-finite coordinate"));
        }
        if response.iter().any(|v| !v.is_finite()) {
            return Err(Error::input(Stage::Input, "missing or non-finite response"));
        }
        for (j, col) in covariates.axis_iter(Axis(1)).enumerate() {
            if col.iter().any(|v| !v.is_finite()) {
                return Err(Error::input(
                    Stage::Input,
                    format!("missing or non-finite values in covariate '{}'", names[j]),
                ));
            }
        }
        Ok(Self {
            coords,
            depth: None,
            response,
            covariates,
            names,
        })
    }

    /// Attaches the sample depth of every observation.
    pub fn with_depth(mut self, depth: Array1<f64>) -> Result<Self> {
        if depth.len() != self.len() || depth.iter().any(|v| !v.is_finite()) {
            return Err(Error::input(
                Stage::Input,
                "depth column must be complete and match the observation count",
            ));
        }
        self.depth = Some(depth);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.response.len()
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    pub fn coords(&self) -> ArrayView2<f64> {
        self.coords.view()
    }

    pub fn response(&self) -> ArrayView1<f64> {
        self.response.view()
    }

    pub fn covariates(&self) -> ArrayView2<f64> {
        self.covariates.view()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn depth(&self) -> Option<ArrayView1<f64>> {
        self.depth.as_ref().map(|d| d.view())
    }

    pub fn column_indices(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.names.iter().position(|n| n == name).ok_or_else(|| {
                    Error::input(Stage::Input, format!("unknown covariate '{name}'"))
                })
            })
            .collect()
    }

    /// Covariate columns in the order of `names`.
    pub fn select(&self, names: &[String]) -> Result<Array2<f64>> {
        let idx = self.column_indices(names)?;
        Ok(self.covariates.select(Axis(1), &idx))
    }

    pub fn filter_rows(&self, rows: &[usize]) -> Self {
        Self {
            coords: self.coords.select(Axis(0), rows),
            depth: self.depth.as_ref().map(|d| d.select(Axis(0), rows)),
            response: self.response.select(Axis(0), rows),
            covariates: self.covariates.select(Axis(0), rows),
            names: self.names.clone(),
        }
    }

    /// Keeps observations whose depth lies in `[lower, upper]`. Tables without depth are
    /// returned unchanged.
    pub fn within_depth(&self, lower: f64, upper: f64) -> Self {
        match &self.depth {
            Some(depth) => {
                let rows: Vec<usize> = depth
                    .indexed_iter()
                    .filter(|(_, &d)| d >= lower && d <= upper)
                    .map(|(i, _)| i)
                    .collect();
                self.filter_rows(&rows)
            }
            None => self.clone(),
        }
    }
}

/// Regular north-up grid. The origin is the center of the upper-left cell and rows run
/// southwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub nrows: usize,
    pub ncols: usize,
    pub x_origin: f64,
    pub y_origin: f64,
    pub cell_size: f64,
}

impl GridGeometry {
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.x_origin + col as f64 * self.cell_size,
            self.y_origin - row as f64 * self.cell_size,
        )
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }
}

/// A single-band raster; `NaN` marks nodata.
#[derive(Debug, Clone)]
pub struct Raster {
    pub geometry: GridGeometry,
    pub values: Array2<f64>,
}

impl Raster {
    pub fn nodata(geometry: GridGeometry) -> Self {
        Self {
            geometry,
            values: Array2::from_elem(geometry.shape(), f64::NAN),
        }
    }

    /// Scatters per-cell values into a raster; cells not listed stay nodata.
    pub fn from_cells(geometry: GridGeometry, cells: &[(usize, usize)], values: &[f64]) -> Self {
        let mut raster = Self::nodata(geometry);
        for (&cell, &v) in cells.iter().zip(values) {
            raster.values[cell] = v;
        }
        raster
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }
}

/// Named covariate layers over one shared geometry.
#[derive(Debug, Clone)]
pub struct CovariateGrid {
    geometry: GridGeometry,
    names: Vec<String>,
    layers: Vec<Array2<f64>>,
}

impl CovariateGrid {
    pub fn new(geometry: GridGeometry, names: Vec<String>, layers: Vec<Array2<f64>>) -> Result<Self> {
        if names.len() != layers.len() {
            return Err(Error::input(
                Stage::Input,
                format!("{} layer names for {} layers", names.len(), layers.len()),
            ));
        }
        if !(geometry.cell_size.is_finite() && geometry.cell_size > 0.0) {
            return Err(Error::input(Stage::Input, "grid cell size must be positive"));
        }
        for (name, layer) in names.iter().zip(&layers) {
            if layer.dim() != geometry.shape() {
                return Err(Error::input(
                    Stage::Input,
                    format!(
                        "layer '{name}' has shape {:?}, expected {:?}",
                        layer.dim(),
                        geometry.shape()
                    ),
                ));
            }
        }
        Ok(Self {
            geometry,
            names,
            layers,
        })
    }

    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn layer(&self, name: &str) -> Option<&Array2<f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.layers[i])
    }

    /// Feature rows for every cell where all requested layers are finite, with the cell index
    /// of each row.
    pub fn feature_matrix(&self, names: &[String]) -> Result<(Array2<f64>, Vec<(usize, usize)>)> {
        let layers = names
            .iter()
            .map(|name| {
                self.layer(name).ok_or_else(|| {
                    Error::input(
                        Stage::Prediction,
                        format!("covariate grid has no layer '{name}'"),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut cells = Vec::new();
        let mut values = Vec::new();
        for row in 0..self.geometry.nrows {
            for col in 0..self.geometry.ncols {
                if layers.iter().all(|l| l[[row, col]].is_finite()) {
                    cells.push((row, col));
                    values.extend(layers.iter().map(|l| l[[row, col]]));
                }
            }
        }
        let x = Array2::from_shape_vec((cells.len(), names.len()), values)
            .map_err(|e| Error::input(Stage::Prediction, e.to_string()))?;
        Ok((x, cells))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rejects_missing_covariate() {
        let res = ObservationTable::new(
            array![[0.0, 0.0], [1.0, 1.0]],
            array![1.0, 2.0],
            array![[1.0], [f64::NAN]],
            names(&["bathy"]),
        );
        assert!(matches!(res, Err(Error::Input { .. })));
    }

    #[test]
    fn test_depth_filter_and_select() {
        let table = ObservationTable::new(
            array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]],
            array![1.0, 2.0, 3.0],
            array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]],
            names(&["a", "b"]),
        )
        .unwrap()
        .with_depth(array![0.0, 5.0, 50.0])
        .unwrap();

        let shallow = table.within_depth(0.0, 10.0);
        assert_eq!(shallow.len(), 2);
        let b = shallow.select(&names(&["b"])).unwrap();
        assert_eq!(b, array![[10.0], [20.0]]);
        assert!(table.select(&names(&["c"])).is_err());
    }

    #[test]
    fn test_feature_matrix_skips_nodata() {
        let geometry = GridGeometry {
            nrows: 2,
            ncols: 2,
            x_origin: 0.5,
            y_origin: 1.5,
            cell_size: 1.0,
        };
        let grid = CovariateGrid::new(
            geometry,
            names(&["a", "b"]),
            vec![
                array![[1.0, 2.0], [3.0, f64::NAN]],
                array![[5.0, 6.0], [7.0, 8.0]],
            ],
        )
        .unwrap();
        let (x, cells) = grid.feature_matrix(&names(&["b", "a"])).unwrap();
        assert_eq!(cells, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(x.row(2).to_vec(), vec![7.0, 3.0]);
        assert_eq!(geometry.cell_center(1, 1), (1.5, 0.5));

        let raster = Raster::from_cells(geometry, &cells, &[1.0, 2.0, 3.0]);
        assert_eq!(raster.valid_count(), 3);
        assert!(raster.values[[1, 1]].is_nan());
    }
}
