//! CSV and TOML files for the command-line binary.
//!
//! Tables are expected in a projected coordinate system with `x` and `y` columns; no
//! reprojection or geometry happens here.

use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use ndarray::{Array1, Array2};

use crate::data::{CovariateGrid, GridGeometry, ObservationTable, Raster};
use crate::error::{Error, Result, Stage};
use crate::pipeline::ValidationSummary;

const X_COLUMN: &str = "x";
const Y_COLUMN: &str = "y";

fn column(headers: &StringRecord, name: &str) -> Result<usize> {
    headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
        Error::input(
            Stage::Input,
            format!("column '{name}' not found in header {headers:?}"),
        )
    })
}

fn parse_cell(record: &StringRecord, idx: usize) -> Option<f64> {
    record
        .get(idx)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Reads point observations. Every column other than the coordinates, the response and the
/// optional depth is a covariate. Rows with an empty or unparseable cell are skipped.
pub fn read_observations(
    path: impl AsRef<Path>,
    response_column: &str,
    depth_column: Option<&str>,
) -> Result<ObservationTable> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path.as_ref())?;
    let headers = reader.headers()?.clone();

    let x_idx = column(&headers, X_COLUMN)?;
    let y_idx = column(&headers, Y_COLUMN)?;
    let response_idx = column(&headers, response_column)?;
    let depth_idx = depth_column.map(|d| column(&headers, d)).transpose()?;

    let covariate_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| i != x_idx && i != y_idx && i != response_idx && Some(i) != depth_idx)
        .collect();
    let names: Vec<String> = covariate_idx
        .iter()
        .map(|&i| headers[i].trim().to_string())
        .collect();

    let mut coords = Vec::new();
    let mut response = Vec::new();
    let mut depth = Vec::new();
    let mut covariates = Vec::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = record?;
        let parsed = (|| {
            let x = parse_cell(&record, x_idx)?;
            let y = parse_cell(&record, y_idx)?;
            let r = parse_cell(&record, response_idx)?;
            let d = match depth_idx {
                Some(i) => Some(parse_cell(&record, i)?),
                None => None,
            };
            let cov = covariate_idx
                .iter()
                .map(|&i| parse_cell(&record, i))
                .collect::<Option<Vec<f64>>>()?;
            Some((x, y, r, d, cov))
        })();
        match parsed {
            Some((x, y, r, d, cov)) => {
                coords.extend([x, y]);
                response.push(r);
                depth.extend(d);
                covariates.extend(cov);
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!(
            "Skipped {} observation rows with missing or unparseable values",
            skipped
        );
    }

    let n = response.len();
    let shape_error = |e: ndarray::ShapeError| Error::input(Stage::Input, e.to_string());
    let table = ObservationTable::new(
        Array2::from_shape_vec((n, 2), coords).map_err(shape_error)?,
        Array1::from(response),
        Array2::from_shape_vec((n, names.len()), covariates).map_err(shape_error)?,
        names,
    )?;
    log::info!(
        "Read {} observations with {} covariates from {}",
        table.len(),
        table.names().len(),
        path.as_ref().display()
    );
    match depth_idx {
        Some(_) => table.with_depth(Array1::from(depth)),
        None => Ok(table),
    }
}

/// Smallest positive gap between sorted distinct values.
fn min_spacing(sorted: &[f64]) -> Option<f64> {
    sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&d| d > 0.0)
        .reduce(f64::min)
}

type GridPoint = (f64, f64, Vec<f64>);

/// Cell centers with their layer values, and the number of rows without usable coordinates.
fn grid_points<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
    x_idx: usize,
    y_idx: usize,
    layer_idx: &[usize],
) -> Result<(Vec<GridPoint>, usize)> {
    let mut points = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        let (Some(x), Some(y)) = (parse_cell(&record, x_idx), parse_cell(&record, y_idx)) else {
            skipped += 1;
            continue;
        };
        let values = layer_idx
            .iter()
            .map(|&i| parse_cell(&record, i).unwrap_or(f64::NAN))
            .collect();
        points.push((x, y, values));
    }
    Ok((points, skipped))
}

/// Reads an XYZ table (`x`, `y`, one column per layer) of cell centers onto a regular grid.
/// Cells missing from the table, or with unparseable values, are nodata. Rows without usable
/// coordinates are skipped with a warning.
pub fn read_grid(path: impl AsRef<Path>) -> Result<CovariateGrid> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let x_idx = column(&headers, X_COLUMN)?;
    let y_idx = column(&headers, Y_COLUMN)?;
    let layer_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| i != x_idx && i != y_idx)
        .collect();
    let names: Vec<String> = layer_idx
        .iter()
        .map(|&i| headers[i].trim().to_string())
        .collect();

    let (points, skipped) = grid_points(&mut reader, x_idx, y_idx, &layer_idx)?;
    if skipped > 0 {
        log::warn!(
            "Skipped {} grid rows with missing or unparseable coordinates",
            skipped
        );
    }
    if points.is_empty() {
        return Err(Error::input(Stage::Input, "grid table has no cells"));
    }

    let mut xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let mut ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    ys.sort_by(f64::total_cmp);
    ys.dedup();
    let cell_size = match (min_spacing(&xs), min_spacing(&ys)) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => {
            return Err(Error::input(
                Stage::Input,
                "cannot infer a cell size from a single grid cell",
            ))
        }
    };

    let (x_min, x_max) = (xs[0], xs[xs.len() - 1]);
    let (y_min, y_max) = (ys[0], ys[ys.len() - 1]);
    let geometry = GridGeometry {
        nrows: ((y_max - y_min) / cell_size).round() as usize + 1,
        ncols: ((x_max - x_min) / cell_size).round() as usize + 1,
        x_origin: x_min,
        y_origin: y_max,
        cell_size,
    };

    let mut layers = vec![Array2::from_elem(geometry.shape(), f64::NAN); names.len()];
    for (x, y, values) in &points {
        let row = ((y_max - y) / cell_size).round() as usize;
        let col = ((x - x_min) / cell_size).round() as usize;
        for (layer, &v) in layers.iter_mut().zip(values) {
            layer[[row, col]] = v;
        }
    }
    log::info!(
        "Read {}x{} grid ({} cells listed) with {} layers from {}",
        geometry.nrows,
        geometry.ncols,
        points.len(),
        names.len(),
        path.as_ref().display()
    );
    CovariateGrid::new(geometry, names, layers)
}

/// Writes named rasters sharing one geometry as `row,col,x,y,<layer>...`. Cells where every
/// layer is nodata are left out and nodata values are written as empty fields.
pub fn write_raster_table(path: impl AsRef<Path>, layers: &[(&str, &Raster)]) -> Result<()> {
    let Some((_, first)) = layers.first() else {
        return Err(Error::input(Stage::Prediction, "no rasters to write"));
    };
    let geometry = first.geometry;
    if layers.iter().any(|(_, r)| r.geometry != geometry) {
        return Err(Error::input(
            Stage::Prediction,
            "rasters written together must share one geometry",
        ));
    }

    let mut writer = WriterBuilder::new().from_path(path.as_ref())?;
    let mut header = vec!["row", "col", "x", "y"];
    header.extend(layers.iter().map(|(name, _)| *name));
    writer.write_record(&header)?;

    for row in 0..geometry.nrows {
        for col in 0..geometry.ncols {
            if layers.iter().all(|(_, r)| !r.values[[row, col]].is_finite()) {
                continue;
            }
            let (x, y) = geometry.cell_center(row, col);
            let mut record = vec![row.to_string(), col.to_string(), x.to_string(), y.to_string()];
            record.extend(layers.iter().map(|(_, r)| {
                let v = r.values[[row, col]];
                if v.is_finite() {
                    v.to_string()
                } else {
                    String::new()
                }
            }));
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary(path: impl AsRef<Path>, summary: &ValidationSummary) -> Result<()> {
    fs::write(path, toml::to_string_pretty(summary)?)?;
    Ok(())
}

pub fn read_summary(path: impl AsRef<Path>) -> Result<ValidationSummary> {
    Ok(toml::from_str(&fs::read_to_string(path)?)?)
}
