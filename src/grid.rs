/*! The national composite grid, cell selection, and the polar stereographic projection. */

use crate::{error::ConfigError, error::FormatError, RadRainResult};
use std::{
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

/** A decoded precipitation grid.

Values are stored row-major with row 0 at the geographic south, which is the payload order
of the composite format. Missing cells are NaN. */
#[derive(Debug, Clone)]
pub struct PrecipGrid {
    nrow: usize,
    ncol: usize,
    values: Vec<f32>,
}

impl PrecipGrid {
    pub fn new(nrow: usize, ncol: usize, values: Vec<f32>) -> RadRainResult<PrecipGrid> {
        if values.len() != nrow * ncol {
            return Err(FormatError::new(format!(
                "payload holds {} cells but the grid is {}x{}",
                values.len(),
                nrow,
                ncol
            ))
            .into());
        }
        Ok(PrecipGrid { nrow, ncol, values })
    }

    pub fn nrow(&self) -> usize {
        self.nrow
    }

    pub fn ncol(&self) -> usize {
        self.ncol
    }

    /// The raw cell values, row-major with row 0 at the geographic south.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /**
     * Clip the grid down to the study area.
     *
     * Cell ids address the grid in north-up reading order (row 0 at the geographic north,
     * then flattened row-major), so the rows are reversed before gathering. The output
     * preserves the id order, making every clipped row of an archive directly comparable
     * cell by cell.
     */
    pub fn to_clipped_row(&self, ids: &CellIds) -> RadRainResult<Vec<f32>> {
        let ncell = self.nrow * self.ncol;
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids.as_slice() {
            let id = id as usize;
            if id >= ncell {
                return Err(ConfigError::new(format!(
                    "cell id {} outside the {}x{} grid",
                    id, self.nrow, self.ncol
                ))
                .into());
            }
            // Flip the row index to read the grid north-up.
            let row = self.nrow - 1 - id / self.ncol;
            let col = id % self.ncol;
            out.push(self.values[row * self.ncol + col]);
        }
        Ok(out)
    }
}

/** The cell ids selecting the study area from the national grid.

Ids index the north-up flattened grid and keep their order through the whole pipeline, so a
clipped row can always be mapped back onto the map. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellIds {
    ids: Vec<u32>,
}

impl CellIds {
    pub fn new(ids: Vec<u32>) -> CellIds {
        CellIds { ids }
    }

    /// The identity selection: every cell of an nrow x ncol grid in north-up reading order.
    pub fn full_grid(nrow: usize, ncol: usize) -> CellIds {
        CellIds {
            ids: (0..(nrow * ncol) as u32).collect(),
        }
    }

    /// Load a cell id list from a text file, one id per line. Blank lines are skipped.
    pub fn from_file<P: AsRef<Path>>(path: P) -> RadRainResult<CellIds> {
        let file = std::fs::File::open(path.as_ref())?;
        let mut ids = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let id: u32 = trimmed
                .parse()
                .map_err(|_| ConfigError::new(format!("bad cell id {:?}", trimmed)))?;
            ids.push(id);
        }
        Ok(CellIds { ids })
    }

    /// Write the id list as a text file, one id per line.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> RadRainResult<()> {
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        for id in &self.ids {
            writeln!(writer, "{}", id)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.ids
    }
}

/// Earth radius of the RADOLAN projection sphere in km.
const EARTH_RADIUS_KM: f64 = 6370.04;
/// Latitude of projection true scale, 60 degrees north.
const PHI_0: f64 = 60.0;
/// Central meridian, 10 degrees east.
const LAMBDA_0: f64 = 10.0;

/**
 * Project geographic coordinates onto the RADOLAN polar stereographic plane.
 *
 * Input is (longitude, latitude) in degrees, output is (x, y) in km on the plane whose
 * origin sits at the north pole with the 10E meridian pointing down.
 */
pub fn degree_to_stereographic(lon: f64, lat: f64) -> (f64, f64) {
    let phi = lat.to_radians();
    let lambda = lon.to_radians();
    let phi_0 = PHI_0.to_radians();
    let lambda_0 = LAMBDA_0.to_radians();

    let m = (1.0 + phi_0.sin()) / (1.0 + phi.sin());
    let x = EARTH_RADIUS_KM * m * phi.cos() * (lambda - lambda_0).sin();
    let y = -EARTH_RADIUS_KM * m * phi.cos() * (lambda - lambda_0).cos();

    (x, y)
}
