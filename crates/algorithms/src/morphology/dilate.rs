//! Binary dilation of boolean masks
//!
//! A cell becomes true when any cell under the structuring element is true.
//! Cells beyond the grid edge count as false (constant zero padding), so a
//! mask never grows from outside its extent.

use ndarray::Array2;

use crate::maybe_rayon::*;
use clearsky_core::{Algorithm, Error, Result};

use super::element::StructuringElement;

/// Parameters for binary dilation
#[derive(Debug, Clone, Default)]
pub struct DilateParams {
    /// Structuring element shape
    pub element: StructuringElement,
}

/// Binary dilation algorithm
#[derive(Debug, Clone, Default)]
pub struct Dilate;

impl Algorithm for Dilate {
    type Input = Array2<bool>;
    type Output = Array2<bool>;
    type Params = DilateParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Dilate"
    }

    fn description(&self) -> &'static str {
        "Binary dilation with zero padding (buffers masked regions)"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        dilate(&input, &params.element)
    }
}

/// Dilate a boolean mask by a structuring element.
pub fn dilate(mask: &Array2<bool>, element: &StructuringElement) -> Result<Array2<bool>> {
    element.validate()?;

    let (rows, cols) = mask.dim();
    let runs = element.runs();

    // prefix[r * (cols + 1) + c] = number of set cells in row r before column c
    let stride = cols + 1;
    let mut prefix = vec![0u32; rows * stride];
    for (r, row) in mask.rows().into_iter().enumerate() {
        let base = r * stride;
        for (c, &v) in row.iter().enumerate() {
            prefix[base + c + 1] = prefix[base + c] + u32::from(v);
        }
    }

    let output: Vec<bool> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![false; cols];
            let r = row as isize;
            for (col, out) in row_data.iter_mut().enumerate() {
                let c = col as isize;
                *out = runs.iter().any(|run| {
                    let rr = r + run.dr;
                    if rr < 0 || rr >= rows as isize {
                        return false;
                    }
                    let c0 = (c + run.dc_start).max(0);
                    let c1 = (c + run.dc_end).min(cols as isize - 1);
                    if c0 > c1 {
                        return false;
                    }
                    let base = rr as usize * stride;
                    prefix[base + c1 as usize + 1] > prefix[base + c0 as usize]
                });
            }
            row_data
        })
        .collect();

    Array2::from_shape_vec((rows, cols), output).map_err(|e| Error::Other(e.to_string()))
}
