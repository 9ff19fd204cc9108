//! Structuring elements for binary morphology
//!
//! A structuring element is a set of `(dr, dc)` offsets around the centre
//! cell. Dilation walks it as horizontal runs so that each run costs one
//! prefix-sum lookup instead of one test per cell.

use clearsky_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Shape of a structuring element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuringElement {
    /// Square element of given radius (side = 2*radius + 1)
    Square(usize),
    /// Disk of given radius: every cell within `radius` of the centre
    Disk(usize),
    /// User-provided boolean mask (must be odd-sized and square)
    Custom(Vec<Vec<bool>>),
}

impl Default for StructuringElement {
    fn default() -> Self {
        StructuringElement::Disk(12)
    }
}

/// One horizontal run of an element: row offset plus inclusive column span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub dr: isize,
    pub dc_start: isize,
    pub dc_end: isize,
}

impl StructuringElement {
    /// Validate the structuring element
    pub fn validate(&self) -> Result<()> {
        match self {
            StructuringElement::Square(_) | StructuringElement::Disk(_) => Ok(()),
            StructuringElement::Custom(mask) => {
                if mask.is_empty() {
                    return Err(Error::InvalidParameter {
                        name: "custom_mask",
                        value: "empty".to_string(),
                        reason: "custom mask must not be empty".to_string(),
                    });
                }
                let size = mask.len();
                if size % 2 == 0 {
                    return Err(Error::InvalidParameter {
                        name: "custom_mask",
                        value: format!("{}x{}", size, size),
                        reason: "custom mask size must be odd".to_string(),
                    });
                }
                if let Some(row) = mask.iter().find(|row| row.len() != size) {
                    return Err(Error::InvalidParameter {
                        name: "custom_mask",
                        value: format!("row length {}", row.len()),
                        reason: format!("custom mask must be square (expected {})", size),
                    });
                }
                Ok(())
            }
        }
    }

    /// Radius of the element's bounding square
    pub fn radius(&self) -> usize {
        match self {
            StructuringElement::Square(r) | StructuringElement::Disk(r) => *r,
            StructuringElement::Custom(mask) => mask.len() / 2,
        }
    }

    /// `(dr, dc)` offsets of all active cells, row-major
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        match self {
            StructuringElement::Square(r) => window_offsets(*r, |_, _| true),
            StructuringElement::Disk(r) => {
                let r2 = (*r * *r) as isize;
                window_offsets(*r, |dr, dc| dr * dr + dc * dc <= r2)
            }
            StructuringElement::Custom(mask) => {
                let center = (mask.len() / 2) as isize;
                let mut offsets = Vec::new();
                for (r, row) in mask.iter().enumerate() {
                    for (c, &active) in row.iter().enumerate() {
                        if active {
                            offsets.push((r as isize - center, c as isize - center));
                        }
                    }
                }
                offsets
            }
        }
    }

    /// Active cells grouped into maximal horizontal runs
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = Vec::new();
        for (dr, dc) in self.offsets() {
            match runs.last_mut() {
                Some(run) if run.dr == dr && run.dc_end + 1 == dc => run.dc_end = dc,
                _ => runs.push(Run {
                    dr,
                    dc_start: dc,
                    dc_end: dc,
                }),
            }
        }
        runs
    }
}

/// Offsets of the `(2r+1)^2` window accepted by `keep`, row-major
fn window_offsets(r: usize, keep: impl Fn(isize, isize) -> bool) -> Vec<(isize, isize)> {
    let r = r as isize;
    (-r..=r)
        .flat_map(|dr| (-r..=r).map(move |dc| (dr, dc)))
        .filter(|&(dr, dc)| keep(dr, dc))
        .collect()
}
