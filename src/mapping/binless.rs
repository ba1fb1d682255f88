use ndarray::{Array2, ArrayView2};

use super::voronoi::{euclidean, nearest};
use super::{BinMapper, check_ndim};
use crate::error::{AssignmentError, Result, WeError};

/// Online clustering in place of fixed geometry.
///
/// `prepare` sweeps the batch in row order: a point within `radius` of its
/// nearest centre joins it, otherwise it opens a new centre while fewer than
/// `max_clusters` exist. `assign` is nearest-centre.
#[derive(Debug, Clone, PartialEq)]
pub struct BinlessMapper {
    ndim: usize,
    radius: f64,
    max_clusters: usize,
    centers: Option<Array2<f64>>,
}

impl BinlessMapper {
    pub fn new(ndim: usize, radius: f64, max_clusters: usize) -> Result<Self> {
        if max_clusters == 0 {
            return Err(WeError::config("binless mapper needs max_clusters >= 1"));
        }
        if !(radius > 0.0) {
            return Err(WeError::config(format!("binless radius must be positive (got {radius})")));
        }
        Ok(Self {
            ndim,
            radius,
            max_clusters,
            centers: None,
        })
    }

    pub fn n_clusters(&self) -> usize {
        self.centers.as_ref().map_or(0, |c| c.nrows())
    }
}

impl BinMapper for BinlessMapper {
    fn nbins(&self) -> usize {
        self.max_clusters
    }

    fn ndim(&self) -> Option<usize> {
        Some(self.ndim)
    }

    fn prepare(&mut self, coords: ArrayView2<'_, f64>) -> std::result::Result<(), AssignmentError> {
        check_ndim(&coords, self.ndim)?;
        if coords.nrows() == 0 {
            return Ok(());
        }
        let mut flat: Vec<f64> = Vec::with_capacity(self.max_clusters * self.ndim);
        let mut k = 0usize;
        for (row, point) in coords.outer_iter().enumerate() {
            if point.iter().any(|x| x.is_nan()) {
                return Err(AssignmentError::unclassifiable(row, "NaN coordinate"));
            }
            let dist = (0..k)
                .map(|c| {
                    let centre = ndarray::ArrayView1::from(&flat[c * self.ndim..(c + 1) * self.ndim]);
                    euclidean(point, centre)
                })
                .fold(f64::INFINITY, f64::min);
            if dist > self.radius && k < self.max_clusters {
                flat.extend(point.iter().copied());
                k += 1;
            }
        }
        let centers = Array2::from_shape_vec((k, self.ndim), flat)
            .map_err(|e| AssignmentError::unclassifiable(0, e.to_string()))?;
        tracing::debug!(clusters = k, "binless centres rebuilt");
        self.centers = Some(centers);
        Ok(())
    }

    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        check_ndim(&coords, self.ndim)?;
        for (row, point) in coords.outer_iter().enumerate() {
            if !mask[row] {
                continue;
            }
            let centers = self
                .centers
                .as_ref()
                .ok_or_else(|| AssignmentError::unclassifiable(row, "binless mapper was never prepared"))?;
            output[row] = nearest(centers, &euclidean, point, row)?;
        }
        Ok(())
    }
}
