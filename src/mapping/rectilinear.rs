use ndarray::ArrayView2;
use smallvec::SmallVec;

use super::{BinMapper, check_ndim};
use crate::error::{AssignmentError, Result, WeError};

/// Grid of per-dimension edge lists. Bin `k` in dimension `d` covers
/// `[edges[d][k], edges[d][k+1])`; use `±inf` edges for open-ended bins.
#[derive(Debug, Clone, PartialEq)]
pub struct RectilinearBinMapper {
    boundaries: Vec<Vec<f64>>,
    strides: SmallVec<[usize; 4]>,
    nbins: usize,
}

impl RectilinearBinMapper {
    pub fn new(boundaries: Vec<Vec<f64>>) -> Result<Self> {
        if boundaries.is_empty() {
            return Err(WeError::config("rectilinear mapper needs at least one dimension"));
        }
        for (d, edges) in boundaries.iter().enumerate() {
            if edges.len() < 2 {
                return Err(WeError::config(format!(
                    "dimension {d}: need at least 2 edges, got {}",
                    edges.len()
                )));
            }
            if edges.iter().any(|e| e.is_nan()) || edges.windows(2).any(|w| w[0] >= w[1]) {
                return Err(WeError::config(format!(
                    "dimension {d}: edges must be strictly increasing: {edges:?}"
                )));
            }
        }
        // row-major: last dimension varies fastest
        let mut strides: SmallVec<[usize; 4]> = SmallVec::from_elem(1, boundaries.len());
        for d in (0..boundaries.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * (boundaries[d + 1].len() - 1);
        }
        let nbins = boundaries.iter().map(|e| e.len() - 1).product();
        Ok(Self {
            boundaries,
            strides,
            nbins,
        })
    }

    pub fn boundaries(&self) -> &[Vec<f64>] {
        &self.boundaries
    }

    fn bucket(edges: &[f64], x: f64) -> Option<usize> {
        if x.is_nan() {
            return None;
        }
        // first edge strictly greater than x
        let pos = edges.partition_point(|&e| e <= x);
        if pos == 0 || pos == edges.len() {
            None
        } else {
            Some(pos - 1)
        }
    }

    /// Per-dimension bucket indices of a single point.
    pub fn multi_index(&self, point: &[f64]) -> Option<SmallVec<[usize; 4]>> {
        point
            .iter()
            .zip(&self.boundaries)
            .map(|(&x, edges)| Self::bucket(edges, x))
            .collect()
    }
}

impl BinMapper for RectilinearBinMapper {
    fn nbins(&self) -> usize {
        self.nbins
    }

    fn ndim(&self) -> Option<usize> {
        Some(self.boundaries.len())
    }

    fn labels(&self) -> Vec<String> {
        (0..self.nbins)
            .map(|flat| {
                let parts: Vec<String> = self
                    .boundaries
                    .iter()
                    .zip(&self.strides)
                    .map(|(edges, &stride)| {
                        let k = (flat / stride) % (edges.len() - 1);
                        format!("[{},{})", edges[k], edges[k + 1])
                    })
                    .collect();
                parts.join("x")
            })
            .collect()
    }

    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        check_ndim(&coords, self.boundaries.len())?;
        for (row, point) in coords.outer_iter().enumerate() {
            if !mask[row] {
                continue;
            }
            let mut flat = 0usize;
            for (dim, ((&x, edges), &stride)) in point
                .iter()
                .zip(&self.boundaries)
                .zip(&self.strides)
                .enumerate()
            {
                match Self::bucket(edges, x) {
                    Some(k) => flat += k * stride,
                    None if x.is_nan() => {
                        return Err(AssignmentError::unclassifiable(
                            row,
                            format!("NaN coordinate in dimension {dim}"),
                        ));
                    }
                    None => return Err(AssignmentError::OutOfBounds { row, dim, value: x }),
                }
            }
            output[row] = flat;
        }
        Ok(())
    }
}
