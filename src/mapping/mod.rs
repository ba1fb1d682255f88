//! Bin mappers: classify coordinate vectors into bin indices.
//!
//! Coordinates arrive as a 2-D batch, one row per walker. Every mapper
//! classifies either the whole batch or fails; partial results never escape.

use ndarray::ArrayView2;

use crate::error::AssignmentError;

pub mod adaptive;
pub mod binless;
pub mod func;
pub mod rectilinear;
pub mod recursive;
pub mod voronoi;

pub use adaptive::{AdaptiveBinMapper, Direction};
pub use binless::BinlessMapper;
pub use func::{FuncBinMapper, NopMapper, PiecewiseBinMapper, VectorizingFuncBinMapper};
pub use rectilinear::RectilinearBinMapper;
pub use recursive::RecursiveBinMapper;
pub use voronoi::VoronoiBinMapper;

pub trait BinMapper: Send + Sync {
    fn nbins(&self) -> usize;

    /// Expected coordinate dimensionality, if the mapper fixes one.
    fn ndim(&self) -> Option<usize> {
        None
    }

    fn labels(&self) -> Vec<String> {
        (0..self.nbins()).map(|i| format!("bin {i}")).collect()
    }

    /// Recompute internal boundary state from the batch about to be
    /// assigned. Stateless mappers ignore it. Must be deterministic: the same
    /// batch always yields the same state.
    fn prepare(&mut self, _coords: ArrayView2<'_, f64>) -> Result<(), AssignmentError> {
        Ok(())
    }

    /// Classify rows with `mask[i] == true` into `output[i]`; other rows are
    /// left untouched.
    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> Result<(), AssignmentError>;

    fn assign(&self, coords: ArrayView2<'_, f64>) -> Result<Vec<usize>, AssignmentError> {
        let n = coords.nrows();
        let mask = vec![true; n];
        let mut output = vec![0usize; n];
        self.assign_masked(coords, &mask, &mut output)?;
        Ok(output)
    }
}

pub(crate) fn check_ndim(
    coords: &ArrayView2<'_, f64>,
    expected: usize,
) -> Result<(), AssignmentError> {
    if coords.ncols() != expected {
        return Err(AssignmentError::DimensionMismatch {
            expected,
            got: coords.ncols(),
        });
    }
    Ok(())
}

/// Prepare then assign in one step.
pub fn prepare_and_assign(
    mapper: &mut dyn BinMapper,
    coords: ArrayView2<'_, f64>,
) -> Result<Vec<usize>, AssignmentError> {
    mapper.prepare(coords)?;
    let out = mapper.assign(coords)?;
    let nbins = mapper.nbins();
    if let Some((row, &index)) = out.iter().enumerate().find(|&(_, &b)| b >= nbins) {
        return Err(AssignmentError::InvalidIndex { row, index, nbins });
    }
    Ok(out)
}
