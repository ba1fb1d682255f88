use std::sync::Arc;

use ndarray::{ArrayView1, ArrayView2};

use super::BinMapper;
use crate::error::{AssignmentError, Result, WeError};

/// Everything lands in bin 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopMapper;

impl BinMapper for NopMapper {
    fn nbins(&self) -> usize {
        1
    }

    fn assign_masked(
        &self,
        _coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        for (out, _) in output.iter_mut().zip(mask).filter(|&(_, &m)| m) {
            *out = 0;
        }
        Ok(())
    }
}

pub type PointFn = Arc<dyn Fn(ArrayView1<'_, f64>) -> Option<usize> + Send + Sync>;
pub type BatchFn = Arc<dyn Fn(ArrayView2<'_, f64>) -> Option<Vec<usize>> + Send + Sync>;
pub type Predicate = Arc<dyn Fn(ArrayView1<'_, f64>) -> bool + Send + Sync>;

/// Externally supplied per-point classifier. `None` or an index beyond
/// `nbins` fails the batch.
#[derive(Clone)]
pub struct FuncBinMapper {
    func: PointFn,
    nbins: usize,
}

impl FuncBinMapper {
    pub fn new(func: PointFn, nbins: usize) -> Self {
        Self { func, nbins }
    }
}

impl BinMapper for FuncBinMapper {
    fn nbins(&self) -> usize {
        self.nbins
    }

    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        for (row, point) in coords.outer_iter().enumerate() {
            if !mask[row] {
                continue;
            }
            let index = (self.func)(point)
                .ok_or_else(|| AssignmentError::unclassifiable(row, "classifier returned no bin"))?;
            if index >= self.nbins {
                return Err(AssignmentError::InvalidIndex {
                    row,
                    index,
                    nbins: self.nbins,
                });
            }
            output[row] = index;
        }
        Ok(())
    }
}

/// Externally supplied classifier over the whole batch at once.
#[derive(Clone)]
pub struct VectorizingFuncBinMapper {
    func: BatchFn,
    nbins: usize,
}

impl VectorizingFuncBinMapper {
    pub fn new(func: BatchFn, nbins: usize) -> Self {
        Self { func, nbins }
    }
}

impl BinMapper for VectorizingFuncBinMapper {
    fn nbins(&self) -> usize {
        self.nbins
    }

    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        let all = (self.func)(coords)
            .ok_or_else(|| AssignmentError::unclassifiable(0, "batch classifier failed"))?;
        if all.len() != coords.nrows() {
            return Err(AssignmentError::unclassifiable(
                all.len().min(coords.nrows()),
                format!("batch classifier returned {} of {} indices", all.len(), coords.nrows()),
            ));
        }
        for (row, &index) in all.iter().enumerate() {
            if !mask[row] {
                continue;
            }
            if index >= self.nbins {
                return Err(AssignmentError::InvalidIndex {
                    row,
                    index,
                    nbins: self.nbins,
                });
            }
            output[row] = index;
        }
        Ok(())
    }
}

/// Bin = index of the first predicate that holds.
#[derive(Clone)]
pub struct PiecewiseBinMapper {
    predicates: Vec<Predicate>,
}

impl PiecewiseBinMapper {
    pub fn new(predicates: Vec<Predicate>) -> Result<Self> {
        if predicates.is_empty() {
            return Err(WeError::config("piecewise mapper needs at least one predicate"));
        }
        Ok(Self { predicates })
    }
}

impl BinMapper for PiecewiseBinMapper {
    fn nbins(&self) -> usize {
        self.predicates.len()
    }

    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        for (row, point) in coords.outer_iter().enumerate() {
            if !mask[row] {
                continue;
            }
            output[row] = self
                .predicates
                .iter()
                .position(|p| p(point))
                .ok_or_else(|| AssignmentError::unclassifiable(row, "no predicate matched"))?;
        }
        Ok(())
    }
}
