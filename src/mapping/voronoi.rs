use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2};

use super::{BinMapper, check_ndim};
use crate::error::{AssignmentError, Result, WeError};

/// Distance between a point and a centre.
pub type DistanceFn = Arc<dyn Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64 + Send + Sync>;

pub fn euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Nearest-centre assignment. Equal distances resolve to the lowest centre.
#[derive(Clone)]
pub struct VoronoiBinMapper {
    centers: Array2<f64>,
    dfunc: DistanceFn,
}

impl std::fmt::Debug for VoronoiBinMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoronoiBinMapper")
            .field("centers", &self.centers)
            .finish_non_exhaustive()
    }
}

impl VoronoiBinMapper {
    pub fn new(centers: Array2<f64>) -> Result<Self> {
        Self::with_distance(centers, Arc::new(euclidean))
    }

    pub fn with_distance(centers: Array2<f64>, dfunc: DistanceFn) -> Result<Self> {
        if centers.nrows() == 0 {
            return Err(WeError::config("voronoi mapper needs at least one centre"));
        }
        Ok(Self { centers, dfunc })
    }

    pub fn centers(&self) -> &Array2<f64> {
        &self.centers
    }
}

pub(crate) fn nearest(
    centers: &Array2<f64>,
    dfunc: &dyn Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64,
    point: ArrayView1<'_, f64>,
    row: usize,
) -> std::result::Result<usize, AssignmentError> {
    let mut best = None::<(usize, f64)>;
    for (k, c) in centers.outer_iter().enumerate() {
        let d = dfunc(point, c);
        if d.is_nan() {
            return Err(AssignmentError::unclassifiable(
                row,
                format!("distance to centre {k} is NaN"),
            ));
        }
        match best {
            Some((_, bd)) if d >= bd => {}
            _ => best = Some((k, d)),
        }
    }
    best.map(|(k, _)| k)
        .ok_or_else(|| AssignmentError::unclassifiable(row, "no centres"))
}

impl BinMapper for VoronoiBinMapper {
    fn nbins(&self) -> usize {
        self.centers.nrows()
    }

    fn ndim(&self) -> Option<usize> {
        Some(self.centers.ncols())
    }

    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        check_ndim(&coords, self.centers.ncols())?;
        for (row, point) in coords.outer_iter().enumerate() {
            if mask[row] {
                output[row] = nearest(&self.centers, self.dfunc.as_ref(), point, row)?;
            }
        }
        Ok(())
    }
}
