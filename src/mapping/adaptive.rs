//! Min/max adaptive binning.
//!
//! Each `prepare` spans a linear grid over the batch's extrema along every
//! tracked dimension and sets aside dedicated bins for the leading walker at
//! each tracked extremum ("boundary" bins) and, optionally, for the walker
//! holding the sparsest occupied slab nearest that extremum ("bottleneck"
//! bins). The total bin count never changes, so target counts stay valid.

use ndarray::ArrayView2;

use super::{BinMapper, check_ndim};
use crate::error::{AssignmentError, Result, WeError};

/// Which extrema of a dimension get boundary/bottleneck bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Both,
    Max,
    Min,
    /// Gridded, but no special bins.
    Skip,
}

impl Direction {
    fn tracks(self) -> (bool, bool) {
        match self {
            Self::Both => (true, true),
            Self::Max => (true, false),
            Self::Min => (false, true),
            Self::Skip => (false, false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extremum {
    dim: usize,
    upper: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct AdaptiveState {
    lo: Vec<f64>,
    hi: Vec<f64>,
    /// One entry per special bin; `None` when no walker qualified.
    special: Vec<Option<Vec<f64>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveBinMapper {
    nbins_per_dim: Vec<usize>,
    extrema: Vec<Extremum>,
    bottleneck: bool,
    grid_bins: usize,
    state: Option<AdaptiveState>,
}

impl AdaptiveBinMapper {
    pub fn new(nbins_per_dim: Vec<usize>, directions: Vec<Direction>, bottleneck: bool) -> Result<Self> {
        if nbins_per_dim.is_empty() || nbins_per_dim.contains(&0) {
            return Err(WeError::config("adaptive mapper needs >= 1 bin in every dimension"));
        }
        if directions.len() != nbins_per_dim.len() {
            return Err(WeError::config(format!(
                "adaptive mapper: {} directions for {} dimensions",
                directions.len(),
                nbins_per_dim.len()
            )));
        }
        let mut extrema = Vec::new();
        for (dim, dir) in directions.iter().enumerate() {
            let (upper, lower) = dir.tracks();
            if upper {
                extrema.push(Extremum { dim, upper: true });
            }
            if lower {
                extrema.push(Extremum { dim, upper: false });
            }
        }
        let grid_bins = nbins_per_dim.iter().product();
        Ok(Self {
            nbins_per_dim,
            extrema,
            bottleneck,
            grid_bins,
            state: None,
        })
    }

    fn n_special(&self) -> usize {
        self.extrema.len() * if self.bottleneck { 2 } else { 1 }
    }

    /// Extrema recorded by the last `prepare`, per dimension.
    pub fn bounds(&self) -> Option<(&[f64], &[f64])> {
        self.state.as_ref().map(|s| (s.lo.as_slice(), s.hi.as_slice()))
    }

    fn slab(x: f64, lo: f64, hi: f64, n: usize) -> usize {
        if !(hi > lo) {
            return 0;
        }
        let k = ((x - lo) / (hi - lo) * n as f64).floor();
        if k < 0.0 {
            0
        } else {
            (k as usize).min(n - 1)
        }
    }

    fn grid_index(&self, state: &AdaptiveState, point: &[f64]) -> usize {
        let mut flat = 0usize;
        for (d, &x) in point.iter().enumerate() {
            let n = self.nbins_per_dim[d];
            flat = flat * n + Self::slab(x, state.lo[d], state.hi[d], n);
        }
        flat
    }
}

fn leading_row(coords: &ArrayView2<'_, f64>, rows: &[usize], ex: Extremum) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &r in rows {
        let x = coords[[r, ex.dim]];
        let better = match best {
            None => true,
            Some((_, bx)) => {
                if ex.upper {
                    x > bx
                } else {
                    x < bx
                }
            }
        };
        if better {
            best = Some((r, x));
        }
    }
    best.map(|(r, _)| r)
}

impl BinMapper for AdaptiveBinMapper {
    fn nbins(&self) -> usize {
        self.grid_bins + self.n_special()
    }

    fn ndim(&self) -> Option<usize> {
        Some(self.nbins_per_dim.len())
    }

    fn labels(&self) -> Vec<String> {
        let mut out: Vec<String> = (0..self.grid_bins).map(|i| format!("grid {i}")).collect();
        let tag = |ex: &Extremum| format!("dim {} {}", ex.dim, if ex.upper { "max" } else { "min" });
        out.extend(self.extrema.iter().map(|ex| format!("boundary {}", tag(ex))));
        if self.bottleneck {
            out.extend(self.extrema.iter().map(|ex| format!("bottleneck {}", tag(ex))));
        }
        out
    }

    fn prepare(&mut self, coords: ArrayView2<'_, f64>) -> std::result::Result<(), AssignmentError> {
        let ndim = self.nbins_per_dim.len();
        check_ndim(&coords, ndim)?;
        if coords.nrows() == 0 {
            return Ok(());
        }
        if let Some(((row, _), _)) = coords.indexed_iter().find(|&(_, x)| x.is_nan()) {
            return Err(AssignmentError::unclassifiable(row, "NaN coordinate"));
        }

        let mut lo = vec![f64::INFINITY; ndim];
        let mut hi = vec![f64::NEG_INFINITY; ndim];
        for point in coords.outer_iter() {
            for (d, &x) in point.iter().enumerate() {
                lo[d] = lo[d].min(x);
                hi[d] = hi[d].max(x);
            }
        }

        let mut free: Vec<usize> = (0..coords.nrows()).collect();
        let mut special = Vec::with_capacity(self.n_special());
        for &ex in &self.extrema {
            let lead = leading_row(&coords, &free, ex);
            if let Some(r) = lead {
                free.retain(|&i| i != r);
            }
            special.push(lead.map(|r| coords.row(r).to_vec()));
        }

        if self.bottleneck {
            for &ex in &self.extrema {
                let n = self.nbins_per_dim[ex.dim];
                let mut counts = vec![0usize; n];
                for &r in &free {
                    counts[Self::slab(coords[[r, ex.dim]], lo[ex.dim], hi[ex.dim], n)] += 1;
                }
                // sparsest occupied slab, nearest the tracked edge on ties
                let slabs: Box<dyn Iterator<Item = usize>> = if ex.upper {
                    Box::new((0..n).rev())
                } else {
                    Box::new(0..n)
                };
                let mut chosen: Option<(usize, usize)> = None;
                for k in slabs {
                    let c = counts[k];
                    if c == 0 {
                        continue;
                    }
                    if chosen.is_none_or(|(_, bc)| c < bc) {
                        chosen = Some((k, c));
                    }
                }
                let pick = chosen.and_then(|(k, _)| {
                    let in_slab: Vec<usize> = free
                        .iter()
                        .copied()
                        .filter(|&r| Self::slab(coords[[r, ex.dim]], lo[ex.dim], hi[ex.dim], n) == k)
                        .collect();
                    leading_row(&coords, &in_slab, ex)
                });
                if let Some(r) = pick {
                    free.retain(|&i| i != r);
                }
                special.push(pick.map(|r| coords.row(r).to_vec()));
            }
        }

        tracing::debug!(?lo, ?hi, "adaptive mapper rebinned");
        self.state = Some(AdaptiveState { lo, hi, special });
        Ok(())
    }

    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        check_ndim(&coords, self.nbins_per_dim.len())?;
        for (row, point) in coords.outer_iter().enumerate() {
            if !mask[row] {
                continue;
            }
            let Some(state) = self.state.as_ref() else {
                return Err(AssignmentError::unclassifiable(row, "adaptive mapper was never prepared"));
            };
            let point = point.to_vec();
            if point.iter().any(|x| x.is_nan()) {
                return Err(AssignmentError::unclassifiable(row, "NaN coordinate"));
            }
            output[row] = match state
                .special
                .iter()
                .position(|s| s.as_deref() == Some(point.as_slice()))
            {
                Some(slot) => self.grid_bins + slot,
                None => self.grid_index(state, &point),
            };
        }
        Ok(())
    }
}
