use ndarray::{Array2, ArrayView2, Axis};

use super::BinMapper;
use crate::error::{AssignmentError, Result, WeError};

/// An outer mapper whose individual bins may be subdivided by child mappers.
///
/// Bin indices are laid out in outer-bin order: an outer bin without a child
/// takes one index, a replaced outer bin takes the child's whole range.
pub struct RecursiveBinMapper {
    base: Box<dyn BinMapper>,
    children: Vec<Option<Box<dyn BinMapper>>>,
    offsets: Vec<usize>,
    nbins: usize,
}

impl std::fmt::Debug for RecursiveBinMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveBinMapper")
            .field("outer_bins", &self.children.len())
            .field("nbins", &self.nbins)
            .finish_non_exhaustive()
    }
}

impl RecursiveBinMapper {
    pub fn new(base: Box<dyn BinMapper>) -> Self {
        let outer = base.nbins();
        let mut m = Self {
            base,
            children: (0..outer).map(|_| None).collect(),
            offsets: Vec::new(),
            nbins: 0,
        };
        m.relayout();
        m
    }

    fn relayout(&mut self) {
        self.offsets.clear();
        let mut next = 0usize;
        for child in &self.children {
            self.offsets.push(next);
            next += child.as_ref().map_or(1, |c| c.nbins());
        }
        self.nbins = next;
    }

    /// Replace outer bin `bin` with `child`.
    pub fn add_mapper_at_bin(&mut self, child: Box<dyn BinMapper>, bin: usize) -> Result<()> {
        let slot = self.children.get_mut(bin).ok_or_else(|| {
            WeError::config(format!("outer bin {bin} does not exist"))
        })?;
        if slot.is_some() {
            return Err(WeError::config(format!("outer bin {bin} already has a child mapper")));
        }
        if child.nbins() == 0 {
            return Err(WeError::config("child mapper has no bins"));
        }
        *slot = Some(child);
        self.relayout();
        Ok(())
    }

    /// Replace the outer bin containing `point` with `child`.
    pub fn add_mapper(&mut self, child: Box<dyn BinMapper>, replaces_bin_at: &[f64]) -> Result<()> {
        let coords = Array2::from_shape_fn((1, replaces_bin_at.len()), |(_, j)| replaces_bin_at[j]);
        let bin = self.base.assign(coords.view())?[0];
        self.add_mapper_at_bin(child, bin)
    }

    /// First index of outer bin `bin`'s range.
    pub fn start_index(&self, bin: usize) -> Option<usize> {
        self.offsets.get(bin).copied()
    }
}

impl BinMapper for RecursiveBinMapper {
    fn nbins(&self) -> usize {
        self.nbins
    }

    fn ndim(&self) -> Option<usize> {
        self.base.ndim()
    }

    fn labels(&self) -> Vec<String> {
        let outer = self.base.labels();
        let mut out = Vec::with_capacity(self.nbins);
        for (b, child) in self.children.iter().enumerate() {
            match child {
                None => out.push(outer[b].clone()),
                Some(c) => out.extend(c.labels().into_iter().map(|l| format!("{} / {l}", outer[b]))),
            }
        }
        out
    }

    fn prepare(&mut self, coords: ArrayView2<'_, f64>) -> std::result::Result<(), AssignmentError> {
        self.base.prepare(coords)?;
        if self.children.iter().all(Option::is_none) {
            return Ok(());
        }
        let outer = self.base.assign(coords)?;
        for (b, child) in self.children.iter_mut().enumerate() {
            let Some(child) = child else { continue };
            let rows: Vec<usize> = (0..outer.len()).filter(|&i| outer[i] == b).collect();
            if rows.is_empty() {
                continue;
            }
            let sub = coords.select(Axis(0), &rows);
            child.prepare(sub.view())?;
        }
        Ok(())
    }

    fn assign_masked(
        &self,
        coords: ArrayView2<'_, f64>,
        mask: &[bool],
        output: &mut [usize],
    ) -> std::result::Result<(), AssignmentError> {
        let n = coords.nrows();
        let mut outer = vec![0usize; n];
        self.base.assign_masked(coords, mask, &mut outer)?;

        for row in (0..n).filter(|&i| mask[i]) {
            if self.children[outer[row]].is_none() {
                output[row] = self.offsets[outer[row]];
            }
        }

        let mut child_out = vec![0usize; n];
        for (b, child) in self.children.iter().enumerate() {
            let Some(child) = child else { continue };
            let child_mask: Vec<bool> = (0..n).map(|i| mask[i] && outer[i] == b).collect();
            if !child_mask.iter().any(|&m| m) {
                continue;
            }
            child.assign_masked(coords, &child_mask, &mut child_out)?;
            for row in (0..n).filter(|&i| child_mask[i]) {
                output[row] = self.offsets[b] + child_out[row];
            }
        }
        Ok(())
    }
}
