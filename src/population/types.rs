use std::fmt;

use ndarray::{Array2, ArrayView1};
use smallvec::SmallVec;

use crate::error::{Result, WeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a walker's trajectory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Parent {
    /// Continued from a walker of the previous iteration.
    Segment(SegmentId),
    /// Started (or restarted after recycling) from an initial state.
    InitialState(u64),
}

pub type WtgParents = SmallVec<[SegmentId; 4]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: SegmentId,
    pub weight: f64,
    /// One row per recorded time point, one column per coordinate dimension.
    pub pcoord: Array2<f64>,
    pub parent: Option<Parent>,
    /// Parent of the walker this one continues. Walkers split from the same
    /// walker last iteration share it; lineage subgrouping keys on it.
    pub family: Option<Parent>,
    /// Previous-iteration walkers whose weight flowed into this one.
    pub wtg_parents: WtgParents,
    /// Endpoint lies in a sink but no initial state was available.
    pub recycle_pending: bool,
}

impl Segment {
    pub fn new(id: SegmentId, weight: f64, pcoord: Array2<f64>) -> Self {
        Self {
            id,
            weight,
            pcoord,
            parent: None,
            family: None,
            wtg_parents: SmallVec::new(),
            recycle_pending: false,
        }
    }

    /// Single-point trajectory.
    pub fn at_point(id: SegmentId, weight: f64, point: &[f64]) -> Self {
        let pcoord = Array2::from_shape_fn((1, point.len()), |(_, j)| point[j]);
        Self::new(id, weight, pcoord)
    }

    pub fn with_parent(mut self, parent: Parent) -> Self {
        if let Parent::Segment(id) = parent {
            self.wtg_parents = smallvec::smallvec![id];
        }
        self.parent = Some(parent);
        self
    }

    pub fn with_family(mut self, family: Option<Parent>) -> Self {
        self.family = family;
        self
    }

    /// Trajectory family: `family` when known, otherwise the walker's own parent.
    pub fn lineage_key(&self) -> Option<Parent> {
        self.family.or(self.parent)
    }

    pub fn ndim(&self) -> usize {
        self.pcoord.ncols()
    }

    pub fn n_points(&self) -> usize {
        self.pcoord.nrows()
    }

    pub fn first_point(&self) -> Option<ArrayView1<'_, f64>> {
        (self.n_points() > 0).then(|| self.pcoord.row(0))
    }

    pub fn endpoint(&self) -> Option<ArrayView1<'_, f64>> {
        self.n_points()
            .checked_sub(1)
            .map(|last| self.pcoord.row(last))
    }
}

/// Hands out walker ids in increasing order.
#[derive(Debug, Clone)]
pub struct IdSource {
    next: u64,
}

impl IdSource {
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    pub fn next_id(&mut self) -> SegmentId {
        let id = SegmentId(self.next);
        self.next += 1;
        id
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// Owned walker set for one bin of the next iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub index: usize,
    pub target_count: usize,
    pub segments: Vec<Segment>,
}

impl Bin {
    pub fn new(index: usize, target_count: usize) -> Self {
        Self {
            index,
            target_count,
            segments: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn weight(&self) -> f64 {
        total_weight(&self.segments)
    }
}

pub fn total_weight(segments: &[Segment]) -> f64 {
    segments.iter().map(|s| s.weight).sum()
}

/// Moves the walkers at `indices` out of `segments`, keeping the relative
/// order of both the extracted and the remaining walkers.
pub fn extract(segments: &mut Vec<Segment>, indices: &[usize]) -> Vec<Segment> {
    let mut take = vec![false; segments.len()];
    for &i in indices {
        take[i] = true;
    }
    let mut picked = Vec::with_capacity(indices.len());
    let mut kept = Vec::with_capacity(segments.len().saturating_sub(indices.len()));
    for (seg, t) in segments.drain(..).zip(take) {
        if t {
            picked.push(seg);
        } else {
            kept.push(seg);
        }
    }
    *segments = kept;
    picked
}

/// Current- and next-iteration walker sets plus the id counter.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStore {
    pub iteration: u64,
    pub current: Vec<Segment>,
    pub next: Vec<Segment>,
    pub next_id: u64,
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStore {
    pub fn new() -> Self {
        Self {
            iteration: 0,
            current: Vec::new(),
            next: Vec::new(),
            next_id: 0,
        }
    }

    pub fn current_weight(&self) -> f64 {
        total_weight(&self.current)
    }

    /// Promote the constructed next iteration to current.
    pub fn advance(&mut self) -> Result<()> {
        if self.next.is_empty() {
            return Err(WeError::consistency(format!(
                "iteration {}: no next-iteration walkers to advance to",
                self.iteration
            )));
        }
        self.current = std::mem::take(&mut self.next);
        self.iteration += 1;
        Ok(())
    }
}
