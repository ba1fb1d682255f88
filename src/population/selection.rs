//! Sorting/selection policies.
//!
//! A policy looks at one bin (or subgroup) and reports the walkers in
//! ascending weight order together with the subset eligible for the requested
//! operation. All indices refer to the input slice.

use super::primitives::is_close;
use super::types::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    NoSort,
    SplitCandidates,
    MergeCandidates,
    AdjustSort,
    ThresholdSplitCandidates,
    ThresholdMergeCandidates,
    CollapseAll,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionParams {
    pub ideal_weight: f64,
    pub split_threshold_factor: f64,
    pub merge_cutoff_factor: f64,
    pub largest_allowed_weight: Option<f64>,
    pub smallest_allowed_weight: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Input indices, lightest first.
    pub order: Vec<usize>,
    /// Weights in `order`.
    pub weights: Vec<f64>,
    /// Input indices eligible for the operation, lightest first.
    pub eligible: Vec<usize>,
    /// Running sum of `weights`.
    pub cumulative: Vec<f64>,
}

pub trait SelectionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, segments: &[Segment], kind: SelectionKind, params: &SelectionParams) -> Selection;
}

/// Ascending by weight; equal weights fall back to walker id.
pub fn weight_order(segments: &[Segment]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|&a, &b| {
        segments[a]
            .weight
            .total_cmp(&segments[b].weight)
            .then(segments[a].id.cmp(&segments[b].id))
    });
    order
}

fn ordered(segments: &[Segment]) -> (Vec<usize>, Vec<f64>, Vec<f64>) {
    let order = weight_order(segments);
    let weights: Vec<f64> = order.iter().map(|&i| segments[i].weight).collect();
    let cumulative = weights
        .iter()
        .scan(0.0, |acc, &w| {
            *acc += w;
            Some(*acc)
        })
        .collect();
    (order, weights, cumulative)
}

fn above(weights: &[f64], order: &[usize], bound: f64) -> Vec<usize> {
    order
        .iter()
        .zip(weights)
        .filter(|&(_, &w)| w > bound && !is_close(w, bound))
        .map(|(&i, _)| i)
        .collect()
}

fn below(weights: &[f64], order: &[usize], bound: f64) -> Vec<usize> {
    order
        .iter()
        .zip(weights)
        .filter(|&(_, &w)| w < bound && !is_close(w, bound))
        .map(|(&i, _)| i)
        .collect()
}

/// Default policy: thresholds relative to the ideal weight, merge the
/// lightest prefix in one go.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightSelection;

impl SelectionPolicy for WeightSelection {
    fn name(&self) -> &'static str {
        "weight"
    }

    fn select(&self, segments: &[Segment], kind: SelectionKind, params: &SelectionParams) -> Selection {
        let (order, weights, cumulative) = ordered(segments);
        let eligible = match kind {
            SelectionKind::NoSort => Vec::new(),
            SelectionKind::AdjustSort | SelectionKind::CollapseAll => order.clone(),
            SelectionKind::SplitCandidates => {
                above(&weights, &order, params.split_threshold_factor * params.ideal_weight)
            }
            SelectionKind::MergeCandidates => {
                let cutoff = params.ideal_weight * params.merge_cutoff_factor;
                order
                    .iter()
                    .zip(&cumulative)
                    .take_while(|&(_, &c)| c <= cutoff)
                    .map(|(&i, _)| i)
                    .collect()
            }
            SelectionKind::ThresholdSplitCandidates => match params.largest_allowed_weight {
                Some(max) => above(&weights, &order, max),
                None => Vec::new(),
            },
            SelectionKind::ThresholdMergeCandidates => match params.smallest_allowed_weight {
                Some(min) => below(&weights, &order, min),
                None => Vec::new(),
            },
        };
        Selection {
            order,
            weights,
            eligible,
            cumulative,
        }
    }
}

/// Pairwise merging: at most the two lightest walkers are offered for a
/// merge at a time. Splitting behaves like [`WeightSelection`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PairedSelection;

impl SelectionPolicy for PairedSelection {
    fn name(&self) -> &'static str {
        "paired"
    }

    fn select(&self, segments: &[Segment], kind: SelectionKind, params: &SelectionParams) -> Selection {
        let mut sel = WeightSelection.select(segments, kind, params);
        match kind {
            SelectionKind::MergeCandidates => {
                let cutoff = params.ideal_weight * params.merge_cutoff_factor;
                sel.eligible = if sel.cumulative.len() >= 2 && sel.cumulative[1] <= cutoff {
                    sel.order[..2].to_vec()
                } else {
                    Vec::new()
                };
            }
            SelectionKind::ThresholdMergeCandidates => sel.eligible.truncate(2),
            _ => {}
        }
        sel
    }
}
