use itertools::Itertools;
use rand::distributions::{Distribution, WeightedIndex};
use rand_chacha::ChaCha8Rng;

use super::types::{IdSource, Segment, WtgParents};
use crate::error::{Result, WeError};

#[inline]
pub fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

/// Pieces needed so that each piece weighs at most `unit`.
///
/// Ratios within rounding of an integer are rounded rather than ceiled so
/// that e.g. `1.0 / (1.0 / 3.0)` yields 3. Never below 2.
pub fn split_multiplicity(weight: f64, unit: f64) -> usize {
    let ratio = weight / unit;
    let rounded = ratio.round();
    let m = if (ratio - rounded).abs() <= 1e-9 * rounded.max(1.0) {
        rounded
    } else {
        ratio.ceil()
    };
    (m as usize).max(2)
}

/// Replace `segment` by `m` children of weight `w / m` pushed into `target`.
pub fn split_walker(
    segment: Segment,
    m: usize,
    ids: &mut IdSource,
    target: &mut Vec<Segment>,
) -> Result<()> {
    if m < 2 {
        return Err(WeError::InvalidSplit { multiplicity: m });
    }
    let child_weight = segment.weight / m as f64;
    tracing::trace!(parent = %segment.id, m, child_weight, "split");
    target.reserve(m);
    for _ in 0..m {
        target.push(Segment {
            id: ids.next_id(),
            weight: child_weight,
            pcoord: segment.pcoord.clone(),
            parent: segment.parent,
            family: segment.family,
            wtg_parents: segment.wtg_parents.clone(),
            recycle_pending: segment.recycle_pending,
        });
    }
    Ok(())
}

/// Combine `segments` into one walker pushed into `target`.
///
/// The survivor is drawn with probability proportional to weight; its
/// trajectory and parent carry over, the other inputs are dropped.
pub fn merge_walkers(
    segments: Vec<Segment>,
    ids: &mut IdSource,
    rng: &mut ChaCha8Rng,
    target: &mut Vec<Segment>,
) -> Result<()> {
    if segments.len() < 2 {
        return Err(WeError::InvalidMerge {
            reason: format!("{} walker(s) given, need at least 2", segments.len()),
        });
    }
    let weights: Vec<f64> = segments.iter().map(|s| s.weight).collect();
    let dist = WeightedIndex::new(&weights).map_err(|e| WeError::InvalidMerge {
        reason: format!("bad weights {weights:?}: {e}"),
    })?;
    let pick = dist.sample(rng);
    let weight: f64 = weights.iter().sum();

    let wtg_parents: WtgParents = segments
        .iter()
        .flat_map(|s| s.wtg_parents.iter().copied())
        .sorted_unstable()
        .dedup()
        .collect();

    let n = segments.len();
    let survivor = segments.into_iter().nth(pick).ok_or_else(|| WeError::InvalidMerge {
        reason: format!("sampled index {pick} out of range"),
    })?;

    let merged = Segment {
        id: ids.next_id(),
        weight,
        pcoord: survivor.pcoord,
        parent: survivor.parent,
        family: survivor.family,
        wtg_parents,
        recycle_pending: survivor.recycle_pending,
    };
    tracing::trace!(survivor = %survivor.id, merged = %merged.id, n, weight, "merge");
    target.push(merged);
    Ok(())
}
