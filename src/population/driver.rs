//! Per-iteration population control.
//!
//! Walkers are recycled, mapped to bins and then every non-empty bin is
//! driven towards its target count independently:
//! subgroup -> collapse or split/merge by weight -> adjust count -> thresholds.
//! Bins never share state during a pass, so they may run on the rayon pool;
//! each bin draws from its own generator seeded by (seed, iteration, bin).

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::primitives::{is_close, merge_walkers, split_multiplicity, split_walker};
use super::recycle::{InitialState, InitialStatePool, RecycleRecord, SinkRegion};
use super::registry::PolicyRegistry;
use super::selection::{SelectionKind, SelectionParams, SelectionPolicy};
use super::subgroup::SubgroupPolicy;
use super::types::{
    Bin, IdSource, Parent, Segment, SegmentId, SegmentStore, extract, total_weight,
};
use crate::config::{AdjustOrder, DriverConfig};
use crate::error::{Diagnostic, Diagnostics, Result, WeError};
use crate::mapping::{BinMapper, prepare_and_assign};

const WEIGHT_RTOL: f64 = 1e-9;
/// Upper bound on the children one threshold split may create.
pub const MAX_THRESHOLD_PIECES: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationReport {
    pub iteration: u64,
    pub bin_populations: Vec<usize>,
    pub bin_weights: Vec<f64>,
    pub recycled: Vec<RecycleRecord>,
    pub used_initial_states: Vec<u64>,
    pub diagnostics: Diagnostics,
}

impl IterationReport {
    pub fn n_walkers(&self) -> usize {
        self.bin_populations.iter().sum()
    }

    pub fn total_weight(&self) -> f64 {
        self.bin_weights.iter().sum()
    }
}

struct BinPass {
    bin: Bin,
    /// The pass guarantees `len == target_count` (absent thresholds).
    exact: bool,
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of the generator used for one bin of one iteration.
pub fn bin_seed(seed: u64, iteration: u64, bin: usize) -> u64 {
    splitmix64(splitmix64(seed ^ splitmix64(iteration)) ^ bin as u64)
}

pub struct WeDriver {
    config: DriverConfig,
    mapper: Box<dyn BinMapper>,
    target_counts: Vec<usize>,
    sinks: Vec<SinkRegion>,
    selection: Box<dyn SelectionPolicy>,
    subgroups: Box<dyn SubgroupPolicy>,
}

impl std::fmt::Debug for WeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeDriver")
            .field("config", &self.config)
            .field("nbins", &self.mapper.nbins())
            .field("target_counts", &self.target_counts)
            .field("sinks", &self.sinks)
            .field("selection", &self.selection.name())
            .field("subgroups", &self.subgroups.name())
            .finish()
    }
}

impl WeDriver {
    pub fn new(
        config: DriverConfig,
        mapper: Box<dyn BinMapper>,
        target_counts: Vec<usize>,
        sinks: Vec<SinkRegion>,
        registry: &PolicyRegistry,
    ) -> Result<Self> {
        config.validate()?;
        if target_counts.len() != mapper.nbins() {
            return Err(WeError::config(format!(
                "{} target counts for {} bins",
                target_counts.len(),
                mapper.nbins()
            )));
        }
        let selection = registry.selection(&config)?;
        let subgroups = registry.subgroup(&config)?;
        tracing::debug!(
            nbins = mapper.nbins(),
            selection = selection.name(),
            subgroups = subgroups.name(),
            "driver ready"
        );
        Ok(Self {
            config,
            mapper,
            target_counts,
            sinks,
            selection,
            subgroups,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn mapper(&self) -> &dyn BinMapper {
        self.mapper.as_ref()
    }

    pub fn target_counts(&self) -> &[usize] {
        &self.target_counts
    }

    /// Swap in a new mapper together with matching target counts.
    pub fn set_mapper(&mut self, mapper: Box<dyn BinMapper>, target_counts: Vec<usize>) -> Result<()> {
        if target_counts.len() != mapper.nbins() {
            return Err(WeError::config(format!(
                "{} target counts for {} bins",
                target_counts.len(),
                mapper.nbins()
            )));
        }
        self.mapper = mapper;
        self.target_counts = target_counts;
        Ok(())
    }

    fn params(&self, ideal_weight: f64) -> SelectionParams {
        SelectionParams {
            ideal_weight,
            split_threshold_factor: self.config.split_threshold_factor,
            merge_cutoff_factor: self.config.merge_cutoff_factor,
            largest_allowed_weight: self.config.largest_allowed_weight,
            smallest_allowed_weight: self.config.smallest_allowed_weight,
        }
    }

    // ---------------------------------------------------------------------
    // Entry points
    // ---------------------------------------------------------------------

    /// Build the first iteration from initial states with the given weights.
    pub fn populate_initial(
        &mut self,
        store: &mut SegmentStore,
        states: &[InitialState],
        weights: &[f64],
    ) -> Result<IterationReport> {
        if states.is_empty() || states.len() != weights.len() {
            return Err(WeError::config(format!(
                "{} initial states with {} weights",
                states.len(),
                weights.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !(**w > 0.0 && w.is_finite())) {
            return Err(WeError::config(format!("initial weight {w} is not positive")));
        }
        let walkers: Vec<Segment> = states
            .iter()
            .zip(weights)
            .map(|(s, &w)| {
                Segment::at_point(SegmentId(0), w, &s.pcoord).with_parent(Parent::InitialState(s.id))
            })
            .collect();
        let starts = stack_points(walkers.iter().map(|s| s.pcoord.row(0).to_vec()))?;

        let iteration = store.iteration.max(1);
        let mut report = IterationReport {
            iteration,
            used_initial_states: states.iter().map(|s| s.id).collect(),
            ..IterationReport::default()
        };
        let (segments, next_id) = self.control(iteration, walkers, starts, store.next_id, &mut report)?;
        store.current = segments;
        store.next.clear();
        store.iteration = iteration;
        store.next_id = next_id;
        Ok(report)
    }

    /// Build `store.next` from the endpoints of `store.current`.
    ///
    /// Walkers ending in a sink restart from an initial state drawn from
    /// `pool`. On a fatal error the store is untouched and drawn states are
    /// handed back to the pool.
    pub fn construct_next(
        &mut self,
        store: &mut SegmentStore,
        pool: &mut dyn InitialStatePool,
    ) -> Result<IterationReport> {
        if store.current.is_empty() {
            return Err(WeError::consistency(format!(
                "iteration {}: no current walkers",
                store.iteration
            )));
        }
        let iteration = store.iteration + 1;
        let mut report = IterationReport {
            iteration,
            recycled: self
                .sinks
                .iter()
                .map(|s| RecycleRecord {
                    label: s.label.clone(),
                    count: 0,
                    weight: 0.0,
                })
                .collect(),
            ..IterationReport::default()
        };
        let mut taken: Vec<InitialState> = Vec::new();

        let result = self
            .recycle(&store.current, pool, &mut taken, &mut report)
            .and_then(|(walkers, starts)| {
                self.control(iteration, walkers, starts, store.next_id, &mut report)
            });

        match result {
            Ok((segments, next_id)) => {
                report.used_initial_states = taken.iter().map(|s| s.id).collect();
                store.next = segments;
                store.next_id = next_id;
                Ok(report)
            }
            Err(err) => {
                for state in taken.into_iter().rev() {
                    pool.release(state);
                }
                Err(err)
            }
        }
    }

    /// Re-run population control on the current walkers, binned by their
    /// first point. Used after the mapper or target counts change.
    pub fn rebin_current(&mut self, store: &mut SegmentStore) -> Result<IterationReport> {
        let walkers = store.current.clone();
        if walkers.is_empty() {
            return Err(WeError::consistency("no current walkers to rebin"));
        }
        let starts = stack_points(walkers.iter().map(|s| {
            s.first_point().map(|p| p.to_vec()).unwrap_or_default()
        }))?;
        let mut report = IterationReport {
            iteration: store.iteration,
            ..IterationReport::default()
        };
        let (segments, next_id) =
            self.control(store.iteration, walkers, starts, store.next_id, &mut report)?;
        store.current = segments;
        store.next_id = next_id;
        Ok(report)
    }

    // ---------------------------------------------------------------------
    // Recycling
    // ---------------------------------------------------------------------

    fn recycle(
        &self,
        parents: &[Segment],
        pool: &mut dyn InitialStatePool,
        taken: &mut Vec<InitialState>,
        report: &mut IterationReport,
    ) -> Result<(Vec<Segment>, Array2<f64>)> {
        let mut walkers = Vec::with_capacity(parents.len());
        let mut unmet = 0usize;
        for parent in parents {
            let end = parent.endpoint().ok_or_else(|| {
                WeError::consistency(format!("walker {} has an empty trajectory", parent.id))
            })?;
            let continued = || {
                Segment::at_point(parent.id, parent.weight, &end.to_vec())
                    .with_parent(Parent::Segment(parent.id))
                    .with_family(parent.parent)
            };
            let sink = self.sinks.iter().position(|s| s.contains(end));
            let child = match sink {
                None => continued(),
                Some(k) => match pool.take() {
                    Some(state) => {
                        let record = &mut report.recycled[k];
                        record.count += 1;
                        record.weight += parent.weight;
                        let mut seg = Segment::at_point(parent.id, parent.weight, &state.pcoord)
                            .with_parent(Parent::InitialState(state.id));
                        seg.wtg_parents = smallvec::smallvec![parent.id];
                        taken.push(state);
                        seg
                    }
                    None => {
                        unmet += 1;
                        let mut seg = continued();
                        seg.recycle_pending = true;
                        seg
                    }
                },
            };
            walkers.push(child);
        }
        if unmet > 0 {
            report
                .diagnostics
                .push(Diagnostic::RecyclePoolExhausted { count: unmet });
        }
        for r in report.recycled.iter().filter(|r| r.count > 0) {
            tracing::info!(sink = %r.label, count = r.count, weight = r.weight, "recycled");
        }
        let starts = stack_points(walkers.iter().map(|s| s.pcoord.row(0).to_vec()))?;
        Ok((walkers, starts))
    }

    // ---------------------------------------------------------------------
    // Binning + per-bin passes
    // ---------------------------------------------------------------------

    fn control(
        &mut self,
        iteration: u64,
        mut walkers: Vec<Segment>,
        starts: Array2<f64>,
        first_id: u64,
        report: &mut IterationReport,
    ) -> Result<(Vec<Segment>, u64)> {
        let incoming = total_weight(&walkers);
        for (i, w) in walkers.iter_mut().enumerate() {
            w.id = SegmentId(i as u64);
        }

        let assignments = prepare_and_assign(self.mapper.as_mut(), starts.view())?;

        let mut bins: Vec<Bin> = self
            .target_counts
            .iter()
            .enumerate()
            .map(|(i, &t)| Bin::new(i, t))
            .collect();
        for (w, b) in walkers.into_iter().zip(assignments) {
            bins[b].segments.push(w);
        }
        self.check_pre(&bins)?;
        let occupied: Vec<bool> = bins.iter().map(|b| !b.is_empty()).collect();

        let this = &*self;
        let passes: Vec<BinPass> = if this.config.parallel {
            bins.into_par_iter()
                .map(|b| this.pass_bin(b, iteration))
                .collect::<Result<Vec<_>>>()?
        } else {
            bins.into_iter()
                .map(|b| this.pass_bin(b, iteration))
                .collect::<Result<Vec<_>>>()?
        };

        // barrier passed: assign final ids in (bin, position) order
        let mut ids = IdSource::starting_at(first_id);
        let mut out = Vec::new();
        let mut exact = Vec::with_capacity(passes.len());
        report.bin_populations.clear();
        report.bin_weights.clear();
        for pass in passes {
            let mut bin = pass.bin;
            for seg in &mut bin.segments {
                seg.id = ids.next_id();
            }
            report.bin_populations.push(bin.len());
            report.bin_weights.push(bin.weight());
            exact.push(pass.exact);
            if self.config.do_thresholds {
                self.report_thresholds(&bin, &mut report.diagnostics);
            }
            out.extend(bin.segments);
        }

        self.check_post(incoming, &out, &occupied, &exact, report)?;
        tracing::info!(
            iteration,
            walkers = out.len(),
            occupied = occupied.iter().filter(|&&o| o).count(),
            weight = total_weight(&out),
            "population control complete"
        );
        Ok((out, ids.peek()))
    }

    fn check_pre(&self, bins: &[Bin]) -> Result<()> {
        for bin in bins {
            if !bin.is_empty() && bin.target_count == 0 {
                return Err(WeError::config(format!(
                    "bin {} holds {} walkers (weight {:e}) but its target count is 0",
                    bin.index,
                    bin.len(),
                    bin.weight()
                )));
            }
        }
        Ok(())
    }

    fn check_post(
        &self,
        incoming: f64,
        out: &[Segment],
        occupied: &[bool],
        exact: &[bool],
        report: &mut IterationReport,
    ) -> Result<()> {
        let outgoing = total_weight(out);
        if (outgoing - incoming).abs() > WEIGHT_RTOL * incoming.abs().max(f64::MIN_POSITIVE) {
            return Err(WeError::consistency(format!(
                "weight not conserved: {incoming:.17e} in, {outgoing:.17e} out"
            )));
        }
        for (b, (&pop, &was_occupied)) in report.bin_populations.iter().zip(occupied).enumerate() {
            if !was_occupied {
                continue;
            }
            if pop == 0 {
                return Err(WeError::consistency(format!("bin {b} received weight but ended empty")));
            }
            let target = self.target_counts[b];
            if pop != target {
                if exact[b] && !self.config.do_thresholds {
                    return Err(WeError::consistency(format!(
                        "bin {b}: {pop} walkers after count adjustment, target {target}"
                    )));
                }
                report.diagnostics.push(Diagnostic::TargetCountMissed {
                    bin: b,
                    target,
                    actual: pop,
                });
            }
        }
        Ok(())
    }

    fn report_thresholds(&self, bin: &Bin, diagnostics: &mut Diagnostics) {
        for seg in &bin.segments {
            let bound = match (self.config.largest_allowed_weight, self.config.smallest_allowed_weight) {
                (Some(max), _) if seg.weight > max && !is_close(seg.weight, max) => max,
                (_, Some(min)) if seg.weight < min && !is_close(seg.weight, min) => min,
                _ => continue,
            };
            diagnostics.push(Diagnostic::ThresholdUnsatisfiable {
                bin: bin.index,
                segment: seg.id,
                weight: seg.weight,
                bound,
            });
        }
    }

    /// Run population control on a single bin.
    ///
    /// Walker ids in the result are only unique within the bin; the
    /// iteration-level entry points renumber them.
    pub fn run_bin(&self, bin: Bin, iteration: u64) -> Result<Bin> {
        if !bin.is_empty() && bin.target_count == 0 {
            return Err(WeError::config(format!("bin {} has target count 0", bin.index)));
        }
        self.pass_bin(bin, iteration).map(|p| p.bin)
    }

    fn pass_bin(&self, mut bin: Bin, iteration: u64) -> Result<BinPass> {
        if bin.is_empty() {
            return Ok(BinPass { bin, exact: true });
        }
        let target = bin.target_count;
        let mut rng = ChaCha8Rng::seed_from_u64(bin_seed(self.config.rng_seed, iteration, bin.index));
        let first_local = bin.segments.iter().map(|s| s.id.0).max().map_or(0, |m| m + 1);
        let mut ids = IdSource::starting_at(first_local);
        let params = self.params(bin.weight() / target as f64);

        let mut groups = self.subgroups.partition(std::mem::take(&mut bin.segments));
        tracing::debug!(
            bin = bin.index,
            target,
            subgroups = groups.len(),
            ideal = params.ideal_weight,
            "bin pass"
        );

        let exact = if groups.len() >= target {
            for group in groups.iter_mut().filter(|g| g.len() > 1) {
                self.collapse(group, &params, &mut ids, &mut rng)?;
            }
            if population(&groups) > target {
                self.adjust_count(&mut groups, target, &params, &mut ids, &mut rng)?;
            }
            true
        } else {
            for group in groups.iter_mut() {
                self.split_by_weight(group, &params, &mut ids)?;
                self.merge_by_weight(group, &params, &mut ids, &mut rng)?;
            }
            if self.config.do_adjust_counts {
                self.adjust_count(&mut groups, target, &params, &mut ids, &mut rng)?;
            }
            self.config.do_adjust_counts
        };

        if self.config.do_thresholds {
            for group in groups.iter_mut() {
                self.split_by_threshold(group, &params, &mut ids)?;
                self.merge_by_threshold(group, &params, &mut ids, &mut rng)?;
            }
        }

        bin.segments = groups.into_iter().flatten().collect();
        Ok(BinPass { bin, exact })
    }

    // ---------------------------------------------------------------------
    // Per-subgroup operations
    // ---------------------------------------------------------------------

    fn collapse(
        &self,
        group: &mut Vec<Segment>,
        params: &SelectionParams,
        ids: &mut IdSource,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        let sel = self.selection.select(group, SelectionKind::CollapseAll, params);
        let batch = extract(group, &sel.eligible);
        merge_walkers(batch, ids, rng, group)?;
        Ok(())
    }

    fn split_by_weight(
        &self,
        group: &mut Vec<Segment>,
        params: &SelectionParams,
        ids: &mut IdSource,
    ) -> Result<()> {
        loop {
            let sel = self.selection.select(group, SelectionKind::SplitCandidates, params);
            if sel.eligible.is_empty() {
                return Ok(());
            }
            for seg in extract(group, &sel.eligible) {
                let m = split_multiplicity(seg.weight, params.ideal_weight);
                split_walker(seg, m, ids, group)?;
            }
        }
    }

    fn merge_by_weight(
        &self,
        group: &mut Vec<Segment>,
        params: &SelectionParams,
        ids: &mut IdSource,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        loop {
            let sel = self.selection.select(group, SelectionKind::MergeCandidates, params);
            if sel.eligible.len() < 2 {
                return Ok(());
            }
            let batch = extract(group, &sel.eligible);
            merge_walkers(batch, ids, rng, group)?;
        }
    }

    fn split_by_threshold(
        &self,
        group: &mut Vec<Segment>,
        params: &SelectionParams,
        ids: &mut IdSource,
    ) -> Result<()> {
        let Some(max) = params.largest_allowed_weight else {
            return Ok(());
        };
        loop {
            let sel = self
                .selection
                .select(group, SelectionKind::ThresholdSplitCandidates, params);
            // walkers needing too many pieces stay put and are reported later
            let splittable: Vec<usize> = sel
                .eligible
                .into_iter()
                .filter(|&i| split_multiplicity(group[i].weight, max) <= MAX_THRESHOLD_PIECES)
                .collect();
            if splittable.is_empty() {
                return Ok(());
            }
            for seg in extract(group, &splittable) {
                let m = split_multiplicity(seg.weight, max);
                split_walker(seg, m, ids, group)?;
            }
        }
    }

    fn merge_by_threshold(
        &self,
        group: &mut Vec<Segment>,
        params: &SelectionParams,
        ids: &mut IdSource,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        loop {
            let sel = self
                .selection
                .select(group, SelectionKind::ThresholdMergeCandidates, params);
            if sel.eligible.len() < 2 {
                return Ok(());
            }
            let batch = extract(group, &sel.eligible);
            merge_walkers(batch, ids, rng, group)?;
        }
    }

    /// Subgroup indices in the order AdjustCount visits them.
    fn group_order(&self, groups: &[Vec<Segment>]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..groups.len()).filter(|&g| !groups[g].is_empty()).collect();
        match self.config.adjust_order {
            AdjustOrder::AggregateWeight => {
                order.sort_by(|&a, &b| total_weight(&groups[a]).total_cmp(&total_weight(&groups[b])))
            }
            AdjustOrder::Membership => order.sort_by_key(|&g| groups[g].len()),
        }
        order
    }

    fn adjust_count(
        &self,
        groups: &mut Vec<Vec<Segment>>,
        target: usize,
        params: &SelectionParams,
        ids: &mut IdSource,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        if groups.len() > target {
            let all: Vec<Segment> = groups.drain(..).flatten().collect();
            groups.push(all);
        }
        let mut count = population(groups);

        while count < target {
            // heaviest walker of the bin; equal weights go to the earlier subgroup
            let mut best: Option<(usize, usize, f64)> = None;
            for g in self.group_order(groups) {
                let sel = self.selection.select(&groups[g], SelectionKind::AdjustSort, params);
                let Some(&i) = sel.order.last() else { continue };
                let w = groups[g][i].weight;
                if best.is_none_or(|(_, _, bw)| w > bw) {
                    best = Some((g, i, w));
                }
            }
            let Some((g, heaviest, _)) = best else { break };
            tracing::trace!(subgroup = g, "adjusting count by splitting");
            let group = &mut groups[g];
            for seg in extract(group, &[heaviest]) {
                split_walker(seg, 2, ids, group)?;
            }
            count += 1;
        }

        while count > target {
            let Some(g) = self
                .group_order(groups)
                .into_iter()
                .find(|&g| groups[g].len() >= 2)
            else {
                break;
            };
            let group = &mut groups[g];
            let sel = self.selection.select(group, SelectionKind::AdjustSort, params);
            let lightest = [sel.order[0], sel.order[1]];
            tracing::trace!(subgroup = g, "adjusting count by merging");
            let batch = extract(group, &lightest);
            merge_walkers(batch, ids, rng, group)?;
            count -= 1;
        }
        Ok(())
    }
}

fn population(groups: &[Vec<Segment>]) -> usize {
    groups.iter().map(Vec::len).sum()
}

fn stack_points(points: impl Iterator<Item = Vec<f64>>) -> Result<Array2<f64>> {
    let points: Vec<Vec<f64>> = points.collect();
    let ndim = points.first().map_or(0, Vec::len);
    if let Some((i, p)) = points.iter().enumerate().find(|(_, p)| p.len() != ndim) {
        return Err(WeError::consistency(format!(
            "walker {i} has {} coordinates, expected {ndim}",
            p.len()
        )));
    }
    let n = points.len();
    let flat: Vec<f64> = points.into_iter().flatten().collect();
    Array2::from_shape_vec((n, ndim), flat).map_err(|e| WeError::consistency(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{NopMapper, RectilinearBinMapper};

    fn driver(config: DriverConfig, target: usize) -> WeDriver {
        WeDriver::new(
            config,
            Box::new(NopMapper),
            vec![target],
            Vec::new(),
            &PolicyRegistry::default(),
        )
        .unwrap()
    }

    fn bin(weights: &[f64], target: usize) -> Bin {
        let mut b = Bin::new(0, target);
        b.segments = weights
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                Segment::at_point(SegmentId(i as u64), w, &[i as f64])
                    .with_parent(Parent::Segment(SegmentId(1000 + i as u64)))
            })
            .collect();
        b
    }

    fn weights(b: &Bin) -> Vec<f64> {
        let mut w: Vec<f64> = b.segments.iter().map(|s| s.weight).collect();
        w.sort_by(f64::total_cmp);
        w
    }

    #[test]
    fn seeds_differ_per_bin_and_iteration() {
        assert_ne!(bin_seed(1, 1, 0), bin_seed(1, 1, 1));
        assert_ne!(bin_seed(1, 1, 0), bin_seed(1, 2, 0));
        assert_eq!(bin_seed(5, 3, 2), bin_seed(5, 3, 2));
    }

    #[test]
    fn homogeneous_bin_at_target_is_untouched() {
        let d = driver(DriverConfig::default(), 4);
        let input = bin(&[0.25; 4], 4);
        let out = d.run_bin(input.clone(), 1).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn collapse_branch_merges_subgroups_then_adjusts() {
        let cfg = DriverConfig {
            subgroup_policy: "lineage".into(),
            ..DriverConfig::default()
        };
        let d = driver(cfg, 2);
        // three families (parents 1000, 1001, 1002) for a target of two
        let out = d.run_bin(bin(&[0.2, 0.3, 0.5], 2), 1).unwrap();
        assert_eq!(out.len(), 2);
        assert!((out.weight() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn adjust_disabled_leaves_residual_count() {
        let cfg = DriverConfig {
            do_adjust_counts: false,
            ..DriverConfig::default()
        };
        let d = driver(cfg, 2);
        let out = d.run_bin(bin(&[0.4, 0.3, 0.2, 0.1], 2), 1).unwrap();
        // merge of 0.1 + 0.2 only; no count adjustment afterwards
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn grow_splits_heaviest_walker_across_subgroups() {
        let cfg = DriverConfig {
            subgroup_policy: "lineage".into(),
            ..DriverConfig::default()
        };
        let d = driver(cfg, 4);
        let mut b = bin(&[0.1, 0.45, 0.45], 4);
        b.segments[2].parent = Some(Parent::Segment(SegmentId(1001)));
        // families {0.1} and {0.45, 0.45}; the light family comes first
        let out = d.run_bin(b, 1).unwrap();
        assert_eq!(weights(&out), vec![0.1, 0.225, 0.225, 0.45]);
    }

    #[test]
    fn membership_order_grows_to_target() {
        let cfg = DriverConfig {
            subgroup_policy: "lineage".into(),
            adjust_order: AdjustOrder::Membership,
            ..DriverConfig::default()
        };
        let d = driver(cfg, 5);
        let mut b = bin(&[0.3, 0.3, 0.4], 5);
        b.segments[1].parent = Some(Parent::Segment(SegmentId(1000)));
        // families: {0.3, 0.3} and {0.4}; two extra walkers needed
        let out = d.run_bin(b, 1).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(weights(&out), vec![0.15, 0.15, 0.2, 0.2, 0.3]);
    }

    #[test]
    fn zero_target_with_walkers_is_configuration_error() {
        let d = driver(DriverConfig::default(), 0);
        let err = d.run_bin(bin(&[1.0], 0), 1).unwrap_err();
        assert!(matches!(err, WeError::Configuration { .. }));
    }

    #[test]
    fn target_count_length_must_match_mapper() {
        let mapper = RectilinearBinMapper::new(vec![vec![0.0, 1.0, 2.0]]).unwrap();
        let err = WeDriver::new(
            DriverConfig::default(),
            Box::new(mapper),
            vec![4],
            Vec::new(),
            &PolicyRegistry::default(),
        )
        .unwrap_err();
        assert!(matches!(err, WeError::Configuration { .. }));
    }

    #[test]
    fn stack_points_checks_dimensions() {
        assert!(stack_points(vec![vec![0.0, 1.0], vec![2.0]].into_iter()).is_err());
        let a = stack_points(vec![vec![0.0, 1.0], vec![2.0, 3.0]].into_iter()).unwrap();
        assert_eq!(a.shape(), &[2, 2]);
    }
}
