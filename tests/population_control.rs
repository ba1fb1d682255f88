use ndarray::Array2;

use weresample::config::DriverConfig;
use weresample::error::{Diagnostic, WeError};
use weresample::mapping::{BinMapper, NopMapper, RectilinearBinMapper};
use weresample::population::{
    InitialState, InitialStatePool, Parent, PolicyRegistry, Segment, SegmentId, SegmentStore,
    SinkRegion, VecPool, WeDriver,
};

fn driver_with(
    config: DriverConfig,
    mapper: Box<dyn BinMapper>,
    targets: Vec<usize>,
    sinks: Vec<SinkRegion>,
) -> WeDriver {
    WeDriver::new(config, mapper, targets, sinks, &PolicyRegistry::default()).unwrap()
}

fn single_bin(config: DriverConfig, target: usize) -> WeDriver {
    driver_with(config, Box::new(NopMapper), vec![target], Vec::new())
}

/// Walker `id` that travelled from 0 to `end`.
fn walker(id: u64, weight: f64, end: f64) -> Segment {
    let traj = Array2::from_shape_vec((2, 1), vec![0.0, end]).unwrap();
    Segment::new(SegmentId(id), weight, traj).with_parent(Parent::Segment(SegmentId(100 + id)))
}

fn store_of(walkers: Vec<Segment>) -> SegmentStore {
    let next_id = walkers.iter().map(|s| s.id.0 + 1).max().unwrap_or(0);
    SegmentStore {
        iteration: 1,
        current: walkers,
        next: Vec::new(),
        next_id,
    }
}

fn sorted_weights(segments: &[Segment]) -> Vec<f64> {
    let mut w: Vec<f64> = segments.iter().map(|s| s.weight).collect();
    w.sort_by(f64::total_cmp);
    w
}

fn total(segments: &[Segment]) -> f64 {
    segments.iter().map(|s| s.weight).sum()
}

fn origin_states(n: u64) -> Vec<InitialState> {
    (0..n)
        .map(|id| InitialState {
            id,
            pcoord: vec![0.0],
        })
        .collect()
}

#[test]
fn four_walkers_reduce_to_target_of_two() {
    let mut driver = single_bin(DriverConfig::default(), 2);
    let mut store = SegmentStore::new();
    let report = driver
        .populate_initial(&mut store, &origin_states(4), &[0.4, 0.3, 0.2, 0.1])
        .unwrap();

    assert_eq!(store.current.len(), 2);
    assert!((total(&store.current) - 1.0).abs() < 1e-12);
    for s in &store.current {
        assert!((s.weight - 0.5).abs() <= 0.1 + 1e-9, "weight {}", s.weight);
    }
    assert_eq!(report.bin_populations, vec![2]);
    assert!(report.diagnostics.is_empty());
}

#[test]
fn single_walker_splits_three_ways() {
    let mut driver = single_bin(DriverConfig::default(), 3);
    let mut store = SegmentStore::new();
    driver
        .populate_initial(&mut store, &origin_states(1), &[0.9])
        .unwrap();

    assert_eq!(store.current.len(), 3);
    for s in &store.current {
        assert!((s.weight - 0.3).abs() < 1e-12);
        assert_eq!(s.parent, Some(Parent::InitialState(0)));
    }
}

#[test]
fn heavy_walker_is_split_under_largest_allowed_weight() {
    let cfg = DriverConfig {
        do_thresholds: true,
        largest_allowed_weight: Some(0.5),
        ..DriverConfig::default()
    };
    let mut driver = single_bin(cfg, 2);
    let mut store = store_of(vec![walker(0, 0.9, 0.0), walker(1, 0.1, 0.0)]);
    let mut pool = VecPool::default();
    let report = driver.construct_next(&mut store, &mut pool).unwrap();

    assert_eq!(sorted_weights(&store.next), vec![0.1, 0.45, 0.45]);
    assert!(
        report
            .diagnostics
            .iter()
            .all(|d| !matches!(d, Diagnostic::ThresholdUnsatisfiable { .. }))
    );
    // thresholds outrank the target count
    assert!(report.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::TargetCountMissed {
            bin: 0,
            target: 2,
            actual: 3
        }
    )));
}

#[test]
fn exhausted_pool_leaves_walkers_pending() {
    let sink = SinkRegion::new("product", vec![1.0], vec![10.0]);
    let mut driver = driver_with(DriverConfig::default(), Box::new(NopMapper), vec![2], vec![sink]);
    let mut store = store_of(vec![walker(0, 0.5, 2.0), walker(1, 0.5, 3.0)]);
    let mut pool = VecPool::default();
    let report = driver.construct_next(&mut store, &mut pool).unwrap();

    assert_eq!(
        report.diagnostics.entries,
        vec![Diagnostic::RecyclePoolExhausted { count: 2 }]
    );
    assert_eq!(report.diagnostics.unmet_recycles(), 2);
    assert!(report.used_initial_states.is_empty());
    assert_eq!(sorted_weights(&store.next), vec![0.5, 0.5]);
    assert!(store.next.iter().all(|s| s.recycle_pending));
    assert_eq!(report.recycled[0].count, 0);
}

#[test]
fn recycled_walker_restarts_from_initial_state() {
    let sink = SinkRegion::new("product", vec![1.0], vec![10.0]);
    let mut driver = driver_with(DriverConfig::default(), Box::new(NopMapper), vec![2], vec![sink]);
    let mut store = store_of(vec![walker(0, 0.5, 2.0), walker(1, 0.5, 0.5)]);
    let mut pool = VecPool::new(vec![InitialState {
        id: 42,
        pcoord: vec![-1.0],
    }]);
    let report = driver.construct_next(&mut store, &mut pool).unwrap();

    assert_eq!(pool.available(), 0);
    assert_eq!(report.used_initial_states, vec![42]);
    assert_eq!(report.recycled[0].label, "product");
    assert_eq!(report.recycled[0].count, 1);
    assert!((report.recycled[0].weight - 0.5).abs() < 1e-15);

    let restarted = store
        .next
        .iter()
        .find(|s| s.parent == Some(Parent::InitialState(42)))
        .unwrap();
    assert_eq!(restarted.pcoord[[0, 0]], -1.0);
    assert_eq!(restarted.wtg_parents.as_slice(), &[SegmentId(0)]);

    let continued = store
        .next
        .iter()
        .find(|s| s.parent == Some(Parent::Segment(SegmentId(1))))
        .unwrap();
    assert_eq!(continued.pcoord[[0, 0]], 0.5);
}

#[test]
fn assignment_failure_releases_taken_states() {
    let sink = SinkRegion::new("product", vec![2.0], vec![3.0]);
    let mapper = RectilinearBinMapper::new(vec![vec![0.0, 1.0]]).unwrap();
    let mut driver = driver_with(DriverConfig::default(), Box::new(mapper), vec![2], vec![sink]);
    // first walker recycles into [0, 1); second lands outside every bin
    let mut store = store_of(vec![walker(0, 0.5, 2.5), walker(1, 0.5, 7.0)]);
    let before = store.clone();
    let mut pool = VecPool::new(vec![InitialState {
        id: 5,
        pcoord: vec![0.5],
    }]);

    let err = driver.construct_next(&mut store, &mut pool).unwrap_err();
    assert!(matches!(err, WeError::Assignment(_)));
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.take().map(|s| s.id), Some(5));
    assert_eq!(store, before);
}

#[test]
fn walkers_in_zero_target_bin_are_rejected() {
    let mapper = RectilinearBinMapper::new(vec![vec![0.0, 1.0, 2.0]]).unwrap();
    let mut driver = driver_with(DriverConfig::default(), Box::new(mapper), vec![2, 0], Vec::new());
    let mut store = store_of(vec![walker(0, 0.5, 0.5), walker(1, 0.5, 1.5)]);
    let before = store.clone();
    let err = driver
        .construct_next(&mut store, &mut VecPool::default())
        .unwrap_err();
    assert!(matches!(err, WeError::Configuration { .. }));
    assert_eq!(store, before);
}

#[test]
fn ids_are_renumbered_and_lineage_is_tracked() {
    let mut driver = single_bin(DriverConfig::default(), 2);
    let mut store = store_of(vec![
        walker(0, 0.4, 0.0),
        walker(1, 0.3, 0.0),
        walker(2, 0.2, 0.0),
        walker(3, 0.1, 0.0),
    ]);
    driver
        .construct_next(&mut store, &mut VecPool::default())
        .unwrap();

    assert_eq!(
        store.next.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![SegmentId(4), SegmentId(5)]
    );
    assert_eq!(store.next_id, 6);

    let heavy = store.next.iter().find(|s| (s.weight - 0.6).abs() < 1e-12).unwrap();
    assert_eq!(
        heavy.wtg_parents.as_slice(),
        &[SegmentId(1), SegmentId(2), SegmentId(3)]
    );
    let light = store.next.iter().find(|s| (s.weight - 0.4).abs() < 1e-12).unwrap();
    assert_eq!(light.wtg_parents.as_slice(), &[SegmentId(0)]);
    assert_eq!(light.parent, Some(Parent::Segment(SegmentId(0))));
}

#[test]
fn isolated_light_walker_is_reported_not_forced() {
    let cfg = DriverConfig {
        do_thresholds: true,
        smallest_allowed_weight: Some(0.3),
        subgroup_policy: "lineage".into(),
        ..DriverConfig::default()
    };
    let mut driver = single_bin(cfg, 2);
    let mut store = store_of(vec![walker(0, 0.9, 0.0), walker(1, 0.1, 0.0)]);
    let report = driver
        .construct_next(&mut store, &mut VecPool::default())
        .unwrap();

    assert_eq!(sorted_weights(&store.next), vec![0.1, 0.9]);
    let light_id = store.next.iter().find(|s| s.weight < 0.5).map(|s| s.id).unwrap();
    assert!(report.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::ThresholdUnsatisfiable { bin: 0, segment, bound, .. }
            if *segment == light_id && *bound == 0.3
    )));
}

#[test]
fn rebin_after_mapper_change() {
    let mut driver = single_bin(DriverConfig::default(), 1);
    let mut store = SegmentStore::new();
    driver
        .populate_initial(&mut store, &origin_states(1), &[1.0])
        .unwrap();
    assert_eq!(store.current.len(), 1);

    let mapper = RectilinearBinMapper::new(vec![vec![-1.0, 1.0]]).unwrap();
    driver.set_mapper(Box::new(mapper), vec![4]).unwrap();
    let report = driver.rebin_current(&mut store).unwrap();

    assert_eq!(report.bin_populations, vec![4]);
    assert_eq!(sorted_weights(&store.current), vec![0.25; 4]);
    assert!(driver.set_mapper(Box::new(NopMapper), vec![1, 1]).is_err());
}

#[test]
fn paired_policy_merges_two_at_a_time() {
    let cfg = DriverConfig {
        sorting_policy: "paired".into(),
        do_adjust_counts: false,
        ..DriverConfig::default()
    };
    let mut driver = single_bin(cfg, 2);
    let mut store = store_of(vec![
        walker(0, 0.55, 0.0),
        walker(1, 0.15, 0.0),
        walker(2, 0.15, 0.0),
        walker(3, 0.15, 0.0),
    ]);
    let report = driver
        .construct_next(&mut store, &mut VecPool::default())
        .unwrap();
    // pairs merge twice: 0.15 + 0.15, then 0.15 + 0.3
    assert_eq!(store.next.len(), 2);
    assert!((total(&store.next) - 1.0).abs() < 1e-12);
    assert!(report.diagnostics.is_empty());
}

#[test]
fn unknown_policy_is_configuration_error() {
    let cfg = DriverConfig {
        subgroup_policy: "nope".into(),
        ..DriverConfig::default()
    };
    let err = WeDriver::new(
        cfg,
        Box::new(NopMapper),
        vec![1],
        Vec::new(),
        &PolicyRegistry::default(),
    )
    .unwrap_err();
    assert!(matches!(err, WeError::Configuration { .. }));
}

/// Walker `id` whose own parent is `family`, i.e. a sibling of every other
/// walker split from `family`.
fn sibling(id: u64, weight: f64, family: u64) -> Segment {
    let traj = Array2::from_shape_vec((2, 1), vec![0.0, 0.0]).unwrap();
    Segment::new(SegmentId(id), weight, traj).with_parent(Parent::Segment(SegmentId(family)))
}

#[test]
fn lineage_policy_keeps_families_apart_across_iterations() {
    let cfg = DriverConfig {
        subgroup_policy: "lineage".into(),
        ..DriverConfig::default()
    };
    let mut driver = single_bin(cfg, 2);
    let mut store = store_of(vec![
        sibling(0, 0.1, 50),
        sibling(1, 0.12, 51),
        sibling(2, 0.3, 50),
        sibling(3, 0.48, 51),
    ]);
    driver
        .construct_next(&mut store, &mut VecPool::default())
        .unwrap();

    assert_eq!(store.next.len(), 2);
    let a = store.next.iter().find(|s| (s.weight - 0.4).abs() < 1e-12).unwrap();
    assert_eq!(a.wtg_parents.as_slice(), &[SegmentId(0), SegmentId(2)]);
    assert_eq!(a.family, Some(Parent::Segment(SegmentId(50))));
    let b = store.next.iter().find(|s| (s.weight - 0.6).abs() < 1e-12).unwrap();
    assert_eq!(b.wtg_parents.as_slice(), &[SegmentId(1), SegmentId(3)]);
    assert_eq!(b.family, Some(Parent::Segment(SegmentId(51))));
}

#[test]
fn light_walkers_merge_up_to_smallest_allowed_weight() {
    let cfg = DriverConfig {
        do_adjust_counts: false,
        do_thresholds: true,
        smallest_allowed_weight: Some(0.2),
        ..DriverConfig::default()
    };
    let mut driver = single_bin(cfg, 4);
    // the weight pass leaves everything alone: no split above 0.5, and only
    // one walker fits under the 0.25 merge cutoff
    let mut store = store_of(vec![
        walker(0, 0.15, 0.0),
        walker(1, 0.15, 0.0),
        walker(2, 0.35, 0.0),
        walker(3, 0.35, 0.0),
    ]);
    let report = driver
        .construct_next(&mut store, &mut VecPool::default())
        .unwrap();

    let w = sorted_weights(&store.next);
    assert_eq!(w.len(), 3);
    assert!((w[0] - 0.3).abs() < 1e-12);
    assert!((total(&store.next) - 1.0).abs() < 1e-12);
    assert!(
        report
            .diagnostics
            .iter()
            .all(|d| !matches!(d, Diagnostic::ThresholdUnsatisfiable { .. }))
    );
    assert!(report.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::TargetCountMissed {
            bin: 0,
            target: 4,
            actual: 3
        }
    )));
}

#[test]
fn paired_policy_merges_light_walkers_two_at_a_time() {
    let cfg = DriverConfig {
        sorting_policy: "paired".into(),
        do_adjust_counts: false,
        do_thresholds: true,
        smallest_allowed_weight: Some(0.2),
        ..DriverConfig::default()
    };
    let mut driver = single_bin(cfg, 5);
    let mut store = store_of(vec![
        walker(0, 0.12, 0.0),
        walker(1, 0.12, 0.0),
        walker(2, 0.12, 0.0),
        walker(3, 0.32, 0.0),
        walker(4, 0.32, 0.0),
    ]);
    let report = driver
        .construct_next(&mut store, &mut VecPool::default())
        .unwrap();

    // one pair merges; the third light walker has no partner left
    let w = sorted_weights(&store.next);
    assert_eq!(w.len(), 4);
    assert!((w[0] - 0.12).abs() < 1e-12);
    assert!((w[1] - 0.24).abs() < 1e-12);
    assert!((total(&store.next) - 1.0).abs() < 1e-12);
    let light = store.next.iter().find(|s| s.weight < 0.2).map(|s| s.id).unwrap();
    assert!(report.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::ThresholdUnsatisfiable { segment, bound, .. }
            if *segment == light && *bound == 0.2
    )));
}

#[test]
fn tiny_largest_allowed_weight_is_reported_not_split() {
    let cfg = DriverConfig {
        do_thresholds: true,
        largest_allowed_weight: Some(1e-12),
        ..DriverConfig::default()
    };
    let mut driver = single_bin(cfg, 1);
    let mut store = store_of(vec![walker(0, 1.0, 0.0)]);
    let report = driver
        .construct_next(&mut store, &mut VecPool::default())
        .unwrap();

    assert_eq!(store.next.len(), 1);
    assert!(report.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::ThresholdUnsatisfiable { bound, .. } if *bound == 1e-12
    )));
}
