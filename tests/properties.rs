use proptest::prelude::*;

use weresample::config::DriverConfig;
use weresample::mapping::{NopMapper, RectilinearBinMapper};
use weresample::population::{
    InitialState, PolicyRegistry, SegmentStore, WeDriver, split_multiplicity,
};

fn states_at(points: &[f64]) -> Vec<InitialState> {
    points
        .iter()
        .enumerate()
        .map(|(id, &x)| InitialState {
            id: id as u64,
            pcoord: vec![x],
        })
        .collect()
}

proptest! {
    #[test]
    fn single_bin_hits_target_and_conserves_weight(
        weights in prop::collection::vec(1e-3f64..1.0, 1..20),
        target in 1usize..12,
        seed in any::<u64>(),
    ) {
        let cfg = DriverConfig { rng_seed: seed, ..DriverConfig::default() };
        let mut driver = WeDriver::new(cfg, Box::new(NopMapper), vec![target], Vec::new(), &PolicyRegistry::default()).unwrap();
        let mut store = SegmentStore::new();
        let points = vec![0.0; weights.len()];
        driver.populate_initial(&mut store, &states_at(&points), &weights).unwrap();

        let before: f64 = weights.iter().sum();
        let after = store.current_weight();
        prop_assert!((after - before).abs() <= 1e-9 * before);
        prop_assert_eq!(store.current.len(), target);
        prop_assert!(store.current.iter().all(|s| s.weight > 0.0));
    }

    #[test]
    fn every_occupied_bin_reaches_its_target(
        walkers in prop::collection::vec((0.0f64..1.0, 1e-3f64..1.0), 1..30),
        targets in prop::collection::vec(1usize..6, 4),
        subgroup in prop::sample::select(vec!["trivial", "lineage", "cluster"]),
    ) {
        let cfg = DriverConfig { subgroup_policy: subgroup.to_string(), parallel: false, ..DriverConfig::default() };
        let mapper = RectilinearBinMapper::new(vec![vec![0.0, 0.25, 0.5, 0.75, 1.0]]).unwrap();
        let mut driver = WeDriver::new(cfg, Box::new(mapper), targets.clone(), Vec::new(), &PolicyRegistry::default()).unwrap();
        let points: Vec<f64> = walkers.iter().map(|w| w.0).collect();
        let weights: Vec<f64> = walkers.iter().map(|w| w.1).collect();
        let mut store = SegmentStore::new();
        let report = driver.populate_initial(&mut store, &states_at(&points), &weights).unwrap();

        for (b, &pop) in report.bin_populations.iter().enumerate() {
            let occupied = points.iter().any(|&x| ((x * 4.0).floor() as usize).min(3) == b);
            if occupied {
                prop_assert_eq!(pop, targets[b]);
            } else {
                prop_assert_eq!(pop, 0);
            }
        }
        let before: f64 = weights.iter().sum();
        prop_assert!((store.current_weight() - before).abs() <= 1e-9 * before);
    }

    #[test]
    fn split_pieces_never_exceed_unit(weight in 1e-6f64..1.0, unit in 1e-6f64..1.0) {
        let m = split_multiplicity(weight, unit);
        prop_assert!(m >= 2);
        prop_assert!(weight / m as f64 <= unit * (1.0 + 2e-9));
    }
}
