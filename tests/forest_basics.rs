mod common;

use cutforest::{Error, ForestBuilder};

#[test]
fn empty_forest_scores_zero_and_tracks_one_reference() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(1)
        .sample_size(4)
        .random_seed(42)
        .build::<f32>()
        .unwrap();

    assert_eq!(forest.anomaly_score(&[0.0, 0.0]).unwrap(), 0.0);

    forest.update(&[0.0, 0.0]).unwrap();
    // one update is still inside the warm-up window
    assert_eq!(forest.anomaly_score(&[0.0, 0.0]).unwrap(), 0.0);

    let state = forest.snapshot();
    let total_references: u64 = state.point_store.ref_count.iter().map(|&c| c as u64).sum();
    assert_eq!(total_references, 1);
    forest.check_consistency().unwrap();
}

#[test]
fn wrong_length_points_are_rejected_without_effect() {
    let mut forest = ForestBuilder::new(3)
        .number_of_trees(2)
        .sample_size(8)
        .build::<f32>()
        .unwrap();
    assert!(matches!(
        forest.update(&[1.0, 2.0]),
        Err(Error::BadArgument { .. })
    ));
    assert!(matches!(
        forest.anomaly_score(&[1.0]),
        Err(Error::BadArgument { .. })
    ));
    assert_eq!(forest.total_updates(), 0);
    forest.check_consistency().unwrap();
}

#[test]
fn repeated_point_collapses_and_scores_low() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(1)
        .sample_size(4)
        .random_seed(42)
        .build::<f32>()
        .unwrap();
    for _ in 0..1024 {
        forest.update(&[1.0, 1.0]).unwrap();
    }
    forest.check_consistency().unwrap();

    let same = forest.anomaly_score(&[1.0, 1.0]).unwrap();
    let near = forest.anomaly_score(&[1.01, 1.01]).unwrap();
    let far = forest.anomaly_score(&[100.0, 100.0]).unwrap();
    // the in-sample point is damped well below unseen points
    assert!(same < 1.0);
    assert!(same < near);
    assert!(far >= near);
}

#[test]
fn distance_orders_scores_around_a_tight_cluster() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(30)
        .sample_size(128)
        .random_seed(7)
        .build::<f32>()
        .unwrap();
    for point in common::single_cluster(2000, &[1.0, 1.0], 0.05, 11) {
        forest.update(&point).unwrap();
    }
    let near = forest.anomaly_score(&[1.01, 1.01]).unwrap();
    let mid = forest.anomaly_score(&[2.0, 2.0]).unwrap();
    let far = forest.anomaly_score(&[100.0, 100.0]).unwrap();
    assert!(near < mid, "near {} mid {}", near, mid);
    assert!(mid < far, "mid {} far {}", mid, far);
    assert!(near < 1.3, "in-cluster probe scored {}", near);
}

#[test]
fn resubmitted_point_scores_never_increase() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(1)
        .sample_size(256)
        .initial_accept_fraction(1.0)
        .output_after(16)
        .random_seed(3)
        .build::<f32>()
        .unwrap();
    for point in common::single_cluster(64, &[0.0, 0.0], 1.0, 5) {
        forest.update(&point).unwrap();
    }

    let probe = [4.0f32, -3.0];
    let mut last = f64::MAX;
    for _ in 0..5 {
        forest.update(&probe).unwrap();
        let score = forest.anomaly_score(&probe).unwrap();
        assert!(
            score <= last + 1e-9,
            "score increased from {} to {}",
            last,
            score
        );
        last = score;
    }
    forest.check_consistency().unwrap();
}

#[test]
fn attribution_sums_to_the_anomaly_score() {
    let mut forest = ForestBuilder::new(3)
        .number_of_trees(20)
        .sample_size(64)
        .random_seed(19)
        .build::<f32>()
        .unwrap();
    for point in common::single_cluster(1000, &[0.0, 5.0, -5.0], 0.5, 23) {
        forest.update(&point).unwrap();
    }

    for probe in [
        vec![0.0f32, 5.0, -5.0],
        vec![10.0, 5.0, -5.0],
        vec![0.0, -5.0, 5.0],
        vec![100.0, 100.0, 100.0],
    ] {
        let score = forest.anomaly_score(&probe).unwrap();
        let attribution = forest.anomaly_attribution(&probe).unwrap();
        assert!(
            (attribution.total() - score).abs() <= 1e-6 * score.max(1.0),
            "attribution total {} vs score {}",
            attribution.total(),
            score
        );
    }

    // a probe that is high in one dimension attributes there, and upward
    let attribution = forest.anomaly_attribution(&[30.0, 5.0, -5.0]).unwrap();
    assert!(attribution.high[0] > attribution.total() * 0.5);
    assert!(attribution.low[0] < attribution.total() * 0.01);
}

#[test]
fn auxiliary_query_modes_agree_with_the_plain_score() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(16)
        .sample_size(64)
        .center_of_mass_enabled(true)
        .store_sequence_indexes(true)
        .random_seed(31)
        .build::<f32>()
        .unwrap();
    for point in common::single_cluster(1000, &[2.0, -2.0], 0.3, 37) {
        forest.update(&point).unwrap();
    }
    forest.check_consistency().unwrap();

    let probe = [2.1f32, -2.2];
    let full = forest.anomaly_score(&probe).unwrap();

    let (sum, count) = forest
        .collect_scores(&probe, (0.0f64, 0usize), |value, state| {
            state.0 += value;
            state.1 += 1;
        })
        .unwrap();
    assert_eq!(count, 16);
    assert!((sum / count as f64 - full).abs() < 1e-9);

    let converging = forest.anomaly_score_converging(&probe).unwrap();
    assert!((converging - full).abs() < 0.5);

    let displacement = forest.displacement_score(&probe).unwrap();
    let displacement_far = forest.displacement_score(&[50.0, 50.0]).unwrap();
    assert!(displacement_far > displacement);
}
