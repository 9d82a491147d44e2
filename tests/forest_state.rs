mod common;

use cutforest::{ForestBuilder, RandomCutForest};

fn builder() -> ForestBuilder {
    ForestBuilder::new(3)
        .number_of_trees(20)
        .sample_size(64)
        .random_seed(1234)
}

#[test]
fn identical_builds_replay_identically() {
    let mut first = builder().build::<f32>().unwrap();
    let mut second = builder().build::<f32>().unwrap();

    let means = vec![vec![0.0f32, 1.0, -1.0], vec![5.0, 5.0, 5.0]];
    let deviations = vec![vec![0.5f32; 3], vec![0.5f32; 3]];
    let stream = common::gaussian_mixture(2000, &means, &deviations, &[0.7, 0.3], 8);
    for point in &stream.data {
        first.update(point).unwrap();
        second.update(point).unwrap();
    }

    assert_eq!(first.snapshot(), second.snapshot());
    for probe in &stream.data[..50] {
        assert_eq!(
            first.anomaly_score(probe).unwrap().to_bits(),
            second.anomaly_score(probe).unwrap().to_bits()
        );
    }
}

#[test]
fn snapshot_round_trip_preserves_scores_and_future_updates() {
    let mut forest = builder().build::<f32>().unwrap();
    let means = vec![vec![0.0f32, 0.0, 0.0], vec![8.0, -8.0, 8.0]];
    let deviations = vec![vec![0.4f32; 3], vec![0.4f32; 3]];
    let stream = common::gaussian_mixture(5000, &means, &deviations, &[0.5, 0.5], 21);
    for point in &stream.data[..4000] {
        forest.update(point).unwrap();
    }

    let state = forest.snapshot();
    let mut rebuilt = RandomCutForest::<f32>::from_state(&state).unwrap();
    rebuilt.check_consistency().unwrap();

    let probes = common::gaussian_mixture(100, &means, &deviations, &[0.5, 0.5], 77);
    for probe in &probes.data {
        let original = forest.anomaly_score(probe).unwrap();
        let replayed = rebuilt.anomaly_score(probe).unwrap();
        assert!(
            (original - replayed).abs() < 1e-10,
            "scores diverged: {} vs {}",
            original,
            replayed
        );
    }

    // identical further updates keep the two forests in lock step
    for point in &stream.data[4000..] {
        forest.update(point).unwrap();
        rebuilt.update(point).unwrap();
    }
    assert_eq!(forest.snapshot(), rebuilt.snapshot());
    for probe in &probes.data {
        assert_eq!(
            forest.anomaly_score(probe).unwrap().to_bits(),
            rebuilt.anomaly_score(probe).unwrap().to_bits()
        );
    }
}

#[test]
fn snapshot_exposes_the_packed_internals() {
    let mut forest = builder().build::<f32>().unwrap();
    for point in common::single_cluster(500, &[1.0, 2.0, 3.0], 0.3, 9) {
        forest.update(&point).unwrap();
    }
    let state = forest.snapshot();

    assert_eq!(state.components.len(), 20);
    assert_eq!(state.config.sample_size, 64);
    assert!(state.total_updates == 500);
    for component in &state.components {
        // arenas are sized for sample_size leaves and sample_size - 1
        // internal nodes
        assert_eq!(component.tree.left_index.len(), 63);
        assert_eq!(component.tree.right_index.len(), 63);
        assert!(component.sampler.weights.len() <= 64);
        assert_eq!(
            component.sampler.weights.len(),
            component.sampler.point_indices.len()
        );
    }
    let live_points = state.point_store.ref_count.iter().filter(|&&c| c > 0).count();
    assert!(live_points > 0);
}
