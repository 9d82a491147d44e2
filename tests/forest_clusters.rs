mod common;

use cutforest::ForestBuilder;

#[test]
fn bridge_point_between_two_clusters_is_anomalous() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(50)
        .sample_size(256)
        .random_seed(0)
        .build::<f32>()
        .unwrap();

    let means = vec![vec![0.0f32, 0.0], vec![10.0, 10.0]];
    let deviations = vec![vec![0.1f32, 0.1], vec![0.1, 0.1]];
    let stream = common::gaussian_mixture(10_000, &means, &deviations, &[0.5, 0.5], 1);
    for point in &stream.data {
        forest.update(point).unwrap();
    }
    forest.check_consistency().unwrap();

    let first_center = forest.anomaly_score(&[0.0, 0.0]).unwrap();
    let second_center = forest.anomaly_score(&[10.0, 10.0]).unwrap();
    let bridge = forest.anomaly_score(&[5.0, 5.0]).unwrap();

    assert!(first_center < 1.0, "first center scored {}", first_center);
    assert!(second_center < 1.0, "second center scored {}", second_center);
    assert!(bridge >= 2.0, "bridge point scored {}", bridge);
}

#[test]
fn density_is_higher_inside_a_cluster() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(20)
        .sample_size(128)
        .random_seed(5)
        .build::<f32>()
        .unwrap();
    let means = vec![vec![0.0f32, 0.0], vec![10.0, 10.0]];
    let deviations = vec![vec![0.2f32, 0.2], vec![0.2, 0.2]];
    let stream = common::gaussian_mixture(3000, &means, &deviations, &[0.5, 0.5], 2);
    for point in &stream.data {
        forest.update(point).unwrap();
    }

    let inside = forest.simple_density(&[0.0, 0.0]).unwrap();
    let outside = forest.simple_density(&[5.0, 5.0]).unwrap();
    assert!(
        inside.density() > outside.density(),
        "inside {} outside {}",
        inside.density(),
        outside.density()
    );

    // the directional decomposition carries the same total
    let directional = inside.directional_density();
    assert!((directional.total() - inside.density()).abs() < 1e-9);
}

#[test]
fn near_neighbors_come_back_sorted_with_sequence_indexes() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(20)
        .sample_size(128)
        .store_sequence_indexes(true)
        .random_seed(13)
        .build::<f32>()
        .unwrap();
    for point in common::single_cluster(2000, &[3.0, 3.0], 0.2, 17) {
        forest.update(&point).unwrap();
    }

    let neighbors = forest.near_neighbors_in_sample(&[3.0, 3.0], 5).unwrap();
    assert!(!neighbors.is_empty());
    assert!(neighbors.len() <= 5);
    for pair in neighbors.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    // every sampled point was seen at least once
    assert!(neighbors.iter().all(|n| !n.sequence_indexes.is_empty()));
    // the nearest sample point of a dense cluster is close by
    assert!(neighbors[0].distance < 1.0);
}

#[test]
fn imputation_follows_the_observed_coordinate() {
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(30)
        .sample_size(128)
        .random_seed(29)
        .build::<f32>()
        .unwrap();
    let means = vec![vec![0.0f32, 0.0], vec![10.0, 10.0]];
    let deviations = vec![vec![0.2f32, 0.2], vec![0.2, 0.2]];
    let stream = common::gaussian_mixture(4000, &means, &deviations, &[0.5, 0.5], 3);
    for point in &stream.data {
        forest.update(point).unwrap();
    }

    // a point with x near zero belongs to the first cluster
    let filled = forest.impute_missing_values(&[1], &[0.1, 0.0]).unwrap();
    assert!(filled[1].abs() < 1.5, "imputed y = {}", filled[1]);

    // and x near ten to the second
    let filled = forest.impute_missing_values(&[1], &[10.1, 0.0]).unwrap();
    assert!((filled[1] - 10.0).abs() < 1.5, "imputed y = {}", filled[1]);
}
