mod common;

use cutforest::ForestBuilder;

#[test]
fn sustained_churn_never_exhausts_the_point_store() {
    let number_of_trees = 10;
    let sample_size = 32;
    let mut forest = ForestBuilder::new(2)
        .number_of_trees(number_of_trees)
        .sample_size(sample_size)
        .time_decay(0.01)
        .random_seed(47)
        .build::<f32>()
        .unwrap();

    let means = vec![vec![0.0f32, 0.0], vec![4.0, 4.0]];
    let deviations = vec![vec![1.0f32, 1.0], vec![1.0, 1.0]];
    let stream = common::gaussian_mixture(
        20 * sample_size,
        &means,
        &deviations,
        &[0.5, 0.5],
        6,
    );

    let capacity = (number_of_trees * sample_size) as u64;
    for (i, point) in stream.data.iter().enumerate() {
        forest.update(point).unwrap();
        let total_references: u64 = forest
            .snapshot()
            .point_store
            .ref_count
            .iter()
            .map(|&c| c as u64)
            .sum();
        assert!(
            total_references <= capacity,
            "reference counts {} exceed capacity {}",
            total_references,
            capacity
        );
        if i % 100 == 99 {
            forest.check_consistency().unwrap();
        }
    }
}

#[test]
fn shingled_streams_share_storage() {
    // base dimension 1, shingle size 4: consecutive points overlap by 3
    let mut forest = ForestBuilder::new(4)
        .shingle_size(4)
        .number_of_trees(5)
        .sample_size(16)
        .random_seed(53)
        .build::<f32>()
        .unwrap();

    let mut window = [0.0f32; 4];
    for i in 0..512 {
        let next = ((i * 37) % 100) as f32 / 10.0;
        window.rotate_left(1);
        window[3] = next;
        if i >= 3 {
            forest.update(&window).unwrap();
        }
    }
    forest.check_consistency().unwrap();

    // the element buffer stays near one value per update, far below the
    // four-per-update of unshingled storage
    let state = forest.snapshot();
    let used_elements = state.point_store.start_free_region;
    assert!(
        used_elements <= 2 * 512,
        "shingled storage used {} elements",
        used_elements
    );
    assert!(forest.anomaly_score(&window).unwrap() >= 0.0);
}
