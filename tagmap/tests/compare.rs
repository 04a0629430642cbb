use approx::assert_relative_eq;
use tagmap::compare::{
    compare, run, split_comparison, sweep, ComparisonSettings, NamedWeights, RunKey, Sweep,
    SweepMetric,
};
use tagmap::metrics::ground_truth_metric;
use tagmap::nalgebra::{UnitQuaternion, Vector3};
use tagmap::{
    BuildOptions, Capture, Error, Pose, Prescaling, TagObservation, WeightPreset,
    WEIGHT_VECTOR_LEN,
};

const TAG: [f64; 3] = [2.0, 0.0, -3.0];

fn at(t: [f64; 3]) -> Pose {
    Pose::from_parts(Vector3::from(t), UnitQuaternion::identity())
}

fn diagonal_covariance() -> Vec<f64> {
    let mut covariance = vec![0.0; 36];
    for d in 0..6 {
        covariance[d * 7] = 1e-2;
    }
    covariance
}

/// The phone walks along x and sees one tag from every pose. The sighting at `outlier`
/// is shifted by a metre.
fn walk(n: usize, outlier: Option<usize>) -> Capture {
    let mut capture = Capture::new();
    for i in 0..n {
        let timestamp = i as f64 * 0.5;
        let x = i as f64;
        let shift = if outlier == Some(i) { 1.0 } else { 0.0 };
        capture = capture.odometry(timestamp, at([x, 0.0, 0.0])).tag(
            TagObservation::from_pose(
                timestamp,
                1,
                at([TAG[0] - x + shift, TAG[1], TAG[2]]),
            )
            .covariance(diagonal_covariance()),
        );
    }
    capture
}

fn captures() -> Vec<(String, Capture)> {
    vec![
        ("clean".to_owned(), walk(5, None)),
        ("outlier".to_owned(), walk(6, Some(3))),
    ]
}

fn key(capture: &str, prescaling: Prescaling, weights: &str) -> RunKey {
    RunKey {
        capture: capture.to_owned(),
        prescaling,
        weights: weights.to_owned(),
    }
}

#[test]
fn every_combination_gets_a_row() {
    let weights = [
        NamedWeights::from(WeightPreset::Identity),
        NamedWeights::from(WeightPreset::SensibleDefault),
    ];
    let table = compare(
        &captures(),
        &Prescaling::ALL,
        &weights,
        &ComparisonSettings::default(),
    );
    assert_eq!(table.len(), 2 * 4 * 2);
    // Pose-only sightings cannot feed pixel residuals.
    for (key, run) in table.iter() {
        if key.prescaling == Prescaling::UseSba {
            assert!(matches!(run, Err(Error::MalformedCapture(_))), "{:?}", key);
        } else {
            let outcome = run.as_ref().unwrap();
            assert!(outcome.result.final_chi2 <= outcome.result.initial_chi2);
        }
    }
    assert_eq!(table.failures(), 4);
}

#[test]
fn bad_weights_fail_only_their_runs() {
    let weights = [
        NamedWeights::from(WeightPreset::Identity),
        NamedWeights::new("short", vec![0.0; 17]),
    ];
    let table = compare(
        &captures(),
        &[Prescaling::Ones],
        &weights,
        &ComparisonSettings::default(),
    );
    assert!(matches!(
        table.get(&key("clean", Prescaling::Ones, "short")),
        Some(Err(Error::InvalidWeightVector(_)))
    ));
    assert!(matches!(
        table.get(&key("clean", Prescaling::Ones, "identity")),
        Some(Ok(_))
    ));
    assert_eq!(table.failures(), 2);
}

#[test]
fn best_run_has_lowest_chi2() {
    let weights = WeightPreset::ALL.map(NamedWeights::from);
    let strategies = [Prescaling::Ones, Prescaling::DiagCov, Prescaling::FullCov];
    let table = compare(
        &captures(),
        &strategies,
        &weights,
        &ComparisonSettings::default(),
    );
    let (best_key, best) = table.best("outlier").unwrap();
    assert_eq!(best_key.capture, "outlier");
    for (key, run) in table.iter().filter(|(key, _)| key.capture == "outlier") {
        match run {
            Ok(outcome) if outcome.result.converged() => {
                assert!(best.result.final_chi2 <= outcome.result.final_chi2, "{:?}", key)
            }
            _ => {}
        }
    }
    assert!(table.best("missing").is_none());
}

#[test]
fn refinement_drops_the_outlier() {
    let capture = walk(6, Some(3));
    let weights = NamedWeights::from(WeightPreset::Identity);
    let plain = run(
        &capture,
        Prescaling::Ones,
        &weights,
        &ComparisonSettings::default(),
    )
    .unwrap();
    assert_eq!(plain.removed_observations, 0);
    assert!(plain.result.final_chi2 > 0.1);

    let settings = ComparisonSettings {
        refine_threshold: Some(0.25),
        ..ComparisonSettings::default()
    };
    let refined = run(&capture, Prescaling::Ones, &weights, &settings).unwrap();
    assert_eq!(refined.removed_observations, 1);
    assert!(refined.result.final_chi2 < 1e-6);

    let map = refined.map();
    let truth = [(1, at(TAG)), (2, at([0.0, 0.0, 0.0]))].into_iter().collect();
    let optimized = [(1, map.tag(1).unwrap().pose), (2, map.locations[0].pose)]
        .into_iter()
        .collect();
    assert!(ground_truth_metric(&optimized, &truth).unwrap() < 1e-3);
}

#[test]
fn split_transfers_shared_tags() {
    let outcome = split_comparison(
        &walk(6, None),
        Prescaling::DiagCov,
        &WeightPreset::SensibleDefault.into(),
        &ComparisonSettings::default(),
    )
    .unwrap();
    assert_eq!(outcome.transferred_tags, 1);
    assert_eq!(outcome.dropped_tags, 0);
    assert!(outcome.first.converged());
    assert!(outcome.second.converged());
    assert!(outcome.second.final_chi2 < 1e-6);
}

#[test]
fn split_drops_tags_only_seen_late() {
    // Tag 2 only shows up in the last two poses and is seen a metre off from one of them.
    let mut capture = walk(6, None);
    for (i, shift) in [(4, 0.0), (5, 1.0)] {
        let x = i as f64;
        capture = capture.tag(
            TagObservation::from_pose(x * 0.5, 2, at([4.0 - x + shift, 0.0, -3.0]))
                .covariance(diagonal_covariance()),
        );
    }
    let outcome = split_comparison(
        &capture,
        Prescaling::DiagCov,
        &WeightPreset::SensibleDefault.into(),
        &ComparisonSettings::default(),
    )
    .unwrap();
    assert_eq!(outcome.transferred_tags, 1);
    assert_eq!(outcome.dropped_tags, 1);
    // Without tag 2 its inconsistent sightings cannot raise the second half's chi2.
    assert!(outcome.second.final_chi2 < 1e-6);
}

#[test]
fn split_needs_two_samples() {
    let result = split_comparison(
        &walk(1, None),
        Prescaling::Ones,
        &WeightPreset::Identity.into(),
        &ComparisonSettings::default(),
    );
    assert!(matches!(result, Err(Error::MalformedCapture(_))));
}

#[test]
fn settings_fill_defaults() {
    let settings: ComparisonSettings = serde_json::from_str(
        r#"{ "refine_threshold": 3.0, "optimizer": { "max_iterations": 7 } }"#,
    )
    .unwrap();
    assert_eq!(settings.refine_threshold, Some(3.0));
    assert_eq!(settings.optimizer.max_iterations, 7);
    assert_eq!(settings.build, BuildOptions::default());
}

#[test]
fn weights_parse_from_presets_and_lists() {
    let preset: NamedWeights = " trust_tags ".parse().unwrap();
    assert_eq!(preset, NamedWeights::from(WeightPreset::TrustTags));
    let list: NamedWeights = "1, 2,3".parse().unwrap();
    assert_eq!(list, NamedWeights::new("1, 2,3", vec![1.0, 2.0, 3.0]));
    assert!(matches!(
        "trust_nobody".parse::<NamedWeights>(),
        Err(Error::InvalidWeightVector(_))
    ));
}

#[test]
fn sweep_scales_chi2_with_uniform_weights() {
    // Moving every weight together rescales chi2 without moving the optimum.
    let grid = Sweep::new(
        WeightPreset::Identity.into(),
        vec![(0..WEIGHT_VECTOR_LEN).collect()],
        vec![-1.0, 0.0, 1.0],
    );
    let result = sweep(
        &walk(6, Some(3)),
        Prescaling::Ones,
        &grid,
        &SweepMetric::Chi2,
        &ComparisonSettings::default(),
    )
    .unwrap();
    assert_eq!(result.cells.len(), 3);
    let chi2 = [0, 1, 2].map(|i| result.metric(&[i]).unwrap());
    assert!(chi2[1] > 0.1);
    assert_relative_eq!(chi2[0], chi2[1] * 1f64.exp(), max_relative = 1e-6);
    assert_relative_eq!(chi2[2], chi2[1] * (-1f64).exp(), max_relative = 1e-6);
    let best = result.best().unwrap();
    assert_eq!(best.indices, vec![2]);
    assert_eq!(best.weights.as_slice(), &[1.0; WEIGHT_VECTOR_LEN][..]);
}

#[test]
fn sweep_grid_is_row_major() {
    let grid = Sweep::new(
        WeightPreset::SensibleDefault.into(),
        vec![vec![0, 1, 2], vec![8, 9]],
        vec![-2.0, 0.0, 2.0],
    );
    let result = sweep(
        &walk(4, None),
        Prescaling::DiagCov,
        &grid,
        &SweepMetric::Split,
        &ComparisonSettings::default(),
    )
    .unwrap();
    assert_eq!(result.values, vec![-2.0, 0.0, 2.0]);
    assert_eq!(result.cells.len(), 9);
    let cell = &result.cells[5];
    assert_eq!(cell.indices, vec![1, 2]);
    let weights = cell.weights.as_slice();
    assert_eq!(&weights[0..3], &[0.0; 3]);
    assert_eq!(&weights[8..10], &[2.0; 2]);
    assert_eq!(
        &weights[3..8],
        &WeightPreset::SensibleDefault.weights().as_slice()[3..8]
    );
    assert!(result.cells.iter().all(|cell| cell.metric.is_some()));
}

#[test]
fn sweep_cells_without_metric_are_kept() {
    // A single shared tag is not enough for the ground truth metric.
    let truth = [(1, at(TAG))].into_iter().collect();
    let grid = Sweep::new(WeightPreset::Identity.into(), vec![vec![0]], vec![0.0, 1.0]);
    let result = sweep(
        &walk(3, None),
        Prescaling::Ones,
        &grid,
        &SweepMetric::GroundTruth(truth),
        &ComparisonSettings::default(),
    )
    .unwrap();
    assert_eq!(result.cells.len(), 2);
    assert!(result.cells.iter().all(|cell| cell.metric.is_none()));
    assert!(result.best().is_none());
}

#[test]
fn sweep_rejects_bad_grids() {
    let settings = ComparisonSettings::default();
    let capture = walk(3, None);
    for grid in [
        Sweep::new(WeightPreset::Identity.into(), vec![], vec![0.0]),
        Sweep::new(WeightPreset::Identity.into(), vec![vec![0]], vec![]),
        Sweep::new(WeightPreset::Identity.into(), vec![vec![18]], vec![0.0]),
        Sweep::new(WeightPreset::Identity.into(), vec![vec![0]], vec![f64::NAN]),
        Sweep::new(NamedWeights::new("short", vec![0.0; 3]), vec![vec![0]], vec![0.0]),
    ] {
        let result = sweep(&capture, Prescaling::Ones, &grid, &SweepMetric::Chi2, &settings);
        assert!(matches!(result, Err(Error::InvalidWeightVector(_))), "{:?}", grid);
    }
}
