mod common;

use rate_spillover::config::{CorrectorConfig, LinearConfig};
use rate_spillover::corrector::{raw_features, training_set, CorrectorState, FeatureSchema};
use rate_spillover::error::SpilloverError;
use rate_spillover::linear::fit_linear;

use common::{cointegrated_pair, levels_of, pair_from_levels, size_dependent_levels};

const EPS: f64 = 1e-9;

#[test]
fn features_follow_the_fixed_schema() {
    let levels = levels_of(&cointegrated_pair(200, 21));
    let linear = fit_linear(&levels, &LinearConfig::default()).unwrap();
    let history = &levels[..100];
    let x = raw_features(&linear, history, history[99][0] + 0.3, 2, EPS).unwrap();
    assert_eq!(x.len(), FeatureSchema::width(2));
    assert!((x[2] - 0.3).abs() < 1e-12);
    assert!((x[3] - (history[99][0] - history[98][0])).abs() < 1e-12);
    assert!((x[4] - (history[98][0] - history[97][0])).abs() < 1e-12);
    assert!((x[5] - (history[99][1] - history[98][1])).abs() < 1e-12);
    assert_eq!(x[7], 0.0);
    assert!(raw_features(&linear, &levels[..2], 1.0, 2, EPS).is_none());
}

#[test]
fn a_flat_last_step_marks_the_spillover_residual_undefined() {
    let levels = levels_of(&cointegrated_pair(200, 27));
    let linear = fit_linear(&levels, &LinearConfig::default()).unwrap();
    let mut history = levels[..100].to_vec();
    let [a, b] = history[99];
    history.push([a, b + 0.05]);

    let step = linear.step_residuals(&history, EPS).unwrap();
    assert_eq!(step.spillover, None);
    assert!(step.dependent.is_finite());

    let x = raw_features(&linear, &history, a + 0.3, 2, EPS).unwrap();
    assert_eq!(x.len(), FeatureSchema::width(2));
    assert_eq!(x[0], 0.0);
    assert_eq!(x[7], 1.0);
    assert!((x[1] - step.dependent).abs() < 1e-12);
    assert_eq!(x[3], 0.0);
}

#[test]
fn training_targets_are_spillover_residuals_inside_the_window() {
    let levels = levels_of(&cointegrated_pair(200, 22));
    let linear = fit_linear(&levels, &LinearConfig::default()).unwrap();
    let (rows, targets) = training_set(&linear, &levels, 2, EPS);
    assert_eq!(rows.len(), targets.len());
    assert!(rows.len() >= 180);
    assert!(targets.iter().all(|t| t.is_finite()));
}

#[test]
fn corrector_learns_size_dependent_pass_through() {
    let levels = levels_of(&pair_from_levels(&size_dependent_levels(200, 23)));
    let linear = fit_linear(&levels, &LinearConfig::default()).unwrap();
    let state = CorrectorState::train(&linear, &levels, &CorrectorConfig::default(), EPS).unwrap();
    assert!(state.is_paired_with(&linear));
    assert!(
        state.validation_loss < 0.7 * state.zero_correction_loss,
        "val {} vs zero {}",
        state.validation_loss,
        state.zero_correction_loss
    );

    let history = &levels[..150];
    let last_a = history[149][0];
    let large = state.correction(&linear, history, last_a + 0.45, EPS).unwrap();
    let small = state.correction(&linear, history, last_a + 0.25, EPS).unwrap();
    let s_large = linear.spillover(history, 0.45).unwrap() + large;
    let s_small = linear.spillover(history, 0.25).unwrap() + small;
    assert!(s_large > s_small + 0.15, "large {s_large} small {s_small}");
}

#[test]
fn pure_noise_residuals_do_not_produce_a_corrector() {
    let levels = levels_of(&cointegrated_pair(200, 24));
    let linear = fit_linear(&levels, &LinearConfig::default()).unwrap();
    let cfg = CorrectorConfig {
        min_improvement: 0.9,
        ..CorrectorConfig::default()
    };
    let err = CorrectorState::train(&linear, &levels, &cfg, EPS).unwrap_err();
    assert!(matches!(err, SpilloverError::CorrectorDivergence(_)), "{err:?}");
    assert!(err.is_fold_local());
}

#[test]
fn corrector_refuses_a_different_linear_state() {
    let levels = levels_of(&pair_from_levels(&size_dependent_levels(200, 25)));
    let cfg = LinearConfig::default();
    let linear = fit_linear(&levels, &cfg).unwrap();
    let other = fit_linear(&levels[..170], &cfg).unwrap();
    let state = CorrectorState::train(&linear, &levels, &CorrectorConfig::default(), EPS).unwrap();
    assert!(!state.is_paired_with(&other));
    let err = state
        .correction(&other, &levels, levels[199][0] + 0.3, EPS)
        .unwrap_err();
    assert!(matches!(err, SpilloverError::InvalidInput(_)));
}

#[test]
fn corrections_are_clipped() {
    let levels = levels_of(&pair_from_levels(&size_dependent_levels(200, 26)));
    let linear = fit_linear(&levels, &LinearConfig::default()).unwrap();
    let cfg = CorrectorConfig {
        max_correction: 0.05,
        min_improvement: 0.0,
        ..CorrectorConfig::default()
    };
    let state = CorrectorState::train(&linear, &levels, &cfg, EPS).unwrap();
    for step in [-0.5, -0.2, 0.2, 0.5, 3.0] {
        let c = state
            .correction(&linear, &levels, levels[199][0] + step, EPS)
            .unwrap();
        assert!(c.abs() <= 0.05 + 1e-15);
    }
}
