mod common;

use rate_spillover::config::{Config, ValidationConfig};
use rate_spillover::error::SpilloverError;
use rate_spillover::validation::metrics::rmse;
use rate_spillover::validation::{rolling_schedule, CancelToken, CrossValidator, CvState};

use common::{cointegrated_levels, cointegrated_pair, pair_from_levels, quick_config};

fn sequential_linear_only() -> Config {
    let mut cfg = quick_config();
    cfg.corrector.enabled = false;
    cfg.validation.parallel = false;
    cfg
}

#[test]
fn schedule_windows_never_look_ahead() {
    for (train, test, folds) in [(150, 50, 5), (60, 10, 8), (100, 25, 3), (30, 30, 2)] {
        for n in (train + test..train + 12 * test).step_by(7) {
            let cfg = ValidationConfig {
                folds,
                train_window: train,
                test_window: test,
                min_successful_folds: 1,
                ..ValidationConfig::default()
            };
            let schedule = rolling_schedule(n, &cfg).unwrap();
            assert_eq!(schedule.len(), folds.min((n - train) / test));
            assert_eq!(schedule.last().unwrap().test_range.end, n);
            for (i, f) in schedule.iter().enumerate() {
                assert_eq!(f.fold_index, i);
                assert_eq!(f.train_range.len(), train);
                assert_eq!(f.test_range.len(), test);
                assert_eq!(f.train_range.end, f.test_range.start);
                for later in &schedule[i + 1..] {
                    assert!(f.test_range.end <= later.test_range.start);
                    assert!(f.train_range.end <= later.test_range.start);
                }
                // the next fold rolls forward over this test window as past data
                if let Some(next) = schedule.get(i + 1) {
                    assert!(next.train_range.start <= f.test_range.start);
                    assert!(f.test_range.end <= next.train_range.end);
                }
            }
        }
    }
}

#[test]
fn too_short_a_series_cannot_fill_the_required_folds() {
    let err = rolling_schedule(250, &ValidationConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        SpilloverError::InsufficientFolds {
            succeeded: 2,
            required: 3
        }
    ));
    assert!(!err.is_fold_local());
}

#[test]
fn pooled_rmse_is_taken_over_every_scored_point() {
    let cfg = sequential_linear_only();
    let run = CrossValidator::new(&cfg).run(&cointegrated_pair(400, 51)).unwrap();

    assert_eq!(run.folds.len(), 5);
    assert!(run.excluded.is_empty());
    let points = run.pooled_points();
    assert_eq!(points.len(), run.pooled.points);
    let expected = rmse(points.iter().map(|p| p.error())).unwrap();
    assert!((run.pooled.rmse - expected).abs() < 1e-12);
    let baseline = rmse(points.iter().map(|p| p.baseline_error())).unwrap();
    assert!((run.pooled.baseline_rmse - baseline).abs() < 1e-12);

    for pair in run.folds.windows(2) {
        assert!(pair[0].points.last().unwrap().timestamp_ms < pair[1].points[0].timestamp_ms);
    }
    let production = run.production.as_ref().unwrap();
    assert!(production.is_linear_only());
}

#[test]
fn the_run_walks_every_state_in_order() {
    let cfg = sequential_linear_only();
    let run = CrossValidator::new(&cfg).run(&cointegrated_pair(400, 52)).unwrap();
    let mut expected = vec![CvState::Init];
    for i in 0..5 {
        expected.push(CvState::FitTrain(i));
        expected.push(CvState::ScoreTest(i));
    }
    expected.push(CvState::Aggregate);
    expected.push(CvState::Done);
    assert_eq!(run.trace, expected);
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let pair = cointegrated_pair(400, 53);
    let mut cfg = quick_config();
    cfg.validation.fit_production = false;
    cfg.validation.parallel = false;
    let sequential = CrossValidator::new(&cfg).run(&pair).unwrap();
    cfg.validation.parallel = true;
    let parallel = CrossValidator::new(&cfg).run(&pair).unwrap();
    assert_eq!(sequential.folds, parallel.folds);
    assert_eq!(sequential.pooled, parallel.pooled);
    assert!(parallel.production.is_none());
}

#[test]
fn a_cancelled_run_stops_at_the_next_fold_boundary() {
    let cfg = sequential_linear_only();
    let token = CancelToken::new();
    token.cancel();
    let validator = CrossValidator::new(&cfg).with_cancel_token(token.clone());
    assert!(validator.cancel_token().is_cancelled());
    let err = validator.run(&cointegrated_pair(400, 54)).unwrap_err();
    assert!(matches!(err, SpilloverError::Cancelled { next_fold: 0 }), "{err:?}");
}

#[test]
fn a_fold_with_a_degenerate_window_is_excluded_not_fatal() {
    // 19 flat driving steps: under the ceiling for the whole series, over it for fold 0
    let levels = cointegrated_levels(400, 0.3, 0.02, 55, 1..20);
    let cfg = sequential_linear_only();
    let run = CrossValidator::new(&cfg).run(&pair_from_levels(&levels)).unwrap();

    assert_eq!(run.excluded.len(), 1);
    assert_eq!(run.excluded[0].fold_index, 0);
    assert_eq!(run.excluded[0].error_kind, "data_error");
    assert_eq!(run.folds.len(), 4);
    assert!(run.folds.iter().all(|f| f.fold.fold_index > 0));
    assert!(!run.trace.contains(&CvState::ScoreTest(0)));
}

#[test]
fn too_many_excluded_folds_fail_the_run() {
    let levels = cointegrated_levels(400, 0.3, 0.02, 56, 1..20);
    let mut cfg = sequential_linear_only();
    cfg.validation.min_successful_folds = 5;
    let err = CrossValidator::new(&cfg)
        .run(&pair_from_levels(&levels))
        .unwrap_err();
    assert!(matches!(
        err,
        SpilloverError::InsufficientFolds {
            succeeded: 4,
            required: 5
        }
    ));
}
