mod common;

use rate_spillover::certification::{
    coefficient_of_variation, sanity, Certifier, ComparisonOutcome, ForecastComparison,
    PromotionPolicy, StabilityBasis,
};
use rate_spillover::config::{CertificationConfig, GateConfig, LinearConfig};
use rate_spillover::error::Result;
use rate_spillover::model::{EconomicRule, FoldOutcome};
use rate_spillover::validation::{BaselineSpec, CrossValidator, CvRun, PooledMetrics};

use common::{cointegrated_pair, passing_report, quick_config, scored_fold};

fn run_of(folds: Vec<FoldOutcome>) -> CvRun {
    CvRun {
        pooled: PooledMetrics::from_outcomes(&folds).unwrap(),
        folds,
        excluded: Vec::new(),
        production: None,
        trace: Vec::new(),
    }
}

/// Three folds where the model is always 0.1 off and the baseline 0.2 or 0.3 off.
fn hand_run() -> CvRun {
    let folds = (0..3)
        .map(|i| {
            let points: Vec<(f64, f64, f64)> = (0..20)
                .map(|k| {
                    let realized = 0.3 + 0.01 * (k % 5) as f64;
                    let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                    let miss = if k % 3 == 0 { 0.3 } else { 0.2 };
                    (realized, realized + 0.1 * sign, realized - miss * sign)
                })
                .collect();
            scored_fold(i, &points)
        })
        .collect();
    run_of(folds)
}

struct FixedComparison(ComparisonOutcome);

impl ForecastComparison for FixedComparison {
    fn compare(&self, model_losses: &[f64], _baseline_losses: &[f64]) -> Result<ComparisonOutcome> {
        Ok(ComparisonOutcome {
            n: model_losses.len(),
            ..self.0
        })
    }
}

#[test]
fn synthetic_cointegrated_pair_beats_a_differenced_var() {
    let mut cfg = quick_config();
    cfg.corrector.enabled = false;
    cfg.validation.fit_production = false;
    let baseline = BaselineSpec::Linear(LinearConfig {
        cointegration: false,
        fixed_lag: Some(1),
        ..cfg.linear
    });
    let run = CrossValidator::new(&cfg)
        .with_baseline(baseline)
        .run(&cointegrated_pair(400, 61))
        .unwrap();
    let report = Certifier::new(cfg.certification).certify(&run).unwrap();

    assert!(
        (report.mean_spillover - 0.3).abs() < 0.15,
        "mean {}",
        report.mean_spillover
    );
    assert!(report.rmse < report.baseline_rmse);
    assert!(report.dm_statistic > 0.0);
    assert!(report.dm_p_value < 0.05, "p {}", report.dm_p_value);
    assert!(report.improves_on_baseline);
    assert!(report.economic_flags.is_empty(), "{:?}", report.flag_ids());
    assert!(report.rmse_ci.0 <= report.rmse && report.rmse <= report.rmse_ci.1);
    assert_eq!(report.pooled_points, run.pooled.points);
    assert_eq!(report.folds.len(), 5);
}

#[test]
fn synthetic_cointegrated_pair_certifies_with_the_corrector_enabled() {
    let mut cfg = quick_config();
    cfg.validation.fit_production = false;
    assert!(cfg.corrector.enabled);
    let baseline = BaselineSpec::Linear(LinearConfig {
        cointegration: false,
        fixed_lag: Some(1),
        ..cfg.linear
    });
    let run = CrossValidator::new(&cfg)
        .with_baseline(baseline)
        .run(&cointegrated_pair(400, 61))
        .unwrap();
    let report = Certifier::new(cfg.certification).certify(&run).unwrap();

    assert!(
        (report.mean_spillover - 0.3).abs() < 0.15,
        "mean {}",
        report.mean_spillover
    );
    assert!(report.dm_statistic > 0.0);
    assert!(report.dm_p_value < 0.05, "p {}", report.dm_p_value);
    assert!(report.improves_on_baseline);
    assert_eq!(report.folds.len(), 5);

    // a fold either carries a trained corrector or says why it fell back
    for fold in &run.folds {
        let corrected = fold.points.iter().any(|p| p.correction_component != 0.0);
        match &fold.corrector_fallback {
            Some(reason) => {
                assert!(!corrected, "fold {} fell back but corrected", fold.fold.fold_index);
                assert!(!reason.is_empty());
            }
            None => assert!(corrected, "fold {} has a silent corrector", fold.fold.fold_index),
        }
        for p in &fold.points {
            assert!((p.predicted - p.linear_component - p.correction_component).abs() < 1e-12);
        }
    }
    assert!(run.excluded.is_empty(), "{:?}", run.excluded);
}

#[test]
fn hand_built_run_is_certified_deterministically() {
    let run = hand_run();
    let certifier = Certifier::new(CertificationConfig::default());
    let first = certifier.certify(&run).unwrap();
    let second = certifier.certify(&run).unwrap();
    assert_eq!(first, second);

    assert!((first.rmse - 0.1).abs() < 1e-12);
    assert!(first.baseline_rmse > first.rmse);
    assert!(first.improves_on_baseline);
    let mean = run.pooled_points().iter().map(|p| p.predicted).sum::<f64>() / 60.0;
    assert!((first.mean_spillover - mean).abs() < 1e-12);
    // every model error is ±0.1, so every resample has the same RMSE
    assert!((first.rmse_ci.0 - 0.1).abs() < 1e-12);
    assert!((first.rmse_ci.1 - 0.1).abs() < 1e-12);
    assert!(first.stability_metric < 1e-9);
}

#[test]
fn the_comparison_test_is_pluggable() {
    let run = hand_run();
    let stub = FixedComparison(ComparisonOutcome {
        statistic: -1.5,
        p_value: 0.01,
        mean_differential: -0.2,
        n: 0,
    });
    let report = Certifier::new(CertificationConfig::default())
        .with_comparison(Box::new(stub))
        .certify(&run)
        .unwrap();
    assert_eq!(report.dm_statistic, -1.5);
    assert_eq!(report.dm_p_value, 0.01);
    // significant but in the wrong direction
    assert!(!report.improves_on_baseline);
}

#[test]
fn coefficient_of_variation_uses_the_sample_deviation() {
    assert_eq!(coefficient_of_variation(&[1.0, 1.0, 1.0]), Some(0.0));
    assert!((coefficient_of_variation(&[1.0, 2.0, 3.0]).unwrap() - 0.5).abs() < 1e-12);
    assert_eq!(coefficient_of_variation(&[2.0]), None);
}

#[test]
fn stability_can_be_measured_on_mean_spillover() {
    let folds = vec![
        scored_fold(0, &[(0.3, 0.2, 0.3), (0.3, 0.2, 0.3)]),
        scored_fold(1, &[(0.3, 0.4, 0.3), (0.3, 0.4, 0.3)]),
    ];
    let cfg = CertificationConfig {
        stability_basis: StabilityBasis::MeanSpillover,
        ..CertificationConfig::default()
    };
    let report = Certifier::new(cfg).certify(&run_of(folds)).unwrap();
    // means 0.2 and 0.4: sd 0.1414, mean 0.3
    assert!((report.stability_metric - 0.02f64.sqrt() / 0.3).abs() < 1e-9);
}

#[test]
fn sanity_rules_fire_independently() {
    let cfg = CertificationConfig::default();
    let clean = vec![scored_fold(0, &[(0.3, 0.3, 0.3); 10])];
    assert!(sanity::evaluate(&clean, &cfg).is_empty());

    let far = vec![scored_fold(0, &[(0.3, 5.0, 0.3); 10])];
    assert_eq!(
        sanity::evaluate(&far, &cfg),
        vec![
            EconomicRule::MeanSpilloverOutOfRange,
            EconomicRule::PredictionOutOfRangeShare
        ]
    );

    let mut some_out = vec![(0.3, 0.3, 0.3); 18];
    some_out.extend([(0.3, 9.0, 0.3); 2]);
    let share = vec![scored_fold(0, &some_out)];
    assert_eq!(
        sanity::evaluate(&share, &cfg),
        vec![EconomicRule::PredictionOutOfRangeShare]
    );

    let mut full = vec![
        scored_fold(0, &[(0.3, 0.3, 0.3); 5]),
        scored_fold(1, &[(0.3, 0.3, 0.3); 5]),
    ];
    full[0].pass_through = 1.2;
    assert_eq!(
        sanity::evaluate(&full, &cfg),
        vec![EconomicRule::PersistentFullPassThrough]
    );

    let mut reversed = vec![scored_fold(0, &[(0.3, 0.3, 0.3); 5])];
    reversed[0].long_run_pass_through = Some(-0.4);
    reversed[0].error_correction_speed = Some(0.1);
    assert_eq!(
        sanity::evaluate(&reversed, &cfg),
        vec![
            EconomicRule::LongRunSignReversal,
            EconomicRule::ErrorCorrectionDivergent
        ]
    );

    let mut overshoot = vec![scored_fold(0, &[(0.3, 0.3, 0.3); 5])];
    overshoot[0].error_correction_speed = Some(-2.5);
    assert_eq!(
        sanity::evaluate(&overshoot, &cfg),
        vec![EconomicRule::ErrorCorrectionDivergent]
    );
}

#[test]
fn sanity_violations_do_not_fail_certification() {
    let mut run = hand_run();
    run.folds[1].long_run_pass_through = Some(-0.2);
    let report = Certifier::new(CertificationConfig::default()).certify(&run).unwrap();
    assert_eq!(report.economic_flags, vec![EconomicRule::LongRunSignReversal]);
    assert_eq!(report.flag_ids(), vec!["long_run_sign_reversal"]);
}

#[test]
fn promotion_policy_lists_every_failed_threshold() {
    let policy = PromotionPolicy::from(GateConfig::default());
    let decision = policy.evaluate(&passing_report());
    assert!(decision.approved);
    assert!(decision.reasons.is_empty());

    let mut bad = passing_report();
    bad.rmse = 2.0;
    bad.dm_p_value = 0.3;
    bad.economic_flags = vec![EconomicRule::LongRunSignReversal];
    bad.stability_metric = 0.9;
    let decision = policy.evaluate(&bad);
    assert!(!decision.approved);
    assert_eq!(decision.reasons.len(), 4);
    assert!(decision.reasons[0].starts_with("rmse"));
    assert!(decision.reasons[2].contains("long_run_sign_reversal"));

    let mut wrong_way = passing_report();
    wrong_way.dm_statistic = -3.0;
    let decision = policy.evaluate(&wrong_way);
    assert_eq!(decision.reasons.len(), 1);
    assert!(decision.reasons[0].contains("no significant improvement"));
}
