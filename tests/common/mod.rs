#![allow(dead_code)]

use std::ops::Range;

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Normal;

use rate_spillover::config::{Config, PredictorConfig};
use rate_spillover::linear::BaselineForm;
use rate_spillover::model::{
    CertificationReport, FoldOutcome, FoldSummary, RateObservation, RatePair, ScoredPoint,
    ValidationFold,
};

pub const MONTH_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Driving-rate steps of magnitude U[0.2, 0.5] with random sign.
pub fn driving_steps(n: usize, rng: &mut StdRng) -> Vec<f64> {
    (0..n)
        .map(|_| {
            let size = rng.gen_range(0.2..0.5);
            if rng.gen_bool(0.5) {
                size
            } else {
                -size
            }
        })
        .collect()
}

pub fn pair_from_levels(levels: &[(f64, f64)]) -> RatePair {
    let obs = levels
        .iter()
        .enumerate()
        .map(|(i, &(a, b))| RateObservation::new(i as i64 * MONTH_MS, a, b))
        .collect();
    RatePair::new(obs).unwrap()
}

/// rate_a is a random walk; rate_b = beta * rate_a + N(0, noise_sd²).
/// Steps whose index falls in `flat` leave rate_a unchanged.
pub fn cointegrated_levels(
    n: usize,
    beta: f64,
    noise_sd: f64,
    seed: u64,
    flat: Range<usize>,
) -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, noise_sd).unwrap();
    let steps = driving_steps(n, &mut rng);
    let mut a = 5.0;
    (0..n)
        .map(|i| {
            if i > 0 && !flat.contains(&i) {
                a += steps[i];
            }
            (a, beta * a + noise.sample(&mut rng))
        })
        .collect()
}

pub fn cointegrated_pair(n: usize, seed: u64) -> RatePair {
    pair_from_levels(&cointegrated_levels(n, 0.3, 0.02, seed, 0..0))
}

/// Dependent rate passes through 0.7 of large driving moves and 0.3 of small
/// ones: a spillover the linear baseline cannot express.
pub fn size_dependent_levels(n: usize, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.002).unwrap();
    let steps = driving_steps(n, &mut rng);
    let (mut a, mut b) = (5.0, 2.0);
    let mut out = Vec::with_capacity(n);
    out.push((a, b));
    for step in steps.iter().take(n - 1) {
        let pass = if step.abs() > 0.35 { 0.7 } else { 0.3 };
        a += step;
        b += pass * step + noise.sample(&mut rng);
        out.push((a, b));
    }
    out
}

pub fn levels_of(pair: &RatePair) -> Vec<[f64; 2]> {
    pair.observations().iter().map(RateObservation::levels).collect()
}

/// Defaults with a lighter corrector so the suite stays quick.
pub fn quick_config() -> Config {
    let mut cfg = Config::default();
    cfg.corrector.max_epochs = 150;
    cfg.linear.bootstrap_replicates = 49;
    cfg.certification.bootstrap_resamples = 299;
    cfg
}

pub fn linear_only(mut cfg: PredictorConfig) -> PredictorConfig {
    cfg.corrector.enabled = false;
    cfg
}

/// A scored fold built by hand, one point per (realized, predicted, baseline).
pub fn scored_fold(index: usize, points: &[(f64, f64, f64)]) -> FoldOutcome {
    let start = 100 + index * points.len();
    FoldOutcome {
        fold: ValidationFold {
            fold_index: index,
            train_range: start - 100..start,
            test_range: start..start + points.len(),
        },
        form: BaselineForm::Vecm,
        lag_order: 1,
        points: points
            .iter()
            .enumerate()
            .map(|(k, &(realized, predicted, baseline))| ScoredPoint {
                timestamp_ms: (start + k) as i64 * MONTH_MS,
                realized,
                predicted,
                baseline,
                linear_component: predicted,
                correction_component: 0.0,
                is_outlier: false,
                high_uncertainty: false,
            })
            .collect(),
        skipped_points: 0,
        pass_through: 0.3,
        long_run_pass_through: Some(0.3),
        error_correction_speed: Some(-0.9),
        corrector_fallback: None,
    }
}

/// A report that clears the default promotion gate.
pub fn passing_report() -> CertificationReport {
    CertificationReport {
        rmse: 0.12,
        rmse_ci: (0.1, 0.14),
        r_squared: 0.4,
        baseline_rmse: 0.15,
        dm_statistic: 3.2,
        dm_p_value: 0.002,
        improves_on_baseline: true,
        economic_flags: Vec::new(),
        stability_metric: 0.1,
        mean_spillover: 0.3,
        pooled_points: 250,
        folds: (0..5)
            .map(|i| FoldSummary {
                fold_index: i,
                points: 50,
                rmse: 0.12,
                mean_prediction: 0.3,
                pass_through: 0.3,
                corrector_fallback: false,
            })
            .collect(),
        excluded_folds: Vec::new(),
    }
}
