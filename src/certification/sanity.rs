use crate::config::CertificationConfig;
use crate::model::{EconomicRule, FoldOutcome};

/// Evaluate every economic rule independently over the successful folds.
/// Violations are reported, never fatal.
pub fn evaluate(outcomes: &[FoldOutcome], cfg: &CertificationConfig) -> Vec<EconomicRule> {
    let mut flags: Vec<EconomicRule> = EconomicRule::ALL
        .into_iter()
        .filter(|rule| violated(*rule, outcomes, cfg))
        .collect();
    flags.sort();
    for rule in &flags {
        tracing::warn!(
            rule = rule.as_str(),
            kind = rule.error_kind().as_str(),
            "economic sanity rule violated"
        );
    }
    flags
}

fn violated(rule: EconomicRule, outcomes: &[FoldOutcome], cfg: &CertificationConfig) -> bool {
    let predictions: Vec<f64> = outcomes
        .iter()
        .flat_map(|o| o.points.iter().map(|p| p.predicted))
        .collect();
    let outside = |v: f64| v < cfg.plausible_min || v > cfg.plausible_max;
    match rule {
        EconomicRule::MeanSpilloverOutOfRange => {
            if predictions.is_empty() {
                return false;
            }
            outside(predictions.iter().sum::<f64>() / predictions.len() as f64)
        }
        EconomicRule::PersistentFullPassThrough => {
            if outcomes.is_empty() {
                return false;
            }
            let full = outcomes.iter().filter(|o| o.pass_through.abs() > 1.0).count();
            full as f64 / outcomes.len() as f64 >= cfg.full_pass_through_share
        }
        EconomicRule::PredictionOutOfRangeShare => {
            if predictions.is_empty() {
                return false;
            }
            let n_out = predictions.iter().filter(|v| outside(**v)).count();
            n_out as f64 / predictions.len() as f64 > cfg.max_out_of_range_share
        }
        EconomicRule::LongRunSignReversal => outcomes
            .iter()
            .filter_map(|o| o.long_run_pass_through)
            .any(|theta| theta < 0.0),
        EconomicRule::ErrorCorrectionDivergent => outcomes
            .iter()
            .filter_map(|o| o.error_correction_speed)
            .any(|speed| speed >= 0.0 || speed <= -2.0),
    }
}
