use std::path::Path;

use rate_spillover::certification::StabilityBasis;
use rate_spillover::config::{Config, LogFormat, DEFAULT_CONFIG_PATH};
use rate_spillover::linear::InformationCriterion;

fn shipped() -> Config {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
    Config::load_from(&path).unwrap()
}

#[test]
fn shipped_config_matches_the_built_in_defaults() {
    let cfg = shipped();
    let def = Config::default();

    assert_eq!(cfg.transform.epsilon, def.transform.epsilon);
    assert_eq!(cfg.linear.max_lag, def.linear.max_lag);
    assert_eq!(cfg.linear.obs_per_lag, 25);
    assert_eq!(cfg.linear.criterion, InformationCriterion::Aic);
    assert_eq!(cfg.linear.fixed_lag, None);
    assert_eq!(cfg.corrector.hidden_units, def.corrector.hidden_units);
    assert_eq!(cfg.predictor, def.predictor);
    assert_eq!(cfg.validation.folds, 5);
    assert_eq!(cfg.validation.train_window, 150);
    assert_eq!(cfg.validation.test_window, 50);
    assert_eq!(cfg.certification.stability_basis, StabilityBasis::Rmse);
    assert_eq!(cfg.certification.block_length, None);
    assert_eq!(cfg.gate.max_sanity_violations, 0);
    assert_eq!(cfg.serve.bind, "127.0.0.1:8088");
    assert_eq!(cfg.logging.format, LogFormat::Pretty);
    assert_eq!(cfg.study.effect_sizes, def.study.effect_sizes);
}

#[test]
fn predictor_view_bundles_the_model_sections() {
    let cfg = shipped();
    let p = cfg.predictor();
    assert_eq!(p.settings, cfg.predictor);
    assert_eq!(p.corrector.max_epochs, cfg.corrector.max_epochs);
    assert_eq!(p.linear.seed, cfg.linear.seed);
    assert_eq!(p.transform.max_degenerate_fraction, 0.05);
}

#[test]
fn fold_requirements_must_fit_the_fold_count() {
    let err = Config::from_toml_str("[validation]\nfolds = 2\nmin_successful_folds = 3").unwrap_err();
    assert!(format!("{err:#}").contains("min_successful_folds"));
    assert!(Config::from_toml_str("[validation]\nfolds = 3\nmin_successful_folds = 3").is_ok());
}

#[test]
fn study_parameters_are_checked() {
    assert!(Config::from_toml_str("[study]\nar_coefficient = 1.0").is_err());
    assert!(Config::from_toml_str("[study]\nreplications = 0").is_err());
    let cfg = Config::from_toml_str("[study]\neffect_sizes = [0.0, 0.25]\nar_coefficient = -0.5").unwrap();
    assert_eq!(cfg.study.effect_sizes, vec![0.0, 0.25]);
    assert_eq!(cfg.study.replications, 500);
}

#[test]
fn unknown_enum_values_are_rejected() {
    assert!(Config::from_toml_str("[linear]\ncriterion = \"fpe\"").is_err());
    assert!(Config::from_toml_str("[certification]\nstability_basis = \"mae\"").is_err());
    let cfg = Config::from_toml_str("[certification]\nstability_basis = \"mean_spillover\"").unwrap();
    assert_eq!(cfg.certification.stability_basis, StabilityBasis::MeanSpillover);
}

#[test]
fn missing_files_report_the_path() {
    let err = Config::load_from(Path::new("/nonexistent/spillover.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/spillover.toml"));
}
