use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::certification::StabilityBasis;
use crate::linear::InformationCriterion;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transform: TransformConfig,
    pub linear: LinearConfig,
    pub corrector: CorrectorConfig,
    pub predictor: PredictorSettings,
    pub validation: ValidationConfig,
    pub certification: CertificationConfig,
    pub gate: GateConfig,
    pub serve: ServeConfig,
    pub logging: LoggingConfig,
    pub study: StudyConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// |Δrate_a| at or below this is treated as "no move".
    pub epsilon: f64,
    pub max_degenerate_fraction: f64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-9,
            max_degenerate_fraction: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    pub min_lag: usize,
    pub max_lag: usize,
    pub obs_per_lag: usize,
    pub criterion: InformationCriterion,
    pub significance: f64,
    /// When false the rank test is skipped and a VAR on differences is fitted.
    pub cointegration: bool,
    /// Pins the lag order instead of searching `min_lag..=max_lag`.
    pub fixed_lag: Option<usize>,
    pub bootstrap_replicates: usize,
    pub block_length: Option<usize>,
    pub min_bootstrap_survivors: usize,
    pub seed: u64,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            min_lag: 1,
            max_lag: 12,
            obs_per_lag: 25,
            criterion: InformationCriterion::Aic,
            significance: 0.05,
            cointegration: true,
            fixed_lag: None,
            bootstrap_replicates: 99,
            block_length: None,
            min_bootstrap_survivors: 10,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    pub enabled: bool,
    pub lag_window: usize,
    pub hidden_units: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub max_epochs: usize,
    pub patience: usize,
    pub validation_fraction: f64,
    pub min_improvement: f64,
    pub max_correction: f64,
    pub seed: u64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lag_window: 2,
            hidden_units: 16,
            learning_rate: 0.005,
            weight_decay: 1e-4,
            max_epochs: 400,
            patience: 25,
            validation_fraction: 0.2,
            min_improvement: 0.02,
            max_correction: 1.0,
            seed: 11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorSettings {
    pub confidence: f64,
    pub high_uncertainty_multiple: f64,
    pub plausible_min: f64,
    pub plausible_max: f64,
    pub anomaly_trees: usize,
    pub anomaly_subsample: usize,
    pub anomaly_contamination: f64,
    pub anomaly_seed: u64,
    /// Observations kept from the training tail to condition serving queries.
    pub history_tail: usize,
}

impl Default for PredictorSettings {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            high_uncertainty_multiple: 2.0,
            plausible_min: -2.0,
            plausible_max: 2.0,
            anomaly_trees: 100,
            anomaly_subsample: 128,
            anomaly_contamination: 0.01,
            anomaly_seed: 23,
            history_tail: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub folds: usize,
    pub train_window: usize,
    pub test_window: usize,
    pub min_successful_folds: usize,
    pub parallel: bool,
    pub fit_production: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            train_window: 150,
            test_window: 50,
            min_successful_folds: 3,
            parallel: true,
            fit_production: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CertificationConfig {
    pub dm_significance: f64,
    pub dm_horizon: usize,
    pub harvey_correction: bool,
    pub bootstrap_resamples: usize,
    pub bootstrap_confidence: f64,
    pub block_length: Option<usize>,
    pub seed: u64,
    pub stability_basis: StabilityBasis,
    pub plausible_min: f64,
    pub plausible_max: f64,
    /// Share of folds with |pass-through| > 1 that counts as persistent.
    pub full_pass_through_share: f64,
    pub max_out_of_range_share: f64,
}

impl Default for CertificationConfig {
    fn default() -> Self {
        Self {
            dm_significance: 0.05,
            dm_horizon: 1,
            harvey_correction: true,
            bootstrap_resamples: 999,
            bootstrap_confidence: 0.95,
            block_length: None,
            seed: 97,
            stability_basis: StabilityBasis::Rmse,
            plausible_min: -2.0,
            plausible_max: 2.0,
            full_pass_through_share: 0.5,
            max_out_of_range_share: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_rmse: f64,
    pub max_dm_p_value: f64,
    pub max_sanity_violations: usize,
    pub max_stability: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_rmse: 1.0,
            max_dm_p_value: 0.05,
            max_sanity_violations: 0,
            max_stability: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub artifact_path: PathBuf,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8088".to_string(),
            artifact_path: PathBuf::from("artifacts/current.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Monte-Carlo size/power sweep of the forecast comparison test.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub replications: usize,
    pub sample_size: usize,
    /// Mean loss differentials to sweep; 0.0 measures size.
    pub effect_sizes: Vec<f64>,
    pub ar_coefficient: f64,
    pub significance: f64,
    pub seed: u64,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            replications: 500,
            sample_size: 250,
            effect_sizes: vec![0.0, 0.1, 0.2, 0.3, 0.5],
            ar_coefficient: 0.3,
            significance: 0.05,
            seed: 31,
        }
    }
}

/// Predictor inputs bundled the way `HybridModel::fit` consumes them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictorConfig {
    pub transform: TransformConfig,
    pub linear: LinearConfig,
    pub corrector: CorrectorConfig,
    pub settings: PredictorSettings,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("SPILLOVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::load_from(&path)?;

        if let Ok(level) = std::env::var("SPILLOVER_LOG_LEVEL") {
            config.logging.level = level;
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("failed to parse config toml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn predictor(&self) -> PredictorConfig {
        PredictorConfig {
            transform: self.transform,
            linear: self.linear,
            corrector: self.corrector,
            settings: self.predictor,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.transform;
        if !(t.epsilon > 0.0) {
            bail!("transform.epsilon must be > 0");
        }
        if !(t.max_degenerate_fraction > 0.0 && t.max_degenerate_fraction < 1.0) {
            bail!("transform.max_degenerate_fraction must be in (0, 1)");
        }

        let l = &self.linear;
        if l.min_lag == 0 || l.min_lag > l.max_lag {
            bail!(
                "linear lag range {}..={} is empty or starts at 0",
                l.min_lag,
                l.max_lag
            );
        }
        if l.obs_per_lag == 0 {
            bail!("linear.obs_per_lag must be > 0");
        }
        if !crate::linear::johansen::SUPPORTED_LEVELS
            .iter()
            .any(|lvl| (l.significance - lvl).abs() < 1e-12)
        {
            bail!(
                "linear.significance {} unsupported, expected one of 0.10/0.05/0.01",
                l.significance
            );
        }
        if l.fixed_lag == Some(0) {
            bail!("linear.fixed_lag must be >= 1");
        }

        let c = &self.corrector;
        if c.hidden_units == 0 || c.max_epochs == 0 {
            bail!("corrector.hidden_units and corrector.max_epochs must be > 0");
        }
        if !(c.validation_fraction > 0.0 && c.validation_fraction < 0.5) {
            bail!("corrector.validation_fraction must be in (0, 0.5)");
        }
        if !(c.max_correction > 0.0) {
            bail!("corrector.max_correction must be > 0");
        }

        let p = &self.predictor;
        if !(p.confidence > 0.0 && p.confidence < 1.0) {
            bail!("predictor.confidence must be in (0, 1)");
        }
        if p.plausible_min >= p.plausible_max {
            bail!("predictor plausible range is empty");
        }
        if !(p.anomaly_contamination > 0.0 && p.anomaly_contamination < 0.5) {
            bail!("predictor.anomaly_contamination must be in (0, 0.5)");
        }

        let v = &self.validation;
        if v.folds == 0 || v.train_window == 0 || v.test_window == 0 {
            bail!("validation folds and window lengths must be > 0");
        }
        if v.min_successful_folds == 0 || v.min_successful_folds > v.folds {
            bail!(
                "validation.min_successful_folds must be in 1..={}",
                v.folds
            );
        }

        let cert = &self.certification;
        if !(cert.dm_significance > 0.0 && cert.dm_significance < 1.0) {
            bail!("certification.dm_significance must be in (0, 1)");
        }
        if cert.dm_horizon == 0 {
            bail!("certification.dm_horizon must be >= 1");
        }
        if !(cert.bootstrap_confidence > 0.0 && cert.bootstrap_confidence < 1.0) {
            bail!("certification.bootstrap_confidence must be in (0, 1)");
        }
        if cert.plausible_min >= cert.plausible_max {
            bail!("certification plausible range is empty");
        }

        let st = &self.study;
        if st.replications == 0 || st.sample_size < 3 {
            bail!("study needs replications > 0 and sample_size >= 3");
        }
        if !(st.ar_coefficient.abs() < 1.0) {
            bail!("study.ar_coefficient must be inside (-1, 1)");
        }
        Ok(())
    }
}
