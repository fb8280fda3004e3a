pub mod johansen;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bootstrap::{block_indices, default_block_length, replicate_seed};
use crate::config::LinearConfig;
use crate::error::{Result, SpilloverError};
use crate::linalg::{log_det_spd, matrix_from_rows, ols, residual_covariance};

pub use johansen::{CointegrationResult, CointegrationTest, JohansenTrace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationCriterion {
    Aic,
    Bic,
    Hqic,
}

impl InformationCriterion {
    fn penalty(self, t: f64) -> f64 {
        match self {
            Self::Aic => 2.0,
            Self::Bic => t.ln(),
            Self::Hqic => 2.0 * t.ln().ln(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineForm {
    VarLevels,
    VarDifferences,
    Vecm,
}

impl BaselineForm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VarLevels => "var_levels",
            Self::VarDifferences => "var_differences",
            Self::Vecm => "vecm",
        }
    }
}

/// What the rank test and lag search decided the data supports.
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineChoice {
    Stationary {
        differenced: bool,
        lag_order: usize,
        rank: usize,
    },
    Cointegrated {
        lag_order: usize,
        rank: usize,
        long_run_pass_through: f64,
    },
    InsufficientData {
        observations: usize,
        required: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub form: BaselineForm,
    /// Lag order of the VAR in the form's own variables (levels order for VECM).
    pub lag_order: usize,
    /// θ in the error-correction term rate_b − θ · rate_a; VECM only.
    pub long_run_pass_through: Option<f64>,
}

impl Specification {
    /// Levels needed before a one-step forecast can be formed.
    pub fn min_history(&self) -> usize {
        match self.form {
            BaselineForm::VarLevels => self.lag_order,
            BaselineForm::VarDifferences => self.lag_order + 1,
            BaselineForm::Vecm => self.lag_order.max(1),
        }
    }

    fn regressors(&self, history: &[[f64; 2]]) -> Option<Vec<f64>> {
        if history.len() < self.min_history() || history.is_empty() {
            return None;
        }
        let t = history.len() - 1;
        let delta = |s: usize| [history[s][0] - history[s - 1][0], history[s][1] - history[s - 1][1]];
        let mut x = Vec::with_capacity(2 + 2 * self.lag_order);
        x.push(1.0);
        match self.form {
            BaselineForm::VarLevels => {
                for lag in 0..self.lag_order {
                    x.extend_from_slice(&history[t - lag]);
                }
            }
            BaselineForm::VarDifferences => {
                for lag in 0..self.lag_order {
                    x.extend_from_slice(&delta(t - lag));
                }
            }
            BaselineForm::Vecm => {
                let theta = self.long_run_pass_through?;
                x.push(history[t][1] - theta * history[t][0]);
                for lag in 0..self.lag_order.saturating_sub(1) {
                    x.extend_from_slice(&delta(t - lag));
                }
            }
        }
        Some(x)
    }

    fn target(&self, levels: &[[f64; 2]], t: usize) -> [f64; 2] {
        match self.form {
            BaselineForm::VarLevels => levels[t + 1],
            _ => [
                levels[t + 1][0] - levels[t][0],
                levels[t + 1][1] - levels[t][1],
            ],
        }
    }
}

/// Coefficients (one row per regressor, one column per equation) plus the
/// residual covariance they were estimated with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearEquations {
    coefficients: Vec<[f64; 2]>,
    sigma: [[f64; 2]; 2],
}

impl LinearEquations {
    /// One-step forecast of (Δrate_a, Δrate_b) after the last element of `history`.
    fn forecast(&self, spec: &Specification, history: &[[f64; 2]]) -> Option<[f64; 2]> {
        let x = spec.regressors(history)?;
        let mut out = [0.0; 2];
        for (xi, row) in x.iter().zip(&self.coefficients) {
            out[0] += xi * row[0];
            out[1] += xi * row[1];
        }
        if spec.form == BaselineForm::VarLevels {
            let last = history[history.len() - 1];
            out[0] -= last[0];
            out[1] -= last[1];
        }
        Some(out)
    }

    fn pass_through(&self) -> f64 {
        if self.sigma[0][0] <= f64::MIN_POSITIVE {
            return 0.0;
        }
        self.sigma[0][1] / self.sigma[0][0]
    }

    /// E[Δrate_b | Δrate_a = d_a, history] / d_a.
    fn spillover(&self, spec: &Specification, history: &[[f64; 2]], d_a: f64) -> Option<f64> {
        let mu = self.forecast(spec, history)?;
        let kappa = self.pass_through();
        let s = kappa + (mu[1] - kappa * mu[0]) / d_a;
        s.is_finite().then_some(s)
    }
}

/// Residuals of the most recent step in a history, in rate and spillover space.
/// `spillover` is `None` when that step's driving move was degenerate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResiduals {
    pub spillover: Option<f64>,
    pub dependent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModelState {
    pub spec: Specification,
    pub rank: usize,
    pub observations: usize,
    equations: LinearEquations,
    residuals: Vec<[f64; 2]>,
    replicates: Vec<LinearEquations>,
}

impl LinearModelState {
    pub fn fit(levels: &[[f64; 2]], choice: &BaselineChoice, cfg: &LinearConfig) -> Result<Self> {
        let (spec, rank) = match *choice {
            BaselineChoice::InsufficientData {
                observations,
                required,
            } => {
                return Err(SpilloverError::InsufficientObservations {
                    observations,
                    required,
                })
            }
            BaselineChoice::Stationary {
                differenced,
                lag_order,
                rank,
            } => (
                Specification {
                    form: if differenced {
                        BaselineForm::VarDifferences
                    } else {
                        BaselineForm::VarLevels
                    },
                    lag_order,
                    long_run_pass_through: None,
                },
                rank,
            ),
            BaselineChoice::Cointegrated {
                lag_order,
                rank,
                long_run_pass_through,
            } => (
                Specification {
                    form: BaselineForm::Vecm,
                    lag_order,
                    long_run_pass_through: Some(long_run_pass_through),
                },
                rank,
            ),
        };

        let start = spec.min_history() - 1;
        let (equations, residuals) = estimate(levels, &spec, start)?;
        let replicates = bootstrap_replicates(levels, &spec, &equations, &residuals, start, cfg)?;
        tracing::debug!(
            form = spec.form.as_str(),
            lag_order = spec.lag_order,
            rank,
            replicates = replicates.len(),
            "linear baseline fitted"
        );
        Ok(Self {
            spec,
            rank,
            observations: levels.len(),
            equations,
            residuals,
            replicates,
        })
    }

    pub fn form(&self) -> BaselineForm {
        self.spec.form
    }

    pub fn lag_order(&self) -> usize {
        self.spec.lag_order
    }

    pub fn min_history(&self) -> usize {
        self.spec.min_history()
    }

    /// Contemporaneous pass-through Σ_ab / Σ_aa of the residual covariance.
    pub fn pass_through(&self) -> f64 {
        self.equations.pass_through()
    }

    pub fn long_run_pass_through(&self) -> Option<f64> {
        self.spec.long_run_pass_through
    }

    /// Per-period change of the equilibrium error implied by the loadings,
    /// α_b − θ·α_a. Negative and above −2 means the error shrinks.
    pub fn error_correction_speed(&self) -> Option<f64> {
        let theta = self.spec.long_run_pass_through?;
        let alpha = self.equations.coefficients.get(1)?;
        Some(alpha[1] - theta * alpha[0])
    }

    pub fn residuals(&self) -> &[[f64; 2]] {
        &self.residuals
    }

    pub fn replicate_count(&self) -> usize {
        self.replicates.len()
    }

    pub fn forecast_delta(&self, history: &[[f64; 2]]) -> Option<[f64; 2]> {
        self.equations.forecast(&self.spec, history)
    }

    pub fn spillover(&self, history: &[[f64; 2]], d_a: f64) -> Option<f64> {
        self.equations.spillover(&self.spec, history, d_a)
    }

    pub fn replicate_spillovers(&self, history: &[[f64; 2]], d_a: f64) -> Vec<f64> {
        self.replicates
            .iter()
            .filter_map(|eq| eq.spillover(&self.spec, history, d_a))
            .collect()
    }

    /// Residuals of the step ending at the last element of `history`, measured
    /// against the forecast made one step earlier.
    pub fn step_residuals(&self, history: &[[f64; 2]], epsilon: f64) -> Option<StepResiduals> {
        if history.len() < self.min_history() + 1 {
            return None;
        }
        let t = history.len() - 1;
        let prev = &history[..t];
        let mu = self.forecast_delta(prev)?;
        let d_a = history[t][0] - history[t - 1][0];
        let d_b = history[t][1] - history[t - 1][1];
        let spillover = if d_a.abs() > epsilon {
            Some(d_b / d_a - self.spillover(prev, d_a)?)
        } else {
            None
        };
        Some(StepResiduals {
            spillover,
            dependent: d_b - mu[1],
        })
    }

    /// Stable digest of everything that determines this state's predictions.
    pub fn fingerprint(&self) -> u64 {
        let mut h = Fnv64::new();
        h.write_u64(self.spec.form as u64);
        h.write_u64(self.spec.lag_order as u64);
        h.write_u64(self.spec.long_run_pass_through.unwrap_or(0.0).to_bits());
        for row in &self.equations.coefficients {
            h.write_u64(row[0].to_bits());
            h.write_u64(row[1].to_bits());
        }
        for row in &self.equations.sigma {
            h.write_u64(row[0].to_bits());
            h.write_u64(row[1].to_bits());
        }
        h.finish()
    }
}

struct Fnv64(u64);

impl Fnv64 {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    fn write_u64(&mut self, v: u64) {
        for byte in v.to_le_bytes() {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// Run lag search and the rank test, then decide which linear form to fit.
pub fn classify(
    levels: &[[f64; 2]],
    cfg: &LinearConfig,
    test: &dyn CointegrationTest,
) -> Result<BaselineChoice> {
    let n = levels.len();
    let (lo, hi) = match cfg.fixed_lag {
        Some(p) => (p, p),
        None => (cfg.min_lag, cfg.max_lag.min(n / cfg.obs_per_lag.max(1))),
    };
    let required = cfg.obs_per_lag * lo;
    if hi < lo || n < required {
        return Ok(BaselineChoice::InsufficientData {
            observations: n,
            required,
        });
    }

    if !cfg.cointegration {
        let lag_order = select_lag(levels, BaselineForm::VarDifferences, lo, hi, cfg.criterion)?;
        return Ok(BaselineChoice::Stationary {
            differenced: true,
            lag_order,
            rank: 0,
        });
    }

    let levels_lag = select_lag(levels, BaselineForm::VarLevels, lo, hi, cfg.criterion)?;
    let result = test.rank(levels, levels_lag - 1)?;
    let choice = match result.rank {
        0 => BaselineChoice::Stationary {
            differenced: true,
            lag_order: select_lag(levels, BaselineForm::VarDifferences, lo, hi, cfg.criterion)?,
            rank: 0,
        },
        1 => BaselineChoice::Cointegrated {
            lag_order: levels_lag,
            rank: 1,
            long_run_pass_through: result.long_run_pass_through()?,
        },
        rank => BaselineChoice::Stationary {
            differenced: false,
            lag_order: levels_lag,
            rank,
        },
    };
    Ok(choice)
}

/// Classify with the Johansen trace test at the configured level and fit.
pub fn fit_linear(levels: &[[f64; 2]], cfg: &LinearConfig) -> Result<LinearModelState> {
    let test = JohansenTrace::new(cfg.significance);
    let choice = classify(levels, cfg, &test)?;
    LinearModelState::fit(levels, &choice, cfg)
}

fn select_lag(
    levels: &[[f64; 2]],
    form: BaselineForm,
    lo: usize,
    hi: usize,
    criterion: InformationCriterion,
) -> Result<usize> {
    if lo == hi {
        return Ok(lo);
    }
    let widest = Specification {
        form,
        lag_order: hi,
        long_run_pass_through: None,
    };
    let start = widest.min_history() - 1;
    let mut best: Option<(usize, f64)> = None;
    for p in lo..=hi {
        let spec = Specification {
            form,
            lag_order: p,
            long_run_pass_through: None,
        };
        let (eq, residuals) = match estimate(levels, &spec, start) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(lag = p, error = %e, "lag candidate skipped");
                continue;
            }
        };
        let t = residuals.len() as f64;
        let sigma = DMatrix::from_fn(2, 2, |i, j| eq.sigma[i][j]);
        let Ok(log_det) = log_det_spd(&sigma) else {
            continue;
        };
        let k = 2.0 * eq.coefficients.len() as f64;
        let ic = log_det + criterion.penalty(t) * k / t;
        if best.map(|(_, b)| ic < b).unwrap_or(true) {
            best = Some((p, ic));
        }
    }
    best.map(|(p, _)| p).ok_or_else(|| {
        SpilloverError::NonConvergent(format!(
            "no lag order in {lo}..={hi} could be estimated for {}",
            form.as_str()
        ))
    })
}

fn estimate(
    levels: &[[f64; 2]],
    spec: &Specification,
    start: usize,
) -> Result<(LinearEquations, Vec<[f64; 2]>)> {
    let n = levels.len();
    if n < 2 || start + 1 >= n {
        return Err(SpilloverError::InsufficientObservations {
            observations: n,
            required: start + 2,
        });
    }
    let mut x_rows = Vec::with_capacity(n - 1 - start);
    let mut y_rows = Vec::with_capacity(n - 1 - start);
    for t in start..n - 1 {
        let x = spec.regressors(&levels[..=t]).ok_or_else(|| {
            SpilloverError::InvalidInput(format!(
                "history of {} levels too short for {}",
                t + 1,
                spec.form.as_str()
            ))
        })?;
        x_rows.push(x);
        y_rows.push(spec.target(levels, t).to_vec());
    }
    let fit = ols(&matrix_from_rows(&x_rows), &matrix_from_rows(&y_rows))?;
    let cov = residual_covariance(&fit.residuals);
    if cov.iter().any(|v| !v.is_finite()) || cov[(0, 0)] <= 0.0 {
        return Err(SpilloverError::NonConvergent(
            "residual covariance is degenerate".to_string(),
        ));
    }
    let coefficients = (0..fit.coefficients.nrows())
        .map(|i| [fit.coefficients[(i, 0)], fit.coefficients[(i, 1)]])
        .collect();
    let residuals = (0..fit.residuals.nrows())
        .map(|i| [fit.residuals[(i, 0)], fit.residuals[(i, 1)]])
        .collect();
    Ok((
        LinearEquations {
            coefficients,
            sigma: [[cov[(0, 0)], cov[(0, 1)]], [cov[(1, 0)], cov[(1, 1)]]],
        },
        residuals,
    ))
}

/// Residual block bootstrap: rebuild pseudo-series from the fitted equations and
/// resampled residual blocks, then refit the same specification.
fn bootstrap_replicates(
    levels: &[[f64; 2]],
    spec: &Specification,
    equations: &LinearEquations,
    residuals: &[[f64; 2]],
    start: usize,
    cfg: &LinearConfig,
) -> Result<Vec<LinearEquations>> {
    if cfg.bootstrap_replicates == 0 || residuals.is_empty() {
        return Ok(Vec::new());
    }
    let n_res = residuals.len();
    let mean = residuals.iter().fold([0.0; 2], |acc, r| {
        [acc[0] + r[0] / n_res as f64, acc[1] + r[1] / n_res as f64]
    });
    let centered: Vec<[f64; 2]> = residuals
        .iter()
        .map(|r| [r[0] - mean[0], r[1] - mean[1]])
        .collect();
    let block_len = cfg.block_length.unwrap_or_else(|| default_block_length(n_res));

    let draws: Vec<Option<LinearEquations>> = (0..cfg.bootstrap_replicates)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(replicate_seed(cfg.seed, i as u64));
            let idx = block_indices(n_res, block_len, &mut rng);
            let mut pseudo = levels[..=start].to_vec();
            for &k in &idx {
                let delta = equations.forecast(spec, &pseudo)?;
                let last = pseudo[pseudo.len() - 1];
                let e = centered[k];
                pseudo.push([last[0] + delta[0] + e[0], last[1] + delta[1] + e[1]]);
            }
            estimate(&pseudo, spec, start).ok().map(|(eq, _)| eq)
        })
        .collect();
    let survivors: Vec<LinearEquations> = draws.into_iter().flatten().collect();

    let required = cfg.min_bootstrap_survivors.min(cfg.bootstrap_replicates);
    if survivors.len() < required {
        return Err(SpilloverError::NonConvergent(format!(
            "only {} of {} bootstrap refits succeeded",
            survivors.len(),
            cfg.bootstrap_replicates
        )));
    }
    Ok(survivors)
}
