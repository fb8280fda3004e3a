use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::CorrectorConfig;
use crate::error::{Result, SpilloverError};
use crate::linear::LinearModelState;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
const MIN_TRAIN_ROWS: usize = 20;
const MIN_VALIDATION_ROWS: usize = 5;

/// Fixed input layout plus the training-window standardisation applied to it.
///
/// Layout: `[r_t, e_b_t, Δa_next, Δa_t..Δa_{t-k+1}, Δb_t..Δb_{t-k+1}, u_t]`
/// where `r_t` is the spillover-space linear residual of the last observed
/// step and `e_b_t` the dependent-equation residual of the same step. `u_t` is
/// 1 when `r_t` is undefined (degenerate move or too little history), in which
/// case `r_t` is 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub lag_window: usize,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    pub target_scale: f64,
}

impl FeatureSchema {
    pub fn width(lag_window: usize) -> usize {
        4 + 2 * lag_window
    }

    fn fit(rows: &[Vec<f64>], lag_window: usize, target_scale: f64) -> Self {
        let d = Self::width(lag_window);
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; d];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut scale = vec![0.0; d];
        for row in rows {
            for ((s, v), m) in scale.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in &mut scale {
            *s = if *s > 1e-24 { s.sqrt() } else { 1.0 };
        }
        Self {
            lag_window,
            mean,
            scale,
            target_scale,
        }
    }

    fn standardize(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Unstandardised features for the step after `history` when the driving
/// rate moves to `next_rate_a`.
pub fn raw_features(
    linear: &LinearModelState,
    history: &[[f64; 2]],
    next_rate_a: f64,
    lag_window: usize,
    epsilon: f64,
) -> Option<Vec<f64>> {
    if history.len() < lag_window + 1 {
        return None;
    }
    let t = history.len() - 1;
    let step = linear.step_residuals(history, epsilon);
    let r = step.and_then(|s| s.spillover);
    let e_b = step.map_or(0.0, |s| s.dependent);
    let mut x = Vec::with_capacity(FeatureSchema::width(lag_window));
    x.push(r.unwrap_or(0.0));
    x.push(e_b);
    x.push(next_rate_a - history[t][0]);
    for lag in 0..lag_window {
        x.push(history[t - lag][0] - history[t - lag - 1][0]);
    }
    for lag in 0..lag_window {
        x.push(history[t - lag][1] - history[t - lag - 1][1]);
    }
    x.push(if r.is_some() { 0.0 } else { 1.0 });
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Feature rows and spillover-space residual targets over a training window.
/// Steps with a degenerate driving move carry no spillover and are skipped.
pub fn training_set(
    linear: &LinearModelState,
    levels: &[[f64; 2]],
    lag_window: usize,
    epsilon: f64,
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut rows = Vec::new();
    let mut targets = Vec::new();
    let start = linear.min_history().max(lag_window);
    for t in start..levels.len().saturating_sub(1) {
        let history = &levels[..=t];
        let next = levels[t + 1];
        let d_a = next[0] - levels[t][0];
        if d_a.abs() <= epsilon {
            continue;
        }
        let realized = (next[1] - levels[t][1]) / d_a;
        let Some(s_lin) = linear.spillover(history, d_a) else {
            continue;
        };
        let Some(x) = raw_features(linear, history, next[0], lag_window, epsilon) else {
            continue;
        };
        rows.push(x);
        targets.push(realized - s_lin);
    }
    (rows, targets)
}

/// d → h → h → 1 perceptron with tanh hidden layers, parameters stored flat as
/// `[W1 (h×d), b1, W2 (h×h), b2, w3, b3]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Mlp {
    inputs: usize,
    hidden: usize,
    params: Vec<f64>,
}

struct Layout {
    w1: usize,
    b1: usize,
    w2: usize,
    b2: usize,
    w3: usize,
    b3: usize,
    len: usize,
}

impl Mlp {
    fn layout(d: usize, h: usize) -> Layout {
        let w1 = 0;
        let b1 = w1 + h * d;
        let w2 = b1 + h;
        let b2 = w2 + h * h;
        let w3 = b2 + h;
        let b3 = w3 + h;
        Layout {
            w1,
            b1,
            w2,
            b2,
            w3,
            b3,
            len: b3 + 1,
        }
    }

    fn new(inputs: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let l = Self::layout(inputs, hidden);
        let mut params = vec![0.0; l.len];
        let xavier = |fan_in: usize, fan_out: usize| (6.0 / (fan_in + fan_out) as f64).sqrt();
        let a1 = xavier(inputs, hidden);
        for p in &mut params[l.w1..l.b1] {
            *p = rng.gen_range(-a1..a1);
        }
        let a2 = xavier(hidden, hidden);
        for p in &mut params[l.w2..l.b2] {
            *p = rng.gen_range(-a2..a2);
        }
        // small output layer: training starts near the zero correction
        let a3 = 0.1 * xavier(hidden, 1);
        for p in &mut params[l.w3..l.b3] {
            *p = rng.gen_range(-a3..a3);
        }
        Self {
            inputs,
            hidden,
            params,
        }
    }

    fn hidden_states(&self, x: &[f64]) -> (Vec<f64>, Vec<f64>, f64) {
        let (d, h) = (self.inputs, self.hidden);
        let l = Self::layout(d, h);
        let p = &self.params;
        let h1: Vec<f64> = (0..h)
            .map(|i| {
                let z = p[l.b1 + i]
                    + (0..d).map(|j| p[l.w1 + i * d + j] * x[j]).sum::<f64>();
                z.tanh()
            })
            .collect();
        let h2: Vec<f64> = (0..h)
            .map(|i| {
                let z = p[l.b2 + i]
                    + (0..h).map(|j| p[l.w2 + i * h + j] * h1[j]).sum::<f64>();
                z.tanh()
            })
            .collect();
        let out = p[l.b3] + (0..h).map(|i| p[l.w3 + i] * h2[i]).sum::<f64>();
        (h1, h2, out)
    }

    fn forward(&self, x: &[f64]) -> f64 {
        self.hidden_states(x).2
    }

    fn loss(&self, xs: &[Vec<f64>], ys: &[f64]) -> f64 {
        let n = xs.len().max(1) as f64;
        xs.iter()
            .zip(ys)
            .map(|(x, y)| (self.forward(x) - y).powi(2))
            .sum::<f64>()
            / n
    }

    /// Mean squared error and its gradient, accumulated into `grad`.
    fn loss_and_grad(&self, xs: &[Vec<f64>], ys: &[f64], grad: &mut [f64]) -> f64 {
        let (d, h) = (self.inputs, self.hidden);
        let l = Self::layout(d, h);
        let p = &self.params;
        let n = xs.len().max(1) as f64;
        grad.iter_mut().for_each(|g| *g = 0.0);
        let mut loss = 0.0;
        let mut dz2 = vec![0.0; h];
        let mut dz1 = vec![0.0; h];
        for (x, y) in xs.iter().zip(ys) {
            let (h1, h2, out) = self.hidden_states(x);
            let err = out - y;
            loss += err * err / n;
            let dout = 2.0 * err / n;

            grad[l.b3] += dout;
            for i in 0..h {
                grad[l.w3 + i] += dout * h2[i];
                dz2[i] = dout * p[l.w3 + i] * (1.0 - h2[i] * h2[i]);
            }
            for i in 0..h {
                grad[l.b2 + i] += dz2[i];
                for j in 0..h {
                    grad[l.w2 + i * h + j] += dz2[i] * h1[j];
                }
            }
            for j in 0..h {
                let back = (0..h).map(|i| p[l.w2 + i * h + j] * dz2[i]).sum::<f64>();
                dz1[j] = back * (1.0 - h1[j] * h1[j]);
            }
            for i in 0..h {
                grad[l.b1 + i] += dz1[i];
                for j in 0..d {
                    grad[l.w1 + i * d + j] += dz1[i] * x[j];
                }
            }
        }
        loss
    }
}

struct Adam {
    m: Vec<f64>,
    v: Vec<f64>,
    step: i32,
}

impl Adam {
    fn new(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
            step: 0,
        }
    }

    fn update(&mut self, params: &mut [f64], grad: &[f64], lr: f64, weight_decay: f64) {
        self.step += 1;
        let c1 = 1.0 - ADAM_BETA1.powi(self.step);
        let c2 = 1.0 - ADAM_BETA2.powi(self.step);
        for i in 0..params.len() {
            let g = grad[i] + weight_decay * params[i];
            self.m[i] = ADAM_BETA1 * self.m[i] + (1.0 - ADAM_BETA1) * g;
            self.v[i] = ADAM_BETA2 * self.v[i] + (1.0 - ADAM_BETA2) * g * g;
            let m_hat = self.m[i] / c1;
            let v_hat = self.v[i] / c2;
            params[i] -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
        }
    }
}

/// Trained residual corrector, bound to the linear state it was trained against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectorState {
    schema: FeatureSchema,
    network: Mlp,
    max_correction: f64,
    linear_fingerprint: u64,
    pub epochs_trained: usize,
    pub validation_loss: f64,
    pub zero_correction_loss: f64,
}

impl CorrectorState {
    pub fn train(
        linear: &LinearModelState,
        levels: &[[f64; 2]],
        cfg: &CorrectorConfig,
        epsilon: f64,
    ) -> Result<Self> {
        let (rows, targets) = training_set(linear, levels, cfg.lag_window, epsilon);
        let n = rows.len();
        let n_val = ((n as f64) * cfg.validation_fraction).ceil() as usize;
        let n_train = n.saturating_sub(n_val);
        if n_train < MIN_TRAIN_ROWS || n_val < MIN_VALIDATION_ROWS {
            return Err(SpilloverError::InsufficientObservations {
                observations: n,
                required: MIN_TRAIN_ROWS + MIN_VALIDATION_ROWS,
            });
        }

        let clipped: Vec<f64> = targets
            .iter()
            .map(|r| r.clamp(-cfg.max_correction, cfg.max_correction))
            .collect();
        let target_scale = (clipped[..n_train].iter().map(|r| r * r).sum::<f64>()
            / n_train as f64)
            .sqrt();
        if !target_scale.is_finite() || target_scale <= 1e-12 {
            return Err(SpilloverError::CorrectorDivergence(
                "linear residuals carry no signal to correct".to_string(),
            ));
        }

        let schema = FeatureSchema::fit(&rows[..n_train], cfg.lag_window, target_scale);
        let xs: Vec<Vec<f64>> = rows.iter().map(|r| schema.standardize(r)).collect();
        let ys: Vec<f64> = clipped.iter().map(|r| r / target_scale).collect();
        let (train_x, val_x) = xs.split_at(n_train);
        let (train_y, val_y) = ys.split_at(n_train);

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut network = Mlp::new(schema.mean.len(), cfg.hidden_units, &mut rng);
        let mut adam = Adam::new(network.params.len());
        let mut grad = vec![0.0; network.params.len()];

        let zero_loss = val_y.iter().map(|y| y * y).sum::<f64>() / val_y.len() as f64;
        let mut best_loss = network.loss(val_x, val_y);
        let mut best_params = network.params.clone();
        let mut since_best = 0;
        let mut epochs = 0;
        for epoch in 0..cfg.max_epochs {
            let train_loss = network.loss_and_grad(train_x, train_y, &mut grad);
            if !train_loss.is_finite() {
                return Err(SpilloverError::CorrectorDivergence(format!(
                    "training loss became non-finite at epoch {epoch}"
                )));
            }
            adam.update(&mut network.params, &grad, cfg.learning_rate, cfg.weight_decay);
            let val_loss = network.loss(val_x, val_y);
            if !val_loss.is_finite() {
                return Err(SpilloverError::CorrectorDivergence(format!(
                    "validation loss became non-finite at epoch {epoch}"
                )));
            }
            epochs = epoch + 1;
            if val_loss < best_loss {
                best_loss = val_loss;
                best_params.copy_from_slice(&network.params);
                since_best = 0;
            } else {
                since_best += 1;
                if since_best >= cfg.patience {
                    break;
                }
            }
        }

        if best_loss >= zero_loss * (1.0 - cfg.min_improvement) {
            return Err(SpilloverError::CorrectorDivergence(format!(
                "best validation loss {best_loss:.5} does not beat zero correction {zero_loss:.5}"
            )));
        }
        network.params = best_params;
        tracing::debug!(
            epochs,
            validation_loss = best_loss,
            zero_correction_loss = zero_loss,
            rows = n,
            "residual corrector trained"
        );
        Ok(Self {
            schema,
            network,
            max_correction: cfg.max_correction,
            linear_fingerprint: linear.fingerprint(),
            epochs_trained: epochs,
            validation_loss: best_loss,
            zero_correction_loss: zero_loss,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn is_paired_with(&self, linear: &LinearModelState) -> bool {
        self.linear_fingerprint == linear.fingerprint()
    }

    /// Correction for the spillover of the step after `history`, clipped to
    /// ±`max_correction`.
    pub fn correction(
        &self,
        linear: &LinearModelState,
        history: &[[f64; 2]],
        next_rate_a: f64,
        epsilon: f64,
    ) -> Result<f64> {
        if !self.is_paired_with(linear) {
            return Err(SpilloverError::InvalidInput(
                "corrector was trained against a different linear state".to_string(),
            ));
        }
        let raw = raw_features(linear, history, next_rate_a, self.schema.lag_window, epsilon)
            .ok_or(SpilloverError::InsufficientObservations {
                observations: history.len(),
                required: self.schema.lag_window + 1,
            })?;
        let out = self.network.forward(&self.schema.standardize(&raw)) * self.schema.target_scale;
        Ok(out.clamp(-self.max_correction, self.max_correction))
    }
}
