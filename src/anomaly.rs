use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bootstrap::{percentile, replicate_seed, sort_finite};
use crate::error::{Result, SpilloverError};

const EULER_GAMMA: f64 = 0.577_215_664_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(points: &[Vec<f64>], rows: Vec<usize>, depth_limit: usize, rng: &mut StdRng) -> Self {
        let mut nodes = Vec::new();
        Self::grow(points, rows, 0, depth_limit, rng, &mut nodes);
        Self { nodes }
    }

    fn grow(
        points: &[Vec<f64>],
        rows: Vec<usize>,
        depth: usize,
        depth_limit: usize,
        rng: &mut StdRng,
        nodes: &mut Vec<Node>,
    ) -> usize {
        let id = nodes.len();
        nodes.push(Node::Leaf { size: rows.len() });
        if rows.len() <= 1 || depth >= depth_limit {
            return id;
        }
        let dims = points[rows[0]].len();
        let splittable: Vec<(usize, f64, f64)> = (0..dims)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |acc, &r| {
                    (acc.0.min(points[r][f]), acc.1.max(points[r][f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if splittable.is_empty() {
            return id;
        }
        let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| points[r][feature] < threshold);
        let left = Self::grow(points, left_rows, depth + 1, depth_limit, rng, nodes);
        let right = Self::grow(points, right_rows, depth + 1, depth_limit, rng, nodes);
        nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut id = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[id] {
                Node::Leaf { size } => return depth + average_path(size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if x[feature] < threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Isolation forest fitted once on training conditioning features and reused
/// for every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    subsample: usize,
    threshold: f64,
}

impl IsolationForest {
    pub fn fit(
        points: &[Vec<f64>],
        trees: usize,
        subsample: usize,
        contamination: f64,
        seed: u64,
    ) -> Result<Self> {
        if points.len() < 2 {
            return Err(SpilloverError::InsufficientObservations {
                observations: points.len(),
                required: 2,
            });
        }
        let dims = points[0].len();
        if dims == 0 || points.iter().any(|p| p.len() != dims || p.iter().any(|v| !v.is_finite())) {
            return Err(SpilloverError::InvalidInput(
                "anomaly features must be finite and of equal width".to_string(),
            ));
        }
        let psi = subsample.clamp(2, points.len());
        let depth_limit = (psi as f64).log2().ceil() as usize;
        let forest: Vec<IsolationTree> = (0..trees.max(1))
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(replicate_seed(seed, i as u64));
                let rows = sample(&mut rng, points.len(), psi).into_vec();
                IsolationTree::build(points, rows, depth_limit, &mut rng)
            })
            .collect();

        let mut model = Self {
            trees: forest,
            subsample: psi,
            threshold: 1.0,
        };
        let mut scores: Vec<f64> = points.iter().map(|p| model.score(p)).collect();
        sort_finite(&mut scores);
        model.threshold = percentile(&scores, 1.0 - contamination).unwrap_or(1.0);
        Ok(model)
    }

    /// Anomaly score in (0, 1]; higher is more isolated.
    pub fn score(&self, x: &[f64]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>()
            / self.trees.len().max(1) as f64;
        let c = average_path(self.subsample);
        if c <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / c)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_anomaly(&self, x: &[f64]) -> bool {
        self.score(x) > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud(n: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| vec![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect()
    }

    #[test]
    fn average_path_matches_known_values() {
        assert_eq!(average_path(1), 0.0);
        assert_eq!(average_path(2), 1.0);
        let c256 = average_path(256);
        assert!((c256 - 10.24).abs() < 0.05, "c(256) = {c256}");
    }

    #[test]
    fn far_point_scores_above_threshold() {
        let points = cloud(300, 4);
        let forest = IsolationForest::fit(&points, 100, 128, 0.01, 9).unwrap();
        assert!(forest.is_anomaly(&[8.0, -8.0]));
        assert!(!forest.is_anomaly(&[0.0, 0.0]));
        assert!(forest.score(&[8.0, -8.0]) > forest.score(&[0.1, 0.1]));
    }

    #[test]
    fn fit_is_deterministic_for_a_seed() {
        let points = cloud(200, 5);
        let a = IsolationForest::fit(&points, 50, 64, 0.01, 3).unwrap();
        let b = IsolationForest::fit(&points, 50, 64, 0.01, 3).unwrap();
        assert_eq!(a, b);
    }
}
