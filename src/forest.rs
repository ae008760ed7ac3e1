//! Bagged regression trees.
//!
//! Each tree is a CART regressor grown on a bootstrap sample, splitting on
//! the threshold that most reduces the sum of squared errors. Trees are
//! stored as flat node arrays; the forest prediction is the mean of the tree
//! predictions.
//!
//! Trees are fitted on the caller's current rayon pool; wrap the call in
//! [`rayon::ThreadPool::install`] to bound it. Tree `i` draws its bootstrap
//! from its own RNG seeded with `seed + i`, and results are collected in tree
//! order, so a fixed seed gives the same forest for any worker count.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::errors::{ForecastError, Result};

// ---

/// Ensemble hyperparameters.
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub tree_count: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
    pub seed: u64,
    /// Size of the worker pool built by [`worker_pool`].
    pub workers: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            tree_count: 100,
            max_depth: 20,
            min_samples_leaf: 2,
            min_samples_split: 5,
            seed: 42,
            workers: default_workers(),
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<()> {
        // ---
        let checks = [
            ("tree count", self.tree_count),
            ("max depth", self.max_depth),
            ("min leaf samples", self.min_samples_leaf),
            ("min split samples", self.min_samples_split),
            ("workers", self.workers),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ForecastError::invalid_config(name, "must be at least 1"));
            }
        }
        Ok(())
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            min_samples_split: self.min_samples_split,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Build the bounded pool that fitting and featurization run on.
pub fn worker_pool(workers: usize) -> Result<rayon::ThreadPool> {
    // ---
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("forecast-worker-{}", i))
        .build()
        .map_err(|e| ForecastError::WorkerPool(e.to_string()))
}

#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub depth: usize,
    pub samples: usize,
}

/// Row-major training matrix with one target per row.
pub struct Dataset<'a> {
    pub rows: &'a [Vec<f64>],
    pub targets: &'a [f64],
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Total squared-error reduction per feature.
    impurity_decrease: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
}

impl RegressionTree {
    // ---
    /// Grow a tree on the rows selected by `indices` (repeats allowed).
    pub fn fit(data: &Dataset<'_>, indices: Vec<usize>, config: &TreeConfig) -> Result<Self> {
        // ---
        if indices.is_empty() {
            return Err(ForecastError::InsufficientData { train: 0, eval: 0 });
        }
        let n_features = data.rows[indices[0]].len();
        let mut tree = RegressionTree {
            nodes: Vec::new(),
            impurity_decrease: vec![0.0; n_features],
        };
        tree.build(data, indices, 0, config);
        Ok(tree)
    }

    fn build(&mut self, data: &Dataset<'_>, indices: Vec<usize>, depth: usize, config: &TreeConfig) -> usize {
        // ---
        let n = indices.len();
        let (sum, sum_sq) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
            let y = data.targets[i];
            (s + y, sq + y * y)
        });
        let mean = sum / n as f64;
        let node_sse = (sum_sq - sum * sum / n as f64).max(0.0);

        let node_index = self.nodes.len();
        self.nodes.push(Node {
            kind: NodeKind::Leaf { value: mean },
            depth,
            samples: n,
        });

        if depth >= config.max_depth
            || n < config.min_samples_split
            || n < 2 * config.min_samples_leaf
            || node_sse <= f64::EPSILON
        {
            return node_index;
        }

        let Some(best) = best_split(data, &indices, config.min_samples_leaf) else {
            return node_index;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| data.rows[i][best.feature] <= best.threshold);
        if left.len() < config.min_samples_leaf || right.len() < config.min_samples_leaf {
            return node_index;
        }

        self.impurity_decrease[best.feature] += (node_sse - best.sse).max(0.0);

        let left_index = self.build(data, left, depth + 1, config);
        let right_index = self.build(data, right, depth + 1, config);
        self.nodes[node_index].kind = NodeKind::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_index,
            right: right_index,
        };
        node_index
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        // ---
        let mut current = 0;
        loop {
            match self.nodes[current].kind {
                NodeKind::Leaf { value } => return value,
                NodeKind::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Impurity decrease per feature, normalized to sum to 1.
    pub fn feature_importances(&self) -> Vec<f64> {
        normalize(&self.impurity_decrease)
    }
}

/// Lowest-SSE split over all features, scanning sorted values once per feature.
fn best_split(data: &Dataset<'_>, indices: &[usize], min_leaf: usize) -> Option<BestSplit> {
    // ---
    let n = indices.len();
    let n_features = data.rows[indices[0]].len();
    let (total, total_sq) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
        let y = data.targets[i];
        (s + y, sq + y * y)
    });

    let mut best: Option<BestSplit> = None;
    let mut order = indices.to_vec();

    for feature in 0..n_features {
        order.sort_by(|&a, &b| data.rows[a][feature].total_cmp(&data.rows[b][feature]));

        let (mut left_sum, mut left_sq) = (0.0, 0.0);
        for k in 1..n {
            let y = data.targets[order[k - 1]];
            left_sum += y;
            left_sq += y * y;

            if k < min_leaf || n - k < min_leaf {
                continue;
            }
            let lo = data.rows[order[k - 1]][feature];
            let hi = data.rows[order[k]][feature];
            if lo >= hi {
                continue;
            }

            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / k as f64)
                + (right_sq - right_sum * right_sum / (n - k) as f64);

            if best.as_ref().map_or(true, |b| sse < b.sse - 1e-12) {
                best = Some(BestSplit {
                    feature,
                    threshold: lo + (hi - lo) / 2.0,
                    sse,
                });
            }
        }
    }
    best
}

fn normalize(values: &[f64]) -> Vec<f64> {
    // ---
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; values.len()]
    }
}

/// Bootstrap-aggregated regression trees.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForest {
    // ---
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], config: &ForestConfig) -> Result<Self> {
        // ---
        config.validate()?;
        if rows.is_empty() {
            return Err(ForecastError::InsufficientData { train: 0, eval: 0 });
        }
        if rows.len() != targets.len() {
            return Err(ForecastError::LengthMismatch {
                actual: targets.len(),
                predicted: rows.len(),
            });
        }

        let data = Dataset { rows, targets };
        let tree_config = config.tree_config();

        let trees = (0..config.tree_count)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(i as u64));
                let sample = bootstrap(&mut rng, rows.len());
                RegressionTree::fit(&data, sample, &tree_config)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RandomForest {
            trees,
            n_features: rows[0].len(),
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        // ---
        let total: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        total / self.trees.len() as f64
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Mean of the per-tree normalized importances, renormalized.
    pub fn feature_importances(&self) -> Vec<f64> {
        // ---
        let mut summed = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (acc, value) in summed.iter_mut().zip(tree.feature_importances()) {
                *acc += value;
            }
        }
        normalize(&summed)
    }
}

/// `n` row indices drawn with replacement.
fn bootstrap(rng: &mut StdRng, n: usize) -> Vec<usize> {
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}
