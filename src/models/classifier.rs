//! Fitted classifiers evaluated natively from their exported parameters.

use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// A fitted classifier, tagged by `kind` in its artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
}

impl Classifier {
    /// Class labels, in probability column order
    pub fn classes(&self) -> &[i64] {
        match self {
            Classifier::LogisticRegression(m) => &m.classes,
            Classifier::RandomForest(m) => &m.classes,
        }
    }

    /// Number of input columns the model was fitted on
    pub fn n_features(&self) -> usize {
        match self {
            Classifier::LogisticRegression(m) => m.coef.first().map_or(0, Vec::len),
            Classifier::RandomForest(m) => m.n_features,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Classifier::LogisticRegression(_) => "logistic_regression",
            Classifier::RandomForest(_) => "random_forest",
        }
    }

    /// Structural checks run by the artifact loader
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.classes().len() < 2 {
            return Err("classifier needs at least two classes".to_string());
        }
        if self.n_features() == 0 {
            return Err("classifier has no input columns".to_string());
        }
        match self {
            Classifier::LogisticRegression(m) => m.validate(),
            Classifier::RandomForest(m) => m.validate(),
        }
    }

    /// Class probabilities for one scaled row
    pub fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != self.n_features() {
            return Err(PipelineError::FeatureMismatch {
                stage: "classifier",
                expected: self.n_features(),
                actual: features.len(),
            });
        }

        Ok(match self {
            Classifier::LogisticRegression(m) => m.predict_proba(features),
            Classifier::RandomForest(m) => m.predict_proba(features),
        })
    }

    /// Predicted class and class probabilities for one scaled row.
    ///
    /// The class is the label of the highest probability; ties go to the first.
    pub fn predict(&self, features: &[f64]) -> Result<(i64, Vec<f64>)> {
        let proba = self.predict_proba(features)?;

        let best = proba
            .iter()
            .enumerate()
            .fold(0, |best, (i, &p)| if p > proba[best] { i } else { best });

        Ok((self.classes()[best], proba))
    }
}

/// Linear model with logistic link.
///
/// Binary models carry one coefficient row and yield `[1 - p, p]`; multinomial
/// models carry one row per class and are normalised with softmax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub classes: Vec<i64>,
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
}

impl LogisticRegression {
    fn validate(&self) -> std::result::Result<(), String> {
        let expected_rows = if self.classes.len() == 2 { 1 } else { self.classes.len() };
        if self.coef.len() != expected_rows {
            return Err(format!(
                "expected {} coefficient rows for {} classes, got {}",
                expected_rows,
                self.classes.len(),
                self.coef.len()
            ));
        }
        if self.intercept.len() != expected_rows {
            return Err(format!(
                "expected {} intercepts, got {}",
                expected_rows,
                self.intercept.len()
            ));
        }
        let width = self.coef[0].len();
        if self.coef.iter().any(|row| row.len() != width) {
            return Err("coefficient rows have different widths".to_string());
        }
        Ok(())
    }

    fn decision(&self, features: &[f64]) -> Vec<f64> {
        self.coef
            .iter()
            .zip(&self.intercept)
            .map(|(row, b)| row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        let scores = self.decision(features);

        if scores.len() == 1 {
            let p = sigmoid(scores[0]);
            return vec![1.0 - p, p];
        }

        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Bagged decision trees; probabilities are the mean of per-tree leaf distributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub classes: Vec<i64>,
    pub n_features: usize,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.trees.is_empty() {
            return Err("random forest has no trees".to_string());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.classes.len())
                .map_err(|e| format!("tree {i}: {e}"))?;
        }
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0; self.classes.len()];

        for tree in &self.trees {
            let leaf = tree.leaf_distribution(features);
            let total: f64 = leaf.iter().sum();
            if total <= 0.0 {
                continue;
            }
            for (acc, v) in proba.iter_mut().zip(leaf) {
                *acc += v / total;
            }
        }

        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }
}

/// One tree in array form: node `i` is a leaf when `children_left[i] == -1`,
/// otherwise rows with `x[feature[i]] <= threshold[i]` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    /// Per-node class counts or fractions
    pub value: Vec<Vec<f64>>,
}

const LEAF: i64 = -1;

impl DecisionTree {
    fn validate(&self, n_features: usize, n_classes: usize) -> std::result::Result<(), String> {
        let nodes = self.children_left.len();
        if nodes == 0 {
            return Err("empty tree".to_string());
        }
        if [
            self.children_right.len(),
            self.feature.len(),
            self.threshold.len(),
            self.value.len(),
        ]
        .iter()
        .any(|&len| len != nodes)
        {
            return Err("node arrays have different lengths".to_string());
        }

        for node in 0..nodes {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == LEAF {
                let leaf = &self.value[node];
                if leaf.len() != n_classes {
                    return Err(format!("leaf {node} has wrong class count"));
                }
                if leaf.iter().any(|v| !v.is_finite() || *v < 0.0) {
                    return Err(format!("leaf {node} has invalid class values"));
                }
                let total: f64 = leaf.iter().sum();
                if !total.is_finite() || total <= 0.0 {
                    return Err(format!("leaf {node} has no class weight"));
                }
                continue;
            }
            // children always come after their parent, so traversal terminates
            for child in [left, right] {
                if child <= node as i64 || child >= nodes as i64 {
                    return Err(format!("node {node} has invalid child {child}"));
                }
            }
            let feature = self.feature[node];
            if feature < 0 || feature as usize >= n_features {
                return Err(format!("node {node} splits on invalid feature {feature}"));
            }
        }
        Ok(())
    }

    fn leaf_distribution(&self, features: &[f64]) -> &[f64] {
        let mut node = 0usize;
        while self.children_left[node] != LEAF {
            let x = features[self.feature[node] as usize];
            node = if x <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        &self.value[node]
    }
}
