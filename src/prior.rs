//! Discrete hyper-priors over Bernoulli firing probabilities.
//!
//! A [`Categorical01`] is a categorical distribution whose support values lie in
//! `[0, 1]`; each support value is itself a candidate firing probability for a
//! gated Boolean node. The two algebraic operations used by graph squeezing are
//! [`multiply`](Categorical01::multiply) (distribution of `p·q` for independent
//! `p`, `q`) and [`reverse_multiply`](Categorical01::reverse_multiply)
//! (distribution of `1-(1-p)(1-q)`, the noisy-OR of two alternatives).
//!
//! Both operations bin the product support into [`NUM_SLOTS`] equal-width slots.
//! Each slot keeps the weighted mean of the values that landed in it, so the
//! mean of the result is exact even though the support is discretized.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PriorError, PriorResult};

/// Number of discretization slots used by `multiply` / `reverse_multiply`.
pub const NUM_SLOTS: usize = 64;

const STRIDE: f64 = 1.0 / NUM_SLOTS as f64;
const SUM_TOLERANCE: f64 = 1e-6;

/// Serialized form of a prior: parallel support and weight lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSpec {
    pub supports: Vec<f64>,
    pub weights: Vec<f64>,
}

/// Categorical distribution over sorted, unique support values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PriorSpec", into = "PriorSpec")]
pub struct Categorical01 {
    supports: Vec<f64>,
    probs: Vec<f64>,
}

impl Categorical01 {
    /// Build a prior whose probabilities already sum to 1.
    ///
    /// Duplicate supports are merged and the result is sorted.
    pub fn new(supports: Vec<f64>, probs: Vec<f64>) -> PriorResult<Self> {
        let sum = validate(&supports, &probs)?;
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(PriorError::NotNormalized { sum });
        }
        Ok(Self::canonical(supports, probs, sum))
    }

    /// Build a prior from unnormalized non-negative weights.
    pub fn from_weights(supports: Vec<f64>, weights: Vec<f64>) -> PriorResult<Self> {
        let sum = validate(&supports, &weights)?;
        if sum <= 0.0 {
            return Err(PriorError::NotNormalized { sum });
        }
        Ok(Self::canonical(supports, weights, sum))
    }

    /// A point mass: the gate fires with probability exactly `p`.
    pub fn point(p: f64) -> PriorResult<Self> {
        Self::new(vec![p], vec![1.0])
    }

    /// The point mass at 0: a gate that never fires.
    pub fn never() -> Self {
        Self {
            supports: vec![0.0],
            probs: vec![1.0],
        }
    }

    /// Equal weight on every listed support value.
    pub fn uniform(values: &[f64]) -> PriorResult<Self> {
        Self::from_weights(values.to_vec(), vec![1.0; values.len()])
    }

    fn canonical(supports: Vec<f64>, weights: Vec<f64>, sum: f64) -> Self {
        let mut pairs: Vec<(f64, f64)> = supports.into_iter().zip(weights).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut out_s: Vec<f64> = Vec::with_capacity(pairs.len());
        let mut out_p: Vec<f64> = Vec::with_capacity(pairs.len());
        for (s, w) in pairs {
            match out_s.last() {
                Some(&last) if last == s => {
                    if let Some(p) = out_p.last_mut() {
                        *p += w / sum;
                    }
                }
                _ => {
                    out_s.push(s);
                    out_p.push(w / sum);
                }
            }
        }
        Self {
            supports: out_s,
            probs: out_p,
        }
    }

    pub fn supports(&self) -> &[f64] {
        &self.supports
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    /// Number of support values (the cardinality of the prior's variable).
    pub fn len(&self) -> usize {
        self.supports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supports.is_empty()
    }

    /// True when all mass sits on a single support value.
    ///
    /// Gates drawing from a point mass are independent of each other, so such
    /// a prior can be shared between nodes without correlating them.
    pub fn is_point(&self) -> bool {
        self.supports.len() == 1
    }

    /// Expected firing probability.
    pub fn mean(&self) -> f64 {
        self.supports
            .iter()
            .zip(&self.probs)
            .map(|(s, p)| s * p)
            .sum()
    }

    /// Probability mass at exactly `value`.
    pub fn probability(&self, value: f64) -> f64 {
        self.supports
            .iter()
            .position(|&s| s == value)
            .map(|i| self.probs[i])
            .unwrap_or(0.0)
    }

    /// Replace the probability vector (e.g. with a solver's updated weights).
    ///
    /// The weights are renormalized; their count must match the support count.
    pub fn update_probs(&mut self, weights: &[f64]) -> PriorResult<()> {
        if weights.len() != self.supports.len() {
            return Err(PriorError::LengthMismatch {
                supports: self.supports.len(),
                weights: weights.len(),
            });
        }
        let sum = validate(&self.supports, weights)?;
        if sum <= 0.0 {
            return Err(PriorError::NotNormalized { sum });
        }
        self.probs = weights.iter().map(|w| w / sum).collect();
        Ok(())
    }

    /// Distribution of `p·q` for independent `p ~ self`, `q ~ other`.
    pub fn multiply(&self, other: &Self) -> Self {
        self.combine(other, |p, q| p * q)
    }

    /// Distribution of `1-(1-p)(1-q)` for independent `p ~ self`, `q ~ other`.
    pub fn reverse_multiply(&self, other: &Self) -> Self {
        self.combine(other, |p, q| 1.0 - (1.0 - p) * (1.0 - q))
    }

    fn combine(&self, other: &Self, op: impl Fn(f64, f64) -> f64) -> Self {
        let mut mass = [0.0f64; NUM_SLOTS + 1];
        let mut weight = [0.0f64; NUM_SLOTS + 1];
        for (&p, &wp) in self.supports.iter().zip(&self.probs) {
            for (&q, &wq) in other.supports.iter().zip(&other.probs) {
                let v = op(p, q).clamp(0.0, 1.0);
                let w = wp * wq;
                let slot = ((v / STRIDE).ceil() as usize).min(NUM_SLOTS);
                mass[slot] += v * w;
                weight[slot] += w;
            }
        }

        let mut supports = Vec::new();
        let mut probs = Vec::new();
        for slot in 0..=NUM_SLOTS {
            if weight[slot] > 0.0 {
                supports.push((mass[slot] / weight[slot]).clamp(0.0, 1.0));
                probs.push(weight[slot]);
            }
        }
        let total: f64 = probs.iter().sum();
        for p in &mut probs {
            *p /= total;
        }
        Self { supports, probs }
    }

    /// Optional fold: `None` on either side yields the other operand.
    pub fn multiply_opt(a: Option<&Self>, b: Option<&Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.multiply(b)),
            (Some(x), None) | (None, Some(x)) => Some(x.clone()),
            (None, None) => None,
        }
    }
}

fn validate(supports: &[f64], weights: &[f64]) -> PriorResult<f64> {
    if supports.len() != weights.len() {
        return Err(PriorError::LengthMismatch {
            supports: supports.len(),
            weights: weights.len(),
        });
    }
    if supports.is_empty() {
        return Err(PriorError::Empty);
    }
    for &s in supports {
        if !(0.0..=1.0).contains(&s) {
            return Err(PriorError::SupportOutOfRange { value: s });
        }
    }
    let mut sum = 0.0;
    for &w in weights {
        if !w.is_finite() || w < 0.0 {
            return Err(PriorError::InvalidWeight { value: w });
        }
        sum += w;
    }
    Ok(sum)
}

impl TryFrom<PriorSpec> for Categorical01 {
    type Error = PriorError;

    fn try_from(spec: PriorSpec) -> PriorResult<Self> {
        Self::new(spec.supports, spec.weights)
    }
}

impl From<Categorical01> for PriorSpec {
    fn from(c: Categorical01) -> Self {
        Self {
            supports: c.supports,
            weights: c.probs,
        }
    }
}

impl fmt::Display for Categorical01 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cat[")?;
        for (i, (s, p)) in self.supports.iter().zip(&self.probs).enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{s:.4}:{p:.4}")?;
        }
        write!(f, "]")
    }
}
