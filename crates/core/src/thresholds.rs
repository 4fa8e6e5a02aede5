//! Adaptive threshold engine.
//!
//! Keeps a fixed-capacity rolling window per metric and derives a
//! `(lower, upper)` bound from it. Bounds are recomputed only when a value is
//! observed, so the bound is a pure function of the window contents: the same
//! sequence of observations always yields the same bounds.
//!
//! Metrics with fewer than [`MIN_SAMPLES`] observations use a static
//! fallback bound. Non-finite observations are dropped, never stored.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::metric_names::{METRIC_COST_PER_ASSET, METRIC_DURATION_SECS, METRIC_SUCCESS_RATE};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Observations retained per metric (most recent campaigns).
pub const DEFAULT_WINDOW_CAPACITY: usize = 50;

/// Observations required before the adaptive formula replaces the fallback.
pub const MIN_SAMPLES: usize = 5;

/// Floor and ceiling applied to the adaptive success-rate lower bound.
pub const SUCCESS_RATE_LOWER_MIN: f64 = 0.60;
pub const SUCCESS_RATE_LOWER_MAX: f64 = 0.95;

/// Static success-rate lower bound used until enough samples exist.
pub const SUCCESS_RATE_FALLBACK_LOWER: f64 = 0.80;

/// Static cost-per-asset upper bound used until enough samples exist.
pub const COST_PER_ASSET_FALLBACK_UPPER: f64 = 5.0;

/// Static duration upper bound (seconds) used until enough samples exist.
pub const DURATION_FALLBACK_UPPER_SECS: f64 = 600.0;

// ---------------------------------------------------------------------------
// Bound
// ---------------------------------------------------------------------------

/// A pass/fail range. `None` on either side means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bound {
    pub const UNBOUNDED: Bound = Bound {
        lower: None,
        upper: None,
    };

    pub fn lower(value: f64) -> Self {
        Self {
            lower: Some(value),
            upper: None,
        }
    }

    pub fn upper(value: f64) -> Self {
        Self {
            lower: None,
            upper: Some(value),
        }
    }

    /// Which side of the bound `value` falls outside of, if any.
    pub fn violation(&self, value: f64) -> Option<BreachDirection> {
        if self.lower.is_some_and(|lower| value < lower) {
            Some(BreachDirection::Below)
        } else if self.upper.is_some_and(|upper| value > upper) {
            Some(BreachDirection::Above)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// How an adaptive bound is derived from a metric's window.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundFormula {
    /// `lower = clamp(percentile(window, percentile), min, max)`.
    LowerPercentile { percentile: f64, min: f64, max: f64 },
    /// `upper = factor × mean(window)`.
    UpperMeanMultiple { factor: f64 },
}

impl BoundFormula {
    fn apply(&self, samples: &VecDeque<f64>) -> Bound {
        match self {
            BoundFormula::LowerPercentile {
                percentile: p,
                min,
                max,
            } => Bound::lower(percentile(samples, *p).clamp(*min, *max)),
            BoundFormula::UpperMeanMultiple { factor } => Bound::upper(factor * mean(samples)),
        }
    }
}

/// Formula plus the static bound used while the window is too small.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRule {
    pub formula: BoundFormula,
    pub fallback: Bound,
}

/// Built-in rules for the metrics the coordinator records.
pub fn default_rules() -> HashMap<String, MetricRule> {
    HashMap::from([
        (
            METRIC_SUCCESS_RATE.to_string(),
            MetricRule {
                formula: BoundFormula::LowerPercentile {
                    percentile: 0.25,
                    min: SUCCESS_RATE_LOWER_MIN,
                    max: SUCCESS_RATE_LOWER_MAX,
                },
                fallback: Bound::lower(SUCCESS_RATE_FALLBACK_LOWER),
            },
        ),
        (
            METRIC_COST_PER_ASSET.to_string(),
            MetricRule {
                formula: BoundFormula::UpperMeanMultiple { factor: 1.5 },
                fallback: Bound::upper(COST_PER_ASSET_FALLBACK_UPPER),
            },
        ),
        (
            METRIC_DURATION_SECS.to_string(),
            MetricRule {
                formula: BoundFormula::UpperMeanMultiple { factor: 2.0 },
                fallback: Bound::upper(DURATION_FALLBACK_UPPER_SECS),
            },
        ),
    ])
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Linear-interpolated percentile (`p` in `0.0..=1.0`) of the samples.
///
/// Returns 0.0 for an empty window.
pub fn percentile(samples: &VecDeque<f64>, p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);

    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Arithmetic mean of the samples; 0.0 for an empty window.
pub fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Rolling window and derived bound for one metric.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdState {
    pub metric: String,
    pub samples: VecDeque<f64>,
    pub bound: Bound,
    /// Whether `bound` came from the formula (true) or the fallback (false).
    pub adaptive: bool,
    pub last_recomputed: Option<Timestamp>,
}

/// Result of [`ThresholdEngine::observe`].
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Accepted { bound: Bound },
    /// The value was not finite and was not inserted.
    Dropped { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreachDirection {
    Below,
    Above,
}

/// A value that fell outside its metric's current bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub metric: String,
    pub value: f64,
    pub bound: Bound,
    pub direction: BreachDirection,
}

#[derive(Debug, Clone)]
pub struct ThresholdEngine {
    capacity: usize,
    rules: HashMap<String, MetricRule>,
    states: HashMap<String, ThresholdState>,
}

impl Default for ThresholdEngine {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl ThresholdEngine {
    /// Engine with the built-in rules and the given window capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rules: default_rules(),
            states: HashMap::new(),
        }
    }

    /// Register or replace the rule for a metric.
    pub fn with_rule(mut self, metric: impl Into<String>, rule: MetricRule) -> Self {
        self.rules.insert(metric.into(), rule);
        self
    }

    /// Append a value to the metric's window and recompute its bound.
    pub fn observe(&mut self, metric: &str, value: f64, now: Timestamp) -> Observation {
        if !value.is_finite() {
            return Observation::Dropped {
                reason: format!("non-finite value {value} for metric {metric}"),
            };
        }

        let capacity = self.capacity;
        let state = self
            .states
            .entry(metric.to_string())
            .or_insert_with(|| ThresholdState {
                metric: metric.to_string(),
                samples: VecDeque::with_capacity(capacity),
                bound: Bound::UNBOUNDED,
                adaptive: false,
                last_recomputed: None,
            });

        if state.samples.len() >= capacity {
            state.samples.pop_front();
        }
        state.samples.push_back(value);

        let (bound, adaptive) = derive_bound(self.rules.get(metric), &state.samples);
        state.bound = bound;
        state.adaptive = adaptive;
        state.last_recomputed = Some(now);

        Observation::Accepted { bound }
    }

    /// The bound currently in force for a metric.
    pub fn current_bound(&self, metric: &str) -> Bound {
        match self.states.get(metric) {
            Some(state) => state.bound,
            None => self
                .rules
                .get(metric)
                .map(|rule| rule.fallback)
                .unwrap_or(Bound::UNBOUNDED),
        }
    }

    /// Compare a value against the metric's current bound.
    pub fn check(&self, metric: &str, value: f64) -> Option<Breach> {
        if !value.is_finite() {
            return None;
        }
        let bound = self.current_bound(metric);
        bound.violation(value).map(|direction| Breach {
            metric: metric.to_string(),
            value,
            bound,
            direction,
        })
    }

    pub fn state(&self, metric: &str) -> Option<&ThresholdState> {
        self.states.get(metric)
    }

    /// All tracked metrics, sorted by name for stable output.
    pub fn states(&self) -> Vec<&ThresholdState> {
        let mut states: Vec<_> = self.states.values().collect();
        states.sort_by(|a, b| a.metric.cmp(&b.metric));
        states
    }
}

fn derive_bound(rule: Option<&MetricRule>, samples: &VecDeque<f64>) -> (Bound, bool) {
    match rule {
        Some(rule) if samples.len() >= MIN_SAMPLES => (rule.formula.apply(samples), true),
        Some(rule) => (rule.fallback, false),
        None => (Bound::UNBOUNDED, false),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
