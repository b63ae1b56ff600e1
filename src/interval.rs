//! Probabilistic intervals shared by cardinality, time and cost estimates.
//!
//! Every quantity C3/C4 reasons about is a `(lower, upper, p)` triple rather
//! than a point value: `p` is the estimator's own confidence that the true
//! value lies within `[lower, upper]`. Composing two independent estimates
//! (sequential operators, summed resources) takes the probability of the
//! weaker of the two, per the data model's `p' = min(p1, p2)` rule.

use std::cmp::Ordering;

/// `(lower: u64, upper: u64, p: f64)` -- the cardinality estimate shape from
/// the data model. `lower <= upper` and `p` is a correctness probability in
/// `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CardinalityEstimate {
    pub lower: u64,
    pub upper: u64,
    pub p: f64,
}

impl CardinalityEstimate {
    /// Build an estimate, clamping `p` into `[0, 1]` and swapping
    /// `lower`/`upper` if given out of order.
    #[must_use]
    pub fn new(lower: u64, upper: u64, p: f64) -> Self {
        let (lower, upper) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        Self {
            lower,
            upper,
            p: p.clamp(0.0, 1.0),
        }
    }

    /// An exact, fully-confident estimate -- the shape a measured
    /// cardinality is converted into (`CardinalityEstimate(m, m, 1.0)`).
    #[must_use]
    pub fn exact(value: u64) -> Self {
        Self::new(value, value, 1.0)
    }

    #[must_use]
    pub fn midpoint(&self) -> f64 {
        (self.lower as f64 + self.upper as f64) / 2.0
    }

    /// Sum of two independent estimates: intervals add, confidence takes
    /// the weaker of the two.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self::new(
            self.lower.saturating_add(other.lower),
            self.upper.saturating_add(other.upper),
            self.p.min(other.p),
        )
    }

    /// Product of two independent estimates (e.g. join cardinality upper
    /// bound), same confidence rule.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        Self::new(
            self.lower.saturating_mul(other.lower),
            self.upper.saturating_mul(other.upper),
            self.p.min(other.p),
        )
    }

    /// Scale both bounds by a constant factor (e.g. a filter selectivity),
    /// confidence unchanged.
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        let lower = (self.lower as f64 * factor).round().max(0.0) as u64;
        let upper = (self.upper as f64 * factor).round().max(0.0) as u64;
        Self::new(lower, upper, self.p)
    }

    /// `true` if this estimate's interval and confidence are both at least
    /// as tight/certain as `other`'s component-wise floor -- used by the
    /// cardinality-monotonicity property test.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        self.lower >= other.lower && self.upper >= other.upper
    }
}

/// A probabilistic interval over `f64`, used for time estimates
/// (milliseconds) and monetary cost estimates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbabilisticDoubleInterval {
    pub lower: f64,
    pub upper: f64,
    pub p: f64,
}

impl ProbabilisticDoubleInterval {
    #[must_use]
    pub fn new(lower: f64, upper: f64, p: f64) -> Self {
        let (lower, upper) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        Self {
            lower,
            upper,
            p: p.clamp(0.0, 1.0),
        }
    }

    #[must_use]
    pub fn exact(value: f64) -> Self {
        Self::new(value, value, 1.0)
    }

    #[must_use]
    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    /// Sequential composition: intervals sum, confidence takes the minimum --
    /// the time/cost compositionality property.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self::new(self.lower + other.lower, self.upper + other.upper, self.p.min(other.p))
    }

    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.lower * factor, self.upper * factor, self.p)
    }

    /// Affine map `interval * rate + fixed`, used to turn a time interval
    /// into a cost interval.
    #[must_use]
    pub fn affine(&self, rate: f64, fixed: f64) -> Self {
        Self::new(self.lower * rate + fixed, self.upper * rate + fixed, self.p)
    }
}

/// Default plan comparator: order by expectation (probability-weighted
/// midpoint), tie-break by the lower upper-bound. Kept as a free function so
/// C4 can swap in a different comparator via configuration without adding a
/// trait object indirection for the common case.
#[must_use]
pub fn compare_by_expectation(a: &ProbabilisticDoubleInterval, b: &ProbabilisticDoubleInterval) -> Ordering {
    let ea = a.midpoint() * a.p;
    let eb = b.midpoint() * b.p;
    ea.partial_cmp(&eb)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.upper.partial_cmp(&b.upper).unwrap_or(Ordering::Equal))
}
