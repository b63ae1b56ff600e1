//! Cost model (C4): load profiles, time conversion, monetary cost, and the
//! plan comparator.
//!
//! Mirrors the layered-estimator idea from the re-architecting notes: a
//! built-in estimator (baked into the execution operator), an optional
//! platform default (parsed from configuration), and an optional user
//! override (programmatic) -- later layers win when present.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::expr::{CompiledExpr, parse};
use crate::interval::{CardinalityEstimate, ProbabilisticDoubleInterval, compare_by_expectation};

/// Per-resource work estimate with a fixed per-operator overhead, the
/// `LoadProfile` quadruple from the data model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadProfile {
    pub cpu: ProbabilisticDoubleInterval,
    pub ram: ProbabilisticDoubleInterval,
    pub disk: ProbabilisticDoubleInterval,
    pub net: ProbabilisticDoubleInterval,
    pub overhead_millis: f64,
}

impl LoadProfile {
    #[must_use]
    pub fn zero() -> Self {
        let zero = ProbabilisticDoubleInterval::exact(0.0);
        Self {
            cpu: zero,
            ram: zero,
            disk: zero,
            net: zero,
            overhead_millis: 0.0,
        }
    }
}

/// `f(inputCards, outputCards) -> LoadProfile`, the built-in or
/// programmatic-override layer of the estimator stack.
pub trait LoadProfileEstimator: Send + Sync {
    fn estimate(&self, inputs: &[CardinalityEstimate], outputs: &[CardinalityEstimate]) -> LoadProfile;
}

/// A closed-form polynomial estimator: `resource = a * sum(cardinalities) + b`
/// for each of the four resources independently. The common case for a
/// built-in estimator baked into an execution operator.
#[derive(Clone, Copy, Debug)]
pub struct LinearLoadProfileEstimator {
    pub cpu_per_unit: f64,
    pub ram_per_unit: f64,
    pub disk_per_unit: f64,
    pub net_per_unit: f64,
    pub overhead_millis: f64,
}

impl LoadProfileEstimator for LinearLoadProfileEstimator {
    fn estimate(&self, inputs: &[CardinalityEstimate], _outputs: &[CardinalityEstimate]) -> LoadProfile {
        let total = inputs.iter().fold((0.0, 0.0), |(lo, hi), e| {
            (lo + e.lower as f64, hi + e.upper as f64)
        });
        let p = inputs.iter().map(|e| e.p).fold(1.0_f64, f64::min);
        let scaled = |rate: f64| ProbabilisticDoubleInterval::new(total.0 * rate, total.1 * rate, p);
        LoadProfile {
            cpu: scaled(self.cpu_per_unit),
            ram: scaled(self.ram_per_unit),
            disk: scaled(self.disk_per_unit),
            net: scaled(self.net_per_unit),
            overhead_millis: self.overhead_millis,
        }
    }
}

/// A load-profile estimator parsed from a configuration expression string,
/// one expression per resource. Variables referenced by `${name}` are
/// resolved from a bindings map supplied at estimation time (the learner's
/// fitted coefficients, or `1.0` defaults while unfitted).
pub struct ExpressionLoadProfileEstimator {
    pub cpu: CompiledExpr,
    pub ram: CompiledExpr,
    pub disk: CompiledExpr,
    pub net: CompiledExpr,
    pub overhead_millis: f64,
    pub variables: HashMap<String, f64>,
}

impl ExpressionLoadProfileEstimator {
    /// Parse four resource expressions sharing one variable-bindings map.
    ///
    /// # Errors
    /// Returns an error if any of the four expressions fails to parse.
    pub fn parse(
        cpu: &str,
        ram: &str,
        disk: &str,
        net: &str,
        overhead_millis: f64,
        variables: HashMap<String, f64>,
    ) -> Result<Self> {
        Ok(Self {
            cpu: parse(cpu)?,
            ram: parse(ram)?,
            disk: parse(disk)?,
            net: parse(net)?,
            overhead_millis,
            variables,
        })
    }
}

impl LoadProfileEstimator for ExpressionLoadProfileEstimator {
    fn estimate(&self, inputs: &[CardinalityEstimate], outputs: &[CardinalityEstimate]) -> LoadProfile {
        let in_mid: Vec<f64> = inputs.iter().map(CardinalityEstimate::midpoint).collect();
        let out_mid: Vec<f64> = outputs.iter().map(CardinalityEstimate::midpoint).collect();
        let p = inputs
            .iter()
            .chain(outputs.iter())
            .map(|e| e.p)
            .fold(1.0_f64, f64::min);

        let eval = |expr: &CompiledExpr| -> f64 {
            expr.eval(&in_mid, &out_mid, &self.variables).unwrap_or(0.0)
        };
        let as_interval = |v: f64| ProbabilisticDoubleInterval::new(v, v, p);

        LoadProfile {
            cpu: as_interval(eval(&self.cpu)),
            ram: as_interval(eval(&self.ram)),
            disk: as_interval(eval(&self.disk)),
            net: as_interval(eval(&self.net)),
            overhead_millis: self.overhead_millis,
        }
    }
}

/// The three-layer estimator stack described in spec §4.4: built-in,
/// platform default, user override -- later layers win when present.
#[derive(Clone, Default)]
pub struct LayeredLoadProfileEstimator {
    pub built_in: Option<Arc<dyn LoadProfileEstimator>>,
    pub platform_default: Option<Arc<dyn LoadProfileEstimator>>,
    pub user_override: Option<Arc<dyn LoadProfileEstimator>>,
}

impl LayeredLoadProfileEstimator {
    #[must_use]
    pub fn resolve(&self) -> Option<&Arc<dyn LoadProfileEstimator>> {
        self.user_override
            .as_ref()
            .or(self.platform_default.as_ref())
            .or(self.built_in.as_ref())
    }

    #[must_use]
    pub fn estimate(&self, inputs: &[CardinalityEstimate], outputs: &[CardinalityEstimate]) -> Option<LoadProfile> {
        self.resolve().map(|e| e.estimate(inputs, outputs))
    }
}

/// Maps one resource's probabilistic load into a time interval. Default is
/// linear: `load * rate + additive_constant`.
#[derive(Clone, Copy, Debug)]
pub struct LoadToTimeConverter {
    pub rate_per_unit: f64,
    pub additive_constant_millis: f64,
}

impl Default for LoadToTimeConverter {
    fn default() -> Self {
        Self {
            rate_per_unit: 1.0,
            additive_constant_millis: 0.0,
        }
    }
}

impl LoadToTimeConverter {
    #[must_use]
    pub fn convert(&self, load: ProbabilisticDoubleInterval) -> ProbabilisticDoubleInterval {
        load.affine(self.rate_per_unit, self.additive_constant_millis)
    }
}

/// Combines the four per-resource time intervals into one. The default
/// matches spec §4.4: `cpu + disk + net` (RAM is capacity, not wall-clock
/// time, so it is excluded from the default combiner) floored at `MIN` so a
/// degenerate operator never estimates zero time.
pub trait TimeCombiner: Send + Sync {
    fn combine(
        &self,
        cpu: ProbabilisticDoubleInterval,
        ram: ProbabilisticDoubleInterval,
        disk: ProbabilisticDoubleInterval,
        net: ProbabilisticDoubleInterval,
    ) -> ProbabilisticDoubleInterval;
}

pub struct DefaultTimeCombiner;

impl TimeCombiner for DefaultTimeCombiner {
    fn combine(
        &self,
        cpu: ProbabilisticDoubleInterval,
        _ram: ProbabilisticDoubleInterval,
        disk: ProbabilisticDoubleInterval,
        net: ProbabilisticDoubleInterval,
    ) -> ProbabilisticDoubleInterval {
        cpu.add(&disk).add(&net)
    }
}

/// Minimum time estimate for any executed operator (milliseconds), avoiding
/// a zero-time estimate for trivially cheap operators.
pub const MIN_TIME_ESTIMATE_MILLIS: f64 = 1.0;

/// Per-platform assembly of the four resource converters plus the pluggable
/// combiner, turning a [`LoadProfile`] into a `TimeEstimate`.
pub struct LoadProfileToTimeConverter {
    pub cpu: LoadToTimeConverter,
    pub ram: LoadToTimeConverter,
    pub disk: LoadToTimeConverter,
    pub net: LoadToTimeConverter,
    pub combiner: Arc<dyn TimeCombiner>,
    pub floor_millis: f64,
}

impl Default for LoadProfileToTimeConverter {
    fn default() -> Self {
        Self {
            cpu: LoadToTimeConverter::default(),
            ram: LoadToTimeConverter::default(),
            disk: LoadToTimeConverter::default(),
            net: LoadToTimeConverter::default(),
            combiner: Arc::new(DefaultTimeCombiner),
            floor_millis: MIN_TIME_ESTIMATE_MILLIS,
        }
    }
}

impl LoadProfileToTimeConverter {
    #[must_use]
    pub fn convert(&self, profile: &LoadProfile) -> ProbabilisticDoubleInterval {
        let combined = self.combiner.combine(
            self.cpu.convert(profile.cpu),
            self.ram.convert(profile.ram),
            self.disk.convert(profile.disk),
            self.net.convert(profile.net),
        );
        let with_overhead = combined.add(&ProbabilisticDoubleInterval::exact(profile.overhead_millis));
        ProbabilisticDoubleInterval::new(
            with_overhead.lower.max(self.floor_millis),
            with_overhead.upper.max(self.floor_millis),
            with_overhead.p,
        )
    }
}

/// Maps a time interval to monetary cost: per-millisecond rate plus a fixed
/// cost per platform touched.
#[derive(Clone, Copy, Debug)]
pub struct TimeToCostConverter {
    pub rate_per_ms: f64,
    pub fixed_cost_per_platform: f64,
}

impl TimeToCostConverter {
    #[must_use]
    pub fn convert(&self, time: ProbabilisticDoubleInterval, platforms_touched: usize) -> ProbabilisticDoubleInterval {
        time.affine(self.rate_per_ms, self.fixed_cost_per_platform * platforms_touched as f64)
    }
}

/// `CostEstimate` is exactly a `ProbabilisticDoubleInterval`, named locally
/// for readability at call sites that reason about money rather than time.
pub type CostEstimate = ProbabilisticDoubleInterval;

/// Pluggable plan comparator. The default (see [`default_comparator`])
/// compares by expectation (probability-weighted midpoint), tie-breaking on
/// the lower upper-bound.
pub trait PlanComparator: Send + Sync {
    fn compare(&self, a: &CostEstimate, b: &CostEstimate) -> Ordering;
}

pub struct DefaultPlanComparator;

impl PlanComparator for DefaultPlanComparator {
    fn compare(&self, a: &CostEstimate, b: &CostEstimate) -> Ordering {
        compare_by_expectation(a, b)
    }
}
