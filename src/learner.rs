//! Learner (C8): fits load-profile expression coefficients from an
//! execution log using a genetic algorithm, per operator class.
//!
//! Grouping, log-scale duration binning, and the asymmetric log-ratio
//! fitness are described in spec §4.8; the generational loop (elitism,
//! uniform crossover over the expression's active variables, Gaussian
//! mutation, optional parallel tribes each with their own seeded RNG) is
//! grounded the same way the rest of the crate grounds randomized search:
//! `rand::rngs::StdRng` seeded per-unit-of-work rather than a shared or
//! thread-local generator, so a run is reproducible from its configured
//! seed regardless of how many tribes ran concurrently.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::backend::PartialExecution;
use crate::config::{self, Configuration};
use crate::error::RheemError;
use crate::expr::CompiledExpr;

/// One representative measured execution, reduced to the fields the
/// fitness function needs.
#[derive(Clone, Debug)]
struct DataPoint {
    inputs: Vec<f64>,
    outputs: Vec<f64>,
    measured: f64,
}

/// Tunable knobs for the genetic search, read from [`Configuration`]'s
/// `rheem.profiler.ga.*` keys.
#[derive(Clone, Copy, Debug)]
pub struct LearnerConfig {
    pub tribes: usize,
    pub max_generations: usize,
    pub stable_generations: usize,
    pub population: usize,
    pub seed: u64,
    pub elitism: usize,
    pub mutation_rate: f64,
    pub mutation_std: f64,
    /// Subsample ratio applied to the log before grouping (1.0 keeps
    /// everything). Spec name: `sampling`.
    pub subsample_ratio: f64,
    /// Logarithmic-bucket stretch for grouping training points by measured
    /// duration (spec §4.8 step 2). `1.0` buckets by powers of two.
    pub binning_stretch: f64,
    /// Cap on the number of worst-fitting points the noise filter may drop
    /// in one pass. Spec name: `noise-filter.max`.
    pub noise_filter_outliers: usize,
    /// Per-point penalty threshold above which a point is eligible for
    /// noise removal. Spec name: `noise-filter.threshold`.
    pub noise_filter_threshold: f64,
    /// Minimum fitness improvement over `stable_generations` generations
    /// below which evolution stops early. Spec name: `minfitness`.
    pub min_fitness_delta: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            tribes: num_cpus::get(),
            max_generations: 200,
            stable_generations: 20,
            population: 40,
            seed: 0,
            elitism: 4,
            mutation_rate: 0.2,
            mutation_std: 0.5,
            subsample_ratio: 1.0,
            binning_stretch: 1.0,
            noise_filter_outliers: 0,
            noise_filter_threshold: f64::MAX,
            min_fitness_delta: 1e-9,
        }
    }
}

impl LearnerConfig {
    /// # Errors
    /// Returns an error if a present `rheem.profiler.ga.*` key does not
    /// parse as its declared type.
    pub fn from_config(cfg: &Configuration) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            tribes: cfg.get_usize_or(config::GA_TRIBES, defaults.tribes)?,
            max_generations: cfg.get_usize_or(config::GA_MAX_GENERATIONS, defaults.max_generations)?,
            stable_generations: cfg.get_usize_or(config::GA_STABLE_GENERATIONS, defaults.stable_generations)?,
            population: cfg.get_usize_or(config::GA_POPULATION, defaults.population)?,
            seed: cfg.get_u64(config::GA_SEED)?.unwrap_or(defaults.seed),
            subsample_ratio: cfg.get_f64_or(config::GA_SAMPLING, defaults.subsample_ratio)?,
            binning_stretch: cfg.get_f64_or(config::GA_BINNING, defaults.binning_stretch)?,
            noise_filter_outliers: cfg.get_usize_or(config::GA_NOISE_FILTER_MAX, defaults.noise_filter_outliers)?,
            noise_filter_threshold: cfg.get_f64_or(config::GA_NOISE_FILTER_THRESHOLD, defaults.noise_filter_threshold)?,
            min_fitness_delta: cfg.get_f64_or(config::GA_MIN_FITNESS_DELTA, defaults.min_fitness_delta)?,
            ..defaults
        })
    }
}

/// Parse newline-delimited [`PartialExecution`] records, keeping only those
/// with measured cardinalities and applying the configured subsample ratio.
///
/// # Errors
/// Returns an error if a non-empty line is not valid JSON for
/// [`PartialExecution`].
pub fn load_log(contents: &str, subsample_ratio: f64, seed: u64) -> Result<Vec<PartialExecution>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: PartialExecution =
            serde_json::from_str(line).map_err(|e| RheemError::log_io("<execution log>", e.to_string()))?;
        if !record.has_cardinalities() {
            continue;
        }
        if subsample_ratio >= 1.0 || rng.gen::<f64>() < subsample_ratio {
            records.push(record);
        }
    }
    Ok(records)
}

fn group_by_class(records: &[PartialExecution]) -> HashMap<String, Vec<PartialExecution>> {
    let mut groups: HashMap<String, Vec<PartialExecution>> = HashMap::new();
    for record in records {
        groups.entry(record.operator_class.clone()).or_default().push(record.clone());
    }
    groups
}

/// One representative per logarithmic duration bucket, so a handful of
/// very similar executions don't dominate the fit the way a thousand tiny
/// ones would if every point weighed equally. `stretch` widens each bucket
/// (spec §4.8 step 2's configurable "bin" stretch); `1.0` buckets by powers
/// of two.
fn representative_points(records: &[PartialExecution], stretch: f64) -> Vec<DataPoint> {
    let stretch = if stretch > 0.0 { stretch } else { 1.0 };
    let mut buckets: HashMap<i64, DataPoint> = HashMap::new();
    for record in records {
        let bucket = (record.measured_millis.max(1.0).log2() / stretch).floor() as i64;
        buckets.entry(bucket).or_insert_with(|| DataPoint {
            inputs: record.input_cardinalities.iter().map(|&c| c as f64).collect(),
            outputs: record.output_cardinalities.iter().map(|&c| c as f64).collect(),
            measured: record.measured_millis,
        });
    }
    buckets.into_values().collect()
}

fn predict(expr: &CompiledExpr, vars: &HashMap<String, f64>, point: &DataPoint) -> f64 {
    expr.eval(&point.inputs, &point.outputs, vars).unwrap_or(f64::MAX)
}

/// Asymmetric log-ratio penalty between a measured value `m` and a
/// predicted value `p`: zero when they match exactly, growing slowly for
/// small relative errors and steeply once one is many multiples of the
/// other. The `+500` offset keeps small measured values from producing
/// wild ratios.
fn asymmetric_penalty(measured: f64, predicted: f64) -> f64 {
    let m = measured.max(0.0) + 500.0;
    let p = predicted.max(0.0) + 500.0;
    (m.max(p).ln() / m.min(p).ln()) - 1.0
}

fn fitness(expr: &CompiledExpr, individual: &HashMap<String, f64>, points: &[DataPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let total: f64 = points
        .iter()
        .map(|point| asymmetric_penalty(point.measured, predict(expr, individual, point)))
        .sum();
    total / points.len() as f64
}

/// Drop up to `max_outliers` points whose per-point penalty (against a
/// unit-coefficient baseline) exceeds `threshold`, worst first (spec §4.8
/// step 7: "find up to N training points whose ratio exceeds a threshold").
fn filter_noise(
    points: &[DataPoint],
    expr: &CompiledExpr,
    variables: &[String],
    max_outliers: usize,
    threshold: f64,
) -> Vec<DataPoint> {
    if max_outliers == 0 || points.len() <= max_outliers {
        return points.to_vec();
    }
    let baseline: HashMap<String, f64> = variables.iter().map(|v| (v.clone(), 1.0)).collect();
    let mut scored: Vec<(f64, DataPoint)> = points
        .iter()
        .map(|point| (asymmetric_penalty(point.measured, predict(expr, &baseline, point)), point.clone()))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    let drop_count = scored.iter().take(max_outliers).filter(|(penalty, _)| *penalty > threshold).count();
    scored.drain(..drop_count);
    scored.into_iter().map(|(_, point)| point).collect()
}

fn random_individual(variables: &[String], rng: &mut StdRng) -> HashMap<String, f64> {
    variables.iter().map(|v| (v.clone(), rng.gen_range(0.1..10.0))).collect()
}

fn tournament_select<'a>(scored: &'a [(f64, HashMap<String, f64>)], rng: &mut StdRng) -> &'a HashMap<String, f64> {
    let i = rng.gen_range(0..scored.len());
    let j = rng.gen_range(0..scored.len());
    if scored[i].0 <= scored[j].0 { &scored[i].1 } else { &scored[j].1 }
}

/// Evolve one tribe's population to a (coefficients, fitness) result. A
/// tribe never shares its RNG with another -- each is seeded independently
/// from the caller's per-tribe seed so tribes run deterministically
/// regardless of thread scheduling.
fn evolve_tribe(
    expr: &CompiledExpr,
    variables: &[String],
    points: &[DataPoint],
    config: &LearnerConfig,
    seed: u64,
) -> (HashMap<String, f64>, f64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut population: Vec<HashMap<String, f64>> =
        (0..config.population.max(1)).map(|_| random_individual(variables, &mut rng)).collect();

    let mut best = population[0].clone();
    let mut best_fitness = f64::MAX;
    let mut stable_generations = 0usize;

    for generation in 0..config.max_generations {
        let mut scored: Vec<(f64, HashMap<String, f64>)> =
            population.iter().map(|ind| (fitness(expr, ind, points), ind.clone())).collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let generation_best = scored[0].0;
        if generation_best < best_fitness - config.min_fitness_delta {
            best_fitness = generation_best;
            best = scored[0].1.clone();
            stable_generations = 0;
        } else {
            stable_generations += 1;
        }
        if stable_generations >= config.stable_generations {
            tracing::debug!(seed, generation, best_fitness, "tribe converged early");
            break;
        }

        let elite_count = config.elitism.max(1).min(scored.len());
        let mut next: Vec<HashMap<String, f64>> = scored.iter().take(elite_count).map(|(_, ind)| ind.clone()).collect();

        while next.len() < config.population.max(1) {
            let parent_a = tournament_select(&scored, &mut rng);
            let parent_b = tournament_select(&scored, &mut rng);
            let mut child = HashMap::new();
            for name in variables {
                let base = if rng.gen_bool(0.5) {
                    parent_a.get(name).copied().unwrap_or(1.0)
                } else {
                    parent_b.get(name).copied().unwrap_or(1.0)
                };
                let value = if rng.gen_bool(config.mutation_rate) {
                    (base + rng.gen_range(-1.0..1.0) * config.mutation_std).max(0.001)
                } else {
                    base
                };
                child.insert(name.clone(), value);
            }
            next.push(child);
        }
        population = next;
    }

    (best, best_fitness)
}

/// Fit one expression's active variables against `points`, running
/// `config.tribes` independent tribes in parallel (when more than one) and
/// keeping the best result across all of them.
///
/// `pub(crate)` rather than `pub`: `DataPoint` is private to this module, so
/// a public `fit` would leak a type external callers can neither name nor
/// construct (`private_interfaces`). `Learner::fit_operator_class`/`fit_all`
/// are the public entry points; they build `DataPoint`s from logged
/// `PartialExecution`s internally.
#[must_use]
pub(crate) fn fit(expr: &CompiledExpr, points: &[DataPoint], config: &LearnerConfig) -> HashMap<String, f64> {
    let variables = expr.variables();
    if variables.is_empty() || points.is_empty() {
        return HashMap::new();
    }
    let filtered = filter_noise(points, expr, &variables, config.noise_filter_outliers, config.noise_filter_threshold);

    let tribe_count = config.tribes.max(1);
    let results: Vec<(HashMap<String, f64>, f64)> = (0..tribe_count)
        .into_par_iter()
        .map(|tribe| {
            let seed = config.seed.wrapping_add((tribe as u64).wrapping_mul(7_919));
            evolve_tribe(expr, &variables, &filtered, config, seed)
        })
        .collect();

    let best = results
        .into_iter()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    if let Some((_, best_fitness)) = &best {
        tracing::info!(tribes = tribe_count, best_fitness, variables = variables.len(), "learner fit complete");
    }
    best.map(|(individual, _)| individual).unwrap_or_default()
}

/// Orchestrates loading an execution log and fitting every operator
/// class's registered expression against it.
pub struct Learner {
    config: LearnerConfig,
}

impl Learner {
    #[must_use]
    pub fn new(config: LearnerConfig) -> Self {
        Self { config }
    }

    /// Fit `expr`'s active variables against `records` (already filtered to
    /// one operator class by the caller).
    #[must_use]
    pub fn fit_operator_class(&self, expr: &CompiledExpr, records: &[PartialExecution]) -> HashMap<String, f64> {
        let points = representative_points(records, self.config.binning_stretch);
        fit(expr, &points, &self.config)
    }

    /// Fit every `(operator_class, expression)` pair in `expressions`
    /// against the matching records in `records`, keyed by the
    /// configuration key each fitted coefficient belongs under.
    #[must_use]
    pub fn fit_all(
        &self,
        records: &[PartialExecution],
        expressions: &HashMap<String, CompiledExpr>,
    ) -> HashMap<String, HashMap<String, f64>> {
        let by_class = group_by_class(records);
        let empty = Vec::new();
        expressions
            .iter()
            .map(|(class, expr)| {
                let class_records = by_class.get(class).unwrap_or(&empty);
                (class.clone(), self.fit_operator_class(expr, class_records))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use crate::ids::PlatformId;

    fn synthetic_log(rate: f64, count: usize) -> Vec<PartialExecution> {
        (1..=count)
            .map(|i| {
                let input = (i * 100) as u64;
                PartialExecution {
                    operator_class: "Filter".into(),
                    platform: PlatformId::new("local"),
                    input_cardinalities: vec![input],
                    output_cardinalities: vec![input / 2],
                    measured_millis: rate * input as f64,
                    timestamp_millis: i as u64,
                }
            })
            .collect()
    }

    #[test]
    fn fits_a_linear_coefficient_close_to_the_generating_rate() {
        let expr = parse("in0 * ${rate}").unwrap();
        let records = synthetic_log(2.0, 30);
        let points = representative_points(&records, 1.0);
        let config = LearnerConfig {
            tribes: 2,
            max_generations: 150,
            stable_generations: 30,
            population: 40,
            seed: 42,
            elitism: 4,
            mutation_rate: 0.3,
            mutation_std: 0.5,
            subsample_ratio: 1.0,
            binning_stretch: 1.0,
            noise_filter_outliers: 0,
            noise_filter_threshold: f64::MAX,
            min_fitness_delta: 1e-9,
        };
        let fitted = fit(&expr, &points, &config);
        let rate = fitted["rate"];
        assert!((rate - 2.0).abs() < 0.5, "fitted rate {rate} too far from 2.0");
    }

    #[test]
    fn log_parses_and_filters_low_confidence_records() {
        let log = "{\"operator_class\":\"Filter\",\"platform\":\"local\",\"input_cardinalities\":[10],\"output_cardinalities\":[5],\"measured_millis\":12.0,\"timestamp_millis\":1}\n\
                    {\"operator_class\":\"Filter\",\"platform\":\"local\",\"input_cardinalities\":[],\"output_cardinalities\":[],\"measured_millis\":1.0,\"timestamp_millis\":2}\n";
        let records = load_log(log, 1.0, 0).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn noise_filter_drops_the_worst_outliers() {
        let expr = parse("in0 * ${rate}").unwrap();
        let mut records = synthetic_log(2.0, 20);
        records.push(PartialExecution {
            operator_class: "Filter".into(),
            platform: PlatformId::new("local"),
            input_cardinalities: vec![100],
            output_cardinalities: vec![50],
            measured_millis: 100_000.0,
            timestamp_millis: 999,
        });
        let points = representative_points(&records, 1.0);
        let variables = expr.variables();
        let filtered = filter_noise(&points, &expr, &variables, 1, 0.0);
        assert!(filtered.iter().all(|p| p.measured < 100_000.0));
    }
}
