//! Flat, string-keyed runtime configuration.
//!
//! Parsing configuration *files* (properties files, YAML, whatever the
//! embedding application prefers) is explicitly someone else's job; this
//! module only wraps the already-parsed key/value map and exposes typed
//! accessors that parse lazily, on read, the way `checkpoint::CheckpointConfig`
//! exposes already-typed fields but without file I/O anywhere in sight.
//!
//! Well-known keys are declared as `pub const` strings below so the rest of
//! the crate never spells out a key literal twice.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Whether the driver should re-run the enumerator when a breakpoint
/// reveals a cardinality estimate was wrong. Defaults to `true`.
pub const REOPTIMIZE: &str = "rheem.core.optimizer.reoptimize";

/// Skip backend execution entirely and only produce the picked plan
/// (used by planning-only dry runs and tests). Defaults to `false`.
pub const SKIP_EXECUTION: &str = "rheem.core.debug.skipexecution";

/// Whether completed tasks are appended to the execution log. Defaults to
/// `false`.
pub const LOG_ENABLED: &str = "rheem.core.log.enabled";

/// Path to the execution log file.
pub const LOG_EXECUTIONS: &str = "rheem.core.log.executions";

/// Number of parallel GA tribes the learner should run. Defaults to the
/// host's available parallelism.
pub const GA_TRIBES: &str = "rheem.profiler.ga.tribes";

/// Maximum number of generations the learner evolves before stopping.
pub const GA_MAX_GENERATIONS: &str = "rheem.profiler.ga.maxgenerations";

/// Number of consecutive generations without fitness improvement that
/// stops evolution early.
pub const GA_STABLE_GENERATIONS: &str = "rheem.profiler.ga.stablegenerations";

/// Population size per GA tribe.
pub const GA_POPULATION: &str = "rheem.profiler.ga.population";

/// Master RNG seed the learner derives per-tribe seeds from.
pub const GA_SEED: &str = "rheem.profiler.ga.seed";

/// Fraction of the execution log kept after subsampling (1.0 keeps
/// everything). Spec name: `sampling`.
pub const GA_SAMPLING: &str = "rheem.profiler.ga.sampling";

/// Logarithmic-bucket stretch used to group training points by measured
/// duration (spec §4.8 step 2's "bin"). A stretch of `1.0` buckets by
/// powers of two; larger values widen each bucket.
pub const GA_BINNING: &str = "rheem.profiler.ga.binning";

/// Minimum fitness improvement (over `GA_STABLE_GENERATIONS` generations)
/// below which evolution stops early. Spec name: `minfitness`.
pub const GA_MIN_FITNESS_DELTA: &str = "rheem.profiler.ga.minfitness";

/// Cap on the number of worst-fitting training points the noise filter may
/// remove in one pass. Spec name: `noise-filter.max`.
pub const GA_NOISE_FILTER_MAX: &str = "rheem.profiler.ga.noise-filter.max";

/// Per-point asymmetric-penalty threshold above which a training point is
/// considered noise and eligible for removal. Spec name:
/// `noise-filter.threshold`.
pub const GA_NOISE_FILTER_THRESHOLD: &str = "rheem.profiler.ga.noise-filter.threshold";

/// Build the configuration key that holds a raw load-expression string for
/// `platform`/`operator`, e.g. `rheem.spark.filter.load`.
#[must_use]
pub fn platform_operator_load_key(platform: &str, operator: &str) -> String {
    format!("rheem.{platform}.{operator}.load")
}

/// A flat, string-keyed configuration map with typed, parse-on-read
/// accessors.
///
/// Construction is the caller's responsibility — `Configuration` never
/// reads a file itself, matching the crate's out-of-scope boundary around
/// file-system abstractions and configuration file parsing.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    values: HashMap<String, String>,
}

impl Configuration {
    /// Build a configuration from an already-parsed key/value map.
    #[must_use]
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// An empty configuration; every accessor returns `None` / the supplied
    /// default.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a single key. Mainly useful for tests and for
    /// programmatic overrides layered on top of a parsed base.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Raw string value for `key`, if present.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parse the value at `key` as `bool` (`true`/`false`, case-insensitive).
    ///
    /// # Errors
    /// Returns an error if the key is present but does not parse as a bool.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_parsed(key)
    }

    /// Parse the value at `key` as `usize`.
    ///
    /// # Errors
    /// Returns an error if the key is present but does not parse as a usize.
    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        self.get_parsed(key)
    }

    /// Parse the value at `key` as `u64`.
    ///
    /// # Errors
    /// Returns an error if the key is present but does not parse as a u64.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get_parsed(key)
    }

    /// Parse the value at `key` as `f64`.
    ///
    /// # Errors
    /// Returns an error if the key is present but does not parse as an f64.
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        self.get_parsed(key)
    }

    /// Interpret the value at `key` as a filesystem path.
    #[must_use]
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_string(key).map(PathBuf::from)
    }

    /// Same as [`Self::get_bool`] but falls back to `default` when absent.
    ///
    /// # Errors
    /// Returns an error if the key is present but does not parse as a bool.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.get_bool(key)?.unwrap_or(default))
    }

    /// Same as [`Self::get_usize`] but falls back to `default` when absent.
    ///
    /// # Errors
    /// Returns an error if the key is present but does not parse as a usize.
    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize> {
        Ok(self.get_usize(key)?.unwrap_or(default))
    }

    /// Same as [`Self::get_f64`] but falls back to `default` when absent.
    ///
    /// # Errors
    /// Returns an error if the key is present but does not parse as an f64.
    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64> {
        Ok(self.get_f64(key)?.unwrap_or(default))
    }

    fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.values.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("configuration key '{key}' has malformed value '{raw}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_none() {
        let cfg = Configuration::empty();
        assert_eq!(cfg.get_bool(REOPTIMIZE).unwrap(), None);
    }

    #[test]
    fn parses_typed_values() {
        let mut cfg = Configuration::empty();
        cfg.set(REOPTIMIZE, "true");
        cfg.set(GA_TRIBES, "4");
        cfg.set(platform_operator_load_key("spark", "filter"), "in0*1.2");

        assert_eq!(cfg.get_bool(REOPTIMIZE).unwrap(), Some(true));
        assert_eq!(cfg.get_usize(GA_TRIBES).unwrap(), Some(4));
        assert_eq!(
            cfg.get_string(&platform_operator_load_key("spark", "filter")),
            Some("in0*1.2")
        );
    }

    #[test]
    fn malformed_value_is_an_error() {
        let mut cfg = Configuration::empty();
        cfg.set(GA_TRIBES, "not-a-number");
        assert!(cfg.get_usize(GA_TRIBES).is_err());
    }

    #[test]
    fn or_defaults_fall_back() {
        let cfg = Configuration::empty();
        assert!(!cfg.get_bool_or(SKIP_EXECUTION, false).unwrap());
        assert_eq!(cfg.get_usize_or(GA_POPULATION, 32).unwrap(), 32);
    }
}
