//! The backend contract (spec §6): everything the core consumes from an
//! external execution engine but never implements itself. A real backend
//! (Spark, a local thread pool, a database connector) lives outside this
//! crate and plugs in by implementing [`Platform`]/[`Executor`]/
//! [`ExecutionOperator`]/[`ChannelInstance`].
//!
//! The core's job stops at choosing and driving a plan; it never
//! materializes data, so these traits pass opaque channel instances rather
//! than typed collections.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelDescriptorId;
use crate::ids::{OperatorId, PlatformId};
use crate::plan::ExecutionBinding;

/// One operator bound to a platform, ready to hand to that platform's
/// [`Executor`].
#[derive(Clone, Debug)]
pub struct ExecutionTask {
    pub operator: OperatorId,
    pub binding: ExecutionBinding,
}

/// A runtime record of one task's actual execution, written to the
/// execution log (spec §6's log format) and later consumed by
/// [`crate::learner`]. `input_cardinalities`/`output_cardinalities` are
/// measured, exact counts -- not estimates.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PartialExecution {
    pub operator_class: String,
    pub platform: PlatformId,
    pub input_cardinalities: Vec<u64>,
    pub output_cardinalities: Vec<u64>,
    pub measured_millis: f64,
    pub timestamp_millis: u64,
}

impl PartialExecution {
    /// The coarse confidence signal the learner's loader filters on: an
    /// execution with no recorded inputs is almost always a source or a
    /// logging artifact, not a useful fitting point.
    #[must_use]
    pub fn has_cardinalities(&self) -> bool {
        !self.input_cardinalities.is_empty() || !self.output_cardinalities.is_empty()
    }
}

/// An opaque per-channel runtime handle: a backend's actual data buffer,
/// file handle, or RDD reference, tracked by the core only through this
/// narrow interface (spec §6's channel-instance contract).
pub trait ChannelInstance: Send + Sync {
    fn descriptor(&self) -> &ChannelDescriptorId;

    /// Whether this instance has already been written to by its producer.
    fn was_produced(&self) -> bool;

    fn mark_produced(&mut self);

    /// The measured element count, once known (set by the producing task
    /// after it actually runs).
    fn measured_cardinality(&self) -> Option<u64>;

    fn set_measured_cardinality(&mut self, value: u64);

    /// Whether the driver asked this instance's producer to record timing
    /// instrumentation (used to decide whether a stage boundary here is
    /// worth treating as a breakpoint candidate).
    fn is_marked_for_instrumentation(&self) -> bool;

    /// The chain of descriptors this instance's data passed through to get
    /// here (e.g. after a channel conversion), oldest first.
    fn lazy_channel_lineage(&self) -> Vec<ChannelDescriptorId>;
}

/// Capabilities a specific execution operator exposes to the planner and
/// driver, distinct from actually running it (that is [`Executor`]'s job).
pub trait ExecutionOperator: Send + Sync {
    /// Ordered list of descriptors slot `slot` will accept, most preferred
    /// first.
    fn supported_input_channels(&self, slot: usize) -> Vec<ChannelDescriptorId>;

    fn output_channel_descriptor(&self, slot: usize) -> ChannelDescriptorId;

    /// Allocate `count` fresh, unproduced channel instances for output
    /// slot `slot`.
    fn create_output_channel_instances(&self, slot: usize, count: usize) -> Vec<Box<dyn ChannelInstance>>;

    /// Configuration key this operator's load profile estimator override is
    /// looked up under, if it has one (see [`crate::config::platform_operator_load_key`]).
    fn load_profile_estimator_configuration_key(&self) -> Option<String>;
}

/// Runs [`ExecutionTask`]s for one platform.
pub trait Executor: Send + Sync {
    /// Execute `task` against `inputs`, returning the produced output
    /// channel instances and, if the backend recorded one, a
    /// [`PartialExecution`] describing what actually happened.
    ///
    /// # Errors
    /// Returns [`crate::error::RheemError::BackendExecution`] (or any other
    /// error) on a genuine backend failure. The driver wraps this as fatal
    /// unless the caller's retry policy says otherwise.
    fn execute(
        &self,
        task: &ExecutionTask,
        inputs: &[Box<dyn ChannelInstance>],
    ) -> Result<(Vec<Box<dyn ChannelInstance>>, Option<PartialExecution>)>;

    /// Release any resources held by this executor. Must be safe to call
    /// more than once.
    fn dispose(&self) -> Result<()>;
}

/// Identity and executor factory for one backend.
pub trait Platform: Send + Sync {
    fn id(&self) -> PlatformId;

    fn display_name(&self) -> &str;

    fn executor(&self) -> Arc<dyn Executor>;
}

/// Registry of the platforms active for one job, keyed by [`PlatformId`].
#[derive(Default)]
pub struct PlatformRegistry {
    platforms: HashMap<PlatformId, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: Arc<dyn Platform>) {
        self.platforms.insert(platform.id(), platform);
    }

    #[must_use]
    pub fn get(&self, id: &PlatformId) -> Option<Arc<dyn Platform>> {
        self.platforms.get(id).cloned()
    }

    #[must_use]
    pub fn active_ids(&self) -> std::collections::HashSet<PlatformId> {
        self.platforms.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemoryChannelInstance {
        descriptor: ChannelDescriptorId,
        produced: bool,
        measured: Option<u64>,
    }

    impl ChannelInstance for MemoryChannelInstance {
        fn descriptor(&self) -> &ChannelDescriptorId {
            &self.descriptor
        }

        fn was_produced(&self) -> bool {
            self.produced
        }

        fn mark_produced(&mut self) {
            self.produced = true;
        }

        fn measured_cardinality(&self) -> Option<u64> {
            self.measured
        }

        fn set_measured_cardinality(&mut self, value: u64) {
            self.measured = Some(value);
        }

        fn is_marked_for_instrumentation(&self) -> bool {
            true
        }

        fn lazy_channel_lineage(&self) -> Vec<ChannelDescriptorId> {
            vec![self.descriptor.clone()]
        }
    }

    #[test]
    fn channel_instance_tracks_production_and_measurement() {
        let mut instance = MemoryChannelInstance {
            descriptor: ChannelDescriptorId::new("local.vec"),
            produced: false,
            measured: None,
        };
        assert!(!instance.was_produced());
        instance.mark_produced();
        instance.set_measured_cardinality(7);
        assert!(instance.was_produced());
        assert_eq!(instance.measured_cardinality(), Some(7));
    }

    #[test]
    fn partial_execution_flags_cardinality_presence() {
        let with = PartialExecution {
            operator_class: "Filter".into(),
            platform: PlatformId::new("local"),
            input_cardinalities: vec![10],
            output_cardinalities: vec![4],
            measured_millis: 12.5,
            timestamp_millis: 1_000,
        };
        assert!(with.has_cardinalities());

        let without = PartialExecution {
            input_cardinalities: vec![],
            output_cardinalities: vec![],
            ..with
        };
        assert!(!without.has_cardinalities());
    }
}
