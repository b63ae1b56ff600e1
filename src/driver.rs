//! Execution driver (C7): lowers a [`PlanImplementation`] into staged
//! [`ExecutionTask`]s, runs them against backends until a breakpoint, and
//! feeds measured cardinalities back into C3 for re-optimization of the
//! unexecuted remainder.
//!
//! Stage splitting is mandatory at every platform boundary (an operator
//! only ever shares a stage with its neighbors on the same backend) --
//! see `SPEC_FULL.md` §12's resolution of the "what is a stage" open
//! question.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;

use crate::backend::{ChannelInstance, ExecutionTask, PartialExecution, PlatformRegistry};
use crate::cardinality::{CardinalityEngine, OptimizationContext};
use crate::channel::ChannelGraph;
use crate::cost::{LoadProfileEstimator, LoadProfileToTimeConverter, PlanComparator, TimeToCostConverter};
use crate::enumerator::{EnumerationConfig, PlanEnumerator, PlanImplementation};
use crate::error::RheemError;
use crate::ids::{OperatorId, OutputRef, PlatformId, SlotIndex};
use crate::interval::CardinalityEstimate;
use crate::mapping::{ExecutionAlternative, Hyperplan};
use crate::metrics::MetricsCollector;
use crate::plan::{OperatorKind, Plan};

/// A contiguous run of tasks scheduled to the same platform.
#[derive(Clone, Debug)]
pub struct ExecutionStage {
    pub index: usize,
    pub platform: PlatformId,
    pub tasks: Vec<ExecutionTask>,
}

/// The lowered, stage-split form of a [`PlanImplementation`], in the
/// topological order the driver executes.
#[derive(Clone, Debug, Default)]
pub struct ExecutionTaskFlow {
    pub stages: Vec<ExecutionStage>,
}

impl ExecutionTaskFlow {
    /// Lower `implementation` into stages, splitting at every platform
    /// change, in `plan`'s topological order. A loop composite is always
    /// its own stage, isolated from its neighbors even when they share a
    /// platform: spec §4.7 step 5 treats the loop head as a stage
    /// boundary so the driver can stop there and re-plan the remaining
    /// iterations lazily, instead of folding a loop into a larger
    /// same-platform run the breakpoint policy can't see inside of.
    #[must_use]
    pub fn lower(plan: &Plan, implementation: &PlanImplementation) -> Self {
        let order = CardinalityEngine::topo_order(plan);
        let mut stages: Vec<ExecutionStage> = Vec::new();

        for id in order {
            let Some(alt) = implementation.choices.get(&id) else { continue };
            let task = ExecutionTask { operator: id, binding: alt.binding.clone() };
            let is_loop = matches!(
                plan.operator(id).map(|op| &op.kind),
                Some(OperatorKind::Composite(composite)) if composite.loop_head.is_some()
            );
            match stages.last_mut() {
                Some(stage) if !is_loop && stage.platform == alt.binding.platform => {
                    stage.tasks.push(task);
                }
                _ => {
                    stages.push(ExecutionStage {
                        index: stages.len(),
                        platform: alt.binding.platform.clone(),
                        tasks: vec![task],
                    });
                }
            }
        }
        Self { stages }
    }
}

/// Why execution paused before reaching the end of the flow.
#[derive(Clone, Debug)]
pub enum BreakpointReason {
    /// Reached the end of the currently-lowered flow; nothing unexpected
    /// happened, there's simply nothing further planned yet (e.g. a loop
    /// body planned one iteration at a time).
    StageFrontier,
    /// A measured cardinality diverged from its plan-time estimate by more
    /// than the configured ratio, making the remaining plan worth
    /// re-enumerating.
    CardinalityDrift { operator: OperatorId, measured: u64 },
}

#[derive(Clone, Debug)]
pub struct Breakpoint {
    pub next_stage: usize,
    pub reason: BreakpointReason,
}

/// Thresholds governing when a breakpoint is worth stopping for.
#[derive(Clone, Copy, Debug)]
pub struct BreakpointPolicy {
    /// A measured cardinality more than this many times above (or below
    /// `1/ratio` times) its estimate's upper bound triggers a drift
    /// breakpoint.
    pub cardinality_drift_ratio: f64,
}

impl Default for BreakpointPolicy {
    fn default() -> Self {
        Self { cardinality_drift_ratio: 2.0 }
    }
}

impl BreakpointPolicy {
    fn drift_exceeds(&self, previous: Option<CardinalityEstimate>, measured: u64) -> bool {
        let Some(prev) = previous else { return false };
        if prev.upper == 0 {
            return measured > 0;
        }
        let ratio = measured as f64 / prev.upper as f64;
        ratio > self.cardinality_drift_ratio || ratio < 1.0 / self.cardinality_drift_ratio
    }
}

/// Outcome of one call to [`ExecutionDriver::execute_until_breakpoint`].
pub enum DriverOutcome {
    Completed,
    Paused(Breakpoint),
}

/// Drives a staged flow to completion or the next breakpoint, pushing
/// produced channel instances and execution-log entries into the caller's
/// buffers so a breakpoint can be resumed from exactly where it left off.
pub struct ExecutionDriver {
    platforms: PlatformRegistry,
    policy: BreakpointPolicy,
    metrics: MetricsCollector,
}

impl ExecutionDriver {
    #[must_use]
    pub fn new(platforms: PlatformRegistry, policy: BreakpointPolicy, metrics: MetricsCollector) -> Self {
        Self { platforms, policy, metrics }
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Run stages `from_stage..` of `flow`, stopping at the first
    /// breakpoint or after the last stage completes.
    ///
    /// `produced` accumulates every output channel instance by
    /// [`OutputRef`], reused across calls so a resumed execution can read
    /// an already-produced upstream output without re-running it.
    /// `log` accumulates every [`PartialExecution`] a backend reports,
    /// flushed by the caller only once a whole stage completes cleanly
    /// (spec §7's buffered-log-write rule).
    ///
    /// # Errors
    /// Returns [`RheemError::BackendExecution`] wrapped in `anyhow::Error`
    /// if a platform is not registered or a backend's [`crate::backend::Executor::execute`]
    /// fails.
    pub fn execute_until_breakpoint(
        &self,
        plan: &Plan,
        flow: &ExecutionTaskFlow,
        cardinalities: &mut OptimizationContext,
        cardinality_engine: &CardinalityEngine,
        produced: &mut HashMap<OutputRef, Box<dyn ChannelInstance>>,
        log: &mut Vec<PartialExecution>,
        from_stage: usize,
    ) -> Result<DriverOutcome> {
        for stage in flow.stages.iter().skip(from_stage) {
            tracing::info!(stage = stage.index, platform = %stage.platform, tasks = stage.tasks.len(), "executing stage");
            let mut stage_log = Vec::new();
            let mut drifted: Option<(OperatorId, u64)> = None;

            let platform = self
                .platforms
                .get(&stage.platform)
                .ok_or_else(|| RheemError::backend_execution(stage.platform.to_string(), "platform not registered"))?;
            let executor = platform.executor();

            for task in &stage.tasks {
                let Some(op) = plan.operator(task.operator) else { continue };
                let mut task_inputs: Vec<Box<dyn ChannelInstance>> = Vec::new();
                for input in &op.inputs {
                    if let Some(out) = input.connection {
                        if let Some(instance) = produced.remove(&out) {
                            task_inputs.push(instance);
                        }
                    }
                }

                let (outputs, partial) = executor.execute(task, &task_inputs).map_err(|e| {
                    RheemError::backend_execution(stage.platform.to_string(), e.to_string())
                })?;

                for (slot_idx, instance) in outputs.into_iter().enumerate() {
                    produced.insert(OutputRef { operator: task.operator, slot: SlotIndex(slot_idx as u32) }, instance);
                }

                if let Some(pe) = partial {
                    for (slot_idx, &measured) in pe.output_cardinalities.iter().enumerate() {
                        let out_ref = OutputRef { operator: task.operator, slot: SlotIndex(slot_idx as u32) };
                        let previous = cardinalities.output_of(out_ref);
                        if self.policy.drift_exceeds(previous, measured) {
                            drifted.get_or_insert((task.operator, measured));
                        }
                        CardinalityEngine::inject_measured(cardinalities, out_ref, measured);
                    }
                    self.metrics.increment_counter("tasks_executed", 1);
                    stage_log.push(pe);
                }
            }

            log.extend(stage_log);
            cardinality_engine.repush_from_marks(plan, cardinalities)?;

            if let Some((operator, measured)) = drifted {
                self.metrics.increment_counter("cardinality_drift_breakpoints", 1);
                tracing::warn!(operator = %operator, measured, "cardinality drift breakpoint, pausing for re-optimization");
                return Ok(DriverOutcome::Paused(Breakpoint {
                    next_stage: stage.index + 1,
                    reason: BreakpointReason::CardinalityDrift { operator, measured },
                }));
            }
        }

        Ok(DriverOutcome::Completed)
    }

    /// Drive a whole job to completion, re-enumerating the unexecuted
    /// remainder every time [`execute_until_breakpoint`] pauses (spec
    /// §4.7 step 4): operators belonging to already-executed stages are
    /// pinned to the alternative they actually ran with, the hyperplan is
    /// re-enumerated for everything else, and execution resumes from the
    /// first stage that hasn't run yet. `cardinalities` already reflects
    /// every measured value injected by prior breakpoints when this
    /// returns, and the returned log is in execution order.
    ///
    /// # Errors
    /// Returns [`RheemError::NoViablePlan`] if a re-enumeration after a
    /// breakpoint yields no implementation, or any error
    /// [`execute_until_breakpoint`] can return.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        plan: &Plan,
        hyperplan: &Hyperplan,
        channel_graph: &ChannelGraph,
        cardinality_engine: &CardinalityEngine,
        cardinalities: &mut OptimizationContext,
        load_estimators: &HashMap<OperatorId, Arc<dyn LoadProfileEstimator>>,
        fallback_load_estimator: Arc<dyn LoadProfileEstimator>,
        time_converter: &LoadProfileToTimeConverter,
        cost_converter: &TimeToCostConverter,
        comparator: &dyn PlanComparator,
        active_platforms: HashSet<PlatformId>,
        enum_config: EnumerationConfig,
    ) -> Result<Vec<PartialExecution>> {
        let mut pinned: HashMap<OperatorId, ExecutionAlternative> = HashMap::new();
        let mut produced: HashMap<OutputRef, Box<dyn ChannelInstance>> = HashMap::new();
        let mut log: Vec<PartialExecution> = Vec::new();
        let mut from_stage = 0usize;

        loop {
            let enumerator = PlanEnumerator::new(
                hyperplan,
                channel_graph,
                cardinalities,
                load_estimators,
                fallback_load_estimator.clone(),
                time_converter,
                cost_converter,
                comparator,
                active_platforms.clone(),
                enum_config.clone(),
            )
            .with_pinned(pinned.clone());
            let implementation = enumerator.enumerate()?;
            let flow = ExecutionTaskFlow::lower(plan, &implementation);

            match self.execute_until_breakpoint(
                plan,
                &flow,
                cardinalities,
                cardinality_engine,
                &mut produced,
                &mut log,
                from_stage,
            )? {
                DriverOutcome::Completed => return Ok(log),
                DriverOutcome::Paused(breakpoint) => {
                    for stage in &flow.stages[..breakpoint.next_stage] {
                        for task in &stage.tasks {
                            if let Some(alt) = implementation.choices.get(&task.operator) {
                                pinned.insert(task.operator, alt.clone());
                            }
                        }
                    }
                    from_stage = breakpoint.next_stage;
                    tracing::info!(from_stage, "re-enumerating unexecuted remainder after breakpoint");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChannelInstance, Executor, Platform};
    use crate::channel::ChannelDescriptorId;
    use crate::ids::{InputRef, PlatformId};
    use crate::plan::{DataType, InputSlot, LogicalKind, OperatorKind, OutputSlot};
    use std::sync::Arc;

    struct ListInstance {
        descriptor: ChannelDescriptorId,
        values: Vec<i64>,
        produced: bool,
        measured: Option<u64>,
    }

    impl ChannelInstance for ListInstance {
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

    struct LocalExecutor;

    impl Executor for LocalExecutor {
        fn execute(
            &self,
            task: &ExecutionTask,
            inputs: &[Box<dyn ChannelInstance>],
        ) -> Result<(Vec<Box<dyn ChannelInstance>>, Option<PartialExecution>)> {
            let values: Vec<i64> = if inputs.is_empty() {
                vec![1, 2, 3]
            } else {
                let total: u64 = inputs.iter().filter_map(ChannelInstance::measured_cardinality).sum();
                (0..total as i64).collect()
            };
            let input_cardinalities: Vec<u64> = inputs.iter().filter_map(|i| i.measured_cardinality()).collect();
            let partial = PartialExecution {
                operator_class: task.binding.logical_class.clone(),
                platform: task.binding.platform.clone(),
                input_cardinalities,
                output_cardinalities: vec![values.len() as u64],
                measured_millis: 1.0,
                timestamp_millis: 0,
            };
            let output = ListInstance {
                descriptor: ChannelDescriptorId::new("local.list"),
                values,
                produced: true,
                measured: Some(partial.output_cardinalities[0]),
            };
            Ok((vec![Box::new(output)], Some(partial)))
        }

        fn dispose(&self) -> Result<()> {
            Ok(())
        }
    }

    struct LocalPlatform;

    impl Platform for LocalPlatform {
        fn id(&self) -> PlatformId {
            PlatformId::new("local")
        }
        fn display_name(&self) -> &str {
            "local"
        }
        fn executor(&self) -> Arc<dyn Executor> {
            Arc::new(LocalExecutor)
        }
    }

    fn int_type() -> DataType {
        DataType::new("i64")
    }

    #[test]
    fn lowering_splits_stages_at_platform_boundaries() {
        let mut plan = Plan::new();
        plan.activate_platform(PlatformId::new("local"));
        let src = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Source),
            vec![],
            vec![OutputSlot { data_type: int_type() }],
        );
        let map = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Map),
            vec![InputSlot::required(int_type())],
            vec![OutputSlot { data_type: int_type() }],
        );
        plan.connect(
            OutputRef { operator: src, slot: SlotIndex(0) },
            InputRef { operator: map, slot: SlotIndex(0) },
        )
        .unwrap();
        plan.declare_sink(map);

        let mut choices = HashMap::new();
        choices.insert(
            src,
            crate::mapping::ExecutionAlternative {
                id: src,
                epoch: 0,
                binding: crate::plan::ExecutionBinding {
                    platform: PlatformId::new("local"),
                    logical_class: "Source".into(),
                    input_channel_preferences: vec![],
                    output_channel_descriptors: vec![ChannelDescriptorId::new("local.list")],
                    load_profile_key: None,
                },
            },
        );
        choices.insert(
            map,
            crate::mapping::ExecutionAlternative {
                id: map,
                epoch: 0,
                binding: crate::plan::ExecutionBinding {
                    platform: PlatformId::new("local"),
                    logical_class: "Map".into(),
                    input_channel_preferences: vec![vec![]],
                    output_channel_descriptors: vec![ChannelDescriptorId::new("local.list")],
                    load_profile_key: None,
                },
            },
        );
        let implementation = PlanImplementation {
            choices,
            junctions: vec![],
            cost: crate::interval::ProbabilisticDoubleInterval::exact(0.0),
        };

        let flow = ExecutionTaskFlow::lower(&plan, &implementation);
        assert_eq!(flow.stages.len(), 1);
        assert_eq!(flow.stages[0].tasks.len(), 2);

        let mut platforms = PlatformRegistry::new();
        platforms.register(Arc::new(LocalPlatform));
        let driver = ExecutionDriver::new(platforms, BreakpointPolicy::default(), MetricsCollector::new());

        let mut ctx = OptimizationContext::new();
        let engine = CardinalityEngine::new(Arc::new(crate::cardinality::IdentityCardinalityEstimator));
        let mut produced = HashMap::new();
        let mut log = Vec::new();
        let outcome = driver
            .execute_until_breakpoint(&plan, &flow, &mut ctx, &engine, &mut produced, &mut log, 0)
            .unwrap();
        assert!(matches!(outcome, DriverOutcome::Completed));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn loop_composite_is_isolated_into_its_own_stage_even_on_a_shared_platform() {
        let mut inner = Plan::new();
        let body = inner.add_operator(
            OperatorKind::Logical(LogicalKind::Map),
            vec![InputSlot::required(int_type())],
            vec![OutputSlot { data_type: int_type() }],
        );
        let composite = crate::plan::Composite {
            inner,
            outer_to_inner_inputs: vec![InputRef { operator: body, slot: SlotIndex(0) }],
            outer_to_inner_outputs: vec![OutputRef { operator: body, slot: SlotIndex(0) }],
            loop_head: Some(crate::plan::ConvergenceCondition::FixedCount(3)),
        };

        let mut plan = Plan::new();
        plan.activate_platform(PlatformId::new("local"));
        let src = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Source),
            vec![],
            vec![OutputSlot { data_type: int_type() }],
        );
        let comp = plan.add_operator(
            OperatorKind::Composite(Box::new(composite)),
            vec![InputSlot::required(int_type())],
            vec![OutputSlot { data_type: int_type() }],
        );
        let sink = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Map),
            vec![InputSlot::required(int_type())],
            vec![OutputSlot { data_type: int_type() }],
        );
        plan.connect(
            OutputRef { operator: src, slot: SlotIndex(0) },
            InputRef { operator: comp, slot: SlotIndex(0) },
        )
        .unwrap();
        plan.connect(
            OutputRef { operator: comp, slot: SlotIndex(0) },
            InputRef { operator: sink, slot: SlotIndex(0) },
        )
        .unwrap();
        plan.declare_sink(sink);

        let mut choices = HashMap::new();
        for (id, class) in [(src, "Source"), (comp, "Composite"), (sink, "Map")] {
            choices.insert(
                id,
                crate::mapping::ExecutionAlternative {
                    id,
                    epoch: 0,
                    binding: crate::plan::ExecutionBinding {
                        platform: PlatformId::new("local"),
                        logical_class: class.into(),
                        input_channel_preferences: if id == src { vec![] } else { vec![vec![]] },
                        output_channel_descriptors: vec![ChannelDescriptorId::new("local.list")],
                        load_profile_key: None,
                    },
                },
            );
        }
        let implementation = PlanImplementation {
            choices,
            junctions: vec![],
            cost: crate::interval::ProbabilisticDoubleInterval::exact(0.0),
        };

        let flow = ExecutionTaskFlow::lower(&plan, &implementation);
        // All three operators share the "local" platform, but the loop
        // composite still breaks out into its own stage on both sides.
        assert_eq!(flow.stages.len(), 3);
        assert_eq!(flow.stages[0].tasks.len(), 1);
        assert_eq!(flow.stages[0].tasks[0].operator, src);
        assert_eq!(flow.stages[1].tasks.len(), 1);
        assert_eq!(flow.stages[1].tasks[0].operator, comp);
        assert_eq!(flow.stages[2].tasks.len(), 1);
        assert_eq!(flow.stages[2].tasks[0].operator, sink);
    }

    struct DbPlatform;

    impl Platform for DbPlatform {
        fn id(&self) -> PlatformId {
            PlatformId::new("db")
        }
        fn display_name(&self) -> &str {
            "db"
        }
        fn executor(&self) -> Arc<dyn Executor> {
            Arc::new(LocalExecutor)
        }
    }

    struct FixedMapping {
        predicate: Arc<dyn Fn(&crate::plan::Operator) -> bool + Send + Sync>,
        platform: PlatformId,
        class: &'static str,
        inputs: usize,
    }

    struct FixedBinder {
        platform: PlatformId,
        class: &'static str,
        inputs: usize,
    }

    impl crate::mapping::ReplacementFactory for FixedBinder {
        fn build(
            &self,
            _captures: &HashMap<String, OperatorId>,
            _plan: &Plan,
        ) -> Result<Vec<crate::plan::ExecutionBinding>> {
            Ok(vec![crate::plan::ExecutionBinding {
                platform: self.platform.clone(),
                logical_class: self.class.to_string(),
                input_channel_preferences: vec![vec![]; self.inputs],
                output_channel_descriptors: vec![ChannelDescriptorId::new("list")],
                load_profile_key: None,
            }])
        }
    }

    impl crate::mapping::Mapping for FixedMapping {
        fn name(&self) -> &str {
            self.class
        }
        fn transformations(&self) -> Vec<crate::mapping::PlanTransformation> {
            let predicate = self.predicate.clone();
            vec![crate::mapping::PlanTransformation {
                pattern: crate::mapping::SubplanPattern::single("op", move |op| predicate(op)),
                factory: Arc::new(FixedBinder {
                    platform: self.platform.clone(),
                    class: self.class,
                    inputs: self.inputs,
                }),
                target_platforms: None,
            }]
        }
    }

    #[test]
    fn reoptimizes_unexecuted_remainder_after_cardinality_drift() {
        let mut plan = Plan::new();
        plan.activate_platform(PlatformId::new("db"));
        plan.activate_platform(PlatformId::new("local"));
        let src = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Source),
            vec![],
            vec![OutputSlot { data_type: int_type() }],
        );
        let map = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Map),
            vec![InputSlot::required(int_type())],
            vec![OutputSlot { data_type: int_type() }],
        );
        plan.connect(
            OutputRef { operator: src, slot: SlotIndex(0) },
            InputRef { operator: map, slot: SlotIndex(0) },
        )
        .unwrap();
        plan.declare_sink(map);

        let mut registry = crate::mapping::MappingRegistry::new();
        registry.register(Arc::new(FixedMapping {
            predicate: Arc::new(move |op| op.id == src),
            platform: PlatformId::new("db"),
            class: "Source",
            inputs: 0,
        }));
        registry.register(Arc::new(FixedMapping {
            predicate: Arc::new(move |op| op.id == map),
            platform: PlatformId::new("local"),
            class: "Map",
            inputs: 1,
        }));
        let hyperplan = registry.apply(plan).unwrap();

        // The source's plan-time estimate (upper bound 100) is wildly off
        // from what actually executes (3 rows), well past the default 2x
        // drift ratio -- this is spec scenario 3 (re-optimization).
        let mut ctx = OptimizationContext::new();
        ctx.set_output(OutputRef { operator: src, slot: SlotIndex(0) }, CardinalityEstimate::new(50, 100, 0.9));

        let channel_graph = crate::channel::ChannelGraph::new();
        let load_estimators = HashMap::new();
        let fallback = Arc::new(crate::cost::LinearLoadProfileEstimator {
            cpu_per_unit: 1.0,
            ram_per_unit: 0.0,
            disk_per_unit: 0.0,
            net_per_unit: 0.0,
            overhead_millis: 0.0,
        });
        let time_converter = crate::cost::LoadProfileToTimeConverter::default();
        let cost_converter = crate::cost::TimeToCostConverter { rate_per_ms: 1.0, fixed_cost_per_platform: 0.0 };
        let comparator = crate::cost::DefaultPlanComparator;
        let active: std::collections::HashSet<_> = [PlatformId::new("db"), PlatformId::new("local")].into_iter().collect();

        let mut platforms = PlatformRegistry::new();
        platforms.register(Arc::new(DbPlatform));
        platforms.register(Arc::new(LocalPlatform));
        let driver = ExecutionDriver::new(platforms, BreakpointPolicy::default(), MetricsCollector::new());
        let engine = CardinalityEngine::new(Arc::new(crate::cardinality::IdentityCardinalityEstimator));

        let log = driver
            .run(
                &hyperplan.logical_plan,
                &hyperplan,
                &channel_graph,
                &engine,
                &mut ctx,
                &load_estimators,
                fallback,
                &time_converter,
                &cost_converter,
                &comparator,
                active,
                EnumerationConfig::default(),
            )
            .unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log[0].platform, PlatformId::new("db"));
        assert_eq!(log[1].platform, PlatformId::new("local"));
        let snapshot = driver.metrics().snapshot();
        assert_eq!(snapshot.get("cardinality_drift_breakpoints").and_then(|v| v.as_u64()), Some(1));
    }
}
