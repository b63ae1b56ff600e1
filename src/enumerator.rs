//! Plan enumerator (C6): bottom-up Cartesian-product enumeration over
//! operator alternatives, concatenated through channel junctions, pruned to
//! a small beam, and resolved to a minimum-cost [`PlanImplementation`].
//!
//! Each logical operator contributes a set of candidate execution
//! alternatives (from [`crate::mapping::Hyperplan`]); the enumerator walks
//! the plan in topological order maintaining a beam of partial
//! implementations, extending every surviving partial by every alternative
//! of the next operator and resolving the channel junction back to each of
//! its already-chosen producers. This mirrors a classic DP-over-a-DAG
//! shape rather than a graph-library traversal, in keeping with the rest of
//! the optimizer preferring hand-rolled search (see [`crate::channel`]) over
//! a dependency for graph algorithms.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::cardinality::{CardinalityEngine, OptimizationContext};
use crate::channel::{ChannelDescriptorId, ChannelGraph, Junction};
use crate::cost::{CostEstimate, LoadProfile, LoadProfileEstimator, LoadProfileToTimeConverter, PlanComparator, TimeToCostConverter};
use crate::error::RheemError;
use crate::ids::{InputRef, OperatorId, OutputRef, PlatformId, SlotIndex};
use crate::mapping::{ExecutionAlternative, Hyperplan};
use crate::plan::{ExecutionBinding, OperatorKind};

/// Tuning knobs for the beam the enumerator keeps between operators.
#[derive(Clone, Debug)]
pub struct EnumerationConfig {
    /// Top-K-by-cost pruning width kept after each operator is folded in.
    pub beam_width: usize,
    /// If set, randomly sample down to this many candidates before applying
    /// top-K pruning -- a cheap way to bound enumeration blowup on wide
    /// operators with many alternatives, at the cost of completeness.
    pub random_sample: Option<usize>,
    pub rng_seed: u64,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            beam_width: 16,
            random_sample: None,
            rng_seed: 0,
        }
    }
}

/// One fully-wired, costed candidate plan: exactly one chosen alternative
/// per logical operator, plus the channel junctions bridging them.
#[derive(Clone, Debug)]
pub struct PlanImplementation {
    pub choices: HashMap<OperatorId, ExecutionAlternative>,
    pub junctions: Vec<Junction>,
    pub cost: CostEstimate,
}

/// A terse, human-readable report of one [`PlanImplementation`]: the chosen
/// alternative per operator, the channel junctions inserted between them,
/// and the overall cost interval. Satisfies the job summary a caller prints
/// after optimization without re-deriving it from the raw structures.
#[derive(Clone, Debug)]
pub struct ExecutionExplanation {
    pub steps: Vec<ExplainStep>,
    pub junction_count: usize,
    pub cost: CostEstimate,
}

#[derive(Clone, Debug)]
pub struct ExplainStep {
    pub operator: OperatorId,
    pub platform: PlatformId,
    pub logical_class: String,
}

impl PlanImplementation {
    /// Render this implementation as an [`ExecutionExplanation`], with
    /// operators ordered by id so the report reads top-to-bottom the same
    /// way every time regardless of `HashMap` iteration order.
    #[must_use]
    pub fn explain(&self) -> ExecutionExplanation {
        let mut ids: Vec<_> = self.choices.keys().copied().collect();
        ids.sort();
        let steps = ids
            .into_iter()
            .map(|id| {
                let alt = &self.choices[&id];
                ExplainStep {
                    operator: id,
                    platform: alt.binding.platform.clone(),
                    logical_class: alt.binding.logical_class.clone(),
                }
            })
            .collect();
        ExecutionExplanation {
            steps,
            junction_count: self.junctions.len(),
            cost: self.cost,
        }
    }
}

impl std::fmt::Display for ExecutionExplanation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "+-- Rheem execution plan ------------------------------")?;
        for step in &self.steps {
            writeln!(f, "| {:>4} {:<20} on {}", step.operator, step.logical_class, step.platform)?;
        }
        writeln!(f, "+-- channel junctions: {}", self.junction_count)?;
        writeln!(
            f,
            "+-- cost: [{:.2}, {:.2}] @ p={:.2}",
            self.cost.lower, self.cost.upper, self.cost.p
        )?;
        write!(f, "+-------------------------------------------------------")
    }
}

#[derive(Clone)]
struct Partial {
    choices: HashMap<OperatorId, ExecutionAlternative>,
    junctions: Vec<Junction>,
    cost: CostEstimate,
}

/// Enumerates [`PlanImplementation`]s over a [`Hyperplan`] and picks the
/// cheapest by the configured [`PlanComparator`].
pub struct PlanEnumerator<'a> {
    hyperplan: &'a Hyperplan,
    channel_graph: &'a ChannelGraph,
    cardinalities: &'a OptimizationContext,
    load_estimators: &'a HashMap<OperatorId, Arc<dyn LoadProfileEstimator>>,
    fallback_load_estimator: Arc<dyn LoadProfileEstimator>,
    time_converter: &'a LoadProfileToTimeConverter,
    cost_converter: &'a TimeToCostConverter,
    comparator: &'a dyn PlanComparator,
    active_platforms: std::collections::HashSet<PlatformId>,
    config: EnumerationConfig,
    pinned: HashMap<OperatorId, ExecutionAlternative>,
}

impl<'a> PlanEnumerator<'a> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hyperplan: &'a Hyperplan,
        channel_graph: &'a ChannelGraph,
        cardinalities: &'a OptimizationContext,
        load_estimators: &'a HashMap<OperatorId, Arc<dyn LoadProfileEstimator>>,
        fallback_load_estimator: Arc<dyn LoadProfileEstimator>,
        time_converter: &'a LoadProfileToTimeConverter,
        cost_converter: &'a TimeToCostConverter,
        comparator: &'a dyn PlanComparator,
        active_platforms: std::collections::HashSet<PlatformId>,
        config: EnumerationConfig,
    ) -> Self {
        Self {
            hyperplan,
            channel_graph,
            cardinalities,
            load_estimators,
            fallback_load_estimator,
            time_converter,
            cost_converter,
            comparator,
            active_platforms,
            config,
            pinned: HashMap::new(),
        }
    }

    /// Force `pinned`'s operators to enumerate with exactly the given
    /// alternative rather than the full candidate set -- used by
    /// [`crate::driver::ExecutionDriver::run`] to keep already-executed
    /// operators fixed across a re-optimization of the plan's unexecuted
    /// remainder (spec §4.7 step 4).
    #[must_use]
    pub fn with_pinned(mut self, pinned: HashMap<OperatorId, ExecutionAlternative>) -> Self {
        self.pinned = pinned;
        self
    }

    /// A logical operator with no matched rewrite still needs something to
    /// schedule (most often a source or sink nobody wrote a platform
    /// mapping for in this toy registry); synthesize a single
    /// platform-agnostic default rather than fail enumeration outright.
    fn alternatives_or_default(&self, id: OperatorId) -> Vec<ExecutionAlternative> {
        if let Some(pinned) = self.pinned.get(&id) {
            return vec![pinned.clone()];
        }
        let existing = self.hyperplan.alternatives_for(id);
        if !existing.is_empty() {
            return existing.to_vec();
        }
        tracing::warn!(operator = %id, "no mapping alternative registered, synthesizing local fallback");
        let Some(op) = self.hyperplan.logical_plan.operator(id) else {
            return vec![];
        };
        let class = match &op.kind {
            OperatorKind::Logical(kind) => kind.to_string(),
            OperatorKind::Execution(binding) => binding.logical_class.clone(),
            OperatorKind::Composite(_) => "Composite".to_string(),
        };
        vec![ExecutionAlternative {
            id,
            epoch: op.epoch,
            binding: ExecutionBinding {
                platform: PlatformId::new("local"),
                logical_class: class,
                input_channel_preferences: vec![vec![]; op.inputs.len()],
                output_channel_descriptors: (0..op.outputs.len())
                    .map(|_| ChannelDescriptorId::new("local.default"))
                    .collect(),
                load_profile_key: None,
            },
        }]
    }

    fn load_profile_for(&self, logical: OperatorId, alt: &ExecutionAlternative) -> LoadProfile {
        let op = self.hyperplan.logical_plan.operator(logical);
        let inputs: Vec<_> = op
            .map(|op| {
                op.inputs
                    .iter()
                    .filter_map(|slot| slot.connection)
                    .filter_map(|out| self.cardinalities.output_of(out))
                    .collect()
            })
            .unwrap_or_default();
        let outputs: Vec<_> = op
            .map(|op| {
                (0..op.outputs.len())
                    .filter_map(|slot| self.cardinalities.output_of(OutputRef { operator: logical, slot: SlotIndex(slot as u32) }))
                    .collect()
            })
            .unwrap_or_default();

        let estimator = self
            .load_estimators
            .get(&alt.id)
            .cloned()
            .unwrap_or_else(|| self.fallback_load_estimator.clone());
        estimator.estimate(&inputs, &outputs)
    }

    /// A loop composite's body cost is paid once per configured iteration
    /// (spec §4.6 step 5: "multiplying cost by iteration count and
    /// summing" -- summing falls out of scaling a single aggregate cost
    /// rather than enumerating each iteration separately, since the body
    /// is otherwise identical across iterations).
    fn operator_cost(&self, logical: OperatorId, alt: &ExecutionAlternative) -> CostEstimate {
        let profile = self.load_profile_for(logical, alt);
        let time = self.time_converter.convert(&profile);
        let cost = self.cost_converter.convert(time, 1);
        match self.hyperplan.logical_plan.operator(logical).map(|op| &op.kind) {
            Some(OperatorKind::Composite(composite)) if composite.loop_head.is_some() => {
                let iterations = composite.loop_head.as_ref().expect("checked Some above").expected_iterations().max(1);
                cost.scale(iterations as f64)
            }
            _ => cost,
        }
    }

    /// Resolve the junction feeding `consumer_slot` of `alt` from whichever
    /// upstream operator already has a chosen alternative in `partial`.
    /// Returns `Ok(None)` if the slot is unconnected (an optional input).
    fn junction_for_input(
        &self,
        logical: OperatorId,
        slot_index: usize,
        alt: &ExecutionAlternative,
        partial: &Partial,
    ) -> Result<Option<Junction>> {
        let input_ref = InputRef { operator: logical, slot: SlotIndex(slot_index as u32) };
        let Some(producer_out) = self.hyperplan.logical_plan.producer_of(input_ref) else {
            return Ok(None);
        };
        let Some(producer_alt) = partial.choices.get(&producer_out.operator) else {
            return Ok(None);
        };
        let Some(emitted) = producer_alt
            .binding
            .output_channel_descriptors
            .get(producer_out.slot.0 as usize)
        else {
            return Ok(None);
        };

        let preferences = alt.binding.input_channel_preferences.get(slot_index);
        let broadcast = self
            .hyperplan
            .logical_plan
            .operator(logical)
            .and_then(|op| op.inputs.get(slot_index))
            .is_some_and(|s| s.broadcast);

        if preferences.is_none_or(Vec::is_empty) {
            // No preference declared: accept the producer's own descriptor directly.
            return Ok(Some(Junction {
                producer: producer_out,
                consumers: vec![InputRef { operator: logical, slot: SlotIndex(slot_index as u32) }],
                path: vec![emitted.clone()],
                cost: CostEstimate::exact(0.0),
            }));
        }

        let acceptable: std::collections::HashSet<_> = preferences
            .expect("checked non-empty above")
            .iter()
            .cloned()
            .collect();
        let junction = self.channel_graph.resolve_junction(
            producer_out,
            std::slice::from_ref(emitted),
            vec![InputRef { operator: logical, slot: SlotIndex(slot_index as u32) }],
            &acceptable,
            &self.active_platforms,
            broadcast,
        );
        junction.map(Some).ok_or_else(|| {
            RheemError::no_viable_plan(format!(
                "no channel bridge from {producer_out:?} to operator {logical} slot {slot_index}"
            ))
            .into()
        })
    }

    fn extend(&self, beam: Vec<Partial>, logical: OperatorId) -> Vec<Partial> {
        let mut next = Vec::new();
        for partial in &beam {
            for alt in self.alternatives_or_default(logical) {
                let op = match self.hyperplan.logical_plan.operator(logical) {
                    Some(op) => op,
                    None => continue,
                };
                let mut junctions = partial.junctions.clone();
                let mut feasible = true;
                let mut bridge_cost = CostEstimate::exact(0.0);
                for slot_index in 0..op.inputs.len() {
                    match self.junction_for_input(logical, slot_index, &alt, partial) {
                        Ok(Some(j)) => {
                            bridge_cost = bridge_cost.add(&j.cost);
                            junctions.push(j);
                        }
                        Ok(None) => {}
                        Err(_) => {
                            feasible = false;
                            break;
                        }
                    }
                }
                if !feasible {
                    continue;
                }

                let own_cost = self.operator_cost(logical, &alt);
                let mut choices = partial.choices.clone();
                choices.insert(logical, alt);
                let cost = partial.cost.add(&own_cost).add(&bridge_cost);
                next.push(Partial { choices, junctions, cost });
            }
        }
        next
    }

    fn prune(&self, mut candidates: Vec<Partial>) -> Vec<Partial> {
        if candidates.is_empty() {
            return candidates;
        }

        if let Some(sample_size) = self.config.random_sample {
            if candidates.len() > sample_size {
                let mut rng = StdRng::seed_from_u64(self.config.rng_seed);
                candidates.shuffle(&mut rng);
                candidates.truncate(sample_size);
            }
        }

        candidates.sort_by(|a, b| self.comparator.compare(&a.cost, &b.cost));

        // Latent pruning: drop anything whose lower-bound cost can never
        // beat the cheapest candidate's own upper bound.
        if let Some(best_upper) = candidates.first().map(|c| c.cost.upper) {
            candidates.retain(|c| c.cost.lower <= best_upper);
        }

        candidates.truncate(self.config.beam_width.max(1));
        candidates
    }

    /// Enumerate and select the minimum-cost [`PlanImplementation`].
    ///
    /// # Errors
    /// Returns [`RheemError::NoViablePlan`] if no combination of
    /// alternatives survives (every candidate hit an unresolvable channel
    /// junction).
    pub fn enumerate(&self) -> Result<PlanImplementation> {
        let order = CardinalityEngine::topo_order(&self.hyperplan.logical_plan);
        let mut beam = vec![Partial {
            choices: HashMap::new(),
            junctions: Vec::new(),
            cost: CostEstimate::exact(0.0),
        }];

        for logical in order {
            let extended = self.extend(beam, logical);
            let before = extended.len();
            beam = self.prune(extended);
            tracing::debug!(operator = %logical, before, after = beam.len(), "folded operator into beam");
            if beam.is_empty() {
                return Err(RheemError::no_viable_plan(format!(
                    "no surviving plan implementation after folding in operator {logical}"
                ))
                .into());
            }
        }

        beam.sort_by(|a, b| self.comparator.compare(&a.cost, &b.cost));
        let best = beam.into_iter().next().expect("non-empty beam checked above");
        Ok(PlanImplementation {
            choices: best.choices,
            junctions: best.junctions,
            cost: best.cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{DefaultPlanComparator, LinearLoadProfileEstimator};
    use crate::ids::PlatformId;
    use crate::interval::CardinalityEstimate;
    use crate::mapping::MappingRegistry;
    use crate::plan::{DataType, InputSlot, LogicalKind, OutputSlot, Plan};

    fn int_type() -> DataType {
        DataType::new("i64")
    }

    fn linear_plan() -> (Plan, OperatorId, OperatorId) {
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
        (plan, src, map)
    }

    #[test]
    fn enumerates_a_default_implementation_with_no_mappings() {
        let (plan, src, map) = linear_plan();
        let hyperplan = MappingRegistry::new().apply(plan).unwrap();

        let mut ctx = OptimizationContext::new();
        ctx.set_output(OutputRef { operator: src, slot: SlotIndex(0) }, CardinalityEstimate::new(10, 20, 0.9));
        ctx.set_output(OutputRef { operator: map, slot: SlotIndex(0) }, CardinalityEstimate::new(10, 20, 0.9));

        let channel_graph = ChannelGraph::new();
        let load_estimators = HashMap::new();
        let fallback = Arc::new(LinearLoadProfileEstimator {
            cpu_per_unit: 1.0,
            ram_per_unit: 0.0,
            disk_per_unit: 0.0,
            net_per_unit: 0.0,
            overhead_millis: 0.0,
        });
        let time_converter = LoadProfileToTimeConverter::default();
        let cost_converter = TimeToCostConverter { rate_per_ms: 1.0, fixed_cost_per_platform: 0.0 };
        let comparator = DefaultPlanComparator;
        let active = [PlatformId::new("local")].into_iter().collect();

        let enumerator = PlanEnumerator::new(
            &hyperplan,
            &channel_graph,
            &ctx,
            &load_estimators,
            fallback,
            &time_converter,
            &cost_converter,
            &comparator,
            active,
            EnumerationConfig::default(),
        );

        let implementation = enumerator.enumerate().unwrap();
        assert_eq!(implementation.choices.len(), 2);
        assert!(implementation.cost.lower > 0.0);

        let explanation = implementation.explain();
        assert_eq!(explanation.steps.len(), 2);
        let rendered = explanation.to_string();
        assert!(rendered.contains("cost:"));
    }

    #[test]
    fn beam_width_bounds_the_number_of_survivors() {
        let (plan, src, map) = linear_plan();
        let hyperplan = MappingRegistry::new().apply(plan).unwrap();
        let mut ctx = OptimizationContext::new();
        ctx.set_output(OutputRef { operator: src, slot: SlotIndex(0) }, CardinalityEstimate::exact(5));
        ctx.set_output(OutputRef { operator: map, slot: SlotIndex(0) }, CardinalityEstimate::exact(5));

        let channel_graph = ChannelGraph::new();
        let load_estimators = HashMap::new();
        let fallback = Arc::new(LinearLoadProfileEstimator {
            cpu_per_unit: 1.0,
            ram_per_unit: 0.0,
            disk_per_unit: 0.0,
            net_per_unit: 0.0,
            overhead_millis: 0.0,
        });
        let time_converter = LoadProfileToTimeConverter::default();
        let cost_converter = TimeToCostConverter { rate_per_ms: 1.0, fixed_cost_per_platform: 0.0 };
        let comparator = DefaultPlanComparator;
        let active = [PlatformId::new("local")].into_iter().collect();
        let config = EnumerationConfig { beam_width: 1, random_sample: None, rng_seed: 1 };

        let enumerator = PlanEnumerator::new(
            &hyperplan,
            &channel_graph,
            &ctx,
            &load_estimators,
            fallback,
            &time_converter,
            &cost_converter,
            &comparator,
            active,
            config,
        );
        assert!(enumerator.enumerate().is_ok());
    }

    fn composite_wrapped_plan(loop_head: Option<crate::plan::ConvergenceCondition>) -> (Plan, OperatorId, OperatorId) {
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
            loop_head,
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
        plan.connect(
            OutputRef { operator: src, slot: SlotIndex(0) },
            InputRef { operator: comp, slot: SlotIndex(0) },
        )
        .unwrap();
        plan.declare_sink(comp);
        (plan, src, comp)
    }

    fn composite_cost(plan: Plan, src: OperatorId, comp: OperatorId) -> CostEstimate {
        let hyperplan = MappingRegistry::new().apply(plan).unwrap();
        let mut ctx = OptimizationContext::new();
        ctx.set_output(OutputRef { operator: src, slot: SlotIndex(0) }, CardinalityEstimate::exact(5));
        ctx.set_output(OutputRef { operator: comp, slot: SlotIndex(0) }, CardinalityEstimate::exact(5));

        let channel_graph = ChannelGraph::new();
        let load_estimators = HashMap::new();
        let fallback = Arc::new(LinearLoadProfileEstimator {
            cpu_per_unit: 1.0,
            ram_per_unit: 0.0,
            disk_per_unit: 0.0,
            net_per_unit: 0.0,
            overhead_millis: 0.0,
        });
        let time_converter = LoadProfileToTimeConverter::default();
        let cost_converter = TimeToCostConverter { rate_per_ms: 1.0, fixed_cost_per_platform: 0.0 };
        let comparator = DefaultPlanComparator;
        let active = [PlatformId::new("local")].into_iter().collect();

        let enumerator = PlanEnumerator::new(
            &hyperplan,
            &channel_graph,
            &ctx,
            &load_estimators,
            fallback,
            &time_converter,
            &cost_converter,
            &comparator,
            active,
            EnumerationConfig::default(),
        );
        let alt = enumerator.alternatives_or_default(comp)[0].clone();
        enumerator.operator_cost(comp, &alt)
    }

    #[test]
    fn loop_composite_cost_is_scaled_by_iteration_count() {
        let (plain_plan, src, comp) = composite_wrapped_plan(None);
        let plain_cost = composite_cost(plain_plan, src, comp);

        let (loop_plan, src, comp) = composite_wrapped_plan(Some(crate::plan::ConvergenceCondition::FixedCount(4)));
        let loop_cost = composite_cost(loop_plan, src, comp);

        assert!((loop_cost.lower - plain_cost.lower * 4.0).abs() < 1e-6);
        assert!((loop_cost.upper - plain_cost.upper * 4.0).abs() < 1e-6);
    }
}
