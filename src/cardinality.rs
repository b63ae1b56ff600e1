//! Cardinality engine (C3): per-output-slot estimates, propagated by a push
//! traversal from sources, plus incremental re-push when measured values
//! arrive at runtime.
//!
//! Estimates live in an [`OptimizationContext`] keyed by [`OutputRef`]
//! rather than hanging off the operator itself, so the immutable [`Plan`]
//! never needs a back-pointer from operator to estimate -- the same arena
//! pattern the data model calls for elsewhere (load profile, time, cost all
//! follow suit in their own modules).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;

use crate::ids::{InputRef, OperatorId, OutputRef, PlanId, SlotIndex};
use crate::interval::CardinalityEstimate;
use crate::plan::{Composite, OperatorKind, Plan};

/// Estimates the output cardinalities of one operator from its input
/// cardinalities. Implementations are registered per operator (typically by
/// the execution binding that knows the operator's semantics, e.g. a filter
/// knows its own selectivity); anything unregistered falls back to
/// [`CardinalityEngine`]'s configured default.
pub trait CardinalityEstimator: Send + Sync {
    /// `inputs` holds one estimate per connected input slot, in slot order;
    /// `output_count` is how many output slots to produce an estimate for.
    fn estimate(&self, inputs: &[CardinalityEstimate], output_count: usize) -> Vec<CardinalityEstimate>;
}

/// Passes the sum of all input cardinalities through to every output slot --
/// a reasonable shape-preserving default for map-like operators.
pub struct IdentityCardinalityEstimator;

impl CardinalityEstimator for IdentityCardinalityEstimator {
    fn estimate(&self, inputs: &[CardinalityEstimate], output_count: usize) -> Vec<CardinalityEstimate> {
        let combined = inputs
            .iter()
            .copied()
            .reduce(|a, b| a.add(&b))
            .unwrap_or_else(|| CardinalityEstimate::new(0, 1, 0.1));
        vec![combined; output_count.max(1)]
    }
}

/// Always returns the same configured estimate, regardless of input -- used
/// as the fallback for sources with no registered estimator.
pub struct ConstantCardinalityEstimator(pub CardinalityEstimate);

impl CardinalityEstimator for ConstantCardinalityEstimator {
    fn estimate(&self, _inputs: &[CardinalityEstimate], output_count: usize) -> Vec<CardinalityEstimate> {
        vec![self.0; output_count.max(1)]
    }
}

/// Per-output-slot cardinality estimates for one plan, plus the change marks
/// an incremental re-push consults.
#[derive(Clone, Debug, Default)]
pub struct OptimizationContext {
    outputs: HashMap<OutputRef, CardinalityEstimate>,
    /// Estimates fed into a composite's inner plan at its slot-traced
    /// boundary, keyed by the inner [`InputRef`] rather than an
    /// [`OutputRef`] -- the producer is outside this plan entirely, so
    /// there is no inner operator id to key an output by. See
    /// [`CardinalityEngine::push_loop`].
    boundary: HashMap<InputRef, CardinalityEstimate>,
    changed: HashSet<OperatorId>,
}

impl OptimizationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output_of(&self, out: OutputRef) -> Option<CardinalityEstimate> {
        self.outputs.get(&out).copied()
    }

    /// Seed a composite's boundary input with an estimate from outside its
    /// inner plan.
    pub fn set_boundary(&mut self, input: InputRef, estimate: CardinalityEstimate) {
        self.boundary.insert(input, estimate);
    }

    #[must_use]
    pub fn boundary_of(&self, input: InputRef) -> Option<CardinalityEstimate> {
        self.boundary.get(&input).copied()
    }

    /// Record `estimate` for `out`. Returns `true` if this changed the
    /// previously-held value (or there was none), `false` if it is
    /// identical to what was already there -- the idempotence a measured
    /// re-injection of an unchanged value relies on.
    pub fn set_output(&mut self, out: OutputRef, estimate: CardinalityEstimate) -> bool {
        let changed = self.outputs.get(&out) != Some(&estimate);
        if changed {
            self.outputs.insert(out, estimate);
            self.changed.insert(out.operator);
        }
        changed
    }

    #[must_use]
    pub fn is_marked(&self, operator: OperatorId) -> bool {
        self.changed.contains(&operator)
    }

    pub fn clear_marks(&mut self) {
        self.changed.clear();
    }

    /// `true` once every reachable operator's every output slot has an
    /// estimate -- the completeness assertion a push is expected to leave
    /// the context in.
    #[must_use]
    pub fn is_complete(&self, plan: &Plan) -> bool {
        plan.reachable_from_sinks().iter().all(|&id| {
            plan.operator(id).is_none_or(|op| {
                (0..op.outputs.len()).all(|slot| {
                    self.outputs
                        .contains_key(&OutputRef { operator: id, slot: SlotIndex(slot as u32) })
                })
            })
        })
    }
}

/// Owns the per-operator estimator registry and the fallback used for
/// operators nobody registered one for, and runs the push traversal.
///
/// Estimators are keyed by `(PlanId, OperatorId)` rather than bare
/// `OperatorId`: `OperatorId`s are allocated from zero per-[`Plan`], so a
/// composite's inner plan and its enclosing plan routinely reuse the same
/// ids. Keying on the bare id would let a registration for one collide with
/// (and silently overwrite) a registration for the other.
#[derive(Default)]
pub struct CardinalityEngine {
    estimators: HashMap<(PlanId, OperatorId), Arc<dyn CardinalityEstimator>>,
    fallback: Option<Arc<dyn CardinalityEstimator>>,
    warned: std::cell::RefCell<HashSet<(PlanId, OperatorId)>>,
}

impl CardinalityEngine {
    #[must_use]
    pub fn new(fallback: Arc<dyn CardinalityEstimator>) -> Self {
        Self {
            estimators: HashMap::new(),
            fallback: Some(fallback),
            warned: std::cell::RefCell::new(HashSet::new()),
        }
    }

    /// Register `estimator` for `operator` within `plan` specifically --
    /// the same `operator` id in a different [`Plan`] (e.g. a composite's
    /// inner plan) is unaffected.
    pub fn register(&mut self, plan: &Plan, operator: OperatorId, estimator: Arc<dyn CardinalityEstimator>) {
        self.estimators.insert((plan.id(), operator), estimator);
    }

    fn estimator_for(&self, plan_id: PlanId, id: OperatorId) -> Arc<dyn CardinalityEstimator> {
        let key = (plan_id, id);
        if let Some(est) = self.estimators.get(&key) {
            return est.clone();
        }
        if self.warned.borrow_mut().insert(key) {
            tracing::warn!(operator = %id, "no cardinality estimator registered, using fallback");
        }
        self.fallback
            .clone()
            .unwrap_or_else(|| Arc::new(IdentityCardinalityEstimator))
    }

    /// A topological order over the plan's sink-reachable operators, ties
    /// broken by insertion order so the push is deterministic.
    pub(crate) fn topo_order(plan: &Plan) -> Vec<OperatorId> {
        let reachable = plan.reachable_from_sinks();
        let mut indegree: HashMap<OperatorId, usize> = HashMap::new();
        for &id in &reachable {
            let Some(op) = plan.operator(id) else { continue };
            let deg = op
                .inputs
                .iter()
                .filter(|input| input.connection.is_some_and(|out| reachable.contains(&out.operator)))
                .count();
            indegree.insert(id, deg);
        }

        let mut ready: BTreeSet<(usize, OperatorId)> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| (plan.insertion_index(id).unwrap_or(usize::MAX), id))
            .collect();

        let mut order = Vec::new();
        while let Some(&(idx, id)) = ready.iter().next() {
            ready.remove(&(idx, id));
            order.push(id);
            let Some(op) = plan.operator(id) else { continue };
            for (slot_idx, _) in op.outputs.iter().enumerate() {
                let out_ref = OutputRef { operator: id, slot: SlotIndex(slot_idx as u32) };
                for consumer in plan.consumers_of(out_ref) {
                    if let Some(deg) = indegree.get_mut(&consumer.operator) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            ready.insert((plan.insertion_index(consumer.operator).unwrap_or(usize::MAX), consumer.operator));
                        }
                    }
                }
            }
        }
        order
    }

    /// One estimate per input slot that has one, in slot order. A slot
    /// wired to a producer inside this same plan is looked up by
    /// [`OutputRef`]; a composite's slot-traced boundary input (no
    /// in-plan connection) is looked up by [`InputRef`] instead.
    fn inputs_for(plan: &Plan, id: OperatorId, ctx: &OptimizationContext) -> Vec<CardinalityEstimate> {
        let Some(op) = plan.operator(id) else { return vec![] };
        op.inputs
            .iter()
            .enumerate()
            .filter_map(|(slot_idx, slot)| match slot.connection {
                Some(out) => ctx.output_of(out),
                None => ctx.boundary_of(InputRef { operator: id, slot: SlotIndex(slot_idx as u32) }),
            })
            .collect()
    }

    /// Full push traversal from sources to sinks, in topological order.
    ///
    /// # Errors
    /// Returns an error only if the plan is not sane enough to traverse
    /// (propagated from [`Plan::sane`] is not called here; this assumes the
    /// caller already validated the plan and only reports an internal
    /// inconsistency).
    pub fn push(&self, plan: &Plan, ctx: &mut OptimizationContext) -> Result<()> {
        for id in Self::topo_order(plan) {
            self.push_one(plan, id, ctx)?;
        }
        Ok(())
    }

    fn push_one(&self, plan: &Plan, id: OperatorId, ctx: &mut OptimizationContext) -> Result<()> {
        let Some(op) = plan.operator(id) else { return Ok(()) };
        let inputs = Self::inputs_for(plan, id, ctx);

        let estimates = if let OperatorKind::Composite(composite) = &op.kind {
            self.push_loop(composite, &inputs)?.0
        } else {
            let estimator = self.estimator_for(plan.id(), id);
            estimator.estimate(&inputs, op.outputs.len())
        };

        for (slot_idx, estimate) in estimates.into_iter().enumerate() {
            let out_ref = OutputRef { operator: id, slot: SlotIndex(slot_idx as u32) };
            ctx.set_output(out_ref, estimate);
        }
        Ok(())
    }

    /// Push cardinalities through a composite's inner plan, in a context
    /// scoped to that inner plan alone (inner and outer operator ids are
    /// allocated independently per [`Plan`] and may collide, so inner
    /// estimates never share an [`OptimizationContext`] with the outer
    /// plan's).
    ///
    /// For a plain composite this runs the body exactly once. For a loop
    /// composite (`composite.loop_head.is_some()`), the body runs once per
    /// configured iteration plus one final pass whose inputs equal the
    /// last iteration's outputs -- spec §3's "a loop with n expected
    /// iterations has n+1 contexts" -- with each iteration's outputs
    /// carried forward as the next iteration's boundary inputs. Returns
    /// the composite's own traced output estimates (from the final
    /// context) and the full ordered list of per-iteration contexts, the
    /// last of which is the post-loop context.
    ///
    /// # Errors
    /// Propagates any error from pushing the inner plan.
    pub fn push_loop(
        &self,
        composite: &Composite,
        own_inputs: &[CardinalityEstimate],
    ) -> Result<(Vec<CardinalityEstimate>, Vec<OptimizationContext>)> {
        let iterations = composite
            .loop_head
            .as_ref()
            .map_or(1, |condition| condition.expected_iterations() as usize + 1);
        let mut contexts = Vec::with_capacity(iterations);
        let mut current_inputs = own_inputs.to_vec();
        let mut traced_outputs = Vec::new();

        for _ in 0..iterations {
            let mut inner_ctx = OptimizationContext::new();
            for (outer_idx, inner_in) in composite.outer_to_inner_inputs.iter().enumerate() {
                if let Some(estimate) = current_inputs.get(outer_idx) {
                    inner_ctx.set_boundary(*inner_in, *estimate);
                }
            }
            self.push(&composite.inner, &mut inner_ctx)?;

            traced_outputs = composite
                .outer_to_inner_outputs
                .iter()
                .map(|out_ref| {
                    inner_ctx
                        .output_of(*out_ref)
                        .unwrap_or_else(|| CardinalityEstimate::new(0, 1, 0.1))
                })
                .collect();
            current_inputs = traced_outputs.clone();
            contexts.push(inner_ctx);
        }

        Ok((traced_outputs, contexts))
    }

    /// Incremental re-push starting only from operators currently marked
    /// changed in `ctx` (typically just after a measured-cardinality
    /// injection), propagating through their downstream closure. Clears the
    /// marks it consumes.
    ///
    /// # Errors
    /// See [`CardinalityEngine::push`].
    pub fn repush_from_marks(&self, plan: &Plan, ctx: &mut OptimizationContext) -> Result<()> {
        let marked: Vec<OperatorId> = ctx.changed.iter().copied().collect();
        if marked.is_empty() {
            return Ok(());
        }

        let mut to_visit: HashSet<OperatorId> = HashSet::new();
        for &id in &marked {
            plan.downstream(id, |op| {
                to_visit.insert(op.id);
            });
        }

        for id in Self::topo_order(plan) {
            if to_visit.contains(&id) {
                self.push_one(plan, id, ctx)?;
            }
        }
        ctx.clear_marks();
        Ok(())
    }

    /// Inject a measured cardinality at `output`, converting it to an
    /// exact, fully-confident estimate and marking it changed only if it
    /// actually differs from what the context already held -- repeated
    /// injection of an unchanged measurement is a no-op.
    pub fn inject_measured(ctx: &mut OptimizationContext, output: OutputRef, measured: u64) -> bool {
        ctx.set_output(output, CardinalityEstimate::exact(measured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::InputRef;
    use crate::plan::{DataType, InputSlot, LogicalKind, OperatorKind, OutputSlot};

    fn int_type() -> DataType {
        DataType::new("i64")
    }

    fn linear_plan() -> (Plan, OperatorId, OperatorId) {
        let mut plan = Plan::new();
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
    fn push_propagates_through_a_linear_chain() {
        let (plan, src, map) = linear_plan();
        let mut engine = CardinalityEngine::new(Arc::new(IdentityCardinalityEstimator));
        engine.register(
            &plan,
            src,
            Arc::new(ConstantCardinalityEstimator(CardinalityEstimate::new(10, 20, 0.9))),
        );
        let mut ctx = OptimizationContext::new();
        engine.push(&plan, &mut ctx).unwrap();

        let src_out = ctx.output_of(OutputRef { operator: src, slot: SlotIndex(0) }).unwrap();
        assert_eq!(src_out.lower, 10);
        let map_out = ctx.output_of(OutputRef { operator: map, slot: SlotIndex(0) }).unwrap();
        assert_eq!(map_out, src_out);
        assert!(ctx.is_complete(&plan));
    }

    #[test]
    fn fallback_estimator_is_used_when_unregistered() {
        let (plan, _src, map) = linear_plan();
        let engine = CardinalityEngine::new(Arc::new(ConstantCardinalityEstimator(CardinalityEstimate::exact(1))));
        let mut ctx = OptimizationContext::new();
        engine.push(&plan, &mut ctx).unwrap();
        let map_out = ctx.output_of(OutputRef { operator: map, slot: SlotIndex(0) }).unwrap();
        assert_eq!(map_out, CardinalityEstimate::exact(1));
    }

    #[test]
    fn measured_injection_is_idempotent_when_unchanged() {
        let (plan, src, _map) = linear_plan();
        let mut ctx = OptimizationContext::new();
        let out = OutputRef { operator: src, slot: SlotIndex(0) };
        assert!(CardinalityEngine::inject_measured(&mut ctx, out, 42));
        assert!(ctx.is_marked(src));
        ctx.clear_marks();
        assert!(!CardinalityEngine::inject_measured(&mut ctx, out, 42));
        assert!(!ctx.is_marked(src));
    }

    #[test]
    fn repush_only_recomputes_downstream_of_marks() {
        let (plan, src, map) = linear_plan();
        let mut engine = CardinalityEngine::new(Arc::new(IdentityCardinalityEstimator));
        engine.register(
            &plan,
            src,
            Arc::new(ConstantCardinalityEstimator(CardinalityEstimate::new(10, 20, 0.9))),
        );
        let mut ctx = OptimizationContext::new();
        engine.push(&plan, &mut ctx).unwrap();

        let out = OutputRef { operator: src, slot: SlotIndex(0) };
        assert!(CardinalityEngine::inject_measured(&mut ctx, out, 15));
        engine.repush_from_marks(&plan, &mut ctx).unwrap();

        let map_out = ctx.output_of(OutputRef { operator: map, slot: SlotIndex(0) }).unwrap();
        assert_eq!(map_out, CardinalityEstimate::exact(15));
        assert!(!ctx.is_marked(src));
    }

    #[test]
    fn join_like_fan_in_sums_both_upstream_inputs() {
        let mut plan = Plan::new();
        let src1 = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Source),
            vec![],
            vec![OutputSlot { data_type: int_type() }],
        );
        let src2 = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Source),
            vec![],
            vec![OutputSlot { data_type: int_type() }],
        );
        let union = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Union),
            vec![InputSlot::required(int_type()), InputSlot::required(int_type())],
            vec![OutputSlot { data_type: int_type() }],
        );
        plan.connect(
            OutputRef { operator: src1, slot: SlotIndex(0) },
            InputRef { operator: union, slot: SlotIndex(0) },
        )
        .unwrap();
        plan.connect(
            OutputRef { operator: src2, slot: SlotIndex(0) },
            InputRef { operator: union, slot: SlotIndex(1) },
        )
        .unwrap();
        plan.declare_sink(union);

        let mut engine = CardinalityEngine::new(Arc::new(IdentityCardinalityEstimator));
        engine.register(&plan, src1, Arc::new(ConstantCardinalityEstimator(CardinalityEstimate::exact(5))));
        engine.register(&plan, src2, Arc::new(ConstantCardinalityEstimator(CardinalityEstimate::exact(7))));
        let mut ctx = OptimizationContext::new();
        engine.push(&plan, &mut ctx).unwrap();

        let union_out = ctx.output_of(OutputRef { operator: union, slot: SlotIndex(0) }).unwrap();
        assert_eq!(union_out.lower, 12);
        assert_eq!(union_out.upper, 12);
    }

    struct DoublingEstimator;

    impl CardinalityEstimator for DoublingEstimator {
        fn estimate(&self, inputs: &[CardinalityEstimate], output_count: usize) -> Vec<CardinalityEstimate> {
            let doubled = inputs
                .first()
                .map(|e| CardinalityEstimate::exact(e.upper * 2))
                .unwrap_or_else(|| CardinalityEstimate::exact(0));
            vec![doubled; output_count.max(1)]
        }
    }

    fn doubling_loop_body() -> (Plan, OperatorId) {
        let mut inner = Plan::new();
        let update = inner.add_operator(
            OperatorKind::Logical(LogicalKind::Custom("Update".into())),
            vec![InputSlot { data_type: int_type(), required: false, broadcast: false, connection: None }],
            vec![OutputSlot { data_type: int_type() }],
        );
        inner.declare_sink(update);
        (inner, update)
    }

    #[test]
    fn loop_runs_one_context_per_iteration_plus_one_post_loop() {
        let (inner, update) = doubling_loop_body();
        let composite = Composite {
            inner,
            outer_to_inner_inputs: vec![InputRef { operator: update, slot: SlotIndex(0) }],
            outer_to_inner_outputs: vec![OutputRef { operator: update, slot: SlotIndex(0) }],
            loop_head: Some(crate::plan::ConvergenceCondition::FixedCount(3)),
        };

        let mut engine = CardinalityEngine::new(Arc::new(IdentityCardinalityEstimator));
        engine.register(&composite.inner, update, Arc::new(DoublingEstimator));

        let (outputs, contexts) = engine.push_loop(&composite, &[CardinalityEstimate::exact(5)]).unwrap();

        // spec §3: "n expected iterations has n+1 contexts".
        assert_eq!(contexts.len(), 4);
        assert_eq!(outputs, vec![CardinalityEstimate::exact(80)]);

        // Each iteration's output fed the next iteration's boundary input.
        let expected = [10, 20, 40, 80];
        for (ctx, expect) in contexts.iter().zip(expected) {
            let out = ctx.output_of(OutputRef { operator: update, slot: SlotIndex(0) }).unwrap();
            assert_eq!(out, CardinalityEstimate::exact(expect));
        }
    }

    #[test]
    fn zero_iteration_loop_still_runs_one_post_loop_context() {
        let (inner, update) = doubling_loop_body();
        let composite = Composite {
            inner,
            outer_to_inner_inputs: vec![InputRef { operator: update, slot: SlotIndex(0) }],
            outer_to_inner_outputs: vec![OutputRef { operator: update, slot: SlotIndex(0) }],
            loop_head: Some(crate::plan::ConvergenceCondition::FixedCount(0)),
        };

        let mut engine = CardinalityEngine::new(Arc::new(IdentityCardinalityEstimator));
        engine.register(&composite.inner, update, Arc::new(DoublingEstimator));

        let (outputs, contexts) = engine.push_loop(&composite, &[CardinalityEstimate::exact(5)]).unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(outputs, vec![CardinalityEstimate::exact(10)]);
    }

    #[test]
    fn composite_push_one_traces_inner_output_to_outer_slot() {
        let (inner, update) = doubling_loop_body();
        let composite = Composite {
            inner,
            outer_to_inner_inputs: vec![InputRef { operator: update, slot: SlotIndex(0) }],
            outer_to_inner_outputs: vec![OutputRef { operator: update, slot: SlotIndex(0) }],
            loop_head: None,
        };

        let mut engine = CardinalityEngine::new(Arc::new(IdentityCardinalityEstimator));
        // Registered against the inner plan's own id, so it is only ever
        // resolved from the inner push this composite runs through
        // `push_loop` -- not against the outer plan, which happens to
        // assign `src` the very same `OperatorId` (both start counting
        // from zero).
        engine.register(&composite.inner, update, Arc::new(DoublingEstimator));

        let mut plan = Plan::new();
        let src = plan.add_operator(
            OperatorKind::Logical(LogicalKind::Source),
            vec![],
            vec![OutputSlot { data_type: int_type() }],
        );
        engine.register(&plan, src, Arc::new(ConstantCardinalityEstimator(CardinalityEstimate::exact(3))));
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

        let mut ctx = OptimizationContext::new();
        engine.push(&plan, &mut ctx).unwrap();

        let comp_out = ctx.output_of(OutputRef { operator: comp, slot: SlotIndex(0) }).unwrap();
        assert_eq!(comp_out, CardinalityEstimate::exact(6));
    }
}
