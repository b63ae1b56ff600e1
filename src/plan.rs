//! The plan graph: operators, slots, connections, and structural traversal.
//!
//! A [`Plan`] is the in-memory registry of all [`Operator`]s and the directed
//! connections between their slots, in the same spirit as the teacher
//! crate's `Pipeline` (a `HashMap<NodeId, Node>` plus an edge list guarded by
//! sequential id assignment) but generalized from a linear transform chain to
//! an arbitrary DAG of typed slots, because Rheem plans branch and rejoin
//! (joins, broadcasts, loops).
//!
//! Operators are never mutated in place once built; rewrites ([`crate::mapping`])
//! add new operators under a new epoch rather than editing existing ones, per
//! the immutable-plan-structure lifecycle the data model calls for.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::RheemError;
use crate::ids::{InputRef, OperatorId, OutputRef, PlanId, PlatformId, SlotIndex};

/// Declared element type of a slot. Kept as an opaque name (rather than a
/// Rust generic) because the core never materializes the data itself --
/// backends do -- so there is nothing to be generic over.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DataType(pub String);

impl DataType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An operator's output slot. Fan-out (many consumers) lives in the plan's
/// reverse index, not here.
#[derive(Clone, Debug)]
pub struct OutputSlot {
    pub data_type: DataType,
}

/// An operator's input slot. At most one incoming connection; `required`
/// distinguishes a slot that must be connected for the plan to be sane from
/// one that may be left dangling (e.g. an optional broadcast side-input).
#[derive(Clone, Debug)]
pub struct InputSlot {
    pub data_type: DataType,
    pub required: bool,
    pub broadcast: bool,
    pub connection: Option<OutputRef>,
}

impl InputSlot {
    #[must_use]
    pub fn required(data_type: DataType) -> Self {
        Self {
            data_type,
            required: true,
            broadcast: false,
            connection: None,
        }
    }

    #[must_use]
    pub fn broadcast(data_type: DataType) -> Self {
        Self {
            data_type,
            required: true,
            broadcast: true,
            connection: None,
        }
    }
}

/// The closed set of elementary logical operators a user plan is built from.
/// `Custom` covers user-defined functions carried opaquely (the core never
/// compiles or inspects them).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogicalKind {
    Source,
    Sink,
    Map,
    FlatMap,
    Filter,
    Join,
    GroupBy,
    ReduceBy,
    Union,
    Custom(String),
}

impl std::fmt::Display for LogicalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "Source"),
            Self::Sink => write!(f, "Sink"),
            Self::Map => write!(f, "Map"),
            Self::FlatMap => write!(f, "FlatMap"),
            Self::Filter => write!(f, "Filter"),
            Self::Join => write!(f, "Join"),
            Self::GroupBy => write!(f, "GroupBy"),
            Self::ReduceBy => write!(f, "ReduceBy"),
            Self::Union => write!(f, "Union"),
            Self::Custom(name) => write!(f, "Custom({name})"),
        }
    }
}

/// Ordered, preferred list of channel descriptors an execution operator will
/// accept on a given slot. See [`crate::channel`] for descriptor identities.
pub type ChannelPreferences = Vec<crate::channel::ChannelDescriptorId>;

/// An operator bound to a single backend: the unit C6 ultimately schedules.
#[derive(Clone, Debug)]
pub struct ExecutionBinding {
    pub platform: PlatformId,
    /// Which logical operator class this alternative implements, e.g.
    /// `"Filter"` or `"Join"`. Used by pruning's operator-group signature.
    pub logical_class: String,
    /// Per input-slot ordered list of channel descriptors this operator can
    /// consume; empty means "no preference, accept producer's default".
    pub input_channel_preferences: Vec<ChannelPreferences>,
    /// Per output-slot descriptor this operator emits.
    pub output_channel_descriptors: Vec<crate::channel::ChannelDescriptorId>,
    /// Configuration key used to look up this operator's load profile
    /// expression override, e.g. `rheem.spark.filter.load`.
    pub load_profile_key: Option<String>,
}

/// Convergence condition for a loop head: the loop continues while this
/// returns `true`. Kept abstract -- the core never evaluates user predicates,
/// only tracks the *declared* expected iteration count for cost purposes.
#[derive(Clone, Debug)]
pub enum ConvergenceCondition {
    /// Run exactly `n` times regardless of data (the common case).
    FixedCount(u64),
    /// Backend-evaluated predicate; `expected_iterations` is a planning-time
    /// estimate only, refined by measured cardinalities at runtime.
    UntilConverged { expected_iterations: u64 },
}

impl ConvergenceCondition {
    #[must_use]
    pub fn expected_iterations(&self) -> u64 {
        match self {
            Self::FixedCount(n) => *n,
            Self::UntilConverged { expected_iterations } => *expected_iterations,
        }
    }
}

/// A composite operator embeds a nested [`Plan`] and maps its own outer
/// slots onto slots of operators inside that nested plan. A loop is a
/// composite whose `loop_head` is set.
#[derive(Clone, Debug)]
pub struct Composite {
    pub inner: Plan,
    /// outer input slot index -> inner operator's input slot it feeds.
    pub outer_to_inner_inputs: Vec<InputRef>,
    /// outer output slot index -> inner operator's output slot it exposes.
    pub outer_to_inner_outputs: Vec<OutputRef>,
    pub loop_head: Option<ConvergenceCondition>,
}

/// The kind-specific payload of an [`Operator`].
#[derive(Clone, Debug)]
pub enum OperatorKind {
    Logical(LogicalKind),
    Execution(ExecutionBinding),
    Composite(Box<Composite>),
}

/// A node in the plan graph: input/output slots plus a kind-specific payload.
#[derive(Clone, Debug)]
pub struct Operator {
    pub id: OperatorId,
    /// Epoch in which this operator was introduced (0 for the user's
    /// original plan; incremented by each mapping rewrite round).
    pub epoch: u64,
    pub kind: OperatorKind,
    pub inputs: Vec<InputSlot>,
    pub outputs: Vec<OutputSlot>,
}

impl Operator {
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self.kind, OperatorKind::Logical(LogicalKind::Source))
            && self.inputs.is_empty()
    }

    #[must_use]
    pub fn platform(&self) -> Option<&PlatformId> {
        match &self.kind {
            OperatorKind::Execution(b) => Some(&b.platform),
            _ => None,
        }
    }
}

/// The plan graph: operator registry, directed slot connections, and the
/// declared sinks that define reachability for [`Plan::prune`].
#[derive(Clone, Debug)]
pub struct Plan {
    id: PlanId,
    operators: HashMap<OperatorId, Operator>,
    /// Insertion order of operators, preserved for stable tie-breaks
    /// downstream (C2's alternative ordering, C6's enumeration order).
    insertion_order: Vec<OperatorId>,
    next_id: u64,
    epoch: u64,
    sinks: Vec<OperatorId>,
    active_platforms: HashSet<PlatformId>,
    /// Reverse index: an OutputRef's consumers, rebuilt incrementally as
    /// connections are added.
    consumers: HashMap<OutputRef, Vec<InputRef>>,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            id: PlanId::new_unique(),
            operators: HashMap::new(),
            insertion_order: Vec::new(),
            next_id: 0,
            epoch: 0,
            sinks: Vec::new(),
            active_platforms: HashSet::new(),
            consumers: HashMap::new(),
        }
    }
}

impl Plan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// This plan's process-wide unique identity, distinct from the
    /// per-plan-scoped [`OperatorId`]s it assigns its operators. Used to key
    /// registries (e.g. [`crate::cardinality::CardinalityEngine`]'s
    /// estimator map) that must distinguish a composite's inner plan from
    /// its enclosing plan even when both allocate the same `OperatorId`s.
    #[must_use]
    pub fn id(&self) -> PlanId {
        self.id
    }

    /// Declare a platform as active. Execution operators bound to an
    /// inactive platform fail [`Plan::sane`].
    pub fn activate_platform(&mut self, platform: PlatformId) {
        self.active_platforms.insert(platform);
    }

    #[must_use]
    pub fn active_platforms(&self) -> &HashSet<PlatformId> {
        &self.active_platforms
    }

    #[must_use]
    pub fn current_epoch(&self) -> u64 {
        self.epoch
    }

    /// Begin a new rewrite epoch; operators added after this call are
    /// stamped with the new epoch number.
    pub fn advance_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Insert a new operator, returning its fresh [`OperatorId`].
    pub fn add_operator(
        &mut self,
        kind: OperatorKind,
        inputs: Vec<InputSlot>,
        outputs: Vec<OutputSlot>,
    ) -> OperatorId {
        let id = OperatorId::new(self.next_id);
        self.next_id += 1;
        let operator = Operator {
            id,
            epoch: self.epoch,
            kind,
            inputs,
            outputs,
        };
        self.operators.insert(id, operator);
        self.insertion_order.push(id);
        id
    }

    #[must_use]
    pub fn operator(&self, id: OperatorId) -> Option<&Operator> {
        self.operators.get(&id)
    }

    pub fn operator_mut(&mut self, id: OperatorId) -> Option<&mut Operator> {
        self.operators.get_mut(&id)
    }

    #[must_use]
    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.insertion_order.iter().filter_map(|id| self.operators.get(id))
    }

    #[must_use]
    pub fn insertion_index(&self, id: OperatorId) -> Option<usize> {
        self.insertion_order.iter().position(|&x| x == id)
    }

    pub fn declare_sink(&mut self, id: OperatorId) {
        if !self.sinks.contains(&id) {
            self.sinks.push(id);
        }
    }

    #[must_use]
    pub fn sinks(&self) -> &[OperatorId] {
        &self.sinks
    }

    /// Connect `output` to `input`. The input slot must currently be
    /// unconnected and the declared types must match exactly.
    ///
    /// # Errors
    /// Returns [`RheemError::PlanSanity`] if the input slot is already wired,
    /// or if the producer/consumer types disagree.
    pub fn connect(&mut self, output: OutputRef, input: InputRef) -> Result<(), RheemError> {
        let out_type = self
            .operators
            .get(&output.operator)
            .and_then(|op| op.outputs.get(output.slot.0 as usize))
            .ok_or_else(|| RheemError::plan_sanity(format!("unknown output slot {output:?}")))?
            .data_type
            .clone();

        let in_slot = self
            .operators
            .get_mut(&input.operator)
            .and_then(|op| op.inputs.get_mut(input.slot.0 as usize))
            .ok_or_else(|| RheemError::plan_sanity(format!("unknown input slot {input:?}")))?;

        if in_slot.connection.is_some() {
            return Err(RheemError::plan_sanity(format!(
                "input slot {input:?} already connected"
            )));
        }
        if in_slot.data_type != out_type {
            return Err(RheemError::plan_sanity(format!(
                "type mismatch connecting {output:?} ({out_type}) to {input:?} ({})",
                in_slot.data_type
            )));
        }
        in_slot.connection = Some(output);
        self.consumers.entry(output).or_default().push(input);
        Ok(())
    }

    /// All input slots currently fed by `output`.
    #[must_use]
    pub fn consumers_of(&self, output: OutputRef) -> &[InputRef] {
        self.consumers.get(&output).map_or(&[], Vec::as_slice)
    }

    /// The single producer feeding `input`, if connected.
    #[must_use]
    pub fn producer_of(&self, input: InputRef) -> Option<OutputRef> {
        self.operators
            .get(&input.operator)?
            .inputs
            .get(input.slot.0 as usize)?
            .connection
    }

    /// For a composite operator, the inner [`OutputRef`] its `outer_index`-th
    /// output slot traces to, so callers can descend into the nested plan.
    #[must_use]
    pub fn trace_output(&self, composite: OperatorId, outer_index: usize) -> Option<OutputRef> {
        match &self.operator(composite)?.kind {
            OperatorKind::Composite(c) => c.outer_to_inner_outputs.get(outer_index).copied(),
            _ => None,
        }
    }

    /// For a composite operator, the inner [`InputRef`] its `outer_index`-th
    /// input slot feeds.
    #[must_use]
    pub fn trace_input(&self, composite: OperatorId, outer_index: usize) -> Option<InputRef> {
        match &self.operator(composite)?.kind {
            OperatorKind::Composite(c) => c.outer_to_inner_inputs.get(outer_index).copied(),
            _ => None,
        }
    }

    /// Visit every operator upstream of `start` (inclusive), following
    /// connections backwards. Each operator is visited at most once.
    pub fn upstream(&self, start: OperatorId, mut visit: impl FnMut(&Operator)) {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(op) = self.operators.get(&id) else {
                continue;
            };
            visit(op);
            for input in &op.inputs {
                if let Some(out) = input.connection {
                    queue.push_back(out.operator);
                }
            }
        }
    }

    /// Visit every operator downstream of `start` (inclusive), following
    /// connections forwards. Each operator is visited at most once.
    pub fn downstream(&self, start: OperatorId, mut visit: impl FnMut(&Operator)) {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(op) = self.operators.get(&id) else {
                continue;
            };
            visit(op);
            for (slot_idx, _out) in op.outputs.iter().enumerate() {
                let out_ref = OutputRef {
                    operator: id,
                    slot: SlotIndex(slot_idx as u32),
                };
                for consumer in self.consumers_of(out_ref) {
                    queue.push_back(consumer.operator);
                }
            }
        }
    }

    /// The set of operators reachable from the declared sinks, walking
    /// upstream. This is exactly the set [`Plan::prune`] keeps.
    #[must_use]
    pub fn reachable_from_sinks(&self) -> HashSet<OperatorId> {
        let mut reachable = HashSet::new();
        for &sink in &self.sinks {
            self.upstream(sink, |op| {
                reachable.insert(op.id);
            });
        }
        reachable
    }

    /// Drop every operator not reachable from a declared sink.
    pub fn prune(&mut self) {
        let keep = self.reachable_from_sinks();
        self.operators.retain(|id, _| keep.contains(id));
        self.insertion_order.retain(|id| keep.contains(id));
        self.consumers
            .retain(|out, _| keep.contains(&out.operator));
        for consumers in self.consumers.values_mut() {
            consumers.retain(|input| keep.contains(&input.operator));
        }
    }

    /// Structural sanity check: every required input is connected, every
    /// execution operator's platform is active, every composite traces to
    /// real inner slots, and the graph has no cycle outside a loop head.
    ///
    /// # Errors
    /// Returns the first [`RheemError::PlanSanity`] violation found.
    pub fn sane(&self) -> Result<(), RheemError> {
        if self.sinks.is_empty() {
            return Err(RheemError::plan_sanity("plan has no declared sinks"));
        }

        let reachable = self.reachable_from_sinks();
        for &id in &reachable {
            let op = self
                .operators
                .get(&id)
                .ok_or_else(|| RheemError::plan_sanity(format!("dangling operator id {id}")))?;

            for (idx, input) in op.inputs.iter().enumerate() {
                if input.required && input.connection.is_none() {
                    return Err(RheemError::plan_sanity(format!(
                        "operator {id} ({}) has unconnected required input {idx}",
                        kind_name(&op.kind)
                    )));
                }
            }

            match &op.kind {
                OperatorKind::Execution(binding) => {
                    if !self.active_platforms.contains(&binding.platform) {
                        return Err(RheemError::plan_sanity(format!(
                            "operator {id} is bound to inactive platform '{}'",
                            binding.platform
                        )));
                    }
                }
                OperatorKind::Composite(composite) => {
                    if composite.outer_to_inner_inputs.len() != op.inputs.len()
                        || composite.outer_to_inner_outputs.len() != op.outputs.len()
                    {
                        return Err(RheemError::plan_sanity(format!(
                            "composite {id} outer/inner slot arity mismatch"
                        )));
                    }
                    for inner_in in &composite.outer_to_inner_inputs {
                        if composite.inner.operator(inner_in.operator).is_none() {
                            return Err(RheemError::plan_sanity(format!(
                                "composite {id} traces to unknown inner operator {}",
                                inner_in.operator
                            )));
                        }
                    }
                    composite.inner.sane().map_err(|e| {
                        RheemError::plan_sanity(format!("composite {id} inner plan: {e}"))
                    })?;
                }
                OperatorKind::Logical(_) => {}
            }
        }

        self.check_acyclic(&reachable)?;
        Ok(())
    }

    /// Cycles are only legal through a loop-head composite, which owns its
    /// recurrence internally; at the outer-graph level the connection graph
    /// restricted to non-composite operators (loop composites are opaque
    /// single nodes here) must be a DAG.
    fn check_acyclic(&self, reachable: &HashSet<OperatorId>) -> Result<(), RheemError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<OperatorId, Mark> = HashMap::new();

        fn visit(
            plan: &Plan,
            id: OperatorId,
            reachable: &HashSet<OperatorId>,
            marks: &mut HashMap<OperatorId, Mark>,
        ) -> Result<(), RheemError> {
            match marks.get(&id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(RheemError::plan_sanity(format!(
                        "cycle detected through operator {id} outside a loop head"
                    )));
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(op) = plan.operators.get(&id) {
                for input in &op.inputs {
                    if let Some(out) = input.connection {
                        if reachable.contains(&out.operator) {
                            visit(plan, out.operator, reachable, marks)?;
                        }
                    }
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for &id in reachable {
            visit(self, id, reachable, &mut marks)?;
        }
        Ok(())
    }
}

fn kind_name(kind: &OperatorKind) -> String {
    match kind {
        OperatorKind::Logical(l) => l.to_string(),
        OperatorKind::Execution(e) => format!("{}@{}", e.logical_class, e.platform),
        OperatorKind::Composite(_) => "Composite".to_string(),
    }
}

/// A read-only traversal over a [`Plan`] that stops at loop-composite
/// boundaries unless explicitly asked to descend, matching the "walk the
/// outer plan without falling into every nested loop body" access pattern
/// C3's push traversal and C7's stage splitter both need.
pub struct PlanTraversal<'a> {
    plan: &'a Plan,
    descend_into_loops: bool,
}

impl<'a> PlanTraversal<'a> {
    #[must_use]
    pub fn new(plan: &'a Plan) -> Self {
        Self {
            plan,
            descend_into_loops: false,
        }
    }

    #[must_use]
    pub fn descending(mut self, descend: bool) -> Self {
        self.descend_into_loops = descend;
        self
    }

    /// Visit operators downstream of `start` in breadth-first order. A loop
    /// composite is visited itself but not descended into unless
    /// `descend_into_loops` is set.
    pub fn walk_downstream(&self, start: OperatorId, mut visit: impl FnMut(&Operator)) {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(op) = self.plan.operators.get(&id) else {
                continue;
            };
            visit(op);

            let is_loop = matches!(
                &op.kind,
                OperatorKind::Composite(c) if c.loop_head.is_some()
            );
            if is_loop && !self.descend_into_loops {
                continue;
            }

            for (slot_idx, _) in op.outputs.iter().enumerate() {
                let out_ref = OutputRef {
                    operator: id,
                    slot: SlotIndex(slot_idx as u32),
                };
                for consumer in self.plan.consumers_of(out_ref) {
                    queue.push_back(consumer.operator);
                }
            }
        }
    }
}
