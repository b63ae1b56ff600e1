//! Mapping registry (C2): pattern-based rewrites from logical operators to
//! execution-operator alternatives, producing a hyperplan.
//!
//! A hyperplan does not wire execution alternatives into the logical plan's
//! own connection graph -- two alternatives for the same logical operator
//! would both need the same input slot, which [`crate::plan::Plan::connect`]
//! forbids by construction (an input slot has at most one incoming
//! connection). Instead each logical operator keeps a side list of
//! candidate [`ExecutionAlternative`]s; [`crate::enumerator`] is the
//! component that eventually commits to exactly one per operator and wires
//! it for real.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::ids::OperatorId;
use crate::plan::{ExecutionBinding, Operator, Plan};

/// A type + arity predicate over a single operator. Kept as a closure rather
/// than a fixed enum of match kinds so mappings can express arbitrary
/// conditions (e.g. "a `Map` whose input type is `i64`").
pub struct OperatorPattern {
    pub predicate: Arc<dyn Fn(&Operator) -> bool + Send + Sync>,
}

impl OperatorPattern {
    #[must_use]
    pub fn new(predicate: impl Fn(&Operator) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    #[must_use]
    pub fn matches(&self, op: &Operator) -> bool {
        (self.predicate)(op)
    }
}

/// A connectivity constraint internal to a [`SubplanPattern`]: the
/// `producer`'s output slot `output_index` must already feed the
/// `consumer`'s input slot `input_index`.
pub struct PatternEdge {
    pub producer: String,
    pub output_index: usize,
    pub consumer: String,
    pub input_index: usize,
}

/// A connected set of operators matched by name. `root` names the capture
/// that the resulting execution alternatives attach to (the logical
/// operator whose hyperplan entry receives the new alternatives); for the
/// common single-operator rewrite, `root` is the pattern's only capture.
pub struct SubplanPattern {
    pub captures: Vec<(String, OperatorPattern)>,
    pub edges: Vec<PatternEdge>,
    pub root: String,
}

impl SubplanPattern {
    /// The common case: match one logical operator by predicate.
    #[must_use]
    pub fn single(name: &str, predicate: impl Fn(&Operator) -> bool + Send + Sync + 'static) -> Self {
        Self {
            captures: vec![(name.to_string(), OperatorPattern::new(predicate))],
            edges: vec![],
            root: name.to_string(),
        }
    }

    /// Find every match of this pattern in `plan`. A match is *local*: it is
    /// exactly the set of named captures plus the declared internal edges,
    /// with no further overlap asserted beyond those edges.
    #[must_use]
    pub fn find_matches(&self, plan: &Plan) -> Vec<HashMap<String, OperatorId>> {
        let candidates: Vec<(String, Vec<OperatorId>)> = self
            .captures
            .iter()
            .map(|(name, pattern)| {
                let ids: Vec<OperatorId> = plan
                    .operators()
                    .filter(|op| pattern.matches(op))
                    .map(|op| op.id)
                    .collect();
                (name.clone(), ids)
            })
            .collect();

        let mut results = Vec::new();
        self.backtrack(plan, &candidates, 0, &mut HashMap::new(), &mut results);
        results
    }

    fn backtrack(
        &self,
        plan: &Plan,
        candidates: &[(String, Vec<OperatorId>)],
        index: usize,
        partial: &mut HashMap<String, OperatorId>,
        results: &mut Vec<HashMap<String, OperatorId>>,
    ) {
        if index == candidates.len() {
            if self.edges_satisfied(plan, partial) {
                results.push(partial.clone());
            }
            return;
        }
        let (name, ids) = &candidates[index];
        for &id in ids {
            if partial.values().any(|&v| v == id) {
                continue;
            }
            partial.insert(name.clone(), id);
            self.backtrack(plan, candidates, index + 1, partial, results);
            partial.remove(name);
        }
    }

    fn edges_satisfied(&self, plan: &Plan, captures: &HashMap<String, OperatorId>) -> bool {
        self.edges.iter().all(|edge| {
            let (Some(&producer), Some(&consumer)) =
                (captures.get(&edge.producer), captures.get(&edge.consumer))
            else {
                return false;
            };
            plan.producer_of(crate::ids::InputRef {
                operator: consumer,
                slot: crate::ids::SlotIndex(edge.input_index as u32),
            })
            .is_some_and(|out| out.operator == producer && out.slot.0 as usize == edge.output_index)
        })
    }
}

/// Produces execution-operator alternatives for a matched subplan.
pub trait ReplacementFactory: Send + Sync {
    /// Build zero or more alternatives for the captured match. Returning zero
    /// alternatives means this factory declines for this particular match
    /// (e.g. a platform-specific rewrite that only fires for certain types).
    ///
    /// # Errors
    /// Returns an error if the factory cannot construct a binding for a
    /// structurally valid match (a genuinely exceptional condition, not a
    /// normal "this rewrite doesn't apply here").
    fn build(&self, captures: &HashMap<String, OperatorId>, plan: &Plan) -> Result<Vec<ExecutionBinding>>;
}

/// `(SubplanPattern, ReplacementFactory, targetPlatforms?)` from spec §4.2.
pub struct PlanTransformation {
    pub pattern: SubplanPattern,
    pub factory: Arc<dyn ReplacementFactory>,
    /// If set, this transformation is skipped entirely unless at least one of
    /// these platforms is active in the plan.
    pub target_platforms: Option<Vec<crate::ids::PlatformId>>,
}

/// A `Mapping` groups one or more related [`PlanTransformation`]s, the way a
/// single backend adapter might register "map, filter, and join all lower to
/// this platform" as one unit.
pub trait Mapping: Send + Sync {
    fn name(&self) -> &str;
    fn transformations(&self) -> Vec<PlanTransformation>;
}

/// One candidate execution-operator binding for a logical operator, minted
/// with its own id from the hyperplan's id space (distinct from the
/// logical plan's, since alternatives are never inserted into it).
#[derive(Clone, Debug)]
pub struct ExecutionAlternative {
    pub id: OperatorId,
    pub epoch: u64,
    pub binding: ExecutionBinding,
}

/// Plan graph enriched with operator alternatives (spec's "hyperplan"): the
/// original logical plan is untouched; each logical operator with at least
/// one matched rewrite owns an insertion-ordered, deduplicated list of
/// alternatives.
pub struct Hyperplan {
    pub logical_plan: Plan,
    alternatives: HashMap<OperatorId, Vec<ExecutionAlternative>>,
    next_alternative_id: u64,
}

impl Hyperplan {
    #[must_use]
    pub fn new(logical_plan: Plan) -> Self {
        Self {
            logical_plan,
            alternatives: HashMap::new(),
            next_alternative_id: 1_000_000_000,
        }
    }

    #[must_use]
    pub fn alternatives_for(&self, logical: OperatorId) -> &[ExecutionAlternative] {
        self.alternatives.get(&logical).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn operators_with_alternatives(&self) -> Vec<OperatorId> {
        let mut ids: Vec<OperatorId> = self.alternatives.keys().copied().collect();
        ids.sort_by_key(|id| id.raw());
        ids
    }

    /// Insert a new alternative for `logical`, deduplicating by
    /// (platform, execution-operator-class) and preserving insertion order,
    /// exactly as spec §4.2 mandates.
    fn insert_alternative(&mut self, logical: OperatorId, epoch: u64, binding: ExecutionBinding) {
        let bucket = self.alternatives.entry(logical).or_default();
        let duplicate = bucket
            .iter()
            .any(|existing| existing.binding.platform == binding.platform && existing.binding.logical_class == binding.logical_class);
        if duplicate {
            return;
        }
        let id = OperatorId::new(self.next_alternative_id);
        self.next_alternative_id += 1;
        bucket.push(ExecutionAlternative { id, epoch, binding });
    }
}

/// Holds registered [`Mapping`]s and applies their transformations to build
/// a [`Hyperplan`] from a logical [`Plan`].
#[derive(Default)]
pub struct MappingRegistry {
    mappings: Vec<Arc<dyn Mapping>>,
}

impl MappingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mapping: Arc<dyn Mapping>) {
        self.mappings.push(mapping);
    }

    /// Apply every registered mapping's transformations to `plan`, in
    /// registration order, each in its own rewrite epoch.
    ///
    /// # Errors
    /// Propagates the first [`ReplacementFactory::build`] error encountered.
    /// A transformation that simply doesn't match anything is not an error.
    pub fn apply(&self, plan: Plan) -> Result<Hyperplan> {
        let mut hyperplan = Hyperplan::new(plan);

        for mapping in &self.mappings {
            for transformation in mapping.transformations() {
                if let Some(targets) = &transformation.target_platforms {
                    let active = hyperplan.logical_plan.active_platforms();
                    if !targets.iter().any(|p| active.contains(p)) {
                        continue;
                    }
                }

                let epoch = hyperplan.logical_plan.advance_epoch();
                let matches = transformation.pattern.find_matches(&hyperplan.logical_plan);
                for captures in matches {
                    let Some(&root_id) = captures.get(&transformation.pattern.root) else {
                        continue;
                    };
                    let bindings = transformation
                        .factory
                        .build(&captures, &hyperplan.logical_plan)?;
                    for binding in bindings {
                        hyperplan.insert_alternative(root_id, epoch, binding);
                    }
                }
            }
        }

        Ok(hyperplan)
    }
}
