//! Channel graph (C5): inter-backend conversion search.
//!
//! Channel descriptors are vertices, conversions are directed edges; finding
//! the cheapest bridge between a producer's emittable descriptors and a
//! consumer's acceptable descriptors is exactly shortest-path search, so it
//! is implemented the way the teacher crate implements its other
//! heap-driven algorithms (`combiners::TopK`, `combiners::KMVApproxDistinctCount`):
//! a hand-rolled `BinaryHeap` loop rather than a graph-library dependency.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use ordered_float::OrderedFloat;

use crate::cost::CostEstimate;
use crate::ids::{InputRef, OutputRef, PlatformId};

/// Identity of a channel descriptor, e.g. `"local.vec"` or `"spark.rdd"`.
/// Interned as a plain string rather than an enum -- like [`PlatformId`],
/// backends register their own descriptors at startup.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ChannelDescriptorId(pub String);

impl ChannelDescriptorId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for ChannelDescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability flags for a channel descriptor.
#[derive(Clone, Debug)]
pub struct ChannelDescriptor {
    pub id: ChannelDescriptorId,
    pub platform: PlatformId,
    /// A reusable channel may be read by more than one consumer without
    /// re-materializing (required for broadcast inputs).
    pub reusable: bool,
    /// An internal channel never crosses a backend boundary (e.g. an
    /// in-memory handoff between two operators both on the same engine).
    pub internal: bool,
    pub supports_broadcast: bool,
}

/// A unary conversion operator bridging two descriptors, with its own
/// load-derived cost. The channel graph treats this purely as a weighted
/// edge; actually running it is a backend's job.
#[derive(Clone, Debug)]
pub struct ChannelConversion {
    pub from: ChannelDescriptorId,
    pub to: ChannelDescriptorId,
    pub platform: PlatformId,
    pub cost: CostEstimate,
}

/// The resolved bridge between one producer output and one or more consumer
/// inputs: a (possibly empty) chain of conversions plus the combined cost.
#[derive(Clone, Debug)]
pub struct Junction {
    pub producer: OutputRef,
    pub consumers: Vec<InputRef>,
    /// Descriptor chain actually taken, including the starting (producer)
    /// descriptor and the final (consumer-accepted) descriptor.
    pub path: Vec<ChannelDescriptorId>,
    pub cost: CostEstimate,
}

/// Registry of descriptors and the conversions between them, plus the
/// shortest-path search used to resolve a [`Junction`].
#[derive(Clone, Default)]
pub struct ChannelGraph {
    descriptors: HashMap<ChannelDescriptorId, ChannelDescriptor>,
    conversions: Vec<ChannelConversion>,
}

impl ChannelGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_descriptor(&mut self, descriptor: ChannelDescriptor) {
        self.descriptors.insert(descriptor.id.clone(), descriptor);
    }

    pub fn register_conversion(&mut self, conversion: ChannelConversion) {
        self.conversions.push(conversion);
    }

    #[must_use]
    pub fn descriptor(&self, id: &ChannelDescriptorId) -> Option<&ChannelDescriptor> {
        self.descriptors.get(id)
    }

    /// Find the cheapest sequence of conversions from any descriptor in
    /// `from` to any descriptor in `to`, restricted to `active_platforms`.
    /// If `broadcast` is set, every descriptor visited (including the
    /// endpoints) must be flagged `reusable`.
    ///
    /// Returns `None` if no path exists -- the caller surfaces this as
    /// [`crate::error::RheemError::NoViablePlan`].
    #[must_use]
    pub fn cheapest_path(
        &self,
        from: &[ChannelDescriptorId],
        to: &HashSet<ChannelDescriptorId>,
        active_platforms: &HashSet<PlatformId>,
        broadcast: bool,
    ) -> Option<(Vec<ChannelDescriptorId>, CostEstimate)> {
        #[derive(Clone)]
        struct HeapEntry {
            cost_midpoint: OrderedFloat<f64>,
            node: ChannelDescriptorId,
        }
        impl PartialEq for HeapEntry {
            fn eq(&self, other: &Self) -> bool {
                self.cost_midpoint == other.cost_midpoint
            }
        }
        impl Eq for HeapEntry {}
        impl PartialOrd for HeapEntry {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for HeapEntry {
            fn cmp(&self, other: &Self) -> Ordering {
                // BinaryHeap is a max-heap; reverse so the cheapest node pops first.
                other.cost_midpoint.cmp(&self.cost_midpoint)
            }
        }

        let reusable_ok = |id: &ChannelDescriptorId| -> bool {
            !broadcast || self.descriptors.get(id).is_some_and(|d| d.reusable)
        };

        let mut best_cost: HashMap<ChannelDescriptorId, f64> = HashMap::new();
        let mut best_path: HashMap<ChannelDescriptorId, Vec<ChannelDescriptorId>> = HashMap::new();
        let mut best_estimate: HashMap<ChannelDescriptorId, CostEstimate> = HashMap::new();
        let mut heap = BinaryHeap::new();

        for start in from {
            if !reusable_ok(start) {
                continue;
            }
            let zero = CostEstimate::exact(0.0);
            best_cost.insert(start.clone(), 0.0);
            best_path.insert(start.clone(), vec![start.clone()]);
            best_estimate.insert(start.clone(), zero);
            heap.push(HeapEntry {
                cost_midpoint: OrderedFloat(0.0),
                node: start.clone(),
            });
        }

        while let Some(HeapEntry { cost_midpoint, node }) = heap.pop() {
            if to.contains(&node) {
                let path = best_path.get(&node).cloned().unwrap_or_default();
                let est = best_estimate.get(&node).copied().unwrap_or(CostEstimate::exact(0.0));
                return Some((path, est));
            }
            if best_cost.get(&node).copied().unwrap_or(f64::INFINITY) < cost_midpoint.0 {
                continue;
            }
            for edge in &self.conversions {
                if &edge.from != &node {
                    continue;
                }
                if !active_platforms.contains(&edge.platform) {
                    continue;
                }
                if !reusable_ok(&edge.to) {
                    continue;
                }
                let candidate_est = best_estimate[&node].add(&edge.cost);
                let candidate_cost = candidate_est.midpoint();
                let existing = best_cost.get(&edge.to).copied().unwrap_or(f64::INFINITY);
                if candidate_cost < existing {
                    best_cost.insert(edge.to.clone(), candidate_cost);
                    best_estimate.insert(edge.to.clone(), candidate_est);
                    let mut path = best_path[&node].clone();
                    path.push(edge.to.clone());
                    best_path.insert(edge.to.clone(), path);
                    heap.push(HeapEntry {
                        cost_midpoint: OrderedFloat(candidate_cost),
                        node: edge.to.clone(),
                    });
                }
            }
        }
        None
    }

    /// Resolve a full [`Junction`] from one producer output to one or more
    /// consumer inputs sharing the same accepted-descriptor set (the usual
    /// broadcast/fan-out case: every consumer of a shared output must accept
    /// descriptors reachable by the same conversion chain).
    #[must_use]
    pub fn resolve_junction(
        &self,
        producer: OutputRef,
        emittable: &[ChannelDescriptorId],
        consumers: Vec<InputRef>,
        acceptable: &HashSet<ChannelDescriptorId>,
        active_platforms: &HashSet<PlatformId>,
        broadcast: bool,
    ) -> Option<Junction> {
        let (path, cost) = self.cheapest_path(emittable, acceptable, active_platforms, broadcast)?;
        Some(Junction {
            producer,
            consumers,
            path,
            cost,
        })
    }
}
