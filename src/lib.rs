//! # Rheem
//!
//! A **cross-platform cost-based optimizer and execution driver** for
//! multi-backend dataflow plans, in the spirit of Apache Wayang/Rheem: a
//! caller builds a [`plan::Plan`] out of platform-agnostic logical
//! operators, Rheem rewrites it into a [`mapping::Hyperplan`] of candidate
//! execution bindings, estimates cardinalities and costs, enumerates and
//! picks the cheapest wiring, and drives it to completion against whatever
//! backends the caller registered -- re-optimizing live when measured
//! cardinalities diverge from the plan-time estimate.
//!
//! Rheem never materializes data itself. Everything past "which operator
//! runs where, wired through which channels" is the caller's concern,
//! expressed through the [`backend`] module's traits.
//!
//! ## Core Concepts
//!
//! - [`plan`] -- the plan graph: operators, typed slots, directed
//!   connections (C1).
//! - [`mapping`] -- pattern-based rewrites from logical operators to
//!   execution-operator alternatives (C2).
//! - [`cardinality`] -- push-traversal cardinality estimation with
//!   confidence (C3).
//! - [`interval`] -- the probabilistic interval arithmetic C3/C4 build on.
//! - [`cost`] -- the load-profile -> time -> cost estimator stack (C4).
//! - [`expr`] -- the small expression language load profiles are written in.
//! - [`channel`] -- the channel-conversion graph and its shortest-path
//!   search (C5).
//! - [`enumerator`] -- beam-search enumeration over the hyperplan, picking
//!   the cheapest [`enumerator::PlanImplementation`] (C6).
//! - [`driver`] -- stage-splitting, execution, breakpoints, and
//!   re-optimization (C7).
//! - [`learner`] -- genetic-algorithm fitting of cost-model coefficients
//!   from execution logs (C8).
//! - [`backend`] -- the contract an external execution engine implements to
//!   plug into Rheem.
//! - [`config`] -- the flat, typed-accessor configuration map (spec §6).
//! - [`error`] -- the closed [`error::RheemError`] enum.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rheem::plan::{Plan, OperatorKind, LogicalKind, InputSlot, OutputSlot, DataType};
//! use rheem::ids::{PlatformId, OutputRef, InputRef, SlotIndex};
//! use rheem::mapping::MappingRegistry;
//!
//! # fn main() -> anyhow::Result<()> {
//! let int_type = DataType::new("i64");
//! let mut plan = Plan::new();
//! plan.activate_platform(PlatformId::new("local"));
//!
//! let source = plan.add_operator(
//!     OperatorKind::Logical(LogicalKind::Source),
//!     vec![],
//!     vec![OutputSlot { data_type: int_type.clone() }],
//! );
//! let map = plan.add_operator(
//!     OperatorKind::Logical(LogicalKind::Map),
//!     vec![InputSlot::required(int_type)],
//!     vec![OutputSlot { data_type: rheem::plan::DataType::new("i64") }],
//! );
//! plan.connect(
//!     OutputRef { operator: source, slot: SlotIndex(0) },
//!     InputRef { operator: map, slot: SlotIndex(0) },
//! )?;
//! plan.declare_sink(map);
//!
//! // Rewrite into a hyperplan, estimate, enumerate, and drive from here --
//! // see the `mapping`, `cardinality`, `enumerator`, and `driver` modules.
//! let _hyperplan = MappingRegistry::new().apply(plan)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cardinality;
pub mod channel;
pub mod config;
pub mod cost;
pub mod driver;
pub mod enumerator;
pub mod error;
pub mod expr;
pub mod ids;
pub mod interval;
pub mod io;
pub mod learner;
pub mod mapping;
pub mod metrics;
pub mod plan;

pub use backend::{ChannelInstance, ExecutionOperator, ExecutionTask, Executor, PartialExecution, Platform, PlatformRegistry};
pub use cardinality::{CardinalityEngine, CardinalityEstimator, OptimizationContext};
pub use channel::{ChannelDescriptor, ChannelDescriptorId, ChannelGraph, Junction};
pub use cost::{CostEstimate, LoadProfile, LoadProfileEstimator, LoadProfileToTimeConverter, TimeToCostConverter};
pub use driver::{BreakpointPolicy, DriverOutcome, ExecutionDriver, ExecutionTaskFlow};
pub use enumerator::{EnumerationConfig, ExecutionExplanation, PlanEnumerator, PlanImplementation};
pub use error::RheemError;
pub use ids::{InputRef, OperatorId, OutputRef, PlatformId, SlotIndex};
pub use interval::{CardinalityEstimate, ProbabilisticDoubleInterval};
pub use learner::Learner;
pub use mapping::{ExecutionAlternative, Hyperplan, Mapping, MappingRegistry};
pub use metrics::MetricsCollector;
pub use plan::{DataType, Operator, OperatorKind, Plan};
