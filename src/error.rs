//! Closed error taxonomy for the optimizer and execution driver.
//!
//! The crate follows the teacher's convention of propagating `anyhow::Result`
//! at call boundaries (see `validation.rs`, `io.rs` in the example pack) while
//! keeping a small, closed enum of *kinds* for the handful of error
//! conditions that callers may want to match on. [`RheemError`] plays the
//! same role here that `validation::ValidationError` plays for record
//! validation: a plain struct-like enum with a hand-written `Display` and
//! `std::error::Error` impl, never `thiserror`.

use std::fmt;

/// The closed set of error kinds a caller may need to distinguish.
#[derive(Debug, Clone)]
pub enum RheemError {
    /// A configuration key was present but held a value of the wrong shape,
    /// or a required key was absent.
    Configuration { key: String, message: String },
    /// A plan failed a sanity check (dangling slot, cycle outside a loop
    /// operator, mismatched cardinality of inputs/outputs).
    PlanSanity { detail: String },
    /// The enumerator produced an empty `PlanEnumeration` for some
    /// subplan: no combination of operator alternatives and channel
    /// conversions could satisfy every operator's platform constraints.
    NoViablePlan { subplan: String },
    /// A backend `Executor` reported a failure while running a stage.
    BackendExecution { platform: String, message: String },
    /// Reading or writing the line-delimited execution log failed.
    LogIo { path: String, message: String },
}

impl fmt::Display for RheemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { key, message } => {
                write!(f, "configuration error for '{key}': {message}")
            }
            Self::PlanSanity { detail } => write!(f, "plan failed sanity check: {detail}"),
            Self::NoViablePlan { subplan } => {
                write!(f, "no viable plan for subplan '{subplan}'")
            }
            Self::BackendExecution { platform, message } => {
                write!(f, "execution failed on platform '{platform}': {message}")
            }
            Self::LogIo { path, message } => {
                write!(f, "execution log I/O error at '{path}': {message}")
            }
        }
    }
}

impl std::error::Error for RheemError {}

impl RheemError {
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn plan_sanity(detail: impl Into<String>) -> Self {
        Self::PlanSanity {
            detail: detail.into(),
        }
    }

    pub fn no_viable_plan(subplan: impl Into<String>) -> Self {
        Self::NoViablePlan {
            subplan: subplan.into(),
        }
    }

    pub fn backend_execution(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendExecution {
            platform: platform.into(),
            message: message.into(),
        }
    }

    pub fn log_io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LogIo {
            path: path.into(),
            message: message.into(),
        }
    }
}
