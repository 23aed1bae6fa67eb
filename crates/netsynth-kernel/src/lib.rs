//! netsynth kernel
//!
//! Turns requirement descriptors into a network of task instances and keeps
//! that network minimal.
//!
//! # Core Concepts
//!
//! - [`Plan`]: task instances, parent/child relations and the dataflow graph
//! - [`DataflowGraph`]: port-to-port connections with forwarding composites
//! - [`NetworkInstantiator`]: expands one descriptor under a selection context
//! - [`MergeSolver`]: folds equivalent tasks into one
//! - [`NetworkResolver`]: transactional batch of instantiation plus merging
//!
//! # Example
//!
//! ```rust,ignore
//! use netsynth_kernel::{NetworkResolver, Plan};
//! use netsynth_model::{InstanceRequirements, SelectionContext};
//!
//! let mut plan = Plan::new();
//! let requirements = InstanceRequirements::from_models(&registry, ["Pipeline"])?;
//! let report = NetworkResolver::new(&registry)
//!     .resolve(&mut plan, &[requirements], &SelectionContext::new())?;
//! println!("root task: {}", report.roots[0]);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod dataflow;
pub mod error;
pub mod instantiate;
pub mod merge;
pub mod plan;
pub mod resolver;
/// Fixtures, scenarios and stress runs shared by tests, benches and the CLI
pub mod test_harness;

pub use config::{ConfigError, ResolverConfig};
pub use dataflow::{
    ConcreteConnection, ConcreteConnectionGraph, Connection, ConnectionMap, ConnectionView,
    DataflowGraph, PortPair,
};
pub use error::{DataflowError, ErrorKind, PlanError, ResolutionError};
pub use instantiate::NetworkInstantiator;
pub use merge::{MergeRejection, MergeReport, MergeSolver, Mergeability};
pub use plan::{Plan, PlanId, PlanTransaction, TaskInstance};
pub use resolver::{NetworkResolver, ResolutionReport};

/// Re-export test harness for external use
pub use test_harness::{StressTestReport, TestHarness};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
