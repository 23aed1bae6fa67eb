//! netsynth model layer
//!
//! Everything a requirement graph is made of before it becomes a network:
//! component and ability models, the dependency-injection tables that select
//! implementations for them, and the requirement descriptors that tie both
//! together.
//!
//! # Core Concepts
//!
//! - [`ModelRegistry`]: registry of component, composition and data service models
//! - [`SelectionTable`]: one level of dependency-injection selections
//! - [`SelectionContext`]: stack of selection tables with innermost-wins lookup
//! - [`InstanceRequirements`]: the unit of specification handed to instantiation
//! - [`ConnectionPolicy`]: connection parameters and their merge rule
//!
//! # Example
//!
//! ```rust,ignore
//! use netsynth_model::{ComponentModel, InstanceRequirements, ModelRegistry};
//! use netsynth_model::{Selection, SelectionContext, SelectionKey, SelectionTable};
//!
//! let mut registry = ModelRegistry::new();
//! registry.register_component(ComponentModel::component("Producer").output("out", "/double"))?;
//!
//! let mut table = SelectionTable::new();
//! table.select(SelectionKey::role("source"), Selection::component("Producer"))?;
//! let context = SelectionContext::from_table(table);
//!
//! let requirements = InstanceRequirements::from_models(&registry, ["Producer"])?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod context;
mod error;
mod model;
mod policy;
mod registry;
mod requirements;
mod selection;
mod types;

pub use context::{ScopeHandle, SelectionContext};
pub use error::{ModelError, PolicyError, SelectionError};
pub use model::{
    BoundService, ChildConnection, ChildSpec, ComponentModel, DataServiceModel, DynamicPortSpec,
    ModelKind, PortExport, PortSpec, Specialization,
};
pub use policy::{merge_policy_chain, ConnectionPolicy, LockPolicy, TransportKind};
pub use registry::ModelRegistry;
pub use requirements::{ChildRef, InstanceRequirements, PortRef, ServiceRef};
pub use selection::{Selection, SelectionEntry, SelectionKey, SelectionTable};
pub use types::{PortDirection, TaskId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
