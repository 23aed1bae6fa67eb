//! Plan: the graph of record for task instances
//!
//! A [`Plan`] owns every [`TaskInstance`], the parent/child relation between
//! composites and their children, and the [`DataflowGraph`]. It is the only
//! place tasks are created and destroyed.
//!
//! # Transactions
//!
//! [`Plan::transaction`] stages work on a copy of the plan. The copy is
//! written back on [`PlanTransaction::commit`]; dropping the transaction
//! without committing leaves the base plan untouched.
//!
//! ```rust,ignore
//! let mut trsc = plan.transaction();
//! let task = instantiator.instantiate(&requirements, &mut trsc, &context)?;
//! trsc.commit();
//! ```

use crate::dataflow::DataflowGraph;
use crate::error::{DataflowError, PlanError};
use netsynth_model::{
    BoundService, ConnectionPolicy, InstanceRequirements, ModelRegistry, PortDirection, PortSpec,
    TaskId,
};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use uuid::Uuid;

/// Unique identifier of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(pub Uuid);

impl PlanId {
    /// Fresh random identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task instance in the plan
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInstance {
    /// Identifier, assigned by [`Plan::add_task`]
    pub id: TaskId,
    /// Model name (an ability for abstract placeholders)
    pub model: String,
    /// Bound arguments
    pub arguments: BTreeMap<String, Value>,
    /// Ports instantiated from dynamic port families
    pub dynamic_ports: BTreeMap<String, PortSpec>,
    /// Requirements the task was created for, before selection
    pub requirements: InstanceRequirements,
    /// Models this task is required to fulfill
    pub fulfilled: BTreeSet<String>,
    /// Bound service the task was selected through
    pub selected_service: Option<BoundService>,
    /// Deployment preferences
    pub deployment_hints: BTreeSet<String>,
    /// Abstract placeholder
    pub is_abstract: bool,
    /// Composite (forwarding) task
    pub is_composition: bool,
    /// Tasks merged into this one
    pub merged_from: Vec<TaskId>,
}

impl TaskInstance {
    /// Instance of `model` with no arguments
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: TaskId(0),
            model: model.into(),
            arguments: BTreeMap::new(),
            dynamic_ports: BTreeMap::new(),
            requirements: InstanceRequirements::new(),
            fulfilled: BTreeSet::new(),
            selected_service: None,
            deployment_hints: BTreeSet::new(),
            is_abstract: false,
            is_composition: false,
            merged_from: Vec::new(),
        }
    }

    /// Bind arguments
    #[must_use]
    pub fn with_arguments(mut self, arguments: BTreeMap<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Attach the requirements the task was created for
    #[must_use]
    pub fn with_requirements(mut self, requirements: InstanceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Record the models the task must fulfill
    #[must_use]
    pub fn with_fulfilled(mut self, fulfilled: BTreeSet<String>) -> Self {
        self.fulfilled = fulfilled;
        self
    }

    /// Record the service the task was selected through
    #[must_use]
    pub fn with_service(mut self, service: Option<BoundService>) -> Self {
        self.selected_service = service;
        self
    }

    /// Mark as abstract placeholder
    #[must_use]
    pub fn abstract_task(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    /// Mark as composite
    #[must_use]
    pub fn composition(mut self, is_composition: bool) -> Self {
        self.is_composition = is_composition;
        self
    }
}

/// Graph of record
#[derive(Debug, Clone)]
pub struct Plan {
    id: PlanId,
    tasks: BTreeMap<TaskId, TaskInstance>,
    next_id: u64,
    dependencies: DiGraphMap<TaskId, BTreeSet<String>>,
    dataflow: DataflowGraph,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl Plan {
    /// Empty plan
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: PlanId::new(),
            tasks: BTreeMap::new(),
            next_id: 1,
            dependencies: DiGraphMap::new(),
            dataflow: DataflowGraph::new(),
        }
    }

    /// Plan identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> PlanId {
        self.id
    }

    /// Insert a task, assigning its id
    pub fn add_task(&mut self, mut task: TaskInstance) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        task.id = id;
        self.dataflow.add_task(id, task.is_composition);
        self.dependencies.add_node(id);
        self.tasks.insert(id, task);
        id
    }

    /// Look up a task
    ///
    /// # Errors
    /// [`PlanError::UnknownTask`].
    pub fn task(&self, id: TaskId) -> Result<&TaskInstance, PlanError> {
        self.tasks.get(&id).ok_or(PlanError::UnknownTask(id))
    }

    /// Look up a task for modification
    ///
    /// # Errors
    /// [`PlanError::UnknownTask`].
    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskInstance, PlanError> {
        self.tasks.get_mut(&id).ok_or(PlanError::UnknownTask(id))
    }

    /// Whether the task exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Tasks in id order
    pub fn tasks(&self) -> impl Iterator<Item = &TaskInstance> {
        self.tasks.values()
    }

    /// Task ids in id order
    #[must_use]
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.keys().copied().collect()
    }

    /// Number of tasks
    #[inline]
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Dataflow graph
    #[inline]
    #[must_use]
    pub fn dataflow(&self) -> &DataflowGraph {
        &self.dataflow
    }

    /// Dataflow graph, mutable
    #[inline]
    pub fn dataflow_mut(&mut self) -> &mut DataflowGraph {
        &mut self.dataflow
    }

    /// Remove a task with its edges
    ///
    /// # Errors
    /// [`PlanError::UnknownTask`].
    pub fn remove_task(&mut self, id: TaskId) -> Result<TaskInstance, PlanError> {
        let task = self.tasks.remove(&id).ok_or(PlanError::UnknownTask(id))?;
        self.dataflow.remove_task(id);
        self.dependencies.remove_node(id);
        Ok(task)
    }

    /// Record `child` as the child of `parent` for `role`
    ///
    /// # Errors
    /// Unknown tasks, or a different child already recorded for the role.
    pub fn add_child(&mut self, parent: TaskId, role: &str, child: TaskId) -> Result<(), PlanError> {
        self.task(parent)?;
        self.task(child)?;
        if let Some(existing) = self.child(parent, role) {
            if existing == child {
                return Ok(());
            }
            return Err(PlanError::ChildConflict {
                parent,
                role: role.to_string(),
            });
        }
        match self.dependencies.edge_weight_mut(parent, child) {
            Some(roles) => {
                roles.insert(role.to_string());
            }
            None => {
                self.dependencies
                    .add_edge(parent, child, BTreeSet::from([role.to_string()]));
            }
        }
        Ok(())
    }

    /// Children of a task by role
    #[must_use]
    pub fn children(&self, parent: TaskId) -> BTreeMap<String, TaskId> {
        let mut children = BTreeMap::new();
        if !self.dependencies.contains_node(parent) {
            return children;
        }
        for child in self.dependencies.neighbors_directed(parent, Direction::Outgoing) {
            if let Some(roles) = self.dependencies.edge_weight(parent, child) {
                for role in roles {
                    children.insert(role.clone(), child);
                }
            }
        }
        children
    }

    /// Child recorded for a role
    #[must_use]
    pub fn child(&self, parent: TaskId, role: &str) -> Option<TaskId> {
        self.children(parent).get(role).copied()
    }

    /// Tasks that have `child` as a child
    #[must_use]
    pub fn parents(&self, child: TaskId) -> Vec<TaskId> {
        if !self.dependencies.contains_node(child) {
            return Vec::new();
        }
        let mut parents: Vec<TaskId> = self
            .dependencies
            .neighbors_directed(child, Direction::Incoming)
            .collect();
        parents.sort_unstable();
        parents
    }

    /// Make sure `task` has `port` in `direction`, instantiating dynamic ports
    ///
    /// Returns the port descriptor.
    ///
    /// # Errors
    /// [`PlanError::UnknownPort`] if the port is neither declared nor
    /// dynamically instantiable, [`PlanError::PortDirection`] if it exists
    /// with the other direction.
    pub fn ensure_port(
        &mut self,
        registry: &ModelRegistry,
        task: TaskId,
        port: &str,
        direction: PortDirection,
    ) -> Result<PortSpec, PlanError> {
        let instance = self.task(task)?;
        let found = if let Some(spec) = instance.dynamic_ports.get(port) {
            Some((spec.clone(), false))
        } else if let Some(model) = registry.component(&instance.model) {
            model
                .find_port(port)
                .map(|spec| (spec.clone(), false))
                .or_else(|| model.find_dynamic_port(port).map(|d| (d.instantiate(port), true)))
        } else {
            registry.service_port(&instance.model, port).map(|spec| (spec, false))
        };

        let Some((spec, dynamic)) = found else {
            return Err(PlanError::UnknownPort {
                task,
                model: instance.model.clone(),
                port: port.to_string(),
            });
        };
        if spec.direction != direction {
            return Err(PlanError::PortDirection {
                task,
                port: port.to_string(),
                expected: direction,
            });
        }
        if dynamic {
            tracing::debug!("plan: instantiated dynamic port {} on {}", port, task);
            self.task_mut(task)?
                .dynamic_ports
                .insert(port.to_string(), spec.clone());
        }
        Ok(spec)
    }

    /// Connect two task ports, checking both ends
    ///
    /// A composite's exported input may be the source of a connection into
    /// its child, and a child output may feed a composite's exported output,
    /// so direction checks are relaxed on forwarding tasks.
    ///
    /// # Errors
    /// Port and policy errors.
    pub fn connect_ports(
        &mut self,
        registry: &ModelRegistry,
        source: (TaskId, &str),
        sink: (TaskId, &str),
        policy: ConnectionPolicy,
    ) -> Result<(), PlanError> {
        self.check_endpoint(registry, source.0, source.1, PortDirection::Output)?;
        self.check_endpoint(registry, sink.0, sink.1, PortDirection::Input)?;
        self.dataflow
            .add_connection(source.0, source.1, sink.0, sink.1, policy)?;
        Ok(())
    }

    fn check_endpoint(
        &mut self,
        registry: &ModelRegistry,
        task: TaskId,
        port: &str,
        direction: PortDirection,
    ) -> Result<(), PlanError> {
        if self.task(task)?.is_composition {
            self.ensure_port(registry, task, port, direction)
                .or_else(|_| self.ensure_port(registry, task, port, direction.reverse()))?;
        } else {
            self.ensure_port(registry, task, port, direction)?;
        }
        Ok(())
    }

    /// Replace `old` by `new` everywhere, then remove `old`
    ///
    /// Dataflow edges are moved with `renames` applied to `old`'s ports,
    /// parent and child relations are moved as well.
    ///
    /// # Errors
    /// Unknown tasks, `old == new`, or dataflow policy conflicts.
    pub fn replace_task(
        &mut self,
        old: TaskId,
        new: TaskId,
        renames: &BTreeMap<String, String>,
    ) -> Result<(), PlanError> {
        if old == new {
            return Err(PlanError::InvalidReplacement { old, new });
        }
        self.task(old)?;
        self.task(new)?;
        self.dataflow.replace_task(old, new, renames)?;

        let incoming: Vec<(TaskId, BTreeSet<String>)> = self
            .dependencies
            .neighbors_directed(old, Direction::Incoming)
            .filter_map(|p| self.dependencies.edge_weight(p, old).map(|r| (p, r.clone())))
            .collect();
        let outgoing: Vec<(TaskId, BTreeSet<String>)> = self
            .dependencies
            .neighbors_directed(old, Direction::Outgoing)
            .filter_map(|c| self.dependencies.edge_weight(old, c).map(|r| (c, r.clone())))
            .collect();
        self.dependencies.remove_node(old);

        for (parent, roles) in incoming {
            if parent != new {
                self.add_dependency(parent, new, roles);
            }
        }
        for (child, roles) in outgoing {
            if child != new {
                self.add_dependency(new, child, roles);
            }
        }

        self.tasks.remove(&old);
        self.task_mut(new)?.merged_from.push(old);
        Ok(())
    }

    fn add_dependency(&mut self, parent: TaskId, child: TaskId, roles: BTreeSet<String>) {
        match self.dependencies.edge_weight_mut(parent, child) {
            Some(existing) => existing.extend(roles),
            None => {
                self.dependencies.add_edge(parent, child, roles);
            }
        }
    }

    /// Check the plan's structural invariants
    ///
    /// # Errors
    /// The first violation found.
    pub fn check_invariants(&self) -> Result<(), PlanError> {
        self.dataflow.check_invariants()?;
        for id in self.dataflow.tasks() {
            if !self.tasks.contains_key(&id) {
                return Err(invariant(format!("dataflow vertex {id} has no task")));
            }
        }
        for (id, task) in &self.tasks {
            if !self.dataflow.contains(*id) {
                return Err(invariant(format!("task {id} is not in the dataflow graph")));
            }
            if task.is_composition != self.dataflow.is_forwarding(*id) {
                return Err(invariant(format!("task {id} forwarding flag mismatch")));
            }
        }
        if petgraph::algo::is_cyclic_directed(&self.dependencies) {
            return Err(invariant("dependency relation has a cycle".to_string()));
        }
        Ok(())
    }

    /// Start a transaction on a staged copy of this plan
    pub fn transaction(&mut self) -> PlanTransaction<'_> {
        let staged = self.clone();
        let id = Uuid::new_v4();
        tracing::debug!("plan {}: transaction {} opened", self.id, id);
        PlanTransaction {
            base: self,
            staged,
            id,
            committed: false,
        }
    }
}

fn invariant(message: String) -> PlanError {
    PlanError::Dataflow(DataflowError::Invariant(message))
}

/// Staged modifications to a plan
#[derive(Debug)]
pub struct PlanTransaction<'a> {
    base: &'a mut Plan,
    staged: Plan,
    id: Uuid,
    committed: bool,
}

impl PlanTransaction<'_> {
    /// Transaction identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Write the staged plan back to the base plan
    pub fn commit(mut self) {
        *self.base = std::mem::take(&mut self.staged);
        self.committed = true;
        tracing::debug!("plan {}: transaction {} committed", self.base.id, self.id);
    }
}

impl Deref for PlanTransaction<'_> {
    type Target = Plan;

    fn deref(&self) -> &Plan {
        &self.staged
    }
}

impl DerefMut for PlanTransaction<'_> {
    fn deref_mut(&mut self) -> &mut Plan {
        &mut self.staged
    }
}

impl Drop for PlanTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::debug!("plan {}: transaction {} discarded", self.base.id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsynth_model::ComponentModel;

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry
            .register_component(ComponentModel::component("Producer").output("out", "/double"))
            .unwrap();
        registry
            .register_component(
                ComponentModel::component("Mux")
                    .input("ctl", "/cmd")
                    .dynamic_input(r"in_\d+", "/double")
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn ids_are_sequential() {
        let mut plan = Plan::new();
        let a = plan.add_task(TaskInstance::new("Producer"));
        let b = plan.add_task(TaskInstance::new("Producer"));
        assert_eq!(a, TaskId(1));
        assert_eq!(b, TaskId(2));
        assert_eq!(plan.task(a).unwrap().id, a);
        assert_eq!(plan.task(TaskId(7)).unwrap_err(), PlanError::UnknownTask(TaskId(7)));
    }

    #[test]
    fn dynamic_ports_are_instantiated_on_connect() {
        let registry = registry();
        let mut plan = Plan::new();
        let producer = plan.add_task(TaskInstance::new("Producer"));
        let mux = plan.add_task(TaskInstance::new("Mux"));

        plan.connect_ports(&registry, (producer, "out"), (mux, "in_2"), ConnectionPolicy::empty())
            .unwrap();
        assert!(plan.task(mux).unwrap().dynamic_ports.contains_key("in_2"));
        assert!(plan.dataflow().connected(producer, "out", mux, "in_2"));
    }

    #[test]
    fn unknown_and_misdirected_ports_fail() {
        let registry = registry();
        let mut plan = Plan::new();
        let producer = plan.add_task(TaskInstance::new("Producer"));
        let mux = plan.add_task(TaskInstance::new("Mux"));

        let err = plan
            .connect_ports(&registry, (producer, "out"), (mux, "bogus"), ConnectionPolicy::empty())
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownPort { .. }));

        let err = plan
            .connect_ports(&registry, (mux, "ctl"), (producer, "out"), ConnectionPolicy::empty())
            .unwrap_err();
        assert!(matches!(err, PlanError::PortDirection { .. }));
        assert_eq!(plan.dataflow().edge_count(), 0);
    }

    #[test]
    fn children_by_role() {
        let mut plan = Plan::new();
        let parent = plan.add_task(TaskInstance::new("Pipeline").composition(true));
        let child = plan.add_task(TaskInstance::new("Producer"));
        let other = plan.add_task(TaskInstance::new("Producer"));

        plan.add_child(parent, "source", child).unwrap();
        plan.add_child(parent, "backup", child).unwrap();
        assert_eq!(plan.child(parent, "source"), Some(child));
        assert_eq!(plan.children(parent).len(), 2);
        assert_eq!(plan.parents(child), vec![parent]);
        assert!(matches!(
            plan.add_child(parent, "source", other),
            Err(PlanError::ChildConflict { .. })
        ));
    }

    #[test]
    fn replace_task_moves_relations() {
        let registry = registry();
        let mut plan = Plan::new();
        let parent = plan.add_task(TaskInstance::new("Pipeline").composition(true));
        let old = plan.add_task(TaskInstance::new("Producer"));
        let new = plan.add_task(TaskInstance::new("Producer"));
        let mux = plan.add_task(TaskInstance::new("Mux"));
        plan.add_child(parent, "source", old).unwrap();
        plan.connect_ports(&registry, (old, "out"), (mux, "in_0"), ConnectionPolicy::empty())
            .unwrap();

        plan.replace_task(old, new, &BTreeMap::new()).unwrap();

        assert!(!plan.contains(old));
        assert_eq!(plan.child(parent, "source"), Some(new));
        assert!(plan.dataflow().connected(new, "out", mux, "in_0"));
        assert_eq!(plan.task(new).unwrap().merged_from, vec![old]);
        plan.check_invariants().unwrap();
    }

    #[test]
    fn dropped_transaction_is_discarded() {
        let mut plan = Plan::new();
        {
            let mut trsc = plan.transaction();
            trsc.add_task(TaskInstance::new("Producer"));
            assert_eq!(trsc.task_count(), 1);
        }
        assert_eq!(plan.task_count(), 0);

        let mut trsc = plan.transaction();
        let id = trsc.add_task(TaskInstance::new("Producer"));
        trsc.commit();
        assert!(plan.contains(id));
    }
}
