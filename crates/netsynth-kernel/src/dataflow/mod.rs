//! Dataflow connection graph
//!
//! A weak directed graph over tasks. Each edge `(source, sink)` carries a
//! [`ConnectionMap`] from port pairs to connection policies; an edge whose
//! map becomes empty is removed. Cycles are allowed.
//!
//! Composite tasks are registered as *forwarding* vertices: their ports are
//! aliases, and the concrete views in [`concrete`] walk through them to the
//! real endpoints.
//!
//! Every structural mutation bumps [`DataflowGraph::generation`], which the
//! concrete connection cache uses to detect staleness.

pub mod concrete;

use crate::error::DataflowError;
use netsynth_model::{ConnectionPolicy, PolicyError, TaskId};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use concrete::{ConcreteConnection, ConcreteConnectionGraph, ConnectionView};

/// Source port and sink port of one mapping
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortPair {
    /// Port on the source task
    pub source_port: String,
    /// Port on the sink task
    pub sink_port: String,
}

impl PortPair {
    /// Create a port pair
    #[inline]
    #[must_use]
    pub fn new(source_port: impl Into<String>, sink_port: impl Into<String>) -> Self {
        Self {
            source_port: source_port.into(),
            sink_port: sink_port.into(),
        }
    }
}

/// Port mappings of one edge
pub type ConnectionMap = BTreeMap<PortPair, ConnectionPolicy>;

/// A direct connection as stored in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Source task
    pub source_task: TaskId,
    /// Source port
    pub source_port: String,
    /// Sink task
    pub sink_task: TaskId,
    /// Sink port
    pub sink_port: String,
    /// Policy of the mapping
    pub policy: ConnectionPolicy,
}

/// Owned dataflow graph
#[derive(Debug, Clone, Default)]
pub struct DataflowGraph {
    graph: DiGraphMap<TaskId, ConnectionMap>,
    forwarding: BTreeSet<TaskId>,
    generation: u64,
    concrete: Option<ConcreteConnectionGraph>,
}

impl DataflowGraph {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex; `forwarding` marks composites
    pub fn add_task(&mut self, task: TaskId, forwarding: bool) {
        self.graph.add_node(task);
        if forwarding {
            self.forwarding.insert(task);
        } else {
            self.forwarding.remove(&task);
        }
        self.bump();
    }

    /// Whether the task is a vertex
    #[inline]
    #[must_use]
    pub fn contains(&self, task: TaskId) -> bool {
        self.graph.contains_node(task)
    }

    /// Whether the task only forwards its ports
    #[inline]
    #[must_use]
    pub fn is_forwarding(&self, task: TaskId) -> bool {
        self.forwarding.contains(&task)
    }

    /// Vertices in id order
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskId> {
        let mut tasks: Vec<TaskId> = self.graph.nodes().collect();
        tasks.sort_unstable();
        tasks
    }

    /// Number of vertices
    #[inline]
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Structural version, bumped by every mutation
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Add mappings to an edge, merging policies of existing port pairs
    ///
    /// Either every mapping is applied or none is.
    ///
    /// # Errors
    /// Unknown tasks, an empty map, or irreconcilable policies.
    pub fn add_connections(
        &mut self,
        source: TaskId,
        sink: TaskId,
        mappings: ConnectionMap,
    ) -> Result<(), DataflowError> {
        if mappings.is_empty() {
            return Err(DataflowError::EmptyEdge {
                source_task: source,
                sink,
            });
        }
        self.merge_edge_info(source, sink, &mappings)
    }

    /// Add a single mapping
    ///
    /// # Errors
    /// See [`DataflowGraph::add_connections`].
    pub fn add_connection(
        &mut self,
        source: TaskId,
        source_port: &str,
        sink: TaskId,
        sink_port: &str,
        policy: ConnectionPolicy,
    ) -> Result<(), DataflowError> {
        let mut mappings = ConnectionMap::new();
        mappings.insert(PortPair::new(source_port, sink_port), policy);
        self.add_connections(source, sink, mappings)
    }

    /// Merge mappings into an edge; an empty map is a no-op
    ///
    /// # Errors
    /// Unknown tasks or irreconcilable policies.
    pub fn merge_edge_info(
        &mut self,
        source: TaskId,
        sink: TaskId,
        mappings: &ConnectionMap,
    ) -> Result<(), DataflowError> {
        self.require(source)?;
        self.require(sink)?;
        if mappings.is_empty() {
            return Ok(());
        }
        let merged = match self.graph.edge_weight(source, sink) {
            Some(existing) => merge_connection_maps(existing, mappings)?,
            None => mappings.clone(),
        };
        self.graph.add_edge(source, sink, merged);
        self.bump();
        Ok(())
    }

    /// Replace the mappings of an edge; an empty map removes the edge
    ///
    /// # Errors
    /// Unknown tasks.
    pub fn set_edge_info(
        &mut self,
        source: TaskId,
        sink: TaskId,
        mappings: ConnectionMap,
    ) -> Result<(), DataflowError> {
        self.require(source)?;
        self.require(sink)?;
        if mappings.is_empty() {
            self.graph.remove_edge(source, sink);
        } else {
            self.graph.add_edge(source, sink, mappings);
        }
        self.bump();
        Ok(())
    }

    /// Remove mappings from an edge, dropping the edge once empty
    ///
    /// Returns whether anything was removed.
    pub fn remove_connections<I>(&mut self, source: TaskId, sink: TaskId, pairs: I) -> bool
    where
        I: IntoIterator<Item = PortPair>,
    {
        let Some(mappings) = self.graph.edge_weight_mut(source, sink) else {
            return false;
        };
        let before = mappings.len();
        for pair in pairs {
            mappings.remove(&pair);
        }
        let removed = mappings.len() != before;
        if mappings.is_empty() {
            self.graph.remove_edge(source, sink);
        }
        if removed {
            self.bump();
        }
        removed
    }

    /// Whether a specific port pair is connected
    #[must_use]
    pub fn connected(&self, source: TaskId, source_port: &str, sink: TaskId, sink_port: &str) -> bool {
        self.graph
            .edge_weight(source, sink)
            .is_some_and(|m| m.contains_key(&PortPair::new(source_port, sink_port)))
    }

    /// Whether an edge exists
    #[inline]
    #[must_use]
    pub fn has_edge(&self, source: TaskId, sink: TaskId) -> bool {
        self.graph.contains_edge(source, sink)
    }

    /// Mappings of an edge
    #[inline]
    #[must_use]
    pub fn edge_info(&self, source: TaskId, sink: TaskId) -> Option<&ConnectionMap> {
        self.graph.edge_weight(source, sink)
    }

    /// Direct incoming connections of a task
    #[must_use]
    pub fn input_connections(&self, task: TaskId) -> Vec<Connection> {
        let mut connections = Vec::new();
        for source in self.graph.neighbors_directed(task, Direction::Incoming) {
            if let Some(mappings) = self.graph.edge_weight(source, task) {
                connections.extend(mappings.iter().map(|(pair, policy)| Connection {
                    source_task: source,
                    source_port: pair.source_port.clone(),
                    sink_task: task,
                    sink_port: pair.sink_port.clone(),
                    policy: policy.clone(),
                }));
            }
        }
        sort_connections(&mut connections);
        connections
    }

    /// Direct outgoing connections of a task
    #[must_use]
    pub fn output_connections(&self, task: TaskId) -> Vec<Connection> {
        let mut connections = Vec::new();
        for sink in self.graph.neighbors_directed(task, Direction::Outgoing) {
            if let Some(mappings) = self.graph.edge_weight(task, sink) {
                connections.extend(mappings.iter().map(|(pair, policy)| Connection {
                    source_task: task,
                    source_port: pair.source_port.clone(),
                    sink_task: sink,
                    sink_port: pair.sink_port.clone(),
                    policy: policy.clone(),
                }));
            }
        }
        sort_connections(&mut connections);
        connections
    }

    /// Tasks with an edge into `task`
    #[must_use]
    pub fn sources_of(&self, task: TaskId) -> Vec<TaskId> {
        let mut tasks: Vec<TaskId> = self
            .graph
            .neighbors_directed(task, Direction::Incoming)
            .collect();
        tasks.sort_unstable();
        tasks
    }

    /// Tasks with an edge from `task`
    #[must_use]
    pub fn sinks_of(&self, task: TaskId) -> Vec<TaskId> {
        let mut tasks: Vec<TaskId> = self
            .graph
            .neighbors_directed(task, Direction::Outgoing)
            .collect();
        tasks.sort_unstable();
        tasks
    }

    /// Move every edge of `old` onto `new`, then remove `old`
    ///
    /// Ports of `old` listed in `renames` are renamed on the way. Edges that
    /// land on an existing edge of `new` are merged with the policy rule.
    /// Either the whole rewrite happens or nothing changes.
    ///
    /// # Errors
    /// Unknown tasks or irreconcilable policies.
    pub fn replace_task(
        &mut self,
        old: TaskId,
        new: TaskId,
        renames: &BTreeMap<String, String>,
    ) -> Result<(), DataflowError> {
        self.require(old)?;
        self.require(new)?;
        if old == new {
            return Ok(());
        }

        let staged = self.stage_replacement(old, new, renames)?;
        self.graph.remove_node(old);
        self.forwarding.remove(&old);
        for (source, sink, mappings) in staged {
            self.graph.add_edge(source, sink, mappings);
        }
        self.bump();
        tracing::debug!("dataflow: replaced {} by {}", old, new);
        Ok(())
    }

    /// Check that [`DataflowGraph::replace_task`] would succeed
    ///
    /// Nothing is modified.
    ///
    /// # Errors
    /// The error `replace_task` would return.
    pub fn check_replacement(
        &self,
        old: TaskId,
        new: TaskId,
        renames: &BTreeMap<String, String>,
    ) -> Result<(), DataflowError> {
        self.require(old)?;
        self.require(new)?;
        if old != new {
            self.stage_replacement(old, new, renames)?;
        }
        Ok(())
    }

    /// Edges touching `new` once `old`'s edges are moved and merged onto it
    fn stage_replacement(
        &self,
        old: TaskId,
        new: TaskId,
        renames: &BTreeMap<String, String>,
    ) -> Result<Vec<(TaskId, TaskId, ConnectionMap)>, DataflowError> {
        let rename = |port: &str| renames.get(port).cloned().unwrap_or_else(|| port.to_string());
        let remap = |task: TaskId| if task == old { new } else { task };

        let mut moved: BTreeMap<(TaskId, TaskId), ConnectionMap> = BTreeMap::new();
        for (source, sink, mappings) in self.graph.all_edges() {
            if source != old && sink != old {
                continue;
            }
            let mut renamed = ConnectionMap::new();
            for (pair, policy) in mappings {
                let source_port = if source == old {
                    rename(&pair.source_port)
                } else {
                    pair.source_port.clone()
                };
                let sink_port = if sink == old {
                    rename(&pair.sink_port)
                } else {
                    pair.sink_port.clone()
                };
                insert_merged(&mut renamed, PortPair { source_port, sink_port }, policy)?;
            }
            let key = (remap(source), remap(sink));
            let combined = match moved.remove(&key) {
                Some(previous) => merge_connection_maps(&previous, &renamed)?,
                None => renamed,
            };
            moved.insert(key, combined);
        }

        let mut staged = Vec::with_capacity(moved.len());
        for ((source, sink), mappings) in moved {
            let merged = match self.graph.edge_weight(source, sink) {
                Some(existing) => merge_connection_maps(existing, &mappings)?,
                None => mappings,
            };
            staged.push((source, sink, merged));
        }
        Ok(staged)
    }

    /// Remove a vertex and all its edges
    ///
    /// Returns whether the task was present.
    pub fn remove_task(&mut self, task: TaskId) -> bool {
        let removed = self.graph.remove_node(task);
        self.forwarding.remove(&task);
        if removed {
            self.bump();
        }
        removed
    }

    /// Check structural invariants
    ///
    /// # Errors
    /// [`DataflowError::Invariant`] describing the first violation.
    pub fn check_invariants(&self) -> Result<(), DataflowError> {
        for (source, sink, mappings) in self.graph.all_edges() {
            if mappings.is_empty() {
                return Err(DataflowError::Invariant(format!(
                    "edge {source} -> {sink} has no mapping"
                )));
            }
        }
        if let Some(task) = self.forwarding.iter().find(|t| !self.graph.contains_node(**t)) {
            return Err(DataflowError::Invariant(format!(
                "forwarding task {task} is not a vertex"
            )));
        }
        Ok(())
    }

    fn require(&self, task: TaskId) -> Result<(), DataflowError> {
        if self.graph.contains_node(task) {
            Ok(())
        } else {
            Err(DataflowError::UnknownTask(task))
        }
    }

    fn bump(&mut self) {
        self.generation += 1;
    }
}

/// Union of two connection maps, merging policies of shared port pairs
///
/// # Errors
/// The first [`PolicyError`] met.
pub fn merge_connection_maps(
    left: &ConnectionMap,
    right: &ConnectionMap,
) -> Result<ConnectionMap, PolicyError> {
    let mut merged = left.clone();
    for (pair, policy) in right {
        insert_merged(&mut merged, pair.clone(), policy)?;
    }
    Ok(merged)
}

fn insert_merged(
    map: &mut ConnectionMap,
    pair: PortPair,
    policy: &ConnectionPolicy,
) -> Result<(), PolicyError> {
    let policy = match map.get(&pair) {
        Some(existing) => existing.merge(policy)?,
        None => policy.clone(),
    };
    map.insert(pair, policy);
    Ok(())
}

fn sort_connections(connections: &mut [Connection]) {
    connections.sort_by(|a, b| {
        (a.source_task, &a.source_port, a.sink_task, &a.sink_port).cmp(&(
            b.source_task,
            &b.source_port,
            b.sink_task,
            &b.sink_port,
        ))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsynth_model::LockPolicy;

    fn graph(n: u64) -> DataflowGraph {
        let mut graph = DataflowGraph::new();
        for id in 1..=n {
            graph.add_task(TaskId(id), false);
        }
        graph
    }

    #[test]
    fn add_then_remove_drops_edge() {
        let mut g = graph(2);
        g.add_connection(TaskId(1), "out", TaskId(2), "in", ConnectionPolicy::empty())
            .unwrap();
        assert!(g.connected(TaskId(1), "out", TaskId(2), "in"));
        assert!(g.remove_connections(TaskId(1), TaskId(2), [PortPair::new("out", "in")]));
        assert!(!g.connected(TaskId(1), "out", TaskId(2), "in"));
        assert!(!g.has_edge(TaskId(1), TaskId(2)));
    }

    #[test]
    fn adding_to_existing_pair_merges_policies() {
        let mut g = graph(2);
        g.add_connection(TaskId(1), "out", TaskId(2), "in", ConnectionPolicy::buffer(2))
            .unwrap();
        g.add_connection(TaskId(1), "out", TaskId(2), "in", ConnectionPolicy::buffer(5))
            .unwrap();
        let info = g.edge_info(TaskId(1), TaskId(2)).unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[&PortPair::new("out", "in")], ConnectionPolicy::buffer(5));
    }

    #[test]
    fn failed_merge_leaves_edge_untouched() {
        let mut g = graph(2);
        g.add_connection(TaskId(1), "out", TaskId(2), "in", ConnectionPolicy::data())
            .unwrap();
        let generation = g.generation();

        let mut mappings = ConnectionMap::new();
        mappings.insert(PortPair::new("status", "in2"), ConnectionPolicy::empty());
        mappings.insert(PortPair::new("out", "in"), ConnectionPolicy::buffer(1));
        assert!(g.add_connections(TaskId(1), TaskId(2), mappings).is_err());

        assert_eq!(g.edge_info(TaskId(1), TaskId(2)).unwrap().len(), 1);
        assert_eq!(g.generation(), generation);
    }

    #[test]
    fn empty_edges_are_rejected() {
        let mut g = graph(2);
        let err = g.add_connections(TaskId(1), TaskId(2), ConnectionMap::new()).unwrap_err();
        assert_eq!(
            err,
            DataflowError::EmptyEdge {
                source_task: TaskId(1),
                sink: TaskId(2)
            }
        );
        let mut with_edge = graph(2);
        with_edge
            .add_connection(TaskId(1), "a", TaskId(2), "b", ConnectionPolicy::empty())
            .unwrap();
        with_edge.set_edge_info(TaskId(1), TaskId(2), ConnectionMap::new()).unwrap();
        assert!(!with_edge.has_edge(TaskId(1), TaskId(2)));
    }

    #[test]
    fn unknown_tasks_are_rejected() {
        let mut g = graph(1);
        let err = g
            .add_connection(TaskId(1), "out", TaskId(9), "in", ConnectionPolicy::empty())
            .unwrap_err();
        assert_eq!(err, DataflowError::UnknownTask(TaskId(9)));
    }

    #[test]
    fn replace_task_moves_and_merges_edges() {
        let mut g = graph(4);
        g.add_connection(TaskId(1), "out", TaskId(2), "in", ConnectionPolicy::buffer(2))
            .unwrap();
        g.add_connection(TaskId(1), "out", TaskId(3), "in", ConnectionPolicy::buffer(8))
            .unwrap();
        g.add_connection(TaskId(3), "out", TaskId(4), "in", ConnectionPolicy::empty())
            .unwrap();

        g.replace_task(TaskId(3), TaskId(2), &BTreeMap::new()).unwrap();

        assert!(!g.contains(TaskId(3)));
        let info = g.edge_info(TaskId(1), TaskId(2)).unwrap();
        assert_eq!(info[&PortPair::new("out", "in")], ConnectionPolicy::buffer(8));
        assert!(g.connected(TaskId(2), "out", TaskId(4), "in"));
        g.check_invariants().unwrap();
    }

    #[test]
    fn replace_task_renames_ports() {
        let mut g = graph(3);
        g.add_connection(TaskId(1), "out", TaskId(2), "frame", ConnectionPolicy::empty())
            .unwrap();
        let renames = BTreeMap::from([("frame".to_string(), "left_frame".to_string())]);
        g.replace_task(TaskId(2), TaskId(3), &renames).unwrap();
        assert!(g.connected(TaskId(1), "out", TaskId(3), "left_frame"));
    }

    #[test]
    fn replace_task_conflict_is_atomic() {
        let mut g = graph(3);
        g.add_connection(
            TaskId(1),
            "out",
            TaskId(2),
            "in",
            ConnectionPolicy::data().with_lock(LockPolicy::Locked),
        )
        .unwrap();
        g.add_connection(
            TaskId(1),
            "out",
            TaskId(3),
            "in",
            ConnectionPolicy::data().with_lock(LockPolicy::LockFree),
        )
        .unwrap();

        let generation = g.generation();
        let checked = g.check_replacement(TaskId(3), TaskId(2), &BTreeMap::new());
        assert!(matches!(checked, Err(DataflowError::Policy(_))));
        assert_eq!(g.generation(), generation);

        let err = g.replace_task(TaskId(3), TaskId(2), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, DataflowError::Policy(_)));
        assert!(g.contains(TaskId(3)));
        assert!(g.has_edge(TaskId(1), TaskId(3)));
    }

    #[test]
    fn direct_connections_are_sorted() {
        let mut g = graph(3);
        g.add_connection(TaskId(2), "b", TaskId(3), "in", ConnectionPolicy::empty())
            .unwrap();
        g.add_connection(TaskId(1), "a", TaskId(3), "in", ConnectionPolicy::empty())
            .unwrap();
        let inputs = g.input_connections(TaskId(3));
        let sources: Vec<_> = inputs.iter().map(|c| c.source_task).collect();
        assert_eq!(sources, vec![TaskId(1), TaskId(2)]);
        assert_eq!(g.output_connections(TaskId(1))[0].sink_port, "in");
    }
}
