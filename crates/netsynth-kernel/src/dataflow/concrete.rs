//! Concrete connection resolution
//!
//! A concrete connection links two real (non-forwarding) ports. It is found
//! by walking through forwarding vertices: arriving at a composite through
//! one of its ports, the walk continues from that same port on the other
//! side. Policies met along the way are merged left to right.
//!
//! # Cache
//!
//! [`DataflowGraph::compute_concrete_connection_graph`] materializes every
//! concrete connection into a [`ConcreteConnectionGraph`]. Once enabled with
//! [`DataflowGraph::enable_concrete_connection_graph`], queries read the
//! cache, and any query made after a structural mutation fails with
//! [`DataflowError::StaleConcreteCache`] until the cache is refreshed or
//! disabled.

use super::{ConnectionMap, DataflowGraph, PortPair};
use crate::error::DataflowError;
use netsynth_model::{ConnectionPolicy, TaskId};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Connection between two real ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteConnection {
    /// Source task
    pub source_task: TaskId,
    /// Source port
    pub source_port: String,
    /// Sink task
    pub sink_task: TaskId,
    /// Sink port
    pub sink_port: String,
    /// Policy merged along the forwarding chain
    pub policy: ConnectionPolicy,
}

/// Read access to concrete connections
pub trait ConnectionView {
    /// Concrete connections arriving at `task`, optionally at one sink port
    ///
    /// # Errors
    /// Irreconcilable policies along a chain, or a stale cache.
    fn concrete_input_connections(
        &self,
        task: TaskId,
        port: Option<&str>,
    ) -> Result<Vec<ConcreteConnection>, DataflowError>;

    /// Concrete connections leaving `task`, optionally from one source port
    ///
    /// # Errors
    /// Irreconcilable policies along a chain, or a stale cache.
    fn concrete_output_connections(
        &self,
        task: TaskId,
        port: Option<&str>,
    ) -> Result<Vec<ConcreteConnection>, DataflowError>;
}

/// Materialized leaf-to-leaf connections
#[derive(Debug, Clone, Default)]
pub struct ConcreteConnectionGraph {
    graph: DiGraphMap<TaskId, ConnectionMap>,
    generation: u64,
}

impl ConcreteConnectionGraph {
    /// Generation of the dataflow graph this was computed from
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of concrete edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Mappings of a concrete edge
    #[inline]
    #[must_use]
    pub fn edge_info(&self, source: TaskId, sink: TaskId) -> Option<&ConnectionMap> {
        self.graph.edge_weight(source, sink)
    }

    fn collect(&self, task: TaskId, port: Option<&str>, direction: Direction) -> Vec<ConcreteConnection> {
        if !self.graph.contains_node(task) {
            return Vec::new();
        }
        let mut result = Vec::new();
        for other in self.graph.neighbors_directed(task, direction) {
            let (source, sink) = match direction {
                Direction::Incoming => (other, task),
                Direction::Outgoing => (task, other),
            };
            let Some(mappings) = self.graph.edge_weight(source, sink) else {
                continue;
            };
            for (pair, policy) in mappings {
                let own_port = match direction {
                    Direction::Incoming => &pair.sink_port,
                    Direction::Outgoing => &pair.source_port,
                };
                if port.is_some_and(|p| p != own_port.as_str()) {
                    continue;
                }
                result.push(ConcreteConnection {
                    source_task: source,
                    source_port: pair.source_port.clone(),
                    sink_task: sink,
                    sink_port: pair.sink_port.clone(),
                    policy: policy.clone(),
                });
            }
        }
        sort_concrete(&mut result);
        result
    }
}

impl ConnectionView for ConcreteConnectionGraph {
    fn concrete_input_connections(
        &self,
        task: TaskId,
        port: Option<&str>,
    ) -> Result<Vec<ConcreteConnection>, DataflowError> {
        Ok(self.collect(task, port, Direction::Incoming))
    }

    fn concrete_output_connections(
        &self,
        task: TaskId,
        port: Option<&str>,
    ) -> Result<Vec<ConcreteConnection>, DataflowError> {
        Ok(self.collect(task, port, Direction::Outgoing))
    }
}

impl DataflowGraph {
    /// Compute every concrete connection between real tasks
    ///
    /// # Errors
    /// Irreconcilable policies along a forwarding chain.
    pub fn compute_concrete_connection_graph(&self) -> Result<ConcreteConnectionGraph, DataflowError> {
        let mut concrete = ConcreteConnectionGraph {
            graph: DiGraphMap::new(),
            generation: self.generation,
        };
        for task in self.tasks() {
            if self.is_forwarding(task) {
                continue;
            }
            concrete.graph.add_node(task);
            for connection in self.walk_inputs(task, None)? {
                concrete.graph.add_node(connection.source_task);
                let pair = PortPair::new(connection.source_port, connection.sink_port);
                let edge = concrete
                    .graph
                    .edge_weight_mut(connection.source_task, task);
                match edge {
                    Some(mappings) => {
                        let policy = match mappings.get(&pair) {
                            Some(existing) => existing.merge(&connection.policy)?,
                            None => connection.policy,
                        };
                        mappings.insert(pair, policy);
                    }
                    None => {
                        let mut mappings = ConnectionMap::new();
                        mappings.insert(pair, connection.policy);
                        concrete.graph.add_edge(connection.source_task, task, mappings);
                    }
                }
            }
        }
        Ok(concrete)
    }

    /// Compute the cache and make it authoritative for queries
    ///
    /// # Errors
    /// See [`DataflowGraph::compute_concrete_connection_graph`].
    pub fn enable_concrete_connection_graph(&mut self) -> Result<(), DataflowError> {
        let concrete = self.compute_concrete_connection_graph()?;
        tracing::debug!(
            "dataflow: concrete cache enabled at generation {} ({} edges)",
            concrete.generation,
            concrete.edge_count()
        );
        self.concrete = Some(concrete);
        Ok(())
    }

    /// Recompute the cache if it is enabled
    ///
    /// # Errors
    /// See [`DataflowGraph::compute_concrete_connection_graph`].
    pub fn refresh_concrete_connection_graph(&mut self) -> Result<(), DataflowError> {
        if self.concrete.is_some() {
            self.enable_concrete_connection_graph()?;
        }
        Ok(())
    }

    /// Drop the cache and go back to walking the graph
    pub fn disable_concrete_connection_graph(&mut self) {
        self.concrete = None;
    }

    /// Whether queries are answered from the cache
    #[inline]
    #[must_use]
    pub fn concrete_cache_enabled(&self) -> bool {
        self.concrete.is_some()
    }

    /// Whether the cache, if enabled, matches the current structure
    #[inline]
    #[must_use]
    pub fn concrete_cache_is_fresh(&self) -> bool {
        self.concrete
            .as_ref()
            .map_or(true, |c| c.generation == self.generation)
    }

    fn cache(&self, task: TaskId) -> Result<Option<&ConcreteConnectionGraph>, DataflowError> {
        match &self.concrete {
            Some(cache) if cache.generation != self.generation => Err(DataflowError::StaleConcreteCache {
                built: cache.generation,
                current: self.generation,
            }),
            Some(cache) if !self.is_forwarding(task) => Ok(Some(cache)),
            _ => Ok(None),
        }
    }

    fn walk_inputs(
        &self,
        task: TaskId,
        port: Option<&str>,
    ) -> Result<Vec<ConcreteConnection>, DataflowError> {
        let mut visited = BTreeSet::new();
        let mut result = Vec::new();
        self.walk(task, port, Direction::Incoming, &mut visited, &mut result)?;
        sort_concrete(&mut result);
        Ok(result)
    }

    fn walk_outputs(
        &self,
        task: TaskId,
        port: Option<&str>,
    ) -> Result<Vec<ConcreteConnection>, DataflowError> {
        let mut visited = BTreeSet::new();
        let mut result = Vec::new();
        self.walk(task, port, Direction::Outgoing, &mut visited, &mut result)?;
        sort_concrete(&mut result);
        Ok(result)
    }

    /// Walk one direction from `task`, skipping through forwarding vertices
    ///
    /// `visited` holds the (forwarding task, port) pairs on the current path
    /// so that forwarding cycles terminate.
    fn walk(
        &self,
        task: TaskId,
        port: Option<&str>,
        direction: Direction,
        visited: &mut BTreeSet<(TaskId, String)>,
        result: &mut Vec<ConcreteConnection>,
    ) -> Result<(), DataflowError> {
        if !self.graph.contains_node(task) {
            return Err(DataflowError::UnknownTask(task));
        }
        let mut neighbors: Vec<TaskId> = self.graph.neighbors_directed(task, direction).collect();
        neighbors.sort_unstable();
        neighbors.dedup();

        for other in neighbors {
            let (source, sink) = match direction {
                Direction::Incoming => (other, task),
                Direction::Outgoing => (task, other),
            };
            let Some(mappings) = self.graph.edge_weight(source, sink) else {
                continue;
            };
            for (pair, policy) in mappings {
                let (own_port, far_port) = match direction {
                    Direction::Incoming => (&pair.sink_port, &pair.source_port),
                    Direction::Outgoing => (&pair.source_port, &pair.sink_port),
                };
                if port.is_some_and(|p| p != own_port.as_str()) {
                    continue;
                }

                if !self.is_forwarding(other) {
                    result.push(ConcreteConnection {
                        source_task: source,
                        source_port: pair.source_port.clone(),
                        sink_task: sink,
                        sink_port: pair.sink_port.clone(),
                        policy: policy.clone(),
                    });
                    continue;
                }

                if !visited.insert((other, far_port.clone())) {
                    continue;
                }
                let mut further = Vec::new();
                self.walk(other, Some(far_port.as_str()), direction, visited, &mut further)?;
                visited.remove(&(other, far_port.clone()));
                for mut connection in further {
                    match direction {
                        Direction::Incoming => {
                            connection.policy = connection.policy.merge(policy)?;
                            connection.sink_task = task;
                            connection.sink_port.clone_from(own_port);
                        }
                        Direction::Outgoing => {
                            connection.policy = policy.merge(&connection.policy)?;
                            connection.source_task = task;
                            connection.source_port.clone_from(own_port);
                        }
                    }
                    result.push(connection);
                }
            }
        }
        Ok(())
    }
}

impl ConnectionView for DataflowGraph {
    fn concrete_input_connections(
        &self,
        task: TaskId,
        port: Option<&str>,
    ) -> Result<Vec<ConcreteConnection>, DataflowError> {
        match self.cache(task)? {
            Some(cache) => cache.concrete_input_connections(task, port),
            None => self.walk_inputs(task, port),
        }
    }

    fn concrete_output_connections(
        &self,
        task: TaskId,
        port: Option<&str>,
    ) -> Result<Vec<ConcreteConnection>, DataflowError> {
        match self.cache(task)? {
            Some(cache) => cache.concrete_output_connections(task, port),
            None => self.walk_outputs(task, port),
        }
    }
}

fn sort_concrete(connections: &mut [ConcreteConnection]) {
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
    use pretty_assertions::assert_eq;

    /// Producer(1) -> Outer(2) -> Inner(3) -> Leaf(4), with 2 and 3 forwarding
    fn chain() -> DataflowGraph {
        let mut g = DataflowGraph::new();
        g.add_task(TaskId(1), false);
        g.add_task(TaskId(2), true);
        g.add_task(TaskId(3), true);
        g.add_task(TaskId(4), false);
        g.add_connection(TaskId(1), "out", TaskId(2), "in", ConnectionPolicy::buffer(2))
            .unwrap();
        g.add_connection(TaskId(2), "in", TaskId(3), "in", ConnectionPolicy::empty())
            .unwrap();
        g.add_connection(TaskId(3), "in", TaskId(4), "data", ConnectionPolicy::buffer(6))
            .unwrap();
        g
    }

    #[test]
    fn inputs_skip_forwarding_vertices() {
        let g = chain();
        let inputs = g.concrete_input_connections(TaskId(4), None).unwrap();
        assert_eq!(
            inputs,
            vec![ConcreteConnection {
                source_task: TaskId(1),
                source_port: "out".to_string(),
                sink_task: TaskId(4),
                sink_port: "data".to_string(),
                policy: ConnectionPolicy::buffer(6),
            }]
        );
    }

    #[test]
    fn outputs_skip_forwarding_vertices() {
        let g = chain();
        let outputs = g.concrete_output_connections(TaskId(1), Some("out")).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].sink_task, TaskId(4));
        assert_eq!(outputs[0].sink_port, "data");
        assert!(g.concrete_output_connections(TaskId(1), Some("status")).unwrap().is_empty());
    }

    #[test]
    fn incompatible_chain_is_an_error() {
        let mut g = chain();
        g.add_connection(TaskId(3), "in", TaskId(4), "data", ConnectionPolicy::buffer(1))
            .unwrap();
        g.add_connection(TaskId(1), "out", TaskId(2), "in", ConnectionPolicy::buffer(1))
            .unwrap();
        assert!(g.concrete_input_connections(TaskId(4), None).is_ok());

        let mut broken = DataflowGraph::new();
        broken.add_task(TaskId(1), false);
        broken.add_task(TaskId(2), true);
        broken.add_task(TaskId(3), false);
        broken
            .add_connection(TaskId(1), "out", TaskId(2), "x", ConnectionPolicy::data())
            .unwrap();
        broken
            .add_connection(TaskId(2), "x", TaskId(3), "in", ConnectionPolicy::buffer(3))
            .unwrap();
        let err = broken.concrete_input_connections(TaskId(3), None).unwrap_err();
        assert!(matches!(err, DataflowError::Policy(_)));
    }

    #[test]
    fn forwarding_cycles_terminate() {
        let mut g = DataflowGraph::new();
        g.add_task(TaskId(1), true);
        g.add_task(TaskId(2), true);
        g.add_task(TaskId(3), false);
        g.add_connection(TaskId(1), "p", TaskId(2), "p", ConnectionPolicy::empty())
            .unwrap();
        g.add_connection(TaskId(2), "p", TaskId(1), "p", ConnectionPolicy::empty())
            .unwrap();
        g.add_connection(TaskId(2), "p", TaskId(3), "in", ConnectionPolicy::empty())
            .unwrap();
        assert!(g.concrete_input_connections(TaskId(3), None).unwrap().is_empty());
    }

    #[test]
    fn cache_matches_walk_and_detects_staleness() {
        let mut g = chain();
        let walked = g.concrete_input_connections(TaskId(4), None).unwrap();
        g.enable_concrete_connection_graph().unwrap();
        assert!(g.concrete_cache_enabled());
        assert_eq!(g.concrete_input_connections(TaskId(4), None).unwrap(), walked);
        assert_eq!(
            g.concrete_output_connections(TaskId(1), None).unwrap()[0].sink_task,
            TaskId(4)
        );

        g.add_task(TaskId(5), false);
        assert!(!g.concrete_cache_is_fresh());
        let err = g.concrete_input_connections(TaskId(4), None).unwrap_err();
        assert!(matches!(err, DataflowError::StaleConcreteCache { .. }));

        g.refresh_concrete_connection_graph().unwrap();
        assert_eq!(g.concrete_input_connections(TaskId(4), None).unwrap(), walked);

        g.disable_concrete_connection_graph();
        g.add_task(TaskId(6), false);
        assert_eq!(g.concrete_input_connections(TaskId(4), None).unwrap(), walked);
    }
}
