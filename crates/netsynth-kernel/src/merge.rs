//! Task deduplication
//!
//! Separately instantiated requirements often produce equivalent tasks. The
//! solver folds a task `b` into a task `a` when `a` can stand in for `b`:
//!
//! - `a`'s model fulfills every model required of `b` (an abstract `b` only
//!   requires its abilities, each provided by exactly one service of `a`)
//! - explicit arguments and selected services agree where both are set
//! - composites fill common roles with the same children
//! - the two tasks are not directly connected
//! - every concrete input of `b` is compatible with `a`'s input on the same
//!   sink port, if `a` has one
//! - edges moved from `b` reconcile with `a`'s edges under the policy rule
//!
//! Declining a merge is a [`Mergeability::Rejected`] outcome, never an
//! error.

use crate::config::ResolverConfig;
use crate::dataflow::{ConcreteConnection, ConnectionView};
use crate::error::{DataflowError, ResolutionError};
use crate::plan::{Plan, TaskInstance};
use netsynth_model::{BoundService, ModelRegistry, PolicyError, TaskId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Why two tasks cannot be merged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MergeRejection {
    /// Both sides are the same task
    SameTask,
    /// The replacement does not fulfill a required model
    ModelMismatch {
        /// First model not fulfilled
        missing: String,
    },
    /// Both tasks set an argument to different values
    ArgumentConflict {
        /// Argument name
        name: String,
    },
    /// No service of the replacement provides an ability of the abstract task
    NoProvidingService {
        /// Ability
        ability: String,
    },
    /// Several services of the replacement provide the ability and none is
    /// selected
    AmbiguousProvider {
        /// Ability
        ability: String,
        /// Providing services
        candidates: Vec<String>,
    },
    /// Both tasks are bound to different services
    ServiceMismatch {
        /// Service of the replacement
        kept: String,
        /// Service of the replaced task
        replaced: String,
    },
    /// A role is filled by different children
    ChildrenMismatch {
        /// Role name
        role: String,
    },
    /// The tasks are directly connected
    Adjacent,
    /// Inputs on the same sink port come from different sources
    ConnectionConflict {
        /// Sink port
        port: String,
        /// Source on the replacement
        kept: String,
        /// Source on the replaced task
        replaced: String,
    },
    /// A moved edge and an existing edge of the replacement carry
    /// incompatible policies
    PolicyConflict {
        /// Policy field
        field: String,
        /// Value on the replacement's edge
        kept: String,
        /// Value on the moved edge
        replaced: String,
    },
}

impl std::fmt::Display for MergeRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SameTask => write!(f, "same task"),
            Self::ModelMismatch { missing } => write!(f, "does not fulfill {missing}"),
            Self::NoProvidingService { ability } => write!(f, "no service provides {ability}"),
            Self::AmbiguousProvider {
                ability,
                candidates,
            } => write!(f, "{ability} is provided by {candidates:?}"),
            Self::ArgumentConflict { name } => write!(f, "argument `{name}` differs"),
            Self::ServiceMismatch { kept, replaced } => {
                write!(f, "bound to service {kept}, needs {replaced}")
            }
            Self::ChildrenMismatch { role } => write!(f, "role `{role}` has different children"),
            Self::Adjacent => write!(f, "tasks are connected to each other"),
            Self::ConnectionConflict {
                port,
                kept,
                replaced,
            } => write!(f, "input `{port}` comes from {kept}, not {replaced}"),
            Self::PolicyConflict {
                field,
                kept,
                replaced,
            } => write!(f, "edge policies differ on `{field}`: {kept} != {replaced}"),
        }
    }
}

/// Outcome of a merge check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Mergeability {
    /// The replacement can absorb the other task
    Mergeable,
    /// The merge is declined
    Rejected(MergeRejection),
}

impl Mergeability {
    /// Whether the merge can happen
    #[inline]
    #[must_use]
    pub fn is_mergeable(&self) -> bool {
        matches!(self, Self::Mergeable)
    }

    /// Reason for declining, if any
    #[must_use]
    pub fn rejection(&self) -> Option<&MergeRejection> {
        match self {
            Self::Mergeable => None,
            Self::Rejected(reason) => Some(reason),
        }
    }
}

/// Result of [`MergeSolver::merge_identical_tasks`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// `(kept, removed)` pairs in merge order
    pub merged: Vec<(TaskId, TaskId)>,
    /// Passes run
    pub passes: usize,
    /// A pass completed without merging anything
    pub converged: bool,
    #[serde(skip)]
    replacements: BTreeMap<TaskId, TaskId>,
}

impl MergeReport {
    /// Task that now stands for `task`
    ///
    /// Follows chains of merges; unmerged tasks map to themselves.
    #[must_use]
    pub fn replacement_for(&self, task: TaskId) -> TaskId {
        let mut current = task;
        while let Some(next) = self.replacements.get(&current) {
            current = *next;
        }
        current
    }

    /// Number of tasks removed
    #[inline]
    #[must_use]
    pub fn merge_count(&self) -> usize {
        self.merged.len()
    }

    fn record(&mut self, kept: TaskId, removed: TaskId) {
        self.merged.push((kept, removed));
        self.replacements.insert(removed, kept);
    }
}

/// Merge solver over a plan
#[derive(Debug, Clone, Copy)]
pub struct MergeSolver<'r> {
    registry: &'r ModelRegistry,
    max_passes: usize,
}

impl<'r> MergeSolver<'r> {
    /// Solver with the default pass bound
    #[must_use]
    pub fn new(registry: &'r ModelRegistry) -> Self {
        Self::from_config(registry, &ResolverConfig::default())
    }

    /// Solver configured from a resolver configuration
    #[must_use]
    pub fn from_config(registry: &'r ModelRegistry, config: &ResolverConfig) -> Self {
        Self {
            registry,
            max_passes: config.max_merge_passes,
        }
    }

    /// With a pass bound
    #[inline]
    #[must_use]
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = passes;
        self
    }

    /// Whether `a` can replace `b`
    ///
    /// # Errors
    /// Unknown tasks, or concrete connection errors while comparing inputs.
    pub fn can_merge(&self, plan: &Plan, a: TaskId, b: TaskId) -> Result<Mergeability, ResolutionError> {
        if a == b {
            return Ok(Mergeability::Rejected(MergeRejection::SameTask));
        }
        let kept = plan.task(a)?;
        let replaced = plan.task(b)?;
        if let Some(reason) = self.check_task(plan, kept, replaced) {
            return Ok(Mergeability::Rejected(reason));
        }
        let renames = match self.providing_service(kept, replaced) {
            Ok(service) => port_renames(service.as_ref()),
            Err(reason) => return Ok(Mergeability::Rejected(reason)),
        };
        if plan.dataflow().has_edge(a, b) || plan.dataflow().has_edge(b, a) {
            return Ok(Mergeability::Rejected(MergeRejection::Adjacent));
        }

        let kept_inputs = inputs_by_port(plan.dataflow().concrete_input_connections(a, None)?);
        let replaced_inputs = inputs_by_port(plan.dataflow().concrete_input_connections(b, None)?);
        for (port, sources) in &replaced_inputs {
            let Some(existing) = kept_inputs.get(port) else {
                continue;
            };
            if let Some(source) = sources.iter().find(|s| !existing.contains(*s)) {
                let kept = existing
                    .iter()
                    .next()
                    .map(|(task, port)| format!("{task}.{port}"))
                    .unwrap_or_default();
                return Ok(Mergeability::Rejected(MergeRejection::ConnectionConflict {
                    port: port.clone(),
                    kept,
                    replaced: format!("{}.{}", source.0, source.1),
                }));
            }
        }

        match plan.dataflow().check_replacement(b, a, &renames) {
            Ok(()) => Ok(Mergeability::Mergeable),
            Err(DataflowError::Policy(PolicyError::Incompatible { field, left, right })) => {
                Ok(Mergeability::Rejected(MergeRejection::PolicyConflict {
                    field: field.to_string(),
                    kept: left,
                    replaced: right,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Service of `kept` that serves the abilities of an abstract `replaced`
    ///
    /// `None` when `replaced` is concrete or `kept`'s own model line covers
    /// every ability. The selected service of `kept` is preferred; otherwise
    /// the ability must have exactly one provider.
    fn providing_service(
        &self,
        kept: &TaskInstance,
        replaced: &TaskInstance,
    ) -> Result<Option<BoundService>, MergeRejection> {
        if !replaced.is_abstract {
            return Ok(None);
        }
        let lineage = self.registry.ancestors(&kept.model);
        let mut chosen: Option<BoundService> = None;
        for ability in replaced.requirements.models() {
            if lineage.iter().any(|m| m == ability) {
                continue;
            }
            let service = self.service_for(kept, ability)?;
            match &chosen {
                Some(previous) if previous.name != service.name => {
                    return Err(MergeRejection::ServiceMismatch {
                        kept: previous.name.clone(),
                        replaced: service.name,
                    });
                }
                Some(_) => {}
                None => chosen = Some(service),
            }
        }
        Ok(chosen)
    }

    fn service_for(&self, kept: &TaskInstance, ability: &str) -> Result<BoundService, MergeRejection> {
        if let Some(selected) = &kept.selected_service {
            if self.registry.ancestors(&selected.model).iter().any(|m| m == ability) {
                return Ok(selected.clone());
            }
        }
        match self.registry.services_providing(&kept.model, ability).as_slice() {
            [service] => Ok((*service).clone()),
            [] => Err(MergeRejection::NoProvidingService {
                ability: ability.to_string(),
            }),
            candidates => Err(MergeRejection::AmbiguousProvider {
                ability: ability.to_string(),
                candidates: candidates.iter().map(|s| s.name.clone()).collect(),
            }),
        }
    }

    fn check_task(
        &self,
        plan: &Plan,
        kept: &TaskInstance,
        replaced: &TaskInstance,
    ) -> Option<MergeRejection> {
        let required: Vec<&String> = if replaced.is_abstract {
            replaced.requirements.models().collect()
        } else {
            replaced.fulfilled.iter().chain([&replaced.model]).collect()
        };
        if let Some(missing) = required
            .into_iter()
            .find(|m| !self.registry.fulfills(&kept.model, m))
        {
            return Some(MergeRejection::ModelMismatch {
                missing: missing.clone(),
            });
        }

        for (name, value) in &replaced.arguments {
            if kept.arguments.get(name).is_some_and(|v| v != value) {
                return Some(MergeRejection::ArgumentConflict { name: name.clone() });
            }
        }

        if let (Some(kept_service), Some(replaced_service)) =
            (&kept.selected_service, &replaced.selected_service)
        {
            if kept_service.name != replaced_service.name {
                return Some(MergeRejection::ServiceMismatch {
                    kept: kept_service.name.clone(),
                    replaced: replaced_service.name.clone(),
                });
            }
        }

        let kept_children = plan.children(kept.id);
        for (role, child) in plan.children(replaced.id) {
            if kept_children.get(&role).is_some_and(|c| *c != child) {
                return Some(MergeRejection::ChildrenMismatch { role });
            }
        }
        None
    }

    /// Fold `b` into `a`
    ///
    /// Arguments and dynamic ports missing on `a` are copied from `b`,
    /// deployment hints and fulfilled models are unioned, every edge on `b`
    /// moves to `a` and `b` is removed. An abstract `b` is served through
    /// the one service of `a` providing its abilities, which renames its
    /// ports and becomes `a`'s selected service if `a` had none. An enabled
    /// concrete connection cache is refreshed.
    ///
    /// # Errors
    /// Unknown tasks, [`ResolutionError::Unmergeable`] when no single
    /// service of `a` serves an abstract `b`, or policy conflicts between
    /// moved and existing edges.
    pub fn merge(&self, plan: &mut Plan, a: TaskId, b: TaskId) -> Result<(), ResolutionError> {
        let replaced = plan.task(b)?.clone();
        let provider = self
            .providing_service(plan.task(a)?, &replaced)
            .map_err(|reason| ResolutionError::Unmergeable {
                kept: a,
                replaced: b,
                reason,
            })?;
        let renames = port_renames(provider.as_ref());
        plan.dataflow().check_replacement(b, a, &renames)?;

        let kept = plan.task_mut(a)?;
        for (name, value) in &replaced.arguments {
            kept.arguments
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        for (name, port) in &replaced.dynamic_ports {
            kept.dynamic_ports
                .entry(name.clone())
                .or_insert_with(|| port.clone());
        }
        kept.deployment_hints
            .extend(replaced.deployment_hints.iter().cloned());
        kept.fulfilled.extend(replaced.fulfilled.iter().cloned());
        if kept.selected_service.is_none() {
            kept.selected_service = replaced.selected_service.clone().or(provider);
        }
        plan.replace_task(b, a, &renames)?;

        let dataflow = plan.dataflow_mut();
        if dataflow.concrete_cache_enabled() {
            dataflow.refresh_concrete_connection_graph()?;
        }
        tracing::debug!("merge: {} folded into {}", b, a);
        Ok(())
    }

    /// Merge equivalent tasks until a pass merges nothing
    ///
    /// Each pass tries every pair once, keeping the lower id when both
    /// directions are possible. Stops after the configured pass bound even if
    /// merges are still possible.
    ///
    /// # Errors
    /// Errors from [`MergeSolver::can_merge`] and [`MergeSolver::merge`].
    pub fn merge_identical_tasks(&self, plan: &mut Plan) -> Result<MergeReport, ResolutionError> {
        let mut report = MergeReport::default();
        while report.passes < self.max_passes {
            report.passes += 1;
            let before = report.merge_count();

            let ids = plan.task_ids();
            for (i, &a) in ids.iter().enumerate() {
                for &b in &ids[i + 1..] {
                    if !plan.contains(a) || !plan.contains(b) {
                        continue;
                    }
                    if self.can_merge(plan, a, b)?.is_mergeable() {
                        self.merge(plan, a, b)?;
                        report.record(a, b);
                    } else if self.can_merge(plan, b, a)?.is_mergeable() {
                        self.merge(plan, b, a)?;
                        report.record(b, a);
                    }
                }
            }

            if report.merge_count() == before {
                report.converged = true;
                break;
            }
        }

        if report.converged {
            tracing::info!(
                "merge: {} tasks merged in {} passes",
                report.merge_count(),
                report.passes
            );
        } else {
            tracing::warn!(
                "merge: stopped after {} passes with merges still possible",
                report.passes
            );
        }
        Ok(report)
    }
}

type Sources = BTreeMap<String, BTreeSet<(TaskId, String)>>;

/// Abstract tasks use ability port names
fn port_renames(service: Option<&BoundService>) -> BTreeMap<String, String> {
    service.map(|s| s.port_mappings.clone()).unwrap_or_default()
}

fn inputs_by_port(connections: Vec<ConcreteConnection>) -> Sources {
    let mut by_port = Sources::new();
    for connection in connections {
        by_port
            .entry(connection.sink_port)
            .or_default()
            .insert((connection.source_task, connection.source_port));
    }
    by_port
}
