//! Batch resolution
//!
//! [`NetworkResolver::resolve`] is the entry point used by callers that hold
//! a plan: it instantiates a batch of requirements inside a plan
//! transaction, merges equivalent tasks, checks the plan and commits. Any
//! error drops the transaction, leaving the caller's plan untouched.

use crate::config::ResolverConfig;
use crate::dataflow::ConnectionView;
use crate::error::ResolutionError;
use crate::instantiate::NetworkInstantiator;
use crate::merge::{MergeReport, MergeSolver};
use crate::plan::{Plan, PlanId};
use netsynth_model::{InstanceRequirements, ModelRegistry, SelectionContext, TaskId};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of a committed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    /// Plan the batch was committed to
    pub plan: PlanId,
    /// Transaction that carried the batch
    pub transaction: Uuid,
    /// Task for each requirement, after merging, in request order
    pub roots: Vec<TaskId>,
    /// Tasks created by instantiation
    pub instantiated: usize,
    /// Merge solver result, when merging ran
    pub merge: Option<MergeReport>,
    /// Tasks in the plan after commit
    pub task_count: usize,
}

/// Resolver for batches of requirements
#[derive(Debug, Clone)]
pub struct NetworkResolver<'r> {
    registry: &'r ModelRegistry,
    config: ResolverConfig,
}

impl<'r> NetworkResolver<'r> {
    /// Resolver with the default configuration
    #[must_use]
    pub fn new(registry: &'r ModelRegistry) -> Self {
        Self {
            registry,
            config: ResolverConfig::default(),
        }
    }

    /// With a configuration
    #[must_use]
    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `requirements` into `plan` under `context`
    ///
    /// # Errors
    /// The first instantiation, merge or invariant error. The plan is left
    /// as it was before the call.
    pub fn resolve(
        &self,
        plan: &mut Plan,
        requirements: &[InstanceRequirements],
        context: &SelectionContext,
    ) -> Result<ResolutionReport, ResolutionError> {
        let plan_id = plan.id();
        let mut tx = plan.transaction();
        let before = tx.task_count();

        let instantiator = NetworkInstantiator::from_config(self.registry, &self.config);
        let mut roots = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            roots.push(instantiator.instantiate(requirement, &mut tx, context)?);
        }
        let instantiated = tx.task_count() - before;
        tracing::debug!(
            "resolve: {} requirements instantiated {} tasks",
            requirements.len(),
            instantiated
        );

        let dataflow = tx.dataflow_mut();
        if self.config.authoritative_concrete_cache && !dataflow.concrete_cache_enabled() {
            dataflow.enable_concrete_connection_graph()?;
        } else if dataflow.concrete_cache_enabled() {
            dataflow.refresh_concrete_connection_graph()?;
        }

        let merge = if self.config.merge_after_resolution {
            let report = MergeSolver::from_config(self.registry, &self.config)
                .merge_identical_tasks(&mut tx)?;
            for root in &mut roots {
                *root = report.replacement_for(*root);
            }
            Some(report)
        } else {
            None
        };

        if self.config.check_invariants {
            tx.check_invariants()?;
            for task in tx.task_ids() {
                tx.dataflow().concrete_input_connections(task, None)?;
            }
        }

        let report = ResolutionReport {
            plan: plan_id,
            transaction: tx.id(),
            roots,
            instantiated,
            merge,
            task_count: tx.task_count(),
        };
        tx.commit();
        tracing::info!(
            "resolve: committed {} roots, {} tasks in plan",
            report.roots.len(),
            report.task_count
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_harness::fixtures;
    use netsynth_model::{Selection, SelectionKey, SelectionTable};

    fn requirement(registry: &ModelRegistry, model: &str) -> InstanceRequirements {
        InstanceRequirements::from_models(registry, [model]).unwrap()
    }

    #[test]
    fn batch_merges_duplicate_roots() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let report = NetworkResolver::new(&registry)
            .resolve(
                &mut plan,
                &[requirement(&registry, "Consumer"), requirement(&registry, "Consumer")],
                &SelectionContext::new(),
            )
            .unwrap();
        assert_eq!(report.instantiated, 2);
        assert_eq!(report.task_count, 1);
        assert_eq!(report.roots[0], report.roots[1]);
        assert_eq!(plan.task_count(), 1);
    }

    #[test]
    fn merging_can_be_disabled() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let report = NetworkResolver::new(&registry)
            .with_config(ResolverConfig::new().with_merge(false))
            .resolve(
                &mut plan,
                &[requirement(&registry, "Consumer"), requirement(&registry, "Consumer")],
                &SelectionContext::new(),
            )
            .unwrap();
        assert!(report.merge.is_none());
        assert_eq!(plan.task_count(), 2);
    }

    #[test]
    fn failed_batch_leaves_plan_untouched() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let resolver = NetworkResolver::new(&registry);
        resolver
            .resolve(&mut plan, &[requirement(&registry, "Logger")], &SelectionContext::new())
            .unwrap();

        let err = resolver
            .resolve(
                &mut plan,
                &[requirement(&registry, "Pipeline"), requirement(&registry, "DualCamera")
                    .with_model("ImageSource")],
                &SelectionContext::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousSelection);
        assert_eq!(plan.task_count(), 1);
    }

    #[test]
    fn authoritative_cache_stays_fresh() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let mut table = SelectionTable::new();
        table
            .select(SelectionKey::role("source"), Selection::component("ProducerV2"))
            .unwrap();
        NetworkResolver::new(&registry)
            .with_config(ResolverConfig::new().with_authoritative_cache(true))
            .resolve(
                &mut plan,
                &[requirement(&registry, "Pipeline"), requirement(&registry, "Pipeline")],
                &SelectionContext::from_table(table),
            )
            .unwrap();
        assert!(plan.dataflow().concrete_cache_enabled());
        assert!(plan.dataflow().concrete_cache_is_fresh());
        assert_eq!(plan.task_count(), 3);
    }
}
