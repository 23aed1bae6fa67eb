//! Network instantiation
//!
//! Expands an [`InstanceRequirements`] into tasks of a [`Plan`]:
//!
//! 1. a whole-descriptor override registered in the context replaces the
//!    descriptor, keeping its explicit arguments
//! 2. the component model follows model selections to its most specific
//!    implementation; ability-only descriptors pick up a component selected
//!    for the ability, or become abstract placeholders
//! 3. the task is created with argument defaults under explicit arguments
//! 4. compositions resolve each child role, pick the most specific
//!    specialization the selected children allow, recurse into every child
//!    behind a barrier, then realize exports and internal connections
//!
//! # Barrier
//!
//! Role selections visible at a composition are meant for *its* children.
//! Each child is instantiated with those role names cleared, so a selection
//! for `source` at this level never reaches a grandchild that also has a
//! `source` role. Dotted selections (`source.inner`) are handed to the child
//! re-keyed as `inner`.

use crate::config::ResolverConfig;
use crate::error::ResolutionError;
use crate::plan::{Plan, TaskInstance};
use netsynth_model::{
    ChildSpec, ComponentModel, ConnectionPolicy, InstanceRequirements, ModelError, ModelRegistry,
    PortDirection, Selection, SelectionContext, SelectionKey, SelectionTable, Specialization,
    TaskId,
};
use std::collections::{BTreeMap, BTreeSet};

/// How a child role gets filled
#[derive(Debug, Clone)]
enum ChildChoice {
    /// Instantiate these requirements
    Instantiate(InstanceRequirements),
    /// Reuse a task already in the plan
    Existing(TaskId),
    /// Optional child selected as nothing
    Skip,
}

/// Instantiation algorithm bound to a model registry
#[derive(Debug, Clone, Copy)]
pub struct NetworkInstantiator<'r> {
    registry: &'r ModelRegistry,
    max_depth: usize,
}

impl<'r> NetworkInstantiator<'r> {
    /// Instantiator with the default depth bound
    #[must_use]
    pub fn new(registry: &'r ModelRegistry) -> Self {
        Self {
            registry,
            max_depth: ResolverConfig::default().max_depth,
        }
    }

    /// Instantiator configured from a resolver configuration
    #[must_use]
    pub fn from_config(registry: &'r ModelRegistry, config: &ResolverConfig) -> Self {
        Self::new(registry).with_max_depth(config.max_depth)
    }

    /// With a composite nesting bound
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Instantiate `requirements` into `plan` under `context`
    ///
    /// Returns the root task. On error the plan may hold part of the
    /// network; run inside a [`Plan::transaction`] to discard it.
    ///
    /// # Errors
    /// Ambiguous or invalid selections, unknown models, missing ports,
    /// incompatible connection policies and the depth bound.
    pub fn instantiate(
        &self,
        requirements: &InstanceRequirements,
        plan: &mut Plan,
        context: &SelectionContext,
    ) -> Result<TaskId, ResolutionError> {
        self.instantiate_at(requirements, plan, context, 0)
    }

    fn instantiate_at(
        &self,
        original: &InstanceRequirements,
        plan: &mut Plan,
        context: &SelectionContext,
        depth: usize,
    ) -> Result<TaskId, ResolutionError> {
        if depth > self.max_depth {
            return Err(ResolutionError::RecursionLimit {
                depth: self.max_depth,
                model: original.to_string(),
            });
        }

        let mut resolved = match context.direct_selection_for(original) {
            Some(replacement) => {
                tracing::debug!("instantiate: {} overridden by {}", original, replacement);
                original.substituted_by(replacement)
            }
            None => original.clone(),
        };
        self.narrow(&mut resolved, context)?;

        let Some(component) = resolved.component_model(self.registry).map(str::to_string) else {
            return self.placeholder(original, &resolved, plan);
        };
        let model = self.registry.require_component(&component)?;
        if model.is_composition() {
            self.instantiate_composition(original, resolved, model, plan, context, depth)
        } else {
            let task = self.create_task(original, &resolved, model, plan)?;
            tracing::debug!("instantiate: {} -> {} ({})", original, task, model.name);
            Ok(task)
        }
    }

    /// Apply model selections to the descriptor's models
    fn narrow(
        &self,
        resolved: &mut InstanceRequirements,
        context: &SelectionContext,
    ) -> Result<(), ResolutionError> {
        if let Some(component) = resolved.component_model(self.registry).map(str::to_string) {
            let selected = context.resolve_chain(&component)?;
            if selected != component {
                if !self.registry.ancestors(&selected).contains(&component) {
                    return Err(ResolutionError::InvalidSelection {
                        role: component,
                        selected,
                        reason: "selected model does not derive from the required model".to_string(),
                    });
                }
                resolved.narrow_to(self.registry, &selected)?;
            }
            return Ok(());
        }

        let mut chosen: BTreeMap<String, Selection> = BTreeMap::new();
        for ability in resolved.abilities(self.registry) {
            if let Some(
                selection @ (Selection::Component(_)
                | Selection::Service { .. }
                | Selection::Requirements(_)),
            ) = context.resolve(&SelectionKey::model(ability))
            {
                chosen.insert(ability.to_string(), selection.clone());
            }
        }
        let distinct: BTreeSet<String> = chosen.values().map(ToString::to_string).collect();
        if distinct.len() > 1 {
            return Err(ResolutionError::Ambiguous {
                subject: format!("implementation of {resolved}"),
                candidates: distinct.into_iter().collect(),
            });
        }
        let Some((ability, selection)) = chosen.into_iter().next() else {
            return Ok(());
        };

        let (component, service) = match selection {
            Selection::Component(name) => (context.resolve_chain(&name)?, None),
            Selection::Service { component, service } => (component, Some(service)),
            Selection::Requirements(replacement) => {
                *resolved = resolved.substituted_by(&replacement);
                return self.narrow_substituted(resolved, &ability);
            }
            Selection::Task(_) | Selection::Nothing => return Ok(()),
        };
        for required in resolved.models() {
            if !self.registry.fulfills(&component, required) {
                return Err(ResolutionError::InvalidSelection {
                    role: ability,
                    selected: component,
                    reason: format!("does not provide {required}"),
                });
            }
        }
        resolved.add_model(self.registry, &component)?;
        if let Some(service) = service {
            *resolved = std::mem::take(resolved).with_service(&service);
        }
        Ok(())
    }

    fn narrow_substituted(
        &self,
        resolved: &InstanceRequirements,
        ability: &str,
    ) -> Result<(), ResolutionError> {
        let fulfilled = resolved
            .models()
            .any(|model| self.registry.fulfills(model, ability));
        if fulfilled {
            Ok(())
        } else {
            Err(ResolutionError::InvalidSelection {
                role: ability.to_string(),
                selected: resolved.to_string(),
                reason: format!("does not provide {ability}"),
            })
        }
    }

    /// Abstract task standing in for an ability-only descriptor
    fn placeholder(
        &self,
        original: &InstanceRequirements,
        resolved: &InstanceRequirements,
        plan: &mut Plan,
    ) -> Result<TaskId, ResolutionError> {
        let Some(ability) = resolved.abilities(self.registry).first().map(|a| (*a).to_string()) else {
            return Err(ResolutionError::InvalidSelection {
                role: original.to_string(),
                selected: "nothing".to_string(),
                reason: "requirements name no known model".to_string(),
            });
        };
        let mut task = TaskInstance::new(ability.clone())
            .with_arguments(resolved.arguments().clone())
            .with_requirements(original.clone().mark_abstract())
            .with_fulfilled(resolved.models().cloned().collect())
            .abstract_task(true);
        task.deployment_hints.clone_from(resolved.deployment_hints());
        let id = plan.add_task(task);
        tracing::debug!("instantiate: {} -> {} (abstract {})", original, id, ability);
        Ok(id)
    }

    fn create_task(
        &self,
        original: &InstanceRequirements,
        resolved: &InstanceRequirements,
        model: &ComponentModel,
        plan: &mut Plan,
    ) -> Result<TaskId, ResolutionError> {
        let service = resolved.resolve_service(self.registry)?;
        let mut arguments = model.arguments.clone();
        arguments.extend(
            resolved
                .arguments()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        let is_abstract = resolved.is_abstract() || model.is_abstract;
        let record = if is_abstract {
            original.clone().mark_abstract()
        } else {
            original.clone()
        };

        let mut fulfilled: BTreeSet<String> = resolved.models().cloned().collect();
        fulfilled.insert(model.name.clone());
        let mut task = TaskInstance::new(model.name.clone())
            .with_arguments(arguments)
            .with_requirements(record)
            .with_fulfilled(fulfilled)
            .with_service(service)
            .abstract_task(is_abstract)
            .composition(model.is_composition());
        task.deployment_hints.clone_from(resolved.deployment_hints());
        Ok(plan.add_task(task))
    }

    fn instantiate_composition(
        &self,
        original: &InstanceRequirements,
        mut resolved: InstanceRequirements,
        model: &'r ComponentModel,
        plan: &mut Plan,
        context: &SelectionContext,
        depth: usize,
    ) -> Result<TaskId, ResolutionError> {
        let local = context.with_table(resolved.selections().clone());

        let mut choices: BTreeMap<String, ChildChoice> = BTreeMap::new();
        for (role, spec) in &model.children {
            let choice = self.resolve_child(model, spec, &local, plan)?;
            choices.insert(role.clone(), choice);
        }

        let model = self.specialize(model, &choices, &local, plan)?;
        if resolved.component_model(self.registry) != Some(model.name.as_str()) {
            resolved.narrow_to(self.registry, &model.name)?;
        }
        let task = self.create_task(original, &resolved, model, plan)?;
        tracing::debug!("instantiate: {} -> {} (composition {})", original, task, model.name);

        let state = local.current_state();
        let mut barrier = SelectionTable::new();
        for role in model.children.keys() {
            barrier.clear(SelectionKey::role(role.as_str()));
        }
        let masked = local.with_table(barrier);

        let mut children: BTreeMap<String, TaskId> = BTreeMap::new();
        for role in model.children.keys() {
            let child = match choices.remove(role) {
                Some(ChildChoice::Skip) => {
                    tracing::debug!("instantiate: optional child {} of {} skipped", role, task);
                    continue;
                }
                Some(ChildChoice::Existing(id)) => id,
                Some(ChildChoice::Instantiate(requirements)) => {
                    let child_context = masked.with_table(state.role_subtable(role));
                    self.instantiate_at(&requirements, plan, &child_context, depth + 1)?
                }
                None => continue,
            };
            plan.add_child(task, role, child)?;
            children.insert(role.clone(), child);
        }

        for export in model.exports.values() {
            let Some(&child) = children.get(&export.child) else {
                continue;
            };
            let child_port = service_port(plan, child, &export.child_port)?;
            let (source, sink) = match export.direction {
                PortDirection::Input => ((task, export.name.as_str()), (child, child_port.as_str())),
                PortDirection::Output => ((child, child_port.as_str()), (task, export.name.as_str())),
            };
            plan.connect_ports(self.registry, source, sink, ConnectionPolicy::empty())?;
        }

        for connection in &model.connections {
            let (Some(&from), Some(&to)) = (
                children.get(&connection.from_child),
                children.get(&connection.to_child),
            ) else {
                continue;
            };
            let from_port = service_port(plan, from, &connection.from_port)?;
            let to_port = service_port(plan, to, &connection.to_port)?;
            plan.connect_ports(
                self.registry,
                (from, from_port.as_str()),
                (to, to_port.as_str()),
                connection.policy.clone(),
            )?;
        }

        Ok(task)
    }

    /// Decide how a child role is filled
    fn resolve_child(
        &self,
        model: &ComponentModel,
        spec: &ChildSpec,
        context: &SelectionContext,
        plan: &Plan,
    ) -> Result<ChildChoice, ResolutionError> {
        let required = &spec.requirements;
        let Some(selection) = context.resolve(&SelectionKey::role(spec.role.as_str())) else {
            return Ok(ChildChoice::Instantiate(required.clone()));
        };
        let incompatible = |selected: String| ResolutionError::IncompatibleChildSelection {
            role: format!("{}.{}", model.name, spec.role),
            selected,
            required: required.to_string(),
        };

        match selection {
            Selection::Nothing if spec.optional => Ok(ChildChoice::Skip),
            Selection::Nothing => Err(ResolutionError::InvalidSelection {
                role: format!("{}.{}", model.name, spec.role),
                selected: "nothing".to_string(),
                reason: "child is not optional".to_string(),
            }),
            Selection::Component(name) => {
                let name = context.resolve_chain(name)?;
                if !self.fulfills_all(&name, required) {
                    return Err(incompatible(name));
                }
                let mut requirements = required.clone();
                requirements.narrow_to(self.registry, &name)?;
                Ok(ChildChoice::Instantiate(requirements))
            }
            Selection::Service { component, service } => {
                if !self.fulfills_all(component, required) {
                    return Err(incompatible(selection.to_string()));
                }
                let bound = self.registry.require_component(component)?;
                if bound.find_service(service).is_none() {
                    return Err(ModelError::UnknownService {
                        component: component.clone(),
                        service: service.clone(),
                    }
                    .into());
                }
                let mut requirements = required.clone();
                requirements.narrow_to(self.registry, component)?;
                Ok(ChildChoice::Instantiate(requirements.with_service(service)))
            }
            Selection::Requirements(explicit) => {
                let fulfilled = required
                    .models()
                    .all(|m| explicit.models().any(|e| self.registry.fulfills(e, m)));
                if !fulfilled {
                    return Err(incompatible(explicit.to_string()));
                }
                let inherited: Vec<_> = required
                    .arguments()
                    .iter()
                    .filter(|(k, _)| !explicit.arguments().contains_key(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut requirements = (**explicit).clone();
                for model in required.models() {
                    requirements.add_model(self.registry, model)?;
                }
                Ok(ChildChoice::Instantiate(requirements.with_arguments(inherited)))
            }
            Selection::Task(id) => {
                let task = plan.task(*id)?;
                if !self.fulfills_all(&task.model, required) {
                    return Err(incompatible(format!("{} ({})", id, task.model)));
                }
                Ok(ChildChoice::Existing(*id))
            }
        }
    }

    fn fulfills_all(&self, model: &str, required: &InstanceRequirements) -> bool {
        required.models().all(|r| self.registry.fulfills(model, r))
    }

    /// Follow specializations as long as the selected children allow one
    fn specialize(
        &self,
        model: &'r ComponentModel,
        choices: &BTreeMap<String, ChildChoice>,
        context: &SelectionContext,
        plan: &Plan,
    ) -> Result<&'r ComponentModel, ResolutionError> {
        let mut selected: BTreeMap<&str, String> = BTreeMap::new();
        for (role, choice) in choices {
            let name = match choice {
                ChildChoice::Instantiate(requirements) => {
                    match requirements.component_model(self.registry) {
                        Some(component) => Some(context.resolve_chain(component)?),
                        None => requirements.models().next().cloned(),
                    }
                }
                ChildChoice::Existing(id) => Some(plan.task(*id)?.model.clone()),
                ChildChoice::Skip => None,
            };
            if let Some(name) = name {
                selected.insert(role.as_str(), name);
            }
        }

        let mut current = model;
        let mut visited = BTreeSet::from([current.name.clone()]);
        loop {
            let candidates: Vec<&Specialization> = current
                .specializations
                .iter()
                .filter(|s| {
                    s.constraints.iter().all(|(role, required)| {
                        selected
                            .get(role.as_str())
                            .is_some_and(|m| self.registry.fulfills(m, required))
                    })
                })
                .collect();
            let maximal: Vec<&Specialization> = candidates
                .iter()
                .filter(|a| !candidates.iter().any(|b| self.more_specific(b, a)))
                .copied()
                .collect();

            let next = match maximal.as_slice() {
                [] => return Ok(current),
                [one] => one,
                many => {
                    return Err(ResolutionError::Ambiguous {
                        subject: format!("specialization of {}", current.name),
                        candidates: many.iter().map(|s| s.model.clone()).collect(),
                    })
                }
            };
            if !visited.insert(next.model.clone()) {
                return Ok(current);
            }
            let specialized = self.registry.require_component(&next.model)?;
            if !self.registry.ancestors(&specialized.name).contains(&current.name) {
                return Err(ResolutionError::InvalidSelection {
                    role: current.name.clone(),
                    selected: specialized.name.clone(),
                    reason: "specialization does not derive from the composition".to_string(),
                });
            }
            tracing::debug!("instantiate: {} specialized to {}", current.name, specialized.name);
            current = specialized;
        }
    }

    /// Whether specialization `b` is strictly more specific than `a`
    fn more_specific(&self, b: &Specialization, a: &Specialization) -> bool {
        if b.model == a.model {
            return false;
        }
        if self.registry.ancestors(&b.model).contains(&a.model) {
            return true;
        }
        b.constraints.len() > a.constraints.len()
            && a.constraints.iter().all(|(role, required)| {
                b.constraints
                    .get(role)
                    .is_some_and(|m| self.registry.fulfills(m, required))
            })
    }
}

/// Component port realizing `port` on a task selected through a service
fn service_port(plan: &Plan, task: TaskId, port: &str) -> Result<String, ResolutionError> {
    let task = plan.task(task)?;
    Ok(task
        .selected_service
        .as_ref()
        .map_or(port, |service| service.component_port(port))
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::ConnectionView;
    use crate::error::ErrorKind;
    use crate::test_harness::fixtures;

    fn select(entries: &[(SelectionKey, Selection)]) -> SelectionContext {
        let mut table = SelectionTable::new();
        for (key, selection) in entries {
            table.select(key.clone(), selection.clone()).unwrap();
        }
        SelectionContext::from_table(table)
    }

    #[test]
    fn leaf_gets_default_then_explicit_arguments() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let req = InstanceRequirements::from_models(&registry, ["Producer"])
            .unwrap()
            .with_argument("rate", serde_json::json!(50));

        let id = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &SelectionContext::new())
            .unwrap();
        let task = plan.task(id).unwrap();
        assert_eq!(task.model, "Producer");
        assert_eq!(task.arguments["rate"], serde_json::json!(50));
        assert_eq!(task.requirements, req);
    }

    #[test]
    fn model_selection_narrows_component() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let context = select(&[(
            SelectionKey::model("Producer"),
            Selection::component("ProducerV2"),
        )]);
        let req = InstanceRequirements::from_models(&registry, ["Producer"]).unwrap();
        let id = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap();
        assert_eq!(plan.task(id).unwrap().model, "ProducerV2");
    }

    #[test]
    fn unrelated_model_selection_is_invalid() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let context = select(&[(
            SelectionKey::model("Producer"),
            Selection::component("Consumer"),
        )]);
        let req = InstanceRequirements::from_models(&registry, ["Producer"]).unwrap();
        let err = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSelection);
    }

    #[test]
    fn ability_without_selection_is_abstract() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let req = InstanceRequirements::from_models(&registry, ["ImageSource"]).unwrap();
        let id = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &SelectionContext::new())
            .unwrap();
        let task = plan.task(id).unwrap();
        assert!(task.is_abstract);
        assert!(task.requirements.is_abstract());
        assert_eq!(task.model, "ImageSource");
    }

    #[test]
    fn ability_with_service_selection_is_concrete() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let context = select(&[(
            SelectionKey::model("ImageSource"),
            Selection::service("DualCamera", "left"),
        )]);
        let req = InstanceRequirements::from_models(&registry, ["ImageSource"]).unwrap();
        let id = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap();
        let task = plan.task(id).unwrap();
        assert_eq!(task.model, "DualCamera");
        assert_eq!(task.selected_service.as_ref().unwrap().name, "left");
    }

    #[test]
    fn direct_selection_substitutes_descriptor() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let original = InstanceRequirements::from_models(&registry, ["Producer"])
            .unwrap()
            .with_argument("rate", serde_json::json!(1));
        let replacement = InstanceRequirements::from_models(&registry, ["ProducerV2"])
            .unwrap()
            .with_argument("rate", serde_json::json!(99))
            .with_argument("burst", serde_json::json!(true));
        let mut table = SelectionTable::new();
        table
            .override_requirements(original.clone(), replacement)
            .unwrap();

        let id = NetworkInstantiator::new(&registry)
            .instantiate(&original, &mut plan, &SelectionContext::from_table(table))
            .unwrap();
        let task = plan.task(id).unwrap();
        assert_eq!(task.model, "ProducerV2");
        assert_eq!(task.arguments["rate"], serde_json::json!(1));
        assert_eq!(task.arguments["burst"], serde_json::json!(true));
        assert_eq!(task.requirements, original);
    }

    #[test]
    fn composition_children_and_forwarding() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let req = InstanceRequirements::from_models(&registry, ["Pipeline"]).unwrap();
        let pipeline = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &SelectionContext::new())
            .unwrap();

        let source = plan.child(pipeline, "source").unwrap();
        let sink = plan.child(pipeline, "sink").unwrap();
        assert_eq!(plan.task(source).unwrap().model, "Producer");
        assert!(plan.dataflow().is_forwarding(pipeline));
        assert!(plan.dataflow().connected(source, "out", sink, "in"));
        assert!(plan.dataflow().connected(sink, "out", pipeline, "out"));
        plan.check_invariants().unwrap();
    }

    #[test]
    fn barrier_stops_role_selection_at_one_level() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        // Outer has a `source` role filled by Pipeline, which has its own `source`
        let context = select(&[(SelectionKey::role("source"), Selection::component("Pipeline"))]);
        let req = InstanceRequirements::from_models(&registry, ["Outer"]).unwrap();
        let outer = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap();

        let pipeline = plan.child(outer, "source").unwrap();
        assert_eq!(plan.task(pipeline).unwrap().model, "Pipeline");
        let inner_source = plan.child(pipeline, "source").unwrap();
        assert_eq!(plan.task(inner_source).unwrap().model, "Producer");
    }

    #[test]
    fn dotted_selection_reaches_grandchild() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let context = select(&[
            (SelectionKey::role("source"), Selection::component("Pipeline")),
            (SelectionKey::role("source.source"), Selection::component("ProducerV2")),
        ]);
        let req = InstanceRequirements::from_models(&registry, ["Outer"]).unwrap();
        let outer = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap();
        let pipeline = plan.child(outer, "source").unwrap();
        let inner_source = plan.child(pipeline, "source").unwrap();
        assert_eq!(plan.task(inner_source).unwrap().model, "ProducerV2");
    }

    #[test]
    fn incompatible_child_selection_is_rejected() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let context = select(&[(SelectionKey::role("source"), Selection::component("Consumer"))]);
        let req = InstanceRequirements::from_models(&registry, ["Pipeline"]).unwrap();
        let err = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::IncompatibleChildSelection { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidSelection);
    }

    #[test]
    fn optional_child_can_be_skipped() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let context = select(&[(SelectionKey::role("monitor"), Selection::Nothing)]);
        let req = InstanceRequirements::from_models(&registry, ["MonitoredPipeline"]).unwrap();
        let task = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap();
        assert!(plan.child(task, "monitor").is_none());
        assert!(plan.child(task, "source").is_some());

        let context = select(&[(SelectionKey::role("source"), Selection::Nothing)]);
        let err = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut Plan::new(), &context)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidSelection { .. }));
    }

    #[test]
    fn existing_task_is_reused_as_child() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let producer_req = InstanceRequirements::from_models(&registry, ["ProducerV2"]).unwrap();
        let instantiator = NetworkInstantiator::new(&registry);
        let producer = instantiator
            .instantiate(&producer_req, &mut plan, &SelectionContext::new())
            .unwrap();

        let context = select(&[(SelectionKey::role("source"), Selection::Task(producer))]);
        let req = InstanceRequirements::from_models(&registry, ["Pipeline"]).unwrap();
        let pipeline = instantiator.instantiate(&req, &mut plan, &context).unwrap();
        assert_eq!(plan.child(pipeline, "source"), Some(producer));
        assert_eq!(plan.task_count(), 3);
    }

    #[test]
    fn specialization_follows_child_selection() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let context = select(&[(SelectionKey::role("source"), Selection::component("ProducerV2"))]);
        let req = InstanceRequirements::from_models(&registry, ["Pipeline"]).unwrap();
        let task = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap();
        assert_eq!(plan.task(task).unwrap().model, "FastPipeline");
    }

    #[test]
    fn service_ports_are_mapped_in_exports() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let context = select(&[(
            SelectionKey::role("camera"),
            Selection::service("DualCamera", "right"),
        )]);
        let req = InstanceRequirements::from_models(&registry, ["Viewer"]).unwrap();
        let viewer = NetworkInstantiator::new(&registry)
            .instantiate(&req, &mut plan, &context)
            .unwrap();
        let camera = plan.child(viewer, "camera").unwrap();
        let display = plan.child(viewer, "display").unwrap();
        let inputs = plan
            .dataflow()
            .concrete_input_connections(display, Some("image"))
            .unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].source_task, camera);
        assert_eq!(inputs[0].source_port, "right_frame");
        assert_eq!(inputs[0].policy, ConnectionPolicy::buffer(4));
    }

    #[test]
    fn requirements_selection_binds_the_slot_service() {
        let registry = fixtures::registry();
        let explicit = InstanceRequirements::from_models(&registry, ["MonoCamera"]).unwrap();
        for selection in [
            Selection::component("MonoCamera"),
            Selection::requirements(explicit),
        ] {
            let mut plan = Plan::new();
            let context = select(&[(SelectionKey::role("camera"), selection)]);
            let req = InstanceRequirements::from_models(&registry, ["Viewer"]).unwrap();
            let viewer = NetworkInstantiator::new(&registry)
                .instantiate(&req, &mut plan, &context)
                .unwrap();
            let camera = plan.child(viewer, "camera").unwrap();
            let service = plan.task(camera).unwrap().selected_service.clone();
            assert_eq!(service.map(|s| s.name), Some("main".to_string()));

            let display = plan.child(viewer, "display").unwrap();
            let inputs = plan
                .dataflow()
                .concrete_input_connections(display, Some("image"))
                .unwrap();
            assert_eq!(inputs.len(), 1);
            assert_eq!((inputs[0].source_task, inputs[0].source_port.as_str()), (camera, "img"));
        }
    }

    #[test]
    fn depth_limit_is_enforced() {
        let registry = fixtures::registry();
        let mut plan = Plan::new();
        let req = InstanceRequirements::from_models(&registry, ["Outer"]).unwrap();
        let err = NetworkInstantiator::new(&registry)
            .with_max_depth(1)
            .instantiate(&req, &mut plan, &SelectionContext::new())
            .unwrap_err();
        assert!(matches!(err, ResolutionError::RecursionLimit { depth: 1, .. }));
    }
}
