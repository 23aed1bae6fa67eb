//! Model registry
//!
//! Name-keyed store of component and data service models. Registration
//! flattens inheritance (a model sees every feature of its supermodel unless
//! it redeclares it) and validates the composition structure, so the
//! instantiation code can trust every role, export and connection it reads.

use crate::error::ModelError;
use crate::model::{BoundService, ChildSpec, ComponentModel, DataServiceModel, ModelKind, PortSpec};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Registry of all known models
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    components: BTreeMap<String, ComponentModel>,
    services: BTreeMap<String, DataServiceModel>,
}

impl ModelRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an ability model
    ///
    /// # Errors
    /// Duplicate names and unknown parent abilities.
    pub fn register_data_service(&mut self, service: DataServiceModel) -> Result<(), ModelError> {
        if self.contains(&service.name) {
            return Err(ModelError::DuplicateModel(service.name));
        }
        for parent in &service.provides {
            if !self.services.contains_key(parent) {
                return Err(ModelError::UnknownModel(parent.clone()));
            }
        }
        let mut service = service;
        for parent in service.provides.clone() {
            if let Some(parent) = self.services.get(&parent) {
                for (name, port) in &parent.ports {
                    service.ports.entry(name.clone()).or_insert_with(|| port.clone());
                }
            }
        }
        self.services.insert(service.name.clone(), service);
        Ok(())
    }

    /// Register a component or composition model
    ///
    /// # Errors
    /// Duplicate names, unknown parents or services, and composition
    /// structure referring to missing roles or ports.
    pub fn register_component(&mut self, model: ComponentModel) -> Result<(), ModelError> {
        if self.contains(&model.name) {
            return Err(ModelError::DuplicateModel(model.name));
        }

        let mut model = model;
        if let Some(parent) = model.supermodel.clone() {
            let parent = self
                .components
                .get(&parent)
                .ok_or_else(|| ModelError::UnknownModel(parent.clone()))?;
            inherit(&mut model, parent);
        }

        for service in model.services.values() {
            if !self.services.contains_key(&service.model) {
                return Err(ModelError::UnknownModel(service.model.clone()));
            }
            for target in service.port_mappings.values() {
                if model.find_port(target).is_none() && model.find_dynamic_port(target).is_none() {
                    return Err(ModelError::UnknownPort {
                        model: model.name.clone(),
                        port: target.clone(),
                    });
                }
            }
        }

        for child in model.children.values() {
            for name in child.requirements.models() {
                if !self.contains(name) {
                    return Err(ModelError::UnknownModel(name.clone()));
                }
            }
        }

        let mut exported = Vec::with_capacity(model.exports.len());
        for export in model.exports.values() {
            let child = child_of(&model, &export.child)?;
            let port = self.child_port(child, &export.child_port)?;
            exported.push(PortSpec::new(export.name.clone(), port.type_name, export.direction));
        }
        for port in exported {
            model.ports.insert(port.name.clone(), port);
        }

        for connection in &model.connections {
            let from = child_of(&model, &connection.from_child)?;
            self.child_port(from, &connection.from_port)?;
            let to = child_of(&model, &connection.to_child)?;
            self.child_port(to, &connection.to_port)?;
        }

        self.components.insert(model.name.clone(), model);
        Ok(())
    }

    /// Whether any model is registered under this name
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name) || self.services.contains_key(name)
    }

    /// Look up a component or composition model
    #[inline]
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentModel> {
        self.components.get(name)
    }

    /// Look up an ability model
    #[inline]
    #[must_use]
    pub fn data_service(&self, name: &str) -> Option<&DataServiceModel> {
        self.services.get(name)
    }

    /// Look up a component model, failing when unknown
    ///
    /// # Errors
    /// [`ModelError::UnknownModel`].
    pub fn require_component(&self, name: &str) -> Result<&ComponentModel, ModelError> {
        self.components
            .get(name)
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
    }

    /// Whether the name refers to an ability
    #[inline]
    #[must_use]
    pub fn is_ability(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// The model and every ancestor, nearest first
    ///
    /// Components follow the supermodel chain; abilities follow their
    /// parent abilities breadth first.
    #[must_use]
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut result = Vec::new();
        if self.components.contains_key(name) {
            let mut current = Some(name.to_string());
            while let Some(model) = current {
                current = self.components.get(&model).and_then(|m| m.supermodel.clone());
                if result.contains(&model) {
                    break;
                }
                result.push(model);
            }
        } else if self.services.contains_key(name) {
            let mut queue = VecDeque::from([name.to_string()]);
            while let Some(model) = queue.pop_front() {
                if result.contains(&model) {
                    continue;
                }
                if let Some(service) = self.services.get(&model) {
                    queue.extend(service.provides.iter().cloned());
                }
                result.push(model);
            }
        }
        result
    }

    /// Every model name an instance of `model` can stand in for
    #[must_use]
    pub fn fulfilled_models(&self, model: &str) -> BTreeSet<String> {
        let mut fulfilled: BTreeSet<String> = self.ancestors(model).into_iter().collect();
        if let Some(component) = self.components.get(model) {
            for service in component.services.values() {
                fulfilled.extend(self.ancestors(&service.model));
            }
        }
        fulfilled
    }

    /// Whether an instance of `model` can stand in for `required`
    #[must_use]
    pub fn fulfills(&self, model: &str, required: &str) -> bool {
        model == required || self.fulfilled_models(model).contains(required)
    }

    /// Bound services of `component` that provide `ability`
    #[must_use]
    pub fn services_providing(&self, component: &str, ability: &str) -> Vec<&BoundService> {
        self.components.get(component).map_or_else(Vec::new, |model| {
            model
                .services
                .values()
                .filter(|service| self.ancestors(&service.model).iter().any(|a| a == ability))
                .collect()
        })
    }

    /// The more specific of two component models, if they share a line
    #[must_use]
    pub fn most_specific<'a>(&self, left: &'a str, right: &'a str) -> Option<&'a str> {
        if self.ancestors(left).iter().any(|a| a == right) {
            Some(left)
        } else if self.ancestors(right).iter().any(|a| a == left) {
            Some(right)
        } else {
            None
        }
    }

    /// Port of a child slot, looked up on every model the slot requires
    ///
    /// # Errors
    /// [`ModelError::UnknownPort`] when no required model exposes the port.
    pub fn child_port(&self, child: &ChildSpec, port: &str) -> Result<PortSpec, ModelError> {
        for name in child.requirements.models() {
            if let Some(model) = self.components.get(name) {
                if let Some(spec) = model.find_port(port) {
                    return Ok(spec.clone());
                }
                if let Some(dynamic) = model.find_dynamic_port(port) {
                    return Ok(dynamic.instantiate(port));
                }
                if let Some(service) = child
                    .requirements
                    .selected_service()
                    .and_then(|s| model.find_service(s))
                {
                    if let Some(spec) = model.find_port(service.component_port(port)) {
                        return Ok(spec.clone());
                    }
                }
            } else if let Some(spec) = self.service_port(name, port) {
                return Ok(spec);
            }
        }
        Err(ModelError::UnknownPort {
            model: child.requirements.to_string(),
            port: port.to_string(),
        })
    }

    /// Port of an ability, searching parent abilities as well
    #[must_use]
    pub fn service_port(&self, ability: &str, port: &str) -> Option<PortSpec> {
        self.ancestors(ability)
            .iter()
            .filter_map(|name| self.services.get(name))
            .find_map(|service| service.find_port(port).cloned())
    }

    /// Number of registered models
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len() + self.services.len()
    }

    /// Whether nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.services.is_empty()
    }
}

fn child_of<'a>(model: &'a ComponentModel, role: &str) -> Result<&'a ChildSpec, ModelError> {
    model.find_child(role).ok_or_else(|| ModelError::UnknownChild {
        composition: model.name.clone(),
        role: role.to_string(),
    })
}

/// Pull every feature of `parent` that `model` does not redeclare
fn inherit(model: &mut ComponentModel, parent: &ComponentModel) {
    if parent.kind == ModelKind::Composition {
        model.kind = ModelKind::Composition;
    }

    let mut ports = parent.ports.clone();
    ports.extend(std::mem::take(&mut model.ports));
    model.ports = ports;

    let mut services = parent.services.clone();
    services.extend(std::mem::take(&mut model.services));
    model.services = services;

    let mut arguments = parent.arguments.clone();
    arguments.extend(std::mem::take(&mut model.arguments));
    model.arguments = arguments;

    let mut children = parent.children.clone();
    children.extend(std::mem::take(&mut model.children));
    model.children = children;

    let mut exports = parent.exports.clone();
    exports.extend(std::mem::take(&mut model.exports));
    model.exports = exports;

    for dynamic in &parent.dynamic_ports {
        if !model.dynamic_ports.contains(dynamic) {
            model.dynamic_ports.push(dynamic.clone());
        }
    }

    let own = std::mem::take(&mut model.connections);
    model.connections = parent.connections.clone();
    for connection in own {
        if !model.connections.contains(&connection) {
            model.connections.push(connection);
        }
    }
}
