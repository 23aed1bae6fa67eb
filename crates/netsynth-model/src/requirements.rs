//! Requirement descriptors
//!
//! [`InstanceRequirements`] is what a caller asks for: a set of models (at
//! most one concrete component line plus any number of abilities), an
//! optional bound-service name, arguments, deployment hints and the
//! descriptor's own selections for its children.
//!
//! # Example
//!
//! ```rust,ignore
//! let req = InstanceRequirements::from_models(&registry, ["Producer", "Source"])?
//!     .with_argument("rate", json!(20))
//!     .use_selection(SelectionKey::role("source"), Selection::component("ProducerV2"))?;
//! ```

use crate::error::{ModelError, SelectionError};
use crate::model::{BoundService, PortSpec};
use crate::registry::ModelRegistry;
use crate::selection::{Selection, SelectionKey, SelectionTable};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Requirement descriptor
///
/// Equality compares models, selected service and arguments; hints,
/// selections and the abstract flag are not part of identity.
#[derive(Debug, Clone, Default)]
pub struct InstanceRequirements {
    models: BTreeSet<String>,
    selected_service: Option<String>,
    arguments: BTreeMap<String, Value>,
    deployment_hints: BTreeSet<String>,
    selections: SelectionTable,
    is_abstract: bool,
}

/// Port found through a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    /// Model exposing the port
    pub model: String,
    /// Port name on the component (after service mapping)
    pub component_port: String,
    /// Port descriptor
    pub port: PortSpec,
}

/// Child slot found through a descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRef {
    /// Composition declaring the child
    pub composition: String,
    /// Role name
    pub role: String,
    /// Requirements of the slot
    pub requirements: InstanceRequirements,
}

/// Bound service found through a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    /// Component model
    pub component: String,
    /// Bound service
    pub service: BoundService,
}

impl InstanceRequirements {
    /// Empty descriptor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor for a set of models, normalized against the registry
    ///
    /// # Errors
    /// Unknown models, or two component models on different lines.
    pub fn from_models<'a, I>(registry: &ModelRegistry, models: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut requirements = Self::new();
        for model in models {
            requirements.add_model(registry, model)?;
        }
        Ok(requirements)
    }

    /// Add a model without checking it
    ///
    /// Used for model declarations that are validated at registration.
    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.models.insert(model.to_string());
        self
    }

    /// Add a model, keeping at most one component per ancestry line
    ///
    /// # Errors
    /// [`ModelError::UnknownModel`] or [`ModelError::IncompatibleModels`].
    pub fn add_model(&mut self, registry: &ModelRegistry, model: &str) -> Result<(), ModelError> {
        if registry.is_ability(model) {
            self.models.insert(model.to_string());
            return Ok(());
        }
        registry.require_component(model)?;
        match self.component_model(registry) {
            None => {
                self.models.insert(model.to_string());
            }
            Some(current) => {
                let current = current.to_string();
                let keep = registry.most_specific(&current, model).ok_or_else(|| {
                    ModelError::IncompatibleModels {
                        left: current.clone(),
                        right: model.to_string(),
                    }
                })?;
                if keep != current {
                    self.models.remove(&current);
                    self.models.insert(keep.to_string());
                }
            }
        }
        Ok(())
    }

    /// Replace the component model by a more specific one
    ///
    /// # Errors
    /// [`ModelError::IncompatibleModels`] if `model` does not descend from
    /// the current component model.
    pub fn narrow_to(&mut self, registry: &ModelRegistry, model: &str) -> Result<(), ModelError> {
        registry.require_component(model)?;
        if let Some(current) = self.component_model(registry).map(str::to_string) {
            if !registry.ancestors(model).contains(&current) {
                return Err(ModelError::IncompatibleModels {
                    left: current,
                    right: model.to_string(),
                });
            }
            self.models.remove(&current);
        }
        self.models.insert(model.to_string());
        Ok(())
    }

    /// Set an argument
    #[must_use]
    pub fn with_argument(mut self, name: &str, value: Value) -> Self {
        self.arguments.insert(name.to_string(), value);
        self
    }

    /// Set several arguments
    #[must_use]
    pub fn with_arguments<I>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.arguments.extend(arguments);
        self
    }

    /// Select a bound service by name
    #[must_use]
    pub fn with_service(mut self, service: &str) -> Self {
        self.selected_service = Some(service.to_string());
        self
    }

    /// Add a deployment preference
    #[must_use]
    pub fn with_deployment_hint(mut self, hint: &str) -> Self {
        self.deployment_hints.insert(hint.to_string());
        self
    }

    /// Mark as an abstract placeholder
    #[must_use]
    pub fn mark_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Add a selection to the descriptor's own table
    ///
    /// # Errors
    /// [`SelectionError::Conflict`] on a different selection for the key.
    pub fn use_selection(
        mut self,
        key: SelectionKey,
        selection: Selection,
    ) -> Result<Self, SelectionError> {
        self.selections.select(key, selection)?;
        Ok(self)
    }

    /// Replace the descriptor's own table
    #[must_use]
    pub fn with_selections(mut self, selections: SelectionTable) -> Self {
        self.selections = selections;
        self
    }

    /// Required models
    #[inline]
    pub fn models(&self) -> impl Iterator<Item = &String> {
        self.models.iter()
    }

    /// Whether `model` is one of the required models
    #[inline]
    #[must_use]
    pub fn requires(&self, model: &str) -> bool {
        self.models.contains(model)
    }

    /// Selected service name
    #[inline]
    #[must_use]
    pub fn selected_service(&self) -> Option<&str> {
        self.selected_service.as_deref()
    }

    /// Explicit arguments
    #[inline]
    #[must_use]
    pub fn arguments(&self) -> &BTreeMap<String, Value> {
        &self.arguments
    }

    /// Deployment preferences
    #[inline]
    #[must_use]
    pub fn deployment_hints(&self) -> &BTreeSet<String> {
        &self.deployment_hints
    }

    /// The descriptor's own selections
    #[inline]
    #[must_use]
    pub fn selections(&self) -> &SelectionTable {
        &self.selections
    }

    /// Whether this is an abstract placeholder
    #[inline]
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// The component model, if any
    #[must_use]
    pub fn component_model<'a>(&'a self, registry: &ModelRegistry) -> Option<&'a str> {
        self.models
            .iter()
            .find(|model| registry.component(model).is_some())
            .map(String::as_str)
    }

    /// Required abilities
    #[must_use]
    pub fn abilities<'a>(&'a self, registry: &ModelRegistry) -> Vec<&'a str> {
        self.models
            .iter()
            .filter(|model| registry.is_ability(model))
            .map(String::as_str)
            .collect()
    }

    /// This descriptor replaced by `replacement`, keeping own arguments
    ///
    /// Explicit arguments of `self` win over the replacement's. Hints and
    /// selections are unions with the replacement's entries first.
    #[must_use]
    pub fn substituted_by(&self, replacement: &InstanceRequirements) -> InstanceRequirements {
        let mut result = replacement.clone();
        result
            .arguments
            .extend(self.arguments.iter().map(|(k, v)| (k.clone(), v.clone())));
        result
            .deployment_hints
            .extend(self.deployment_hints.iter().cloned());
        if result.selected_service.is_none() {
            result.selected_service.clone_from(&self.selected_service);
        }
        for (key, entry) in self.selections.iter() {
            if result.selections.get(key).is_none() {
                result.selections.set_entry(key.clone(), entry.clone());
            }
        }
        result.is_abstract = result.is_abstract || self.is_abstract;
        result
    }

    /// The bound service of the component model that serves this descriptor
    ///
    /// With an explicit service name that service is used. Otherwise every
    /// required ability must be provided by exactly one bound service, and
    /// the service for the first ability is returned.
    ///
    /// # Errors
    /// [`ModelError::UnknownService`], [`ModelError::MissingService`] or
    /// [`ModelError::AmbiguousService`].
    pub fn resolve_service(
        &self,
        registry: &ModelRegistry,
    ) -> Result<Option<BoundService>, ModelError> {
        let Some(component) = self.component_model(registry) else {
            return Ok(None);
        };
        let model = registry.require_component(component)?;

        if let Some(name) = &self.selected_service {
            return model
                .find_service(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| ModelError::UnknownService {
                    component: component.to_string(),
                    service: name.clone(),
                });
        }

        let mut selected = None;
        for ability in self.abilities(registry) {
            let candidates = registry.services_providing(component, ability);
            match candidates.as_slice() {
                [] => {
                    return Err(ModelError::MissingService {
                        component: component.to_string(),
                        ability: ability.to_string(),
                    })
                }
                [service] => {
                    if selected.is_none() {
                        selected = Some((*service).clone());
                    }
                }
                many => {
                    return Err(ModelError::AmbiguousService {
                        component: component.to_string(),
                        ability: ability.to_string(),
                        candidates: many.iter().map(|s| s.name.clone()).collect(),
                    })
                }
            }
        }
        Ok(selected)
    }

    /// Find a port through the descriptor's models
    ///
    /// A selected service maps service port names to component ports.
    #[must_use]
    pub fn find_port(&self, registry: &ModelRegistry, name: &str) -> Option<PortRef> {
        if let Some(component) = self.component_model(registry) {
            let model = registry.component(component)?;
            let mapped = self
                .selected_service
                .as_deref()
                .and_then(|s| model.find_service(s))
                .map_or(name, |service| service.component_port(name));
            let port = model
                .find_port(mapped)
                .cloned()
                .or_else(|| model.find_dynamic_port(mapped).map(|d| d.instantiate(mapped)));
            if let Some(port) = port {
                return Some(PortRef {
                    model: component.to_string(),
                    component_port: mapped.to_string(),
                    port,
                });
            }
        }
        self.abilities(registry).into_iter().find_map(|ability| {
            registry.service_port(ability, name).map(|port| PortRef {
                model: ability.to_string(),
                component_port: name.to_string(),
                port,
            })
        })
    }

    /// Find a child slot of the component model
    #[must_use]
    pub fn find_child(&self, registry: &ModelRegistry, role: &str) -> Option<ChildRef> {
        let component = self.component_model(registry)?;
        let child = registry.component(component)?.find_child(role)?;
        Some(ChildRef {
            composition: component.to_string(),
            role: role.to_string(),
            requirements: child.requirements.clone(),
        })
    }

    /// Find a bound service of the component model by name
    #[must_use]
    pub fn find_data_service(&self, registry: &ModelRegistry, name: &str) -> Option<ServiceRef> {
        let component = self.component_model(registry)?;
        let service = registry.component(component)?.find_service(name)?;
        Some(ServiceRef {
            component: component.to_string(),
            service: service.clone(),
        })
    }
}

impl PartialEq for InstanceRequirements {
    fn eq(&self, other: &Self) -> bool {
        self.models == other.models
            && self.selected_service == other.selected_service
            && self.arguments == other.arguments
    }
}

impl std::fmt::Display for InstanceRequirements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let models: Vec<&str> = self.models.iter().map(String::as_str).collect();
        write!(f, "{}", models.join(","))?;
        if let Some(service) = &self.selected_service {
            write!(f, "[{service}]")?;
        }
        if !self.arguments.is_empty() {
            let args: Vec<String> = self
                .arguments
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect();
            write!(f, "({})", args.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComponentModel, DataServiceModel};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry
            .register_data_service(DataServiceModel::new("ImageSource").output("frame", "/img"))
            .unwrap();
        registry
            .register_component(ComponentModel::component("Base").output("status", "/state"))
            .unwrap();
        registry
            .register_component(
                ComponentModel::component("Camera")
                    .subclass_of("Base")
                    .output("frame", "/img")
                    .provides("main", "ImageSource"),
            )
            .unwrap();
        registry
            .register_component(
                ComponentModel::component("DualCamera")
                    .output("left_frame", "/img")
                    .output("right_frame", "/img")
                    .provides_mapped("left", "ImageSource", [("frame", "left_frame")])
                    .provides_mapped("right", "ImageSource", [("frame", "right_frame")]),
            )
            .unwrap();
        registry
            .register_component(ComponentModel::component("Other"))
            .unwrap();
        registry
    }

    #[test]
    fn models_normalize_to_most_specific_component() {
        let registry = registry();
        let req =
            InstanceRequirements::from_models(&registry, ["Base", "Camera", "ImageSource"]).unwrap();
        let models: Vec<_> = req.models().cloned().collect();
        assert_eq!(models, vec!["Camera".to_string(), "ImageSource".to_string()]);
        assert_eq!(req.component_model(&registry), Some("Camera"));
        assert_eq!(req.abilities(&registry), vec!["ImageSource"]);
    }

    #[test]
    fn unrelated_components_are_incompatible() {
        let registry = registry();
        let err = InstanceRequirements::from_models(&registry, ["Camera", "Other"]).unwrap_err();
        assert_eq!(
            err,
            ModelError::IncompatibleModels {
                left: "Camera".to_string(),
                right: "Other".to_string()
            }
        );
    }

    #[test]
    fn equality_ignores_hints_and_selections() {
        let a = InstanceRequirements::new()
            .with_model("Camera")
            .with_argument("fps", json!(30))
            .with_deployment_hint("host-a");
        let b = InstanceRequirements::new()
            .with_model("Camera")
            .with_argument("fps", json!(30))
            .use_selection(SelectionKey::role("x"), Selection::Nothing)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_service("main"));
        assert_ne!(a, b.with_argument("fps", json!(15)));
    }

    #[test]
    fn substitution_keeps_explicit_arguments() {
        let original = InstanceRequirements::new()
            .with_model("Base")
            .with_argument("fps", json!(30));
        let replacement = InstanceRequirements::new()
            .with_model("Camera")
            .with_argument("fps", json!(10))
            .with_argument("exposure", json!(2));

        let result = original.substituted_by(&replacement);
        assert!(result.requires("Camera"));
        assert!(!result.requires("Base"));
        assert_eq!(result.arguments()["fps"], json!(30));
        assert_eq!(result.arguments()["exposure"], json!(2));
    }

    #[test]
    fn single_provider_is_selected() {
        let registry = registry();
        let req = InstanceRequirements::from_models(&registry, ["Camera", "ImageSource"]).unwrap();
        let service = req.resolve_service(&registry).unwrap().unwrap();
        assert_eq!(service.name, "main");
    }

    #[test]
    fn sibling_providers_are_ambiguous() {
        let registry = registry();
        let req =
            InstanceRequirements::from_models(&registry, ["DualCamera", "ImageSource"]).unwrap();
        let err = req.resolve_service(&registry).unwrap_err();
        assert_eq!(
            err,
            ModelError::AmbiguousService {
                component: "DualCamera".to_string(),
                ability: "ImageSource".to_string(),
                candidates: vec!["left".to_string(), "right".to_string()],
            }
        );

        let disambiguated = req.with_service("right");
        let service = disambiguated.resolve_service(&registry).unwrap().unwrap();
        assert_eq!(service.component_port("frame"), "right_frame");
    }

    #[test]
    fn missing_provider_is_reported() {
        let registry = registry();
        let req = InstanceRequirements::from_models(&registry, ["Other", "ImageSource"]).unwrap();
        assert!(matches!(
            req.resolve_service(&registry),
            Err(ModelError::MissingService { .. })
        ));
    }

    #[test]
    fn find_port_maps_through_selected_service() {
        let registry = registry();
        let req = InstanceRequirements::from_models(&registry, ["DualCamera"])
            .unwrap()
            .with_service("left");
        let port = req.find_port(&registry, "frame").unwrap();
        assert_eq!(port.component_port, "left_frame");
        assert!(req.find_port(&registry, "missing").is_none());

        let ability_only = InstanceRequirements::from_models(&registry, ["ImageSource"]).unwrap();
        assert_eq!(ability_only.find_port(&registry, "frame").unwrap().model, "ImageSource");
    }

    #[test]
    fn find_data_service_by_name() {
        let registry = registry();
        let req = InstanceRequirements::from_models(&registry, ["DualCamera"]).unwrap();
        assert_eq!(req.find_data_service(&registry, "left").unwrap().service.model, "ImageSource");
        assert!(req.find_data_service(&registry, "main").is_none());
        assert!(req.find_child(&registry, "anything").is_none());
    }
}
