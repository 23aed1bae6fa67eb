//! Component, composition and data service models
//!
//! Models are plain descriptors assembled with builder methods and handed to
//! the [`ModelRegistry`](crate::ModelRegistry). Nothing is generated at
//! runtime; every question about a model (which ports, which services, which
//! children) goes through an explicit `find_*` accessor that returns `None`
//! when the feature does not exist.

use crate::error::ModelError;
use crate::policy::ConnectionPolicy;
use crate::requirements::InstanceRequirements;
use crate::types::PortDirection;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// A statically declared port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortSpec {
    /// Port name
    pub name: String,
    /// Data type carried by the port
    pub type_name: String,
    /// Port direction
    pub direction: PortDirection,
}

impl PortSpec {
    /// Create a port descriptor
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            direction,
        }
    }

    /// Whether the port receives data
    #[inline]
    #[must_use]
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    /// Whether the port emits data
    #[inline]
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// Port family whose members are only known at instantiation time
///
/// The pattern is matched against the whole port name.
#[derive(Debug, Clone)]
pub struct DynamicPortSpec {
    pattern: String,
    regex: Regex,
    /// Data type of instantiated ports
    pub type_name: String,
    /// Direction of instantiated ports
    pub direction: PortDirection,
}

impl DynamicPortSpec {
    /// Compile a dynamic port family
    ///
    /// # Errors
    /// [`ModelError::InvalidPortPattern`] if the pattern is not a valid regex.
    pub fn new(
        pattern: impl Into<String>,
        type_name: impl Into<String>,
        direction: PortDirection,
    ) -> Result<Self, ModelError> {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            ModelError::InvalidPortPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            pattern,
            regex,
            type_name: type_name.into(),
            direction,
        })
    }

    /// Source pattern
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether a port name belongs to this family
    #[inline]
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Concrete port descriptor for a member of the family
    #[must_use]
    pub fn instantiate(&self, name: &str) -> PortSpec {
        PortSpec::new(name, self.type_name.clone(), self.direction)
    }
}

impl PartialEq for DynamicPortSpec {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
            && self.type_name == other.type_name
            && self.direction == other.direction
    }
}

/// Interface-only capability (ability) model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataServiceModel {
    /// Model name
    pub name: String,
    /// Parent abilities this one refines
    pub provides: Vec<String>,
    /// Ports every provider must expose
    pub ports: IndexMap<String, PortSpec>,
}

impl DataServiceModel {
    /// Create an empty ability model
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare an output port
    #[must_use]
    pub fn output(mut self, name: &str, type_name: &str) -> Self {
        self.ports
            .insert(name.to_string(), PortSpec::new(name, type_name, PortDirection::Output));
        self
    }

    /// Declare an input port
    #[must_use]
    pub fn input(mut self, name: &str, type_name: &str) -> Self {
        self.ports
            .insert(name.to_string(), PortSpec::new(name, type_name, PortDirection::Input));
        self
    }

    /// Refine another ability
    #[must_use]
    pub fn provides(mut self, parent: &str) -> Self {
        self.provides.push(parent.to_string());
        self
    }

    /// Look up a port by name
    #[inline]
    #[must_use]
    pub fn find_port(&self, name: &str) -> Option<&PortSpec> {
        self.ports.get(name)
    }
}

/// An ability provided by a component under a given name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundService {
    /// Service name on the component (the `:as` disambiguator)
    pub name: String,
    /// Ability model implemented
    pub model: String,
    /// Service port name to component port name
    pub port_mappings: BTreeMap<String, String>,
}

impl BoundService {
    /// Component port that realizes a service port
    #[must_use]
    pub fn component_port<'a>(&'a self, service_port: &'a str) -> &'a str {
        self.port_mappings
            .get(service_port)
            .map_or(service_port, String::as_str)
    }
}

/// Whether a model is a leaf component or a composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// Leaf component with real ports
    #[default]
    Component,
    /// Composite built from named children
    Composition,
}

/// A named child slot of a composition
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSpec {
    /// Role name
    pub role: String,
    /// What the child must be
    pub requirements: InstanceRequirements,
    /// Whether the slot may be explicitly selected as nothing
    pub optional: bool,
}

/// A composition port that forwards to a child's port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortExport {
    /// Port name on the composition
    pub name: String,
    /// Port direction on the composition
    pub direction: PortDirection,
    /// Child role owning the real port
    pub child: String,
    /// Port name on the child (may be a service port)
    pub child_port: String,
}

/// Internal connection between two children
#[derive(Debug, Clone, PartialEq)]
pub struct ChildConnection {
    /// Source role
    pub from_child: String,
    /// Source port
    pub from_port: String,
    /// Sink role
    pub to_child: String,
    /// Sink port
    pub to_port: String,
    /// Connection policy
    pub policy: ConnectionPolicy,
}

/// A more specific composition chosen when child selections allow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specialization {
    /// Specialized composition model
    pub model: String,
    /// Role name to model the selected child must fulfill
    pub constraints: BTreeMap<String, String>,
}

/// Component or composition model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentModel {
    /// Model name
    pub name: String,
    /// Leaf or composite
    pub kind: ModelKind,
    /// Direct parent model
    pub supermodel: Option<String>,
    /// Abstract models only appear as placeholders
    pub is_abstract: bool,
    /// Static ports (exports included for compositions)
    pub ports: IndexMap<String, PortSpec>,
    /// Dynamic port families
    pub dynamic_ports: Vec<DynamicPortSpec>,
    /// Bound services by name
    pub services: IndexMap<String, BoundService>,
    /// Argument defaults
    pub arguments: BTreeMap<String, Value>,
    /// Child slots (compositions only)
    pub children: IndexMap<String, ChildSpec>,
    /// Exported ports (compositions only)
    pub exports: IndexMap<String, PortExport>,
    /// Internal connections (compositions only)
    pub connections: Vec<ChildConnection>,
    /// Candidate specializations (compositions only)
    pub specializations: Vec<Specialization>,
}

impl ComponentModel {
    /// Leaf component model
    #[must_use]
    pub fn component(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Composition model
    #[must_use]
    pub fn composition(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ModelKind::Composition,
            ..Self::default()
        }
    }

    /// Set the parent model
    #[must_use]
    pub fn subclass_of(mut self, parent: &str) -> Self {
        self.supermodel = Some(parent.to_string());
        self
    }

    /// Mark the model abstract
    #[must_use]
    pub fn abstract_model(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Declare an output port
    #[must_use]
    pub fn output(mut self, name: &str, type_name: &str) -> Self {
        self.ports
            .insert(name.to_string(), PortSpec::new(name, type_name, PortDirection::Output));
        self
    }

    /// Declare an input port
    #[must_use]
    pub fn input(mut self, name: &str, type_name: &str) -> Self {
        self.ports
            .insert(name.to_string(), PortSpec::new(name, type_name, PortDirection::Input));
        self
    }

    /// Declare a dynamic input family
    ///
    /// # Errors
    /// [`ModelError::InvalidPortPattern`] if the pattern does not compile.
    pub fn dynamic_input(mut self, pattern: &str, type_name: &str) -> Result<Self, ModelError> {
        self.dynamic_ports
            .push(DynamicPortSpec::new(pattern, type_name, PortDirection::Input)?);
        Ok(self)
    }

    /// Declare a dynamic output family
    ///
    /// # Errors
    /// [`ModelError::InvalidPortPattern`] if the pattern does not compile.
    pub fn dynamic_output(mut self, pattern: &str, type_name: &str) -> Result<Self, ModelError> {
        self.dynamic_ports
            .push(DynamicPortSpec::new(pattern, type_name, PortDirection::Output)?);
        Ok(self)
    }

    /// Declare an argument with its default value
    #[must_use]
    pub fn argument(mut self, name: &str, default: Value) -> Self {
        self.arguments.insert(name.to_string(), default);
        self
    }

    /// Provide an ability under `name`, with identical port names
    #[must_use]
    pub fn provides(self, name: &str, service_model: &str) -> Self {
        self.provides_mapped(name, service_model, std::iter::empty::<(&str, &str)>())
    }

    /// Provide an ability under `name`, mapping service ports to own ports
    #[must_use]
    pub fn provides_mapped<'a, I>(mut self, name: &str, service_model: &str, mappings: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let port_mappings = mappings
            .into_iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        self.services.insert(
            name.to_string(),
            BoundService {
                name: name.to_string(),
                model: service_model.to_string(),
                port_mappings,
            },
        );
        self
    }

    /// Declare a mandatory child slot
    #[must_use]
    pub fn child(self, role: &str, model: &str) -> Self {
        self.child_with(role, InstanceRequirements::new().with_model(model))
    }

    /// Declare a mandatory child slot with full requirements
    #[must_use]
    pub fn child_with(mut self, role: &str, requirements: InstanceRequirements) -> Self {
        self.children.insert(
            role.to_string(),
            ChildSpec {
                role: role.to_string(),
                requirements,
                optional: false,
            },
        );
        self
    }

    /// Declare an optional child slot
    #[must_use]
    pub fn optional_child(mut self, role: &str, model: &str) -> Self {
        self.children.insert(
            role.to_string(),
            ChildSpec {
                role: role.to_string(),
                requirements: InstanceRequirements::new().with_model(model),
                optional: true,
            },
        );
        self
    }

    /// Export a child's output as an output of the composition
    #[must_use]
    pub fn export_output(self, name: &str, child: &str, child_port: &str) -> Self {
        self.export(name, PortDirection::Output, child, child_port)
    }

    /// Export a child's input as an input of the composition
    #[must_use]
    pub fn export_input(self, name: &str, child: &str, child_port: &str) -> Self {
        self.export(name, PortDirection::Input, child, child_port)
    }

    fn export(mut self, name: &str, direction: PortDirection, child: &str, child_port: &str) -> Self {
        self.exports.insert(
            name.to_string(),
            PortExport {
                name: name.to_string(),
                direction,
                child: child.to_string(),
                child_port: child_port.to_string(),
            },
        );
        self
    }

    /// Connect two children
    #[must_use]
    pub fn connect(
        mut self,
        from: (&str, &str),
        to: (&str, &str),
        policy: ConnectionPolicy,
    ) -> Self {
        self.connections.push(ChildConnection {
            from_child: from.0.to_string(),
            from_port: from.1.to_string(),
            to_child: to.0.to_string(),
            to_port: to.1.to_string(),
            policy,
        });
        self
    }

    /// Register a specialization applying when every constraint is met
    #[must_use]
    pub fn specialize<'a, I>(mut self, model: &str, constraints: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.specializations.push(Specialization {
            model: model.to_string(),
            constraints: constraints
                .into_iter()
                .map(|(role, model)| (role.to_string(), model.to_string()))
                .collect(),
        });
        self
    }

    /// Whether this is a composition
    #[inline]
    #[must_use]
    pub fn is_composition(&self) -> bool {
        self.kind == ModelKind::Composition
    }

    /// Look up a static port
    #[inline]
    #[must_use]
    pub fn find_port(&self, name: &str) -> Option<&PortSpec> {
        self.ports.get(name)
    }

    /// Dynamic family a port name belongs to, if it is not static
    #[must_use]
    pub fn find_dynamic_port(&self, name: &str) -> Option<&DynamicPortSpec> {
        if self.ports.contains_key(name) {
            return None;
        }
        self.dynamic_ports.iter().find(|d| d.matches(name))
    }

    /// Look up a bound service by name
    #[inline]
    #[must_use]
    pub fn find_service(&self, name: &str) -> Option<&BoundService> {
        self.services.get(name)
    }

    /// Look up a child slot by role
    #[inline]
    #[must_use]
    pub fn find_child(&self, role: &str) -> Option<&ChildSpec> {
        self.children.get(role)
    }

    /// Look up an export by composition port name
    #[inline]
    #[must_use]
    pub fn find_export(&self, name: &str) -> Option<&PortExport> {
        self.exports.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_ports_match_whole_name() {
        let model = ComponentModel::component("Mux")
            .input("ctl", "/cmd")
            .dynamic_input(r"in_\d+", "/double")
            .unwrap();
        assert!(model.find_dynamic_port("in_3").is_some());
        assert!(model.find_dynamic_port("xin_3").is_none());
        assert!(model.find_dynamic_port("in_3x").is_none());
        assert!(model.find_dynamic_port("ctl").is_none());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = ComponentModel::component("Bad")
            .dynamic_output("(", "/x")
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidPortPattern { .. }));
    }

    #[test]
    fn service_port_mapping_falls_back_to_same_name() {
        let model = ComponentModel::component("Camera")
            .output("frame", "/img")
            .output("left_frame", "/img")
            .provides("main", "ImageSource")
            .provides_mapped("left", "ImageSource", [("frame", "left_frame")]);

        let main = model.find_service("main").unwrap();
        assert_eq!(main.component_port("frame"), "frame");
        let left = model.find_service("left").unwrap();
        assert_eq!(left.component_port("frame"), "left_frame");
        assert!(model.find_service("right").is_none());
    }

    #[test]
    fn composition_builder_records_structure() {
        let model = ComponentModel::composition("Pipeline")
            .child("source", "Producer")
            .optional_child("monitor", "Logger")
            .connect(("source", "out"), ("monitor", "in"), ConnectionPolicy::buffer(2))
            .export_output("out", "source", "out");

        assert!(model.is_composition());
        assert!(!model.find_child("source").unwrap().optional);
        assert!(model.find_child("monitor").unwrap().optional);
        assert_eq!(model.connections.len(), 1);
        assert_eq!(model.find_export("out").unwrap().child, "source");
    }
}
