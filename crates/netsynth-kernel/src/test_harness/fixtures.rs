//! Shared model fixtures
//!
//! A small component library covering inheritance, compositions with
//! exports and specializations, optional children, and components that
//! provide an ability once or twice.

use netsynth_model::{
    ComponentModel, ConnectionPolicy, DataServiceModel, ModelError, ModelRegistry,
};
use serde_json::json;

/// Build the fixture registry
///
/// # Errors
/// A model declaration that the registry rejects.
pub fn build_registry() -> Result<ModelRegistry, ModelError> {
    let mut registry = ModelRegistry::new();
    registry.register_data_service(DataServiceModel::new("ImageSource").output("frame", "/image"))?;

    registry.register_component(
        ComponentModel::component("Producer")
            .output("out", "/double")
            .argument("rate", json!(10)),
    )?;
    registry.register_component(
        ComponentModel::component("ProducerV2")
            .subclass_of("Producer")
            .argument("burst", json!(false)),
    )?;
    registry.register_component(
        ComponentModel::component("Consumer")
            .input("in", "/double")
            .output("out", "/double"),
    )?;
    registry.register_component(
        ComponentModel::component("Logger")
            .input("in", "/double")
            .dynamic_input(r"in_\d+", "/double")?,
    )?;
    registry.register_component(ComponentModel::component("Display").input("image", "/image"))?;
    registry.register_component(
        ComponentModel::component("DualCamera")
            .output("left_frame", "/image")
            .output("right_frame", "/image")
            .provides_mapped("left", "ImageSource", [("frame", "left_frame")])
            .provides_mapped("right", "ImageSource", [("frame", "right_frame")]),
    )?;
    registry.register_component(
        ComponentModel::component("MonoCamera")
            .output("img", "/image")
            .provides_mapped("main", "ImageSource", [("frame", "img")]),
    )?;

    registry.register_component(
        ComponentModel::composition("Pipeline")
            .child("source", "Producer")
            .child("sink", "Consumer")
            .connect(("source", "out"), ("sink", "in"), ConnectionPolicy::data())
            .export_output("out", "sink", "out")
            .specialize("FastPipeline", [("source", "ProducerV2")]),
    )?;
    registry.register_component(
        ComponentModel::composition("FastPipeline").subclass_of("Pipeline"),
    )?;
    registry.register_component(
        ComponentModel::composition("Outer")
            .child("source", "Pipeline")
            .child("log", "Logger")
            .connect(("source", "out"), ("log", "in"), ConnectionPolicy::data()),
    )?;
    registry.register_component(
        ComponentModel::composition("MonitoredPipeline")
            .child("source", "Producer")
            .optional_child("monitor", "Logger")
            .connect(("source", "out"), ("monitor", "in"), ConnectionPolicy::buffer(2)),
    )?;
    registry.register_component(
        ComponentModel::composition("Relay")
            .child("inner", "Consumer")
            .export_input("in", "inner", "in")
            .export_output("out", "inner", "out"),
    )?;
    registry.register_component(
        ComponentModel::composition("Viewer")
            .child("camera", "ImageSource")
            .child("display", "Display")
            .connect(("camera", "frame"), ("display", "image"), ConnectionPolicy::buffer(4)),
    )?;
    Ok(registry)
}

/// The fixture registry
///
/// # Panics
/// If a fixture declaration is rejected, which is a bug in this module.
#[must_use]
pub fn registry() -> ModelRegistry {
    match build_registry() {
        Ok(registry) => registry,
        Err(e) => panic!("fixture models rejected: {e}"),
    }
}

/// Names of the fixture component models
pub const COMPONENTS: &[&str] = &[
    "Producer",
    "ProducerV2",
    "Consumer",
    "Logger",
    "Display",
    "DualCamera",
    "MonoCamera",
    "Pipeline",
    "FastPipeline",
    "Outer",
    "MonitoredPipeline",
    "Relay",
    "Viewer",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_register() {
        let registry = build_registry().unwrap();
        for name in COMPONENTS {
            assert!(registry.component(name).is_some(), "{name}");
        }
        assert!(registry.is_ability("ImageSource"));
    }

    #[test]
    fn specialization_inherits_structure() {
        let registry = registry();
        let fast = registry.component("FastPipeline").unwrap();
        assert!(fast.find_child("source").is_some());
        assert!(fast.find_port("out").is_some());
        assert!(fast.specializations.is_empty());
    }
}
