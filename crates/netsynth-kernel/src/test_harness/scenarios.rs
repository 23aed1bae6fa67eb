//! End-to-end scenarios
//!
//! Each scenario builds a plan from the fixture library, runs the kernel and
//! records named checks. Failures are reported, not raised, so the CLI can
//! print every check.

use super::fixtures;
use crate::dataflow::ConnectionView;
use crate::instantiate::NetworkInstantiator;
use crate::merge::MergeSolver;
use crate::plan::Plan;
use crate::resolver::NetworkResolver;
use crate::ResolverConfig;
use netsynth_model::{
    ConnectionPolicy, InstanceRequirements, ModelRegistry, Selection, SelectionContext,
    SelectionKey, SelectionTable,
};
use serde::Serialize;
use serde_json::json;

/// Registered scenarios with a one-line summary
pub const SCENARIOS: &[(&str, &str)] = &[
    (
        "pipeline",
        "Pipeline with source selected as ProducerV2, consumer output seen through the composite",
    ),
    (
        "merge",
        "two Consumer requirements with the same input collapse into one task",
    ),
    (
        "ambiguous",
        "requiring ImageSource from DualCamera without naming a service",
    ),
];

/// One named check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioCheck {
    /// What was checked
    pub description: String,
    /// Outcome
    pub passed: bool,
    /// Observed value when the check failed
    pub detail: Option<String>,
}

/// Result of running one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Scenario name
    pub name: String,
    /// Checks in execution order
    pub checks: Vec<ScenarioCheck>,
    /// Error that stopped the scenario early
    pub error: Option<String>,
    /// Tasks and connections of the final plan
    pub network: Vec<String>,
}

impl ScenarioReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            checks: Vec::new(),
            error: None,
            network: Vec::new(),
        }
    }

    fn check(&mut self, description: &str, passed: bool, observed: impl std::fmt::Debug) {
        self.checks.push(ScenarioCheck {
            description: description.to_string(),
            passed,
            detail: (!passed).then(|| format!("{observed:?}")),
        });
    }

    /// Every check passed and nothing failed early
    #[must_use]
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.checks.iter().all(|c| c.passed)
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = format!(
            "Scenario `{}`: {}\n",
            self.name,
            if self.passed() { "PASS" } else { "FAIL" }
        );
        for check in &self.checks {
            let mark = if check.passed { "ok  " } else { "FAIL" };
            out.push_str(&format!("  [{mark}] {}\n", check.description));
            if let Some(detail) = &check.detail {
                out.push_str(&format!("         observed: {detail}\n"));
            }
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("  error: {error}\n"));
        }
        if !self.network.is_empty() {
            out.push_str("  network:\n");
            for line in &self.network {
                out.push_str(&format!("    {line}\n"));
            }
        }
        out
    }
}

/// Run a scenario by name
#[must_use]
pub fn run_scenario(name: &str) -> Option<ScenarioReport> {
    let body: fn(&ModelRegistry, &mut ScenarioReport) -> anyhow::Result<()> = match name {
        "pipeline" => pipeline_selection,
        "merge" => duplicate_leaves,
        "ambiguous" => ambiguous_ability,
        _ => return None,
    };
    let mut report = ScenarioReport::new(name);
    let outcome = fixtures::build_registry()
        .map_err(anyhow::Error::from)
        .and_then(|registry| body(&registry, &mut report));
    if let Err(e) = outcome {
        tracing::warn!("scenario {}: {:#}", name, e);
        report.error = Some(format!("{e:#}"));
    }
    Some(report)
}

/// Run every registered scenario
#[must_use]
pub fn run_all() -> Vec<ScenarioReport> {
    SCENARIOS
        .iter()
        .filter_map(|(name, _)| run_scenario(name))
        .collect()
}

/// One line per task, then one per direct connection
fn describe(plan: &Plan) -> Vec<String> {
    let mut lines = Vec::new();
    for task in plan.tasks() {
        let mut line = format!("{} {}", task.id, task.model);
        if let Some(service) = &task.selected_service {
            line.push_str(&format!(" [{}]", service.name));
        }
        if task.is_composition {
            line.push_str(" (composition)");
        }
        if task.is_abstract {
            line.push_str(" (abstract)");
        }
        for (role, child) in plan.children(task.id) {
            line.push_str(&format!(" {role}={child}"));
        }
        lines.push(line);
    }
    for task in plan.task_ids() {
        for c in plan.dataflow().output_connections(task) {
            lines.push(format!(
                "{}.{} -> {}.{} {}",
                c.source_task, c.source_port, c.sink_task, c.sink_port, c.policy
            ));
        }
    }
    lines
}

fn pipeline_selection(registry: &ModelRegistry, report: &mut ScenarioReport) -> anyhow::Result<()> {
    let mut plan = Plan::new();
    let context = SelectionContext::from_table(
        SelectionTable::new().with(SelectionKey::role("source"), Selection::component("ProducerV2"))?,
    );
    let pipeline = InstanceRequirements::from_models(registry, ["Pipeline"])?;
    let logger = InstanceRequirements::from_models(registry, ["Logger"])?;
    let resolved = NetworkResolver::new(registry).resolve(&mut plan, &[pipeline, logger], &context)?;
    let (pipeline, logger) = (resolved.roots[0], resolved.roots[1]);
    plan.connect_ports(registry, (pipeline, "out"), (logger, "in"), ConnectionPolicy::empty())?;

    let source = plan.child(pipeline, "source");
    let sink = plan.child(pipeline, "sink");
    let source_model = source.map(|id| plan.task(id).map(|t| t.model.clone())).transpose()?;
    report.check(
        "source child is a ProducerV2",
        source_model.as_deref() == Some("ProducerV2"),
        &source_model,
    );
    let (Some(source), Some(sink)) = (source, sink) else {
        anyhow::bail!("pipeline children missing");
    };

    let inputs = plan.dataflow().concrete_input_connections(sink, Some("in"))?;
    report.check(
        "consumer input comes from the producer",
        inputs.len() == 1 && inputs[0].source_task == source && inputs[0].source_port == "out",
        &inputs,
    );

    let outputs = plan.dataflow().concrete_output_connections(sink, None)?;
    report.check(
        "consumer output resolves to the logger, not the composite",
        outputs.len() == 1 && outputs[0].sink_task == logger && outputs[0].sink_port == "in",
        &outputs,
    );
    report.check(
        "composite is a forwarding vertex",
        plan.dataflow().is_forwarding(pipeline),
        plan.dataflow().is_forwarding(pipeline),
    );
    plan.check_invariants()?;
    report.network = describe(&plan);
    Ok(())
}

fn duplicate_leaves(registry: &ModelRegistry, report: &mut ScenarioReport) -> anyhow::Result<()> {
    let mut plan = Plan::new();
    let instantiator = NetworkInstantiator::new(registry);
    let context = SelectionContext::new();

    let producer = instantiator.instantiate(
        &InstanceRequirements::from_models(registry, ["Producer"])?,
        &mut plan,
        &context,
    )?;
    let first = instantiator.instantiate(
        &InstanceRequirements::from_models(registry, ["Consumer"])?.with_argument("gain", json!(2)),
        &mut plan,
        &context,
    )?;
    let second = instantiator.instantiate(
        &InstanceRequirements::from_models(registry, ["Consumer"])?.with_argument("tag", json!("b")),
        &mut plan,
        &context,
    )?;
    for consumer in [first, second] {
        plan.connect_ports(registry, (producer, "out"), (consumer, "in"), ConnectionPolicy::data())?;
    }

    let solver = MergeSolver::from_config(registry, &ResolverConfig::default());
    let forward = solver.can_merge(&plan, first, second)?;
    let backward = solver.can_merge(&plan, second, first)?;
    report.check("first can replace second", forward.is_mergeable(), &forward);
    report.check("second can replace first", backward.is_mergeable(), &backward);

    let merged = solver.merge_identical_tasks(&mut plan)?;
    let consumers: Vec<_> = plan.tasks().filter(|t| t.model == "Consumer").collect();
    report.check("one consumer remains", consumers.len() == 1, consumers.len());
    if let Some(consumer) = consumers.first() {
        let args = &consumer.arguments;
        report.check(
            "arguments are the union of both requirements",
            args.get("gain") == Some(&json!(2)) && args.get("tag") == Some(&json!("b")),
            args,
        );
        let inputs = plan.dataflow().concrete_input_connections(consumer.id, None)?;
        report.check("merged consumer keeps one input", inputs.len() == 1, &inputs);
    }
    report.check(
        "second consumer is replaced by the first",
        merged.replacement_for(second) == first,
        merged.replacement_for(second),
    );
    report.network = describe(&plan);
    Ok(())
}

fn ambiguous_ability(registry: &ModelRegistry, report: &mut ScenarioReport) -> anyhow::Result<()> {
    let mut plan = Plan::new();
    let requirement = InstanceRequirements::from_models(registry, ["DualCamera", "ImageSource"])?;
    let outcome = NetworkResolver::new(registry).resolve(
        &mut plan,
        &[requirement.clone()],
        &SelectionContext::new(),
    );
    match outcome {
        Ok(resolved) => report.check("resolution is rejected as ambiguous", false, &resolved.roots),
        Err(e) => {
            report.check("resolution is rejected as ambiguous", e.is_ambiguity(), e.kind());
            let message = e.to_string();
            report.check(
                "error names both candidate services",
                message.contains("left") && message.contains("right"),
                &message,
            );
        }
    }
    report.check("plan is left empty", plan.task_count() == 0, plan.task_count());

    let disambiguated = requirement.with_service("left");
    let resolved =
        NetworkResolver::new(registry).resolve(&mut plan, &[disambiguated], &SelectionContext::new())?;
    let service = plan
        .task(resolved.roots[0])?
        .selected_service
        .as_ref()
        .map(|s| s.name.clone());
    report.check(
        "naming the service resolves",
        service.as_deref() == Some("left"),
        &service,
    );
    report.network = describe(&plan);
    Ok(())
}
