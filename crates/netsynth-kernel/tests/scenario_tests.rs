use netsynth_kernel::test_harness::{run_scenario, SCENARIOS};
use netsynth_kernel::TestHarness;

#[test]
fn pipeline_with_selected_source() {
    let report = run_scenario("pipeline").unwrap();
    assert!(report.passed(), "{}", report.generate_text());
    assert!(report.network.iter().any(|l| l.contains("ProducerV2")));
}

#[test]
fn identical_leaves_merge() {
    let report = run_scenario("merge").unwrap();
    assert!(report.passed(), "{}", report.generate_text());
}

#[test]
fn ambiguous_ability_is_rejected() {
    let report = run_scenario("ambiguous").unwrap();
    assert!(report.passed(), "{}", report.generate_text());
}

#[test]
fn every_listed_scenario_runs() {
    for (name, _) in SCENARIOS {
        assert!(run_scenario(name).is_some(), "{name}");
    }
}

#[test]
fn stress_batches_across_seeds() {
    for seed in 0..3 {
        let report = TestHarness::run_stress_test(60, seed);
        assert!(report.success, "seed {seed}: {report:?}");
        assert!(report.merges > 0);
    }
}
