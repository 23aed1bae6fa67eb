use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use netsynth_kernel::test_harness::{run_all, run_scenario, SCENARIOS};
use netsynth_kernel::{ResolverConfig, TestHarness, VERSION};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("netsynth")
        .version(VERSION)
        .about("Requirement resolution and network merge engine")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("scenario")
                .about("Run a built-in end-to-end scenario")
                .arg(Arg::new("name").help("Scenario name, all scenarios when omitted"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("stress")
                .about("Resolve a random batch of requirements and report merging")
                .arg(
                    Arg::new("requirements")
                        .long("requirements")
                        .default_value("200")
                        .value_parser(value_parser!(usize))
                        .help("Number of requirements in the batch"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective resolver configuration")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML or JSON configuration file"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("scenario", args)) => {
            let reports = match args.get_one::<String>("name") {
                Some(name) => {
                    let report = run_scenario(name).with_context(|| {
                        let known: Vec<&str> = SCENARIOS.iter().map(|(n, _)| *n).collect();
                        format!("unknown scenario `{name}` (known: {})", known.join(", "))
                    })?;
                    vec![report]
                }
                None => run_all(),
            };

            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    println!("{}", report.generate_text());
                }
            }
            if !reports.iter().all(|r| r.passed()) {
                std::process::exit(1);
            }
        }
        Some(("stress", args)) => {
            let requirements = args.get_one::<usize>("requirements").copied().unwrap_or(200);
            let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);

            println!("Running stress test...");
            println!("Requirements: {requirements}");
            println!("Seed: {seed}");
            println!();

            let report = TestHarness::run_stress_test(requirements, seed);

            println!("Stress Test Report:");
            println!("  Instantiated: {}", report.instantiated);
            println!("  Tasks after merge: {}", report.tasks);
            println!("  Merges: {} in {} passes", report.merges, report.passes);
            println!("  Unmerged pairs: {}", report.unmerged_pairs);
            println!("  Elapsed: {} ms", report.elapsed_ms);
            for error in &report.errors {
                println!("  Error: {error}");
            }
            println!("  Success: {}", report.success);

            std::process::exit(if report.success { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = match args.get_one::<PathBuf>("path") {
                Some(path) => ResolverConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ResolverConfig::default(),
            };
            print!("{}", toml::to_string_pretty(&config)?);
        }
        _ => unreachable!("a subcommand is required"),
    }
    Ok(())
}
