//! `pn-sim`: run a hybrid Petri net from a `.json` or `.ron` file.
//!
//! Logging goes through `PN_LOG` / `PN_LOG_STYLE`, e.g.
//! `PN_LOG=hybrid_pn=debug pn-sim --net model.json --until 10`.
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use itertools::Itertools;

use hybrid_pn::concurrency::SelectionStrategy;
use hybrid_pn::net::read_net;
use hybrid_pn::simulation::{DataCollector, Simulation, SimulationConfig, StepResult};

const DEFAULT_CONFIG: &str = "pn-sim.toml";

fn make_options_parser() -> Command {
    Command::new("pn-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Hybrid Petri net simulator with atomic maximal-step firing")
        .arg(
            Arg::new("net")
                .short('n')
                .long("net")
                .value_name("FILE")
                .help("Net document (.json or .ron)")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Simulation config (TOML) [default: ./pn-sim.toml when present]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("steps")
                .short('s')
                .long("steps")
                .value_name("N")
                .help("Number of steps to run")
                .conflicts_with("until")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("until")
                .short('u')
                .long("until")
                .value_name("TIME")
                .help("Run until simulation time reaches TIME")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("dt")
                .long("dt")
                .help("Step length, overrides the config")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("strategy")
                .long("strategy")
                .help("Concurrent set selection, overrides the config")
                .value_parser(["largest", "priority", "first", "random"]),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("RNG seed, overrides the config")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("csv")
                .long("csv")
                .value_name("FILE")
                .help("Write the marking trace as CSV")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("diagnose")
                .long("diagnose")
                .help("Print connectivity diagnostics and enablement, then exit")
                .action(ArgAction::SetTrue),
        )
}

enum RunLength {
    Steps(usize),
    Until(f64),
}

struct Options {
    net: PathBuf,
    config: SimulationConfig,
    run: RunLength,
    csv: Option<PathBuf>,
    diagnose: bool,
}

impl Options {
    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let net = matches
            .get_one::<PathBuf>("net")
            .cloned()
            .context("--net is required")?;

        let mut config = match matches.get_one::<PathBuf>("config") {
            Some(path) if !path.exists() => bail!("config file {:?} does not exist", path),
            Some(path) => SimulationConfig::load_from_file(path)?,
            None => SimulationConfig::load_from_file(DEFAULT_CONFIG)?,
        };
        if let Some(&dt) = matches.get_one::<f64>("dt") {
            config.dt = dt;
        }
        if let Some(strategy) = matches.get_one::<String>("strategy") {
            config.strategy = strategy
                .parse::<SelectionStrategy>()
                .map_err(anyhow::Error::msg)?;
        }
        if let Some(&seed) = matches.get_one::<u64>("seed") {
            config.seed = Some(seed);
        }
        config.validate().context("invalid simulation settings")?;

        let run = match (
            matches.get_one::<usize>("steps"),
            matches.get_one::<f64>("until"),
        ) {
            (Some(&steps), _) => RunLength::Steps(steps),
            (None, Some(&until)) => RunLength::Until(until),
            (None, None) => RunLength::Steps(1),
        };

        Ok(Self {
            net,
            config,
            run,
            csv: matches.get_one::<PathBuf>("csv").cloned(),
            diagnose: matches.get_flag("diagnose"),
        })
    }
}

fn main() -> Result<()> {
    if std::env::var("PN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("PN_LOG")
            .write_style("PN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let matches = make_options_parser().get_matches();
    let options = Options::from_matches(&matches)?;
    log::debug!("simulation config: {:?}", options.config);

    let net = read_net(&options.net)
        .with_context(|| format!("Failed to load net: {:?}", options.net))?;
    net.log_diagnostics();

    let mut sim = Simulation::new(net, options.config);

    if options.diagnose {
        print_diagnostics(&sim);
        return Ok(());
    }

    let collector = DataCollector::new();
    let trace = collector.handle();
    sim.add_listener(Box::new(collector));

    let results = match options.run {
        RunLength::Steps(n) => (0..n)
            .map(|_| sim.step_default())
            .collect::<Result<Vec<_>, _>>(),
        RunLength::Until(until) => sim.run_until(until),
    };
    let results = results.with_context(|| format!("simulation stopped at t={}", sim.time()))?;

    for result in results.iter().filter(|r| !is_quiet(r)) {
        println!(
            "t={:<10.4} fired: [{}] integrated: [{}]",
            result.time,
            result.fired.iter().join(", "),
            result.integrated.iter().join(", ")
        );
    }
    println!("final marking at t={:.4}: {}", sim.time(), format_marking(&sim));

    if let Some(path) = options.csv {
        let file =
            File::create(&path).with_context(|| format!("Failed to create csv file: {:?}", path))?;
        trace
            .borrow()
            .write_csv(BufWriter::new(file))
            .with_context(|| format!("Failed to write csv file: {:?}", path))?;
        log::info!("trace written to {:?}", path);
    }
    Ok(())
}

fn is_quiet(result: &StepResult) -> bool {
    result.fired.is_empty() && result.integrated.is_empty()
}

fn format_marking(sim: &Simulation) -> String {
    sim.marking()
        .iter()
        .map(|(place, tokens)| format!("{}={}", sim.net().place(place).name, tokens))
        .join(" ")
}

fn print_diagnostics(sim: &Simulation) {
    let report = sim.net().diagnose_connectivity();
    println!(
        "places: {}  transitions: {}",
        report.total_places, report.total_transitions
    );
    if !report.isolated_places.is_empty() {
        println!("isolated places: {}", report.isolated_places.iter().join(", "));
    }
    if !report.isolated_transitions.is_empty() {
        println!(
            "isolated transitions: {}",
            report.isolated_transitions.iter().join(", ")
        );
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for (name, enablement) in sim.can_fire_all() {
        let state = if enablement.enabled { "enabled" } else { "disabled" };
        println!("{name:<24} {state:<9} {}", enablement.reason);
    }
}
