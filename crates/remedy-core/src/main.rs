use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use remedy_audit::{read_jsonl, verify_entries};
use remedy_core::provider::{simulated_fleet, FLEET_RESOURCES};
use remedy_core::simulator::{run_simulator, SimulatorConfig};
use remedy_core::{AlarmPayload, ApprovalMode, Orchestrator, OrchestratorConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file");

    Command::new("remedy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Incident remediation orchestration engine")
        .subcommand_required(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run seeded synthetic incidents and check lifecycle invariants")
                .arg(
                    Arg::new("incidents")
                        .long("incidents")
                        .default_value("100")
                        .value_parser(value_parser!(usize))
                        .help("Number of alarms to generate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("success-rate")
                        .long("success-rate")
                        .default_value("0.7")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a verification probe passes"),
                )
                .arg(
                    Arg::new("copilot")
                        .long("copilot")
                        .action(ArgAction::SetTrue)
                        .help("Require approval; a simulated operator decides"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("handle")
                .about("Process one alarm JSON file against simulated providers")
                .arg(
                    Arg::new("alarm")
                        .long("alarm")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Alarm payload (JSON object)"),
                )
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("verify-log")
                .about("Verify a JSON-lines audit log")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Audit log file"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(config_arg),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<OrchestratorConfig> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => OrchestratorConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };
    let config = config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let config = SimulatorConfig {
        seed: *args.get_one::<u64>("seed").context("missing --seed")?,
        incidents: *args.get_one::<usize>("incidents").context("missing --incidents")?,
        success_rate: *args.get_one::<f64>("success-rate").context("missing --success-rate")?,
        approval_mode: if args.get_flag("copilot") {
            ApprovalMode::Copilot
        } else {
            ApprovalMode::Autonomous
        },
        ..SimulatorConfig::default()
    };
    if !(0.0..=1.0).contains(&config.success_rate) {
        bail!("--success-rate must be within [0, 1]");
    }

    let report = run_simulator(config).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

/// Ask the operator on stdin for each pending approval
async fn prompt_operator(orchestrator: Orchestrator) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let request = orchestrator.next_pending_approval().await;
        eprintln!(
            "Approve {} for incident {}? [y/N] (deadline {})",
            request.plan.summary(),
            request.incident_id,
            request.deadline
        );
        let answer = lines.next_line().await?.unwrap_or_default();
        if answer.trim().eq_ignore_ascii_case("y") {
            orchestrator.approve(request.incident_id);
        } else {
            orchestrator.deny(request.incident_id);
        }
    }
}

async fn handle(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let path = args.get_one::<PathBuf>("alarm").context("missing --alarm")?;
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let alarm = AlarmPayload::from_json_str(&text).context("alarm must be a JSON object")?;

    let mut resources: Vec<&str> = FLEET_RESOURCES.to_vec();
    let target = alarm.target();
    if let Some(target) = target.as_deref() {
        resources.push(target);
    }
    resources.push(config.default_target.as_str());

    let copilot = config.approval_mode == ApprovalMode::Copilot;
    let orchestrator = Orchestrator::builder(config.clone())
        .capabilities(simulated_fleet(&resources))
        .build()?;

    let operator = copilot.then(|| tokio::spawn(prompt_operator(orchestrator.clone())));
    let incident = orchestrator.handle_alarm(alarm).await?;
    if let Some(operator) = operator {
        operator.abort();
    }
    orchestrator.shutdown().await;

    let report = orchestrator
        .report(incident.id)
        .context("incident vanished from registry")?;
    eprint!("{}", report.summary());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn verify_log(args: &ArgMatches) -> anyhow::Result<bool> {
    let path = args.get_one::<PathBuf>("path").context("missing --path")?;
    let entries = read_jsonl(path).with_context(|| format!("reading {}", path.display()))?;
    let verification = verify_entries(&entries);
    println!("{}", serde_json::to_string_pretty(&verification)?);
    Ok(verification.valid)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let ok = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await?,
        Some(("handle", args)) => {
            handle(args).await?;
            true
        }
        Some(("verify-log", args)) => verify_log(args)?,
        Some(("config", args)) => {
            print!("{}", load_config(args)?.to_toml_string()?);
            true
        }
        _ => unreachable!("subcommand_required"),
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn parses_simulate_flags() {
        let matches = cli()
            .try_get_matches_from(["remedy", "simulate", "--incidents", "5", "--copilot"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "simulate");
        assert_eq!(args.get_one::<usize>("incidents"), Some(&5));
        assert!(args.get_flag("copilot"));
        assert_eq!(args.get_one::<u64>("seed"), Some(&42));
    }
}
