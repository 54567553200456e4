use anyhow::{Context, Result, anyhow, bail};
use assay_audit::{
    DEFAULT_INDEX_RULES, DEFAULT_STATUS_RULES, about, audit_experiment,
    dispatch::{AuditOptions, AuditReport},
    parse_experiment,
    registry::StaticRegistry,
    standards::{self, Standards},
};
use serde::Serialize;
use std::{env, fs, io};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ASSAY_AUDIT_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Tsv,
}

#[derive(Debug, Default)]
struct GlobalArgs {
    standards: Option<String>,
    registry: Option<String>,
}

#[derive(Serialize)]
struct RuleListing {
    index_rules: Vec<&'static str>,
    status_rules: Vec<&'static str>,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  assay_audit_cli --version\n  \
  assay_audit_cli [--standards PATH] [--registry PATH] audit EXPERIMENT.json [--format json|tsv] [--sequential]\n  \
  assay_audit_cli rules\n  \
  assay_audit_cli [--standards PATH] standards\n\n  \
  Tip: pass @file.json or inline JSON instead of a path\n  \
  Log level: {LOG_ENV}=debug"
    );
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_json_arg(value: &str) -> Result<String> {
    let path = match value.strip_prefix('@') {
        Some(path) => path,
        None if value.trim_start().starts_with('{') => return Ok(value.to_string()),
        None => value,
    };
    fs::read_to_string(path).with_context(|| format!("Could not read JSON file '{path}'"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn print_tsv(report: &AuditReport) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(io::stdout());
    for finding in &report.findings {
        writer.serialize(finding).context("Could not write TSV row")?;
    }
    writer.flush().context("Could not flush TSV output")?;
    Ok(())
}

fn parse_global_args(args: &[String]) -> Result<(GlobalArgs, usize)> {
    let mut global = GlobalArgs::default();
    let mut idx = 1;
    while idx < args.len() {
        let slot = match args[idx].as_str() {
            "--standards" => &mut global.standards,
            "--registry" => &mut global.registry,
            _ => break,
        };
        let value = args
            .get(idx + 1)
            .ok_or_else(|| anyhow!("Missing path for {}", args[idx]))?;
        *slot = Some(value.clone());
        idx += 2;
    }
    Ok((global, idx))
}

fn apply_standards(global: &GlobalArgs) -> Result<()> {
    if let Some(path) = global.standards.as_deref() {
        Standards::load(path).with_context(|| format!("Could not load standards table '{path}'"))?;
        standards::reload_from_path(Some(path));
    }
    Ok(())
}

fn load_registry(global: &GlobalArgs) -> Result<StaticRegistry> {
    match global.registry.as_deref() {
        Some(path) => StaticRegistry::load(path)
            .with_context(|| format!("Could not load registry '{path}'")),
        None => Ok(StaticRegistry::default()),
    }
}

fn run_audit_command(global: &GlobalArgs, args: &[String]) -> Result<()> {
    let mut experiment_arg = None;
    let mut format = OutputFormat::Json;
    let mut options = AuditOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--sequential" => options.sequential = true,
            "--format" => {
                format = match iter.next().map(String::as_str) {
                    Some("json") => OutputFormat::Json,
                    Some("tsv") => OutputFormat::Tsv,
                    Some(other) => bail!("Unknown format '{other}', expected 'json' or 'tsv'"),
                    None => bail!("Missing value for --format"),
                }
            }
            _ if experiment_arg.is_none() => experiment_arg = Some(arg.as_str()),
            _ => bail!("Unexpected argument '{arg}'"),
        }
    }
    let Some(experiment_arg) = experiment_arg else {
        usage();
        bail!("Missing experiment JSON");
    };

    apply_standards(global)?;
    let registry = load_registry(global)?;
    let json = load_json_arg(experiment_arg)?;
    let experiment = parse_experiment(&json).context("Invalid experiment JSON")?;
    let report = audit_experiment(&experiment, &registry, options);
    for failure in &report.rule_failures {
        tracing::warn!(rule = %failure.rule, "rule failed: {}", failure.message);
    }
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Tsv => print_tsv(&report),
    }
}

fn main() {
    init_tracing();
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        bail!("Missing command");
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let (global, cmd_idx) = parse_global_args(&args)?;
    let Some(command) = args.get(cmd_idx) else {
        usage();
        bail!("Missing command");
    };

    match command.as_str() {
        "audit" => run_audit_command(&global, &args[cmd_idx + 1..]),
        "rules" => print_json(&RuleListing {
            index_rules: DEFAULT_INDEX_RULES.names(),
            status_rules: DEFAULT_STATUS_RULES.names(),
        }),
        "standards" => {
            apply_standards(&global)?;
            print_json(standards::current().as_ref())
        }
        _ => {
            usage();
            Err(anyhow!("Unknown command '{command}'"))
        }
    }
}
