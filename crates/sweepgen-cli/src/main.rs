use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sweepgen_core::errors::{ErrorInfo, SweepError};
use sweepgen_design::{
    run, DocumentValidator, JsonSchemaValidator, NoRegistry, Registry, RegistryConfig, RunConfig,
    RunMode, SqliteRegistry,
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "sweepgen",
    about = "Generate one scenario per combination of sweep arms, plus a CSV manifest"
)]
struct Cli {
    /// YAML run configuration; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Shorthand for PATH/description, PATH/scenarios and PATH/scenarios.csv.
    #[arg(long, value_name = "PATH")]
    stddirs: Option<PathBuf>,
    /// Directory holding the base template and the sweep sub-directories.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Empty or missing directory receiving the scenarios.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Location of the CSV manifest.
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Append a seed sweep with N arms.
    #[arg(long, value_name = "N")]
    seeds: Option<i64>,
    /// Whether seed values must be pairwise distinct.
    #[arg(long, value_name = "BOOL")]
    unique_seeds: Option<bool>,
    /// Master seed for the seed sweep.
    #[arg(long)]
    master_seed: Option<u64>,
    /// Pointer to the field receiving the seed value.
    #[arg(long, value_name = "POINTER")]
    seed_field: Option<String>,
    /// Write per-arm deltas instead of merged documents.
    #[arg(long)]
    patches: bool,
    /// JSON Schema used to validate the base, the arms and every scenario.
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Skip schema validation even when a schema is given.
    #[arg(long)]
    no_validation: bool,
    /// Experiment name, used as the scenario file prefix.
    #[arg(long)]
    name: Option<String>,
    /// First scenario identifier when no registry is used.
    #[arg(long = "sce-id-start", value_name = "ID")]
    sce_id_start: Option<u64>,
    /// Experiment description recorded in the registry.
    #[arg(long)]
    desc: Option<String>,
    /// SQLite registry assigning scenario identifiers.
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,
    /// Write the manifest only.
    #[arg(long, conflicts_with = "read_list")]
    write_list_only: bool,
    /// Regenerate only the scenarios listed in an existing manifest.
    #[arg(long)]
    read_list: bool,
    /// Allow fewer than three sweeps instead of padding with dummy sweeps.
    #[arg(long = "lt-3-sweeps")]
    lt_3_sweeps: bool,
    /// Worker threads used for merging and writing.
    #[arg(long)]
    jobs: Option<usize>,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn missing(flag: &str) -> SweepError {
    SweepError::MalformedInput(
        ErrorInfo::new("cli.missing_path", format!("no {flag} given"))
            .with_hint("pass --stddirs, --config or the explicit path flags"),
    )
}

/// Folds the command line over the optional YAML configuration.
fn build_config(cli: &Cli) -> Result<RunConfig, SweepError> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_yaml_path(path)?,
        None => {
            let std_path = |leaf: &str| cli.stddirs.as_ref().map(|root| root.join(leaf));
            let input = cli.input.clone().or_else(|| std_path("description"));
            let output = cli.output.clone().or_else(|| std_path("scenarios"));
            let manifest = cli.manifest.clone().or_else(|| std_path("scenarios.csv"));
            RunConfig::new(
                input.ok_or_else(|| missing("input directory"))?,
                output.ok_or_else(|| missing("output directory"))?,
                manifest.ok_or_else(|| missing("manifest path"))?,
            )
        }
    };
    if cli.config.is_some() {
        if let Some(root) = &cli.stddirs {
            config.input_root = root.join("description");
            config.output_dir = root.join("scenarios");
            config.manifest_path = root.join("scenarios.csv");
        }
        if let Some(input) = &cli.input {
            config.input_root = input.clone();
        }
        if let Some(output) = &cli.output {
            config.output_dir = output.clone();
        }
        if let Some(manifest) = &cli.manifest {
            config.manifest_path = manifest.clone();
        }
    }

    if let Some(count) = cli.seeds {
        config.seeds.count = count;
    }
    if let Some(unique) = cli.unique_seeds {
        config.seeds.unique = unique;
    }
    if let Some(master_seed) = cli.master_seed {
        config.seeds.master_seed = master_seed;
    }
    if let Some(field) = &cli.seed_field {
        config.seeds.field = field.clone();
    }
    if let Some(name) = &cli.name {
        config.experiment.name = name.clone();
    }
    if let Some(desc) = &cli.desc {
        config.experiment.description = Some(desc.clone());
    }
    if let Some(start) = cli.sce_id_start {
        config.start_id = start;
    }
    if let Some(db) = &cli.db {
        config.registry = Some(match config.registry.take() {
            Some(existing) => RegistryConfig {
                path: db.clone(),
                ..existing
            },
            None => RegistryConfig::new(db.clone()),
        });
    }
    if cli.write_list_only {
        config.mode = RunMode::WriteListOnly;
    }
    if cli.read_list {
        config.mode = RunMode::ReadList;
    }
    if let Some(jobs) = cli.jobs {
        config.parallelism = jobs;
    }
    config.patches |= cli.patches;
    if cli.no_validation {
        config.validate = false;
    }
    if cli.lt_3_sweeps {
        config.min_three_sweeps = false;
    }
    config.check()?;
    Ok(config)
}

fn init_tracing(level: &str) {
    let fallback = format!("sweepgen_design={level},sweepgen_cli={level}");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}

fn execute(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let config = build_config(cli)?;
    let registry: Box<dyn Registry> = match &config.registry {
        Some(settings) => Box::new(SqliteRegistry::open(
            &settings.path,
            settings.timeout(),
            settings.retry_policy(),
        )?),
        None => Box::new(NoRegistry),
    };
    let validator = match &cli.schema {
        Some(path) if config.validate => Some(JsonSchemaValidator::from_path(path)?),
        _ => None,
    };
    info!(
        input = %config.input_root.display(),
        registry = %registry.label(),
        "starting run"
    );
    let report = run(
        &config,
        registry.as_ref(),
        validator.as_ref().map(|v| v as &dyn DocumentValidator),
    )?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
