use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use identity_fusion_api::{IdentityFusionApi, LookupArgs};
use identity_fusion_core::{
    fuse, load_platforms_config, normalize, DeterministicOverrideInput, DualEstimatorInput,
    FusionStrategy, IdentitySalt, PlatformsConfig, RawSignal,
};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "idf")]
#[command(about = "Identity Fusion CLI")]
struct Cli {
    #[arg(long, default_value = "./config/platforms.json")]
    config: PathBuf,

    /// Fail instead of falling back to the built-in salt when `IDENTITY_SALT` is unset.
    #[arg(long, default_value_t = false)]
    strict_salt: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    Normalize(NormalizeArgs),
    Fuse {
        #[command(subcommand)]
        command: FuseCommand,
    },
    Lookup(LookupCommandArgs),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Validate,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    #[arg(long)]
    domain: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    username: Option<String>,
}

#[derive(Debug, Subcommand)]
enum FuseCommand {
    Dual(DualArgs),
    Deterministic(DeterministicArgs),
}

#[derive(Debug, Args)]
struct DualArgs {
    #[arg(long)]
    conservative: f64,
    #[arg(long)]
    exploratory: f64,
    #[arg(long, default_value_t = 0.0)]
    age_years: f64,
}

#[derive(Debug, Args)]
struct DeterministicArgs {
    #[arg(long, default_value_t = 0.0)]
    det: f64,
    #[arg(long, default_value_t = 0.0)]
    llm: f64,
    #[arg(long)]
    platform_weight: Option<f64>,
    #[arg(long, default_value_t = 0.0)]
    age_years: f64,
    #[arg(long = "counter-evidence")]
    counter_evidence: Vec<String>,
}

#[derive(Debug, Args)]
struct LookupCommandArgs {
    #[arg(long)]
    platform: String,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    profile_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct PlatformSummary<'a> {
    name: &'a str,
    enabled: bool,
    #[serde(rename = "type")]
    platform_type: &'static str,
    confidence_weight: f64,
    cache_ttl_minutes: f64,
    allowed_fields: &'a [String],
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<PlatformsConfig> {
    load_platforms_config(&cli.config)
        .with_context(|| format!("failed to load platform config {}", cli.config.display()))
}

fn resolve_salt(cli: &Cli) -> Result<IdentitySalt> {
    IdentitySalt::from_env(cli.strict_salt).context("failed to resolve identity salt")
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match &cli.command {
        Command::Config { command: ConfigCommand::Validate } => run_config_validate(&cli),
        Command::Normalize(args) => run_normalize(&cli, args),
        Command::Fuse { command } => run_fuse(command),
        Command::Lookup(args) => run_lookup(&cli, args),
    }
}

fn run_config_validate(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let platforms = config
        .platforms
        .iter()
        .map(|(name, platform)| PlatformSummary {
            name,
            enabled: platform.enabled,
            platform_type: platform.platform_type.as_str(),
            confidence_weight: platform.confidence_weight,
            cache_ttl_minutes: config.ttl_minutes_for(platform),
            allowed_fields: &platform.allowed_fields,
        })
        .collect::<Vec<_>>();

    emit_json(serde_json::json!({
        "valid": true,
        "config": cli.config.display().to_string(),
        "platform_count": platforms.len(),
        "enabled_count": config.enabled().count(),
        "platforms": platforms
    }))
}

fn run_normalize(cli: &Cli, args: &NormalizeArgs) -> Result<()> {
    let salt = resolve_salt(cli)?;
    if salt.is_fallback() {
        tracing::warn!("IDENTITY_SALT is not set; email digests use the built-in fallback salt");
    }
    let raw = RawSignal {
        domain: args.domain.clone(),
        email_hint: args.email.clone(),
        username_hint: args.username.clone(),
    };
    emit_json(serde_json::to_value(normalize(&raw, &salt))?)
}

fn run_fuse(command: &FuseCommand) -> Result<()> {
    let strategy = match command {
        FuseCommand::Dual(args) => FusionStrategy::DualEstimator(DualEstimatorInput {
            conservative_confidence: args.conservative,
            exploratory_confidence: args.exploratory,
            profile_age_years: args.age_years,
        }),
        FuseCommand::Deterministic(args) => {
            FusionStrategy::DeterministicOverride(DeterministicOverrideInput {
                det_confidence: args.det,
                llm_confidence: args.llm,
                platform_weight: args.platform_weight,
                profile_age_years: args.age_years,
                counter_evidence: args.counter_evidence.clone(),
            })
        }
    };
    let result = fuse(&strategy).context("fusion inputs rejected")?;
    emit_json(serde_json::to_value(result)?)
}

fn run_lookup(cli: &Cli, args: &LookupCommandArgs) -> Result<()> {
    let api = IdentityFusionApi::builder(load_config(cli)?, resolve_salt(cli)?).build()?;
    let lookup_args =
        LookupArgs { username: args.username.clone(), profile_url: args.profile_url.clone() };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start async runtime")?;
    let record = runtime.block_on(api.lookup(&args.platform, &lookup_args))?;

    emit_json(serde_json::json!({
        "platform": args.platform,
        "record": record
    }))
}
