use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use aethonx_artifacts::{ScanMode, Target};
use aethonx_common::config::SourceConfig;
use aethonx_common::validate::is_valid_domain;
use aethonx_common::{telemetry, CancelToken, Config};
use aethonx_filter::{FilterConfig, FilterEngine};
use aethonx_sources::{adapters, registry};

use aethonx_scanner::runner::Runner;

#[derive(Parser, Debug)]
#[command(name = "aethonx", about = "Reconnaissance orchestration platform")]
struct Cli {
    /// Root domain to scan.
    #[arg(long, short)]
    target: Option<String>,

    /// Scan mode: passive, active, or hybrid.
    #[arg(long, default_value = "passive")]
    mode: ScanMode,

    /// Only run these sources (repeatable). Default: every registered source.
    #[arg(long = "enable")]
    enable: Vec<String>,

    /// Per-source timeout in seconds.
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Drop URLs scoring below this threshold.
    #[arg(long, default_value_t = 0)]
    min_score: i64,

    /// URL volume cap fed to the filter engine.
    #[arg(long, default_value_t = 10_000)]
    max_urls: usize,

    /// List registered sources and exit.
    #[arg(long)]
    list_sources: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    telemetry::init_logging(&config.log_level);

    adapters::register_bundled(registry::global());

    if cli.list_sources {
        for meta in registry::global().all_metadata() {
            println!(
                "{:<12} {:<8} {:<8} priority={} {}",
                meta.name,
                meta.mode.to_string(),
                meta.kind.to_string(),
                meta.priority,
                meta.description
            );
        }
        return Ok(());
    }

    let raw_target = cli
        .target
        .context("--target is required (or use --list-sources)")?;
    if !is_valid_domain(&raw_target) {
        anyhow::bail!("'{raw_target}' is not a valid domain");
    }
    let target = Target::new(&raw_target, cli.mode);
    info!(target = target.root.as_str(), mode = %target.mode, "AethonX starting");

    // One config per registered source; --enable narrows the set.
    let timeout = Duration::from_secs(cli.timeout.max(1));
    let mut configs: HashMap<String, SourceConfig> = HashMap::new();
    for meta in registry::global().all_metadata() {
        let enabled = cli.enable.is_empty() || cli.enable.iter().any(|n| n == &meta.name);
        configs.insert(
            meta.name.clone(),
            SourceConfig {
                enabled,
                priority: meta.priority,
                timeout,
                custom: HashMap::new(),
            },
        );
    }
    for name in &cli.enable {
        if !registry::global().is_registered(name) {
            warn!(source = name.as_str(), "--enable names an unknown source");
        }
    }

    let filter = FilterEngine::new(FilterConfig {
        max_urls: cli.max_urls,
        min_priority_score: cli.min_score,
        ..FilterConfig::default()
    })
    .context("invalid filter configuration")?;

    // Ctrl-C propagates as cooperative cancellation: children are killed,
    // partial results are reported.
    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            signal_token.cancel();
        }
    });

    let runner = Runner::new(registry::global(), Arc::new(filter));
    let (result, report) = runner.run(&target, &configs, &cancel).await?;

    info!("{report}");
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("result serialization")?
    );
    Ok(())
}
