mod cli;
mod targets;

use std::sync::Arc;

use clap::Parser;
use contract_triage::config::{load_config, merge_cli_overrides};
use contract_triage::source::etherscan::EtherscanClient;
use contract_triage::storage::{FindingSink, JsonFileSink, MarkdownFileSink, SqliteFindingStore};
use contract_triage::verifier::rpc_client::EthRpcClient;
use contract_triage::{TriageError, TriagePipeline};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, filter::Directive};

use crate::cli::CLI;
use crate::targets::parse_targets;

#[tokio::main]
async fn main() {
    let cli = CLI::parse();
    init_tracing(&cli);

    if let Err(error) = run(cli).await {
        error!(error = %error, "triage failed");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &CLI) {
    let filter = EnvFilter::builder()
        .with_default_directive(Directive::from(cli.log_level))
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: CLI) -> Result<(), TriageError> {
    let file_config = load_config(cli.config.as_deref()).map_err(TriageError::Config)?;
    let config = merge_cli_overrides(&file_config, &cli.overrides());
    config.validate().map_err(TriageError::Config)?;

    let text = std::fs::read_to_string(&cli.targets)?;
    let targets = parse_targets(&text, config.scan.chain_id).map_err(TriageError::Config)?;
    if config.registry.api_key.is_empty() {
        warn!("no registry API key configured, source lookups may be throttled");
    }

    let limiter = config.to_rate_limiter();
    let rpc = Arc::new(EthRpcClient::with_config(
        &config.rpc.url,
        config.to_rpc_config(),
        limiter.clone(),
    ));
    let registry = Arc::new(EtherscanClient::new(
        &config.registry.base_url,
        &config.registry.api_key,
        config.to_rpc_config(),
        limiter,
    ));
    let pipeline = TriagePipeline::new(rpc, registry, &config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            on_interrupt.cancel();
        }
    });

    let run = pipeline.run(targets, &cancel).await?;
    let summary = &run.report.summary;
    info!(
        block = run.report.block_number,
        reported = summary.total,
        exploit_validated = summary.exploit_validated,
        confirmed = summary.confirmed,
        skipped = summary.skipped,
        cancelled = run.cancelled,
        "scan finished"
    );

    let mut sinks: Vec<Box<dyn FindingSink>> = Vec::new();
    if let Some(path) = &config.report.json_path {
        sinks.push(Box::new(JsonFileSink::new(path)));
    }
    if let Some(path) = &config.report.markdown_path {
        sinks.push(Box::new(MarkdownFileSink::new(path)));
    }
    if let Some(path) = &config.report.sqlite_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        sinks.push(Box::new(SqliteFindingStore::open(path)?));
    }

    if sinks.is_empty() {
        println!("{}", run.report.to_markdown());
    }
    for sink in &sinks {
        sink.write_report(&run.report).await?;
    }
    Ok(())
}
