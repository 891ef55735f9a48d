use std::path::PathBuf;

use clap::Parser as ClapParser;
use contract_triage::config::CliOverrides;
use tracing::Level;

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser, Debug, Clone)]
#[command(
    name = "triage",
    version,
    about = "Heuristic vulnerability triage for deployed smart contracts"
)]
pub struct CLI {
    #[arg(
        long = "targets",
        value_name = "TARGETS_FILE",
        help = "File with one `0x<address>[,<balance in ETH>]` per line.",
        long_help = "Blank lines and lines starting with `#` are ignored. The optional balance is only used for ordering and the minimum-balance pre-filter.",
        env = "TRIAGE_TARGETS"
    )]
    pub targets: PathBuf,
    #[arg(
        long = "config",
        value_name = "CONFIG_FILE",
        help = "TOML configuration. Flags below override its values.",
        env = "TRIAGE_CONFIG"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long = "rpc-url",
        value_name = "URL",
        help = "Archive-capable JSON-RPC endpoint.",
        env = "TRIAGE_RPC_URL"
    )]
    pub rpc_url: Option<String>,
    #[arg(
        long = "api-key",
        value_name = "KEY",
        help = "Source registry API key.",
        env = "TRIAGE_REGISTRY_API_KEY",
        hide_env_values = true
    )]
    pub api_key: Option<String>,
    #[arg(
        long = "block",
        value_name = "NUMBER",
        help = "Pin every query to this block. Defaults to the latest block at start."
    )]
    pub block: Option<u64>,
    #[arg(long = "concurrency", value_name = "N", help = "Targets scanned in parallel.")]
    pub concurrency: Option<usize>,
    #[arg(
        long = "out",
        value_name = "DIR",
        help = "Write findings.json, findings.md and findings.sqlite into DIR."
    )]
    pub out: Option<PathBuf>,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        help = "Default log level when RUST_LOG is unset."
    )]
    pub log_level: Level,
}

impl CLI {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            rpc_url: self.rpc_url.clone(),
            api_key: self.api_key.clone(),
            block: self.block,
            concurrency: self.concurrency,
            out_dir: self.out.clone(),
        }
    }
}
