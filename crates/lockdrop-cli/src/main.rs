//! lockdrop: compute a genesis allocation from lockdrop participation.
//!
//!   allocate  fetch locks, signals and balances at a snapshot block, then
//!             run the allocation engine
//!   compute   run the engine offline against a saved snapshot input
//!   totals    print locked / signaled totals at a snapshot block
//!   inspect   show what a public key was allocated

use std::path::{Path, PathBuf};

use alloy_primitives::utils::format_ether;
use alloy_primitives::U256;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use lockdrop_core::constants::{KEY_TRIPLE_LEN, PUBLIC_KEY_LEN};
use lockdrop_core::event::SnapshotInput;
use lockdrop_core::types::{EthAddress, PublicKey};
use lockdrop_engine::aggregate::{aggregate, AggregationContext};
use lockdrop_engine::{AllocationEngine, EngineConfig, GenesisAllocation};
use lockdrop_rpc::{fetch_snapshot, EthRpcClient, FetchOptions, RetryPolicy};

#[derive(Parser, Debug)]
#[command(
    name = "lockdrop",
    version,
    about = "Genesis token allocation from lockdrop locks and signals"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Where and how to read the chain.
#[derive(clap::Args, Debug)]
struct ChainArgs {
    /// Ethereum JSON-RPC endpoint.
    #[arg(long, env = "LOCKDROP_RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc: String,

    /// Lockdrop contract addresses (comma-separated).
    #[arg(long, env = "LOCKDROP_CONTRACT_ADDRESSES", value_delimiter = ',', required = true)]
    lockdrop: Vec<String>,

    /// Block at which signal balances are read. Logs after it are ignored.
    #[arg(long)]
    snapshot_block: u64,

    /// First block scanned for lockdrop logs.
    #[arg(long, default_value_t = 0)]
    from_block: u64,

    /// Maximum concurrent RPC requests.
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    #[arg(long, default_value_t = 500)]
    retry_initial_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    retry_max_ms: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the snapshot from the chain and write the allocation document.
    Allocate {
        #[command(flatten)]
        chain: ChainArgs,
        /// Engine configuration JSON. Defaults apply when absent.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "genesis_allocation.json")]
        out: PathBuf,
        /// Also write the fetched snapshot input, for offline `compute` runs.
        #[arg(long)]
        save_input: Option<PathBuf>,
    },

    /// Run the engine against a saved snapshot input.
    Compute {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "genesis_allocation.json")]
        out: PathBuf,
    },

    /// Print total ETH locked and signaled, raw and effective.
    Totals {
        #[command(flatten)]
        chain: ChainArgs,
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the balance allocated to a 32-byte key or each key of a 96-byte
    /// validator triple (hex).
    Inspect {
        public_key: String,
        #[arg(long, default_value = "genesis_allocation.json")]
        allocations: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,lockdrop=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Allocate {
            chain,
            config,
            out,
            save_input,
        } => cmd_allocate(&chain, config.as_deref(), &out, save_input.as_deref()).await,
        Command::Compute { input, config, out } => cmd_compute(&input, config.as_deref(), &out),
        Command::Totals { chain, config } => cmd_totals(&chain, config.as_deref()).await,
        Command::Inspect {
            public_key,
            allocations,
        } => cmd_inspect(&public_key, &allocations),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn cmd_allocate(
    chain: &ChainArgs,
    config: Option<&Path>,
    out: &Path,
    save_input: Option<&Path>,
) -> anyhow::Result<()> {
    let engine = AllocationEngine::new(load_config(config)?).context("configuring engine")?;
    let input = fetch_input(chain).await?;
    if let Some(path) = save_input {
        write_json_atomic(path, &input).context("saving snapshot input")?;
        info!(path = %path.display(), "snapshot input saved");
    }
    run_and_write(&engine, &input, out)
}

fn cmd_compute(input_path: &Path, config: Option<&Path>, out: &Path) -> anyhow::Result<()> {
    let engine = AllocationEngine::new(load_config(config)?).context("configuring engine")?;
    let json = std::fs::read_to_string(input_path)
        .with_context(|| format!("reading snapshot input {}", input_path.display()))?;
    let input: SnapshotInput = serde_json::from_str(&json)
        .with_context(|| format!("parsing snapshot input {}", input_path.display()))?;
    run_and_write(&engine, &input, out)
}

async fn cmd_totals(chain: &ChainArgs, config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    config.validate().context("validating engine config")?;
    let input = fetch_input(chain).await?;

    let policy = config.bonus_policy.build();
    let ctx = AggregationContext {
        policy: policy.as_ref(),
        bonuses: &config.term_bonuses,
        overlap: config.signal_overlap,
    };
    let outcome = aggregate(&input.events, input.schedule_start, &input.signal_balances, &ctx)
        .context("aggregating events")?;
    let totals = &outcome.totals;

    println!("Lock start:         {}", format_timestamp(input.schedule_start));
    println!("Snapshot block:     {}", chain.snapshot_block);
    println!("Bonus policy:       {}", policy.name());
    println!("Participants:       {}", outcome.book.len());
    println!("ETH locked:         {}", format_ether(totals.total_eth_locked));
    println!("ETH signaled:       {}", format_ether(totals.total_eth_signaled));
    println!("Effective locked:   {}", format_ether(totals.total_effective_locked));
    println!("Effective signaled: {}", format_ether(totals.total_effective_signaled));
    println!("Effective total:    {}", format_ether(totals.grand_total_effective()));
    if outcome.duplicate_signals > 0 {
        println!("Duplicate signals:  {}", outcome.duplicate_signals);
    }
    if !outcome.unresolved.is_empty() {
        println!("Unresolved keys:    {}", outcome.unresolved.len());
    }
    Ok(())
}

fn cmd_inspect(public_key: &str, allocations: &Path) -> anyhow::Result<()> {
    let stripped = public_key.trim().trim_start_matches("0x");
    let bytes = hex::decode(stripped).context("public key must be hex")?;
    if bytes.len() != PUBLIC_KEY_LEN && bytes.len() != KEY_TRIPLE_LEN {
        bail!(
            "public key must be {} or {} bytes, got {}",
            PUBLIC_KEY_LEN,
            KEY_TRIPLE_LEN,
            bytes.len()
        );
    }

    let json = std::fs::read_to_string(allocations)
        .with_context(|| format!("reading allocations {}", allocations.display()))?;
    let doc: GenesisAllocation = serde_json::from_str(&json)
        .with_context(|| format!("parsing allocations {}", allocations.display()))?;
    let supply = doc.summary.reconciliation.configured_supply;

    for chunk in bytes.chunks_exact(PUBLIC_KEY_LEN) {
        let key = PublicKey::from_slice(chunk)?;
        let encoded = doc.summary.key_encoding.encode(&key)?;
        match doc.balance_of(&key)? {
            Some(amount) => {
                let amount = U256::from_str_radix(amount, 10)
                    .with_context(|| format!("balance for {encoded} is not a decimal integer"))?;
                println!(
                    "{encoded}  {} tokens  ({} of supply)",
                    format_ether(amount),
                    format_share(amount, supply)
                );
            }
            None => println!("{encoded}  no allocation"),
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        info!("no config given; using default allocation policy");
        return Ok(EngineConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    EngineConfig::from_json(&json).with_context(|| format!("loading config {}", path.display()))
}

fn parse_contracts(raw: &[String]) -> anyhow::Result<Vec<EthAddress>> {
    raw.iter()
        .map(|s| {
            s.trim()
                .parse::<EthAddress>()
                .with_context(|| format!("invalid lockdrop contract address {s:?}"))
        })
        .collect()
}

async fn fetch_input(chain: &ChainArgs) -> anyhow::Result<SnapshotInput> {
    let contracts = parse_contracts(&chain.lockdrop)?;
    let client = EthRpcClient::new(&chain.rpc).context("building RPC client")?;
    let opts = FetchOptions {
        from_block: chain.from_block,
        concurrency: chain.concurrency,
        retry: RetryPolicy::from_millis(chain.retry_initial_ms, chain.retry_max_ms),
    };
    info!(
        rpc = %chain.rpc,
        contracts = contracts.len(),
        snapshot_block = chain.snapshot_block,
        "fetching lockdrop snapshot"
    );
    let input = fetch_snapshot(&client, &contracts, chain.snapshot_block, &opts)
        .await
        .with_context(|| format!("fetching snapshot from {}", chain.rpc))?;
    info!(
        lock_start = %format_timestamp(input.schedule_start),
        events = input.events.len(),
        "snapshot fetched"
    );
    Ok(input)
}

fn run_and_write(engine: &AllocationEngine, input: &SnapshotInput, out: &Path) -> anyhow::Result<()> {
    let allocation = engine.allocate(input).context("computing allocation")?;
    write_json_atomic(out, &allocation)
        .with_context(|| format!("writing allocation to {}", out.display()))?;

    let summary = &allocation.summary;
    if summary.reconciliation.needs_review {
        error!(
            shortfall = %summary.reconciliation.shortfall,
            tolerance = %summary.reconciliation.tolerance,
            "allocation written but flagged for manual review"
        );
    }
    println!("Allocation written to {}", out.display());
    println!("  balances:   {}", allocation.balances.len());
    println!("  vesting:    {}", allocation.vesting.len());
    println!("  validators: {}", allocation.validators.len());
    println!("  allocated:  {}", summary.reconciliation.allocated_total);
    println!("  shortfall:  {}", summary.reconciliation.shortfall);
    Ok(())
}

/// Write pretty JSON to a sibling temp file, then rename over `path`.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing JSON")?;
    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

fn format_timestamp(ts: u64) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// `amount / supply` as a percentage with six decimals.
fn format_share(amount: U256, supply: U256) -> String {
    if supply.is_zero() {
        return "n/a".to_string();
    }
    let scaled = amount.saturating_mul(U256::from(100_000_000u64)) / supply;
    let micro = u128::try_from(scaled).unwrap_or(u128::MAX);
    format!("{}.{:06}%", micro / 1_000_000, micro % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_formatting() {
        let supply = U256::from(4_000u64);
        assert_eq!(format_share(U256::from(1_000u64), supply), "25.000000%");
        assert_eq!(format_share(U256::from(1u64), supply), "0.025000%");
        assert_eq!(format_share(supply, supply), "100.000000%");
        assert_eq!(format_share(U256::from(1u64), U256::ZERO), "n/a");
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        assert_eq!(format_timestamp(1_559_347_200), "2019-06-01T00:00:00+00:00");
    }

    #[test]
    fn contract_list_parsing() {
        let parsed = parse_contracts(&[
            " 0x1b75b90e60070d37cfa9d87affd124bb345bf70a".to_string(),
            "0x9b2c5e6d7f8a1b0c3d4e5f60718293a4b5c6d7e8".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parse_contracts(&["0x1234".to_string()]).is_err());
    }
}
