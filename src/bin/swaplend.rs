//! swaplend CLI
//!
//! Command-line interface for pricing swaps, checking health factors and
//! replaying JSON scenarios against an in-memory protocol.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::{style, Term};
use serde::Deserialize;

use swaplend::core::config::ProtocolConfig;
use swaplend::events::EventIndexer;
use swaplend::protocol::{Call, OperationResult, Protocol};
use swaplend::utils::constants::{DEFAULT_FEE_PER_MILLE, HEALTH_FACTOR_INFINITE, WAD, WAD_DECIMALS};
use swaplend::utils::crypto::Address;
use swaplend::utils::math;

/// swaplend CLI - constant-product AMM and collateralized lending
#[derive(Parser)]
#[command(name = "swaplend")]
#[command(version = swaplend::VERSION)]
#[command(about = "Command-line interface for the swaplend protocol", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, env = "SWAPLEND_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price a single-hop swap against explicit reserves
    Quote {
        /// Reserve of the input asset
        #[arg(long)]
        reserve_in: u128,

        /// Reserve of the output asset
        #[arg(long)]
        reserve_out: u128,

        /// Amount of the input asset
        #[arg(long)]
        amount_in: u128,

        /// Fee in per mille
        #[arg(long, default_value_t = DEFAULT_FEE_PER_MILLE)]
        fee: u128,
    },

    /// Compute a health factor from USD amounts (decimal strings)
    Health {
        /// Collateral value in USD
        #[arg(long)]
        collateral: String,

        /// Liquidation threshold (e.g. 0.8)
        #[arg(long, default_value = "0.8")]
        threshold: String,

        /// Debt value in USD
        #[arg(long)]
        debt: String,
    },

    /// Replay a JSON scenario of calls
    Run {
        /// Scenario file
        scenario: PathBuf,

        /// Continue after a failed call
        #[arg(short, long)]
        keep_going: bool,
    },

    /// Print the address derived from a label
    Address {
        /// Account or token label
        label: String,
    },

    /// Show the effective configuration
    Config {
        /// Write the configuration to this path
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
}

/// A replayable list of calls
#[derive(Debug, Deserialize)]
struct Scenario {
    /// Height of the block the calls run in
    #[serde(default = "default_start_block")]
    start_block: u64,
    /// Block timestamp; defaults to now
    #[serde(default)]
    timestamp: Option<u64>,
    /// Calls in execution order
    calls: Vec<Call>,
}

fn default_start_block() -> u64 {
    1
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let term = Term::stdout();

    if let Err(e) = run_command(&cli, &term) {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(cli: &Cli, term: &Term) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Quote {
            reserve_in,
            reserve_out,
            amount_in,
            fee,
        } => cmd_quote(*reserve_in, *reserve_out, *amount_in, *fee, term),
        Commands::Health {
            collateral,
            threshold,
            debt,
        } => cmd_health(collateral, threshold, debt, term),
        Commands::Run {
            scenario,
            keep_going,
        } => cmd_run(cli, scenario, *keep_going, term),
        Commands::Address { label } => {
            let _ = term.write_line(&Address::from_label(label).to_hex());
            Ok(())
        }
        Commands::Config { write } => cmd_config(cli, write.as_deref(), term),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

fn cmd_quote(
    reserve_in: u128,
    reserve_out: u128,
    amount_in: u128,
    fee: u128,
    term: &Term,
) -> anyhow::Result<()> {
    if reserve_in == 0 || reserve_out == 0 {
        anyhow::bail!("reserves must be non-zero");
    }
    let out = math::amount_out(amount_in, reserve_in, reserve_out, fee)?;
    let _ = term.write_line(&format!(
        "{} {} in -> {} out (fee {}‰)",
        style("✓").green(),
        amount_in,
        style(out).bold(),
        fee
    ));
    Ok(())
}

fn cmd_health(collateral: &str, threshold: &str, debt: &str, term: &Term) -> anyhow::Result<()> {
    let collateral = parse_wad(collateral)?;
    let threshold = parse_wad(threshold)?;
    let debt = parse_wad(debt)?;

    let weighted = math::wad_mul(collateral, threshold)?;
    let hf = math::health_factor(weighted, debt)?;

    let _ = term.write_line(&format!("Health factor: {}", style(format_hf(hf)).bold()));
    if hf < WAD {
        let _ = term.write_line(&format!("{}", style("Position is liquidatable").red()));
    } else {
        let _ = term.write_line(&format!("{}", style("Position is healthy").green()));
    }
    Ok(())
}

fn cmd_run(cli: &Cli, path: &Path, keep_going: bool, term: &Term) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&data)
        .with_context(|| format!("parsing scenario {}", path.display()))?;

    let timestamp = scenario
        .timestamp
        .unwrap_or_else(|| u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0));

    let mut protocol = Protocol::new(config)?;
    protocol.begin_block(scenario.start_block, timestamp)?;

    let _ = term.write_line(&format!(
        "{} {} calls at block {}",
        style("Running").cyan().bold(),
        scenario.calls.len(),
        scenario.start_block
    ));

    let mut failures = 0usize;
    for (i, call) in scenario.calls.into_iter().enumerate() {
        let op_type = call.op.operation_type();
        let caller = call.caller;
        match protocol.apply(call) {
            Ok(result) => {
                let _ = term.write_line(&format!(
                    "{} #{} {} by {} {}",
                    style("✓").green(),
                    i,
                    op_type,
                    caller.short(),
                    describe(&result)
                ));
            }
            Err(e) => {
                failures += 1;
                let _ = term.write_line(&format!(
                    "{} #{} {} by {}: {} [{}]",
                    style("✗").red(),
                    i,
                    op_type,
                    caller.short(),
                    e,
                    e.code()
                ));
                if !keep_going {
                    anyhow::bail!("call #{} failed", i);
                }
            }
        }
    }

    let log = protocol.end_block();
    let indexer = EventIndexer::new();
    indexer.index_log(&log)?;
    let stats = indexer.statistics()?;

    let _ = term.write_line("");
    let _ = term.write_line(&format!("{}", style("Events").bold()));
    for (event_type, count) in &stats.events_by_type {
        let _ = term.write_line(&format!("  {:<20} {:>8}", event_type, count));
    }
    let _ = term.write_line(&format!("  {:<20} {:>8}", "accounts", stats.unique_accounts));
    if cli.verbose {
        let _ = term.write_line(&format!("  {:<20} {}", "event root", log.merkle_root()));
        for (asset, locked) in indexer.tvl()? {
            let _ = term.write_line(&format!(
                "  {} pooled={} lending={} volume={}",
                asset.short(),
                locked.pooled,
                locked.lending,
                indexer.volume(&asset)?
            ));
        }
    }

    protocol.verify_invariants()?;
    let _ = term.write_line("");
    let _ = term.write_line(&format!(
        "{} State hash {} ({} failed)",
        style("✓").green(),
        protocol.state_hash()?,
        failures
    ));
    Ok(())
}

fn cmd_config(cli: &Cli, write: Option<&Path>, term: &Term) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    match write {
        Some(path) => {
            config.save(path)?;
            let _ = term.write_line(&format!(
                "{} Configuration written to {}",
                style("✓").green(),
                path.display()
            ));
        }
        None => {
            let _ = term.write_line(&serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn load_config(cli: &Cli) -> anyhow::Result<ProtocolConfig> {
    let config = match &cli.config {
        Some(path) => ProtocolConfig::load(path)?,
        None => ProtocolConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn describe(result: &OperationResult) -> String {
    match result {
        OperationResult::Done => String::new(),
        OperationResult::TokenCreated { token } => format!("-> token {}", token.short()),
        OperationResult::PoolCreated { pool_id } => format!("-> pool {}", pool_id),
        OperationResult::Liquidity(receipt) => format!(
            "-> {} / {} for {} shares",
            receipt.amount_a, receipt.amount_b, receipt.shares
        ),
        OperationResult::Swapped { amounts } => format!("-> {:?}", amounts),
        OperationResult::Reserve(reserve) => format!(
            "-> price ${} active={} frozen={}",
            format_wad(reserve.price_usd),
            reserve.is_active,
            reserve.is_frozen
        ),
        OperationResult::Valued { value_usd } => format!("-> ${}", format_wad(*value_usd)),
        OperationResult::Withdrawn { health_factor } => format!("-> hf {}", format_hf(*health_factor)),
        OperationResult::Repaid { remaining_debt } => format!("-> {} remaining", remaining_debt),
    }
}

/// Parse a decimal string such as `1.25` into a WAD value
fn parse_wad(s: &str) -> anyhow::Result<u128> {
    let (whole, frac) = s.trim().split_once('.').unwrap_or((s.trim(), ""));
    if frac.len() > usize::from(WAD_DECIMALS) {
        anyhow::bail!("{}: more than {} decimal places", s, WAD_DECIMALS);
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse()? };
    let frac: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = usize::from(WAD_DECIMALS));
        padded.parse()?
    };
    whole
        .checked_mul(WAD)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| anyhow::anyhow!("{}: value too large", s))
}

fn format_wad(value: u128) -> String {
    let frac = format!("{:018}", value % WAD);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{}", value / WAD)
    } else {
        format!("{}.{}", value / WAD, frac)
    }
}

fn format_hf(hf: u128) -> String {
    if hf == HEALTH_FACTOR_INFINITE {
        "∞".to_string()
    } else {
        format_wad(hf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format_wad() {
        assert_eq!(parse_wad("1").unwrap(), WAD);
        assert_eq!(parse_wad("0.8").unwrap(), 8 * WAD / 10);
        assert_eq!(parse_wad(".5").unwrap(), WAD / 2);
        assert!(parse_wad("1.0000000000000000001").is_err());
        assert!(parse_wad("abc").is_err());

        assert_eq!(format_wad(WAD), "1");
        assert_eq!(format_wad(1_250_000_000_000_000_000), "1.25");
        assert_eq!(format_hf(HEALTH_FACTOR_INFINITE), "∞");
    }

    #[test]
    fn test_scenario_defaults() {
        let scenario: Scenario = serde_json::from_str("{\"calls\":[]}").unwrap();
        assert_eq!(scenario.start_block, 1);
        assert!(scenario.timestamp.is_none());
        assert!(scenario.calls.is_empty());
    }
}
