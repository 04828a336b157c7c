//! Operator CLI for the Spool harness.
//!
//! ```text
//! spool-harness snapshot [config.toml]
//! spool-harness encode <i,j,k> <p,q,r>
//! ```
//!
//! `snapshot` reads every vault and strategy in the deployment registry plus
//! the positions of each configured user, prints the snapshot as JSON and
//! checks the standing conservation invariants. `encode` prints the packed
//! words for an allocation request.

use std::path::PathBuf;

use alloy_primitives::Address;
use spool_harness::chain::ChainClient;
use spool_harness::reconcile::check_conservation;
use spool_harness::snapshot::capture;
use spool_harness::{Allocation, ChainProtocol, DeploymentRegistry, HarnessConfig, HarnessError};

const DEFAULT_CONFIG: &str = "harness.toml";

const USAGE: &str = "usage:\n  spool-harness snapshot [config.toml]\n  spool-harness encode <i,j,k> <p,q,r>";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    setup_log();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args).await {
        tracing::error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<(), HarnessError> {
    match args.first().map(String::as_str) {
        Some("snapshot") => {
            let path = args
                .get(1)
                .map(PathBuf::from)
                .or_else(|| std::env::var("HARNESS_CONFIG").ok().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
            snapshot(HarnessConfig::load(Some(path.as_path()))?).await
        }
        Some("encode") => {
            let (Some(indices), Some(proportions)) = (args.get(1), args.get(2)) else {
                return Err(HarnessError::Config(USAGE.into()));
            };
            encode(indices, proportions)
        }
        _ => Err(HarnessError::Config(USAGE.into())),
    }
}

async fn snapshot(config: HarnessConfig) -> Result<(), HarnessError> {
    let registry = DeploymentRegistry::load(&config.deployment_path)?;
    let operator = ChainClient::new(&config.rpc_url, config.require_operator_key()?, config.chain_id)?;
    tracing::info!(operator = %operator.address, rpc = %config.rpc_url, "connected");

    let mut protocol = ChainProtocol::new(operator, registry.controller, registry.lens);
    for key in &config.user_keys {
        protocol = protocol.with_user(key)?;
    }

    let registry = registry.with_strategy_order(protocol.all_strategies().await?)?;
    let mut scope = registry.scope()?;
    let users: Vec<Address> = protocol.users().collect();
    for &user in &users {
        for vault in registry.vaults.values() {
            scope.track(user, vault.address);
        }
    }

    let snapshot = capture(&protocol, &scope).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    // Conservation only holds when every holder of each vault is in scope.
    if users.is_empty() {
        tracing::info!("no user keys configured, checking strategy totals only");
        spool_harness::reconcile::check_strategy_totals(&snapshot, &config.tolerances)?;
    } else {
        check_conservation(&snapshot, &config.tolerances)?;
    }
    tracing::info!(
        vaults = snapshot.vaults.len(),
        strategies = snapshot.strategies.len(),
        users = users.len(),
        "snapshot consistent"
    );
    Ok(())
}

fn encode(indices: &str, proportions: &str) -> Result<(), HarnessError> {
    let indices = parse_list::<usize>(indices)?;
    let proportions = parse_list::<u32>(proportions)?;
    let packed = Allocation::new(indices, proportions)?.encode()?;
    println!("{}", serde_json::to_string_pretty(&packed)?);
    Ok(())
}

fn parse_list<T: std::str::FromStr>(list: &str) -> Result<Vec<T>, HarnessError>
where
    T::Err: std::fmt::Display,
{
    list.split(',')
        .map(|item| {
            item.trim()
                .parse()
                .map_err(|e| HarnessError::Config(format!("invalid list item {item:?}: {e}")))
        })
        .collect()
}

fn setup_log() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init();
}
