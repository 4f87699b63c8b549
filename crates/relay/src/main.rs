use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use solana_program::pubkey::Pubkey;

use adx_relay::config::create_example_config;
use adx_relay::{ExchangeClient, LocalCluster, Relay, RelayConfig};

#[derive(Parser, Debug)]
#[command(name = "adx-relay")]
#[command(about = "AdX relay: drives auctions across the base and accelerated layers")]
struct Args {
    /// Path to relay configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: String,

    /// Write an example configuration to --config and exit
    #[arg(long)]
    write_example: bool,

    /// Dry run mode - log the plan but don't submit anything
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    if args.write_example {
        create_example_config(&args.config)?;
        log::info!("Wrote example configuration to {}", args.config);
        return Ok(());
    }

    log::info!("Starting AdX relay");
    if args.dry_run {
        log::warn!("Running in DRY RUN mode - no requests will be submitted");
    }

    let config = RelayConfig::load(&args.config)?;
    log::info!(
        "Loaded configuration: {} publishers, {} DSPs, {} auctions",
        config.publishers.len(),
        config.dsps.len(),
        config.auctions.len()
    );

    let cluster = Arc::new(LocalCluster::new(
        config.program_id,
        Duration::from_millis(config.commit_latency_ms),
    ));
    let authority = Pubkey::new_unique();
    cluster
        .bootstrap(
            authority,
            config.token_mint,
            config.platform_fee_percentage,
            config.publisher_rev_share,
        )
        .await?;
    log::info!("Protocol authority: {}", authority);

    let mut keys = HashMap::new();
    for participant in config.publishers.iter().chain(config.dsps.iter()) {
        let key = Pubkey::new_unique();
        if participant.funds > 0 {
            cluster.fund(key, participant.funds).await;
        }
        log::debug!("{} -> {}", participant.name, key);
        keys.insert(participant.name.clone(), key);
    }

    let relay = Relay::new(
        Arc::clone(&cluster),
        config.clone(),
        authority,
        keys.clone(),
        args.dry_run,
    );
    let registered = relay.register_participants().await?;
    log::info!("Registered {} participants", registered);

    let reports = relay.run_all().await;
    println!("{}", serde_json::to_string_pretty(&reports)?);

    if !args.dry_run {
        let vault = cluster.vault_balance().await?;
        log::info!(
            "Vault: escrow {}, fees {}, pending {}",
            vault.total_balance,
            vault.fee_balance,
            vault.pending_settlements
        );
        for participant in &config.publishers {
            if let Some(key) = keys.get(&participant.name) {
                let balance = cluster.token_balance(key).await?;
                log::info!("Publisher {} balance: {}", participant.name, balance);
            }
        }
    }

    Ok(())
}
