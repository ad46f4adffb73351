//! Operational CLI: recovery sweeps, the watch daemon, transfer listing and
//! retention cleanup.

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use tracing::info;

use cctp_orchestrator::config::{Ctx, Env, setup_tracing};
use cctp_orchestrator::{AttestationClient, Ledger, RecoveryScanner};

#[derive(Parser, Debug)]
#[clap(name = "cctp-orchestrator", version)]
struct Cli {
    #[clap(flatten)]
    env: Env,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one recovery sweep over an owner's transfers and exit
    Sweep {
        #[clap(long)]
        owner: Address,
    },
    /// Sweep periodically until interrupted
    Watch {
        #[clap(long)]
        owner: Address,
    },
    /// List an owner's transfers, newest first
    List {
        #[clap(long)]
        owner: Address,
    },
    /// Purge completed transfers older than the retention window
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ctx = Ctx::load_file(&cli.env.config)?;
    setup_tracing(&ctx.log_level);

    let pool = ctx.sqlite_pool().await?;
    sqlx::migrate!().run(&pool).await?;
    let ledger = Ledger::new(pool);
    let attestation =
        AttestationClient::new(ctx.attestation_api_base.clone(), ctx.poll_policy.clone())?;

    match cli.command {
        Command::Sweep { owner } => {
            let scanner = RecoveryScanner::new(ledger, attestation);
            let report = scanner.sweep_owner(owner).await?;
            println!(
                "scanned {} transfer(s): {} recovered, {} still waiting, {} abandoned",
                report.scanned, report.recovered, report.waiting, report.abandoned
            );
        }
        Command::Watch { owner } => {
            let scanner = RecoveryScanner::new(ledger, attestation)
                .with_intervals(ctx.sweep_intervals);
            tokio::select! {
                () = scanner.run(owner) => {}
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Interrupt received, shutting down");
                }
            }
        }
        Command::List { owner } => {
            let transfers = ledger.list_by_owner(owner).await?;
            if transfers.is_empty() {
                println!("no transfers for {owner}");
            }
            for transfer in transfers {
                let burn = transfer
                    .burn_tx_hash
                    .map_or_else(|| "-".to_string(), |hash| hash.to_string());
                println!(
                    "{}  {}  {} -> {}  {} USDC units  burn {}",
                    transfer.id,
                    transfer.status,
                    transfer.source_chain,
                    transfer.destination_chain,
                    transfer.amount,
                    burn
                );
            }
        }
        Command::Cleanup => {
            let purged = ledger.cleanup().await?;
            println!("purged {purged} completed transfer(s)");
        }
    }
    Ok(())
}
