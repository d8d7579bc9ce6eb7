//! transfer-store CLI: operator interface to a transfer store directory.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use transfer_store::config::Config;
use transfer_store::model::TransferEntry;
use transfer_store::store::TransferStore;
use transfer_store::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "transfer-store", about = "Inspect and drive a transfer claim store")]
struct Cli {
    /// Store directory (overrides config and TRANSFER_STORE_DIRECTORY)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,
    /// Worker id to claim and release under
    #[arg(long, global = true)]
    worker_id: Option<String>,
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a created transfer as pending
    Save {
        sender: String,
        receiver: String,
        /// Transfer id (a random UUID if omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Show one transfer
    Show { id: String },
    /// Claim the oldest pending transfer
    Claim {
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        receiver: Option<String>,
        /// With --sender and --receiver, fall back to any transfer from the sender
        #[arg(long)]
        fallback: bool,
    },
    /// Release a claim held by this worker
    Release { id: String },
    /// Mark a transfer confirmed
    Confirm { id: String },
    /// List pending transfers for a sender/receiver pair
    Pending { sender: String, receiver: String },
    /// List unclaimed pending transfers grouped by pair
    Groups,
    /// Show store statistics
    Stats,
    /// Delete confirmed transfers past the retention window
    Purge {
        /// Age in hours (defaults to the configured retention)
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.dir {
        config.store.directory = dir;
    }
    if let Some(worker_id) = cli.worker_id {
        config.store = config.store.worker_id(worker_id);
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "transfer-store".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let store = TransferStore::new(config.store);

    match cli.command {
        Command::Save {
            sender,
            receiver,
            id,
        } => cmd_save(&store, id, &sender, &receiver),
        Command::Show { id } => cmd_show(&store, &id),
        Command::Claim {
            sender,
            receiver,
            fallback,
        } => cmd_claim(&store, sender, receiver, fallback),
        Command::Release { id } => {
            if store.release_claim(&id) {
                println!("Released: {id}");
            } else {
                println!("Not released: {id} is not claimed by {}", store.worker_id());
            }
            Ok(())
        }
        Command::Confirm { id } => {
            if store.mark_as_confirmed(&id) {
                println!("Confirmed: {id}");
            } else {
                println!("Unchanged: {id} is unknown or already confirmed");
            }
            Ok(())
        }
        Command::Pending { sender, receiver } => {
            let pending = store.pending_transfers_by_sender_receiver(&sender, &receiver);
            print_table(&pending);
            Ok(())
        }
        Command::Groups => cmd_groups(&store),
        Command::Stats => cmd_stats(&store),
        Command::Purge { older_than_hours } => {
            let cleared = match older_than_hours {
                Some(hours) => store.clear_confirmed_transfers(hours),
                None => store.clear_expired_confirmed(),
            };
            println!("Deleted {cleared} confirmed transfer(s)");
            Ok(())
        }
    }
}

fn cmd_save(
    store: &TransferStore,
    id: Option<String>,
    sender: &str,
    receiver: &str,
) -> anyhow::Result<()> {
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let Some(entry) = store.save_transfer(&id, sender, receiver) else {
        anyhow::bail!("transfer {id} was not saved (see log)");
    };
    println!("Saved: {} ({} → {})", entry.id, entry.sender_id, entry.receiver_id);
    Ok(())
}

fn cmd_show(store: &TransferStore, id: &str) -> anyhow::Result<()> {
    let Some(entry) = store.load_transfer(id) else {
        anyhow::bail!("no transfer with id '{id}'");
    };

    println!("ID:           {}", entry.id);
    println!("Sender:       {}", entry.sender_id);
    println!("Receiver:     {}", entry.receiver_id);
    println!("State:        {}", entry.state());
    println!("Created:      {}", entry.created_at);
    if let Some(at) = entry.confirmed_at {
        println!("Confirmed:    {at}");
    }
    if let Some(ref owner) = entry.claimed_by {
        println!("Claimed By:   {owner}");
    }
    if let Some(at) = entry.claimed_at {
        println!("Claimed At:   {at}");
    }
    println!("File:         {}", store.repository().path_for(id).display());
    Ok(())
}

fn cmd_claim(
    store: &TransferStore,
    sender: Option<String>,
    receiver: Option<String>,
    fallback: bool,
) -> anyhow::Result<()> {
    let claimed = match (sender.as_deref(), fallback) {
        (Some(sender), true) => store.claim_with_fallback(sender, receiver.as_deref()),
        (None, true) => anyhow::bail!("--fallback needs --sender"),
        (sender, false) => store.claim_pending_transfer(sender, receiver.as_deref()),
    };

    match claimed {
        Some(entry) => println!(
            "Claimed: {} ({} → {}) by {}",
            entry.id,
            entry.sender_id,
            entry.receiver_id,
            store.worker_id()
        ),
        None => println!("No pending transfer available."),
    }
    Ok(())
}

fn cmd_groups(store: &TransferStore) -> anyhow::Result<()> {
    let groups = store.pending_transfers_grouped();
    if groups.is_empty() {
        println!("No unclaimed pending transfers.");
        return Ok(());
    }

    println!("{:<40}  {:>6}  OLDEST", "PAIR", "COUNT");
    println!("{}", "-".repeat(72));
    for (pair, entries) in &groups {
        let oldest = entries
            .first()
            .map(|e| e.created_at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("{:<40}  {:>6}  {}", pair, entries.len(), oldest);
    }
    println!("\n{} pair(s)", groups.len());
    Ok(())
}

fn cmd_stats(store: &TransferStore) -> anyhow::Result<()> {
    let stats = store.statistics();
    println!("Total:        {}", stats.total);
    println!("Pending:      {}", stats.pending);
    println!("  Claimed:    {}", stats.claimed);
    println!("  Unclaimed:  {}", stats.unclaimed);
    println!("Confirmed:    {}", stats.confirmed);
    println!("Pairs:        {}", stats.sender_receiver_pairs);
    match stats.last_cache_refresh {
        Some(at) => println!("Refreshed:    {at}"),
        None => println!("Refreshed:    never"),
    }
    Ok(())
}

fn print_table(entries: &[TransferEntry]) {
    if entries.is_empty() {
        println!("No pending transfers.");
        return;
    }

    println!(
        "{:<36}  {:<10}  {:<24}  CREATED",
        "ID", "STATE", "CLAIMED BY"
    );
    println!("{}", "-".repeat(100));
    for entry in entries {
        let owner = entry
            .claimed_by
            .as_ref()
            .map(|w| w.as_str())
            .unwrap_or("-");
        println!(
            "{:<36}  {:<10}  {:<24}  {}",
            entry.id,
            entry.state().to_string(),
            owner,
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} transfer(s)", entries.len());
}
