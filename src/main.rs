use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dhcpcore::{Config, DhcpServer, Engine, LeaseFile, Result, SystemClock};

#[derive(Parser)]
#[command(name = "dhcpcore")]
#[command(author, version, about = "A DHCPv4 server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve DHCP until interrupted (default)
    Run,
    /// Print the effective configuration
    ShowConfig,
    /// Print the persisted leases and declined addresses
    ListLeases,
    /// Return a declined address to the pool
    ClearDeclined { ip: Ipv4Addr },
    /// Drop expired leases from the lease file
    CleanupLeases,
}

/// Loads the lease file into an offline engine, for the maintenance commands.
async fn open_offline(config: Config) -> Result<(Engine, LeaseFile, usize)> {
    let lease_file = LeaseFile::new(&config.leases_file);
    let snapshot = lease_file.load().await?;
    let stored = snapshot.leases.len();
    let engine = Engine::new(Arc::new(config), Arc::new(SystemClock))?;
    engine.restore(snapshot).await;
    Ok((engine, lease_file, stored))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let server = DhcpServer::new(config).await?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    if let Err(error) = server.save_leases().await {
                        tracing::error!("Failed to save leases on shutdown: {}", error);
                    }
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::ListLeases => {
            let (engine, _, _) = open_offline(config).await?;
            let leases = engine.leases().await;
            let now = Utc::now();

            if leases.is_empty() {
                println!("No active leases.");
            } else {
                println!(
                    "{:<24} {:<16} {:<10} {:<24} {:<10} {}",
                    "Client ID", "IP Address", "State", "Expires At", "Remaining", "Hostname"
                );
                println!("{}", "-".repeat(100));

                for lease in leases {
                    println!(
                        "{:<24} {:<16} {:<10} {:<24} {:<10} {}",
                        lease.client_id.to_string(),
                        lease.ip.to_string(),
                        lease.state.to_string(),
                        lease.expires_at().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                        format!("{}s", lease.remaining_seconds(now)),
                        lease.hostname.as_deref().unwrap_or("-")
                    );
                }
            }

            let declined = engine.declined().await;
            if !declined.is_empty() {
                println!();
                println!("Declined addresses:");
                for ip in declined {
                    println!("  {}", ip);
                }
            }

            let usage = engine.usage().await;
            println!();
            println!(
                "{} of {} addresses free ({} active, {} declined)",
                usage.free, usage.size, usage.active, usage.declined
            );

            Ok(())
        }
        Commands::ClearDeclined { ip } => {
            let (engine, lease_file, _) = open_offline(config).await?;
            if engine.clear_declined(ip).await {
                lease_file.save(&engine.snapshot().await).await?;
                println!("{} returned to the pool.", ip);
            } else {
                println!("{} is not declined.", ip);
            }
            Ok(())
        }
        Commands::CleanupLeases => {
            let (engine, lease_file, stored) = open_offline(config).await?;
            let snapshot = engine.snapshot().await;
            let count = stored.saturating_sub(snapshot.leases.len());
            lease_file.save(&snapshot).await?;
            println!("Cleaned up {} expired lease(s).", count);
            Ok(())
        }
    }
}
