//! fleet-sync binary entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use fleet_sync::authority::{CnameAuthority, IpAuthority};
use fleet_sync::netstatus::NetworkStatus;
use fleet_sync::node::Scope;
use fleet_sync::providers::{RestCnameAuthority, RestIpAuthority};
use fleet_sync::util::human_bytes;
use fleet_sync::{telemetry, AppContext, Config, Reconciler};

/// Relay-fleet registry cache and DNS reconciliation.
#[derive(Parser, Debug)]
#[command(name = "fleet-sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "fleet-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile both DNS authorities against the registry.
    Sync,
    /// Manually alias one node to another's canonical identity.
    Mix {
        /// Node id whose alias records are rewritten.
        #[arg(long)]
        src: i64,
        /// Node id whose canonical name becomes the target.
        #[arg(long)]
        tgt: i64,
        /// Which scopes to rewrite.
        #[arg(long, value_enum, default_value = "all")]
        scope: MixScope,
    },
    /// Identify which fleet node this host is.
    Whoami,
    /// List fleet nodes with their traffic counters.
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MixScope {
    Default,
    Edu,
    All,
}

impl MixScope {
    fn scopes(self) -> Vec<Scope> {
        match self {
            MixScope::Default => vec![Scope::Default],
            MixScope::Edu => vec![Scope::Edu],
            MixScope::All => Scope::ALL.to_vec(),
        }
    }
}

fn build_reconciler(config: &Config) -> Reconciler {
    let ip: Arc<dyn IpAuthority> = Arc::new(RestIpAuthority::new(config.ip_authority.clone()));
    let cname: Arc<dyn CnameAuthority> =
        Arc::new(RestCnameAuthority::new(config.cname_authority.clone()));
    Reconciler::new(
        ip,
        cname,
        config.naming.clone(),
        config.cname_authority.lines.clone(),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("FLEET_SYNC")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        store = %config.store.path.display(),
        "Starting fleet-sync"
    );

    let ctx = AppContext::from_config(&config).await?;

    match args.command {
        Command::Sync => {
            let reconciler = build_reconciler(&config);
            let mut nodes = ctx.nodes.all(true).await?;
            let summary = reconciler.run(&mut nodes).await?;
            info!(%summary, "sync complete");
            if summary.errors > 0 {
                error!(errors = summary.errors, "sync finished with errors");
            }
        }
        Command::Mix { src, tgt, scope } => {
            let reconciler = build_reconciler(&config);
            let summary = reconciler.force_alias(src, tgt, &scope.scopes()).await?;
            info!(src, tgt, %summary, "alias applied");
        }
        Command::Whoami => {
            let status = NetworkStatus::probe(2, Duration::from_secs(5)).await;
            match ctx.whoami(&status).await? {
                Some(node) => println!("{} ({})", node.name, node.uuid),
                None => {
                    error!("this host matches no node in the registry");
                    std::process::exit(1);
                }
            }
        }
        Command::Status => {
            let nodes = ctx.nodes.all(true).await?;
            for node in &nodes {
                println!(
                    "{:>5}  {:<24} up {:>12}  down {:>12}",
                    node.node_id,
                    node.name,
                    human_bytes(node.upload),
                    human_bytes(node.download),
                );
            }
        }
    }

    ctx.shutdown().await;
    info!("fleet-sync shutdown complete");
    Ok(())
}
