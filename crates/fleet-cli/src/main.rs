use std::path::PathBuf;

use clap::{Parser, Subcommand};

use fleet_core::ConflictStrategy;

mod commands;

use commands::TargetArgs;

#[derive(Parser)]
#[command(
    name = "fleet",
    about = "FleetGrid — machine assignment orchestration",
    version,
    propagate_version = true,
)]
struct Cli {
    /// fleet.toml with timings and policies (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// inventory.toml listing the team's machines and their assignments
    #[arg(short, long, global = true, default_value = "inventory.toml")]
    inventory: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate machines for an assignment target.
    ///
    /// Runs the local rules, then re-checks availability with the service.
    /// Large selections are validated by the service in one call.
    Validate {
        /// Machines to validate (default: every machine in the inventory)
        machines: Vec<String>,
        #[command(flatten)]
        target: TargetArgs,
        /// Only run the local rules, debounced like an interactive form
        #[arg(long)]
        local: bool,
    },
    /// Assign machines through the validate → resolve → assign workflow
    Assign {
        machines: Vec<String>,
        #[command(flatten)]
        target: TargetArgs,
        /// Conflict strategy: skip_conflicts, force_reassign or fail_fast
        #[arg(long)]
        strategy: Option<ConflictStrategy>,
        /// Resolve detected conflicts with the strategy before assigning
        #[arg(long)]
        auto_resolve: bool,
    },
    /// Assign many machines batch by batch
    BulkAssign {
        /// Machines to assign (default: every machine in the inventory)
        machines: Vec<String>,
        #[command(flatten)]
        target: TargetArgs,
        /// Machines per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Abort at the first failed batch
        #[arg(long)]
        stop_on_first_error: bool,
        /// Let the service batch the operation itself
        #[arg(long)]
        server_batched: bool,
    },
    /// Remove machines from a cluster or clone
    Remove {
        machines: Vec<String>,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Move machines from one cluster to another
    Migrate {
        machines: Vec<String>,
        /// Source cluster
        #[arg(long)]
        from: String,
        /// Destination cluster
        #[arg(long)]
        to: String,
        /// Process in batches with per-machine retry
        #[arg(long)]
        bulk: bool,
    },
    /// Move an image to a different machine
    ReassignImage {
        #[arg(long)]
        image: String,
        #[arg(long)]
        pool: String,
        /// Machine that should hold the image
        #[arg(long)]
        to: String,
        /// Machine currently holding the image, enabling undo
        #[arg(long)]
        from: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleet=info".parse()?)
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let inventory = cli.inventory.as_path();

    match cli.command {
        Commands::Validate {
            machines,
            target,
            local,
        } => commands::validate::run(config, inventory, &machines, &target, local).await,
        Commands::Assign {
            machines,
            target,
            strategy,
            auto_resolve,
        } => {
            commands::assign::run(
                config,
                inventory,
                &machines,
                &target,
                strategy,
                auto_resolve,
            )
            .await
        }
        Commands::BulkAssign {
            machines,
            target,
            batch_size,
            stop_on_first_error,
            server_batched,
        } => {
            let overrides = commands::bulk::Overrides {
                batch_size,
                stop_on_first_error,
                server_batched,
            };
            commands::bulk::assign(config, inventory, &machines, &target, overrides).await
        }
        Commands::Remove { machines, target } => {
            commands::bulk::remove(config, inventory, &machines, &target).await
        }
        Commands::Migrate {
            machines,
            from,
            to,
            bulk,
        } => commands::migrate::run(config, inventory, &machines, &from, &to, bulk).await,
        Commands::ReassignImage {
            image,
            pool,
            to,
            from,
        } => {
            commands::image::run(config, inventory, &image, &pool, &to, from.as_deref()).await
        }
        Commands::Config => commands::show_config(config),
    }
}
