use clap::{Parser, Subcommand};

mod backfill;
mod status;

#[derive(Debug, Parser)]
#[command(name = "adsink-cli")]
#[command(about = "adsink backfill command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a backfill for one tenant in the foreground.
    Backfill {
        /// Tenant id from the tenants file.
        #[arg(long)]
        tenant: String,
        /// Lookback window in days; defaults to the tenant's configured value.
        #[arg(long)]
        lookback: Option<u32>,
        /// Re-fetch days that already have facts (data correction).
        #[arg(long)]
        force: bool,
    },
    /// Print the full status of one run as JSON.
    Status {
        /// Run id (UUID) as returned by the trigger.
        #[arg(long)]
        run: uuid::Uuid,
    },
    /// List recent runs for a tenant.
    Runs {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Backfill {
            tenant,
            lookback,
            force,
        } => backfill::run(&tenant, lookback, force).await,
        Commands::Status { run } => status::show_run(run).await,
        Commands::Runs { tenant, limit } => status::list_runs(&tenant, limit).await,
    }
}
