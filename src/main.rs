use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sweepboard::autoscale;
use sweepboard::compiler::spec::SweepSpec;
use sweepboard::compiler::{self, Compiler};
use sweepboard::config::Config;
use sweepboard::shutdown::install_shutdown_handler;
use sweepboard::store::remote::RemoteStore;
use sweepboard::store::{RetryingStore, WorkItemStore};
use sweepboard::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "sweepboard")]
#[command(version)]
#[command(about = "Experiment sweep compiler and cache-affinity worker scheduler")]
struct Args {
    /// Configuration file (defaults to ./sweepboard.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Compile a sweep document and submit its jobs to the board
    Schedule {
        /// The sweep document (YAML)
        spec: PathBuf,

        /// Print the compiled jobs instead of submitting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Poll the board for claimable work and execute it
    Worker,

    /// Watch the backlog and bring workers online as needed
    Autoscale,
}

fn board_store(config: &Config) -> Result<RetryingStore<RemoteStore>, Box<dyn std::error::Error>> {
    let token = Config::api_token()?;
    Ok(RetryingStore::new(RemoteStore::new(&config.board, token)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())?;

    match args.command {
        Commands::Schedule { spec, dry_run } => {
            let spec = SweepSpec::load(&spec)?;
            let records = Compiler::compile(&spec)?;
            tracing::info!(jobs = records.len(), "sweep compiled");
            if dry_run {
                for record in &records {
                    println!("=== {} ===", record.name);
                    if !record.depends_on.is_empty() {
                        println!("depends on: {}", record.depends_on.join(", "));
                    }
                    println!("{}", record.script);
                    println!();
                }
                return Ok(());
            }
            let store = board_store(&config)?;
            let created = compiler::submit(&records, &store, &config.board.states).await?;
            println!("Submitted {} jobs", created.len());
        }
        Commands::Worker => {
            let store: Arc<dyn WorkItemStore> = Arc::new(board_store(&config)?);
            let shutdown = install_shutdown_handler();
            let mut worker = Worker::new(store, &config)?;
            tracing::info!(worker = %worker.id(), "worker starting");
            worker.run(shutdown).await?;
        }
        Commands::Autoscale => {
            let store = board_store(&config)?;
            let shutdown = install_shutdown_handler();
            autoscale::run(&store, &config, shutdown).await?;
        }
    }

    Ok(())
}
