use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod collect;
mod csv_io;


#[derive(Debug, Parser)]
#[command(name = "grocer")]
#[command(about = "Grocery catalog acquisition and ingest")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape stores and write one CSV per store
    Scrape {
        /// Store code to scrape; repeat for several, omit for all
        #[arg(long = "store", value_name = "CODE")]
        stores: Vec<String>,
        /// Directory for the CSV files (defaults to GROCER_OUTPUT_DIR)
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Deadline for the whole run (defaults to GROCER_SCRAPER_DEADLINE_SECS)
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Scrape stores and persist their records to the database
    Collect {
        #[arg(long = "store", value_name = "CODE")]
        stores: Vec<String>,
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Print the stores that would be collected and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Persist CSV files written by `scrape`, one batch per file
    Ingest {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// List the stores known to the database
    Stores,
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    Ping,
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = grocer_core::load_app_config()?;
    init_tracing(&config.log_level);

    match cli.command {
        Some(Commands::Scrape {
            stores,
            output_dir,
            deadline_secs,
        }) => {
            let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
            collect::run_scrape(&config, &stores, &output_dir, deadline_secs).await?;
        }
        Some(Commands::Collect {
            stores,
            deadline_secs,
            dry_run,
        }) => {
            if dry_run {
                collect::print_dry_run(&config, &stores)?;
            } else {
                let pool = connect(&config).await?;
                collect::run_collect(&pool, &config, &stores, deadline_secs).await?;
            }
        }
        Some(Commands::Ingest { files }) => {
            let pool = connect(&config).await?;
            collect::run_ingest(&pool, &files).await?;
        }
        Some(Commands::Db { command }) => {
            let pool = connect(&config).await?;
            match command {
                DbCommands::Ping => {
                    grocer_db::ping(&pool).await?;
                    println!("database ok");
                }
                DbCommands::Migrate => {
                    let applied = grocer_db::run_migrations(&pool).await?;
                    println!("applied {applied} migrations");
                }
            }
        }
        Some(Commands::Stores) => {
            let pool = connect(&config).await?;
            for store in grocer_db::list_stores(&pool).await? {
                println!("{}\t{}", store.code, store.name);
            }
        }
        None => println!("grocer: no command given, see --help"),
    }

    Ok(())
}

/// `RUST_LOG` wins when set; otherwise the configured level applies.
fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect(config: &grocer_core::AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool = grocer_db::connect_pool(
        &config.database_url,
        grocer_db::PoolConfig::from_app_config(config),
    )
    .await?;
    Ok(pool)
}
