//! Scrape, collect and ingest command handlers.
//!
//! Called from `main` once config (and, where needed, the database pool)
//! is established. Per-store and per-file failures are reported and
//! skipped so one bad source does not abort the rest of the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use grocer_core::AppConfig;
use grocer_scraper::{
    run_all_sources_with_token, ClientSettings, SourceRegistry, StoreOutcome,
};
use tokio_util::sync::CancellationToken;

use crate::csv_io::{read_records_csv, write_records_csv};

/// Every registered store, narrowed to `stores` when any are given.
fn build_registry(config: &AppConfig, stores: &[String]) -> anyhow::Result<SourceRegistry> {
    let settings = ClientSettings::from_app_config(config);
    let registry = SourceRegistry::from_settings(&settings)?.select(stores)?;
    Ok(registry)
}

/// Runs the registry under the configured (or overridden) deadline. Ctrl-C
/// cancels the run the same way the deadline does.
async fn scrape(
    config: &AppConfig,
    registry: &SourceRegistry,
    deadline_secs: Option<u64>,
) -> Vec<StoreOutcome> {
    let deadline = Duration::from_secs(deadline_secs.unwrap_or(config.scraper_deadline_secs));
    let cancel = CancellationToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling scrape");
                cancel.cancel();
            }
        })
    };

    tracing::info!(
        stores = ?registry.codes(),
        deadline_secs = deadline.as_secs(),
        concurrency = config.scraper_concurrency,
        "starting scrape"
    );
    let outcomes =
        run_all_sources_with_token(registry, deadline, config.scraper_concurrency, cancel).await;
    interrupt.abort();
    outcomes
}

/// One-line report for a store outcome.
pub(crate) fn describe_outcome(outcome: &StoreOutcome) -> String {
    let mut line = format!(
        "{}: {} records ({})",
        outcome.store,
        outcome.record_count(),
        outcome.state
    );
    if outcome.pages_failed > 0 {
        line.push_str(&format!(", {} pages failed", outcome.pages_failed));
    }
    if outcome.cancelled {
        line.push_str(", cancelled");
    }
    if let Some(error) = &outcome.error {
        line.push_str(&format!(": {error}"));
    }
    line
}

/// Scrapes the selected stores and writes `{output_dir}/{code}.csv` for each
/// store that got past discovery.
///
/// # Errors
///
/// Returns an error if a store code is unknown, an HTTP client cannot be
/// built, a CSV file cannot be written, or every store failed.
pub(crate) async fn run_scrape(
    config: &AppConfig,
    stores: &[String],
    output_dir: &Path,
    deadline_secs: Option<u64>,
) -> anyhow::Result<()> {
    let registry = build_registry(config, stores)?;
    let outcomes = scrape(config, &registry, deadline_secs).await;

    let mut written = 0usize;
    for outcome in &outcomes {
        if outcome.is_failed() {
            eprintln!("error: {}", describe_outcome(outcome));
            continue;
        }
        let path = write_records_csv(output_dir, &outcome.store, &outcome.records)?;
        println!("{} -> {}", describe_outcome(outcome), path.display());
        written += 1;
    }

    if written == 0 && !outcomes.is_empty() {
        anyhow::bail!("every store failed, nothing written");
    }
    Ok(())
}

/// Prints the stores a collect run would scrape without touching the network
/// or the database.
///
/// # Errors
///
/// Returns an error if a store code is unknown.
pub(crate) fn print_dry_run(config: &AppConfig, stores: &[String]) -> anyhow::Result<()> {
    let registry = build_registry(config, stores)?;
    let codes = registry.codes();
    println!(
        "dry-run: would collect {} stores: [{}]",
        codes.len(),
        codes.join(", ")
    );
    Ok(())
}

/// Scrapes the selected stores and persists each store's records as one
/// batch. A cancelled store still persists what it gathered before the
/// cancellation.
///
/// # Errors
///
/// Returns an error if a store code is unknown, an HTTP client cannot be
/// built, or no store was persisted.
pub(crate) async fn run_collect(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    stores: &[String],
    deadline_secs: Option<u64>,
) -> anyhow::Result<()> {
    let registry = build_registry(config, stores)?;
    let outcomes = scrape(config, &registry, deadline_secs).await;

    let mut persisted = 0usize;
    let mut total_records = 0usize;
    for outcome in &outcomes {
        if outcome.is_failed() {
            eprintln!("error: {}", describe_outcome(outcome));
            continue;
        }
        match grocer_db::persist_records(pool, &outcome.records).await {
            Ok(summary) => {
                tracing::info!(
                    store = %outcome.store,
                    categories = summary.categories,
                    products = summary.products,
                    prices = summary.prices,
                    "store persisted"
                );
                println!("{}", describe_outcome(outcome));
                persisted += 1;
                total_records += summary.prices;
            }
            Err(e) => {
                eprintln!("error: failed to persist {}: {e}", outcome.store);
            }
        }
    }

    println!(
        "collected {total_records} records across {persisted} of {} stores",
        outcomes.len()
    );
    if persisted == 0 && !outcomes.is_empty() {
        anyhow::bail!("no store was persisted");
    }
    Ok(())
}

/// Persists each CSV file as its own batch.
///
/// # Errors
///
/// Returns an error naming the files that could not be read or persisted;
/// every other file is still committed.
pub(crate) async fn run_ingest(pool: &sqlx::PgPool, files: &[PathBuf]) -> anyhow::Result<()> {
    let mut failed: Vec<String> = Vec::new();

    for file in files {
        let records = match read_records_csv(file) {
            Ok(records) => records,
            Err(e) => {
                eprintln!("error: failed to read {}: {e}", file.display());
                failed.push(file.display().to_string());
                continue;
            }
        };

        match grocer_db::persist_records(pool, &records).await {
            Ok(summary) => println!(
                "{}: {} products, {} prices",
                file.display(),
                summary.products,
                summary.prices
            ),
            Err(e) => {
                eprintln!("error: failed to persist {}: {e}", file.display());
                failed.push(file.display().to_string());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("{} file(s) not ingested: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

#[cfg(test)]
#[path = "collect_test.rs"]
mod tests;
