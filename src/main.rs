//! jiradw - Incremental Jira to reporting-warehouse sync
//!
//! Main entry point for the jiradw CLI.

use clap::{Parser, Subcommand};
use jiradw::config::{EtlConfig, ScopeSpec};
use jiradw::jira::{FieldDef, JiraApi, JiraHttpClient, SearchProvider, SearchRequest};
use jiradw::store::{CursorStore, Warehouse};
use jiradw::sync::{RunMode, SyncOrchestrator};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;

/// jiradw - Sync Jira projects into a local SQLite reporting warehouse
#[derive(Parser, Debug)]
#[command(name = "jiradw")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/jiradw/config.yaml)
    #[arg(short, long)]
    config: Option<String>,

    /// Only these scopes, comma-separated ("DEMO:Bug" or just "DEMO")
    #[arg(short, long)]
    scopes: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl every scope's whole configured window from its start
    Backfill,

    /// Pull everything updated since each scope's stored cursor
    Sync,

    /// Run a raw JQL query and print the matches, without touching the
    /// warehouse
    Preview {
        /// JQL to run
        #[arg(long)]
        jql: String,

        /// Fields to request (comma-separated; default: summary,status,updated)
        #[arg(long)]
        fields: Option<String>,

        /// Maximum issues to print
        #[arg(long, default_value = "20")]
        max: u32,
    },

    /// Fetch the field catalog and store it in the warehouse
    Fields {
        /// Print the catalog as JSON instead of a summary
        #[arg(long)]
        json: bool,

        /// Also dump the catalog to a JSON file (parent directories are
        /// created as needed)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show cursors, recent runs, and warehouse totals
    Status,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    if let Err(e) = jiradw::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> jiradw::Result<()> {
    let config = if let Some(config_path) = cli.config.clone() {
        EtlConfig::load(config_path)?
    } else {
        match EtlConfig::load_default() {
            Ok(config) => config,
            Err(jiradw::EtlError::Config(msg)) if msg.contains("Config file not found") => {
                return Err(jiradw::EtlError::Config(format!(
                    "No configuration found at {}.\n\n\
                     Create one describing your Jira instance and scopes, e.g.:\n\n\
                     jira:\n  \
                       base_url: https://jira.example.com\n  \
                       pat_env: JIRA_PAT\n\
                     scopes:\n  \
                       - project: DEMO\n    \
                         issue_types:\n      \
                           - name: Bug",
                    EtlConfig::default_path().display()
                )));
            }
            Err(e) => return Err(e),
        }
    };

    let mut scopes = config.scope_specs();
    if let Some(filter) = cli.scopes {
        let wanted: Vec<String> = filter.split(',').map(|s| s.trim().to_string()).collect();
        scopes.retain(|scope| {
            wanted
                .iter()
                .any(|w| w == &scope.name || w == &scope.project)
        });
        if scopes.is_empty() {
            return Err(jiradw::EtlError::Config(format!(
                "No configured scope matches '{}'",
                filter
            )));
        }
    }

    match cli.command {
        Commands::Backfill => run_sync(&config, &scopes, RunMode::Backfill).await,
        Commands::Sync => run_sync(&config, &scopes, RunMode::Incremental).await,
        Commands::Preview { jql, fields, max } => preview(&config, jql, fields, max).await,
        Commands::Fields { json, output } => fetch_fields(&config, json, output).await,
        Commands::Status => show_status(&config, &scopes),
    }
}

async fn run_sync(
    config: &EtlConfig,
    scopes: &[ScopeSpec],
    mode: RunMode,
) -> jiradw::Result<()> {
    let client = JiraHttpClient::new(&config.jira)?;
    let api = JiraApi::new(client);

    // Fail fast on bad credentials, before any run record exists
    let me = api.myself().await?;
    tracing::info!(
        user = me
            .display_name
            .as_deref()
            .or(me.name.as_deref())
            .unwrap_or("<unknown>"),
        "Authenticated against Jira"
    );

    let mut warehouse = Warehouse::open(&config.database)?;
    let mut orchestrator = SyncOrchestrator::new(&api, &mut warehouse, config);

    // Ctrl-C stops between pages; the in-flight page still commits
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current page");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let reports = orchestrator.run(scopes, mode).await?;

    println!();
    for report in &reports {
        match &report.error {
            Some(err) => println!(
                "  {:<20} failed after {} pages: {}",
                report.scope, report.pages, err
            ),
            None => println!(
                "  {:<20} {} issues, {} links, {} changes ({} pages)",
                report.scope, report.issues, report.links, report.changes, report.pages
            ),
        }
    }

    if reports.iter().any(|r| !r.succeeded()) {
        return Err(jiradw::EtlError::Other(
            "one or more scopes failed".to_string(),
        ));
    }
    Ok(())
}

async fn preview(
    config: &EtlConfig,
    jql: String,
    fields: Option<String>,
    max: u32,
) -> jiradw::Result<()> {
    let client = JiraHttpClient::new(&config.jira)?;
    let api = JiraApi::new(client);

    // Fail fast on bad credentials
    api.myself().await?;

    let fields = match fields {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
        None => vec![
            "summary".to_string(),
            "status".to_string(),
            "updated".to_string(),
        ],
    };
    let request = SearchRequest {
        jql,
        start_at: 0,
        max_results: max,
        fields,
        expand: Vec::new(),
        validate_query: config.jira.validate_query,
        next_page_token: None,
    };
    let page = api.search(&request).await?;

    let of_total = page
        .total
        .map(|t| format!(" of {}", t))
        .unwrap_or_default();
    println!("Matched {} issues{}:", page.issues.len(), of_total);
    for issue in &page.issues {
        let key = issue.key.as_deref().unwrap_or("<no key>");
        let summary = issue
            .fields
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let status = issue
            .fields
            .get("status")
            .and_then(|s| s.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let updated = issue
            .fields
            .get("updated")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!("  {:<12} [{}] {} ({})", key, status, summary, updated);
    }
    Ok(())
}

async fn fetch_fields(
    config: &EtlConfig,
    json: bool,
    output: Option<PathBuf>,
) -> jiradw::Result<()> {
    let client = JiraHttpClient::new(&config.jira)?;
    let api = JiraApi::new(client);

    // Fail fast on bad credentials
    api.myself().await?;

    let defs = api.fields().await?;
    let mut warehouse = Warehouse::open(&config.database)?;
    let stored = warehouse.upsert_field_defs(&defs)?;

    if let Some(path) = &output {
        write_field_dump(path, &defs)?;
        println!("Wrote {} field definitions to {}", defs.len(), path.display());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
    } else {
        let custom = defs.iter().filter(|d| d.custom).count();
        println!("Stored {} field definitions ({} custom)", stored, custom);
        for def in defs.iter().filter(|d| d.custom) {
            println!("  {:<20} {}", def.id, def.name.as_deref().unwrap_or(""));
        }
    }
    Ok(())
}

/// Dump the field catalog to disk, creating parent directories as needed
fn write_field_dump(path: &Path, defs: &[FieldDef]) -> jiradw::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(defs)?)?;
    Ok(())
}

fn show_status(config: &EtlConfig, scopes: &[ScopeSpec]) -> jiradw::Result<()> {
    let mut warehouse = Warehouse::open(&config.database)?;

    let totals = warehouse.totals()?;
    println!("Warehouse: {}", warehouse.path().display());
    println!(
        "  {} issues, {} links, {} change items",
        totals.issues, totals.links, totals.changes
    );
    println!();

    for scope in scopes {
        let cursor = warehouse.read(&scope.name)?;
        println!("{}", scope.name);
        match cursor.last_updated_at {
            Some(stamp) => println!(
                "  cursor: {} (issue {})",
                stamp,
                cursor.last_issue_id.unwrap_or(0)
            ),
            None => println!("  cursor: never synced"),
        }
        if let Some(offset) = cursor.resume_page_at {
            println!("  interrupted backfill resumable at offset {}", offset);
        }
        if let Some(token) = &cursor.resume_token {
            println!("  interrupted backfill resumable at provider token {}", token);
        }
        for run in warehouse.recent_runs(&scope.name, 3)? {
            let finished = run
                .finished_at
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string());
            match &run.note {
                Some(note) => println!(
                    "  run {}: {} at {} ({})",
                    run.run_id,
                    run.status.as_str(),
                    finished,
                    note
                ),
                None => println!(
                    "  run {}: {} at {}",
                    run.run_id,
                    run.status.as_str(),
                    finished
                ),
            }
        }
        println!();
    }
    Ok(())
}
