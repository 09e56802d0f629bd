use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use cirrus_core::Provider;
use cirrus_core::differ::Diff;
use cirrus_provider_azurerm::ProviderConfig;
use cirrus_state::{LocalBackend, StateBackend};

mod commands;
mod document;

use commands::{Change, Summary};
use document::Document;

#[derive(Parser)]
#[command(name = "cirrus")]
#[command(about = "Manage Azure network resources through their lifecycle", long_about = None)]
struct Cli {
    /// Path to the state file
    #[arg(long, global = true, env = "CIRRUS_STATE", default_value = "cirrus.state.json")]
    state: PathBuf,

    /// Provider configuration file (JSON); ARM_* environment variables are used otherwise
    #[arg(long, global = true, env = "CIRRUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what apply would change
    Plan {
        /// Path to the resource document
        #[arg(default_value = "cirrus.json")]
        file: PathBuf,
    },
    /// Create, update and delete resources to match the document
    Apply {
        /// Path to the resource document
        #[arg(default_value = "cirrus.json")]
        file: PathBuf,
    },
    /// Re-read tracked resources and record drift
    Refresh,
    /// Track an existing remote object
    Import {
        /// Resource type (e.g., azurerm_subnet)
        resource_type: String,
        /// Local name to track it under
        name: String,
        /// Remote identifier
        id: String,
    },
    /// Delete every tracked resource
    Destroy {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Print the tracked resources
    Show {
        /// Print recorded attributes as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a stale state lock
    ForceUnlock {
        lock_id: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let backend = LocalBackend::with_path(cli.state.clone());

    match cli.command {
        Commands::Plan { file } => {
            let document = Document::load(&file)?;
            let provider = load_provider(cli.config.as_deref())?;
            let changes = commands::plan(&provider, &backend, &document).await?;
            print_plan(&changes);
            Ok(())
        }
        Commands::Apply { file } => {
            let document = Document::load(&file)?;
            let provider = load_provider(cli.config.as_deref())?;
            println!("{}", "Applying changes...".cyan().bold());
            println!();
            let summary = commands::apply(&provider, &backend, &document).await?;
            report("Apply", summary)
        }
        Commands::Refresh => {
            let provider = load_provider(cli.config.as_deref())?;
            let summary = commands::refresh(&provider, &backend).await?;
            report("Refresh", summary)
        }
        Commands::Import {
            resource_type,
            name,
            id,
        } => {
            let provider = load_provider(cli.config.as_deref())?;
            let imported = commands::import(&provider, &backend, &resource_type, &name, &id).await?;
            println!(
                "{} {}.{} ({})",
                "Imported".green().bold(),
                imported.resource_type,
                imported.name,
                imported.id
            );
            Ok(())
        }
        Commands::Destroy { auto_approve } => {
            let provider = load_provider(cli.config.as_deref())?;
            run_destroy(&provider, &backend, auto_approve).await
        }
        Commands::Show { json } => run_show(&backend, json).await,
        Commands::ForceUnlock { lock_id } => {
            backend.force_unlock(&lock_id).await?;
            println!("{}", format!("Lock {} removed.", lock_id).green());
            Ok(())
        }
    }
}

fn load_provider(config: Option<&Path>) -> Result<Provider> {
    let config = match config {
        Some(path) => ProviderConfig::from_file(path)?,
        None => ProviderConfig::from_env()
            .context("set ARM_SUBSCRIPTION_ID and ARM_ACCESS_TOKEN, or pass --config")?,
    };
    Ok(cirrus_provider_azurerm::provider(&config)?)
}

fn report(command: &str, summary: Summary) -> Result<()> {
    println!();
    if summary.is_success() {
        println!(
            "{}",
            format!(
                "{} complete! {} changed, {} unchanged.",
                command, summary.succeeded, summary.unchanged
            )
            .green()
            .bold()
        );
        Ok(())
    } else {
        println!(
            "{}",
            format!(
                "{} failed. {} succeeded, {} failed.",
                command, summary.succeeded, summary.failed
            )
            .red()
            .bold()
        );
        anyhow::bail!("{} resource(s) failed", summary.failed)
    }
}

fn print_plan(changes: &[(String, Change)]) {
    let mut pending = 0;
    for (address, change) in changes {
        let line = match change {
            Change::Apply(Diff::NoChange) => continue,
            Change::Apply(Diff::Create) => format!("  {} {}", "+".green().bold(), address),
            Change::Apply(Diff::Update(fields)) => format!(
                "  {} {} ({})",
                "~".yellow().bold(),
                address,
                fields.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
            Change::Apply(Diff::Replace(fields)) => format!(
                "  {} {} (forces replacement: {})",
                "-/+".red().bold(),
                address,
                fields.join(", ")
            ),
            Change::Delete => format!("  {} {}", "-".red().bold(), address),
        };
        println!("{}", line);
        pending += 1;
    }

    if pending == 0 {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
    } else {
        println!();
        println!("Plan: {} to change.", pending.to_string().yellow());
    }
}

async fn run_destroy(provider: &Provider, backend: &LocalBackend, auto_approve: bool) -> Result<()> {
    let Some(state) = backend.read_state().await? else {
        println!("{}", "No resources are tracked.".yellow());
        return Ok(());
    };
    if state.resources.is_empty() {
        println!("{}", "No resources are tracked.".yellow());
        return Ok(());
    }

    for resource in state.resources.iter().rev() {
        println!(
            "  {} {}.{}",
            "-".red().bold(),
            resource.resource_type,
            resource.name
        );
    }
    println!();
    println!(
        "Plan: {} to destroy.",
        state.resources.len().to_string().red()
    );
    println!();

    if !auto_approve {
        println!(
            "{}",
            "Do you really want to destroy all resources?"
                .yellow()
                .bold()
        );
        println!(
            "  {}",
            "This action cannot be undone. Type 'yes' to confirm.".yellow()
        );
        print!("\n  Enter a value: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if input.trim() != "yes" {
            println!();
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
        println!();
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();
    let summary = commands::destroy(provider, backend).await?;
    report("Destroy", summary)
}

async fn run_show(backend: &LocalBackend, json: bool) -> Result<()> {
    let Some(state) = backend.read_state().await? else {
        println!("{}", "No state.".yellow());
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state.resources)?);
        return Ok(());
    }

    println!(
        "{} serial {}, lineage {}",
        backend.state_path().display().to_string().bold(),
        state.serial,
        state.lineage
    );
    for resource in &state.resources {
        let marker = if resource.pending {
            " (pending refresh)".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {}.{}{}\n    {}",
            resource.resource_type.cyan(),
            resource.name,
            marker,
            resource.id.dimmed()
        );
    }
    Ok(())
}
