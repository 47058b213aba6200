// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use propguard::db::models::Rollout;
use propguard::rollout::RolloutOrchestrator;
use propguard::service::ServiceController;
use propguard::settings::{DEFAULT_SETTINGS_PATH, Settings};
use propguard::store::ConfigStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "propguard")]
#[command(author, version, about = "Guarded rollout of service property files with restart and rollback", long_about = None)]
struct Cli {
    /// Settings file (default: /etc/propguard/propguard.toml)
    #[arg(short, long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Managed properties file, overrides the settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value of a key
    Get {
        key: String,
    },
    /// List keys and values, optionally limited to a prefix
    List {
        #[arg(short, long, default_value = "")]
        prefix: String,
    },
    /// Change existing keys, restart the service, roll back on failure
    Apply {
        /// Edits as key=value
        #[arg(required = true, value_parser = parse_edit)]
        edits: Vec<(String, String)>,
        /// Description stored in the rollout history
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Restore the properties file from the backup slot
    Rollback,
    /// Restart the dependent service without changing configuration
    Restart,
    /// Show installed versions of system packages
    Versions {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Show rollout history
    History {
        /// Show requested edits for each rollout
        #[arg(short, long)]
        verbose: bool,
    },
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

/// Parse a `key=value` command line argument
fn parse_edit(arg: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", arg));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;
    if let Some(config) = cli.config {
        settings.store.path = config;
    }

    match cli.command {
        Some(Commands::Get { key }) => {
            let store = ConfigStore::load_preferences(&settings.store.path)?;
            match store.get(&key) {
                Some(value) => {
                    println!("{}", value);
                    Ok(())
                }
                None => Err(anyhow::anyhow!("Key '{}' is not set", key)),
            }
        }
        Some(Commands::List { prefix }) => {
            let store = ConfigStore::load_preferences(&settings.store.path)?;
            let count = store.for_prefix(&prefix, |key, value| println!("{}={}", key, value));
            if count == 0 {
                println!("No keys found.");
            }
            Ok(())
        }
        Some(Commands::Apply { edits, message }) => {
            let edits: BTreeMap<String, String> = edits.into_iter().collect();
            let target = settings.rollout_target();
            let description = message.unwrap_or_else(|| {
                format!(
                    "Set {}",
                    edits.keys().cloned().collect::<Vec<_>>().join(", ")
                )
            });

            let history_db = settings.store.history_db.to_string_lossy().to_string();
            let conn = propguard::db::open_or_init(&history_db)?;
            let mut record = Rollout::new(
                description,
                target.active_path.display().to_string(),
            );
            let rollout_id = record.insert(&conn, &edits)?;
            info!("Recorded rollout {} in {}", rollout_id, history_db);

            let mut orchestrator = RolloutOrchestrator::new(target, settings.controller()?)
                .with_restart_after_rollback(settings.service.restart_after_rollback);
            if let Some(probe) = settings.readiness_probe()? {
                orchestrator = orchestrator.with_readiness(probe);
            }

            let report = orchestrator.run(&edits);
            record.finish(&conn, &report)?;

            for key in &report.unknown_keys {
                println!("Warning: key '{}' does not exist and was not added", key);
            }
            for key in &report.rejected_keys {
                println!("Warning: value for '{}' would not read back unchanged and was ignored", key);
            }

            if report.succeeded() {
                println!("Rollout {} applied: {}", rollout_id, report.applied_keys.join(", "));
                if let Some(output) = &report.restart_output {
                    println!("  Restart: {}", output);
                }
                Ok(())
            } else {
                if report.rollback_failed {
                    eprintln!(
                        "Backup could not be restored; recover manually from {}",
                        orchestrator.target().backup_path.display()
                    );
                }
                if let Some(restart) = &report.recovery_restart {
                    println!(
                        "  Restart after rollback: {}",
                        if restart.succeeded { "accepted" } else { "failed" }
                    );
                }
                Err(anyhow::anyhow!(
                    "Rollout {} {}: {}",
                    rollout_id,
                    report.state,
                    report.diagnostic.unwrap_or_default()
                ))
            }
        }
        Some(Commands::Rollback) => {
            let target = settings.rollout_target();
            propguard::rollout::restore_backup(&target)?;
            println!(
                "Restored {} from {}",
                target.active_path.display(),
                target.backup_path.display()
            );
            Ok(())
        }
        Some(Commands::Restart) => {
            let outcome = settings.controller()?.restart();
            if outcome.succeeded {
                println!("Restart accepted: {}", outcome.diagnostic);
                Ok(())
            } else {
                Err(anyhow::anyhow!("Restart failed: {}", outcome.diagnostic))
            }
        }
        Some(Commands::Versions { packages }) => {
            let versions = settings.resolver().resolve_many(&packages);
            for (name, version) in &versions {
                println!("{}: {}", name, version);
            }
            Ok(())
        }
        Some(Commands::History { verbose }) => {
            let history_db = settings.store.history_db.to_string_lossy().to_string();
            let conn = propguard::db::open(&history_db)?;
            let rollouts = Rollout::list_all(&conn)?;

            if rollouts.is_empty() {
                println!("No rollout history.");
            } else {
                println!("Rollout history:");
                for rollout in &rollouts {
                    let timestamp = rollout
                        .finished_at
                        .as_ref()
                        .or(rollout.created_at.as_ref())
                        .map(|s| format_timestamp(s))
                        .unwrap_or_else(|| "pending".to_string());

                    println!(
                        "  [{}] {} - {} ({})",
                        rollout.id.unwrap_or_default(),
                        timestamp,
                        rollout.description,
                        rollout.status.as_str()
                    );
                    if let Some(diagnostic) = &rollout.diagnostic {
                        println!("      {}", diagnostic);
                    }
                    if verbose {
                        for (key, value, applied) in rollout.edits(&conn)? {
                            let mark = if applied { "" } else { " (not applied)" };
                            println!("      {}={}{}", key, value, mark);
                        }
                    }
                }
                println!("\nTotal: {} rollout(s)", rollouts.len());
            }

            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "propguard", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("Propguard v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'propguard --help' for usage information");
            Ok(())
        }
    }
}

/// Render an SQLite `CURRENT_TIMESTAMP` (UTC) in local time
fn format_timestamp(raw: &str) -> String {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| {
            naive
                .and_utc()
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}
