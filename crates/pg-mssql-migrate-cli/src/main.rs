//! pg-mssql-migrate CLI - One-shot PostgreSQL to SQL Server migration.

use clap::{Parser, Subcommand};
use pg_mssql_migrate::{Config, MigrateError, Orchestrator, TargetConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-mssql-migrate")]
#[command(about = "One-shot PostgreSQL to SQL Server schema and data migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run {
        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Compare source and target row counts without moving data
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Target credentials come from the environment, never from the file.
    // Resolved before any connection is attempted so a missing variable
    // fails fast.
    let target_config = TargetConfig::from_env()?;

    let cancel_token = setup_signal_handler();

    match cli.command {
        Commands::Run {
            target_schema,
            workers,
            batch_size,
        } => {
            if let Some(schema) = target_schema {
                config.migration.target_schema = schema;
            }
            if let Some(w) = workers {
                config.migration.workers = w;
            }
            if let Some(b) = batch_size {
                config.migration.batch_size = b;
            }

            let orchestrator = Orchestrator::new(config, target_config).await?;
            let result = orchestrator.run(cancel_token).await;
            orchestrator.close().await;
            let report = result?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\n{}", report.render_summary());
            }

            // Partial failure must be visible to scripted callers, not only
            // in the summary text.
            if report.has_failures() {
                return Err(MigrateError::TablesFailed {
                    failed: report.failed_count(),
                    total: report.tables.len(),
                });
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config, target_config).await?;
            let result = orchestrator.validate().await;
            orchestrator.close().await;
            let results = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Row count validation:");
                for r in &results {
                    match r.target_rows {
                        Some(_) if r.matches() => {
                            println!("  OK       {}: {} rows", r.name, r.source_rows)
                        }
                        Some(target) => println!(
                            "  MISMATCH {}: source {}, target {}",
                            r.name, r.source_rows, target
                        ),
                        None => println!(
                            "  MISSING  {}: source {}, target table absent",
                            r.name, r.source_rows
                        ),
                    }
                }
            }

            if results.iter().any(|r| !r.matches()) {
                return Err(MigrateError::Config(
                    "validation found row-count mismatches".to_string(),
                ));
            }
            println!("Validation completed successfully");
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config, target_config).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (PostgreSQL): {} ({}ms)",
                    if result.source_ok { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                println!(
                    "  Target (SQL Server): {} ({}ms)",
                    if result.target_ok { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                println!(
                    "\n  Overall: {}",
                    if result.healthy() { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy() {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Install SIGINT and SIGTERM handlers that cancel the run.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    let token_term = cancel_token.clone();

    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Shutting down...");
        token_int.cancel();
    });

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Shutting down...");
        token_term.cancel();
    });

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to setup Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Shutting down...");
        token.cancel();
    });

    cancel_token
}
