//! tablesync CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use tablesync::{
    commands::{
        cmd_init, cmd_policies, cmd_status, cmd_sync, print_init, print_pass_report,
        print_policies, print_status, InitOptions, SyncOptions,
    },
    config::Config,
    error::Result,
    progress::LogWriterFactory,
    reconcile::StrategyRegistry,
    store::SqliteStore,
};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tablesync")]
#[command(version, about = "Reconcile a source table into a document store", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Run one reconciliation pass
    Sync {
        /// Update policy to use instead of the configured one
        #[arg(long)]
        policy: Option<String>,

        /// Version id stamped on written documents (defaults to the current Unix time)
        #[arg(long)]
        version_id: Option<i64>,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// List available update policies
    Policies,

    /// Show collection document counts and recent runs
    Status {
        /// Number of recent runs to show
        #[arg(long, default_value = "10")]
        runs: usize,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(LogWriterFactory::default()))
            .with(filter)
            .init();
    }

    // Commands that don't need an existing config
    match cli.command {
        Commands::Init { force } => return handle_init(cli.config, force, cli.json).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "tablesync", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Sync {
            policy,
            version_id,
            dry_run,
        } => {
            let store = open_store(&config).await?;
            let options = SyncOptions {
                policy,
                version_id,
                dry_run,
            };
            let report = cmd_sync(&config, &store, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_pass_report(&report);
            }
        }

        Commands::Policies => {
            let registry = StrategyRegistry::with_builtin();
            let policies = cmd_policies(&registry, Some(&config.pipeline.update_type));

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&policies)?);
            } else {
                print_policies(&policies);
            }
        }

        Commands::Status { runs } => {
            let store = open_store(&config).await?;
            let status = cmd_status(&config, &store, runs).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

async fn handle_init(config: Option<PathBuf>, force: bool, json: bool) -> Result<()> {
    // A config file path puts the base directory next to it
    let (base_dir, config_path) = match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => (dir.clone(), dir.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            (base.clone(), base.join("config.toml"))
        }
    };

    let info = cmd_init(InitOptions {
        base_dir,
        config_path,
        force,
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_init(&info);
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    Config::load(&config_path)
}

async fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path(), &config.target.collection).await
}
