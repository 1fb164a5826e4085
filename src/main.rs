use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod functions;
mod identity;
mod models;
mod ranking;
mod replay;
mod report;
mod results;
mod series;
mod stats;
mod store;

use config::Config;
use error::ServiceError;
use identity::{Authenticator, Registration, StaticIdentityProvider};
use models::{Role, SeriesData, SeriesRequest};
use store::{DocumentStore, MemoryStore, PgDocumentStore};

#[derive(Parser)]
#[command(name = "seriesboard")]
#[command(
    about = "Series submissions, saved results and rolling dashboard statistics",
    long_about = None
)]
struct Cli {
    /// Configuration file; missing files fall back to defaults
    #[arg(long, global = true, default_value = "seriesboard.toml")]
    config: PathBuf,

    /// Credential issued by the identity provider
    #[arg(long, global = true, env = "SERIESBOARD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo users and submissions
    Seed,
    /// Create an account and its profile
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = Role::User)]
        role: Role,
    },
    /// Show the authenticated profile
    Me,
    /// Submit a generated series and update the statistics
    Submit {
        #[arg(long = "type")]
        series_type: String,
        #[arg(long)]
        avg_error: f64,
        #[arg(long)]
        max_error: f64,
        /// Defaults to the number of labels in --data
        #[arg(long)]
        points: Option<u32>,
        /// JSON file with labels, generated, ideal and error arrays
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// List the caller's submitted series
    History,
    /// Bookmark a submitted series
    SaveResult { series_id: String },
    /// List bookmarked series
    Results,
    /// Remove a bookmark
    DeleteResult { result_id: String },
    /// Store a custom function expression
    SaveFunction {
        #[arg(long)]
        name: String,
        #[arg(long)]
        expression: String,
    },
    /// List stored custom functions
    Functions,
    /// Delete a stored custom function
    DeleteFunction { function_id: String },
    /// Replay submissions from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Replay into memory and print the resulting report
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate a markdown dashboard report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config);

    match run(cli, config).await {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<ServiceError>() {
            Some(service_error) => {
                error!(error = ?err, "command failed");
                eprintln!(
                    "error [{}]: {}",
                    service_error.code(),
                    service_error.public_message()
                );
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(config: &Config) -> anyhow::Result<PgDocumentStore> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")?;

    Ok(PgDocumentStore::new(pool))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_series_data(path: &Path) -> anyhow::Result<SeriesData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let attempts = config.stats.write_attempts;

    if let Commands::Import { csv, dry_run: true } = &cli.command {
        let store = MemoryStore::new();
        let inserted = replay::import_csv(&store, csv, attempts).await?;
        let dashboard = stats::load_dashboard(&store).await?;
        println!("Replayed {inserted} submissions from {}.", csv.display());
        println!();
        print!("{}", report::build_report(dashboard.as_ref()));
        return Ok(());
    }

    let pg = connect(&config).await?;
    let store: &dyn DocumentStore = &pg;
    let provider = StaticIdentityProvider::from_config(&config.identity);
    let auth = Authenticator::new(&provider, store, &config.identity);
    let token = cli.token.as_deref();

    match cli.command {
        Commands::InitDb => {
            pg.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            if replay::seed(store, attempts).await? {
                println!("Seed data inserted.");
            } else {
                println!("Seed data already present.");
            }
        }
        Commands::Register {
            email,
            password,
            name,
            role,
        } => {
            let registration = Registration {
                email: &email,
                password: &password,
                name: &name,
                role,
            };
            let registered =
                identity::register(&provider, store, &registration, Utc::now(), attempts).await?;
            print_json(&registered.account)?;
            println!();
            println!(
                "Add this entry to {} and pass the token with --token:",
                cli.config.display()
            );
            println!();
            println!("[[identity.accounts]]");
            print!("{}", toml::to_string(&registered.config_entry())?);
        }
        Commands::Me => {
            let user = auth.authenticate(token).await?;
            println!("{} <{}> ({}) role {}", user.name, user.email, user.id, user.role);
        }
        Commands::Submit {
            series_type,
            avg_error,
            max_error,
            points,
            data,
        } => {
            let user = auth.authenticate(token).await?;
            let data = match data {
                Some(path) => read_series_data(&path)?,
                None => SeriesData::default(),
            };
            let request = SeriesRequest {
                series_type,
                points: points.unwrap_or(data.labels.len() as u32),
                avg_error,
                max_error,
                data,
            };
            let record = series::submit(store, &user, &request, Utc::now(), attempts).await?;
            info!(series_id = %record.id, "submission stored");
            print_json(&record)?;
        }
        Commands::History => {
            let user = auth.authenticate(token).await?;
            print_json(&series::history(store, &user).await?)?;
        }
        Commands::SaveResult { series_id } => {
            let user = auth.authenticate(token).await?;
            let saved = results::save_result(store, &user, &series_id, Utc::now()).await?;
            println!("Result saved with id {}.", saved.id);
        }
        Commands::Results => {
            let user = auth.authenticate(token).await?;
            print_json(&results::saved_results(store, &user).await?)?;
        }
        Commands::DeleteResult { result_id } => {
            let user = auth.authenticate(token).await?;
            results::delete_result(store, &user, &result_id).await?;
            println!("Result {result_id} deleted.");
        }
        Commands::SaveFunction { name, expression } => {
            let user = auth.authenticate(token).await?;
            let function =
                functions::save_function(store, &user, &name, &expression, Utc::now()).await?;
            print_json(&function)?;
        }
        Commands::Functions => {
            let user = auth.authenticate(token).await?;
            print_json(&functions::functions(store, &user).await?)?;
        }
        Commands::DeleteFunction { function_id } => {
            let user = auth.authenticate(token).await?;
            functions::delete_function(store, &user, &function_id).await?;
            println!("Function {function_id} deleted.");
        }
        Commands::Import { csv, .. } => {
            let inserted = replay::import_csv(store, &csv, attempts).await?;
            println!("Replayed {inserted} submissions from {}.", csv.display());
        }
        Commands::Report { out } => {
            let dashboard = stats::load_dashboard(store).await?;
            std::fs::write(&out, report::build_report(dashboard.as_ref()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
