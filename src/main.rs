use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod alerts;
mod climate;
mod config;
mod disease;
mod error;
mod evaluation;
mod forecast;
mod ingest;
mod metrics;
mod models;
mod pipeline;
mod report;
mod resources;
mod risk;
mod store;

use crate::alerts::AlertEngine;
use crate::climate::ClimateAdjuster;
use crate::config::Settings;
use crate::disease::DiseaseRegistry;
use crate::evaluation::EvaluationEngine;
use crate::models::Granularity;
use crate::pipeline::Pipeline;
use crate::resources::ResourcePlanner;
use crate::risk::RiskScorer;
use crate::store::{MemoryStore, PgStore, Store};

#[derive(Parser)]
#[command(name = "outbreak-watch")]
#[command(
    about = "Regional disease risk scoring, alerting and case forecasting",
    long_about = None
)]
struct Cli {
    /// Run against an in-memory store loaded from this CSV instead of Postgres
    #[arg(long, global = true)]
    offline_csv: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelKind {
    Naive,
    Arima,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import case observations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List known disease profiles
    Diseases,
    /// Score risk across regions
    Risk {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        disease: Option<String>,
        #[arg(long)]
        no_climate: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Raise alerts for scores at or above the threshold
    Alerts {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        disease: Option<String>,
    },
    /// Forecast confirmed cases
    Forecast {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        disease: Option<String>,
        #[arg(long, default_value_t = 7)]
        horizon: u32,
        #[arg(long, default_value = "monthly")]
        granularity: Granularity,
        #[arg(long, value_enum, default_value = "naive")]
        model: ModelKind,
        #[arg(long)]
        no_seasonal: bool,
    },
    /// Score stored forecasts against observed cases
    Evaluate {
        #[arg(long)]
        region: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 7)]
        horizon: u32,
        #[arg(long)]
        disease: Option<String>,
        #[arg(long)]
        model_version: Option<String>,
    },
    /// Compare naive and ARIMA forecasts against known actuals
    Compare {
        #[arg(long)]
        region: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, value_delimiter = ',', required = true)]
        actual: Vec<f64>,
        #[arg(long)]
        disease: Option<String>,
        #[arg(long, default_value = "monthly")]
        granularity: Granularity,
    },
    /// Run risk, alerts and forecasts for one disease
    Pipeline {
        #[arg(long, default_value = "DENGUE")]
        disease: String,
        #[arg(long)]
        reset: bool,
        #[arg(long, default_value_t = 7)]
        horizon: u32,
        #[arg(long, default_value = "monthly")]
        granularity: Granularity,
    },
    /// Estimate hospital resource demand from active cases
    Resources {
        #[arg(long)]
        region: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value = "DENGUE")]
        disease: String,
    },
    /// Count stored risk scores, alerts and forecasts
    Status {
        #[arg(long)]
        disease: Option<String>,
    },
    /// Regions with the most confirmed cases
    Hotspots {
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        disease: Option<String>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        disease: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_store(cli: &Cli, settings: &Settings) -> anyhow::Result<Box<dyn Store>> {
    if let Some(path) = &cli.offline_csv {
        let store = MemoryStore::new();
        ingest::import_csv(&store, path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
        return Ok(Box::new(store));
    }

    let database_url = settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    let store = PgStore::connect(database_url, settings.db_max_connections)
        .await
        .context("failed to connect to Postgres")?;
    Ok(Box::new(store))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn check_disease(registry: &DiseaseRegistry, disease: Option<&str>) {
    if let Some(id) = disease {
        if !registry.contains(id) {
            warn!(disease = id, "disease is not in the registry");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("invalid configuration")?;
    init_tracing(&settings.log_level);

    let registry = DiseaseRegistry::builtin();
    if let Commands::Diseases = cli.command {
        print_json(&registry.by_transmission())?;
        return Ok(());
    }

    let store = open_store(&cli, &settings).await?;
    let store = store.as_ref();
    info!(store = store.name(), "store ready");

    let climate = ClimateAdjuster::default();
    let scorer = RiskScorer::new(&climate)
        .with_weights(settings.weights)
        .with_levels(settings.levels);

    match cli.command {
        Commands::Diseases => {}
        Commands::InitDb => {
            store.init().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store.init().await?;
            let summary = ingest::seed(store).await?;
            println!(
                "Seed data inserted: {} observations across {} regions.",
                summary.observations_inserted, summary.regions_inserted
            );
        }
        Commands::Import { csv } => {
            let summary = ingest::import_csv(store, &csv).await?;
            println!(
                "Inserted {} observations from {} ({} rejected).",
                summary.observations_inserted,
                csv.display(),
                summary.rejected
            );
        }
        Commands::Risk {
            date,
            disease,
            no_climate,
            limit,
        } => {
            check_disease(&registry, disease.as_deref());
            let (date, report) =
                risk::compute_risk_scores(store, &scorer, date, disease.as_deref(), !no_climate)
                    .await?;
            let Some(date) = date else {
                println!("No observations found.");
                return Ok(());
            };

            println!("Top regions by risk score on {date}:");
            for score in report.records.iter().take(limit) {
                println!(
                    "- {} score {:.2} ({}) drivers: {}",
                    score.region_id,
                    score.risk_score,
                    score.risk_level,
                    score.drivers.join("; ")
                );
            }
            if report.skipped_count() > 0 {
                println!("{} regions skipped.", report.skipped_count());
            }
        }
        Commands::Alerts { date, disease } => {
            check_disease(&registry, disease.as_deref());
            let engine = AlertEngine::new(store, settings.risk_high_threshold);
            let (date, report) = engine.generate(date, disease.as_deref()).await?;
            print_json(&serde_json::json!({
                "date": date,
                "threshold": engine.threshold(),
                "alerts": report.records,
            }))?;
        }
        Commands::Forecast {
            date,
            disease,
            horizon,
            granularity,
            model,
            no_seasonal,
        } => {
            check_disease(&registry, disease.as_deref());
            let (_, report) = match model {
                ModelKind::Naive => {
                    forecast::generate_all(store, date, disease.as_deref(), horizon, granularity)
                        .await?
                }
                ModelKind::Arima => {
                    forecast::generate_all_arima(
                        store,
                        date,
                        disease.as_deref(),
                        horizon,
                        granularity,
                        settings.arima(!no_seasonal),
                    )
                    .await?
                }
            };
            print_json(&report)?;
        }
        Commands::Evaluate {
            region,
            date,
            horizon,
            disease,
            model_version,
        } => {
            let result = EvaluationEngine::new(store)
                .evaluate(&region, date, horizon, disease.as_deref(), model_version.as_deref())
                .await?;
            print_json(&result)?;
        }
        Commands::Compare {
            region,
            date,
            actual,
            disease,
            granularity,
        } => {
            let comparison = EvaluationEngine::new(store)
                .compare_models(
                    &region,
                    date,
                    &actual,
                    disease.as_deref(),
                    granularity,
                    settings.arima(true),
                )
                .await?;
            print_json(&comparison)?;
        }
        Commands::Pipeline {
            disease,
            reset,
            horizon,
            granularity,
        } => {
            check_disease(&registry, Some(&disease));
            let summary = Pipeline::new(store, &scorer, settings.risk_high_threshold)
                .run(&disease, reset, horizon, granularity)
                .await?;
            print_json(&summary)?;
        }
        Commands::Resources {
            region,
            date,
            disease,
        } => {
            check_disease(&registry, Some(&disease));
            let prediction = ResourcePlanner::new(store, &registry)
                .predict_demand(&region, date, &disease)
                .await?;
            print_json(&prediction)?;
        }
        Commands::Status { disease } => {
            let counts = Pipeline::new(store, &scorer, settings.risk_high_threshold)
                .status(disease.as_deref())
                .await?;
            print_json(&counts)?;
        }
        Commands::Hotspots { limit, disease } => {
            let hotspots = store.hotspots(limit, disease.as_deref()).await?;
            print_json(&hotspots)?;
        }
        Commands::Report { disease, out } => {
            let data = report::gather(store, disease.as_deref()).await?;
            let markdown = report::build_report(disease.as_deref(), &registry, &data);
            std::fs::write(&out, markdown)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
