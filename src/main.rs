//! VerifAI CLI - score transactions and inspect the local database
//!
//! ```bash
//! verifai import data/transactions.csv
//! verifai score --user u-42 --amount 95000 --merchant "Crypto Hub" --category crypto
//! verifai stats
//! verifai ui
//! ```

// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verifai::agent::FraudAgent;
use verifai::config::Settings;
use verifai::entities::{GeoPoint, TransactionRequest};
use verifai::notify::OutboxNotifier;
use verifai::scoring::WeightedRiskModel;
use verifai::{dashboard, db};

/// VerifAI - agentic fraud detection
#[derive(Parser)]
#[command(name = "verifai")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "VERIFAI_DATABASE", default_value = "verifai.db", global = true)]
    db: PathBuf,

    /// JSON file with risk model weights (built-in weights when absent)
    #[arg(long, env = "VERIFAI_MODEL_PATH", global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every row of a CSV file through the agent
    Import {
        /// CSV with user_id, amount, merchant, merchant_category, ... columns
        csv: PathBuf,
    },

    /// Score a single transaction and print the agent's decision
    Score {
        #[arg(long)]
        user: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        merchant: String,
        #[arg(long, default_value = "other")]
        category: String,
        #[arg(long, default_value = "web")]
        device_type: String,
        #[arg(long)]
        device_id: Option<String>,
        #[arg(long, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lon: Option<f64>,
        /// Where alerts for this transaction should go
        #[arg(long)]
        email: Option<String>,
    },

    /// Print dashboard aggregates
    Stats,

    /// Open the terminal dashboard
    Ui,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verifai=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings {
        database_path: cli.db.clone(),
        model_path: cli.model.clone(),
        ..Settings::default()
    };

    match cli.command {
        Commands::Import { csv } => run_import(&settings, &csv),
        Commands::Score {
            user,
            amount,
            merchant,
            category,
            device_type,
            device_id,
            lat,
            lon,
            email,
        } => {
            let req = TransactionRequest {
                user_id: user,
                amount,
                merchant,
                merchant_category: category,
                device_type,
                device_ip: String::new(),
                device_id,
                user_location: lat.zip(lon).map(|(lat, lon)| GeoPoint { lat, lon }),
                email,
            };
            run_score(&settings, &req)
        }
        Commands::Stats => run_stats(&settings),
        Commands::Ui => run_ui_mode(&settings),
    }
}

fn load_model(settings: &Settings) -> Result<WeightedRiskModel> {
    let model = WeightedRiskModel::load_or_built_in(settings.model_path.as_deref())?;
    info!(model = model.name.as_str(), "Risk model loaded");
    Ok(model)
}

fn run_import(settings: &Settings, csv: &std::path::Path) -> Result<()> {
    let conn = db::open_database(&settings.database_path)?;
    let model = load_model(settings)?;
    let agent = FraudAgent::new(&conn, settings, &model, &OutboxNotifier);

    let requests = db::load_csv(csv)?;
    println!("📂 Loaded {} rows from {}", requests.len(), csv.display());

    let mut decisions: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut rejected = 0usize;
    for (i, req) in requests.iter().enumerate() {
        match agent.process_transaction(req) {
            Ok(result) => *decisions.entry(result.decision.as_str()).or_default() += 1,
            Err(e) => {
                rejected += 1;
                eprintln!("  row {}: {}", i + 2, e);
            }
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (decision, count) in &decisions {
        println!("  {:<10} {:>6}", decision, count);
    }
    if rejected > 0 {
        println!("  {:<10} {:>6}", "REJECTED", rejected);
    }
    println!("✓ Database contains {} transactions", db::count_transactions(&conn)?);

    Ok(())
}

fn run_score(settings: &Settings, req: &TransactionRequest) -> Result<()> {
    let conn = db::open_database(&settings.database_path)?;
    let model = load_model(settings)?;
    let result = FraudAgent::new(&conn, settings, &model, &OutboxNotifier).process_transaction(req)?;

    println!("{}", serde_json::to_string_pretty(&result).context("Failed to render result")?);
    Ok(())
}

fn run_stats(settings: &Settings) -> Result<()> {
    let conn = db::open_database(&settings.database_path)?;
    let stats = dashboard::stats(&conn, Utc::now())?;

    println!("📊 VerifAI stats ({})", settings.database_path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Total transactions: {}", stats.total_transactions);
    println!("  Blocked today:      {}", stats.blocked_today);
    println!("  Average risk score: {}", stats.avg_risk_score);
    println!("  Active devices:     {}", stats.active_devices);
    println!("\n  Risk distribution");
    for bucket in dashboard::risk_distribution(&conn)? {
        println!("  {:>7} {:>6}", bucket.name, bucket.value);
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(settings: &Settings) -> Result<()> {
    let conn = db::open_database(&settings.database_path)?;
    let mut app = ui::App::load(&conn)?;
    ui::run_ui(&conn, &mut app)
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_settings: &Settings) -> Result<()> {
    anyhow::bail!("TUI mode not available, rebuild with: cargo build --features tui")
}
