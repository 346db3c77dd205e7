use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod classify;
mod config;
mod db;
mod error;
mod facade;
mod models;
mod normalize;
mod report;
mod rollup;
mod trend;

use config::EngineConfig;
use facade::{Caller, MetricsRequest, Role};
use models::SubjectKind;

#[derive(Parser)]
#[command(name = "learnmetrics")]
#[command(about = "Learning-analytics aggregation engine for course dashboards", long_about = None)]
struct Cli {
    /// Optional TOML file overriding rule thresholds and store settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Student,
    Instructor,
    Course,
    Admin,
}

impl From<KindArg> for SubjectKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Student => SubjectKind::Student,
            KindArg::Instructor => SubjectKind::Instructor,
            KindArg::Course => SubjectKind::Course,
            KindArg::Admin => SubjectKind::Admin,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Student,
    Instructor,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Student => Role::Student,
            RoleArg::Instructor => Role::Instructor,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import raw activity records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute a dashboard aggregate and print it as JSON
    Metrics {
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Subject id; ignored for admin dashboards
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long, default_value = "30days")]
        range: String,
        /// Restrict to one course
        #[arg(long)]
        course: Option<Uuid>,
        /// Role of the authenticated caller
        #[arg(long, value_enum, default_value = "admin")]
        role: RoleArg,
        /// Id of the authenticated caller; required for non-admin roles
        #[arg(long)]
        caller: Option<Uuid>,
        /// Write JSON here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compute a dashboard aggregate and write a markdown report
    Report {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long, default_value = "30days")]
        range: String,
        #[arg(long)]
        course: Option<Uuid>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn resolve_caller(role: RoleArg, caller: Option<Uuid>) -> anyhow::Result<Caller> {
    let role = Role::from(role);
    let id = match (role, caller) {
        (Role::Admin, id) => id.unwrap_or_else(Uuid::new_v4),
        (_, Some(id)) => id,
        (_, None) => anyhow::bail!("--caller is required for non-admin roles"),
    };
    Ok(Caller { role, id })
}

async fn compute_view(
    pool: sqlx::PgPool,
    cfg: &EngineConfig,
    caller: &Caller,
    kind: KindArg,
    id: Option<Uuid>,
    range: &str,
    course: Option<Uuid>,
) -> anyhow::Result<models::AggregateView> {
    let request = MetricsRequest {
        kind: kind.into(),
        subject_id: id,
        range: range.parse()?,
        course_id: course,
    };
    let store = db::PgEventStore::new(pool);
    let view = facade::get_metrics(&store, caller, &request, Utc::now(), cfg).await?;
    Ok(view)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the activity store Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.store.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} activity records from {}.", csv.display());
        }
        Commands::Metrics {
            kind,
            id,
            range,
            course,
            role,
            caller,
            out,
        } => {
            let caller = resolve_caller(role, caller)?;
            let view = compute_view(pool, &cfg, &caller, kind, id, &range, course).await?;
            let json = serde_json::to_string_pretty(&view)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Metrics written to {}.", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Report {
            kind,
            id,
            range,
            course,
            out,
        } => {
            let caller = Caller {
                role: Role::Admin,
                id: Uuid::new_v4(),
            };
            let view = compute_view(pool, &cfg, &caller, kind, id, &range, course).await?;
            let report = report::build_report(&view);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
