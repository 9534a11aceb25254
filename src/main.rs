use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dpr_core::dashboard::{DashboardService, Span};
use dpr_core::{
    format_record_code, validation, Actor, ClinicConfig, FilesService, HistoryDraft,
    HistoryService, PatientDraft, PatientService,
};
use dpr_store::{MemoryBlobStore, MemoryStore};
use dpr_types::Instant;

#[derive(Parser)]
#[command(name = "dpr")]
#[command(about = "Dental patient record system operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format a record number in the clinic's code format
    Code {
        /// Record number
        number: i64,
    },
    /// Normalise and validate a national identifier
    NormalizeId {
        /// Raw identifier as typed
        raw: String,
    },
    /// Seed an in-memory clinic and print the dashboard
    Demo {
        /// Reporting window: day, week or month
        #[arg(long, default_value = "week")]
        span: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("dpr=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(ClinicConfig::default());

    match cli.command {
        Commands::Code { number } => {
            println!(
                "{}",
                format_record_code(number, config.record_code_prefix(), config.record_code_width())
            );
        }
        Commands::NormalizeId { raw } => {
            let normalized = validation::normalize_national_id(&raw);
            match validation::check_national_id(&normalized) {
                Ok(()) => println!("{normalized}"),
                Err(e) => {
                    eprintln!("Invalid identifier: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Demo { span } => {
            let span = match span.as_str() {
                "day" => Span::Day,
                "week" => Span::Week,
                "month" => Span::Month,
                other => anyhow::bail!("unknown span {other:?} (expected day, week or month)"),
            };
            run_demo(config, span).await?;
        }
    }

    Ok(())
}

/// Seed a small clinic in memory and print what the dashboard would show.
async fn run_demo(config: Arc<ClinicConfig>, span: Span) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let patients = PatientService::new(store.clone(), config.clone());
    let history = HistoryService::new(store.clone(), config.clone());
    let files = FilesService::new(store.clone(), blobs, config.clone());
    let dashboard = DashboardService::new(store, config);
    let actor = Actor::clinician("demo", "Dra. Demo");

    tracing::info!("seeding in-memory demo clinic");

    let ana = patients
        .create(
            &actor,
            PatientDraft {
                national_id: "104560789".into(),
                first_names: "Ana".into(),
                last_names: "Rojas".into(),
                ..Default::default()
            },
        )
        .await?;
    let luis = patients
        .create(
            &actor,
            PatientDraft {
                national_id: "2-0333-0444".into(),
                first_names: "Luis".into(),
                last_names: "Mora".into(),
                ..Default::default()
            },
        )
        .await?;

    let now = Instant::now();
    let entry = history
        .upsert(
            &actor,
            &ana.id,
            None,
            HistoryDraft {
                title: "Limpieza".into(),
                appointment_at: Some(now.add_hours(-2)),
                next_appointment_at: Some(now.add_days(7)),
                payment_amount: "30,000".into(),
                ..Default::default()
            },
        )
        .await?;
    history
        .upsert(
            &actor,
            &luis.id,
            None,
            HistoryDraft {
                title: "Endodoncia".into(),
                appointment_at: Some(now.add_hours(-1)),
                next_appointment_at: Some(now.add_days(2)),
                payment_amount: "85 000".into(),
                payment_deposit: "25,000".into(),
                ..Default::default()
            },
        )
        .await?;
    let xray = files
        .upload(&actor, &ana.id, "radiografia.png", "image/png", vec![0; 64], None)
        .await?;
    files.associate(&actor, &ana.id, &xray.id, &entry.id).await?;

    let metrics = dashboard.metrics(span, now).await?;
    println!("Patients: {} ({})", ana.record_code, luis.record_code);
    println!("Revenue ({:?}): {:.0}", metrics.span, metrics.revenue);
    println!("Visits realized: {}", metrics.visits_realized);
    println!("New patients: {}", metrics.new_patients);
    println!("Upcoming appointments:");
    for row in &metrics.upcoming {
        let when = row
            .next_appointment_at
            .map(|at| at.to_wire())
            .unwrap_or_default();
        println!("  {} - {} ({})", when, row.patient_name, row.title);
    }
    println!("Occupancy:");
    for (day, count) in &metrics.occupancy {
        println!("  {day}: {count}");
    }

    Ok(())
}
