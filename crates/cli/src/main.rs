use anyhow::Context;
use clap::{Parser, Subcommand};
use hms_core::repositories::inventory::{MedicationQuery, MovementReason, StockAdjustment};
use hms_core::repositories::patients::PatientQuery;
use hms_core::{CoreConfig, DocumentId, Hms};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hms")]
#[command(about = "HMS hospital administration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the administrator from HMS_BOOTSTRAP_ADMIN_* when no user exists yet
    BootstrapAdmin,
    /// List patients
    ListPatients {
        /// Match name, phone, e-mail or national id
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// List medications at or below their reorder level
    LowStock,
    /// Record a stock movement for a medication
    AdjustStock {
        /// Medication id
        medication_id: String,
        /// Signed change in units, e.g. 50 or -3
        #[arg(allow_negative_numbers = true)]
        delta: i64,
        /// purchase, returned, expired, damaged or correction
        reason: MovementReason,
        #[arg(long)]
        note: Option<String>,
    },
    /// Delete expired sessions
    PurgeSessions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hms_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(CoreConfig::from_env().context("invalid HMS configuration")?);
    let hms = Hms::open(cfg).context("failed to open the document store")?;

    match cli.command {
        Commands::BootstrapAdmin => {
            if hms.cfg().bootstrap_admin().is_none() {
                anyhow::bail!(
                    "set HMS_BOOTSTRAP_ADMIN_EMAIL and HMS_BOOTSTRAP_ADMIN_PASSWORD first"
                );
            }
            match hms.auth().bootstrap_admin().await? {
                Some(admin) => println!("Created administrator {} ({})", admin.data.email, admin.id),
                None => println!("Users already exist; nothing to do."),
            }
        }
        Commands::ListPatients { search, limit } => {
            let page = hms
                .patients()
                .list(PatientQuery {
                    search,
                    limit: Some(limit),
                    offset: None,
                })
                .await?;
            if page.items.is_empty() {
                println!("No patients found.");
            }
            for p in page.items {
                println!(
                    "ID: {}, Name: {} {}, Created: {}",
                    p.id, p.data.first_name, p.data.last_name, p.created_at
                );
            }
            if page.total > limit {
                println!("({} of {} shown)", limit, page.total);
            }
        }
        Commands::LowStock => {
            let page = hms
                .inventory()
                .list(MedicationQuery {
                    low_stock: Some(true),
                    active: Some(true),
                    ..Default::default()
                })
                .await?;
            if page.items.is_empty() {
                println!("Nothing below its reorder level.");
            }
            for m in page.items {
                println!(
                    "ID: {}, {}: {} {} (reorder at {})",
                    m.id, m.data.name, m.data.stock_quantity, m.data.unit, m.data.reorder_level
                );
            }
        }
        Commands::AdjustStock {
            medication_id,
            delta,
            reason,
            note,
        } => {
            let id = DocumentId::parse(&medication_id)?;
            let movement = hms
                .inventory()
                .adjust_stock(&id, StockAdjustment { delta, reason, note }, None, None)
                .await?;
            println!(
                "Recorded {} of {}; stock is now {}",
                movement.data.reason, movement.data.delta, movement.data.resulting_quantity
            );
        }
        Commands::PurgeSessions => {
            let removed = hms.auth().purge_expired().await?;
            println!("Removed {} expired sessions.", removed);
        }
    }

    Ok(())
}
