use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod accounts;
mod anomaly;
mod config;
mod decision;
mod error;
mod forecast;
mod import;
mod llm;
mod models;
mod narrative;
mod outreach;
mod report;
mod scan;
mod scoring;
mod store;

use config::AppConfig;
use decision::DecisionService;
use llm::{ClaudeClient, Unconfigured};
use models::{AutonomyMode, RenewalSettings, ReviewAction, RENEWAL_LEAD_TIMES};
use narrative::NarrativeService;
use scan::Scanner;
use store::postgres::PgStore;
use store::Store;

#[derive(Parser)]
#[command(name = "account-health")]
#[command(about = "Account health scoring and churn early warning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import daily usage metrics from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Update tenant and renewal settings
    Configure {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        mode: Option<AutonomyMode>,
        #[arg(long)]
        weight_engagement: Option<f64>,
        #[arg(long)]
        weight_adoption: Option<f64>,
        #[arg(long)]
        weight_health: Option<f64>,
        #[arg(long)]
        weight_support: Option<f64>,
        #[arg(long)]
        critical_threshold: Option<f64>,
        #[arg(long)]
        at_risk_threshold: Option<f64>,
        /// Enable or disable renewal reminders
        #[arg(long)]
        renewals: Option<bool>,
        /// Comma separated lead times in days (90, 30, 14, 7)
        #[arg(long, value_delimiter = ',')]
        lead_times: Option<Vec<i64>>,
    },
    /// Run one full scan now
    Scan,
    /// Scan on a fixed interval until interrupted
    Watch {
        #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u64).range(1..))]
        interval_hours: u64,
    },
    /// Show the lowest scoring accounts from the latest snapshots
    Score {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Approve a pending outreach draft
    Approve { id: Uuid },
    /// Reject a pending outreach draft
    Reject { id: Uuid },
    /// List unresolved alerts
    Alerts {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Mark an alert resolved
    ResolveAlert { id: Uuid },
    /// Show one account's scores, anomalies and activity
    Account {
        /// Account id or exact name
        key: String,
        #[arg(long, default_value_t = 14)]
        days: usize,
    },
    /// List renewals falling in one month
    Renewals {
        /// Month as YYYY-MM, defaults to the current month
        #[arg(long)]
        month: Option<String>,
    },
    /// Generate a markdown portfolio report
    Report {
        #[arg(long, default_value = "account-health.md")]
        out: PathBuf,
    },
    /// Project MRR over the next twelve months
    Forecast,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let pg = PgStore::connect(&config.database_url, config.max_connections).await?;

    if let Commands::InitDb = cli.command {
        pg.init_db().await?;
        println!("Schema ready.");
        return Ok(());
    }

    let store: Arc<dyn Store> = Arc::new(pg);

    match cli.command {
        Commands::InitDb => {}
        Commands::Import { csv } => {
            let file = File::open(&csv).with_context(|| format!("failed to open {}", csv.display()))?;
            let stats = import::import_metrics(store.as_ref(), file).await?;
            println!(
                "Imported {} metric rows for {} accounts from {} ({} already on file).",
                stats.inserted,
                stats.accounts,
                csv.display(),
                stats.duplicates
            );
        }
        Commands::Configure {
            name,
            mode,
            weight_engagement,
            weight_adoption,
            weight_health,
            weight_support,
            critical_threshold,
            at_risk_threshold,
            renewals,
            lead_times,
        } => {
            let mut tenant = store.tenant_config().await?.unwrap_or_default();
            if let Some(name) = name {
                tenant.name = name;
            }
            if let Some(mode) = mode {
                tenant.autonomy_mode = mode;
            }
            if let Some(w) = weight_engagement {
                tenant.weights.engagement = w;
            }
            if let Some(w) = weight_adoption {
                tenant.weights.adoption = w;
            }
            if let Some(w) = weight_health {
                tenant.weights.health = w;
            }
            if let Some(w) = weight_support {
                tenant.weights.support = w;
            }
            if let Some(t) = critical_threshold {
                tenant.critical_threshold = t;
            }
            if let Some(t) = at_risk_threshold {
                tenant.at_risk_threshold = t;
            }
            if tenant.critical_threshold > tenant.at_risk_threshold {
                bail!("critical threshold must not exceed the at-risk threshold");
            }
            store.save_tenant_config(&tenant).await?;

            if renewals.is_some() || lead_times.is_some() {
                let mut settings: RenewalSettings = store.renewal_settings().await?.unwrap_or_default();
                if let Some(enabled) = renewals {
                    settings.enabled = enabled;
                }
                if let Some(days) = lead_times {
                    if let Some(bad) = days.iter().find(|d| !RENEWAL_LEAD_TIMES.contains(d)) {
                        bail!("unsupported renewal lead time {bad}; choose from 90, 30, 14, 7");
                    }
                    settings.lead_times = days;
                }
                store.save_renewal_settings(&settings).await?;
            }

            println!(
                "Tenant {} in {} mode, weights {:?}, thresholds {}/{}.",
                tenant.name,
                tenant.autonomy_mode,
                tenant.weights,
                tenant.critical_threshold,
                tenant.at_risk_threshold
            );
        }
        Commands::Scan => {
            let scanner = build_scanner(&config, store.clone());
            match scanner.run_full_scan().await {
                Ok(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                Err(err) => {
                    error!(error = ?err, "scan failed");
                    bail!("scan failed, see logs for details");
                }
            }
        }
        Commands::Watch { interval_hours } => {
            let scanner = build_scanner(&config, store.clone());
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_hours * 3600));
            info!(interval_hours, "watching accounts");
            loop {
                ticker.tick().await;
                match scanner.run_full_scan().await {
                    Ok(summary) => info!(
                        accounts = summary.accounts_scanned,
                        anomalies = summary.anomalies_created,
                        failed = summary.accounts_failed,
                        "scheduled scan complete"
                    ),
                    Err(err) => error!(error = ?err, "scheduled scan failed"),
                }
            }
        }
        Commands::Score { limit } => {
            let tenant = store.tenant_config().await?.unwrap_or_default();
            let accounts = store.list_accounts().await?;
            let snapshots = store.latest_snapshots().await?;
            let names: HashMap<Uuid, &str> = accounts.iter().map(|a| (a.id, a.name.as_str())).collect();

            let mut states = report::account_states(&tenant, &accounts, &snapshots);
            if states.is_empty() {
                println!("No accounts on file.");
                return Ok(());
            }
            states.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            println!("Lowest scoring accounts:");
            for (id, composite, state) in states.iter().take(limit) {
                println!(
                    "- {} score {:.1} ({})",
                    names.get(id).copied().unwrap_or("unknown"),
                    composite,
                    state.as_str()
                );
            }
        }
        Commands::Approve { id } => {
            let status = outreach::review(store.as_ref(), id, ReviewAction::Approve, Utc::now()).await?;
            println!("Outreach {id} is now {status}.");
        }
        Commands::Reject { id } => {
            let status = outreach::review(store.as_ref(), id, ReviewAction::Reject, Utc::now()).await?;
            println!("Outreach {id} is now {status}.");
        }
        Commands::Alerts { limit } => {
            let alerts = store.unresolved_alerts(limit).await?;
            if alerts.is_empty() {
                println!("No open alerts.");
                return Ok(());
            }
            let accounts = store.list_accounts().await?;
            let names: HashMap<Uuid, &str> = accounts.iter().map(|a| (a.id, a.name.as_str())).collect();
            for alert in alerts.iter() {
                println!(
                    "- {} [{}] {} {}: {}",
                    alert.id,
                    alert.severity,
                    names.get(&alert.account_id).copied().unwrap_or("unknown"),
                    alert.kind.as_str(),
                    alert.message
                );
            }
        }
        Commands::ResolveAlert { id } => {
            if !store.resolve_alert(id).await? {
                return Err(error::ModelError::AlertNotFound(id).into());
            }
            println!("Alert {id} resolved.");
        }
        Commands::Account { key, days } => {
            let tenant = store.tenant_config().await?.unwrap_or_default();
            let detail = accounts::account_detail(store.as_ref(), &tenant, &key).await?;
            print!("{}", report::build_account_report(&detail, days));
        }
        Commands::Renewals { month } => {
            let today = Utc::now().date_naive();
            let month = match month {
                Some(value) => accounts::parse_month(&value)?,
                None => today,
            };
            let tenant = store.tenant_config().await?.unwrap_or_default();
            let all = store.list_accounts().await?;
            let snapshots = store.latest_snapshots().await?;
            let entries = accounts::renewal_calendar(&tenant, &all, &snapshots, month, today);
            print!("{}", report::build_renewal_calendar(month, &entries));
        }
        Commands::Report { out } => {
            let tenant = store.tenant_config().await?.unwrap_or_default();
            let accounts = store.list_accounts().await?;
            let snapshots = store.latest_snapshots().await?;
            let pending = store
                .anomalies_with_status(models::OutreachStatus::Pending)
                .await?;
            let alerts = store.unresolved_alerts(50).await?;
            let report = report::build_report(&tenant, &accounts, &snapshots, &pending, &alerts);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Forecast => {
            let tenant = store.tenant_config().await?.unwrap_or_default();
            let accounts = store.list_accounts().await?;
            let snapshots = store.latest_snapshots().await?;
            let states: HashMap<Uuid, scoring::HealthState> = report::account_states(&tenant, &accounts, &snapshots)
                .into_iter()
                .map(|(id, _, state)| (id, state))
                .collect();
            let profiles: Vec<forecast::AccountProfile> = accounts
                .iter()
                .filter_map(|account| {
                    states.get(&account.id).map(|state| forecast::AccountProfile {
                        mrr: account.mrr,
                        state: *state,
                        renewal_date: account.renewal_date,
                    })
                })
                .collect();
            let projection = forecast::project(&profiles, Utc::now().date_naive());
            println!("{}", serde_json::to_string_pretty(&projection)?);
        }
    }

    Ok(())
}

fn build_scanner(config: &AppConfig, store: Arc<dyn Store>) -> Scanner {
    let (narrator, decider): (Arc<dyn NarrativeService>, Arc<dyn DecisionService>) =
        match &config.anthropic_api_key {
            Some(key) => {
                let client = Arc::new(ClaudeClient::new(
                    config.base_url.clone(),
                    key.clone(),
                    config.model.clone(),
                ));
                let narrator: Arc<dyn NarrativeService> = client.clone();
                let decider: Arc<dyn DecisionService> = client;
                (narrator, decider)
            }
            None => {
                info!("ANTHROPIC_API_KEY not set, narratives will use templates");
                (Arc::new(Unconfigured), Arc::new(Unconfigured))
            }
        };
    Scanner::new(store, narrator, decider)
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_health=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
