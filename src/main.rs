use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use artlist::billing::WebhookSettings;
use artlist::config::Config;
use artlist::db::{AppState, create_pool, queries};
use artlist::handlers;
use artlist::models::UpsertPlan;
use artlist::payments::{PaymentGateway, StripeClient, UnconfiguredGateway};
use artlist::scheduler::spawn_task_runner;

#[derive(Parser)]
#[command(name = "artlist", version, about = "Street Art List billing service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and the deferred task runner (default)
    Serve,
    /// Upsert the plan catalog from a JSON array of plans
    ImportPlans { file: PathBuf },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "artlist=debug,tower_http=debug".into()),
        )
        .init();
}

fn import_plans(config: &Config, file: &PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let plans: Vec<UpsertPlan> = serde_json::from_str(&raw).context("parsing plan file")?;

    let pool = create_pool(&config.database_path)?;
    let conn = pool.get()?;
    for plan in &plans {
        let saved = queries::upsert_plan(&conn, plan)?;
        tracing::info!(
            "Plan {} ({}) -> number {}, product {:?}",
            saved.key,
            saved.account_type.as_ref(),
            saved.plan_number,
            saved.stripe_product_id
        );
    }
    tracing::info!("Imported {} plans", plans.len());
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = create_pool(&config.database_path)?;
    tracing::info!("Database ready at {}", config.database_path);

    let gateway: Arc<dyn PaymentGateway> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeClient::new(key)),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set; checkout and refunds will fail");
            Arc::new(UnconfiguredGateway)
        }
    };

    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set; webhook signatures will NOT be verified");
    }
    if !config.dedupe_webhook_events {
        tracing::warn!("Webhook dedupe disabled; redelivered events are processed again");
    }
    if config.dev_mode {
        tracing::info!("Running in development mode");
    }

    spawn_task_runner(pool.clone(), gateway.clone(), config.task_poll_secs);

    let state = AppState {
        db: pool,
        frontend_url: config.frontend_url.clone(),
        gateway,
        webhooks: WebhookSettings::from_config(&config),
    };
    let app = handlers::app(state);

    let addr = config.addr();
    tracing::info!("Starting artlist v{} on {}", env!("CARGO_PKG_VERSION"), addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::ImportPlans { file } => import_plans(&config, &file),
    }
}
