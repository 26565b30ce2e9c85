use std::sync::Arc;

use serviceplan_pro::{
    app,
    config::Config,
    database::{create_db_pool, MemStorage, PgStorage, Storage},
    pricing::seed_plans,
    stripe_client::StripeGateway,
    zapier::ZapierNotifier,
    AppState,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stdout)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_writer(std::io::stdout)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Tracing is configured from the same environment; report directly.
            eprintln!("Invalid configuration: {e}");
            return Err(e.into());
        }
    };
    init_tracing(config.log_json);

    info!("Starting ServicePlan Pro API");

    let storage: Arc<dyn Storage> = match config.database_url.as_deref() {
        Some(url) => match create_db_pool(url) {
            Ok(pool) => {
                info!("Database connection pool created successfully");
                Arc::new(PgStorage::new(pool))
            }
            Err(e) => {
                error!("Failed to create database connection pool: {}", e);
                return Err(e.into());
            }
        },
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemStorage::new())
        }
    };

    seed_plans(storage.as_ref(), &config.plan_prices).await?;

    let billing = Arc::new(StripeGateway::new(&config.stripe.secret_key));
    let notifier = ZapierNotifier::new(config.zapier_webhook_url.clone());
    if !notifier.is_enabled() {
        info!("ZAPIER_WEBHOOK_URL not set, notifications disabled");
    }

    let bind_addr = config.bind_addr();
    let router = app(AppState::new(config, storage, billing, notifier));

    if std::env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
        info!("Running as a Lambda function");
        match lambda_http::run(router).await {
            Ok(()) => info!("Lambda executed successfully"),
            Err(e) => error!("Lambda execution error: {e}"),
        }
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
