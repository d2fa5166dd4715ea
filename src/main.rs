use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;

use cadence_tracker::alerts::webhook::WebhookAlertPublisher;
use cadence_tracker::cli::Cli;
use cadence_tracker::config::Config;
use cadence_tracker::db::create_pool;
use cadence_tracker::logging::init_logging;
use cadence_tracker::service::CadenceService;
use cadence_tracker::store::CadenceStore;
use cadence_tracker::sweep::run_activation_sweep;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let mut config = Config::from_env().unwrap_or_else(|err| {
        tracing::error!("{}", err);
        std::process::exit(1);
    });

    // CLI flags win over environment values
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    if let Some(webhook_url) = cli.webhook_url {
        config.alert_webhook_url = Some(webhook_url);
    }
    if let Some(sweep_interval) = cli.sweep_interval {
        config.sweep_interval_seconds = sweep_interval;
    }

    let pool = create_pool(&config.database_url).await.unwrap_or_else(|err| {
        tracing::error!("Failed to open database {}: {}", config.database_url, err);
        std::process::exit(1);
    });

    let mut service = CadenceService::new(CadenceStore::new(pool));
    match &config.alert_webhook_url {
        Some(url) => {
            tracing::info!("Publishing alerts to {}", url);
            service = service.with_publisher(Arc::new(WebhookAlertPublisher::new(url.clone())));
        }
        None => {
            tracing::warn!("No ALERT_WEBHOOK_URL configured; alerts will not be published");
        }
    }

    run_activation_sweep(Arc::new(service), config.sweep_interval_seconds).await;
}
