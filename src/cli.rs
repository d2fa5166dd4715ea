use clap::Parser;

/// Cadence tracker CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "cadence-tracker",
    version,
    about = "Blood-collection cadence scheduling and alerting"
)]
pub struct Cli {
    /// SQLite database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Webhook endpoint for blood-collection alerts
    #[arg(long)]
    pub webhook_url: Option<String>,

    /// Activation sweep interval in seconds
    #[arg(long)]
    pub sweep_interval: Option<u64>,
}
