use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub sweep_interval_seconds: u64,
    pub alert_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL is required")?;

        let sweep_interval_seconds = env::var("SWEEP_INTERVAL_SECONDS")
            .map_err(|_| "SWEEP_INTERVAL_SECONDS is required")?
            .parse::<u64>()
            .map_err(|_| "SWEEP_INTERVAL_SECONDS must be a valid number")?;
        if sweep_interval_seconds == 0 {
            return Err("SWEEP_INTERVAL_SECONDS must be greater than zero".to_string());
        }

        // No webhook URL means the sweep activates items but publishes nothing.
        let alert_webhook_url = env::var("ALERT_WEBHOOK_URL").ok();

        Ok(Self {
            database_url,
            sweep_interval_seconds,
            alert_webhook_url,
        })
    }
}
