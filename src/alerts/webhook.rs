//! Webhook alert delivery.
//!
//! Posts one JSON batch per publish call to the configured endpoint. The
//! caller enforces the delivery deadline, so the client itself carries no
//! request timeout.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::alerts::AlertPublisher;
use crate::error::PublishError;
use crate::model::CadenceItem;

/// Publishes cadence alerts to an HTTP webhook endpoint.
#[derive(Clone)]
pub struct WebhookAlertPublisher {
    endpoint: String,
    http: Client,
}

impl WebhookAlertPublisher {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            http: Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Wire form of a single alert.
#[derive(Debug, Serialize)]
struct AlertNotice {
    cadence_item_id: Option<i64>,
    patient_id: i64,
    practice_id: i64,
    cadence_date: String,
    blood_collection_method: String,
}

impl AlertNotice {
    fn from_item(item: &CadenceItem) -> Self {
        Self {
            cadence_item_id: item.id,
            patient_id: item.patient_id,
            practice_id: item.practice_id,
            cadence_date: item.cadence_date.to_string(),
            blood_collection_method: item.blood_collection_method.clone(),
        }
    }
}

#[async_trait]
impl AlertPublisher for WebhookAlertPublisher {
    async fn create_alerts(&self, items: &[CadenceItem]) -> Result<(), PublishError> {
        let notices: Vec<AlertNotice> = items.iter().map(AlertNotice::from_item).collect();

        let response = self
            .http
            .post(&self.endpoint)
            .json(&notices)
            .send()
            .await
            .map_err(|err| PublishError::Network {
                message: err.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(PublishError::ServiceUnavailable);
        }
        if !status.is_success() {
            return Err(PublishError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(())
    }

    fn publisher_name(&self) -> &str {
        "webhook"
    }
}
