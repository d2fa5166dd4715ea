//! Alert publishing interface.
//!
//! Abstraction layer over alert delivery so the service can coordinate
//! publishing without knowing the transport. Production wiring uses the
//! webhook publisher; tests swap in the mock.

use async_trait::async_trait;

use crate::error::PublishError;
use crate::model::CadenceItem;

pub mod mock;
pub mod webhook;

/// Downstream sink for blood-collection alerts.
#[async_trait]
pub trait AlertPublisher {
    /// Deliver one alert per item, as a single batch.
    ///
    /// Delivery is all-or-nothing from the caller's point of view: on `Err`
    /// the caller assumes none of the batch was recorded downstream.
    async fn create_alerts(&self, items: &[CadenceItem]) -> Result<(), PublishError>;

    /// Name of this publisher for logging.
    fn publisher_name(&self) -> &str;
}
