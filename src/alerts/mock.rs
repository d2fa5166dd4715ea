//! In-process publisher test double.
//!
//! Records every delivered batch and can be loaded with queued failures or
//! an artificial delay, so service tests can exercise the publish paths
//! without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::alerts::AlertPublisher;
use crate::error::PublishError;
use crate::model::CadenceItem;

#[derive(Default)]
pub struct MockAlertPublisher {
    failures: Mutex<VecDeque<PublishError>>,
    batches: Mutex<Vec<Vec<CadenceItem>>>,
    delay: Option<Duration>,
}

impl MockAlertPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure; each queued failure is consumed by one publish call,
    /// after which calls succeed again.
    pub fn with_failure(self, error: PublishError) -> Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    /// Delay every publish call, for exercising the caller's deadline.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Batches delivered so far, oldest first.
    pub fn published_batches(&self) -> Vec<Vec<CadenceItem>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertPublisher for MockAlertPublisher {
    async fn create_alerts(&self, items: &[CadenceItem]) -> Result<(), PublishError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        self.batches.lock().unwrap().push(items.to_vec());
        Ok(())
    }

    fn publisher_name(&self) -> &str {
        "mock"
    }
}
