//! Cadence service: rescheduling, activation and alert coordination.
//!
//! The service owns the orchestration rules. The store knows SQL, the
//! generator knows calendar arithmetic, the publisher knows how to deliver
//! alerts; this layer decides when each runs and in what order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Days;
use tracing::info;

use crate::alerts::AlertPublisher;
use crate::clock::{Clock, SystemClock};
use crate::error::CadenceError;
use crate::model::{CadenceItem, ItemStatus, ScheduleRequest, MOBILE_PHLEBOTOMY};
use crate::series::build_series;
use crate::store::CadenceStore;

/// Days ahead of today that the activation scan reaches.
pub const ACTIVATION_LOOKAHEAD_DAYS: u64 = 7;

/// Hard deadline on a single alert publish call.
pub const PUBLISH_TIMEOUT_SECONDS: u64 = 30;

/// Orchestrates cadence scheduling on top of the store.
pub struct CadenceService {
    store: CadenceStore,
    clock: Arc<dyn Clock + Send + Sync>,
    publisher: Option<Arc<dyn AlertPublisher + Send + Sync>>,
}

impl CadenceService {
    pub fn new(store: CadenceStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            publisher: None,
        }
    }

    /// Attach an alert publisher. Without one, activation scans still run
    /// but no alerts leave the process.
    pub fn with_publisher(mut self, publisher: Arc<dyn AlertPublisher + Send + Sync>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Replace the wall clock, used by tests to pin "today".
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &CadenceStore {
        &self.store
    }

    // ---- Rescheduling ----

    /// Replace a patient's open schedule with a freshly generated series.
    ///
    /// The new series is generated before anything is touched, so an invalid
    /// request leaves the database unchanged. Delete and insert then run in
    /// one transaction: a failure at any point rolls the whole operation
    /// back, and no partially rescheduled state is ever visible. Fulfilled
    /// items survive rescheduling.
    pub async fn schedule(&self, req: &ScheduleRequest) -> Result<Vec<CadenceItem>, CadenceError> {
        let items = build_series(req)?;

        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .map_err(|e| CadenceError::persistence("begin reschedule transaction", e))?;

        let deleted = self.store.delete_non_fulfilled(&mut tx, req.patient_id).await?;
        self.store.insert_series(&mut tx, &items).await?;

        tx.commit()
            .await
            .map_err(|e| CadenceError::persistence("commit reschedule transaction", e))?;

        info!(
            patient_id = req.patient_id,
            deleted,
            inserted = items.len(),
            cadence_days = req.cadence_days,
            "rescheduled cadence series"
        );

        self.store.find_by_patient(req.patient_id).await
    }

    // ---- Activation scan ----

    /// Promote `Future` items due within the lookahead window to `Pending`.
    ///
    /// Status-only variant: counts transitions but publishes nothing.
    pub async fn activate_upcoming(&self) -> Result<u64, CadenceError> {
        let until = self.window_end();
        let promoted = self.store.activate_upcoming(until).await?;

        if promoted > 0 {
            info!(promoted, %until, "activated upcoming cadence items");
        }

        Ok(promoted)
    }

    /// Promote due items and publish alerts for the mobile-collection ones.
    ///
    /// Only items observed in this scan are candidates, and the `published`
    /// gate drops any that already had an alert delivered, so a row is
    /// alerted at most once across overlapping scans.
    pub async fn activate_and_notify(&self) -> Result<(), CadenceError> {
        let until = self.window_end();
        let observed = self.store.activate_upcoming_observed(until).await?;
        if observed.is_empty() {
            return Ok(());
        }

        info!(promoted = observed.len(), %until, "activated upcoming cadence items");

        let publisher = match &self.publisher {
            Some(publisher) => publisher,
            None => return Ok(()),
        };

        let to_publish: Vec<CadenceItem> = observed
            .into_iter()
            .filter(|item| item.blood_collection_method == MOBILE_PHLEBOTOMY && !item.published)
            .collect();
        if to_publish.is_empty() {
            return Ok(());
        }

        self.publish_batch(publisher.as_ref(), &to_publish).await
    }

    /// Re-publish alerts for `Pending` mobile-collection items whose earlier
    /// publish failed. A no-op when no publisher is configured or nothing
    /// is stranded.
    pub async fn notify_unpublished(&self) -> Result<u64, CadenceError> {
        let publisher = match &self.publisher {
            Some(publisher) => publisher,
            None => return Ok(0),
        };

        let stranded = self.store.find_unpublished_pending(MOBILE_PHLEBOTOMY).await?;
        if stranded.is_empty() {
            return Ok(0);
        }

        let count = stranded.len() as u64;
        self.publish_batch(publisher.as_ref(), &stranded).await?;

        Ok(count)
    }

    /// Deliver one alert batch and record success.
    ///
    /// `published` is only set after the publisher reports success; a
    /// timeout or rejection leaves every item unpublished so a later
    /// `notify_unpublished` pass can retry it.
    async fn publish_batch(
        &self,
        publisher: &(dyn AlertPublisher + Send + Sync),
        items: &[CadenceItem],
    ) -> Result<(), CadenceError> {
        let deadline = Duration::from_secs(PUBLISH_TIMEOUT_SECONDS);
        let outcome = tokio::time::timeout(deadline, publisher.create_alerts(items)).await;

        match outcome {
            Err(_) => Err(CadenceError::PublishTimeout {
                seconds: PUBLISH_TIMEOUT_SECONDS,
            }),
            Ok(Err(source)) => Err(CadenceError::Publish { source }),
            Ok(Ok(())) => {
                let ids: Vec<i64> = items.iter().filter_map(|item| item.id).collect();
                self.store.mark_published(&ids).await?;

                info!(
                    published = ids.len(),
                    publisher = publisher.publisher_name(),
                    "published cadence alerts"
                );

                Ok(())
            }
        }
    }

    fn window_end(&self) -> chrono::NaiveDate {
        self.clock.today() + Days::new(ACTIVATION_LOOKAHEAD_DAYS)
    }

    // ---- Item mutations ----

    pub async fn set_collection_method(
        &self,
        item_id: i64,
        method: &str,
    ) -> Result<(), CadenceError> {
        self.store.set_collection_method(item_id, method).await
    }

    pub async fn set_status(&self, item_id: i64, status: ItemStatus) -> Result<(), CadenceError> {
        self.store.set_status(item_id, status).await
    }

    // ---- Queries ----

    pub async fn items_by_patient(&self, patient_id: i64) -> Result<Vec<CadenceItem>, CadenceError> {
        self.store.find_by_patient(patient_id).await
    }

    pub async fn items_by_practice(
        &self,
        practice_id: i64,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        self.store.find_by_practice(practice_id).await
    }

    pub async fn pending_by_practice(
        &self,
        practice_id: i64,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        self.store.find_pending_by_practice(practice_id).await
    }

    pub async fn due_items(&self) -> Result<Vec<CadenceItem>, CadenceError> {
        self.store.find_pending().await
    }

    /// `Pending` items across all patients within ±`days` of today.
    pub async fn all_items_within_days(&self, days: u64) -> Result<Vec<CadenceItem>, CadenceError> {
        self.store
            .find_pending_in_window(self.clock.today(), days)
            .await
    }

    /// One patient's `Pending` items within ±`days` of today.
    pub async fn items_within_days(
        &self,
        patient_id: i64,
        days: u64,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        self.store
            .find_pending_in_window_for_patient(patient_id, self.clock.today(), days)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::mock::MockAlertPublisher;
    use crate::clock::FixedClock;
    use crate::db::create_pool;
    use crate::error::PublishError;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn make_service(today: NaiveDate) -> CadenceService {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        CadenceService::new(CadenceStore::new(pool))
            .with_clock(Arc::new(FixedClock::new(today)))
    }

    fn make_request(patient_id: i64, start: NaiveDate, cadence_days: i64) -> ScheduleRequest {
        ScheduleRequest {
            patient_id,
            practice_id: 7,
            test_order_id: Some(900),
            blood_collection_method: MOBILE_PHLEBOTOMY.to_string(),
            cadence_days,
            start_date: start,
        }
    }

    async fn seed_item(
        service: &CadenceService,
        patient_id: i64,
        cadence_date: NaiveDate,
        status: ItemStatus,
        method: &str,
    ) {
        let item = CadenceItem {
            id: None,
            patient_id,
            practice_id: 7,
            test_order_id: None,
            cadence_date,
            order_date: None,
            blood_collection_date: None,
            blood_collection_method: method.to_string(),
            active: false,
            item_status: status,
            published: false,
            created_at: None,
        };
        let mut conn = service.store().pool().acquire().await.unwrap();
        service
            .store()
            .insert_series(&mut conn, &[item])
            .await
            .unwrap();
    }

    // ---- scheduling ----

    #[tokio::test]
    async fn schedule_persists_the_generated_series() {
        let service = make_service(date(2024, 1, 1)).await;

        let items = service
            .schedule(&make_request(41, date(2024, 1, 1), 30))
            .await
            .unwrap();

        assert_eq!(items.len(), 12);
        assert_eq!(items[0].cadence_date, date(2024, 1, 31));
        assert_eq!(items[11].cadence_date, date(2024, 12, 26));
        assert!(items.iter().all(|i| i.id.is_some()));
        assert!(items.iter().all(|i| i.item_status == ItemStatus::Future));
    }

    #[tokio::test]
    async fn reschedule_replaces_open_items_but_keeps_fulfilled_history() {
        let service = make_service(date(2024, 6, 1)).await;
        seed_item(
            &service,
            41,
            date(2024, 2, 1),
            ItemStatus::Fulfilled,
            MOBILE_PHLEBOTOMY,
        )
        .await;
        service
            .schedule(&make_request(41, date(2024, 3, 1), 30))
            .await
            .unwrap();

        // switch from a 30-day to a 90-day cadence
        let items = service
            .schedule(&make_request(41, date(2024, 6, 1), 90))
            .await
            .unwrap();

        let fulfilled: Vec<_> = items
            .iter()
            .filter(|i| i.item_status == ItemStatus::Fulfilled)
            .collect();
        assert_eq!(fulfilled.len(), 1);
        assert_eq!(fulfilled[0].cadence_date, date(2024, 2, 1));

        let open: Vec<_> = items
            .iter()
            .filter(|i| i.item_status == ItemStatus::Future)
            .collect();
        assert_eq!(open.len(), 4);
        assert_eq!(open[0].cadence_date, date(2024, 8, 30));
    }

    #[tokio::test]
    async fn invalid_request_leaves_existing_items_untouched() {
        let service = make_service(date(2024, 1, 1)).await;
        service
            .schedule(&make_request(41, date(2024, 1, 1), 30))
            .await
            .unwrap();

        let err = service
            .schedule(&make_request(41, date(2024, 1, 1), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::InvalidCadence { days: 0 }));

        assert_eq!(service.items_by_patient(41).await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn reschedule_scopes_to_one_patient() {
        let service = make_service(date(2024, 1, 1)).await;
        service
            .schedule(&make_request(41, date(2024, 1, 1), 30))
            .await
            .unwrap();
        service
            .schedule(&make_request(52, date(2024, 1, 1), 90))
            .await
            .unwrap();

        service
            .schedule(&make_request(41, date(2024, 1, 1), 60))
            .await
            .unwrap();

        assert_eq!(service.items_by_patient(52).await.unwrap().len(), 4);
    }

    // ---- activation ----

    #[tokio::test]
    async fn activation_window_spans_today_through_seven_days_out() {
        let today = date(2024, 6, 15);
        let service = make_service(today).await;
        for (day, status) in [
            (date(2024, 6, 10), ItemStatus::Future), // overdue, still promoted
            (date(2024, 6, 22), ItemStatus::Future), // boundary, today + 7
            (date(2024, 6, 23), ItemStatus::Future), // outside
        ] {
            seed_item(&service, 41, day, status, MOBILE_PHLEBOTOMY).await;
        }

        let promoted = service.activate_upcoming().await.unwrap();
        assert_eq!(promoted, 2);

        let items = service.items_by_patient(41).await.unwrap();
        assert_eq!(items[0].item_status, ItemStatus::Pending);
        assert_eq!(items[1].item_status, ItemStatus::Pending);
        assert_eq!(items[2].item_status, ItemStatus::Future);
    }

    #[tokio::test]
    async fn repeated_scans_promote_nothing_new() {
        let today = date(2024, 6, 15);
        let service = make_service(today).await;
        seed_item(&service, 41, today, ItemStatus::Future, MOBILE_PHLEBOTOMY).await;

        assert_eq!(service.activate_upcoming().await.unwrap(), 1);
        assert_eq!(service.activate_upcoming().await.unwrap(), 0);
    }

    // ---- alert coordination ----

    #[tokio::test]
    async fn notify_publishes_mobile_items_and_marks_them() {
        let today = date(2024, 6, 15);
        let publisher = Arc::new(MockAlertPublisher::new());
        let service = {
            let pool = create_pool("sqlite::memory:").await.unwrap();
            CadenceService::new(CadenceStore::new(pool))
                .with_clock(Arc::new(FixedClock::new(today)))
                .with_publisher(publisher.clone())
        };
        seed_item(&service, 41, date(2024, 6, 16), ItemStatus::Future, MOBILE_PHLEBOTOMY).await;
        seed_item(&service, 41, date(2024, 6, 17), ItemStatus::Future, "Office Draw").await;

        service.activate_and_notify().await.unwrap();

        let batches = publisher.published_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].cadence_date, date(2024, 6, 16));

        let items = service.items_by_patient(41).await.unwrap();
        assert!(items[0].published);
        assert!(!items[1].published);
        // both were promoted regardless of collection method
        assert!(items.iter().all(|i| i.item_status == ItemStatus::Pending));
    }

    #[tokio::test]
    async fn already_published_items_are_never_alerted_again() {
        let today = date(2024, 6, 15);
        let publisher = Arc::new(MockAlertPublisher::new());
        let service = {
            let pool = create_pool("sqlite::memory:").await.unwrap();
            CadenceService::new(CadenceStore::new(pool))
                .with_clock(Arc::new(FixedClock::new(today)))
                .with_publisher(publisher.clone())
        };
        seed_item(&service, 41, date(2024, 6, 16), ItemStatus::Future, MOBILE_PHLEBOTOMY).await;
        let id = service.items_by_patient(41).await.unwrap()[0].id.unwrap();
        service.store().mark_published(&[id]).await.unwrap();

        service.activate_and_notify().await.unwrap();

        // promoted, but the published gate kept it out of the batch
        let items = service.items_by_patient(41).await.unwrap();
        assert_eq!(items[0].item_status, ItemStatus::Pending);
        assert!(publisher.published_batches().is_empty());
    }

    #[tokio::test]
    async fn items_are_alerted_at_most_once_across_scans() {
        let today = date(2024, 6, 15);
        let publisher = Arc::new(MockAlertPublisher::new());
        let service = {
            let pool = create_pool("sqlite::memory:").await.unwrap();
            CadenceService::new(CadenceStore::new(pool))
                .with_clock(Arc::new(FixedClock::new(today)))
                .with_publisher(publisher.clone())
        };
        seed_item(&service, 41, date(2024, 6, 16), ItemStatus::Future, MOBILE_PHLEBOTOMY).await;

        service.activate_and_notify().await.unwrap();
        service.activate_and_notify().await.unwrap();

        assert_eq!(publisher.published_batches().len(), 1);
    }

    #[tokio::test]
    async fn failed_publish_leaves_items_unpublished() {
        let today = date(2024, 6, 15);
        let publisher = Arc::new(
            MockAlertPublisher::new().with_failure(PublishError::ServiceUnavailable),
        );
        let service = {
            let pool = create_pool("sqlite::memory:").await.unwrap();
            CadenceService::new(CadenceStore::new(pool))
                .with_clock(Arc::new(FixedClock::new(today)))
                .with_publisher(publisher.clone())
        };
        seed_item(&service, 41, date(2024, 6, 16), ItemStatus::Future, MOBILE_PHLEBOTOMY).await;

        let err = service.activate_and_notify().await.unwrap_err();
        assert!(matches!(err, CadenceError::Publish { .. }));

        let items = service.items_by_patient(41).await.unwrap();
        assert!(!items[0].published);
        // the item left Future, so a plain re-scan no longer sees it
        assert_eq!(items[0].item_status, ItemStatus::Pending);
        service.activate_and_notify().await.unwrap();
        assert!(publisher.published_batches().is_empty());
    }

    #[tokio::test]
    async fn notify_unpublished_retries_stranded_items() {
        let today = date(2024, 6, 15);
        let publisher = Arc::new(
            MockAlertPublisher::new().with_failure(PublishError::ServiceUnavailable),
        );
        let service = {
            let pool = create_pool("sqlite::memory:").await.unwrap();
            CadenceService::new(CadenceStore::new(pool))
                .with_clock(Arc::new(FixedClock::new(today)))
                .with_publisher(publisher.clone())
        };
        seed_item(&service, 41, date(2024, 6, 16), ItemStatus::Future, MOBILE_PHLEBOTOMY).await;

        service.activate_and_notify().await.unwrap_err();

        // first retry succeeds, second finds nothing stranded
        assert_eq!(service.notify_unpublished().await.unwrap(), 1);
        assert_eq!(service.notify_unpublished().await.unwrap(), 0);

        let items = service.items_by_patient(41).await.unwrap();
        assert!(items[0].published);
    }

    #[tokio::test]
    async fn notify_without_publisher_still_activates() {
        let today = date(2024, 6, 15);
        let service = make_service(today).await;
        seed_item(&service, 41, date(2024, 6, 16), ItemStatus::Future, MOBILE_PHLEBOTOMY).await;

        service.activate_and_notify().await.unwrap();

        let items = service.items_by_patient(41).await.unwrap();
        assert_eq!(items[0].item_status, ItemStatus::Pending);
        assert!(!items[0].published);
        assert_eq!(service.notify_unpublished().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn slow_publisher_hits_the_deadline() {
        let today = date(2024, 6, 15);
        let publisher = Arc::new(MockAlertPublisher::new().with_delay(Duration::from_secs(45)));
        let service = {
            let pool = create_pool("sqlite::memory:").await.unwrap();
            CadenceService::new(CadenceStore::new(pool))
                .with_clock(Arc::new(FixedClock::new(today)))
                .with_publisher(publisher.clone())
        };
        seed_item(&service, 41, date(2024, 6, 16), ItemStatus::Future, MOBILE_PHLEBOTOMY).await;

        tokio::time::pause();
        let err = service.activate_and_notify().await.unwrap_err();
        assert!(matches!(err, CadenceError::PublishTimeout { seconds: 30 }));

        let items = service.items_by_patient(41).await.unwrap();
        assert!(!items[0].published);
    }

    // ---- windowed queries ----

    #[tokio::test]
    async fn window_queries_use_the_injected_clock() {
        let today = date(2024, 6, 15);
        let service = make_service(today).await;
        seed_item(&service, 41, date(2024, 6, 12), ItemStatus::Pending, MOBILE_PHLEBOTOMY).await;
        seed_item(&service, 41, date(2024, 6, 19), ItemStatus::Pending, MOBILE_PHLEBOTOMY).await;
        seed_item(&service, 52, date(2024, 6, 15), ItemStatus::Pending, MOBILE_PHLEBOTOMY).await;

        assert_eq!(service.all_items_within_days(3).await.unwrap().len(), 2);
        assert_eq!(service.items_within_days(41, 3).await.unwrap().len(), 1);
        assert_eq!(service.items_within_days(41, 4).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn due_items_lists_pending_across_patients() {
        let service = make_service(date(2024, 6, 15)).await;
        seed_item(&service, 41, date(2024, 6, 10), ItemStatus::Pending, MOBILE_PHLEBOTOMY).await;
        seed_item(&service, 52, date(2024, 6, 11), ItemStatus::Future, MOBILE_PHLEBOTOMY).await;

        let due = service.due_items().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].patient_id, 41);
    }

    #[tokio::test]
    async fn mutation_pass_throughs_update_the_row() {
        let service = make_service(date(2024, 6, 15)).await;
        seed_item(&service, 41, date(2024, 6, 16), ItemStatus::Pending, MOBILE_PHLEBOTOMY).await;

        let id = service.items_by_patient(41).await.unwrap()[0].id.unwrap();
        service.set_collection_method(id, "Office Draw").await.unwrap();
        service.set_status(id, ItemStatus::Fulfilled).await.unwrap();

        let items = service.items_by_patient(41).await.unwrap();
        assert_eq!(items[0].blood_collection_method, "Office Draw");
        assert_eq!(items[0].item_status, ItemStatus::Fulfilled);
    }
}
