//! Database store for cadence items.
//!
//! All SQLite read/write logic lives here. The service layer composes these
//! primitives: the rescheduler runs `delete_non_fulfilled` and
//! `insert_series` inside one transaction, the activation scan issues a
//! single WHERE-guarded bulk update, and the alert coordinator records
//! successful deliveries with `mark_published`.
//!
//! Bulk transitions are deliberately one conditional statement instead of a
//! read-then-write-per-row loop, so concurrent scans cannot lose updates.

use chrono::{Days, NaiveDate};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::CadenceError;
use crate::model::{CadenceItem, ItemStatus};

const ITEM_COLUMNS: &str = "id, patient_id, practice_id, test_order_id, cadence_date, \
     order_date, blood_collection_date, blood_collection_method, active, \
     item_status, published, created_at";

/// Store for reading and writing cadence items to SQLite.
pub struct CadenceStore {
    pool: SqlitePool,
}

impl CadenceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool, used by the service to begin transactions.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- Rescheduling primitives (transaction-scoped) ----

    /// Delete every non-Fulfilled item for a patient.
    ///
    /// The `published` flag is reset to 0 before the delete, so a removed row
    /// can never be mistaken for a still-valid published record. Returns the
    /// number of rows deleted; Fulfilled rows are untouched.
    pub async fn delete_non_fulfilled(
        &self,
        conn: &mut SqliteConnection,
        patient_id: i64,
    ) -> Result<u64, CadenceError> {
        let rows = sqlx::query(
            "SELECT id FROM cadence_items WHERE patient_id = ? AND item_status != ?",
        )
        .bind(patient_id)
        .bind(ItemStatus::Fulfilled.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| CadenceError::persistence("select non-fulfilled cadence items", e))?;

        let ids: Vec<i64> = rows.iter().filter_map(|row| row.try_get("id").ok()).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = in_placeholders(ids.len());

        let reset = format!(
            "UPDATE cadence_items SET published = 0 WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&reset);
        for id in &ids {
            query = query.bind(id);
        }
        query
            .execute(&mut *conn)
            .await
            .map_err(|e| CadenceError::persistence("reset published flag before delete", e))?;

        let delete = format!("DELETE FROM cadence_items WHERE id IN ({})", placeholders);
        let mut query = sqlx::query(&delete);
        for id in &ids {
            query = query.bind(id);
        }
        let result = query
            .execute(&mut *conn)
            .await
            .map_err(|e| CadenceError::persistence("delete non-fulfilled cadence items", e))?;

        Ok(result.rows_affected())
    }

    /// Bulk-insert a generated series. Dates are stored as ISO-8601 text.
    pub async fn insert_series(
        &self,
        conn: &mut SqliteConnection,
        items: &[CadenceItem],
    ) -> Result<(), CadenceError> {
        for item in items {
            let active: i64 = if item.active { 1 } else { 0 };
            let published: i64 = if item.published { 1 } else { 0 };

            sqlx::query(
                "INSERT INTO cadence_items
                 (patient_id, practice_id, test_order_id, cadence_date, order_date,
                  blood_collection_date, blood_collection_method, active, item_status, published)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(item.patient_id)
            .bind(item.practice_id)
            .bind(item.test_order_id)
            .bind(item.cadence_date.to_string())
            .bind(item.order_date.map(|d| d.to_string()))
            .bind(item.blood_collection_date.map(|d| d.to_string()))
            .bind(&item.blood_collection_method)
            .bind(active)
            .bind(item.item_status.as_str())
            .bind(published)
            .execute(&mut *conn)
            .await
            .map_err(|e| CadenceError::persistence("insert cadence series", e))?;
        }

        Ok(())
    }

    // ---- Activation scan ----

    /// Promote `Future` items due on or before `until` to `Pending`.
    ///
    /// One conditional bulk update; returns the number of rows transitioned.
    /// Re-running is a no-op for already-Pending rows.
    pub async fn activate_upcoming(&self, until: NaiveDate) -> Result<u64, CadenceError> {
        let result = sqlx::query(
            "UPDATE cadence_items SET item_status = ?
             WHERE item_status = ? AND cadence_date <= ?",
        )
        .bind(ItemStatus::Pending.as_str())
        .bind(ItemStatus::Future.as_str())
        .bind(until.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| CadenceError::persistence("activate upcoming cadence items", e))?;

        Ok(result.rows_affected())
    }

    /// Activation variant that reports which rows were promoted.
    ///
    /// Reads the matching rows first, then issues the same predicate-guarded
    /// update. A concurrent scan may observe an overlapping window, but the
    /// guarded update keeps the transition idempotent; duplicate observation
    /// is filtered downstream by the `published` gate.
    pub async fn activate_upcoming_observed(
        &self,
        until: NaiveDate,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        let sql = format!(
            "SELECT {} FROM cadence_items
             WHERE item_status = ? AND cadence_date <= ?
             ORDER BY cadence_date ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(ItemStatus::Future.as_str())
            .bind(until.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("select upcoming cadence items", e))?;

        let items: Vec<CadenceItem> = rows.iter().filter_map(item_from_row).collect();
        if items.is_empty() {
            return Ok(items);
        }

        self.activate_upcoming(until).await?;

        Ok(items)
    }

    // ---- Publish bookkeeping ----

    /// Record successful alert delivery for the given item ids.
    pub async fn mark_published(&self, ids: &[i64]) -> Result<(), CadenceError> {
        if ids.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE cadence_items SET published = 1 WHERE id IN ({})",
            in_placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("mark cadence items published", e))?;

        Ok(())
    }

    /// Pending mobile-collection items whose alert was never delivered.
    ///
    /// This is the retry window for publishes that failed after activation
    /// already moved the items out of `Future`.
    pub async fn find_unpublished_pending(
        &self,
        method: &str,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        let sql = format!(
            "SELECT {} FROM cadence_items
             WHERE item_status = ? AND published = 0 AND blood_collection_method = ?
             ORDER BY cadence_date ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(ItemStatus::Pending.as_str())
            .bind(method)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("select unpublished pending items", e))?;

        Ok(rows.iter().filter_map(item_from_row).collect())
    }

    // ---- Direct mutations ----

    /// Unconditional single-field update of the collection method.
    pub async fn set_collection_method(
        &self,
        item_id: i64,
        method: &str,
    ) -> Result<(), CadenceError> {
        sqlx::query("UPDATE cadence_items SET blood_collection_method = ? WHERE id = ?")
            .bind(method)
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("update cadence item collection method", e))?;

        Ok(())
    }

    /// Unconditional single-field update of the lifecycle status.
    pub async fn set_status(&self, item_id: i64, status: ItemStatus) -> Result<(), CadenceError> {
        sqlx::query("UPDATE cadence_items SET item_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("update cadence item status", e))?;

        Ok(())
    }

    // ---- Queries (always ordered by cadence_date ascending) ----

    pub async fn find_by_patient(&self, patient_id: i64) -> Result<Vec<CadenceItem>, CadenceError> {
        let sql = format!(
            "SELECT {} FROM cadence_items WHERE patient_id = ? ORDER BY cadence_date ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("select cadence items by patient", e))?;

        Ok(rows.iter().filter_map(item_from_row).collect())
    }

    pub async fn find_by_practice(
        &self,
        practice_id: i64,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        let sql = format!(
            "SELECT {} FROM cadence_items WHERE practice_id = ? ORDER BY cadence_date ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(practice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("select cadence items by practice", e))?;

        Ok(rows.iter().filter_map(item_from_row).collect())
    }

    pub async fn find_pending_by_practice(
        &self,
        practice_id: i64,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        let sql = format!(
            "SELECT {} FROM cadence_items
             WHERE practice_id = ? AND item_status = ?
             ORDER BY cadence_date ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(practice_id)
            .bind(ItemStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("select pending items by practice", e))?;

        Ok(rows.iter().filter_map(item_from_row).collect())
    }

    /// All `Pending` items, across every patient and practice.
    pub async fn find_pending(&self) -> Result<Vec<CadenceItem>, CadenceError> {
        let sql = format!(
            "SELECT {} FROM cadence_items WHERE item_status = ? ORDER BY cadence_date ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(ItemStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("select pending cadence items", e))?;

        Ok(rows.iter().filter_map(item_from_row).collect())
    }

    /// `Pending` items dated within ±`days` of `today`, inclusive.
    pub async fn find_pending_in_window(
        &self,
        today: NaiveDate,
        days: u64,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        let sql = format!(
            "SELECT {} FROM cadence_items
             WHERE item_status = ? AND cadence_date BETWEEN ? AND ?
             ORDER BY cadence_date ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(ItemStatus::Pending.as_str())
            .bind((today - Days::new(days)).to_string())
            .bind((today + Days::new(days)).to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CadenceError::persistence("select pending items in window", e))?;

        Ok(rows.iter().filter_map(item_from_row).collect())
    }

    /// `Pending` items for one patient dated within ±`days` of `today`.
    pub async fn find_pending_in_window_for_patient(
        &self,
        patient_id: i64,
        today: NaiveDate,
        days: u64,
    ) -> Result<Vec<CadenceItem>, CadenceError> {
        let sql = format!(
            "SELECT {} FROM cadence_items
             WHERE patient_id = ? AND item_status = ? AND cadence_date BETWEEN ? AND ?
             ORDER BY cadence_date ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(patient_id)
            .bind(ItemStatus::Pending.as_str())
            .bind((today - Days::new(days)).to_string())
            .bind((today + Days::new(days)).to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                CadenceError::persistence("select pending items in window for patient", e)
            })?;

        Ok(rows.iter().filter_map(item_from_row).collect())
    }
}

fn in_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn item_from_row(row: &SqliteRow) -> Option<CadenceItem> {
    let id: i64 = row.try_get("id").ok()?;
    let patient_id: i64 = row.try_get("patient_id").ok()?;
    let practice_id: i64 = row.try_get("practice_id").ok()?;
    let test_order_id: Option<i64> = row.try_get("test_order_id").ok()?;
    let cadence_date: String = row.try_get("cadence_date").ok()?;
    let order_date: Option<String> = row.try_get("order_date").ok()?;
    let blood_collection_date: Option<String> = row.try_get("blood_collection_date").ok()?;
    let blood_collection_method: String = row.try_get("blood_collection_method").ok()?;
    let active: i64 = row.try_get("active").ok()?;
    let item_status: String = row.try_get("item_status").ok()?;
    let published: i64 = row.try_get("published").ok()?;
    let created_at: String = row.try_get("created_at").ok()?;

    Some(CadenceItem {
        id: Some(id),
        patient_id,
        practice_id,
        test_order_id,
        cadence_date: cadence_date.parse().ok()?,
        order_date: parse_optional_date(order_date)?,
        blood_collection_date: parse_optional_date(blood_collection_date)?,
        blood_collection_method,
        active: active != 0,
        item_status: item_status.parse().ok()?,
        published: published != 0,
        created_at: Some(created_at),
    })
}

fn parse_optional_date(value: Option<String>) -> Option<Option<NaiveDate>> {
    match value {
        None => Some(None),
        Some(text) => text.parse().ok().map(Some),
    }
}
