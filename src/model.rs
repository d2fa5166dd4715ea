//! Domain model for cadence scheduling.
//!
//! A `CadenceItem` is one scheduled blood-collection occurrence for a
//! patient. Items are created in batches by the rescheduler (a "series"),
//! promoted to `Pending` by the activation scan as their due date enters the
//! lookahead window, and resolved to `Fulfilled` by external collaborators.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Collection method tag that qualifies an item for mobile-collection alerts.
pub const MOBILE_PHLEBOTOMY: &str = "Mobile Phlebotomy";

/// Lifecycle state of a cadence item.
///
/// `Fulfilled` is terminal: fulfilled items are permanent history and are
/// never deleted or regenerated by a reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Future,
    Pending,
    Fulfilled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Future => "Future",
            ItemStatus::Pending => "Pending",
            ItemStatus::Fulfilled => "Fulfilled",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Future" => Ok(ItemStatus::Future),
            "Pending" => Ok(ItemStatus::Pending),
            "Fulfilled" => Ok(ItemStatus::Fulfilled),
            other => Err(format!("unknown item status: {}", other)),
        }
    }
}

/// One scheduled blood-collection event.
///
/// `id` is assigned by the store on insert; drafts produced by the series
/// generator carry `None`. `cadence_date` is day-granular by construction —
/// there is no sub-day precision anywhere in the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceItem {
    pub id: Option<i64>,
    pub patient_id: i64,
    pub practice_id: i64,
    pub test_order_id: Option<i64>,
    pub cadence_date: NaiveDate,
    pub order_date: Option<NaiveDate>,
    pub blood_collection_date: Option<NaiveDate>,
    pub blood_collection_method: String,
    pub active: bool,
    pub item_status: ItemStatus,
    pub published: bool,
    pub created_at: Option<String>,
}

/// Parameters for replacing a patient's live cadence series.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub patient_id: i64,
    pub practice_id: i64,
    pub test_order_id: Option<i64>,
    pub blood_collection_method: String,
    pub cadence_days: i64,
    pub start_date: NaiveDate,
}
