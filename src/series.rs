//! Cadence series generation.
//!
//! Pure calendar arithmetic: given a schedule request, produce the ordered
//! draft series covering the year after the start date. No I/O and no
//! wall-clock dependence — identical inputs always yield identical output.

use chrono::{Days, Months};

use crate::error::CadenceError;
use crate::model::{CadenceItem, ItemStatus, ScheduleRequest};

/// Build the draft series for a schedule request.
///
/// The first entry falls `cadence_days` after the start date; entries then
/// step by `cadence_days` up to and including one calendar year after the
/// start date. Every draft is `Future`, inactive and unpublished, with no
/// store-assigned id yet.
///
/// A non-positive `cadence_days` is rejected up front — the stepping loop
/// would otherwise never advance.
pub fn build_series(req: &ScheduleRequest) -> Result<Vec<CadenceItem>, CadenceError> {
    if req.cadence_days <= 0 {
        return Err(CadenceError::InvalidCadence {
            days: req.cadence_days,
        });
    }

    let step = Days::new(req.cadence_days as u64);
    let horizon = req.start_date + Months::new(12);

    let mut items = Vec::new();
    let mut date = req.start_date + step;
    while date <= horizon {
        items.push(CadenceItem {
            id: None,
            patient_id: req.patient_id,
            practice_id: req.practice_id,
            test_order_id: req.test_order_id,
            cadence_date: date,
            order_date: None,
            blood_collection_date: None,
            blood_collection_method: req.blood_collection_method.clone(),
            active: false,
            item_status: ItemStatus::Future,
            published: false,
            created_at: None,
        });
        date = date + step;
    }

    Ok(items)
}
