use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

pub(crate) fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<DateRange, EngineError> {
    DateRange::new(from, to).ok_or(EngineError::InvalidDateRange)
}

pub(crate) fn validate_booking(range: &DateRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.days() > MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(range: &DateRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// First allocation on the candidate's lot overlapping the candidate's range.
/// `exclude` skips the candidate's own stored record on update.
pub fn lot_conflict<'a>(
    candidate: &Allocation,
    existing: impl IntoIterator<Item = &'a Allocation>,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    existing
        .into_iter()
        .find(|a| {
            a.lot_id == candidate.lot_id
                && Some(a.id) != exclude
                && a.range.overlaps(&candidate.range)
        })
        .map(|a| a.id)
}

/// First allocation held by the candidate's vehicle overlapping the candidate's range.
pub fn vehicle_conflict<'a>(
    candidate: &Allocation,
    existing: impl IntoIterator<Item = &'a Allocation>,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    existing
        .into_iter()
        .find(|a| {
            a.vehicle_id == candidate.vehicle_id
                && Some(a.id) != exclude
                && a.range.overlaps(&candidate.range)
        })
        .map(|a| a.id)
}

/// Create-path check. The lot is checked first, so a double-booked slot is
/// reported even when the vehicle is also busy.
pub(crate) fn check_no_conflict(
    candidate: &Allocation,
    lot: &Schedule,
    vehicle: &Schedule,
) -> Result<(), EngineError> {
    if let Some(conflicting) = lot_conflict(candidate, lot.overlapping(&candidate.range), None) {
        return Err(EngineError::SlotAlreadyBooked {
            conflicting,
            on_update: false,
        });
    }
    if let Some(conflicting) =
        vehicle_conflict(candidate, vehicle.overlapping(&candidate.range), None)
    {
        return Err(EngineError::VehicleAlreadyAllocated(conflicting));
    }
    Ok(())
}

/// Update-path check: lot only, ignoring the allocation being replaced.
pub(crate) fn check_lot_free(candidate: &Allocation, lot: &Schedule) -> Result<(), EngineError> {
    match lot_conflict(candidate, lot.overlapping(&candidate.range), Some(candidate.id)) {
        Some(conflicting) => Err(EngineError::SlotAlreadyBooked {
            conflicting,
            on_update: true,
        }),
        None => Ok(()),
    }
}
