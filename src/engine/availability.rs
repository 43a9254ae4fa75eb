use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

// ── Availability Search ────────────────────────────────────────────

/// Lots with no allocation overlapping `window`, ascending by lot id.
///
/// The distinct lot ids of all overlapping allocations are collected first;
/// every lot outside that set is free for the whole window.
pub fn available_lots<'a, 'b>(
    window: &DateRange,
    allocations: impl IntoIterator<Item = &'a Allocation>,
    lots: impl IntoIterator<Item = &'b ParkingLot>,
) -> Vec<ParkingLot> {
    let booked = booked_lot_ids(window, allocations);
    let mut free: Vec<ParkingLot> = lots
        .into_iter()
        .filter(|lot| !booked.contains(&lot.id))
        .cloned()
        .collect();
    free.sort_by_key(|lot| lot.id);
    free
}

pub fn booked_lot_ids<'a>(
    window: &DateRange,
    allocations: impl IntoIterator<Item = &'a Allocation>,
) -> HashSet<Ulid> {
    allocations
        .into_iter()
        .filter(|a| a.range.overlaps(window))
        .map(|a| a.lot_id)
        .collect()
}

/// Allocations (not lots) overlapping `window`, ascending by allocation id.
pub fn overlapping_allocations<'a>(
    window: &DateRange,
    allocations: impl IntoIterator<Item = &'a Allocation>,
) -> Vec<Allocation> {
    let mut hits: Vec<Allocation> = allocations
        .into_iter()
        .filter(|a| a.range.overlaps(window))
        .copied()
        .collect();
    hits.sort_by_key(|a| a.id);
    hits
}
