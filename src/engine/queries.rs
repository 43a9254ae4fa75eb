use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{available_lots, overlapping_allocations};
use super::conflict::{validate_range, validate_window};
use super::{Engine, EngineError};

/// Both ends of a search window are required.
fn search_window(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<DateRange, EngineError> {
    let (Some(from), Some(to)) = (from, to) else {
        return Err(EngineError::InvalidDateRange);
    };
    let window = validate_range(from, to)?;
    validate_window(&window)?;
    Ok(window)
}

impl Engine {
    // ── Lots ─────────────────────────────────────────────────

    pub async fn get_lot(&self, id: &Ulid) -> Option<ParkingLot> {
        let lot = self.store.get_lot(id)?;
        let guard = lot.read().await;
        Some(guard.lot.clone())
    }

    /// Every lot, flagged occupied when one of its allocations covers `today`.
    pub async fn list_lots(&self, today: NaiveDate) -> Vec<LotInfo> {
        let mut out = Vec::with_capacity(self.store.lot_count());
        for id in self.store.lot_ids() {
            let Some(lot) = self.store.get_lot(&id) else {
                continue;
            };
            let guard = lot.read().await;
            out.push(LotInfo {
                id,
                lot_number: guard.lot.lot_number.clone(),
                location: guard.lot.location.clone(),
                is_occupied: guard.is_occupied_on(today),
            });
        }
        out
    }

    /// Lots with no allocation overlapping `[from, to]`, ascending by id.
    ///
    /// Each lot's schedule is read under its own lock; the result is a
    /// consistent view per lot, not a snapshot across lots.
    pub async fn search_available_lots(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<ParkingLot>, EngineError> {
        let window = search_window(from, to)?;

        let mut lots = Vec::with_capacity(self.store.lot_count());
        let mut overlapping = Vec::new();
        for id in self.store.lot_ids() {
            let Some(lot) = self.store.get_lot(&id) else {
                continue;
            };
            let guard = lot.read().await;
            overlapping.extend(guard.schedule.overlapping(&window).copied());
            lots.push(guard.lot.clone());
        }

        Ok(available_lots(&window, &overlapping, &lots))
    }

    // ── Vehicles ─────────────────────────────────────────────

    pub async fn get_vehicle(&self, id: &Ulid) -> Option<Vehicle> {
        let vehicle = self.store.get_vehicle(id)?;
        let guard = vehicle.read().await;
        Some(guard.vehicle.clone())
    }

    pub async fn list_vehicles(&self) -> Vec<Vehicle> {
        self.vehicles_matching(|_| true).await
    }

    pub async fn vehicles_for_user(&self, user_id: Ulid) -> Vec<Vehicle> {
        self.vehicles_matching(|v| v.user_id == user_id).await
    }

    /// Case-insensitive substring match on the number plate.
    pub async fn find_vehicles_by_plate(&self, fragment: &str) -> Vec<Vehicle> {
        let needle = fragment.to_lowercase();
        self.vehicles_matching(|v| v.number_plate.to_lowercase().contains(&needle))
            .await
    }

    async fn vehicles_matching(&self, keep: impl Fn(&Vehicle) -> bool) -> Vec<Vehicle> {
        let mut out = Vec::new();
        for id in self.store.vehicle_ids() {
            let Some(vehicle) = self.store.get_vehicle(&id) else {
                continue;
            };
            let guard = vehicle.read().await;
            if keep(&guard.vehicle) {
                out.push(guard.vehicle.clone());
            }
        }
        out
    }

    // ── Allocations ──────────────────────────────────────────

    pub async fn list_allocations(&self) -> Vec<AllocationInfo> {
        let mut allocations = self.store.allocation_snapshot();
        allocations.sort_by_key(|a| a.id);
        self.resolve_all(&allocations).await
    }

    pub async fn get_allocation(&self, id: &Ulid) -> Option<AllocationInfo> {
        let allocation = self.store.get_allocation(id)?;
        self.resolve_all(std::slice::from_ref(&allocation))
            .await
            .pop()
    }

    /// Allocations held by a vehicle. Unknown vehicles have none.
    pub async fn allocations_for_vehicle(&self, vehicle_id: &Ulid) -> Vec<AllocationInfo> {
        let Some(vehicle) = self.store.get_vehicle(vehicle_id) else {
            return vec![];
        };
        let mut allocations: Vec<Allocation> =
            vehicle.read().await.schedule.iter().copied().collect();
        allocations.sort_by_key(|a| a.id);
        self.resolve_all(&allocations).await
    }

    /// Allocations on a lot. Unknown lots have none.
    pub async fn allocations_for_lot(&self, lot_id: &Ulid) -> Vec<AllocationInfo> {
        let Some(lot) = self.store.get_lot(lot_id) else {
            return vec![];
        };
        let mut allocations: Vec<Allocation> = lot.read().await.schedule.iter().copied().collect();
        allocations.sort_by_key(|a| a.id);
        self.resolve_all(&allocations).await
    }

    /// Allocations (not lots) overlapping `[from, to]`.
    pub async fn allocations_in_range(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AllocationInfo>, EngineError> {
        let window = search_window(from, to)?;
        let allocations = overlapping_allocations(&window, &self.store.allocation_snapshot());
        Ok(self.resolve_all(&allocations).await)
    }

    /// Join allocations with their vehicle and lot records, one lock at a time.
    /// Allocations whose lot or vehicle cannot be found are skipped.
    async fn resolve_all(&self, allocations: &[Allocation]) -> Vec<AllocationInfo> {
        let mut lots: HashMap<Ulid, ParkingLot> = HashMap::new();
        let mut vehicles: HashMap<Ulid, Vehicle> = HashMap::new();
        let mut out = Vec::with_capacity(allocations.len());

        for allocation in allocations {
            if !lots.contains_key(&allocation.lot_id)
                && let Some(lot) = self.get_lot(&allocation.lot_id).await
            {
                lots.insert(lot.id, lot);
            }
            if !vehicles.contains_key(&allocation.vehicle_id)
                && let Some(vehicle) = self.get_vehicle(&allocation.vehicle_id).await
            {
                vehicles.insert(vehicle.id, vehicle);
            }
            if let (Some(lot), Some(vehicle)) = (
                lots.get(&allocation.lot_id),
                vehicles.get(&allocation.vehicle_id),
            ) {
                out.push(AllocationInfo::resolve(allocation, vehicle, lot));
            }
        }
        out
    }
}
