use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedLotState = Arc<RwLock<LotState>>;
pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

/// In-memory indexes behind the engine. Each lot and vehicle owns a schedule
/// guarded by its own lock; `allocations` is the id lookup over both.
pub struct InMemoryStore {
    lots: DashMap<Ulid, SharedLotState>,
    vehicles: DashMap<Ulid, SharedVehicleState>,
    allocations: DashMap<Ulid, Allocation>,
    /// Allocation ids claimed by creates that have not committed yet.
    pending_ids: DashMap<Ulid, ()>,
}

/// Claim on an allocation id, released on drop.
pub struct IdReservation<'a> {
    pending_ids: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for IdReservation<'_> {
    fn drop(&mut self) {
        self.pending_ids.remove(&self.id);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            lots: DashMap::new(),
            vehicles: DashMap::new(),
            allocations: DashMap::new(),
            pending_ids: DashMap::new(),
        }
    }

    // ── Lots ─────────────────────────────────────────────────

    pub fn lot_count(&self) -> usize {
        self.lots.len()
    }

    pub fn contains_lot(&self, id: &Ulid) -> bool {
        self.lots.contains_key(id)
    }

    pub fn get_lot(&self, id: &Ulid) -> Option<SharedLotState> {
        self.lots.get(id).map(|e| e.value().clone())
    }

    pub fn insert_lot(&self, lot: ParkingLot) {
        self.lots.insert(lot.id, Arc::new(RwLock::new(LotState::new(lot))));
    }

    /// Sorted so listings are deterministic.
    pub fn lot_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.lots.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Vehicles ─────────────────────────────────────────────

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn contains_vehicle(&self, id: &Ulid) -> bool {
        self.vehicles.contains_key(id)
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn insert_vehicle(&self, vehicle: Vehicle) {
        self.vehicles
            .insert(vehicle.id, Arc::new(RwLock::new(VehicleState::new(vehicle))));
    }

    pub fn vehicle_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.vehicles.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Allocations ──────────────────────────────────────────

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn contains_allocation(&self, id: &Ulid) -> bool {
        self.allocations.contains_key(id)
    }

    pub fn get_allocation(&self, id: &Ulid) -> Option<Allocation> {
        self.allocations.get(id).map(|e| *e.value())
    }

    /// Claim `id` for a create in flight. `None` if the id is committed or
    /// claimed by another create. The claim is taken before the committed
    /// check so a create that commits and releases in between is still seen.
    pub fn reserve_allocation_id(&self, id: Ulid) -> Option<IdReservation<'_>> {
        match self.pending_ids.entry(id) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        let reservation = IdReservation {
            pending_ids: &self.pending_ids,
            id,
        };
        if self.allocations.contains_key(&id) {
            return None;
        }
        Some(reservation)
    }

    /// Point-in-time copy of every allocation.
    pub fn allocation_snapshot(&self) -> Vec<Allocation> {
        self.allocations.iter().map(|e| *e.value()).collect()
    }

    // ── Event application (caller holds the schedule locks) ──

    pub fn record_allocation(
        &self,
        lot: &mut LotState,
        vehicle: &mut VehicleState,
        allocation: Allocation,
    ) {
        lot.schedule.insert(allocation);
        vehicle.schedule.insert(allocation);
        self.allocations.insert(allocation.id, allocation);
    }

    /// Replace an allocation's range and lot. `previous_lot` is the lot it
    /// leaves, or `None` when it stays on `lot`.
    pub fn move_allocation(
        &self,
        previous_lot: Option<&mut LotState>,
        lot: &mut LotState,
        vehicle: &mut VehicleState,
        allocation: Allocation,
    ) {
        match previous_lot {
            Some(previous) => previous.schedule.remove(allocation.id),
            None => lot.schedule.remove(allocation.id),
        };
        lot.schedule.insert(allocation);
        vehicle.schedule.remove(allocation.id);
        vehicle.schedule.insert(allocation);
        self.allocations.insert(allocation.id, allocation);
    }

    pub fn forget_allocation(&self, lot: &mut LotState, vehicle: &mut VehicleState, id: Ulid) {
        lot.schedule.remove(id);
        vehicle.schedule.remove(id);
        self.allocations.remove(&id);
    }
}
