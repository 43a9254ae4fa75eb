use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_lot_free, check_no_conflict, validate_booking, validate_range};
use super::{Engine, EngineError, WalCommand, locked_lot, lot_pair};

/// Sections `A`..=`M` are on the ground floor, the rest one floor up.
const SEED_SECTIONS: std::ops::RangeInclusive<u8> = b'A'..=b'Z';
const SEED_LOTS_PER_SECTION: u32 = 10;
const LAST_GROUND_FLOOR_SECTION: u8 = b'M';

fn record_conflict(err: &EngineError) {
    if err.is_conflict() {
        metrics::counter!(
            observability::ALLOCATION_CONFLICTS_TOTAL,
            "kind" => observability::conflict_label(err)
        )
        .increment(1);
        warn!("allocation rejected: {err}");
    }
}

fn check_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

impl Engine {
    // ── Lots ─────────────────────────────────────────────────

    pub async fn create_lot(
        &self,
        id: Ulid,
        lot_number: String,
        location: Option<String>,
    ) -> Result<ParkingLot, EngineError> {
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry.lock().await;
        self.insert_lot(ParkingLot {
            id,
            lot_number,
            location,
        })
        .await
    }

    /// Caller holds the commit gate and the registry lock.
    async fn insert_lot(&self, lot: ParkingLot) -> Result<ParkingLot, EngineError> {
        if self.store.lot_count() >= MAX_LOTS {
            return Err(EngineError::LimitExceeded("too many parking lots"));
        }
        check_text(&lot.lot_number, MAX_LOT_NUMBER_LEN, "lot number too long")?;
        if let Some(ref location) = lot.location {
            check_text(location, MAX_TEXT_LEN, "location too long")?;
        }
        if self.store.contains_lot(&lot.id) {
            return Err(EngineError::AlreadyExists(lot.id));
        }

        self.wal_append(&Event::LotCreated {
            id: lot.id,
            lot_number: lot.lot_number.clone(),
            location: lot.location.clone(),
        })
        .await?;
        self.store.insert_lot(lot.clone());
        Ok(lot)
    }

    /// Create the default `A01`..`Z10` layout. A no-op returning 0 when any
    /// lot already exists.
    pub async fn seed_lots(&self) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.store.lot_count() > 0 {
            return Ok(0);
        }

        // Monotonic ids keep the seeded lots listed in layout order.
        let mut ids = ulid::Generator::new();
        let mut created = 0;
        for section in SEED_SECTIONS {
            let location = if section <= LAST_GROUND_FLOOR_SECTION {
                "Ground Floor"
            } else {
                "First Floor"
            };
            for n in 1..=SEED_LOTS_PER_SECTION {
                let id = ids
                    .generate()
                    .map_err(|_| EngineError::LimitExceeded("lot id space exhausted"))?;
                self.insert_lot(ParkingLot {
                    id,
                    lot_number: format!("{}{n:02}", section as char),
                    location: Some(location.to_string()),
                })
                .await?;
                created += 1;
            }
        }
        info!("seeded {created} parking lots");
        Ok(created)
    }

    // ── Vehicles ─────────────────────────────────────────────

    pub async fn register_vehicle(&self, vehicle: Vehicle) -> Result<Vehicle, EngineError> {
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.store.vehicle_count() >= MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        check_text(&vehicle.number_plate, MAX_PLATE_LEN, "number plate too long")?;
        check_text(&vehicle.kind, MAX_TEXT_LEN, "vehicle type too long")?;
        check_text(&vehicle.make, MAX_TEXT_LEN, "vehicle make too long")?;
        if let Some(ref color) = vehicle.color {
            check_text(color, MAX_TEXT_LEN, "vehicle color too long")?;
        }
        if self.store.contains_vehicle(&vehicle.id) {
            return Err(EngineError::AlreadyExists(vehicle.id));
        }

        self.wal_append(&Event::VehicleRegistered {
            id: vehicle.id,
            user_id: vehicle.user_id,
            kind: vehicle.kind.clone(),
            number_plate: vehicle.number_plate.clone(),
            make: vehicle.make.clone(),
            color: vehicle.color.clone(),
        })
        .await?;
        self.store.insert_vehicle(vehicle.clone());
        info!("registered vehicle {} ({})", vehicle.id, vehicle.number_plate);
        Ok(vehicle)
    }

    // ── Allocations ──────────────────────────────────────────

    /// Book `lot_id` for `vehicle_id` over `[from, to]`.
    ///
    /// The lot and vehicle schedules stay write-locked from the conflict check
    /// until the event is durable, so two overlapping requests cannot both
    /// commit.
    pub async fn create_allocation(
        &self,
        id: Ulid,
        vehicle_id: Ulid,
        lot_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AllocationInfo, EngineError> {
        let range = validate_range(from, to)?;
        validate_booking(&range)?;
        if !self.store.contains_lot(&lot_id) {
            return Err(EngineError::NotFound(lot_id));
        }
        if !self.store.contains_vehicle(&vehicle_id) {
            return Err(EngineError::NotFound(vehicle_id));
        }

        let _gate = self.commit_gate.read().await;
        let mut lots = self.lock_lots(&[lot_id]).await?;
        let mut vehicle = self.lock_vehicle(vehicle_id).await?;
        let lot = locked_lot(&mut lots, lot_id).ok_or(EngineError::NotFound(lot_id))?;
        // Creates on other lots do not share these locks, so the id is
        // claimed in the store rather than checked.
        let _claim = self
            .store
            .reserve_allocation_id(id)
            .ok_or(EngineError::AlreadyExists(id))?;

        if lot.schedule.len() >= MAX_ALLOCATIONS_PER_LOT {
            return Err(EngineError::LimitExceeded("too many allocations on lot"));
        }

        let allocation = Allocation {
            id,
            vehicle_id,
            lot_id,
            range,
        };
        if let Err(e) = check_no_conflict(&allocation, &lot.schedule, &vehicle.schedule) {
            record_conflict(&e);
            return Err(e);
        }

        self.wal_append(&Event::allocation_created(&allocation)).await?;
        self.store.record_allocation(lot, &mut vehicle, allocation);
        metrics::gauge!(observability::ALLOCATIONS_ACTIVE)
            .set(self.store.allocation_count() as f64);
        info!(
            "allocated lot {} to {} for {range} ({id})",
            lot.lot.lot_number, vehicle.vehicle.number_plate
        );

        Ok(AllocationInfo::resolve(&allocation, &vehicle.vehicle, &lot.lot))
    }

    /// Move an allocation to `lot_id` and `[from, to]`. Only the target lot is
    /// checked for overlaps; the vehicle's other bookings are not re-checked.
    pub async fn update_allocation(
        &self,
        id: Ulid,
        lot_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AllocationInfo, EngineError> {
        if !self.store.contains_allocation(&id) {
            return Err(EngineError::NotFound(id));
        }
        let range = validate_range(from, to)?;
        validate_booking(&range)?;
        if !self.store.contains_lot(&lot_id) {
            return Err(EngineError::NotFound(lot_id));
        }

        loop {
            let _gate = self.commit_gate.read().await;
            let current = self
                .store
                .get_allocation(&id)
                .ok_or(EngineError::NotFound(id))?;
            let mut lots = self.lock_lots(&[current.lot_id, lot_id]).await?;
            let mut vehicle = self.lock_vehicle(current.vehicle_id).await?;

            // Re-read under the locks: a concurrent update may have moved it.
            let stored = self
                .store
                .get_allocation(&id)
                .ok_or(EngineError::NotFound(id))?;
            if stored.lot_id != current.lot_id {
                continue;
            }

            let updated = Allocation {
                id,
                vehicle_id: stored.vehicle_id,
                lot_id,
                range,
            };
            let target = locked_lot(&mut lots, lot_id).ok_or(EngineError::NotFound(lot_id))?;
            if stored.lot_id != lot_id && target.schedule.len() >= MAX_ALLOCATIONS_PER_LOT {
                return Err(EngineError::LimitExceeded("too many allocations on lot"));
            }
            if let Err(e) = check_lot_free(&updated, &target.schedule) {
                record_conflict(&e);
                return Err(e);
            }

            self.wal_append(&Event::allocation_updated(&updated)).await?;
            let lot = if stored.lot_id == lot_id {
                let lot = locked_lot(&mut lots, lot_id).ok_or(EngineError::NotFound(lot_id))?;
                self.store.move_allocation(None, lot, &mut vehicle, updated);
                &lot.lot
            } else {
                let (leaving, target) = lot_pair(&mut lots, stored.lot_id);
                self.store
                    .move_allocation(Some(leaving), target, &mut vehicle, updated);
                &target.lot
            };
            info!("moved allocation {id} to lot {} for {range}", lot.lot_number);

            return Ok(AllocationInfo::resolve(&updated, &vehicle.vehicle, lot));
        }
    }

    /// Remove an allocation. `Ok(false)` when it does not exist.
    pub async fn delete_allocation(&self, id: Ulid) -> Result<bool, EngineError> {
        loop {
            let _gate = self.commit_gate.read().await;
            let Some(current) = self.store.get_allocation(&id) else {
                return Ok(false);
            };
            let mut lots = self.lock_lots(&[current.lot_id]).await?;
            let mut vehicle = self.lock_vehicle(current.vehicle_id).await?;

            let Some(stored) = self.store.get_allocation(&id) else {
                return Ok(false);
            };
            if stored.lot_id != current.lot_id {
                continue;
            }
            let lot = locked_lot(&mut lots, stored.lot_id)
                .ok_or(EngineError::NotFound(stored.lot_id))?;

            self.wal_append(&Event::AllocationDeleted { id }).await?;
            self.store.forget_allocation(lot, &mut vehicle, id);
            metrics::gauge!(observability::ALLOCATIONS_ACTIVE)
                .set(self.store.allocation_count() as f64);
            info!("released allocation {id}");
            return Ok(true);
        }
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event set recreating current state:
    /// lots, then vehicles, then live allocations.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: every in-flight mutation has been acknowledged and
        // none can start until the new log is in place.
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::with_capacity(
            self.store.lot_count() + self.store.vehicle_count() + self.store.allocation_count(),
        );
        for id in self.store.lot_ids() {
            let Some(lot) = self.store.get_lot(&id) else {
                continue;
            };
            let guard = lot.read().await;
            events.push(Event::LotCreated {
                id: guard.lot.id,
                lot_number: guard.lot.lot_number.clone(),
                location: guard.lot.location.clone(),
            });
        }
        for id in self.store.vehicle_ids() {
            let Some(vehicle) = self.store.get_vehicle(&id) else {
                continue;
            };
            let guard = vehicle.read().await;
            let v = &guard.vehicle;
            events.push(Event::VehicleRegistered {
                id: v.id,
                user_id: v.user_id,
                kind: v.kind.clone(),
                number_plate: v.number_plate.clone(),
                make: v.make.clone(),
                color: v.color.clone(),
            });
        }
        let mut allocations = self.store.allocation_snapshot();
        allocations.sort_by_key(|a| a.id);
        events.extend(allocations.iter().map(Event::allocation_created));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
