mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{available_lots, booked_lot_ids, overlapping_allocations};
pub use conflict::{lot_conflict, today, vehicle_conflict};
pub use error::EngineError;
pub use store::{IdReservation, InMemoryStore, SharedLotState, SharedVehicleState};

use std::io;
use std::path::PathBuf;

use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Appends queued while a flush is in
/// progress are written together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let result = wal.append_batch(batch.iter().map(|(event, _)| event));

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Parking allocation engine: the in-memory store plus its write-ahead log.
///
/// Lock order for every mutation: commit gate (shared), then lot schedules
/// sorted by id, then the vehicle schedule. Compaction takes the gate
/// exclusively so no append can slip between its snapshot and the file swap.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) commit_gate: RwLock<()>,
    /// Serializes lot and vehicle registration so duplicate and limit checks hold.
    pub(super) registry: Mutex<()>,
}

impl Engine {
    /// Replay the WAL at `wal_path`, cut any corrupt tail, and start its
    /// writer task. Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            registry: Mutex::new(()),
        };
        for event in &events {
            engine.replay_event(event);
        }
        metrics::gauge!(crate::observability::ALLOCATIONS_ACTIVE)
            .set(engine.store.allocation_count() as f64);
        Ok(engine)
    }

    /// Apply a replayed event. We are the sole owner of every lock here, so
    /// `try_write` always succeeds; blocking variants would panic inside a
    /// runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::LotCreated {
                id,
                lot_number,
                location,
            } => self.store.insert_lot(ParkingLot {
                id: *id,
                lot_number: lot_number.clone(),
                location: location.clone(),
            }),
            Event::VehicleRegistered {
                id,
                user_id,
                kind,
                number_plate,
                make,
                color,
            } => self.store.insert_vehicle(Vehicle {
                id: *id,
                user_id: *user_id,
                kind: kind.clone(),
                number_plate: number_plate.clone(),
                make: make.clone(),
                color: color.clone(),
            }),
            Event::AllocationCreated {
                id,
                vehicle_id,
                lot_id,
                range,
            } => {
                let (Some(lot), Some(vehicle)) =
                    (self.store.get_lot(lot_id), self.store.get_vehicle(vehicle_id))
                else {
                    warn!("replay: allocation {id} references a missing lot or vehicle");
                    return;
                };
                let mut lot = lot.try_write().expect("replay: uncontended write");
                let mut vehicle = vehicle.try_write().expect("replay: uncontended write");
                let allocation = Allocation {
                    id: *id,
                    vehicle_id: *vehicle_id,
                    lot_id: *lot_id,
                    range: *range,
                };
                self.store.record_allocation(&mut lot, &mut vehicle, allocation);
            }
            Event::AllocationUpdated {
                id,
                vehicle_id,
                lot_id,
                range,
            } => {
                let Some(previous) = self.store.get_allocation(id) else {
                    warn!("replay: update for unknown allocation {id}");
                    return;
                };
                let (Some(old_lot), Some(new_lot), Some(vehicle)) = (
                    self.store.get_lot(&previous.lot_id),
                    self.store.get_lot(lot_id),
                    self.store.get_vehicle(vehicle_id),
                ) else {
                    warn!("replay: allocation {id} references a missing lot or vehicle");
                    return;
                };
                let allocation = Allocation {
                    id: *id,
                    vehicle_id: *vehicle_id,
                    lot_id: *lot_id,
                    range: *range,
                };
                let mut vehicle = vehicle.try_write().expect("replay: uncontended write");
                let mut new_lot = new_lot.try_write().expect("replay: uncontended write");
                if previous.lot_id == *lot_id {
                    self.store
                        .move_allocation(None, &mut new_lot, &mut vehicle, allocation);
                } else {
                    let mut old_lot = old_lot.try_write().expect("replay: uncontended write");
                    self.store.move_allocation(
                        Some(&mut old_lot),
                        &mut new_lot,
                        &mut vehicle,
                        allocation,
                    );
                }
            }
            Event::AllocationDeleted { id } => {
                let Some(previous) = self.store.get_allocation(id) else {
                    return;
                };
                let (Some(lot), Some(vehicle)) = (
                    self.store.get_lot(&previous.lot_id),
                    self.store.get_vehicle(&previous.vehicle_id),
                ) else {
                    return;
                };
                let mut lot = lot.try_write().expect("replay: uncontended write");
                let mut vehicle = vehicle.try_write().expect("replay: uncontended write");
                self.store.forget_allocation(&mut lot, &mut vehicle, *id);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let result: Result<(), EngineError> = async {
            self.wal_tx
                .send(WalCommand::Append {
                    event: event.clone(),
                    response: tx,
                })
                .await
                .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
            rx.await
                .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
                .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
        }
        .await;
        if let Err(e) = &result {
            tracing::error!("WAL append failed: {e}");
        }
        result
    }

    /// Write-lock the given lots in id order. Duplicates are locked once.
    pub(super) async fn lock_lots(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<(Ulid, OwnedRwLockWriteGuard<LotState>)>, EngineError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lot = self.store.get_lot(&id).ok_or(EngineError::NotFound(id))?;
            guards.push((id, lot.write_owned().await));
        }
        Ok(guards)
    }

    pub(super) async fn lock_vehicle(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VehicleState>, EngineError> {
        let vehicle = self.store.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        Ok(vehicle.write_owned().await)
    }

    pub fn allocation_count(&self) -> usize {
        self.store.allocation_count()
    }
}

/// Split two locked lots into `(leaving, target)` mutable borrows.
pub(super) fn lot_pair(
    lots: &mut [(Ulid, OwnedRwLockWriteGuard<LotState>)],
    leaving: Ulid,
) -> (&mut LotState, &mut LotState) {
    let (head, tail) = lots.split_at_mut(1);
    let head_is_leaving = head[0].0 == leaving;
    let first: &mut LotState = &mut head[0].1;
    let second: &mut LotState = &mut tail[0].1;
    if head_is_leaving {
        (first, second)
    } else {
        (second, first)
    }
}

/// Find a locked lot by id.
pub(super) fn locked_lot(
    lots: &mut [(Ulid, OwnedRwLockWriteGuard<LotState>)],
    id: Ulid,
) -> Option<&mut LotState> {
    lots.iter_mut()
        .find(|(lot_id, _)| *lot_id == id)
        .map(|(_, guard)| &mut **guard)
}
