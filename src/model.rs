use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Closed interval of whole calendar days `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Returns `None` when `to` is before `from`.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    /// Number of booked days; a same-day range counts as 1.
    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    /// Inclusive-bounds intersection: touching on a single day is an overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.from <= other.to && self.to >= other.from
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from <= day && day <= self.to
    }

    /// First instant of the range (`from` at midnight).
    pub fn starts_at(&self) -> NaiveDateTime {
        self.from.and_time(NaiveTime::MIN)
    }

    /// Last instant of the range. The upper bound is normalized to the end of
    /// the `to` day so instant comparisons keep inclusive-day semantics.
    pub fn ends_at(&self) -> NaiveDateTime {
        let end_of_day =
            NaiveTime::from_hms_milli_opt(23, 59, 59, 999).expect("23:59:59.999 is a valid time");
        self.to.and_time(end_of_day)
    }

    pub fn covers(&self, instant: NaiveDateTime) -> bool {
        self.starts_at() <= instant && instant <= self.ends_at()
    }

    /// The lot is taken on `today` by this range.
    pub fn is_occupied_on(&self, today: NaiveDate) -> bool {
        self.contains(today)
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.to < today
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingLot {
    pub id: Ulid,
    /// Display code such as `A01`.
    pub lot_number: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    /// Owner reference. Users live outside this service.
    pub user_id: Ulid,
    pub kind: String,
    pub number_plate: String,
    pub make: String,
    pub color: Option<String>,
}

/// A booking of one lot by one vehicle for an inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub lot_id: Ulid,
    pub range: DateRange,
}

/// Allocations held by a single lot or a single vehicle, sorted by `range.from`.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    allocations: Vec<Allocation>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter()
    }

    pub fn get(&self, id: Ulid) -> Option<&Allocation> {
        self.allocations.iter().find(|a| a.id == id)
    }

    /// Insert keeping the sort order by `range.from`.
    pub fn insert(&mut self, allocation: Allocation) {
        let pos = self
            .allocations
            .partition_point(|a| a.range.from <= allocation.range.from);
        self.allocations.insert(pos, allocation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Allocation> {
        let pos = self.allocations.iter().position(|a| a.id == id)?;
        Some(self.allocations.remove(pos))
    }

    /// Allocations whose range overlaps `query`. Binary search skips everything
    /// starting after `query.to`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Allocation> {
        let right_bound = self.allocations.partition_point(|a| a.range.from <= query.to);
        let from = query.from;
        self.allocations[..right_bound]
            .iter()
            .filter(move |a| a.range.to >= from)
    }
}

#[derive(Debug, Clone)]
pub struct LotState {
    pub lot: ParkingLot,
    pub schedule: Schedule,
}

impl LotState {
    pub fn new(lot: ParkingLot) -> Self {
        Self {
            lot,
            schedule: Schedule::new(),
        }
    }

    pub fn is_occupied_on(&self, today: NaiveDate) -> bool {
        self.schedule
            .overlapping(&DateRange::single_day(today))
            .next()
            .is_some()
    }
}

#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle: Vehicle,
    pub schedule: Schedule,
}

impl VehicleState {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            schedule: Schedule::new(),
        }
    }
}

/// WAL record format. Variants are flat; no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LotCreated {
        id: Ulid,
        lot_number: String,
        location: Option<String>,
    },
    VehicleRegistered {
        id: Ulid,
        user_id: Ulid,
        kind: String,
        number_plate: String,
        make: String,
        color: Option<String>,
    },
    AllocationCreated {
        id: Ulid,
        vehicle_id: Ulid,
        lot_id: Ulid,
        range: DateRange,
    },
    AllocationUpdated {
        id: Ulid,
        vehicle_id: Ulid,
        lot_id: Ulid,
        range: DateRange,
    },
    AllocationDeleted {
        id: Ulid,
    },
}

impl Event {
    pub fn allocation_created(a: &Allocation) -> Self {
        Event::AllocationCreated {
            id: a.id,
            vehicle_id: a.vehicle_id,
            lot_id: a.lot_id,
            range: a.range,
        }
    }

    pub fn allocation_updated(a: &Allocation) -> Self {
        Event::AllocationUpdated {
            id: a.id,
            vehicle_id: a.vehicle_id,
            lot_id: a.lot_id,
            range: a.range,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// An allocation resolved against its vehicle and lot for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationInfo {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub lot_id: Ulid,
    pub number_plate: String,
    pub lot_number: String,
    pub lot_location: Option<String>,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub allocated_days: i64,
}

impl AllocationInfo {
    pub fn resolve(allocation: &Allocation, vehicle: &Vehicle, lot: &ParkingLot) -> Self {
        Self {
            id: allocation.id,
            vehicle_id: allocation.vehicle_id,
            lot_id: allocation.lot_id,
            number_plate: vehicle.number_plate.clone(),
            lot_number: lot.lot_number.clone(),
            lot_location: lot.location.clone(),
            from: allocation.range.from,
            to: allocation.range.to,
            allocated_days: allocation.range.days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotInfo {
    pub id: Ulid,
    pub lot_number: String,
    pub location: Option<String>,
    pub is_occupied: bool,
}
