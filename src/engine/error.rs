use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// `to` before `from`, or a required date missing.
    InvalidDateRange,
    SlotAlreadyBooked {
        conflicting: Ulid,
        on_update: bool,
    },
    VehicleAlreadyAllocated(Ulid),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    PersistenceFailure(String),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::SlotAlreadyBooked { .. }
                | EngineError::VehicleAlreadyAllocated(_)
                | EngineError::AlreadyExists(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDateRange => {
                write!(f, "invalid date range: end date must be on or after start date")
            }
            EngineError::SlotAlreadyBooked {
                conflicting,
                on_update: false,
            } => write!(
                f,
                "selected slot is already booked for the given time range (allocation {conflicting})"
            ),
            EngineError::SlotAlreadyBooked {
                conflicting,
                on_update: true,
            } => write!(
                f,
                "cannot extend: selected slot is already booked during that time (allocation {conflicting})"
            ),
            EngineError::VehicleAlreadyAllocated(id) => write!(
                f,
                "vehicle is already allocated to another parking lot during the selected period (allocation {id})"
            ),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PersistenceFailure(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
