use ulid::Ulid;

use crate::model::AssignmentStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Bed already held by the named live assignment.
    Conflict(Ulid),
    HasRooms(Ulid),
    DuplicateRoomNumber(String),
    InvalidTransition {
        from: AssignmentStatus,
        to: AssignmentStatus,
    },
    /// Bed does not belong to the room named on the assignment.
    RoomMismatch {
        bed_id: Ulid,
        room_id: Ulid,
    },
    InvalidCapacity(u32),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "bed already claimed by assignment: {id}"),
            EngineError::HasRooms(id) => {
                write!(f, "cannot delete hotel {id}: has rooms")
            }
            EngineError::DuplicateRoomNumber(number) => {
                write!(f, "room number already in use: {number}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::RoomMismatch { bed_id, room_id } => {
                write!(f, "bed {bed_id} does not belong to room {room_id}")
            }
            EngineError::InvalidCapacity(cap) => {
                write!(f, "invalid room capacity: {cap}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
