//! Hard bounds on tenant state. Exceeding any of these is a
//! `LimitExceeded` error, never a silent truncation.

/// Hotels per tenant engine.
pub const MAX_HOTELS_PER_TENANT: usize = 4_096;

/// Rooms per hotel.
pub const MAX_ROOMS_PER_HOTEL: usize = 10_000;

/// Declared bed capacity of a single room (and thus beds per room).
pub const MAX_BEDS_PER_ROOM: u32 = 64;

/// Assignments per hotel, live or terminal.
pub const MAX_ASSIGNMENTS_PER_HOTEL: usize = 100_000;

/// Hotel name / address length in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Room number length in bytes.
pub const MAX_ROOM_NUMBER_LEN: usize = 32;

/// Free-text room notes length in bytes.
pub const MAX_NOTES_LEN: usize = 4_096;

/// Lazily created tenant engines per process.
pub const MAX_TENANTS: usize = 1_024;

/// Tenant (database) name length in bytes.
pub const MAX_TENANT_NAME_LEN: usize = 256;
