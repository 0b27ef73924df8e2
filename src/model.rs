use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Declared layout of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomType {
    Single,
    Double,
    Triple,
    Suite,
}

impl RoomType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SINGLE" => Some(Self::Single),
            "DOUBLE" => Some(Self::Double),
            "TRIPLE" => Some(Self::Triple),
            "SUITE" => Some(Self::Suite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "SINGLE",
            Self::Double => "DOUBLE",
            Self::Triple => "TRIPLE",
            Self::Suite => "SUITE",
        }
    }
}

impl std::fmt::Display for RoomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical bed size. Rooms carry a default; provisioned beds inherit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BedType {
    Single,
    Double,
    Queen,
    King,
}

impl BedType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SINGLE" => Some(Self::Single),
            "DOUBLE" => Some(Self::Double),
            "QUEEN" => Some(Self::Queen),
            "KING" => Some(Self::King),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "SINGLE",
            Self::Double => "DOUBLE",
            Self::Queen => "QUEEN",
            Self::King => "KING",
        }
    }
}

impl std::fmt::Display for BedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational state of a room, set by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomStatus {
    Available,
    Maintenance,
    Closed,
}

impl RoomStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AVAILABLE" => Some(Self::Available),
            "MAINTENANCE" => Some(Self::Maintenance),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Maintenance => "MAINTENANCE",
            Self::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an assignment. CHECKOUT and CANCELLED are terminal; only a
/// non-terminal assignment holds its bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssignmentStatus {
    Scheduled,
    Active,
    Checkout,
    Cancelled,
}

impl AssignmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => Some(Self::Scheduled),
            "ACTIVE" => Some(Self::Active),
            "CHECKOUT" => Some(Self::Checkout),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Active => "ACTIVE",
            Self::Checkout => "CHECKOUT",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Checkout | Self::Cancelled)
    }

    /// Transition table: SCHEDULED→ACTIVE, SCHEDULED→CANCELLED,
    /// ACTIVE→CHECKOUT, ACTIVE→CANCELLED. Self-transitions are allowed so
    /// repeated patches stay idempotent.
    pub fn can_transition(self, to: Self) -> bool {
        use AssignmentStatus::*;
        matches!(
            (self, to),
            (Scheduled, Active)
                | (Scheduled, Cancelled)
                | (Active, Checkout)
                | (Active, Cancelled)
        ) || self == to
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived occupancy of a bed. Never stored — always a projection from the
/// live claims map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BedStatus {
    Available,
    Occupied,
}

impl BedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Occupied => "OCCUPIED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub number: String,
    pub room_type: RoomType,
    /// Declared bed capacity. A floor once beds exist: increases provision,
    /// decreases never delete.
    pub capacity: u32,
    pub default_bed_type: Option<BedType>,
    pub notes: Option<String>,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bed {
    pub id: Ulid,
    pub room_id: Ulid,
    pub bed_type: BedType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub participant_id: Ulid,
    pub room_id: Option<Ulid>,
    pub bed_id: Option<Ulid>,
    /// Event affiliation of the participant, supplied by the caller at
    /// booking time. Used by the occupancy event filter.
    pub event_id: Option<Ulid>,
    /// Bed type declared on the participant's profile. Used by the loose
    /// bed-type join in the occupancy report.
    pub preferred_bed_type: Option<BedType>,
    pub check_in: Option<Ms>,
    pub check_out: Option<Ms>,
    pub status: AssignmentStatus,
}

impl Assignment {
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// One hotel aggregate: rooms, beds, assignments, and the claims projection.
/// All mutation happens under a single write lock on this struct, so an
/// availability check and the claim update it guards are one critical
/// section.
#[derive(Debug, Clone)]
pub struct HotelState {
    pub id: Ulid,
    pub event_id: Ulid,
    pub name: String,
    pub address: Option<String>,
    pub rooms: HashMap<Ulid, Room>,
    pub beds: HashMap<Ulid, Bed>,
    pub assignments: HashMap<Ulid, Assignment>,
    /// bed id → live assignment id. Maintained by event application only.
    bed_claims: HashMap<Ulid, Ulid>,
    /// lowercased room number → room id. Import matching is case-insensitive.
    room_numbers: HashMap<String, Ulid>,
}

impl HotelState {
    pub fn new(id: Ulid, event_id: Ulid, name: String, address: Option<String>) -> Self {
        Self {
            id,
            event_id,
            name,
            address,
            rooms: HashMap::new(),
            beds: HashMap::new(),
            assignments: HashMap::new(),
            bed_claims: HashMap::new(),
            room_numbers: HashMap::new(),
        }
    }

    pub fn insert_room(&mut self, room: Room) {
        self.room_numbers.insert(room.number.to_lowercase(), room.id);
        self.rooms.insert(room.id, room);
    }

    /// Replace a room, keeping the number index consistent.
    pub fn replace_room(&mut self, room: Room) {
        if let Some(old) = self.rooms.get(&room.id)
            && old.number.to_lowercase() != room.number.to_lowercase() {
                self.room_numbers.remove(&old.number.to_lowercase());
            }
        self.insert_room(room);
    }

    pub fn room_by_number(&self, number: &str) -> Option<Ulid> {
        self.room_numbers.get(&number.to_lowercase()).copied()
    }

    pub fn bed_count_in_room(&self, room_id: Ulid) -> usize {
        self.beds.values().filter(|b| b.room_id == room_id).count()
    }

    pub fn bed_ids_in_room(&self, room_id: Ulid) -> Vec<Ulid> {
        self.beds
            .values()
            .filter(|b| b.room_id == room_id)
            .map(|b| b.id)
            .collect()
    }

    pub fn claim_of(&self, bed_id: Ulid) -> Option<Ulid> {
        self.bed_claims.get(&bed_id).copied()
    }

    pub fn bed_status(&self, bed_id: Ulid) -> BedStatus {
        if self.bed_claims.contains_key(&bed_id) {
            BedStatus::Occupied
        } else {
            BedStatus::Available
        }
    }

    pub fn claim(&mut self, bed_id: Ulid, assignment_id: Ulid) {
        self.bed_claims.insert(bed_id, assignment_id);
    }

    /// Drop the claim on `bed_id` if it is held by `assignment_id`.
    pub fn release(&mut self, bed_id: Ulid, assignment_id: Ulid) {
        if self.bed_claims.get(&bed_id) == Some(&assignment_id) {
            self.bed_claims.remove(&bed_id);
        }
    }

    pub fn live_assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.values().filter(|a| a.is_live())
    }

    /// Number of beds currently held by a live assignment.
    pub fn claimed_bed_count(&self) -> usize {
        self.bed_claims.len()
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelCreated {
        id: Ulid,
        event_id: Ulid,
        name: String,
        address: Option<String>,
    },
    HotelUpdated {
        id: Ulid,
        name: String,
        address: Option<String>,
    },
    HotelDeleted {
        id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        hotel_id: Ulid,
        number: String,
        room_type: RoomType,
        capacity: u32,
        default_bed_type: Option<BedType>,
        notes: Option<String>,
        status: RoomStatus,
    },
    /// Full post-patch state of the room.
    RoomUpdated {
        id: Ulid,
        hotel_id: Ulid,
        number: String,
        room_type: RoomType,
        capacity: u32,
        default_bed_type: Option<BedType>,
        notes: Option<String>,
        status: RoomStatus,
    },
    /// A batch of beds materialized by the inventory synchronizer.
    BedsProvisioned {
        room_id: Ulid,
        hotel_id: Ulid,
        bed_ids: Vec<Ulid>,
        bed_type: BedType,
    },
    /// All beds of a room switched to a new default bed type. Bed ids are
    /// preserved so live assignment references survive.
    BedsRetyped {
        room_id: Ulid,
        hotel_id: Ulid,
        bed_type: BedType,
    },
    AssignmentCreated {
        id: Ulid,
        hotel_id: Ulid,
        participant_id: Ulid,
        room_id: Option<Ulid>,
        bed_id: Option<Ulid>,
        event_id: Option<Ulid>,
        preferred_bed_type: Option<BedType>,
        check_in: Option<Ms>,
        check_out: Option<Ms>,
        status: AssignmentStatus,
    },
    /// Full post-patch state of the assignment.
    AssignmentUpdated {
        id: Ulid,
        hotel_id: Ulid,
        participant_id: Ulid,
        room_id: Option<Ulid>,
        bed_id: Option<Ulid>,
        event_id: Option<Ulid>,
        preferred_bed_type: Option<BedType>,
        check_in: Option<Ms>,
        check_out: Option<Ms>,
        status: AssignmentStatus,
    },
    AssignmentDeleted {
        id: Ulid,
        hotel_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotelInfo {
    pub id: Ulid,
    pub event_id: Ulid,
    pub name: String,
    pub address: Option<String>,
    /// Derived: always the sum of the bed-type counts.
    pub total_beds: u32,
    pub occupied_beds: u32,
    pub room_types: BTreeMap<RoomType, u32>,
    pub bed_types: BTreeMap<BedType, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub number: String,
    pub room_type: RoomType,
    pub capacity: u32,
    pub default_bed_type: Option<BedType>,
    pub notes: Option<String>,
    pub status: RoomStatus,
    pub bed_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BedInfo {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub room_id: Ulid,
    pub bed_type: BedType,
    pub status: BedStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentInfo {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub participant_id: Ulid,
    pub room_id: Option<Ulid>,
    pub bed_id: Option<Ulid>,
    pub event_id: Option<Ulid>,
    pub preferred_bed_type: Option<BedType>,
    pub check_in: Option<Ms>,
    pub check_out: Option<Ms>,
    pub status: AssignmentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BedTypeOccupancy {
    pub total: u32,
    pub used: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyReport {
    pub hotel_id: Ulid,
    pub total_rooms: u32,
    /// Denominator of the percentage: one bed is one unit of capacity.
    pub total_beds: u32,
    pub assigned: u32,
    pub available: u32,
    pub occupancy_pct: f64,
    pub room_types: BTreeMap<RoomType, u32>,
    pub bed_types: BTreeMap<BedType, BedTypeOccupancy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_parse_roundtrip() {
        for s in ["SINGLE", "DOUBLE", "TRIPLE", "SUITE"] {
            assert_eq!(RoomType::parse(s).unwrap().as_str(), s);
        }
        for s in ["SINGLE", "DOUBLE", "QUEEN", "KING"] {
            assert_eq!(BedType::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(BedType::parse("queen"), Some(BedType::Queen));
        assert_eq!(RoomType::parse("PENTHOUSE"), None);
    }

    #[test]
    fn status_transitions() {
        use AssignmentStatus::*;
        assert!(Scheduled.can_transition(Active));
        assert!(Scheduled.can_transition(Cancelled));
        assert!(Active.can_transition(Checkout));
        assert!(Active.can_transition(Cancelled));
        // Idempotent self-patch
        assert!(Active.can_transition(Active));
        // Terminal states are sinks
        assert!(!Checkout.can_transition(Active));
        assert!(!Cancelled.can_transition(Scheduled));
        // No skipping or going backwards
        assert!(!Active.can_transition(Scheduled));
        assert!(!Scheduled.can_transition(Checkout));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!AssignmentStatus::Scheduled.is_terminal());
        assert!(!AssignmentStatus::Active.is_terminal());
        assert!(AssignmentStatus::Checkout.is_terminal());
        assert!(AssignmentStatus::Cancelled.is_terminal());
    }

    fn room(id: Ulid, number: &str) -> Room {
        Room {
            id,
            number: number.to_string(),
            room_type: RoomType::Double,
            capacity: 2,
            default_bed_type: Some(BedType::Queen),
            notes: None,
            status: RoomStatus::Available,
        }
    }

    #[test]
    fn room_number_index_is_case_insensitive() {
        let mut hs = HotelState::new(Ulid::new(), Ulid::new(), "H".into(), None);
        let rid = Ulid::new();
        hs.insert_room(room(rid, "101-A"));
        assert_eq!(hs.room_by_number("101-a"), Some(rid));
        assert_eq!(hs.room_by_number("101-A"), Some(rid));
        assert_eq!(hs.room_by_number("102"), None);
    }

    #[test]
    fn replace_room_updates_number_index() {
        let mut hs = HotelState::new(Ulid::new(), Ulid::new(), "H".into(), None);
        let rid = Ulid::new();
        hs.insert_room(room(rid, "101"));
        hs.replace_room(room(rid, "201"));
        assert_eq!(hs.room_by_number("101"), None);
        assert_eq!(hs.room_by_number("201"), Some(rid));
    }

    #[test]
    fn bed_status_is_a_claims_projection() {
        let mut hs = HotelState::new(Ulid::new(), Ulid::new(), "H".into(), None);
        let bed = Ulid::new();
        let asg = Ulid::new();
        assert_eq!(hs.bed_status(bed), BedStatus::Available);
        hs.claim(bed, asg);
        assert_eq!(hs.bed_status(bed), BedStatus::Occupied);
        assert_eq!(hs.claim_of(bed), Some(asg));
        // Release by a different assignment is a no-op
        hs.release(bed, Ulid::new());
        assert_eq!(hs.bed_status(bed), BedStatus::Occupied);
        hs.release(bed, asg);
        assert_eq!(hs.bed_status(bed), BedStatus::Available);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomCreated {
            id: Ulid::new(),
            hotel_id: Ulid::new(),
            number: "101".into(),
            room_type: RoomType::Double,
            capacity: 3,
            default_bed_type: Some(BedType::Queen),
            notes: None,
            status: RoomStatus::Available,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn breakdown_maps_serialize_with_uppercase_keys() {
        let mut m = BTreeMap::new();
        m.insert(BedType::Queen, 3u32);
        m.insert(BedType::King, 1u32);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"QUEEN":3,"KING":1}"#);
    }
}
