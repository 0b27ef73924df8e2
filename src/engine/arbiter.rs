//! Write-side operations: hotel and room lifecycle, and assignment
//! arbitration. Every check-then-act sequence for a hotel runs under that
//! hotel's single write lock, so an availability check and the claim it
//! guards cannot interleave with another writer.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// The one bed-availability primitive. Used identically by create and update,
/// so the two paths cannot diverge. `exclude` is the assignment doing the
/// asking — holding your own bed is never a conflict.
fn check_bed_claim(hs: &HotelState, bed_id: Ulid, exclude: Ulid) -> Result<(), EngineError> {
    if let Some(holder) = hs.claim_of(bed_id)
        && holder != exclude {
            return Err(EngineError::Conflict(holder));
        }
    Ok(())
}

/// Bed must exist and, when a room is also named, belong to it.
fn check_bed_room(
    hs: &HotelState,
    bed_id: Ulid,
    room_id: Option<Ulid>,
) -> Result<Ulid, EngineError> {
    let bed = hs.beds.get(&bed_id).ok_or(EngineError::NotFound(bed_id))?;
    if let Some(rid) = room_id
        && bed.room_id != rid {
            return Err(EngineError::RoomMismatch { bed_id, room_id: rid });
        }
    Ok(bed.room_id)
}

/// Partial update for a room. `None` leaves the field untouched; the nested
/// `Option` carries an explicit SET ... = NULL.
#[derive(Debug, Default, Clone)]
pub struct RoomPatch {
    pub number: Option<String>,
    pub room_type: Option<RoomType>,
    pub capacity: Option<u32>,
    pub default_bed_type: Option<Option<BedType>>,
    pub notes: Option<Option<String>>,
    pub status: Option<RoomStatus>,
}

/// Partial update for an assignment, same nesting convention as [`RoomPatch`].
#[derive(Debug, Default, Clone)]
pub struct AssignmentPatch {
    pub participant_id: Option<Ulid>,
    pub room_id: Option<Option<Ulid>>,
    pub bed_id: Option<Option<Ulid>>,
    pub event_id: Option<Option<Ulid>>,
    pub preferred_bed_type: Option<Option<BedType>>,
    pub check_in: Option<Option<Ms>>,
    pub check_out: Option<Option<Ms>>,
    pub status: Option<AssignmentStatus>,
}

impl Engine {
    pub async fn create_hotel(
        &self,
        id: Ulid,
        event_id: Ulid,
        name: String,
        address: Option<String>,
    ) -> Result<(), EngineError> {
        if self.hotels.len() >= MAX_HOTELS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many hotels"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("hotel name too long"));
        }
        if let Some(ref a) = address
            && a.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("hotel address too long"));
            }
        if self.hotels.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::HotelCreated {
            id,
            event_id,
            name: name.clone(),
            address: address.clone(),
        };
        self.wal_append(&event).await?;
        let hs = HotelState::new(id, event_id, name, address);
        self.hotels.insert(id, Arc::new(RwLock::new(hs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_hotel(
        &self,
        id: Ulid,
        name: Option<String>,
        address: Option<Option<String>>,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("hotel name too long"));
            }
        if let Some(Some(ref a)) = address
            && a.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("hotel address too long"));
            }
        let hs = self.get_hotel(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = hs.write().await;

        let event = Event::HotelUpdated {
            id,
            name: name.unwrap_or_else(|| guard.name.clone()),
            address: address.unwrap_or_else(|| guard.address.clone()),
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Refused while the hotel still has rooms — inventory must be emptied
    /// through explicit operator action, never cascaded.
    pub async fn delete_hotel(&self, id: Ulid) -> Result<(), EngineError> {
        let hs = self.get_hotel(&id).ok_or(EngineError::NotFound(id))?;
        let guard = hs.read().await;
        if !guard.rooms.is_empty() {
            return Err(EngineError::HasRooms(id));
        }
        drop(guard);

        let event = Event::HotelDeleted { id };
        self.wal_append(&event).await?;
        self.hotels.remove(&id);
        self.notify.send(id, &event);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_room(
        &self,
        id: Ulid,
        hotel_id: Ulid,
        number: String,
        room_type: RoomType,
        capacity: u32,
        default_bed_type: Option<BedType>,
        notes: Option<String>,
        status: RoomStatus,
    ) -> Result<(), EngineError> {
        validate_room_fields(&number, capacity, notes.as_deref())?;
        let hs = self
            .get_hotel(&hotel_id)
            .ok_or(EngineError::NotFound(hotel_id))?;
        let mut guard = hs.write().await;
        if guard.rooms.len() >= MAX_ROOMS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many rooms in hotel"));
        }
        if guard.rooms.contains_key(&id) || self.entity_to_hotel.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.room_by_number(&number).is_some() {
            return Err(EngineError::DuplicateRoomNumber(number));
        }

        let event = Event::RoomCreated {
            id,
            hotel_id,
            number,
            room_type,
            capacity,
            default_bed_type,
            notes,
            status,
        };
        self.persist_and_apply(hotel_id, &mut guard, &event).await?;

        // The room is committed; materialize its beds. A WAL failure below
        // leaves the room standing short of beds, and the next update pass
        // tops it up.
        self.sync_room_beds(hotel_id, &mut guard, id, false).await
    }

    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Ulid, EngineError> {
        let (hotel_id, mut guard) = self.resolve_entity_write(&id).await?;
        let old = guard.rooms.get(&id).ok_or(EngineError::NotFound(id))?.clone();

        let number = patch.number.unwrap_or_else(|| old.number.clone());
        let capacity = patch.capacity.unwrap_or(old.capacity);
        let notes = patch.notes.unwrap_or_else(|| old.notes.clone());
        let default_bed_type = patch.default_bed_type.unwrap_or(old.default_bed_type);
        validate_room_fields(&number, capacity, notes.as_deref())?;

        if number.to_lowercase() != old.number.to_lowercase()
            && guard.room_by_number(&number).is_some() {
                return Err(EngineError::DuplicateRoomNumber(number));
            }

        // Retype fires only on an explicit change of the default, not on
        // every update that happens to mention it.
        let retype_requested =
            default_bed_type.is_some() && default_bed_type != old.default_bed_type;

        let event = Event::RoomUpdated {
            id,
            hotel_id,
            number,
            room_type: patch.room_type.unwrap_or(old.room_type),
            capacity,
            default_bed_type,
            notes,
            status: patch.status.unwrap_or(old.status),
        };
        self.persist_and_apply(hotel_id, &mut guard, &event).await?;
        self.sync_room_beds(hotel_id, &mut guard, id, retype_requested)
            .await?;
        Ok(hotel_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_assignment(
        &self,
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
    ) -> Result<(), EngineError> {
        let hs = self
            .get_hotel(&hotel_id)
            .ok_or(EngineError::NotFound(hotel_id))?;
        let mut guard = hs.write().await;
        if guard.assignments.len() >= MAX_ASSIGNMENTS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many assignments in hotel"));
        }
        if guard.assignments.contains_key(&id) || self.entity_to_hotel.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(rid) = room_id
            && !guard.rooms.contains_key(&rid) {
                return Err(EngineError::NotFound(rid));
            }

        // Room follows the bed when only the bed is named.
        let mut room_id = room_id;
        if let Some(bid) = bed_id {
            let bed_room = check_bed_room(&guard, bid, room_id)?;
            room_id = Some(bed_room);
            if !status.is_terminal() {
                check_bed_claim(&guard, bid, id)?;
            }
        }

        let event = Event::AssignmentCreated {
            id,
            hotel_id,
            participant_id,
            room_id,
            bed_id,
            event_id,
            preferred_bed_type,
            check_in,
            check_out,
            status,
        };
        self.persist_and_apply(hotel_id, &mut guard, &event).await
    }

    /// Patch an assignment. Moving to another bed releases the old claim and
    /// takes the new one in the same critical section; an occupied target bed
    /// fails the whole update with `Conflict` and the old claim stands.
    pub async fn update_assignment(
        &self,
        id: Ulid,
        patch: AssignmentPatch,
    ) -> Result<Ulid, EngineError> {
        let (hotel_id, mut guard) = self.resolve_entity_write(&id).await?;
        let old = guard
            .assignments
            .get(&id)
            .ok_or(EngineError::NotFound(id))?
            .clone();

        let status = patch.status.unwrap_or(old.status);
        if !old.status.can_transition(status) {
            return Err(EngineError::InvalidTransition {
                from: old.status,
                to: status,
            });
        }

        let mut room_id = patch.room_id.unwrap_or(old.room_id);
        let bed_id = patch.bed_id.unwrap_or(old.bed_id);

        if let Some(rid) = room_id
            && !guard.rooms.contains_key(&rid) {
                return Err(EngineError::NotFound(rid));
            }
        if let Some(bid) = bed_id {
            let bed_room = check_bed_room(&guard, bid, room_id)?;
            room_id = Some(bed_room);
            if !status.is_terminal() {
                check_bed_claim(&guard, bid, id)?;
            }
        }

        let event = Event::AssignmentUpdated {
            id,
            hotel_id,
            participant_id: patch.participant_id.unwrap_or(old.participant_id),
            room_id,
            bed_id,
            event_id: patch.event_id.unwrap_or(old.event_id),
            preferred_bed_type: patch.preferred_bed_type.unwrap_or(old.preferred_bed_type),
            check_in: patch.check_in.unwrap_or(old.check_in),
            check_out: patch.check_out.unwrap_or(old.check_out),
            status,
        };
        self.persist_and_apply(hotel_id, &mut guard, &event).await?;
        Ok(hotel_id)
    }

    /// Delete an assignment, releasing its bed if held.
    pub async fn remove_assignment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (hotel_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.assignments.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::AssignmentDeleted { id, hotel_id };
        self.persist_and_apply(hotel_id, &mut guard, &event).await?;
        Ok(hotel_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        // Wait for every hotel's read lock: a skipped hotel would be missing
        // from the rewritten WAL and gone for good on the next replay.
        let hotel_ids: Vec<Ulid> = self.hotels.iter().map(|e| *e.key()).collect();
        for id in hotel_ids {
            let hs = match self.hotels.get(&id) {
                Some(e) => e.value().clone(),
                None => continue,
            };
            let guard = hs.read().await;
            emit_hotel(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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

fn validate_room_fields(
    number: &str,
    capacity: u32,
    notes: Option<&str>,
) -> Result<(), EngineError> {
    if number.is_empty() || number.len() > MAX_ROOM_NUMBER_LEN {
        return Err(EngineError::LimitExceeded("room number length"));
    }
    if capacity == 0 || capacity > MAX_BEDS_PER_ROOM {
        return Err(EngineError::InvalidCapacity(capacity));
    }
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("room notes too long"));
        }
    Ok(())
}

/// Minimal event stream recreating one hotel: the hotel, its rooms, the beds
/// grouped per room and type, then every assignment (claims are rebuilt by
/// replay from the live ones).
fn emit_hotel(hs: &HotelState, events: &mut Vec<Event>) {
    events.push(Event::HotelCreated {
        id: hs.id,
        event_id: hs.event_id,
        name: hs.name.clone(),
        address: hs.address.clone(),
    });

    for room in hs.rooms.values() {
        events.push(Event::RoomCreated {
            id: room.id,
            hotel_id: hs.id,
            number: room.number.clone(),
            room_type: room.room_type,
            capacity: room.capacity,
            default_bed_type: room.default_bed_type,
            notes: room.notes.clone(),
            status: room.status,
        });
    }

    let mut grouped: BTreeMap<(Ulid, BedType), Vec<Ulid>> = BTreeMap::new();
    for bed in hs.beds.values() {
        grouped.entry((bed.room_id, bed.bed_type)).or_default().push(bed.id);
    }
    for ((room_id, bed_type), bed_ids) in grouped {
        events.push(Event::BedsProvisioned {
            room_id,
            hotel_id: hs.id,
            bed_ids,
            bed_type,
        });
    }

    for a in hs.assignments.values() {
        events.push(Event::AssignmentCreated {
            id: a.id,
            hotel_id: hs.id,
            participant_id: a.participant_id,
            room_id: a.room_id,
            bed_id: a.bed_id,
            event_id: a.event_id,
            preferred_bed_type: a.preferred_bed_type,
            check_in: a.check_in,
            check_out: a.check_out,
            status: a.status,
        });
    }
}
