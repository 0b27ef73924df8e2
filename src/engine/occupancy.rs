//! Read-side queries: listings with derived bed occupancy, and the per-hotel
//! occupancy report. Purely derived — nothing here mutates state, so every
//! call runs under a read lock and is safe to issue concurrently with writers.

use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn list_hotels(&self) -> Vec<HotelInfo> {
        // Clone the Arcs out first so no map shard is held across an await.
        let states: Vec<_> = self.hotels.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(states.len());
        for hs in states {
            let guard = hs.read().await;
            let mut room_types: BTreeMap<RoomType, u32> = BTreeMap::new();
            for room in guard.rooms.values() {
                *room_types.entry(room.room_type).or_default() += 1;
            }
            let mut bed_types: BTreeMap<BedType, u32> = BTreeMap::new();
            for bed in guard.beds.values() {
                *bed_types.entry(bed.bed_type).or_default() += 1;
            }
            infos.push(HotelInfo {
                id: guard.id,
                event_id: guard.event_id,
                name: guard.name.clone(),
                address: guard.address.clone(),
                // Recomputed on every read — never independently edited,
                // so it always equals the sum of the bed-type counts.
                total_beds: guard.beds.len() as u32,
                occupied_beds: guard.claimed_bed_count() as u32,
                room_types,
                bed_types,
            });
        }
        infos
    }

    pub async fn list_rooms(&self, hotel_id: Ulid) -> Result<Vec<RoomInfo>, EngineError> {
        let hs = match self.get_hotel(&hotel_id) {
            Some(hs) => hs,
            None => return Ok(vec![]),
        };
        let guard = hs.read().await;
        Ok(guard
            .rooms
            .values()
            .map(|room| RoomInfo {
                id: room.id,
                hotel_id,
                number: room.number.clone(),
                room_type: room.room_type,
                capacity: room.capacity,
                default_bed_type: room.default_bed_type,
                notes: room.notes.clone(),
                status: room.status,
                bed_count: guard.bed_count_in_room(room.id) as u32,
            })
            .collect())
    }

    /// Beds of one hotel, optionally narrowed to one room. The status column
    /// is the claims projection, never a stored flag.
    pub async fn list_beds(
        &self,
        hotel_id: Ulid,
        room_id: Option<Ulid>,
    ) -> Result<Vec<BedInfo>, EngineError> {
        let hs = match self.get_hotel(&hotel_id) {
            Some(hs) => hs,
            None => return Ok(vec![]),
        };
        let guard = hs.read().await;
        Ok(guard
            .beds
            .values()
            .filter(|bed| room_id.is_none_or(|rid| bed.room_id == rid))
            .map(|bed| BedInfo {
                id: bed.id,
                hotel_id,
                room_id: bed.room_id,
                bed_type: bed.bed_type,
                status: guard.bed_status(bed.id),
            })
            .collect())
    }

    pub async fn list_assignments(&self, hotel_id: Ulid) -> Result<Vec<AssignmentInfo>, EngineError> {
        let hs = match self.get_hotel(&hotel_id) {
            Some(hs) => hs,
            None => return Ok(vec![]),
        };
        let guard = hs.read().await;
        Ok(guard
            .assignments
            .values()
            .map(|a| AssignmentInfo {
                id: a.id,
                hotel_id,
                participant_id: a.participant_id,
                room_id: a.room_id,
                bed_id: a.bed_id,
                event_id: a.event_id,
                preferred_bed_type: a.preferred_bed_type,
                check_in: a.check_in,
                check_out: a.check_out,
                status: a.status,
            })
            .collect())
    }

    /// Capacity utilization of one hotel, optionally narrowed to assignments
    /// of one event. One bed is one unit of capacity; a hotel with no beds
    /// reports 0% occupancy.
    pub async fn occupancy_for_hotel(
        &self,
        hotel_id: Ulid,
        event_id: Option<Ulid>,
    ) -> Result<OccupancyReport, EngineError> {
        let hs = self
            .get_hotel(&hotel_id)
            .ok_or(EngineError::NotFound(hotel_id))?;
        let guard = hs.read().await;

        let in_event =
            |a: &Assignment| event_id.is_none() || a.event_id == event_id;

        let total_beds = guard.beds.len() as u32;
        let assigned = guard.live_assignments().filter(|a| in_event(a)).count() as u32;
        let available = total_beds.saturating_sub(assigned);
        let occupancy_pct = if total_beds == 0 {
            0.0
        } else {
            f64::from(assigned) / f64::from(total_beds) * 100.0
        };

        let mut room_types: BTreeMap<RoomType, u32> = BTreeMap::new();
        for room in guard.rooms.values() {
            *room_types.entry(room.room_type).or_default() += 1;
        }

        let mut bed_types: BTreeMap<BedType, BedTypeOccupancy> = BTreeMap::new();
        for bed in guard.beds.values() {
            bed_types
                .entry(bed.bed_type)
                .or_insert(BedTypeOccupancy { total: 0, used: 0, available: 0 })
                .total += 1;
        }
        // "Used" is a loose join on the declared preference from the
        // participant profile, not on the bed reference.
        for a in guard.live_assignments().filter(|a| in_event(a)) {
            if let Some(pref) = a.preferred_bed_type
                && let Some(slot) = bed_types.get_mut(&pref) {
                    slot.used += 1;
                }
        }
        for slot in bed_types.values_mut() {
            slot.available = slot.total.saturating_sub(slot.used);
        }

        Ok(OccupancyReport {
            hotel_id,
            total_rooms: guard.rooms.len() as u32,
            total_beds,
            assigned,
            available,
            occupancy_pct,
            room_types,
            bed_types,
        })
    }
}
