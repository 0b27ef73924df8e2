//! Inventory synchronizer: keeps a room's physical beds in step with its
//! declared capacity and default bed type.
//!
//! The planning step is a pure function so the policy is testable without an
//! engine; application happens under the owning hotel's write lock via
//! [`Engine::sync_room_beds`].

use ulid::Ulid;

use crate::model::{BedType, Event};

use super::{Engine, EngineError};
use crate::model::HotelState;

/// What a sync pass will do to one room. Both fields may be empty — the
/// synchronizer is idempotent and a repeated pass plans nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    /// Retype every existing bed in the room to this type. Only planned on an
    /// explicit default-bed-type change, never inferred from drift.
    pub retype: Option<BedType>,
    /// Number of new beds to materialize.
    pub provision: u32,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.retype.is_none() && self.provision == 0
    }
}

/// Compute the sync plan for a room.
///
/// - A room with no default bed type (or zero capacity) is manually
///   bed-managed: the whole pass is a no-op.
/// - Shortfall (`capacity > existing`) is topped up; surplus is never
///   deleted — capacity decreases leave the extra beds standing.
/// - `retype_requested` is true only when the caller explicitly changed the
///   room's default bed type. Beds already matching still "retype" (the event
///   is idempotent), but nothing is planned when there are no beds.
pub fn plan_bed_sync(
    capacity: u32,
    default_bed_type: Option<BedType>,
    existing: u32,
    retype_requested: bool,
) -> SyncPlan {
    let Some(bed_type) = default_bed_type else {
        return SyncPlan { retype: None, provision: 0 };
    };
    if capacity == 0 {
        return SyncPlan { retype: None, provision: 0 };
    }
    SyncPlan {
        retype: (retype_requested && existing > 0).then_some(bed_type),
        provision: capacity.saturating_sub(existing),
    }
}

impl Engine {
    /// Run one sync pass for `room_id` under an already-held hotel write
    /// lock. The room event that triggered the sync is already WAL-committed,
    /// so a WAL failure here leaves the room standing with its beds behind —
    /// the next pass over the same room completes the top-up.
    pub(super) async fn sync_room_beds(
        &self,
        hotel_id: Ulid,
        hs: &mut HotelState,
        room_id: Ulid,
        retype_requested: bool,
    ) -> Result<(), EngineError> {
        let room = hs.rooms.get(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let capacity = room.capacity;
        let default_bed_type = room.default_bed_type;
        let existing = hs.bed_count_in_room(room_id) as u32;

        let plan = plan_bed_sync(capacity, default_bed_type, existing, retype_requested);
        if plan.is_noop() {
            return Ok(());
        }

        if let Some(bed_type) = plan.retype {
            let event = Event::BedsRetyped {
                room_id,
                hotel_id,
                bed_type,
            };
            self.persist_and_apply(hotel_id, hs, &event).await?;
        }

        if plan.provision > 0
            && let Some(bed_type) = default_bed_type {
            let bed_ids: Vec<Ulid> = (0..plan.provision).map(|_| Ulid::new()).collect();
            let event = Event::BedsProvisioned {
                room_id,
                hotel_id,
                bed_ids,
                bed_type,
            };
            self.persist_and_apply(hotel_id, hs, &event).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tops_up_shortfall() {
        let plan = plan_bed_sync(3, Some(BedType::Queen), 0, false);
        assert_eq!(plan.retype, None);
        assert_eq!(plan.provision, 3);

        let plan = plan_bed_sync(5, Some(BedType::Queen), 2, false);
        assert_eq!(plan.provision, 3);
    }

    #[test]
    fn repeated_sync_is_noop() {
        let plan = plan_bed_sync(3, Some(BedType::Queen), 3, false);
        assert!(plan.is_noop());
    }

    #[test]
    fn capacity_decrease_never_deletes() {
        let plan = plan_bed_sync(2, Some(BedType::Queen), 5, false);
        assert!(plan.is_noop());
    }

    #[test]
    fn retype_only_when_requested() {
        // Drift between bed type and room default is not corrected on its own
        let plan = plan_bed_sync(3, Some(BedType::King), 3, false);
        assert!(plan.is_noop());

        let plan = plan_bed_sync(3, Some(BedType::King), 3, true);
        assert_eq!(plan.retype, Some(BedType::King));
        assert_eq!(plan.provision, 0);
    }

    #[test]
    fn retype_with_no_beds_plans_nothing_to_retype() {
        let plan = plan_bed_sync(2, Some(BedType::King), 0, true);
        assert_eq!(plan.retype, None);
        assert_eq!(plan.provision, 2);
    }

    #[test]
    fn retype_with_topup_plans_both() {
        let plan = plan_bed_sync(4, Some(BedType::Double), 2, true);
        assert_eq!(plan.retype, Some(BedType::Double));
        assert_eq!(plan.provision, 2);
    }

    #[test]
    fn no_default_type_means_manual_management() {
        // No default bed type — the room is manually bed-managed and the
        // synchronizer must not touch it at all.
        let plan = plan_bed_sync(3, None, 2, true);
        assert!(plan.is_noop());

        let plan = plan_bed_sync(3, None, 0, false);
        assert!(plan.is_noop());
    }
}
