mod arbiter;
mod error;
mod inventory;
mod occupancy;

pub use arbiter::{AssignmentPatch, RoomPatch};
pub use error::EngineError;
pub use inventory::{plan_bed_sync, SyncPlan};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedHotelState = Arc<RwLock<HotelState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub hotels: DashMap<Ulid, SharedHotelState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (room/bed/assignment) id → hotel id
    pub(super) entity_to_hotel: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a HotelState (no locking — caller holds the lock).
/// The claims projection is maintained exclusively here, so replay and live
/// mutation can never disagree about which beds are occupied.
fn apply_to_hotel(hs: &mut HotelState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomCreated {
            id,
            hotel_id,
            number,
            room_type,
            capacity,
            default_bed_type,
            notes,
            status,
        } => {
            hs.insert_room(Room {
                id: *id,
                number: number.clone(),
                room_type: *room_type,
                capacity: *capacity,
                default_bed_type: *default_bed_type,
                notes: notes.clone(),
                status: *status,
            });
            entity_map.insert(*id, *hotel_id);
        }
        Event::RoomUpdated {
            id,
            hotel_id,
            number,
            room_type,
            capacity,
            default_bed_type,
            notes,
            status,
        } => {
            hs.replace_room(Room {
                id: *id,
                number: number.clone(),
                room_type: *room_type,
                capacity: *capacity,
                default_bed_type: *default_bed_type,
                notes: notes.clone(),
                status: *status,
            });
            entity_map.insert(*id, *hotel_id);
        }
        Event::BedsProvisioned {
            room_id,
            hotel_id,
            bed_ids,
            bed_type,
        } => {
            for bed_id in bed_ids {
                hs.beds.insert(
                    *bed_id,
                    Bed {
                        id: *bed_id,
                        room_id: *room_id,
                        bed_type: *bed_type,
                    },
                );
                entity_map.insert(*bed_id, *hotel_id);
            }
        }
        Event::BedsRetyped {
            room_id, bed_type, ..
        } => {
            // Bed ids survive a retype; only the type flips.
            for bed in hs.beds.values_mut() {
                if bed.room_id == *room_id {
                    bed.bed_type = *bed_type;
                }
            }
        }
        Event::AssignmentCreated {
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
        } => {
            let assignment = Assignment {
                id: *id,
                participant_id: *participant_id,
                room_id: *room_id,
                bed_id: *bed_id,
                event_id: *event_id,
                preferred_bed_type: *preferred_bed_type,
                check_in: *check_in,
                check_out: *check_out,
                status: *status,
            };
            if let Some(bed) = assignment.bed_id
                && assignment.is_live() {
                    hs.claim(bed, *id);
                }
            hs.assignments.insert(*id, assignment);
            entity_map.insert(*id, *hotel_id);
        }
        Event::AssignmentUpdated {
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
        } => {
            // Release before claim, so a same-bed update is a no-op rather
            // than a drop.
            if let Some(old) = hs.assignments.get(id)
                && let Some(old_bed) = old.bed_id {
                    hs.release(old_bed, *id);
                }
            let assignment = Assignment {
                id: *id,
                participant_id: *participant_id,
                room_id: *room_id,
                bed_id: *bed_id,
                event_id: *event_id,
                preferred_bed_type: *preferred_bed_type,
                check_in: *check_in,
                check_out: *check_out,
                status: *status,
            };
            if let Some(bed) = assignment.bed_id
                && assignment.is_live() {
                    hs.claim(bed, *id);
                }
            hs.assignments.insert(*id, assignment);
            entity_map.insert(*id, *hotel_id);
        }
        Event::AssignmentDeleted { id, .. } => {
            if let Some(old) = hs.assignments.remove(id)
                && let Some(bed) = old.bed_id {
                    hs.release(bed, *id);
                }
            entity_map.remove(id);
        }
        Event::HotelUpdated { name, address, .. } => {
            hs.name = name.clone();
            hs.address = address.clone();
        }
        // HotelCreated/Deleted are handled at the DashMap level, not here
        Event::HotelCreated { .. } | Event::HotelDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            hotels: DashMap::new(),
            wal_tx,
            notify,
            entity_to_hotel: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::HotelCreated { id, event_id, name, address } => {
                    let hs = HotelState::new(*id, *event_id, name.clone(), address.clone());
                    engine.hotels.insert(*id, Arc::new(RwLock::new(hs)));
                }
                Event::HotelDeleted { id } => {
                    engine.hotels.remove(id);
                }
                other => {
                    if let Some(hotel_id) = event_hotel_id(other)
                        && let Some(entry) = engine.hotels.get(&hotel_id) {
                            let hs_arc = entry.clone();
                            let mut guard = hs_arc.try_write().expect("replay: uncontended write");
                            apply_to_hotel(&mut guard, other, &engine.entity_to_hotel);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_hotel(&self, id: &Ulid) -> Option<SharedHotelState> {
        self.hotels.get(id).map(|e| e.value().clone())
    }

    pub fn get_hotel_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_hotel.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        hotel_id: Ulid,
        hs: &mut HotelState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_hotel(hs, event, &self.entity_to_hotel);
        self.notify.send(hotel_id, event);
        Ok(())
    }

    /// Lookup entity → hotel, get hotel, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<HotelState>), EngineError> {
        let hotel_id = self
            .get_hotel_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let hs = self
            .get_hotel(&hotel_id)
            .ok_or(EngineError::NotFound(hotel_id))?;
        let guard = hs.write_owned().await;
        Ok((hotel_id, guard))
    }
}

/// Extract the hotel_id from an event (for non-Create/Delete-hotel events).
fn event_hotel_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomCreated { hotel_id, .. }
        | Event::RoomUpdated { hotel_id, .. }
        | Event::BedsProvisioned { hotel_id, .. }
        | Event::BedsRetyped { hotel_id, .. }
        | Event::AssignmentCreated { hotel_id, .. }
        | Event::AssignmentUpdated { hotel_id, .. }
        | Event::AssignmentDeleted { hotel_id, .. } => Some(*hotel_id),
        Event::HotelUpdated { id, .. } => Some(*id),
        Event::HotelCreated { .. } | Event::HotelDeleted { .. } => None,
    }
}
