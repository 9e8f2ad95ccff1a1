mod availability;
mod conflict;
mod error;
mod journal;
mod mutations;
mod occupancy;
mod queries;

pub use availability::{available_rooms, is_available, restrictions_touching};
pub use error::EngineError;
pub use journal::{Journal, MemoryJournal, WalJournal};
pub use mutations::UserProfile;
pub use occupancy::{build_month_occupancy, build_room_month, month_bounds, DayState, RoomOccupancy};

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::observability;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// The room/restriction store.
///
/// Every room's restrictions live behind that room's own write lock, and
/// every restriction insert checks for overlaps while holding it, so two
/// racing bookings for the same room are serialized and the loser sees a
/// `Conflict`.
pub struct Engine {
    rooms: DashMap<Ulid, SharedRoomState>,
    reservations: DashMap<Ulid, Reservation>,
    /// Reverse lookup: restriction id → room id
    restriction_to_room: DashMap<Ulid, Ulid>,
    users: DashMap<Ulid, User>,
    /// Lower-cased email → user id
    user_emails: DashMap<String, Ulid>,
    journal: Arc<dyn Journal>,
    clock: Arc<dyn Clock>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes can't miss a concurrent commit.
    commit_gate: RwLock<()>,
    /// Upper bound on waiting for the commit gate or a room lock.
    store_timeout: Duration,
}

/// Apply a room-scoped event to its room (caller holds the lock). Returns
/// the ids of restrictions the event removed.
fn apply_to_room(rs: &mut RoomState, event: &Event) -> Vec<Ulid> {
    match event {
        Event::ReservationBooked { restriction, .. } | Event::BlockAdded { restriction } => {
            rs.insert_restriction(restriction.clone());
            Vec::new()
        }
        Event::ReservationDeleted { id, .. } => rs
            .remove_reservation(*id)
            .into_iter()
            .map(|r| r.id)
            .collect(),
        Event::BlockRemoved { id, .. } => rs.remove_restriction(*id).map(|r| r.id).into_iter().collect(),
        Event::RoomCreated { .. }
        | Event::ReservationUpdated { .. }
        | Event::ReservationProcessed { .. }
        | Event::UserCreated { .. }
        | Event::UserUpdated { .. } => Vec::new(),
    }
}

/// The room an event touches, for events that change occupancy.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationBooked { restriction, .. } | Event::BlockAdded { restriction } => {
            Some(restriction.room_id)
        }
        Event::ReservationDeleted { room_id, .. } | Event::BlockRemoved { room_id, .. } => {
            Some(*room_id)
        }
        _ => None,
    }
}

/// The restriction a replayed insert would overlap, if any. The journal is
/// held to the same exclusion rule as live writes.
fn replay_conflict(rs: &RoomState, event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationBooked { restriction, .. } | Event::BlockAdded { restriction } => {
            match conflict::check_no_conflict(rs, &restriction.stay) {
                Err(EngineError::Conflict(existing)) => Some(existing),
                _ => None,
            }
        }
        _ => None,
    }
}

impl Engine {
    /// Open (or create) a WAL-backed store and replay it.
    pub fn open(wal_path: &Path) -> std::io::Result<Self> {
        Self::open_with_clock(wal_path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(wal_path: &Path, clock: Arc<dyn Clock>) -> std::io::Result<Self> {
        let (journal, events) = WalJournal::open(wal_path)?;
        let engine = Self::with_journal(Arc::new(journal), clock);
        engine.replay(&events);
        tracing::info!(events = events.len(), "replayed store journal");
        Ok(engine)
    }

    /// A store whose journal lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_journal(Arc::new(MemoryJournal::new()), Arc::new(SystemClock))
    }

    pub fn with_journal(journal: Arc<dyn Journal>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            restriction_to_room: DashMap::new(),
            users: DashMap::new(),
            user_emails: DashMap::new(),
            journal,
            clock,
            commit_gate: RwLock::new(()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Bound a wait (lock or gate acquisition) by the store timeout. Commits
    /// themselves are never cut short, so memory and journal can't diverge.
    pub(super) async fn bounded<F: Future>(
        &self,
        op: &'static str,
        wait: F,
    ) -> Result<F::Output, EngineError> {
        tokio::time::timeout(self.store_timeout, wait)
            .await
            .map_err(|_| {
                metrics::counter!(observability::STORE_TIMEOUTS_TOTAL, "op" => op).increment(1);
                tracing::warn!(op, "store operation timed out");
                EngineError::Timeout(op)
            })
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Rebuild state from journal events. We're the sole owner of every room
    /// lock here, so `try_write` always succeeds; never block, since this may
    /// run inside an async context.
    pub fn replay(&self, events: &[Event]) {
        for event in events {
            let rs = event_room_id(event).and_then(|id| self.get_room_state(&id));
            match rs {
                Some(rs) => match rs.try_write() {
                    Ok(mut guard) => {
                        if let Some(existing) = replay_conflict(&guard, event) {
                            tracing::error!(
                                %existing,
                                ?event,
                                "journal restriction overlaps an earlier one, event skipped"
                            );
                            continue;
                        }
                        self.apply(Some(&mut *guard), event)
                    }
                    Err(_) => tracing::warn!("room locked during replay, event skipped"),
                },
                None => self.apply(None, event),
            }
        }
    }

    fn apply(&self, rs: Option<&mut RoomState>, event: &Event) {
        if let Some(rs) = rs {
            for removed in apply_to_room(rs, event) {
                self.restriction_to_room.remove(&removed);
            }
        }
        self.apply_to_indexes(event);
    }

    /// Keep the reservation, user and reverse-lookup maps in step with an event.
    fn apply_to_indexes(&self, event: &Event) {
        match event {
            Event::ReservationBooked {
                reservation,
                restriction,
            } => {
                self.reservations.insert(reservation.id, reservation.clone());
                self.restriction_to_room
                    .insert(restriction.id, restriction.room_id);
            }
            Event::ReservationUpdated {
                id,
                guest,
                updated_at,
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.guest = guest.clone();
                    r.updated_at = *updated_at;
                }
            }
            Event::ReservationProcessed {
                id,
                processed,
                updated_at,
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.processed = *processed;
                    r.updated_at = *updated_at;
                }
            }
            Event::ReservationDeleted { id, .. } => {
                self.reservations.remove(id);
            }
            Event::BlockAdded { restriction } => {
                self.restriction_to_room
                    .insert(restriction.id, restriction.room_id);
            }
            Event::BlockRemoved { .. } => {}
            Event::UserCreated { user } | Event::UserUpdated { user } => {
                if let Some(previous) = self.users.get(&user.id) {
                    self.user_emails.remove(&previous.email.to_lowercase());
                }
                self.user_emails.insert(user.email.to_lowercase(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Event::RoomCreated { room } => {
                self.rooms
                    .entry(room.id)
                    .or_insert_with(|| Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
        }
    }

    /// Journal-append + apply in one call. The room lock, when the event
    /// touches a room, is already held by the caller as `rs`.
    pub(super) async fn persist_and_apply(
        &self,
        rs: Option<&mut RoomState>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal.append(event).await?;
        self.apply(rs, event);
        Ok(())
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of every room handle, taken without holding map guards
    /// across later awaits.
    /// Every room handle, ordered by room id. Anything that holds several
    /// room locks at once takes them in this order.
    pub(super) fn room_states(&self) -> Vec<SharedRoomState> {
        let mut rooms: Vec<(Ulid, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        rooms.sort_unstable_by_key(|(id, _)| *id);
        rooms.into_iter().map(|(_, rs)| rs).collect()
    }

    pub fn get_room_for_restriction(&self, restriction_id: &Ulid) -> Option<Ulid> {
        self.restriction_to_room
            .get(restriction_id)
            .map(|e| *e.value())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}
