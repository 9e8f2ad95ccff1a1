use ulid::Ulid;

use crate::credentials;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_capacity, check_no_conflict, validate_stay};
use super::{Engine, EngineError};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_guest(guest: &GuestInfo) -> Result<(), EngineError> {
    check_len(&guest.first_name, MAX_GUEST_FIELD_LEN, "first name too long")?;
    check_len(&guest.last_name, MAX_GUEST_FIELD_LEN, "last name too long")?;
    check_len(&guest.email, MAX_GUEST_FIELD_LEN, "email too long")?;
    check_len(&guest.phone, MAX_GUEST_FIELD_LEN, "phone too long")
}

/// Fields of a user account an admin may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub access_level: u8,
}

impl UserProfile {
    fn check(&self) -> Result<(), EngineError> {
        if self.email.trim().is_empty() {
            return Err(EngineError::Validation("email is required".into()));
        }
        check_len(&self.first_name, MAX_NAME_LEN, "first name too long")?;
        check_len(&self.last_name, MAX_NAME_LEN, "last name too long")?;
        check_len(&self.email, MAX_NAME_LEN, "email too long")
    }
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> T + Send + 'static,
) -> Result<T, EngineError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Hash(e.to_string()))
}

impl Engine {
    pub async fn create_room(&self, name: &str) -> Result<Room, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("room name is required".into()));
        }
        check_len(name, MAX_NAME_LEN, "room name too long")?;
        let _gate = self.bounded("create_room", self.commit_gate.read()).await?;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let now = self.now();
        let room = Room {
            id: Ulid::new(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        let event = Event::RoomCreated { room: room.clone() };
        self.persist_and_apply(None, &event).await?;
        tracing::info!(room_id = %room.id, name = %room.name, "room created");
        Ok(room)
    }

    /// Insert a reservation and the restriction that blocks its room as one
    /// record. Either both become visible or neither does.
    pub async fn create_reservation(
        &self,
        guest: GuestInfo,
        room_id: Ulid,
        stay: Stay,
    ) -> Result<Reservation, EngineError> {
        validate_stay(&stay)?;
        check_guest(&guest)?;
        let _gate = self.bounded("create_reservation", self.commit_gate.read()).await?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = self.bounded("create_reservation", rs.write()).await?;
        check_capacity(&guard)?;

        let now = self.now();
        let reservation = Reservation {
            id: Ulid::new(),
            guest,
            room_id,
            stay,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        let restriction = RoomRestriction {
            id: Ulid::new(),
            room_id,
            stay,
            reservation_id: Some(reservation.id),
            kind: RestrictionKind::Reservation,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = check_no_conflict(&guard, &stay) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::ReservationBooked {
            reservation: reservation.clone(),
            restriction,
        };
        self.persist_and_apply(Some(&mut *guard), &event).await?;
        metrics::counter!(observability::RESERVATIONS_BOOKED_TOTAL).increment(1);
        tracing::info!(
            reservation_id = %reservation.id,
            %room_id,
            check_in = %stay.start,
            check_out = %stay.end,
            "reservation booked"
        );
        Ok(reservation)
    }

    /// Owner blocks only; guest restrictions come from `create_reservation`.
    pub async fn create_room_restriction(
        &self,
        room_id: Ulid,
        stay: Stay,
        kind: RestrictionKind,
    ) -> Result<RoomRestriction, EngineError> {
        if kind == RestrictionKind::Reservation {
            return Err(EngineError::Validation(
                "guest restrictions are created together with their reservation".into(),
            ));
        }
        validate_stay(&stay)?;
        let _gate = self.bounded("create_room_restriction", self.commit_gate.read()).await?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = self.bounded("create_room_restriction", rs.write()).await?;
        check_capacity(&guard)?;

        if let Err(e) = check_no_conflict(&guard, &stay) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let now = self.now();
        let restriction = RoomRestriction {
            id: Ulid::new(),
            room_id,
            stay,
            reservation_id: None,
            kind,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BlockAdded {
            restriction: restriction.clone(),
        };
        self.persist_and_apply(Some(&mut *guard), &event).await?;
        Ok(restriction)
    }

    /// Block the single night starting on `date`.
    pub async fn add_block(&self, room_id: Ulid, date: Date) -> Result<RoomRestriction, EngineError> {
        self.create_room_restriction(room_id, Stay::night_of(date), RestrictionKind::OwnerBlock)
            .await
    }

    pub async fn remove_block(&self, restriction_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.bounded("remove_block", self.commit_gate.read()).await?;
        let room_id = self
            .get_room_for_restriction(&restriction_id)
            .ok_or(EngineError::NotFound(restriction_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = self.bounded("remove_block", rs.write()).await?;

        let restriction = guard
            .restrictions
            .iter()
            .find(|r| r.id == restriction_id)
            .ok_or(EngineError::NotFound(restriction_id))?;
        if !restriction.is_block() {
            return Err(EngineError::InvalidTransition(
                "guest occupancy is removed by deleting its reservation",
            ));
        }

        let event = Event::BlockRemoved {
            id: restriction_id,
            room_id,
        };
        self.persist_and_apply(Some(&mut *guard), &event).await
    }

    /// Replace the guest contact fields.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        guest: GuestInfo,
    ) -> Result<Reservation, EngineError> {
        check_guest(&guest)?;
        let _gate = self.bounded("update_reservation", self.commit_gate.read()).await?;
        if !self.reservations.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ReservationUpdated {
            id,
            guest,
            updated_at: self.now(),
        };
        self.persist_and_apply(None, &event).await?;
        self.get_reservation_by_id(id)
    }

    /// `processed` only ever moves from false to true.
    pub async fn update_processed_reservation(
        &self,
        id: Ulid,
        processed: bool,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.bounded("update_processed_reservation", self.commit_gate.read()).await?;
        let current = self.get_reservation_by_id(id)?;
        if current.processed == processed {
            return Ok(current);
        }
        if current.processed && !processed {
            return Err(EngineError::InvalidTransition(
                "a processed reservation cannot be marked new again",
            ));
        }
        let event = Event::ReservationProcessed {
            id,
            processed,
            updated_at: self.now(),
        };
        self.persist_and_apply(None, &event).await?;
        tracing::info!(reservation_id = %id, "reservation processed");
        self.get_reservation_by_id(id)
    }

    /// Remove the reservation and every restriction it owns.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.bounded("delete_reservation", self.commit_gate.read()).await?;
        let room_id = self.get_reservation_by_id(id)?.room_id;
        let event = Event::ReservationDeleted { id, room_id };
        match self.get_room_state(&room_id) {
            Some(rs) => {
                let mut guard = self.bounded("delete_reservation", rs.write()).await?;
                // A racing delete may have won while we waited for the lock.
                if !self.reservations.contains_key(&id) {
                    return Err(EngineError::NotFound(id));
                }
                self.persist_and_apply(Some(&mut *guard), &event).await?;
            }
            None => self.persist_and_apply(None, &event).await?,
        }
        tracing::info!(reservation_id = %id, %room_id, "reservation deleted");
        Ok(())
    }

    pub async fn create_user(
        &self,
        profile: UserProfile,
        password: &str,
    ) -> Result<User, EngineError> {
        profile.check()?;
        if password.is_empty() {
            return Err(EngineError::Validation("password is required".into()));
        }
        if self.user_emails.contains_key(&profile.email.to_lowercase()) {
            return Err(EngineError::AlreadyExists(profile.email));
        }

        let password = password.to_string();
        let password_hash = run_blocking(move || credentials::hash_password(&password)).await??;

        let _gate = self.bounded("create_user", self.commit_gate.read()).await?;
        if self.user_emails.contains_key(&profile.email.to_lowercase()) {
            return Err(EngineError::AlreadyExists(profile.email));
        }
        let now = self.now();
        let user = User {
            id: Ulid::new(),
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: profile.email,
            password_hash,
            access_level: profile.access_level,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(None, &Event::UserCreated { user: user.clone() })
            .await?;
        tracing::info!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Update profile fields; the password hash is kept.
    pub async fn update_user(&self, id: Ulid, profile: UserProfile) -> Result<User, EngineError> {
        profile.check()?;
        let _gate = self.bounded("update_user", self.commit_gate.read()).await?;
        let current = self.get_user_by_id(id)?;
        if let Some(owner) = self.user_emails.get(&profile.email.to_lowercase())
            && *owner.value() != id
        {
            return Err(EngineError::AlreadyExists(profile.email));
        }
        let user = User {
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: profile.email,
            access_level: profile.access_level,
            updated_at: self.now(),
            ..current
        };
        self.persist_and_apply(None, &Event::UserUpdated { user: user.clone() })
            .await?;
        Ok(user)
    }

    /// Rewrite the journal as the minimal event list that rebuilds current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.bounded("compact_journal", self.commit_gate.write()).await?;
        let mut events = Vec::new();

        let mut rooms = self.room_states();
        let mut snapshots = Vec::with_capacity(rooms.len());
        for rs in rooms.drain(..) {
            snapshots.push(self.bounded("compact_journal", rs.read()).await?.clone());
        }
        snapshots.sort_by_key(|rs| rs.room.id);

        for rs in &snapshots {
            events.push(Event::RoomCreated {
                room: rs.room.clone(),
            });
        }
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        events.extend(users.into_iter().map(|user| Event::UserCreated { user }));

        for rs in &snapshots {
            for restriction in &rs.restrictions {
                match restriction.reservation_id {
                    Some(reservation_id) => {
                        let Some(reservation) = self.reservations.get(&reservation_id) else {
                            tracing::warn!(%reservation_id, "restriction without reservation dropped from compaction");
                            continue;
                        };
                        events.push(Event::ReservationBooked {
                            reservation: reservation.value().clone(),
                            restriction: restriction.clone(),
                        });
                    }
                    None => events.push(Event::BlockAdded {
                        restriction: restriction.clone(),
                    }),
                }
            }
        }

        let count = events.len();
        self.journal.compact(events).await?;
        tracing::info!(events = count, "journal compacted");
        Ok(())
    }
}
