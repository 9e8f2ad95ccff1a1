use std::cmp::Reverse;

use ulid::Ulid;

use crate::credentials;
use crate::model::*;

use super::availability::{available_rooms, is_available, restrictions_touching};
use super::conflict::validate_window;
use super::occupancy::{build_month_occupancy, month_bounds, RoomOccupancy};
use super::{Engine, EngineError};

impl Engine {
    /// Rooms with no restriction overlapping `stay`, ordered by room id.
    pub async fn search_availability(&self, stay: Stay) -> Result<Vec<Room>, EngineError> {
        validate_window(&stay)?;
        let rooms = self.room_states();
        let mut guards = Vec::with_capacity(rooms.len());
        for rs in &rooms {
            guards.push(self.bounded("search_availability", rs.read()).await?);
        }
        Ok(available_rooms(guards.iter().map(|g| &**g), &stay))
    }

    pub async fn is_room_available(&self, room_id: Ulid, stay: Stay) -> Result<bool, EngineError> {
        validate_window(&stay)?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = self.bounded("is_room_available", rs.read()).await?;
        Ok(is_available(&guard, &stay))
    }

    /// Every room, ordered by name.
    pub async fn all_rooms(&self) -> Result<Vec<Room>, EngineError> {
        let mut rooms = Vec::new();
        for rs in self.room_states() {
            rooms.push(self.bounded("all_rooms", rs.read()).await?.room.clone());
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    pub async fn get_room_by_id(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.get_room_state(&id).ok_or(EngineError::NotFound(id))?;
        let room = self.bounded("get_room_by_id", rs.read()).await?.room.clone();
        Ok(room)
    }

    /// Restrictions on the room touching `[start, end]`, end day included.
    pub async fn get_restrictions_for_room_by_date(
        &self,
        room_id: Ulid,
        start: Date,
        end: Date,
    ) -> Result<Vec<RoomRestriction>, EngineError> {
        validate_window(&Stay::new(start, end))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = self.bounded("get_restrictions_for_room_by_date", rs.read()).await?;
        Ok(restrictions_touching(&guard, start, end))
    }

    /// Newest check-in first.
    pub fn all_reservations(&self) -> Vec<Reservation> {
        let mut all: Vec<Reservation> = self
            .reservations
            .iter()
            .map(|e| e.value().clone())
            .collect();
        all.sort_by_key(|r| (Reverse(r.stay.start), r.id));
        all
    }

    /// Reservations an admin hasn't processed yet.
    pub fn all_new_reservations(&self) -> Vec<Reservation> {
        let mut fresh = self.all_reservations();
        fresh.retain(|r| !r.processed);
        fresh
    }

    pub fn get_reservation_by_id(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.reservations
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Per-room calendar for the month, rooms ordered by name.
    pub async fn month_occupancy(&self, year: i32, month: u32) -> Result<Vec<RoomOccupancy>, EngineError> {
        let (first, last) = month_bounds(year, month)?;
        let mut rooms = Vec::new();
        for rs in self.room_states() {
            let guard = self.bounded("month_occupancy", rs.read()).await?;
            rooms.push((guard.room.clone(), restrictions_touching(&guard, first, last)));
        }
        rooms.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        build_month_occupancy(&rooms, year, month)
    }

    /// The fixed restriction lookup set.
    pub fn restrictions(&self) -> Vec<Restriction> {
        RestrictionKind::ALL.into_iter().map(Restriction::from).collect()
    }

    pub fn get_user_by_id(&self, id: Ulid) -> Result<User, EngineError> {
        self.users
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Check a login. Unknown email and wrong password fail identically.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Ulid, EngineError> {
        let user = self
            .user_emails
            .get(&email.trim().to_lowercase())
            .and_then(|id| self.users.get(id.value()).map(|u| u.value().clone()));

        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || match user {
            Some(user) => credentials::verify_password(&password, &user.password_hash).then_some(user.id),
            None => {
                credentials::verify_against_dummy(&password);
                None
            }
        })
        .await
        .map_err(|e| EngineError::Hash(e.to_string()))?;

        verified.ok_or(EngineError::InvalidCredentials)
    }
}
