use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, RoomOccupancy, UserProfile};
use crate::model::*;

/// Everything callers need from the store. `Engine` is the implementation;
/// handlers and the front desk only see this trait.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_room(&self, name: &str) -> Result<Room, EngineError>;
    async fn all_rooms(&self) -> Result<Vec<Room>, EngineError>;
    async fn get_room_by_id(&self, id: Ulid) -> Result<Room, EngineError>;

    async fn search_availability(&self, start: Date, end: Date) -> Result<Vec<Room>, EngineError>;
    async fn is_room_available(&self, start: Date, end: Date, room_id: Ulid) -> Result<bool, EngineError>;

    /// Returns the stored reservation with its generated id.
    async fn create_reservation(
        &self,
        guest: GuestInfo,
        room_id: Ulid,
        start: Date,
        end: Date,
    ) -> Result<Reservation, EngineError>;
    async fn create_room_restriction(
        &self,
        room_id: Ulid,
        start: Date,
        end: Date,
        kind: RestrictionKind,
    ) -> Result<RoomRestriction, EngineError>;
    async fn add_block(&self, room_id: Ulid, date: Date) -> Result<RoomRestriction, EngineError>;
    async fn remove_block(&self, restriction_id: Ulid) -> Result<(), EngineError>;
    async fn get_restrictions_for_room_by_date(
        &self,
        room_id: Ulid,
        start: Date,
        end: Date,
    ) -> Result<Vec<RoomRestriction>, EngineError>;

    async fn all_reservations(&self) -> Result<Vec<Reservation>, EngineError>;
    async fn all_new_reservations(&self) -> Result<Vec<Reservation>, EngineError>;
    async fn get_reservation_by_id(&self, id: Ulid) -> Result<Reservation, EngineError>;
    async fn update_reservation(&self, id: Ulid, guest: GuestInfo) -> Result<Reservation, EngineError>;
    async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError>;
    async fn update_processed_reservation(
        &self,
        id: Ulid,
        processed: bool,
    ) -> Result<Reservation, EngineError>;

    async fn month_occupancy(&self, year: i32, month: u32) -> Result<Vec<RoomOccupancy>, EngineError>;
    async fn restrictions(&self) -> Result<Vec<Restriction>, EngineError>;

    async fn create_user(&self, profile: UserProfile, password: &str) -> Result<User, EngineError>;
    async fn get_user_by_id(&self, id: Ulid) -> Result<User, EngineError>;
    async fn update_user(&self, id: Ulid, profile: UserProfile) -> Result<User, EngineError>;
    async fn authenticate(&self, email: &str, password: &str) -> Result<Ulid, EngineError>;
}

/// Log store-side failures with the operation name before they bubble up.
fn traced<T>(op: &'static str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(e) = &result
        && e.is_transient()
    {
        tracing::warn!(op, error = %e, "store operation failed");
    }
    result
}

#[async_trait]
impl Repository for Engine {
    async fn create_room(&self, name: &str) -> Result<Room, EngineError> {
        traced("create_room", Engine::create_room(self, name).await)
    }

    async fn all_rooms(&self) -> Result<Vec<Room>, EngineError> {
        traced("all_rooms", Engine::all_rooms(self).await)
    }

    async fn get_room_by_id(&self, id: Ulid) -> Result<Room, EngineError> {
        traced("get_room_by_id", Engine::get_room_by_id(self, id).await)
    }

    async fn search_availability(&self, start: Date, end: Date) -> Result<Vec<Room>, EngineError> {
        traced(
            "search_availability",
            Engine::search_availability(self, Stay::new(start, end)).await,
        )
    }

    async fn is_room_available(&self, start: Date, end: Date, room_id: Ulid) -> Result<bool, EngineError> {
        traced(
            "is_room_available",
            Engine::is_room_available(self, room_id, Stay::new(start, end)).await,
        )
    }

    async fn create_reservation(
        &self,
        guest: GuestInfo,
        room_id: Ulid,
        start: Date,
        end: Date,
    ) -> Result<Reservation, EngineError> {
        traced(
            "create_reservation",
            Engine::create_reservation(self, guest, room_id, Stay::new(start, end)).await,
        )
    }

    async fn create_room_restriction(
        &self,
        room_id: Ulid,
        start: Date,
        end: Date,
        kind: RestrictionKind,
    ) -> Result<RoomRestriction, EngineError> {
        traced(
            "create_room_restriction",
            Engine::create_room_restriction(self, room_id, Stay::new(start, end), kind).await,
        )
    }

    async fn add_block(&self, room_id: Ulid, date: Date) -> Result<RoomRestriction, EngineError> {
        traced("add_block", Engine::add_block(self, room_id, date).await)
    }

    async fn remove_block(&self, restriction_id: Ulid) -> Result<(), EngineError> {
        traced("remove_block", Engine::remove_block(self, restriction_id).await)
    }

    async fn get_restrictions_for_room_by_date(
        &self,
        room_id: Ulid,
        start: Date,
        end: Date,
    ) -> Result<Vec<RoomRestriction>, EngineError> {
        traced(
            "get_restrictions_for_room_by_date",
            Engine::get_restrictions_for_room_by_date(self, room_id, start, end).await,
        )
    }

    async fn all_reservations(&self) -> Result<Vec<Reservation>, EngineError> {
        Ok(Engine::all_reservations(self))
    }

    async fn all_new_reservations(&self) -> Result<Vec<Reservation>, EngineError> {
        Ok(Engine::all_new_reservations(self))
    }

    async fn get_reservation_by_id(&self, id: Ulid) -> Result<Reservation, EngineError> {
        Engine::get_reservation_by_id(self, id)
    }

    async fn update_reservation(&self, id: Ulid, guest: GuestInfo) -> Result<Reservation, EngineError> {
        traced("update_reservation", Engine::update_reservation(self, id, guest).await)
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        traced("delete_reservation", Engine::delete_reservation(self, id).await)
    }

    async fn update_processed_reservation(
        &self,
        id: Ulid,
        processed: bool,
    ) -> Result<Reservation, EngineError> {
        traced(
            "update_processed_reservation",
            Engine::update_processed_reservation(self, id, processed).await,
        )
    }

    async fn month_occupancy(&self, year: i32, month: u32) -> Result<Vec<RoomOccupancy>, EngineError> {
        traced("month_occupancy", Engine::month_occupancy(self, year, month).await)
    }

    async fn restrictions(&self) -> Result<Vec<Restriction>, EngineError> {
        Ok(Engine::restrictions(self))
    }

    async fn create_user(&self, profile: UserProfile, password: &str) -> Result<User, EngineError> {
        traced("create_user", Engine::create_user(self, profile, password).await)
    }

    async fn get_user_by_id(&self, id: Ulid) -> Result<User, EngineError> {
        Engine::get_user_by_id(self, id)
    }

    async fn update_user(&self, id: Ulid, profile: UserProfile) -> Result<User, EngineError> {
        traced("update_user", Engine::update_user(self, id, profile).await)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Ulid, EngineError> {
        Engine::authenticate(self, email, password).await
    }
}
