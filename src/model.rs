use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar dates are the only unit of occupancy.
pub type Date = NaiveDate;
pub type Timestamp = DateTime<Utc>;

/// Half-open stay `[check_in, check_out)`: the checkout day itself is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub start: Date,
    pub end: Date,
}

impl Stay {
    /// Callers validate `start < end` before a stay reaches the store.
    pub fn new(start: Date, end: Date) -> Self {
        Self { start, end }
    }

    /// The single night beginning on `day`.
    pub fn night_of(day: Date) -> Self {
        Self {
            start: day,
            end: day.checked_add_days(Days::new(1)).unwrap_or(day),
        }
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// The overlap predicate shared by search, single-room checks and the
    /// exclusion check on insert.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// The fixed restriction lookup set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RestrictionKind {
    Reservation,
    OwnerBlock,
}

impl RestrictionKind {
    pub const ALL: [RestrictionKind; 2] = [RestrictionKind::Reservation, RestrictionKind::OwnerBlock];

    pub fn id(self) -> u8 {
        match self {
            RestrictionKind::Reservation => 1,
            RestrictionKind::OwnerBlock => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == id)
    }

    pub fn label(self) -> &'static str {
        match self {
            RestrictionKind::Reservation => "Reservation",
            RestrictionKind::OwnerBlock => "Owner Block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub id: u8,
    pub name: String,
}

impl From<RestrictionKind> for Restriction {
    fn from(kind: RestrictionKind) -> Self {
        Self {
            id: kind.id(),
            name: kind.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A date-ranged occupancy record on one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: Ulid,
    pub room_id: Ulid,
    pub stay: Stay,
    /// `None` marks an administrative block with no guest attached.
    pub reservation_id: Option<Ulid>,
    pub kind: RestrictionKind,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RoomRestriction {
    pub fn is_block(&self) -> bool {
        self.reservation_id.is_none()
    }
}

/// Guest contact fields, as submitted on the reservation form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub guest: GuestInfo,
    pub room_id: Ulid,
    pub stay: Stay,
    pub processed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// argon2id PHC string; never the plain password.
    pub password_hash: String,
    pub access_level: u8,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Restrictions sorted by `stay.start`.
    pub restrictions: Vec<RoomRestriction>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
        }
    }

    /// Insert restriction maintaining sort order by stay.start.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .partition_point(|r| r.stay.start <= restriction.stay.start);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: Ulid) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    /// Remove and return every restriction owned by the reservation.
    pub fn remove_reservation(&mut self, reservation_id: Ulid) -> Vec<RoomRestriction> {
        let (removed, kept) = std::mem::take(&mut self.restrictions)
            .into_iter()
            .partition(|r| r.reservation_id == Some(reservation_id));
        self.restrictions = kept;
        removed
    }

    /// Restrictions satisfying the overlap predicate against `query`.
    /// Everything at index >= right_bound starts at or after `query.end`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.stay.start < query.end);
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.stay.overlaps(query))
    }
}

/// The WAL record format. A reservation and its restriction travel in one
/// record so replay can never observe one without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    ReservationBooked {
        reservation: Reservation,
        restriction: RoomRestriction,
    },
    ReservationUpdated {
        id: Ulid,
        guest: GuestInfo,
        updated_at: Timestamp,
    },
    ReservationProcessed {
        id: Ulid,
        processed: bool,
        updated_at: Timestamp,
    },
    ReservationDeleted {
        id: Ulid,
        room_id: Ulid,
    },
    BlockAdded {
        restriction: RoomRestriction,
    },
    BlockRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    UserCreated {
        user: User,
    },
    UserUpdated {
        user: User,
    },
}
