use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use ulid::Ulid;

use crate::limits::{MAX_VALID_YEAR, MIN_VALID_YEAR};
use crate::model::*;

use super::EngineError;

/// What the admin calendar shows for one room on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DayState {
    Free,
    /// Tagged with the reservation id.
    Reserved(Ulid),
    /// Tagged with the block's restriction id.
    Blocked(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomOccupancy {
    pub room: Room,
    /// Exactly one entry per day of the month.
    pub days: BTreeMap<Date, DayState>,
}

impl RoomOccupancy {
    pub fn state_on(&self, day: Date) -> Option<DayState> {
        self.days.get(&day).copied()
    }
}

/// First and last day of the month, both inclusive.
pub fn month_bounds(year: i32, month: u32) -> Result<(Date, Date), EngineError> {
    let invalid = || EngineError::InvalidMonth { year, month };
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&year) {
        return Err(invalid());
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    let last = next.pred_opt().ok_or_else(invalid)?;
    Ok((first, last))
}

/// Build one room's calendar. Reservations mark every day from start through
/// end inclusive; blocks mark only their start day. Days outside the month
/// are never added.
pub fn build_room_month(
    room: &Room,
    restrictions: &[RoomRestriction],
    first: Date,
    last: Date,
) -> RoomOccupancy {
    let mut days = BTreeMap::new();
    for day in first.iter_days().take_while(|d| *d <= last) {
        days.insert(day, DayState::Free);
    }

    for r in restrictions {
        match r.reservation_id {
            Some(reservation_id) => {
                let from = r.stay.start.max(first);
                let to = r.stay.end.min(last);
                let mut day = from;
                while day <= to {
                    days.insert(day, DayState::Reserved(reservation_id));
                    match day.checked_add_days(Days::new(1)) {
                        Some(next) => day = next,
                        None => break,
                    }
                }
            }
            None => {
                if let Some(state) = days.get_mut(&r.stay.start) {
                    *state = DayState::Blocked(r.id);
                }
            }
        }
    }

    RoomOccupancy {
        room: room.clone(),
        days,
    }
}

/// Calendar for every given room, in the order given.
pub fn build_month_occupancy(
    rooms: &[(Room, Vec<RoomRestriction>)],
    year: i32,
    month: u32,
) -> Result<Vec<RoomOccupancy>, EngineError> {
    let (first, last) = month_bounds(year, month)?;
    Ok(rooms
        .iter()
        .map(|(room, restrictions)| build_room_month(room, restrictions, first, last))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Utc};

    fn d(s: &str) -> Date {
        s.parse().unwrap()
    }

    fn room() -> Room {
        let now = Utc::now();
        Room {
            id: Ulid::new(),
            name: "Major's Suite".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn restriction(room: &Room, start: &str, end: &str, reservation_id: Option<Ulid>) -> RoomRestriction {
        let now = Utc::now();
        RoomRestriction {
            id: Ulid::new(),
            room_id: room.id,
            stay: Stay::new(d(start), d(end)),
            reservation_id,
            kind: if reservation_id.is_some() {
                RestrictionKind::Reservation
            } else {
                RestrictionKind::OwnerBlock
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn month_bounds_handle_leap_years_and_december() {
        assert_eq!(month_bounds(2024, 2).unwrap(), (d("2024-02-01"), d("2024-02-29")));
        assert_eq!(month_bounds(2023, 2).unwrap(), (d("2023-02-01"), d("2023-02-28")));
        assert_eq!(month_bounds(2024, 12).unwrap(), (d("2024-12-01"), d("2024-12-31")));
        assert!(matches!(month_bounds(2024, 13), Err(EngineError::InvalidMonth { .. })));
        assert!(matches!(month_bounds(2024, 0), Err(EngineError::InvalidMonth { .. })));
    }

    #[test]
    fn reservation_marks_inclusive_range() {
        let room = room();
        let res_id = Ulid::new();
        let r = restriction(&room, "2024-03-10", "2024-03-12", Some(res_id));
        let occ = build_month_occupancy(&[(room, vec![r])], 2024, 3).unwrap();
        let days = &occ[0].days;

        assert_eq!(days.len(), 31);
        for day in 10..=12 {
            let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
            assert_eq!(days[&date], DayState::Reserved(res_id));
        }
        let others = days
            .iter()
            .filter(|(date, _)| !(10..=12).contains(&date.day()));
        for (_, state) in others {
            assert_eq!(*state, DayState::Free);
        }
    }

    #[test]
    fn block_marks_only_start_day() {
        let room = room();
        let block = restriction(&room, "2024-03-05", "2024-03-08", None);
        let block_id = block.id;
        let (first, last) = month_bounds(2024, 3).unwrap();
        let occ = build_room_month(&room, &[block], first, last);

        assert_eq!(occ.state_on(d("2024-03-05")), Some(DayState::Blocked(block_id)));
        assert_eq!(occ.state_on(d("2024-03-06")), Some(DayState::Free));
        assert_eq!(occ.state_on(d("2024-03-07")), Some(DayState::Free));
    }

    #[test]
    fn spill_over_never_adds_foreign_days() {
        let room = room();
        let res_id = Ulid::new();
        let spans_months = restriction(&room, "2024-02-27", "2024-03-02", Some(res_id));
        let block_before = restriction(&room, "2024-02-20", "2024-03-03", None);
        let (first, last) = month_bounds(2024, 3).unwrap();
        let occ = build_room_month(&room, &[spans_months, block_before], first, last);

        assert_eq!(occ.days.len(), 31);
        assert!(occ.days.keys().all(|day| day.month() == 3));
        assert_eq!(occ.state_on(d("2024-03-01")), Some(DayState::Reserved(res_id)));
        assert_eq!(occ.state_on(d("2024-03-02")), Some(DayState::Reserved(res_id)));
        assert_eq!(occ.state_on(d("2024-03-03")), Some(DayState::Free));
    }

    #[test]
    fn reservation_checkout_day_shows_reserved_in_calendar() {
        let room = room();
        let res_id = Ulid::new();
        let r = restriction(&room, "2024-03-30", "2024-04-02", Some(res_id));
        let (first, last) = month_bounds(2024, 3).unwrap();
        let occ = build_room_month(&room, &[r], first, last);
        assert_eq!(occ.state_on(d("2024-03-31")), Some(DayState::Reserved(res_id)));
        assert_eq!(occ.state_on(d("2024-04-01")), None);
    }
}
