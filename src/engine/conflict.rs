use chrono::Datelike;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn check_year(date: Date) -> Result<(), EngineError> {
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

/// Query windows may be empty (`start == end`); they are never inverted.
pub(crate) fn validate_window(stay: &Stay) -> Result<(), EngineError> {
    check_year(stay.start)?;
    check_year(stay.end)?;
    if stay.start > stay.end {
        return Err(EngineError::InvalidDates {
            start: stay.start,
            end: stay.end,
        });
    }
    if stay.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Anything written to a room must cover at least one night.
pub(crate) fn validate_stay(stay: &Stay) -> Result<(), EngineError> {
    check_year(stay.start)?;
    check_year(stay.end)?;
    if stay.is_empty() {
        return Err(EngineError::InvalidDates {
            start: stay.start,
            end: stay.end,
        });
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// The exclusion check. Must run under the room's write lock.
pub(crate) fn check_no_conflict(rs: &RoomState, stay: &Stay) -> Result<(), EngineError> {
    match rs.overlapping(stay).next() {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}

pub(crate) fn check_capacity(rs: &RoomState) -> Result<(), EngineError> {
    if rs.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many restrictions on room"));
    }
    Ok(())
}
