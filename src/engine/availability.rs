use crate::model::*;

// ── Availability ─────────────────────────────────────────────────

/// A room is free for `stay` when none of its restrictions satisfies the
/// overlap predicate. Search and the single-room check both go through here.
pub fn is_available(rs: &RoomState, stay: &Stay) -> bool {
    rs.overlapping(stay).next().is_none()
}

/// Every free room, ordered by room id.
pub fn available_rooms<'a>(rooms: impl IntoIterator<Item = &'a RoomState>, stay: &Stay) -> Vec<Room> {
    let mut free: Vec<Room> = rooms
        .into_iter()
        .filter(|rs| is_available(rs, stay))
        .map(|rs| rs.room.clone())
        .collect();
    free.sort_by_key(|room| room.id);
    free
}

/// Restrictions touching `[start, end]` with the end day included, so a
/// restriction beginning on the window's last day is reported.
pub fn restrictions_touching(rs: &RoomState, start: Date, end: Date) -> Vec<RoomRestriction> {
    rs.restrictions
        .iter()
        .take_while(|r| r.stay.start <= end)
        .filter(|r| start < r.stay.end && end >= r.stay.start)
        .cloned()
        .collect()
}
