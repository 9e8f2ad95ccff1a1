use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::{MAX_DRAFTS, MAX_SESSION_ID_LEN};
use crate::model::{Date, Stay, Timestamp};
use crate::observability;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("no reservation in progress for this session")]
    Missing,
    #[error("invalid session id")]
    InvalidSession,
    #[error("invalid dates: check-in {start} must be before check-out {end}")]
    InvalidDates { start: Date, end: Date },
    #[error("too many reservations in progress")]
    Full,
}

/// A reservation in progress, held between the search page and the final
/// guest form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Draft {
    pub session_id: String,
    pub stay: Stay,
    pub room_id: Option<Ulid>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Draft {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Drafts keyed by session id. Expired drafts are invisible to readers even
/// before the reaper removes them.
pub struct DraftStore {
    drafts: DashMap<String, Draft>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

fn check_session(session_id: &str) -> Result<(), DraftError> {
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(DraftError::InvalidSession);
    }
    Ok(())
}

fn check_stay(stay: &Stay) -> Result<(), DraftError> {
    if stay.is_empty() {
        return Err(DraftError::InvalidDates {
            start: stay.start,
            end: stay.end,
        });
    }
    Ok(())
}

impl DraftStore {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            drafts: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1)),
            clock,
        }
    }

    fn put(&self, session_id: &str, stay: Stay, room_id: Option<Ulid>) -> Result<Draft, DraftError> {
        check_session(session_id)?;
        check_stay(&stay)?;
        if !self.drafts.contains_key(session_id) && self.drafts.len() >= MAX_DRAFTS {
            return Err(DraftError::Full);
        }
        let now = self.clock.now();
        let draft = Draft {
            session_id: session_id.to_string(),
            stay,
            room_id,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.drafts.insert(session_id.to_string(), draft.clone());
        metrics::gauge!(observability::DRAFTS_ACTIVE).set(self.drafts.len() as f64);
        Ok(draft)
    }

    /// Begin (or restart) a draft for the searched dates.
    pub fn start(&self, session_id: &str, stay: Stay) -> Result<Draft, DraftError> {
        self.put(session_id, stay, None)
    }

    /// Direct booking from a room page: dates and room in one step.
    pub fn book_room(&self, session_id: &str, room_id: Ulid, stay: Stay) -> Result<Draft, DraftError> {
        self.put(session_id, stay, Some(room_id))
    }

    /// Attach a room to the session's draft and push its expiry out.
    pub fn choose_room(&self, session_id: &str, room_id: Ulid) -> Result<Draft, DraftError> {
        check_session(session_id)?;
        let now = self.clock.now();
        let mut entry = self
            .drafts
            .get_mut(session_id)
            .filter(|d| !d.is_expired(now))
            .ok_or(DraftError::Missing)?;
        entry.room_id = Some(room_id);
        entry.expires_at = now + self.ttl;
        Ok(entry.value().clone())
    }

    pub fn get(&self, session_id: &str) -> Option<Draft> {
        let now = self.clock.now();
        self.drafts
            .get(session_id)
            .map(|d| d.value().clone())
            .filter(|d| !d.is_expired(now))
    }

    /// Remove and return the session's live draft.
    pub fn take(&self, session_id: &str) -> Option<Draft> {
        let now = self.clock.now();
        let (_, draft) = self.drafts.remove(session_id)?;
        metrics::gauge!(observability::DRAFTS_ACTIVE).set(self.drafts.len() as f64);
        (!draft.is_expired(now)).then_some(draft)
    }

    pub fn discard(&self, session_id: &str) -> bool {
        let removed = self.drafts.remove(session_id).is_some();
        metrics::gauge!(observability::DRAFTS_ACTIVE).set(self.drafts.len() as f64);
        removed
    }

    pub fn collect_expired(&self, now: Timestamp) -> Vec<String> {
        self.drafts
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Drop every expired draft. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut purged = 0;
        for session_id in self.collect_expired(now) {
            if self
                .drafts
                .remove_if(&session_id, |_, d| d.is_expired(now))
                .is_some()
            {
                purged += 1;
            }
        }
        if purged > 0 {
            metrics::counter!(observability::DRAFTS_EXPIRED_TOTAL).increment(purged as u64);
            metrics::gauge!(observability::DRAFTS_ACTIVE).set(self.drafts.len() as f64);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }
}
