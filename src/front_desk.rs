use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ulid::Ulid;

use crate::drafts::{Draft, DraftError, DraftStore};
use crate::engine::EngineError;
use crate::mail::{MailMessage, Mailer};
use crate::model::*;
use crate::repository::Repository;

/// Field name → messages, first message first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|m| m.first()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Loose structural email check: one `@`, something before it, a dotted
/// domain after it, no whitespace.
pub fn is_email(value: &str) -> bool {
    let value = value.trim();
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Rules of the reservation form.
pub fn validate_guest(guest: &GuestInfo) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    for (field, value) in [
        ("first_name", &guest.first_name),
        ("last_name", &guest.last_name),
        ("email", &guest.email),
    ] {
        if value.trim().is_empty() {
            errors.add(field, "This field is required");
        }
    }
    if !guest.first_name.trim().is_empty() && guest.first_name.chars().count() < 3 {
        errors.add("first_name", "This field must be at least 3 characters long");
    }
    if !guest.email.trim().is_empty() && !is_email(&guest.email) {
        errors.add("email", "Invalid email address");
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_dates(start: Date, end: Date) -> Result<Stay, ValidationErrors> {
    if start >= end {
        let mut errors = ValidationErrors::default();
        errors.add("check_out", "Check-out must be after check-in");
        return Err(errors);
    }
    Ok(Stay::new(start, end))
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("invalid form: {0}")]
    Invalid(ValidationErrors),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error("no room chosen for this reservation")]
    NoRoomChosen,
    #[error("room is no longer available for these dates")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] EngineError),
}

impl From<ValidationErrors> for BookingError {
    fn from(errors: ValidationErrors) -> Self {
        BookingError::Invalid(errors)
    }
}

/// Who the confirmation mails come from and go to.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub from: String,
    pub owner: String,
    pub template: Option<String>,
}

/// The guest booking flow: search, pick a room, submit details.
pub struct FrontDesk {
    repo: Arc<dyn Repository>,
    drafts: Arc<DraftStore>,
    mailer: Mailer,
    mail: MailSettings,
}

impl FrontDesk {
    pub fn new(
        repo: Arc<dyn Repository>,
        drafts: Arc<DraftStore>,
        mailer: Mailer,
        mail: MailSettings,
    ) -> Self {
        Self {
            repo,
            drafts,
            mailer,
            mail,
        }
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    /// Free rooms for the dates; remembers the dates for this session.
    pub async fn search(&self, session_id: &str, start: Date, end: Date) -> Result<Vec<Room>, BookingError> {
        let stay = validate_dates(start, end)?;
        let rooms = self.repo.search_availability(stay.start, stay.end).await?;
        self.drafts.start(session_id, stay)?;
        Ok(rooms)
    }

    pub async fn choose_room(&self, session_id: &str, room_id: Ulid) -> Result<Draft, BookingError> {
        self.repo.get_room_by_id(room_id).await?;
        Ok(self.drafts.choose_room(session_id, room_id)?)
    }

    pub async fn book_room(
        &self,
        session_id: &str,
        room_id: Ulid,
        start: Date,
        end: Date,
    ) -> Result<Draft, BookingError> {
        let stay = validate_dates(start, end)?;
        self.repo.get_room_by_id(room_id).await?;
        Ok(self.drafts.book_room(session_id, room_id, stay)?)
    }

    /// Turn the session's draft into a reservation. The draft survives a
    /// failed submit so the guest can correct the form.
    pub async fn submit(&self, session_id: &str, guest: GuestInfo) -> Result<Reservation, BookingError> {
        let draft = self.drafts.get(session_id).ok_or(DraftError::Missing)?;
        let room_id = draft.room_id.ok_or(BookingError::NoRoomChosen)?;
        validate_guest(&guest)?;

        let room = self.repo.get_room_by_id(room_id).await?;
        if !self
            .repo
            .is_room_available(draft.stay.start, draft.stay.end, room_id)
            .await?
        {
            return Err(BookingError::Unavailable);
        }

        let reservation = match self
            .repo
            .create_reservation(guest, room_id, draft.stay.start, draft.stay.end)
            .await
        {
            Ok(r) => r,
            // Lost the race between the check above and the insert.
            Err(EngineError::Conflict(_)) => return Err(BookingError::Unavailable),
            Err(e) => return Err(e.into()),
        };

        self.notify(&reservation, &room);
        self.drafts.discard(session_id);
        Ok(reservation)
    }

    fn notify(&self, reservation: &Reservation, room: &Room) {
        let guest = &reservation.guest;
        let check_in = reservation.stay.start.format("%Y-%m-%d");
        let check_out = reservation.stay.end.format("%Y-%m-%d");

        self.mailer.send(MailMessage {
            to: guest.email.clone(),
            from: self.mail.from.clone(),
            subject: "Reservation Confirmation".into(),
            content: format!(
                "<strong>Reservation Confirmation</strong><br>\
                 Dear {} {}:<br>\
                 This is to confirm your reservation from {check_in} to {check_out}.",
                guest.first_name, guest.last_name
            ),
            template: self.mail.template.clone(),
        });
        self.mailer.send(MailMessage {
            to: self.mail.owner.clone(),
            from: self.mail.from.clone(),
            subject: "Reservation Notification".into(),
            content: format!(
                "<strong>Reservation Notification</strong><br>\
                 A reservation has been made for {} from {check_in} to {check_out}.",
                room.name
            ),
            template: self.mail.template.clone(),
        });
    }
}
