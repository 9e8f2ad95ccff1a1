use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::InnkeepAuthSource;
use crate::drafts::DraftError;
use crate::engine::{DayState, EngineError};
use crate::front_desk::{BookingError, FrontDesk};
use crate::model::*;
use crate::observability;
use crate::repository::Repository;
use crate::sql::{self, Command, ReservationFilter, Shape};

pub struct InnkeepHandler {
    repo: Arc<dyn Repository>,
    desk: Arc<FrontDesk>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(repo: Arc<dyn Repository>, desk: Arc<FrontDesk>) -> Self {
        Self {
            repo,
            desk,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    async fn run(&self, query: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let repo = &self.repo;
        match cmd {
            Command::InsertRooms { names, returning } => {
                let mut ids = Vec::with_capacity(names.len());
                for name in &names {
                    ids.push(repo.create_room(name).await.map_err(store_err)?.id);
                }
                inserted(format, ids, returning)
            }
            Command::SelectRooms { id } => {
                let rooms = match id {
                    None => repo.all_rooms().await.map_err(store_err)?,
                    Some(id) => found(repo.get_room_by_id(id).await)?,
                };
                room_rows(format, rooms)
            }
            Command::SelectAvailableRooms {
                check_in,
                check_out,
                session_id,
            } => {
                let rooms = match session_id {
                    Some(session_id) => self
                        .desk
                        .search(&session_id, check_in, check_out)
                        .await
                        .map_err(booking_err)?,
                    None => repo
                        .search_availability(check_in, check_out)
                        .await
                        .map_err(store_err)?,
                };
                room_rows(format, rooms)
            }
            Command::SelectRoomAvailability {
                room_id,
                check_in,
                check_out,
            } => {
                let available = repo
                    .is_room_available(check_in, check_out, room_id)
                    .await
                    .map_err(store_err)?;
                rows(format, Shape::RoomAvailability, [available], |enc, available| {
                    enc.encode_field(&room_id.to_string())?;
                    enc.encode_field(&available)
                })
            }
            Command::InsertReservation {
                guest,
                room_id,
                check_in,
                check_out,
                returning,
            } => {
                let reservation = repo
                    .create_reservation(guest, room_id, check_in, check_out)
                    .await
                    .map_err(store_err)?;
                inserted(format, vec![reservation.id], returning)
            }
            Command::SelectReservations { filter } => {
                let reservations = match filter {
                    ReservationFilter::All => repo.all_reservations().await.map_err(store_err)?,
                    ReservationFilter::New => repo.all_new_reservations().await.map_err(store_err)?,
                    ReservationFilter::Processed => repo
                        .all_reservations()
                        .await
                        .map_err(store_err)?
                        .into_iter()
                        .filter(|r| r.processed)
                        .collect(),
                    ReservationFilter::Id(id) => found(repo.get_reservation_by_id(id).await)?,
                };
                let room_names: HashMap<Ulid, String> = repo
                    .all_rooms()
                    .await
                    .map_err(store_err)?
                    .into_iter()
                    .map(|room| (room.id, room.name))
                    .collect();
                rows(format, Shape::Reservations, reservations, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.guest.first_name)?;
                    enc.encode_field(&r.guest.last_name)?;
                    enc.encode_field(&r.guest.email)?;
                    enc.encode_field(&r.guest.phone)?;
                    enc.encode_field(&r.stay.start.to_string())?;
                    enc.encode_field(&r.stay.end.to_string())?;
                    enc.encode_field(&r.room_id.to_string())?;
                    enc.encode_field(&room_names.get(&r.room_id).cloned())?;
                    enc.encode_field(&r.processed)?;
                    enc.encode_field(&r.created_at.to_rfc3339())?;
                    enc.encode_field(&r.updated_at.to_rfc3339())
                })
            }
            Command::UpdateReservation { id, changes } => {
                let current = repo.get_reservation_by_id(id).await.map_err(store_err)?;
                repo.update_reservation(id, changes.apply(current.guest))
                    .await
                    .map_err(store_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpdateProcessed { id, processed } => {
                repo.update_processed_reservation(id, processed)
                    .await
                    .map_err(store_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteReservation { id } => {
                repo.delete_reservation(id).await.map_err(store_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertRestriction {
                room_id,
                start_date,
                end_date,
                returning,
            } => {
                let restriction = match end_date {
                    None => repo.add_block(room_id, start_date).await,
                    Some(end_date) => {
                        repo.create_room_restriction(
                            room_id,
                            start_date,
                            end_date,
                            RestrictionKind::OwnerBlock,
                        )
                        .await
                    }
                }
                .map_err(store_err)?;
                inserted(format, vec![restriction.id], returning)
            }
            Command::SelectRoomRestrictions {
                room_id,
                start_date,
                end_date,
            } => {
                let restrictions = repo
                    .get_restrictions_for_room_by_date(room_id, start_date, end_date)
                    .await
                    .map_err(store_err)?;
                rows(format, Shape::RoomRestrictions, restrictions, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.room_id.to_string())?;
                    enc.encode_field(&r.stay.start.to_string())?;
                    enc.encode_field(&r.stay.end.to_string())?;
                    enc.encode_field(&r.reservation_id.map(|id| id.to_string()))?;
                    enc.encode_field(&i64::from(r.kind.id()))?;
                    enc.encode_field(&r.kind.label().to_string())
                })
            }
            Command::DeleteRestriction { id } => {
                repo.remove_block(id).await.map_err(store_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectOccupancy { year, month } => {
                let rooms = repo.month_occupancy(year, month).await.map_err(store_err)?;
                let days = rooms.iter().flat_map(|occ| {
                    occ.days
                        .iter()
                        .map(move |(date, state)| (&occ.room, *date, *state))
                });
                rows(format, Shape::Occupancy, days, |enc, (room, date, state)| {
                    let (label, ref_id) = match state {
                        DayState::Free => ("free", None),
                        DayState::Reserved(id) => ("reserved", Some(id.to_string())),
                        DayState::Blocked(id) => ("blocked", Some(id.to_string())),
                    };
                    enc.encode_field(&room.id.to_string())?;
                    enc.encode_field(&room.name)?;
                    enc.encode_field(&date.to_string())?;
                    enc.encode_field(&label.to_string())?;
                    enc.encode_field(&ref_id)
                })
            }
            Command::SelectRestrictions => {
                let kinds = repo.restrictions().await.map_err(store_err)?;
                rows(format, Shape::Restrictions, kinds, |enc, kind| {
                    enc.encode_field(&i64::from(kind.id))?;
                    enc.encode_field(&kind.name)
                })
            }
            Command::InsertDraft {
                session_id,
                check_in,
                check_out,
                room_id,
            } => {
                match room_id {
                    Some(room_id) => {
                        self.desk
                            .book_room(&session_id, room_id, check_in, check_out)
                            .await
                            .map_err(booking_err)?;
                    }
                    None => {
                        self.desk
                            .drafts()
                            .start(&session_id, Stay::new(check_in, check_out))
                            .map_err(|e| booking_err(e.into()))?;
                    }
                }
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateDraft {
                session_id,
                room_id,
            } => {
                self.desk
                    .choose_room(&session_id, room_id)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectDraft { session_id } => {
                let draft = self.desk.drafts().get(&session_id);
                rows(format, Shape::Drafts, draft, |enc, draft| {
                    enc.encode_field(&draft.session_id)?;
                    enc.encode_field(&draft.stay.start.to_string())?;
                    enc.encode_field(&draft.stay.end.to_string())?;
                    enc.encode_field(&draft.room_id.map(|id| id.to_string()))?;
                    enc.encode_field(&draft.expires_at.to_rfc3339())
                })
            }
            Command::DeleteDraft { session_id } => {
                // An expired draft is already gone as far as callers can tell.
                let removed = self.desk.drafts().take(&session_id).is_some();
                Ok(Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(removed)),
                ))
            }
            Command::InsertBooking {
                session_id,
                guest,
                returning,
            } => {
                let reservation = self
                    .desk
                    .submit(&session_id, guest)
                    .await
                    .map_err(booking_err)?;
                inserted(format, vec![reservation.id], returning)
            }
            Command::InsertUser {
                profile,
                password,
                returning,
            } => {
                let user = repo
                    .create_user(profile, &password)
                    .await
                    .map_err(store_err)?;
                inserted(format, vec![user.id], returning)
            }
            Command::SelectUser { id } => {
                let users = found(repo.get_user_by_id(id).await)?;
                rows(format, Shape::Users, users, |enc, user| {
                    enc.encode_field(&user.id.to_string())?;
                    enc.encode_field(&user.first_name)?;
                    enc.encode_field(&user.last_name)?;
                    enc.encode_field(&user.email)?;
                    enc.encode_field(&i64::from(user.access_level))?;
                    enc.encode_field(&user.created_at.to_rfc3339())?;
                    enc.encode_field(&user.updated_at.to_rfc3339())
                })
            }
            Command::UpdateUser { id, changes } => {
                let current = repo.get_user_by_id(id).await.map_err(store_err)?;
                repo.update_user(id, changes.apply(&current))
                    .await
                    .map_err(store_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectLogin { email, password } => {
                let user_id = match repo.authenticate(&email, &password).await {
                    Ok(id) => id,
                    Err(e) => {
                        if matches!(e, EngineError::InvalidCredentials) {
                            metrics::counter!(observability::LOGIN_FAILURES_TOTAL).increment(1);
                        }
                        return Err(store_err(e));
                    }
                };
                rows(format, Shape::Login, [user_id], |enc, id| {
                    enc.encode_field(&id.to_string())
                })
            }
        }
    }
}

/// A by-id lookup as a result set: not found is zero rows.
fn found<T>(result: Result<T, EngineError>) -> PgWireResult<Vec<T>> {
    match result {
        Ok(item) => Ok(vec![item]),
        Err(EngineError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(store_err(e)),
    }
}

fn inserted(format: &Format, ids: Vec<Ulid>, returning: bool) -> PgWireResult<Response> {
    if returning {
        return rows(format, Shape::Id, ids, |enc, id| enc.encode_field(&id.to_string()));
    }
    Ok(Response::Execution(Tag::new("INSERT").with_rows(ids.len())))
}

fn room_rows(format: &Format, rooms: Vec<Room>) -> PgWireResult<Response> {
    rows(format, Shape::Rooms, rooms, |enc, room| {
        enc.encode_field(&room.id.to_string())?;
        enc.encode_field(&room.name)?;
        enc.encode_field(&room.created_at.to_rfc3339())?;
        enc.encode_field(&room.updated_at.to_rfc3339())
    })
}

fn rows<T>(
    format: &Format,
    shape: Shape,
    items: impl IntoIterator<Item = T>,
    mut encode: impl FnMut(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema(shape, format));
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    )))
}

fn columns(shape: Shape) -> Vec<(&'static str, Type)> {
    let text = |name| (name, Type::VARCHAR);
    match shape {
        Shape::Rooms => vec![text("id"), text("name"), text("created_at"), text("updated_at")],
        Shape::RoomAvailability => vec![text("room_id"), ("available", Type::BOOL)],
        Shape::Reservations => vec![
            text("id"),
            text("first_name"),
            text("last_name"),
            text("email"),
            text("phone"),
            text("check_in"),
            text("check_out"),
            text("room_id"),
            text("room_name"),
            ("processed", Type::BOOL),
            text("created_at"),
            text("updated_at"),
        ],
        Shape::RoomRestrictions => vec![
            text("id"),
            text("room_id"),
            text("start_date"),
            text("end_date"),
            text("reservation_id"),
            ("restriction_id", Type::INT8),
            text("restriction_name"),
        ],
        Shape::Occupancy => vec![
            text("room_id"),
            text("room_name"),
            text("date"),
            text("state"),
            text("ref_id"),
        ],
        Shape::Restrictions => vec![("id", Type::INT8), text("name")],
        Shape::Drafts => vec![
            text("session_id"),
            text("check_in"),
            text("check_out"),
            text("room_id"),
            text("expires_at"),
        ],
        Shape::Users => vec![
            text("id"),
            text("first_name"),
            text("last_name"),
            text("email"),
            ("access_level", Type::INT8),
            text("created_at"),
            text("updated_at"),
        ],
        Shape::Login => vec![text("user_id")],
        Shape::Id => vec![text("id")],
    }
}

/// Result columns, each in the format the client asked for.
fn schema(shape: Shape, format: &Format) -> Vec<FieldInfo> {
    columns(shape)
        .into_iter()
        .enumerate()
        .map(|(i, (name, ty))| FieldInfo::new(name.into(), None, None, ty, format.format_for(i)))
        .collect()
}

fn describe(sql: &str, format: &Format) -> Vec<FieldInfo> {
    sql::shape_of(sql)
        .map(|shape| schema(shape, format))
        .unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe(
            stmt,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql, &portal.result_column_format).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe(&target.statement, &Format::UnifiedText),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(repo: Arc<dyn Repository>, desk: Arc<FrontDesk>, password: String) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(repo, desk)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<InnkeepFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each store failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidCredentials => "28P01",
        EngineError::InvalidDates { .. }
        | EngineError::InvalidMonth { .. }
        | EngineError::InvalidTransition(_)
        | EngineError::Validation(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Timeout(_) => "57014",
        EngineError::WalError(_) | EngineError::Hash(_) => "XX000",
    }
}

fn store_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn booking_sqlstate(e: &BookingError) -> &'static str {
    match e {
        BookingError::Invalid(_) => "22023",
        BookingError::Draft(DraftError::Missing) => "P0002",
        BookingError::Draft(DraftError::Full) => "54000",
        BookingError::Draft(_) => "22023",
        BookingError::NoRoomChosen => "55000",
        BookingError::Unavailable => "23P01",
        BookingError::Store(inner) => sqlstate(inner),
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    user_error(booking_sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
