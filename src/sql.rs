use std::collections::BTreeMap;

use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::UserProfile;
use crate::model::*;

/// Which reservations a `SELECT * FROM reservations` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    New,
    Processed,
    Id(Ulid),
}

/// Guest fields named in an `UPDATE reservations SET ...`. Unnamed fields keep
/// their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl GuestChanges {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
    }

    pub fn apply(self, current: GuestInfo) -> GuestInfo {
        GuestInfo {
            first_name: self.first_name.unwrap_or(current.first_name),
            last_name: self.last_name.unwrap_or(current.last_name),
            email: self.email.unwrap_or(current.email),
            phone: self.phone.unwrap_or(current.phone),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub access_level: Option<u8>,
}

impl UserChanges {
    pub fn apply(self, current: &User) -> UserProfile {
        UserProfile {
            first_name: self.first_name.unwrap_or_else(|| current.first_name.clone()),
            last_name: self.last_name.unwrap_or_else(|| current.last_name.clone()),
            email: self.email.unwrap_or_else(|| current.email.clone()),
            access_level: self.access_level.unwrap_or(current.access_level),
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRooms {
        names: Vec<String>,
        returning: bool,
    },
    SelectRooms {
        id: Option<Ulid>,
    },
    /// With a session id the dates are also remembered as that session's draft.
    SelectAvailableRooms {
        check_in: Date,
        check_out: Date,
        session_id: Option<String>,
    },
    SelectRoomAvailability {
        room_id: Ulid,
        check_in: Date,
        check_out: Date,
    },
    InsertReservation {
        guest: GuestInfo,
        room_id: Ulid,
        check_in: Date,
        check_out: Date,
        returning: bool,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    UpdateReservation {
        id: Ulid,
        changes: GuestChanges,
    },
    UpdateProcessed {
        id: Ulid,
        processed: bool,
    },
    DeleteReservation {
        id: Ulid,
    },
    /// An owner block. Without `end_date` it covers the single night of `start_date`.
    InsertRestriction {
        room_id: Ulid,
        start_date: Date,
        end_date: Option<Date>,
        returning: bool,
    },
    SelectRoomRestrictions {
        room_id: Ulid,
        start_date: Date,
        end_date: Date,
    },
    DeleteRestriction {
        id: Ulid,
    },
    SelectOccupancy {
        year: i32,
        month: u32,
    },
    SelectRestrictions,
    InsertDraft {
        session_id: String,
        check_in: Date,
        check_out: Date,
        room_id: Option<Ulid>,
    },
    UpdateDraft {
        session_id: String,
        room_id: Ulid,
    },
    SelectDraft {
        session_id: String,
    },
    DeleteDraft {
        session_id: String,
    },
    InsertBooking {
        session_id: String,
        guest: GuestInfo,
        returning: bool,
    },
    InsertUser {
        profile: UserProfile,
        password: String,
        returning: bool,
    },
    SelectUser {
        id: Ulid,
    },
    UpdateUser {
        id: Ulid,
        changes: UserChanges,
    },
    SelectLogin {
        email: String,
        password: String,
    },
}

/// Row layout a statement produces, known before its parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Rooms,
    RoomAvailability,
    Reservations,
    RoomRestrictions,
    Occupancy,
    Restrictions,
    Drafts,
    Users,
    Login,
    /// `INSERT ... RETURNING id`
    Id,
}

impl Command {
    pub fn shape(&self) -> Option<Shape> {
        match self {
            Command::SelectRooms { .. } | Command::SelectAvailableRooms { .. } => Some(Shape::Rooms),
            Command::SelectRoomAvailability { .. } => Some(Shape::RoomAvailability),
            Command::SelectReservations { .. } => Some(Shape::Reservations),
            Command::SelectRoomRestrictions { .. } => Some(Shape::RoomRestrictions),
            Command::SelectOccupancy { .. } => Some(Shape::Occupancy),
            Command::SelectRestrictions => Some(Shape::Restrictions),
            Command::SelectDraft { .. } => Some(Shape::Drafts),
            Command::SelectUser { .. } => Some(Shape::Users),
            Command::SelectLogin { .. } => Some(Shape::Login),
            Command::InsertRooms { returning, .. }
            | Command::InsertReservation { returning, .. }
            | Command::InsertRestriction { returning, .. }
            | Command::InsertBooking { returning, .. }
            | Command::InsertUser { returning, .. } => returning.then_some(Shape::Id),
            _ => None,
        }
    }
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    Ok(stmts.remove(0))
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match &parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// The result layout of a statement that may still hold `$n` placeholders.
pub fn shape_of(sql: &str) -> Option<Shape> {
    match parse_statement(sql).ok()? {
        Statement::Insert(insert) => insert.returning.as_ref().map(|_| Shape::Id),
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let table = table_factor_name(&select.from.first()?.relation).ok()?;
            select_shape(&table)
        }
        _ => None,
    }
}

fn select_shape(table: &str) -> Option<Shape> {
    Some(match table {
        "rooms" | "available_rooms" => Shape::Rooms,
        "room_availability" => Shape::RoomAvailability,
        "reservations" => Shape::Reservations,
        "room_restrictions" => Shape::RoomRestrictions,
        "occupancy" => Shape::Occupancy,
        "restrictions" => Shape::Restrictions,
        "drafts" => Shape::Drafts,
        "users" => Shape::Users,
        "login" => Shape::Login,
        _ => return None,
    })
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by the INSERT's column list.
struct Row(BTreeMap<String, Expr>);

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.0.get(column).filter(|e| !is_null(e))
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string(self.required(column)?, column)
    }

    fn string_or_empty(&self, column: &'static str) -> Result<String, SqlError> {
        self.get(column)
            .map(|e| parse_string(e, column))
            .transpose()
            .map(Option::unwrap_or_default)
    }

    fn date(&self, column: &'static str) -> Result<Date, SqlError> {
        parse_date(self.required(column)?, column)
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.required(column)?, column)
    }

    fn guest(&self) -> Result<GuestInfo, SqlError> {
        Ok(GuestInfo {
            first_name: self.string_or_empty("first_name")?,
            last_name: self.string_or_empty("last_name")?,
            email: self.string_or_empty("email")?,
            phone: self.string_or_empty("phone")?,
        })
    }
}

fn insert_rows(insert: &ast::Insert) -> Result<Vec<Row>, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let SetExpr::Values(values) = body.body.as_ref() else {
        return Err(SqlError::Parse("expected VALUES".into()));
    };
    if values.rows.is_empty() {
        return Err(SqlError::Parse("empty VALUES".into()));
    }
    values
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() != columns.len() {
                return Err(SqlError::Parse(format!(
                    "row {i}: expected {} values, got {}",
                    columns.len(),
                    row.len()
                )));
            }
            Ok(Row(columns.iter().cloned().zip(row.iter().cloned()).collect()))
        })
        .collect()
}

fn single_row(table: &'static str, mut rows: Vec<Row>) -> Result<Row, SqlError> {
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    Ok(rows.remove(0))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = insert_rows(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "rooms" => {
            let names = rows
                .iter()
                .map(|row| row.string("name"))
                .collect::<Result<_, _>>()?;
            Ok(Command::InsertRooms { names, returning })
        }
        "reservations" => {
            let row = single_row("reservations", rows)?;
            Ok(Command::InsertReservation {
                guest: row.guest()?,
                room_id: row.ulid("room_id")?,
                check_in: row.date("check_in")?,
                check_out: row.date("check_out")?,
                returning,
            })
        }
        "room_restrictions" => {
            let row = single_row("room_restrictions", rows)?;
            if let Some(kind) = row.get("restriction_id") {
                let id = parse_i64(kind, "restriction_id")?;
                if id != i64::from(RestrictionKind::OwnerBlock.id()) {
                    return Err(SqlError::Unsupported(
                        "only owner blocks can be inserted directly".into(),
                    ));
                }
            }
            Ok(Command::InsertRestriction {
                room_id: row.ulid("room_id")?,
                start_date: row.date("start_date")?,
                end_date: row.get("end_date").map(|e| parse_date(e, "end_date")).transpose()?,
                returning,
            })
        }
        "drafts" => {
            let row = single_row("drafts", rows)?;
            Ok(Command::InsertDraft {
                session_id: row.string("session_id")?,
                check_in: row.date("check_in")?,
                check_out: row.date("check_out")?,
                room_id: row.get("room_id").map(|e| parse_ulid(e, "room_id")).transpose()?,
            })
        }
        "bookings" => {
            let row = single_row("bookings", rows)?;
            Ok(Command::InsertBooking {
                session_id: row.string("session_id")?,
                guest: row.guest()?,
                returning,
            })
        }
        "users" => {
            let row = single_row("users", rows)?;
            let access_level = match row.get("access_level") {
                Some(e) => parse_u8(e, "access_level")?,
                None => 1,
            };
            Ok(Command::InsertUser {
                profile: UserProfile {
                    first_name: row.string_or_empty("first_name")?,
                    last_name: row.string_or_empty("last_name")?,
                    email: row.string("email")?,
                    access_level,
                },
                password: row.string("password")?,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn assignment_map(assignments: &[ast::Assignment]) -> Result<BTreeMap<String, Expr>, SqlError> {
    let mut map = BTreeMap::new();
    for a in assignments {
        let AssignmentTarget::ColumnName(name) = &a.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let column = object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?;
        map.insert(column, a.value.clone());
    }
    Ok(map)
}

fn take_string(
    set: &mut BTreeMap<String, Expr>,
    column: &'static str,
) -> Result<Option<String>, SqlError> {
    set.remove(column).map(|e| parse_string(&e, column)).transpose()
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set = assignment_map(assignments)?;
    let filters = Filters::from_selection(selection)?;

    let command = match table.as_str() {
        "reservations" => {
            let id = filters.ulid("id")?;
            if let Some(processed) = set.remove("processed") {
                if !set.is_empty() {
                    return Err(SqlError::Unsupported(
                        "processed cannot be combined with other columns".into(),
                    ));
                }
                return Ok(Command::UpdateProcessed {
                    id,
                    processed: parse_bool(&processed, "processed")?,
                });
            }
            let changes = GuestChanges {
                first_name: take_string(&mut set, "first_name")?,
                last_name: take_string(&mut set, "last_name")?,
                email: take_string(&mut set, "email")?,
                phone: take_string(&mut set, "phone")?,
            };
            if changes.is_empty() {
                return Err(SqlError::Parse("nothing to update".into()));
            }
            Command::UpdateReservation { id, changes }
        }
        "drafts" => Command::UpdateDraft {
            session_id: filters.string("session_id")?,
            room_id: parse_ulid(
                &set.remove("room_id").ok_or(SqlError::MissingColumn("room_id"))?,
                "room_id",
            )?,
        },
        "users" => {
            let id = filters.ulid("id")?;
            let access_level = set
                .remove("access_level")
                .map(|e| parse_u8(&e, "access_level"))
                .transpose()?;
            Command::UpdateUser {
                id,
                changes: UserChanges {
                    first_name: take_string(&mut set, "first_name")?,
                    last_name: take_string(&mut set, "last_name")?,
                    email: take_string(&mut set, "email")?,
                    access_level,
                },
            }
        }
        _ => return Err(SqlError::UnknownTable(table)),
    };

    if let Some(column) = set.keys().next() {
        return Err(SqlError::Unsupported(format!("cannot update column {column}")));
    }
    Ok(command)
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::DeleteReservation { id: filters.ulid("id")? }),
        "room_restrictions" => Ok(Command::DeleteRestriction { id: filters.ulid("id")? }),
        "drafts" => Ok(Command::DeleteDraft {
            session_id: filters.string("session_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::from_selection(&select.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms {
            id: filters.get("id").map(|e| parse_ulid(e, "id")).transpose()?,
        }),
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            check_in: filters.date("check_in")?,
            check_out: filters.date("check_out")?,
            session_id: filters
                .get("session_id")
                .map(|e| parse_string(e, "session_id"))
                .transpose()?,
        }),
        "room_availability" => Ok(Command::SelectRoomAvailability {
            room_id: filters.ulid("room_id")?,
            check_in: filters.date("check_in")?,
            check_out: filters.date("check_out")?,
        }),
        "reservations" => {
            let filter = if let Some(id) = filters.get("id") {
                ReservationFilter::Id(parse_ulid(id, "id")?)
            } else if let Some(processed) = filters.get("processed") {
                if parse_bool(processed, "processed")? {
                    ReservationFilter::Processed
                } else {
                    ReservationFilter::New
                }
            } else {
                ReservationFilter::All
            };
            Ok(Command::SelectReservations { filter })
        }
        "room_restrictions" => Ok(Command::SelectRoomRestrictions {
            room_id: filters.ulid("room_id")?,
            start_date: filters.date("start_date")?,
            end_date: filters.date("end_date")?,
        }),
        "occupancy" => {
            let year = filters.i64("year")?;
            let month = filters.i64("month")?;
            Ok(Command::SelectOccupancy {
                year: i32::try_from(year).map_err(|_| SqlError::Parse(format!("year {year} out of range")))?,
                month: u32::try_from(month)
                    .map_err(|_| SqlError::Parse(format!("month {month} out of range")))?,
            })
        }
        "restrictions" => Ok(Command::SelectRestrictions),
        "drafts" => Ok(Command::SelectDraft {
            session_id: filters.string("session_id")?,
        }),
        "users" => Ok(Command::SelectUser { id: filters.ulid("id")? }),
        "login" => Ok(Command::SelectLogin {
            email: filters.string("email")?,
            password: filters.string("password")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col op value` terms of a WHERE clause made only of ANDs.
struct Filters(Vec<(String, Expr)>);

impl Filters {
    fn from_selection(selection: &Option<Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Filters(terms))
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.required(column)?, column)
    }

    fn date(&self, column: &'static str) -> Result<Date, SqlError> {
        parse_date(self.required(column)?, column)
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string(self.required(column)?, column)
    }

    fn i64(&self, column: &'static str) -> Result<i64, SqlError> {
        parse_i64(self.required(column)?, column)
    }
}

fn collect_terms(expr: &Expr, terms: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_terms(inner, terms),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => {
                collect_terms(left, terms)?;
                collect_terms(right, terms)
            }
            BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                terms.push((column, (**right).clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn bad(column: &str, message: impl std::fmt::Display) -> SqlError {
    SqlError::Parse(format!("{column}: {message}"))
}

fn parse_string(expr: &Expr, column: &str) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(bad(column, format!("expected string, got {value}"))),
        None => Err(bad(column, format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr, column: &str) -> Result<Ulid, SqlError> {
    let s = parse_string(expr, column)?;
    Ulid::from_string(&s).map_err(|e| bad(column, format!("bad id {s:?}: {e}")))
}

fn parse_date(expr: &Expr, column: &str) -> Result<Date, SqlError> {
    let s = parse_string(expr, column)?;
    Date::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| bad(column, format!("bad date {s:?}: {e}")))
}

fn parse_i64(expr: &Expr, column: &str) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr, column)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.trim().parse().map_err(|e| bad(column, format!("bad integer {s:?}: {e}")))
        }
        Some(value) => Err(bad(column, format!("expected number, got {value}"))),
        None => Err(bad(column, format!("expected value, got {expr}"))),
    }
}

fn parse_u8(expr: &Expr, column: &str) -> Result<u8, SqlError> {
    let v = parse_i64(expr, column)?;
    u8::try_from(v).map_err(|_| bad(column, format!("{v} out of range")))
}

fn parse_bool(expr: &Expr, column: &str) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(bad(column, format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(bad(column, format!("expected bool, got {value}"))),
        None => Err(bad(column, format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn d(s: &str) -> Date {
        s.parse().unwrap()
    }

    #[test]
    fn parse_insert_rooms() {
        let cmd = parse_sql("INSERT INTO rooms (name) VALUES ('General''s Quarters'), ('Major''s Suite')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertRooms {
                names: vec!["General's Quarters".into(), "Major's Suite".into()],
                returning: false,
            }
        );
        let cmd = parse_sql("INSERT INTO rooms (name) VALUES ('A') RETURNING id").unwrap();
        assert_eq!(cmd.shape(), Some(Shape::Id));
    }

    #[test]
    fn parse_select_rooms() {
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms { id: None });
        let cmd = parse_sql(&format!("SELECT * FROM rooms WHERE id = '{ID}'")).unwrap();
        assert_eq!(cmd, Command::SelectRooms { id: Some(ID.parse().unwrap()) });
    }

    #[test]
    fn parse_available_rooms() {
        let sql = "SELECT * FROM available_rooms WHERE check_in = '2024-01-01' AND check_out = '2024-01-05'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailableRooms {
                check_in: d("2024-01-01"),
                check_out: d("2024-01-05"),
                session_id: None,
            }
        );

        let sql = "SELECT * FROM available_rooms WHERE check_in = '2024-01-01' AND check_out = '2024-01-05' AND session_id = 'abc'";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailableRooms { session_id, .. } => assert_eq!(session_id.as_deref(), Some("abc")),
            other => panic!("expected SelectAvailableRooms, got {other:?}"),
        }
    }

    #[test]
    fn parse_room_availability() {
        let sql = format!(
            "SELECT * FROM room_availability WHERE room_id = '{ID}' AND check_in = '2024-01-01' AND check_out = '2024-01-02'"
        );
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectRoomAvailability { .. }));
    }

    #[test]
    fn parse_insert_reservation_by_column_name() {
        let sql = format!(
            "INSERT INTO reservations (room_id, check_out, check_in, first_name, last_name, email, phone) \
             VALUES ('{ID}', '2024-01-05', '2024-01-01', 'Ada', 'Lovelace', 'ada@example.com', NULL) RETURNING id"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation {
                guest,
                check_in,
                check_out,
                returning,
                ..
            } => {
                assert_eq!(guest.first_name, "Ada");
                assert_eq!(guest.phone, "");
                assert_eq!(check_in, d("2024-01-01"));
                assert_eq!(check_out, d("2024-01-05"));
                assert!(returning);
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn insert_reservation_requires_dates() {
        let sql = format!("INSERT INTO reservations (room_id, check_in) VALUES ('{ID}', '2024-01-01')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("check_out"))));
    }

    #[test]
    fn bad_date_is_a_parse_error() {
        let sql = "SELECT * FROM available_rooms WHERE check_in = '2024-02-30' AND check_out = '2024-03-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_reservations_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations { filter: ReservationFilter::All }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations WHERE processed = false").unwrap(),
            Command::SelectReservations { filter: ReservationFilter::New }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reservations WHERE id = '{ID}'")).unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::Id(ID.parse().unwrap())
            }
        );
    }

    #[test]
    fn parse_update_reservation() {
        let sql = format!("UPDATE reservations SET email = 'new@example.com', phone = '555' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateReservation { changes, .. } => {
                assert_eq!(changes.email.as_deref(), Some("new@example.com"));
                assert_eq!(changes.first_name, None);
            }
            other => panic!("expected UpdateReservation, got {other:?}"),
        }

        let sql = format!("UPDATE reservations SET processed = true WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateProcessed {
                id: ID.parse().unwrap(),
                processed: true
            }
        );

        let sql = format!("UPDATE reservations SET processed = true, email = 'x' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));

        let sql = format!("UPDATE reservations SET room_id = '{ID}' WHERE id = '{ID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn guest_changes_keep_unnamed_fields() {
        let current = GuestInfo {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "1".into(),
        };
        let changes = GuestChanges {
            phone: Some("2".into()),
            ..Default::default()
        };
        let merged = changes.apply(current.clone());
        assert_eq!(merged.phone, "2");
        assert_eq!(merged.first_name, current.first_name);
    }

    #[test]
    fn parse_restrictions() {
        let sql = format!("INSERT INTO room_restrictions (room_id, start_date) VALUES ('{ID}', '2024-03-31')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRestriction {
                room_id: ID.parse().unwrap(),
                start_date: d("2024-03-31"),
                end_date: None,
                returning: false,
            }
        );

        let sql = format!(
            "INSERT INTO room_restrictions (room_id, start_date, end_date, restriction_id) VALUES ('{ID}', '2024-03-01', '2024-03-04', 1)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));

        let sql = format!(
            "SELECT * FROM room_restrictions WHERE room_id = '{ID}' AND start_date >= '2024-03-01' AND end_date <= '2024-03-31'"
        );
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectRoomRestrictions { .. }));

        let sql = format!("DELETE FROM room_restrictions WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteRestriction { .. }));
    }

    #[test]
    fn parse_occupancy() {
        assert_eq!(
            parse_sql("SELECT * FROM occupancy WHERE year = 2024 AND month = 3").unwrap(),
            Command::SelectOccupancy { year: 2024, month: 3 }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM occupancy WHERE year = 2024"),
            Err(SqlError::MissingFilter("month"))
        ));
    }

    #[test]
    fn parse_draft_flow() {
        let sql = "INSERT INTO drafts (session_id, check_in, check_out) VALUES ('s1', '2024-01-01', '2024-01-03')";
        assert!(matches!(parse_sql(sql).unwrap(), Command::InsertDraft { room_id: None, .. }));

        let sql = format!("UPDATE drafts SET room_id = '{ID}' WHERE session_id = 's1'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateDraft {
                session_id: "s1".into(),
                room_id: ID.parse().unwrap()
            }
        );

        let sql = "INSERT INTO bookings (session_id, first_name, last_name, email, phone) VALUES ('s1', 'Ada', 'Lovelace', 'ada@example.com', '') RETURNING id";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { session_id, guest, returning } => {
                assert_eq!(session_id, "s1");
                assert_eq!(guest.last_name, "Lovelace");
                assert!(returning);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }

        assert!(matches!(
            parse_sql("DELETE FROM drafts WHERE session_id = 's1'").unwrap(),
            Command::DeleteDraft { .. }
        ));
    }

    #[test]
    fn parse_users_and_login() {
        let sql = "INSERT INTO users (first_name, last_name, email, password, access_level) VALUES ('Ada', 'L', 'admin@here.com', 'secret', 3)";
        match parse_sql(sql).unwrap() {
            Command::InsertUser { profile, password, .. } => {
                assert_eq!(profile.access_level, 3);
                assert_eq!(password, "secret");
            }
            other => panic!("expected InsertUser, got {other:?}"),
        }

        let sql = "SELECT * FROM login WHERE email = 'admin@here.com' AND password = 'secret'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectLogin {
                email: "admin@here.com".into(),
                password: "secret".into()
            }
        );

        let sql = format!("UPDATE users SET access_level = 1 WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateUser { changes, .. } => assert_eq!(changes.access_level, Some(1)),
            other => panic!("expected UpdateUser, got {other:?}"),
        }
    }

    #[test]
    fn placeholders_still_describe() {
        assert_eq!(
            shape_of("SELECT * FROM available_rooms WHERE check_in = $1 AND check_out = $2"),
            Some(Shape::Rooms)
        );
        assert_eq!(shape_of("INSERT INTO bookings (session_id) VALUES ($1) RETURNING id"), Some(Shape::Id));
        assert_eq!(shape_of("DELETE FROM drafts WHERE session_id = $1"), None);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse_sql("INSERT INTO foobar (id) VALUES ('x')"),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM rooms WHERE name LIKE 'A%'"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(parse_sql("INSERT INTO rooms VALUES ('A')"), Err(SqlError::Parse(_))));
    }
}
