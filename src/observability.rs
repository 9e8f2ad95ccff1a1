use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "innkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "innkeep_query_duration_seconds";

/// Counter: failed staff logins.
pub const LOGIN_FAILURES_TOTAL: &str = "innkeep_login_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Counter: store waits abandoned after the store timeout. Labels: op.
pub const STORE_TIMEOUTS_TOTAL: &str = "innkeep_store_timeouts_total";

// ── Booking flow ────────────────────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_BOOKED_TOTAL: &str = "innkeep_reservations_booked_total";

/// Counter: reservation inserts refused by the overlap check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "innkeep_booking_conflicts_total";

/// Gauge: reservations in progress held in the draft store.
pub const DRAFTS_ACTIVE: &str = "innkeep_drafts_active";

/// Counter: drafts dropped by the sweeper after expiring.
pub const DRAFTS_EXPIRED_TOTAL: &str = "innkeep_drafts_expired_total";

// ── Mail ────────────────────────────────────────────────────────

/// Counter: messages accepted onto the mail queue.
pub const MAIL_QUEUED_TOTAL: &str = "innkeep_mail_queued_total";

/// Counter: messages lost. Labels: reason (full, closed, delivery).
pub const MAIL_DROPPED_TOTAL: &str = "innkeep_mail_dropped_total";

/// Counter: messages handed to the sink successfully.
pub const MAIL_SENT_TOTAL: &str = "innkeep_mail_sent_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRooms { .. } => "insert_rooms",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectAvailableRooms { .. } => "select_available_rooms",
        Command::SelectRoomAvailability { .. } => "select_room_availability",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::UpdateProcessed { .. } => "update_processed",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::InsertRestriction { .. } => "insert_restriction",
        Command::SelectRoomRestrictions { .. } => "select_room_restrictions",
        Command::DeleteRestriction { .. } => "delete_restriction",
        Command::SelectOccupancy { .. } => "select_occupancy",
        Command::SelectRestrictions => "select_restrictions",
        Command::InsertDraft { .. } => "insert_draft",
        Command::UpdateDraft { .. } => "update_draft",
        Command::SelectDraft { .. } => "select_draft",
        Command::DeleteDraft { .. } => "delete_draft",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertUser { .. } => "insert_user",
        Command::SelectUser { .. } => "select_user",
        Command::UpdateUser { .. } => "update_user",
        Command::SelectLogin { .. } => "select_login",
    }
}
