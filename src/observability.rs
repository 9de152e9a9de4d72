use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "aula_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "aula_query_duration_seconds";

/// Counter: booking requests accepted.
pub const BOOKINGS_REQUESTED_TOTAL: &str = "aula_bookings_requested_total";

/// Counter: approval-chain transitions. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "aula_transitions_total";

/// Counter: administrative hall reassignments.
pub const HALL_SWITCHES_TOTAL: &str = "aula_hall_switches_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "aula_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "aula_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "aula_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "aula_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "aula_wal_flush_batch_size";

/// Counter: best-effort emails handed to the transport.
pub const EMAILS_SENT_TOTAL: &str = "aula_emails_sent_total";

/// Counter: email deliveries that failed or timed out (logged, swallowed).
pub const EMAILS_FAILED_TOTAL: &str = "aula_emails_failed_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertHall { .. } => "insert_hall",
        Command::UpdateHallStatus { .. } => "update_hall_status",
        Command::InsertProfile { .. } => "insert_profile",
        Command::InsertBooking { .. } => "insert_booking",
        Command::ApproveBooking { .. } => "approve_booking",
        Command::RejectBooking { .. } => "reject_booking",
        Command::SwitchHall { .. } => "switch_hall",
        Command::MarkNotificationRead { .. } => "mark_notification_read",
        Command::SelectHalls => "select_halls",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectApprovals { .. } => "select_approvals",
        Command::SelectNotifications => "select_notifications",
        Command::SelectAvailability { .. } => "select_availability",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
    }
}
