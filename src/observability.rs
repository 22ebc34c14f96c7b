use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "chairtime_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "chairtime_query_duration_seconds";

/// Counter: bookings durably committed.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "chairtime_bookings_committed_total";

/// Counter: booking commits refused. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "chairtime_bookings_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "chairtime_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "chairtime_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "chairtime_connections_rejected_total";

/// Gauge: number of loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "chairtime_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairtime_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairtime_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProvider { .. } => "insert_provider",
        Command::DeleteProvider { .. } => "delete_provider",
        Command::SelectProviders => "select_providers",
        Command::SetWorkingDay { .. } => "set_working_day",
        Command::SelectTemplate { .. } => "select_template",
        Command::SetDateOverride { .. } => "set_date_override",
        Command::ClearDateOverride { .. } => "clear_date_override",
        Command::ToggleDateOverride { .. } => "toggle_date_override",
        Command::SelectWorkingDay { .. } => "select_working_day",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::InsertService { .. } => "insert_service",
        Command::DeleteService { .. } => "delete_service",
        Command::SelectServices { .. } => "select_services",
        Command::InsertClient { .. } => "insert_client",
        Command::DeleteClient { .. } => "delete_client",
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn labels_are_snake_case_per_command() {
        assert_eq!(command_label(&Command::SelectProviders), "select_providers");
        assert_eq!(
            command_label(&Command::DeleteBooking { id: Ulid::nil() }),
            "delete_booking"
        );
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
