use std::net::SocketAddr;

use crate::engine::{BookingOutcome, EngineError, Rejection};
use crate::store::StoreError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking requests by outcome. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "camperbook_bookings_total";

/// Histogram: booking request latency in seconds, lock wait included.
pub const BOOKING_DURATION_SECONDS: &str = "camperbook_booking_duration_seconds";

/// Counter: front-end requests. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "camperbook_requests_total";

/// Counter: compare-and-swap saves that lost to a concurrent writer.
pub const STORE_VERSION_CONFLICTS_TOTAL: &str = "camperbook_store_version_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "camperbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "camperbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "camperbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "camperbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "camperbook_wal_flush_batch_size";

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

/// Short label for the `outcome` dimension of [`BOOKINGS_TOTAL`].
pub fn outcome_label(result: &Result<BookingOutcome, EngineError>) -> &'static str {
    match result {
        Ok(BookingOutcome::Booked(_)) => "booked",
        Ok(BookingOutcome::Rejected { reason: Rejection::InvalidRange(_), .. }) => "invalid_range",
        Ok(BookingOutcome::Rejected { reason: Rejection::Overlap { .. }, .. }) => "overlap",
        Err(EngineError::NotFound(_)) => "not_found",
        Err(EngineError::Store(StoreError::Unconfirmed(_))) => "unconfirmed",
        Err(EngineError::Store(_)) => "io_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DateRange, Item, NewItem, Price};
    use std::time::Duration;
    use ulid::Ulid;

    #[test]
    fn outcome_labels() {
        let item = Item::new(
            Ulid::new(),
            Ulid::new(),
            NewItem {
                title: "Van".into(),
                description: None,
                price_per_day: Price::from_cents(100),
                image: None,
            },
        )
        .unwrap();
        let range = DateRange::parse("2024-01-01", "2024-01-02").unwrap();

        assert_eq!(outcome_label(&Ok(BookingOutcome::Booked(item.clone()))), "booked");
        let overlap = Ok(BookingOutcome::Rejected {
            reason: Rejection::Overlap { existing: range },
            item,
        });
        assert_eq!(outcome_label(&overlap), "overlap");
        assert_eq!(outcome_label(&Err(EngineError::NotFound(Ulid::new()))), "not_found");
        assert_eq!(
            outcome_label(&Err(EngineError::Store(StoreError::Io("disk".into())))),
            "io_error"
        );
        let late = Duration::from_millis(5);
        assert_eq!(
            outcome_label(&Err(EngineError::Store(StoreError::Unconfirmed(late)))),
            "unconfirmed"
        );
    }
}
