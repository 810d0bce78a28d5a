use std::time::Instant;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::store::StoreError;

use super::conflict::check_no_overlap;
use super::{BookingEngine, BookingOutcome, EngineError, Rejection};

impl BookingEngine {
    /// Reserve `range` on an item for `user`, unless it overlaps an existing
    /// reservation. The caller has already authenticated `user`.
    pub async fn request_booking(
        &self,
        item_id: ItemId,
        user: UserId,
        range: DateRange,
    ) -> Result<BookingOutcome, EngineError> {
        self.book(item_id, user, Ok(range)).await
    }

    /// Same as [`request_booking`](Self::request_booking) for raw `YYYY-MM-DD` input.
    /// An unknown item wins over malformed dates.
    pub async fn request_booking_raw(
        &self,
        item_id: ItemId,
        user: UserId,
        start: &str,
        end: &str,
    ) -> Result<BookingOutcome, EngineError> {
        self.book(item_id, user, DateRange::parse(start, end)).await
    }

    async fn book(
        &self,
        item_id: ItemId,
        user: UserId,
        range: Result<DateRange, RangeError>,
    ) -> Result<BookingOutcome, EngineError> {
        let started = Instant::now();
        let result = match range {
            Ok(range) => self.book_locked(item_id, user, range).await,
            Err(e) => self.load(item_id).await.map(|item| BookingOutcome::Rejected {
                reason: Rejection::InvalidRange(e),
                item,
            }),
        };

        metrics::counter!(
            observability::BOOKINGS_TOTAL,
            "outcome" => observability::outcome_label(&result)
        )
        .increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(BookingOutcome::Booked(item)) => {
                tracing::debug!("item {item_id}: booked for {user}, {} reservations", item.reservations.len());
            }
            Ok(BookingOutcome::Rejected { reason, .. }) => {
                tracing::debug!("item {item_id}: rejected booking for {user}: {reason}");
            }
            Err(EngineError::NotFound(_)) => tracing::debug!("item {item_id}: not found"),
            Err(e) => tracing::error!("item {item_id}: booking for {user} failed: {e}"),
        }
        result
    }

    /// Load, check, append and save while holding the item's lock. A stale
    /// save (someone else wrote the item meanwhile) restarts from the load.
    async fn book_locked(
        &self,
        item_id: ItemId,
        user: UserId,
        range: DateRange,
    ) -> Result<BookingOutcome, EngineError> {
        let mut held = Some(self.item_lock(item_id).lock_owned().await);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut item = match self.load(item_id).await {
                Ok(item) => item,
                Err(e @ EngineError::NotFound(_)) => {
                    self.forget_item(&item_id);
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            if let Err(reason) = check_no_overlap(&item, &range) {
                return Ok(BookingOutcome::Rejected { reason, item });
            }

            let loaded_version = item.version;
            item.reservations.push(Reservation { user, range });
            let store = self.store.clone();
            let save = async move { store.save_item(item).await };
            match self.store_write(&mut held, save).await {
                Ok(saved) => return Ok(BookingOutcome::Booked(saved)),
                Err(StoreError::VersionConflict { found, .. }) if attempt < MAX_SAVE_ATTEMPTS => {
                    metrics::counter!(observability::STORE_VERSION_CONFLICTS_TOTAL).increment(1);
                    tracing::warn!(
                        "item {item_id}: version {loaded_version} is stale (store at {found}), retrying"
                    );
                }
                Err(e) => {
                    if matches!(e, StoreError::VersionConflict { .. }) {
                        metrics::counter!(observability::STORE_VERSION_CONFLICTS_TOTAL).increment(1);
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Persist a freshly listed item.
    pub async fn create_item(&self, item: Item) -> Result<Item, EngineError> {
        let store = self.store.clone();
        let listed = item.clone();
        self.store_write(&mut None, async move { store.create_item(listed).await })
            .await?;
        tracing::info!("item {}: listed by {}", item.id, item.owner);
        Ok(item)
    }

    /// Remove an item and its reservations. Waits for any booking in flight
    /// on the item. Ownership is checked by the caller.
    pub async fn delete_item(&self, item_id: ItemId) -> Result<(), EngineError> {
        let mut held = Some(self.item_lock(item_id).lock_owned().await);
        let store = self.store.clone();
        let result = self
            .store_write(&mut held, async move { store.delete_item(item_id).await })
            .await;
        drop(held);
        if matches!(result, Ok(()) | Err(StoreError::NotFound(_))) {
            self.forget_item(&item_id);
        }
        result?;
        tracing::info!("item {item_id}: deleted");
        Ok(())
    }
}
