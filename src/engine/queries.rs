use crate::model::*;

use super::conflict::find_overlap;
use super::{BookingEngine, EngineError};

impl BookingEngine {
    pub async fn get_item(&self, id: ItemId) -> Result<Item, EngineError> {
        self.load(id).await
    }

    /// Every reservation held by `user`, paired with its item. Items come in id
    /// order, reservations in acceptance order within an item.
    pub async fn bookings_for_user(&self, user: UserId) -> Result<Vec<UserBooking>, EngineError> {
        let items = self
            .store_call(self.store.find_items(&ItemFilter::default()))
            .await?;
        let mut bookings = Vec::new();
        for item in &items {
            for reservation in item.reservations_of(user) {
                bookings.push(UserBooking {
                    item: item.clone(),
                    reservation: reservation.clone(),
                });
            }
        }
        Ok(bookings)
    }

    /// Whether `range` could be booked right now. Reserves nothing.
    pub async fn check_availability(
        &self,
        id: ItemId,
        range: DateRange,
    ) -> Result<Availability, EngineError> {
        let item = self.load(id).await?;
        let conflict = find_overlap(&item.reservations, &range).map(|r| r.range);
        Ok(Availability {
            range,
            available: conflict.is_none(),
            conflict,
        })
    }

    /// Flat per-day price for `range`, both end days included.
    pub async fn quote(&self, id: ItemId, range: DateRange) -> Result<Quote, EngineError> {
        let item = self.load(id).await?;
        let days = range.days();
        Ok(Quote {
            range,
            days,
            price_per_day: item.price_per_day,
            total: item.price_per_day.times_days(days),
        })
    }

    pub async fn find_items(&self, filter: &ItemFilter) -> Result<Vec<Item>, EngineError> {
        Ok(self.store_call(self.store.find_items(filter)).await?)
    }
}
