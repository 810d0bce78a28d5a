use crate::model::*;

use super::Rejection;

/// First reservation, in acceptance order, sharing at least one day with `range`.
///
/// Reservations are not date-sorted, so this is a full scan.
pub fn find_overlap<'a>(reservations: &'a [Reservation], range: &DateRange) -> Option<&'a Reservation> {
    reservations.iter().find(|r| r.range.overlaps(range))
}

pub(crate) fn check_no_overlap(item: &Item, range: &DateRange) -> Result<(), Rejection> {
    match find_overlap(&item.reservations, range) {
        Some(existing) => Err(Rejection::Overlap {
            existing: existing.range,
        }),
        None => Ok(()),
    }
}
