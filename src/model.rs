use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::limits::*;

pub type ItemId = Ulid;
pub type UserId = Ulid;

/// Wire and input format for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ── Date ranges ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("{field} date {input:?} is not a valid YYYY-MM-DD date")]
    Unparseable { field: &'static str, input: String },
    #[error("start date {start} is after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// Closed interval `[start, end]` of calendar days. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawRange> for DateRange {
    type Error = RangeError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse both ends, then order-check. The start date is reported first
    /// when both fail to parse.
    pub fn parse(start: &str, end: &str) -> Result<Self, RangeError> {
        let start = parse_date("start", start)?;
        let end = parse_date("end", end)?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Closed-interval overlap: ranges sharing a boundary day overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Number of calendar days covered, counting both ends.
    pub fn days(&self) -> u64 {
        // start <= end, so the difference is never negative
        (self.end - self.start).num_days().unsigned_abs() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

fn parse_date(field: &'static str, input: &str) -> Result<NaiveDate, RangeError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| RangeError::Unparseable {
        field,
        input: input.to_string(),
    })
}

// ── Prices ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed price {0:?}: expected a non-negative amount with at most two decimals")]
pub struct PriceError(String);

/// Money amount in cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Flat-rate total for `days` days, saturating at `u64::MAX` cents.
    pub fn times_days(self, days: u64) -> Price {
        Price(self.0.saturating_mul(days))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PriceError(s.to_string());
        let trimmed = s.trim();
        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty()
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || frac.len() > 2
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }
        let whole: u64 = whole.parse().map_err(|_| malformed())?;
        let frac_cents: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| malformed())? * 10,
            _ => frac.parse().map_err(|_| malformed())?,
        };
        whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .map(Price)
            .ok_or_else(malformed)
    }
}

// ── Items and reservations ───────────────────────────────────────

/// An accepted booking. Lives only inside its item's reservation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub user: UserId,
    pub range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner: UserId,
    pub title: String,
    pub description: Option<String>,
    pub price_per_day: Price,
    pub image: Option<String>,
    /// Acceptance order, not date order.
    pub reservations: Vec<Reservation>,
    /// Bumped by the store on every successful save.
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("title is required")]
    BlankTitle,
    #[error("title longer than {} bytes", MAX_TITLE_LEN)]
    TitleTooLong,
    #[error("description longer than {} bytes", MAX_DESCRIPTION_LEN)]
    DescriptionTooLong,
    #[error("image reference longer than {} bytes", MAX_IMAGE_REF_LEN)]
    ImageRefTooLong,
    #[error("price per day must be positive")]
    NonPositivePrice,
}

/// Owner-supplied listing fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_per_day: Price,
    #[serde(default)]
    pub image: Option<String>,
}

impl Item {
    /// A fresh listing with no reservations.
    pub fn new(id: ItemId, owner: UserId, listing: NewItem) -> Result<Self, ItemError> {
        let title = listing.title.trim().to_string();
        if title.is_empty() {
            return Err(ItemError::BlankTitle);
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(ItemError::TitleTooLong);
        }
        if listing
            .description
            .as_ref()
            .is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN)
        {
            return Err(ItemError::DescriptionTooLong);
        }
        if listing
            .image
            .as_ref()
            .is_some_and(|i| i.len() > MAX_IMAGE_REF_LEN)
        {
            return Err(ItemError::ImageRefTooLong);
        }
        if !listing.price_per_day.is_positive() {
            return Err(ItemError::NonPositivePrice);
        }
        Ok(Self {
            id,
            owner,
            title,
            description: listing.description,
            price_per_day: listing.price_per_day,
            image: listing.image,
            reservations: Vec::new(),
            version: 0,
        })
    }

    pub fn reservations_of(&self, user: UserId) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(move |r| r.user == user)
    }
}

/// Catalogue search. Every present criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilter {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub min_price: Option<Price>,
    #[serde(default)]
    pub max_price: Option<Price>,
}

impl ItemFilter {
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(min) = self.min_price
            && item.price_per_day < min
        {
            return false;
        }
        if let Some(max) = self.max_price
            && item.price_per_day > max
        {
            return false;
        }
        match self.text.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                item.title.to_lowercase().contains(&needle)
                    || item
                        .description
                        .as_ref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            }
        }
    }
}

/// The WAL record format. Saves carry the whole item so replay is a plain replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ItemCreated { item: Item },
    ItemSaved { item: Item },
    ItemDeleted { id: ItemId },
}

// ── Query result types ───────────────────────────────────────────

/// One of a user's reservations together with the item it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserBooking {
    pub item: Item,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub range: DateRange,
    pub available: bool,
    /// First reservation in acceptance order that blocks `range`.
    pub conflict: Option<DateRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub range: DateRange,
    pub days: u64,
    pub price_per_day: Price,
    pub total: Price,
}
