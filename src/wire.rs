//! JSON-lines front end: one request object per line, one response object per line.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{BookingEngine, BookingOutcome, EngineError, Rejection};
use crate::identity::IdentityProvider;
use crate::limits::*;
use crate::model::*;
use crate::observability;

/// Everything a connection needs to serve requests.
pub struct Context {
    pub engine: Arc<BookingEngine>,
    pub identity: Arc<dyn IdentityProvider>,
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    session: Option<String>,
}

/// Money on the wire: a JSON integer counts cents, a string is a decimal
/// amount such as `"45.50"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireAmount {
    Cents(u64),
    Amount(String),
}

impl TryFrom<WireAmount> for Price {
    type Error = PriceError;

    fn try_from(raw: WireAmount) -> Result<Self, Self::Error> {
        match raw {
            WireAmount::Cents(cents) => Ok(Price::from_cents(cents)),
            WireAmount::Amount(amount) => amount.parse(),
        }
    }
}

fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Price, D::Error> {
    Price::try_from(WireAmount::deserialize(deserializer)?).map_err(D::Error::custom)
}

fn optional_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Price>, D::Error> {
    Option::<WireAmount>::deserialize(deserializer)?
        .map(Price::try_from)
        .transpose()
        .map_err(D::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Book {
        item: ItemId,
        start: String,
        end: String,
    },
    MyBookings,
    GetItem {
        item: ItemId,
    },
    FindItems {
        #[serde(default)]
        text: Option<String>,
        #[serde(default, deserialize_with = "optional_amount")]
        min_price: Option<Price>,
        #[serde(default, deserialize_with = "optional_amount")]
        max_price: Option<Price>,
    },
    CreateItem {
        title: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(deserialize_with = "amount")]
        price_per_day: Price,
        #[serde(default)]
        image: Option<String>,
    },
    DeleteItem {
        item: ItemId,
    },
    Availability {
        item: ItemId,
        start: String,
        end: String,
    },
    Quote {
        item: ItemId,
        start: String,
        end: String,
    },
    Logout,
}

impl Command {
    pub fn op(&self) -> &'static str {
        match self {
            Command::Book { .. } => "book",
            Command::MyBookings => "my_bookings",
            Command::GetItem { .. } => "get_item",
            Command::FindItems { .. } => "find_items",
            Command::CreateItem { .. } => "create_item",
            Command::DeleteItem { .. } => "delete_item",
            Command::Availability { .. } => "availability",
            Command::Quote { .. } => "quote",
            Command::Logout => "logout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        data: serde_json::Value,
    },
    Booked {
        item: Item,
    },
    Rejected {
        reason: &'static str,
        message: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        conflict: Option<DateRange>,
        item: Item,
    },
    NotFound {
        message: String,
    },
    Unauthorized,
    Forbidden {
        message: String,
    },
    BadRequest {
        message: String,
    },
    Error {
        message: String,
    },
}

impl Response {
    fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Response::Ok { data },
            Err(e) => Response::Error {
                message: format!("cannot encode response: {e}"),
            },
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Response::BadRequest {
            message: message.into(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Response::Ok { .. } => "ok",
            Response::Booked { .. } => "booked",
            Response::Rejected { .. } => "rejected",
            Response::NotFound { .. } => "not_found",
            Response::Unauthorized => "unauthorized",
            Response::Forbidden { .. } => "forbidden",
            Response::BadRequest { .. } => "bad_request",
            Response::Error { .. } => "error",
        }
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => Response::NotFound {
                message: format!("item {id} not found"),
            },
            EngineError::Store(e) => Response::Error {
                message: e.to_string(),
            },
        }
    }
}

impl From<BookingOutcome> for Response {
    fn from(outcome: BookingOutcome) -> Self {
        match outcome {
            BookingOutcome::Booked(item) => Response::Booked { item },
            BookingOutcome::Rejected { reason, item } => Response::Rejected {
                reason: reason.kind(),
                message: reason.user_message(),
                conflict: match reason {
                    Rejection::Overlap { existing } => Some(existing),
                    Rejection::InvalidRange(_) => None,
                },
                item,
            },
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection<S>(socket: S, ctx: Arc<Context>) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_LEN));
    while let Some(line) = framed.next().await {
        let response = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&ctx, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Response::bad_request(format!("request longer than {MAX_REQUEST_LINE_LEN} bytes"))
            }
            Err(e) => return Err(e),
        };
        let encoded = serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","message":"cannot encode response: {e}"}}"#)
        });
        framed.send(encoded).await?;
    }
    Ok(())
}

/// Decode, authenticate and dispatch one request line.
pub async fn handle_line(ctx: &Context, line: &str) -> Response {
    let command: Command = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "unknown", "status" => "bad_request")
                .increment(1);
            return Response::bad_request(format!("malformed request: {e}"));
        }
    };
    let envelope: Envelope = serde_json::from_str(line).unwrap_or_default();
    let caller = ctx
        .identity
        .resolve_current_user(envelope.session.as_deref())
        .await
        .user();

    let op = command.op();
    let response = dispatch(ctx, envelope.session.as_deref(), caller, command).await;
    tracing::debug!("{op}: {}", response.status());
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => response.status())
        .increment(1);
    response
}

async fn dispatch(
    ctx: &Context,
    session: Option<&str>,
    caller: Option<UserId>,
    command: Command,
) -> Response {
    let engine = &ctx.engine;
    match command {
        Command::Book { item, start, end } => {
            let Some(user) = caller else {
                return Response::Unauthorized;
            };
            match engine.request_booking_raw(item, user, &start, &end).await {
                Ok(outcome) => outcome.into(),
                Err(e) => e.into(),
            }
        }
        Command::MyBookings => {
            let Some(user) = caller else {
                return Response::Unauthorized;
            };
            match engine.bookings_for_user(user).await {
                Ok(bookings) => Response::ok(bookings),
                Err(e) => e.into(),
            }
        }
        Command::GetItem { item } => match engine.get_item(item).await {
            Ok(item) => Response::ok(item),
            Err(e) => e.into(),
        },
        Command::FindItems {
            text,
            min_price,
            max_price,
        } => {
            if text.as_ref().is_some_and(|t| t.len() > MAX_TEXT_QUERY_LEN) {
                return Response::bad_request(format!(
                    "search text longer than {MAX_TEXT_QUERY_LEN} bytes"
                ));
            }
            let filter = ItemFilter {
                text,
                min_price,
                max_price,
            };
            match engine.find_items(&filter).await {
                Ok(items) => Response::ok(items),
                Err(e) => e.into(),
            }
        }
        Command::CreateItem {
            title,
            description,
            price_per_day,
            image,
        } => {
            let Some(owner) = caller else {
                return Response::Unauthorized;
            };
            let listing = NewItem {
                title,
                description,
                price_per_day,
                image,
            };
            let item = match Item::new(Ulid::new(), owner, listing) {
                Ok(item) => item,
                Err(e) => return Response::bad_request(e.to_string()),
            };
            match engine.create_item(item).await {
                Ok(item) => Response::ok(item),
                Err(e) => e.into(),
            }
        }
        Command::DeleteItem { item } => {
            let Some(user) = caller else {
                return Response::Unauthorized;
            };
            let existing = match engine.get_item(item).await {
                Ok(existing) => existing,
                Err(e) => return e.into(),
            };
            if existing.owner != user {
                return Response::Forbidden {
                    message: "only the owner can delete an item".into(),
                };
            }
            match engine.delete_item(item).await {
                Ok(()) => Response::ok(serde_json::json!({ "deleted": item })),
                Err(e) => e.into(),
            }
        }
        Command::Availability { item, start, end } => {
            let range = match DateRange::parse(&start, &end) {
                Ok(range) => range,
                Err(e) => return Response::bad_request(e.to_string()),
            };
            match engine.check_availability(item, range).await {
                Ok(availability) => Response::ok(availability),
                Err(e) => e.into(),
            }
        }
        Command::Quote { item, start, end } => {
            let range = match DateRange::parse(&start, &end) {
                Ok(range) => range,
                Err(e) => return Response::bad_request(e.to_string()),
            };
            match engine.quote(item, range).await {
                Ok(quote) => Response::ok(quote),
                Err(e) => e.into(),
            }
        }
        Command::Logout => match (session, caller) {
            (Some(token), Some(_)) => {
                ctx.identity.end_session(token).await;
                Response::ok(serde_json::json!({ "logged_out": true }))
            }
            _ => Response::Unauthorized,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionTable;
    use crate::store::MemoryStore;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Harness {
        ctx: Context,
        sessions: Arc<SessionTable>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionTable::new());
        Harness {
            ctx: Context {
                engine: Arc::new(BookingEngine::new(store, Duration::from_secs(1))),
                identity: sessions.clone(),
            },
            sessions,
        }
    }

    async fn call(ctx: &Context, request: Value) -> Value {
        let response = handle_line(ctx, &request.to_string()).await;
        serde_json::to_value(response).unwrap()
    }

    async fn list_van(h: &Harness, session: &str) -> String {
        let created = call(
            &h.ctx,
            json!({"op": "create_item", "session": session, "title": "Van", "price_per_day": 4500}),
        )
        .await;
        assert_eq!(created["status"], "ok");
        created["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn anonymous_callers_cannot_book_or_list() {
        let h = harness();
        let item = Ulid::new().to_string();
        for request in [
            json!({"op": "book", "item": item, "start": "2024-01-01", "end": "2024-01-02"}),
            json!({"op": "my_bookings", "session": "unknown"}),
            json!({"op": "create_item", "title": "Van", "price_per_day": 100}),
            json!({"op": "delete_item", "item": item}),
        ] {
            assert_eq!(call(&h.ctx, request).await, json!({"status": "unauthorized"}));
        }
    }

    #[tokio::test]
    async fn book_then_reject_touching_range() {
        let h = harness();
        let token = h.sessions.issue(Ulid::new());
        let item = list_van(&h, &token).await;

        let booked = call(
            &h.ctx,
            json!({"op": "book", "session": token, "item": item, "start": "2024-01-10", "end": "2024-01-15"}),
        )
        .await;
        assert_eq!(booked["status"], "booked");
        assert_eq!(booked["item"]["reservations"].as_array().unwrap().len(), 1);

        let rejected = call(
            &h.ctx,
            json!({"op": "book", "session": token, "item": item, "start": "2024-01-05", "end": "2024-01-10"}),
        )
        .await;
        assert_eq!(rejected["status"], "rejected");
        assert_eq!(rejected["reason"], "overlap");
        assert_eq!(rejected["message"], "These dates are already booked.");
        assert_eq!(rejected["conflict"], json!({"start": "2024-01-10", "end": "2024-01-15"}));

        let inverted = call(
            &h.ctx,
            json!({"op": "book", "session": token, "item": item, "start": "2024-02-05", "end": "2024-02-01"}),
        )
        .await;
        assert_eq!(inverted["reason"], "invalid_range");
        assert_eq!(inverted["message"], "Invalid booking dates.");
        assert!(inverted.get("conflict").is_none());
    }

    #[tokio::test]
    async fn only_owner_deletes() {
        let h = harness();
        let owner = h.sessions.issue(Ulid::new());
        let other = h.sessions.issue(Ulid::new());
        let item = list_van(&h, &owner).await;

        let forbidden = call(&h.ctx, json!({"op": "delete_item", "session": other, "item": item})).await;
        assert_eq!(forbidden["status"], "forbidden");

        let deleted = call(&h.ctx, json!({"op": "delete_item", "session": owner, "item": item})).await;
        assert_eq!(deleted["status"], "ok");

        let gone = call(&h.ctx, json!({"op": "get_item", "item": item})).await;
        assert_eq!(gone["status"], "not_found");
    }

    #[tokio::test]
    async fn quote_and_availability() {
        let h = harness();
        let token = h.sessions.issue(Ulid::new());
        let item = list_van(&h, &token).await;
        call(
            &h.ctx,
            json!({"op": "book", "session": token, "item": item, "start": "2024-03-01", "end": "2024-03-03"}),
        )
        .await;

        let quote = call(
            &h.ctx,
            json!({"op": "quote", "item": item, "start": "2024-03-10", "end": "2024-03-12"}),
        )
        .await;
        assert_eq!(quote["data"]["days"], 3);
        assert_eq!(quote["data"]["total"], 13_500);

        let busy = call(
            &h.ctx,
            json!({"op": "availability", "item": item, "start": "2024-03-03", "end": "2024-03-04"}),
        )
        .await;
        assert_eq!(busy["data"]["available"], false);

        let bad = call(
            &h.ctx,
            json!({"op": "availability", "item": item, "start": "March", "end": "2024-03-04"}),
        )
        .await;
        assert_eq!(bad["status"], "bad_request");
    }

    #[tokio::test]
    async fn malformed_requests_are_bad_requests() {
        let h = harness();
        for line in ["not json", r#"{"op": "launch"}"#, r#"{"op": "get_item", "item": "nope"}"#] {
            let response = handle_line(&h.ctx, line).await;
            assert_eq!(response.status(), "bad_request", "{line}");
        }

        let token = h.sessions.issue(Ulid::new());
        let free = call(
            &h.ctx,
            json!({"op": "create_item", "session": token, "title": "Van", "price_per_day": 0}),
        )
        .await;
        assert_eq!(free["status"], "bad_request");

        let long = "x".repeat(MAX_TEXT_QUERY_LEN + 1);
        let search = call(&h.ctx, json!({"op": "find_items", "text": long})).await;
        assert_eq!(search["status"], "bad_request");
    }

    #[tokio::test]
    async fn prices_accept_cents_or_decimal_amounts() {
        let h = harness();
        let token = h.sessions.issue(Ulid::new());

        let listed = call(
            &h.ctx,
            json!({"op": "create_item", "session": token, "title": "Van", "price_per_day": "45.50"}),
        )
        .await;
        assert_eq!(listed["data"]["price_per_day"], 4_550);

        let found = call(&h.ctx, json!({"op": "find_items", "min_price": "45.5", "max_price": 4_550})).await;
        assert_eq!(found["data"].as_array().unwrap().len(), 1);

        for bad in [json!("45.505"), json!("-1"), json!("free")] {
            let rejected = call(
                &h.ctx,
                json!({"op": "create_item", "session": token, "title": "Van", "price_per_day": bad}),
            )
            .await;
            assert_eq!(rejected["status"], "bad_request", "{bad}");
        }
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let h = harness();
        let token = h.sessions.issue(Ulid::new());

        let out = call(&h.ctx, json!({"op": "logout", "session": token})).await;
        assert_eq!(out["status"], "ok");
        assert!(h.sessions.is_empty());

        let after = call(&h.ctx, json!({"op": "my_bookings", "session": token})).await;
        assert_eq!(after["status"], "unauthorized");
        let again = call(&h.ctx, json!({"op": "logout", "session": token})).await;
        assert_eq!(again["status"], "unauthorized");
    }

    #[tokio::test]
    async fn find_items_filters_by_text_and_price() {
        let h = harness();
        let token = h.sessions.issue(Ulid::new());
        list_van(&h, &token).await;
        call(
            &h.ctx,
            json!({"op": "create_item", "session": token, "title": "Roof tent", "price_per_day": 1500}),
        )
        .await;

        let vans = call(&h.ctx, json!({"op": "find_items", "text": "VAN"})).await;
        assert_eq!(vans["data"].as_array().unwrap().len(), 1);

        let cheap = call(&h.ctx, json!({"op": "find_items", "max_price": 1500})).await;
        assert_eq!(cheap["data"][0]["title"], "Roof tent");
    }

    #[tokio::test]
    async fn connection_answers_line_per_line() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let h = harness();
        let ctx = Arc::new(h.ctx);
        let (client, server) = tokio::io::duplex(4096);
        let served = tokio::spawn(process_connection(server, ctx));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        write
            .write_all(b"\n{\"op\":\"find_items\"}\n{\"op\":\"my_bookings\"}\n")
            .await
            .unwrap();

        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first, json!({"status": "ok", "data": []}));
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["status"], "unauthorized");

        drop(write);
        drop(lines);
        served.await.unwrap().unwrap();
    }
}
