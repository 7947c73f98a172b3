use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use inbox_api::{NewMessage, Participant};
use inbox_core::{source::RestSource, InboxError, MessageSource};
use parking_lot::Mutex;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    query: HashMap<String, String>,
    apikey: Option<String>,
    auth: Option<String>,
    prefer: Option<String>,
    body: String,
}

struct Mock {
    seen: Mutex<Vec<Seen>>,
    fail: Mutex<bool>,
    /// Report totals in `Content-Range`.
    count: Mutex<bool>,
}

impl Default for Mock {
    fn default() -> Self {
        Self {
            seen: Mutex::default(),
            fail: Mutex::new(false),
            count: Mutex::new(true),
        }
    }
}

fn row(id: i64, from: i64, to: i64, text: &str, at: &str) -> Value {
    json!({
        "id": id,
        "sender_id": from,
        "sender_type": "customer",
        "receiver_id": to,
        "receiver_type": "provider",
        "message": text,
        "created_at": at,
        "is_read": false,
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn messages(
    method: Method,
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    mock.seen.lock().push(Seen {
        method: method.clone(),
        query: query.clone(),
        apikey: header_value(&headers, "apikey"),
        auth: header_value(&headers, "authorization"),
        prefer: header_value(&headers, "prefer"),
        body: body.clone(),
    });
    if *mock.fail.lock() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    match method {
        Method::GET => listing(&query, *mock.count.lock()),
        Method::POST => {
            let sent: Vec<Value> = serde_json::from_str(&body).unwrap_or_default();
            let Some(mut stored) = sent.into_iter().next() else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            stored["id"] = json!(10);
            stored["created_at"] = json!("2024-03-05T10:00:00Z");
            (StatusCode::CREATED, Json(json!([stored]))).into_response()
        }
        Method::DELETE => match query.get("id").map(String::as_str) {
            Some("eq.5") => {
                Json(json!([row(5, 7, 3, "oops", "2024-03-05T09:00:00Z")])).into_response()
            }
            _ => Json(json!([])).into_response(),
        },
        Method::PATCH => StatusCode::NO_CONTENT.into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Rows per response, far below what the client asks for.
const MAX_ROWS: usize = 2;

fn stored_rows() -> Vec<Value> {
    vec![
        row(1, 7, 3, "hi", "2024-03-05T09:00:00Z"),
        row(2, 7, 3, "still there?", "2024-03-05T09:05:00Z"),
        row(3, 7, 3, "hello?", "2024-03-05T09:10:00Z"),
    ]
}

/// Paged GET honoring `id=in.(..)`, `offset` and `limit`, capped at `MAX_ROWS`.
fn listing(query: &HashMap<String, String>, count: bool) -> Response {
    let mut rows = stored_rows();
    if let Some(list) = query.get("id").and_then(|f| f.strip_prefix("in.(")) {
        let wanted: Vec<i64> = list
            .trim_end_matches(')')
            .split(',')
            .filter_map(|id| id.parse().ok())
            .collect();
        rows.retain(|r| r["id"].as_i64().is_some_and(|id| wanted.contains(&id)));
    }
    let total = rows.len();
    let offset: usize = query.get("offset").and_then(|o| o.parse().ok()).unwrap_or(0);
    let limit: usize = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(usize::MAX);
    let page: Vec<Value> = rows.into_iter().skip(offset).take(limit.min(MAX_ROWS)).collect();
    let range = if page.is_empty() {
        format!("*/{total}")
    } else {
        format!("{}-{}/{total}", offset, offset + page.len() - 1)
    };
    if count {
        ([(header::CONTENT_RANGE, range)], Json(page)).into_response()
    } else {
        Json(page).into_response()
    }
}

async fn serve() -> (SocketAddr, Arc<Mock>) {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/rest/v1/messages", any(messages))
        .with_state(mock.clone());
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);
    (addr, mock)
}

fn source(addr: SocketAddr) -> RestSource {
    RestSource::new(&format!("http://{addr}"), "anon", "messages").unwrap()
}

fn last(mock: &Mock) -> Seen {
    mock.seen.lock().last().cloned().unwrap()
}

fn first(mock: &Mock) -> Seen {
    mock.seen.lock().first().cloned().unwrap()
}

#[tokio::test]
async fn fetch_conversation_sends_filter_and_order() {
    let (addr, mock) = serve().await;
    let customer = Participant::customer(7);
    let salon = Participant::provider(3);

    let rows = source(addr).fetch_conversation(customer, salon).await.unwrap();
    let texts: Vec<_> = rows.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(texts, vec!["hi", "still there?", "hello?"]);

    let seen = first(&mock);
    assert_eq!(seen.method, Method::GET);
    assert_eq!(seen.apikey.as_deref(), Some("anon"));
    assert_eq!(seen.auth.as_deref(), Some("Bearer anon"));
    assert_eq!(seen.prefer.as_deref(), Some("count=exact"));
    assert_eq!(seen.query["select"], "*");
    assert_eq!(seen.query["order"], "created_at.asc,id.asc");
    assert_eq!(seen.query["offset"], "0");
    assert_eq!(seen.query["limit"], "1000");
    assert_eq!(
        seen.query["or"],
        inbox_core::source::rest::conversation_filter(&customer, &salon)
    );
}

#[tokio::test]
async fn capped_responses_are_paged_through() {
    let (addr, mock) = serve().await;

    let rows = source(addr).fetch_inbox(Participant::customer(7)).await.unwrap();
    let ids: Vec<_> = rows.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    // the reported total ends paging without an empty round trip
    let offsets: Vec<String> = mock
        .seen
        .lock()
        .iter()
        .map(|s| s.query["offset"].clone())
        .collect();
    assert_eq!(offsets, vec!["0", "2"]);
}

#[tokio::test]
async fn paging_without_totals_stops_on_empty_page() {
    let (addr, mock) = serve().await;
    *mock.count.lock() = false;

    let rows = source(addr).fetch_inbox(Participant::customer(7)).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(mock.seen.lock().len(), 3);
}

#[tokio::test]
async fn existing_asks_for_ids() {
    let (addr, mock) = serve().await;

    let found = source(addr).existing(&[2, 3, 99]).await.unwrap();
    assert_eq!(found, HashSet::from([2, 3]));
    let seen = first(&mock);
    assert_eq!(seen.query["select"], "id");
    assert_eq!(seen.query["id"], "in.(2,3,99)");
}

#[tokio::test]
async fn insert_returns_stored_row() {
    let (addr, mock) = serve().await;
    let msg = NewMessage::unread(Participant::customer(7), Participant::provider(3), "hello");

    let stored = source(addr).insert(msg).await.unwrap();
    assert_eq!(stored.id, 10);
    assert_eq!(stored.message, "hello");
    assert!(!stored.is_read);

    let seen = last(&mock);
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.prefer.as_deref(), Some("return=representation"));
    let body: Value = serde_json::from_str(&seen.body).unwrap();
    assert_eq!(body[0]["message"], "hello");
    assert_eq!(body[0]["sender_type"], "customer");
    assert_eq!(body[0]["is_read"], false);
}

#[tokio::test]
async fn delete_of_missing_row_is_not_found() {
    let (addr, mock) = serve().await;
    let src = source(addr);

    src.delete(5).await.unwrap();
    assert_eq!(last(&mock).method, Method::DELETE);
    assert_eq!(last(&mock).query["id"], "eq.5");

    assert!(matches!(src.delete(6).await, Err(InboxError::NotFound(6))));
}

#[tokio::test]
async fn mark_read_patches_unread_only() {
    let (addr, mock) = serve().await;

    source(addr)
        .mark_read(Participant::provider(3), Participant::customer(7))
        .await
        .unwrap();

    let seen = last(&mock);
    assert_eq!(seen.method, Method::PATCH);
    assert_eq!(seen.query["sender_id"], "eq.3");
    assert_eq!(seen.query["sender_type"], "eq.provider");
    assert_eq!(seen.query["receiver_id"], "eq.7");
    assert_eq!(seen.query["is_read"], "eq.false");
    let body: Value = serde_json::from_str(&seen.body).unwrap();
    assert_eq!(body, json!({ "is_read": true }));
}

#[tokio::test]
async fn server_errors_carry_status_and_body() {
    let (addr, mock) = serve().await;
    *mock.fail.lock() = true;

    let err = source(addr)
        .fetch_inbox(Participant::customer(7))
        .await
        .unwrap_err();
    match err {
        InboxError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
