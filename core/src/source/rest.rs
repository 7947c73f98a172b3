use async_trait::async_trait;
use reqwest::{header::CONTENT_RANGE, header::HeaderMap, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use super::{realtime, InsertFilter, MessageSource, Subscription};
use crate::error::{InboxError, Result};
use inbox_api::{Message, MessageId, NewMessage, Participant};

/// Hosted store reached through its REST interface, with inserts pushed over
/// the realtime websocket.
#[derive(Clone)]
pub struct RestSource {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    table: String,
}

impl RestSource {
    pub fn new(base: &str, api_key: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_key: api_key.into(),
            table: table.into(),
        })
    }

    fn endpoint(&self) -> Result<Url> {
        Ok(self.base.join(&format!("rest/v1/{}", self.table))?)
    }

    /// Websocket address of the realtime service.
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.base.join("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| InboxError::Protocol(format!("cannot derive websocket url from {url}")))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    fn request(&self, method: Method, query: &[(&str, String)]) -> Result<RequestBuilder> {
        Ok(self
            .http
            .request(method, self.endpoint()?)
            .query(query)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key))
    }

    /// Every row matching `query`. The server caps each response, so pages are
    /// requested until the reported total is reached or a page comes back empty.
    async fn paged<T: DeserializeOwned>(&self, query: &[(&str, String)]) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        loop {
            let mut page_query = query.to_vec();
            page_query.push(("limit", PAGE_SIZE.to_string()));
            page_query.push(("offset", rows.len().to_string()));
            let resp = self
                .request(Method::GET, &page_query)?
                .header("Prefer", "count=exact")
                .send()
                .await?;
            let resp = check(resp).await?;
            let total = total_count(resp.headers());
            let page: Vec<T> = resp.json().await?;
            let done = page.is_empty() || total.is_some_and(|t| rows.len() + page.len() >= t);
            rows.extend(page);
            if done {
                return Ok(rows);
            }
            debug!(fetched = rows.len(), ?total, "fetching next page");
        }
    }
}

const PAGE_SIZE: usize = 1000;

/// Ids per `in.(..)` filter, keeping request URLs short.
const ID_CHUNK: usize = 100;

#[derive(Deserialize)]
struct IdRow {
    id: MessageId,
}

/// Total from a `Content-Range: 0-999/2500` header; `*` means unknown.
fn total_count(headers: &HeaderMap) -> Option<usize> {
    let range = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    range.rsplit('/').next()?.parse().ok()
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(InboxError::Status {
        status: status.as_u16(),
        body,
    })
}

fn from_to(from: &Participant, to: &Participant) -> String {
    format!(
        "and(sender_id.eq.{},sender_type.eq.{},receiver_id.eq.{},receiver_type.eq.{})",
        from.id, from.role, to.id, to.role
    )
}

/// Filter matching every message of the `a`/`b` pair.
pub fn conversation_filter(a: &Participant, b: &Participant) -> String {
    format!("({},{})", from_to(a, b), from_to(b, a))
}

/// Filter matching every message sent by or to `me`.
pub fn inbox_filter(me: &Participant) -> String {
    format!(
        "(and(sender_id.eq.{id},sender_type.eq.{role}),and(receiver_id.eq.{id},receiver_type.eq.{role}))",
        id = me.id,
        role = me.role
    )
}

const ORDER: &str = "created_at.asc,id.asc";

#[async_trait]
impl MessageSource for RestSource {
    async fn fetch_conversation(&self, a: Participant, b: Participant) -> Result<Vec<Message>> {
        self.paged(&[
            ("select", "*".into()),
            ("or", conversation_filter(&a, &b)),
            ("order", ORDER.into()),
        ])
        .await
    }

    async fn fetch_inbox(&self, me: Participant) -> Result<Vec<Message>> {
        self.paged(&[
            ("select", "*".into()),
            ("or", inbox_filter(&me)),
            ("order", ORDER.into()),
        ])
        .await
    }

    async fn insert(&self, msg: NewMessage) -> Result<Message> {
        let resp = self
            .request(Method::POST, &[])?
            .header("Prefer", "return=representation")
            .json(&[&msg])
            .send()
            .await?;
        let rows: Vec<Message> = check(resp).await?.json().await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| InboxError::Protocol("insert returned no row".into()))?;
        debug!(id = row.id, "message stored");
        Ok(row)
    }

    async fn delete(&self, id: MessageId) -> Result<()> {
        let resp = self
            .request(Method::DELETE, &[("id", format!("eq.{id}"))])?
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let rows: Vec<Message> = check(resp).await?.json().await?;
        if rows.is_empty() {
            return Err(InboxError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_read(&self, from: Participant, to: Participant) -> Result<()> {
        let resp = self
            .request(
                Method::PATCH,
                &[
                    ("sender_id", format!("eq.{}", from.id)),
                    ("sender_type", format!("eq.{}", from.role)),
                    ("receiver_id", format!("eq.{}", to.id)),
                    ("receiver_type", format!("eq.{}", to.role)),
                    ("is_read", "eq.false".into()),
                ],
            )?
            .header("Prefer", "return=minimal")
            .json(&json!({ "is_read": true }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn existing(&self, ids: &[MessageId]) -> Result<HashSet<MessageId>> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let list: Vec<String> = chunk.iter().map(ToString::to_string).collect();
            let rows: Vec<IdRow> = self
                .paged(&[
                    ("select", "id".into()),
                    ("id", format!("in.({})", list.join(","))),
                    ("order", "id.asc".into()),
                ])
                .await?;
            found.extend(rows.into_iter().map(|r| r.id));
        }
        Ok(found)
    }

    async fn subscribe(&self, filter: InsertFilter) -> Result<Subscription> {
        realtime::subscribe(self.realtime_url()?, &self.table, filter).await
    }
}
