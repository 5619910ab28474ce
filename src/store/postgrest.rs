//! [`Store`] backed by a PostgREST endpoint (e.g. Supabase).
//!
//! Upserts are `POST /rest/v1/<collection>?on_conflict=<keys>` with
//! `Prefer: resolution=merge-duplicates`, which PostgREST turns into
//! `INSERT … ON CONFLICT … DO UPDATE`. The request body is the whole chunk,
//! so each chunk is a single statement on the server.
//!
//! HTTP 429, 5xx, timeouts and connection failures are transient; any other
//! non-success status is permanent.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;

use crate::error::StoreError;
use crate::models::Collection;

use super::{Store, UpsertBatch};

pub struct PostgrestStore {
    client: Client,
    base_url: String,
    service_key: String,
}

/// A record plus the last-modified marker, serialized flat.
#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    #[serde(flatten)]
    record: &'a T,
    updated_at: &'a str,
}

impl PostgrestStore {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn endpoint(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection.name())
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn post<T: Serialize>(
        &self,
        collection: Collection,
        rows: &[T],
        modified_at: &str,
    ) -> Result<(), StoreError> {
        let body: Vec<Stamped<'_, T>> = rows
            .iter()
            .map(|record| Stamped {
                record,
                updated_at: modified_at,
            })
            .collect();

        let resp = self
            .authed(self.client.post(self.endpoint(collection)))
            .query(&[("on_conflict", collection.conflict_keys().join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error(collection, e))?;

        check_status(collection, resp).await.map(|_| ())
    }
}

fn network_error(collection: Collection, err: reqwest::Error) -> StoreError {
    let message = err.to_string();
    if err.is_timeout() || err.is_connect() || err.is_request() {
        StoreError::Transient {
            collection,
            message,
        }
    } else {
        StoreError::Permanent {
            collection,
            message,
        }
    }
}

async fn check_status(collection: Collection, resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("HTTP {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(StoreError::Transient {
            collection,
            message,
        })
    } else {
        Err(StoreError::Permanent {
            collection,
            message,
        })
    }
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl Store for PostgrestStore {
    async fn upsert(
        &self,
        batch: UpsertBatch<'_>,
        modified_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let stamp = modified_at.to_rfc3339();
        match batch {
            UpsertBatch::Bookings(rows) => self.post(Collection::Bookings, rows, &stamp).await,
            UpsertBatch::Details(rows) => {
                self.post(Collection::DetailSequences, rows, &stamp).await
            }
        }
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        let resp = self
            .authed(self.client.head(self.endpoint(collection)))
            .query(&[("select", "job_reference")])
            .header("Prefer", "count=exact")
            .header("Range", "0-0")
            .send()
            .await
            .map_err(|e| network_error(collection, e))?;
        let resp = check_status(collection, resp).await?;

        resp.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| StoreError::Permanent {
                collection,
                message: "response has no usable Content-Range header".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookingAggregate;

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-0/*"), None);
    }

    #[test]
    fn test_stamped_record_is_flat() {
        let booking = BookingAggregate {
            job_reference: "A".to_string(),
            carrier_code: Some("MSC".to_string()),
            carrier_name: None,
            load_port: None,
            load_country: None,
            discharge_port: None,
            discharge_country: None,
            origin: None,
            destination: None,
            confirmation_date: None,
            cancellation_date: None,
            status_code: None,
        };
        let json = serde_json::to_value(Stamped {
            record: &booking,
            updated_at: "2024-01-01T00:00:00+00:00",
        })
        .unwrap();
        assert_eq!(json["job_reference"], "A");
        assert_eq!(json["carrier_code"], "MSC");
        assert!(json["carrier_name"].is_null());
        assert_eq!(json["updated_at"], "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_endpoint() {
        let store =
            PostgrestStore::new("https://x.supabase.co/", "k", Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.endpoint(Collection::DetailSequences),
            "https://x.supabase.co/rest/v1/detail_sequences"
        );
    }
}
