//! Cached-response ledger for client-initiated requests.
//!
//! A request carrying an `Idempotency-Key` header executes at most once: the
//! outcome (status code and body, success or failure alike) is stored under
//! the key with a fixed 24h TTL and replayed verbatim on repeats. A record
//! past its expiry is treated as absent.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use tracing::warn;

use crate::models::{IdempotencyRecord, NewIdempotencyRecord};
use crate::schema::idempotency_responses;

type DbPool = Pool<AsyncPgConnection>;

const RESPONSE_TTL_HOURS: i64 = 24;

/// A previously cached request outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

pub struct IdempotencyCache {
    pool: DbPool,
}

impl IdempotencyCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Returns the stored outcome for `key` if one exists and has not
    /// expired.
    pub async fn lookup(&self, key: &str) -> Result<Option<StoredResponse>> {
        let mut conn = self.pool.get().await?;
        let record = idempotency_responses::table
            .filter(idempotency_responses::idempotency_key.eq(key))
            .filter(idempotency_responses::expires_at.gt(Utc::now()))
            .first::<IdempotencyRecord>(&mut conn)
            .await
            .optional()?;

        Ok(record.map(|r| StoredResponse {
            status_code: r.status_code as u16,
            body: r.response,
        }))
    }

    /// Persists the outcome under `key`. Failures are logged and swallowed:
    /// a lost cache write must never fail the original response, at the cost
    /// that a retry with this key may re-execute instead of replay.
    pub async fn store(&self, key: &str, status_code: u16, body: &serde_json::Value) {
        if let Err(e) = self.try_store(key, status_code, body).await {
            warn!(key, error = %e, "failed to store idempotency record");
        }
    }

    async fn try_store(&self, key: &str, status_code: u16, body: &serde_json::Value) -> Result<()> {
        let record = NewIdempotencyRecord {
            idempotency_key: key.to_string(),
            status_code: status_code as i32,
            response: body.clone(),
            expires_at: expires_at_from(Utc::now()),
        };

        let mut conn = self.pool.get().await?;
        diesel::insert_into(idempotency_responses::table)
            .values(&record)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Deletes records past their expiry. Run periodically; correctness does
    /// not depend on it since `lookup` filters expired rows.
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(
            idempotency_responses::table
                .filter(idempotency_responses::expires_at.lt(Utc::now())),
        )
        .execute(&mut conn)
        .await?;

        Ok(deleted)
    }
}

fn expires_at_from(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + Duration::hours(RESPONSE_TTL_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_expire_after_twenty_four_hours() {
        let created = Utc::now();
        let expires = expires_at_from(created);
        assert_eq!(expires - created, Duration::hours(24));
    }

    #[test]
    fn stored_responses_replay_verbatim() {
        let body = serde_json::json!({ "data": { "orderId": "x", "status": "PendingShipment" } });
        let stored = StoredResponse {
            status_code: 201,
            body: body.clone(),
        };
        let replayed = stored.clone();
        assert_eq!(replayed, StoredResponse { status_code: 201, body });
    }
}
