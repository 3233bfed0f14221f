//! Status reconciliation for inbound delivery events.
//!
//! Every `DeliveryStatusEvent` passes through the processed-event ledger:
//! the ledger insert and the order mutation commit in one transaction, so a
//! redelivered event (broker retry, crash before ack) is skipped by the same
//! check that made the first attempt durable. The ledger's unique key on
//! `event_id` is the only serialization point for concurrent duplicates.

use anyhow::{anyhow, Result};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::broker::Broker;
use shared::{topics, DeliveryStatusEvent, OrderStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::NewProcessedEvent;
use crate::schema::{orders, processed_events};

type DbPool = Pool<AsyncPgConnection>;

const CONSUMER_GROUP: &str = "sales-service";

#[derive(Debug, PartialEq)]
enum Reconciliation {
    Applied,
    Rejected { current: OrderStatus },
    UnknownOrder,
}

pub struct StatusReconciler {
    pool: DbPool,
}

impl StatusReconciler {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Consumes `delivery.order.status` until the subscription ends. A
    /// handler error nacks the message; redelivery is safe because the
    /// ledger check repeats on every attempt.
    pub async fn run(&self, broker: &Broker) -> Result<()> {
        broker
            .subscribe(topics::DELIVERY_STATUS, CONSUMER_GROUP, |msg| async move {
                let event: DeliveryStatusEvent = msg.decode()?;
                self.handle_event(event).await
            })
            .await
    }

    pub async fn handle_event(&self, event: DeliveryStatusEvent) -> Result<()> {
        let mut conn = self.pool.get().await?;

        if self.already_processed(&mut conn, event.event_id).await? {
            info!(event_id = %event.event_id, "event already processed, skipping");
            return Ok(());
        }

        let event_id = event.event_id;
        let order_id = event.order_id;
        let next = event.status;

        let outcome = conn
            .transaction::<_, anyhow::Error, _>(|conn| {
                Box::pin(async move {
                    diesel::insert_into(processed_events::table)
                        .values(&NewProcessedEvent { event_id })
                        .execute(conn)
                        .await?;

                    let current = orders::table
                        .find(order_id)
                        .select(orders::status)
                        .first::<String>(conn)
                        .await
                        .optional()?;

                    let Some(current) = current else {
                        return Ok(Reconciliation::UnknownOrder);
                    };
                    let current = OrderStatus::parse(&current).ok_or_else(|| {
                        anyhow!("order {order_id} has unrecognized status {current:?}")
                    })?;

                    if !current.can_transition_to(next) {
                        return Ok(Reconciliation::Rejected { current });
                    }

                    diesel::update(orders::table.find(order_id))
                        .set((
                            orders::status.eq(next.as_str()),
                            orders::updated_at.eq(Utc::now()),
                        ))
                        .execute(conn)
                        .await?;

                    Ok(Reconciliation::Applied)
                })
            })
            .await;

        match outcome {
            Ok(Reconciliation::Applied) => {
                info!(%order_id, status = %next, event_id = %event_id, "order status updated");
                Ok(())
            }
            Ok(Reconciliation::Rejected { current }) => {
                // Not applied, but the ledger row committed: the event is
                // acknowledged as processed and redelivery will skip it.
                warn!(
                    %order_id,
                    %current,
                    requested = %next,
                    event_id = %event_id,
                    "rejected non-forward status transition"
                );
                Ok(())
            }
            Ok(Reconciliation::UnknownOrder) => {
                warn!(%order_id, event_id = %event_id, "status event for unknown order");
                Ok(())
            }
            // A concurrent duplicate lost the race on the ledger's unique
            // key; it was processed by the winner.
            Err(e) if is_unique_violation(&e) => {
                info!(event_id = %event_id, "event processed concurrently, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn already_processed(
        &self,
        conn: &mut AsyncPgConnection,
        event_id: Uuid,
    ) -> Result<bool> {
        let found = processed_events::table
            .find(event_id)
            .select(processed_events::event_id)
            .first::<Uuid>(conn)
            .await
            .optional()?;
        Ok(found.is_some())
    }
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<diesel::result::Error>(),
        Some(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ))
    )
}
