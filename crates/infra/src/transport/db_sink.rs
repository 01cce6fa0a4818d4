//! Postgres sink: one row per delivery.
//!
//! Expected table shape:
//!
//! ```sql
//! CREATE TABLE connector_delivery_sink (
//!     delivery_id    UUID PRIMARY KEY,
//!     project_id     UUID NOT NULL,
//!     connector_type TEXT NOT NULL,
//!     payload        JSONB NOT NULL,
//!     delivered_at   TIMESTAMPTZ NOT NULL
//! );
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use conduit_delivery::validation::is_sql_identifier;
use conduit_delivery::{ConnectorDelivery, ConnectorTarget, ConnectorType, TransportOutcome};

use super::{ConnectorTransport, target_mismatch};

pub struct DbSinkTransport {
    pool: Arc<PgPool>,
}

impl DbSinkTransport {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

pub(crate) fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} (delivery_id, project_id, connector_type, payload, delivered_at) \
         VALUES ($1, $2, $3, $4, $5) ON CONFLICT (delivery_id) DO NOTHING"
    )
}

#[async_trait]
impl ConnectorTransport for DbSinkTransport {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::DbSink
    }

    async fn send(&self, delivery: &ConnectorDelivery) -> TransportOutcome {
        let ConnectorTarget::DbSink(target) = &delivery.target else {
            return target_mismatch(delivery, ConnectorType::DbSink);
        };
        // Interpolated into SQL below.
        if !is_sql_identifier(&target.table) {
            return TransportOutcome::failed(None, format!("invalid sink table '{}'", target.table));
        }

        let result = sqlx::query(&insert_statement(&target.table))
            .bind(delivery.id.as_uuid())
            .bind(delivery.project_id.as_uuid())
            .bind(delivery.connector_type.as_str())
            .bind(sqlx::types::Json(&delivery.payload))
            .bind(Utc::now())
            .execute(&*self.pool)
            .await;

        match result {
            // Zero rows means an earlier attempt already landed; still a success.
            Ok(done) => TransportOutcome::succeeded(
                None,
                Some(format!("{} row(s) inserted", done.rows_affected())),
            ),
            Err(err) => TransportOutcome::failed(None, format!("sink insert failed: {err}")),
        }
    }
}
