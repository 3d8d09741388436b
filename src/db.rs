use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::store::{EventStore, InsertOutcome};
use crate::types::{EventLogRecord, NewEventLog};

const SELECT_COLUMNS: &str = r#"
    id, chain_id, from_address, contract_address, event, block_number, log_index,
    hash, data, ack_id, date_created, date_modified
"#;

pub async fn connect_pg(dsn: &str, schema: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Postgres connection error: {:?}", e);
        }
    });

    // Create schema if not exists
    client.batch_execute(schema).await?;

    info!("PostgreSQL ready");

    Ok(client)
}

/// `EventStore` over the `ethereum_logs` table.
pub struct PgEventStore {
    client: Client,
}

impl PgEventStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(dsn: &str, schema: &str) -> Result<Self> {
        Ok(Self::new(connect_pg(dsn, schema).await?))
    }
}

fn record_from_row(row: &Row) -> EventLogRecord {
    EventLogRecord {
        id: row.get("id"),
        chain_id: row.get("chain_id"),
        from_address: row.get("from_address"),
        contract_address: row.get("contract_address"),
        event: row.get("event"),
        block_number: row.get("block_number"),
        log_index: row.get("log_index"),
        hash: row.get("hash"),
        data: row.get("data"),
        ack_id: row.get("ack_id"),
        date_created: row.get("date_created"),
        date_modified: row.get("date_modified"),
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn latest_for(&self, contract_address: &str, event: &str) -> Result<Option<EventLogRecord>> {
        let query = format!(
            "SELECT {} FROM ethereum_logs \
             WHERE contract_address = $1 AND event = $2 \
             ORDER BY block_number DESC, log_index DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = self.client.query_opt(query.as_str(), &[&contract_address, &event]).await?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn insert(&self, record: &NewEventLog) -> Result<InsertOutcome> {
        let query = r#"
            INSERT INTO ethereum_logs (
                chain_id,
                from_address,
                contract_address,
                event,
                block_number,
                log_index,
                hash,
                data
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (contract_address, event, block_number, log_index) DO NOTHING
            RETURNING id
        "#;

        let row = self
            .client
            .query_opt(
                query,
                &[
                    &record.chain_id,
                    &record.from_address,
                    &record.contract_address,
                    &record.event,
                    &record.block_number,
                    &record.log_index,
                    &record.hash,
                    &record.data,
                ],
            )
            .await?;

        match row {
            Some(row) => {
                let id: i64 = row.get(0);
                debug!(id, key = %record.logical_key(), "Event log stored");
                Ok(InsertOutcome::Inserted(id))
            }
            None => Ok(InsertOutcome::Duplicate),
        }
    }

    async fn attach_ack(&self, id: i64, ack_id: &str) -> Result<()> {
        self.client
            .execute(
                "UPDATE ethereum_logs SET ack_id = $2, date_modified = NOW() WHERE id = $1",
                &[&id, &ack_id],
            )
            .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<EventLogRecord>> {
        let query = format!("SELECT {} FROM ethereum_logs WHERE id = $1", SELECT_COLUMNS);
        let row = self.client.query_opt(query.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(record_from_row))
    }
}
