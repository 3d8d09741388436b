use std::time::Duration;

use async_nats::jetstream::{self, Context};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info};

use crate::bus::{AckFuture, EventBus};
use crate::error::{RelayError, Result};

/// JetStream bus: one stream per topic, stream name and subject both equal to the topic.
#[derive(Clone)]
pub struct NatsBus {
    js: Context,
}

pub async fn connect(url: &str) -> NatsBus {
    // Create NATS Client with NATS connection, connect to NATS
    let client = loop {
        match async_nats::connect(url).await {
            Ok(conn) => break conn,
            Err(e) => {
                error!("[NATS] Connection failed: {}, retrying...", e);
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    };
    info!("[NATS] Connected to NATS at {}", url);

    NatsBus {
        js: jetstream::new(client),
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        self.js
            .get_or_create_stream(jetstream::stream::Config {
                name: topic.to_string(),
                subjects: vec![topic.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| RelayError::Bus(format!("[NATS] Stream '{}' unavailable: {}", topic, e)))?;
        info!(topic, "[NATS] Stream ready");
        Ok(())
    }

    async fn publish(&self, topic: &str, message_id: &str, payload: Vec<u8>) -> Result<AckFuture> {
        let mut headers = HeaderMap::new();
        headers.insert("Nats-Msg-Id", message_id);

        let ack = self
            .js
            .publish_with_headers(topic.to_string(), headers, payload.into())
            .await
            .map_err(|e| RelayError::Bus(format!("[NATS] Publish to '{}' failed: {}", topic, e)))?;

        Ok(async move {
            let ack = ack
                .await
                .map_err(|e| RelayError::Bus(format!("[NATS] Acknowledgment failed: {}", e)))?;
            Ok(format!("{}:{}", ack.stream, ack.sequence))
        }
        .boxed())
    }
}
