use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, warn};

use super::{TriggerError, TriggerSource};

const CONSUMER_TAG: &str = "digest-worker";

/// RabbitMQ consumer over a single named queue.
///
/// Deliveries are acknowledged as soon as they are received, before any
/// processing. A crash after the ack loses that trigger.
pub struct RabbitTriggerSource {
    // 接続とチャネルはコンシューマが生きている間保持する
    _connection: Connection,
    _channel: Channel,
    consumer: Consumer,
    queue: String,
}

impl std::fmt::Debug for RabbitTriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitTriggerSource")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl RabbitTriggerSource {
    /// Connects, declares `queue` with default options and starts consuming.
    ///
    /// # Errors
    /// Returns [`TriggerError::Connection`] when any broker step fails.
    pub async fn connect(uri: &str, queue: &str) -> Result<Self, TriggerError> {
        let connection = Connection::connect(
            uri,
            ConnectionProperties::default().with_connection_name(CONSUMER_TAG.into()),
        )
        .await
        .map_err(|e| TriggerError::Connection(format!("RabbitMQ connection failed: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TriggerError::Connection(format!("RabbitMQ channel creation failed: {e}")))?;

        // 1件ずつ逐次処理するので先読みも1件に抑える
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| TriggerError::Connection(format!("failed to set QoS: {e}")))?;

        channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(|e| TriggerError::Connection(format!("failed to declare queue {queue}: {e}")))?;

        let consumer = channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TriggerError::Connection(format!("failed to consume {queue}: {e}")))?;

        debug!(queue = %queue, "trigger consumer started");

        Ok(Self {
            _connection: connection,
            _channel: channel,
            consumer,
            queue: queue.to_string(),
        })
    }
}

#[async_trait]
impl TriggerSource for RabbitTriggerSource {
    async fn next_trigger(&mut self) -> Result<Option<String>, TriggerError> {
        let Some(delivery) = self.consumer.next().await else {
            warn!(queue = %self.queue, "trigger consumer stream closed");
            return Ok(None);
        };
        let delivery = delivery.map_err(|e| TriggerError::Consume(e.to_string()))?;

        delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| TriggerError::Consume(format!("ack failed: {e}")))?;

        if delivery.redelivered {
            debug!(queue = %self.queue, "redelivered trigger");
        }

        String::from_utf8(delivery.data)
            .map(Some)
            .map_err(TriggerError::NotUtf8)
    }
}

/// `amqp://[user:pass@]host:port/%2f` を組み立てる。
///
/// 認証情報は両方揃っている場合のみ埋め込む。
#[must_use]
pub fn amqp_uri(host: &str, port: u16, credentials: Option<(&str, &str)>) -> String {
    match credentials {
        Some((username, password)) => format!("amqp://{username}:{password}@{host}:{port}/%2f"),
        None => format!("amqp://{host}:{port}/%2f"),
    }
}
