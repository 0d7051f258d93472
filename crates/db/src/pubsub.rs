//! Best-effort pub/sub bus over Redis channels.
//!
//! Delivery is at-most-once fan-out: subscribers that are not listening at
//! publish time miss the message. Durable state lives in the ODM, never
//! here.

use futures::StreamExt;
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGaugeVec, Registry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::error::AppResult;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::redis::Db;

lazy_static! {
    static ref MESSAGES_PUBLISHED: IntCounterVec = IntCounterVec::new(
        prometheus::opts!(
            "pubsub_messages_published_total",
            "Total messages published per topic"
        ),
        &["topic"]
    )
    .unwrap();
    static ref MESSAGES_CONSUMED: IntCounterVec = IntCounterVec::new(
        prometheus::opts!(
            "pubsub_messages_consumed_total",
            "Total messages consumed per topic"
        ),
        &["topic"]
    )
    .unwrap();
    static ref QUEUE_DEPTH: IntGaugeVec = IntGaugeVec::new(
        prometheus::opts!("pubsub_queue_depth", "In-process queue depth per consumer"),
        &["topic", "consumer"]
    )
    .unwrap();
}

/// Register this module's metrics with the given registry.
pub fn register_metrics(registry: &Registry) -> anyhow::Result<()> {
    registry.register(Box::new(MESSAGES_PUBLISHED.clone()))?;
    registry.register(Box::new(MESSAGES_CONSUMED.clone()))?;
    registry.register(Box::new(QUEUE_DEPTH.clone()))?;
    Ok(())
}

/// Named event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    SearchRequest,
    TorrentSearchResult,
    TorrentAdded,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SearchRequest => "events:v1:search:request",
            Topic::TorrentSearchResult => "events:v1:torrent:search_result",
            Topic::TorrentAdded => "events:v1:torrent:added",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialize and publish one message to a topic.
pub async fn publish<T: Serialize>(db: &Db, topic: Topic, msg: &T) -> AppResult<()> {
    let payload = serde_json::to_string(msg)?;
    db.publish(topic.as_str(), &payload).await?;
    MESSAGES_PUBLISHED.with_label_values(&[topic.as_str()]).inc();
    Ok(())
}

/// Consume a topic into a bounded queue until the token is cancelled.
///
/// Messages that fail to deserialize are logged and skipped. The send into
/// the queue blocks when the queue is full, which is what bounds how fast
/// this consumer drains the channel.
pub async fn consume_topic<T>(
    db: &Db,
    topic: Topic,
    queue: mpsc::Sender<T>,
    consumer: &str,
    cancel: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
{
    info!(topic = %topic, consumer = %consumer, "begin consuming topic");
    let depth = QUEUE_DEPTH.with_label_values(&[topic.as_str(), consumer]);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let mut pubsub = match db.subscribe(topic.as_str()).await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                error!(topic = %topic, error = %err, "failed to subscribe, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => continue,
                }
            }
        };

        let mut stream = pubsub.on_message();
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(topic = %topic, consumer = %consumer, "closing subscription to topic");
                    return;
                }
                msg = stream.next() => msg,
            };
            let Some(msg) = msg else {
                // connection dropped, resubscribe
                break;
            };
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    debug!(topic = %topic, error = %err, "unreadable message payload");
                    continue;
                }
            };
            match serde_json::from_str::<T>(&payload) {
                Ok(event) => {
                    depth.set((queue.max_capacity() - queue.capacity()) as i64);
                    if queue.send(event).await.is_err() {
                        info!(topic = %topic, consumer = %consumer, "queue closed, stopping consumer");
                        return;
                    }
                    MESSAGES_CONSUMED.with_label_values(&[topic.as_str()]).inc();
                }
                Err(err) => {
                    debug!(topic = %topic, error = %err, payload = %payload, "failed to deserialize message");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_channels() {
        assert_eq!(Topic::SearchRequest.as_str(), "events:v1:search:request");
        assert_eq!(
            Topic::TorrentSearchResult.as_str(),
            "events:v1:torrent:search_result"
        );
        assert_eq!(Topic::TorrentAdded.as_str(), "events:v1:torrent:added");
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn test_publish_and_consume_round_trip() {
        use crate::events::SearchRequest;
        use torrent::Category;

        let db = Db::connect("redis://localhost:6379").await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let consumer_db = db.clone();
        let consumer_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            consume_topic::<SearchRequest>(
                &consumer_db,
                Topic::SearchRequest,
                tx,
                "test",
                consumer_cancel,
            )
            .await;
        });

        // subscription needs a moment before the publish lands
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let request = SearchRequest {
            imdb: "tt0111161".to_string(),
            category: Category::Movie,
            season: None,
            episode: None,
        };
        publish(&db, Topic::SearchRequest, &request).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.imdb, "tt0111161");
        cancel.cancel();
        let _ = handle.await;
    }
}
