mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use queue_bus::{
    InMemoryMessageLock, InMemoryQueue, LockKey, MessageLock, MessageSerializer, MessageType,
    QueueEndpoint, QueueError, QueueIdentity, QueueName, SerializationError,
    JsonEnvelopeSerializer,
};

use common::{envelope, order_placed, OrderPlaced};

fn queue() -> InMemoryQueue {
    InMemoryQueue::new(QueueIdentity::from_name("orders"))
}

#[test]
fn test_queue_identity() {
    let by_name = QueueIdentity::from_name("orders");
    assert_eq!(by_name.name.as_str(), "orders");
    assert_eq!(by_name.uri, "queue://orders");

    let by_url = QueueIdentity::from_url("https://sqs.eu-west-1.amazonaws.com/123456789012/payments/");
    assert_eq!(by_url.name.as_str(), "payments");
}

#[tokio::test]
async fn test_fetched_message_is_invisible_until_deleted() {
    let queue = queue();
    let id = queue.send("hello").await;

    let batch = queue.fetch_messages(10, Duration::ZERO).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);
    assert_eq!(batch[0].body, "hello");
    assert_eq!(batch[0].attributes.approximate_receive_count, 1);
    assert!(batch[0].attributes.sent_timestamp_ms.is_some());

    assert!(queue.fetch_messages(10, Duration::ZERO).await.unwrap().is_empty());
    assert_eq!(queue.in_flight().await, 1);

    queue.delete_message(&batch[0].receipt_handle).await.unwrap();
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn test_fetch_respects_max_count() {
    let queue = queue();
    for n in 0..5 {
        queue.send(format!("body-{}", n)).await;
    }

    let batch = queue.fetch_messages(3, Duration::ZERO).await.unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].body, "body-0");
    assert_eq!(queue.fetch_messages(10, Duration::ZERO).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_message_reappears_after_visibility_timeout() {
    let queue = queue().with_visibility_timeout(Duration::from_millis(30));
    queue.send("retry me").await;

    let first = queue.fetch_messages(1, Duration::ZERO).await.unwrap();
    assert_eq!(first.len(), 1);

    sleep(Duration::from_millis(50)).await;

    let second = queue.fetch_messages(1, Duration::ZERO).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, first[0].id);
    assert_eq!(second[0].attributes.approximate_receive_count, 2);

    // The first receipt no longer refers to the message.
    assert!(matches!(
        queue.delete_message(&first[0].receipt_handle).await,
        Err(QueueError::ReceiptExpired)
    ));
    queue.delete_message(&second[0].receipt_handle).await.unwrap();
}

#[tokio::test]
async fn test_change_visibility_makes_message_available() {
    let queue = queue();
    queue.send("again").await;

    let batch = queue.fetch_messages(1, Duration::ZERO).await.unwrap();
    queue
        .change_visibility(&batch[0].receipt_handle, Duration::ZERO)
        .await
        .unwrap();

    let again = queue.fetch_messages(1, Duration::ZERO).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].attributes.approximate_receive_count, 2);
}

#[tokio::test]
async fn test_long_poll_wakes_on_send() {
    let queue = Arc::new(queue());
    let sender = queue.clone();

    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        sender.send("late").await;
    });

    let started = Instant::now();
    let batch = queue.fetch_messages(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_long_poll_times_out_empty() {
    let queue = queue();
    let started = Instant::now();
    let batch = queue.fetch_messages(1, Duration::from_millis(30)).await.unwrap();
    assert!(batch.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_closed_queue_rejects_calls() {
    let queue = queue();
    queue.close();
    assert!(matches!(
        queue.fetch_messages(1, Duration::ZERO).await,
        Err(QueueError::Closed)
    ));
}

#[test]
fn test_envelope_deserialization() {
    let mut serializer = JsonEnvelopeSerializer::new();
    serializer.add::<OrderPlaced>();
    assert!(serializer.knows(&MessageType::new("OrderPlaced")));

    let body = serde_json::json!({
        "Subject": "OrderPlaced",
        "Message": r#"{"order_id":42}"#,
        "MessageAttributes": {
            "traceparent": { "Type": "String", "Value": "00-abc-def-01" }
        }
    })
    .to_string();

    let decoded = serializer.deserialize(&body).unwrap();
    assert_eq!(decoded.message_type.as_str(), "OrderPlaced");
    assert_eq!(decoded.message.downcast_ref::<OrderPlaced>().unwrap().order_id, 42);
    assert_eq!(decoded.attributes.get("traceparent").map(String::as_str), Some("00-abc-def-01"));
    assert!(decoded.unique_key.is_none());
}

#[test]
fn test_envelope_errors() {
    let mut serializer = JsonEnvelopeSerializer::new();
    serializer.add::<OrderPlaced>();

    match serializer.deserialize(&envelope("OrderRefunded", "{}")) {
        Err(err @ SerializationError::UnknownMessageType(_)) => {
            assert!(err.is_unroutable());
            assert!(err.to_string().contains("OrderRefunded"));
        }
        other => panic!("unexpected result: {:?}", other.err()),
    }
    assert!(SerializationError::MissingTypeTag.is_unroutable());
    assert!(!SerializationError::Malformed("eof".to_string()).is_unroutable());
    assert!(matches!(
        serializer.deserialize(&envelope("", "{}")),
        Err(SerializationError::MissingTypeTag)
    ));
    assert!(matches!(
        serializer.deserialize("[1, 2"),
        Err(SerializationError::Malformed(_))
    ));
    assert!(serializer.deserialize(&order_placed(1)).is_ok());
}

#[tokio::test]
async fn test_in_memory_lock() {
    let lock = InMemoryMessageLock::new();
    let key = LockKey::new(&QueueName::new("orders"), &MessageType::new("OrderPlaced"), "m1");

    assert!(lock.try_acquire(&key, Duration::from_secs(60)).await.unwrap().acquired);
    assert!(!lock.try_acquire(&key, Duration::from_secs(60)).await.unwrap().acquired);
    assert!(lock.is_held(&key).await);

    lock.release(&key).await.unwrap();
    assert!(!lock.is_held(&key).await);
    assert!(lock.try_acquire(&key, Duration::from_secs(60)).await.unwrap().acquired);
}

#[tokio::test]
async fn test_in_memory_lock_expires() {
    let lock = InMemoryMessageLock::new();
    let key = LockKey::new(&QueueName::new("orders"), &MessageType::new("OrderPlaced"), "m2");

    assert!(lock.try_acquire(&key, Duration::from_millis(20)).await.unwrap().acquired);
    sleep(Duration::from_millis(40)).await;
    assert!(lock.try_acquire(&key, Duration::from_millis(20)).await.unwrap().acquired);
}

#[tokio::test]
async fn test_in_memory_lock_default_ttl_never_expires() {
    let lock = InMemoryMessageLock::new();
    let key = LockKey::new(&QueueName::new("orders"), &MessageType::new("OrderPlaced"), "m3");

    assert!(lock.try_acquire(&key, queue_bus::DEFAULT_LOCK_TTL).await.unwrap().acquired);
    assert!(lock.is_held(&key).await);
}
