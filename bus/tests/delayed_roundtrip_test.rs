//! Integration tests for the publish / throttle / redeliver pipeline.
//!
//! Exercises the full in-memory bus: a publisher diverting over-limit events
//! to the holding topic, the redelivery buffer holding them for the cooldown,
//! and a subscriber observing the republished events indistinguishably from
//! direct ones.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use conveyor_bus::{
    BusContext, Config, EventEnvelope, MemoryBroker, MemoryCounterStore,
};

fn test_config(rate_limit: u64, cooldown_secs: u64) -> Config {
    Config {
        rate_limit,
        rate_window: Duration::from_secs(60),
        redelivery_cooldown: Duration::from_secs(cooldown_secs),
        counter_sweep_interval: Duration::from_secs(30),
        channel_capacity: 64,
    }
}

/// Builds a context alongside a concrete broker handle for assertions.
fn test_context(config: Config) -> (BusContext, MemoryBroker) {
    let broker = MemoryBroker::new();
    let context = BusContext::new(
        Arc::new(broker.clone()),
        Arc::new(MemoryCounterStore::new()),
        config,
    );
    (context, broker)
}

fn payload(key: &str, value: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), json!(value));
    map
}

#[tokio::test]
async fn direct_publish_reaches_subscribers_unwrapped() {
    let (context, broker) = test_context(test_config(1000, 60));
    let publisher = context.publisher();
    let subscriber = context.subscriber();

    let seen: Arc<Mutex<Vec<EventEnvelope>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_callback = Arc::clone(&seen);

    let consumer = tokio::spawn(async move {
        subscriber
            .subscribe("event:test", move |envelope| {
                let seen = Arc::clone(&seen_in_callback);
                async move {
                    seen.lock().await.push(envelope);
                    Ok(())
                }
            })
            .await
    });
    tokio::task::yield_now().await;

    publisher
        .publish("event:test", "t1", payload("key", "value"), false)
        .await
        .unwrap();
    tokio::task::yield_now().await;

    // Wire body is the message with tenantId merged in, nothing else.
    let bodies = broker.published_to("event:test").await;
    assert_eq!(bodies.len(), 1);
    let wire: Value = serde_json::from_slice(&bodies[0]).unwrap();
    assert_eq!(wire, json!({"tenantId": "t1", "key": "value"}));

    {
        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tenant_id, "t1");
        assert!(!seen[0].delayed);
        assert!(seen[0].event_type.is_none());
    }

    context.shutdown();
    assert!(consumer.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn throttled_event_round_trips_through_the_holding_topic() {
    // Limit of 1 so the second publish diverts.
    let (context, broker) = test_context(test_config(1, 5));
    let publisher = context.publisher();
    let subscriber = context.subscriber();
    let buffer = context.redelivery_buffer();

    let seen: Arc<Mutex<Vec<EventEnvelope>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_callback = Arc::clone(&seen);

    let consumer = tokio::spawn(async move {
        subscriber
            .subscribe("event:test", move |envelope| {
                let seen = Arc::clone(&seen_in_callback);
                async move {
                    seen.lock().await.push(envelope);
                    Ok(())
                }
            })
            .await
    });
    let buffer_task = tokio::spawn(async move { buffer.run().await });
    tokio::task::yield_now().await;

    publisher
        .publish("event:test", "t1", payload("n", "first"), true)
        .await
        .unwrap();
    publisher
        .publish("event:test", "t1", payload("n", "second"), true)
        .await
        .unwrap();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    // The second event sits on the holding topic with the delayed markers.
    let held = broker.published_to("event:test:delayed").await;
    assert_eq!(held.len(), 1);
    let held_wire: Value = serde_json::from_slice(&held[0]).unwrap();
    assert_eq!(held_wire["delayed"], json!(true));
    assert_eq!(held_wire["event_type"], json!("event:test:delayed"));
    assert_eq!(seen.lock().await.len(), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    // Republished body matches the direct-publish shape.
    let bodies = broker.published_to("event:test").await;
    assert_eq!(bodies.len(), 2);
    let replayed: Value = serde_json::from_slice(&bodies[1]).unwrap();
    assert_eq!(replayed, json!({"tenantId": "t1", "n": "second"}));

    {
        let seen = seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].payload["n"], json!("second"));
        assert!(!seen[1].delayed);
        assert!(seen[1].event_type.is_none());
    }

    context.shutdown();
    assert!(consumer.await.unwrap().is_ok());
    assert!(buffer_task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn held_delivery_is_acked_only_after_republish() {
    let (context, broker) = test_context(test_config(1, 10));
    let publisher = context.publisher();
    let buffer = context.redelivery_buffer();

    let buffer_task = tokio::spawn(async move { buffer.run().await });
    tokio::task::yield_now().await;

    publisher
        .publish("event:test", "t1", payload("n", "a"), true)
        .await
        .unwrap();
    publisher
        .publish("event:test", "t1", payload("n", "b"), true)
        .await
        .unwrap();
    tokio::task::yield_now().await;

    assert_eq!(broker.unacked_on("event:test:delayed").await, 1);

    tokio::time::advance(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert_eq!(broker.unacked_on("event:test:delayed").await, 0);
    assert_eq!(broker.published_to("event:test").await.len(), 2);

    context.shutdown();
    assert!(buffer_task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_cooldown_leaves_the_event_held() {
    let (context, broker) = test_context(test_config(1, 60));
    let publisher = context.publisher();
    let buffer = context.redelivery_buffer();

    let buffer_task = tokio::spawn(async move { buffer.run().await });
    tokio::task::yield_now().await;

    publisher
        .publish("event:test", "t1", payload("n", "a"), true)
        .await
        .unwrap();
    publisher
        .publish("event:test", "t1", payload("n", "b"), true)
        .await
        .unwrap();
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_secs(30)).await;
    tokio::task::yield_now().await;

    // Mid-cooldown shutdown: the buffer exits cleanly without acking, so a
    // restarted buffer would see the event again.
    context.shutdown();
    assert!(buffer_task.await.unwrap().is_ok());

    assert_eq!(broker.unacked_on("event:test:delayed").await, 1);
    assert_eq!(broker.published_to("event:test").await.len(), 1);
}

#[tokio::test]
async fn low_traffic_topics_never_consume_the_window() {
    let (context, broker) = test_context(test_config(1, 60));
    let publisher = context.publisher();

    // Limit is 1 but the low-traffic path never consults the limiter.
    for i in 0..5u8 {
        publisher
            .publish("event:quiet", "t1", payload("n", &i.to_string()), false)
            .await
            .unwrap();
    }

    assert_eq!(broker.published_to("event:quiet").await.len(), 5);
    assert!(broker.published_to("event:quiet:delayed").await.is_empty());
}
