use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

use super::{Callback, NotificationRelay};
use crate::database::MemoryBackend;
use crate::utils::RelayError;

fn relay_with(backend: &MemoryBackend) -> NotificationRelay {
    NotificationRelay::new(Arc::new(backend.clone()))
}

fn recording_callback() -> (Callback, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: Callback = Arc::new(move |payload: &Value| sink.lock().push(payload.clone()));
    (callback, seen)
}

async fn wait_for_len(seen: &Arc<Mutex<Vec<Value>>>, len: usize) {
    timeout(Duration::from_secs(2), async {
        while seen.lock().len() < len {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("notification was not delivered in time");
}

#[tokio::test]
async fn test_first_subscribe_creates_one_upstream() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (cb_a, _) = recording_callback();
    let (cb_b, _) = recording_callback();

    relay.subscribe("chat", "a".into(), cb_a).await.unwrap();
    relay.subscribe("chat", "b".into(), cb_b).await.unwrap();

    assert_eq!(backend.listen_calls(), 1);
    assert_eq!(backend.active_listens("chat"), 1);
    assert_eq!(relay.subscriber_count("chat"), 2);
    assert_eq!(relay.active_channels(), vec!["chat".to_string()]);
}

#[tokio::test]
async fn test_notification_fans_out_to_every_subscriber() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (cb_a, seen_a) = recording_callback();
    let (cb_b, seen_b) = recording_callback();
    relay.subscribe("chat", "a".into(), cb_a).await.unwrap();
    relay.subscribe("chat", "b".into(), cb_b).await.unwrap();

    relay
        .publish("chat", &json!({ "user": "alice", "message": "hi" }))
        .await
        .unwrap();

    wait_for_len(&seen_a, 1).await;
    wait_for_len(&seen_b, 1).await;
    assert_eq!(seen_a.lock()[0], json!({ "user": "alice", "message": "hi" }));
    assert_eq!(seen_b.lock()[0], json!({ "user": "alice", "message": "hi" }));
}

#[tokio::test]
async fn test_same_subscriber_twice_is_delivered_once() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (callback, seen) = recording_callback();

    relay.subscribe("chat", "a".into(), callback.clone()).await.unwrap();
    relay.subscribe("chat", "a".into(), callback).await.unwrap();
    assert_eq!(relay.subscriber_count("chat"), 1);

    relay.publish("chat", &json!("one")).await.unwrap();
    relay.publish("chat", &json!("two")).await.unwrap();
    wait_for_len(&seen, 2).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test]
async fn test_last_unsubscribe_tears_down_upstream() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (cb_a, _) = recording_callback();
    let (cb_b, _) = recording_callback();
    relay.subscribe("orders", "a".into(), cb_a).await.unwrap();
    relay.subscribe("orders", "b".into(), cb_b).await.unwrap();

    relay.unsubscribe("orders", &"a".to_string()).await;
    assert_eq!(backend.active_listens("orders"), 1);
    assert_eq!(relay.active_channels(), vec!["orders".to_string()]);

    relay.unsubscribe("orders", &"b".to_string()).await;
    assert_eq!(backend.active_listens("orders"), 0);
    assert_eq!(backend.unlisten_calls(), 1);
    assert!(relay.active_channels().is_empty());
    assert!(relay.registry().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_unknown_is_noop() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (callback, _) = recording_callback();
    relay.subscribe("chat", "a".into(), callback).await.unwrap();

    relay.unsubscribe("nowhere", &"a".to_string()).await;
    relay.unsubscribe("chat", &"stranger".to_string()).await;

    assert_eq!(relay.subscriber_count("chat"), 1);
    assert_eq!(backend.unlisten_calls(), 0);
}

#[tokio::test]
async fn test_no_delivery_after_unsubscribe() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (cb_a, seen_a) = recording_callback();
    let (cb_b, seen_b) = recording_callback();
    relay.subscribe("chat", "a".into(), cb_a).await.unwrap();
    relay.subscribe("chat", "b".into(), cb_b).await.unwrap();

    relay.unsubscribe("chat", &"a".to_string()).await;
    relay.publish("chat", &json!("after")).await.unwrap();
    wait_for_len(&seen_b, 1).await;

    assert!(seen_a.lock().is_empty());
}

#[tokio::test]
async fn test_failed_listen_leaves_no_state() {
    let backend = MemoryBackend::new();
    backend.set_fail_listen(true);
    let relay = relay_with(&backend);
    let (callback, _) = recording_callback();

    let err = relay
        .subscribe("chat", "a".into(), callback.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Subscription { ref channel, .. } if channel == "chat"));
    assert!(relay.registry().is_empty());
    assert!(relay.active_channels().is_empty());

    backend.set_fail_listen(false);
    relay.subscribe("chat", "a".into(), callback).await.unwrap();
    assert_eq!(relay.active_channels(), vec!["chat".to_string()]);
}

#[tokio::test]
async fn test_concurrent_subscribes_share_one_listen() {
    let backend = MemoryBackend::new().with_listen_delay(Duration::from_millis(50));
    let relay = Arc::new(relay_with(&backend));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let relay = relay.clone();
            tokio::spawn(async move {
                let (callback, _) = recording_callback();
                relay.subscribe("chat", format!("sub-{i}"), callback).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(backend.listen_calls(), 1);
    assert_eq!(relay.subscriber_count("chat"), 8);
}

#[tokio::test]
async fn test_waiters_share_setup_failure() {
    let backend = MemoryBackend::new().with_listen_delay(Duration::from_millis(50));
    backend.set_fail_listen(true);
    let relay = Arc::new(relay_with(&backend));

    let first = {
        let relay = relay.clone();
        tokio::spawn(async move {
            let (callback, _) = recording_callback();
            relay.subscribe("chat", "a".into(), callback).await
        })
    };
    sleep(Duration::from_millis(10)).await;
    let (callback, _) = recording_callback();
    let second = relay.subscribe("chat", "b".into(), callback).await;

    assert!(first.await.unwrap().is_err());
    assert!(second.is_err());
    assert!(relay.registry().is_empty());
}

#[tokio::test]
async fn test_subscribe_in_flight_does_not_block_other_channels() {
    let backend = MemoryBackend::new();
    let relay = Arc::new(relay_with(&backend));
    let (cb_a, seen) = recording_callback();
    let (cb_b, _) = recording_callback();
    relay.subscribe("orders", "a".into(), cb_a).await.unwrap();
    relay.subscribe("orders", "b".into(), cb_b).await.unwrap();

    backend.set_listen_delay(Some(Duration::from_secs(5)));
    let pending = {
        let relay = relay.clone();
        tokio::spawn(async move {
            let (callback, _) = recording_callback();
            relay.subscribe("chat", "c".into(), callback).await
        })
    };
    sleep(Duration::from_millis(10)).await;

    relay.publish("orders", &json!({ "id": 1 })).await.unwrap();
    wait_for_len(&seen, 1).await;
    timeout(Duration::from_secs(1), relay.unsubscribe("orders", &"b".to_string()))
        .await
        .expect("unsubscribe blocked behind an unrelated subscribe");

    assert_eq!(relay.active_channels(), vec!["orders".to_string()]);
    pending.abort();
}

#[tokio::test]
async fn test_publish_without_subscribers_reaches_backend() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);

    relay.publish("system", &json!({ "level": "info" })).await.unwrap();

    assert!(relay.active_channels().is_empty());
    let published = backend.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].channel, "system");
    assert_eq!(published[0].payload, r#"{"level":"info"}"#);
}

#[tokio::test]
async fn test_publish_failure_is_typed() {
    let backend = MemoryBackend::new();
    backend.set_fail_notify(true);
    let relay = relay_with(&backend);

    let err = relay.publish("chat", &json!("hi")).await.unwrap_err();
    assert!(matches!(err, RelayError::Publish { .. }));
}

#[tokio::test]
async fn test_empty_channel_is_rejected() {
    let relay = relay_with(&MemoryBackend::new());
    let (callback, _) = recording_callback();

    assert!(matches!(
        relay.subscribe("", "a".into(), callback).await,
        Err(RelayError::Validation(_))
    ));
    assert!(matches!(
        relay.publish("", &json!({})).await,
        Err(RelayError::Validation(_))
    ));
}

#[tokio::test]
async fn test_quoted_payload_round_trips() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (callback, seen) = recording_callback();
    relay.subscribe("chat", "a".into(), callback).await.unwrap();

    let text = r#"it's a "quoted" '; NOTIFY other, 'x"#;
    relay.publish("chat", &json!({ "text": text })).await.unwrap();

    wait_for_len(&seen, 1).await;
    assert_eq!(seen.lock()[0]["text"], text);
}

#[tokio::test]
async fn test_malformed_upstream_payload_is_wrapped() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (callback, seen) = recording_callback();
    relay.subscribe("chat", "a".into(), callback).await.unwrap();

    backend.inject("chat", "not json at all");

    wait_for_len(&seen, 1).await;
    assert_eq!(seen.lock()[0], json!({ "message": "not json at all" }));
}

#[tokio::test]
async fn test_no_replay_for_late_subscribers() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (early_cb, early) = recording_callback();
    relay.subscribe("chat", "early".into(), early_cb).await.unwrap();

    relay.publish("chat", &json!("before")).await.unwrap();
    wait_for_len(&early, 1).await;

    let (late_cb, late) = recording_callback();
    relay.subscribe("chat", "late".into(), late_cb).await.unwrap();
    relay.publish("chat", &json!("after")).await.unwrap();
    wait_for_len(&late, 1).await;
    wait_for_len(&early, 2).await;

    assert_eq!(*late.lock(), vec![json!("after")]);
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_delivery() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let panicking: Callback = Arc::new(|_: &Value| panic!("subscriber blew up"));
    let (callback, seen) = recording_callback();
    relay.subscribe("chat", "bad".into(), panicking).await.unwrap();
    relay.subscribe("chat", "good".into(), callback).await.unwrap();

    relay.publish("chat", &json!(1)).await.unwrap();
    relay.publish("chat", &json!(2)).await.unwrap();

    wait_for_len(&seen, 2).await;
    assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
    assert_eq!(relay.subscriber_count("chat"), 2);
}

#[tokio::test]
async fn test_notifications_arrive_in_upstream_order() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (callback, seen) = recording_callback();
    relay.subscribe("chat", "a".into(), callback).await.unwrap();

    for i in 0..50 {
        relay.publish("chat", &json!(i)).await.unwrap();
    }

    wait_for_len(&seen, 50).await;
    let expected: Vec<Value> = (0..50).map(|i| json!(i)).collect();
    assert_eq!(*seen.lock(), expected);
}

#[tokio::test]
async fn test_interleaved_subscribe_unsubscribe_keeps_one_listener_per_channel() {
    let backend = MemoryBackend::new();
    let relay = Arc::new(relay_with(&backend));
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let relay = relay.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                let channel = if i % 2 == 0 { "chat" } else { "orders" };
                let subscriber = format!("sub-{i}");
                for _ in 0..10 {
                    let calls = calls.clone();
                    let callback: Callback = Arc::new(move |_: &Value| {
                        calls.fetch_add(1, Ordering::SeqCst);
                    });
                    relay.subscribe(channel, subscriber.clone(), callback).await.unwrap();
                    tokio::task::yield_now().await;
                    relay.unsubscribe(channel, &subscriber).await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    for channel in ["chat", "orders"] {
        assert_eq!(relay.subscriber_count(channel), 0);
        assert_eq!(backend.active_listens(channel), 0);
    }
    assert!(relay.registry().is_empty());
    assert_eq!(backend.listen_calls(), backend.unlisten_calls());
}

#[tokio::test]
async fn test_close_all_releases_every_upstream() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    for channel in ["chat", "orders", "system"] {
        let (callback, _) = recording_callback();
        relay.subscribe(channel, "a".into(), callback).await.unwrap();
    }

    relay.close_all().await;

    assert!(relay.active_channels().is_empty());
    assert_eq!(backend.unlisten_calls(), 3);
    for channel in ["chat", "orders", "system"] {
        assert_eq!(backend.active_listens(channel), 0);
    }
}

#[tokio::test]
async fn test_close_all_cancels_in_flight_setup() {
    let backend = MemoryBackend::new().with_listen_delay(Duration::from_millis(100));
    let relay = Arc::new(relay_with(&backend));

    let pending = {
        let relay = relay.clone();
        tokio::spawn(async move {
            let (callback, _) = recording_callback();
            relay.subscribe("chat", "a".into(), callback).await
        })
    };
    sleep(Duration::from_millis(20)).await;
    relay.close_all().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(RelayError::Subscription { .. })));
    assert!(relay.registry().is_empty());
    assert!(relay.active_channels().is_empty());
    assert_eq!(backend.active_listens("chat"), 0);
}

#[tokio::test]
async fn test_retiring_listener_does_not_deliver_to_replacement() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (cb_a, _) = recording_callback();
    relay.subscribe("chat", "a".into(), cb_a).await.unwrap();

    // First half of an unsubscribe: the entry is gone, its listener still runs.
    let retiring = relay
        .registry()
        .leave("chat", &"a".to_string())
        .expect("last subscriber hands back the upstream");

    let (cb_b, seen_b) = recording_callback();
    relay.subscribe("chat", "b".into(), cb_b).await.unwrap();
    assert_eq!(backend.active_listens("chat"), 2);

    relay.publish("chat", &json!({ "n": 1 })).await.unwrap();
    wait_for_len(&seen_b, 1).await;
    sleep(Duration::from_millis(50)).await;
    retiring.shutdown("chat").await;

    assert_eq!(seen_b.lock().as_slice(), &[json!({ "n": 1 })]);
    assert_eq!(backend.active_listens("chat"), 1);
    assert_eq!(relay.active_channels(), vec!["chat".to_string()]);
}

#[tokio::test]
async fn test_unsubscribe_interrupts_error_backoff() {
    let backend = MemoryBackend::new();
    let relay = relay_with(&backend);
    let (callback, _) = recording_callback();
    relay.subscribe("chat", "a".into(), callback).await.unwrap();

    backend.set_fail_recv(true);
    backend.inject("chat", "{}");
    // Let the listener hit the error and start backing off.
    sleep(Duration::from_millis(50)).await;

    timeout(
        Duration::from_millis(500),
        relay.unsubscribe("chat", &"a".to_string()),
    )
    .await
    .expect("unsubscribe waited out the retry delay");
    assert_eq!(backend.active_listens("chat"), 0);
    assert_eq!(backend.unlisten_calls(), 1);
}
