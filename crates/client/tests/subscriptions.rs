mod support;

use std::time::Duration;

use murmur_client::testing::{Call, Gate, MockChatClient};
use murmur_client::{SubscriptionStatus, SyncConfig};
use murmur_shared::{ClientError, ServerEvent};

use support::{context, context_with, settle};

fn subscription_calls(mock: &MockChatClient) -> Vec<Call> {
    mock.calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Subscribe(_) | Call::Unsubscribe(_)))
        .collect()
}

#[tokio::test]
async fn concurrent_subscribes_share_one_call() {
    let mock = MockChatClient::new("me");
    let ctx = context(&mock);
    let manager = ctx.subscriptions();
    mock.close(Gate::Subscribe);

    let (first, second, ()) = tokio::join!(manager.subscribe("c1"), manager.subscribe("c1"), async {
        tokio::task::yield_now().await;
        assert_eq!(manager.status("c1"), SubscriptionStatus::Subscribing);
        mock.open(Gate::Subscribe);
    });

    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(mock.subscribe_calls("c1"), 1);
    assert_eq!(manager.status("c1"), SubscriptionStatus::Subscribed);
    assert_eq!(manager.lease_count("c1"), 2);

    first.release().await;
    assert_eq!(mock.unsubscribe_calls("c1"), 0);
    second.release().await;
    assert_eq!(mock.unsubscribe_calls("c1"), 1);
    assert_eq!(manager.status("c1"), SubscriptionStatus::Unsubscribed);
}

#[tokio::test]
async fn already_subscribed_counts_as_success() {
    let mock = MockChatClient::new("me");
    let ctx = context(&mock);
    // Another connection of this user already holds the topic server-side.
    mock.mark_subscribed("c1");

    let lease = ctx.subscriptions().subscribe("c1").await;
    assert!(lease.is_ok());
    assert_eq!(ctx.subscriptions().status("c1"), SubscriptionStatus::Subscribed);
}

#[tokio::test]
async fn typed_conflict_is_success_with_custom_predicate() {
    let mock = MockChatClient::new("me");
    let config = SyncConfig::default()
        .with_conflict_predicate(|err| matches!(err, ClientError::AlreadySubscribed(_)));
    let ctx = context_with(&mock, config);

    mock.fail_next("subscribe_to_channel", ClientError::AlreadySubscribed("c1".into()));
    assert!(ctx.subscriptions().subscribe("c1").await.is_ok());

    // The legacy text is no longer recognised.
    mock.mark_subscribed("c2");
    let err = ctx.subscriptions().subscribe("c2").await.unwrap_err();
    assert!(matches!(err, ClientError::Http { status: 409, .. }));
}

#[tokio::test]
async fn other_errors_surface_without_retry() {
    let mock = MockChatClient::new("me");
    let ctx = context(&mock);
    let manager = ctx.subscriptions();
    let failure = ClientError::Network("connection reset".into());
    mock.fail_next("subscribe_to_channel", failure.clone());

    let err = manager.subscribe("c1").await.unwrap_err();
    assert_eq!(err, failure);
    assert_eq!(manager.status("c1"), SubscriptionStatus::Error(failure));
    assert_eq!(manager.lease_count("c1"), 0);
    settle().await;
    assert_eq!(mock.subscribe_calls("c1"), 1);
    assert_eq!(mock.unsubscribe_calls("c1"), 0);

    // An explicit retry starts over.
    let lease = manager.subscribe("c1").await.unwrap();
    assert_eq!(manager.status("c1"), SubscriptionStatus::Subscribed);
    drop(lease);
}

#[tokio::test]
async fn teardown_before_subscribe_resolves_still_unsubscribes() {
    let mock = MockChatClient::new("me");
    let ctx = context(&mock);
    mock.close(Gate::Subscribe);

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), ctx.subscriptions().subscribe("c1")).await;
    assert!(abandoned.is_err());
    assert_eq!(mock.unsubscribe_calls("c1"), 0);

    mock.open(Gate::Subscribe);
    settle().await;
    assert_eq!(
        subscription_calls(&mock),
        vec![Call::Subscribe("c1".into()), Call::Unsubscribe("c1".into())]
    );
    assert!(!mock.is_subscribed("c1"));
}

#[tokio::test]
async fn resubscribe_waits_for_pending_unsubscribe() {
    let mock = MockChatClient::new("me");
    let ctx = context(&mock);
    let manager = ctx.subscriptions();

    let lease = manager.subscribe("c1").await.unwrap();
    drop(lease);
    let again = manager.subscribe("c1").await.unwrap();

    assert_eq!(
        subscription_calls(&mock),
        vec![
            Call::Subscribe("c1".into()),
            Call::Unsubscribe("c1".into()),
            Call::Subscribe("c1".into()),
        ]
    );
    assert!(mock.is_subscribed("c1"));
    again.release().await;
}

#[tokio::test]
async fn held_topics_are_resubscribed_after_reconnect() {
    let mock = MockChatClient::new("me");
    let ctx = context(&mock);
    let _lease = ctx.subscriptions().subscribe("c1").await.unwrap();

    mock.emit(ServerEvent::Connected);
    settle().await;
    assert_eq!(mock.subscribe_calls("c1"), 1);

    mock.emit(ServerEvent::Disconnected {
        reason: Some("socket closed".into()),
    });
    mock.emit(ServerEvent::Reconnecting { attempt: 1 });
    mock.emit(ServerEvent::Connected);
    settle().await;

    assert_eq!(mock.subscribe_calls("c1"), 2);
    assert_eq!(ctx.subscriptions().status("c1"), SubscriptionStatus::Subscribed);
}

#[tokio::test]
async fn reconnect_resubscription_can_be_disabled() {
    let mock = MockChatClient::new("me");
    let config = SyncConfig {
        resubscribe_on_reconnect: false,
        ..SyncConfig::default()
    };
    let ctx = context_with(&mock, config);
    let _lease = ctx.subscriptions().subscribe("c1").await.unwrap();

    mock.emit(ServerEvent::Disconnected { reason: None });
    mock.emit(ServerEvent::Connected);
    settle().await;

    assert_eq!(mock.subscribe_calls("c1"), 1);
}

#[tokio::test]
async fn shutdown_releases_everything_once() {
    let mock = MockChatClient::new("me");
    let ctx = context(&mock);
    let a = ctx.subscriptions().subscribe("c1").await.unwrap();
    let b = ctx.subscriptions().subscribe("c2").await.unwrap();
    assert_eq!(ctx.subscriptions().active_topics(), vec!["c1", "c2"]);

    ctx.shutdown().await;
    assert!(ctx.subscriptions().active_topics().is_empty());
    assert_eq!(mock.unsubscribe_calls("c1"), 1);
    assert_eq!(mock.unsubscribe_calls("c2"), 1);

    a.release().await;
    drop(b);
    settle().await;
    assert_eq!(mock.unsubscribe_calls("c1"), 1);
    assert_eq!(mock.unsubscribe_calls("c2"), 1);
}
