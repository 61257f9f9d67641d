mod support;

use std::sync::Arc;

use murmur_client::testing::MockChatClient;
use murmur_client::{ChannelSubscription, ConnectionState, ConnectionStatus, SubscriptionStatus};
use murmur_shared::{ClientError, EventKind, ServerEvent};
use parking_lot::Mutex;

use support::{context, message, ME};

fn recorder() -> (Arc<Mutex<Vec<EventKind>>>, impl Fn(&ServerEvent) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |event: &ServerEvent| sink.lock().push(event.kind()))
}

#[tokio::test]
async fn forwards_only_events_of_its_channel() {
    let mock = MockChatClient::new(ME);
    let ctx = context(&mock);
    let (seen, handler) = recorder();
    let feed = ChannelSubscription::mount(&ctx, "c1", handler).await;
    assert_eq!(feed.status(), SubscriptionStatus::Subscribed);

    mock.emit(ServerEvent::MessageNew {
        message: message("c1", "m1", 1, "u2"),
    });
    mock.emit(ServerEvent::TypingStart {
        channel_id: "c2".into(),
        user_id: "u2".into(),
    });
    mock.emit(ServerEvent::TotalUnreadChanged {
        total_unread_count: 3,
    });
    mock.emit(ServerEvent::ChannelDeleted {
        channel_id: "c1".into(),
    });

    assert_eq!(
        *seen.lock(),
        vec![EventKind::MessageNew, EventKind::ChannelDeleted]
    );
}

#[tokio::test]
async fn swapping_the_handler_keeps_the_subscription() {
    let mock = MockChatClient::new(ME);
    let ctx = context(&mock);
    let (first, handler) = recorder();
    let feed = ChannelSubscription::mount(&ctx, "c1", handler).await;

    let (second, handler) = recorder();
    feed.set_handler(handler);
    mock.emit(ServerEvent::TypingStop {
        channel_id: "c1".into(),
        user_id: "u2".into(),
    });

    assert!(first.lock().is_empty());
    assert_eq!(*second.lock(), vec![EventKind::TypingStop]);
    assert_eq!(mock.subscribe_calls("c1"), 1);
    assert_eq!(mock.unsubscribe_calls("c1"), 0);
}

#[tokio::test]
async fn status_reports_subscribe_failures() {
    let mock = MockChatClient::new(ME);
    let ctx = context(&mock);
    let failure = ClientError::Network("refused".into());
    mock.fail_next("subscribe_to_channel", failure.clone());

    let feed = ChannelSubscription::mount(&ctx, "c1", |_| {}).await;
    assert_eq!(feed.status(), SubscriptionStatus::Error(failure));
}

#[tokio::test]
async fn unmount_marks_unsubscribed_and_detaches() {
    let mock = MockChatClient::new(ME);
    let ctx = context(&mock);
    let (seen, handler) = recorder();
    let feed = ChannelSubscription::mount(&ctx, "c1", handler).await;
    let rx = feed.watch();

    feed.unmount().await;
    assert_eq!(*rx.borrow(), SubscriptionStatus::Unsubscribed);
    assert_eq!(mock.listener_count(EventKind::MessageNew), 0);

    mock.emit(ServerEvent::MessageNew {
        message: message("c1", "m1", 1, "u2"),
    });
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn connection_status_follows_lifecycle_events() {
    let mock = MockChatClient::new(ME);
    let ctx = context(&mock);
    let status = ConnectionStatus::mount(&ctx);
    assert_eq!(status.state(), ConnectionState::Disconnected);

    mock.emit(ServerEvent::Connecting);
    assert!(status.state().is_connecting());
    mock.emit(ServerEvent::Connected);
    assert!(status.state().is_connected());

    mock.emit(ServerEvent::Disconnected {
        reason: Some("idle timeout".into()),
    });
    mock.emit(ServerEvent::Reconnecting { attempt: 2 });
    assert_eq!(status.state(), ConnectionState::Reconnecting { attempt: 2 });
    assert_eq!(status.last_disconnect_reason().as_deref(), Some("idle timeout"));
}
