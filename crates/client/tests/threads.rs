mod support;

use murmur_client::testing::{MockChatClient, SendBehavior};
use murmur_client::{Messages, Thread};
use murmur_shared::{ClientError, MessageStatus, ServerEvent};

use support::{context, message, reply, settle, ME};

fn seeded() -> std::sync::Arc<MockChatClient> {
    let mock = MockChatClient::new(ME);
    let mut parent = message("c1", "p1", 1, "u2");
    parent.reply_count = 2;
    parent.thread_participants = vec!["u3".into(), "u4".into()];
    mock.seed_messages(vec![
        parent,
        reply("c1", "p1", "r1", 2, "u3"),
        reply("c1", "p1", "r2", 3, "u4"),
    ]);
    mock
}

fn thread_reply(id: &str, seq: u64, author: &str, reply_count: Option<u32>) -> ServerEvent {
    ServerEvent::ThreadReply {
        channel_id: "c1".into(),
        parent_id: "p1".into(),
        message: reply("c1", "p1", id, seq, author),
        reply_count,
    }
}

#[tokio::test]
async fn mount_loads_parent_and_replies() {
    let mock = seeded();
    let ctx = context(&mock);
    let thread = Thread::mount(&ctx, "c1", "p1").await;

    let state = thread.snapshot();
    assert!(!state.loading);
    assert_eq!(state.parent.as_ref().and_then(|p| p.id.as_deref()), Some("p1"));
    assert_eq!(state.replies.len(), 2);
    assert_eq!(state.reply_count, 2);
    assert_eq!(state.participants, vec!["u3", "u4"]);
}

#[tokio::test]
async fn pushed_reply_is_counted_once() {
    let mock = seeded();
    let ctx = context(&mock);
    let thread = Thread::mount(&ctx, "c1", "p1").await;

    let r3 = reply("c1", "p1", "r3", 4, "u5");
    mock.emit(ServerEvent::MessageNew { message: r3 });
    mock.emit(thread_reply("r3", 4, "u5", None));
    mock.emit(thread_reply("r3", 4, "u5", None));

    assert_eq!(thread.replies().len(), 3);
    assert_eq!(thread.reply_count(), 3);
    assert_eq!(thread.participants(), vec!["u3", "u4", "u5"]);
}

#[tokio::test]
async fn own_reply_is_counted_once_whatever_arrives_first() {
    let mock = seeded();
    mock.set_send_behavior(SendBehavior::PushThenRespond);
    let ctx = context(&mock);
    let thread = Thread::mount(&ctx, "c1", "p1").await;

    let sent = thread.send_reply("me too").await.unwrap();
    assert_eq!(sent.parent_id.as_deref(), Some("p1"));
    assert_eq!(thread.replies().len(), 3);
    assert_eq!(thread.reply_count(), 3);

    mock.set_send_behavior(SendBehavior::Respond);
    let second = thread.send_reply("and again").await.unwrap();
    mock.emit(ServerEvent::MessageNew { message: second });
    assert_eq!(thread.replies().len(), 4);
    assert_eq!(thread.reply_count(), 4);
    assert_eq!(thread.participants(), vec!["u3", "u4", ME]);
}

#[tokio::test]
async fn reported_count_never_lowers_the_local_one() {
    let mock = seeded();
    let ctx = context(&mock);
    let thread = Thread::mount(&ctx, "c1", "p1").await;

    mock.emit(thread_reply("r9", 9, "u2", Some(12)));
    assert_eq!(thread.reply_count(), 12);

    mock.emit(thread_reply("r10", 10, "u2", Some(4)));
    assert_eq!(thread.reply_count(), 13);
}

#[tokio::test]
async fn failed_reply_does_not_count() {
    let mock = seeded();
    let ctx = context(&mock);
    let thread = Thread::mount(&ctx, "c1", "p1").await;
    mock.fail_next("send_message", ClientError::Network("offline".into()));

    assert!(thread.send_reply("lost").await.is_err());
    let state = thread.snapshot();
    assert_eq!(state.reply_count, 2);
    assert_eq!(state.replies.len(), 3);
    assert_eq!(
        state.replies.items()[2].status,
        MessageStatus::Failed
    );
}

#[tokio::test]
async fn replies_to_other_threads_are_ignored() {
    let mock = seeded();
    let ctx = context(&mock);
    let thread = Thread::mount(&ctx, "c1", "p1").await;

    mock.emit(ServerEvent::MessageNew {
        message: reply("c1", "p2", "x1", 8, "u2"),
    });
    mock.emit(ServerEvent::MessageNew {
        message: message("c1", "m8", 8, "u2"),
    });

    assert_eq!(thread.replies().len(), 2);
    assert_eq!(thread.reply_count(), 2);
}

#[tokio::test]
async fn parent_deletion_tombstones_the_parent() {
    let mock = seeded();
    let ctx = context(&mock);
    let thread = Thread::mount(&ctx, "c1", "p1").await;

    mock.emit(ServerEvent::MessageDeleted {
        channel_id: "c1".into(),
        message_id: "p1".into(),
    });
    mock.emit(ServerEvent::MessageDeleted {
        channel_id: "c1".into(),
        message_id: "r1".into(),
    });

    let state = thread.snapshot();
    assert!(state.parent.unwrap().deleted);
    assert!(state.replies.get("r1").unwrap().deleted);
    assert_eq!(state.replies.len(), 2);
}

#[tokio::test]
async fn thread_and_message_list_share_the_channel_lease() {
    let mock = seeded();
    let ctx = context(&mock);
    let messages = Messages::mount(&ctx, "c1").await;
    let thread = Thread::mount(&ctx, "c1", "p1").await;
    assert_eq!(mock.subscribe_calls("c1"), 1);
    assert_eq!(ctx.subscriptions().lease_count("c1"), 2);

    mock.emit(thread_reply("r3", 4, "u5", None));
    assert_eq!(thread.reply_count(), 3);
    let parent = messages.snapshot().messages.get("p1").cloned().unwrap();
    assert_eq!(parent.reply_count, 3);
    assert!(parent.thread_participants.contains(&"u5".to_string()));

    thread.unmount().await;
    assert_eq!(mock.unsubscribe_calls("c1"), 0);
    drop(messages);
    settle().await;
    assert_eq!(mock.unsubscribe_calls("c1"), 1);
}
