//! Integration tests for subscriber sessions.
//!
//! Connections are stood in for by `futures` channels: an unbounded
//! receiver of `Result<String, io::Error>` plays the inbound half (dropping
//! its sender is the peer closing), and a channel sender plays the
//! outbound half (dropping its receiver is a broken connection).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use worldsync_core::{ExitCause, Session, SessionSummary, WorldStore};

const WAIT: Duration = Duration::from_secs(2);

/// Test-side ends of one fake connection.
struct Client {
    to_server: mpsc::UnboundedSender<Result<String, io::Error>>,
    from_server: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<SessionSummary>,
}

impl Client {
    fn send(&self, frame: &str) {
        self.to_server.unbounded_send(Ok(frame.to_owned())).unwrap();
    }

    async fn recv(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.from_server.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("server closed the connection");
        serde_json::from_str(&text).unwrap()
    }

    async fn finish(self) -> SessionSummary {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not shut down")
            .unwrap()
    }
}

fn connect(world: &Arc<WorldStore>) -> Client {
    let session = Session::connect(Arc::clone(world)).unwrap();
    let (to_server, inbound) = mpsc::unbounded();
    let (outbound, from_server) = mpsc::unbounded();
    let task = tokio::spawn(session.run(inbound, outbound));
    Client {
        to_server,
        from_server,
        task,
    }
}

#[tokio::test]
async fn two_sessions_share_changes_with_self_echo() {
    let world = Arc::new(WorldStore::new());
    let mut a = connect(&world);
    let mut b = connect(&world);

    assert_eq!(a.recv().await, json!({}));
    assert_eq!(b.recv().await, json!({}));

    a.send(r#"{"player1": {"x": 5}}"#);

    assert_eq!(a.recv().await, json!({"player1": {"x": 5}}));
    assert_eq!(b.recv().await, json!({"player1": {"x": 5}}));
    assert_eq!(world.get("player1")["x"], json!(5));

    drop(a.to_server);
    let summary = tokio::time::timeout(WAIT, a.task).await.unwrap().unwrap();
    assert_eq!(summary.cause, ExitCause::PeerClosed);
    assert_eq!(summary.frames_applied, 1);
    assert_eq!(summary.messages_sent, 2);

    // B is unaffected by A leaving.
    assert_eq!(world.listener_count(), 1);
    world.update("player1", "y", json!(1));
    assert_eq!(b.recv().await, json!({"player1": {"x": 5, "y": 1}}));
}

#[tokio::test]
async fn new_session_receives_full_world_first() {
    let world = Arc::new(WorldStore::new());
    world.update("tree", "height", json!(3));
    world.update("rock", "weight", json!(40));

    let mut client = connect(&world);
    assert_eq!(
        client.recv().await,
        json!({"tree": {"height": 3}, "rock": {"weight": 40}})
    );
}

#[tokio::test]
async fn frame_with_several_entities_sets_each_once() {
    let world = Arc::new(WorldStore::new());
    let mut client = connect(&world);
    client.recv().await;

    client.send(r#"{"a": {"n": 1}, "b": {"n": 2}}"#);

    let mut seen = BTreeSet::new();
    for _ in 0..2 {
        let delta = client.recv().await;
        let object = delta.as_object().unwrap();
        assert_eq!(object.len(), 1);
        seen.extend(object.keys().cloned());
    }
    assert_eq!(seen, BTreeSet::from(["a".to_owned(), "b".to_owned()]));
}

#[tokio::test]
async fn concurrent_writers_lose_no_updates() {
    let world = Arc::new(WorldStore::new());
    let mut a = connect(&world);
    let mut b = connect(&world);
    a.recv().await;
    b.recv().await;

    a.send(r#"{"left": {"v": 1}}"#);
    b.send(r#"{"right": {"v": 2}}"#);

    for client in [&mut a, &mut b] {
        let mut keys = BTreeSet::new();
        for _ in 0..2 {
            let delta = client.recv().await;
            keys.extend(delta.as_object().unwrap().keys().cloned());
        }
        assert_eq!(keys, BTreeSet::from(["left".to_owned(), "right".to_owned()]));
    }

    let snapshot = world.snapshot();
    assert_eq!(snapshot["left"]["v"], json!(1));
    assert_eq!(snapshot["right"]["v"], json!(2));
}

#[tokio::test]
async fn malformed_frame_tears_down_only_that_session() {
    let world = Arc::new(WorldStore::new());
    let mut bad = connect(&world);
    let mut good = connect(&world);
    bad.recv().await;
    good.recv().await;

    bad.send("this is not json");
    // The outbound side is released too: the server drops its write half.
    assert!(
        tokio::time::timeout(WAIT, bad.from_server.next())
            .await
            .unwrap()
            .is_none()
    );
    let summary = bad.finish().await;
    assert_eq!(summary.cause, ExitCause::MalformedFrame);
    assert_eq!(summary.frames_applied, 0);

    assert_eq!(world.listener_count(), 1);
    good.send(r#"{"still": {"alive": true}}"#);
    assert_eq!(good.recv().await, json!({"still": {"alive": true}}));
}

#[tokio::test]
async fn frame_with_non_object_entity_is_rejected_whole() {
    let world = Arc::new(WorldStore::new());
    let mut client = connect(&world);
    client.recv().await;

    client.send(r#"{"ok": {"x": 1}, "broken": [1, 2, 3]}"#);
    let summary = client.finish().await;

    assert_eq!(summary.cause, ExitCause::MalformedFrame);
    assert_eq!(world.entity_count(), 0);
}

#[tokio::test]
async fn receive_error_tears_down_session() {
    let world = Arc::new(WorldStore::new());
    let mut client = connect(&world);
    client.recv().await;

    client
        .to_server
        .unbounded_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        .unwrap();
    let summary = client.finish().await;

    assert_eq!(summary.cause, ExitCause::ReceiveFailed);
    assert_eq!(world.listener_count(), 0);
}

#[tokio::test]
async fn broken_outbound_releases_parked_inbound_loop() {
    let world = Arc::new(WorldStore::new());
    let session = Session::connect(Arc::clone(&world)).unwrap();
    let (to_server, inbound) = mpsc::unbounded::<Result<String, io::Error>>();
    let (outbound, from_server) = mpsc::unbounded::<String>();
    drop(from_server);

    // The peer never closes its side; the failed write alone must end both
    // loops.
    let summary = tokio::time::timeout(WAIT, session.run(inbound, outbound))
        .await
        .expect("inbound loop stayed parked after send failure");

    assert_eq!(summary.cause, ExitCause::SendFailed);
    assert_eq!(summary.messages_sent, 0);
    assert_eq!(world.listener_count(), 0);
    drop(to_server);
}

#[tokio::test]
async fn close_with_pending_items_releases_both_loops() {
    let world = Arc::new(WorldStore::new());
    let session = Session::connect(Arc::clone(&world)).unwrap();
    let handle = session.handle();

    // A zero-capacity channel nobody reads: the sender stalls on its
    // second write and the queue backs up behind it.
    let (to_server, inbound) = mpsc::unbounded::<Result<String, io::Error>>();
    let (outbound, _stalled_reader) = mpsc::channel::<String>(0);
    let task = tokio::spawn(session.run(inbound, outbound));

    for i in 0..100 {
        world.update("spam", "n", json!(i));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Bulk shutdown sweep races the session's own removal.
    world.remove_all_listeners();
    handle.close();

    let summary = tokio::time::timeout(WAIT, task)
        .await
        .expect("session deadlocked with pending items")
        .unwrap();
    assert_eq!(summary.cause, ExitCause::Cancelled);
    assert!(summary.messages_sent <= 1);
    assert_eq!(world.listener_count(), 0);
    drop(to_server);
}

#[tokio::test]
async fn handle_closes_an_idle_session() {
    let world = Arc::new(WorldStore::new());
    let session = Session::connect(Arc::clone(&world)).unwrap();
    let handle = session.handle();
    assert_eq!(handle.id(), session.id());

    let (to_server, inbound) = mpsc::unbounded::<Result<String, io::Error>>();
    let (outbound, mut from_server) = mpsc::unbounded::<String>();
    let task = tokio::spawn(session.run(inbound, outbound));

    assert_eq!(from_server.next().await.as_deref(), Some("{}"));
    handle.close();

    let summary = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(summary.cause, ExitCause::Cancelled);
    assert_eq!(summary.messages_sent, 1);
    assert!(handle.is_closed());
    assert_eq!(world.listener_count(), 0);
    drop(to_server);
}

#[tokio::test]
async fn aborting_a_running_session_releases_it() {
    let world = Arc::new(WorldStore::new());
    let session = Session::connect(Arc::clone(&world)).unwrap();
    let handle = session.handle();

    let (to_server, inbound) = mpsc::unbounded::<Result<String, io::Error>>();
    let (outbound, mut from_server) = mpsc::unbounded::<String>();
    let task = tokio::spawn(session.run(inbound, outbound));
    assert_eq!(from_server.next().await.as_deref(), Some("{}"));

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(world.listener_count(), 0);
    assert!(handle.is_closed());

    // The detached sender sees the close and drops the write half.
    world.update("after", "abort", json!(true));
    assert!(
        tokio::time::timeout(WAIT, from_server.next())
            .await
            .expect("sender task outlived the aborted session")
            .is_none()
    );
    drop(to_server);
}

#[tokio::test]
async fn clear_is_silent_to_subscribers() {
    let world = Arc::new(WorldStore::new());
    world.update("a", "x", json!(1));
    let mut client = connect(&world);
    client.recv().await;

    world.clear();
    world.update("b", "y", json!(2));

    // The next message is the post-clear write, not a per-entity removal.
    assert_eq!(client.recv().await, json!({"b": {"y": 2}}));
    assert!(world.get("a").is_empty());
}
