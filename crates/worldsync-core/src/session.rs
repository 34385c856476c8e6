//! Subscriber sessions.
//!
//! A [`Session`] binds one client connection to the shared world:
//!
//! 1. **Connect** -- [`Session::connect`] creates the session's outbound
//!    queue, enqueues a full-world snapshot, and registers a listener that
//!    serializes each change as `{entity: fields}` onto that queue.
//! 2. **Run** -- [`Session::run`] spawns the sender task (queue to
//!    connection) and drives the inbound loop (connection to world) on the
//!    caller's task.
//! 3. **Teardown** -- whichever loop stops first removes the listener and
//!    closes the queue, exactly once. The other loop observes the closed
//!    queue and exits. `run` returns only after both loops are done. If the
//!    `run` future is dropped before that, the teardown still happens.
//!
//! The connection is abstracted as a [`Stream`] of inbound text frames
//! (end of stream is the close sentinel) and a [`Sink`] of outbound text.
//!
//! Every change, including one a session made itself, is echoed back to
//! that session. Clients rely on this to confirm their own writes.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Arc, OnceLock};

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{SessionError, json_type_name};
use crate::ids::{ListenerId, SessionId};
use crate::queue::{QueueReceiver, QueueSender, outbound_queue};
use crate::world::{Fields, Listener, WorldStore};

/// Why a session ended. The first loop to stop decides the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// The peer closed the connection (close frame or end of stream).
    PeerClosed,
    /// An inbound frame could not be parsed or applied.
    MalformedFrame,
    /// Reading from the connection failed.
    ReceiveFailed,
    /// Writing to the connection failed.
    SendFailed,
    /// The session was closed from outside via a [`SessionHandle`].
    Cancelled,
    /// The session was dropped without being run.
    Abandoned,
}

impl Display for ExitCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PeerClosed => "peer_closed",
            Self::MalformedFrame => "malformed_frame",
            Self::ReceiveFailed => "receive_failed",
            Self::SendFailed => "send_failed",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Counters reported when a session finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// The session these counters belong to.
    pub id: SessionId,
    /// Inbound frames successfully applied to the world.
    pub frames_applied: u64,
    /// Outbound messages written to the connection.
    pub messages_sent: u64,
    /// What ended the session.
    pub cause: ExitCause,
}

/// Cheap handle for closing a running session from outside.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    queue: QueueSender,
}

impl SessionHandle {
    /// The session this handle controls.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Ask the session to shut down. Both loops are released promptly,
    /// even if the sender is parked on an empty queue.
    pub fn close(&self) {
        self.queue.close();
    }

    /// Whether the session has been closed (by either side).
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

/// Release-once state shared by both loops.
///
/// Runs on the first exit path that reaches it, and again from `Drop` as a
/// backstop; only the first call does anything.
struct Teardown {
    id: SessionId,
    world: Arc<WorldStore>,
    listener: ListenerId,
    queue: QueueSender,
    cause: OnceLock<ExitCause>,
}

impl Teardown {
    fn run(&self, cause: ExitCause) {
        if self.cause.set(cause).is_err() {
            return;
        }
        // A bulk shutdown sweep may already have removed it.
        let removed = self.world.remove_listener(self.listener);
        self.queue.close();
        debug!(session_id = %self.id, %cause, listener_removed = removed, "Session torn down");
    }

    fn cause(&self) -> ExitCause {
        self.cause.get().copied().unwrap_or(ExitCause::Abandoned)
    }

    async fn cancelled(&self) {
        self.queue.closed().await;
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.run(ExitCause::Abandoned);
    }
}

/// Held by [`Session::run`] for its whole body. The sender task keeps the
/// shared [`Teardown`] alive, so its own `Drop` cannot fire when the `run`
/// future is dropped early (task abort, timeout, runtime shutdown); this
/// guard releases the session in that case.
struct RunGuard(Arc<Teardown>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.run(ExitCause::Cancelled);
    }
}

/// One connected subscriber.
pub struct Session {
    id: SessionId,
    world: Arc<WorldStore>,
    queue: QueueReceiver,
    teardown: Arc<Teardown>,
}

impl Session {
    /// Attach a new session to the world.
    ///
    /// On return the session's queue already holds the world snapshot and
    /// its listener is registered; every later change will follow the
    /// snapshot on the queue.
    pub fn connect(world: Arc<WorldStore>) -> Result<Self, SessionError> {
        let id = SessionId::new();
        let (tx, rx) = outbound_queue();

        let listener: Listener = {
            let tx = tx.clone();
            Arc::new(move |entity: &str, fields: &Fields| match encode_delta(entity, fields) {
                Ok(message) => {
                    tx.put(message);
                }
                Err(e) => warn!(session_id = %id, entity, error = %e, "Failed to encode delta"),
            })
        };

        let mut seeded = Ok(());
        let listener_id = world.register_with_snapshot(listener, |snapshot| {
            seeded = serde_json::to_string(snapshot).map(|message| {
                tx.put(message);
            });
        });

        let teardown = Arc::new(Teardown {
            id,
            world: Arc::clone(&world),
            listener: listener_id,
            queue: tx,
            cause: OnceLock::new(),
        });

        if let Err(source) = seeded {
            teardown.run(ExitCause::Abandoned);
            return Err(SessionError::Encode { source });
        }

        info!(session_id = %id, listeners = world.listener_count(), "Session connected");

        Ok(Self {
            id,
            world,
            queue: rx,
            teardown,
        })
    }

    /// This session's id.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// A handle that can close this session while it runs.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            queue: self.teardown.queue.clone(),
        }
    }

    /// Number of outbound messages waiting to be sent.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drive the session until either side stops.
    ///
    /// `inbound` yields text frames from the client; its end is the close
    /// sentinel. `outbound` receives serialized messages for the client.
    /// Returns once both loops have exited and the listener is released.
    pub async fn run<S, E, K>(self, inbound: S, outbound: K) -> SessionSummary
    where
        S: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
        K: Sink<String> + Unpin + Send + 'static,
        K::Error: Display + Send,
    {
        let Self {
            id,
            world,
            queue,
            teardown,
        } = self;

        let _guard = RunGuard(Arc::clone(&teardown));
        let sender = tokio::spawn(send_loop(queue, outbound, Arc::clone(&teardown)));
        let frames_applied = receive_loop(&world, inbound, &teardown).await;

        let messages_sent = match sender.await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Sender task failed");
                // The task died without reaching its own teardown call.
                teardown.run(ExitCause::SendFailed);
                0
            }
        };

        let summary = SessionSummary {
            id,
            frames_applied,
            messages_sent,
            cause: teardown.cause(),
        };
        info!(
            session_id = %id,
            frames_applied,
            messages_sent,
            cause = %summary.cause,
            "Session closed"
        );
        summary
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

/// Inbound loop: read frames and apply them to the world.
async fn receive_loop<S, E>(world: &WorldStore, mut inbound: S, teardown: &Teardown) -> u64
where
    S: Stream<Item = Result<String, E>> + Unpin,
    E: Display,
{
    let id = teardown.id;
    let mut applied: u64 = 0;

    let cause = loop {
        let next = tokio::select! {
            biased;
            () = teardown.cancelled() => break ExitCause::Cancelled,
            next = inbound.next() => next,
        };
        match next {
            None => break ExitCause::PeerClosed,
            Some(Err(e)) => {
                warn!(session_id = %id, error = %e, "Receive failed, closing session");
                break ExitCause::ReceiveFailed;
            }
            Some(Ok(frame)) => match apply_frame(world, &frame) {
                Ok(entities) => {
                    applied = applied.saturating_add(1);
                    debug!(session_id = %id, entities, "Frame applied");
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Rejected inbound frame, closing session");
                    break ExitCause::MalformedFrame;
                }
            },
        }
    };

    teardown.run(cause);
    applied
}

/// Outbound loop: drain the queue into the connection.
async fn send_loop<K>(mut queue: QueueReceiver, mut outbound: K, teardown: Arc<Teardown>) -> u64
where
    K: Sink<String> + Unpin,
    K::Error: Display,
{
    let id = teardown.id;
    let mut sent: u64 = 0;

    let cause = loop {
        let Some(message) = queue.get().await else {
            break ExitCause::Cancelled;
        };
        // A client that stops reading can park us inside `send`; the close
        // signal must still get through.
        let result = tokio::select! {
            biased;
            () = teardown.cancelled() => break ExitCause::Cancelled,
            result = outbound.send(message) => result,
        };
        if let Err(e) = result {
            warn!(session_id = %id, error = %e, "Send failed, closing session");
            break ExitCause::SendFailed;
        }
        sent = sent.saturating_add(1);
    };

    teardown.run(cause);
    // Dropping the sink releases the write half without waiting on a
    // peer that may never read again.
    drop(outbound);
    sent
}

/// Parse an inbound frame and `set` each entity it names.
///
/// The frame must be a JSON object whose values are all objects. It is
/// validated in full before anything is written, so a rejected frame
/// leaves the world untouched. Returns the number of entities written.
pub fn apply_frame(world: &WorldStore, frame: &str) -> Result<usize, SessionError> {
    let entities = match serde_json::from_str::<Value>(frame)? {
        Value::Object(entities) => entities,
        other => {
            return Err(SessionError::NotAnObject {
                found: json_type_name(&other),
            });
        }
    };

    let mut updates = Vec::with_capacity(entities.len());
    for (entity, fields) in entities {
        match fields {
            Value::Object(fields) => updates.push((entity, fields)),
            other => {
                return Err(SessionError::InvalidEntity {
                    entity,
                    found: json_type_name(&other),
                });
            }
        }
    }

    let count = updates.len();
    for (entity, fields) in updates {
        world.set(&entity, fields);
    }
    Ok(count)
}

/// Serialize a single-entity delta: `{entity: fields}`.
pub fn encode_delta(entity: &str, fields: &Fields) -> Result<String, serde_json::Error> {
    serde_json::to_string(&BTreeMap::from([(entity, fields)]))
}
