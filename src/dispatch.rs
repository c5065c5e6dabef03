//! The demultiplexer for one control connection.
//!
//! A single task owns the read half of the socket. It groups lines into
//! replies, hands 650 events to the registry and every other reply to the
//! oldest pending command. Tor never tags replies, so correlation is purely
//! positional: the queue order must equal the write order, which the
//! controller guarantees by enqueueing and writing under one lock.

use crate::auth::AuthState;
use crate::error::{Result, TorControlError};
use crate::events::Event;
use crate::protocol::{Reply, ReplyKind, ReplyParser};
use crate::registry::{ConnectionStatus, Registry};
use crate::transport::LineReader;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

/// Lifecycle of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Reading and dispatching.
    Running,
    /// Failing the remaining pending commands.
    Draining,
    /// Finished. Terminal.
    Stopped,
}

/// Receiver for the reply to one command.
pub(crate) type ReplySlot = oneshot::Receiver<Result<Reply>>;

struct PendingCommand {
    id: u64,
    keyword: String,
    slot: oneshot::Sender<Result<Reply>>,
}

struct Queue {
    state: LoopState,
    entries: VecDeque<PendingCommand>,
}

/// State shared between the dispatch task and the controller handle.
pub(crate) struct Shared {
    queue: Mutex<Queue>,
    auth_state: Mutex<AuthState>,
    next_command_id: AtomicU64,
    pub(crate) registry: Registry,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                state: LoopState::Running,
                entries: VecDeque::new(),
            }),
            auth_state: Mutex::new(AuthState::Unauthenticated),
            next_command_id: AtomicU64::new(1),
            registry: Registry::new(),
        }
    }

    /// Append a command to the queue. Fails once the loop has stopped.
    pub(crate) fn enqueue(&self, command: &str) -> Result<(u64, ReplySlot)> {
        let mut queue = self.queue.lock();
        if queue.state != LoopState::Running {
            return Err(TorControlError::ConnectionClosed);
        }

        let id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        let (slot, receiver) = oneshot::channel();
        queue.entries.push_back(PendingCommand {
            id,
            keyword: command.split_whitespace().next().unwrap_or_default().to_string(),
            slot,
        });
        Ok((id, receiver))
    }

    /// Drop a command that never reached the wire.
    pub(crate) fn remove(&self, id: u64) {
        self.queue.lock().entries.retain(|entry| entry.id != id);
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.queue.lock().entries.len()
    }

    pub(crate) fn loop_state(&self) -> LoopState {
        self.queue.lock().state
    }

    pub(crate) fn auth_state(&self) -> AuthState {
        *self.auth_state.lock()
    }

    /// Move to a new auth state. A closed connection stays closed.
    pub(crate) fn set_auth_state(&self, next: AuthState) {
        let mut state = self.auth_state.lock();
        if *state != AuthState::Closed {
            *state = next;
        }
    }

    /// Hand a command reply to the oldest pending command.
    fn fulfil(&self, reply: Reply) -> Result<()> {
        let entry = self.queue.lock().entries.pop_front().ok_or_else(|| {
            TorControlError::Protocol(format!(
                "Received a reply with no command pending: '{}'",
                reply.first_line()
            ))
        })?;

        if entry.slot.send(Ok(reply)).is_err() {
            debug!(
                "Discarding reply to abandoned command #{} ({})",
                entry.id, entry.keyword
            );
        }
        Ok(())
    }

    /// Fail everything still pending and report the closed connection.
    fn shut_down(&self, reason: Option<String>) {
        let drained = {
            let mut queue = self.queue.lock();
            queue.state = LoopState::Draining;
            std::mem::take(&mut queue.entries)
        };
        *self.auth_state.lock() = AuthState::Closed;

        debug!("Failing {} pending command(s)", drained.len());
        for entry in drained {
            let _ = entry.slot.send(Err(TorControlError::ConnectionClosed));
        }

        self.registry
            .notify_status(&ConnectionStatus::Closed { reason });
        self.queue.lock().state = LoopState::Stopped;
    }
}

/// Read and dispatch until the socket fails or a shutdown is requested.
pub(crate) async fn run_loop(
    mut reader: LineReader,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Dispatch loop started");
    let mut parser = ReplyParser::new();

    let reason = loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.changed() => break None,
            line = reader.receive() => line,
        };

        let reply = match line.and_then(|line| parser.push_line(&line)) {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(TorControlError::ConnectionClosed) => {
                break Some(match parser.finish() {
                    Ok(()) => "Connection closed by Tor".to_string(),
                    Err(e) => e.to_string(),
                });
            }
            Err(e) => {
                debug!("Dispatch loop failed: {}", e);
                break Some(e.to_string());
            }
        };

        match reply.kind() {
            ReplyKind::Event => {
                let event = Event::from_reply(&reply);
                shared.registry.dispatch(&event);
            }
            ReplyKind::Command => {
                if let Err(e) = shared.fulfil(reply) {
                    warn!("Control connection desynchronised: {}", e);
                    break Some(e.to_string());
                }
            }
        }
    };

    shared.shut_down(reason);
    debug!("Dispatch loop stopped");
}
