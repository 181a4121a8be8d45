//! Session state and request correlation.
//!
//! Every outbound request is recorded in [`PendingRequests`] before its frame
//! is written. The receive loop resolves entries as responses arrive; a
//! timeout or close removes them. Once the table has been failed (on
//! connection close) it refuses new entries, so no caller can wait forever.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};

use crate::mcp::error::SessionError;
use crate::mcp::protocol::{Outcome, RequestId, Response};

/// Client session lifecycle.
///
/// ```text
/// Connecting ──initialize──▶ Negotiating ──version ok──▶ Ready
///      │                          │                        │
///      └──────────────────────────┴──────close/error──────▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport connected, nothing sent yet.
    Connecting,
    /// `initialize` sent, waiting for the server's answer.
    Negotiating,
    /// Negotiation succeeded; all methods are available.
    Ready,
    /// Terminal state.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Negotiating => "negotiating",
            Self::Ready => "ready",
            Self::Closed => "closed",
        })
    }
}

/// What a waiter eventually receives.
pub type Reply = Result<Outcome, SessionError>;

struct PendingRequest {
    method: String,
    sent_at: Instant,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    entries: HashMap<RequestId, PendingRequest>,
}

/// Outstanding requests keyed by id.
#[derive(Default)]
pub struct PendingRequests {
    table: Mutex<PendingTable>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request and returns the receiver its reply will arrive on.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConnectionClosed` once the table has been
    /// failed.
    pub async fn insert(
        &self,
        id: RequestId,
        method: impl Into<String>,
    ) -> Result<oneshot::Receiver<Reply>, SessionError> {
        let mut table = self.table.lock().await;
        if table.closed {
            return Err(SessionError::ConnectionClosed);
        }
        let (reply, receiver) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                method: method.into(),
                sent_at: Instant::now(),
                reply,
            },
        );
        Ok(receiver)
    }

    /// Hands a response to its waiter. Returns `false` if no request with
    /// this id is pending (unknown, timed out or already answered).
    pub async fn resolve(&self, response: Response) -> bool {
        let entry = self.table.lock().await.entries.remove(&response.id);
        let Some(entry) = entry else {
            return false;
        };

        if entry.method != response.method {
            tracing::debug!(
                id = %response.id,
                expected = %entry.method,
                received = %response.method,
                "Response method differs from request"
            );
        }
        tracing::trace!(
            id = %response.id,
            elapsed_ms = elapsed_ms(entry.sent_at.elapsed()),
            "Request resolved"
        );

        // The waiter may have gone away (dropped future); nothing to do then.
        let _ = entry.reply.send(Ok(response.outcome));
        true
    }

    /// Abandons a request, resolving its waiter with `Cancelled`. Returns
    /// `false` if the request was no longer pending.
    pub async fn cancel(&self, id: &RequestId) -> bool {
        let entry = self.table.lock().await.entries.remove(id);
        entry.is_some_and(|entry| {
            let _ = entry.reply.send(Err(SessionError::Cancelled { id: id.clone() }));
            true
        })
    }

    /// Fails every pending request with `ConnectionClosed` and refuses new
    /// ones. Returns how many waiters were failed.
    pub async fn fail_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.table.lock().await;
            table.closed = true;
            table.entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.reply.send(Err(SessionError::ConnectionClosed));
        }
        count
    }

    /// Number of requests currently awaiting a response.
    pub async fn len(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
