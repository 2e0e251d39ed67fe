use std::{
    collections::{hash_map::Entry, HashMap},
    future::Future,
    io,
    sync::Arc,
};

use tokio::{io::AsyncWrite, sync::Mutex};
use tracing::debug;

use crate::session::{SessionId, SessionSink};

/// Returned by [`Registry::add`] when the id is already registered. The
/// sequential id counter makes this unreachable in practice, but the
/// contract rejects a duplicate rather than silently replacing it.
#[derive(Debug, PartialEq, Eq)]
pub struct DuplicateSessionError(pub SessionId);

/// The set of live sessions, keyed by id.
///
/// One lock guards every membership change and every delivery iteration, so
/// a broadcast can never observe a half-applied add or remove, and a session
/// that has been removed is never delivered to again.
pub struct Registry<W> {
    sessions: Mutex<HashMap<SessionId, Arc<SessionSink<W>>>>,
}

impl<W> Registry<W> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a session's sink for broadcast delivery.
    pub async fn add(&self, sink: Arc<SessionSink<W>>) -> Result<(), DuplicateSessionError> {
        let mut sessions = self.sessions.lock().await;
        match sessions.entry(sink.id()) {
            Entry::Occupied(_) => Err(DuplicateSessionError(sink.id())),
            Entry::Vacant(slot) => {
                slot.insert(sink);
                Ok(())
            }
        }
    }

    /// Deregisters a session. Safe to call on any exit path; removing an
    /// absent id is a no-op.
    pub async fn remove(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&id).is_some()
    }

    /// Invokes `deliver` for every registered session except `excluded`.
    ///
    /// The membership lock is held for the whole call, so the set is stable
    /// while it runs. A delivery that fails for one peer is traced and
    /// skipped; the remaining peers still get theirs. The failed peer stays
    /// registered, and the next write to it is what surfaces the broken
    /// transport to its own handler.
    pub async fn for_each_except<F, Fut>(&self, excluded: SessionId, mut deliver: F)
    where
        F: FnMut(Arc<SessionSink<W>>) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let sessions = self.sessions.lock().await;
        for (id, sink) in sessions.iter() {
            if *id == excluded {
                continue;
            }
            if let Err(error) = deliver(Arc::clone(sink)).await {
                debug!(session = *id, ?error, "skipping undeliverable peer");
            }
        }
    }
}

impl<W> Registry<W>
where
    W: AsyncWrite + Unpin,
{
    /// Delivers `line`, already formatted by the caller, to every session
    /// other than `sender`.
    pub async fn broadcast(&self, sender: SessionId, line: &str) {
        self.for_each_except(sender, |sink| async move { sink.send_line(line).await })
            .await;
    }
}
