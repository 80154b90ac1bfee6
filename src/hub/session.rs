use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::system::history::{HistoryFrame, RollingHistory};
use crate::system::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Returned by `subscribe`; handing it back to `unsubscribe` ends the session.
#[derive(Debug, PartialEq, Eq)]
pub struct SessionHandle {
    pub(crate) id: SessionId,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

/// One server-to-client frame: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Push {
    ProcessData(Arc<Snapshot>),
    History(HistoryFrame),
}

impl Push {
    pub fn event(&self) -> &'static str {
        match self {
            Push::ProcessData(_) => "processData",
            Push::History(_) => "history",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    /// The viewer's queue is full; this frame is lost, the session lives on.
    Dropped,
    /// The session was unsubscribed or its viewer went away.
    Cancelled,
}

/// The session's only path to its viewer.
///
/// Publishing and closing take the same lock, so once `close` returns no
/// frame can be queued for this session.
pub(crate) struct Outlet {
    sink: Mutex<Option<mpsc::Sender<Push>>>,
}

impl Outlet {
    pub(crate) fn new(sink: mpsc::Sender<Push>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }

    pub(crate) fn publish(&self, push: Push) -> PublishOutcome {
        let guard = self.sink.lock();
        let Some(sink) = guard.as_ref() else {
            return PublishOutcome::Cancelled;
        };
        match sink.try_send(push) {
            Ok(()) => PublishOutcome::Delivered,
            Err(TrySendError::Full(_)) => PublishOutcome::Dropped,
            Err(TrySendError::Closed(_)) => PublishOutcome::Cancelled,
        }
    }

    pub(crate) fn close(&self) {
        self.sink.lock().take();
    }
}

pub(crate) struct ClientSession {
    pub(crate) outlet: Arc<Outlet>,
    pub(crate) history: Arc<Mutex<RollingHistory>>,
    pub(crate) task: JoinHandle<()>,
}

impl ClientSession {
    /// Close the outlet first, then stop the task. Any probe still in
    /// flight for this session is dropped with it.
    pub(crate) fn cancel(self) {
        self.outlet.close();
        self.task.abort();
    }
}

/// Consuming side of one publish cycle: record history, push the snapshot,
/// then push the updated series.
pub(crate) fn deliver(
    session: SessionId,
    outlet: &Outlet,
    history: &Mutex<RollingHistory>,
    snapshot: Arc<Snapshot>,
) -> PublishOutcome {
    let frame = {
        let mut history = history.lock();
        history.append(
            snapshot.system_stats.total_cpu_percent as f32,
            snapshot.system_stats.memory_percent(),
        );
        history.frame()
    };

    let outcome = outlet.publish(Push::ProcessData(snapshot));
    match outcome {
        PublishOutcome::Cancelled => return outcome,
        PublishOutcome::Dropped => {
            tracing::warn!(%session, "viewer queue full, dropped processData frame");
        }
        PublishOutcome::Delivered => {}
    }

    let history_outcome = outlet.publish(Push::History(frame));
    if history_outcome == PublishOutcome::Dropped {
        tracing::debug!(%session, "viewer queue full, dropped history frame");
    }
    history_outcome
}
