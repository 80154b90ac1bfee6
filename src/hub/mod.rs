//! Subscriber lifecycle and publish cadence.
//!
//! Every session gets one immediate fetch → aggregate → push cycle when it
//! subscribes. After that, snapshots come either from one shared poll loop
//! broadcasting to all sessions (`PollMode::Shared`) or from a timer owned
//! by the session itself (`PollMode::PerSession`). Either way a tick that
//! fires while a cycle is still running is skipped, so each loop has at
//! most one probe call in flight.

mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::aggregate::Aggregator;
use crate::probe::SnapshotSource;
use crate::system::history::{self, HistoryFrame, RollingHistory};
use crate::system::snapshot::Snapshot;

pub use session::{PublishOutcome, Push, SessionHandle, SessionId};
use session::{ClientSession, Outlet, deliver};

const FEED_CAPACITY: usize = 4;

/// A shared-loop snapshot, stamped with the instant its probe started.
#[derive(Clone)]
struct FeedItem {
    started: Instant,
    snapshot: Arc<Snapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    #[default]
    Shared,
    PerSession,
}

impl PollMode {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().replace('-', "_").as_str() {
            "per_session" | "session" => PollMode::PerSession,
            _ => PollMode::Shared,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PollMode::Shared => "shared",
            PollMode::PerSession => "per_session",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub interval: Duration,
    pub mode: PollMode,
    pub history_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            mode: PollMode::Shared,
            history_capacity: history::DEFAULT_CAPACITY,
        }
    }
}

struct Pipeline<S> {
    source: S,
    aggregator: Aggregator,
}

impl<S: SnapshotSource> Pipeline<S> {
    async fn cycle(&self) -> Arc<Snapshot> {
        let raw = self.source.fetch().await;
        Arc::new(self.aggregator.aggregate(raw))
    }
}

/// Owns every live session. Construct one per endpoint and share it behind
/// an `Arc`; `subscribe` must be called from inside a tokio runtime.
pub struct SubscriptionHub<S> {
    pipeline: Arc<Pipeline<S>>,
    settings: HubSettings,
    sessions: Mutex<HashMap<SessionId, ClientSession>>,
    next_id: AtomicU64,
    feed: broadcast::Sender<FeedItem>,
    poller: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<S: SnapshotSource> SubscriptionHub<S> {
    pub fn new(source: S, aggregator: Aggregator, settings: HubSettings) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            pipeline: Arc::new(Pipeline { source, aggregator }),
            settings,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            feed,
            poller: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.pipeline.source
    }

    /// Start a session publishing into `sink`.
    ///
    /// Returns `None` once the hub has been shut down; the sink is dropped
    /// so the viewer's receiver closes.
    pub fn subscribe(&self, sink: mpsc::Sender<Push>) -> Option<SessionHandle> {
        // Held across spawn and insert so `shutdown` cannot run in between.
        let mut sessions = self.sessions.lock();
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!("hub closed, refusing session");
            return None;
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let outlet = Arc::new(Outlet::new(sink));
        let history = Arc::new(Mutex::new(RollingHistory::new(
            self.settings.history_capacity,
        )));

        let feed = match self.settings.mode {
            PollMode::Shared => {
                self.ensure_poller();
                Some(self.feed.subscribe())
            }
            PollMode::PerSession => None,
        };

        let task = tokio::spawn(run_session(
            id,
            Arc::clone(&self.pipeline),
            Arc::clone(&outlet),
            Arc::clone(&history),
            feed,
            self.settings.interval,
        ));

        sessions.insert(
            id,
            ClientSession {
                outlet,
                history,
                task,
            },
        );
        tracing::info!(session = %id, mode = self.settings.mode.label(), "session subscribed");
        Some(SessionHandle { id })
    }

    /// End a session. Once this returns no further push reaches its viewer.
    pub fn unsubscribe(&self, handle: SessionHandle) -> bool {
        let Some(session) = self.sessions.lock().remove(&handle.id) else {
            return false;
        };
        session.cancel();
        tracing::info!(session = %handle.id, "session unsubscribed");
        true
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn history(&self, id: SessionId) -> Option<HistoryFrame> {
        let sessions = self.sessions.lock();
        sessions.get(&id).map(|session| session.history.lock().frame())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancel every session, stop the shared poll loop and refuse any
    /// later `subscribe`.
    pub fn shutdown(&self) {
        let drained: Vec<ClientSession> = {
            let mut sessions = self.sessions.lock();
            self.closed.store(true, Ordering::Release);
            sessions.drain().map(|(_, session)| session).collect()
        };
        let count = drained.len();
        for session in drained {
            session.cancel();
        }
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
        tracing::debug!(sessions = count, "hub shut down");
    }

    fn ensure_poller(&self) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }
        *poller = Some(tokio::spawn(poll_shared(
            Arc::clone(&self.pipeline),
            self.feed.clone(),
            self.settings.interval,
        )));
    }
}

impl<S> Drop for SubscriptionHub<S> {
    fn drop(&mut self) {
        for (_, session) in self.sessions.get_mut().drain() {
            session.cancel();
        }
        if let Some(poller) = self.poller.get_mut().take() {
            poller.abort();
        }
    }
}

fn ticker(interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn poll_shared<S: SnapshotSource>(
    pipeline: Arc<Pipeline<S>>,
    feed: broadcast::Sender<FeedItem>,
    interval: Duration,
) {
    let mut ticker = ticker(interval);
    loop {
        ticker.tick().await;
        if feed.receiver_count() == 0 {
            tracing::trace!("no subscribers, skipping probe");
            continue;
        }
        let started = Instant::now();
        let snapshot = pipeline.cycle().await;
        tracing::debug!(
            apps = snapshot.apps.len(),
            processes = snapshot.all_processes.len(),
            subscribers = feed.receiver_count(),
            "broadcasting snapshot"
        );
        // Fails only if every subscriber left while the probe ran.
        let _ = feed.send(FeedItem { started, snapshot });
    }
}

async fn run_session<S: SnapshotSource>(
    id: SessionId,
    pipeline: Arc<Pipeline<S>>,
    outlet: Arc<Outlet>,
    history: Arc<Mutex<RollingHistory>>,
    feed: Option<broadcast::Receiver<FeedItem>>,
    interval: Duration,
) {
    let subscribed = Instant::now();
    let first = pipeline.cycle().await;
    if deliver(id, &outlet, &history, first) == PublishOutcome::Cancelled {
        return;
    }

    match feed {
        Some(mut feed) => loop {
            let item = match feed.recv().await {
                Ok(item) => item,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(session = %id, skipped, "session fell behind shared feed");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            // Older than the immediate snapshot already delivered.
            if item.started < subscribed {
                tracing::trace!(session = %id, "dropping stale shared snapshot");
                continue;
            }
            if deliver(id, &outlet, &history, item.snapshot) == PublishOutcome::Cancelled {
                break;
            }
        },
        None => {
            let mut ticker = ticker(interval);
            loop {
                ticker.tick().await;
                let snapshot = pipeline.cycle().await;
                if deliver(id, &outlet, &history, snapshot) == PublishOutcome::Cancelled {
                    break;
                }
            }
        }
    }
    tracing::debug!(session = %id, "session task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_mode_parses_config_strings() {
        assert_eq!(PollMode::from_str_config("shared"), PollMode::Shared);
        assert_eq!(PollMode::from_str_config("per_session"), PollMode::PerSession);
        assert_eq!(PollMode::from_str_config("Per-Session"), PollMode::PerSession);
        assert_eq!(PollMode::from_str_config("bogus"), PollMode::Shared);
    }

    #[test]
    fn default_settings_match_publish_cadence() {
        let settings = HubSettings::default();
        assert_eq!(settings.interval, Duration::from_millis(3000));
        assert_eq!(settings.mode, PollMode::Shared);
        assert_eq!(settings.history_capacity, 20);
    }
}
