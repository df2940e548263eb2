//! Leaderboard push fan-out.
//!
//! Writers call `notify` after a successful bid; it is non-blocking and only
//! enqueues the session id. A fan-out task coalesces pending notifications,
//! builds one snapshot per changed session and delivers it to every
//! subscriber. Each subscriber owns a bounded queue; a subscriber that
//! cannot keep up is closed rather than ever stalling the write path. A
//! separate global topic carries session-list events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::leaderboard::{DEFAULT_PAGE_SIZE, LeaderboardPage, LeaderboardReader};
use crate::metrics::counters::Counters;

const CHANGE_QUEUE_CAPACITY: usize = 1_024;
const GLOBAL_TOPIC_CAPACITY: usize = 256;

/// Session-list events on the global topic.
#[derive(Clone, Debug, Serialize)]
pub enum SessionEvent {
    Created { session_id: Uuid },
    StateChanged { session_id: Uuid, is_active: bool },
    Finalized { session_id: Uuid, final_price: f64 },
}

#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    pub session_id: Uuid,
    id: u64,
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<LeaderboardPage>,
}

pub struct PushBroadcaster {
    queue_capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<Uuid, Vec<SubscriberSlot>>>,
    changes_tx: mpsc::Sender<Uuid>,
    changes_rx: Mutex<Option<mpsc::Receiver<Uuid>>>,
    global_tx: broadcast::Sender<SessionEvent>,
    counters: Counters,
}

impl PushBroadcaster {
    pub fn new(queue_capacity: usize, counters: Counters) -> Self {
        let (changes_tx, changes_rx) = mpsc::channel(CHANGE_QUEUE_CAPACITY);
        let (global_tx, _) = broadcast::channel(GLOBAL_TOPIC_CAPACITY);
        Self {
            queue_capacity: queue_capacity.max(1),
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            changes_tx,
            changes_rx: Mutex::new(Some(changes_rx)),
            global_tx,
            counters,
        }
    }

    /// Registers a snapshot stream for one session.
    pub fn subscribe(
        &self,
        session_id: Uuid,
    ) -> (SubscriptionHandle, mpsc::Receiver<LeaderboardPage>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .lock()
            .entry(session_id)
            .or_default()
            .push(SubscriberSlot { id, tx });

        (SubscriptionHandle { session_id, id }, rx)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut subs = self.subscribers.lock();
        if let Some(slots) = subs.get_mut(&handle.session_id) {
            slots.retain(|s| s.id != handle.id);
            if slots.is_empty() {
                subs.remove(&handle.session_id);
            }
        }
    }

    pub fn subscriber_count(&self, session_id: &Uuid) -> usize {
        self.subscribers
            .lock()
            .get(session_id)
            .map_or(0, |s| s.len())
    }

    /// Signals that a session's leaderboard changed. Never blocks; when the
    /// change queue is full the notification is dropped, which is safe
    /// because a later fan-out reads the then-current board anyway.
    pub fn notify(&self, session_id: Uuid) {
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.changes_tx.try_send(session_id) {
            tracing::warn!(session_id = %session_id, "broadcast change queue closed");
        }
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<SessionEvent> {
        self.global_tx.subscribe()
    }

    pub fn publish_global(&self, event: SessionEvent) {
        // Err means no current observers; that is fine.
        let _ = self.global_tx.send(event);
    }

    /// Fan-out loop. Coalesces queued notifications per tick, builds one
    /// snapshot per changed session with live subscribers and delivers it.
    pub async fn run(
        self: Arc<Self>,
        reader: Arc<LeaderboardReader>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(mut rx) = self.changes_rx.lock().take() else {
            tracing::error!("broadcast fan-out started twice; ignoring second start");
            return;
        };

        loop {
            let session_id = tokio::select! {
                _ = shutdown.changed() => break,
                changed = rx.recv() => match changed {
                    Some(id) => id,
                    None => break,
                },
            };

            let mut pending = HashSet::from([session_id]);
            while let Ok(more) = rx.try_recv() {
                pending.insert(more);
            }

            for session_id in pending {
                if self.subscriber_count(&session_id) == 0 {
                    continue;
                }
                match reader.page(session_id, 1, DEFAULT_PAGE_SIZE).await {
                    Ok(snapshot) => self.fan_out(&session_id, snapshot),
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %e,
                            "snapshot build failed; skipping fan-out"
                        );
                    }
                }
            }
        }

        tracing::info!("broadcast fan-out stopped");
    }

    fn fan_out(&self, session_id: &Uuid, snapshot: LeaderboardPage) {
        let mut subs = self.subscribers.lock();
        let Some(slots) = subs.get_mut(session_id) else {
            return;
        };

        let before = slots.len();
        slots.retain(|slot| match slot.tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            // Overflow or a gone receiver both close the subscriber.
            Err(_) => false,
        });

        let dropped = before - slots.len();
        if dropped > 0 {
            self.counters
                .broadcast_dropped_subscribers
                .fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::info!(
                session_id = %session_id,
                dropped,
                remaining = slots.len(),
                "closed lagging subscribers"
            );
        }
        if slots.is_empty() {
            subs.remove(session_id);
        }

        self.counters
            .broadcast_snapshots
            .fetch_add(1, Ordering::Relaxed);
    }
}
