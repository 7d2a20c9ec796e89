use crate::{
    model::Snapshot,
    store::SnapshotStore,
};
use derive_more::Display;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
        Mutex,
        PoisonError,
    },
};
use tokio::sync::mpsc::{
    self,
    error::TrySendError,
};

/// Identifies one registered viewer connection.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("viewer-{_0}")]
pub struct ViewerId(u64);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("viewer queue is full")]
    Full,
    #[error("viewer connection is closed")]
    Closed,
}

/// Outbound side of a viewer connection. Delivery must not wait on the viewer.
pub trait ViewerSink: Send + 'static {
    fn try_deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError>;
}

impl ViewerSink for mpsc::Sender<Arc<str>> {
    fn try_deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        self.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Fan-out of snapshots to every connected viewer.
///
/// A viewer whose queue is full or closed is removed during the broadcast that noticed
/// it; one slow viewer never holds up the others or the poll loop.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    store: SnapshotStore,
    next_id: AtomicU64,
    viewers: Mutex<BTreeMap<ViewerId, Box<dyn ViewerSink>>>,
}

impl BroadcastHub {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                next_id: AtomicU64::new(1),
                viewers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Adds a viewer and immediately queues the current snapshot for it, if there is one.
    ///
    /// The initial snapshot is read while the viewer set is locked, so a concurrent
    /// broadcast either reaches the viewer after it or was already reflected in it.
    pub fn register(&self, sink: impl ViewerSink) -> ViewerId {
        let id = ViewerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut viewers = self.lock();

        if let Some(snapshot) = self.inner.store.snapshot() {
            match encode(&snapshot) {
                Ok(payload) => {
                    if let Err(e) = sink.try_deliver(payload) {
                        debug!(viewer = %id, "Not registering viewer, initial snapshot failed: {e}");
                        return id;
                    }
                }
                Err(e) => error!("Failed to serialize snapshot: {e}"),
            }
        }

        viewers.insert(id, Box::new(sink));
        info!(viewer = %id, viewers = viewers.len(), "Viewer registered");
        id
    }

    /// Removes a viewer. Returns `false` if it was already gone, e.g. dropped by a broadcast.
    pub fn deregister(&self, id: ViewerId) -> bool {
        let mut viewers = self.lock();
        let removed = viewers.remove(&id).is_some();
        if removed {
            info!(viewer = %id, viewers = viewers.len(), "Viewer deregistered");
        }
        removed
    }

    /// Serializes the snapshot once and queues it for every viewer.
    pub fn broadcast(&self, snapshot: &Snapshot) -> BroadcastReport {
        let payload = match encode(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize snapshot: {e}");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut viewers = self.lock();
        viewers.retain(|id, sink| match sink.try_deliver(payload.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(e) => {
                warn!(viewer = %id, "Dropping viewer: {e}");
                report.dropped += 1;
                false
            }
        });

        report
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ViewerId, Box<dyn ViewerSink>>> {
        self.inner.viewers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn encode(snapshot: &Snapshot) -> serde_json::Result<Arc<str>> {
    serde_json::to_string(snapshot).map(Arc::from)
}
