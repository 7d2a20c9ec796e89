use crate::model::{
    ConnectionStatus,
    Snapshot,
};
use chrono::{
    DateTime,
    Utc,
};
use std::sync::Arc;
use tokio::sync::watch;

/// Read side of the latest [`Snapshot`] and [`ConnectionStatus`].
///
/// Cheap to clone; every reader observes whole values only. Writes go through the single
/// [`SnapshotWriter`] returned next to it by [`SnapshotStore::channel`].
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    snapshot: watch::Receiver<Option<Arc<Snapshot>>>,
    connection: watch::Receiver<ConnectionStatus>,
}

/// The only handle that can replace the stored values. Owned by the poll loop.
#[derive(Debug)]
pub struct SnapshotWriter {
    snapshot: watch::Sender<Option<Arc<Snapshot>>>,
    connection: watch::Sender<ConnectionStatus>,
}

impl SnapshotStore {
    pub fn channel(cucm_host: &str) -> (SnapshotWriter, SnapshotStore) {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (connection_tx, connection_rx) = watch::channel(ConnectionStatus::pending(cucm_host));

        (
            SnapshotWriter {
                snapshot: snapshot_tx,
                connection: connection_tx,
            },
            SnapshotStore {
                snapshot: snapshot_rx,
                connection: connection_rx,
            },
        )
    }

    /// The latest published snapshot, `None` until the first poll succeeded.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.borrow().clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.borrow().clone()
    }
}

impl SnapshotWriter {
    /// Replaces the stored snapshot and hands back the shared copy for broadcasting.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshot.send_replace(Some(snapshot.clone()));
        snapshot
    }

    pub fn record_success(&self, at: DateTime<Utc>) {
        let next = self.connection.borrow().succeeded(at);
        self.connection.send_replace(next);
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        let next = self.connection.borrow().failed(error);
        self.connection.send_replace(next);
    }
}
