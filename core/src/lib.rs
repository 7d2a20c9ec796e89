#[macro_use]
extern crate tracing;

pub mod aggregator;
pub mod endpoint;
pub mod hub;
pub mod model;
pub mod node;
pub mod store;
pub mod upstream;

pub use aggregator::{
    Aggregator,
    PollOutcome,
    PollSettings,
};
pub use hub::{
    BroadcastHub,
    ViewerId,
};
pub use model::{
    ConnectionStatus,
    Snapshot,
};
pub use store::{
    SnapshotStore,
    SnapshotWriter,
};
