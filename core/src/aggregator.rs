use crate::{
    endpoint::EndpointPoller,
    hub::BroadcastHub,
    model::{
        CallState,
        Node,
        Snapshot,
    },
    node::NodeHealthChecker,
    store::SnapshotWriter,
    upstream::{
        ActiveCallCounters,
        DeviceInventory,
        UpstreamClient,
        UpstreamError,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use cucm_monitor_config::Config;
use futures::future::BoxFuture;
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub cucm_host: String,
    /// Configured node hostnames. When empty, the nodes the registry reports are used.
    pub nodes: Vec<String>,
    pub interval: Duration,
    pub upstream_timeout: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cucm_host: config.cucm_host.clone(),
            nodes: config.nodes.clone(),
            interval: config.poll_interval,
            upstream_timeout: config.upstream_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Published(Arc<Snapshot>),
    /// The previous snapshot stays current; the message went to the connection status.
    UpstreamFailed(String),
}

/// Drives one poll cycle per interval and is the only writer of the snapshot store.
pub struct Aggregator {
    settings: PollSettings,
    upstream: Arc<dyn UpstreamClient>,
    endpoints: EndpointPoller,
    node_checker: NodeHealthChecker,
    writer: SnapshotWriter,
    hub: BroadcastHub,
}

impl Aggregator {
    pub fn new(
        settings: PollSettings,
        upstream: Arc<dyn UpstreamClient>,
        endpoints: EndpointPoller,
        node_checker: NodeHealthChecker,
        writer: SnapshotWriter,
        hub: BroadcastHub,
    ) -> Self {
        Self {
            settings,
            upstream,
            endpoints,
            node_checker,
            writer,
            hub,
        }
    }

    /// Polls until cancelled. The first cycle starts right away; after every cycle,
    /// failed or not, the loop sleeps the full interval.
    pub async fn run(self, cancel: CancellationToken) {
        info!(cucm_host = %self.settings.cucm_host, interval = ?self.settings.interval, "Poll loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.poll_once() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        info!("Poll loop stopped");
    }

    /// One complete cycle: registry, counters, then endpoint and node probes side by side.
    pub async fn poll_once(&self) -> PollOutcome {
        let started = Instant::now();

        let inventory = match self.bounded("device registry", self.upstream.fetch_devices()).await {
            Ok(inventory) => inventory,
            Err(e) => return self.fail(e),
        };

        let nodes = self.cluster_nodes(&inventory);
        let counters = match self
            .bounded("performance counters", self.upstream.fetch_active_call_counters(&nodes))
            .await
        {
            Ok(counters) => counters,
            Err(e) => return self.fail(e),
        };

        let (call_states, node_health) = tokio::join!(
            self.endpoints.poll(&inventory.devices),
            self.node_checker.check(&nodes),
        );

        let snapshot = merge(
            &self.settings.cucm_host,
            inventory,
            &call_states,
            node_health,
            &counters,
            Utc::now(),
        );
        let timestamp = snapshot.timestamp;
        let snapshot = self.writer.publish(snapshot);
        self.writer.record_success(timestamp);
        let report = self.hub.broadcast(&snapshot);

        info!(
            devices = snapshot.total_devices,
            registered = snapshot.registered_devices,
            active_calls = snapshot.total_active_calls,
            viewers = report.delivered,
            elapsed = ?started.elapsed(),
            "Poll cycle complete"
        );
        PollOutcome::Published(snapshot)
    }

    async fn bounded<T>(
        &self,
        service: &'static str,
        call: BoxFuture<'_, Result<T, UpstreamError>>,
    ) -> Result<T, UpstreamError> {
        let timeout = self.settings.upstream_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(UpstreamError::Timeout { service, timeout }))
    }

    fn cluster_nodes(&self, inventory: &DeviceInventory) -> Vec<String> {
        if self.settings.nodes.is_empty() {
            inventory.nodes.clone()
        } else {
            self.settings.nodes.clone()
        }
    }

    fn fail(&self, error: UpstreamError) -> PollOutcome {
        if error.is_rate_limited() {
            warn!("Upstream rate limit hit, consider a longer poll interval: {error}");
        } else {
            warn!("Upstream poll failed, keeping the last snapshot: {error}");
        }
        let message = error.to_string();
        self.writer.record_failure(message.clone());
        PollOutcome::UpstreamFailed(message)
    }
}

/// Builds the snapshot for one cycle. The active call total comes from the counters
/// only and is not reconciled with the per-device call states.
pub fn merge(
    cucm_host: &str,
    inventory: DeviceInventory,
    call_states: &HashMap<String, CallState>,
    nodes: Vec<Node>,
    counters: &ActiveCallCounters,
    timestamp: DateTime<Utc>,
) -> Snapshot {
    let devices: Vec<_> = inventory
        .devices
        .into_iter()
        .map(|record| {
            let call_status = call_states.get(&record.name).copied().unwrap_or_default();
            record.into_device(call_status)
        })
        .collect();

    Snapshot {
        timestamp,
        cucm_host: cucm_host.to_string(),
        total_devices: devices.len(),
        registered_devices: inventory.registered,
        total_active_calls: counters.values().sum(),
        devices,
        nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        DeviceRecord,
        RegistrationStatus,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn merge_overlays_call_states_and_sums_counters() {
        let inventory = DeviceInventory {
            devices: vec![
                DeviceRecord {
                    name: "SEP1".to_string(),
                    status: RegistrationStatus::Registered,
                    ..Default::default()
                },
                DeviceRecord {
                    name: "SEP2".to_string(),
                    ..Default::default()
                },
            ],
            registered: 1,
            nodes: vec!["pub".to_string()],
        };
        let call_states = HashMap::from([("SEP1".to_string(), CallState::Idle)]);
        let counters = ActiveCallCounters::from([("pub".to_string(), 4), ("sub".to_string(), 1)]);
        let at = Utc::now();

        let snapshot = merge(
            "cucm",
            inventory,
            &call_states,
            vec![Node::probed("pub", true)],
            &counters,
            at,
        );

        assert_eq!(snapshot.timestamp, at);
        assert_eq!(snapshot.total_devices, 2);
        assert_eq!(snapshot.registered_devices, 1);
        // The counter total stands on its own even though no device is on a call.
        assert_eq!(snapshot.total_active_calls, 5);
        let states: Vec<_> = snapshot.devices.iter().map(|d| d.call_status).collect();
        assert_eq!(states, vec![CallState::Idle, CallState::Unknown]);
        assert_eq!(snapshot.nodes.len(), 1);
    }

    #[test]
    fn merge_of_empty_inventory_is_an_empty_snapshot() {
        let snapshot = merge(
            "cucm",
            DeviceInventory::default(),
            &HashMap::new(),
            Vec::new(),
            &ActiveCallCounters::new(),
            Utc::now(),
        );
        assert_eq!(snapshot.total_devices, 0);
        assert_eq!(snapshot.total_active_calls, 0);
        assert!(snapshot.devices.is_empty());
    }
}
