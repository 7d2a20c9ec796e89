use crate::model::{
    CallState,
    DeviceRecord,
};
use eyre::Result;
use futures::{
    future::{
        join_all,
        BoxFuture,
    },
    FutureExt,
};
use regex::Regex;
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
    time::Duration,
};
use url::Url;

const STATUS_PATH: &str = "/CGI/Java/Serviceability";
const STATUS_QUERY: &str = "adapter=device.statistics.streaming.0";

lazy_static::lazy_static! {
    static ref ACTIVE_STREAM: Regex = Regex::new(r"(?i)<b>\s*Active\s*</b>").expect("valid regex");
    static ref IDLE_STREAM: Regex = Regex::new(r"(?i)<b>\s*Not\s+ready\s*</b>").expect("valid regex");
}

/// Fetches the streaming statistics page of a single endpoint.
pub trait EndpointProbe: Send + Sync {
    fn fetch_status_page<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, Result<String>>;
}

/// Reads the page over plain HTTP, the way the phones serve it.
#[derive(Debug, Clone)]
pub struct HttpEndpointProbe {
    http_client: reqwest::Client,
}

impl HttpEndpointProbe {
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder().build()?;
        Ok(Self { http_client })
    }

    pub fn status_url(address: &str) -> Result<Url> {
        let host = match address.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => address.to_string(),
        };
        let mut url = Url::parse(&format!("http://{host}{STATUS_PATH}"))?;
        url.set_query(Some(STATUS_QUERY));
        Ok(url)
    }
}

impl EndpointProbe for HttpEndpointProbe {
    fn fetch_status_page<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, Result<String>> {
        async move {
            let url = Self::status_url(address)?;
            let body = self
                .http_client
                .get(url)
                .timeout(timeout)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            Ok(body)
        }
        .boxed()
    }
}

/// Active stream wins over idle if a page somehow carries both.
pub fn classify(payload: &str) -> CallState {
    if ACTIVE_STREAM.is_match(payload) {
        CallState::OnCall
    } else if IDLE_STREAM.is_match(payload) {
        CallState::Idle
    } else {
        CallState::Unknown
    }
}

/// Determines the call state of every device in one fan-out.
pub struct EndpointPoller {
    probe: Arc<dyn EndpointProbe>,
    timeout: Duration,
}

impl EndpointPoller {
    pub fn new(probe: Arc<dyn EndpointProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// All probes run concurrently; each one is bounded by the per-endpoint timeout, so
    /// the whole call finishes within roughly that timeout. Devices without an address
    /// are reported as [`CallState::Unknown`] without a request.
    pub async fn poll(&self, devices: &[DeviceRecord]) -> HashMap<String, CallState> {
        let probes = devices.iter().map(|device| async move {
            let state = match device.ip_address.as_deref().map(str::trim) {
                Some(address) if !address.is_empty() => self.probe_one(&device.name, address).await,
                _ => CallState::Unknown,
            };
            (device.name.clone(), state)
        });

        let states: HashMap<_, _> = join_all(probes).await.into_iter().collect();
        debug!(
            probed = devices.len(),
            on_call = states.values().filter(|s| **s == CallState::OnCall).count(),
            "Endpoint poll finished"
        );
        states
    }

    async fn probe_one(&self, device: &str, address: &str) -> CallState {
        match tokio::time::timeout(self.timeout, self.probe.fetch_status_page(address, self.timeout)).await {
            Ok(Ok(payload)) => classify(&payload),
            Ok(Err(e)) => {
                debug!(device, address, "Endpoint probe failed: {e}");
                CallState::Unknown
            }
            Err(_) => {
                debug!(device, address, "Endpoint probe timed out");
                CallState::Unknown
            }
        }
    }
}
