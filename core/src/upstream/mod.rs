//! Access to the management platform: the device registry and the performance counters.

mod perfmon;
mod ris;
mod xml;

use crate::model::DeviceRecord;
use cucm_monitor_config::{
    Config,
    Secret,
};
use futures::{
    future::BoxFuture,
    FutureExt,
};
use perfmon::Operation;
use reqwest::{
    header::CONTENT_TYPE,
    StatusCode,
};
use std::{
    collections::BTreeMap,
    time::Duration,
};

/// Active call count per node hostname.
pub type ActiveCallCounters = BTreeMap<String, u64>;

/// Result of one device registry query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInventory {
    pub devices: Vec<DeviceRecord>,
    pub registered: usize,
    /// Node hostnames that answered the query, in response order.
    pub nodes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned HTTP {status}")]
    Status { service: &'static str, status: StatusCode },
    #[error("{service} SOAP fault: {message}")]
    Fault { service: &'static str, message: String },
    #[error("{service} rate limit exceeded: {message}")]
    RateLimited { service: &'static str, message: String },
    #[error("{service} did not answer within {timeout:?}")]
    Timeout { service: &'static str, timeout: Duration },
    #[error("unexpected {service} response: {message}")]
    Parse { service: &'static str, message: String },
}

impl UpstreamError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// One attempt per call; retrying is the poll interval's job.
pub trait UpstreamClient: Send + Sync {
    fn fetch_devices(&self) -> BoxFuture<'_, Result<DeviceInventory, UpstreamError>>;

    /// Runs a single counter session covering every node. An empty node list yields
    /// an empty map without contacting the platform.
    fn fetch_active_call_counters<'a>(
        &'a self,
        nodes: &'a [String],
    ) -> BoxFuture<'a, Result<ActiveCallCounters, UpstreamError>>;
}

/// SOAP binding against the RisPort70 and PerfMon services on port 8443.
pub struct SoapUpstreamClient {
    transport: SoapTransport,
    device_filter: String,
    max_returned_devices: u32,
}

impl SoapUpstreamClient {
    pub fn new(config: &Config) -> eyre::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self::with_client(http_client, format!("https://{}:8443", config.cucm_host), config))
    }

    /// Uses a prepared client and base URL, e.g. a plain HTTP test server.
    pub fn with_client(http_client: reqwest::Client, base_url: impl Into<String>, config: &Config) -> Self {
        Self {
            transport: SoapTransport {
                http_client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                username: config.cucm_username.clone(),
                password: config.cucm_password.clone(),
            },
            device_filter: config.device_filter.clone(),
            max_returned_devices: config.max_returned_devices,
        }
    }

    async fn open_session(&self) -> Result<CounterSession, UpstreamError> {
        let document = self
            .transport
            .perfmon(Operation::OpenSession, perfmon::open_session_request())
            .await?;
        let handle = perfmon::parse_session_handle(&document).map_err(|message| UpstreamError::Parse {
            service: perfmon::SERVICE,
            message,
        })?;
        trace!(session = %handle, "Opened counter session");

        Ok(CounterSession {
            transport: self.transport.clone(),
            handle,
            open: true,
        })
    }

    async fn collect_counters(&self, session: &str, nodes: &[String]) -> Result<ActiveCallCounters, UpstreamError> {
        self.transport
            .perfmon(Operation::AddCounter, perfmon::add_counter_request(session, nodes))
            .await?;
        let document = self
            .transport
            .perfmon(Operation::CollectSessionData, perfmon::collect_session_data_request(session))
            .await?;
        perfmon::parse_counters(&document).map_err(|message| UpstreamError::Parse {
            service: perfmon::SERVICE,
            message,
        })
    }
}

/// Authenticated SOAP requests against one platform host.
#[derive(Clone)]
struct SoapTransport {
    http_client: reqwest::Client,
    base_url: String,
    username: String,
    password: Secret,
}

impl SoapTransport {
    async fn call(
        &self,
        service: &'static str,
        path: &str,
        action: &str,
        body: String,
    ) -> Result<xml::Element, UpstreamError> {
        let transport = |source| UpstreamError::Transport { service, source };

        let response = self
            .http_client
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.username, Some(self.password.expose()))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        interpret_response(service, status, &text)
    }

    async fn perfmon(&self, operation: Operation, body: String) -> Result<xml::Element, UpstreamError> {
        self.call(perfmon::SERVICE, perfmon::PATH, &operation.soap_action(), body)
            .await
    }

    async fn close_session(&self, handle: &str) {
        match self
            .perfmon(Operation::CloseSession, perfmon::close_session_request(handle))
            .await
        {
            Ok(_) => trace!(session = %handle, "Closed counter session"),
            Err(e) => warn!(session = %handle, "Failed to close counter session: {e}"),
        }
    }
}

/// A counter session open on the platform.
///
/// Dropping it before [`CounterSession::close`] has finished, which happens when the
/// cycle times out or the poll loop is cancelled, sends the close from a background task.
struct CounterSession {
    transport: SoapTransport,
    handle: String,
    open: bool,
}

impl CounterSession {
    async fn close(mut self) {
        self.transport.close_session(&self.handle).await;
        self.open = false;
    }
}

impl Drop for CounterSession {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session = %self.handle, "Counter session left open, no runtime to close it");
            return;
        };

        debug!(session = %self.handle, "Closing abandoned counter session");
        let transport = self.transport.clone();
        let handle = std::mem::take(&mut self.handle);
        runtime.spawn(async move { transport.close_session(&handle).await });
    }
}

impl UpstreamClient for SoapUpstreamClient {
    fn fetch_devices(&self) -> BoxFuture<'_, Result<DeviceInventory, UpstreamError>> {
        async move {
            let body = ris::select_cm_device_request(&self.device_filter, self.max_returned_devices);
            let document = self.transport.call(ris::SERVICE, ris::PATH, ris::ACTION, body).await?;
            let inventory = ris::parse_select_cm_device(&document).map_err(|message| UpstreamError::Parse {
                service: ris::SERVICE,
                message,
            })?;
            debug!(
                devices = inventory.devices.len(),
                registered = inventory.registered,
                nodes = inventory.nodes.len(),
                "Device registry answered"
            );
            Ok(inventory)
        }
        .boxed()
    }

    fn fetch_active_call_counters<'a>(
        &'a self,
        nodes: &'a [String],
    ) -> BoxFuture<'a, Result<ActiveCallCounters, UpstreamError>> {
        async move {
            if nodes.is_empty() {
                return Ok(ActiveCallCounters::new());
            }

            let session = self.open_session().await?;
            let counters = self.collect_counters(&session.handle, nodes).await;
            session.close().await;
            counters
        }
        .boxed()
    }
}

/// Maps a SOAP response onto the parsed document or the matching error.
fn interpret_response(service: &'static str, status: StatusCode, text: &str) -> Result<xml::Element, UpstreamError> {
    let document = xml::parse(text);

    if let Ok(document) = &document {
        if let Some(fault) = document.find("Fault") {
            let message = fault
                .child_text("faultstring")
                .or_else(|| fault.child_text("Reason"))
                .unwrap_or("unspecified fault")
                .to_string();
            return Err(if mentions_rate_limit(&message) {
                UpstreamError::RateLimited { service, message }
            } else {
                UpstreamError::Fault { service, message }
            });
        }
    }

    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::SERVICE_UNAVAILABLE && mentions_rate_limit(text))
    {
        return Err(UpstreamError::RateLimited {
            service,
            message: format!("HTTP {status}"),
        });
    }
    if !status.is_success() {
        return Err(UpstreamError::Status { service, status });
    }

    document.map_err(|e| UpstreamError::Parse {
        service,
        message: e.to_string(),
    })
}

fn mentions_rate_limit(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("exceeded allowed rate") || text.contains("rate limit")
}
