use crate::model::Node;
use eyre::{
    eyre,
    Result,
};
use futures::{
    future::{
        join_all,
        BoxFuture,
    },
    FutureExt,
};
use std::{
    net::IpAddr,
    sync::{
        atomic::{
            AtomicU16,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};
use surge_ping::{
    Client,
    Config,
    PingIdentifier,
    PingSequence,
    ICMP,
};
use tokio::net::TcpStream;

const ECHO_PAYLOAD: [u8; 56] = [0; 56];

/// Answers whether a cluster node is reachable at all.
pub trait NodeProbe: Send + Sync {
    fn ping<'a>(&'a self, hostname: &'a str, timeout: Duration) -> BoxFuture<'a, bool>;
}

/// One ICMP echo per check.
pub struct IcmpNodeProbe {
    v4: Client,
    v6: Option<Client>,
    identifier: AtomicU16,
}

impl IcmpNodeProbe {
    /// Fails when the process may not open an ICMP socket. An IPv6 socket is optional.
    pub fn new() -> Result<Self> {
        let v4 = Client::new(&Config::default())?;
        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!("ICMPv6 socket unavailable, IPv6 nodes will show unreachable: {e}");
                None
            }
        };

        Ok(Self {
            v4,
            v6,
            identifier: AtomicU16::new(std::process::id() as u16),
        })
    }

    async fn echo(&self, hostname: &str, timeout: Duration) -> Result<Duration> {
        let ip = resolve(hostname).await?;
        let client = match ip {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => self.v6.as_ref().ok_or_else(|| eyre!("no ICMPv6 socket"))?,
        };

        let identifier = PingIdentifier(self.identifier.fetch_add(1, Ordering::Relaxed));
        let mut pinger = client.pinger(ip, identifier).await;
        pinger.timeout(timeout);
        let (_packet, rtt) = pinger.ping(PingSequence(0), &ECHO_PAYLOAD).await?;
        Ok(rtt)
    }
}

impl NodeProbe for IcmpNodeProbe {
    fn ping<'a>(&'a self, hostname: &'a str, timeout: Duration) -> BoxFuture<'a, bool> {
        async move {
            match self.echo(hostname, timeout).await {
                Ok(rtt) => {
                    trace!(hostname, ?rtt, "Node answered echo request");
                    true
                }
                Err(e) => {
                    debug!(hostname, "Node did not answer echo request: {e}");
                    false
                }
            }
        }
        .boxed()
    }
}

/// Treats a successful TCP handshake on `port` as reachable. Needs no privileges.
#[derive(Debug, Clone, Copy)]
pub struct TcpNodeProbe {
    port: u16,
}

impl TcpNodeProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl NodeProbe for TcpNodeProbe {
    fn ping<'a>(&'a self, hostname: &'a str, timeout: Duration) -> BoxFuture<'a, bool> {
        async move {
            match tokio::time::timeout(timeout, TcpStream::connect((hostname, self.port))).await {
                Ok(Ok(_)) => true,
                Ok(Err(e)) => {
                    debug!(hostname, port = self.port, "Node refused connection: {e}");
                    false
                }
                Err(_) => {
                    debug!(hostname, port = self.port, "Node connect timed out");
                    false
                }
            }
        }
        .boxed()
    }
}

async fn resolve(hostname: &str) -> Result<IpAddr> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((hostname, 0))
        .await?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| eyre!("{hostname} did not resolve"))
}

/// Probes every cluster node concurrently.
pub struct NodeHealthChecker {
    probe: Arc<dyn NodeProbe>,
    timeout: Duration,
}

impl NodeHealthChecker {
    pub fn new(probe: Arc<dyn NodeProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// Returns one [`Node`] per hostname, in input order. A probe that outlives the
    /// timeout counts as unreachable.
    pub async fn check(&self, hostnames: &[String]) -> Vec<Node> {
        let checks = hostnames.iter().map(|hostname| async move {
            let reachable = tokio::time::timeout(self.timeout, self.probe.ping(hostname, self.timeout))
                .await
                .unwrap_or(false);
            Node::probed(hostname, reachable)
        });

        let nodes = join_all(checks).await;
        debug!(
            nodes = nodes.len(),
            healthy = nodes.iter().filter(|n| n.is_healthy).count(),
            "Node check finished"
        );
        nodes
    }
}
