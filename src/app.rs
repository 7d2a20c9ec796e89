use color_eyre::Result;
use cucm_monitor_config::{
    Config,
    NodeProbeKind,
};
use cucm_monitor_core::{
    endpoint::{
        EndpointPoller,
        HttpEndpointProbe,
    },
    node::{
        IcmpNodeProbe,
        NodeHealthChecker,
        NodeProbe,
        TcpNodeProbe,
    },
    upstream::SoapUpstreamClient,
    Aggregator,
    BroadcastHub,
    PollSettings,
    SnapshotStore,
};
use cucm_monitor_http::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct App {
    config: Config,
    shutdown: CancellationToken,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Runs the poll loop and the dashboard API until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        let _cancel_on_exit = self.shutdown.clone().drop_guard();

        let (writer, store) = SnapshotStore::channel(&config.cucm_host);
        let hub = BroadcastHub::new(store.clone());

        let aggregator = Aggregator::new(
            PollSettings::from_config(config),
            Arc::new(SoapUpstreamClient::new(config)?),
            EndpointPoller::new(Arc::new(HttpEndpointProbe::new()?), config.endpoint_timeout),
            NodeHealthChecker::new(node_probe(config), config.node_timeout),
            writer,
            hub.clone(),
        );

        let listener = TcpListener::bind(config.listen_address).await?;
        let poll_loop = tokio::spawn(aggregator.run(self.shutdown.clone()));
        tokio::spawn(cancel_on_signal(self.shutdown.clone()));

        let served = cucm_monitor_http::serve(
            listener,
            AppState {
                store,
                hub,
                viewer_buffer: config.viewer_buffer,
                shutdown: self.shutdown.clone(),
            },
        )
        .await;

        self.shutdown.cancel();
        poll_loop.await?;
        served
    }
}

fn node_probe(config: &Config) -> Arc<dyn NodeProbe> {
    let tcp = || -> Arc<dyn NodeProbe> { Arc::new(TcpNodeProbe::new(config.node_probe_port)) };
    match config.node_probe {
        NodeProbeKind::Icmp => match IcmpNodeProbe::new() {
            Ok(probe) => Arc::new(probe) as Arc<dyn NodeProbe>,
            Err(e) => {
                warn!(
                    port = config.node_probe_port,
                    "Cannot open an ICMP socket, probing nodes over TCP instead: {e}"
                );
                tcp()
            }
        },
        NodeProbeKind::Tcp => tcp(),
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
