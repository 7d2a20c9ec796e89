use crate::NodeProbeKind;
use clap::Parser;
use std::{
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

/// CUCM Live Monitor
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Explicit configuration file; replaces `config.yaml` from the config directory.
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Publisher hostname or address of the CUCM cluster.
    #[clap(long, value_name = "HOST")]
    pub cucm_host: Option<String>,

    /// AXL/serviceability user used for the RIS and PerfMon APIs.
    #[clap(long, value_name = "USER")]
    pub cucm_username: Option<String>,

    /// Password for `--cucm-username`. Prefer `CUCM_MONITOR_CUCM_PASSWORD`.
    #[clap(long, value_name = "PASSWORD")]
    pub cucm_password: Option<String>,

    /// Cluster node hostname; repeat for every node.
    #[clap(long = "node", value_name = "HOSTNAME")]
    pub nodes: Vec<String>,

    /// Time between two poll cycles, e.g. `5s` or `1m`.
    #[clap(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// How node reachability is probed.
    #[clap(long, value_name = "KIND")]
    pub node_probe: Option<NodeProbeKind>,

    /// Address the dashboard server listens on.
    #[clap(long, value_name = "ADDR")]
    pub listen_address: Option<SocketAddr>,

    /// Default log filter when `RUST_LOG` is not set.
    #[clap(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if let Some(host) = &self.cucm_host {
                cache.insert("cucm_host".to_string(), host.clone().into());
            }
            if let Some(username) = &self.cucm_username {
                cache.insert("cucm_username".to_string(), username.clone().into());
            }
            if let Some(password) = &self.cucm_password {
                cache.insert("cucm_password".to_string(), password.clone().into());
            }
            if !self.nodes.is_empty() {
                cache.insert("nodes".to_string(), self.nodes.clone().into());
            }
            if let Some(interval) = self.poll_interval {
                cache.insert(
                    "poll_interval".to_string(),
                    humantime::format_duration(interval).to_string().into(),
                );
            }
            if let Some(kind) = self.node_probe {
                cache.insert("node_probe".to_string(), kind.to_string().into());
            }
            if let Some(address) = self.listen_address {
                cache.insert("listen_address".to_string(), address.to_string().into());
            }
            if let Some(level) = &self.log_level {
                cache.insert("log_level".to_string(), level.clone().into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let config_dir_path = crate::get_config_dir().display().to_string();

    format!(
        "{}

Authors: {author}

Config directory: {config_dir_path}",
        clap::crate_version!()
    )
}
