#[macro_use]
extern crate tracing;

mod app_config;
mod args;
mod duration;

use app_config::{
    AppConfig,
    ENV_PREFIX,
};
pub use app_config::get_config_dir;
pub use args::Args;
use color_eyre::Result;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    net::SocketAddr,
    time::Duration,
};
use strum::{
    Display,
    EnumIter,
    EnumString,
};

/// How the reachability of a cluster node is checked.
#[derive(Debug, Default, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeProbeKind {
    /// One ICMP echo request. Needs a raw or datagram ICMP socket.
    #[default]
    Icmp,
    /// TCP connect to `node_probe_port`.
    Tcp,
}

/// A credential that must not end up in logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"********\"")
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten, skip_serializing)]
    pub app_config: AppConfig,
    #[serde(default)]
    pub cucm_host: String,
    #[serde(default)]
    pub cucm_username: String,
    #[serde(default)]
    pub cucm_password: Secret,
    /// Fixed, ordered list of cluster node hostnames. Empty means "use the nodes the
    /// device registry reports".
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(with = "duration")]
    pub poll_interval: Duration,
    #[serde(with = "duration")]
    pub endpoint_timeout: Duration,
    #[serde(with = "duration")]
    pub node_timeout: Duration,
    #[serde(with = "duration")]
    pub upstream_timeout: Duration,
    #[serde(default)]
    pub node_probe: NodeProbeKind,
    pub node_probe_port: u16,
    pub device_filter: String,
    pub max_returned_devices: u32,
    pub accept_invalid_certs: bool,
    pub viewer_buffer: usize,
    pub listen_address: SocketAddr,
    pub log_level: String,
}

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl Config {
    pub fn new(args: Args) -> Result<Self, config::ConfigError> {
        let config_dir = get_config_dir();
        let mut builder = config::Config::builder()
            .set_default("config_dir", config_dir.to_string_lossy().to_string())?
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        builder = match &args.config {
            Some(path) => builder.add_source(config::File::from(path.as_path()).format(config::FileFormat::Yaml)),
            None => builder.add_source(
                config::File::from(config_dir.join("config.yaml"))
                    .format(config::FileFormat::Yaml)
                    .required(false),
            ),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("nodes"),
        );

        builder = builder.add_source(args);

        let cfg: Self = builder.build()?.try_deserialize()?;
        debug!(?cfg, "Configuration loaded");

        Ok(cfg)
    }

    /// Rejects configurations the poll loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cucm_host.trim().is_empty() {
            eyre::bail!("cucm_host must be set (--cucm-host or {ENV_PREFIX}_CUCM_HOST)");
        }
        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("endpoint_timeout", self.endpoint_timeout),
            ("node_timeout", self.node_timeout),
            ("upstream_timeout", self.upstream_timeout),
        ] {
            if value.is_zero() {
                eyre::bail!("{name} must be greater than zero");
            }
        }
        if self.viewer_buffer == 0 {
            eyre::bail!("viewer_buffer must be at least 1");
        }
        if self.cucm_username.is_empty() || self.cucm_password.is_empty() {
            warn!("CUCM credentials are empty, the platform will most likely reject every poll");
        }
        Ok(())
    }
}
