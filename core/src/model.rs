//! Data exchanged between the poll loop, the store and the viewers.
//!
//! Everything in here serializes to the JSON the dashboard renders, so field names and
//! enum labels are part of the wire contract.

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::net::IpAddr;
use strum::{
    Display,
    EnumIter,
    EnumString,
};

/// Registration state as reported by the device registry.
#[derive(Debug, Default, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegistrationStatus {
    Registered,
    Unregistered,
    #[default]
    Unknown,
}

impl RegistrationStatus {
    /// Maps the raw RIS status string (`Registered`, `UnRegistered`, `Rejected`,
    /// `PartiallyRegistered`, ...) onto the three states the dashboard knows.
    pub fn from_platform(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "registered" | "partiallyregistered" => Self::Registered,
            "unregistered" | "rejected" => Self::Unregistered,
            _ => Self::Unknown,
        }
    }
}

/// Call state derived from the endpoint's streaming statistics page.
#[derive(Debug, Default, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CallState {
    OnCall,
    Idle,
    #[default]
    Unknown,
}

/// A device as the upstream registry reports it, before its call state is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRecord {
    pub name: String,
    pub description: Option<String>,
    pub status: RegistrationStatus,
    pub ip_address: Option<String>,
    pub model: Option<String>,
    /// Directory numbers currently in a connected/in-progress/held state.
    pub active_lines: u32,
}

impl DeviceRecord {
    pub fn into_device(self, call_status: CallState) -> Device {
        Device {
            name: self.name,
            description: self.description,
            status: self.status,
            call_status,
            ip_address: self.ip_address,
            model: self.model,
            active_lines: self.active_lines,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub description: Option<String>,
    pub status: RegistrationStatus,
    pub call_status: CallState,
    pub ip_address: Option<String>,
    pub model: Option<String>,
    pub active_lines: u32,
}

#[derive(Debug, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeStatus {
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    /// Fully qualified hostname the probe was sent to.
    pub name: String,
    /// Label shown on the dashboard, see [`short_name`].
    pub short_name: String,
    pub status: NodeStatus,
    pub is_healthy: bool,
}

impl Node {
    pub fn probed(hostname: &str, reachable: bool) -> Self {
        Self {
            name: hostname.to_string(),
            short_name: short_name(hostname).to_string(),
            status: if reachable {
                NodeStatus::Reachable
            } else {
                NodeStatus::Unreachable
            },
            is_healthy: reachable,
        }
    }
}

/// Display label for a node hostname: the last `-` separated token of the first DNS
/// label, so `uat-clt-ucmpubc1.example.com` becomes `ucmpubc1`. IP literals are kept.
pub fn short_name(hostname: &str) -> &str {
    if hostname.parse::<IpAddr>().is_ok() {
        return hostname;
    }
    hostname
        .split('.')
        .next()
        .and_then(|label| label.rsplit('-').next())
        .filter(|label| !label.is_empty())
        .unwrap_or(hostname)
}

/// Everything the dashboard shows for one poll cycle. Published as a whole and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cucm_host: String,
    pub total_devices: usize,
    pub registered_devices: usize,
    pub total_active_calls: u64,
    pub devices: Vec<Device>,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub cucm_host: String,
    pub last_error: Option<String>,
    pub last_successful_poll: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    /// State before the first poll finished.
    pub fn pending(cucm_host: impl Into<String>) -> Self {
        Self {
            connected: false,
            cucm_host: cucm_host.into(),
            last_error: None,
            last_successful_poll: None,
        }
    }

    pub fn succeeded(&self, at: DateTime<Utc>) -> Self {
        Self {
            connected: true,
            cucm_host: self.cucm_host.clone(),
            last_error: None,
            last_successful_poll: Some(at),
        }
    }

    /// Keeps the time of the last success so the dashboard can show how stale it is.
    pub fn failed(&self, error: impl Into<String>) -> Self {
        Self {
            connected: false,
            cucm_host: self.cucm_host.clone(),
            last_error: Some(error.into()),
            last_successful_poll: self.last_successful_poll,
        }
    }
}
