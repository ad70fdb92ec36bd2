//! On-disk TOML configuration: one `[[peer]]` table per configured
//! neighbor. Kept deliberately small next to the teacher's YANG-driven
//! candidate/running config tree — this speaker has no notion of
//! candidate-vs-running, so a flat `serde`-deserialized file read once at
//! startup is all the Peer Runtime table needs.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::Deserialize;

const DEFAULT_CONN_RETRY_TIME_S: u16 = 30;
const DEFAULT_HOLD_TIME_S: u16 = 45;
const DEFAULT_KEEPALIVE_TIME_S: u16 = 15;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "peer")]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub local_id: Ipv4Addr,
    pub local_asn: u32,
    pub remote_id: Ipv4Addr,
    pub remote_port: u16,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    /// Peer-profile selector. Unused by the FSM itself; carried through so
    /// the operator CLI and logs can name a peer by role rather than IP.
    pub speaker: String,

    #[serde(default = "default_conn_retry_time_s")]
    pub conn_retry_time_s: u16,
    #[serde(default = "default_hold_time_s")]
    pub hold_time_s: u16,
    #[serde(default = "default_keepalive_time_s")]
    pub keepalive_time_s: u16,
}

fn default_local_port() -> u16 {
    179
}

fn default_conn_retry_time_s() -> u16 {
    DEFAULT_CONN_RETRY_TIME_S
}

fn default_hold_time_s() -> u16 {
    DEFAULT_HOLD_TIME_S
}

fn default_keepalive_time_s() -> u16 {
    DEFAULT_KEEPALIVE_TIME_S
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_peer_with_defaults() {
        let toml = r#"
            [[peer]]
            local_id = "2.2.2.2"
            local_asn = 65002
            remote_id = "1.1.1.1"
            remote_port = 179
            speaker = "upstream-a"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.peers.len(), 1);
        let peer = &config.peers[0];
        assert_eq!(peer.local_port, 179);
        assert_eq!(peer.conn_retry_time_s, DEFAULT_CONN_RETRY_TIME_S);
        assert_eq!(peer.hold_time_s, DEFAULT_HOLD_TIME_S);
        assert_eq!(peer.keepalive_time_s, DEFAULT_KEEPALIVE_TIME_S);
    }

    #[test]
    fn parses_explicit_timer_overrides() {
        let toml = r#"
            [[peer]]
            local_id = "2.2.2.2"
            local_asn = 65002
            remote_id = "1.1.1.1"
            remote_port = 179
            local_port = 1179
            speaker = "upstream-a"
            conn_retry_time_s = 10
            hold_time_s = 90
            keepalive_time_s = 30
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let peer = &config.peers[0];
        assert_eq!(peer.local_port, 1179);
        assert_eq!(peer.conn_retry_time_s, 10);
        assert_eq!(peer.hold_time_s, 90);
        assert_eq!(peer.keepalive_time_s, 30);
    }
}
