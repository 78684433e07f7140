// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Bridge configuration.
//!
//! The configuration is a TOML document, e.g.
//!
//! ```toml
//! ca_url = "http://localhost:7054"
//! channel = "mychannel"
//! chaincode = "fabcar"
//!
//! [[users]]
//! id = "admin"
//! affiliation = "org1"
//! mspid = "Org1MSP"
//! pw = "adminpw"
//!
//! [[peers]]
//! domain = "org1.example.com"
//! url = "grpc://localhost:7051"
//! count = 2
//!
//! [[orderers]]
//! name = "orderer"
//! domain = "example.com"
//! url = "grpc://localhost:7050"
//! ```
//!
//! Every field must be populated before a gateway can be opened, anything
//! missing or malformed is reported as a `Configuration` error.

use crate::{
    base::{Endpoint, NetworkTopology, UserSpec},
    Error, ErrorKind, Result,
};
use std::{path::Path, path::PathBuf, time::Duration};
use url::Url;

/// Enrollment id reserved to the registrar identity.
pub const ADMIN_ID: &str = "admin";

/// Default commit wait, in seconds.
pub const DEFAULT_COMMIT_TIMEOUT: u64 = 60;

const ALLOWED_SCHEMES: [&str; 2] = ["grpc", "grpcs"];

/// Group of peers sharing a domain, named `peer0.<domain>` .. `peer<count-1>.<domain>`.
#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct PeerGroup {
    pub domain: String,
    pub url: String,
    pub count: usize,
}

/// Ordering node, named `<name>.<domain>`.
#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct OrdererConfig {
    pub name: String,
    pub domain: String,
    pub url: String,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct EventHubConfig {
    pub name: String,
    pub url: String,
}

/// Bridge configuration.
#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct BridgeConfig {
    /// Certificate authority endpoint.
    pub ca_url: String,
    /// Channel name.
    pub channel: String,
    /// Chaincode name.
    pub chaincode: String,
    /// Directory holding the persisted identities.
    #[serde(default = "default_identity_dir")]
    pub identity_dir: PathBuf,
    /// Max number of seconds to wait for a transaction commit.
    #[serde(default = "default_commit_timeout")]
    pub commit_timeout: u64,
    /// Identities to enroll, the admin included.
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub peers: Vec<PeerGroup>,
    #[serde(default)]
    pub orderers: Vec<OrdererConfig>,
    pub eventhub: Option<EventHubConfig>,
}

fn default_identity_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_commit_timeout() -> u64 {
    DEFAULT_COMMIT_TIMEOUT
}

fn config_error(msg: impl Into<String>) -> Error {
    Error::new_ext(ErrorKind::Configuration, msg.into())
}

impl BridgeConfig {
    /// Parse and validate a TOML configuration document.
    pub fn from_toml(doc: &str) -> Result<Self> {
        let config: BridgeConfig =
            toml::from_str(doc).map_err(|err| Error::new_ext(ErrorKind::Configuration, err))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading bridge configuration from '{}'", path.display());
        let doc = std::fs::read_to_string(path)
            .map_err(|err| Error::new_ext(ErrorKind::Configuration, err))?;
        Self::from_toml(&doc)
    }

    /// Check that every mandatory field is populated.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("ca_url", &self.ca_url),
            ("channel", &self.channel),
            ("chaincode", &self.chaincode),
        ] {
            if value.trim().is_empty() {
                return Err(config_error(format!("missing '{}'", field)));
            }
        }
        if self.commit_timeout == 0 {
            return Err(config_error("'commit_timeout' must be positive"));
        }
        let admins = self.users.iter().filter(|u| u.id == ADMIN_ID).count();
        if admins != 1 {
            return Err(config_error(format!(
                "expected exactly one '{}' user, found {}",
                ADMIN_ID, admins
            )));
        }
        if let Some(user) = self.users.iter().find(|u| u.id.trim().is_empty()) {
            return Err(config_error(format!(
                "user with empty id (affiliation '{}')",
                user.affiliation
            )));
        }
        self.topology().map(|_| ())
    }

    /// The registrar identity.
    pub fn admin(&self) -> Result<&UserSpec> {
        self.users
            .iter()
            .find(|u| u.id == ADMIN_ID)
            .ok_or_else(|| config_error(format!("missing '{}' user", ADMIN_ID)))
    }

    /// Every non-admin user, in declaration order.
    pub fn users(&self) -> impl Iterator<Item = &UserSpec> {
        self.users.iter().filter(|u| u.id != ADMIN_ID)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout)
    }

    /// Resolve the full network layout.
    /// Fails if any list is empty or any endpoint URL is malformed.
    pub fn topology(&self) -> Result<NetworkTopology> {
        let peers: Vec<Endpoint> = self
            .peers
            .iter()
            .flat_map(|group| {
                (0..group.count)
                    .map(move |i| Endpoint::new(format!("peer{}.{}", i, group.domain), &group.url))
            })
            .collect();
        if peers.is_empty() {
            return Err(config_error("no peers configured"));
        }
        let orderers: Vec<Endpoint> = self
            .orderers
            .iter()
            .map(|o| Endpoint::new(format!("{}.{}", o.name, o.domain), &o.url))
            .collect();
        if orderers.is_empty() {
            return Err(config_error("no orderers configured"));
        }
        let event_hub = self
            .eventhub
            .as_ref()
            .map(|hub| Endpoint::new(&hub.name, &hub.url));

        for endpoint in peers.iter().chain(orderers.iter()).chain(event_hub.iter()) {
            validate_endpoint(endpoint)?;
        }

        Ok(NetworkTopology {
            ca_url: self.ca_url.clone(),
            channel: self.channel.clone(),
            chaincode: self.chaincode.clone(),
            peers,
            orderers,
            event_hub,
        })
    }
}

/// Check that an endpoint is a `grpc(s)://host:port` address.
pub fn validate_endpoint(endpoint: &Endpoint) -> Result<()> {
    let invalid = |reason: &str| {
        config_error(format!(
            "invalid url '{}' for '{}': {}",
            endpoint.url, endpoint.name, reason
        ))
    };
    if endpoint.name.trim().is_empty() {
        return Err(invalid("empty name"));
    }
    let url = Url::parse(&endpoint.url).map_err(|err| invalid(&err.to_string()))?;
    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(invalid("unsupported scheme"));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => (),
        _ => return Err(invalid("missing host")),
    }
    if url.port().is_none() {
        return Err(invalid("missing port"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("unexpected credentials"));
    }
    if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("unexpected path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        ca_url = "http://localhost:7054"
        channel = "mychannel"
        chaincode = "fabcar"
        identity_dir = "/var/lib/bridge"

        [[users]]
        id = "admin"
        affiliation = "org1"
        mspid = "Org1MSP"
        pw = "adminpw"

        [[users]]
        id = "user1"
        affiliation = "org1.department1"
        mspid = "Org1MSP"

        [[peers]]
        domain = "org1.example.com"
        url = "grpc://localhost:7051"
        count = 2

        [[orderers]]
        name = "orderer"
        domain = "example.com"
        url = "grpc://localhost:7050"

        [eventhub]
        name = "eventhub01"
        url = "grpc://localhost:7053"
    "#;

    fn create_test_config() -> BridgeConfig {
        BridgeConfig::from_toml(CONFIG).unwrap()
    }

    #[test]
    fn parse_full_config() {
        let config = create_test_config();

        assert_eq!(config.channel, "mychannel");
        assert_eq!(config.identity_dir, PathBuf::from("/var/lib/bridge"));
        assert_eq!(config.commit_timeout(), Duration::from_secs(60));
        assert_eq!(config.admin().unwrap().secret.as_deref(), Some("adminpw"));
        let users: Vec<_> = config.users().map(|u| u.id.as_str()).collect();
        assert_eq!(users, vec!["user1"]);
        assert_eq!(config.users().next().unwrap().secret, None);
    }

    #[test]
    fn topology_expands_peer_groups() {
        let topology = create_test_config().topology().unwrap();

        assert_eq!(
            topology.peers,
            vec![
                Endpoint::new("peer0.org1.example.com", "grpc://localhost:7051"),
                Endpoint::new("peer1.org1.example.com", "grpc://localhost:7051"),
            ]
        );
        assert_eq!(
            topology.orderers,
            vec![Endpoint::new("orderer.example.com", "grpc://localhost:7050")]
        );
        assert_eq!(
            topology.event_hub,
            Some(Endpoint::new("eventhub01", "grpc://localhost:7053"))
        );
    }

    #[test]
    fn missing_channel() {
        let doc = CONFIG.replace(r#"channel = "mychannel""#, r#"channel = """#);

        let err = BridgeConfig::from_toml(&doc).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Configuration);
        assert_eq!(err.to_string_full(), "configuration error: missing 'channel'");
    }

    #[test]
    fn missing_chaincode_field() {
        let doc = CONFIG.replace(r#"chaincode = "fabcar""#, "");

        let err = BridgeConfig::from_toml(&doc).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn missing_admin() {
        let doc = CONFIG.replace(r#"id = "admin""#, r#"id = "root""#);

        let err = BridgeConfig::from_toml(&doc).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn zero_peers() {
        let doc = CONFIG.replace("count = 2", "count = 0");

        let err = BridgeConfig::from_toml(&doc).unwrap_err();

        assert_eq!(err.to_string_full(), "configuration error: no peers configured");
    }

    #[test]
    fn malformed_orderer_url() {
        let doc = CONFIG.replace("grpc://localhost:7050", "localhost:7050");

        let err = BridgeConfig::from_toml(&doc).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn endpoint_validation() {
        let ok = [
            "grpc://localhost:7051",
            "grpcs://peer0.org1.example.com:7051",
            "grpc://[::1]:7051",
            "grpc://10.0.0.1:7051/",
        ];
        for url in ok {
            assert!(validate_endpoint(&Endpoint::new("peer0", url)).is_ok(), "{}", url);
        }
        let ko = [
            "http://localhost:7051",
            "grpc://localhost",
            "grpc://:7051",
            "grpc://localhost:99999",
            "grpc://localhost:abc",
            "grpc://[::1:7051",
            "grpc://ho<st:7051",
            "grpc://a@b@c:7051",
            "grpc://user:pw@localhost:7051",
            "grpc://localhost:7051/channel",
            "grpc://localhost:7051?tls=1",
        ];
        for url in ko {
            assert!(validate_endpoint(&Endpoint::new("peer0", url)).is_err(), "{}", url);
        }
    }

    #[test]
    fn load_missing_file() {
        let err = BridgeConfig::load("/nonexistent/bridge.toml").unwrap_err();

        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
