//! Persisted node configuration.
//!
//! The on-disk format is a JSON document with PascalCase keys. Sections this
//! crate does not model are kept in [`Config::extra`] and written back
//! untouched.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use libp2p::identity::Keypair;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known entry peers used when a repository is initialised.
pub const DEFAULT_BOOTSTRAP: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

/// Datastore type provided by the built-in plugin.
pub const DEFAULT_DATASTORE_TYPE: &str = "sled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    pub identity: Identity,
    #[serde(default)]
    pub addresses: Addresses,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(default)]
    pub bootstrap: Vec<String>,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    /// Sections not interpreted by this crate.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "PeerID")]
    pub peer_id: String,
    /// Protobuf-encoded private key, base64.
    #[serde(rename = "PrivKey", default, skip_serializing_if = "String::is_empty")]
    pub priv_key: String,
}

impl Identity {
    /// Generate a fresh Ed25519 identity.
    pub fn generate() -> Result<Self> {
        let keypair = Keypair::generate_ed25519();
        let encoded = keypair
            .to_protobuf_encoding()
            .context("Failed to encode identity key")?;
        Ok(Self {
            peer_id: keypair.public().to_peer_id().to_string(),
            priv_key: base64::engine::general_purpose::STANDARD.encode(encoded),
        })
    }

    pub fn peer_id(&self) -> Result<PeerId> {
        self.peer_id
            .parse()
            .map_err(|e| anyhow!("invalid PeerID `{}`: {}", self.peer_id, e))
    }

    /// Decode the private key, if one is stored.
    pub fn keypair(&self) -> Result<Option<Keypair>> {
        if self.priv_key.is_empty() {
            return Ok(None);
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.priv_key)
            .context("PrivKey is not valid base64")?;
        let keypair =
            Keypair::from_protobuf_encoding(&bytes).context("PrivKey is not a valid key")?;
        if keypair.public().to_peer_id() != self.peer_id()? {
            bail!("PrivKey does not match PeerID {}", self.peer_id);
        }
        Ok(Some(keypair))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Addresses {
    #[serde(default)]
    pub swarm: Vec<String>,
    #[serde(rename = "API", default)]
    pub api: Strings,
    #[serde(default)]
    pub gateway: Strings,
}

/// A list of strings that may be written as a single string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StringsRepr", into = "StringsRepr")]
pub struct Strings(pub Vec<String>);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StringsRepr {
    One(String),
    Many(Vec<String>),
}

impl From<StringsRepr> for Strings {
    fn from(repr: StringsRepr) -> Self {
        match repr {
            StringsRepr::One(s) if s.is_empty() => Strings(Vec::new()),
            StringsRepr::One(s) => Strings(vec![s]),
            StringsRepr::Many(v) => Strings(v),
        }
    }
}

impl From<Strings> for StringsRepr {
    fn from(strings: Strings) -> Self {
        match <[String; 1]>::try_from(strings.0) {
            Ok([one]) => StringsRepr::One(one),
            Err(many) => StringsRepr::Many(many),
        }
    }
}

impl Strings {
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for Strings {
    fn from(v: Vec<String>) -> Self {
        Strings(v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    #[serde(rename = "MDNS", default)]
    pub mdns: Mdns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mdns {
    pub enabled: bool,
}

impl Default for Mdns {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatastoreConfig {
    #[serde(rename = "Type")]
    pub kind: String,
    /// Relative to the repository root.
    pub path: String,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            kind: DEFAULT_DATASTORE_TYPE.to_string(),
            path: "datastore".to_string(),
        }
    }
}

impl Config {
    /// A complete configuration with a freshly generated identity.
    pub fn default_config() -> Result<Self> {
        Ok(Self {
            identity: Identity::generate()?,
            addresses: Addresses {
                swarm: vec![
                    "/ip4/0.0.0.0/tcp/4001".to_string(),
                    "/ip6/::/tcp/4001".to_string(),
                    "/ip4/0.0.0.0/udp/4001/quic-v1".to_string(),
                ],
                api: Strings(vec!["/ip4/127.0.0.1/tcp/5001".to_string()]),
                gateway: Strings(vec!["/ip4/127.0.0.1/tcp/8080".to_string()]),
            },
            discovery: Discovery::default(),
            bootstrap: DEFAULT_BOOTSTRAP.iter().map(|s| s.to_string()).collect(),
            datastore: DatastoreConfig::default(),
            extra: Map::new(),
        })
    }

    pub fn mdns_enabled(&self) -> bool {
        self.discovery.mdns.enabled
    }

    /// Read a value by dotted key, e.g. `Addresses.API`.
    pub fn get_key(&self, key: &str) -> Result<Value> {
        let root = serde_json::to_value(self).context("Failed to serialize config")?;
        let mut cursor = &root;
        for part in split_key(key)? {
            cursor = cursor
                .get(part)
                .ok_or_else(|| anyhow!("key has no attribute `{}`: {}", part, key))?;
        }
        Ok(cursor.clone())
    }

    /// Write a value by dotted key. Missing intermediate objects are created.
    /// The result must still parse as a configuration.
    pub fn set_key(&mut self, key: &str, value: Value) -> Result<()> {
        let mut root = serde_json::to_value(&*self).context("Failed to serialize config")?;
        let parts = split_key(key)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| anyhow!("empty config key"))?;

        let mut cursor = &mut root;
        for part in parents {
            let object = cursor
                .as_object_mut()
                .ok_or_else(|| anyhow!("`{}` is not an object in key {}", part, key))?;
            cursor = object
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        cursor
            .as_object_mut()
            .ok_or_else(|| anyhow!("cannot set `{}` on a non-object in key {}", last, key))?
            .insert(last.to_string(), value);

        *self = serde_json::from_value(root)
            .with_context(|| format!("value for {} does not fit the config", key))?;
        Ok(())
    }
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        bail!("invalid config key `{}`", key);
    }
    Ok(parts)
}
