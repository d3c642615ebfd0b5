//! The resolver index: key layout and read views.
//!
//! Domain and note actors project into a shared [`IndexStore`] with the
//! keys built in [`keys`]. [`Resolver`] reads them back for clients. The
//! index is eventually consistent: a view may lag the actors behind it.
//!
//! | Key | Value | Metadata |
//! |-----|-------|----------|
//! | `domain:{namehash}` | JSON `{parent, label, fqn, owner}` | |
//! | `domains:{parent or owner}:{namehash}` | empty | `{parent, label, fqn, owner}` |
//! | `note:{address}` | JSON `[ptr, rev, channel]` | |
//! | `account:{address}` | public key hex | |
//! | `accounts:{channel}:{signer}` | note address | `{addr}` |
//! | `channels:{signer}:{channel}` | note address | `{addr}` |
//! | `channel:{channel}` | topic | |
//! | `metadata:{signer}:{channel}` | metadata JSON | |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use namegraph_core::{Address, ChannelId, Namehash};
use namegraph_store::{IndexStore, IndexStoreExt};

use crate::error::Result;

/// Default image for domains whose metadata layers set none.
pub const DEFAULT_IMAGE: &str =
    "ipfs://bafybeihe67oiezjclcok2toyvbypldy4rhe4jybc6kydf75cnvvu2424zu/nft.png";

/// Trait types only the composer may set.
pub const RESERVED_TRAITS: [&str; 3] = ["id", "domain", "parent domain"];

/// Index key builders.
pub mod keys {
    use std::fmt::Display;

    pub fn domain(namehash: impl Display) -> String {
        format!("domain:{}", namehash)
    }

    /// `scope` is a parent namehash or an owner address.
    pub fn domains(scope: impl Display, namehash: impl Display) -> String {
        format!("domains:{}:{}", scope, namehash)
    }

    pub fn domains_prefix(scope: impl Display) -> String {
        format!("domains:{}:", scope)
    }

    pub fn note(address: impl Display) -> String {
        format!("note:{}", address)
    }

    pub fn account(address: impl Display) -> String {
        format!("account:{}", address)
    }

    pub fn accounts(channel: impl Display, signer: impl Display) -> String {
        format!("accounts:{}:{}", channel, signer)
    }

    pub fn channels(signer: impl Display, channel: impl Display) -> String {
        format!("channels:{}:{}", signer, channel)
    }

    pub fn channel(channel: impl Display) -> String {
        format!("channel:{}", channel)
    }

    pub fn metadata(signer: impl Display, channel: impl Display) -> String {
        format!("metadata:{}:{}", signer, channel)
    }
}

/// A domain as indexed, without its namehash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDomain {
    pub parent: Namehash,
    pub label: String,
    pub fqn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
}

/// Read view of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainView {
    pub namehash: Namehash,
    pub parent: Namehash,
    pub label: String,
    pub fqn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
}

impl DomainView {
    fn from_indexed(namehash: Namehash, indexed: IndexedDomain) -> Self {
        Self {
            namehash,
            parent: indexed.parent,
            label: indexed.label,
            fqn: indexed.fqn,
            owner: indexed.owner,
        }
    }
}

/// Read view of a note's latest projected commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteView {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptr: Option<String>,
}

/// Read view of an account's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publickey: Option<String>,
}

/// `note:{address}` payload.
pub type NoteEntry = (String, u64, Option<ChannelId>);

/// `{addr}` metadata on `accounts:` and `channels:` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrMetadata {
    pub addr: Address,
}

/// One NFT-style metadata attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_type: Option<String>,
    pub trait_type: String,
    pub value: Value,
}

impl Attribute {
    pub fn new(trait_type: &str, value: impl Into<Value>) -> Self {
        Self {
            display_type: None,
            trait_type: trait_type.to_string(),
            value: value.into(),
        }
    }
}

/// Read-only access to the resolver index.
#[derive(Clone)]
pub struct Resolver {
    index: Arc<dyn IndexStore>,
}

impl Resolver {
    pub fn new(index: Arc<dyn IndexStore>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<dyn IndexStore> {
        &self.index
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Domains
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_domain(&self, namehash: &Namehash) -> Result<Option<DomainView>> {
        let indexed: Option<IndexedDomain> = self.index.get_json(&keys::domain(namehash)).await?;
        Ok(indexed.map(|d| DomainView::from_indexed(*namehash, d)))
    }

    /// Domains listed under a parent namehash or an owner address.
    pub async fn get_domains(&self, scope: &str) -> Result<Vec<DomainView>> {
        let prefix = keys::domains_prefix(scope.to_ascii_lowercase());
        let mut domains = Vec::new();
        for entry in self.index.list(&prefix).await? {
            let Some(namehash) = entry.key.rsplit(':').next().and_then(|s| s.parse::<Namehash>().ok()) else {
                continue;
            };
            let Some(metadata) = entry.metadata else {
                continue;
            };
            match serde_json::from_value::<IndexedDomain>(metadata) {
                Ok(indexed) => domains.push(DomainView::from_indexed(namehash, indexed)),
                Err(error) => {
                    tracing::warn!(key = %entry.key, %error, "skipping malformed domain entry")
                }
            }
        }
        Ok(domains)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Notes and accounts
    // ─────────────────────────────────────────────────────────────────────────

    /// The note at `address`, or the note `address` publishes on `channel`.
    ///
    /// With a channel, `address` is the signer's base account and the note
    /// is found through `channels:{address}:{channel}`.
    pub async fn get_note(&self, address: &Address, channel: Option<&ChannelId>) -> Result<Option<NoteView>> {
        let address = match channel {
            Some(channel) => match self.channel_note(address, channel).await? {
                Some(addr) => addr,
                None => return Ok(None),
            },
            None => *address,
        };

        let entry: Option<NoteEntry> = self.index.get_json(&keys::note(address)).await?;
        Ok(Some(match entry {
            Some((ptr, rev, channel)) => NoteView {
                address,
                channel,
                rev: Some(rev),
                ptr: Some(ptr),
            },
            None => NoteView {
                address,
                channel: None,
                rev: None,
                ptr: None,
            },
        }))
    }

    async fn channel_note(&self, address: &Address, channel: &ChannelId) -> Result<Option<Address>> {
        let entry = self
            .index
            .get_with_metadata(&keys::channels(address, channel))
            .await?;
        Ok(entry
            .and_then(|e| e.metadata)
            .and_then(|m| serde_json::from_value::<AddrMetadata>(m).ok())
            .map(|m| m.addr))
    }

    /// Notes listed under `{scope}:{key}:` (`accounts` by channel or
    /// `channels` by signer).
    pub async fn get_notes(&self, scope: &str, key: &str) -> Result<Vec<NoteView>> {
        let prefix = format!("{}:{}:", scope, key.to_ascii_lowercase());
        let mut notes = Vec::new();
        for entry in self.index.list(&prefix).await? {
            let addr = entry
                .metadata
                .and_then(|m| serde_json::from_value::<AddrMetadata>(m).ok());
            if let Some(AddrMetadata { addr }) = addr {
                if let Some(note) = self.get_note(&addr, None).await? {
                    notes.push(note);
                }
            }
        }
        Ok(notes)
    }

    pub async fn get_account(&self, address: &Address) -> Result<AccountView> {
        let publickey = self
            .index
            .get(&keys::account(address))
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok());
        Ok(AccountView {
            address: *address,
            publickey,
        })
    }

    /// Topic of a channel.
    pub async fn get_channel(&self, channel: &ChannelId) -> Result<Option<String>> {
        Ok(self
            .index
            .get(&keys::channel(channel))
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metadata
    // ─────────────────────────────────────────────────────────────────────────

    /// Metadata `signer` published on `channel`; empty when absent or not a
    /// JSON object.
    pub async fn get_metadata_layer(&self, signer: &Address, channel: &ChannelId) -> Result<Map<String, Value>> {
        let layer = match self.index.get(&keys::metadata(signer, channel)).await? {
            Some(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            None => Map::new(),
        };
        Ok(layer)
    }

    /// Composed metadata for a domain.
    ///
    /// Needs an owned domain under an owned parent. Layers, lowest first:
    /// the parent owner's metadata for the parent, the owner's metadata for
    /// the domain, and the parent owner's overrides for the domain.
    pub async fn get_metadata(&self, namehash: &Namehash) -> Result<Option<Value>> {
        let Some(domain) = self.get_domain(namehash).await? else {
            return Ok(None);
        };
        let Some(owner) = domain.owner else {
            return Ok(None);
        };
        let Some(parent) = self.get_domain(&domain.parent).await? else {
            return Ok(None);
        };
        let Some(parent_owner) = parent.owner else {
            return Ok(None);
        };

        let base = self.get_metadata_layer(&parent_owner, &parent.namehash).await?;
        let custom = self.get_metadata_layer(&owner, &domain.namehash).await?;
        let overrides = self.get_metadata_layer(&parent_owner, &domain.namehash).await?;

        Ok(Some(compose_metadata(&domain, &parent, base, custom, overrides)))
    }
}

fn attributes_of(layer: &Map<String, Value>) -> Vec<Attribute> {
    match layer.get("attributes") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Keep attributes whose trait is neither reserved nor set by `above`.
fn filter_attributes(attributes: Vec<Attribute>, above: &[Attribute]) -> Vec<Attribute> {
    attributes
        .into_iter()
        .filter(|attr| {
            let trait_type = attr.trait_type.to_lowercase();
            !RESERVED_TRAITS.contains(&trait_type.as_str())
                && !above
                    .iter()
                    .any(|a| a.trait_type.to_lowercase() == trait_type)
        })
        .collect()
}

/// Merge metadata layers over the domain defaults.
pub fn compose_metadata(
    domain: &DomainView,
    parent: &DomainView,
    base: Map<String, Value>,
    custom: Map<String, Value>,
    overrides: Map<String, Value>,
) -> Value {
    let override_attrs = filter_attributes(attributes_of(&overrides), &[]);
    let custom_attrs = filter_attributes(attributes_of(&custom), &override_attrs);
    let above_base: Vec<Attribute> = custom_attrs.iter().chain(&override_attrs).cloned().collect();
    let base_attrs = filter_attributes(attributes_of(&base), &above_base);

    let mut attributes = vec![
        Attribute::new("ID", domain.namehash.to_hex()),
        Attribute::new("Domain", domain.fqn.clone()),
        Attribute::new("Parent Domain", parent.fqn.clone()),
    ];
    attributes.extend(base_attrs);
    attributes.extend(custom_attrs);
    attributes.extend(override_attrs);

    let mut out = Map::new();
    out.insert("name".into(), json!(domain.fqn));
    out.insert("image".into(), json!(DEFAULT_IMAGE));
    out.insert(
        "description".into(),
        json!(format!("Butterfly Protocol Domain: {}", domain.fqn)),
    );
    for layer in [base, custom, overrides] {
        out.extend(layer);
    }
    out.insert("attributes".into(), json!(attributes));
    Value::Object(out)
}
