//! Channel key derivation.
//!
//! A channel is a pseudonymous sub-identity of a base key, addressed by a
//! dot-separated topic. Each label step hashes into the channel id exactly like
//! [`namehash`](crate::namehash::namehash) and multiplies the current public key
//! by that id, so the deepest step's channel id is the namehash of the topic.
//!
//! Derivation works on public keys alone; a holder of the base secret can
//! derive the matching secret with [`derive_channel_keypair`].

use crate::crypto::{scalar_from_hash, Keypair, PublicKey};
use crate::error::CoreError;
use crate::namehash::child_namehash;
use crate::types::{Address, ChannelId};

/// One derivation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKey {
    /// Address of the derived key.
    pub address: Address,
    /// The derived public key.
    pub public_key: PublicKey,
    /// Channel id after this step.
    pub channel: ChannelId,
    /// Label consumed by this step.
    pub label: String,
}

/// Derive a single channel step from `base` under `parent`.
pub fn derive_channel_key(
    base: &PublicKey,
    label: &str,
    parent: &ChannelId,
) -> Result<ChannelKey, CoreError> {
    let channel = child_namehash(parent, label);
    let public_key = base
        .mul_scalar(&scalar_from_hash(&channel))
        .map_err(|_| CoreError::DerivationFailed(label.to_string()))?;

    Ok(ChannelKey {
        address: public_key.address(),
        public_key,
        channel,
        label: label.to_string(),
    })
}

/// Derive every step of `topic`, outermost label first.
///
/// The returned list is ordered deepest step first: `path[0]` carries the
/// final derived key and `path[0].channel == namehash(topic)` when `parent` is
/// the zero channel. An empty topic yields an empty list.
pub fn derive_channel_path(
    base: &PublicKey,
    topic: &str,
    parent: &ChannelId,
) -> Result<Vec<ChannelKey>, CoreError> {
    if topic.is_empty() {
        return Ok(Vec::new());
    }

    let mut path = Vec::new();
    let mut key = *base;
    let mut channel = *parent;

    for label in topic.rsplit('.') {
        let step = derive_channel_key(&key, label, &channel)?;
        key = step.public_key;
        channel = step.channel;
        path.push(step);
    }

    path.reverse();
    Ok(path)
}

/// The deepest derived key for `topic`, or `base` itself when there is no topic.
pub fn derive_channel_public_key(base: &PublicKey, topic: &str) -> Result<PublicKey, CoreError> {
    let path = derive_channel_path(base, topic, &ChannelId::ZERO)?;
    Ok(path.first().map(|step| step.public_key).unwrap_or(*base))
}

/// Secret counterpart of [`derive_channel_public_key`].
pub fn derive_channel_keypair(base: &Keypair, topic: &str) -> Result<Keypair, CoreError> {
    if topic.is_empty() {
        return Ok(base.clone());
    }

    let mut keypair = base.clone();
    let mut channel = ChannelId::ZERO;
    for label in topic.rsplit('.') {
        channel = child_namehash(&channel, label);
        keypair = keypair
            .mul_scalar(&scalar_from_hash(&channel))
            .map_err(|_| CoreError::DerivationFailed(label.to_string()))?;
    }
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namehash::namehash;

    fn base() -> PublicKey {
        Keypair::from_seed(&[0x42; 32]).public_key()
    }

    #[test]
    fn test_empty_topic_yields_nothing() {
        let path = derive_channel_path(&base(), "", &ChannelId::ZERO).unwrap();
        assert!(path.is_empty());
        assert_eq!(derive_channel_public_key(&base(), "").unwrap(), base());
    }

    #[test]
    fn test_path_is_deterministic() {
        let a = derive_channel_path(&base(), "a.b.c", &ChannelId::ZERO).unwrap();
        let b = derive_channel_path(&base(), "a.b.c", &ChannelId::ZERO).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_deepest_step_first() {
        let path = derive_channel_path(&base(), "a.b.c", &ChannelId::ZERO).unwrap();
        assert_eq!(path[0].label, "a");
        assert_eq!(path[2].label, "c");
        assert_eq!(path[0].channel, namehash("a.b.c"));
        assert_eq!(path[1].channel, namehash("b.c"));
        assert_eq!(path[2].channel, namehash("c"));
    }

    #[test]
    fn test_label_order_matters() {
        let forward = derive_channel_path(&base(), "a.b.c", &ChannelId::ZERO).unwrap();
        let backward = derive_channel_path(&base(), "c.b.a", &ChannelId::ZERO).unwrap();
        assert_ne!(forward[0].channel, backward[0].channel);
        assert_ne!(forward[0].public_key, backward[0].public_key);
    }

    #[test]
    fn test_steps_chain() {
        let path = derive_channel_path(&base(), "x.y", &ChannelId::ZERO).unwrap();
        let outer = derive_channel_key(&base(), "y", &ChannelId::ZERO).unwrap();
        let inner = derive_channel_key(&outer.public_key, "x", &outer.channel).unwrap();
        assert_eq!(path[1], outer);
        assert_eq!(path[0], inner);
        assert_eq!(inner.address, inner.public_key.address());
    }

    #[test]
    fn test_keypair_derivation_matches_public() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let derived = derive_channel_keypair(&keypair, "notes.alice").unwrap();
        let public = derive_channel_public_key(&keypair.public_key(), "notes.alice").unwrap();
        assert_eq!(derived.public_key(), public);
    }
}
