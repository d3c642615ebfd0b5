//! Signed commits: the off-chain pointer update record.
//!
//! A commit binds an issuer key to a content pointer at a revision. The
//! issuer signs a human-readable message over those three fields with an
//! Ethereum personal signature. When a topic is declared, the issuer key is
//! the channel key derived from the signer's base key along that topic, so a
//! single wallet can publish under many unlinkable-looking addresses.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_commit_bytes, decode_commit};
use crate::channel::derive_channel_public_key;
use crate::crypto::{recover_pubkey, sign_message_hash, Keypair, PublicKey, Signature};
use crate::error::CoreError;
use crate::namehash::namehash;
use crate::pointer::Pointer;
use crate::types::{decode_hex, encode_hex, Address, ChannelId, Hash32};

/// First line of every commit signing message.
pub const SIGMSG_HEADER: &str = "COMMIT crtx";

/// A pointer update, optionally signed and scoped to a channel topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Issuer public key (the note's identity).
    pub iss: PublicKey,
    /// Content pointer.
    pub ptr: Pointer,
    /// Caller-chosen revision, typically a millisecond timestamp.
    pub rev: u64,
    /// Recoverable signature over [`Commit::sighash`].
    pub sig: Option<Signature>,
    /// Channel topic the issuer key was derived along.
    pub sub: Option<String>,
}

impl Commit {
    /// Create an unsigned commit.
    ///
    /// With a topic, the issuer becomes the deepest channel key derived from
    /// `base` along it, which is exactly the key validation reconstructs from
    /// the recovered signer.
    pub fn create(
        base: &PublicKey,
        ptr: Pointer,
        rev: u64,
        topic: Option<&str>,
    ) -> Result<Self, CoreError> {
        let iss = match topic {
            Some(topic) => derive_channel_public_key(base, topic)?,
            None => *base,
        };

        Ok(Self {
            iss,
            ptr,
            rev,
            sig: None,
            sub: None,
        })
    }

    /// Attach a signature and the topic it was made under.
    pub fn sign(&mut self, sig: Signature, sub: Option<String>) {
        self.sig = Some(sig);
        self.sub = sub.filter(|s| !s.is_empty());
    }

    /// Sign with a base keypair under an optional topic.
    pub fn sign_with(&mut self, keypair: &Keypair, topic: Option<&str>) -> Result<(), CoreError> {
        let sig = keypair.sign_prehash(&self.sighash())?;
        self.sign(sig, topic.map(str::to_string));
        Ok(())
    }

    /// Address of the issuer.
    pub fn addr(&self) -> Address {
        self.iss.address()
    }

    /// `{addr}:{rev padded to 20 digits}`.
    pub fn id(&self) -> String {
        format!("{}:{:020}", self.addr(), self.rev)
    }

    /// The message a signer signs.
    pub fn sigmsg(&self) -> String {
        format!(
            "{}\nIssuer: {}\nPointer: {}\nRevision: {}",
            SIGMSG_HEADER,
            self.addr(),
            self.ptr,
            self.rev
        )
    }

    /// Personal-message hash of [`Commit::sigmsg`].
    pub fn sighash(&self) -> Hash32 {
        sign_message_hash(&self.sigmsg())
    }

    /// Recover the signer's base public key.
    pub fn signer(&self) -> Result<PublicKey, CoreError> {
        let sig = self.sig.as_ref().ok_or(CoreError::MissingSignature)?;
        recover_pubkey(sig, &self.sighash())
    }

    /// Address of the signer's base key (the acting account).
    pub fn act(&self) -> Option<Address> {
        self.signer().ok().map(|pk| pk.address())
    }

    /// Channel id of the declared topic.
    pub fn channel(&self) -> Option<ChannelId> {
        self.sub.as_deref().map(namehash)
    }

    /// Whether the signature authorizes the issuer.
    ///
    /// Missing or unrecoverable signatures are simply invalid.
    pub fn validate(&self) -> bool {
        let signer = match self.signer() {
            Ok(signer) => signer,
            Err(_) => return false,
        };

        let signer = match self.sub.as_deref() {
            Some(topic) => match derive_channel_public_key(&signer, topic) {
                Ok(derived) => derived,
                Err(_) => return false,
            },
            None => signer,
        };

        signer.address() == self.addr()
    }

    /// Canonical CBOR bytes.
    pub fn encode(&self) -> Vec<u8> {
        canonical_commit_bytes(self)
    }

    /// Canonical bytes as `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        encode_hex(self.encode())
    }

    /// Decode from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        decode_commit(bytes)
    }

    /// Decode from hex, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        Self::decode(&decode_hex(s.trim())?)
    }

    /// JSON view with derived fields.
    pub fn view(&self) -> CommitView {
        let signer = self.signer().ok();
        CommitView {
            id: self.id(),
            addr: self.addr(),
            iss: self.iss,
            ptr: self.ptr.clone(),
            rev: self.rev,
            sig: self.sig,
            sub: self.sub.clone(),
            act: signer.map(|pk| pk.address()),
            signer,
        }
    }
}

/// Serializable view of a commit, as served to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitView {
    pub id: String,
    pub addr: Address,
    pub iss: PublicKey,
    pub ptr: Pointer,
    pub rev: u64,
    pub sig: Option<Signature>,
    pub sub: Option<String>,
    pub act: Option<Address>,
    pub signer: Option<PublicKey>,
}
