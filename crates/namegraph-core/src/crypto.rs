//! Cryptographic primitives for Namegraph.
//!
//! Wraps secp256k1 keys and recoverable ECDSA signatures with strong types,
//! plus keccak-256 hashing and Ethereum-style address derivation.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::group::Curve;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{FieldBytes, NonZeroScalar, Scalar, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::error::CoreError;
use crate::types::{decode_hex, encode_hex, Address, Hash32};

/// Compute the keccak-256 digest of the given data.
pub fn keccak256(data: impl AsRef<[u8]>) -> Hash32 {
    Hash32(Keccak256::digest(data.as_ref()).into())
}

/// Hash of a personal message, as covered by an Ethereum `personal_sign`.
///
/// `keccak256("\x19Ethereum Signed Message:\n" || len(msg) || msg)`
pub fn sign_message_hash(msg: &str) -> Hash32 {
    keccak256(format!("\x19Ethereum Signed Message:\n{}{}", msg.len(), msg))
}

/// Interpret a 32-byte value as a big-endian scalar, reduced mod n.
pub fn scalar_from_hash(hash: &Hash32) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(hash.0))
}

/// A secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(k256::PublicKey);

impl PublicKey {
    /// Parse a SEC1 encoded point (33-byte compressed or 65-byte uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        k256::PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CoreError::InvalidPublicKey)
    }

    /// Parse from hex, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        Self::from_sec1_bytes(&decode_hex(s)?)
    }

    /// 65-byte uncompressed SEC1 encoding (`0x04 || x || y`).
    pub fn to_uncompressed(&self) -> [u8; 65] {
        let point = self.0.to_encoded_point(false);
        let mut out = [0u8; 65];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// 33-byte compressed SEC1 encoding.
    pub fn to_compressed(&self) -> [u8; 33] {
        let point = self.0.to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Uncompressed encoding as `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        encode_hex(self.to_uncompressed())
    }

    /// The account address controlled by this key.
    pub fn address(&self) -> Address {
        derive_address(self)
    }

    /// Multiply the point by a scalar.
    ///
    /// Fails only when the product is the identity, i.e. the scalar is zero.
    pub fn mul_scalar(&self, scalar: &Scalar) -> Result<Self, CoreError> {
        let point = (self.0.to_projective() * *scalar).to_affine();
        k256::PublicKey::from_affine(point)
            .map(Self)
            .map_err(|_| CoreError::InvalidPublicKey)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", &self.to_hex()[..18])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Last 20 bytes of keccak-256 over the uncompressed point without its prefix.
pub fn derive_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.to_uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    Address::from_word(&digest)
}

/// A 65-byte recoverable signature: `r || s || v`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    /// Build from a slice of exactly 65 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; 65] = bytes.try_into().map_err(|_| CoreError::InvalidSignature)?;
        Ok(Self(arr))
    }

    /// Parse from hex, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        Self::from_slice(&decode_hex(s)?)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// Convert to `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        encode_hex(self.0)
    }

    /// The recovery byte, in whichever convention the signer used.
    pub fn v(&self) -> u8 {
        self.0[64]
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..18])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Recover the public key that produced `signature` over `hash`.
///
/// The recovery byte may use either the `{0, 1}` or the `{27, 28}` convention.
/// High-s signatures are normalized before recovery.
pub fn recover_pubkey(signature: &Signature, hash: &Hash32) -> Result<PublicKey, CoreError> {
    let v = signature.v();
    let v = if v < 27 { v + 27 } else { v };
    let recovery_id = RecoveryId::from_byte(1 - (v % 2)).ok_or(CoreError::InvalidSignature)?;

    let sig =
        EcdsaSignature::from_slice(&signature.0[..64]).map_err(|_| CoreError::InvalidSignature)?;

    let (sig, recovery_id) = match sig.normalize_s() {
        Some(low) => (
            low,
            RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
        ),
        None => (sig, recovery_id),
    };

    let verifying_key = VerifyingKey::recover_from_prehash(hash.as_bytes(), &sig, recovery_id)
        .map_err(|_| CoreError::InvalidSignature)?;

    Ok(PublicKey(k256::PublicKey::from(&verifying_key)))
}

/// A secp256k1 keypair for signing commits.
///
/// This wraps k256's SigningKey.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::random(&mut rng),
        }
    }

    /// Create deterministically from a 32-byte seed.
    ///
    /// Seeds that are not a valid secret scalar are re-hashed until one is.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut material = *seed;
        loop {
            if let Ok(signing_key) = SigningKey::from_bytes(&FieldBytes::from(material)) {
                return Self { signing_key };
            }
            material = keccak256(material).0;
        }
    }

    /// Create from a raw secret scalar.
    pub fn from_secret(secret: &[u8]) -> Result<Self, CoreError> {
        SigningKey::from_slice(secret)
            .map(|signing_key| Self { signing_key })
            .map_err(|_| CoreError::InvalidPublicKey)
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(k256::PublicKey::from(self.signing_key.verifying_key()))
    }

    /// Get the account address.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Sign a 32-byte prehash, producing `r || s || v` with `v` in `{27, 28}`.
    pub fn sign_prehash(&self, hash: &Hash32) -> Result<Signature, CoreError> {
        let (sig, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash.as_bytes())
            .map_err(|_| CoreError::InvalidSignature)?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recovery_id.to_byte() + 27;
        Ok(Signature(out))
    }

    /// Sign a personal message (see [`sign_message_hash`]).
    pub fn sign_message(&self, msg: &str) -> Result<Signature, CoreError> {
        self.sign_prehash(&sign_message_hash(msg))
    }

    /// Multiply the secret by a scalar.
    ///
    /// The resulting keypair's public key equals `public_key().mul_scalar(scalar)`.
    pub fn mul_scalar(&self, scalar: &Scalar) -> Result<Self, CoreError> {
        let secret: Scalar = *self.signing_key.as_nonzero_scalar().as_ref() * *scalar;
        let secret = Option::<NonZeroScalar>::from(NonZeroScalar::new(secret))
            .ok_or(CoreError::InvalidPublicKey)?;
        Ok(Self {
            signing_key: SigningKey::from(secret),
        })
    }

    /// Get the raw secret scalar bytes.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}
