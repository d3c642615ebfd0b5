//! Canonical CBOR encoding for commits.
//!
//! A commit is a definite-length CBOR array:
//!
//! ```text
//! [ iss: bytes, ptr: bytes, rev: uint, sig: bytes?, sub: text? ]
//! ```
//!
//! Absent trailing fields are omitted. Integers use their smallest encoding,
//! so the same commit always produces identical bytes. Decoding is strict:
//! anything other than an array of 3 to 5 correctly typed items, followed by
//! nothing, is rejected.

use ciborium::value::Value;

use crate::commit::Commit;
use crate::crypto::{PublicKey, Signature};
use crate::error::CoreError;
use crate::pointer::Pointer;

/// Encode a commit to canonical CBOR bytes.
pub fn canonical_commit_bytes(commit: &Commit) -> Vec<u8> {
    let value = commit_to_cbor_value(commit);
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &value);
    buf
}

/// Convert a commit to a CBOR array value.
fn commit_to_cbor_value(commit: &Commit) -> Value {
    let mut items = Vec::with_capacity(5);

    items.push(Value::Bytes(commit.iss.to_uncompressed().to_vec()));
    items.push(Value::Bytes(commit.ptr.as_bytes().to_vec()));
    items.push(Value::Integer(commit.rev.into()));

    if let Some(sig) = &commit.sig {
        items.push(Value::Bytes(sig.0.to_vec()));
    }
    if let Some(sub) = &commit.sub {
        items.push(Value::Text(sub.clone()));
    }

    Value::Array(items)
}

/// Recursively encode a CBOR value.
///
/// Only the types a commit can contain are supported; anything else is
/// written as `null`.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => {
            encode_integer(buf, *i);
        }
        Value::Bytes(b) => {
            encode_bytes(buf, b);
        }
        Value::Text(s) => {
            encode_text(buf, s);
        }
        Value::Array(arr) => {
            encode_array(buf, arr);
        }
        _ => {
            buf.push(0xf6);
        }
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode an array (major type 4).
fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Decode a commit from CBOR bytes.
pub fn decode_commit(bytes: &[u8]) -> Result<Commit, CoreError> {
    let mut reader = bytes;
    let value: Value =
        ciborium::from_reader(&mut reader).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    if !reader.is_empty() {
        return Err(CoreError::MalformedCommit(format!(
            "{} trailing bytes",
            reader.len()
        )));
    }

    cbor_value_to_commit(&value)
}

/// Convert a CBOR value (array) back to a Commit.
fn cbor_value_to_commit(value: &Value) -> Result<Commit, CoreError> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Err(CoreError::MalformedCommit("expected array".into())),
    };

    if items.len() < 3 || items.len() > 5 {
        return Err(CoreError::MalformedCommit(format!(
            "expected 3 to 5 fields, got {}",
            items.len()
        )));
    }

    // 0: iss
    let iss = match &items[0] {
        Value::Bytes(b) => PublicKey::from_sec1_bytes(b)
            .map_err(|_| CoreError::MalformedCommit("invalid iss".into()))?,
        _ => return Err(CoreError::MalformedCommit("iss must be bytes".into())),
    };

    // 1: ptr
    let ptr = match &items[1] {
        Value::Bytes(b) => Pointer::from_bytes(b.clone())
            .map_err(|_| CoreError::MalformedCommit("invalid ptr".into()))?,
        _ => return Err(CoreError::MalformedCommit("ptr must be bytes".into())),
    };

    // 2: rev
    let rev = match &items[2] {
        Value::Integer(i) => {
            let n: i128 = (*i).into();
            u64::try_from(n).map_err(|_| CoreError::MalformedCommit("rev out of range".into()))?
        }
        _ => return Err(CoreError::MalformedCommit("rev must be an integer".into())),
    };

    // 3..: sig then sub, each optional; a text item at 3 is a sub without sig
    let mut sig = None;
    let mut sub = None;
    for item in &items[3..] {
        match item {
            Value::Bytes(b) if sig.is_none() && sub.is_none() => {
                sig = Some(
                    Signature::from_slice(b)
                        .map_err(|_| CoreError::MalformedCommit("invalid sig".into()))?,
                );
            }
            Value::Text(s) if sub.is_none() => {
                sub = Some(s.clone());
            }
            _ => return Err(CoreError::MalformedCommit("unexpected trailing field".into())),
        }
    }

    Ok(Commit {
        iss,
        ptr,
        rev,
        sig,
        sub,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    const PTR: &str = "bafybeihe67oiezjclcok2toyvbypldy4rhe4jybc6kydf75cnvvu2424zu";

    fn sample() -> Commit {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        Commit::create(&keypair.public_key(), Pointer::parse(PTR).unwrap(), 1000, None).unwrap()
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();

        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 1000);
        assert_eq!(buf, vec![0x19, 0x03, 0xe8]);

        buf.clear();
        encode_uint(&mut buf, 0, 1_700_000_000_000);
        assert_eq!(buf[0], 0x1b);
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn test_unsigned_layout() {
        let bytes = canonical_commit_bytes(&sample());
        // array(3), bytes(65) header
        assert_eq!(bytes[0], 0x83);
        assert_eq!(&bytes[1..3], &[0x58, 65]);
        assert_eq!(bytes[3], 0x04);
        assert_eq!(&bytes[bytes.len() - 3..], &[0x19, 0x03, 0xe8]);
    }

    #[test]
    fn test_deterministic() {
        let commit = sample();
        assert_eq!(canonical_commit_bytes(&commit), canonical_commit_bytes(&commit));
    }

    #[test]
    fn test_rejects_non_array() {
        let mut buf = Vec::new();
        encode_text(&mut buf, "hello");
        assert!(matches!(decode_commit(&buf), Err(CoreError::MalformedCommit(_))));
    }

    #[test]
    fn test_rejects_short_array() {
        let mut buf = Vec::new();
        encode_array(&mut buf, &[Value::Bytes(vec![1]), Value::Bytes(vec![2])]);
        assert!(matches!(decode_commit(&buf), Err(CoreError::MalformedCommit(_))));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = canonical_commit_bytes(&sample());
        bytes.push(0x00);
        assert!(matches!(decode_commit(&bytes), Err(CoreError::MalformedCommit(_))));
    }

    #[test]
    fn test_rejects_truncated() {
        let bytes = canonical_commit_bytes(&sample());
        assert!(decode_commit(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_rejects_wrong_types() {
        let commit = sample();
        let mut buf = Vec::new();
        encode_array(
            &mut buf,
            &[
                Value::Bytes(commit.iss.to_uncompressed().to_vec()),
                Value::Text(PTR.into()),
                Value::Integer(1000.into()),
            ],
        );
        assert!(matches!(decode_commit(&buf), Err(CoreError::MalformedCommit(_))));
    }

    #[test]
    fn test_sub_without_sig() {
        let mut commit = sample();
        commit.sub = Some("notes".into());
        let decoded = decode_commit(&canonical_commit_bytes(&commit)).unwrap();
        assert_eq!(decoded, commit);
        assert!(decoded.sig.is_none());
    }

    fn raw_pointer(digest: [u8; 32]) -> Pointer {
        let mut bytes = vec![0x01, 0x55, 0x12, 0x20];
        bytes.extend_from_slice(&digest);
        Pointer::from_bytes(bytes).unwrap()
    }

    proptest::proptest! {
        #[test]
        fn decode_inverts_encode(
            seed in proptest::prelude::any::<[u8; 32]>(),
            digest in proptest::prelude::any::<[u8; 32]>(),
            rev in proptest::prelude::any::<u64>(),
            signed in proptest::prelude::any::<bool>(),
            topic in proptest::option::of("[a-z]{1,8}(\\.[a-z]{1,8}){0,2}"),
        ) {
            let keypair = Keypair::from_seed(&seed);
            let topic = topic.as_deref();
            let mut commit =
                Commit::create(&keypair.public_key(), raw_pointer(digest), rev, topic).unwrap();
            if signed {
                commit.sign_with(&keypair, topic).unwrap();
            }

            let decoded = decode_commit(&canonical_commit_bytes(&commit)).unwrap();
            proptest::prop_assert_eq!(decoded, commit);
        }
    }
}
