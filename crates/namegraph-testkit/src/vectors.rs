//! Golden test vectors for deterministic verification.
//!
//! Name hashes follow the ENS reference values and addresses the Ethereum
//! ones, so any implementation that interoperates with those ecosystems
//! must reproduce them byte for byte.

use namegraph_core::{keccak256, namehash, Keypair};

/// What a vector computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    /// `keccak256(input)`.
    Keccak,
    /// `namehash(input)`.
    Namehash,
    /// Address of the secret key given as hex input.
    Address,
}

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub kind: VectorKind,
    pub input: &'static str,
    /// Expected output (hex, no prefix).
    pub expected: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "keccak of empty input",
            kind: VectorKind::Keccak,
            input: "",
            expected: "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470",
        },
        GoldenVector {
            name: "namehash of the root",
            kind: VectorKind::Namehash,
            input: "",
            expected: "0000000000000000000000000000000000000000000000000000000000000000",
        },
        GoldenVector {
            name: "namehash of eth",
            kind: VectorKind::Namehash,
            input: "eth",
            expected: "93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae",
        },
        GoldenVector {
            name: "namehash of foo.eth",
            kind: VectorKind::Namehash,
            input: "foo.eth",
            expected: "de9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f",
        },
        GoldenVector {
            name: "address of secret 1",
            kind: VectorKind::Address,
            input: "0000000000000000000000000000000000000000000000000000000000000001",
            expected: "7e5f4552091a69125d5dfcb7b8c2659029395bdf",
        },
        GoldenVector {
            name: "address of secret 2",
            kind: VectorKind::Address,
            input: "0000000000000000000000000000000000000000000000000000000000000002",
            expected: "2b5ad5c4795c026514f8317c7a215e218dccd6cf",
        },
    ]
}

/// Compute a vector's output as unprefixed hex.
pub fn compute(vector: &GoldenVector) -> String {
    let bytes: Vec<u8> = match vector.kind {
        VectorKind::Keccak => keccak256(vector.input.as_bytes()).0.to_vec(),
        VectorKind::Namehash => namehash(vector.input).0.to_vec(),
        VectorKind::Address => {
            let secret = hex::decode(vector.input).expect("vector secrets are hex");
            let keypair = Keypair::from_secret(&secret).expect("vector secrets are valid scalars");
            keypair.address().0.to_vec()
        }
    };
    hex::encode(bytes)
}

/// Verify all golden vectors.
///
/// Returns `(name, matches, actual)` for each vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let actual = compute(v);
            (v.name.to_string(), actual == v.expected, actual)
        })
        .collect()
}
