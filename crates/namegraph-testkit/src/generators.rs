//! Proptest generators for property-based testing.

use proptest::prelude::*;

use namegraph_core::{Address, Commit, Hash32, Keypair, Pointer};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random 32-byte hash.
pub fn hash32() -> impl Strategy<Value = Hash32> {
    any::<[u8; 32]>().prop_map(Hash32::from_bytes)
}

/// Generate a random address.
pub fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from_bytes)
}

/// Generate a single name label.
pub fn label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(String::from)
}

/// Generate a dotted name or topic of one to four labels.
pub fn dotted_name() -> impl Strategy<Value = String> {
    prop::collection::vec(label(), 1..=4).prop_map(|labels| labels.join("."))
}

/// Generate a CIDv1 pointer over a random sha2-256 digest.
pub fn cid_pointer() -> impl Strategy<Value = Pointer> {
    any::<[u8; 32]>().prop_map(|digest| {
        let mut bytes = vec![0x01, 0x55, 0x12, 0x20];
        bytes.extend_from_slice(&digest);
        Pointer::from_bytes(bytes).expect("generated pointer is non-empty")
    })
}

/// Parameters for generating a commit.
#[derive(Debug, Clone)]
pub struct CommitParams {
    pub seed: [u8; 32],
    pub pointer: Pointer,
    pub rev: u64,
    pub topic: Option<String>,
}

impl Arbitrary for CommitParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            cid_pointer(),
            0u64..=4_102_444_800_000u64, // through 2100
            proptest::option::of(dotted_name()),
        )
            .prop_map(|(seed, pointer, rev, topic)| CommitParams {
                seed,
                pointer,
                rev,
                topic,
            })
            .boxed()
    }
}

impl CommitParams {
    pub fn keypair(&self) -> Keypair {
        Keypair::from_seed(&self.seed)
    }

    /// The unsigned commit these parameters describe.
    pub fn unsigned(&self) -> Commit {
        Commit::create(
            &self.keypair().public_key(),
            self.pointer.clone(),
            self.rev,
            self.topic.as_deref(),
        )
        .expect("generated topics derive")
    }

    /// The commit signed by its base key.
    pub fn signed(&self) -> Commit {
        let mut commit = self.unsigned();
        commit
            .sign_with(&self.keypair(), self.topic.as_deref())
            .expect("generated keys sign");
        commit
    }
}
