//! Tests for the trove-bridge crate.

mod store_tests;

use std::sync::Arc;

use bytes::Bytes;
use trove_chain::{ChainContext, DataPartitionChain, StaticAuthorities};
use trove_crypto::{CryptoPort, DalekCrypto, PrivateKey, trust_of_public_write};
use trove_types::{EntityId, MessageData, MessageDataDigest, MessageDataHeader, ParentPolicyTable, PartitionKey};

fn test_partition() -> PartitionKey {
    PartitionKey::new("bridge-tests", 0)
}

fn test_context() -> ChainContext {
    ChainContext::new(
        Arc::new(ParentPolicyTable::new().claimable("Account")),
        Arc::new(DalekCrypto::new()),
        Arc::new(StaticAuthorities::new()),
    )
}

fn test_chain() -> Arc<DataPartitionChain> {
    Arc::new(DataPartitionChain::new(test_partition(), test_context()))
}

fn sign(header: MessageDataHeader, body: serde_json::Value, key: &PrivateKey) -> MessageData {
    let crypto = DalekCrypto::new();
    let payload = Bytes::from(serde_json::to_vec(&body).unwrap());
    let mut data = MessageData::new(header, None, Some(payload));
    let seed = crypto.random_bytes(16);
    let digest = crypto.hash(&seed, &data.digest_input().unwrap());
    data.digest = Some(MessageDataDigest {
        signature: crypto.sign(key.private_bytes(), &digest).unwrap(),
        seed,
        digest,
        public_key_hash: key.hash(),
    });
    data
}

/// A claimed account, which any chain accepts without prior keys.
fn claimed_account(name: &str) -> MessageData {
    let header = MessageDataHeader::new(EntityId::random(), "Account");
    sign(header, serde_json::json!({ "name": name }), trust_of_public_write())
}
