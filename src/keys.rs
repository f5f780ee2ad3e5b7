use std::{
    fmt,
    str::FromStr,
};
use k256::ecdsa::{
    SigningKey,
    VerifyingKey,
};
use serde::{
    Serialize, Deserialize
};
use sha2::{
    Digest, Sha256
};

const USER_KEY_DOMAIN: &[u8] = b"nillion/user-key";
const NODE_KEY_DOMAIN: &[u8] = b"nillion/node-key";

// identifiers are the leading 20 bytes of sha256(compressed public key)
const IDENTIFIER_LEN: usize = 20;

// deterministic secp256k1 key from a seed; the counter is bumped in the
// (astronomically unlikely) case the digest is not a valid scalar
fn derive_signing_key(domain: &[u8], seed: &str) -> SigningKey {
    let mut counter = 0u32;
    loop {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(seed.as_bytes());
        hasher.update(counter.to_be_bytes());
        let digest = hasher.finalize();
        if let Ok(key) = SigningKey::from_slice(&digest) {
            return key;
        }
        counter += 1;
    }
}

pub(crate) fn identifier_of(key: &VerifyingKey) -> [u8; IDENTIFIER_LEN] {
    let digest = Sha256::digest(key.to_encoded_point(true).as_bytes());
    let mut id = [0u8; IDENTIFIER_LEN];
    id.copy_from_slice(&digest[..IDENTIFIER_LEN]);
    id
}

fn parse_identifier(s: &str) -> Result<[u8; IDENTIFIER_LEN], hex::FromHexError> {
    let mut id = [0u8; IDENTIFIER_LEN];
    hex::decode_to_slice(s, &mut id)?;
    Ok(id)
}

/// Identifies a user towards the cluster; owner of programs and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId([u8; IDENTIFIER_LEN]);

impl UserId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for UserId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_identifier(s).map(Self)
    }
}

/// Identifies the node a client talks through; used to bind program parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyId([u8; IDENTIFIER_LEN]);

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PartyId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_identifier(s).map(Self)
    }
}

#[derive(Clone)]
pub struct UserKey {
    signing_key: SigningKey,
}

impl UserKey {
    pub fn from_seed(seed: &str) -> Self {
        Self {
            signing_key: derive_signing_key(USER_KEY_DOMAIN, seed),
        }
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn user_id(&self) -> UserId {
        UserId(identifier_of(self.verifying_key()))
    }
}

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserKey")
            .field("user_id", &self.user_id())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct NodeKey {
    signing_key: SigningKey,
}

impl NodeKey {
    pub fn from_seed(seed: &str) -> Self {
        Self {
            signing_key: derive_signing_key(NODE_KEY_DOMAIN, seed),
        }
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn party_id(&self) -> PartyId {
        PartyId(identifier_of(self.verifying_key()))
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKey")
            .field("party_id", &self.party_id())
            .finish_non_exhaustive()
    }
}
