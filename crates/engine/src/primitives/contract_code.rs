//! Contract code
//!
//! One chain per contract. Each version stores the deployed bytecode with a
//! SHA-256 content hash computed here, and optionally the code hash the
//! chain reports (keccak-256 on EVM chains). The two are never compared:
//! the local hash guards the stored bytes, the chain hash is kept as given.
//! A redeploy or upgrade supersedes the previous code.

use super::fact::VersionedFact;
use chainstate_core::{Bytes, ContractId, Payload, RowSnapshot, StoreResult, Table};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Bytecode and its hashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    /// Raw bytecode
    pub code: Bytes,
    /// Local SHA-256 of `code`; not the on-chain code hash
    pub hash: Bytes,
    /// Code hash as reported by the chain, stored verbatim
    pub chain_hash: Option<Bytes>,
}

impl Code {
    /// Code with its local hash computed
    pub fn new(code: impl Into<Bytes>) -> Self {
        let code = code.into();
        let hash = content_hash(&code);
        Code {
            code,
            hash,
            chain_hash: None,
        }
    }

    /// Attach the code hash reported by the chain
    pub fn with_chain_hash(mut self, chain_hash: impl Into<Bytes>) -> Self {
        self.chain_hash = Some(chain_hash.into());
        self
    }

    /// Whether the local hash matches `code`
    pub fn verify(&self) -> bool {
        content_hash(&self.code) == self.hash
    }
}

fn content_hash(code: &Bytes) -> Bytes {
    Bytes::from(Sha256::digest(code.as_slice()).to_vec())
}

impl Payload for Code {
    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("code", &self.code)
            .set("hash", &self.hash)
            .set(
                "chain_hash",
                self.chain_hash.as_ref().map_or(Value::Null, Value::from),
            );
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(Code {
            code: row.decode("code")?,
            hash: row.decode("hash")?,
            chain_hash: row.decode("chain_hash")?,
        })
    }
}

/// A contract's code as observed by ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCode {
    /// Contract the code is deployed at
    pub contract: ContractId,
    /// Deployed code
    pub code: Code,
}

impl ContractCode {
    /// Code fact for `contract`, hashing `code` locally
    pub fn new(contract: ContractId, code: impl Into<Bytes>) -> Self {
        ContractCode {
            contract,
            code: Code::new(code),
        }
    }

    /// Code fact carrying the hash the chain reports for `code`
    pub fn with_chain_hash(
        contract: ContractId,
        code: impl Into<Bytes>,
        chain_hash: impl Into<Bytes>,
    ) -> Self {
        ContractCode {
            contract,
            code: Code::new(code).with_chain_hash(chain_hash),
        }
    }

    /// Whether the local hash matches the code
    pub fn verify(&self) -> bool {
        self.code.verify()
    }
}

impl VersionedFact for ContractCode {
    type Identity = ContractId;
    type Payload = Code;
    const TABLE: Table = Table::ContractCode;

    fn identity(&self) -> ContractId {
        self.contract.clone()
    }

    fn into_payload(self) -> Code {
        self.code
    }
}
