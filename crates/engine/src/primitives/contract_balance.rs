//! Contract balance
//!
//! One chain per contract; each version carries the native balance as raw
//! big-endian bytes.

use super::fact::VersionedFact;
use chainstate_core::{Bytes, ContractId, Payload, RowSnapshot, StoreResult, Table};

/// Native balance of a contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance(pub Bytes);

impl Balance {
    /// Balance from an integer amount
    pub fn from_u128(amount: u128) -> Self {
        let raw = amount.to_be_bytes();
        let first = raw.iter().position(|b| *b != 0).unwrap_or(raw.len() - 1);
        Balance(Bytes::from(&raw[first..]))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl Payload for Balance {
    fn write_fields(&self, row: &mut RowSnapshot) {
        row.set("balance", &self.0);
    }

    fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        row.decode("balance").map(Balance)
    }
}

/// A contract's balance as observed by ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractBalance {
    /// Contract holding the balance
    pub contract: ContractId,
    /// Observed balance
    pub balance: Balance,
}

impl ContractBalance {
    /// Balance fact for `contract`
    pub fn new(contract: ContractId, balance: Balance) -> Self {
        ContractBalance { contract, balance }
    }
}

impl VersionedFact for ContractBalance {
    type Identity = ContractId;
    type Payload = Balance;
    const TABLE: Table = Table::ContractBalance;

    fn identity(&self) -> ContractId {
        self.contract.clone()
    }

    fn into_payload(self) -> Balance {
        self.balance
    }
}
