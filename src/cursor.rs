use crate::error::Result;
use crate::store::EventStore;

/// Scan position of one (contract, event) pair, derived from what is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub last_block: Option<u64>,
}

impl Cursor {
    /// First block to scan; `None` means from genesis.
    pub fn from_block(&self) -> Option<u64> {
        self.last_block.map(|block| block + 1)
    }
}

pub async fn resolve(store: &dyn EventStore, contract_address: &str, event: &str) -> Result<Cursor> {
    let latest = store.latest_for(contract_address, event).await?;
    Ok(Cursor {
        last_block: latest.and_then(|record| u64::try_from(record.block_number).ok()),
    })
}
