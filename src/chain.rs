use std::str::FromStr;

use alloy::network::TransactionResponse;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log as RpcLog};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

type RPCProvider = FillProvider<JoinFill<Identity, JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>>, RootProvider>;

/// A mined event log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
}

impl RawLog {
    /// `None` for a log that is not mined yet (no block number, log index or tx hash).
    pub fn from_rpc(log: RpcLog) -> Option<Self> {
        let (Some(block_number), Some(log_index), Some(transaction_hash)) =
            (log.block_number, log.log_index, log.transaction_hash)
        else {
            return None;
        };

        Some(Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number,
            log_index,
            transaction_hash,
        })
    }
}

/// Logs of one event of one contract, from `from_block` (genesis when unset) up to the chain head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic: B256,
    pub from_block: Option<u64>,
}

impl LogFilter {
    pub fn to_rpc_filter(&self) -> Filter {
        Filter::new()
            .address(self.address)
            .event_signature(self.topic)
            .from_block(self.from_block.unwrap_or(0))
            .to_block(BlockNumberOrTag::Latest)
    }
}

/// Read side of the blockchain used by the watchers.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>>;

    /// Sender of a transaction, `None` if the node does not know the hash.
    async fn transaction_sender(&self, hash: B256) -> Result<Option<Address>>;
}

/// `ChainReader` over an Alloy HTTP provider.
pub struct AlloyChainReader {
    provider: RPCProvider,
    rpc_url: String,
}

impl AlloyChainReader {
    pub fn connect(rpc_url: &str) -> Result<Self> {
        let url = reqwest::Url::from_str(rpc_url)
            .map_err(|e| RelayError::Configuration(format!("Invalid RPC URL '{}': {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url);
        info!("Connecting to RPC endpoint: http: {}", rpc_url);

        Ok(Self {
            provider,
            rpc_url: rpc_url.to_string(),
        })
    }
}

#[async_trait]
impl ChainReader for AlloyChainReader {
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let logs = self
            .provider
            .get_logs(&filter.to_rpc_filter())
            .await
            .map_err(|e| RelayError::Rpc(format!("eth_getLogs on {} failed: {}", self.rpc_url, e)))?;
        debug!("Received {} logs from contract {:#x}", logs.len(), filter.address);

        let mut raw_logs = Vec::with_capacity(logs.len());
        for log in logs {
            let address = log.address();
            match RawLog::from_rpc(log) {
                Some(raw) => raw_logs.push(raw),
                None => warn!("Skipping log from {:#x}: not mined yet", address),
            }
        }
        Ok(raw_logs)
    }

    async fn transaction_sender(&self, hash: B256) -> Result<Option<Address>> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| RelayError::Rpc(format!("eth_getTransactionByHash {:#x} failed: {}", hash, e)))?;
        Ok(tx.map(|tx| tx.from()))
    }
}
