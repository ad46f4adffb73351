//! Boundary trait for the wallet-backed chain client.
//!
//! The orchestrator never talks to an RPC endpoint or a signer directly; it
//! drives this trait. A production implementation wraps a wallet session and
//! per-chain providers. Tests substitute a mock that records calls and
//! returns scripted results.
//!
//! The active-chain selection is globally mutable (the user can switch chains
//! out-of-band at any time), which is why [`ChainClient::active_chain`] is
//! re-read immediately before every chain-sensitive submission instead of
//! being captured once.

use std::fmt::{Display, Formatter};

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Native chain identifier (EVM chain id), distinct from the CCTP domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Parameters for a `TokenMessengerV2.depositForBurn()` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnRequest {
    /// Amount of USDC to burn (smallest unit, 6 decimals).
    pub amount: U256,
    /// CCTP domain of the destination chain.
    pub destination_domain: u32,
    /// Recipient of the mint on the destination chain.
    pub mint_recipient: Address,
    /// USDC contract on the source chain.
    pub burn_token: Address,
    /// Maximum fee the transfer may pay, in smallest units.
    pub max_fee: U256,
    /// 1000 selects fast transfer, 2000 standard finality.
    pub min_finality_threshold: u32,
}

/// Errors surfaced by a chain client implementation.
///
/// These are classified into the transfer error taxonomy at the orchestrator
/// boundary; raw transport messages are never shown to users.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChainClientError {
    /// The user declined to sign the transaction.
    #[error("Transaction rejected by signer")]
    Rejected,
    #[error("Insufficient funds for transaction")]
    InsufficientFunds,
    /// The contract reverted; the payload is the decoded revert reason.
    #[error("Contract reverted: {0}")]
    Reverted(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Chain {0} is not available in the wallet session")]
    UnsupportedChain(ChainId),
}

/// Read/submit operations against a signing wallet and per-chain providers.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// USDC balance of `owner` on `chain`.
    async fn balance_of(
        &self,
        chain: ChainId,
        token: Address,
        owner: Address,
    ) -> Result<U256, ChainClientError>;

    /// Current spend allowance granted by `owner` to `spender`.
    async fn allowance(
        &self,
        chain: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainClientError>;

    /// Submits an ERC-20 approval and returns its transaction hash.
    async fn approve(
        &self,
        chain: ChainId,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash, ChainClientError>;

    /// Submits `depositForBurn()` on the source chain's token messenger.
    async fn deposit_for_burn(
        &self,
        chain: ChainId,
        request: BurnRequest,
    ) -> Result<TxHash, ChainClientError>;

    /// Submits `receiveMessage()` on the destination chain's message
    /// transmitter, releasing the minted balance.
    async fn receive_message(
        &self,
        chain: ChainId,
        message: Bytes,
        attestation: Bytes,
    ) -> Result<TxHash, ChainClientError>;

    /// Waits until the given transaction is confirmed.
    async fn wait_for_confirmation(
        &self,
        chain: ChainId,
        tx_hash: TxHash,
    ) -> Result<(), ChainClientError>;

    /// The wallet session's currently active chain.
    async fn active_chain(&self) -> Result<ChainId, ChainClientError>;

    /// Asks the wallet session to switch its active chain.
    async fn request_switch_chain(&self, chain: ChainId) -> Result<(), ChainClientError>;
}
