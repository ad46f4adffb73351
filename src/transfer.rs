//! Transfer domain types: the persistent record, its status lifecycle, the
//! attestation payload, and the status surface published to callers.
//!
//! # Status flow
//!
//! ```text
//! idle -> switching_chain -> approving -> burning -> waiting_attestation
//!      -> attestation_ready -> minting -> completed
//! ```
//!
//! `error` is reachable from every non-terminal state. The single sanctioned
//! regression is `minting -> attestation_ready` when a redemption fails, so
//! the attestation is never lost and a retry needs no re-poll.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::ChainId;

/// Opaque, collision-resistant transfer identifier, assigned at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(pub Uuid);

impl TransferId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for TransferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(value)?))
    }
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Idle,
    SwitchingChain,
    Approving,
    Burning,
    WaitingAttestation,
    AttestationReady,
    Minting,
    Completed,
    Error,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SwitchingChain => "switching_chain",
            Self::Approving => "approving",
            Self::Burning => "burning",
            Self::WaitingAttestation => "waiting_attestation",
            Self::AttestationReady => "attestation_ready",
            Self::Minting => "minting",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Position along the happy path, used to detect status regressions when
    /// a live session and a recovery sweep write concurrently. `Error` ranks
    /// alongside `Idle` because an errored transfer may be restarted.
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle | Self::Error => 0,
            Self::SwitchingChain => 1,
            Self::Approving => 2,
            Self::Burning => 3,
            Self::WaitingAttestation => 4,
            Self::AttestationReady => 5,
            Self::Minting => 6,
            Self::Completed => 7,
        }
    }

    /// Completed records accept no further mutation except removal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl Display for TransferStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown transfer status: {0}")]
pub struct ParseTransferStatusError(pub String);

impl FromStr for TransferStatus {
    type Err = ParseTransferStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(Self::Idle),
            "switching_chain" => Ok(Self::SwitchingChain),
            "approving" => Ok(Self::Approving),
            "burning" => Ok(Self::Burning),
            "waiting_attestation" => Ok(Self::WaitingAttestation),
            "attestation_ready" => Ok(Self::AttestationReady),
            "minting" => Ok(Self::Minting),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(ParseTransferStatusError(other.to_string())),
        }
    }
}

/// Status reported by the attestation service for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    Pending,
    PendingConfirmations,
    Complete,
}

/// Signed attestation payload retrieved from the attestation service.
///
/// `message` and `attestation` together are the arguments to
/// `receiveMessage()` on the destination chain. The remaining fields are
/// surfaced for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub message: Bytes,
    pub attestation: Bytes,
    pub status: AttestationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cctp_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_reason: Option<String>,
}

/// A transfer as requested by the caller, before any chain interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub owner: Address,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    /// Smallest-unit USDC amount (6 decimals).
    pub amount: U256,
    pub destination_address: Address,
    /// Fast transfers pay a per-chain fee for ~30 second finality;
    /// standard transfers are free but wait for full source finality.
    pub use_fast_transfer: bool,
}

/// The persistent unit of work tracked by the ledger.
///
/// A record is created in memory when a transfer is initiated but only
/// persisted once the burn transaction confirms; pre-burn failures never
/// leave a durable trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub id: TransferId,
    pub owner_address: Address,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub amount: U256,
    pub destination_address: Address,
    pub burn_tx_hash: Option<TxHash>,
    pub mint_tx_hash: Option<TxHash>,
    pub status: TransferStatus,
    pub error: Option<String>,
    pub attestation: Option<Attestation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Fresh record for a just-validated request.
    pub fn new(request: &TransferRequest) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::generate(),
            owner_address: request.owner,
            source_chain: request.source_chain,
            destination_chain: request.destination_chain,
            amount: request.amount,
            destination_address: request.destination_address,
            burn_tx_hash: None,
            mint_tx_hash: None,
            status: TransferStatus::Idle,
            error: None,
            attestation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Age since the last mutation, as seen at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }
}

/// Snapshot published to the presentation layer on every transition.
///
/// This is the sole contract the (out of scope) UI depends on; it is pushed
/// through a `tokio::sync::watch` channel so late subscribers always observe
/// the latest state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStatusUpdate {
    pub status: Option<TransferStatus>,
    /// Hash of the most recent non-burn transaction (e.g. the approval).
    pub tx_hash: Option<TxHash>,
    pub burn_tx_hash: Option<TxHash>,
    pub mint_tx_hash: Option<TxHash>,
    pub error: Option<String>,
    pub attestation: Option<Attestation>,
}

impl TransferStatusUpdate {
    pub fn idle() -> Self {
        Self {
            status: Some(TransferStatus::Idle),
            ..Self::default()
        }
    }

    pub fn of(status: TransferStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_tx(mut self, tx_hash: TxHash) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }

    pub fn with_burn_tx(mut self, burn_tx_hash: TxHash) -> Self {
        self.burn_tx_hash = Some(burn_tx_hash);
        self
    }

    pub fn with_mint_tx(mut self, mint_tx_hash: TxHash) -> Self {
        self.mint_tx_hash = Some(mint_tx_hash);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_attestation(mut self, attestation: Attestation) -> Self {
        self.attestation = Some(attestation);
        self
    }
}
