//! Transfer error taxonomy.
//!
//! Chain client and attestation failures are classified here at the
//! orchestrator boundary: every error carries a short, non-technical user
//! message, while the `Display` form keeps enough detail for logs. The only
//! errors that intentionally name raw values are the chain-mismatch variants,
//! which must tell the user which chain to switch to.

use crate::chain::{ChainClientError, ChainId};
use crate::registry::UnknownChainError;

/// Request validation failures, raised before any chain interaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Transfer amount must be greater than zero")]
    ZeroAmount,
    #[error("Source and destination chain are both {0}")]
    SameChain(ChainId),
    #[error(transparent)]
    UnknownChain(#[from] UnknownChainError),
}

/// Ledger persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Stored amount is not a valid integer: {0}")]
    InvalidAmount(alloy::primitives::ruint::ParseError),
    #[error("Stored hash is not valid hex: {0}")]
    InvalidHash(#[from] alloy::hex::FromHexError),
    #[error(transparent)]
    InvalidStatus(#[from] crate::transfer::ParseTransferStatusError),
    #[error("Stored transfer id is not a valid UUID: {0}")]
    InvalidId(#[from] uuid::Error),
    #[error("Stored attestation payload is not valid JSON: {0}")]
    InvalidAttestation(#[from] serde_json::Error),
}

/// Failures while talking to the attestation service.
///
/// "Not yet" conditions (404, empty message list, pending statuses) are
/// modelled as pending probes, not as errors; only genuine transport and
/// protocol problems appear here.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Attestation service returned HTTP {status}")]
    Status { status: u16 },
    #[error("Attestation response missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("Invalid hex encoding in attestation response: {0}")]
    HexDecode(#[from] alloy::hex::FromHexError),
    #[error("Attestation still pending: {status}")]
    Pending { status: String },
    #[error("Transaction not yet known to the attestation service")]
    NotFound,
    #[error("Attestation not available after {attempts} attempts")]
    Timeout { attempts: usize },
}

impl AttestationError {
    /// True for the expected "not yet" conditions the poller retries on.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. } | Self::NotFound)
    }
}

/// Classified transfer failures surfaced to callers and recorded on the
/// ledger.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The user declined to sign; absorbed by `initiate`, never re-thrown.
    #[error("Transfer cancelled by user")]
    Cancelled,
    #[error("Insufficient USDC balance for transfer")]
    InsufficientFunds,
    #[error("Token approval failed")]
    ApprovalFailed,
    /// The active chain does not match the transfer's source chain; the
    /// caller must switch chains before initiating.
    #[error("Active chain {actual} is not the source chain {expected}")]
    WrongChain { expected: ChainId, actual: ChainId },
    /// Redemption attempted (or switch failed) while on the wrong chain;
    /// names both chains for user guidance.
    #[error("Switch to {expected} to complete the redemption; currently on {actual}")]
    ChainMismatch { expected: String, actual: String },
    #[error("Attestation retrieval failed: {0}")]
    Attestation(#[from] AttestationError),
    /// The message was already received on the destination chain.
    #[error("Transfer has already been completed")]
    AlreadyCompleted,
    /// The burn was never indexed by the attestation network.
    #[error("Transfer not found on the attestation network")]
    NotFoundOnNetwork,
    #[error("Network error: {0}")]
    Network(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Transfer failed: {0}")]
    Unknown(String),
}

impl TransferError {
    /// Short, non-technical message recorded on the ledger and shown to the
    /// user. Raw transport errors are never surfaced verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Self::Cancelled => "cancelled".to_string(),
            Self::InsufficientFunds => "insufficient funds".to_string(),
            Self::ApprovalFailed => "approval failed".to_string(),
            Self::WrongChain { .. } => "active chain is not the source chain".to_string(),
            Self::ChainMismatch { expected, actual } => {
                format!("switch to {expected} to complete the redemption; currently on {actual}")
            }
            Self::Attestation(_) => "attestation failed".to_string(),
            Self::AlreadyCompleted => "transfer already completed".to_string(),
            Self::NotFoundOnNetwork => {
                "transfer not found on the attestation network".to_string()
            }
            Self::Network(_) => "network error".to_string(),
            Self::Validation(err) => err.to_string(),
            Self::Ledger(_) => "storage error".to_string(),
            Self::Unknown(_) => "transaction failed".to_string(),
        }
    }
}

/// Maps a chain client failure into the transfer taxonomy. Approval-phase
/// failures are further collapsed to [`TransferError::ApprovalFailed`] at the
/// call site.
pub(crate) fn classify_chain_error(err: ChainClientError) -> TransferError {
    match err {
        ChainClientError::Rejected => TransferError::Cancelled,
        ChainClientError::InsufficientFunds => TransferError::InsufficientFunds,
        ChainClientError::Transport(msg) => TransferError::Network(msg),
        ChainClientError::Reverted(msg) => TransferError::Unknown(msg),
        ChainClientError::UnsupportedChain(chain) => {
            TransferError::Validation(ValidationError::UnknownChain(UnknownChainError(chain)))
        }
    }
}
