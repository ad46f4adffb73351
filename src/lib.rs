//! Resumable client for Circle's Cross-Chain Transfer Protocol (CCTP) V2.
//!
//! A transfer burns USDC on a source chain, waits for Circle's attestation
//! service to sign the resulting message, and mints on the destination chain.
//! The pieces:
//!
//! - [`orchestrator`]: the transfer state machine, from validation through
//!   burn, attestation and mint.
//! - [`attestation`]: the polling client for the attestation (Iris) API.
//! - [`ledger`]: the durable SQLite store of transfer records.
//! - [`recovery`]: the scanner that re-drives transfers orphaned mid-flight.
//! - [`registry`]: the static table of per-chain CCTP deployments.
//! - [`chain`]: the trait boundary to the wallet-backed chain client.

pub mod attestation;
pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod recovery;
pub mod registry;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use attestation::{AttestationClient, AttestationProbe, PollPolicy};
pub use chain::{BurnRequest, ChainClient, ChainClientError, ChainId};
pub use error::{AttestationError, LedgerError, TransferError, ValidationError};
pub use ledger::{Ledger, TransferPatch};
pub use orchestrator::{InitiateOutcome, Orchestrator};
pub use recovery::{RecoveryScanner, SweepIntervals, SweepReport};
pub use transfer::{
    Attestation, TransferId, TransferRecord, TransferRequest, TransferStatus,
    TransferStatusUpdate,
};
