//! Transfer state machine.
//!
//! Drives a transfer from validation through burn, attestation and mint,
//! classifying chain client failures into the transfer error taxonomy and
//! persisting every post-burn transition through the ledger. Nothing is
//! persisted before the burn transaction confirms; a failure up to that point
//! leaves no durable trace.
//!
//! Redemption is a separate, explicit call. `initiate` stops at
//! `attestation_ready` so the owner controls when the destination-chain
//! transaction is signed; `resume` and `manual_recover` re-enter the flow for
//! transfers interrupted mid-way.
//!
//! Every transition is published on a `tokio::sync::watch` channel so a
//! presentation layer (out of scope here) always observes the latest state,
//! even when it subscribes late.

use alloy::primitives::{TxHash, U256};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::attestation::AttestationClient;
use crate::chain::{BurnRequest, ChainClient, ChainClientError, ChainId};
use crate::error::{TransferError, ValidationError, classify_chain_error};
use crate::ledger::{Ledger, TransferPatch};
use crate::registry::{self, FAST_TRANSFER_THRESHOLD, STANDARD_TRANSFER_THRESHOLD};
use crate::transfer::{
    Attestation, TransferRecord, TransferRequest, TransferStatus, TransferStatusUpdate,
};

/// Result of a completed `initiate` call.
#[derive(Debug)]
pub enum InitiateOutcome {
    /// The burn confirmed and the attestation is available; the transfer now
    /// waits for an explicit `redeem`.
    AttestationReady(TransferRecord),
    /// The user declined a signature; nothing was persisted or submitted
    /// beyond what they already signed.
    Cancelled,
}

pub struct Orchestrator<C> {
    chain: C,
    ledger: Ledger,
    attestation: AttestationClient,
    updates: watch::Sender<TransferStatusUpdate>,
}

impl<C: ChainClient> Orchestrator<C> {
    pub fn new(chain: C, ledger: Ledger, attestation: AttestationClient) -> Self {
        let (updates, _) = watch::channel(TransferStatusUpdate::idle());
        Self {
            chain,
            ledger,
            attestation,
            updates,
        }
    }

    /// Status stream for the presentation layer. Late subscribers observe the
    /// most recent update immediately.
    pub fn subscribe(&self) -> watch::Receiver<TransferStatusUpdate> {
        self.updates.subscribe()
    }

    /// Runs a transfer from validation through burn and attestation, stopping
    /// at `attestation_ready`.
    ///
    /// The record is persisted only once the burn confirms; earlier failures
    /// are published on the status channel but leave the ledger untouched.
    /// A user-declined signature resolves to [`InitiateOutcome::Cancelled`]
    /// instead of an error.
    pub async fn initiate(
        &self,
        request: TransferRequest,
    ) -> Result<InitiateOutcome, TransferError> {
        if request.amount.is_zero() {
            return Err(ValidationError::ZeroAmount.into());
        }
        if request.source_chain == request.destination_chain {
            return Err(ValidationError::SameChain(request.source_chain).into());
        }
        let source = registry::resolve(request.source_chain).map_err(ValidationError::from)?;
        let destination =
            registry::resolve(request.destination_chain).map_err(ValidationError::from)?;

        info!(
            source_chain = %request.source_chain,
            destination_chain = %request.destination_chain,
            amount = %request.amount,
            fast = request.use_fast_transfer,
            "Initiating transfer"
        );

        if let Err(err) = self.ensure_active_chain(request.source_chain).await {
            return self.absorb(err);
        }

        let balance = match self
            .chain
            .balance_of(request.source_chain, source.usdc, request.owner)
            .await
        {
            Ok(balance) => balance,
            Err(err) => return self.absorb(classify_chain_error(err)),
        };
        if balance < request.amount {
            return self.absorb(TransferError::InsufficientFunds);
        }

        if let Err(err) = self.ensure_allowance(&request, source.usdc).await {
            return self.absorb(err);
        }

        let max_fee = if request.use_fast_transfer {
            // Fee rounds down; the messenger rejects a zero max fee on a fast
            // transfer, so floor it at one smallest unit.
            (request.amount * U256::from(source.fast_transfer_fee_bps) / U256::from(10_000))
                .max(U256::from(1))
        } else {
            U256::ZERO
        };
        let burn = BurnRequest {
            amount: request.amount,
            destination_domain: destination.domain,
            mint_recipient: request.destination_address,
            burn_token: source.usdc,
            max_fee,
            min_finality_threshold: if request.use_fast_transfer {
                FAST_TRANSFER_THRESHOLD
            } else {
                STANDARD_TRANSFER_THRESHOLD
            },
        };

        self.publish(TransferStatusUpdate::of(TransferStatus::Burning));
        let burn_tx_hash = match self.chain.deposit_for_burn(request.source_chain, burn).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => return self.absorb(classify_chain_error(err)),
        };
        self.publish(
            TransferStatusUpdate::of(TransferStatus::Burning).with_burn_tx(burn_tx_hash),
        );

        if let Err(err) = self
            .chain
            .wait_for_confirmation(request.source_chain, burn_tx_hash)
            .await
        {
            return self.absorb(classify_chain_error(err));
        }

        // The burn is now irreversible; from here every transition is durable
        // and the burn hash is the stable external key.
        let mut record = TransferRecord::new(&request);
        record.burn_tx_hash = Some(burn_tx_hash);
        record.status = TransferStatus::WaitingAttestation;
        self.ledger.save(&record).await?;
        self.publish(
            TransferStatusUpdate::of(TransferStatus::WaitingAttestation)
                .with_burn_tx(burn_tx_hash),
        );
        info!(%burn_tx_hash, transfer_id = %record.id, "Burn confirmed, awaiting attestation");

        match self.attestation.retrieve(source.domain, burn_tx_hash).await {
            Ok(attestation) => {
                let updated = self
                    .ledger
                    .update_by_burn_hash(
                        burn_tx_hash,
                        TransferPatch::status(TransferStatus::AttestationReady)
                            .with_attestation(attestation.clone()),
                    )
                    .await?;
                self.publish(
                    TransferStatusUpdate::of(TransferStatus::AttestationReady)
                        .with_burn_tx(burn_tx_hash)
                        .with_attestation(attestation.clone()),
                );

                let record = match updated {
                    Some(record) => record,
                    None => {
                        record.status = TransferStatus::AttestationReady;
                        record.attestation = Some(attestation);
                        record
                    }
                };
                info!(%burn_tx_hash, "Attestation ready, awaiting redemption");
                Ok(InitiateOutcome::AttestationReady(record))
            }
            Err(err) => {
                let err = TransferError::from(err);
                self.record_failure(burn_tx_hash, &err).await;
                Err(err)
            }
        }
    }

    /// Mints a previously attested transfer on its destination chain,
    /// switching the active chain there first if necessary.
    ///
    /// On failure the record reverts to `attestation_ready` with the
    /// attestation retained, so a retry needs no re-poll.
    pub async fn redeem(&self, burn_tx_hash: TxHash) -> Result<TxHash, TransferError> {
        let record = self
            .ledger
            .get_by_burn_hash(burn_tx_hash)
            .await?
            .ok_or_else(|| {
                TransferError::Unknown(format!("no transfer recorded for burn {burn_tx_hash}"))
            })?;

        if record.mint_tx_hash.is_some() || record.status == TransferStatus::Completed {
            return Err(TransferError::AlreadyCompleted);
        }
        let attestation = record.attestation.clone().ok_or_else(|| {
            TransferError::Unknown("transfer has no retrieved attestation yet".to_string())
        })?;

        self.mint(burn_tx_hash, record.destination_chain, &attestation, true)
            .await
    }

    /// Re-enters an interrupted transfer at `waiting_attestation` from its
    /// stable burn hash, then drives it straight through to `completed`.
    ///
    /// Unlike `redeem`, the active chain must already be the destination;
    /// resumption is a background flow with no user present to approve a
    /// chain switch.
    pub async fn resume(&self, burn_tx_hash: TxHash) -> Result<TxHash, TransferError> {
        let record = self
            .ledger
            .get_by_burn_hash(burn_tx_hash)
            .await?
            .ok_or_else(|| {
                TransferError::Unknown(format!("no transfer recorded for burn {burn_tx_hash}"))
            })?;

        if record.mint_tx_hash.is_some() || record.status == TransferStatus::Completed {
            return Err(TransferError::AlreadyCompleted);
        }
        let source = registry::resolve(record.source_chain).map_err(ValidationError::from)?;

        info!(%burn_tx_hash, transfer_id = %record.id, "Resuming transfer");
        self.ledger
            .update_by_burn_hash(
                burn_tx_hash,
                TransferPatch::status(TransferStatus::WaitingAttestation),
            )
            .await?;
        self.publish(
            TransferStatusUpdate::of(TransferStatus::WaitingAttestation)
                .with_burn_tx(burn_tx_hash),
        );

        let attestation = match self.attestation.retrieve(source.domain, burn_tx_hash).await {
            Ok(attestation) => attestation,
            Err(err) => {
                let err = TransferError::from(err);
                self.record_failure(burn_tx_hash, &err).await;
                return Err(err);
            }
        };
        self.ledger
            .update_by_burn_hash(
                burn_tx_hash,
                TransferPatch::status(TransferStatus::AttestationReady)
                    .with_attestation(attestation.clone()),
            )
            .await?;
        self.publish(
            TransferStatusUpdate::of(TransferStatus::AttestationReady)
                .with_burn_tx(burn_tx_hash)
                .with_attestation(attestation.clone()),
        );

        self.mint(burn_tx_hash, record.destination_chain, &attestation, false)
            .await
    }

    /// Ledger-independent recovery: re-derives the source domain, polls the
    /// attestation service and mints. Exists for transfers whose record was
    /// lost or never written; any matching ledger record is updated on a
    /// best-effort basis. The active chain must already be the destination.
    pub async fn manual_recover(
        &self,
        burn_tx_hash: TxHash,
        source_chain: ChainId,
        destination_chain: ChainId,
    ) -> Result<TxHash, TransferError> {
        let source = registry::resolve(source_chain).map_err(ValidationError::from)?;
        registry::resolve(destination_chain).map_err(ValidationError::from)?;

        if let Some(record) = self.ledger.get_by_burn_hash(burn_tx_hash).await? {
            if record.mint_tx_hash.is_some() || record.status == TransferStatus::Completed {
                return Err(TransferError::AlreadyCompleted);
            }
        }

        info!(%burn_tx_hash, %source_chain, %destination_chain, "Manual recovery");
        self.publish(
            TransferStatusUpdate::of(TransferStatus::WaitingAttestation)
                .with_burn_tx(burn_tx_hash),
        );

        let attestation = match self.attestation.retrieve(source.domain, burn_tx_hash).await {
            Ok(attestation) => attestation,
            Err(err) => {
                let err = TransferError::from(err);
                self.record_failure(burn_tx_hash, &err).await;
                return Err(err);
            }
        };
        self.ledger
            .update_by_burn_hash(
                burn_tx_hash,
                TransferPatch::status(TransferStatus::AttestationReady)
                    .with_attestation(attestation.clone()),
            )
            .await?;
        self.publish(
            TransferStatusUpdate::of(TransferStatus::AttestationReady)
                .with_burn_tx(burn_tx_hash)
                .with_attestation(attestation.clone()),
        );

        self.mint(burn_tx_hash, destination_chain, &attestation, false)
            .await
    }

    /// Submits `receiveMessage()` on the destination chain and finalises the
    /// record. With `auto_switch` the wallet is asked to change chains first;
    /// without it a mismatch is an immediate `ChainMismatch`.
    async fn mint(
        &self,
        burn_tx_hash: TxHash,
        destination_chain: ChainId,
        attestation: &Attestation,
        auto_switch: bool,
    ) -> Result<TxHash, TransferError> {
        let active = self.chain.active_chain().await.map_err(classify_chain_error)?;
        if active != destination_chain {
            let switched = if auto_switch {
                self.publish(
                    TransferStatusUpdate::of(TransferStatus::SwitchingChain)
                        .with_burn_tx(burn_tx_hash),
                );
                self.chain.request_switch_chain(destination_chain).await.is_ok()
                    && self
                        .chain
                        .active_chain()
                        .await
                        .map_err(classify_chain_error)?
                        == destination_chain
            } else {
                false
            };

            if !switched {
                let err = TransferError::ChainMismatch {
                    expected: registry::chain_name(destination_chain),
                    actual: registry::chain_name(active),
                };
                self.revert_after_mint_failure(burn_tx_hash, &err).await;
                return Err(err);
            }
        }

        self.publish(
            TransferStatusUpdate::of(TransferStatus::Minting).with_burn_tx(burn_tx_hash),
        );
        self.ledger
            .update_by_burn_hash(burn_tx_hash, TransferPatch::status(TransferStatus::Minting))
            .await?;

        let mint_tx_hash = match self
            .chain
            .receive_message(
                destination_chain,
                attestation.message.clone(),
                attestation.attestation.clone(),
            )
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(err) if is_duplicate_message(&err) => {
                // Someone else already delivered this message; the transfer
                // is finished even though we did not submit the mint.
                info!(%burn_tx_hash, "Message already received on destination");
                self.ledger
                    .update_by_burn_hash(
                        burn_tx_hash,
                        TransferPatch::status(TransferStatus::Completed),
                    )
                    .await?;
                self.publish(
                    TransferStatusUpdate::of(TransferStatus::Completed)
                        .with_burn_tx(burn_tx_hash),
                );
                return Err(TransferError::AlreadyCompleted);
            }
            Err(err) => {
                let err = classify_chain_error(err);
                self.revert_after_mint_failure(burn_tx_hash, &err).await;
                return Err(err);
            }
        };

        if let Err(err) = self
            .chain
            .wait_for_confirmation(destination_chain, mint_tx_hash)
            .await
        {
            let err = classify_chain_error(err);
            self.revert_after_mint_failure(burn_tx_hash, &err).await;
            return Err(err);
        }

        self.ledger
            .update_by_burn_hash(
                burn_tx_hash,
                TransferPatch::default().with_mint_tx(mint_tx_hash),
            )
            .await?;
        self.publish(
            TransferStatusUpdate::of(TransferStatus::Completed)
                .with_burn_tx(burn_tx_hash)
                .with_mint_tx(mint_tx_hash),
        );
        info!(%burn_tx_hash, %mint_tx_hash, "Transfer completed");
        Ok(mint_tx_hash)
    }

    /// The burn must be signed on the source chain the caller chose;
    /// `initiate` never switches chains itself, the caller does that
    /// out-of-band before retrying.
    async fn ensure_active_chain(&self, expected: ChainId) -> Result<(), TransferError> {
        let active = self.chain.active_chain().await.map_err(classify_chain_error)?;
        if active != expected {
            return Err(TransferError::WrongChain {
                expected,
                actual: active,
            });
        }
        Ok(())
    }

    /// Tops up the messenger's allowance when it cannot cover the amount.
    async fn ensure_allowance(
        &self,
        request: &TransferRequest,
        usdc: alloy::primitives::Address,
    ) -> Result<(), TransferError> {
        let endpoints = registry::resolve(request.source_chain).map_err(ValidationError::from)?;
        let allowance = self
            .chain
            .allowance(
                request.source_chain,
                usdc,
                request.owner,
                endpoints.token_messenger,
            )
            .await
            .map_err(classify_chain_error)?;
        if allowance >= request.amount {
            return Ok(());
        }

        self.publish(TransferStatusUpdate::of(TransferStatus::Approving));
        let tx_hash = self
            .chain
            .approve(
                request.source_chain,
                usdc,
                endpoints.token_messenger,
                request.amount,
            )
            .await
            .map_err(|err| match classify_chain_error(err) {
                TransferError::Cancelled => TransferError::Cancelled,
                _ => TransferError::ApprovalFailed,
            })?;
        self.publish(TransferStatusUpdate::of(TransferStatus::Approving).with_tx(tx_hash));

        self.chain
            .wait_for_confirmation(request.source_chain, tx_hash)
            .await
            .map_err(|_| TransferError::ApprovalFailed)?;
        Ok(())
    }

    /// Terminal handling for pre-burn failures: a cancellation resets the
    /// published state to idle and resolves successfully, anything else is
    /// published as an error and re-thrown.
    fn absorb(&self, err: TransferError) -> Result<InitiateOutcome, TransferError> {
        if matches!(err, TransferError::Cancelled) {
            info!("Transfer cancelled by user");
            self.publish(TransferStatusUpdate::idle());
            return Ok(InitiateOutcome::Cancelled);
        }

        warn!(%err, "Transfer failed before burn");
        self.publish(
            TransferStatusUpdate::of(TransferStatus::Error).with_error(err.user_message()),
        );
        Err(err)
    }

    /// Records a post-burn failure on the ledger and the status channel.
    async fn record_failure(&self, burn_tx_hash: TxHash, err: &TransferError) {
        warn!(%burn_tx_hash, %err, "Transfer failed after burn");
        let message = err.user_message();
        if let Err(db_err) = self
            .ledger
            .update_by_burn_hash(
                burn_tx_hash,
                TransferPatch::status(TransferStatus::Error).with_error(message.clone()),
            )
            .await
        {
            warn!(%burn_tx_hash, %db_err, "Failed to record transfer failure");
        }
        self.publish(
            TransferStatusUpdate::of(TransferStatus::Error)
                .with_burn_tx(burn_tx_hash)
                .with_error(message),
        );
    }

    /// The sanctioned status regression: a failed redemption returns to
    /// `attestation_ready` with the attestation retained so a retry needs no
    /// re-poll.
    async fn revert_after_mint_failure(&self, burn_tx_hash: TxHash, err: &TransferError) {
        warn!(%burn_tx_hash, %err, "Redemption failed, reverting to attestation_ready");
        let message = err.user_message();
        if let Err(db_err) = self
            .ledger
            .update_by_burn_hash(
                burn_tx_hash,
                TransferPatch::status(TransferStatus::AttestationReady)
                    .with_error(message.clone()),
            )
            .await
        {
            warn!(%burn_tx_hash, %db_err, "Failed to record redemption failure");
        }
        self.publish(
            TransferStatusUpdate::of(TransferStatus::AttestationReady)
                .with_burn_tx(burn_tx_hash)
                .with_error(message),
        );
    }

    fn publish(&self, update: TransferStatusUpdate) {
        self.updates.send_replace(update);
    }
}

fn is_duplicate_message(err: &ChainClientError) -> bool {
    match err {
        ChainClientError::Reverted(reason) => {
            let reason = reason.to_ascii_lowercase();
            reason.contains("nonce already used") || reason.contains("already received")
        }
        _ => false,
    }
}
