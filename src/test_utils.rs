//! Shared test fixtures: in-memory database setup, record builders and a
//! scriptable mock chain client.

use std::sync::Mutex;

use alloy::primitives::{Address, B256, Bytes, TxHash, U256, address};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::chain::{BurnRequest, ChainClient, ChainClientError, ChainId};
use crate::transfer::{
    Attestation, AttestationStatus, TransferId, TransferRecord, TransferStatus,
};

const APPROVE_TX: TxHash = B256::repeat_byte(0xA1);
const BURN_TX: TxHash = B256::repeat_byte(0xB1);
const MINT_TX: TxHash = B256::repeat_byte(0xC1);

/// Fresh in-memory SQLite pool with all migrations applied.
pub(crate) async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    pool
}

/// Deterministic attestation payload matching [`complete_attestation_body`].
pub(crate) fn completed_attestation() -> Attestation {
    Attestation {
        message: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
        attestation: Bytes::from(vec![0xfe, 0xed, 0xfa, 0xce]),
        status: AttestationStatus::Complete,
        event_nonce: Some("42".to_string()),
        cctp_version: Some(2),
        delay_reason: None,
    }
}

/// The attestation service response body [`completed_attestation`] decodes
/// from.
pub(crate) fn complete_attestation_body() -> serde_json::Value {
    serde_json::json!({
        "messages": [{
            "status": "complete",
            "message": "0xdeadbeef",
            "attestation": "0xfeedface",
            "eventNonce": "42",
            "cctpVersion": 2
        }]
    })
}

/// A valid Base-to-Arbitrum record; callers override the fields under test.
pub(crate) fn test_record(
    status: TransferStatus,
    burn_tx_hash: Option<TxHash>,
) -> TransferRecord {
    let now = chrono::Utc::now();
    TransferRecord {
        id: TransferId::generate(),
        owner_address: address!("0x1111111111111111111111111111111111111111"),
        source_chain: ChainId(8453),
        destination_chain: ChainId(42161),
        amount: U256::from(1_000_000u64),
        destination_address: address!("0x2222222222222222222222222222222222222222"),
        burn_tx_hash,
        mint_tx_hash: None,
        status,
        error: None,
        attestation: None,
        created_at: now,
        updated_at: now,
    }
}

/// Chain client double returning deterministic hashes, with per-operation
/// scripted failures and a call log for interaction assertions.
pub(crate) struct MockChainClient {
    active_chain: Mutex<ChainId>,
    balance: U256,
    allowance: U256,
    approve_error: Option<ChainClientError>,
    burn_error: Option<ChainClientError>,
    receive_error: Option<ChainClientError>,
    switch_error: Option<ChainClientError>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockChainClient {
    pub(crate) fn new(active_chain: ChainId) -> Self {
        Self {
            active_chain: Mutex::new(active_chain),
            balance: U256::MAX,
            allowance: U256::MAX,
            approve_error: None,
            burn_error: None,
            receive_error: None,
            switch_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_balance(mut self, balance: U256) -> Self {
        self.balance = balance;
        self
    }

    pub(crate) fn with_allowance(mut self, allowance: U256) -> Self {
        self.allowance = allowance;
        self
    }

    pub(crate) fn fail_burn(mut self, err: ChainClientError) -> Self {
        self.burn_error = Some(err);
        self
    }

    pub(crate) fn fail_receive(mut self, err: ChainClientError) -> Self {
        self.receive_error = Some(err);
        self
    }

    pub(crate) fn fail_switch(mut self, err: ChainClientError) -> Self {
        self.switch_error = Some(err);
        self
    }

    pub(crate) fn mint_tx_hash(&self) -> TxHash {
        MINT_TX
    }

    pub(crate) fn called(&self, name: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|call| *call == name)
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn balance_of(
        &self,
        _chain: ChainId,
        _token: Address,
        _owner: Address,
    ) -> Result<U256, ChainClientError> {
        self.record("balance_of");
        Ok(self.balance)
    }

    async fn allowance(
        &self,
        _chain: ChainId,
        _token: Address,
        _owner: Address,
        _spender: Address,
    ) -> Result<U256, ChainClientError> {
        self.record("allowance");
        Ok(self.allowance)
    }

    async fn approve(
        &self,
        _chain: ChainId,
        _token: Address,
        _spender: Address,
        _amount: U256,
    ) -> Result<TxHash, ChainClientError> {
        self.record("approve");
        match &self.approve_error {
            Some(err) => Err(err.clone()),
            None => Ok(APPROVE_TX),
        }
    }

    async fn deposit_for_burn(
        &self,
        _chain: ChainId,
        _request: BurnRequest,
    ) -> Result<TxHash, ChainClientError> {
        self.record("deposit_for_burn");
        match &self.burn_error {
            Some(err) => Err(err.clone()),
            None => Ok(BURN_TX),
        }
    }

    async fn receive_message(
        &self,
        _chain: ChainId,
        _message: Bytes,
        _attestation: Bytes,
    ) -> Result<TxHash, ChainClientError> {
        self.record("receive_message");
        match &self.receive_error {
            Some(err) => Err(err.clone()),
            None => Ok(MINT_TX),
        }
    }

    async fn wait_for_confirmation(
        &self,
        _chain: ChainId,
        _tx_hash: TxHash,
    ) -> Result<(), ChainClientError> {
        self.record("wait_for_confirmation");
        Ok(())
    }

    async fn active_chain(&self) -> Result<ChainId, ChainClientError> {
        self.record("active_chain");
        Ok(*self.active_chain.lock().unwrap())
    }

    async fn request_switch_chain(&self, chain: ChainId) -> Result<(), ChainClientError> {
        self.record("request_switch_chain");
        match &self.switch_error {
            Some(err) => Err(err.clone()),
            None => {
                *self.active_chain.lock().unwrap() = chain;
                Ok(())
            }
        }
    }
}
