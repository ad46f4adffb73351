//! Stuck-transfer recovery scanner.
//!
//! A transfer can be orphaned mid-flight when the process dies between the
//! burn and the mint. The scanner sweeps an owner's ledger records, flags the
//! ones that have sat in a pre-attestation state too long, and asks the
//! attestation service once (no polling loop) whether their message has
//! landed in the meantime.
//!
//! The scanner only ever moves records forward. Its writes go through the
//! ledger's guarded update, which re-reads the record inside the update
//! transaction and skips the patch when a live session has already advanced
//! it past `waiting_attestation` or finished it. Per-record failures are
//! logged and skipped, a sweep never aborts half-way.

use alloy::primitives::Address;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::attestation::{AttestationClient, AttestationProbe};
use crate::error::LedgerError;
use crate::ledger::{Ledger, TransferPatch};
use crate::registry;
use crate::transfer::{TransferRecord, TransferStatus};

/// Age after which an execution-phase transfer counts as stuck.
pub const STUCK_EXECUTION_THRESHOLD: Duration = Duration::minutes(30);

/// Age after which a `waiting_attestation` transfer counts as stuck. The
/// attestation service legitimately takes up to ~20 minutes for standard
/// transfers, so this is deliberately generous.
pub const STUCK_ATTESTATION_THRESHOLD: Duration = Duration::hours(2);

/// A burn the attestation service has never indexed this long after the
/// record's last write is considered lost and marked failed.
pub const NOT_FOUND_DEADLINE: Duration = Duration::hours(4);

/// Sweep cadence while some transfer is waiting on an attestation.
pub const ACTIVE_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Sweep cadence when nothing is in flight.
pub const IDLE_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

const NOT_FOUND_MESSAGE: &str = "not found on Circle's network";

/// Sweep cadence pair used by [`RecoveryScanner::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepIntervals {
    pub active: std::time::Duration,
    pub idle: std::time::Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            active: ACTIVE_SWEEP_INTERVAL,
            idle: IDLE_SWEEP_INTERVAL,
        }
    }
}

/// Counts reported by a single sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Records examined (all records owned by the swept address).
    pub scanned: usize,
    /// Records advanced to `attestation_ready`.
    pub recovered: usize,
    /// Records waiting on an attestation, including ones a pending probe
    /// re-affirmed during this sweep.
    pub waiting: usize,
    /// Records marked failed because the burn was never indexed.
    pub abandoned: usize,
}

impl SweepReport {
    /// True while any examined record still waits on an attestation, which
    /// selects the faster sweep cadence.
    pub fn attestation_pending(&self) -> bool {
        self.waiting > 0
    }
}

pub struct RecoveryScanner {
    ledger: Ledger,
    attestation: AttestationClient,
    intervals: SweepIntervals,
}

/// A record is stuck when it carries a burn hash (without one there is
/// nothing to look up) and has sat in a pre-attestation state past its
/// threshold.
fn is_stuck(record: &TransferRecord, now: DateTime<Utc>) -> bool {
    if record.burn_tx_hash.is_none() {
        return false;
    }
    match record.status {
        TransferStatus::SwitchingChain | TransferStatus::Approving | TransferStatus::Burning => {
            record.age(now) > STUCK_EXECUTION_THRESHOLD
        }
        TransferStatus::WaitingAttestation => record.age(now) > STUCK_ATTESTATION_THRESHOLD,
        _ => false,
    }
}

impl RecoveryScanner {
    pub fn new(ledger: Ledger, attestation: AttestationClient) -> Self {
        Self {
            ledger,
            attestation,
            intervals: SweepIntervals::default(),
        }
    }

    pub fn with_intervals(mut self, intervals: SweepIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Examines every record owned by `owner` and re-drives the stuck ones.
    /// Only the owner listing itself can fail; per-record problems are logged
    /// and skipped.
    pub async fn sweep_owner(&self, owner: Address) -> Result<SweepReport, LedgerError> {
        let now = Utc::now();
        let records = self.ledger.list_by_owner(owner).await?;
        let mut report = SweepReport {
            scanned: records.len(),
            ..SweepReport::default()
        };
        report.waiting = records
            .iter()
            .filter(|record| record.status == TransferStatus::WaitingAttestation)
            .count();

        for record in records {
            if !is_stuck(&record, now) {
                continue;
            }
            if let Err(err) = self.recover_record(&record, now, &mut report).await {
                warn!(
                    transfer_id = %record.id,
                    %err,
                    "Recovery attempt failed, will retry on next sweep"
                );
            }
        }

        if report.recovered > 0 || report.abandoned > 0 {
            info!(
                scanned = report.scanned,
                recovered = report.recovered,
                abandoned = report.abandoned,
                "Recovery sweep finished"
            );
        }
        Ok(report)
    }

    /// Periodic sweep loop: every 30 seconds while a transfer waits on an
    /// attestation, every 5 minutes otherwise. Runs until its task is
    /// aborted.
    pub async fn run(self, owner: Address) {
        info!(%owner, "Recovery scanner started");
        loop {
            let interval = match self.sweep_owner(owner).await {
                Ok(report) if report.attestation_pending() => self.intervals.active,
                Ok(_) => self.intervals.idle,
                Err(err) => {
                    warn!(%err, "Recovery sweep failed");
                    self.intervals.idle
                }
            };
            tokio::time::sleep(interval).await;
        }
    }

    async fn recover_record(
        &self,
        record: &TransferRecord,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), LedgerError> {
        // is_stuck guarantees the hash.
        let Some(burn_tx_hash) = record.burn_tx_hash else {
            return Ok(());
        };
        let Ok(source) = registry::resolve(record.source_chain) else {
            warn!(transfer_id = %record.id, chain = %record.source_chain, "Unknown source chain");
            return Ok(());
        };

        debug!(
            transfer_id = %record.id,
            %burn_tx_hash,
            status = %record.status,
            "Probing stuck transfer"
        );
        let probe = match self.attestation.check_once(source.domain, burn_tx_hash).await {
            Ok(probe) => probe,
            Err(err) => {
                warn!(transfer_id = %record.id, %err, "Attestation probe failed");
                return Ok(());
            }
        };

        match probe {
            AttestationProbe::Complete(attestation) => {
                let updated = self
                    .ledger
                    .update_by_burn_hash_at_most(
                        burn_tx_hash,
                        TransferStatus::WaitingAttestation,
                        TransferPatch::status(TransferStatus::AttestationReady)
                            .with_attestation(attestation),
                    )
                    .await?;
                if updated.is_some_and(|r| r.status == TransferStatus::AttestationReady) {
                    info!(transfer_id = %record.id, %burn_tx_hash, "Recovered attestation");
                    report.recovered += 1;
                }
            }
            AttestationProbe::Pending { status, .. } => {
                debug!(transfer_id = %record.id, %status, "Attestation still in progress");
                // Refreshes updated_at so the record is not re-flagged until
                // the threshold elapses again.
                let updated = self
                    .ledger
                    .update_by_burn_hash_at_most(
                        burn_tx_hash,
                        TransferStatus::WaitingAttestation,
                        TransferPatch::status(TransferStatus::WaitingAttestation),
                    )
                    .await?;
                // Records listed as waiting were already counted.
                if record.status != TransferStatus::WaitingAttestation
                    && updated.is_some_and(|r| r.status == TransferStatus::WaitingAttestation)
                {
                    report.waiting += 1;
                }
            }
            AttestationProbe::NotFound => {
                if record.age(now) <= NOT_FOUND_DEADLINE {
                    // Indexing lag is routine early on; give it more time.
                    return Ok(());
                }
                warn!(transfer_id = %record.id, %burn_tx_hash, "Burn never indexed, marking failed");
                let updated = self
                    .ledger
                    .update_by_burn_hash_at_most(
                        burn_tx_hash,
                        TransferStatus::WaitingAttestation,
                        TransferPatch::status(TransferStatus::Error)
                            .with_error(NOT_FOUND_MESSAGE),
                    )
                    .await?;
                if updated.is_some_and(|r| r.status == TransferStatus::Error) {
                    report.abandoned += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::PollPolicy;
    use crate::test_utils::{complete_attestation_body, setup_test_db, test_record};
    use alloy::primitives::{B256, TxHash, address};
    use httpmock::prelude::*;
    use sqlx::SqlitePool;

    const OWNER: Address = address!("0x1111111111111111111111111111111111111111");

    fn scanner(server: &MockServer, pool: SqlitePool) -> (RecoveryScanner, Ledger) {
        let ledger = Ledger::new(pool);
        let attestation = AttestationClient::new(server.base_url(), PollPolicy::default()).unwrap();
        (RecoveryScanner::new(ledger.clone(), attestation), ledger)
    }

    async fn backdate(
        pool: &SqlitePool,
        record: &TransferRecord,
        updated: Duration,
        created: Duration,
    ) {
        sqlx::query("UPDATE transfers SET updated_at = ?1, created_at = ?2 WHERE id = ?3")
            .bind(Utc::now() - updated)
            .bind(Utc::now() - created)
            .bind(record.id.to_string())
            .execute(pool)
            .await
            .unwrap();
    }

    #[test]
    fn stuck_classification_follows_status_thresholds() {
        let now = Utc::now();
        let burn = Some(B256::repeat_byte(1));

        let mut burning = test_record(TransferStatus::Burning, burn);
        burning.updated_at = now - Duration::minutes(45);
        assert!(is_stuck(&burning, now));

        burning.updated_at = now - Duration::minutes(10);
        assert!(!is_stuck(&burning, now));

        let mut waiting = test_record(TransferStatus::WaitingAttestation, burn);
        waiting.updated_at = now - Duration::hours(3);
        assert!(is_stuck(&waiting, now));

        waiting.updated_at = now - Duration::minutes(90);
        assert!(!is_stuck(&waiting, now));

        let mut completed = test_record(TransferStatus::Completed, burn);
        completed.updated_at = now - Duration::days(2);
        assert!(!is_stuck(&completed, now));

        let mut hashless = test_record(TransferStatus::Burning, None);
        hashless.updated_at = now - Duration::hours(1);
        assert!(!is_stuck(&hashless, now));
    }

    #[tokio::test]
    async fn sweep_recovers_a_stale_waiting_transfer() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_matches(Regex::new("/v2/messages/.*").unwrap());
            then.status(200).json_body(complete_attestation_body());
        });
        let pool = setup_test_db().await;
        let (scanner, ledger) = scanner(&server, pool.clone());

        let burn: TxHash = B256::repeat_byte(0xA0);
        let record = test_record(TransferStatus::WaitingAttestation, Some(burn));
        ledger.save(&record).await.unwrap();
        backdate(&pool, &record, Duration::hours(3), Duration::hours(3)).await;

        let report = scanner.sweep_owner(OWNER).await.unwrap();

        assert_eq!(report.recovered, 1);
        let stored = ledger.get_by_burn_hash(burn).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::AttestationReady);
        assert!(stored.attestation.is_some());
    }

    #[tokio::test]
    async fn sweep_leaves_an_unindexed_young_burn_alone() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_matches(Regex::new("/v2/messages/.*").unwrap());
            then.status(404);
        });
        let pool = setup_test_db().await;
        let (scanner, ledger) = scanner(&server, pool.clone());

        let burn: TxHash = B256::repeat_byte(0xA1);
        let record = test_record(TransferStatus::Burning, Some(burn));
        ledger.save(&record).await.unwrap();
        backdate(&pool, &record, Duration::minutes(45), Duration::minutes(45)).await;

        let report = scanner.sweep_owner(OWNER).await.unwrap();

        assert_eq!(report.recovered, 0);
        assert_eq!(report.abandoned, 0);
        let stored = ledger.get_by_burn_hash(burn).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Burning);
    }

    #[tokio::test]
    async fn sweep_abandons_a_burn_unindexed_past_the_deadline() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_matches(Regex::new("/v2/messages/.*").unwrap());
            then.status(404);
        });
        let pool = setup_test_db().await;
        let (scanner, ledger) = scanner(&server, pool.clone());

        let burn: TxHash = B256::repeat_byte(0xA2);
        let record = test_record(TransferStatus::WaitingAttestation, Some(burn));
        ledger.save(&record).await.unwrap();
        backdate(&pool, &record, Duration::hours(5), Duration::hours(5)).await;

        let report = scanner.sweep_owner(OWNER).await.unwrap();

        assert_eq!(report.abandoned, 1);
        let stored = ledger.get_by_burn_hash(burn).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Error);
        assert_eq!(stored.error.as_deref(), Some("not found on Circle's network"));
    }

    #[tokio::test]
    async fn not_found_deadline_runs_from_the_last_write() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_matches(Regex::new("/v2/messages/.*").unwrap());
            then.status(404);
        });
        let pool = setup_test_db().await;
        let (scanner, ledger) = scanner(&server, pool.clone());

        // Created long ago, but re-affirmed recently enough that the burn
        // still gets more time to be indexed.
        let burn: TxHash = B256::repeat_byte(0xA7);
        let record = test_record(TransferStatus::WaitingAttestation, Some(burn));
        ledger.save(&record).await.unwrap();
        backdate(&pool, &record, Duration::hours(3), Duration::hours(5)).await;

        let report = scanner.sweep_owner(OWNER).await.unwrap();

        assert_eq!(report.abandoned, 0);
        let stored = ledger.get_by_burn_hash(burn).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::WaitingAttestation);
    }

    #[tokio::test]
    async fn stuck_waiting_record_is_counted_once() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_matches(Regex::new("/v2/messages/.*").unwrap());
            then.status(200).json_body(serde_json::json!({
                "messages": [{"status": "pending_confirmations"}]
            }));
        });
        let pool = setup_test_db().await;
        let (scanner, ledger) = scanner(&server, pool.clone());

        let record = test_record(
            TransferStatus::WaitingAttestation,
            Some(B256::repeat_byte(0xA8)),
        );
        ledger.save(&record).await.unwrap();
        backdate(&pool, &record, Duration::hours(3), Duration::hours(3)).await;

        let report = scanner.sweep_owner(OWNER).await.unwrap();

        assert_eq!(report.waiting, 1);
    }

    #[tokio::test]
    async fn sweep_reaffirms_waiting_on_a_pending_probe() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_matches(Regex::new("/v2/messages/.*").unwrap());
            then.status(200).json_body(serde_json::json!({
                "messages": [{"status": "pending_confirmations"}]
            }));
        });
        let pool = setup_test_db().await;
        let (scanner, ledger) = scanner(&server, pool.clone());

        let burn: TxHash = B256::repeat_byte(0xA3);
        let record = test_record(TransferStatus::Burning, Some(burn));
        ledger.save(&record).await.unwrap();
        backdate(&pool, &record, Duration::hours(1), Duration::hours(1)).await;

        scanner.sweep_owner(OWNER).await.unwrap();

        let stored = ledger.get_by_burn_hash(burn).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::WaitingAttestation);
        // The refreshed timestamp defers the next probe.
        assert!(stored.age(Utc::now()) < STUCK_ATTESTATION_THRESHOLD);
    }

    #[tokio::test]
    async fn fresh_records_are_not_probed() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path_matches(Regex::new("/v2/messages/.*").unwrap());
            then.status(200).json_body(complete_attestation_body());
        });
        let pool = setup_test_db().await;
        let (scanner, ledger) = scanner(&server, pool);

        let record = test_record(
            TransferStatus::WaitingAttestation,
            Some(B256::repeat_byte(0xA4)),
        );
        ledger.save(&record).await.unwrap();

        let report = scanner.sweep_owner(OWNER).await.unwrap();

        assert_eq!(mock.hits(), 0);
        assert_eq!(report.scanned, 1);
        // Still counted as in-flight for sweep cadence purposes.
        assert!(report.attestation_pending());
    }

    #[tokio::test]
    async fn probe_failures_do_not_abort_the_sweep() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_matches(Regex::new("/v2/messages/.*").unwrap());
            then.status(500);
        });
        let pool = setup_test_db().await;
        let (scanner, ledger) = scanner(&server, pool.clone());

        for byte in [0xA5, 0xA6] {
            let record =
                test_record(TransferStatus::WaitingAttestation, Some(B256::repeat_byte(byte)));
            ledger.save(&record).await.unwrap();
            backdate(&pool, &record, Duration::hours(3), Duration::hours(3)).await;
        }

        let report = scanner.sweep_owner(OWNER).await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.recovered, 0);
        for byte in [0xA5, 0xA6] {
            let stored = ledger
                .get_by_burn_hash(B256::repeat_byte(byte))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.status, TransferStatus::WaitingAttestation);
        }
    }
}
