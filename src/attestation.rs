//! Polling client for Circle's attestation (Iris) API.
//!
//! After a burn transaction confirms, the attestation service eventually
//! publishes a signed message for it at
//! `GET /v2/messages/{domain}?transactionHash={hash}`. This client polls that
//! endpoint at a fixed interval until the message reaches `complete` status.
//!
//! Treating HTTP 404 and an empty `messages` array as "not yet" rather than
//! as errors is deliberate policy: the service indexes burns asynchronously
//! and both responses are routine in the first minutes after a burn. Genuine
//! transport failures and non-404 error statuses propagate to the caller.
//!
//! [`AttestationClient::retrieve`] is unbounded by default because
//! attestation latency is externally controlled (minutes to hours); callers
//! cancel it by dropping the future or aborting its task. The recovery
//! scanner instead uses [`AttestationClient::check_once`], a single
//! non-looping probe.

use std::time::Duration;

use alloy::primitives::{Bytes, TxHash};
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::AttestationError;
use crate::transfer::{Attestation, AttestationStatus};

/// Default production endpoint.
pub const DEFAULT_API_BASE: &str = "https://iris-api.circle.com";

/// Default interval between polls. Attestations for fast transfers land in
/// tens of seconds; standard transfers can take 20 minutes or more.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Explicit polling policy so the loop is testable with short intervals.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Upper bound on probes; `None` polls until cancelled.
    pub max_attempts: Option<usize>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }
}

/// Result of a single, non-looping attestation query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationProbe {
    /// Signed message available; terminal.
    Complete(Attestation),
    /// The service knows the transaction but has not finished attesting.
    Pending {
        status: String,
        delay_reason: Option<String>,
    },
    /// The service has not indexed the transaction at all (404 or empty
    /// message list).
    NotFound,
}

/// HTTP client for the attestation service.
#[derive(Debug, Clone)]
pub struct AttestationClient {
    http_client: reqwest::Client,
    api_base: String,
    policy: PollPolicy,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MessageEntry {
    attestation: Option<String>,
    message: Option<String>,
    status: String,
    event_nonce: Option<String>,
    cctp_version: Option<u32>,
    delay_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<MessageEntry>,
}

impl AttestationClient {
    pub fn new(
        api_base: impl Into<String>,
        policy: PollPolicy,
    ) -> Result<Self, AttestationError> {
        let http_client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            http_client,
            api_base: api_base.into(),
            policy,
        })
    }

    /// Queries the service once for the burn transaction's message.
    pub async fn check_once(
        &self,
        source_domain: u32,
        burn_tx_hash: TxHash,
    ) -> Result<AttestationProbe, AttestationError> {
        let url = format!(
            "{}/v2/messages/{source_domain}?transactionHash={burn_tx_hash}",
            self.api_base
        );

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Ok(AttestationProbe::NotFound);
        }
        if !status.is_success() {
            return Err(AttestationError::Status {
                status: status.as_u16(),
            });
        }

        let body: MessagesResponse = response.json().await?;
        let Some(entry) = body.messages.first() else {
            return Ok(AttestationProbe::NotFound);
        };

        if entry.status != "complete" {
            if let Some(delay_reason) = &entry.delay_reason {
                debug!(status = %entry.status, %delay_reason, "Attestation delayed");
            }
            return Ok(AttestationProbe::Pending {
                status: entry.status.clone(),
                delay_reason: entry.delay_reason.clone(),
            });
        }

        let message_hex = entry
            .message
            .as_ref()
            .ok_or(AttestationError::MissingField { field: "message" })?;
        let attestation_hex = entry
            .attestation
            .as_ref()
            .ok_or(AttestationError::MissingField {
                field: "attestation",
            })?;

        let message = Bytes::from(alloy::hex::decode(message_hex)?);
        let attestation = Bytes::from(alloy::hex::decode(attestation_hex)?);

        Ok(AttestationProbe::Complete(Attestation {
            message,
            attestation,
            status: AttestationStatus::Complete,
            event_nonce: entry.event_nonce.clone(),
            cctp_version: entry.cctp_version,
            delay_reason: entry.delay_reason.clone(),
        }))
    }

    /// Polls until the attestation is complete or the policy's attempt bound
    /// is exhausted. Pending probes retry; everything else propagates.
    pub async fn retrieve(
        &self,
        source_domain: u32,
        burn_tx_hash: TxHash,
    ) -> Result<Attestation, AttestationError> {
        let max_attempts = self.policy.max_attempts.unwrap_or(usize::MAX);

        info!(source_domain, %burn_tx_hash, "Polling attestation service");

        let backoff = ConstantBuilder::default()
            .with_delay(self.policy.interval)
            .with_max_times(max_attempts);

        let fetch = || async {
            match self.check_once(source_domain, burn_tx_hash).await? {
                AttestationProbe::Complete(attestation) => Ok(attestation),
                AttestationProbe::Pending { status, .. } => {
                    Err(AttestationError::Pending { status })
                }
                AttestationProbe::NotFound => Err(AttestationError::NotFound),
            }
        };

        fetch
            .retry(backoff)
            .when(AttestationError::is_pending)
            .notify(|err, dur| match err {
                AttestationError::Pending { status } => {
                    info!(%status, ?dur, "Attestation pending, retrying");
                }
                AttestationError::NotFound => {
                    debug!(?dur, "Transaction not indexed yet, retrying");
                }
                err => warn!(?err, ?dur, "Attestation error"),
            })
            .await
            .map_err(|err| {
                if err.is_pending() {
                    AttestationError::Timeout {
                        attempts: max_attempts,
                    }
                } else {
                    err
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;
    use httpmock::prelude::*;

    const BURN_TX: TxHash =
        b256!("0x1111111111111111111111111111111111111111111111111111111111111111");

    fn client(server: &MockServer, interval_ms: u64, max_attempts: Option<usize>) -> AttestationClient {
        AttestationClient::new(
            server.base_url(),
            PollPolicy {
                interval: Duration::from_millis(interval_ms),
                max_attempts,
            },
        )
        .unwrap()
    }

    fn complete_body() -> serde_json::Value {
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

    async fn wait_for_hits(mock: &httpmock::Mock<'_>, hits: usize) {
        while mock.hits() < hits {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn check_once_returns_complete_attestation() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v2/messages/0")
                .query_param("transactionHash", BURN_TX.to_string());
            then.status(200).json_body(complete_body());
        });

        let probe = client(&server, 10, None)
            .check_once(0, BURN_TX)
            .await
            .unwrap();

        let AttestationProbe::Complete(attestation) = probe else {
            panic!("expected complete probe, got {probe:?}");
        };
        assert_eq!(attestation.message, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(
            attestation.attestation,
            Bytes::from(vec![0xfe, 0xed, 0xfa, 0xce])
        );
        assert_eq!(attestation.event_nonce.as_deref(), Some("42"));
        assert_eq!(attestation.cctp_version, Some(2));
    }

    #[tokio::test]
    async fn check_once_treats_404_as_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(404);
        });

        let probe = client(&server, 10, None)
            .check_once(0, BURN_TX)
            .await
            .unwrap();

        assert_eq!(probe, AttestationProbe::NotFound);
    }

    #[tokio::test]
    async fn check_once_treats_empty_messages_as_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(200).json_body(serde_json::json!({"messages": []}));
        });

        let probe = client(&server, 10, None)
            .check_once(0, BURN_TX)
            .await
            .unwrap();

        assert_eq!(probe, AttestationProbe::NotFound);
    }

    #[tokio::test]
    async fn check_once_surfaces_delay_reason_on_pending_confirmations() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(200).json_body(serde_json::json!({
                "messages": [{
                    "status": "pending_confirmations",
                    "delayReason": "awaiting source finality"
                }]
            }));
        });

        let probe = client(&server, 10, None)
            .check_once(0, BURN_TX)
            .await
            .unwrap();

        assert_eq!(
            probe,
            AttestationProbe::Pending {
                status: "pending_confirmations".to_string(),
                delay_reason: Some("awaiting source finality".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn check_once_propagates_server_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(500);
        });

        let err = client(&server, 10, None)
            .check_once(0, BURN_TX)
            .await
            .unwrap_err();

        assert!(matches!(err, AttestationError::Status { status: 500 }));
    }

    #[tokio::test]
    async fn retrieve_returns_on_third_call_after_404_then_pending() {
        let server = MockServer::start();
        let client = client(&server, 20, None);

        let mut not_found = server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(404);
        });

        let handle = {
            let client = client.clone();
            tokio::spawn(async move { client.retrieve(0, BURN_TX).await })
        };

        wait_for_hits(&not_found, 1).await;
        not_found.delete();

        let mut pending = server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(200).json_body(serde_json::json!({
                "messages": [{"status": "pending_confirmations"}]
            }));
        });
        wait_for_hits(&pending, 1).await;
        pending.delete();

        let complete = server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(200).json_body(complete_body());
        });

        let attestation = handle.await.unwrap().unwrap();

        assert_eq!(attestation.message, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(
            attestation.attestation,
            Bytes::from(vec![0xfe, 0xed, 0xfa, 0xce])
        );
        assert!(complete.hits() >= 1);
    }

    #[tokio::test]
    async fn retrieve_times_out_when_attempts_are_bounded() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(404);
        });

        let err = client(&server, 5, Some(3))
            .retrieve(0, BURN_TX)
            .await
            .unwrap_err();

        assert!(matches!(err, AttestationError::Timeout { attempts: 3 }));
        assert!(mock.hits() >= 3);
    }

    #[tokio::test]
    async fn retrieve_propagates_server_errors_without_retrying() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v2/messages/0");
            then.status(503);
        });

        let err = client(&server, 5, Some(10))
            .retrieve(0, BURN_TX)
            .await
            .unwrap_err();

        assert!(matches!(err, AttestationError::Status { status: 503 }));
        assert_eq!(mock.hits(), 1);
    }
}
